/*!
alu.rs - Arithmetic, logic, compare, multiply and divide families
(primary nibbles 2, 3, 6, 7 and the MAC pair).

T-flag results are built the same way throughout: clear T in SR, run a
flag-producing host op, then a predicated OR of T guarded by a short
forward skip. Carry-in/out instructions marshal T through the host carry
flag with the tpop/tpush pair.
*/

use super::{OpFlow, Translator};
use crate::bus::Sh2Bus;
use crate::drc::rcache::RegMode;
use crate::emit::{Cond, Emitter};
use crate::sh2::{GuestReg, M, M_SHIFT, Q, Q_SHIFT, S, T};

impl<E: Emitter, B: Sh2Bus> Translator<'_, E, B> {
    /// Nibble 2: register stores, division setup, logic ops, 16-bit
    /// multiplies.
    pub(super) fn op_alu_store(&mut self) -> OpFlow {
        match self.op & 0x0f {
            // MOV.B Rm,@Rn / MOV.W Rm,@Rn / MOV.L Rm,@Rn
            0x00..=0x02 => {
                let (rn, rm) = (self.rn(), self.rm());
                self.rc.clean(self.em);
                self.rc.get_reg_arg(self.em, 0, rn);
                self.rc.get_reg_arg(self.em, 1, rm);
                self.memhandler_write(u32::from(self.op & 3));
            }
            // MOV.B Rm,@-Rn / MOV.W Rm,@-Rn / MOV.L Rm,@-Rn
            0x04..=0x06 => {
                let (rn, rm) = (self.rn(), self.rm());
                let t = self.get(rn, RegMode::Rmw);
                self.em.sub_r_imm(t, 1 << (self.op & 3));
                self.rc.clean(self.em);
                self.rc.get_reg_arg(self.em, 0, rn);
                self.rc.get_reg_arg(self.em, 1, rm);
                self.memhandler_write(u32::from(self.op & 3));
            }
            // DIV0S Rm,Rn
            0x07 => {
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                let n = self.get(self.rn(), RegMode::Read);
                let m = self.get(self.rm(), RegMode::Read);
                self.em.bic_r_imm(sr, M | Q | T);
                self.em.tst_r_imm(n, 1 << 31);
                let p = self.em.sjmp_start(Cond::Eq);
                self.em.or_r_imm_c(Cond::Ne, sr, Q);
                self.em.sjmp_end(p);
                self.em.tst_r_imm(m, 1 << 31);
                let p = self.em.sjmp_start(Cond::Eq);
                self.em.or_r_imm_c(Cond::Ne, sr, M);
                self.em.sjmp_end(p);
                self.em.teq_r_r(n, m);
                let p = self.em.sjmp_start(Cond::Pl);
                self.em.or_r_imm_c(Cond::Mi, sr, T);
                self.em.sjmp_end(p);
            }
            // TST Rm,Rn
            0x08 => {
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                let n = self.get(self.rn(), RegMode::Read);
                let m = self.get(self.rm(), RegMode::Read);
                self.em.bic_r_imm(sr, T);
                self.em.tst_r_r(n, m);
                self.or_t_if_eq(sr);
            }
            // AND Rm,Rn
            0x09 => {
                let d = self.get(self.rn(), RegMode::Rmw);
                let s = self.get(self.rm(), RegMode::Read);
                self.em.and_r_r(d, s);
            }
            // XOR Rm,Rn
            0x0a => {
                let d = self.get(self.rn(), RegMode::Rmw);
                let s = self.get(self.rm(), RegMode::Read);
                self.em.eor_r_r(d, s);
            }
            // OR Rm,Rn
            0x0b => {
                let d = self.get(self.rn(), RegMode::Rmw);
                let s = self.get(self.rm(), RegMode::Read);
                self.em.or_r_r(d, s);
            }
            // CMP/STR Rm,Rn: T set if any byte matches
            0x0c => {
                let t = self.rc.get_tmp(self.em);
                let n = self.get(self.rn(), RegMode::Read);
                let m = self.get(self.rm(), RegMode::Read);
                self.em.eor_r_r_r(t, n, m);
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                self.em.bic_r_imm(sr, T);
                for mask in [0x0000_00ff, 0x0000_ff00, 0x00ff_0000, 0xff00_0000] {
                    self.em.tst_r_imm(t, mask);
                    self.or_t_if_eq(sr);
                }
                self.rc.free_tmp(t);
            }
            // XTRCT Rm,Rn
            0x0d => {
                let d = self.get(self.rn(), RegMode::Rmw);
                let s = self.get(self.rm(), RegMode::Read);
                self.em.lsr(d, d, 16);
                self.em.or_r_r_lsl(d, s, 16);
            }
            // MULU.W Rm,Rn / MULS.W Rm,Rn
            0x0e | 0x0f => {
                let n = self.get(self.rn(), RegMode::Read);
                let macl = self.get(GuestReg::Macl, RegMode::Write);
                if self.op & 1 != 0 {
                    self.em.sext(macl, n, 16);
                } else {
                    self.em.clear_msb(macl, n, 16);
                }
                let m = self.get(self.rm(), RegMode::Read);
                let t2 = self.rc.get_tmp(self.em);
                if self.op & 1 != 0 {
                    self.em.sext(t2, m, 16);
                } else {
                    self.em.clear_msb(t2, m, 16);
                }
                self.em.mul(macl, macl, t2);
                self.rc.free_tmp(t2);
                // The extra multiplier cycle is not charged; charging it
                // regressed timing-sensitive titles.
            }
            _ => return self.unhandled(),
        }
        OpFlow::Cont
    }

    /// Nibble 3: compares, DIV1, 64-bit multiplies, add/sub with carry
    /// and overflow.
    pub(super) fn op_arith_cmp(&mut self) -> OpFlow {
        match self.op & 0x0f {
            // CMP/EQ, CMP/HS, CMP/GE, CMP/HI, CMP/GT
            0x00 | 0x02 | 0x03 | 0x06 | 0x07 => {
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                let n = self.get(self.rn(), RegMode::Read);
                let m = self.get(self.rm(), RegMode::Read);
                self.em.bic_r_imm(sr, T);
                self.em.cmp_r_r(n, m);
                match self.op & 0x07 {
                    0x00 => self.or_t_if_eq(sr),
                    0x02 => {
                        let p = self.em.sjmp_start(Cond::Lo);
                        self.em.or_r_imm_c(Cond::Hs, sr, T);
                        self.em.sjmp_end(p);
                    }
                    0x03 => {
                        let p = self.em.sjmp_start(Cond::Lt);
                        self.em.or_r_imm_c(Cond::Ge, sr, T);
                        self.em.sjmp_end(p);
                    }
                    0x06 => {
                        let p = self.em.sjmp_start(Cond::Ls);
                        self.em.or_r_imm_c(Cond::Hi, sr, T);
                        self.em.sjmp_end(p);
                    }
                    _ => {
                        let p = self.em.sjmp_start(Cond::Le);
                        self.em.or_r_imm_c(Cond::Gt, sr, T);
                        self.em.sjmp_end(p);
                    }
                }
            }
            // DIV1 Rm,Rn
            //   Q1 = carry(Rn = (Rn << 1) | T)
            //   if Q ^ M: Q2 = carry(Rn += Rm) else Q2 = carry(Rn -= Rm)
            //   Q = M ^ Q1 ^ Q2, T = !(Q1 ^ Q2)
            0x04 => {
                let n = self.get(self.rn(), RegMode::Rmw);
                let m = self.get(self.rm(), RegMode::Read);
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                self.em.tpop_carry(sr, false);
                self.em.adcf_r_r(n, n);
                self.em.tpush_carry(sr, false); // Q1 parked in T
                let t4 = self.rc.get_tmp(self.em);
                self.em.and_r_r_imm(t4, sr, M);
                self.em.eor_r_r_lsr(sr, t4, M_SHIFT - Q_SHIFT); // Q ^= M
                self.rc.free_tmp(t4);
                // In: Q^M in Q, Q1 in T; out: T = Q1 ^ Q2.
                self.em.div1_step(n, m, sr);
                self.em.bic_r_imm(sr, Q);
                self.em.tst_r_imm(sr, M);
                let p = self.em.sjmp_start(Cond::Eq);
                self.em.or_r_imm_c(Cond::Ne, sr, Q); // Q = M
                self.em.sjmp_end(p);
                self.em.tst_r_imm(sr, T);
                let p = self.em.sjmp_start(Cond::Eq);
                self.em.eor_r_imm_c(Cond::Ne, sr, Q); // Q = M ^ Q1 ^ Q2
                self.em.sjmp_end(p);
                self.em.eor_r_imm(sr, T); // T = !(Q1 ^ Q2)
            }
            // DMULU.L Rm,Rn
            0x05 => {
                let n = self.get(self.rn(), RegMode::Read);
                let m = self.get(self.rm(), RegMode::Read);
                let macl = self.get(GuestReg::Macl, RegMode::Write);
                let mach = self.get(GuestReg::Mach, RegMode::Write);
                self.em.mul_u64(macl, mach, n, m);
            }
            // SUB Rm,Rn / ADD Rm,Rn
            0x08 | 0x0c => {
                let d = self.get(self.rn(), RegMode::Rmw);
                let s = self.get(self.rm(), RegMode::Read);
                if self.op & 4 != 0 {
                    self.em.add_r_r(d, s);
                } else {
                    self.em.sub_r_r(d, s);
                }
            }
            // SUBC Rm,Rn / ADDC Rm,Rn
            0x0a | 0x0e => {
                let d = self.get(self.rn(), RegMode::Rmw);
                let s = self.get(self.rm(), RegMode::Read);
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                if self.op & 4 != 0 {
                    self.em.tpop_carry(sr, false);
                    self.em.adcf_r_r(d, s);
                    self.em.tpush_carry(sr, false);
                } else {
                    self.em.tpop_carry(sr, true);
                    self.em.sbcf_r_r(d, s);
                    self.em.tpush_carry(sr, true);
                }
            }
            // SUBV Rm,Rn / ADDV Rm,Rn
            0x0b | 0x0f => {
                let d = self.get(self.rn(), RegMode::Rmw);
                let s = self.get(self.rm(), RegMode::Read);
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                self.em.bic_r_imm(sr, T);
                if self.op & 4 != 0 {
                    self.em.addf_r_r(d, s);
                } else {
                    self.em.subf_r_r(d, s);
                }
                let p = self.em.sjmp_start(Cond::Vc);
                self.em.or_r_imm_c(Cond::Vs, sr, T);
                self.em.sjmp_end(p);
            }
            // DMULS.L Rm,Rn
            0x0d => {
                let n = self.get(self.rn(), RegMode::Read);
                let m = self.get(self.rm(), RegMode::Read);
                let macl = self.get(GuestReg::Macl, RegMode::Write);
                let mach = self.get(GuestReg::Mach, RegMode::Write);
                self.em.mul_s64(macl, mach, n, m);
            }
            _ => return self.unhandled(),
        }
        OpFlow::Cont
    }

    /// Nibble 6: loads (plain and post-increment) and the single-source
    /// register transforms.
    pub(super) fn op_load_alu(&mut self) -> OpFlow {
        match self.op & 0x0f {
            // MOV.B/W/L @Rm,Rn and @Rm+,Rn
            0x00..=0x02 | 0x04..=0x06 => {
                let size = u32::from(self.op & 3);
                let rm = self.rm();
                self.rc.clean(self.em);
                self.rc.get_reg_arg(self.em, 0, rm);
                let val = self.memhandler_read(size);
                let d = self.get(self.rn(), RegMode::Write);
                if size != 2 {
                    self.em.sext(d, val, if size == 1 { 16 } else { 8 });
                } else {
                    self.em.move_r_r(d, val);
                }
                self.rc.free_tmp(val);
                // Post-increment, unless the loaded value landed in the
                // address register.
                if (self.op & 7) >= 4 && self.rn_field() != self.rm_field() {
                    let t = self.get(self.rm(), RegMode::Rmw);
                    self.em.add_r_imm(t, 1 << size);
                }
            }
            0x03 | 0x07..=0x0f => {
                let s = self.get(self.rm(), RegMode::Read);
                let d = self.get(self.rn(), RegMode::Write);
                match self.op & 0x0f {
                    // MOV Rm,Rn
                    0x03 => self.em.move_r_r(d, s),
                    // NOT Rm,Rn
                    0x07 => self.em.mvn_r_r(d, s),
                    // SWAP.B Rm,Rn: swap the low two bytes, keep the top half
                    0x08 => {
                        let t3 = if s == d { self.rc.get_tmp(self.em) } else { d };
                        let t4 = self.rc.get_tmp(self.em);
                        self.em.lsr(t3, s, 16);
                        self.em.or_r_r_lsl(t3, s, 24);
                        self.em.and_r_r_imm(t4, s, 0xff00);
                        self.em.or_r_r_lsl(t3, t4, 8);
                        self.em.rol(d, t3, 16);
                        self.rc.free_tmp(t4);
                        if s == d {
                            self.rc.free_tmp(t3);
                        }
                    }
                    // SWAP.W Rm,Rn
                    0x09 => self.em.rol(d, s, 16),
                    // NEGC Rm,Rn
                    0x0a => {
                        let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                        self.em.tpop_carry(sr, true);
                        self.em.negcf_r_r(d, s);
                        self.em.tpush_carry(sr, true);
                    }
                    // NEG Rm,Rn
                    0x0b => self.em.neg_r_r(d, s),
                    // EXTU.B Rm,Rn
                    0x0c => self.em.clear_msb(d, s, 24),
                    // EXTU.W Rm,Rn
                    0x0d => self.em.clear_msb(d, s, 16),
                    // EXTS.B Rm,Rn
                    0x0e => self.em.sext(d, s, 8),
                    // EXTS.W Rm,Rn
                    _ => self.em.sext(d, s, 16),
                }
            }
            _ => return self.unhandled(),
        }
        OpFlow::Cont
    }

    /// Nibble 7: ADD #imm,Rn with a sign-extended immediate.
    pub(super) fn op_add_imm(&mut self) -> OpFlow {
        let t = self.get(self.rn(), RegMode::Rmw);
        let imm = self.op as u8;
        if imm & 0x80 != 0 {
            self.em.sub_r_imm(t, u32::from(imm.wrapping_neg()));
        } else {
            self.em.add_r_imm(t, u32::from(imm));
        }
        OpFlow::Cont
    }

    /// MAC.L @Rm+,@Rn+: 64-bit accumulate, saturated to 48 bits when S
    /// is set.
    pub(super) fn mac_l(&mut self) -> OpFlow {
        let (rnr, rmr) = self.indirect_read_double(self.rn(), self.rm(), 2);
        let sr = self.get(GuestReg::Sr, RegMode::Read);
        let mach = self.get(GuestReg::Mach, RegMode::Rmw);
        // The top 16 MAC bits are unused while saturation is on.
        self.em.tst_r_imm(sr, S);
        let p = self.em.sjmp_start(Cond::Eq);
        self.em.clear_msb_c(Cond::Ne, mach, mach, 16);
        self.em.sjmp_end(p);
        let macl = self.get(GuestReg::Macl, RegMode::Rmw);
        self.em.mula_s64(macl, mach, rnr, rmr);
        self.rc.free_tmp(rmr);
        let sr = self.get(GuestReg::Sr, RegMode::Read);
        self.em.tst_r_imm(sr, S);

        let sat = self.em.jmp_start(Cond::Eq);
        self.em.asr(rnr, mach, 15);
        self.em.cmp_r_imm(rnr, -1i32 as u32); // negative overflow
        let p = self.em.sjmp_start(Cond::Ge);
        self.em.move_r_imm_c(Cond::Lt, mach, 0x8000);
        self.em.move_r_imm_c(Cond::Lt, macl, 0x0000);
        self.em.sjmp_end(p);
        self.em.cmp_r_imm(rnr, 0); // positive overflow
        let p = self.em.sjmp_start(Cond::Le);
        self.em.move_r_imm_c(Cond::Gt, mach, 0x0000_7fff);
        self.em.move_r_imm_c(Cond::Gt, macl, 0xffff_ffff);
        self.em.sjmp_end(p);
        self.em.jmp_end(sat);

        self.rc.free_tmp(rnr);
        self.cycles += 3;
        OpFlow::Cont
    }

    /// MAC.W @Rm+,@Rn+: 16x16 accumulate; with S set, MACL saturates to
    /// 32 bits and MACH keeps the accumulated high word.
    pub(super) fn mac_w(&mut self) -> OpFlow {
        let (rnr, rmr) = self.indirect_read_double(self.rn(), self.rm(), 1);
        self.em.sext(rnr, rnr, 16);
        self.em.sext(rmr, rmr, 16);
        let macl = self.get(GuestReg::Macl, RegMode::Rmw);
        let mach = self.get(GuestReg::Mach, RegMode::Rmw);
        self.em.mula_s64(macl, mach, rnr, rmr);
        self.rc.free_tmp(rmr);
        let sr = self.get(GuestReg::Sr, RegMode::Read);
        self.em.tst_r_imm(sr, S);

        let sat = self.em.jmp_start(Cond::Eq);
        self.em.asr(rnr, macl, 31);
        self.em.eorf_r_r(rnr, mach); // zero iff the sum still fits 32 bits
        let fits = self.em.jmp_start(Cond::Eq);
        self.em.move_r_imm(macl, 0x8000_0000);
        self.em.tst_r_r(mach, mach);
        let p = self.em.sjmp_start(Cond::Mi);
        self.em.sub_r_imm_c(Cond::Pl, macl, 1); // positive: 0x7fffffff
        self.em.sjmp_end(p);
        self.em.jmp_end(fits);
        self.em.jmp_end(sat);

        self.rc.free_tmp(rnr);
        self.cycles += 2;
        OpFlow::Cont
    }
}
