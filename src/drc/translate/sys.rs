/*!
sys.rs - The two grab-bag nibbles: 0 (system register stores, MOVT,
flag ops, RTS/RTE/SLEEP, R0-indexed moves, MAC.L) and 4 (shifts and
rotates, DT, system register load/store in every flavor, JSR/JMP,
TAS.B, MAC.W).
*/

use super::{OpFlow, Translator};
use crate::bus::Sh2Bus;
use crate::drc::rcache::RegMode;
use crate::emit::{Cond, Emitter};
use crate::sh2::{GuestReg, M, Q, T};

impl<E: Emitter, B: Sh2Bus> Translator<'_, E, B> {
    /// Primary nibble 0.
    pub(super) fn op_system_mac(&mut self) -> OpFlow {
        match self.op & 0x0f {
            // STC SR,Rn / STC GBR,Rn / STC VBR,Rn
            0x02 => {
                let src = match self.fx() {
                    0 => GuestReg::Sr,
                    1 => GuestReg::Gbr,
                    2 => GuestReg::Vbr,
                    _ => return self.unhandled(),
                };
                let d = self.get(self.rn(), RegMode::Write);
                let s = self.get(src, RegMode::Read);
                self.em.move_r_r(d, s);
                if src == GuestReg::Sr {
                    // Reserved bits read as zero.
                    self.em.clear_msb(d, d, 20);
                }
            }
            // BRAF Rm / BSRF Rm
            0x03 => return self.op_braf_bsrf(),
            // MOV.B/W/L Rm,@(R0,Rn)
            0x04..=0x06 => {
                let val = self.get(self.rm(), RegMode::Read);
                self.indirect_indexed_write(
                    val,
                    GuestReg::R0,
                    self.rn(),
                    u32::from(self.op & 3),
                );
            }
            // MUL.L Rm,Rn
            0x07 => {
                let n = self.get(self.rn(), RegMode::Read);
                let m = self.get(self.rm(), RegMode::Read);
                let macl = self.get(GuestReg::Macl, RegMode::Write);
                self.em.mul(macl, m, n);
                self.cycles += 1;
            }
            // CLRT / SETT / CLRMAC
            0x08 => {
                if self.op & 0x0f00 != 0 {
                    return self.unhandled();
                }
                match self.fx() {
                    0 => {
                        let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                        self.em.bic_r_imm(sr, T);
                    }
                    1 => {
                        let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                        self.em.or_r_imm(sr, T);
                    }
                    2 => {
                        let l = self.get(GuestReg::Macl, RegMode::Write);
                        self.em.move_r_imm(l, 0);
                        let h = self.get(GuestReg::Mach, RegMode::Write);
                        self.em.move_r_imm(h, 0);
                    }
                    _ => return self.unhandled(),
                }
            }
            // NOP / DIV0U / MOVT
            0x09 => match self.fx() {
                0 => {
                    if self.op & 0x0f00 != 0 {
                        return self.unhandled();
                    }
                }
                1 => {
                    if self.op & 0x0f00 != 0 {
                        return self.unhandled();
                    }
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.bic_r_imm(sr, M | Q | T);
                }
                2 => {
                    let sr = self.get(GuestReg::Sr, RegMode::Read);
                    let d = self.get(self.rn(), RegMode::Write);
                    self.em.clear_msb(d, sr, 31);
                }
                _ => return self.unhandled(),
            },
            // STS MACH,Rn / STS MACL,Rn / STS PR,Rn
            0x0a => {
                let src = match self.fx() {
                    0 => GuestReg::Mach,
                    1 => GuestReg::Macl,
                    2 => GuestReg::Pr,
                    _ => return self.unhandled(),
                };
                let d = self.get(self.rn(), RegMode::Write);
                let s = self.get(src, RegMode::Read);
                self.em.move_r_r(d, s);
            }
            // RTS / SLEEP / RTE
            0x0b => {
                if self.op & 0x0f00 != 0 {
                    return self.unhandled();
                }
                return match self.fx() {
                    0 => self.op_rts(),
                    1 => self.op_sleep(),
                    2 => self.op_rte(),
                    _ => self.unhandled(),
                };
            }
            // MOV.B/W/L @(R0,Rm),Rn
            0x0c..=0x0e => {
                let size = u32::from(self.op & 3);
                let val = self.indirect_indexed_read(GuestReg::R0, self.rm(), size);
                let d = self.get(self.rn(), RegMode::Write);
                if size != 2 {
                    self.em.sext(d, val, if size == 1 { 16 } else { 8 });
                } else {
                    self.em.move_r_r(d, val);
                }
                self.rc.free_tmp(val);
            }
            // MAC.L @Rm+,@Rn+
            0x0f => return self.mac_l(),
            _ => return self.unhandled(),
        }
        OpFlow::Cont
    }

    /// Primary nibble 4.
    pub(super) fn op_shift_system(&mut self) -> OpFlow {
        match self.op & 0x0f {
            // SHLL/SHAL (same operation) or DT
            0x00 => match self.fx() {
                0 | 2 => {
                    let n = self.get(self.rn(), RegMode::Rmw);
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.tpop_carry(sr, false);
                    self.em.lslf(n, n, 1);
                    self.em.tpush_carry(sr, false);
                }
                1 => return self.op_dt(),
                _ => return self.unhandled(),
            },
            // SHLR/SHAR or CMP/PZ
            0x01 => match self.fx() {
                0 | 2 => {
                    let n = self.get(self.rn(), RegMode::Rmw);
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.tpop_carry(sr, false);
                    if self.op & 0x20 != 0 {
                        self.em.asrf(n, n, 1);
                    } else {
                        self.em.lsrf(n, n, 1);
                    }
                    self.em.tpush_carry(sr, false);
                }
                1 => {
                    // CMP/PZ Rn
                    let n = self.get(self.rn(), RegMode::Rmw);
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.bic_r_imm(sr, T);
                    self.em.cmp_r_imm(n, 0);
                    let p = self.em.sjmp_start(Cond::Lt);
                    self.em.or_r_imm_c(Cond::Ge, sr, T);
                    self.em.sjmp_end(p);
                }
                _ => return self.unhandled(),
            },
            // STS.L/STC.L system register,@-Rn
            0x02 | 0x03 => {
                let src = match self.op & 0x3f {
                    0x02 => GuestReg::Mach,
                    0x12 => GuestReg::Macl,
                    0x22 => GuestReg::Pr,
                    0x03 => GuestReg::Sr,
                    0x13 => GuestReg::Gbr,
                    0x23 => GuestReg::Vbr,
                    _ => return self.unhandled(),
                };
                let rn = self.rn();
                let t = self.get(rn, RegMode::Rmw);
                self.em.sub_r_imm(t, 4);
                self.rc.clean(self.em);
                self.rc.get_reg_arg(self.em, 0, rn);
                let a1 = self.rc.get_reg_arg(self.em, 1, src);
                if src == GuestReg::Sr {
                    self.em.clear_msb(a1, a1, 20);
                }
                self.memhandler_write(2);
            }
            // Rotates or CMP/PL
            0x04 | 0x05 => match self.op & 0x3f {
                0x04 | 0x05 => {
                    let n = self.get(self.rn(), RegMode::Rmw);
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.tpop_carry(sr, false);
                    if self.op & 1 != 0 {
                        self.em.rorf(n, n, 1);
                    } else {
                        self.em.rolf(n, n, 1);
                    }
                    self.em.tpush_carry(sr, false);
                }
                0x24 | 0x25 => {
                    let n = self.get(self.rn(), RegMode::Rmw);
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.tpop_carry(sr, false);
                    if self.op & 1 != 0 {
                        self.em.rorcf(n);
                    } else {
                        self.em.rolcf(n);
                    }
                    self.em.tpush_carry(sr, false);
                }
                0x15 => {
                    // CMP/PL Rn
                    let n = self.get(self.rn(), RegMode::Rmw);
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.bic_r_imm(sr, T);
                    self.em.cmp_r_imm(n, 0);
                    let p = self.em.sjmp_start(Cond::Le);
                    self.em.or_r_imm_c(Cond::Gt, sr, T);
                    self.em.sjmp_end(p);
                }
                _ => return self.unhandled(),
            },
            // LDS.L/LDC.L @Rm+,system register
            0x06 | 0x07 => {
                let dst = match self.op & 0x3f {
                    0x06 => GuestReg::Mach,
                    0x16 => GuestReg::Macl,
                    0x26 => GuestReg::Pr,
                    0x07 => GuestReg::Sr,
                    0x17 => GuestReg::Gbr,
                    0x27 => GuestReg::Vbr,
                    _ => return self.unhandled(),
                };
                let rn = self.rn();
                self.rc.clean(self.em);
                self.rc.get_reg_arg(self.em, 0, rn);
                let val = self.memhandler_read(2);
                if dst == GuestReg::Sr {
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.write_sr(sr, val);
                    self.test_irq = true;
                } else {
                    let d = self.get(dst, RegMode::Write);
                    self.em.move_r_r(d, val);
                }
                self.rc.free_tmp(val);
                let t = self.get(self.rn(), RegMode::Rmw);
                self.em.add_r_imm(t, 4);
            }
            // SHLL2/8/16, SHLR2/8/16
            0x08 | 0x09 => {
                let cnt = match self.fx() {
                    0 => 2,
                    1 => 8,
                    2 => 16,
                    _ => return self.unhandled(),
                };
                let n = self.get(self.rn(), RegMode::Rmw);
                if self.op & 1 != 0 {
                    self.em.lsr(n, n, cnt);
                } else {
                    self.em.lsl(n, n, cnt);
                }
            }
            // LDS Rm,MACH / LDS Rm,MACL / LDS Rm,PR
            0x0a => {
                let dst = match self.fx() {
                    0 => GuestReg::Mach,
                    1 => GuestReg::Macl,
                    2 => GuestReg::Pr,
                    _ => return self.unhandled(),
                };
                self.emit_move_rr(dst, self.rn());
            }
            // JSR/JMP or TAS.B
            0x0b => match self.fx() {
                0 | 2 => return self.op_jsr_jmp(),
                1 => return self.op_tas(),
                _ => return self.unhandled(),
            },
            // LDC Rm,SR / LDC Rm,GBR / LDC Rm,VBR
            0x0e => {
                let dst = match self.fx() {
                    0 => GuestReg::Sr,
                    1 => GuestReg::Gbr,
                    2 => GuestReg::Vbr,
                    _ => return self.unhandled(),
                };
                let s = self.get(self.rn(), RegMode::Read);
                if dst == GuestReg::Sr {
                    let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                    self.em.write_sr(sr, s);
                    self.test_irq = true;
                } else {
                    let d = self.get(dst, RegMode::Write);
                    self.em.move_r_r(d, s);
                }
            }
            // MAC.W @Rm+,@Rn+
            0x0f => return self.mac_w(),
            _ => return self.unhandled(),
        }
        OpFlow::Cont
    }

    /// DT Rn, fusing the `DT; BF #-2` spin into one host op when the
    /// next opcode loops straight back.
    fn op_dt(&mut self) -> OpFlow {
        if self.bus.read16(self.pc) as u16 == 0x8bfd {
            let n = self.get(self.rn(), RegMode::Rmw);
            let sr = self.get(GuestReg::Sr, RegMode::Rmw);
            self.em.dtbf_loop(n, sr);
            return OpFlow::Cont;
        }
        let n = self.get(self.rn(), RegMode::Rmw);
        let sr = self.get(GuestReg::Sr, RegMode::Rmw);
        self.em.bic_r_imm(sr, T);
        self.em.subf_r_imm(n, 1);
        self.or_t_if_eq(sr);
        OpFlow::Cont
    }

    /// TAS.B @Rn.
    fn op_tas(&mut self) -> OpFlow {
        // No bus lock on the 32X side; plain read, test, write.
        let rn = self.rn();
        self.rc.clean(self.em);
        self.rc.get_reg_arg(self.em, 0, rn);
        let val = self.memhandler_read(0);
        let sr = self.get(GuestReg::Sr, RegMode::Rmw);
        self.em.bic_r_imm(sr, T);
        self.em.cmp_r_imm(val, 0);
        self.or_t_if_eq(sr);
        self.rc.clean(self.em);
        self.em.or_r_imm(val, 0x80);
        let a1 = self.rc.get_tmp_arg(self.em, 1);
        self.em.move_r_r(a1, val);
        self.rc.free_tmp(val);
        self.rc.get_reg_arg(self.em, 0, rn);
        self.memhandler_write(0);
        self.cycles += 3;
        OpFlow::Cont
    }
}
