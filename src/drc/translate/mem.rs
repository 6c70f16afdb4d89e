/*!
mem.rs - Data movement families: displacement, PC-relative and
GBR-relative addressing (primary nibbles 1, 5, 8, 9, 0xc, 0xd, 0xe).

Memory traffic always goes through the host call convention: clean the
register cache, materialize the address in argument 0 (and the store
value in argument 1), call the handler, and reload through the
invalidated cache afterwards.
*/

use super::{OpFlow, Translator};
use crate::bus::Sh2Bus;
use crate::drc::rcache::RegMode;
use crate::sh2::{GuestReg, T};
use crate::emit::Emitter;

impl<E: Emitter, B: Sh2Bus> Translator<'_, E, B> {
    /// Nibble 1: MOV.L Rm,@(disp,Rn).
    pub(super) fn op_store_disp(&mut self) -> OpFlow {
        let (rn, rm) = (self.rn(), self.rm());
        self.rc.clean(self.em);
        let a0 = self.rc.get_reg_arg(self.em, 0, rn);
        self.rc.get_reg_arg(self.em, 1, rm);
        self.em.add_r_imm(a0, u32::from(self.op & 0x0f) * 4);
        self.memhandler_write(2);
        OpFlow::Cont
    }

    /// Nibble 5: MOV.L @(disp,Rm),Rn.
    pub(super) fn op_load_disp(&mut self) -> OpFlow {
        let rm = self.rm();
        self.rc.clean(self.em);
        let a0 = self.rc.get_reg_arg(self.em, 0, rm);
        self.em.add_r_imm(a0, u32::from(self.op & 0x0f) * 4);
        let val = self.memhandler_read(2);
        let d = self.get(self.rn(), RegMode::Write);
        self.em.move_r_r(d, val);
        self.rc.free_tmp(val);
        OpFlow::Cont
    }

    /// Nibble 8: byte/word displacement moves, CMP/EQ #imm and the
    /// conditional branches.
    pub(super) fn op_imm_branch_mem(&mut self) -> OpFlow {
        match self.op & 0x0f00 {
            // MOV.B R0,@(disp,Rn) / MOV.W R0,@(disp,Rn)
            0x0000 | 0x0100 => {
                let rm = self.rm();
                self.rc.clean(self.em);
                let a0 = self.rc.get_reg_arg(self.em, 0, rm);
                self.rc.get_reg_arg(self.em, 1, GuestReg::R0);
                let size = u32::from(self.op >> 8) & 1;
                self.em.add_r_imm(a0, u32::from(self.op & 0x0f) << size);
                self.memhandler_write(size);
            }
            // MOV.B @(disp,Rm),R0 / MOV.W @(disp,Rm),R0
            0x0400 | 0x0500 => {
                let rm = self.rm();
                self.rc.clean(self.em);
                let a0 = self.rc.get_reg_arg(self.em, 0, rm);
                let size = u32::from(self.op >> 8) & 1;
                self.em.add_r_imm(a0, u32::from(self.op & 0x0f) << size);
                let val = self.memhandler_read(size);
                let d = self.get(GuestReg::R0, RegMode::Write);
                self.em.sext(d, val, 8 << size);
                self.rc.free_tmp(val);
            }
            // CMP/EQ #imm,R0
            0x0800 => {
                let t = self.rc.get_tmp(self.em);
                let r0 = self.get(GuestReg::R0, RegMode::Read);
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                self.em.move_r_imm_s8(t, self.op as u8);
                self.em.bic_r_imm(sr, T);
                self.em.cmp_r_r(r0, t);
                self.or_t_if_eq(sr);
                self.rc.free_tmp(t);
            }
            // BT/S and BF/S: conditional with delay slot
            0x0d00 | 0x0f00 => {
                self.delayed_op = 2;
                self.cycles -= 1;
                return self.emit_cond_branch();
            }
            // BT and BF: conditional, no delay slot, end the block
            0x0900 | 0x0b00 => return self.emit_cond_branch(),
            _ => return self.unhandled(),
        }
        OpFlow::Cont
    }

    /// Nibble 9: MOV.W @(disp,PC),Rn.
    pub(super) fn op_load_pc_w(&mut self) -> OpFlow {
        self.rc.clean(self.em);
        let a0 = self.rc.get_tmp_arg(self.em, 0);
        let addr = self.pc.wrapping_add(u32::from(self.op & 0xff) * 2 + 2);
        self.em.move_r_imm(a0, addr);
        let val = self.memhandler_read(1);
        let d = self.get(self.rn(), RegMode::Write);
        self.em.sext(d, val, 16);
        self.rc.free_tmp(val);
        OpFlow::Cont
    }

    /// Nibble 0xc: GBR-relative moves, immediate logic on R0, the
    /// GBR-indexed byte read-modify-writes, MOVA and TRAPA.
    pub(super) fn op_gbr_imm(&mut self) -> OpFlow {
        let imm = u32::from(self.op & 0xff);
        match self.op & 0x0f00 {
            // MOV.B/W/L R0,@(disp,GBR)
            0x0000 | 0x0100 | 0x0200 => {
                self.rc.clean(self.em);
                let a0 = self.rc.get_reg_arg(self.em, 0, GuestReg::Gbr);
                self.rc.get_reg_arg(self.em, 1, GuestReg::R0);
                let size = u32::from(self.op >> 8) & 3;
                self.em.add_r_imm(a0, imm << size);
                self.memhandler_write(size);
            }
            // MOV.B/W/L @(disp,GBR),R0
            0x0400 | 0x0500 | 0x0600 => {
                self.rc.clean(self.em);
                let a0 = self.rc.get_reg_arg(self.em, 0, GuestReg::Gbr);
                let size = u32::from(self.op >> 8) & 3;
                self.em.add_r_imm(a0, imm << size);
                let val = self.memhandler_read(size);
                let d = self.get(GuestReg::R0, RegMode::Write);
                if size != 2 {
                    self.em.sext(d, val, 8 << size);
                } else {
                    self.em.move_r_r(d, val);
                }
                self.rc.free_tmp(val);
            }
            // TRAPA #imm
            0x0300 => return self.op_trapa(),
            // MOVA @(disp,PC),R0
            0x0700 => {
                let addr = self.pc.wrapping_add(imm * 4 + 2) & !3;
                self.emit_move_imm(GuestReg::R0, addr);
            }
            // TST #imm,R0
            0x0800 => {
                let r0 = self.get(GuestReg::R0, RegMode::Read);
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                self.em.bic_r_imm(sr, T);
                self.em.tst_r_imm(r0, imm);
                self.or_t_if_eq(sr);
            }
            // AND #imm,R0
            0x0900 => {
                let r0 = self.get(GuestReg::R0, RegMode::Rmw);
                self.em.and_r_imm(r0, imm);
            }
            // XOR #imm,R0
            0x0a00 => {
                let r0 = self.get(GuestReg::R0, RegMode::Rmw);
                self.em.eor_r_imm(r0, imm);
            }
            // OR #imm,R0
            0x0b00 => {
                let r0 = self.get(GuestReg::R0, RegMode::Rmw);
                self.em.or_r_imm(r0, imm);
            }
            // TST.B #imm,@(R0,GBR)
            0x0c00 => {
                let val = self.indirect_indexed_read(GuestReg::R0, GuestReg::Gbr, 0);
                let sr = self.get(GuestReg::Sr, RegMode::Rmw);
                self.em.bic_r_imm(sr, T);
                self.em.tst_r_imm(val, imm);
                self.or_t_if_eq(sr);
                self.rc.free_tmp(val);
                self.cycles += 2;
            }
            // AND.B / XOR.B / OR.B #imm,@(R0,GBR)
            _ => {
                let val = self.indirect_indexed_read(GuestReg::R0, GuestReg::Gbr, 0);
                match self.op & 0x0f00 {
                    0x0d00 => self.em.and_r_imm(val, imm),
                    0x0e00 => self.em.eor_r_imm(val, imm),
                    _ => self.em.or_r_imm(val, imm),
                }
                let a1 = self.rc.get_tmp_arg(self.em, 1);
                self.em.move_r_r(a1, val);
                self.rc.free_tmp(val);
                let a0 = self.rc.get_reg_arg(self.em, 0, GuestReg::Gbr);
                let r0 = self.get(GuestReg::R0, RegMode::Read);
                self.em.add_r_r(a0, r0);
                self.memhandler_write(0);
                self.cycles += 2;
            }
        }
        OpFlow::Cont
    }

    /// Nibble 0xd: MOV.L @(disp,PC),Rn.
    pub(super) fn op_load_pc_l(&mut self) -> OpFlow {
        self.rc.clean(self.em);
        let a0 = self.rc.get_tmp_arg(self.em, 0);
        let addr = self.pc.wrapping_add(u32::from(self.op & 0xff) * 4 + 2) & !3;
        self.em.move_r_imm(a0, addr);
        let val = self.memhandler_read(2);
        let d = self.get(self.rn(), RegMode::Write);
        self.em.move_r_r(d, val);
        self.rc.free_tmp(val);
        OpFlow::Cont
    }

    /// Nibble 0xe: MOV #imm,Rn.
    pub(super) fn op_mov_imm(&mut self) -> OpFlow {
        let d = self.get(self.rn(), RegMode::Write);
        self.em.move_r_imm_s8(d, self.op as u8);
        OpFlow::Cont
    }
}
