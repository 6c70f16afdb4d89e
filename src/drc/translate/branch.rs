/*!
branch.rs - Control-flow shaping.

Delayed branches (BRA/BSR, BRAF/BSRF, JSR/JMP, RTS/RTE, BT/S, BF/S)
store their target into the pending-PC slot and arm the delay-slot
counter; the block loop emits one more opcode and then commits
pending-PC into PC. Plain BT/BF instead select the next PC in place from
SR.T with a predicated add and end the block, as does TRAPA after its
stack and vector traffic. SLEEP parks PC on itself and zeroes the cycle
budget, so the dispatcher returns to the host until an interrupt is
delivered.
*/

use super::{OpFlow, Translator};
use crate::bus::Sh2Bus;
use crate::drc::rcache::RegMode;
use crate::emit::{Cond, Emitter};
use crate::sh2::{GuestReg, T};

impl<E: Emitter, B: Sh2Bus> Translator<'_, E, B> {
    /// Nibble 0xa: BRA label.
    pub(super) fn op_bra(&mut self) -> OpFlow {
        self.delayed_op = 2;
        self.emit_bra_target();
        OpFlow::Cont
    }

    /// Nibble 0xb: BSR label.
    pub(super) fn op_bsr(&mut self) -> OpFlow {
        self.delayed_op = 2;
        self.emit_move_imm(GuestReg::Pr, self.pc.wrapping_add(2));
        self.emit_bra_target();
        OpFlow::Cont
    }

    fn emit_bra_target(&mut self) {
        let disp = ((self.op as i32) << 20) >> 19;
        let target = self.pc.wrapping_add(2).wrapping_add_signed(disp);
        self.emit_move_imm(GuestReg::Ppc, target);
        self.cycles += 1;
    }

    /// BRAF Rm / BSRF Rm.
    pub(super) fn op_braf_bsrf(&mut self) -> OpFlow {
        if self.op & 0x00d0 != 0 {
            return self.unhandled();
        }
        self.delayed_op = 2;
        if self.op & 0x20 == 0 {
            self.emit_move_imm(GuestReg::Pr, self.pc.wrapping_add(2));
        }
        let ppc = self.get(GuestReg::Ppc, RegMode::Write);
        let s = self.get(self.rn(), RegMode::Read);
        self.em.move_r_r(ppc, s);
        self.em.add_r_imm(ppc, self.pc.wrapping_add(2));
        self.cycles += 1;
        OpFlow::Cont
    }

    /// JSR @Rm / JMP @Rm.
    pub(super) fn op_jsr_jmp(&mut self) -> OpFlow {
        self.delayed_op = 2;
        if self.op & 0x20 == 0 {
            self.emit_move_imm(GuestReg::Pr, self.pc.wrapping_add(2));
        }
        self.emit_move_rr(GuestReg::Ppc, self.rn());
        self.cycles += 1;
        OpFlow::Cont
    }

    /// RTS.
    pub(super) fn op_rts(&mut self) -> OpFlow {
        self.delayed_op = 2;
        self.emit_move_rr(GuestReg::Ppc, GuestReg::Pr);
        self.cycles += 1;
        OpFlow::Cont
    }

    /// RTE: pop PC then SR, poll interrupts at the block edge.
    pub(super) fn op_rte(&mut self) -> OpFlow {
        self.delayed_op = 2;
        self.rc.clean(self.em);
        self.rc.get_reg_arg(self.em, 0, GuestReg::Sp);
        let val = self.memhandler_read(2);
        let ppc = self.get(GuestReg::Ppc, RegMode::Write);
        self.em.move_r_r(ppc, val);
        self.rc.free_tmp(val);
        self.rc.clean(self.em);
        let a0 = self.rc.get_reg_arg(self.em, 0, GuestReg::Sp);
        self.em.add_r_imm(a0, 4);
        let val = self.memhandler_read(2);
        let sr = self.get(GuestReg::Sr, RegMode::Rmw);
        self.em.write_sr(sr, val);
        self.rc.free_tmp(val);
        let sp = self.get(GuestReg::Sp, RegMode::Rmw);
        self.em.add_r_imm(sp, 4 * 2);
        self.test_irq = true;
        self.cycles += 3;
        OpFlow::Cont
    }

    /// SLEEP: loop on this PC with an empty cycle budget until an
    /// interrupt arrives.
    pub(super) fn op_sleep(&mut self) -> OpFlow {
        self.emit_move_imm(GuestReg::Pc, self.pc.wrapping_sub(2));
        let sr = self.get(GuestReg::Sr, RegMode::Rmw);
        self.em.clear_msb(sr, sr, 20);
        self.test_irq = true;
        self.cycles = 1;
        OpFlow::Cont
    }

    /// BT, BF, BT/S, BF/S. The delayed forms write the pending PC; the
    /// plain forms commit PC in place and end the block.
    pub(super) fn emit_cond_branch(&mut self) -> OpFlow {
        let delayed = self.delayed_op != 0;
        // The jump condition is the host condition under which the guest
        // does NOT take the branch.
        let (jmp_cond, insn_cond) = if self.op & 0x0200 != 0 {
            (Cond::Ne, Cond::Eq) // BF: taken when T clear
        } else {
            (Cond::Eq, Cond::Ne) // BT: taken when T set
        };
        let mut offs = ((self.op as i32) << 24) >> 23;
        let dst = if delayed { GuestReg::Ppc } else { GuestReg::Pc };
        let t = self.get(dst, RegMode::Write);
        self.em
            .move_r_imm(t, self.pc.wrapping_add(if delayed { 2 } else { 0 }));
        let sr = self.get(GuestReg::Sr, RegMode::Read);
        self.em.tst_r_imm(sr, T);
        let p = self.em.sjmp_start(jmp_cond);
        if !delayed {
            offs += 2;
        }
        if offs < 0 {
            self.em.sub_r_imm_c(insn_cond, t, (-offs) as u32);
        } else {
            self.em.add_r_imm_c(insn_cond, t, offs as u32);
        }
        self.em.sjmp_end(p);
        self.cycles += 2;
        if delayed { OpFlow::Cont } else { OpFlow::End }
    }

    /// TRAPA #imm: push SR and PC, vector through VBR, end the block.
    pub(super) fn op_trapa(&mut self) -> OpFlow {
        let sp = self.get(GuestReg::Sp, RegMode::Rmw);
        self.em.sub_r_imm(sp, 4 * 2);
        self.rc.clean(self.em);
        // push SR
        let a0 = self.rc.get_reg_arg(self.em, 0, GuestReg::Sp);
        self.em.add_r_imm(a0, 4);
        let a1 = self.rc.get_reg_arg(self.em, 1, GuestReg::Sr);
        self.em.clear_msb(a1, a1, 20);
        self.memhandler_write(2);
        // push PC of the next instruction
        self.rc.get_reg_arg(self.em, 0, GuestReg::Sp);
        let a1 = self.rc.get_tmp_arg(self.em, 1);
        self.em.move_r_imm(a1, self.pc);
        self.memhandler_write(2);
        // fetch the vector
        let a0 = self.rc.get_reg_arg(self.em, 0, GuestReg::Vbr);
        self.em.add_r_imm(a0, u32::from(self.op & 0xff) * 4);
        let val = self.memhandler_read(2);
        let d = self.get(GuestReg::Pc, RegMode::Write);
        self.em.move_r_r(d, val);
        self.rc.free_tmp(val);
        self.cycles += 7;
        OpFlow::End
    }
}
