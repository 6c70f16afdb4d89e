/*!
translate - The decode-and-emit loop turning a run of guest SH-2
opcodes into one host code block.

Overview
========
Translation starts at the guest PC and walks forward two bytes per
opcode, charging at least one guest cycle each, until one of:

  - the per-block cycle limit is reached with no branch pending,
  - a delayed branch has consumed its delay slot,
  - a conditional (non-delayed) branch or TRAPA committed the next PC
    in emitted code,
  - an opcode that can unmask interrupts (LDC to SR, RTE, SLEEP) forces
    an interrupt poll.

Delay slots are handled with a three-state counter: a delayed branch
stores its target into the pending-PC slot and arms the counter; the
next opcode is emitted normally, after which pending-PC is copied into
PC and the block ends. Every block ends by storing the fall-through PC
(unless a branch already committed it), subtracting the accumulated
cycles from the SR cycle field, spilling the register cache, and
tail-jumping to the exit trampoline.

The opcode families live in sibling files, split the way the encoding
groups them: `alu` (arithmetic, logic, compare, multiply, divide),
`mem` (data moves in every addressing mode), `sys` (system register
traffic, shifts, and the nibble-0/4 oddballs), `branch` (everything
that shapes control flow).
*/

mod alu;
mod branch;
mod mem;
mod sys;

use log::{trace, warn};

use super::BLOCK_CYCLE_LIMIT;
use super::rcache::{RegCache, RegMode};
use crate::bus::Sh2Bus;
use crate::emit::{CONTEXT_REG, Cond, Emitter, HostFn, HostReg};
use crate::sh2::{DRC_TMP_OFFS, GuestReg, T};

/// What an opcode handler tells the block loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpFlow {
    /// Keep translating.
    Cont,
    /// The handler committed the next PC itself; end the block now.
    End,
}

pub(crate) struct BlockOut {
    pub end_pc: u32,
    pub cycles: u32,
}

pub(crate) struct Translator<'a, E: Emitter, B: Sh2Bus> {
    em: &'a mut E,
    rc: &'a mut RegCache,
    bus: &'a mut B,
    is_slave: bool,
    exit_ptr: u32,
    op: u16,
    pc: u32,
    cycles: u32,
    /// 0 = normal, 2 = delay slot pending, 1 = delay slot just emitted.
    delayed_op: u8,
    test_irq: bool,
}

impl<'a, E: Emitter, B: Sh2Bus> Translator<'a, E, B> {
    pub fn new(
        em: &'a mut E,
        rc: &'a mut RegCache,
        bus: &'a mut B,
        is_slave: bool,
        pc: u32,
        exit_ptr: u32,
    ) -> Self {
        Self {
            em,
            rc,
            bus,
            is_slave,
            exit_ptr,
            op: 0,
            pc,
            cycles: 0,
            delayed_op: 0,
            test_irq: false,
        }
    }

    pub fn run(mut self) -> BlockOut {
        while self.cycles < BLOCK_CYCLE_LIMIT || self.delayed_op != 0 {
            if self.delayed_op > 0 {
                self.delayed_op -= 1;
            }

            self.op = self.bus.read16(self.pc) as u16;
            trace!(
                "{}sh2 {:08x} {:04x}",
                self.cpu_ch(),
                self.pc,
                self.op
            );
            self.pc = self.pc.wrapping_add(2);
            self.cycles += 1;

            if self.emit_op() == OpFlow::End {
                return self.finish(true);
            }

            // A delay slot just retired: commit the branch target.
            if self.delayed_op == 1 {
                self.emit_move_rr(GuestReg::Pc, GuestReg::Ppc);
            }

            if self.test_irq && self.delayed_op != 2 {
                if self.delayed_op == 0 {
                    self.emit_move_imm(GuestReg::Pc, self.pc);
                }
                self.rc.flush(self.em);
                self.em.pass_arg_r(0, CONTEXT_REG);
                self.em.call(HostFn::TestIrq);
                return self.finish(true);
            }

            if self.delayed_op == 1 {
                break;
            }
        }

        let committed = self.delayed_op != 0;
        self.finish(committed)
    }

    fn finish(mut self, pc_committed: bool) -> BlockOut {
        if !pc_committed {
            self.emit_move_imm(GuestReg::Pc, self.pc);
        }
        let sr = self.get(GuestReg::Sr, RegMode::Rmw);
        self.em.sub_r_imm(sr, self.cycles << crate::sh2::SR_CYCLE_SHIFT);
        self.rc.flush(self.em);
        self.em.jump(self.exit_ptr);
        BlockOut { end_pc: self.pc, cycles: self.cycles }
    }

    fn emit_op(&mut self) -> OpFlow {
        match (self.op >> 12) & 0x0f {
            0x0 => self.op_system_mac(),
            0x1 => self.op_store_disp(),
            0x2 => self.op_alu_store(),
            0x3 => self.op_arith_cmp(),
            0x4 => self.op_shift_system(),
            0x5 => self.op_load_disp(),
            0x6 => self.op_load_alu(),
            0x7 => self.op_add_imm(),
            0x8 => self.op_imm_branch_mem(),
            0x9 => self.op_load_pc_w(),
            0xa => self.op_bra(),
            0xb => self.op_bsr(),
            0xc => self.op_gbr_imm(),
            0xd => self.op_load_pc_l(),
            0xe => self.op_mov_imm(),
            _ => self.unhandled(),
        }
    }

    // ---------------------------------------------------------------------
    // Field accessors
    // ---------------------------------------------------------------------

    fn rn_field(&self) -> u8 {
        ((self.op >> 8) & 0x0f) as u8
    }

    fn rm_field(&self) -> u8 {
        ((self.op >> 4) & 0x0f) as u8
    }

    fn rn(&self) -> GuestReg {
        GuestReg::r(self.rn_field())
    }

    fn rm(&self) -> GuestReg {
        GuestReg::r(self.rm_field())
    }

    /// Secondary selector field (bits 4..7).
    fn fx(&self) -> u16 {
        (self.op >> 4) & 0x0f
    }

    fn cpu_ch(&self) -> char {
        if self.is_slave { 's' } else { 'm' }
    }

    // ---------------------------------------------------------------------
    // Emission helpers shared by the families
    // ---------------------------------------------------------------------

    fn get(&mut self, r: GuestReg, mode: RegMode) -> HostReg {
        self.rc.get_reg(self.em, r, mode)
    }

    fn emit_move_imm(&mut self, dst: GuestReg, imm: u32) {
        let hr = self.get(dst, RegMode::Write);
        self.em.move_r_imm(hr, imm);
    }

    fn emit_move_rr(&mut self, dst: GuestReg, src: GuestReg) {
        let d = self.get(dst, RegMode::Write);
        let s = self.get(src, RegMode::Read);
        self.em.move_r_r(d, s);
    }

    /// T must already be clear in `srr`, with the comparison done just
    /// before this.
    fn or_t_if_eq(&mut self, srr: HostReg) {
        let p = self.em.sjmp_start(Cond::Ne);
        self.em.or_r_imm_c(Cond::Eq, srr, T);
        self.em.sjmp_end(p);
    }

    /// Call the read handler for `size` (0/1/2 = 8/16/32 bits). The
    /// address must be in argument 0 and the cache clean; returns the
    /// register holding the result, claimed as a temporary.
    fn memhandler_read(&mut self, size: u32) -> HostReg {
        self.em.pass_arg_r(1, CONTEXT_REG);
        self.em.call(match size {
            0 => HostFn::Read8,
            1 => HostFn::Read16,
            _ => HostFn::Read32,
        });
        self.rc.invalidate();
        self.rc.get_tmp_arg(self.em, 0)
    }

    /// Call the write handler for `size`; address in argument 0, value in
    /// argument 1, cache clean.
    fn memhandler_write(&mut self, size: u32) {
        self.em.pass_arg_r(2, CONTEXT_REG);
        self.em.call(match size {
            0 => HostFn::Write8,
            1 => HostFn::Write16,
            _ => HostFn::Write32,
        });
        self.rc.invalidate();
    }

    /// Read `@(Rx,Ry)`.
    fn indirect_indexed_read(&mut self, rx: GuestReg, ry: GuestReg, size: u32) -> HostReg {
        self.rc.clean(self.em);
        let a0 = self.rc.get_reg_arg(self.em, 0, rx);
        let t = self.get(ry, RegMode::Read);
        self.em.add_r_r(a0, t);
        self.memhandler_read(size)
    }

    /// Store `val_hr` to `@(Rx,Ry)`.
    fn indirect_indexed_write(&mut self, val_hr: HostReg, rx: GuestReg, ry: GuestReg, size: u32) {
        self.rc.clean(self.em);
        let a1 = self.rc.get_tmp_arg(self.em, 1);
        self.em.move_r_r(a1, val_hr);
        let a0 = self.rc.get_reg_arg(self.em, 0, rx);
        let t = self.get(ry, RegMode::Read);
        self.em.add_r_r(a0, t);
        self.memhandler_write(size);
    }

    /// The paired post-increment reads of MAC: `@Rn+` then `@Rm+`.
    /// Returns the host registers holding the two values, both claimed as
    /// temporaries. The first value parks in the context scratch slot
    /// across the second call.
    fn indirect_read_double(
        &mut self,
        rn: GuestReg,
        rm: GuestReg,
        size: u32,
    ) -> (HostReg, HostReg) {
        self.rc.clean(self.em);
        self.rc.get_reg_arg(self.em, 0, rn);
        let tmp = self.memhandler_read(size);
        self.em.ctx_write(tmp, DRC_TMP_OFFS);
        self.rc.free_tmp(tmp);
        let t = self.get(rn, RegMode::Rmw);
        self.em.add_r_imm(t, 1 << size);

        self.rc.clean(self.em);
        self.rc.get_reg_arg(self.em, 0, rm);
        let rmr = self.memhandler_read(size);
        let rnr = self.rc.get_tmp(self.em);
        self.em.ctx_read(rnr, DRC_TMP_OFFS);
        let t = self.get(rm, RegMode::Rmw);
        self.em.add_r_imm(t, 1 << size);
        (rnr, rmr)
    }

    /// Default path for opcodes the translator does not emit natively.
    fn unhandled(&mut self) -> OpFlow {
        warn!(
            "{}sh2 drc: unhandled op {:04x} @ {:08x}",
            self.cpu_ch(),
            self.op,
            self.pc.wrapping_sub(2)
        );
        #[cfg(feature = "interp-fallback")]
        {
            self.emit_move_imm(GuestReg::Pc, self.pc.wrapping_sub(2));
            self.rc.flush(self.em);
            self.em.pass_arg_r(0, CONTEXT_REG);
            self.em.pass_arg_imm(1, u32::from(self.op));
            self.em.call(HostFn::DoOp);
        }
        OpFlow::Cont
    }
}
