/*!
interp.rs - Reference interpreter for the SH-2 subset the recompiler
handles.

Overview
========
Single-steps opcodes against the same `Sh2` context and `Sh2Bus` seam
the recompiler uses. Three jobs:

  - target of the translated-code fallback call for opcodes the
    translator declines (feature `interp-fallback`);
  - the dispatcher's escape hatch when asked to translate at an invalid
    PC;
  - the oracle for differential tests: `run` follows the exact same
    budget protocol as `Drc::execute` (cycle counter in the reserved SR
    bits, interrupt poll up front), and every opcode charges the same
    cycles the translator charges, so a program that parks itself with
    SLEEP leaves both paths in identical states.

Delay slots execute inside `step`: a delayed branch latches its target
in the pending-PC slot, the following opcode runs, then the target is
committed.
*/

use log::warn;

use crate::bus::Sh2Bus;
use crate::sh2::{GuestReg, M, Q, S, SR_CYCLE_SHIFT, SR_GUEST_MASK, Sh2, T};

/// Advance by `cycles` using the same budget protocol as the
/// recompiler's `execute`.
pub fn run<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B, cycles: i32) {
    sh2.cycles_aim = sh2.cycles_aim.wrapping_add(cycles);
    let target = sh2.cycles_aim.wrapping_sub(sh2.cycles_done);
    sh2.set_sr((sh2.sr() & SR_GUEST_MASK) | ((target as u32) << SR_CYCLE_SHIFT));

    sh2.test_irq(bus);
    while sh2.sr_cycles() > 0 {
        let c = step(sh2, bus);
        sh2.set_sr(sh2.sr().wrapping_sub(c << SR_CYCLE_SHIFT));
    }

    sh2.cycles_done = sh2
        .cycles_done
        .wrapping_add(target.wrapping_sub(sh2.sr_cycles()));
}

/// Execute one instruction (plus its delay slot, for delayed branches)
/// and return the cycles charged.
pub fn step<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B) -> u32 {
    let op = fetch(sh2, bus);
    let ex = exec_op(sh2, bus, op, false);
    let mut cycles = ex.cycles;
    let mut test_irq = ex.test_irq;
    if ex.delayed {
        let slot = fetch(sh2, bus);
        let ex2 = exec_op(sh2, bus, slot, true);
        cycles += ex2.cycles;
        test_irq |= ex2.test_irq;
        let target = sh2.reg(GuestReg::Ppc);
        sh2.set_pc(target);
    }
    if test_irq {
        sh2.test_irq(bus);
    }
    cycles
}

/// Fallback entry point for translated code: PC points at the opcode.
pub(crate) fn step_op<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B, op: u16) {
    sh2.set_pc(sh2.pc().wrapping_add(2));
    let ex = exec_op(sh2, bus, op, false);
    if ex.delayed {
        // No way to run a delay slot from here; commit the target.
        let target = sh2.reg(GuestReg::Ppc);
        sh2.set_pc(target);
    }
    if ex.test_irq {
        sh2.test_irq(bus);
    }
}

fn fetch<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B) -> u16 {
    let pc = sh2.pc();
    let op = bus.read16(pc) as u16;
    sh2.set_pc(pc.wrapping_add(2));
    op
}

struct Exec {
    cycles: u32,
    delayed: bool,
    test_irq: bool,
}

impl Exec {
    fn cont(cycles: u32) -> Self {
        Self { cycles, delayed: false, test_irq: false }
    }

    fn delayed(cycles: u32) -> Self {
        Self { cycles, delayed: true, test_irq: false }
    }
}

#[inline]
fn sext8(v: u32) -> u32 {
    v as u8 as i8 as i32 as u32
}

#[inline]
fn sext16(v: u32) -> u32 {
    v as u16 as i16 as i32 as u32
}

/// Execute one opcode. On entry PC points past the opcode, matching the
/// translator's view while emitting it.
fn exec_op<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B, op: u16, in_delay: bool) -> Exec {
    let n = ((op >> 8) & 0x0f) as u8;
    let m = ((op >> 4) & 0x0f) as u8;
    let pc = sh2.pc();

    match (op >> 12) & 0x0f {
        0x0 => exec_system_mac(sh2, bus, op, n, m),
        // MOV.L Rm,@(disp,Rn)
        0x1 => {
            let addr = sh2.gpr(n).wrapping_add(u32::from(op & 0x0f) * 4);
            bus.write32(addr, sh2.gpr(m));
            Exec::cont(1)
        }
        0x2 => exec_alu_store(sh2, bus, op, n, m),
        0x3 => exec_arith_cmp(sh2, op, n, m),
        0x4 => exec_shift_system(sh2, bus, op, n, m),
        // MOV.L @(disp,Rm),Rn
        0x5 => {
            let addr = sh2.gpr(m).wrapping_add(u32::from(op & 0x0f) * 4);
            let val = bus.read32(addr);
            sh2.set_gpr(n, val);
            Exec::cont(1)
        }
        0x6 => exec_load_alu(sh2, bus, op, n, m),
        // ADD #imm,Rn
        0x7 => {
            let v = sh2.gpr(n).wrapping_add(sext8(u32::from(op & 0xff)));
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        0x8 => exec_imm_branch_mem(sh2, bus, op, m, in_delay),
        // MOV.W @(disp,PC),Rn
        0x9 => {
            let addr = pc.wrapping_add(u32::from(op & 0xff) * 2 + 2);
            sh2.set_gpr(n, sext16(bus.read16(addr)));
            Exec::cont(1)
        }
        // BRA label
        0xa => {
            branch_always(sh2, op);
            Exec::delayed(2)
        }
        // BSR label
        0xb => {
            sh2.set_reg(GuestReg::Pr, pc.wrapping_add(2));
            branch_always(sh2, op);
            Exec::delayed(2)
        }
        0xc => exec_gbr_imm(sh2, bus, op),
        // MOV.L @(disp,PC),Rn
        0xd => {
            let addr = pc.wrapping_add(u32::from(op & 0xff) * 4 + 2) & !3;
            let val = bus.read32(addr);
            sh2.set_gpr(n, val);
            Exec::cont(1)
        }
        // MOV #imm,Rn
        0xe => {
            sh2.set_gpr(n, sext8(u32::from(op & 0xff)));
            Exec::cont(1)
        }
        _ => unknown(sh2, op),
    }
}

fn unknown(sh2: &mut Sh2, op: u16) -> Exec {
    warn!(
        "sh2 interp: unknown op {op:04x} @ {:08x}",
        sh2.pc().wrapping_sub(2)
    );
    Exec::cont(1)
}

fn branch_always(sh2: &mut Sh2, op: u16) {
    let disp = ((op as i32) << 20) >> 19;
    let target = sh2.pc().wrapping_add(2).wrapping_add_signed(disp);
    sh2.set_reg(GuestReg::Ppc, target);
}

fn exec_system_mac<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B, op: u16, n: u8, m: u8) -> Exec {
    let pc = sh2.pc();
    match op & 0x0f {
        // STC SR/GBR/VBR,Rn
        0x02 => {
            let v = match (op >> 4) & 0x0f {
                0 => sh2.sr() & 0xfff,
                1 => sh2.reg(GuestReg::Gbr),
                2 => sh2.reg(GuestReg::Vbr),
                _ => return unknown(sh2, op),
            };
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        // BRAF Rm / BSRF Rm
        0x03 => {
            if op & 0x00d0 != 0 {
                return unknown(sh2, op);
            }
            if op & 0x20 == 0 {
                sh2.set_reg(GuestReg::Pr, pc.wrapping_add(2));
            }
            let target = sh2.gpr(n).wrapping_add(pc.wrapping_add(2));
            sh2.set_reg(GuestReg::Ppc, target);
            Exec::delayed(2)
        }
        // MOV.B/W/L Rm,@(R0,Rn)
        0x04..=0x06 => {
            let addr = sh2.gpr(0).wrapping_add(sh2.gpr(n));
            write_sized(bus, addr, sh2.gpr(m), u32::from(op & 3));
            Exec::cont(1)
        }
        // MUL.L Rm,Rn
        0x07 => {
            let v = sh2.gpr(m).wrapping_mul(sh2.gpr(n));
            sh2.set_reg(GuestReg::Macl, v);
            Exec::cont(2)
        }
        // CLRT / SETT / CLRMAC
        0x08 => {
            if op & 0x0f00 != 0 {
                return unknown(sh2, op);
            }
            match (op >> 4) & 0x0f {
                0 => sh2.assign_flag(T, false),
                1 => sh2.assign_flag(T, true),
                2 => {
                    sh2.set_reg(GuestReg::Macl, 0);
                    sh2.set_reg(GuestReg::Mach, 0);
                }
                _ => return unknown(sh2, op),
            }
            Exec::cont(1)
        }
        // NOP / DIV0U / MOVT
        0x09 => match (op >> 4) & 0x0f {
            0 | 1 => {
                if op & 0x0f00 != 0 {
                    return unknown(sh2, op);
                }
                if op & 0x10 != 0 {
                    sh2.set_sr(sh2.sr() & !(M | Q | T));
                }
                Exec::cont(1)
            }
            2 => {
                sh2.set_gpr(n, sh2.sr() & 1);
                Exec::cont(1)
            }
            _ => unknown(sh2, op),
        },
        // STS MACH/MACL/PR,Rn
        0x0a => {
            let v = match (op >> 4) & 0x0f {
                0 => sh2.reg(GuestReg::Mach),
                1 => sh2.reg(GuestReg::Macl),
                2 => sh2.reg(GuestReg::Pr),
                _ => return unknown(sh2, op),
            };
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        // RTS / SLEEP / RTE
        0x0b => {
            if op & 0x0f00 != 0 {
                return unknown(sh2, op);
            }
            match (op >> 4) & 0x0f {
                0 => {
                    let pr = sh2.reg(GuestReg::Pr);
                    sh2.set_reg(GuestReg::Ppc, pr);
                    Exec::delayed(2)
                }
                1 => {
                    // SLEEP: spin on this PC with the budget drained.
                    sh2.set_pc(pc.wrapping_sub(2));
                    sh2.set_sr(sh2.sr() & 0xfff);
                    Exec { cycles: 1, delayed: false, test_irq: true }
                }
                2 => {
                    let sp = sh2.reg(GuestReg::Sp);
                    let new_pc = bus.read32(sp);
                    sh2.set_reg(GuestReg::Ppc, new_pc);
                    let v = bus.read32(sp.wrapping_add(4));
                    sh2.set_sr((sh2.sr() & 0xffff_f000) | (v & SR_GUEST_MASK));
                    sh2.set_reg(GuestReg::Sp, sp.wrapping_add(8));
                    Exec { cycles: 4, delayed: true, test_irq: true }
                }
                _ => unknown(sh2, op),
            }
        }
        // MOV.B/W/L @(R0,Rm),Rn
        0x0c..=0x0e => {
            let size = u32::from(op & 3);
            let addr = sh2.gpr(0).wrapping_add(sh2.gpr(m));
            sh2.set_gpr(n, read_sized_sext(bus, addr, size));
            Exec::cont(1)
        }
        // MAC.L @Rm+,@Rn+
        0x0f => {
            let v1 = bus.read32(sh2.gpr(n));
            sh2.set_gpr(n, sh2.gpr(n).wrapping_add(4));
            let v2 = bus.read32(sh2.gpr(m));
            sh2.set_gpr(m, sh2.gpr(m).wrapping_add(4));
            let saturate = sh2.flag(S);
            let mut hi = sh2.reg(GuestReg::Mach);
            let lo = sh2.reg(GuestReg::Macl);
            if saturate {
                // Top 16 MAC bits are unused in saturated mode.
                hi &= 0xffff;
            }
            let acc = ((u64::from(hi) << 32) | u64::from(lo)) as i64;
            let prod = i64::from(v1 as i32) * i64::from(v2 as i32);
            let acc = acc.wrapping_add(prod) as u64;
            let (mut hi, mut lo) = ((acc >> 32) as u32, acc as u32);
            if saturate {
                let sig = (hi as i32) >> 15;
                if sig < -1 {
                    hi = 0x8000;
                    lo = 0;
                } else if sig > 0 {
                    hi = 0x7fff;
                    lo = 0xffff_ffff;
                }
            }
            sh2.set_reg(GuestReg::Mach, hi);
            sh2.set_reg(GuestReg::Macl, lo);
            Exec::cont(4)
        }
        _ => unknown(sh2, op),
    }
}

fn exec_alu_store<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B, op: u16, n: u8, m: u8) -> Exec {
    match op & 0x0f {
        // MOV.B/W/L Rm,@Rn
        0x00..=0x02 => {
            write_sized(bus, sh2.gpr(n), sh2.gpr(m), u32::from(op & 3));
            Exec::cont(1)
        }
        // MOV.B/W/L Rm,@-Rn
        0x04..=0x06 => {
            let addr = sh2.gpr(n).wrapping_sub(1 << (op & 3));
            sh2.set_gpr(n, addr);
            write_sized(bus, addr, sh2.gpr(m), u32::from(op & 3));
            Exec::cont(1)
        }
        // DIV0S Rm,Rn
        0x07 => {
            let q = sh2.gpr(n) >> 31 != 0;
            let mf = sh2.gpr(m) >> 31 != 0;
            let mut sr = sh2.sr() & !(M | Q | T);
            if q {
                sr |= Q;
            }
            if mf {
                sr |= M;
            }
            if q != mf {
                sr |= T;
            }
            sh2.set_sr(sr);
            Exec::cont(1)
        }
        // TST Rm,Rn
        0x08 => {
            sh2.assign_flag(T, sh2.gpr(n) & sh2.gpr(m) == 0);
            Exec::cont(1)
        }
        // AND Rm,Rn
        0x09 => {
            let v = sh2.gpr(n) & sh2.gpr(m);
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        // XOR Rm,Rn
        0x0a => {
            let v = sh2.gpr(n) ^ sh2.gpr(m);
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        // OR Rm,Rn
        0x0b => {
            let v = sh2.gpr(n) | sh2.gpr(m);
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        // CMP/STR Rm,Rn
        0x0c => {
            let x = sh2.gpr(n) ^ sh2.gpr(m);
            let t = x & 0xff == 0
                || x & 0xff00 == 0
                || x & 0x00ff_0000 == 0
                || x & 0xff00_0000 == 0;
            sh2.assign_flag(T, t);
            Exec::cont(1)
        }
        // XTRCT Rm,Rn
        0x0d => {
            let v = (sh2.gpr(n) >> 16) | (sh2.gpr(m) << 16);
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        // MULU.W / MULS.W Rm,Rn
        0x0e | 0x0f => {
            let (a, b) = if op & 1 != 0 {
                (sext16(sh2.gpr(n)), sext16(sh2.gpr(m)))
            } else {
                (sh2.gpr(n) & 0xffff, sh2.gpr(m) & 0xffff)
            };
            sh2.set_reg(GuestReg::Macl, a.wrapping_mul(b));
            Exec::cont(1)
        }
        _ => unknown(sh2, op),
    }
}

fn exec_arith_cmp(sh2: &mut Sh2, op: u16, n: u8, m: u8) -> Exec {
    let rn = sh2.gpr(n);
    let rm = sh2.gpr(m);
    match op & 0x0f {
        // CMP/EQ, CMP/HS, CMP/GE, CMP/HI, CMP/GT
        0x00 | 0x02 | 0x03 | 0x06 | 0x07 => {
            let t = match op & 0x07 {
                0x00 => rn == rm,
                0x02 => rn >= rm,
                0x03 => (rn as i32) >= (rm as i32),
                0x06 => rn > rm,
                _ => (rn as i32) > (rm as i32),
            };
            sh2.assign_flag(T, t);
            Exec::cont(1)
        }
        // DIV1 Rm,Rn
        0x04 => {
            let old_q = sh2.flag(Q);
            let mf = sh2.flag(M);
            let q1 = rn >> 31 != 0;
            let shifted = (rn << 1) | u32::from(sh2.flag(T));
            let (res, q2) = if old_q != mf {
                shifted.overflowing_add(rm)
            } else {
                shifted.overflowing_sub(rm)
            };
            sh2.set_gpr(n, res);
            let q1q2 = q1 ^ q2;
            sh2.assign_flag(Q, mf ^ q1q2);
            sh2.assign_flag(T, !q1q2);
            Exec::cont(1)
        }
        // DMULU.L Rm,Rn
        0x05 => {
            let p = u64::from(rn) * u64::from(rm);
            sh2.set_reg(GuestReg::Macl, p as u32);
            sh2.set_reg(GuestReg::Mach, (p >> 32) as u32);
            Exec::cont(1)
        }
        // SUB / ADD Rm,Rn
        0x08 | 0x0c => {
            let v = if op & 4 != 0 { rn.wrapping_add(rm) } else { rn.wrapping_sub(rm) };
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        // SUBC / ADDC Rm,Rn
        0x0a | 0x0e => {
            let t = u64::from(sh2.flag(T));
            if op & 4 != 0 {
                let wide = u64::from(rn) + u64::from(rm) + t;
                sh2.set_gpr(n, wide as u32);
                sh2.assign_flag(T, wide > u64::from(u32::MAX));
            } else {
                let sub = u64::from(rm) + t;
                sh2.set_gpr(n, rn.wrapping_sub(rm).wrapping_sub(t as u32));
                sh2.assign_flag(T, u64::from(rn) < sub);
            }
            Exec::cont(1)
        }
        // SUBV / ADDV Rm,Rn
        0x0b | 0x0f => {
            let (res, v) = if op & 4 != 0 {
                let res = rn.wrapping_add(rm);
                (res, (!(rn ^ rm) & (rn ^ res)) >> 31 != 0)
            } else {
                let res = rn.wrapping_sub(rm);
                (res, ((rn ^ rm) & (rn ^ res)) >> 31 != 0)
            };
            sh2.set_gpr(n, res);
            sh2.assign_flag(T, v);
            Exec::cont(1)
        }
        // DMULS.L Rm,Rn
        0x0d => {
            let p = i64::from(rn as i32) * i64::from(rm as i32);
            sh2.set_reg(GuestReg::Macl, p as u32);
            sh2.set_reg(GuestReg::Mach, ((p as u64) >> 32) as u32);
            Exec::cont(1)
        }
        _ => unknown(sh2, op),
    }
}

fn exec_shift_system<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B, op: u16, n: u8, _m: u8) -> Exec {
    let pc = sh2.pc();
    match op & 0x0f {
        // SHLL/SHAL or DT
        0x00 => match (op >> 4) & 0x0f {
            0 | 2 => {
                let v = sh2.gpr(n);
                sh2.assign_flag(T, v >> 31 != 0);
                sh2.set_gpr(n, v << 1);
                Exec::cont(1)
            }
            1 => {
                let v = sh2.gpr(n).wrapping_sub(1);
                sh2.set_gpr(n, v);
                sh2.assign_flag(T, v == 0);
                Exec::cont(1)
            }
            _ => unknown(sh2, op),
        },
        // SHLR/SHAR or CMP/PZ
        0x01 => match (op >> 4) & 0x0f {
            0 | 2 => {
                let v = sh2.gpr(n);
                sh2.assign_flag(T, v & 1 != 0);
                let res = if op & 0x20 != 0 { ((v as i32) >> 1) as u32 } else { v >> 1 };
                sh2.set_gpr(n, res);
                Exec::cont(1)
            }
            1 => {
                sh2.assign_flag(T, (sh2.gpr(n) as i32) >= 0);
                Exec::cont(1)
            }
            _ => unknown(sh2, op),
        },
        // STS.L/STC.L system register,@-Rn
        0x02 | 0x03 => {
            let v = match op & 0x3f {
                0x02 => sh2.reg(GuestReg::Mach),
                0x12 => sh2.reg(GuestReg::Macl),
                0x22 => sh2.reg(GuestReg::Pr),
                0x03 => sh2.sr() & 0xfff,
                0x13 => sh2.reg(GuestReg::Gbr),
                0x23 => sh2.reg(GuestReg::Vbr),
                _ => return unknown(sh2, op),
            };
            let addr = sh2.gpr(n).wrapping_sub(4);
            sh2.set_gpr(n, addr);
            bus.write32(addr, v);
            Exec::cont(1)
        }
        // Rotates or CMP/PL
        0x04 | 0x05 => match op & 0x3f {
            0x04 => {
                let v = sh2.gpr(n);
                sh2.assign_flag(T, v >> 31 != 0);
                sh2.set_gpr(n, v.rotate_left(1));
                Exec::cont(1)
            }
            0x05 => {
                let v = sh2.gpr(n);
                sh2.assign_flag(T, v & 1 != 0);
                sh2.set_gpr(n, v.rotate_right(1));
                Exec::cont(1)
            }
            0x24 => {
                let v = sh2.gpr(n);
                let res = (v << 1) | u32::from(sh2.flag(T));
                sh2.assign_flag(T, v >> 31 != 0);
                sh2.set_gpr(n, res);
                Exec::cont(1)
            }
            0x25 => {
                let v = sh2.gpr(n);
                let res = (v >> 1) | (u32::from(sh2.flag(T)) << 31);
                sh2.assign_flag(T, v & 1 != 0);
                sh2.set_gpr(n, res);
                Exec::cont(1)
            }
            0x15 => {
                sh2.assign_flag(T, (sh2.gpr(n) as i32) > 0);
                Exec::cont(1)
            }
            _ => unknown(sh2, op),
        },
        // LDS.L/LDC.L @Rm+,system register
        0x06 | 0x07 => {
            let addr = sh2.gpr(n);
            let val = bus.read32(addr);
            let mut test_irq = false;
            match op & 0x3f {
                0x06 => sh2.set_reg(GuestReg::Mach, val),
                0x16 => sh2.set_reg(GuestReg::Macl, val),
                0x26 => sh2.set_reg(GuestReg::Pr, val),
                0x07 => {
                    sh2.set_sr((sh2.sr() & 0xffff_f000) | (val & SR_GUEST_MASK));
                    test_irq = true;
                }
                0x17 => sh2.set_reg(GuestReg::Gbr, val),
                0x27 => sh2.set_reg(GuestReg::Vbr, val),
                _ => return unknown(sh2, op),
            }
            sh2.set_gpr(n, addr.wrapping_add(4));
            Exec { cycles: 1, delayed: false, test_irq }
        }
        // SHLL2/8/16, SHLR2/8/16
        0x08 | 0x09 => {
            let cnt = match (op >> 4) & 0x0f {
                0 => 2,
                1 => 8,
                2 => 16,
                _ => return unknown(sh2, op),
            };
            let v = sh2.gpr(n);
            sh2.set_gpr(n, if op & 1 != 0 { v >> cnt } else { v << cnt });
            Exec::cont(1)
        }
        // LDS Rm,MACH/MACL/PR
        0x0a => {
            let v = sh2.gpr(n);
            match (op >> 4) & 0x0f {
                0 => sh2.set_reg(GuestReg::Mach, v),
                1 => sh2.set_reg(GuestReg::Macl, v),
                2 => sh2.set_reg(GuestReg::Pr, v),
                _ => return unknown(sh2, op),
            }
            Exec::cont(1)
        }
        // JSR/JMP @Rm or TAS.B @Rn
        0x0b => match (op >> 4) & 0x0f {
            0 | 2 => {
                if op & 0x20 == 0 {
                    sh2.set_reg(GuestReg::Pr, pc.wrapping_add(2));
                }
                let target = sh2.gpr(n);
                sh2.set_reg(GuestReg::Ppc, target);
                Exec::delayed(2)
            }
            1 => {
                let addr = sh2.gpr(n);
                let val = bus.read8(addr);
                sh2.assign_flag(T, val == 0);
                bus.write8(addr, (val | 0x80) as u8);
                Exec::cont(4)
            }
            _ => unknown(sh2, op),
        },
        // LDC Rm,SR/GBR/VBR
        0x0e => {
            let v = sh2.gpr(n);
            match (op >> 4) & 0x0f {
                0 => {
                    sh2.set_sr((sh2.sr() & 0xffff_f000) | (v & SR_GUEST_MASK));
                    return Exec { cycles: 1, delayed: false, test_irq: true };
                }
                1 => sh2.set_reg(GuestReg::Gbr, v),
                2 => sh2.set_reg(GuestReg::Vbr, v),
                _ => return unknown(sh2, op),
            }
            Exec::cont(1)
        }
        // MAC.W @Rm+,@Rn+
        0x0f => {
            let mm = ((op >> 4) & 0x0f) as u8;
            let v1 = sext16(bus.read16(sh2.gpr(n)));
            sh2.set_gpr(n, sh2.gpr(n).wrapping_add(2));
            let v2 = sext16(bus.read16(sh2.gpr(mm)));
            sh2.set_gpr(mm, sh2.gpr(mm).wrapping_add(2));
            let hi = sh2.reg(GuestReg::Mach);
            let lo = sh2.reg(GuestReg::Macl);
            let acc = ((u64::from(hi) << 32) | u64::from(lo)) as i64;
            let prod = i64::from(v1 as i32) * i64::from(v2 as i32);
            let acc = acc.wrapping_add(prod) as u64;
            let (hi, mut lo) = ((acc >> 32) as u32, acc as u32);
            if sh2.flag(S) && ((lo as i32) >> 31) as u32 != hi {
                lo = if (hi as i32) >= 0 { 0x7fff_ffff } else { 0x8000_0000 };
            }
            sh2.set_reg(GuestReg::Mach, hi);
            sh2.set_reg(GuestReg::Macl, lo);
            Exec::cont(3)
        }
        _ => unknown(sh2, op),
    }
}

fn exec_load_alu<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B, op: u16, n: u8, m: u8) -> Exec {
    match op & 0x0f {
        // MOV.B/W/L @Rm,Rn and @Rm+,Rn
        0x00..=0x02 | 0x04..=0x06 => {
            let size = u32::from(op & 3);
            let val = read_sized_sext(bus, sh2.gpr(m), size);
            sh2.set_gpr(n, val);
            if (op & 7) >= 4 && n != m {
                sh2.set_gpr(m, sh2.gpr(m).wrapping_add(1 << size));
            }
            Exec::cont(1)
        }
        0x03 | 0x07..=0x0f => {
            let s = sh2.gpr(m);
            let v = match op & 0x0f {
                0x03 => s,
                0x07 => !s,
                0x08 => (s & 0xffff_0000) | ((s & 0xff) << 8) | ((s >> 8) & 0xff),
                0x09 => s.rotate_left(16),
                0x0a => {
                    let t = u32::from(sh2.flag(T));
                    let res = 0u32.wrapping_sub(s).wrapping_sub(t);
                    sh2.assign_flag(T, u64::from(s) + u64::from(t) > 0);
                    res
                }
                0x0b => 0u32.wrapping_sub(s),
                0x0c => s & 0xff,
                0x0d => s & 0xffff,
                0x0e => sext8(s),
                _ => sext16(s),
            };
            sh2.set_gpr(n, v);
            Exec::cont(1)
        }
        _ => unknown(sh2, op),
    }
}

fn exec_imm_branch_mem<B: Sh2Bus>(
    sh2: &mut Sh2,
    bus: &mut B,
    op: u16,
    m: u8,
    in_delay: bool,
) -> Exec {
    let pc = sh2.pc();
    match op & 0x0f00 {
        // MOV.B/W R0,@(disp,Rn)
        0x0000 | 0x0100 => {
            let size = u32::from(op >> 8) & 1;
            let addr = sh2.gpr(m).wrapping_add(u32::from(op & 0x0f) << size);
            write_sized(bus, addr, sh2.gpr(0), size);
            Exec::cont(1)
        }
        // MOV.B/W @(disp,Rm),R0
        0x0400 | 0x0500 => {
            let size = u32::from(op >> 8) & 1;
            let addr = sh2.gpr(m).wrapping_add(u32::from(op & 0x0f) << size);
            sh2.set_gpr(0, read_sized_sext(bus, addr, size));
            Exec::cont(1)
        }
        // CMP/EQ #imm,R0
        0x0800 => {
            sh2.assign_flag(T, sh2.gpr(0) == sext8(u32::from(op & 0xff)));
            Exec::cont(1)
        }
        // BT/BF and BT/S, BF/S
        0x0900 | 0x0b00 | 0x0d00 | 0x0f00 => {
            let with_delay = op & 0x0400 != 0;
            let taken = sh2.flag(T) == (op & 0x0200 == 0);
            let disp = ((op as i32) << 24) >> 23;
            if with_delay || in_delay {
                let base = pc.wrapping_add(2);
                let target = if taken { base.wrapping_add_signed(disp) } else { base };
                sh2.set_reg(GuestReg::Ppc, target);
                if with_delay { Exec::delayed(2) } else { Exec::cont(3) }
            } else {
                let target = if taken {
                    pc.wrapping_add(2).wrapping_add_signed(disp)
                } else {
                    pc
                };
                sh2.set_pc(target);
                Exec::cont(3)
            }
        }
        _ => unknown(sh2, op),
    }
}

fn exec_gbr_imm<B: Sh2Bus>(sh2: &mut Sh2, bus: &mut B, op: u16) -> Exec {
    let pc = sh2.pc();
    let imm = u32::from(op & 0xff);
    let gbr = sh2.reg(GuestReg::Gbr);
    match op & 0x0f00 {
        // MOV.B/W/L R0,@(disp,GBR)
        0x0000 | 0x0100 | 0x0200 => {
            let size = u32::from(op >> 8) & 3;
            write_sized(bus, gbr.wrapping_add(imm << size), sh2.gpr(0), size);
            Exec::cont(1)
        }
        // MOV.B/W/L @(disp,GBR),R0
        0x0400 | 0x0500 | 0x0600 => {
            let size = u32::from(op >> 8) & 3;
            let val = read_sized_sext(bus, gbr.wrapping_add(imm << size), size);
            sh2.set_gpr(0, val);
            Exec::cont(1)
        }
        // TRAPA #imm
        0x0300 => {
            let sp = sh2.reg(GuestReg::Sp).wrapping_sub(8);
            sh2.set_reg(GuestReg::Sp, sp);
            bus.write32(sp.wrapping_add(4), sh2.sr() & 0xfff);
            bus.write32(sp, pc);
            let target = bus.read32(sh2.reg(GuestReg::Vbr).wrapping_add(imm * 4));
            sh2.set_pc(target);
            Exec::cont(8)
        }
        // MOVA @(disp,PC),R0
        0x0700 => {
            sh2.set_gpr(0, pc.wrapping_add(imm * 4 + 2) & !3);
            Exec::cont(1)
        }
        // TST #imm,R0
        0x0800 => {
            sh2.assign_flag(T, sh2.gpr(0) & imm == 0);
            Exec::cont(1)
        }
        // AND #imm,R0
        0x0900 => {
            let v = sh2.gpr(0) & imm;
            sh2.set_gpr(0, v);
            Exec::cont(1)
        }
        // XOR #imm,R0
        0x0a00 => {
            let v = sh2.gpr(0) ^ imm;
            sh2.set_gpr(0, v);
            Exec::cont(1)
        }
        // OR #imm,R0
        0x0b00 => {
            let v = sh2.gpr(0) | imm;
            sh2.set_gpr(0, v);
            Exec::cont(1)
        }
        // TST.B #imm,@(R0,GBR)
        0x0c00 => {
            let val = bus.read8(gbr.wrapping_add(sh2.gpr(0)));
            sh2.assign_flag(T, val & imm == 0);
            Exec::cont(3)
        }
        // AND.B / XOR.B / OR.B #imm,@(R0,GBR)
        _ => {
            let addr = gbr.wrapping_add(sh2.gpr(0));
            let val = bus.read8(addr);
            let val = match op & 0x0f00 {
                0x0d00 => val & imm,
                0x0e00 => val ^ imm,
                _ => val | imm,
            };
            bus.write8(addr, val as u8);
            Exec::cont(3)
        }
    }
}

fn write_sized<B: Sh2Bus>(bus: &mut B, addr: u32, val: u32, size: u32) {
    match size {
        0 => bus.write8(addr, val as u8),
        1 => bus.write16(addr, val as u16),
        _ => bus.write32(addr, val),
    }
}

fn read_sized_sext<B: Sh2Bus>(bus: &mut B, addr: u32, size: u32) -> u32 {
    match size {
        0 => sext8(bus.read8(addr)),
        1 => sext16(bus.read16(addr)),
        _ => bus.read32(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestBus, asm, load_program};

    const ENTRY: u32 = 0x0200_0000;

    fn setup(prog: &[u16]) -> (Sh2, TestBus) {
        let mut bus = TestBus::new();
        load_program(&mut bus, ENTRY, prog);
        let mut sh2 = Sh2::new(false);
        sh2.set_pc(ENTRY);
        (sh2, bus)
    }

    #[test]
    fn mov_add_sequence() {
        let (mut sh2, mut bus) = setup(&[
            asm::mov_imm(1, 5),
            asm::mov_imm(2, 7),
            asm::add_rr(1, 2),
        ]);
        for _ in 0..3 {
            step(&mut sh2, &mut bus);
        }
        assert_eq!(sh2.gpr(2), 12);
        assert_eq!(sh2.gpr(1), 5);
    }

    #[test]
    fn delayed_branch_runs_its_slot_first() {
        // BRA +4; ADD #1,R3 (slot); ... target: ADD #2,R3
        let (mut sh2, mut bus) = setup(&[
            asm::bra(1), // target = entry + 4 + 2*1 = entry + 6
            asm::add_imm(3, 1),
            asm::nop(),
            asm::add_imm(3, 2),
        ]);
        let c = step(&mut sh2, &mut bus);
        assert_eq!(c, 3); // branch 2 + slot 1
        assert_eq!(sh2.gpr(3), 1);
        assert_eq!(sh2.pc(), ENTRY + 6);
    }

    #[test]
    fn div1_unsigned_division_idiom() {
        // Canonical 32/16 unsigned divide: divisor shifted high, 16 steps,
        // ROTCL + EXTU.W leaves the quotient in R0.
        let mut prog = vec![asm::div0u()];
        for _ in 0..16 {
            prog.push(asm::div1(1, 0));
        }
        prog.push(asm::rotcl(0));
        prog.push(asm::extu_w(0, 0));
        let (mut sh2, mut bus) = setup(&prog);
        sh2.set_gpr(0, 10);
        sh2.set_gpr(1, 3 << 16);
        for _ in 0..prog.len() {
            step(&mut sh2, &mut bus);
        }
        assert_eq!(sh2.gpr(0), 3);
    }

    #[test]
    fn mac_w_saturates_macl_only() {
        let (mut sh2, mut bus) = setup(&[asm::mac_w(5, 4)]);
        sh2.set_gpr(4, 0x0600_0000);
        sh2.set_gpr(5, 0x0600_0002);
        bus.write16(0x0600_0000, 0x7fff);
        bus.write16(0x0600_0002, 0x7fff);
        sh2.set_reg(GuestReg::Macl, 0x7fff_ffff);
        sh2.assign_flag(S, true);
        step(&mut sh2, &mut bus);
        assert_eq!(sh2.reg(GuestReg::Macl), 0x7fff_ffff);
    }

    #[test]
    fn sleep_parks_pc_and_drains_budget() {
        let (mut sh2, mut bus) = setup(&[asm::nop(), asm::sleep()]);
        run(&mut sh2, &mut bus, 50);
        assert_eq!(sh2.pc(), ENTRY + 2);
        assert_eq!(sh2.cycles_done, 51); // overshoot by the SLEEP charge
    }
}
