/*!
sh2.rs - Guest SH-2 architectural state (register file, SR packing, IRQ
acceptance).

Overview
========
`Sh2` is the single authoritative owner of everything the recompiler and
the interpreter consider guest-visible CPU state. It intentionally excludes:
  - Memory / bus logic (see `bus::Sh2Bus`)
  - Translation and dispatch machinery (see `drc`)
The register file is a flat array of 32-bit slots so that translated code
can address any register by its byte offset from the context base; the
slot order is fixed and shared with the emitter's context load/store ops.

Status register layout
======================
Bit:  31..12   9  8  7..4  1  0
      cycles   M  Q  I     S  T
Where:
  T = carry / compare result
  S = multiply-accumulate saturation enable
  I = interrupt mask (levels <= I are held pending)
  Q, M = DIV0S/DIV0U/DIV1 division state
Bits 12..31 are architecturally reserved; the recompiler stores the signed
remaining-cycle budget there while the CPU is being dispatched. Guest reads
of SR (STC and friends) mask the field off.
*/

use crate::bus::Sh2Bus;

/// SR.T - carry / compare flag.
pub const T: u32 = 0x0000_0001;
/// SR.S - MAC saturation enable.
pub const S: u32 = 0x0000_0002;
/// SR.I - interrupt mask field.
pub const I: u32 = 0x0000_00f0;
/// SR.Q - division state.
pub const Q: u32 = 0x0000_0100;
/// SR.M - division state.
pub const M: u32 = 0x0000_0200;

pub const Q_SHIFT: u32 = 8;
pub const M_SHIFT: u32 = 9;

/// Bits of SR that exist architecturally (T, S, I, Q, M).
pub const SR_GUEST_MASK: u32 = 0x0000_03f3;
/// Low bits preserved by a guest SR store (reserved bits read as zero).
pub const SR_STORE_MASK: u32 = 0x0000_0fff;
/// Bit position of the recompiler's cycle counter inside SR.
pub const SR_CYCLE_SHIFT: u32 = 12;

/// Context slot indices for the guest register file.
///
/// The numeric values are load-bearing: translated code addresses the
/// context by `reg as u32 * 4`, and the prologue/epilogue copy runs of
/// consecutive slots with multi-register context ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GuestReg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    /// R15 doubles as the stack pointer.
    Sp,
    Pc,
    /// Pending PC: branch target latched while a delay slot executes.
    Ppc,
    Pr,
    Sr,
    Gbr,
    Vbr,
    Mach,
    Macl,
}

const GPRS: [GuestReg; 16] = [
    GuestReg::R0,
    GuestReg::R1,
    GuestReg::R2,
    GuestReg::R3,
    GuestReg::R4,
    GuestReg::R5,
    GuestReg::R6,
    GuestReg::R7,
    GuestReg::R8,
    GuestReg::R9,
    GuestReg::R10,
    GuestReg::R11,
    GuestReg::R12,
    GuestReg::R13,
    GuestReg::R14,
    GuestReg::Sp,
];

impl GuestReg {
    /// General register by field number (0..=15).
    #[inline]
    pub fn r(n: u8) -> Self {
        GPRS[n as usize]
    }

    /// Byte offset of this register inside the context.
    #[inline]
    pub const fn offs(self) -> u32 {
        self as u32 * 4
    }
}

/// Number of architectural context slots.
pub const CTX_REGS: usize = 24;
/// One extra slot of translation-private scratch (used by the paired
/// post-increment reads of MAC).
pub const CTX_SLOTS: usize = CTX_REGS + 1;
/// Byte offset of the scratch slot.
pub const DRC_TMP_OFFS: u32 = CTX_REGS as u32 * 4;

/// Guest CPU context.
///
/// One instance per emulated SH-2; the 32X has two sharing one `Drc`.
#[derive(Debug, Clone)]
pub struct Sh2 {
    ctx: [u32; CTX_SLOTS],
    /// Which of the two 32X CPUs this is; selects the per-CPU code cache
    /// for internal-memory blocks.
    pub is_slave: bool,
    /// Cycle account: total cycles requested by the host so far.
    pub cycles_aim: i32,
    /// Cycle account: total cycles actually executed so far.
    pub cycles_done: i32,
    /// Highest pending interrupt level (IRL or internal).
    pub pending_level: u8,
    /// Pending external interrupt level (IRL pins).
    pub pending_irl: u8,
    /// Pending internal (on-chip peripheral) interrupt level.
    pub pending_int_irq: u8,
    /// Vector number for the pending internal interrupt.
    pub pending_int_vector: u8,
}

impl Sh2 {
    pub fn new(is_slave: bool) -> Self {
        Self {
            ctx: [0; CTX_SLOTS],
            is_slave,
            cycles_aim: 0,
            cycles_done: 0,
            pending_level: 0,
            pending_irl: 0,
            pending_int_irq: 0,
            pending_int_vector: 0,
        }
    }

    /// Power-on reset: PC and SP come from the start of the vector table,
    /// all interrupts masked.
    pub fn reset(&mut self, bus: &mut impl Sh2Bus) {
        let vbr = 0;
        self.ctx = [0; CTX_SLOTS];
        self.set_reg(GuestReg::Vbr, vbr);
        self.set_reg(GuestReg::Sr, I);
        let pc = bus.read32(vbr);
        let sp = bus.read32(vbr + 4);
        self.set_pc(pc);
        self.set_reg(GuestReg::Sp, sp);
    }

    // ---------------------------------------------------------------------
    // Register access
    // ---------------------------------------------------------------------

    #[inline]
    pub fn reg(&self, r: GuestReg) -> u32 {
        self.ctx[r as usize]
    }

    #[inline]
    pub fn set_reg(&mut self, r: GuestReg, v: u32) {
        self.ctx[r as usize] = v;
    }

    #[inline]
    pub fn gpr(&self, n: u8) -> u32 {
        self.ctx[n as usize & 15]
    }

    #[inline]
    pub fn set_gpr(&mut self, n: u8, v: u32) {
        self.ctx[n as usize & 15] = v;
    }

    #[inline]
    pub fn pc(&self) -> u32 {
        self.reg(GuestReg::Pc)
    }

    #[inline]
    pub fn set_pc(&mut self, v: u32) {
        self.set_reg(GuestReg::Pc, v);
    }

    #[inline]
    pub fn sr(&self) -> u32 {
        self.reg(GuestReg::Sr)
    }

    #[inline]
    pub fn set_sr(&mut self, v: u32) {
        self.set_reg(GuestReg::Sr, v);
    }

    /// Remaining cycle budget carried in the reserved SR bits (signed).
    #[inline]
    pub fn sr_cycles(&self) -> i32 {
        (self.sr() as i32) >> SR_CYCLE_SHIFT
    }

    /// Context slot by byte offset; used by emitted context loads.
    #[inline]
    pub(crate) fn ctx_read(&self, offs: u32) -> u32 {
        self.ctx[(offs / 4) as usize]
    }

    /// Context slot by byte offset; used by emitted context stores.
    #[inline]
    pub(crate) fn ctx_write(&mut self, offs: u32, v: u32) {
        self.ctx[(offs / 4) as usize] = v;
    }

    // ---------------------------------------------------------------------
    // SR flag helpers
    // ---------------------------------------------------------------------

    #[inline]
    pub fn flag(&self, mask: u32) -> bool {
        (self.sr() & mask) != 0
    }

    #[inline]
    pub fn assign_flag(&mut self, mask: u32, on: bool) {
        let sr = self.sr();
        self.set_sr(if on { sr | mask } else { sr & !mask });
    }

    /// Interrupt mask level from SR.I.
    #[inline]
    pub fn i_level(&self) -> u8 {
        ((self.sr() & I) >> 4) as u8
    }

    // ---------------------------------------------------------------------
    // Interrupts
    // ---------------------------------------------------------------------

    /// Accept an interrupt: push SR and PC, fetch the vector, raise the
    /// mask to the accepted level.
    pub fn do_irq(&mut self, bus: &mut impl Sh2Bus, level: u8, vector: u8) {
        let mut sp = self.reg(GuestReg::Sp);
        sp = sp.wrapping_sub(4);
        bus.write32(sp, self.sr() & SR_GUEST_MASK);
        sp = sp.wrapping_sub(4);
        bus.write32(sp, self.pc());
        self.set_reg(GuestReg::Sp, sp);

        let vec_addr = self.reg(GuestReg::Vbr).wrapping_add(u32::from(vector) * 4);
        let pc = bus.read32(vec_addr);
        self.set_pc(pc);

        let sr = (self.sr() & !I) | (u32::from(level & 0x0f) << 4);
        self.set_sr(sr);
    }

    /// Poll pending interrupts against the current mask and accept the
    /// winner. External IRL beats an internal interrupt of the same level;
    /// IRL uses the 32X autovector numbering.
    pub fn test_irq(&mut self, bus: &mut impl Sh2Bus) {
        if self.pending_level <= self.i_level() {
            return;
        }
        if self.pending_irl > self.pending_int_irq {
            let irl = self.pending_irl;
            self.do_irq(bus, irl, 64 + irl / 2);
        } else {
            let (level, vector) = (self.pending_int_irq, self.pending_int_vector);
            self.do_irq(bus, level, vector);
            self.pending_int_irq = 0;
            self.pending_level = self.pending_irl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestBus;

    #[test]
    fn reg_offsets_are_contiguous() {
        assert_eq!(GuestReg::R0.offs(), 0);
        assert_eq!(GuestReg::Sp.offs(), 15 * 4);
        assert_eq!(GuestReg::Pc.offs(), 16 * 4);
        assert_eq!(GuestReg::Macl.offs(), 23 * 4);
        assert_eq!(DRC_TMP_OFFS, 24 * 4);
    }

    #[test]
    fn flag_assignment() {
        let mut sh2 = Sh2::new(false);
        sh2.assign_flag(T, true);
        assert!(sh2.flag(T));
        sh2.assign_flag(T, false);
        assert!(!sh2.flag(T));
        sh2.assign_flag(M | Q, true);
        assert_eq!(sh2.sr() & (M | Q), M | Q);
    }

    #[test]
    fn sr_cycles_is_signed() {
        let mut sh2 = Sh2::new(false);
        sh2.set_sr(100 << SR_CYCLE_SHIFT);
        assert_eq!(sh2.sr_cycles(), 100);
        sh2.set_sr((-3i32 as u32) << SR_CYCLE_SHIFT);
        assert_eq!(sh2.sr_cycles(), -3);
    }

    #[test]
    fn do_irq_pushes_and_vectors() {
        let mut bus = TestBus::new();
        let mut sh2 = Sh2::new(false);
        sh2.set_reg(GuestReg::Sp, 0x0600_1000);
        sh2.set_pc(0x0200_0100);
        sh2.set_sr(T | (50 << SR_CYCLE_SHIFT));
        sh2.set_reg(GuestReg::Vbr, 0x0600_2000);
        bus.write32(0x0600_2000 + 68 * 4, 0x0200_0400);

        sh2.do_irq(&mut bus, 8, 68);

        assert_eq!(sh2.reg(GuestReg::Sp), 0x0600_0ff8);
        assert_eq!(bus.read32(0x0600_0ffc), T); // SR pushed without cycle bits
        assert_eq!(bus.read32(0x0600_0ff8), 0x0200_0100);
        assert_eq!(sh2.pc(), 0x0200_0400);
        assert_eq!(sh2.i_level(), 8);
    }

    #[test]
    fn test_irq_respects_mask() {
        let mut bus = TestBus::new();
        let mut sh2 = Sh2::new(false);
        sh2.set_reg(GuestReg::Sp, 0x0600_1000);
        sh2.set_sr(8 << 4); // mask level 8
        sh2.pending_level = 8;
        sh2.pending_irl = 8;
        let pc = sh2.pc();
        sh2.test_irq(&mut bus);
        assert_eq!(sh2.pc(), pc); // level == mask: held pending
    }
}
