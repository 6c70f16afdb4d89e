/*!
vm.rs - Executes the portable host encoding.

Overview
========
The VM is the portable backend's "CPU": a 16-register bank, N/Z/C/V
flags, and an instruction pointer into the code buffer. `enter` plays the
role of calling through the entry trampoline on a native backend: it
loads the block pointer and context handle into the argument registers
and starts executing at the trampoline, which installs the context
register, pulls the statically mapped guest registers out of the context,
and jumps into the block. Execution ends when the exit trampoline's
`Exit` op retires.

Flag semantics are x86-style: subtraction (and compare) set carry as
*borrow*, so SUBC/NEGC marshal SR.T through the carry flag without
inversion.

Write watching
==============
Stores performed by translated code may land in memory that backs other
translated blocks. The VM records every written address that falls in a
write-watched range (DRAM, data array); the dispatcher drains the list
after each block and routes it through the same invalidation entry points
the embedder uses.
*/

use super::ops::{HOST_OP_BYTES, HostOp, Kind};
use super::{Cond, HOST_REGS, HostFn};
use crate::bus::Sh2Bus;
use crate::sh2::{Q, SR_GUEST_MASK, Sh2, T};

/// Opaque value installed in the context register; translated code only
/// forwards it to calls, it is never dereferenced by the VM.
pub const CTX_HANDLE: u32 = 0;

const MSB: u32 = 0x8000_0000;

pub struct Vm {
    pub regs: [u32; HOST_REGS],
    n: bool,
    z: bool,
    c: bool,
    v: bool,
    smc_writes: Vec<u32>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self {
            regs: [0; HOST_REGS],
            n: false,
            z: false,
            c: false,
            v: false,
            smc_writes: Vec::new(),
        }
    }

    /// Addresses written by translated code since the last drain, in
    /// write-watched ranges only.
    pub fn take_smc_writes(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.smc_writes)
    }

    fn cond_holds(&self, cond: Cond) -> bool {
        match cond {
            Cond::Al => true,
            Cond::Eq => self.z,
            Cond::Ne => !self.z,
            Cond::Hs => !self.c,
            Cond::Lo => self.c,
            Cond::Mi => self.n,
            Cond::Pl => !self.n,
            Cond::Vs => self.v,
            Cond::Vc => !self.v,
            Cond::Hi => !self.c && !self.z,
            Cond::Ls => self.c || self.z,
            Cond::Ge => self.n == self.v,
            Cond::Lt => self.n != self.v,
            Cond::Gt => !self.z && self.n == self.v,
            Cond::Le => self.z || self.n != self.v,
        }
    }

    #[inline]
    fn set_nz(&mut self, res: u32) {
        self.n = (res & MSB) != 0;
        self.z = res == 0;
    }

    #[inline]
    fn add_flags(&mut self, a: u32, b: u32, cin: bool) -> u32 {
        let wide = u64::from(a) + u64::from(b) + u64::from(cin);
        let res = wide as u32;
        self.c = wide > u64::from(u32::MAX);
        self.v = (!(a ^ b) & (a ^ res) & MSB) != 0;
        self.set_nz(res);
        res
    }

    #[inline]
    fn sub_flags(&mut self, a: u32, b: u32, bin: bool) -> u32 {
        let sub = u64::from(b) + u64::from(bin);
        let res = a.wrapping_sub(b).wrapping_sub(u32::from(bin));
        self.c = u64::from(a) < sub;
        self.v = ((a ^ b) & (a ^ res) & MSB) != 0;
        self.set_nz(res);
        res
    }

    fn note_write(&mut self, addr: u32) {
        if crate::bus::is_dram(addr) || crate::bus::is_data_array(addr) {
            self.smc_writes.push(addr);
        }
    }

    /// Run translated code: `entry` is the entry trampoline, `block` the
    /// block body it will jump to. Returns when the exit trampoline
    /// retires its `Exit` op.
    pub fn enter<B: Sh2Bus>(
        &mut self,
        code: &[u8],
        entry: u32,
        block: u32,
        sh2: &mut Sh2,
        bus: &mut B,
    ) {
        self.regs[0] = block;
        self.regs[1] = CTX_HANDLE;
        let mut ip = entry as usize;

        loop {
            let op = HostOp::decode(&code[ip..ip + HOST_OP_BYTES]);
            ip += HOST_OP_BYTES;
            if !self.cond_holds(op.cond) {
                continue;
            }

            let (a, b) = (op.a as usize, op.b as usize);
            match op.kind {
                Kind::MovR => self.regs[a] = self.regs[b],
                Kind::MovI => self.regs[a] = op.imm,
                Kind::AddR => self.regs[a] = self.regs[a].wrapping_add(self.regs[b]),
                Kind::AddI => self.regs[a] = self.regs[a].wrapping_add(op.imm),
                Kind::SubR => self.regs[a] = self.regs[a].wrapping_sub(self.regs[b]),
                Kind::SubI => self.regs[a] = self.regs[a].wrapping_sub(op.imm),
                Kind::AndR => self.regs[a] &= self.regs[b],
                Kind::AndI => self.regs[a] = self.regs[b] & op.imm,
                Kind::OrR => self.regs[a] |= self.regs[b],
                Kind::OrI => self.regs[a] |= op.imm,
                Kind::OrLsl => self.regs[a] |= self.regs[b] << op.imm,
                Kind::EorR => self.regs[a] ^= self.regs[b],
                Kind::EorI => self.regs[a] ^= op.imm,
                Kind::Eor3 => self.regs[a] = self.regs[b] ^ self.regs[op.c as usize],
                Kind::EorLsr => self.regs[a] ^= self.regs[b] >> op.imm,
                Kind::BicI => self.regs[a] &= !op.imm,
                Kind::Mvn => self.regs[a] = !self.regs[b],
                Kind::Neg => self.regs[a] = 0u32.wrapping_sub(self.regs[b]),
                Kind::Lsl => self.regs[a] = self.regs[b] << op.imm,
                Kind::Lsr => self.regs[a] = self.regs[b] >> op.imm,
                Kind::Asr => self.regs[a] = ((self.regs[b] as i32) >> op.imm) as u32,
                Kind::Rol => self.regs[a] = self.regs[b].rotate_left(op.imm),
                Kind::Ror => self.regs[a] = self.regs[b].rotate_right(op.imm),
                Kind::AddfR => self.regs[a] = self.add_flags(self.regs[a], self.regs[b], false),
                Kind::SubfR => self.regs[a] = self.sub_flags(self.regs[a], self.regs[b], false),
                Kind::SubfI => self.regs[a] = self.sub_flags(self.regs[a], op.imm, false),
                Kind::AdcfR => {
                    let cin = self.c;
                    self.regs[a] = self.add_flags(self.regs[a], self.regs[b], cin);
                }
                Kind::SbcfR => {
                    let bin = self.c;
                    self.regs[a] = self.sub_flags(self.regs[a], self.regs[b], bin);
                }
                Kind::NegcfR => {
                    let bin = self.c;
                    self.regs[a] = self.sub_flags(0, self.regs[b], bin);
                }
                Kind::EorfR => {
                    let res = self.regs[a] ^ self.regs[b];
                    self.regs[a] = res;
                    self.set_nz(res);
                }
                Kind::Lslf => {
                    let s = self.regs[b];
                    self.c = (s >> (32 - op.imm)) & 1 != 0;
                    let res = s << op.imm;
                    self.regs[a] = res;
                    self.set_nz(res);
                }
                Kind::Lsrf => {
                    let s = self.regs[b];
                    self.c = (s >> (op.imm - 1)) & 1 != 0;
                    let res = s >> op.imm;
                    self.regs[a] = res;
                    self.set_nz(res);
                }
                Kind::Asrf => {
                    let s = self.regs[b];
                    self.c = (s >> (op.imm - 1)) & 1 != 0;
                    let res = ((s as i32) >> op.imm) as u32;
                    self.regs[a] = res;
                    self.set_nz(res);
                }
                Kind::Rolf => {
                    let res = self.regs[b].rotate_left(op.imm);
                    self.c = res & 1 != 0;
                    self.regs[a] = res;
                    self.set_nz(res);
                }
                Kind::Rorf => {
                    let res = self.regs[b].rotate_right(op.imm);
                    self.c = res & MSB != 0;
                    self.regs[a] = res;
                    self.set_nz(res);
                }
                Kind::Rolcf => {
                    let s = self.regs[a];
                    let res = (s << 1) | u32::from(self.c);
                    self.c = s & MSB != 0;
                    self.regs[a] = res;
                    self.set_nz(res);
                }
                Kind::Rorcf => {
                    let s = self.regs[a];
                    let res = (s >> 1) | (u32::from(self.c) << 31);
                    self.c = s & 1 != 0;
                    self.regs[a] = res;
                    self.set_nz(res);
                }
                Kind::TstR => {
                    let res = self.regs[a] & self.regs[b];
                    self.set_nz(res);
                }
                Kind::TstI => {
                    let res = self.regs[a] & op.imm;
                    self.set_nz(res);
                }
                Kind::TeqR => {
                    let res = self.regs[a] ^ self.regs[b];
                    self.set_nz(res);
                }
                Kind::CmpR => {
                    self.sub_flags(self.regs[a], self.regs[b], false);
                }
                Kind::CmpI => {
                    self.sub_flags(self.regs[a], op.imm, false);
                }
                Kind::ClearMsb => {
                    let mask = if op.imm == 0 { !0 } else { !0u32 >> op.imm };
                    self.regs[a] = self.regs[b] & mask;
                }
                Kind::Sext => {
                    let sh = 32 - op.imm;
                    self.regs[a] = (((self.regs[b] << sh) as i32) >> sh) as u32;
                }
                Kind::Mul => {
                    self.regs[a] = self.regs[b].wrapping_mul(self.regs[op.c as usize]);
                }
                Kind::MulU64 => {
                    let p = u64::from(self.regs[op.c as usize]) * u64::from(self.regs[op.d as usize]);
                    self.regs[a] = p as u32;
                    self.regs[b] = (p >> 32) as u32;
                }
                Kind::MulS64 => {
                    let p = i64::from(self.regs[op.c as usize] as i32)
                        * i64::from(self.regs[op.d as usize] as i32);
                    self.regs[a] = p as u32;
                    self.regs[b] = (p as u64 >> 32) as u32;
                }
                Kind::MulaS64 => {
                    let acc = (u64::from(self.regs[b]) << 32) | u64::from(self.regs[a]);
                    let p = i64::from(self.regs[op.c as usize] as i32)
                        * i64::from(self.regs[op.d as usize] as i32);
                    let acc = (acc as i64).wrapping_add(p) as u64;
                    self.regs[a] = acc as u32;
                    self.regs[b] = (acc >> 32) as u32;
                }
                Kind::CtxRead => self.regs[a] = sh2.ctx_read(op.imm),
                Kind::CtxWrite => sh2.ctx_write(op.imm, self.regs[a]),
                Kind::B | Kind::Jump => ip = op.imm as usize,
                Kind::JumpReg => ip = self.regs[a] as usize,
                Kind::Call => self.host_call(HostFn::ALL[op.imm as usize], sh2, bus),
                Kind::TPop => {
                    self.c = self.regs[a] & T != 0;
                    self.regs[a] &= !T;
                }
                Kind::TPush => self.regs[a] |= u32::from(self.c),
                Kind::Div1Step => {
                    // Q currently holds Q^M, T holds the shift carry Q1.
                    // T becomes Q1^Q2 for the fixup sequence that follows.
                    let sr = op.c as usize;
                    let rn = self.regs[a];
                    let rm = self.regs[b];
                    let (res, q2) = if self.regs[sr] & Q != 0 {
                        rn.overflowing_add(rm)
                    } else {
                        rn.overflowing_sub(rm)
                    };
                    self.regs[a] = res;
                    if q2 {
                        self.regs[sr] ^= T;
                    }
                }
                Kind::DtbfLoop => {
                    // Retire DT/BF pairs until Rn hits zero or the budget
                    // for another pair is gone; the block's own exit
                    // charge covers the final pair.
                    let mut rn = self.regs[a];
                    let mut sr = self.regs[b];
                    loop {
                        rn = rn.wrapping_sub(1);
                        if rn == 0 {
                            sr |= T;
                            break;
                        }
                        if ((sr as i32) >> 12) - 4 <= 0 {
                            sr &= !T;
                            break;
                        }
                        sr = sr.wrapping_sub(4 << 12);
                    }
                    self.regs[a] = rn;
                    self.regs[b] = sr;
                }
                Kind::WriteSr => {
                    self.regs[a] = (self.regs[a] & 0xffff_f000) | (self.regs[b] & SR_GUEST_MASK);
                }
                Kind::Exit => break,
            }
        }
    }

    fn host_call<B: Sh2Bus>(&mut self, f: HostFn, sh2: &mut Sh2, bus: &mut B) {
        match f {
            HostFn::Read8 => self.regs[0] = bus.read8(self.regs[0]),
            HostFn::Read16 => self.regs[0] = bus.read16(self.regs[0]),
            HostFn::Read32 => self.regs[0] = bus.read32(self.regs[0]),
            HostFn::Write8 => {
                let addr = self.regs[0];
                bus.write8(addr, self.regs[1] as u8);
                self.note_write(addr);
            }
            HostFn::Write16 => {
                let addr = self.regs[0];
                bus.write16(addr, self.regs[1] as u16);
                self.note_write(addr);
            }
            HostFn::Write32 => {
                let addr = self.regs[0];
                bus.write32(addr, self.regs[1]);
                self.note_write(addr);
            }
            HostFn::DoOp => crate::interp::step_op(sh2, bus, self.regs[1] as u16),
            HostFn::TestIrq => sh2.test_irq(bus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{Emitter, PortableEmitter};
    use crate::test_utils::TestBus;

    fn run(build: impl FnOnce(&mut PortableEmitter<'_>)) -> Vm {
        let mut buf = vec![0u8; 4096];
        let mut em = PortableEmitter::new(&mut buf, 0, 4096);
        build(&mut em);
        em.epilogue();
        let mut vm = Vm::new();
        let mut sh2 = Sh2::new(false);
        let mut bus = TestBus::new();
        vm.enter(&buf, 0, 0, &mut sh2, &mut bus);
        vm
    }

    #[test]
    fn predicated_ops_respect_condition() {
        let vm = run(|em| {
            em.move_r_imm(2, 5);
            em.cmp_r_imm(2, 5);
            em.move_r_imm_c(Cond::Eq, 3, 1);
            em.move_r_imm_c(Cond::Ne, 4, 1);
        });
        assert_eq!(vm.regs[3], 1);
        assert_eq!(vm.regs[4], 0);
    }

    #[test]
    fn carry_is_borrow_on_subtract() {
        let vm = run(|em| {
            em.move_r_imm(2, 1);
            em.subf_r_imm(2, 2);
            em.move_r_imm_c(Cond::Lo, 3, 1); // borrow taken
        });
        assert_eq!(vm.regs[2], 0xffff_ffff);
        assert_eq!(vm.regs[3], 1);
    }

    #[test]
    fn rotate_through_carry() {
        let vm = run(|em| {
            em.move_r_imm(2, 1);
            em.tpop_carry(2, false); // c = 1, bit cleared
            em.move_r_imm(3, 0x8000_0000);
            em.rolcf(3);
            em.tpush_carry(2, false); // old msb back into T
        });
        assert_eq!(vm.regs[3], 1);
        assert_eq!(vm.regs[2], 1);
    }

    #[test]
    fn sjmp_skips_guarded_ops() {
        let vm = run(|em| {
            em.move_r_imm(2, 0);
            em.tst_r_imm(2, 1);
            let p = em.sjmp_start(Cond::Ne);
            em.move_r_imm_c(Cond::Eq, 3, 7);
            em.sjmp_end(p);
        });
        assert_eq!(vm.regs[3], 7);
    }

    #[test]
    fn mula_accumulates_64_bits() {
        let vm = run(|em| {
            em.move_r_imm(2, 0xffff_ffff); // lo
            em.move_r_imm(3, 0);           // hi
            em.move_r_imm(4, 2);
            em.move_r_imm(5, 3);
            em.mula_s64(2, 3, 4, 5);
        });
        assert_eq!(vm.regs[2], 5);
        assert_eq!(vm.regs[3], 1);
    }

    #[test]
    fn dtbf_loop_runs_down_budget_or_counter() {
        // Plenty of budget: spins until rn == 0, T set.
        let vm = run(|em| {
            em.move_r_imm(2, 3);
            em.move_r_imm(3, 1000 << 12);
            em.dtbf_loop(2, 3);
        });
        assert_eq!(vm.regs[2], 0);
        assert_eq!(vm.regs[3] & T, T);
        assert_eq!((vm.regs[3] as i32) >> 12, 1000 - 2 * 4); // last pair charged by block exit

        // Tight budget: stops early with T clear.
        let vm = run(|em| {
            em.move_r_imm(2, 1000);
            em.move_r_imm(3, 10 << 12);
            em.dtbf_loop(2, 3);
        });
        assert_eq!(vm.regs[3] & T, 0);
        assert_eq!(vm.regs[2], 1000 - 3);
        assert_eq!((vm.regs[3] as i32) >> 12, 2);
    }
}
