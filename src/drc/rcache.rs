/*!
rcache.rs - Host register cache: a lazy-writeback allocator from guest
registers (and translation temporaries) onto the portable host's scratch
register pool.

Overview
========
Hot guest registers (R0..R4, the stack pointer and SR) are statically
mapped and never enter the dynamic pool; everything else is cached on
demand in one of six slots, each pinned to a fixed host register. Every
access stamps the slot with a monotonic counter; when no slot is free the
oldest stamp is evicted, writing the value back to the context first if
it is dirty.

The argument registers of the host calling convention overlap the pool,
so claiming them for a call goes through the same slots: a stale cache
occupying an argument register is written back (or rejected, if it is a
live temporary) before the register is handed out.

Invariants:
  - at most one slot caches a given guest register, and only that slot
    may be dirty;
  - the pool never runs dry: it has six slots and the worst emission
    holds four at once, so a failed eviction is a translator bug and
    aborts.
*/

use crate::emit::{Emitter, HostReg, arg_reg};
use crate::sh2::GuestReg;

/// Fixed guest-to-host mapping for the hot registers. Indexed by context
/// slot; `None` falls through to the dynamic cache.
pub(crate) const STATIC_MAP: [Option<HostReg>; crate::sh2::CTX_REGS] = [
    Some(4),  // R0
    Some(5),  // R1
    Some(6),  // R2
    Some(7),  // R3
    Some(8),  // R4
    None,     // R5
    None,     // R6
    None,     // R7
    None,     // R8
    None,     // R9
    None,     // R10
    None,     // R11
    None,     // R12
    None,     // R13
    None,     // R14
    Some(9),  // R15 / SP
    None,     // PC
    None,     // PPC
    None,     // PR
    Some(10), // SR
    None,     // GBR
    None,     // VBR
    None,     // MACH
    None,     // MACL
];

/// Host registers backing the dynamic slots. The first three double as
/// the call argument registers.
const POOL: [HostReg; 6] = [0, 1, 12, 14, 2, 3];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Free,
    /// Caching a guest register, in sync with the context.
    Cached,
    /// Caching a guest register, newer than the context.
    CachedDirty,
    /// Holding a constant; reallocatable without writeback.
    Const,
    /// Claimed as a scratch or argument register.
    Temp,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    hr: HostReg,
    kind: SlotKind,
    stamp: u16,
    val: u32,
}

/// Access intent for `get_reg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegMode {
    Read,
    Write,
    Rmw,
}

pub(crate) struct RegCache {
    slots: [Slot; POOL.len()],
    counter: u16,
}

impl RegCache {
    pub fn new() -> Self {
        let slots = POOL.map(|hr| Slot { hr, kind: SlotKind::Free, stamp: 0, val: 0 });
        Self { slots, counter: 0 }
    }

    /// Evict the slot with the oldest stamp (ties go to the highest
    /// index), writing it back if dirty. Must not be called while
    /// emitting predicated code.
    fn evict<E: Emitter>(&mut self, em: &mut E) -> usize {
        let mut oldest = None;
        let mut min_stamp = u16::MAX;
        for (i, slot) in self.slots.iter().enumerate() {
            if matches!(slot.kind, SlotKind::Cached | SlotKind::CachedDirty)
                && slot.stamp <= min_stamp
            {
                min_stamp = slot.stamp;
                oldest = Some(i);
            }
        }
        let i = oldest.expect("register cache exhausted: every slot holds a temporary");
        if self.slots[i].kind == SlotKind::CachedDirty {
            em.ctx_write(self.slots[i].hr, self.slots[i].val * 4);
        }
        i
    }

    /// Map a guest register to a host register holding (or designated to
    /// receive) its value.
    pub fn get_reg<E: Emitter>(&mut self, em: &mut E, r: GuestReg, mode: RegMode) -> HostReg {
        if let Some(hr) = STATIC_MAP[r as usize] {
            return hr;
        }

        self.counter += 1;

        // Already cached?
        for i in (0..self.slots.len()).rev() {
            let slot = &mut self.slots[i];
            if matches!(slot.kind, SlotKind::Cached | SlotKind::CachedDirty)
                && slot.val == r as u32
            {
                slot.stamp = self.counter;
                if mode != RegMode::Read {
                    slot.kind = SlotKind::CachedDirty;
                }
                return slot.hr;
            }
        }

        // Any free slot, else evict the oldest.
        let i = (0..self.slots.len())
            .rev()
            .find(|&i| matches!(self.slots[i].kind, SlotKind::Free | SlotKind::Const))
            .unwrap_or_else(|| self.evict(em));

        let hr = self.slots[i].hr;
        if mode != RegMode::Write {
            em.ctx_read(hr, r.offs());
        }
        self.slots[i] = Slot {
            hr,
            kind: if mode != RegMode::Read { SlotKind::CachedDirty } else { SlotKind::Cached },
            stamp: self.counter,
            val: r as u32,
        };
        hr
    }

    /// Claim a scratch register with no guest association. Release with
    /// `free_tmp`.
    pub fn get_tmp<E: Emitter>(&mut self, em: &mut E) -> HostReg {
        let i = (0..self.slots.len())
            .find(|&i| matches!(self.slots[i].kind, SlotKind::Free | SlotKind::Const))
            .unwrap_or_else(|| self.evict(em));
        self.slots[i].kind = SlotKind::Temp;
        self.slots[i].hr
    }

    /// Find the slot backing calling-convention argument `arg`, spilling
    /// any stale cache occupying it.
    fn arg_slot<E: Emitter>(&mut self, em: &mut E, arg: usize) -> usize {
        let hr = arg_reg(arg);
        let i = self
            .slots
            .iter()
            .position(|s| s.hr == hr)
            .expect("argument registers live in the cache pool");
        match self.slots[i].kind {
            SlotKind::CachedDirty => em.ctx_write(hr, self.slots[i].val * 4),
            SlotKind::Temp => {
                panic!("argument register h{hr} already claimed as a temporary")
            }
            _ => {}
        }
        i
    }

    /// Claim argument register `arg` as a plain temporary.
    pub fn get_tmp_arg<E: Emitter>(&mut self, em: &mut E, arg: usize) -> HostReg {
        let i = self.arg_slot(em, arg);
        self.slots[i].kind = SlotKind::Temp;
        self.slots[i].hr
    }

    /// Claim argument register `arg` and load guest register `r` into it,
    /// reusing a cached or static copy when one exists. Read intent only.
    pub fn get_reg_arg<E: Emitter>(&mut self, em: &mut E, arg: usize, r: GuestReg) -> HostReg {
        let i = self.arg_slot(em, arg);
        let dst = self.slots[i].hr;

        let src = STATIC_MAP[r as usize].or_else(|| {
            (0..self.slots.len()).rev().find_map(|j| {
                let s = &self.slots[j];
                (matches!(s.kind, SlotKind::Cached | SlotKind::CachedDirty)
                    && s.val == r as u32)
                    .then_some(s.hr)
            })
        });

        match src {
            Some(s) if s != dst => em.move_r_r(dst, s),
            Some(_) => {}
            None => em.ctx_read(dst, r.offs()),
        }

        self.counter += 1;
        self.slots[i] = Slot { hr: dst, kind: SlotKind::Cached, stamp: self.counter, val: r as u32 };
        dst
    }

    pub fn free_tmp(&mut self, hr: HostReg) {
        match self.slots.iter().position(|s| s.hr == hr) {
            Some(i) if self.slots[i].kind == SlotKind::Temp => {
                self.slots[i].kind = SlotKind::Free;
            }
            _ => log::warn!("free_tmp: h{hr} is not a live temporary"),
        }
    }

    /// Write every dirty slot back to the context; keep the caches warm.
    /// Required before any host call.
    pub fn clean<E: Emitter>(&mut self, em: &mut E) {
        for slot in &mut self.slots {
            if slot.kind == SlotKind::CachedDirty {
                em.ctx_write(slot.hr, slot.val * 4);
                slot.kind = SlotKind::Cached;
            }
        }
    }

    /// Drop every association without writing back. Required after a host
    /// call, which may have modified the context behind the cache.
    pub fn invalidate(&mut self) {
        for slot in &mut self.slots {
            slot.kind = SlotKind::Free;
        }
        self.counter = 0;
    }

    pub fn flush<E: Emitter>(&mut self, em: &mut E) {
        self.clean(em);
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::PortableEmitter;
    use crate::emit::ops::{HOST_OP_BYTES, HostOp, Kind};

    fn ops(buf: &[u8], end: u32) -> Vec<HostOp> {
        (0..end as usize)
            .step_by(HOST_OP_BYTES)
            .map(|at| HostOp::decode(&buf[at..]))
            .collect()
    }

    #[test]
    fn static_registers_bypass_the_cache() {
        let mut buf = vec![0u8; 1024];
        let mut em = PortableEmitter::new(&mut buf, 0, 1024);
        let mut rc = RegCache::new();
        assert_eq!(rc.get_reg(&mut em, GuestReg::R0, RegMode::Rmw), 4);
        assert_eq!(rc.get_reg(&mut em, GuestReg::Sr, RegMode::Read), 10);
        assert_eq!(em.offset(), 0); // no loads emitted
    }

    #[test]
    fn write_then_read_hits_the_same_slot() {
        let mut buf = vec![0u8; 1024];
        let mut em = PortableEmitter::new(&mut buf, 0, 1024);
        let mut rc = RegCache::new();
        let w = rc.get_reg(&mut em, GuestReg::R7, RegMode::Write);
        assert_eq!(em.offset(), 0); // pure write: no context read
        let r = rc.get_reg(&mut em, GuestReg::R7, RegMode::Read);
        assert_eq!(w, r);
        assert_eq!(em.offset(), 0); // still cached, still no load
    }

    #[test]
    fn read_emits_one_context_load() {
        let mut buf = vec![0u8; 1024];
        let mut em = PortableEmitter::new(&mut buf, 0, 1024);
        let mut rc = RegCache::new();
        let hr = rc.get_reg(&mut em, GuestReg::Gbr, RegMode::Read);
        let emitted = ops(&buf, HOST_OP_BYTES as u32);
        assert_eq!(emitted[0].kind, Kind::CtxRead);
        assert_eq!(emitted[0].a, hr);
        assert_eq!(emitted[0].imm, GuestReg::Gbr.offs());
    }

    #[test]
    fn eviction_writes_back_the_oldest_dirty_slot() {
        let mut buf = vec![0u8; 4096];
        let mut em = PortableEmitter::new(&mut buf, 0, 4096);
        let mut rc = RegCache::new();
        // Fill all six slots with dirty caches; R5 is the oldest.
        for r in [
            GuestReg::R5,
            GuestReg::R6,
            GuestReg::R7,
            GuestReg::R8,
            GuestReg::R9,
            GuestReg::R10,
        ] {
            rc.get_reg(&mut em, r, RegMode::Write);
        }
        let before = em.offset();
        rc.get_reg(&mut em, GuestReg::R11, RegMode::Write);
        let emitted = ops(em.bytes(), em.offset());
        let wb = &emitted[(before as usize) / HOST_OP_BYTES];
        assert_eq!(wb.kind, Kind::CtxWrite);
        assert_eq!(wb.imm, GuestReg::R5.offs());
    }

    #[test]
    fn flush_persists_every_dirty_slot() {
        let mut buf = vec![0u8; 4096];
        let mut em = PortableEmitter::new(&mut buf, 0, 4096);
        let mut rc = RegCache::new();
        rc.get_reg(&mut em, GuestReg::Pr, RegMode::Write);
        rc.get_reg(&mut em, GuestReg::Gbr, RegMode::Write);
        let before = em.offset();
        rc.flush(&mut em);
        let emitted = ops(em.bytes(), em.offset());
        let written: Vec<u32> = emitted[(before as usize) / HOST_OP_BYTES..]
            .iter()
            .filter(|o| o.kind == Kind::CtxWrite)
            .map(|o| o.imm)
            .collect();
        assert!(written.contains(&GuestReg::Pr.offs()));
        assert!(written.contains(&GuestReg::Gbr.offs()));
        // And a second flush is a no-op.
        let at = em.offset();
        rc.flush(&mut em);
        assert_eq!(em.offset(), at);
    }

    #[test]
    fn reg_arg_copies_from_a_cached_slot() {
        let mut buf = vec![0u8; 4096];
        let mut em = PortableEmitter::new(&mut buf, 0, 4096);
        let mut rc = RegCache::new();
        let cached = rc.get_reg(&mut em, GuestReg::Vbr, RegMode::Read);
        let before = em.offset();
        let a0 = rc.get_reg_arg(&mut em, 0, GuestReg::Vbr);
        assert_eq!(a0, arg_reg(0));
        let emitted = ops(em.bytes(), em.offset());
        let mv = &emitted[(before as usize) / HOST_OP_BYTES];
        assert_eq!(mv.kind, Kind::MovR);
        assert_eq!((mv.a, mv.b), (a0, cached));
    }
}
