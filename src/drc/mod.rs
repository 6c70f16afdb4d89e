/*!
drc - The recompiler proper: block management, translation, dispatch
and self-modifying-code invalidation, all owned by one `Drc` value.

Overview
========
The embedder drives everything through `execute(sh2, bus, cycles)`. The
cycle budget is parked in the reserved upper bits of SR; the dispatcher
then loops: classify the guest PC into one of the three code regions,
look the block up (write-watch bitmaps for DRAM and internal memory,
hash table for ROM), translate on miss, and run the host code through
the entry trampoline. Translated blocks decrement the SR cycle field as
their last act, so the loop ends once the budget goes non-positive.

Lifecycle: `Drc::new` allocates the code buffer, block arenas, hash
table and write-watch maps once, and emits the entry/exit trampolines;
dropping the value releases everything. `flush_all` empties all three
regions (descriptors, hash buckets and bitmaps included), which is the
only way host code space is ever reclaimed.
*/

mod cache;
mod rcache;
mod smc;
mod translate;

#[cfg(test)]
mod tests;

use log::{debug, error, trace};
use thiserror::Error;

use crate::bus::{self, Sh2Bus};
use crate::emit::ops::HOST_OP_BYTES;
use crate::emit::{CONTEXT_REG, Emitter, HostReg, PortableEmitter, Vm, arg_reg, portable};
use crate::interp;
use crate::sh2::{SR_CYCLE_SHIFT, SR_GUEST_MASK, Sh2};
use cache::CodeCache;
use rcache::{RegCache, STATIC_MAP};
use translate::Translator;

/// Upper bound on guest cycles translated into one block.
pub const BLOCK_CYCLE_LIMIT: u32 = 100;

/// Space reserved in a region before translating a block: the worst
/// observed expansion is DIV1 at ~17 host ops per guest cycle.
pub const MAX_BLOCK_SIZE: u32 = BLOCK_CYCLE_LIMIT * 20 * HOST_OP_BYTES as u32;

/// Buckets in the ROM hash table (power of two).
pub const MAX_HASH_ENTRIES: usize = 1024;

/// Block descriptor caps per region.
pub(crate) const BLOCK_MAX_COUNTS: [usize; 3] = [4 * 1024, 256, 256];

/// Total size of the translation cache buffer, split 6/8 for ROM and
/// DRAM blocks and 1/8 for each CPU's internal-memory blocks.
pub const TCACHE_SIZE: usize = 512 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    /// PC outside every executable region; the dispatcher falls back to
    /// single-stepping the interpreter rather than taking the machine
    /// down.
    #[error("refusing to translate at invalid PC {0:#010x}")]
    InvalidPc(u32),
}

/// The dynamic recompiler. One instance serves both 32X CPUs; the
/// master and slave share the ROM/DRAM translations in region 0.
pub struct Drc {
    cache: CodeCache,
    smc: smc::SmcMaps,
    rcache: RegCache,
    vm: Vm,
    entry_ptr: u32,
    exit_ptr: u32,
}

impl Default for Drc {
    fn default() -> Self {
        Self::new()
    }
}

impl Drc {
    /// One-shot allocation of every shared structure plus the entry and
    /// exit trampolines. Dropping the value frees it all.
    pub fn new() -> Self {
        let mut cache = CodeCache::new(TCACHE_SIZE);
        let (entry_ptr, exit_ptr, utils_end) = {
            let mut em = PortableEmitter::new(&mut cache.buf, 0, TCACHE_SIZE as u32);
            let (entry, exit) = generate_utils(&mut em);
            (entry, exit, em.offset())
        };
        cache.layout_regions(utils_end);
        Self {
            cache,
            smc: smc::SmcMaps::new(),
            rcache: RegCache::new(),
            vm: Vm::new(),
            entry_ptr,
            exit_ptr,
        }
    }

    /// Advance the CPU by `cycles` guest cycles, translating as needed.
    /// `sh2.cycles_done` is updated with the count actually executed
    /// (the budget may be overshot by the tail of the last block).
    pub fn execute<B: Sh2Bus>(&mut self, sh2: &mut Sh2, bus: &mut B, cycles: i32) {
        sh2.cycles_aim = sh2.cycles_aim.wrapping_add(cycles);
        let target = sh2.cycles_aim.wrapping_sub(sh2.cycles_done);

        // The budget lives in the reserved upper SR bits while we run.
        sh2.set_sr((sh2.sr() & SR_GUEST_MASK) | ((target as u32) << SR_CYCLE_SHIFT));
        self.dispatch(sh2, bus);

        sh2.cycles_done = sh2
            .cycles_done
            .wrapping_add(target.wrapping_sub(sh2.sr_cycles()));
    }

    /// Invalidate every region: all blocks miss on next lookup and the
    /// write pointers rewind to the region bases.
    pub fn flush_all(&mut self) {
        self.block_stats();
        for region in 0..3 {
            self.flush_region(region);
        }
    }

    /// A write landed in DRAM; kill any block whose range covers it.
    pub fn wcheck_ram(&mut self, addr: u32, _val: u32, cpu_id: u32) {
        let idx = smc::ram_idx(addr);
        if self.smc.ram[idx] == 0 {
            return;
        }
        debug!("{}sh2 smc check @{addr:08x}", cpu_ch(cpu_id != 0));
        smc::rm_block(&mut self.smc.ram, idx, &mut self.cache.blocks[0], addr);
    }

    /// A write landed in `cpu_id`'s data array.
    pub fn wcheck_da(&mut self, addr: u32, _val: u32, cpu_id: u32) {
        let cpu = (cpu_id & 1) as usize;
        let idx = smc::da_idx(addr);
        if self.smc.da[cpu][idx] == 0 {
            return;
        }
        debug!("{}sh2 smc check @{addr:08x}", cpu_ch(cpu != 0));
        smc::rm_block(
            &mut self.smc.da[cpu],
            idx,
            &mut self.cache.blocks[1 + cpu],
            addr,
        );
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    fn dispatch<B: Sh2Bus>(&mut self, sh2: &mut Sh2, bus: &mut B) {
        sh2.test_irq(bus);

        while sh2.sr_cycles() > 0 {
            let pc = sh2.pc();
            let slave = sh2.is_slave as usize;
            let mut chain_head = 0u16;
            let mut entry = None;

            if bus::is_data_array(pc) || bus::is_bios(pc) {
                // Internal memory and boot ROM share the per-CPU bitmap.
                let slot = self.smc.da[slave][smc::da_idx(pc)];
                if slot & 1 != 0 {
                    entry = Some(self.found_block(1 + slave, slot >> 1));
                }
            } else if bus::is_dram(pc) {
                let slot = self.smc.ram[smc::ram_idx(pc)];
                if slot & 1 != 0 {
                    entry = Some(self.found_block(0, slot >> 1));
                }
            } else if bus::is_rom(pc) {
                chain_head = self.cache.hash_head(pc);
                if let Some(id) = self.cache.find_in_chain(chain_head, pc) {
                    entry = Some(self.found_block(0, id));
                }
            }

            let entry = match entry {
                Some(e) => e,
                None => match self.translate_block(sh2, bus, chain_head) {
                    Ok(e) => e,
                    Err(e) => {
                        error!("{e}; single-stepping the interpreter instead");
                        let c = interp::step(sh2, bus);
                        sh2.set_sr(sh2.sr().wrapping_sub(c << SR_CYCLE_SHIFT));
                        continue;
                    }
                },
            };

            trace!(
                "= {}sh2 enter {pc:08x} -> {entry:#x}, c={}",
                cpu_ch(sh2.is_slave),
                sh2.sr_cycles()
            );
            self.vm
                .enter(&self.cache.buf, self.entry_ptr, entry, sh2, bus);

            // Route self-writes from the block we just ran through the
            // same invalidation paths the embedder uses.
            for addr in self.vm.take_smc_writes() {
                if bus::is_dram(addr) {
                    self.wcheck_ram(addr, 0, sh2.is_slave as u32);
                } else {
                    self.wcheck_da(addr, 0, sh2.is_slave as u32);
                }
            }
        }
    }

    fn found_block(&mut self, region: usize, id: u16) -> u32 {
        let bd = &mut self.cache.blocks[region][id as usize];
        #[cfg(feature = "block-stats")]
        {
            bd.refcount += 1;
        }
        bd.tcache_ptr
    }

    // ---------------------------------------------------------------------
    // Translation driver
    // ---------------------------------------------------------------------

    fn translate_block<B: Sh2Bus>(
        &mut self,
        sh2: &mut Sh2,
        bus: &mut B,
        chain_head: u16,
    ) -> Result<u32, TranslateError> {
        let pc = sh2.pc();
        let seg = pc >> 29;
        if (seg != 0 && seg != 1 && seg != 6) || pc == 0 {
            return Err(TranslateError::InvalidPc(pc));
        }
        let region = if bus::is_data_array(pc) || bus::is_bios(pc) {
            1 + sh2.is_slave as usize
        } else {
            0
        };

        // Reserve worst-case space and a descriptor, flushing the region
        // when either runs out.
        let mut chain_head = chain_head;
        let mut id = self.cache.add_block(region, pc);
        if self.cache.region_free(region) < MAX_BLOCK_SIZE || id.is_none() {
            self.flush_region(region);
            chain_head = 0;
            id = self.cache.add_block(region, pc);
        }
        let id = id.expect("a freshly flushed region always has room");

        if bus::is_rom(pc) {
            self.cache.blocks[0][id as usize].next = chain_head;
            self.cache.set_hash_head(pc, id + 1);
        }

        debug!(
            "== {}sh2 block #{region},{id} {pc:08x}",
            cpu_ch(sh2.is_slave)
        );

        let entry = self.cache.ptrs[region];
        let limit = self.cache.limits[region];
        let (out, end) = {
            let mut em = PortableEmitter::new(&mut self.cache.buf, entry, limit);
            let tr = Translator::new(
                &mut em,
                &mut self.rcache,
                bus,
                sh2.is_slave,
                pc,
                self.exit_ptr,
            );
            let out = tr.run();
            let end = em.offset();
            em.cache_sync(entry, end);
            (out, end)
        };
        self.cache.ptrs[region] = end;
        self.cache.blocks[region][id as usize].end_addr = out.end_pc;

        // Record the block in the write watch covering its guest range.
        if region != 0 {
            let map = &mut self.smc.da[region - 1];
            smc::mark_block(map, smc::da_idx(pc), smc::da_idx(out.end_pc), id);
        } else if bus::is_dram(pc) {
            smc::mark_block(
                &mut self.smc.ram,
                smc::ram_idx(pc),
                smc::ram_idx(out.end_pc),
                id,
            );
        }

        trace!(
            " block #{region},{id} {:#x}..{:#x}, {} cycles\n{}",
            entry,
            end,
            out.cycles,
            portable::disasm(&self.cache.buf, entry, end)
        );
        Ok(entry)
    }

    fn flush_region(&mut self, region: usize) {
        debug!(
            "tcache #{region} flush! ({}/{}, bds {}/{})",
            self.cache.region_used(region),
            self.cache.region_used(region) + self.cache.region_free(region),
            self.cache.blocks[region].len(),
            BLOCK_MAX_COUNTS[region]
        );
        self.cache.reset_region(region);
        if region == 0 {
            self.smc.clear_ram();
        } else {
            self.smc.clear_da(region - 1);
        }
    }

    #[cfg(feature = "block-stats")]
    fn block_stats(&mut self) {
        let mut tops: Vec<(u32, u32)> = self
            .cache
            .blocks
            .iter()
            .flatten()
            .filter(|bd| bd.addr != 0 && bd.refcount != 0)
            .map(|bd| (bd.refcount, bd.addr))
            .collect();
        tops.sort_unstable_by(|a, b| b.cmp(a));
        for (refcount, addr) in tops.iter().take(10) {
            debug!("block {addr:08x} entered {refcount} times");
        }
        for region in self.cache.blocks.iter_mut() {
            for bd in region.iter_mut() {
                bd.refcount = 0;
            }
        }
    }

    #[cfg(not(feature = "block-stats"))]
    fn block_stats(&mut self) {}
}

fn cpu_ch(is_slave: bool) -> char {
    if is_slave { 's' } else { 'm' }
}

/// Emit the one-time entry/exit trampolines at the start of the code
/// buffer. Entry takes the block pointer in argument 0 and the context
/// handle in argument 1.
fn generate_utils<E: Emitter>(em: &mut E) -> (u32, u32) {
    let blk = arg_reg(0);
    let ctx = arg_reg(1);
    let tmp = arg_reg(2);

    let entry = em.offset();
    em.prologue();
    em.move_r_r(CONTEXT_REG, ctx);
    do_static_regs(em, false, tmp);
    em.jump_reg(blk);

    let exit = em.offset();
    do_static_regs(em, true, tmp);
    em.epilogue();

    (entry, exit)
}

/// Copy the statically mapped guest registers between the context and
/// their host registers, batching runs that are consecutive on both
/// sides into multi-register ops.
fn do_static_regs<E: Emitter>(em: &mut E, is_write: bool, tmp: HostReg) {
    let mut i = 0;
    while i < STATIC_MAP.len() {
        let Some(hr) = STATIC_MAP[i] else {
            i += 1;
            continue;
        };
        let mut count = 1u32;
        while i + (count as usize) < STATIC_MAP.len()
            && STATIC_MAP[i + count as usize] == Some(hr + count as HostReg)
        {
            count += 1;
        }
        let offs = i as u32 * 4;
        if count > 1 {
            if is_write {
                em.ctx_write_multiple(hr, offs, count, tmp);
            } else {
                em.ctx_read_multiple(hr, offs, count, tmp);
            }
        } else if is_write {
            em.ctx_write(hr, offs);
        } else {
            em.ctx_read(hr, offs);
        }
        i += count as usize;
    }
}
