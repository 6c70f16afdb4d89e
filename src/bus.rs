/*!
bus.rs - Memory callback seam between the recompiler core and the
embedding emulator.

The core never models guest memory itself. Translated code, the
translator's opcode fetches, and the interpreter all go through this
trait, which the embedder implements over its ROM/DRAM/on-chip mappings.

Conventions:
- SH-2 is big-endian; implementations are responsible for byte order.
- Reads return the value zero-extended to 32 bits; sign extension for
  MOV.B/MOV.W loads is emitted by the translator.
- Accessor failures (open bus, side effects) are the implementation's
  business; the core neither checks nor retries.
- The embedder must notify the `Drc` via `wcheck_ram`/`wcheck_da` when a
  write from outside translated code lands in memory backing translated
  blocks. Writes performed by translated code itself are tracked by the
  core.
*/

/// SDRAM (the 32X's 256 KiB work RAM), cached or uncached mirror.
#[inline]
pub fn is_dram(addr: u32) -> bool {
    (addr & 0xc7fc_0000) == 0x0600_0000
}

/// Cartridge ROM window, cached or uncached mirror.
#[inline]
pub fn is_rom(addr: u32) -> bool {
    (addr & 0xc600_0000) == 0x0200_0000
}

/// On-chip data array (per-CPU 4 KiB scratch RAM).
#[inline]
pub fn is_data_array(addr: u32) -> bool {
    addr >> 29 == 6
}

/// Boot ROM window at the bottom of the address space.
#[inline]
pub fn is_bios(addr: u32) -> bool {
    addr & !0xfff == 0
}

/// Typed guest memory access callbacks.
pub trait Sh2Bus {
    fn read8(&mut self, addr: u32) -> u32;
    fn read16(&mut self, addr: u32) -> u32;
    fn read32(&mut self, addr: u32) -> u32;
    fn write8(&mut self, addr: u32, val: u8);
    fn write16(&mut self, addr: u32, val: u16);
    fn write32(&mut self, addr: u32, val: u32);
}
