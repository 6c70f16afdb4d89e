#![doc = r#"
SH-2 dynamic recompiler core for the Sega 32X's twin-CPU subsystem.

The crate translates runs of guest SH-2 instructions into a compact host
instruction encoding, caches the translations keyed by guest PC, and
re-enters them until the caller's cycle budget runs out. The embedding
emulator supplies guest memory through the `Sh2Bus` trait and owns the two
`Sh2` contexts; a single `Drc` holds every shared structure (code caches,
block tables, hash table, write-watch bitmaps).

Modules:
- sh2: guest architectural state, SR packing, interrupt acceptance
- bus: memory callback trait implemented by the embedder
- emit: target-neutral emitter trait plus the portable backend and its VM
- drc: block manager, register cache, translator, dispatcher, SMC watch
- interp: reference interpreter (fallback target and testing oracle)

In tests, shared program builders and a flat test bus are available under
`crate::test_utils`.
"#]

// Core modules
pub mod bus;
pub mod drc;
pub mod emit;
pub mod interp;
pub mod sh2;

// Re-export the types an embedder touches on every call.
pub use bus::Sh2Bus;
pub use drc::Drc;
pub use sh2::Sh2;

// Shared test utilities (only compiled for tests)
#[cfg(test)]
pub mod test_utils;
