//! Free-running system timer, used as the tick-slot source recorded once
//! per DMA cycle by [`crate::inring`].
//!
//! The timer is a 64-bit counter split across `CLO`/`CHI`; this engine
//! only ever reads `CLO` for all tick/elapsed-time bookkeeping (the
//! counter does not wrap for ~71 minutes, far longer than any single
//! sample cycle).

use tock_registers::interfaces::Readable;
use tock_registers::registers::ReadOnly;
use tock_registers::register_structs;

register_structs! {
    pub Registers {
        (0x00 => _cs: ReadOnly<u32>),
        (0x04 => clo: ReadOnly<u32>),
        (0x08 => chi: ReadOnly<u32>),
        (0x0C => _compare),
        (0x1C => @END),
    }
}

/// In-register-word byte offset of `CLO`, for bus-address computation (DMA
/// uses this to copy the counter straight into a cycle's tick-slot without
/// CPU involvement).
pub const CLO_OFFSET: u32 = 0x04;

impl Registers {
    /// Reads the low 32 bits of the free-running microsecond counter.
    pub fn low(&self) -> u32 {
        self.clo.get()
    }
}
