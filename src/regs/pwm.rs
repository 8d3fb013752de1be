//! PWM register block, used by [`crate::pacer`] when `Config`'s pacing
//! peripheral is [`crate::config::PacingPeripheral::Pwm`].
//!
//! Only channel 1 is used for pacing, in serializer ("USEF1") mode so the
//! FIFO, not `DAT1`, produces the DREQ this engine chains DMA transfers
//! off of.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

register_bitfields! {
    u32,
    pub CTL [
        MSEN2 OFFSET(15) NUMBITS(1) [],
        USEF2 OFFSET(13) NUMBITS(1) [],
        POLA2 OFFSET(12) NUMBITS(1) [],
        PWEN2 OFFSET(8) NUMBITS(1) [],
        MSEN1 OFFSET(7) NUMBITS(1) [],
        /// Clear FIFO. Self-clearing; write-only.
        CLRF1 OFFSET(6) NUMBITS(1) [
            Clear = 0b1,
        ],
        /// Use the FIFO (rather than `DAT1`) as the data source.
        USEF1 OFFSET(5) NUMBITS(1) [],
        POLA1 OFFSET(4) NUMBITS(1) [],
        /// Run channel 1 as a plain serializer rather than PWM-encoding
        /// `DAT1`; this is what lets a fixed data word produce a steady
        /// DREQ cadence.
        MODE1 OFFSET(1) NUMBITS(1) [],
        PWEN1 OFFSET(0) NUMBITS(1) [],
    ],
    pub DMAC [
        ENAB OFFSET(31) NUMBITS(1) [],
        PANIC OFFSET(8) NUMBITS(8) [],
        DREQ OFFSET(0) NUMBITS(8) [],
    ],
}

register_structs! {
    pub Registers {
        (0x00 => pub ctl: ReadWrite<u32, CTL::Register>),
        (0x04 => pub sta: ReadWrite<u32>),
        (0x08 => pub dmac: ReadWrite<u32, DMAC::Register>),
        (0x0C => _reserved0),
        (0x10 => pub rng1: ReadWrite<u32>),
        (0x14 => pub dat1: ReadWrite<u32>),
        (0x18 => pub fifo: WriteOnly<u32>),
        (0x1C => _reserved1),
        (0x20 => pub rng2: ReadWrite<u32>),
        (0x24 => pub dat2: ReadWrite<u32>),
        (0x28 => @END),
    }
}

/// In-register-word byte offset of the FIFO, for bus-address computation.
pub const FIFO_OFFSET: u32 = 0x18;

impl Registers {
    /// Programs channel 1 as a DREQ-generating serializer: clears and
    /// reselects the FIFO, sets the transfer threshold used as the DREQ
    /// panic/request levels, and enables both the channel and its DMA
    /// request line. `range` is the number of bits per FIFO word the
    /// serializer shifts out before requesting the next one — this engine
    /// always uses 32 (one tick per FIFO word).
    pub fn start_pacing(&self, range: u32) {
        self.ctl.write(CTL::CLRF1::Clear);
        self.rng1.set(range);
        self.dmac.write(DMAC::ENAB::SET + DMAC::PANIC.val(7) + DMAC::DREQ.val(7));
        self.ctl.write(CTL::USEF1::SET + CTL::MODE1::SET + CTL::PWEN1::SET);
    }

    /// Disables channel 1 and its DMA request line.
    pub fn stop(&self) {
        self.ctl.set(0);
        self.dmac.set(0);
    }
}
