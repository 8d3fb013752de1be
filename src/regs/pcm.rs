//! PCM register block, used by [`crate::pacer`] when `Config`'s pacing
//! peripheral is [`crate::config::PacingPeripheral::Pcm`] (the engine
//! default).
//!
//! Only the transmit path is configured; this engine never receives PCM
//! audio, it only abuses the TX FIFO's DREQ as a tick source.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

register_bitfields! {
    u32,
    pub CS [
        STBY OFFSET(25) NUMBITS(1) [],
        SYNC OFFSET(24) NUMBITS(1) [],
        TXERR OFFSET(15) NUMBITS(1) [],
        DMAEN OFFSET(9) NUMBITS(1) [],
        TXTHR OFFSET(5) NUMBITS(2) [],
        TXCLR OFFSET(3) NUMBITS(1) [],
        TXON OFFSET(2) NUMBITS(1) [],
        EN OFFSET(0) NUMBITS(1) [],
    ],
    pub MODE [
        CLK_DIS OFFSET(28) NUMBITS(1) [],
        FTXP OFFSET(24) NUMBITS(1) [],
        CLKM OFFSET(23) NUMBITS(1) [],
        CLKI OFFSET(22) NUMBITS(1) [],
        FSM OFFSET(21) NUMBITS(1) [],
        FSI OFFSET(20) NUMBITS(1) [],
        FLEN OFFSET(10) NUMBITS(10) [],
        FSLEN OFFSET(0) NUMBITS(10) [],
    ],
    pub TXC [
        CH1WEX OFFSET(31) NUMBITS(1) [],
        CH1EN OFFSET(30) NUMBITS(1) [],
        CH1POS OFFSET(20) NUMBITS(10) [],
        CH1WID OFFSET(16) NUMBITS(4) [],
    ],
    pub DREQ_CTL [
        TX_PANIC OFFSET(24) NUMBITS(7) [],
        TX_REQ_L OFFSET(8) NUMBITS(7) [],
    ],
}

register_structs! {
    pub Registers {
        (0x00 => pub cs: ReadWrite<u32, CS::Register>),
        (0x04 => pub fifo: WriteOnly<u32>),
        (0x08 => pub mode: ReadWrite<u32, MODE::Register>),
        (0x0C => pub rxc: ReadWrite<u32>),
        (0x10 => pub txc: ReadWrite<u32, TXC::Register>),
        (0x14 => pub dreq: ReadWrite<u32, DREQ_CTL::Register>),
        (0x18 => _reserved),
        (0x1C => @END),
    }
}

/// In-register-word byte offset of the FIFO, for bus-address computation.
pub const FIFO_OFFSET: u32 = 0x04;

impl Registers {
    /// Programs a single 32-bit channel as a free-running serializer and
    /// enables its DMA request line.
    pub fn start_pacing(&self) {
        self.cs.write(CS::EN::SET);
        self.mode.write(MODE::FLEN.val(31) + MODE::FSLEN.val(1));
        self.txc.write(TXC::CH1EN::SET + TXC::CH1POS.val(0) + TXC::CH1WID.val(0));
        self.cs.modify(CS::TXCLR::SET);
        self.dreq.write(DREQ_CTL::TX_PANIC.val(0x10) + DREQ_CTL::TX_REQ_L.val(0x30));
        self.cs.modify(CS::DMAEN::SET);
        self.cs.modify(CS::TXON::SET);
    }

    /// Disables transmit and the channel.
    pub fn stop(&self) {
        self.cs.set(0);
    }
}
