//! DMA channel register block: `CS`/`CONBLK_AD`/`DmaControlBlock` layout
//! for the GPIO sampling/waveform role this engine needs.
//!
//! Channels 0..=14 share one register page; channel N's register file
//! starts at [`crate::regs::offset::DMA_CHANNEL_STRIDE`] `* N` within it
//! (`0x40` 32-bit words, i.e. `0x100` bytes — matching the stride constant
//! here).

use bitfield_struct::bitfield;
use tock_registers::interfaces::{Readable, ReadWriteable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

register_bitfields! {
    u32,
    /// DMA Control and Status register.
    pub CS [
        /// DMA Channel Reset. Self-clearing; write-only.
        RESET OFFSET(31) NUMBITS(1) [
            Reset = 0b1,
        ],
        /// Abort the current control block and load the next one.
        ABORT OFFSET(30) NUMBITS(1) [
            AbortCurrent = 0b1,
        ],
        DISDEBUG OFFSET(29) NUMBITS(1) [],
        WAIT_FOR_OUTSTANDING_WRITES OFFSET(28) NUMBITS(1) [],
        PANIC_PRIORITY OFFSET(20) NUMBITS(4) [],
        PRIORITY OFFSET(16) NUMBITS(4) [],
        /// Latched error flag; the detail bits live in the debug register.
        ERROR OFFSET(8) NUMBITS(1) [],
        WAITING_FOR_OUTSTANDING_WRITES OFFSET(6) NUMBITS(1) [],
        DREQ_STOPS_DMA OFFSET(5) NUMBITS(1) [],
        PAUSED OFFSET(4) NUMBITS(1) [],
        DREQ OFFSET(3) NUMBITS(1) [],
        /// Write 1 to clear.
        INT OFFSET(2) NUMBITS(1) [],
        /// Write 1 to clear. Set when the current control block's transfer
        /// completes.
        END OFFSET(1) NUMBITS(1) [],
        /// Starts the DMA when set with a non-zero `CONBLK_AD`; cleared
        /// automatically once a zero `NEXTCONBK` is loaded.
        ACTIVE OFFSET(0) NUMBITS(1) [],
    ],
    pub CONBLK_AD [
        /// Bus address of the active (or next) control block. Must be
        /// 256-bit (32-byte) aligned.
        SCB_ADDR OFFSET(0) NUMBITS(32) [],
    ],
    /// Latched per-channel error detail, write-1-to-clear.
    pub DEBUG [
        LITE OFFSET(28) NUMBITS(1) [],
        VERSION OFFSET(25) NUMBITS(3) [],
        DMA_STATE OFFSET(16) NUMBITS(9) [],
        DMA_ID OFFSET(8) NUMBITS(8) [],
        OUTSTANDING_WRITES OFFSET(4) NUMBITS(4) [],
        READ_ERROR OFFSET(2) NUMBITS(1) [],
        FIFO_ERROR OFFSET(1) NUMBITS(1) [],
        READ_LAST_NOT_SET_ERROR OFFSET(0) NUMBITS(1) [],
    ],
}

register_structs! {
    pub ChannelRegisters {
        (0x00 => pub cs: ReadWrite<u32, CS::Register>),
        (0x04 => pub conblk_ad: ReadWrite<u32, CONBLK_AD::Register>),
        /// Transfer info / source / dest / length / stride / next-CB
        /// registers: these mirror the currently-loaded control block and
        /// are only ever written by the DMA engine itself reading a CB, or
        /// read for debugging. This driver programs transfers exclusively
        /// through control blocks in [`crate::cb`], never these shadow
        /// registers, so they are left untyped padding.
        (0x08 => _shadow_ti_through_next),
        (0x20 => pub debug: ReadWrite<u32, DEBUG::Register>),
        (0x24 => @END),
    }
}

impl ChannelRegisters {
    /// Resets the channel and clears any latched error bits.
    pub fn reset(&self) {
        self.cs.write(CS::RESET::SET);
        self.debug.set(u32::MAX);
    }

    /// Points the channel at `bus_addr` and sets `ACTIVE`, starting (or
    /// resuming) the DMA. `bus_addr` must already carry the bus-alias tag.
    pub fn start(&self, bus_addr: u32) {
        self.conblk_ad.set(bus_addr);
        self.cs.write(
            CS::ACTIVE::SET + CS::WAIT_FOR_OUTSTANDING_WRITES::SET,
        );
    }

    /// Returns the bus address of the control block currently loaded (or
    /// about to be loaded) into the channel.
    pub fn current_cb(&self) -> u32 {
        self.conblk_ad.get()
    }

    /// Returns true if the channel is executing a non-null control block.
    pub fn is_active(&self) -> bool {
        self.cs.is_set(CS::ACTIVE) && self.conblk_ad.get() != 0
    }

    /// Latched debug-register error condition, cleared after reading by
    /// writing the same bits back (write-1-to-clear).
    pub fn take_error(&self) -> Option<ChannelError> {
        let debug = self.debug.extract();
        let err = if debug.is_set(DEBUG::READ_ERROR) {
            Some(ChannelError::Read)
        } else if debug.is_set(DEBUG::FIFO_ERROR) {
            Some(ChannelError::Fifo)
        } else if debug.is_set(DEBUG::READ_LAST_NOT_SET_ERROR) {
            Some(ChannelError::ReadLastNotSet)
        } else {
            None
        };
        if err.is_some() {
            self.debug.modify(
                DEBUG::READ_ERROR::SET
                    + DEBUG::FIFO_ERROR::SET
                    + DEBUG::READ_LAST_NOT_SET_ERROR::SET,
            );
        }
        err
    }
}

/// Latched DMA debug-register error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    Read,
    Fifo,
    ReadLastNotSet,
}

/// The peripheral whose DREQ gates a control block's destination writes.
/// `Unpaced` control blocks run at full AXI bus speed (used for the
/// register pokes in both rings); `PacingPcm`/`PacingPwm` gate on the
/// pacing peripheral's FIFO-not-full signal, realizing one transfer per
/// tick.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peripheral {
    Unpaced = 0,
    PacingPcmTx = 2,
    PacingPwm = 5,
}

impl Peripheral {
    const fn into_bits(self) -> u32 {
        self as u32
    }

    const fn from_bits(value: u32) -> Self {
        match value {
            2 => Self::PacingPcmTx,
            5 => Self::PacingPwm,
            _ => Self::Unpaced,
        }
    }
}

/// In-memory layout of a control block's `TI` (transfer information) word.
/// `permap`/`dest_dreq` are the fields this engine actually drives
/// (pacing), the rest stay at their always-correct defaults for a 4-byte
/// register-to-register or FIFO transfer.
#[bitfield(u32)]
pub struct TransferInfo {
    pub inten: bool,
    pub tdmode: bool,
    #[bits(1)]
    _res0: u8,
    pub wait_resp: bool,
    pub dest_inc: bool,
    pub dest_width: bool,
    pub dest_dreq: bool,
    pub dest_ignore: bool,
    pub src_inc: bool,
    pub src_width: bool,
    pub src_dreq: bool,
    pub src_ignore: bool,
    #[bits(4)]
    pub burst_length: u8,
    #[bits(5)]
    pub permap: Peripheral,
    #[bits(5)]
    pub waits: u8,
    pub no_wide_bursts: bool,
    #[bits(5)]
    _res1: u8,
}

/// A DMA control block. 8 words (32 bytes), 256-bit aligned — the field
/// layout is dictated by the hardware, not by this crate's design.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy)]
pub struct ControlBlock {
    pub transfer_info: TransferInfo,
    pub src_addr: u32,
    pub dest_addr: u32,
    pub transfer_len: u32,
    pub stride: u32,
    pub next_block_addr: u32,
    _res0: u32,
    _res1: u32,
}

impl ControlBlock {
    /// An inert, all-zero control block (`NEXTCONBK = 0`, i.e. "DMA halts
    /// here if loaded"). [`crate::cb::CbArena`] overwrites every field
    /// before the block is ever reachable from the channel.
    pub const ZEROED: Self = Self {
        transfer_info: TransferInfo::new(),
        src_addr: 0,
        dest_addr: 0,
        transfer_len: 0,
        stride: 0,
        next_block_addr: 0,
        _res0: 0,
        _res1: 0,
    };
}
