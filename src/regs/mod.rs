//! MMIO register block definitions for the peripherals this engine drives.
//!
//! Each submodule follows the same pattern: a
//! `tock_registers::register_bitfields!` block describing the named fields
//! of each register, a `register_structs!` block describing the register
//! file's byte layout, and (where the peripheral needs one) a
//! `bitfield_struct::bitfield` for an in-memory word that isn't a register
//! but still has named sub-fields (DMA control block `TransferInfo`, for
//! instance).
//!
//! Offsets below are relative to the start of each peripheral's own page.

pub mod clock;
pub mod dma;
pub mod gpio;
pub mod pcm;
pub mod pwm;
pub mod systimer;

/// Physical base addresses of each register block, relative to the
/// peripheral base. The peripheral base itself differs by SoC
/// (`0x2000_0000` on BCM2835, `0x3F00_0000` on BCM2836/2837, `0xFE00_0000`
/// on BCM2711) and is supplied by [`crate::pmap::PeripheralMap`] rather
/// than hardcoded here, since this crate targets the register layout, not
/// one specific board.
pub mod offset {
    /// Clock manager (used to derive the PWM/PCM peripheral clock).
    pub const CLOCK: usize = 0x0010_1000;
    /// DMA channels 0..=14 share this one page; see
    /// [`DMA_CHANNEL_STRIDE`] for the per-channel spacing within it.
    pub const DMA: usize = 0x0000_7000;
    /// DMA channel 15 is aliased into a different page on some SoCs.
    pub const DMA15: usize = 0x00E0_5000;
    pub const GPIO: usize = 0x0020_0000;
    pub const PCM: usize = 0x0020_3000;
    pub const PWM: usize = 0x0020_C000;
    pub const SYSTIMER: usize = 0x0000_3000;

    /// Byte stride between consecutive DMA channels' register files within
    /// the shared `DMA` page (channels 0..=14).
    pub const DMA_CHANNEL_STRIDE: usize = 0x100;

    /// Length, in bytes, to map for each peripheral's register page. All of
    /// these comfortably fit one 4 KiB page.
    pub const PAGE_LEN: usize = 4096;

    /// Bus-alias tag applied to the top byte of any address handed to a
    /// DMA control block's source/destination fields, per GLOSSARY "Bus
    /// address".
    pub const BUS_ALIAS_TAG: u32 = 0x7E00_0000;
    /// Mask selecting the low 24 bits of a physical peripheral address
    /// before the bus alias tag is applied.
    pub const BUS_ALIAS_ADDR_MASK: u32 = 0x00FF_FFFF;
}

/// Converts a peripheral register's address (block offset plus in-block
/// byte offset, both relative to the SoC peripheral physical base) into
/// the bus-alias address a DMA control block must use.
///
/// The low 24 bits of every peripheral-relative address are identical
/// across BCM2835/2836/2837/2711 (the three differ only in the high bits
/// of the SoC peripheral physical base, which the bus alias mask discards),
/// so this function needs no SoC-model parameter.
#[must_use]
pub const fn bus_alias(block_offset: usize, in_block_byte_offset: u32) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    let block_offset = block_offset as u32;
    ((block_offset + in_block_byte_offset) & offset::BUS_ALIAS_ADDR_MASK) | offset::BUS_ALIAS_TAG
}
