//! Configuration surface consumed by [`crate::Engine::init`].
//!
//! Every field here may only be set before `init`, and `init` validates the
//! whole struct atomically rather than rejecting individual setters at
//! call time. There is deliberately no argument-parsing layer here — that
//! belongs to an external CLI front end.

use crate::error::{Error, Result};

/// Sampling/pacing tick duration, in microseconds.
///
/// Only these six values have a tabulated PWM/PCM clock divisor in
/// [`crate::pacer`]; any other value is rejected by [`Config::validate`]
/// per REDESIGN/Open-Question (b).
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_derive::FromPrimitive)]
pub enum TickMicros {
    One = 1,
    Two = 2,
    Four = 4,
    Five = 5,
    Eight = 8,
    Ten = 10,
}

impl TickMicros {
    #[must_use]
    pub const fn as_micros(self) -> u32 {
        self as u32
    }
}

impl Default for TickMicros {
    fn default() -> Self {
        Self::Five
    }
}

/// Which peripheral paces the input-sampling and output-waveform DREQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacingPeripheral {
    Pwm,
    #[default]
    Pcm,
}

/// Source feeding the chosen pacing peripheral's clock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    /// 19.2 MHz crystal oscillator.
    Osc,
    /// 500 MHz PLLD tap, the more precise of the two.
    #[default]
    Plld,
}

/// Validated engine configuration.
///
/// Construct with [`Config::new`] (returns the engine's defaults) and
/// adjust fields with the builder methods, each of which validates its own
/// argument immediately, fail-fast, while [`Config::validate`] re-checks
/// the whole struct once more immediately before [`crate::Engine::init`]
/// consumes it.
#[derive(Debug, Clone)]
pub struct Config {
    tick_us: TickMicros,
    pacing_peripheral: PacingPeripheral,
    clock_source: ClockSource,
    primary_dma_channel: u8,
    secondary_dma_channel: u8,
    sample_buffer_ms: u32,
    permission_mask: u64,
    /// Bitmask disabling the fifo/socket command servers. Stored for
    /// forward compatibility with a future command-dispatch crate; this
    /// crate's core does not start or gate any servers itself.
    interface_flags: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Minimum allowed DMA channel index on any BCM283x variant.
    pub const MIN_DMA_CHANNEL: u8 = 0;
    /// Maximum allowed DMA channel index.
    pub const MAX_DMA_CHANNEL: u8 = 14;
    /// Minimum sample buffer duration, in milliseconds.
    pub const MIN_BUFFER_MS: u32 = 100;
    /// Maximum sample buffer duration, in milliseconds.
    pub const MAX_BUFFER_MS: u32 = 10_000;

    /// Returns the engine defaults: 5 microsecond tick, PCM pacing off
    /// PLLD, DMA channels 14/5, a 120 ms sample buffer, and every GPIO
    /// permitted.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tick_us: TickMicros::Five,
            pacing_peripheral: PacingPeripheral::Pcm,
            clock_source: ClockSource::Plld,
            primary_dma_channel: 14,
            secondary_dma_channel: 5,
            sample_buffer_ms: 120,
            permission_mask: u64::MAX,
            interface_flags: 0,
        }
    }

    pub fn set_clock(
        &mut self,
        tick_us: u32,
        pacing_peripheral: PacingPeripheral,
        clock_source: ClockSource,
    ) -> Result<&mut Self> {
        self.tick_us = num_traits::FromPrimitive::from_u32(tick_us)
            .ok_or(Error::BadClkMicros)?;
        self.pacing_peripheral = pacing_peripheral;
        self.clock_source = clock_source;
        Ok(self)
    }

    pub fn set_dma_channels(
        &mut self,
        primary: u8,
        secondary: u8,
    ) -> Result<&mut Self> {
        if primary > Self::MAX_DMA_CHANNEL {
            return Err(Error::BadChannel);
        }
        if secondary > Self::MAX_DMA_CHANNEL {
            return Err(Error::BadChannel);
        }
        if primary == secondary {
            return Err(Error::BadChannel);
        }
        self.primary_dma_channel = primary;
        self.secondary_dma_channel = secondary;
        Ok(self)
    }

    pub fn set_buffer_ms(&mut self, millis: u32) -> Result<&mut Self> {
        if !(Self::MIN_BUFFER_MS..=Self::MAX_BUFFER_MS).contains(&millis) {
            return Err(Error::BadBufferMs);
        }
        self.sample_buffer_ms = millis;
        Ok(self)
    }

    pub fn set_permission_mask(&mut self, mask: u64) -> &mut Self {
        self.permission_mask = mask;
        self
    }

    pub fn set_interface_flags(&mut self, flags: u32) -> &mut Self {
        self.interface_flags = flags;
        self
    }

    #[must_use]
    pub const fn tick_us(&self) -> TickMicros {
        self.tick_us
    }

    #[must_use]
    pub const fn pacing_peripheral(&self) -> PacingPeripheral {
        self.pacing_peripheral
    }

    #[must_use]
    pub const fn clock_source(&self) -> ClockSource {
        self.clock_source
    }

    #[must_use]
    pub const fn primary_dma_channel(&self) -> u8 {
        self.primary_dma_channel
    }

    #[must_use]
    pub const fn secondary_dma_channel(&self) -> u8 {
        self.secondary_dma_channel
    }

    #[must_use]
    pub const fn sample_buffer_ms(&self) -> u32 {
        self.sample_buffer_ms
    }

    #[must_use]
    pub const fn permission_mask(&self) -> u64 {
        self.permission_mask
    }

    #[must_use]
    pub const fn interface_flags(&self) -> u32 {
        self.interface_flags
    }

    /// Returns whether `gpio` is writable under the configured permission
    /// mask.
    #[must_use]
    pub const fn is_permitted(&self, gpio: u32) -> bool {
        (self.permission_mask & (1_u64 << gpio)) != 0
    }

    /// Re-validates the whole struct. Each setter already validates its own
    /// argument; this exists so `Engine::init` has one place to check
    /// cross-field invariants (currently none) and catch any field left at
    /// an invalid value by direct struct construction in tests.
    pub fn validate(&self) -> Result<()> {
        if self.primary_dma_channel > Self::MAX_DMA_CHANNEL
            || self.secondary_dma_channel > Self::MAX_DMA_CHANNEL
            || self.primary_dma_channel == self.secondary_dma_channel
        {
            return Err(Error::BadChannel);
        }
        if !(Self::MIN_BUFFER_MS..=Self::MAX_BUFFER_MS).contains(&self.sample_buffer_ms) {
            return Err(Error::BadBufferMs);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::new();
        assert_eq!(cfg.tick_us(), TickMicros::Five);
        assert_eq!(cfg.pacing_peripheral(), PacingPeripheral::Pcm);
        assert_eq!(cfg.clock_source(), ClockSource::Plld);
        assert_eq!(cfg.primary_dma_channel(), 14);
        assert_eq!(cfg.secondary_dma_channel(), 5);
        assert_eq!(cfg.sample_buffer_ms(), 120);
    }

    #[test]
    fn rejects_unsupported_tick() {
        let mut cfg = Config::new();
        assert_eq!(
            cfg.set_clock(3, PacingPeripheral::Pcm, ClockSource::Plld)
                .unwrap_err(),
            Error::BadClkMicros
        );
    }

    #[test]
    fn rejects_identical_dma_channels() {
        let mut cfg = Config::new();
        assert_eq!(cfg.set_dma_channels(5, 5).unwrap_err(), Error::BadChannel);
    }

    #[test]
    fn rejects_out_of_range_buffer() {
        let mut cfg = Config::new();
        assert_eq!(cfg.set_buffer_ms(50).unwrap_err(), Error::BadBufferMs);
        assert_eq!(cfg.set_buffer_ms(20_000).unwrap_err(), Error::BadBufferMs);
    }

    #[test]
    fn permission_mask_gates_gpio() {
        let mut cfg = Config::new();
        cfg.set_permission_mask(1 << 4);
        assert!(cfg.is_permitted(4));
        assert!(!cfg.is_permitted(5));
    }
}
