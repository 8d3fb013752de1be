//! PACER: configures the clock manager and the selected pacing peripheral
//! (PWM or PCM) so its DREQ fires once per tick, and exposes the bus
//! address DMA control blocks must target to synchronize on that DREQ.
//!
//! Programming the clock manager follows a strict sequence: kill the
//! clock, program its divisor and source, re-enable it, then arm the
//! peripheral's DMA request line.

use crate::config::{ClockSource, Config, PacingPeripheral, TickMicros};
use crate::error::{Error, Result};
use crate::regs::clock;
use crate::regs::dma::Peripheral as DmaPeripheral;
use crate::regs::{pcm, pwm};

/// Owns references to the three register blocks PACER programs together.
/// Lifetimes are tied to the caller's peripheral mappings (normally held by
/// [`crate::engine::Engine`] for the engine's lifetime).
pub struct Pacer<'a> {
    clock: &'a clock::Registers,
    pwm: &'a pwm::Registers,
    pcm: &'a pcm::Registers,
}

impl<'a> Pacer<'a> {
    #[must_use]
    pub fn new(clock: &'a clock::Registers, pwm: &'a pwm::Registers, pcm: &'a pcm::Registers) -> Self {
        Self { clock, pwm, pcm }
    }

    /// Programs the clock manager and pacing peripheral per `config`,
    /// calling `settle` between password-protected writes as the BCM283x
    /// clock manager requires. Returns the [`DmaPeripheral`] control blocks
    /// must set in their `TI.PERMAP` field to gate on this pacing source.
    pub fn start(&self, config: &Config, settle: impl Fn()) -> Result<DmaPeripheral> {
        let tick_us = config.tick_us().as_micros();
        let divisor = match config.clock_source() {
            ClockSource::Osc => clock::osc_divisor(tick_us).ok_or(Error::BadClkMicros)?,
            ClockSource::Plld => clock::plld_divisor(tick_us),
        };
        let src_bits = match config.clock_source() {
            ClockSource::Osc => clock::SRC_OSCILLATOR,
            ClockSource::Plld => clock::SRC_PLLD,
        };

        match config.pacing_peripheral() {
            PacingPeripheral::Pwm => {
                self.clock.configure_pwm(src_bits, divisor, &settle);
                // 32 FIFO bits shifted per DREQ: one tick per 32-bit word.
                self.pwm.start_pacing(32);
                Ok(DmaPeripheral::PacingPwm)
            }
            PacingPeripheral::Pcm => {
                self.clock.configure_pcm(src_bits, divisor, &settle);
                self.pcm.start_pacing();
                Ok(DmaPeripheral::PacingPcmTx)
            }
        }
    }

    /// Disables the pacing peripheral's DMA request line and data path,
    /// leaving the clock manager itself enabled: a plain shutdown never
    /// re-kills the clock.
    pub fn stop(&self, config: &Config) {
        match config.pacing_peripheral() {
            PacingPeripheral::Pwm => self.pwm.stop(),
            PacingPeripheral::Pcm => self.pcm.stop(),
        }
    }
}
