//! Clock manager register block: generates the PWM/PCM peripheral clock
//! that ultimately determines the tick rate the pacer runs at.
//!
//! Every clock manager register is password-protected: bits 31:24 of any
//! write must be `0x5A`, or the write is silently dropped by the hardware.

use tock_registers::interfaces::{ReadWriteable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

/// Required password in the top byte of every clock manager write.
const PASSWORD: u32 = 0x5A00_0000;

register_bitfields! {
    u32,
    pub CTL [
        PASSWD OFFSET(24) NUMBITS(8) [],
        MASH OFFSET(9) NUMBITS(2) [],
        FLIP OFFSET(8) NUMBITS(1) [],
        BUSY OFFSET(7) NUMBITS(1) [],
        KILL OFFSET(5) NUMBITS(1) [],
        ENAB OFFSET(4) NUMBITS(1) [],
        SRC OFFSET(0) NUMBITS(4) [
            GroundOscillator = 1,
            Plld = 6,
        ],
    ],
    pub DIV [
        PASSWD OFFSET(24) NUMBITS(8) [],
        DIVI OFFSET(12) NUMBITS(12) [],
        DIVF OFFSET(0) NUMBITS(12) [],
    ],
}

register_structs! {
    pub Registers {
        (0x00 => _reserved0),
        (0x98 => pub pcm_ctl: ReadWrite<u32, CTL::Register>),
        (0x9C => pub pcm_div: ReadWrite<u32, DIV::Register>),
        (0xA0 => pub pwm_ctl: ReadWrite<u32, CTL::Register>),
        (0xA4 => pub pwm_div: ReadWrite<u32, DIV::Register>),
        (0xA8 => @END),
    }
}

/// Divisor integer/fractional parts and MASH setting for one tick rate.
#[derive(Debug, Clone, Copy)]
pub struct Divisor {
    pub divi: u32,
    pub divf: u32,
    pub mash: u32,
}

/// 19.2 MHz crystal oscillator divisor table, indexed by tick-µs (the
/// PLLD path is computed, not tabulated — see [`plld_divisor`]).
#[must_use]
pub const fn osc_divisor(tick_us: u32) -> Option<Divisor> {
    Some(match tick_us {
        1 => Divisor { divi: 2, divf: 546, mash: 1 },
        2 => Divisor { divi: 2, divf: 86, mash: 1 },
        4 => Divisor { divi: 6, divf: 4021, mash: 1 },
        5 => Divisor { divi: 12, divf: 0, mash: 0 },
        8 => Divisor { divi: 3, divf: 48, mash: 1 },
        10 => Divisor { divi: 24, divf: 0, mash: 0 },
        _ => return None,
    })
}

/// 500 MHz PLLD divisor for `tick_us`: `divi = 50 * tick_us`, no
/// fractional part or MASH, matching `initClock`'s PLLD branch.
#[must_use]
pub const fn plld_divisor(tick_us: u32) -> Divisor {
    Divisor { divi: 50 * tick_us, divf: 0, mash: 0 }
}

/// `CTL::SRC` encoding for the 19.2 MHz crystal oscillator.
pub const SRC_OSCILLATOR: u32 = 1;
/// `CTL::SRC` encoding for the 500 MHz PLLD tap.
pub const SRC_PLLD: u32 = 6;

impl Registers {
    /// Kills, reprograms, and re-enables the PWM clock generator.
    pub fn configure_pwm(&self, src_bits: u32, divisor: Divisor, settle: impl Fn()) {
        Self::configure(&self.pwm_ctl, &self.pwm_div, src_bits, divisor, settle);
    }

    /// Kills, reprograms, and re-enables the PCM clock generator.
    pub fn configure_pcm(&self, src_bits: u32, divisor: Divisor, settle: impl Fn()) {
        Self::configure(&self.pcm_ctl, &self.pcm_div, src_bits, divisor, settle);
    }

    fn configure(
        ctl: &ReadWrite<u32, CTL::Register>,
        div: &ReadWrite<u32, DIV::Register>,
        src_bits: u32,
        divisor: Divisor,
        settle: impl Fn(),
    ) {
        ctl.write(CTL::PASSWD.val(PASSWORD >> 24) + CTL::KILL::SET);
        settle();
        div.write(
            DIV::PASSWD.val(PASSWORD >> 24)
                + DIV::DIVI.val(divisor.divi)
                + DIV::DIVF.val(divisor.divf),
        );
        settle();
        ctl.write(
            CTL::PASSWD.val(PASSWORD >> 24) + CTL::MASH.val(divisor.mash) + CTL::SRC.val(src_bits),
        );
        settle();
        ctl.modify(CTL::PASSWD.val(PASSWORD >> 24) + CTL::ENAB::SET);
        settle();
    }
}
