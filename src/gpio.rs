//! High-level GPIO primitives: mode, pull resistor, and level, independent
//! of any ring or waveform activity. [`crate::regs::gpio`] is the MMIO
//! layer this wraps; this module is the public, validated surface
//! `Engine` delegates to.

use crate::error::{Error, Result};
use crate::regs::gpio::{FunctionSelect, Registers};

/// Highest GPIO number the BCM283x SoC exposes at all (alternate-function
/// pins included).
pub const MAX_GPIO: u32 = 53;
/// Highest GPIO number available on the 40-pin header as a general-purpose
/// pin. PWM/servo convenience helpers are bounded to this range; raw
/// mode/level access is not.
pub const MAX_USER_GPIO: u32 = 31;

/// A GPIO's digital function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

impl From<Mode> for FunctionSelect {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Input => Self::Input,
            Mode::Output => Self::Output,
            Mode::Alt0 => Self::Alt0,
            Mode::Alt1 => Self::Alt1,
            Mode::Alt2 => Self::Alt2,
            Mode::Alt3 => Self::Alt3,
            Mode::Alt4 => Self::Alt4,
            Mode::Alt5 => Self::Alt5,
        }
    }
}

impl From<FunctionSelect> for Mode {
    fn from(fsel: FunctionSelect) -> Self {
        match fsel {
            FunctionSelect::Input => Self::Input,
            FunctionSelect::Output => Self::Output,
            FunctionSelect::Alt0 => Self::Alt0,
            FunctionSelect::Alt1 => Self::Alt1,
            FunctionSelect::Alt2 => Self::Alt2,
            FunctionSelect::Alt3 => Self::Alt3,
            FunctionSelect::Alt4 => Self::Alt4,
            FunctionSelect::Alt5 => Self::Alt5,
        }
    }
}

/// Pull resistor configuration for an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off,
    Down,
    Up,
}

impl From<Pull> for crate::regs::gpio::Pull {
    fn from(pull: Pull) -> Self {
        match pull {
            Pull::Off => Self::Off,
            Pull::Down => Self::Down,
            Pull::Up => Self::Up,
        }
    }
}

/// A GPIO's digital level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

/// Checks `gpio` against [`MAX_GPIO`], returning a distinguished error for
/// an out-of-range pin number.
fn check_gpio(gpio: u32) -> Result<()> {
    if gpio > MAX_GPIO {
        return Err(Error::BadGpio(gpio));
    }
    Ok(())
}

/// Sets `gpio`'s function. Settling between the write and any caller-visible
/// effect is the caller's responsibility (`regs` ops here are immediate,
/// unlike [`set_pull`]'s two-step sequence).
pub fn set_mode(regs: &Registers, gpio: u32, mode: Mode) -> Result<()> {
    check_gpio(gpio)?;
    regs.select_function(gpio, mode.into());
    Ok(())
}

/// Reads back `gpio`'s currently configured function.
pub fn get_mode(regs: &Registers, gpio: u32) -> Result<Mode> {
    check_gpio(gpio)?;
    Ok(regs.function(gpio).into())
}

/// Configures `gpio`'s pull resistor, busy-waiting `settle` between the two
/// register writes the hardware requires (the BCM2835 `GPPUD`/`GPPUDCLK`
/// sequence).
pub fn set_pull(regs: &Registers, gpio: u32, pull: Pull, settle: impl Fn()) -> Result<()> {
    check_gpio(gpio)?;
    regs.select_pull(gpio, pull.into(), settle);
    Ok(())
}

/// Reads `gpio`'s current level.
pub fn read(regs: &Registers, gpio: u32) -> Result<Level> {
    check_gpio(gpio)?;
    let level = regs.level_bank0();
    Ok(if level & (1 << gpio) != 0 { Level::High } else { Level::Low })
}

/// Drives `gpio` to `level`. Does *not* force the pin to output mode
/// first — callers that want that must call [`set_mode`] themselves.
pub fn write(regs: &Registers, gpio: u32, level: Level) -> Result<()> {
    check_gpio(gpio)?;
    let mask = 1_u32 << gpio;
    if level.is_high() {
        regs.set_bank0(mask);
    } else {
        regs.clear_bank0(mask);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmap::{FakeMap, PeripheralMap};

    fn fake_registers() -> (FakeMap, *mut Registers) {
        let map = FakeMap::new();
        let ptr = map.map_physical(0, 4096).unwrap();
        (map, ptr.as_ptr().cast())
    }

    #[test]
    fn write_accepts_in_range_gpio_on_both_levels() {
        let (_map, ptr) = fake_registers();
        // SAFETY: `ptr` is a dedicated, correctly sized fake mapping.
        let regs = unsafe { &*ptr };
        assert!(write(regs, 5, Level::High).is_ok());
        assert!(write(regs, 5, Level::Low).is_ok());
    }

    #[test]
    fn rejects_gpio_above_max() {
        let (_map, ptr) = fake_registers();
        let regs = unsafe { &*ptr };
        assert_eq!(set_mode(regs, 54, Mode::Output), Err(Error::BadGpio(54)));
        assert_eq!(read(regs, 99), Err(Error::BadGpio(99)));
    }

    #[test]
    fn mode_round_trips_through_function_select() {
        let (_map, ptr) = fake_registers();
        let regs = unsafe { &*ptr };
        set_mode(regs, 4, Mode::Output).unwrap();
        assert_eq!(get_mode(regs, 4).unwrap(), Mode::Output);
        set_mode(regs, 4, Mode::Alt3).unwrap();
        assert_eq!(get_mode(regs, 4).unwrap(), Mode::Alt3);
    }
}
