//! GPIO register block.
//!
//! Function-select, pull, set/clear, and level registers are modeled as
//! plain `ReadWrite`/`WriteOnly` words rather than `register_bitfields!`
//! blocks: each holds up to 32 identically-shaped sub-fields (one per pin),
//! and `tock_registers`' field DSL is built for a handful of named fields,
//! not a homogeneous array of them, so per-pin access is better expressed
//! as the shift/mask helpers on [`Registers`] below.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::register_structs;

register_structs! {
    pub Registers {
        (0x00 => fsel: [ReadWrite<u32>; 6]),
        (0x18 => _reserved0),
        (0x1C => set: [WriteOnly<u32>; 2]),
        (0x24 => _reserved1),
        (0x28 => clr: [WriteOnly<u32>; 2]),
        (0x30 => _reserved2),
        (0x34 => lev: [ReadOnly<u32>; 2]),
        (0x3C => _reserved3),
        (0x4C => pud: ReadWrite<u32>),
        (0x50 => pudclk: [ReadWrite<u32>; 2]),
        (0x58 => @END),
    }
}

/// In-register-word byte offset of `GPSET0`, for bus-address computation.
pub const GPSET0_OFFSET: u32 = 0x1C;
/// In-register-word byte offset of `GPCLR0`, for bus-address computation.
pub const GPCLR0_OFFSET: u32 = 0x28;
/// In-register-word byte offset of `GPLEV0`, for bus-address computation.
pub const GPLEV0_OFFSET: u32 = 0x34;

/// Alternate function selection for a GPIO pin.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionSelect {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

/// Pull resistor configuration, BCM2835-style two-register sequence
/// (`GPPUD` + `GPPUDCLK0/1`). BCM2711 uses a different single-register
/// scheme; this engine targets the BCM2835/2836/2837 mechanism.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off = 0b00,
    Down = 0b01,
    Up = 0b10,
}

impl Registers {
    const NUM_PINS: u32 = 54;
    const FSEL_FIELD_WIDTH: u32 = 3;
    const FSEL_FIELDS_PER_WORD: u32 = 32 / Self::FSEL_FIELD_WIDTH;

    /// Reads back the function currently selected for `pin`.
    ///
    /// # Panics
    /// Panics if `pin >= 54` or the register holds a reserved 3-bit
    /// encoding (never produced by [`Self::select_function`]).
    pub fn function(&self, pin: u32) -> FunctionSelect {
        assert!(pin < Self::NUM_PINS, "pin out of range");
        let word = pin / Self::FSEL_FIELDS_PER_WORD;
        let shift = (pin % Self::FSEL_FIELDS_PER_WORD) * Self::FSEL_FIELD_WIDTH;
        let bits = (self.fsel[word as usize].get() >> shift) & 0b111;
        match bits {
            0b000 => FunctionSelect::Input,
            0b001 => FunctionSelect::Output,
            0b100 => FunctionSelect::Alt0,
            0b101 => FunctionSelect::Alt1,
            0b110 => FunctionSelect::Alt2,
            0b111 => FunctionSelect::Alt3,
            0b011 => FunctionSelect::Alt4,
            0b010 => FunctionSelect::Alt5,
            _ => unreachable!("3-bit field"),
        }
    }

    /// Selects `function` for `pin`.
    ///
    /// # Panics
    /// Panics if `pin >= 54`.
    pub fn select_function(&self, pin: u32, function: FunctionSelect) {
        assert!(pin < Self::NUM_PINS, "pin out of range");
        let word = pin / Self::FSEL_FIELDS_PER_WORD;
        let shift = (pin % Self::FSEL_FIELDS_PER_WORD) * Self::FSEL_FIELD_WIDTH;
        let mask = 0b111_u32 << shift;
        let mut val = self.fsel[word as usize].get();
        val = (val & !mask) | ((function as u32) << shift);
        self.fsel[word as usize].set(val);
    }

    /// Sets the pull resistor state for `pin` via the `GPPUD`/`GPPUDCLK`
    /// two-step sequence: stage the desired pull in `GPPUD`, clock it into
    /// the target pin via `GPPUDCLK`, then clear both to idle. A short busy
    /// wait is required between steps per the BCM2835 datasheet; the
    /// caller supplies `settle` so this module stays free of a sleep
    /// dependency.
    ///
    /// # Panics
    /// Panics if `pin >= 54`.
    pub fn select_pull(&self, pin: u32, pull: Pull, settle: impl Fn()) {
        assert!(pin < Self::NUM_PINS, "pin out of range");
        let bank = (pin / 32) as usize;
        let bit = 1_u32 << (pin % 32);
        self.pud.set(pull as u32);
        settle();
        self.pudclk[bank].set(bit);
        settle();
        self.pud.set(0);
        self.pudclk[bank].set(0);
    }

    /// Raises the pins set in `mask` on bank 0 (GPIO 0..=31).
    pub fn set_bank0(&self, mask: u32) {
        self.set[0].set(mask);
    }

    /// Lowers the pins set in `mask` on bank 0.
    pub fn clear_bank0(&self, mask: u32) {
        self.clr[0].set(mask);
    }

    /// Snapshots the current level of bank 0.
    pub fn level_bank0(&self) -> u32 {
        self.lev[0].get()
    }
}
