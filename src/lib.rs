//! User-space DMA-backed GPIO sampling, waveform, and notification engine for
//! Broadcom BCM283x-class SoCs (Raspberry Pi 1 through 4).
//!
//! This crate owns a PWM or PCM pacing peripheral and two DMA channels for
//! its entire lifetime: one channel continuously samples GPIO input levels
//! at a fixed tick cadence into a ring of control blocks (see [`inring`]),
//! and a second channel emits user-compiled waveforms (see [`outring`] and
//! [`wave`]) paced off the same peripheral. A dedicated thread ([`alert`])
//! follows the sampling ring, turns consecutive samples into edge events,
//! and fans them out to callbacks, watchdogs, and notification pipes.
//!
//! The text command dispatcher, client socket protocol, CLI/daemon process
//! plumbing, and script interpreter that normally sit on top of an engine
//! like this are intentionally not part of this crate; callers that need
//! them build on the [`engine::Engine`] handle this crate exposes.
//!
//! # Hardware access
//!
//! Talking to real registers requires `/dev/mem` access (`CAP_SYS_RAWIO` or
//! root) and exclusive ownership of a DMA pacing peripheral. Everything
//! that touches hardware goes through the [`PeripheralMap`] trait, so the
//! non-hardware parts of this crate (waveform compilation, ring indexing,
//! notification framing) are fully testable with [`pmap::FakeMap`].

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod alert;
pub mod callback;
pub mod cb;
pub mod config;
pub mod engine;
pub mod error;
pub mod gpio;
pub mod inring;
pub mod notify;
pub mod outring;
pub mod pacer;
pub mod pmap;
pub mod pool;
mod regs;
pub mod wave;

pub use config::{ClockSource, Config, PacingPeripheral, TickMicros};
pub use engine::Engine;
pub use error::{Error, Result};
pub use gpio::{Level, Mode, Pull};
pub use wave::{Pulse, Waveform, WaveId};
