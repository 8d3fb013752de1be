//! Engine error kinds.
//!
//! [`Error`] is an explicit Rust result type rather than a flat negative-
//! status-code namespace; [`Error::raw_code`] still recovers a stable
//! negative-status value for any command-dispatch layer built on top of
//! this crate that wants to relay a numeric code over the wire.

/// Convenience alias for engine results.
pub type Result<T> = core::result::Result<T, Error>;

/// Every failure mode the engine can report.
///
/// Variant names mirror the error kinds enumerated in the engine's design
/// document verbatim, not the `PI_BAD_*` spelling of the C source, since
/// this crate's public API is the only place these are spelled out.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("engine is already initialized")]
    AlreadyInitialized,
    #[error("gpio {0} is out of range")]
    BadGpio(u32),
    #[error("gpio {0} is not a user-permitted gpio")]
    BadUserGpio(u32),
    #[error("bad gpio mode")]
    BadMode,
    #[error("bad gpio level")]
    BadLevel,
    #[error("bad pull-up/down setting")]
    BadPud,
    #[error("bad pulse width {0}")]
    BadPulsewidth(u32),
    #[error("bad pwm duty cycle {0}")]
    BadDutycycle(u32),
    #[error("bad pwm duty cycle range {0}")]
    BadDutyRange(u32),
    #[error("bad pwm frequency {0}")]
    BadFrequency(u32),
    #[error("bad timer id")]
    BadTimer,
    #[error("bad milliseconds value")]
    BadMs,
    #[error("bad time type")]
    BadTimetype,
    #[error("bad seconds value")]
    BadSeconds,
    #[error("bad microseconds value")]
    BadMicros,
    #[error("bad watchdog timeout")]
    BadWatchdogTimeout,
    #[error("bad pacing peripheral")]
    BadClkPeripheral,
    #[error("bad clock source")]
    BadClkSource,
    #[error("bad tick duration, must be one of 1, 2, 4, 5, 8, 10 microseconds")]
    BadClkMicros,
    #[error("bad sample buffer duration, must be 100..=10000 milliseconds")]
    BadBufferMs,
    #[error("bad signal number")]
    BadSignum,
    #[error("bad pathname")]
    BadPathname,
    #[error("no free notification handle")]
    NoHandle,
    #[error("bad notification handle")]
    BadHandle,
    #[error("bad dma channel")]
    BadChannel,
    #[error("bad socket port")]
    BadSocketPort,
    #[error("bad fifo command")]
    BadFifoCommand,
    #[error("bad waveform transmit mode")]
    BadWaveMode,
    #[error("bad serial baud rate {0}")]
    BadWaveBaud(u32),
    #[error("too many pulses in waveform")]
    TooManyPulses,
    #[error("too many characters in serial payload")]
    TooManyChars,
    #[error("bad serial offset")]
    BadSerialOffset,
    #[error("gpio {0} is already in use")]
    GpioInUse(u32),
    #[error("gpio {0} is not configured for serial bit-banging")]
    NotSerialGpio(u32),
    #[error("bad serial bit count")]
    BadSerialCount,
    #[error("write not permitted by the configured permission mask")]
    NotPermitted,
    #[error("some bits in the target mask were not permitted; permitted subset was applied")]
    SomePermitted,
    #[error("bad pulse length")]
    BadPulselen,
    #[error("compiled waveform exceeds the reserved output pages")]
    TooManyCbs,
    #[error("waveform exceeds the reserved out-of-line parameter space")]
    TooManyOol,
    #[error("waveform is empty")]
    EmptyWaveform,
    #[error("no such waveform id")]
    NoWaveformId,
    #[error("bad waveform id")]
    BadWaveId,
    #[error("engine initialization failed: {0}")]
    InitFailed(&'static str),
    #[error("failed to resolve a bus address via /proc/self/pagemap")]
    PagemapFailed,
    #[error("failed to allocate or pin dma-visible memory")]
    AllocFailed,
    #[error("no free waveform slot")]
    TooManyWaves,
}

impl Error {
    /// Recovers a stable negative-status code for callers that want to
    /// relay failures as a plain integer.
    ///
    /// Values are stable API surface once assigned to a variant, so new
    /// variants must be appended rather than inserted.
    #[must_use]
    pub const fn raw_code(&self) -> i32 {
        match self {
            Self::InitFailed(_) => -1,
            Self::BadUserGpio(_) => -2,
            Self::BadGpio(_) => -3,
            Self::BadMode => -4,
            Self::BadLevel => -5,
            Self::BadPud => -6,
            Self::BadPulsewidth(_) => -7,
            Self::BadDutycycle(_) => -8,
            Self::BadTimer => -9,
            Self::BadMs => -10,
            Self::BadTimetype => -11,
            Self::BadSeconds => -12,
            Self::BadMicros => -13,
            Self::BadWatchdogTimeout => -15,
            Self::NoHandle => -24,
            Self::BadHandle => -25,
            Self::BadWaveBaud(_) => -35,
            Self::TooManyPulses => -36,
            Self::TooManyChars => -37,
            Self::NotSerialGpio(_) => -38,
            Self::BadSerialCount => -39,
            Self::BadWaveId => -45,
            Self::TooManyCbs => -46,
            Self::TooManyOol => -47,
            Self::EmptyWaveform => -49,
            Self::NoWaveformId => -50,
            Self::BadWaveMode => -54,
            Self::BadClkPeripheral => -55,
            Self::BadClkSource => -56,
            Self::BadClkMicros => -57,
            Self::BadBufferMs => -58,
            Self::NotPermitted => -41,
            Self::SomePermitted => -42,
            Self::GpioInUse(_) => -53,
            Self::BadSerialOffset => -64,
            Self::BadDutyRange(_) => -67,
            Self::BadFrequency(_) => -66,
            Self::BadPulselen => -68,
            Self::NotInitialized => -69,
            Self::AlreadyInitialized => -70,
            Self::BadChannel => -71,
            Self::BadSocketPort => -72,
            Self::BadFifoCommand => -73,
            Self::BadSignum => -74,
            Self::BadPathname => -75,
            Self::PagemapFailed => -76,
            Self::AllocFailed => -77,
            Self::TooManyWaves => -78,
        }
    }
}
