//! CALLBK: per-GPIO edge callbacks, per-GPIO watchdogs, and the global
//! batched-sample callback, plus the bookkeeping [`crate::alert`] needs to
//! know which bits to bother watching at all.
//!
//! A Rust closure already owns whatever state it closes over, so this
//! module collapses a callback plus any user data it needs into one
//! `FnMut` trait object per slot.

use std::collections::HashMap;

use crate::gpio::MAX_GPIO;

/// The direction of a detected edge, or a watchdog firing with no edge at
/// all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeLevel {
    Low,
    High,
    Timeout,
}

/// One raw bank-0 sample: the tick it was captured at and the full 32-bit
/// level word ([`crate::inring::InRing::level_at`]'s value). Per-gpio
/// callbacks and NOTIFY reports both mask this down to the bits they care
/// about; nothing upstream of [`crate::alert`] ever narrows it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub tick: u32,
    pub level: u32,
}

type EdgeFn = Box<dyn FnMut(u32, EdgeLevel, u32) + Send>;
type SampleFn = Box<dyn FnMut(&[Sample]) + Send>;

struct WatchdogState {
    timeout_ms: u32,
    last_edge_tick: u32,
    /// Set once the first sample after arming has been observed, so the
    /// watchdog's first poll initializes `last_edge_tick` instead of firing
    /// immediately against a stale-zero tick.
    primed: bool,
}

/// Registry of every installed callback, indexed by GPIO where a callback
/// is per-gpio, plus the one slot for the batched-sample callback.
///
/// This engine only ever runs under one [`crate::alert`] loop, so callback
/// dispatch here is plain sequential iteration over a small map rather
/// than an intrusive linked list.
#[derive(Default)]
pub struct CallbackRegistry {
    edges: HashMap<u32, EdgeFn>,
    watchdogs: HashMap<u32, WatchdogState>,
    sample: Option<SampleFn>,
    sample_bits: u32,
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { edges: HashMap::new(), watchdogs: HashMap::new(), sample: None, sample_bits: 0 }
    }

    /// Installs (or clears, if `callback` is `None`) the edge callback for
    /// `gpio`.
    pub fn set_edge(&mut self, gpio: u32, callback: Option<EdgeFn>) {
        match callback {
            Some(cb) => {
                self.edges.insert(gpio, cb);
            }
            None => {
                self.edges.remove(&gpio);
            }
        }
    }

    /// Arms (`Some`) or disarms (`None`) a watchdog on `gpio`.
    /// Re-arming an already-armed watchdog resets its priming, so a
    /// shortened timeout can't fire against an edge recorded under the old
    /// timeout.
    pub fn set_watchdog(&mut self, gpio: u32, timeout_ms: Option<u32>) {
        match timeout_ms {
            Some(ms) => {
                self.watchdogs.insert(gpio, WatchdogState { timeout_ms: ms, last_edge_tick: 0, primed: false });
            }
            None => {
                self.watchdogs.remove(&gpio);
            }
        }
    }

    /// Installs (or clears) the batched-sample callback, restricted to
    /// `bits`: only samples whose masked level actually changes within
    /// `bits` are ever handed to it. Clearing the callback (`None`) also
    /// drops `bits` from [`Self::monitor_bits`], mirroring
    /// `gpioSetGetSamplesFunc`'s `gpioGetSamples.bits = f ? bits : 0`.
    pub fn set_sample(&mut self, callback: Option<SampleFn>, bits: u32) {
        self.sample_bits = if callback.is_some() { bits } else { 0 };
        self.sample = callback;
    }

    /// The union of every bit any installed edge callback or armed watchdog
    /// cares about, plus the batched-sample callback's own bit mask,
    /// recomputed fresh from the current registrations rather than cached,
    /// so a callback cleared mid-run stops contributing its bit on the very
    /// next poll.
    #[must_use]
    pub fn monitor_bits(&self) -> u32 {
        let mut mask = self.sample_bits;
        for &gpio in self.edges.keys() {
            mask |= 1 << gpio;
        }
        for &gpio in self.watchdogs.keys() {
            mask |= 1 << gpio;
        }
        mask
    }

    /// Calls `gpio`'s edge callback, if installed, with the level the bit
    /// transitioned to and the tick the transition was observed at.
    pub fn dispatch_edge(&mut self, gpio: u32, level: EdgeLevel, tick: u32) {
        if let Some(cb) = self.edges.get_mut(&gpio) {
            cb(gpio, level, tick);
        }
    }

    /// Calls the batched-sample callback, if installed, with every sample
    /// collected this poll.
    pub fn dispatch_sample(&mut self, samples: &[Sample]) {
        if let Some(cb) = &mut self.sample {
            cb(samples);
        }
    }

    /// Records that `gpio` just edged at `tick`, resetting its watchdog
    /// deadline so the next timeout is measured from here.
    pub fn record_edge_tick(&mut self, gpio: u32, tick: u32) {
        if let Some(wd) = self.watchdogs.get_mut(&gpio) {
            wd.last_edge_tick = tick;
            wd.primed = true;
        }
    }

    /// Primes `gpio`'s watchdog against `tick` without firing, for the
    /// first poll after arming.
    pub fn prime_watchdog(&mut self, gpio: u32, tick: u32) {
        if let Some(wd) = self.watchdogs.get_mut(&gpio) {
            if !wd.primed {
                wd.last_edge_tick = tick;
                wd.primed = true;
            }
        }
    }

    /// Whether `gpio`'s watchdog, if armed, has ever been primed.
    #[must_use]
    pub fn watchdog_primed(&self, gpio: u32) -> bool {
        self.watchdogs.get(&gpio).is_some_and(|wd| wd.primed)
    }

    /// `gpio`'s watchdog timeout in milliseconds, if armed.
    #[must_use]
    pub fn watchdog_ms(&self, gpio: u32) -> Option<u32> {
        self.watchdogs.get(&gpio).map(|wd| wd.timeout_ms)
    }

    /// The tick `gpio`'s watchdog last saw an edge at, if armed and primed.
    #[must_use]
    pub fn last_edge_tick(&self, gpio: u32) -> Option<u32> {
        self.watchdogs.get(&gpio).filter(|wd| wd.primed).map(|wd| wd.last_edge_tick)
    }

    /// Calls `gpio`'s edge callback with [`EdgeLevel::Timeout`], delivering
    /// a watchdog expiry through the same callback as real edges.
    pub fn dispatch_watchdog_timeout(&mut self, gpio: u32, tick: u32) {
        self.dispatch_edge(gpio, EdgeLevel::Timeout, tick);
    }

    /// Every GPIO with an installed edge callback.
    pub fn installed_edge_gpios(&self) -> impl Iterator<Item = u32> + '_ {
        self.edges.keys().copied()
    }

    /// Every GPIO with an armed watchdog.
    pub fn armed_watchdog_gpios(&self) -> impl Iterator<Item = u32> + '_ {
        self.watchdogs.keys().copied()
    }
}

/// Rejects a watchdog arm/edge registration against a gpio outside the
/// engine's range up front, matching [`crate::gpio::check_gpio`]'s bound.
#[must_use]
pub fn in_range(gpio: u32) -> bool {
    gpio <= MAX_GPIO
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn edge_callback_fires_with_the_right_gpio_and_level() {
        let mut registry = CallbackRegistry::new();
        let seen = Arc::new(AtomicU32::new(u32::MAX));
        let seen_clone = Arc::clone(&seen);
        registry.set_edge(
            4,
            Some(Box::new(move |gpio, level, _tick| {
                assert_eq!(level, EdgeLevel::High);
                seen_clone.store(gpio, Ordering::SeqCst);
            })),
        );
        registry.dispatch_edge(4, EdgeLevel::High, 1000);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn clearing_an_edge_callback_stops_further_dispatch() {
        let mut registry = CallbackRegistry::new();
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&count);
        registry.set_edge(4, Some(Box::new(move |_, _, _| { count_clone.fetch_add(1, Ordering::SeqCst); })));
        registry.dispatch_edge(4, EdgeLevel::High, 1);
        registry.set_edge(4, None);
        registry.dispatch_edge(4, EdgeLevel::Low, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn monitor_bits_unions_edge_and_watchdog_gpios() {
        let mut registry = CallbackRegistry::new();
        registry.set_edge(2, Some(Box::new(|_, _, _| {})));
        registry.set_watchdog(9, Some(500));
        assert_eq!(registry.monitor_bits(), (1 << 2) | (1 << 9));
    }

    #[test]
    fn disarming_a_watchdog_removes_its_monitor_bit() {
        let mut registry = CallbackRegistry::new();
        registry.set_watchdog(9, Some(500));
        registry.set_watchdog(9, None);
        assert_eq!(registry.monitor_bits(), 0);
    }

    #[test]
    fn watchdog_is_unprimed_until_first_observation() {
        let mut registry = CallbackRegistry::new();
        registry.set_watchdog(9, Some(500));
        assert!(!registry.watchdog_primed(9));
        assert_eq!(registry.last_edge_tick(9), None);
        registry.prime_watchdog(9, 12345);
        assert!(registry.watchdog_primed(9));
        assert_eq!(registry.last_edge_tick(9), Some(12345));
    }

    #[test]
    fn priming_does_not_override_a_real_edge_tick() {
        let mut registry = CallbackRegistry::new();
        registry.set_watchdog(9, Some(500));
        registry.record_edge_tick(9, 5000);
        registry.prime_watchdog(9, 9999);
        assert_eq!(registry.last_edge_tick(9), Some(5000));
    }

    #[test]
    fn sample_callback_receives_the_full_batch() {
        let mut registry = CallbackRegistry::new();
        let seen = Arc::new(std::sync::Mutex::new(0_usize));
        let seen_clone = Arc::clone(&seen);
        registry.set_sample(
            Some(Box::new(move |samples: &[Sample]| {
                *seen_clone.lock().unwrap() = samples.len();
            })),
            0xFFFF_FFFF,
        );
        registry.dispatch_sample(&[Sample { tick: 1, level: 0 }, Sample { tick: 2, level: 1 }]);
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn sample_bits_contribute_to_monitor_bits() {
        let mut registry = CallbackRegistry::new();
        registry.set_sample(Some(Box::new(|_: &[Sample]| {})), 1 << 17);
        assert_eq!(registry.monitor_bits(), 1 << 17);
    }

    #[test]
    fn clearing_the_sample_callback_drops_its_monitor_bit() {
        let mut registry = CallbackRegistry::new();
        registry.set_sample(Some(Box::new(|_: &[Sample]| {})), 1 << 17);
        registry.set_sample(None, 0);
        assert_eq!(registry.monitor_bits(), 0);
    }
}
