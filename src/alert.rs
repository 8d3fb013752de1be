//! ALERT: the soft-realtime thread that follows [`crate::inring::InRing`],
//! turns consecutive bank-0 samples into edge events, and fans them out to
//! [`crate::callback::CallbackRegistry`] and [`crate::notify::NotifyRegistry`].
//!
//! A dedicated thread wakes on a fixed cadence, walks however many new ring
//! slots have been written since its last wake, diffs each against the
//! previous sample, and calls whatever callbacks/watchdogs/notifications
//! are subscribed to the bits that changed. There is no async runtime
//! here: a plain `std::thread` sleeping to an absolute deadline each
//! iteration, which is what [`spawn`] does, is enough for this soft-
//! realtime cadence and keeps the hot loop free of a scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::callback::{CallbackRegistry, EdgeLevel, Sample};
use crate::notify::NotifyRegistry;

/// Tracks the ring's monotonically advancing read position and the last
/// bank-0 level word observed, across calls to [`AlertLoop::step`].
///
/// `head` counts total slots ever consumed, not a ring-wrapped position —
/// [`AlertLoop::step`] takes the position DMA last wrote
/// (`current_cb_linear`, itself ring-wrapped) and reconstructs how far the
/// ring has actually advanced by assuming it never completes more than one
/// full lap between polls. A loop that falls far enough behind to violate
/// that assumption logs a warning and drops the unrecoverable slots rather
/// than walking stale memory DMA has already overwritten.
pub struct AlertLoop {
    tick_us: u32,
    head: u64,
    last_level: u32,
}

impl AlertLoop {
    #[must_use]
    pub fn new(tick_us: u32) -> Self {
        Self { tick_us, head: 0, last_level: 0 }
    }

    /// Reconstructs the monotonic head from `current_cb_linear` (the ring
    /// slot DMA is about to write next, already wrapped to `0..total`),
    /// assuming at most one lap has elapsed since the last call.
    fn advance(&self, current_cb_linear: usize, total: u64) -> u64 {
        let raw = current_cb_linear as u64 % total.max(1);
        let last_mod = self.head % total.max(1);
        let delta = if raw >= last_mod { raw - last_mod } else { total - last_mod + raw };
        self.head + delta
    }

    /// Processes every ring slot written since the last call, diffing each
    /// against the previous bank-0 sample and dispatching edges, watchdog
    /// timeouts, and notifications for the bits any callback or handle
    /// cares about. `now_tick` is the current free-running system timer
    /// value, read independently of the ring so watchdogs keep ticking
    /// even on a poll that finds no new samples at all.
    ///
    /// Returns the batch of samples observed this call (possibly empty),
    /// the same batch handed to the installed sample callback, if any.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        levels: &[u32],
        ticks: &[u32],
        pulses_per_cycle: usize,
        current_cb_linear: usize,
        now_tick: u32,
        callbacks: &mut CallbackRegistry,
        notify: &mut NotifyRegistry,
    ) -> Vec<Sample> {
        let total = levels.len() as u64;
        let mut batch = Vec::new();
        if total == 0 {
            self.check_watchdogs(now_tick, callbacks, notify);
            notify.close_closing_handles();
            return batch;
        }

        let old_head = self.head;
        let new_head = self.advance(current_cb_linear, total);
        let monitor = callbacks.monitor_bits() | notify.monitor_bits();

        let mut processed = 0_u64;
        let mut slot = old_head;
        while slot < new_head && processed < total {
            let linear = (slot % total) as usize;
            let level = levels[linear];
            let cycle = linear / pulses_per_cycle;
            let pulse = (linear % pulses_per_cycle) as u32;
            let tick = ticks[cycle].wrapping_add(pulse * self.tick_us);

            let changed = level ^ self.last_level;
            if changed & monitor != 0 {
                for gpio in 0..32 {
                    let bit = 1_u32 << gpio;
                    if changed & bit == 0 || monitor & bit == 0 {
                        continue;
                    }
                    let edge = if level & bit != 0 { EdgeLevel::High } else { EdgeLevel::Low };
                    callbacks.dispatch_edge(gpio, edge, tick);
                    callbacks.record_edge_tick(gpio, tick);
                }
                notify.report_all(tick, level, changed & monitor);
                // Only a slot whose monitored bits actually moved gets appended to
                // the batch, matching `pthAlertThread`'s `if (newLevel != oldLevel)`
                // gate rather than recording every polled slot.
                batch.push(Sample { tick, level });
            }

            self.last_level = level;
            slot += 1;
            processed += 1;
        }

        if new_head - old_head > total {
            log::warn!(
                "alert loop fell behind the sampling ring; dropped {} samples",
                new_head - old_head - total
            );
        }

        self.head = new_head;
        self.check_watchdogs(now_tick, callbacks, notify);
        notify.close_closing_handles();
        if !batch.is_empty() {
            callbacks.dispatch_sample(&batch);
        }
        batch
    }

    /// A watchdog firing with no activity delivers a synthetic `TIMEOUT`
    /// edge to its callback, and if any RUNNING
    /// notification handle watches that gpio, also a wire report with the
    /// watchdog flag bit and the gpio index in the flags' low bits.
    fn check_watchdogs(&self, now_tick: u32, callbacks: &mut CallbackRegistry, notify: &mut NotifyRegistry) {
        for gpio in callbacks.armed_watchdog_gpios().collect::<Vec<_>>() {
            if !callbacks.watchdog_primed(gpio) {
                callbacks.prime_watchdog(gpio, now_tick);
                continue;
            }
            let (Some(timeout_ms), Some(last_tick)) = (callbacks.watchdog_ms(gpio), callbacks.last_edge_tick(gpio))
            else {
                continue;
            };
            let elapsed_us = now_tick.wrapping_sub(last_tick);
            if u64::from(elapsed_us) >= u64::from(timeout_ms) * 1000 {
                callbacks.dispatch_watchdog_timeout(gpio, now_tick);
                callbacks.record_edge_tick(gpio, now_tick);
                notify.report_watchdog(now_tick, gpio);
            }
        }
    }
}

/// Runs `poll` on a dedicated thread at `interval`, sleeping to an absolute
/// deadline each iteration rather than `interval` relative to when the last
/// iteration finished, so a slow poll doesn't compound into drift. Stops
/// once `running` is cleared.
pub fn spawn(interval: Duration, running: Arc<AtomicBool>, mut poll: impl FnMut() + Send + 'static) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut deadline = Instant::now();
        while running.load(Ordering::Acquire) {
            poll();
            deadline += interval;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            } else {
                deadline = now;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn notify_registry() -> NotifyRegistry {
        NotifyRegistry::new(PathBuf::from(std::env::temp_dir()))
    }

    #[test]
    fn step_dispatches_an_edge_for_a_monitored_gpio() {
        let mut alert = AlertLoop::new(5);
        let mut callbacks = CallbackRegistry::new();
        let mut notify = notify_registry();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = std::sync::Arc::clone(&seen);
        callbacks.set_edge(3, Some(Box::new(move |gpio, level, _tick| {
            seen_clone.lock().unwrap().push((gpio, level));
        })));

        let levels = [0_u32, 1 << 3, 0, 0];
        let ticks = [1000_u32];
        alert.step(&levels, &ticks, 4, 2, 1010, &mut callbacks, &mut notify);

        let observed = seen.lock().unwrap();
        assert_eq!(*observed, vec![(3, EdgeLevel::High)]);
    }

    #[test]
    fn step_ignores_changes_on_unmonitored_gpios() {
        let mut alert = AlertLoop::new(5);
        let mut callbacks = CallbackRegistry::new();
        let mut notify = notify_registry();
        callbacks.set_edge(3, Some(Box::new(|_, _, _| panic!("should not fire"))));

        let levels = [0_u32, 1 << 7, 0, 0];
        let ticks = [1000_u32];
        alert.step(&levels, &ticks, 4, 2, 1010, &mut callbacks, &mut notify);
    }

    #[test]
    fn watchdog_fires_after_its_timeout_elapses_with_no_edge() {
        let mut alert = AlertLoop::new(5);
        let mut callbacks = CallbackRegistry::new();
        let mut notify = notify_registry();
        callbacks.set_watchdog(2, Some(1));

        let levels = [0_u32];
        let ticks = [0_u32];
        // First poll only primes the watchdog; no edge has ever been seen.
        alert.step(&levels, &ticks, 1, 0, 0, &mut callbacks, &mut notify);

        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = std::sync::Arc::clone(&fired);
        callbacks.set_edge(2, Some(Box::new(move |_, level, _| {
            if level == EdgeLevel::Timeout {
                fired_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        })));

        // 2000us later, past the 1ms (1000us) timeout.
        alert.step(&levels, &ticks, 1, 0, 2000, &mut callbacks, &mut notify);
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn watchdog_does_not_fire_before_its_timeout() {
        let mut alert = AlertLoop::new(5);
        let mut callbacks = CallbackRegistry::new();
        let mut notify = notify_registry();
        callbacks.set_watchdog(2, Some(100));

        let levels = [0_u32];
        let ticks = [0_u32];
        alert.step(&levels, &ticks, 1, 0, 0, &mut callbacks, &mut notify);

        callbacks.set_edge(2, Some(Box::new(|_, _, _| panic!("should not fire yet"))));
        alert.step(&levels, &ticks, 1, 0, 500, &mut callbacks, &mut notify);
    }

    #[test]
    fn sample_callback_is_not_invoked_when_nothing_in_its_bits_changes() {
        let mut alert = AlertLoop::new(5);
        let mut callbacks = CallbackRegistry::new();
        let mut notify = notify_registry();
        let invoked = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let invoked_clone = std::sync::Arc::clone(&invoked);
        callbacks.set_sample(
            Some(Box::new(move |_: &[Sample]| {
                invoked_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            })),
            0xFFFF_FFFF,
        );

        // Every slot in the window holds the same level as the previous
        // sample (all zero), so no monitored bit ever changes and the
        // callback must not fire at all.
        let levels = [0_u32, 0, 0, 0];
        let ticks = [0_u32, 0];
        alert.step(&levels, &ticks, 2, 3, 10, &mut callbacks, &mut notify);
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn sample_callback_batch_only_contains_slots_whose_monitored_bits_changed() {
        let mut alert = AlertLoop::new(5);
        let mut callbacks = CallbackRegistry::new();
        let mut notify = notify_registry();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = std::sync::Arc::clone(&count);
        callbacks.set_sample(
            Some(Box::new(move |samples: &[Sample]| {
                count_clone.store(samples.len(), std::sync::atomic::Ordering::SeqCst);
            })),
            0xFFFF_FFFF,
        );

        // Of the three slots processed (indices 0..3), slot 0 repeats the
        // initial all-zero level and changes nothing; slot 1 (bit 3 set) and
        // slot 2 (bit 3 cleared again) both differ from their predecessor.
        let levels = [0_u32, 1 << 3, 0, 0];
        let ticks = [0_u32, 0];
        alert.step(&levels, &ticks, 2, 3, 10, &mut callbacks, &mut notify);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
