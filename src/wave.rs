//! WAVE: the waveform store. Callers append [`Pulse`]s to a pending
//! waveform with [`WaveStore::add_generic`] or [`WaveStore::add_serial`],
//! then [`WaveStore::create`] compiles the pending pulse train into a
//! numbered, replayable waveform; [`crate::outring`] later turns that
//! pulse train into a control block chain.
//!
//! The merge and bit-timing arithmetic is exact rather than approximated:
//! a real receiver on the other end of the wire expects the pulse-level
//! schedule to land on specific microsecond boundaries.

use crate::error::{Error, Result};

/// Numeric handle returned by [`WaveStore::create`].
pub type WaveId = u32;

/// One (on-mask, off-mask, delay) step of a waveform. `gpio_on`/`gpio_off`
/// are bank-0 bitmasks (bit N = GPIO N); a pulse should not set the same
/// bit in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pulse {
    pub gpio_on: u32,
    pub gpio_off: u32,
    pub us_delay: u32,
}

/// Blocks of pulse storage reserved per waveform slot, mirroring
/// `PI_WAVE_BLOCKS`.
const WAVE_BLOCKS: usize = 4;
/// Upper bound on pulses in one pending waveform (`PI_WAVE_MAX_PULSES`).
pub const MAX_PULSES: usize = WAVE_BLOCKS * 3000;
/// Upper bound on characters in one `add_serial` call (`PI_WAVE_MAX_CHARS`).
pub const MAX_CHARS: usize = WAVE_BLOCKS * 256;
/// Upper bound on a serial offset, half an hour in microseconds
/// (`PI_WAVE_MAX_MICROS`).
pub const MAX_OFFSET_MICROS: u32 = 30 * 60 * 1_000_000;
/// Lowest baud rate `add_serial` accepts (`PI_WAVE_MIN_BAUD`).
pub const MIN_BAUD: u32 = 100;
/// Highest baud rate `add_serial` accepts (`PI_WAVE_MAX_BAUD`).
pub const MAX_BAUD: u32 = 250_000;
/// Maximum number of simultaneously created waveforms (`PI_MAX_WAVES`).
pub const MAX_WAVES: usize = 512;

/// A compiled, replayable waveform: an ordered, non-empty pulse train.
#[derive(Debug, Clone)]
pub struct Waveform {
    pulses: Vec<Pulse>,
}

impl Waveform {
    #[must_use]
    pub fn pulses(&self) -> &[Pulse] {
        &self.pulses
    }

    /// Total duration of one pass through this waveform, in microseconds.
    #[must_use]
    pub fn duration_micros(&self) -> u64 {
        self.pulses.iter().map(|p| u64::from(p.us_delay)).sum()
    }
}

/// Merges pulse trains `a` and `b`, both already in the tick-sorted form
/// [`WaveStore`] always produces, into one tick-sorted train. Ported from
/// `waveMerge`: walks both inputs by cumulative delay, OR-ing the on/off
/// masks of pulses that land on the same tick and extending the previous
/// output pulse's delay to bridge gaps, rather than emitting a zero-length
/// pulse.
///
/// # Errors
/// Returns [`Error::TooManyPulses`] if the merged result would exceed
/// [`MAX_PULSES`].
pub fn merge_generic(a: &[Pulse], b: &[Pulse]) -> Result<Vec<Pulse>> {
    let mut out: Vec<Pulse> = Vec::new();
    let (mut pos_a, mut pos_b) = (0_usize, 0_usize);
    let mut now: u64 = 0;
    let mut next_a: i64 = if a.is_empty() { -1 } else { 0 };
    let mut next_b: i64 = if b.is_empty() { -1 } else { 0 };

    while (pos_a < a.len() || pos_b < b.len()) && out.len() < MAX_PULSES {
        let (on, off);
        if next_a != -1 && (next_b == -1 || next_a < next_b) {
            extend_gap(&mut out, &mut now, next_a as u64);
            on = a[pos_a].gpio_on;
            off = a[pos_a].gpio_off;
            next_a = now as i64 + i64::from(a[pos_a].us_delay);
            pos_a += 1;
        } else if next_b != -1 && (next_a == -1 || next_b < next_a) {
            extend_gap(&mut out, &mut now, next_b as u64);
            on = b[pos_b].gpio_on;
            off = b[pos_b].gpio_off;
            next_b = now as i64 + i64::from(b[pos_b].us_delay);
            pos_b += 1;
        } else {
            extend_gap(&mut out, &mut now, next_a as u64);
            on = a[pos_a].gpio_on | b[pos_b].gpio_on;
            off = a[pos_a].gpio_off | b[pos_b].gpio_off;
            next_a = now as i64 + i64::from(a[pos_a].us_delay);
            next_b = now as i64 + i64::from(b[pos_b].us_delay);
            pos_a += 1;
            pos_b += 1;
        }

        let next_due = match (next_a, next_b) {
            (x, y) if x == -1 => y,
            (x, y) if y == -1 => x,
            (x, y) => x.min(y),
        };
        #[allow(clippy::cast_sign_loss)]
        let delay = (next_due as u64).saturating_sub(now);
        now = next_due as u64;
        out.push(Pulse { gpio_on: on, gpio_off: off, us_delay: delay as u32 });

        if pos_a >= a.len() {
            next_a = -1;
        }
        if pos_b >= b.len() {
            next_b = -1;
        }
    }

    if out.len() >= MAX_PULSES && (pos_a < a.len() || pos_b < b.len()) {
        return Err(Error::TooManyPulses);
    }
    Ok(out)
}

fn extend_gap(out: &mut [Pulse], now: &mut u64, due: u64) {
    if *now < due {
        if let Some(last) = out.last_mut() {
            last.us_delay += (due - *now) as u32;
        }
        *now = due;
    }
}

/// Per-bit delays (in hundredths of a microsecond's worth of rounding
/// headroom collapsed away, see below) for one UART character at `baud`:
/// index 0 is the pre-start-bit idle/offset delay, 1..=8 are the eight data
/// bit periods, 9 is the stop bit period. Ported arithmetic-for-arithmetic
/// from `waveBitDelay`, which rounds bit boundaries to the nearest 2 µs to
/// land on tick boundaries without accumulating drift across a character.
#[must_use]
pub fn bit_delay(baud: u32) -> [u32; 10] {
    let full_bit = 100_000_000 / baud;
    let half_bit = 50_000_000 / baud;
    let d = (full_bit / 200) * 200;

    let mut delay = [0_u32; 10];
    let mut s;
    let mut e = d;
    delay[0] = d / 100;

    let err = d / 3;
    for i in 0..8_u32 {
        s = e;
        let m = half_bit + (i + 1) * full_bit;
        e = s + d;
        if e.saturating_sub(m) < err {
            e += 200;
        }
        delay[(i + 1) as usize] = (e - s) / 100;
    }

    s = e;
    e = ((1_000_000_000 / baud) + 100) / 200 * 200;
    delay[9] = (e - s) / 100;
    delay
}

/// Synthesizes the 8-N-1 serial pulse train for `data` on `gpio` at `baud`,
/// idling high for `offset` microseconds (or one bit period, whichever is
/// longer) before the first start bit. Ported from `gpioWaveAddSerial`:
/// consecutive same-level bits within a character are folded into one
/// pulse's delay rather than emitted as separate zero-change pulses.
///
/// Highest gpio a pulse's bank-0 mask can address (`gpio_on`/`gpio_off` are
/// both 32-bit bank-0 masks, so a gpio at or above this would overflow the
/// shift that builds the mask).
const MAX_BANK0_GPIO: u32 = 31;

/// # Errors
/// Returns [`Error::BadGpio`] if `gpio` is outside bank 0 (0..=31),
/// [`Error::BadWaveBaud`] if `baud` is outside [`MIN_BAUD`]..=[`MAX_BAUD`],
/// [`Error::TooManyChars`] if `data.len()` exceeds [`MAX_CHARS`], or
/// [`Error::BadSerialOffset`] if `offset` exceeds [`MAX_OFFSET_MICROS`].
pub fn serial_pulses(gpio: u32, baud: u32, offset: u32, data: &[u8]) -> Result<Vec<Pulse>> {
    if gpio > MAX_BANK0_GPIO {
        return Err(Error::BadGpio(gpio));
    }
    if !(MIN_BAUD..=MAX_BAUD).contains(&baud) {
        return Err(Error::BadWaveBaud(baud));
    }
    if data.len() > MAX_CHARS {
        return Err(Error::TooManyChars);
    }
    if offset > MAX_OFFSET_MICROS {
        return Err(Error::BadSerialOffset);
    }
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let delays = bit_delay(baud);
    let mask = 1_u32 << gpio;
    let mut pulses: Vec<Pulse> = Vec::new();

    pulses.push(Pulse {
        gpio_on: mask,
        gpio_off: 0,
        us_delay: offset.max(delays[0]),
    });

    for &byte in data {
        pulses.push(Pulse { gpio_on: 0, gpio_off: mask, us_delay: delays[0] });
        let mut level_high = false;

        for bit in 0..8 {
            let bit_high = byte & (1 << bit) != 0;
            if bit_high == level_high {
                if let Some(last) = pulses.last_mut() {
                    last.us_delay += delays[bit + 1];
                }
            } else {
                level_high = bit_high;
                let (on, off) = if level_high { (mask, 0) } else { (0, mask) };
                pulses.push(Pulse { gpio_on: on, gpio_off: off, us_delay: delays[bit + 1] });
            }
        }

        if level_high {
            if let Some(last) = pulses.last_mut() {
                last.us_delay += delays[9];
            }
        } else {
            pulses.push(Pulse { gpio_on: mask, gpio_off: 0, us_delay: delays[9] });
        }
    }

    Ok(pulses)
}

/// Fixed-size table of created waveforms plus one pending (not-yet-created)
/// pulse train, double-buffered so a caller can keep building the next
/// waveform while a previous one is still transmitting.
pub struct WaveStore {
    pending: Vec<Pulse>,
    slots: Vec<Option<Waveform>>,
}

impl WaveStore {
    #[must_use]
    pub fn new() -> Self {
        Self { pending: Vec::new(), slots: Vec::new() }
    }

    /// Merges `pulses` into the pending waveform.
    ///
    /// # Errors
    /// Returns [`Error::TooManyPulses`] if `pulses` exceeds [`MAX_PULSES`]
    /// on its own, or if the merged result would.
    pub fn add_generic(&mut self, pulses: &[Pulse]) -> Result<()> {
        if pulses.len() > MAX_PULSES {
            return Err(Error::TooManyPulses);
        }
        self.pending = merge_generic(&self.pending, pulses)?;
        Ok(())
    }

    /// Synthesizes a serial pulse train and merges it into the pending
    /// waveform.
    ///
    /// # Errors
    /// See [`serial_pulses`] and [`Self::add_generic`].
    pub fn add_serial(&mut self, gpio: u32, baud: u32, offset: u32, data: &[u8]) -> Result<()> {
        let pulses = serial_pulses(gpio, baud, offset, data)?;
        self.add_generic(&pulses)
    }

    /// Compiles the pending pulse train into a numbered waveform, clearing
    /// the pending train for the next caller, and returns its id.
    ///
    /// Waveform ids are assigned like a stack: a new id is always one past
    /// the current highest, never a hole left by [`Self::delete`], since
    /// the compiled chain occupies OUTRING space contiguously with every id
    /// below it.
    ///
    /// # Errors
    /// Returns [`Error::EmptyWaveform`] if nothing has been added since the
    /// last `create`, or [`Error::TooManyWaves`] if [`MAX_WAVES`] ids are
    /// already retained.
    pub fn create(&mut self) -> Result<WaveId> {
        if self.pending.is_empty() {
            return Err(Error::EmptyWaveform);
        }
        if self.slots.len() >= MAX_WAVES {
            return Err(Error::TooManyWaves);
        }
        let pulses = std::mem::take(&mut self.pending);
        self.slots.push(Some(Waveform { pulses }));
        Ok((self.slots.len() - 1) as WaveId)
    }

    /// Looks up a previously created waveform.
    #[must_use]
    pub fn get(&self, id: WaveId) -> Option<&Waveform> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    /// Drops waveform `id` and every id above it: since ids occupy OUTRING
    /// CB space contiguously in creation order, freeing a middle id without
    /// also freeing everything compiled after it would leave those later
    /// chains' CBs unreachable from any retained id while still pinned in
    /// the pool.
    ///
    /// # Errors
    /// Returns [`Error::BadWaveId`] if `id` was never created.
    pub fn delete(&mut self, id: WaveId) -> Result<()> {
        let index = id as usize;
        if self.slots.get(index).map(Option::is_some) != Some(true) {
            return Err(Error::BadWaveId);
        }
        self.slots.truncate(index);
        Ok(())
    }
}

impl Default for WaveStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_total_duration_matches_the_longer_train() {
        let a = vec![Pulse { gpio_on: 1, gpio_off: 0, us_delay: 10 }];
        let b = vec![
            Pulse { gpio_on: 2, gpio_off: 0, us_delay: 5 },
            Pulse { gpio_on: 0, gpio_off: 2, us_delay: 15 },
        ];
        let merged = merge_generic(&a, &b).unwrap();
        let total: u32 = merged.iter().map(|p| p.us_delay).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn merge_ors_masks_of_simultaneous_pulses() {
        let a = vec![Pulse { gpio_on: 1, gpio_off: 0, us_delay: 5 }];
        let b = vec![Pulse { gpio_on: 2, gpio_off: 0, us_delay: 5 }];
        let merged = merge_generic(&a, &b).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].gpio_on, 0b11);
    }

    #[test]
    fn delete_drops_the_given_id_and_every_id_above_it() {
        let mut store = WaveStore::new();
        store.add_generic(&[Pulse { gpio_on: 1, gpio_off: 0, us_delay: 100 }]).unwrap();
        let first = store.create().unwrap();
        store.add_generic(&[Pulse { gpio_on: 2, gpio_off: 0, us_delay: 50 }]).unwrap();
        let second = store.create().unwrap();
        store.add_generic(&[Pulse { gpio_on: 4, gpio_off: 0, us_delay: 50 }]).unwrap();
        let third = store.create().unwrap();

        store.delete(second).unwrap();
        assert!(store.get(first).is_some());
        assert!(store.get(second).is_none());
        assert!(store.get(third).is_none());
    }

    #[test]
    fn delete_unknown_id_is_an_error() {
        let mut store = WaveStore::new();
        assert_eq!(store.delete(0), Err(Error::BadWaveId));
    }

    #[test]
    fn deleting_the_lowest_id_resets_the_stack_to_empty() {
        let mut store = WaveStore::new();
        store.add_generic(&[Pulse { gpio_on: 1, gpio_off: 0, us_delay: 100 }]).unwrap();
        let first = store.create().unwrap();
        store.delete(first).unwrap();

        store.add_generic(&[Pulse { gpio_on: 2, gpio_off: 0, us_delay: 50 }]).unwrap();
        let next = store.create().unwrap();
        assert_eq!(next, first);
    }

    #[test]
    fn create_without_pending_pulses_is_an_error() {
        let mut store = WaveStore::new();
        assert_eq!(store.create(), Err(Error::EmptyWaveform));
    }

    #[test]
    fn serial_pulses_rejects_out_of_range_baud() {
        assert_eq!(serial_pulses(4, 50, 0, b"a").unwrap_err(), Error::BadWaveBaud(50));
        assert_eq!(serial_pulses(4, 300_000, 0, b"a").unwrap_err(), Error::BadWaveBaud(300_000));
    }

    #[test]
    fn serial_pulses_round_trip_bit_pattern() {
        // One byte, 9600 baud: the pulse train must start with an idle-high
        // pulse, then a start bit pulling the line low.
        let pulses = serial_pulses(4, 9600, 0, b"\x55").unwrap();
        assert!(!pulses.is_empty());
        assert_eq!(pulses[0].gpio_on, 1 << 4);
        assert_eq!(pulses[1].gpio_off, 1 << 4);
    }

    #[test]
    fn serial_pulses_empty_data_produces_nothing() {
        assert_eq!(serial_pulses(4, 9600, 0, &[]).unwrap(), Vec::new());
    }
}
