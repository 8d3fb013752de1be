//! OUTRING: compiles a [`crate::wave::Waveform`]'s pulse train into a
//! control block chain that raises/lowers GPIO banks and paces between
//! pulses via DREQ, then links the chain either back to its own start
//! (repeat) or to a sentinel "stop" control block (one-shot).
//!
//! Each [`crate::wave::Pulse`] becomes up to three control blocks: a
//! `GPSET0` write if `gpio_on` is non-zero, a `GPCLR0` write if `gpio_off`
//! is non-zero, and exactly one paced "wait one tick" register-to-register
//! copy that burns `us_delay / tick_us` ticks before the chain advances.
//! [`DelayTicks`] sizes that one transfer to consume many ticks at once
//! rather than expanding the delay into that many control blocks up
//! front, since OUTRING's bound on control blocks
//! ([`crate::error::Error::TooManyCbs`]) is scarce.
//!
//! A `GPSET0`/`GPCLR0` control block has no field for an immediate value,
//! so the literal mask each one writes is staged into the "output page"'s
//! pre-staged on/off-mask words, indexed one-to-one with the control
//! block that reads it; [`MaskArena`] is that staging area, laid out over
//! a [`Pool`] the same way [`CbArena`] lays control blocks out.

use crate::cb::CbArena;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::regs::dma::{ChannelRegisters, Peripheral, TransferInfo};
use crate::wave::Waveform;

/// Whether a compiled waveform's chain loops back to its start or halts
/// after one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    OneShot,
    Repeat,
}

/// How many ticks a delay control block must wait, expressed as a transfer
/// length in 4-byte words against the pacing DREQ: each paced 4-byte
/// transfer consumes exactly one tick, so a delay of `n` ticks becomes one
/// control block whose `transfer_len` is `4 * n` bytes read from (and
/// discarded back into) a scratch word.
struct DelayTicks(u32);

impl DelayTicks {
    /// Rounds `us_delay` to the nearest whole tick (half a tick rounds up),
    /// clamped to at least one tick since a zero-length delay CB would
    /// never unblock.
    fn from_micros(us_delay: u32, tick_us: u32) -> Self {
        Self(((us_delay * 2 + tick_us) / (tick_us * 2)).max(1))
    }
}

/// A linear arena of 4-byte mask words backed by a [`Pool`], indexed
/// identically to the [`CbArena`] that shares the same control block
/// position, so "control block `pos`'s immediate mask" is always
/// `MaskArena::get/set(pos)`.
struct MaskArena<'p> {
    pool: &'p mut Pool,
    words_per_page: usize,
}

impl<'p> MaskArena<'p> {
    fn new(pool: &'p mut Pool) -> Self {
        let words_per_page = pool.page_len() / std::mem::size_of::<u32>();
        Self { pool, words_per_page }
    }

    fn capacity(&self) -> usize {
        self.pool.len() * self.words_per_page
    }

    fn locate(&self, pos: usize) -> (usize, usize) {
        (pos / self.words_per_page, pos % self.words_per_page)
    }

    fn bus_addr(&self, pos: usize) -> u32 {
        let (page, slot) = self.locate(pos);
        #[allow(clippy::cast_possible_truncation)]
        let byte_offset = slot * std::mem::size_of::<u32>();
        self.pool.page(page).bus_addr_at(byte_offset)
    }

    fn set(&mut self, pos: usize, value: u32) {
        let (page, slot) = self.locate(pos);
        // SAFETY: each page holds `words_per_page` contiguous `u32`s;
        // `slot < words_per_page` by `locate`.
        let words: &mut [u32] = unsafe { self.pool.page_mut(page).as_mut_typed() };
        words[slot] = value;
    }
}

/// A compiled waveform: the bus address of its first control block (what
/// to load into a DMA channel's `CONBLK_AD` to transmit it) and how many
/// control blocks it occupies.
pub struct CompiledWave {
    pub start_bus_addr: u32,
    pub cb_count: usize,
}

/// Compiles `waveform` into `arena` starting at control block `base`,
/// pacing delay transfers off `pacing`, reading/writing the scratch word at
/// `scratch_bus` for delay control blocks, staging set/clear literals into
/// `masks` starting at `mask_base` (one mask word per bank-write control
/// block, in the same relative order as `arena`, but not necessarily at the
/// same absolute position — `masks` is normally a much smaller, dedicated
/// pool, while `arena`'s output region may sit at a large offset into a pool
/// shared with INRING), and setting/clearing banks via `gpset_bus`/`gpclr_bus`.
///
/// # Errors
/// Returns [`Error::TooManyCbs`] if the waveform needs more control blocks
/// or mask slots than `arena`/`masks` has room for starting at `base`/
/// `mask_base`, and [`Error::EmptyWaveform`] if the waveform compiles to
/// zero control blocks (a waveform of all-zero pulses). A pulse whose delay
/// is shorter than one tick is not an error: per spec, delays under one tick
/// are clamped up to a single tick by [`DelayTicks::from_micros`] rather than
/// rejected.
#[allow(clippy::too_many_arguments)]
pub fn compile(
    arena: &mut CbArena<'_>,
    masks: &mut Pool,
    base: usize,
    mask_base: usize,
    waveform: &Waveform,
    tick_us: u32,
    mode: TxMode,
    pacing: Peripheral,
    gpset_bus: u32,
    gpclr_bus: u32,
    scratch_bus: u32,
) -> Result<CompiledWave> {
    let mut mask_arena = MaskArena::new(masks);
    let mut pos = base;
    let mut mask_pos = mask_base;

    for pulse in waveform.pulses() {
        if pulse.gpio_on != 0 {
            if pos >= arena.capacity() || mask_pos >= mask_arena.capacity() {
                return Err(Error::TooManyCbs);
            }
            program_bank_write(arena, &mut mask_arena, pos, mask_pos, gpset_bus, pulse.gpio_on);
            pos += 1;
            mask_pos += 1;
        }
        if pulse.gpio_off != 0 {
            if pos >= arena.capacity() || mask_pos >= mask_arena.capacity() {
                return Err(Error::TooManyCbs);
            }
            program_bank_write(arena, &mut mask_arena, pos, mask_pos, gpclr_bus, pulse.gpio_off);
            pos += 1;
            mask_pos += 1;
        }

        if pos >= arena.capacity() {
            return Err(Error::TooManyCbs);
        }
        let ticks = DelayTicks::from_micros(pulse.us_delay, tick_us);
        program_delay(arena, pos, scratch_bus, pacing, ticks);
        pos += 1;
    }

    let cb_count = pos - base;
    if cb_count == 0 {
        return Err(Error::EmptyWaveform);
    }

    match mode {
        TxMode::Repeat => {
            for i in base..pos - 1 {
                arena.link(i, i + 1);
            }
            arena.link(pos - 1, base);
        }
        TxMode::OneShot => {
            for i in base..pos - 1 {
                arena.link(i, i + 1);
            }
            arena.terminate(pos - 1);
        }
    }

    Ok(CompiledWave { start_bus_addr: arena.bus_addr(base), cb_count })
}

fn program_bank_write(
    arena: &mut CbArena<'_>,
    masks: &mut MaskArena<'_>,
    pos: usize,
    mask_pos: usize,
    dest: u32,
    mask: u32,
) {
    masks.set(mask_pos, mask);
    let mask_bus = masks.bus_addr(mask_pos);
    let cb = arena.get_mut(pos);
    cb.transfer_info = TransferInfo::new()
        .with_src_inc(false)
        .with_dest_inc(false)
        .with_permap(Peripheral::Unpaced)
        .with_wait_resp(true);
    cb.src_addr = mask_bus;
    cb.dest_addr = dest;
    cb.transfer_len = 4;
}

fn program_delay(arena: &mut CbArena<'_>, pos: usize, scratch: u32, pacing: Peripheral, ticks: DelayTicks) {
    let cb = arena.get_mut(pos);
    cb.transfer_info = TransferInfo::new()
        .with_src_inc(false)
        .with_dest_inc(false)
        .with_dest_dreq(true)
        .with_permap(pacing)
        .with_wait_resp(true);
    cb.src_addr = scratch;
    cb.dest_addr = scratch;
    cb.transfer_len = 4 * ticks.0;
}

/// Stops the channel currently transmitting a waveform.
pub fn stop(channel: &ChannelRegisters) {
    channel.reset();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cb::CbArena;
    use crate::pmap::FakeMap;
    use crate::pool::Pool;
    use crate::wave::{Pulse, WaveStore};

    fn build_waveform() -> Waveform {
        let mut store = WaveStore::new();
        store
            .add_generic(&[Pulse { gpio_on: 1, gpio_off: 0, us_delay: 10 }, Pulse { gpio_on: 0, gpio_off: 1, us_delay: 10 }])
            .unwrap();
        let id = store.create().unwrap();
        store.get(id).unwrap().clone()
    }

    #[test]
    fn one_shot_chain_terminates_at_last_cb() {
        let map = FakeMap::new();
        let mut pool = Pool::allocate(&map, 1, 4096).unwrap();
        let mut masks = Pool::allocate(&map, 1, 4096).unwrap();
        let mut arena = CbArena::new(&mut pool);
        let waveform = build_waveform();
        let compiled = compile(
            &mut arena,
            &mut masks,
            0,
            0,
            &waveform,
            5,
            TxMode::OneShot,
            Peripheral::PacingPcmTx,
            0x7E20_001C,
            0x7E20_0028,
            0x7E20_0000,
        )
        .unwrap();
        assert!(compiled.cb_count > 0);
        assert_eq!(arena.get(compiled.cb_count - 1).next_block_addr, 0);
    }

    #[test]
    fn repeat_chain_wraps_to_start() {
        let map = FakeMap::new();
        let mut pool = Pool::allocate(&map, 1, 4096).unwrap();
        let mut masks = Pool::allocate(&map, 1, 4096).unwrap();
        let mut arena = CbArena::new(&mut pool);
        let waveform = build_waveform();
        let compiled = compile(
            &mut arena,
            &mut masks,
            0,
            0,
            &waveform,
            5,
            TxMode::Repeat,
            Peripheral::PacingPcmTx,
            0x7E20_001C,
            0x7E20_0028,
            0x7E20_0000,
        )
        .unwrap();
        let expected = arena.bus_addr(0);
        assert_eq!(arena.get(compiled.cb_count - 1).next_block_addr, expected);
    }

    #[test]
    fn bank_write_cb_sources_from_its_staged_mask_word() {
        let map = FakeMap::new();
        let mut pool = Pool::allocate(&map, 1, 4096).unwrap();
        let mut masks = Pool::allocate(&map, 1, 4096).unwrap();
        let mut arena = CbArena::new(&mut pool);
        let waveform = build_waveform();
        compile(
            &mut arena,
            &mut masks,
            0,
            0,
            &waveform,
            5,
            TxMode::OneShot,
            Peripheral::PacingPcmTx,
            0x7E20_001C,
            0x7E20_0028,
            0x7E20_0000,
        )
        .unwrap();
        // First pulse is (gpio_on: 1, gpio_off: 0, delay: 10), so control
        // block 0 is the GPSET0 write and must source from mask slot 0.
        let mut mask_arena = MaskArena::new(&mut masks);
        assert_eq!(arena.get(0).src_addr, mask_arena.bus_addr(0));
    }

    #[test]
    fn clamps_pulses_shorter_than_one_tick_to_a_single_tick() {
        let map = FakeMap::new();
        let mut pool = Pool::allocate(&map, 1, 4096).unwrap();
        let mut masks = Pool::allocate(&map, 1, 4096).unwrap();
        let mut arena = CbArena::new(&mut pool);
        let mut store = WaveStore::new();
        store.add_generic(&[Pulse { gpio_on: 1, gpio_off: 0, us_delay: 1 }]).unwrap();
        let id = store.create().unwrap();
        let waveform = store.get(id).unwrap().clone();
        let compiled = compile(&mut arena, &mut masks, 0, 0, &waveform, 5, TxMode::OneShot, Peripheral::PacingPcmTx, 0, 0, 0)
            .unwrap();
        // The bank-write CB (gpio_on != 0) plus one delay CB, clamped up to
        // one tick's worth (4 bytes) rather than rejected.
        assert_eq!(compiled.cb_count, 2);
        assert_eq!(arena.get(1).transfer_len, 4);
    }
}
