//! INRING: the DMA-backed input sampling ring. A cyclic chain of control
//! blocks walks `C` cycles of `P` pulse slots each. Per cycle the chain
//! writes the cycle's on-mask word to `GPSET0`, captures the free-running
//! system timer into that cycle's tick-slot, then for each pulse slot
//! copies `GPLEV0` into a per-slot sample word (paced by the configured
//! pacing peripheral's DREQ so slots advance exactly one tick apart) and
//! writes that slot's off-mask word to `GPCLR0`. The chain's last control
//! block links back to its first, so once started the ring runs until
//! explicitly stopped.
//!
//! The on-mask and off-mask words default to zero (an anonymous page is
//! zero-filled on allocation) and are otherwise untouched by this module —
//! they exist so a waveform compiler driving repeat-mode software PWM off
//! this same ring has somewhere to stage its set/clear literals, per the
//! ring's own per-cycle invariant. This crate's [`crate::engine`] does not
//! currently wire anything into them (see `DESIGN.md`'s Open Question (e):
//! software PWM/servo here recompiles and sends a waveform on the separate
//! output channel instead), so in practice they stay zero and every
//! on-mask/off-mask write this ring performs is a no-op `GPSET0`/`GPCLR0`
//! write of `0` — harmless, and exactly what the real hardware does when no
//! software PWM is active on any gpio.

use crate::cb::CbArena;
use crate::error::Result;
use crate::pool::Pool;
use crate::regs::dma::{ChannelError, ChannelRegisters, Peripheral, TransferInfo};
use crate::regs::gpio::GPLEV0_OFFSET;
use crate::regs::systimer::CLO_OFFSET;

/// Pulse slots per cycle.
pub const PULSES_PER_CYCLE: usize = 25;

/// One fully linked input sampling cycle's position within the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotIndex {
    pub cycle: usize,
    pub pulse: usize,
}

impl SlotIndex {
    #[must_use]
    pub const fn linear(self) -> usize {
        self.cycle * PULSES_PER_CYCLE + self.pulse
    }

    #[must_use]
    pub const fn from_linear(linear: usize) -> Self {
        Self { cycle: linear / PULSES_PER_CYCLE, pulse: linear % PULSES_PER_CYCLE }
    }
}

/// Per-cycle control block count: one on-mask write, one tick-capture, and
/// one level-sample + off-mask write pair per pulse slot.
#[must_use]
pub const fn cbs_per_cycle() -> usize {
    2 + 2 * PULSES_PER_CYCLE
}

/// Control-block-indexed storage for the input ring, plus the sample/tick
/// words each control block writes into.
/// Level and off-mask words are stored one-per-pulse-slot, `cycles *
/// PULSES_PER_CYCLE` entries apiece; tick and on-mask words are one per
/// cycle. Callers must size `sample_buffer_ms`/`tick_us` so a
/// `cycles * PULSES_PER_CYCLE * 4`-byte page (levels, off-masks) and a
/// `cycles * 4`-byte page (ticks, on-masks) both fit in one
/// [`crate::regs::offset::PAGE_LEN`] page, or extend [`Pool`] to span
/// multiple pages before raising the configured buffer past a few hundred
/// milliseconds.
pub struct InRing {
    cycles: usize,
    /// Linear sample-word storage, one `u32` per pulse slot, `cycles *
    /// PULSES_PER_CYCLE` entries.
    levels: Vec<u32>,
    /// One tick word per cycle.
    ticks: Vec<u32>,
}

impl InRing {
    /// Builds the control block chain for `cycles` cycles inside `arena`,
    /// starting at control block `base`, pacing level-sample transfers off
    /// `pacing` and leaving the tick-capture transfer unpaced (a tick
    /// capture is a register-to-memory copy that should happen as soon as
    /// the cycle begins, not wait a further tick).
    ///
    /// `gpio_bus`/`systimer_bus` are the bus addresses of `GPLEV0` and
    /// `SYST_CLO` respectively; `gpset_bus`/`gpclr_bus` are `GPSET0`/
    /// `GPCLR0` (callers obtain all four once via
    /// [`crate::regs::bus_alias`]). `on_mask_page`/`off_mask_page` back the
    /// per-cycle on-mask and per-pulse off-mask words; both read as zero
    /// until something writes into them (nothing in this crate does yet —
    /// see this module's doc comment).
    ///
    /// # Errors
    /// Returns [`crate::error::Error::TooManyCbs`] if `cycles *
    /// cbs_per_cycle()` exceeds `arena`'s capacity.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        arena: &mut CbArena<'_>,
        base: usize,
        cycles: usize,
        pacing: Peripheral,
        gpio_bus: u32,
        systimer_bus: u32,
        gpset_bus: u32,
        gpclr_bus: u32,
        levels_page: &Pool,
        ticks_page: &Pool,
        on_mask_page: &Pool,
        off_mask_page: &Pool,
    ) -> Result<Self> {
        let needed = cycles * cbs_per_cycle();
        if base + needed > arena.capacity() {
            return Err(crate::error::Error::TooManyCbs);
        }

        for cycle in 0..cycles {
            let cycle_base = base + cycle * cbs_per_cycle();

            let on_pos = cycle_base;
            let on_src = on_mask_page.page(0).bus_addr_at(cycle * 4);
            Self::program_copy(arena, on_pos, on_src, gpset_bus, Peripheral::Unpaced);

            let tick_pos = cycle_base + 1;
            let tick_dest = ticks_page.page(0).bus_addr_at(cycle * 4);
            Self::program_copy(arena, tick_pos, systimer_bus, tick_dest, Peripheral::Unpaced);

            for pulse in 0..PULSES_PER_CYCLE {
                let linear = cycle * PULSES_PER_CYCLE + pulse;
                let level_pos = cycle_base + 2 + pulse * 2;
                let level_dest = levels_page.page(0).bus_addr_at(linear * 4);
                Self::program_copy(arena, level_pos, gpio_bus, level_dest, pacing);

                let off_pos = level_pos + 1;
                let off_src = off_mask_page.page(0).bus_addr_at(linear * 4);
                Self::program_copy(arena, off_pos, off_src, gpclr_bus, Peripheral::Unpaced);
            }
        }

        // Link every control block to the next, wrapping the last back to
        // the first, forming a cyclic chain that runs until explicitly
        // stopped.
        for pos in base..base + needed - 1 {
            arena.link(pos, pos + 1);
        }
        arena.link(base + needed - 1, base);

        Ok(Self { cycles, levels: vec![0; cycles * PULSES_PER_CYCLE], ticks: vec![0; cycles] })
    }

    fn program_copy(arena: &mut CbArena<'_>, pos: usize, src: u32, dest: u32, pacing: Peripheral) {
        let cb = arena.get_mut(pos);
        let ti = TransferInfo::new()
            .with_src_inc(false)
            .with_dest_inc(false)
            .with_dest_dreq(!matches!(pacing, Peripheral::Unpaced))
            .with_permap(pacing)
            .with_wait_resp(true);
        cb.transfer_info = ti;
        cb.src_addr = src;
        cb.dest_addr = dest;
        cb.transfer_len = 4;
        cb.stride = 0;
    }

    /// Number of cycles this ring was built with.
    #[must_use]
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Refreshes this ring's in-memory copy of the sample/tick words from
    /// the backing pages DMA writes into. Called by [`crate::alert`] once
    /// per poll.
    pub fn refresh(&mut self, levels_page: &Pool, ticks_page: &Pool) {
        // SAFETY: both pages are exactly this ring's sample/tick storage,
        // sized by `build`, and never aliased mutably elsewhere.
        let level_words: &[u32] = unsafe { std::slice::from_raw_parts(levels_page.page(0).virt().as_ptr().cast(), self.levels.len()) };
        self.levels.copy_from_slice(level_words);
        // SAFETY: see above.
        let tick_words: &[u32] = unsafe { std::slice::from_raw_parts(ticks_page.page(0).virt().as_ptr().cast(), self.ticks.len()) };
        self.ticks.copy_from_slice(tick_words);
    }

    /// The bank-0 level word sampled at `slot`.
    #[must_use]
    pub fn level_at(&self, slot: SlotIndex) -> u32 {
        self.levels[slot.linear()]
    }

    /// The system-timer-low value captured at the start of `cycle`.
    #[must_use]
    pub fn tick_at(&self, cycle: usize) -> u32 {
        self.ticks[cycle]
    }

    /// Every pulse-slot sample word, in slot-linear order, as refreshed by
    /// the last [`Self::refresh`] call.
    #[must_use]
    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    /// Every cycle's tick word, as refreshed by the last [`Self::refresh`]
    /// call.
    #[must_use]
    pub fn ticks(&self) -> &[u32] {
        &self.ticks
    }

    /// Given a DMA channel's currently-loaded control block position (as a
    /// linear index relative to this ring's `base`), returns the slot that
    /// control block is about to sample — i.e. the ring's current write
    /// head.
    #[must_use]
    pub fn head_slot(&self, current_cb_linear: usize) -> SlotIndex {
        let total = self.cycles * PULSES_PER_CYCLE;
        SlotIndex::from_linear(current_cb_linear.min(total.saturating_sub(1)))
    }
}

/// Converts a control block's position within the ring (relative to the
/// ring's own `base`, i.e. the value [`ChannelRegisters::current_cb`] gives
/// once translated out of a bus address) into the pulse-slot-linear index
/// [`crate::alert::AlertLoop::step`] expects. One cycle spans
/// `cbs_per_cycle()` control blocks: the first two are the unpaced on-mask
/// write and tick-capture, neither of which corresponds to any pulse slot
/// by itself — DMA sits there for an instant between cycles — so both map
/// to the first slot of their cycle, same as having just finished the
/// previous cycle's last slot. Every later pair is a paced level-read
/// followed by its off-mask write; both halves of a pair map to that
/// pulse's slot.
#[must_use]
pub const fn slot_linear_from_cb(cb_linear: usize) -> usize {
    let per_cycle = cbs_per_cycle();
    let cycle = cb_linear / per_cycle;
    let within = cb_linear % per_cycle;
    let pulse = if within <= 1 { 0 } else { (within - 2) / 2 };
    cycle * PULSES_PER_CYCLE + pulse
}

/// Starts the ring's DMA channel pointed at control block `base`'s bus
/// address, clearing any stale latched error first.
pub fn start(channel: &ChannelRegisters, base_bus_addr: u32) {
    channel.reset();
    channel.start(base_bus_addr);
}

/// Checks and clears the channel's latched DMA error, if any.
pub fn take_error(channel: &ChannelRegisters) -> Option<ChannelError> {
    channel.take_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmap::FakeMap;

    #[test]
    fn build_programs_cbs_per_cycle_control_blocks_per_cycle() {
        let map = FakeMap::new();
        let mut cb_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let levels_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let ticks_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let on_mask_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let off_mask_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let mut arena = CbArena::new(&mut cb_pool);
        let ring = InRing::build(
            &mut arena,
            0,
            3,
            Peripheral::PacingPcmTx,
            0x7E20_0034,
            0x7E00_3004,
            0x7E20_001C,
            0x7E20_0028,
            &levels_pool,
            &ticks_pool,
            &on_mask_pool,
            &off_mask_pool,
        )
        .unwrap();
        assert_eq!(ring.cycles(), 3);
        assert!(arena.capacity() >= 3 * cbs_per_cycle());
        // Last CB of the whole ring wraps back to the first.
        let first_bus = arena.bus_addr(0);
        assert_eq!(arena.get(3 * cbs_per_cycle() - 1).next_block_addr, first_bus);
    }

    #[test]
    fn build_wires_on_mask_cb_to_gpset0_and_off_mask_cb_to_gpclr0() {
        let map = FakeMap::new();
        let mut cb_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let levels_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let ticks_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let on_mask_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let off_mask_pool = Pool::allocate(&map, 1, 4096).unwrap();
        let mut arena = CbArena::new(&mut cb_pool);
        InRing::build(
            &mut arena,
            0,
            1,
            Peripheral::PacingPcmTx,
            0x7E20_0034,
            0x7E00_3004,
            0x7E20_001C,
            0x7E20_0028,
            &levels_pool,
            &ticks_pool,
            &on_mask_pool,
            &off_mask_pool,
        )
        .unwrap();
        assert_eq!(arena.get(0).dest_addr, 0x7E20_001C);
        // First pulse slot's off-mask write is the fourth CB in the cycle
        // (on-mask, tick, paced read, off-mask).
        assert_eq!(arena.get(3).dest_addr, 0x7E20_0028);
    }

    #[test]
    fn slot_index_round_trips_through_linear() {
        let slot = SlotIndex { cycle: 3, pulse: 7 };
        let linear = slot.linear();
        assert_eq!(SlotIndex::from_linear(linear), slot);
    }

    #[test]
    fn slot_index_wraps_pulse_within_cycle() {
        let linear = PULSES_PER_CYCLE * 2 + 4;
        let slot = SlotIndex::from_linear(linear);
        assert_eq!(slot.cycle, 2);
        assert_eq!(slot.pulse, 4);
    }

    #[test]
    fn slot_linear_from_cb_maps_on_mask_and_tick_cb_to_its_cycles_first_slot() {
        let cycle_base = 2 * cbs_per_cycle();
        assert_eq!(slot_linear_from_cb(cycle_base), 2 * PULSES_PER_CYCLE);
        assert_eq!(slot_linear_from_cb(cycle_base + 1), 2 * PULSES_PER_CYCLE);
    }

    #[test]
    fn slot_linear_from_cb_maps_pulse_cb_to_the_slot_it_just_sampled() {
        let cycle_base = cbs_per_cycle();
        // First pulse slot's paced level-read and off-mask write both map
        // to pulse 0 of this cycle.
        assert_eq!(slot_linear_from_cb(cycle_base + 2), PULSES_PER_CYCLE);
        assert_eq!(slot_linear_from_cb(cycle_base + 3), PULSES_PER_CYCLE);
        // Last pulse slot's pair maps to the cycle's final pulse.
        let last_pair = cycle_base + 2 + (PULSES_PER_CYCLE - 1) * 2;
        assert_eq!(slot_linear_from_cb(last_pair), PULSES_PER_CYCLE + PULSES_PER_CYCLE - 1);
        assert_eq!(slot_linear_from_cb(last_pair + 1), PULSES_PER_CYCLE + PULSES_PER_CYCLE - 1);
    }
}
