//! Arena-indexed DMA control block storage shared by INRING and OUTRING.
//!
//! Control blocks are addressed by a linear position `0..NUM_CBS` split
//! into `page = pos / CBS_PER_PAGE, slot = pos % CBS_PER_PAGE`, with a
//! pointer cast into the right DMA page. [`CbArena`] is that same scheme,
//! but `pos` (a plain `usize`) stands in for the pointer: control blocks
//! form a cyclic singly-linked structure (INRING wraps its last cycle back
//! to its first), which is straightforward to express as index arithmetic
//! over a backing [`Pool`] and awkward to express as safe Rust references.

use crate::regs::dma::ControlBlock;

/// Number of [`ControlBlock`]s that fit in one page of the backing pool.
#[must_use]
pub const fn cbs_per_page(page_len: usize) -> usize {
    page_len / std::mem::size_of::<ControlBlock>()
}

/// A linear arena of control blocks backed by a [`crate::pool::Pool`].
/// `pos` is stable for the arena's lifetime and is what INRING/OUTRING
/// store as "the next control block to run".
pub struct CbArena<'p> {
    pool: &'p mut crate::pool::Pool,
    cbs_per_page: usize,
}

impl<'p> CbArena<'p> {
    /// Wraps `pool` as a control block arena. Every page in `pool` is
    /// treated as CB storage; callers that need separate CB and sample
    /// storage should use two pools (INRING does).
    #[must_use]
    pub fn new(pool: &'p mut crate::pool::Pool) -> Self {
        let cbs_per_page = cbs_per_page(pool.page_len());
        Self { pool, cbs_per_page }
    }

    /// Total number of control block slots available.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.pool.len() * self.cbs_per_page
    }

    fn locate(&self, pos: usize) -> (usize, usize) {
        (pos / self.cbs_per_page, pos % self.cbs_per_page)
    }

    /// Bus address of control block `pos`, suitable for writing into
    /// another control block's `NEXTCONBK` or a DMA channel's `CONBLK_AD`.
    #[must_use]
    pub fn bus_addr(&self, pos: usize) -> u32 {
        let (page, slot) = self.locate(pos);
        #[allow(clippy::cast_possible_truncation)]
        let byte_offset = slot * std::mem::size_of::<ControlBlock>();
        self.pool.page(page).bus_addr_at(byte_offset)
    }

    /// Immutable view of control block `pos`.
    #[must_use]
    pub fn get(&mut self, pos: usize) -> &ControlBlock {
        let (page, slot) = self.locate(pos);
        // SAFETY: each page holds `cbs_per_page` contiguous, 32-byte
        // aligned `ControlBlock`s; `slot < cbs_per_page` by `locate`.
        let cbs: &mut [ControlBlock] = unsafe { self.pool.page_mut(page).as_mut_typed() };
        &cbs[slot]
    }

    /// Mutable view of control block `pos`, for programming a transfer.
    pub fn get_mut(&mut self, pos: usize) -> &mut ControlBlock {
        let (page, slot) = self.locate(pos);
        // SAFETY: see `get`.
        let cbs: &mut [ControlBlock] = unsafe { self.pool.page_mut(page).as_mut_typed() };
        &mut cbs[slot]
    }

    /// Wires control block `pos`'s `NEXTCONBK` to control block `next`,
    /// the one primitive every ring-building routine needs.
    pub fn link(&mut self, pos: usize, next: usize) {
        let next_addr = self.bus_addr(next);
        self.get_mut(pos).next_block_addr = next_addr;
    }

    /// Zeroes `NEXTCONBK`, halting DMA if it ever loads this block.
    pub fn terminate(&mut self, pos: usize) {
        self.get_mut(pos).next_block_addr = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmap::FakeMap;
    use crate::pool::Pool;

    #[test]
    fn linked_blocks_point_at_each_others_bus_address() {
        let map = FakeMap::new();
        let mut pool = Pool::allocate(&map, 1, 4096).unwrap();
        let mut arena = CbArena::new(&mut pool);
        assert!(arena.capacity() >= 2);
        arena.link(0, 1);
        let expected = arena.bus_addr(1);
        assert_eq!(arena.get(0).next_block_addr, expected);
    }

    #[test]
    fn terminate_zeroes_next_pointer() {
        let map = FakeMap::new();
        let mut pool = Pool::allocate(&map, 1, 4096).unwrap();
        let mut arena = CbArena::new(&mut pool);
        arena.link(0, 1);
        arena.terminate(0);
        assert_eq!(arena.get(0).next_block_addr, 0);
    }

    #[test]
    fn cbs_per_page_matches_layout() {
        assert_eq!(cbs_per_page(4096), 4096 / std::mem::size_of::<ControlBlock>());
    }
}
