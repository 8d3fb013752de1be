//! POOL: anonymous, locked, page-resolved memory used as both DMA control
//! block storage and INRING/OUTRING sample storage.
//!
//! Rather than a GPU-memory allocator ioctl, this engine anonymously
//! `mmap`s ordinary pages, `mlock`s them so the kernel never swaps or moves
//! them, and resolves each page's physical address through
//! [`crate::pmap::PeripheralMap`] — no dependency on a VideoCore mailbox
//! interface for contiguous DMA memory.

use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::pmap::PeripheralMap;
use crate::regs::offset::BUS_ALIAS_TAG;

/// One page of DMA-visible memory: its process-virtual address, its
/// bus-alias address (ready to drop straight into a control block), and its
/// length.
pub struct Page {
    virt: NonNull<u8>,
    bus_addr: u32,
    len: usize,
}

impl Page {
    /// Process-virtual base address of this page.
    #[must_use]
    pub fn virt(&self) -> NonNull<u8> {
        self.virt
    }

    /// Bus-alias address of this page (see GLOSSARY "Bus address"); safe to
    /// hand directly to a control block's source/destination/`NEXTCONBK`
    /// field, or any byte offset added to it.
    #[must_use]
    pub fn bus_addr(&self) -> u32 {
        self.bus_addr
    }

    /// Byte length of this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bus-alias address of byte `offset` within this page.
    ///
    /// # Panics
    /// Panics if `offset >= self.len()`.
    #[must_use]
    pub fn bus_addr_at(&self, offset: usize) -> u32 {
        assert!(offset < self.len, "offset out of page bounds");
        #[allow(clippy::cast_possible_truncation)]
        let offset = offset as u32;
        self.bus_addr + offset
    }

    /// Byte slice view of this page's contents.
    ///
    /// # Safety
    /// The caller must not alias this with a `&mut` view (via
    /// [`Self::as_mut_slice`]) held concurrently, and must account for DMA
    /// hardware writing to this memory outside Rust's aliasing model.
    #[must_use]
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.virt.as_ptr(), self.len)
    }

    /// Mutable byte slice view of this page's contents.
    ///
    /// # Safety
    /// Same caveats as [`Self::as_slice`].
    #[must_use]
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.virt.as_ptr(), self.len)
    }

    /// Reinterprets this page as a slice of `T`.
    ///
    /// # Safety
    /// `T` must have an alignment no stricter than a page (always true for
    /// the 32-byte-aligned control blocks and 4-byte words this crate
    /// stores here), and the caller is responsible for initializing every
    /// element before DMA or Rust code reads it.
    #[must_use]
    pub unsafe fn as_mut_typed<T>(&mut self) -> &mut [T] {
        let count = self.len / std::mem::size_of::<T>();
        std::slice::from_raw_parts_mut(self.virt.as_ptr().cast::<T>(), count)
    }
}

// SAFETY: `virt` points at an anonymous mmap'd page with no other Rust
// owner; nothing about crossing threads changes how it may be accessed,
// and every read/write through it already has to account for concurrent
// DMA writes regardless of which thread issues it.
unsafe impl Send for Page {}

impl Drop for Page {
    fn drop(&mut self) {
        // SAFETY: `virt`/`len` were produced by a successful `mmap` in
        // `Pool::allocate` and never handed to another owner.
        unsafe {
            libc::munlock(self.virt.as_ptr().cast(), self.len);
            libc::munmap(self.virt.as_ptr().cast(), self.len);
        }
    }
}

/// A fixed-size collection of locked, bus-resolved pages, indexed the same
/// way throughout INRING/OUTRING/CALLBK: "page N" always means the same
/// memory for the life of the pool.
pub struct Pool {
    pages: Vec<Page>,
    page_len: usize,
}

impl Pool {
    /// Allocates `num_pages` pages of `page_len` bytes each (normally
    /// [`crate::regs::offset::PAGE_LEN`]), touching every page to force
    /// physical backing before resolving its bus address.
    pub fn allocate(map: &dyn PeripheralMap, num_pages: usize, page_len: usize) -> Result<Self> {
        let mut pages = Vec::with_capacity(num_pages);
        for _ in 0..num_pages {
            pages.push(Self::allocate_one(map, page_len)?);
        }
        Ok(Self { pages, page_len })
    }

    fn allocate_one(map: &dyn PeripheralMap, page_len: usize) -> Result<Page> {
        // SAFETY: anonymous, private mapping with no backing file; `addr`
        // is either a valid pointer or `MAP_FAILED`, checked immediately.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                page_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::AllocFailed);
        }
        // SAFETY: `addr`/`page_len` just came back from a successful mmap.
        let lock_ok = unsafe { libc::mlock(addr, page_len) } == 0;
        if !lock_ok {
            // SAFETY: tearing down the same mapping we just failed to lock.
            unsafe {
                libc::munmap(addr, page_len);
            }
            return Err(Error::AllocFailed);
        }
        // Force every page to be backed by a physical frame before asking
        // the kernel which frame that is; an untouched anonymous mapping
        // may still be the zero page.
        // SAFETY: `addr`/`page_len` describe the mapping just locked above.
        unsafe {
            std::ptr::write_bytes(addr.cast::<u8>(), 0, page_len);
        }
        let virt = NonNull::new(addr.cast::<u8>()).ok_or(Error::AllocFailed)?;
        let phys = map.physical_address_of(virt)?;
        #[allow(clippy::cast_possible_truncation)]
        let bus_addr = (phys as u32 & crate::regs::offset::BUS_ALIAS_ADDR_MASK) | BUS_ALIAS_TAG;
        Ok(Page { virt, bus_addr, len: page_len })
    }

    /// Number of pages in this pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Byte length of each page in this pool.
    #[must_use]
    pub fn page_len(&self) -> usize {
        self.page_len
    }

    #[must_use]
    pub fn page(&self, index: usize) -> &Page {
        &self.pages[index]
    }

    pub fn page_mut(&mut self, index: usize) -> &mut Page {
        &mut self.pages[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmap::FakeMap;

    #[test]
    fn allocated_pages_have_distinct_nonzero_bus_addresses() {
        let map = FakeMap::new();
        let pool = Pool::allocate(&map, 4, 4096).unwrap();
        let mut seen = std::collections::HashSet::new();
        for i in 0..pool.len() {
            let addr = pool.page(i).bus_addr();
            assert_ne!(addr, 0);
            assert!(seen.insert(addr), "duplicate bus address");
        }
    }

    #[test]
    fn page_byte_offset_matches_base_plus_offset() {
        let map = FakeMap::new();
        let pool = Pool::allocate(&map, 1, 4096).unwrap();
        let page = pool.page(0);
        assert_eq!(page.bus_addr_at(32), page.bus_addr() + 32);
    }
}
