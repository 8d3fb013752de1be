//! PMAP: the single owner of `/dev/mem` register mappings and
//! `/proc/self/pagemap` physical-address resolution.
//!
//! Every other module that needs to touch real hardware (POOL for DMA
//! buffers, the register blocks under [`crate::regs`] for peripheral
//! control) goes through a [`PeripheralMap`] rather than calling `mmap`
//! itself. This is the one seam the engine tests through: production code
//! runs against [`DevMemMap`], `#[cfg(test)]` code and the
//! `BCM283X_ENGINE_FAKE_MEM` environment hook run against [`FakeMap`].

use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Abstracts over the two kernel services this crate needs raw access to:
/// mapping a peripheral register page, and resolving the physical address
/// backing a page of process memory.
pub trait PeripheralMap: Send + Sync {
    /// Maps `len` bytes of physical address space starting at `phys_addr`
    /// and returns a pointer to the mapping, valid for the life of `self`.
    /// Each call produces an independent mapping; callers that want to
    /// reuse one are expected to cache the pointer themselves.
    fn map_physical(&self, phys_addr: u64, len: usize) -> Result<NonNull<u32>>;

    /// Resolves the physical address backing the page containing `virt`.
    /// `virt` need not be page-aligned; the returned address is the start
    /// of the containing page.
    fn physical_address_of(&self, virt: NonNull<u8>) -> Result<u64>;

    /// Page size this map operates in, for alignment arithmetic in POOL.
    fn page_len(&self) -> usize {
        crate::regs::offset::PAGE_LEN
    }

    /// Physical base address of the SoC peripheral region this process is
    /// running on (`0x2000_0000` BCM2835, `0x3F00_0000` BCM2836/2837,
    /// `0xFE00_0000` BCM2711). [`crate::regs::offset`] only knows
    /// peripheral-relative offsets; callers add this base before calling
    /// [`Self::map_physical`].
    fn peripheral_base(&self) -> u64 {
        DevMemMap::DEFAULT_PERIPHERAL_BASE
    }
}

/// Real hardware backing: opens `/dev/mem` once and keeps it open for the
/// life of the process.
pub struct DevMemMap {
    mem_fd: std::fs::File,
    pagemap_fd: Mutex<std::fs::File>,
    peripheral_base: u64,
}

impl DevMemMap {
    /// BCM2836/2837 (Raspberry Pi 2/3) peripheral base, used whenever
    /// `/proc/cpuinfo` doesn't identify a different SoC.
    pub const DEFAULT_PERIPHERAL_BASE: u64 = 0x3F00_0000;

    /// Opens `/dev/mem` read-write and `/proc/self/pagemap` read-only.
    /// Both require `CAP_SYS_RAWIO` (or root); failure here is always
    /// [`Error::InitFailed`], since nothing downstream can proceed without
    /// these handles.
    pub fn open() -> Result<Self> {
        let mem_fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .map_err(|_| Error::InitFailed("open /dev/mem failed"))?;
        let pagemap_fd = OpenOptions::new()
            .read(true)
            .open("/proc/self/pagemap")
            .map_err(|_| Error::InitFailed("open /proc/self/pagemap failed"))?;
        let peripheral_base = Self::detect_peripheral_base();
        Ok(Self { mem_fd, pagemap_fd: Mutex::new(pagemap_fd), peripheral_base })
    }

    /// Reads `/proc/cpuinfo`'s `Hardware`/`Revision` lines to pick the
    /// peripheral base for the running SoC. Falls back to the BCM2836/2837
    /// base on any read failure or unrecognized model, since that is the
    /// most common target.
    fn detect_peripheral_base() -> u64 {
        let Ok(cpuinfo) = std::fs::read_to_string("/proc/cpuinfo") else {
            return Self::DEFAULT_PERIPHERAL_BASE;
        };
        if cpuinfo.contains("BCM2835") {
            0x2000_0000
        } else if cpuinfo.contains("BCM2711") {
            0xFE00_0000
        } else {
            Self::DEFAULT_PERIPHERAL_BASE
        }
    }
}

impl PeripheralMap for DevMemMap {
    fn peripheral_base(&self) -> u64 {
        self.peripheral_base
    }

    fn map_physical(&self, phys_addr: u64, len: usize) -> Result<NonNull<u32>> {
        // SAFETY: `/dev/mem` mmap of a peripheral-register-sized span at a
        // caller-supplied physical address. The crate's register blocks in
        // `crate::regs` are sized and offset to match real hardware, so the
        // mapping this produces is only ever dereferenced through those
        // typed wrappers.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.mem_fd.as_raw_fd(),
                i64::try_from(phys_addr).unwrap_or(i64::MAX),
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::InitFailed("mmap /dev/mem failed"));
        }
        NonNull::new(addr.cast::<u32>()).ok_or(Error::InitFailed("mmap returned null"))
    }

    fn physical_address_of(&self, virt: NonNull<u8>) -> Result<u64> {
        use std::io::{Read, Seek, SeekFrom};

        let page_len = self.page_len() as u64;
        let page_index = (virt.as_ptr() as u64) / page_len;
        let mut fd = self.pagemap_fd.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        fd.seek(SeekFrom::Start(page_index * 8)).map_err(|_| Error::PagemapFailed)?;
        let mut entry = [0_u8; 8];
        fd.read_exact(&mut entry).map_err(|_| Error::PagemapFailed)?;
        let raw = u64::from_le_bytes(entry);
        // Bit 63 marks the page present; bits 0..=54 are the physical page
        // frame number. A page that has never been touched (and so never
        // faulted in) has no frame yet, which POOL's caller must avoid by
        // writing to a buffer before resolving its address.
        if raw & (1 << 63) == 0 {
            return Err(Error::PagemapFailed);
        }
        let pfn = raw & 0x007F_FFFF_FFFF_FFFF;
        Ok(pfn * page_len)
    }
}

/// In-process test double: backs every "peripheral" with a plain `Vec<u32>`
/// and every "physical address" with the buffer's own index, so ring/CB
/// logic can be exercised without `/dev/mem` or root. Selected automatically
/// when the `BCM283X_ENGINE_FAKE_MEM` environment variable is set.
pub struct FakeMap {
    next_fake_addr: Mutex<u64>,
}

impl FakeMap {
    #[must_use]
    pub fn new() -> Self {
        // Start well above any real bus-alias address so a test that
        // accidentally mixes a `FakeMap` pointer into real register code
        // fails loudly instead of aliasing real hardware.
        Self { next_fake_addr: Mutex::new(0x1_0000_0000) }
    }
}

impl Default for FakeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PeripheralMap for FakeMap {
    fn map_physical(&self, _phys_addr: u64, len: usize) -> Result<NonNull<u32>> {
        let words = len.div_ceil(4).max(1);
        let mut buf: Vec<u32> = vec![0; words];
        let ptr = buf.as_mut_ptr();
        // Leaked deliberately: a `FakeMap` lives for the whole test process,
        // mirroring the real map's process-lifetime `/dev/mem` mappings.
        std::mem::forget(buf);
        NonNull::new(ptr).ok_or(Error::InitFailed("fake allocation failed"))
    }

    fn physical_address_of(&self, _virt: NonNull<u8>) -> Result<u64> {
        let mut next = self.next_fake_addr.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let fake = *next;
        *next += self.page_len() as u64;
        Ok(fake)
    }
}

/// Returns `true` when the process should use [`FakeMap`] instead of
/// [`DevMemMap`], per the `BCM283X_ENGINE_FAKE_MEM` environment hook.
#[must_use]
pub fn use_fake_mem() -> bool {
    std::env::var_os("BCM283X_ENGINE_FAKE_MEM").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_map_hands_out_distinct_addresses() {
        let map = FakeMap::new();
        let one = map.map_physical(0, 4096).unwrap();
        let two = map.map_physical(0, 4096).unwrap();
        let phys_one = map.physical_address_of(one.cast()).unwrap();
        let phys_two = map.physical_address_of(two.cast()).unwrap();
        assert_ne!(phys_one, phys_two);
    }

    #[test]
    fn fake_map_addresses_never_collide_with_bus_alias_range() {
        let map = FakeMap::new();
        let ptr = map.map_physical(0, 4096).unwrap();
        let phys = map.physical_address_of(ptr.cast()).unwrap();
        assert!(phys > u64::from(u32::MAX));
    }
}
