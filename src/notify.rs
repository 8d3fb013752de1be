//! NOTIFY: fixed-size table of notification handles, each backed by a named
//! pipe (or, via [`NotifyRegistry::open_fd`], any already-connected
//! descriptor such as a client socket an external wire-protocol layer
//! might hand in) that this crate writes 12-byte sample reports into.
//!
//! This crate never implements the client side of that protocol, but still
//! has to produce bytes a client reading the pipe expects, hence the exact
//! wire layout below (`seqno`/`flags`/`tick`/`level`, packed to 12 bytes).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Maximum simultaneously open notification handles.
pub const MAX_HANDLES: usize = 32;

/// A notification report has become unreachable: its peer stopped reading
/// and the handle is queued for the caller to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    WouldBlock,
}

struct Handle {
    file: File,
    /// Bitmask of GPIOs this handle wants reports for. Zero means the
    /// handle is open but not yet (or no longer) watching anything.
    bits: u32,
    seqno: u16,
    /// Set once a write returns `EAGAIN`/`EWOULDBLOCK`: the peer stopped
    /// draining the pipe. The handle is not torn down
    /// itself here; [`NotifyRegistry::close_closing_handles`] is what
    /// actually closes/unlinks a handle once it reaches this state,
    /// called once per [`crate::alert`] tick so a slow write never blocks
    /// the hot report-dispatch loop above it.
    closing: bool,
    /// Whether this handle owns `file`'s descriptor (a pipe this registry
    /// created via [`NotifyRegistry::open`]) versus borrowing one handed in
    /// by [`NotifyRegistry::open_fd`] (a client socket, owned and closed by
    /// the client side per the ownership note in spec §3).
    owns_fd: bool,
}

/// Registry of notification handles, each writing into its own named pipe
/// under a configurable directory (tests use a tempdir rather than a
/// production path like `/dev/pigpioN`, so the registry never hardcodes
/// one).
pub struct NotifyRegistry {
    pipe_dir: PathBuf,
    slots: Vec<Option<Handle>>,
}

impl NotifyRegistry {
    #[must_use]
    pub fn new(pipe_dir: PathBuf) -> Self {
        let mut slots = Vec::with_capacity(MAX_HANDLES);
        slots.resize_with(MAX_HANDLES, || None);
        Self { pipe_dir, slots }
    }

    /// Path a handle's named pipe lives at, under this registry's
    /// (test-controlled) directory.
    #[must_use]
    pub fn pipe_path(&self, handle: u32) -> PathBuf {
        self.pipe_dir.join(format!("bcm283x-engine{handle}"))
    }

    /// Creates a named pipe and opens it write-only, non-blocking, in the
    /// first free slot. The pipe exists and is registered, but reports no
    /// bits until [`Self::begin`] is called.
    ///
    /// # Errors
    /// Returns [`Error::NoHandle`] if every slot is occupied, or
    /// [`Error::InitFailed`] if the pipe cannot be created or opened.
    pub fn open(&mut self) -> Result<u32> {
        let index = self.slots.iter().position(Option::is_none).ok_or(Error::NoHandle)?;
        let path = self.pipe_path(index as u32);
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
        nix::unistd::mkfifo(&path, nix::sys::stat::Mode::from_bits_truncate(0o664))
            .map_err(|_| Error::InitFailed("mkfifo failed"))?;
        let file = open_nonblocking(&path)?;
        self.slots[index] = Some(Handle { file, bits: 0, seqno: 0, closing: false, owns_fd: true });
        Ok(index as u32)
    }

    /// Registers an already-open, already-connected descriptor as a
    /// notification handle instead of creating a pipe, for a future
    /// socket-backed front end. Takes ownership of `fd`.
    ///
    /// # Safety
    /// `fd` must be a valid, open file descriptor not owned elsewhere.
    ///
    /// # Errors
    /// Returns [`Error::NoHandle`] if every slot is occupied.
    pub unsafe fn open_fd(&mut self, fd: RawFd) -> Result<u32> {
        let index = self.slots.iter().position(Option::is_none).ok_or(Error::NoHandle)?;
        let file = File::from_raw_fd(fd);
        self.slots[index] = Some(Handle { file, bits: 0, seqno: 0, closing: false, owns_fd: false });
        Ok(index as u32)
    }

    /// Starts (or changes) the set of GPIOs `handle` receives reports for.
    ///
    /// # Errors
    /// Returns [`Error::BadHandle`] if `handle` is not open.
    pub fn begin(&mut self, handle: u32, bits: u32) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        slot.bits = bits;
        Ok(())
    }

    /// Stops `handle` from receiving reports without closing its pipe.
    ///
    /// # Errors
    /// Returns [`Error::BadHandle`] if `handle` is not open.
    pub fn pause(&mut self, handle: u32) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        slot.bits = 0;
        Ok(())
    }

    /// Closes `handle`. If this registry owns the handle's descriptor (it
    /// was created via [`Self::open`]), also unlinks its pipe file; a
    /// handle registered via [`Self::open_fd`] has its descriptor leaked
    /// rather than closed, since the client that handed it in owns closing
    /// it.
    ///
    /// # Errors
    /// Returns [`Error::BadHandle`] if `handle` is not open.
    pub fn close(&mut self, handle: u32) -> Result<()> {
        let index = handle as usize;
        if index >= self.slots.len() || self.slots[index].is_none() {
            return Err(Error::BadHandle);
        }
        let owns_fd = self.slots[index].as_ref().is_some_and(|h| h.owns_fd);
        let removed = self.slots[index].take();
        if owns_fd {
            let path = self.pipe_path(handle);
            let _ = std::fs::remove_file(path);
        } else if let Some(handle) = removed {
            // Leak the fd rather than let `File`'s `Drop` close a
            // descriptor the client, not this registry, owns.
            let _ = handle.file.into_raw_fd();
        }
        Ok(())
    }

    /// The bitwise union of every open handle's watched GPIOs, contributing
    /// to [`crate::alert`]'s monitor mask alongside
    /// [`crate::callback::CallbackRegistry::monitor_bits`].
    #[must_use]
    pub fn monitor_bits(&self) -> u32 {
        self.slots.iter().flatten().fold(0, |mask, h| mask | h.bits)
    }

    /// Writes a report to every open, non-paused handle whose watched bits
    /// intersect `level`'s changed bits, masking `level` down to each
    /// handle's own subscription before writing so one handle's client
    /// never sees another's bits. `changed` is the set of bits that edged
    /// this tick; a handle with no overlap is skipped entirely rather than
    /// sent an all-zero report.
    pub fn report_all(&mut self, tick: u32, level: u32, changed: u32) {
        for slot in self.slots.iter_mut().flatten() {
            if slot.bits == 0 || slot.closing {
                continue;
            }
            if slot.bits & changed == 0 {
                continue;
            }
            let outcome = write_report(&mut slot.file, slot.seqno, 0, tick, level & slot.bits);
            slot.seqno = slot.seqno.wrapping_add(1);
            if outcome == WriteOutcome::WouldBlock {
                slot.closing = true;
            }
        }
    }

    /// Writes a synthetic watchdog-timeout report (flags bit 5 set, `gpio`
    /// in flags' low 5 bits) to every open, non-paused handle currently
    /// watching `gpio`.
    pub fn report_watchdog(&mut self, tick: u32, gpio: u32) {
        let bit = 1_u32 << gpio;
        let flags = WATCHDOG_FLAG | (gpio & GPIO_FLAG_MASK);
        for slot in self.slots.iter_mut().flatten() {
            if slot.bits == 0 || slot.closing || slot.bits & bit == 0 {
                continue;
            }
            let outcome = write_report(&mut slot.file, slot.seqno, flags, tick, 0);
            slot.seqno = slot.seqno.wrapping_add(1);
            if outcome == WriteOutcome::WouldBlock {
                slot.closing = true;
            }
        }
    }

    /// Returns every handle whose last write hit `EAGAIN`/`EWOULDBLOCK`.
    /// Exposed mainly for tests; [`Self::close_closing_handles`] is what
    /// actually acts on this state in the running engine.
    pub fn drain_closing(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().filter(|h| h.closing).map(|_| i as u32))
            .collect()
    }

    /// Tears down every handle currently marked closing: an owned pipe has
    /// its descriptor closed and its file unlinked, while a borrowed
    /// descriptor (from [`Self::open_fd`]) is just dropped from the table
    /// without being closed, since the client still owns it. Called once
    /// per [`crate::alert`] tick so a peer that stopped reading doesn't
    /// hold its slot (and, for owned pipes, its fd) forever.
    pub fn close_closing_handles(&mut self) {
        for handle in self.drain_closing() {
            let _ = self.close(handle);
        }
    }

    fn slot_mut(&mut self, handle: u32) -> Result<&mut Handle> {
        self.slots.get_mut(handle as usize).and_then(Option::as_mut).ok_or(Error::BadHandle)
    }
}

/// Opens the pipe read-write rather than write-only: a write-only
/// nonblocking open fails with `ENXIO` until some reader has already
/// attached, which would make every `open()` call racy against whatever
/// client is supposed to read the pipe. Opening `O_RDWR` always succeeds
/// immediately, since this side then satisfies both ends itself.
fn open_nonblocking(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|_| Error::InitFailed("open notification pipe failed"))
}

/// Bit 5 of the wire format's `flags` field: this report is a synthetic
/// watchdog timeout, not a level change.
const WATCHDOG_FLAG: u32 = 1 << 5;
/// Low 5 bits of `flags` carry the gpio index when [`WATCHDOG_FLAG`] is set.
const GPIO_FLAG_MASK: u32 = 0x1F;

/// Packs and writes one 12-byte report (`seqno: u16`, `flags: u16`,
/// `tick: u32`, `level: u32`) in the host's native (little-endian on
/// BCM283x) byte order. A 12-byte write is well under `PIPE_BUF`, so it is
/// always atomic: no partial report is ever visible to a reader.
///
/// Only `EAGAIN`/`EWOULDBLOCK` is treated as "the peer is gone" (see Open
/// Question (d) in `DESIGN.md`); any other write error is logged and left
/// for the next tick to retry rather than tearing the handle down.
fn write_report(file: &mut File, seqno: u16, flags: u32, tick: u32, level: u32) -> WriteOutcome {
    let mut buf = [0_u8; 12];
    buf[0..2].copy_from_slice(&seqno.to_le_bytes());
    #[allow(clippy::cast_possible_truncation)]
    buf[2..4].copy_from_slice(&(flags as u16).to_le_bytes());
    buf[4..8].copy_from_slice(&tick.to_le_bytes());
    buf[8..12].copy_from_slice(&level.to_le_bytes());
    match file.write_all(&buf) {
        Ok(()) => WriteOutcome::Written,
        Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock) => WriteOutcome::WouldBlock,
        Err(err) => {
            log::warn!("notification write failed without EAGAIN/EWOULDBLOCK: {err}");
            WriteOutcome::Written
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bcm283x-engine-notify-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn open_creates_a_fifo_at_the_configured_path() {
        let dir = tempdir();
        let mut registry = NotifyRegistry::new(dir.clone());
        let handle = registry.open().unwrap();
        assert_eq!(handle, 0);
        assert!(registry.pipe_path(0).exists());
        registry.close(handle).unwrap();
    }

    #[test]
    fn monitor_bits_is_zero_until_begin_is_called() {
        let dir = tempdir();
        let mut registry = NotifyRegistry::new(dir);
        let handle = registry.open().unwrap();
        assert_eq!(registry.monitor_bits(), 0);
        registry.begin(handle, 1 << 4).unwrap();
        assert_eq!(registry.monitor_bits(), 1 << 4);
        registry.pause(handle).unwrap();
        assert_eq!(registry.monitor_bits(), 0);
        registry.close(handle).unwrap();
    }

    #[test]
    fn report_masks_level_to_the_handles_own_bits() {
        let mut pair = [0_i32; 2];
        // socketpair gives us a pipe-like fd pair without touching the
        // filesystem, for exercising `write_report`'s framing directly.
        unsafe {
            assert_eq!(libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, pair.as_mut_ptr()), 0);
        }
        let mut writer = unsafe { File::from_raw_fd(pair[0]) };
        let mut reader = unsafe { File::from_raw_fd(pair[1]) };
        let outcome = write_report(&mut writer, 7, 0, 99_000, 0b1010);
        assert_eq!(outcome, WriteOutcome::Written);

        let mut buf = [0_u8; 12];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(u16::from_le_bytes([buf[0], buf[1]]), 7);
        assert_eq!(u16::from_le_bytes([buf[2], buf[3]]), 0);
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 99_000);
        assert_eq!(u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]), 0b1010);
    }

    #[test]
    fn watchdog_report_sets_flag_and_gpio_index() {
        let mut pair = [0_i32; 2];
        unsafe {
            assert_eq!(libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, pair.as_mut_ptr()), 0);
        }
        let writer = unsafe { File::from_raw_fd(pair[0]) };
        let mut reader = unsafe { File::from_raw_fd(pair[1]) };
        let mut registry = NotifyRegistry::new(PathBuf::from(std::env::temp_dir()));
        registry.slots[0] = Some(Handle { file: writer, bits: 1 << 9, seqno: 0, closing: false, owns_fd: true });

        registry.report_watchdog(42, 9);

        let mut buf = [0_u8; 12];
        reader.read_exact(&mut buf).unwrap();
        let flags = u16::from_le_bytes([buf[2], buf[3]]);
        assert_eq!(flags as u32 & WATCHDOG_FLAG, WATCHDOG_FLAG);
        assert_eq!(flags as u32 & GPIO_FLAG_MASK, 9);
        assert_eq!(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]), 42);
    }

    #[test]
    fn closing_an_owned_handle_unlinks_its_pipe_and_frees_the_slot() {
        let dir = tempdir();
        let mut registry = NotifyRegistry::new(dir);
        let handle = registry.open().unwrap();
        registry.slot_mut(handle).unwrap().closing = true;

        registry.close_closing_handles();

        assert!(!registry.pipe_path(handle).exists());
        assert!(registry.drain_closing().is_empty());
        // The slot is free again for a fresh open().
        assert_eq!(registry.open().unwrap(), handle);
    }

    #[test]
    fn closing_a_borrowed_handle_does_not_touch_the_filesystem() {
        let mut pair = [0_i32; 2];
        unsafe {
            assert_eq!(libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, pair.as_mut_ptr()), 0);
        }
        let dir = tempdir();
        let mut registry = NotifyRegistry::new(dir);
        let handle = unsafe { registry.open_fd(pair[0]).unwrap() };
        registry.slot_mut(handle).unwrap().closing = true;

        registry.close_closing_handles();

        assert!(registry.drain_closing().is_empty());
        assert!(!registry.pipe_path(handle).exists());
        // The borrowed fd is still valid; the registry never called
        // close(2) on it. Closing it here is this test's job, standing in
        // for the client.
        unsafe {
            assert_eq!(libc::close(pair[0]), 0);
        }
        unsafe {
            libc::close(pair[1]);
        }
    }
}
