//! `select(2)`-based "read N bytes, but wake on a self-pipe" helper.
//!
//! Shared by the [`crate::receiver::Receiver`] and the reference test server
//! (both read framed messages off a socket while needing to be interruptible
//! by a shutdown signal delivered on a second fd).

use std::mem;
use std::os::unix::io::RawFd;

use anyhow::{bail, Result};

/// Outcome of a single [`recv_all_interruptible`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecvOutcome {
    /// `buf` was filled completely.
    Complete,
    /// `wake_fd` became readable before `buf` was filled; a clean,
    /// deliberate interruption rather than a fault.
    Interrupted,
}

/// Read exactly `buf.len()` bytes from `sock_fd`, waking on activity on
/// `wake_fd` (the read end of a self-pipe).
///
/// Returns `Ok(Complete)` once the full buffer has been filled, or
/// `Ok(Interrupted)` if `wake_fd` became readable first. Any `select`
/// failure, `read` failure, or EOF is reported as `Err` — the caller logs
/// it and treats the stream as no longer usable either way.
pub(crate) fn recv_all_interruptible(sock_fd: RawFd, wake_fd: RawFd, mut buf: &mut [u8]) -> Result<RecvOutcome> {
    let max_fd = sock_fd.max(wake_fd);

    while !buf.is_empty() {
        // SAFETY: `read_fds` is fully initialized by fd_set_zero before any
        // bit is set or read.
        let mut read_fds: libc::fd_set = unsafe { mem::zeroed() };
        fd_set_zero(&mut read_fds);
        fd_set_set(sock_fd, &mut read_fds);
        fd_set_set(wake_fd, &mut read_fds);

        // SAFETY: `read_fds` is a valid, initialized fd_set; the other
        // pointers are null as permitted by select(2) when unused.
        let ready = unsafe {
            libc::select(
                max_fd + 1,
                &mut read_fds,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if ready < 0 {
            bail!("select() failed");
        }
        if ready == 0 {
            bail!("select() returned with no fd ready");
        }

        if fd_set_isset(wake_fd, &read_fds) {
            return Ok(RecvOutcome::Interrupted);
        }

        // SAFETY: fd is a valid, connected socket; buf is a valid slice for
        // the duration of this call.
        let read_bytes = unsafe {
            libc::read(sock_fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len())
        };
        if read_bytes == 0 {
            bail!("read() hit EOF");
        }
        if read_bytes < 0 {
            bail!("read() failed");
        }

        buf = &mut buf[read_bytes as usize..];
    }

    Ok(RecvOutcome::Complete)
}

/// Bits per word in the `fds_bits` array of `libc::fd_set` (Linux/glibc: `c_ulong`).
pub(crate) fn bits_per_word() -> usize {
    mem::size_of::<libc::c_ulong>() * 8
}

pub(crate) fn fd_set_zero(set: &mut libc::fd_set) {
    // SAFETY: `set` is a valid, properly sized fd_set; zeroing it bit-for-bit
    // is equivalent to libc's FD_ZERO macro.
    unsafe { std::ptr::write_bytes(set, 0, 1) };
}

pub(crate) fn fd_set_set(fd: RawFd, set: &mut libc::fd_set) {
    let fd = fd as usize;
    let word = fd / bits_per_word();
    let bit = fd % bits_per_word();
    set.fds_bits[word] |= 1 << bit;
}

pub(crate) fn fd_set_isset(fd: RawFd, set: &libc::fd_set) -> bool {
    let fd = fd as usize;
    let word = fd / bits_per_word();
    let bit = fd % bits_per_word();
    (set.fds_bits[word] & (1 << bit)) != 0
}
