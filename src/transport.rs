//! Connection establishment and raw byte I/O over a Unix domain socket or TCP.
//!
//! On failure to construct, the transport's fd is set to an invalid sentinel
//! and [`Transport::is_connected`] returns `false`; every subsequent send
//! becomes a silent no-op. This half-dead mode is deliberate — telemetry
//! must never abort the host process over a failed connection.

use std::mem;
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

/// A connected (or half-dead) byte-stream transport.
#[derive(Debug)]
pub struct Transport {
    fd: RawFd,
}

impl Transport {
    /// Connect to an abstract-namespace Unix domain socket.
    ///
    /// `name` must NOT include the leading NUL an abstract address requires
    /// — this constructor inserts it. Never fails outwardly: a connection
    /// error is logged and leaves the transport half-dead.
    pub fn connect_uds(name: &str) -> Self {
        match try_connect_uds(name) {
            Ok(fd) => Self { fd },
            Err(e) => {
                log::warn!("comms: UDS connect to {name:?} failed: {e:#}");
                Self { fd: -1 }
            }
        }
    }

    /// Connect to a TCP endpoint given a dotted-quad host and port. Never
    /// fails outwardly — see [`Self::connect_uds`].
    pub fn connect_tcp(host: &str, port: u16) -> Self {
        match try_connect_tcp(host, port) {
            Ok(fd) => Self { fd },
            Err(e) => {
                log::warn!("comms: TCP connect to {host}:{port} failed: {e:#}");
                Self { fd: -1 }
            }
        }
    }

    /// True iff this transport holds a valid, connected socket.
    pub fn is_connected(&self) -> bool {
        self.fd >= 0
    }

    /// The raw fd, for use in `select`/`read` by the receiver worker.
    ///
    /// Returns `-1` if disconnected; callers must check [`Self::is_connected`]
    /// before using it in a wait set.
    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Send every byte of `data`, retrying short writes.
    ///
    /// Returns `false` on any send error (including "not connected"); the
    /// message is still considered "sent" by the caller per the spec's
    /// wire-write-failure policy — no retry is attempted at a higher layer.
    pub fn send_all(&self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }
        match try_send_all(self.fd, data) {
            Ok(()) => true,
            Err(e) => {
                log::error!("comms: send failed: {e:#}");
                false
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.fd >= 0 {
            // SAFETY: fd is a valid, open fd owned by this Transport.
            unsafe { libc::close(self.fd) };
        }
    }
}

fn try_connect_uds(name: &str) -> Result<RawFd> {
    // SAFETY: socket(2) with AF_UNIX/SOCK_STREAM has no preconditions
    // beyond valid arguments, which these are.
    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        bail!("socket() failed");
    }

    // sockaddr_un has no padding between sun_family and sun_path on
    // Linux, so the offset of sun_path is exactly size_of::<sa_family_t>().
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let name_bytes = name.as_bytes();
    let max_name_len = addr.sun_path.len() - 1; // leading NUL takes one byte
    if name_bytes.len() > max_name_len {
        // SAFETY: fd came from a successful socket(2) call above.
        unsafe { libc::close(fd) };
        bail!("UDS address too long ({} bytes, max {max_name_len})", name_bytes.len());
    }

    // addr.sun_path[0] stays '\0' (the abstract-namespace marker); the
    // name is written starting at index 1, with no trailing NUL needed.
    for (i, byte) in name_bytes.iter().enumerate() {
        addr.sun_path[1 + i] = *byte as libc::c_char;
    }

    let sun_family_len = mem::size_of::<libc::sa_family_t>();
    let addr_len = (sun_family_len + 1 + name_bytes.len()) as libc::socklen_t;

    // SAFETY: `addr` is a valid, fully initialized sockaddr_un and
    // `addr_len` does not exceed size_of::<sockaddr_un>().
    let result = unsafe {
        libc::connect(fd, std::ptr::addr_of!(addr).cast::<libc::sockaddr>(), addr_len)
    };
    if result != 0 {
        // SAFETY: fd came from a successful socket(2) call above.
        unsafe { libc::close(fd) };
        bail!("connect() failed");
    }

    Ok(fd)
}

fn try_connect_tcp(host: &str, port: u16) -> Result<RawFd> {
    let ip = Ipv4Addr::from_str(host).with_context(|| format!("invalid TCP host {host:?}"))?;

    // SAFETY: socket(2) with AF_INET/SOCK_STREAM has no preconditions
    // beyond valid arguments, which these are.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        bail!("socket() failed");
    }

    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr = libc::in_addr { s_addr: u32::from_ne_bytes(ip.octets()) };

    // SAFETY: `addr` is a valid, fully initialized sockaddr_in.
    let result = unsafe {
        libc::connect(
            fd,
            std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if result != 0 {
        // SAFETY: fd came from a successful socket(2) call above.
        unsafe { libc::close(fd) };
        bail!("connect() failed");
    }

    Ok(fd)
}

fn try_send_all(fd: RawFd, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        // SAFETY: fd is a valid, connected socket; data and its length
        // describe a valid byte slice for the duration of this call.
        let sent = unsafe { libc::send(fd, data.as_ptr().cast::<libc::c_void>(), data.len(), 0) };
        if sent < 0 {
            bail!("send() returned -1");
        }
        data = &data[sent as usize..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_uds_connect_is_half_dead() {
        // Nothing is listening on this name, so the connect is expected to fail.
        let transport = Transport::connect_uds("gpu-host-comms-test-no-listener-xyz");
        assert!(!transport.is_connected());
        assert!(!transport.send_all(b"hello"));
    }

    #[test]
    fn failed_tcp_connect_is_half_dead() {
        // Port 1 is reserved and nothing should be listening there locally.
        let transport = Transport::connect_tcp("127.0.0.1", 1);
        assert!(!transport.is_connected());
    }

    #[test]
    fn invalid_tcp_host_is_half_dead() {
        let transport = Transport::connect_tcp("not-an-ip", 1234);
        assert!(!transport.is_connected());
    }

    #[test]
    fn oversized_uds_name_is_half_dead() {
        let long_name = "x".repeat(200);
        let transport = Transport::connect_uds(&long_name);
        assert!(!transport.is_connected());
    }
}
