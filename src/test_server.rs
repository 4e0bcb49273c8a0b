//! A minimal reference server used only by the integration test suite.
//!
//! Accepts a single connection, records every message it receives, and
//! echoes a byte-reversed payload for `TX_RX` requests (reusing the
//! request's id, per the wire protocol). Not part of the public API.

use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::framing::{Header, HEADER_LEN};
use crate::io_loop::{fd_set_isset, fd_set_set, fd_set_zero, recv_all_interruptible, RecvOutcome};
use crate::message::EndpointId;
use crate::selfpipe::SelfPipe;

/// One message as observed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub endpoint: EndpointId,
    pub kind: u8,
    pub payload: Vec<u8>,
}

/// A single-connection reference server for driving integration tests
/// against a real [`crate::comms::Comms`] client.
#[derive(Debug)]
pub struct TestServer {
    listen_fd: RawFd,
    wake_pipe: Arc<SelfPipe>,
    received: Arc<Mutex<Vec<ReceivedMessage>>>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Bind an abstract-namespace UDS listener and start serving.
    pub fn bind_uds(name: &str) -> Self {
        // SAFETY: socket(2) with AF_UNIX/SOCK_STREAM has no preconditions
        // beyond valid arguments, which these are.
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0, "test server socket() failed");

        let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let name_bytes = name.as_bytes();
        assert!(name_bytes.len() < addr.sun_path.len(), "test UDS name too long");
        for (i, byte) in name_bytes.iter().enumerate() {
            addr.sun_path[1 + i] = *byte as libc::c_char;
        }
        let addr_len = (mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len()) as libc::socklen_t;

        // SAFETY: `addr` is a valid, fully initialized sockaddr_un and
        // `addr_len` does not exceed size_of::<sockaddr_un>().
        let bind_result = unsafe {
            libc::bind(fd, std::ptr::addr_of!(addr).cast::<libc::sockaddr>(), addr_len)
        };
        assert_eq!(bind_result, 0, "test server bind() failed");

        Self::listen_and_serve(fd)
    }

    /// Bind a TCP listener on `127.0.0.1:port` and start serving.
    pub fn bind_tcp(port: u16) -> Self {
        // SAFETY: socket(2) with AF_INET/SOCK_STREAM has no preconditions
        // beyond valid arguments, which these are.
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0, "test server socket() failed");

        let reuse: libc::c_int = 1;
        // SAFETY: fd is a valid open socket; `reuse` is a valid c_int.
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                std::ptr::addr_of!(reuse).cast::<libc::c_void>(),
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }

        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr = libc::in_addr { s_addr: libc::INADDR_ANY.to_be() };

        // SAFETY: `addr` is a valid, fully initialized sockaddr_in.
        let bind_result = unsafe {
            libc::bind(
                fd,
                std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        assert_eq!(bind_result, 0, "test server bind() failed");

        Self::listen_and_serve(fd)
    }

    fn listen_and_serve(fd: RawFd) -> Self {
        // SAFETY: fd is a valid, just-bound socket.
        let listen_result = unsafe { libc::listen(fd, 1) };
        assert_eq!(listen_result, 0, "test server listen() failed");

        let wake_pipe = Arc::new(SelfPipe::new().expect("self-pipe create should succeed in tests"));
        let received = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let thread_pipe = Arc::clone(&wake_pipe);
        let thread_received = Arc::clone(&received);
        let thread_stopped = Arc::clone(&stopped);
        let handle = thread::spawn(move || serve(fd, thread_pipe, thread_received, thread_stopped));

        Self { listen_fd: fd, wake_pipe, received, stopped, handle: Some(handle) }
    }

    /// Snapshot of every message received so far.
    pub fn received(&self) -> Vec<ReceivedMessage> {
        self.received.lock().expect("test server received-list lock poisoned").clone()
    }

    /// Stop serving and join the background thread.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.wake_pipe.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.listen_fd >= 0 {
            // SAFETY: listen_fd is a valid, open fd owned by this server.
            unsafe { libc::close(self.listen_fd) };
        }
    }
}

fn serve(listen_fd: RawFd, wake_pipe: Arc<SelfPipe>, received: Arc<Mutex<Vec<ReceivedMessage>>>, stopped: Arc<AtomicBool>) {
    let wake_fd = wake_pipe.read_fd();

    let conn_fd = match accept_interruptible(listen_fd, wake_fd) {
        Some(fd) => fd,
        None => return,
    };

    loop {
        if stopped.load(Ordering::Relaxed) {
            break;
        }

        let mut header_buf = [0u8; HEADER_LEN];
        match recv_all_interruptible(conn_fd, wake_fd, &mut header_buf) {
            Ok(RecvOutcome::Complete) => {}
            Ok(RecvOutcome::Interrupted) | Err(_) => break,
        }
        let header = Header::decode(&header_buf);

        let mut payload = vec![0u8; header.payload_size as usize];
        if !payload.is_empty() {
            match recv_all_interruptible(conn_fd, wake_fd, &mut payload) {
                Ok(RecvOutcome::Complete) => {}
                Ok(RecvOutcome::Interrupted) | Err(_) => break,
            }
        }

        received.lock().expect("test server received-list lock poisoned").push(ReceivedMessage {
            endpoint: header.endpoint,
            kind: header.kind,
            payload: payload.clone(),
        });

        // kind 2 == TX_RX: echo a byte-reversed payload under the same id.
        if header.kind == 2 {
            let mut response_payload = payload;
            response_payload.reverse();
            let response_header = Header {
                kind: 2,
                endpoint: header.endpoint,
                id: header.id,
                payload_size: response_payload.len() as u32,
            };
            send_all(conn_fd, &response_header.encode());
            send_all(conn_fd, &response_payload);
        }
    }

    // SAFETY: conn_fd came from a successful accept(2) above.
    unsafe { libc::close(conn_fd) };
}

fn accept_interruptible(listen_fd: RawFd, wake_fd: RawFd) -> Option<RawFd> {
    loop {
        // SAFETY: `read_fds` is fully initialized by fd_set_zero before any
        // bit is set or read.
        let mut read_fds: libc::fd_set = unsafe { mem::zeroed() };
        fd_set_zero(&mut read_fds);
        fd_set_set(listen_fd, &mut read_fds);
        fd_set_set(wake_fd, &mut read_fds);
        let max_fd = listen_fd.max(wake_fd);

        // SAFETY: `read_fds` is a valid, initialized fd_set.
        let ready = unsafe {
            libc::select(max_fd + 1, &mut read_fds, std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut())
        };
        if ready <= 0 {
            return None;
        }
        if fd_set_isset(wake_fd, &read_fds) {
            return None;
        }

        // SAFETY: listen_fd is a valid listening socket.
        let conn_fd = unsafe { libc::accept(listen_fd, std::ptr::null_mut(), std::ptr::null_mut()) };
        if conn_fd >= 0 {
            return Some(conn_fd);
        }
    }
}

fn send_all(fd: RawFd, mut data: &[u8]) -> bool {
    while !data.is_empty() {
        // SAFETY: fd is a valid, connected socket; data describes a valid
        // byte slice for the duration of this call.
        let sent = unsafe { libc::send(fd, data.as_ptr().cast::<libc::c_void>(), data.len(), 0) };
        if sent < 0 {
            return false;
        }
        data = &data[sent as usize..];
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_stop_without_a_client_does_not_hang() {
        let mut server = TestServer::bind_uds("gpu-host-comms-test-server-self-test-xyz");
        server.stop();
        assert!(server.received().is_empty());
    }
}
