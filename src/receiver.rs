//! The receiver worker: reads framed messages off the wire and wakes
//! whichever caller is parked on each response.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::framing::{Header, HEADER_LEN};
use crate::io_loop::{recv_all_interruptible, RecvOutcome};
use crate::pending::PendingResponses;
use crate::selfpipe::SelfPipe;
use crate::transport::Transport;

/// Owns the background thread that reads responses off the wire.
#[derive(Debug)]
pub(crate) struct Receiver {
    wake_pipe: Arc<SelfPipe>,
    handle: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Spawn the receiver thread, or return `None` if the self-pipe could
    /// not be created (in which case there is nothing to read or stop).
    pub(crate) fn spawn(transport: Arc<Transport>, pending: Arc<PendingResponses>) -> Option<Self> {
        let wake_pipe = Arc::new(SelfPipe::new()?);
        let thread_pipe = Arc::clone(&wake_pipe);

        let handle = thread::spawn(move || run(transport, pending, thread_pipe));

        Some(Self { wake_pipe, handle: Some(handle) })
    }

    /// Signal the worker to stop and join it.
    pub(crate) fn stop(&mut self) {
        self.wake_pipe.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(transport: Arc<Transport>, pending: Arc<PendingResponses>, wake_pipe: Arc<SelfPipe>) {
    let sock_fd = transport.raw_fd();
    let wake_fd = wake_pipe.read_fd();

    if sock_fd < 0 {
        // Half-dead transport: nothing will ever arrive, nothing to select on.
        return;
    }

    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        match recv_all_interruptible(sock_fd, wake_fd, &mut header_buf) {
            Ok(RecvOutcome::Complete) => {}
            Ok(RecvOutcome::Interrupted) => return,
            Err(e) => {
                log::warn!("comms: receiver header read failed, stopping: {e:#}");
                return;
            }
        }
        let header = Header::decode(&header_buf);

        let mut payload = vec![0u8; header.payload_size as usize];
        if !payload.is_empty() {
            match recv_all_interruptible(sock_fd, wake_fd, &mut payload) {
                Ok(RecvOutcome::Complete) => {}
                Ok(RecvOutcome::Interrupted) => return,
                Err(e) => {
                    log::warn!("comms: receiver payload read failed, stopping: {e:#}");
                    return;
                }
            }
        }

        wake_message(&pending, header.id, payload);
    }
}

/// Match a response to its parked request and notify the waiting caller.
///
/// A miss (no message parked on `id`) is logged and the response is
/// dropped — this can happen if the request timed out or was otherwise
/// abandoned on the client side; it is not treated as fatal.
fn wake_message(pending: &PendingResponses, id: crate::message::MessageId, payload: Vec<u8>) {
    match pending.take(id) {
        Some(message) => {
            // set_in_payload() must happen-before notify() so the woken
            // caller observes the payload once wait() returns.
            message.set_in_payload(payload);
            message.completion.notify();
        }
        None => {
            log::warn!("comms: response for unknown message id {id}, dropping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_ever_connecting_returns_promptly() {
        // raw_fd() on a disconnected transport is -1; select should still
        // be interruptible via the wake pipe rather than hanging.
        let transport = Arc::new(Transport::connect_uds("gpu-host-comms-receiver-test-xyz"));
        let pending = Arc::new(PendingResponses::new());
        let mut receiver = Receiver::spawn(transport, pending).expect("self-pipe create should succeed");
        receiver.stop();
    }
}
