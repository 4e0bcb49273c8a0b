//! The transmitter worker: drains the task queue and writes messages to the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::framing::Header;
use crate::message::{Message, MessageKind};
use crate::pending::PendingResponses;
use crate::queue::TaskQueue;
use crate::transport::Transport;

/// Owns the background thread that serializes and sends queued messages.
#[derive(Debug)]
pub(crate) struct Transmitter {
    queue: Arc<TaskQueue>,
    stop_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Transmitter {
    /// Spawn the transmitter thread.
    ///
    /// `queue` is shared with [`crate::comms::Comms`], which enqueues
    /// outbound messages; `pending` is shared with the receiver, which
    /// matches responses against parked `TX_RX` requests.
    pub(crate) fn spawn(transport: Arc<Transport>, queue: Arc<TaskQueue>, pending: Arc<PendingResponses>) -> Self {
        let stop_requested = Arc::new(AtomicBool::new(false));
        let thread_queue = Arc::clone(&queue);
        let thread_stop = Arc::clone(&stop_requested);

        let handle = thread::spawn(move || run(transport, thread_queue, pending, thread_stop));

        Self { queue, stop_requested, handle: Some(handle) }
    }

    /// Signal the worker to drain the queue and exit, then join it.
    ///
    /// Must be called before the receiver is stopped and before the
    /// socket is closed, so any last queued sends reach the wire.
    pub(crate) fn stop(&mut self) {
        self.stop_requested.store(true, Ordering::Relaxed);
        // Unblock a transmitter parked in queue.get() with nothing left to send.
        self.queue.put(Arc::new(Message::stop()));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(transport: Arc<Transport>, queue: Arc<TaskQueue>, pending: Arc<PendingResponses>, stop_requested: Arc<AtomicBool>) {
    loop {
        if stop_requested.load(Ordering::Relaxed) && queue.is_empty() {
            break;
        }

        let message = queue.get();
        if message.kind == MessageKind::Stop {
            continue;
        }

        if message.kind == MessageKind::TxRx {
            // Park before sending: the response can race back before this
            // call returns, and it must find the entry already present.
            pending.park(Arc::clone(&message));
        }

        let payload = message.take_out_payload();
        let header = Header::for_message(message.kind, message.endpoint, message.id, payload.len());

        let sent = transport.send_all(&header.encode()) && transport.send_all(&payload);
        if !sent {
            log::error!("comms: failed to send message {} to endpoint {}", message.id, message.endpoint);
        }

        if message.kind == MessageKind::Tx {
            message.completion.notify();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_drains_queue_before_joining() {
        // Transport with no listener: sends fail but the loop must still
        // drain and exit instead of hanging.
        let transport = Arc::new(Transport::connect_uds("gpu-host-comms-transmitter-test-xyz"));
        let queue = Arc::new(TaskQueue::new());
        let pending = Arc::new(PendingResponses::new());

        queue.put(Arc::new(Message::new(1, MessageKind::TxAsync, 0, vec![1, 2, 3])));

        let mut transmitter = Transmitter::spawn(transport, queue, pending);
        transmitter.stop();
    }
}
