//! In-flight message records and the message-id allocator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::latch::CompletionLatch;

/// Destination endpoint address. `0` is reserved for the registry service.
pub type EndpointId = u8;

/// Reserved endpoint id meaning "no such service".
pub const NO_ENDPOINT: EndpointId = 0;

/// The endpoint id of the built-in registry service.
pub const REGISTRY_ENDPOINT: EndpointId = 0;

/// Sequence id used to match a `TX_RX` response to its request.
///
/// `0` means "not applicable" and is used on the wire for every kind other
/// than `TX_RX`.
pub type MessageId = u64;

/// The kind of a message.
///
/// `Stop` is an internal sentinel used only to unblock the transmitter's
/// queue wait; it is never written to the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Fire-and-forget. The caller never waits.
    TxAsync,
    /// Send, then wait for the bytes to have left the process.
    Tx,
    /// Send, then wait for a response from the host.
    TxRx,
    /// Internal-only: wakes a blocked transmitter so it can re-check its
    /// stop condition. Never reaches the wire.
    Stop,
}

impl MessageKind {
    /// The wire encoding for this kind, per the framing header.
    ///
    /// # Panics
    ///
    /// Panics if called on [`MessageKind::Stop`] — the spec requires that
    /// this sentinel never be serialized.
    pub fn wire_value(self) -> u8 {
        match self {
            MessageKind::TxAsync => 0,
            MessageKind::Tx => 1,
            MessageKind::TxRx => 2,
            MessageKind::Stop => panic!("STOP sentinel must never reach the wire"),
        }
    }
}

/// An in-flight message, shared between the calling thread, the
/// transmitter, and (for `TX_RX`) the receiver.
///
/// Constructed once per call by the [`crate::comms::Comms`] facade and
/// dropped once the caller has observed completion.
#[derive(Debug)]
pub struct Message {
    /// Destination endpoint.
    pub endpoint: EndpointId,
    /// The kind of message this is.
    pub kind: MessageKind,
    /// Sequence id; nonzero only for `TX_RX`.
    pub id: MessageId,
    /// Outbound payload. Taken by the transmitter when the message is sent.
    out_payload: Mutex<Option<Vec<u8>>>,
    /// Inbound payload, populated only for `TX_RX` once a response arrives.
    in_payload: Mutex<Option<Vec<u8>>>,
    /// Signaled once this message's lifecycle is complete.
    pub completion: CompletionLatch,
}

impl Message {
    /// Construct a new message carrying `payload` to `endpoint`.
    pub fn new(endpoint: EndpointId, kind: MessageKind, id: MessageId, payload: Vec<u8>) -> Self {
        Self {
            endpoint,
            kind,
            id,
            out_payload: Mutex::new(Some(payload)),
            in_payload: Mutex::new(None),
            completion: CompletionLatch::new(),
        }
    }

    /// Construct the internal STOP sentinel used to unblock the transmitter.
    pub fn stop() -> Self {
        Self::new(0, MessageKind::Stop, 0, Vec::new())
    }

    /// Take the outbound payload, consuming it. Returns an empty vector if
    /// already taken (should only ever be called once, by the transmitter).
    pub fn take_out_payload(&self) -> Vec<u8> {
        self.out_payload
            .lock()
            .expect("message out_payload lock poisoned")
            .take()
            .unwrap_or_default()
    }

    /// Store the response payload for a `TX_RX` message.
    ///
    /// Must happen-before [`CompletionLatch::notify`] so the waiting caller
    /// observes the payload once `wait()` returns.
    pub fn set_in_payload(&self, payload: Vec<u8>) {
        *self.in_payload.lock().expect("message in_payload lock poisoned") = Some(payload);
    }

    /// Take the response payload after the completion latch has fired.
    pub fn take_in_payload(&self) -> Vec<u8> {
        self.in_payload
            .lock()
            .expect("message in_payload lock poisoned")
            .take()
            .unwrap_or_default()
    }
}

/// Monotonically increasing allocator for `TX_RX` message ids, starting at 1.
///
/// `fetch_add` with relaxed ordering is sufficient: the id only needs to be
/// fixed before the message is enqueued, and the queue's own lock provides
/// the happens-before edge to the transmitter and receiver.
#[derive(Debug)]
pub struct MessageIdAllocator {
    next: AtomicU64,
}

impl MessageIdAllocator {
    /// Create a new allocator starting at 1.
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    /// Allocate the next id.
    pub fn next(&self) -> MessageId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MessageIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
