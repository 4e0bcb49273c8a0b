//! The parking buffer: outstanding `TX_RX` requests awaiting a response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::message::{Message, MessageId};

/// Maps an in-flight request's id to the [`Message`] parked on it.
///
/// The transmitter parks a message here before writing it to the wire;
/// the receiver looks it up by id when a response header comes back,
/// fills in the response payload, and notifies its completion latch.
#[derive(Debug, Default)]
pub(crate) struct PendingResponses {
    parked: Mutex<HashMap<MessageId, Arc<Message>>>,
}

impl PendingResponses {
    pub(crate) fn new() -> Self {
        Self { parked: Mutex::new(HashMap::new()) }
    }

    /// Park a message so its eventual response can be matched by id.
    pub(crate) fn park(&self, message: Arc<Message>) {
        let mut parked = self.parked.lock().expect("pending map lock poisoned");
        parked.insert(message.id, message);
    }

    /// Remove and return the message parked on `id`, if any.
    ///
    /// A miss means a response arrived for an id that was never parked
    /// (or was already taken) — the caller logs and drops the response.
    pub(crate) fn take(&self, id: MessageId) -> Option<Arc<Message>> {
        let mut parked = self.parked.lock().expect("pending map lock poisoned");
        parked.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn msg(id: MessageId) -> Arc<Message> {
        Arc::new(Message::new(1, MessageKind::TxRx, id, Vec::new()))
    }

    #[test]
    fn park_then_take_returns_same_message() {
        let pending = PendingResponses::new();
        let message = msg(42);
        pending.park(Arc::clone(&message));

        let taken = pending.take(42).expect("should find parked message");
        assert_eq!(taken.id, 42);
    }

    #[test]
    fn take_on_unknown_id_returns_none() {
        let pending = PendingResponses::new();
        assert!(pending.take(999).is_none());
    }

    #[test]
    fn take_removes_entry_so_second_take_misses() {
        let pending = PendingResponses::new();
        pending.park(msg(1));
        assert!(pending.take(1).is_some());
        assert!(pending.take(1).is_none());
    }
}
