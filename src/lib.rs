//! Device-to-host messaging core.
//!
//! Wraps a Unix domain socket or TCP connection to a host-side collector
//! with three send modes (fire-and-forget, send-and-confirm,
//! send-and-wait-for-response) plus endpoint name resolution, all driven
//! by a pair of background worker threads so the calling thread is never
//! blocked on wire I/O except when it explicitly asks to be (`tx`/`tx_rx`).
//!
//! A failed or never-attempted connection degrades to a half-dead no-op
//! mode rather than returning an error — this is telemetry, and telemetry
//! must never be allowed to crash or stall the thing it's instrumenting.

mod comms;
mod framing;
mod io_loop;
mod latch;
mod message;
mod pending;
mod queue;
mod receiver;
mod registry;
mod selfpipe;
mod transmitter;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod test_server;

pub use comms::Comms;
pub use message::{EndpointId, MessageId, NO_ENDPOINT, REGISTRY_ENDPOINT};
