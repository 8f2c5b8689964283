//! The consumer-facing event stream surface.

use std::net::SocketAddr;

use crate::error::PingError;

/// One occurrence in a [`crate::engine::Pinger`] session's lifetime.
///
/// `started` is always first, if any event is delivered at all; `failed` is
/// always last and terminal. `sent(seq=N)` always precedes any
/// `received(seq=N)` for the same instance.
#[derive(Debug)]
pub enum PingEvent {
    /// The session is active and bound to this address.
    Started(SocketAddr),
    /// `packet` was written to the wire as sequence `sequence`.
    Sent { packet: Vec<u8>, sequence: u16 },
    /// Sending `packet` as `sequence` failed; the session stays active.
    SendFailed {
        packet: Vec<u8>,
        sequence: u16,
        error: PingError,
    },
    /// A validated echo reply, ICMP header stripped down to the ICMP layer
    /// (IPv4 header already removed for v4 replies).
    Received { packet: Vec<u8>, sequence: u16 },
    /// An inbound datagram failed validation and was discarded.
    Unexpected(Vec<u8>),
    /// Terminal: the session has ended with an error. No further events
    /// follow until a new `Pinger` is started.
    Failed(PingError),
}

/// The consumer's event callback.
///
/// A blanket impl covers any `FnMut(PingEvent)`, so closures work directly;
/// implement this trait instead when the consumer needs to hold state beyond
/// what a closure's captures allow.
pub trait EventSink {
    fn on_event(&mut self, event: PingEvent);
}

impl<F: FnMut(PingEvent)> EventSink for F {
    fn on_event(&mut self, event: PingEvent) {
        self(event)
    }
}
