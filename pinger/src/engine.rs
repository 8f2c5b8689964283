//! The pinger engine: lifecycle, sequence space, and reply correlation.

use std::future::{poll_fn, Future};
use std::net::SocketAddr;
use std::pin::Pin;

use rand::random;

use crate::error::PingError;
use crate::event::{EventSink, PingEvent};
use crate::resolve::{self, FamilyPolicy};
use crate::socket::{Family, IcmpTransport};
use crate::wire;

/// Pluggable send/receive transport, generic so tests can substitute a stub
/// that never touches a real socket (see `send_ping`'s scenarios, which
/// explicitly call for a stub transport).
pub trait Transport: Sized {
    fn open(family: Family) -> Result<Self, PingError>;
    fn send(&self, target: SocketAddr, bytes: &[u8]) -> Result<usize, PingError>;
    fn recv(&self) -> impl std::future::Future<Output = Result<(Vec<u8>, SocketAddr), PingError>> + Send;
}

impl Transport for IcmpTransport {
    fn open(family: Family) -> Result<Self, PingError> {
        IcmpTransport::open(family)
    }

    fn send(&self, target: SocketAddr, bytes: &[u8]) -> Result<usize, PingError> {
        IcmpTransport::send(self, target, bytes)
    }

    async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), PingError> {
        IcmpTransport::recv(self).await
    }
}

/// Lifecycle state of a [`Pinger`]. `Stopped` and `Failed` are both terminal;
/// `Failed` differs only in that a `failed` event was emitted on the way in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
    Idle,
    Resolving,
    Active,
    Stopped,
    Failed,
}

impl State {
    fn is_terminal(self) -> bool {
        matches!(self, State::Stopped | State::Failed)
    }
}

/// What a driver should do after a [`Pinger::drive`] call returns.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DriveOutcome {
    /// Keep calling `drive` — the session is still live.
    Continue,
    /// The session ended (normally or via `failed`); stop calling `drive`.
    Stopped,
}

/// One ICMP echo session: identity, lifecycle, and sequence-number space.
///
/// `T` is the transport, defaulted to the real [`IcmpTransport`]; tests
/// substitute a stub that implements [`Transport`] without opening a socket.
pub struct Pinger<T: Transport = IcmpTransport> {
    host: String,
    policy: FamilyPolicy,
    identifier: u16,
    state: State,
    next_sequence: u16,
    wrapped: bool,
    bound_address: Option<SocketAddr>,
    family: Option<Family>,
    transport: Option<T>,
    resolve_handle: Option<tokio::task::JoinHandle<Result<SocketAddr, PingError>>>,
}

/// Reply sequence numbers are accepted within this many packets of
/// `next_sequence` once the counter has wrapped. 120 approximates a
/// two-minute max-packet-lifetime window at one packet per second.
const WRAPPED_ACCEPTANCE_WINDOW: u16 = 120;

impl<T: Transport> Pinger<T> {
    /// Allocate a new session. Picks a random 16-bit identifier. No I/O.
    pub fn new(host: impl Into<String>, policy: FamilyPolicy) -> Self {
        Self {
            host: host.into(),
            policy,
            identifier: random(),
            state: State::Idle,
            next_sequence: 0,
            wrapped: false,
            bound_address: None,
            family: None,
            transport: None,
            resolve_handle: None,
        }
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn next_sequence_number(&self) -> u16 {
        self.next_sequence
    }

    pub fn wrapped(&self) -> bool {
        self.wrapped
    }

    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.bound_address
    }

    /// Begin resolution. Precondition: `state == Idle`.
    ///
    /// Resolution happens on a spawned task so it never blocks the caller;
    /// call [`Pinger::drive`] in a loop to observe its completion (and,
    /// while `Active`, inbound replies).
    pub fn start(&mut self) {
        assert_eq!(
            self.state,
            State::Idle,
            "Pinger::start called while not Idle (double-start)"
        );
        self.state = State::Resolving;
        let host = self.host.clone();
        let policy = self.policy;
        self.resolve_handle = Some(tokio::spawn(async move { resolve::resolve(&host, policy).await }));
        log::debug!("pinger: resolving {}", self.host);
    }

    /// Idempotent. Cancels any pending resolution, closes the socket, and
    /// transitions to `Stopped`. Emits no event by itself.
    pub fn stop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(handle) = self.resolve_handle.take() {
            handle.abort();
        }
        self.transport = None;
        self.bound_address = None;
        self.family = None;
        self.state = State::Stopped;
        log::debug!("pinger: stopped");
    }

    /// Build and send one echo request using the current sequence number.
    ///
    /// Precondition: `state == Active`. The sequence number always advances
    /// by one, with 16-bit wraparound, regardless of whether the send
    /// succeeded; a send failure does not change the session's state.
    pub fn send_ping(&mut self, sink: &mut dyn EventSink, payload: Option<&[u8]>) {
        assert_eq!(
            self.state,
            State::Active,
            "send_ping requires an Active session"
        );
        let transport = self.transport.as_ref().expect("Active implies a transport");
        let target = self.bound_address.expect("Active implies a bound address");
        let family = self.family.expect("Active implies a known family");

        let sequence = self.next_sequence;
        let icmp_type = match family {
            Family::V4 => wire::ECHO_REQUEST_V4,
            Family::V6 => wire::ECHO_REQUEST_V6,
        };
        let packet = wire::build_echo(icmp_type, self.identifier, sequence, payload);
        let result = transport.send(target, &packet);

        let (next, rolled_over) = self.next_sequence.overflowing_add(1);
        self.next_sequence = next;
        if rolled_over {
            self.wrapped = true;
        }

        match result {
            Ok(_) => {
                log::trace!("pinger: sent seq={sequence}");
                sink.on_event(PingEvent::Sent { packet, sequence });
            }
            Err(error) => {
                log::trace!("pinger: send failed seq={sequence}: {error}");
                sink.on_event(PingEvent::SendFailed {
                    packet,
                    sequence,
                    error,
                });
            }
        }
    }

    /// Process exactly one unit of background work: a pending resolution
    /// completing, or one inbound datagram while `Active`. Call this in a
    /// loop (e.g. inside `tokio::select!` alongside the rest of a driver's
    /// own event sources) to drive the session forward.
    pub async fn drive(&mut self, sink: &mut dyn EventSink) -> DriveOutcome {
        match self.state {
            State::Idle => DriveOutcome::Continue,
            State::Stopped | State::Failed => DriveOutcome::Stopped,
            State::Resolving => {
                // Poll the handle in place rather than `take`ing it: if this
                // `drive()` future is dropped before the handle resolves
                // (e.g. a sibling `tokio::select!` branch wins), the handle
                // must stay in `self` so `stop()` can still abort it and a
                // later `drive()` call can resume awaiting it.
                let outcome = poll_fn(|cx| {
                    let handle = self
                        .resolve_handle
                        .as_mut()
                        .expect("Resolving implies a pending resolve task");
                    Pin::new(handle).poll(cx)
                })
                .await;
                self.resolve_handle = None;
                self.finish_resolution(outcome, sink)
            }
            State::Active => {
                let transport = self.transport.as_ref().expect("Active implies a transport");
                match transport.recv().await {
                    Ok((bytes, _peer)) => {
                        self.handle_inbound(bytes, sink);
                        DriveOutcome::Continue
                    }
                    Err(error) => {
                        log::error!("pinger: read path failed: {error}");
                        self.fail(error, sink);
                        DriveOutcome::Stopped
                    }
                }
            }
        }
    }

    fn finish_resolution(
        &mut self,
        outcome: Result<Result<SocketAddr, PingError>, tokio::task::JoinError>,
        sink: &mut dyn EventSink,
    ) -> DriveOutcome {
        // Defends against a resolution that completes after `stop()` raced it;
        // in practice `stop()` aborts the task, so this mostly documents the guarantee.
        if self.state != State::Resolving {
            return if self.state.is_terminal() {
                DriveOutcome::Stopped
            } else {
                DriveOutcome::Continue
            };
        }

        match outcome {
            Ok(Ok(address)) => self.open_socket(address, sink),
            Ok(Err(error)) => {
                self.fail(error, sink);
                DriveOutcome::Stopped
            }
            Err(join_error) if join_error.is_cancelled() => DriveOutcome::Stopped,
            Err(join_error) => {
                self.fail(
                    PingError::ResolutionFailed(std::io::Error::other(join_error)),
                    sink,
                );
                DriveOutcome::Stopped
            }
        }
    }

    fn open_socket(&mut self, address: SocketAddr, sink: &mut dyn EventSink) -> DriveOutcome {
        let family = Family::from(address);
        match T::open(family) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.family = Some(family);
                self.bound_address = Some(address);
                self.state = State::Active;
                log::debug!("pinger: active, bound to {address}");
                sink.on_event(PingEvent::Started(address));
                DriveOutcome::Continue
            }
            Err(error) => {
                self.fail(error, sink);
                DriveOutcome::Stopped
            }
        }
    }

    fn fail(&mut self, error: PingError, sink: &mut dyn EventSink) {
        self.transport = None;
        self.bound_address = None;
        self.family = None;
        self.state = State::Failed;
        sink.on_event(PingEvent::Failed(error));
    }

    /// Validate an inbound datagram and emit `Received` or `Unexpected`.
    fn handle_inbound(&mut self, bytes: Vec<u8>, sink: &mut dyn EventSink) {
        let family = self.family.expect("Active implies a known family");
        let validated = match family {
            Family::V4 => self.validate_v4(&bytes),
            Family::V6 => self.validate_v6(&bytes),
        };
        match validated {
            Some((sequence, icmp_offset)) => {
                log::trace!("pinger: received seq={sequence}");
                sink.on_event(PingEvent::Received {
                    packet: bytes[icmp_offset..].to_vec(),
                    sequence,
                });
            }
            None => sink.on_event(PingEvent::Unexpected(bytes)),
        }
    }

    fn validate_v4(&self, bytes: &[u8]) -> Option<(u16, usize)> {
        let offset = wire::icmp_offset_in_v4(bytes)?;
        let icmp_slice = &bytes[offset..];
        let header = wire::parse_icmp(icmp_slice)?;
        if wire::internet_checksum(icmp_slice) != header.checksum {
            return None;
        }
        if header.icmp_type != wire::ECHO_REPLY_V4 || header.code != 0 {
            return None;
        }
        if header.identifier != self.identifier {
            return None;
        }
        if !self.sequence_is_valid(header.sequence) {
            return None;
        }
        Some((header.sequence, offset))
    }

    fn validate_v6(&self, bytes: &[u8]) -> Option<(u16, usize)> {
        let header = wire::parse_icmp(bytes)?;
        if header.icmp_type != wire::ECHO_REPLY_V6 || header.code != 0 {
            return None;
        }
        if header.identifier != self.identifier {
            return None;
        }
        if !self.sequence_is_valid(header.sequence) {
            return None;
        }
        Some((header.sequence, 0))
    }

    /// Accept every sequence this instance has itself emitted, and reject
    /// anything it hasn't, tolerating the case where the sender has already
    /// wrapped past 0xFFFF.
    fn sequence_is_valid(&self, seq: u16) -> bool {
        if !self.wrapped {
            seq < self.next_sequence
        } else {
            self.next_sequence.wrapping_sub(seq) < WRAPPED_ACCEPTANCE_WINDOW
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A transport that never touches a real socket. Send behavior is
    /// scripted by index; inbound datagrams are fed through `inbound`.
    #[derive(Clone)]
    pub struct StubTransport {
        sent: Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>,
        fail_sends_at: Arc<Mutex<Vec<usize>>>,
        inbound: Arc<Mutex<std::collections::VecDeque<(Vec<u8>, SocketAddr)>>>,
    }

    impl StubTransport {
        pub fn new() -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                fail_sends_at: Arc::new(Mutex::new(Vec::new())),
                inbound: Arc::new(Mutex::new(std::collections::VecDeque::new())),
            }
        }

        pub fn fail_send_at_index(&self, index: usize) {
            self.fail_sends_at.lock().unwrap().push(index);
        }

        pub fn push_inbound(&self, bytes: Vec<u8>, from: SocketAddr) {
            self.inbound.lock().unwrap().push_back((bytes, from));
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Transport for StubTransport {
        fn open(_family: Family) -> Result<Self, PingError> {
            Ok(StubTransport::new())
        }

        fn send(&self, target: SocketAddr, bytes: &[u8]) -> Result<usize, PingError> {
            let index = self.sent.lock().unwrap().len();
            self.sent.lock().unwrap().push((target, bytes.to_vec()));
            if self.fail_sends_at.lock().unwrap().contains(&index) {
                return Err(PingError::Posix(std::io::Error::from_raw_os_error(105))); // ENOBUFS
            }
            Ok(bytes.len())
        }

        async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), PingError> {
            loop {
                if let Some(item) = self.inbound.lock().unwrap().pop_front() {
                    return Ok(item);
                }
                tokio::task::yield_now().await;
            }
        }
    }
}
