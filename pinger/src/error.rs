//! Error kinds surfaced by the pinger engine.

use thiserror::Error;

/// A failure kind surfaced by the pinger engine.
///
/// `start`/socket-open failures and read-path failures are fatal and end the
/// session via [`crate::event::PingEvent::Failed`]; `send_ping` failures are
/// non-fatal and surface as [`crate::event::PingEvent::SendFailed`] instead.
#[derive(Debug, Error)]
pub enum PingError {
    #[error("no address for the requested family was found")]
    HostNotFound,

    #[error("name resolution failed: {0}")]
    ResolutionFailed(#[source] std::io::Error),

    #[error("socket operation failed: {0}")]
    Posix(#[source] std::io::Error),

    #[error("requested address family is neither IPv4 nor IPv6")]
    ProtocolUnsupported,
}
