//! An asynchronous ICMP echo ("ping") engine.
//!
//! Resolves a host, opens an ICMP datagram socket, sends Echo Requests, and
//! correlates inbound Echo Replies back to the sender, exposing everything
//! as a stream of [`event::PingEvent`]s to a consumer-supplied sink.
//!
//! This crate is the engine only: it has no opinion on send cadence, result
//! printing, or UI. A driver (see `ping-demo` in this workspace) supplies
//! those and calls [`engine::Pinger::start`], [`engine::Pinger::send_ping`],
//! [`engine::Pinger::drive`], and [`engine::Pinger::stop`].

pub mod engine;
pub mod error;
pub mod event;
pub mod resolve;
pub mod socket;
pub mod wire;

pub use engine::{DriveOutcome, Pinger, State};
pub use error::PingError;
pub use event::{EventSink, PingEvent};
pub use resolve::FamilyPolicy;
