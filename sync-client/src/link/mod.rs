//! Link abstraction for misync.
//!
//! A link moves opaque messages between addressed devices and reports
//! whether a directed send was acknowledged. It never interprets payloads:
//! the master and device drivers pass whatever they receive to the owning
//! interface themselves.
//!
//! # Design
//!
//! - `send()` delivers one message and resolves once it was acknowledged
//!   (or the timeout expired)
//! - `receive()` waits up to a deadline for the next incoming packet
//! - `update()` gives the link a chance to do housekeeping
//!
//! # Example
//!
//! ```ignore
//! let link = MockLink::new(Address::local(1));
//! link.send(Address::local(44), &[10], Duration::from_millis(100)).await?;
//! let packet = link.receive(Duration::from_millis(10)).await?;
//! ```

mod mock;

pub use mock::{MockLink, Responder};

use async_trait::async_trait;
use misync_types::Address;
use std::time::Duration;
use thiserror::Error;

/// Largest payload a link must be able to carry.
pub const MAX_PAYLOAD: usize = 1024;

/// Link errors.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Receiver did not acknowledge in time.
    #[error("no acknowledgement from {0}")]
    NoAck(Address),

    /// No route to the destination.
    #[error("unknown destination {0}")]
    UnknownDestination(Address),

    /// Payload exceeds [`MAX_PAYLOAD`].
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Link has been closed.
    #[error("link closed")]
    Closed,

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether the failure only means the peer did not answer.
    ///
    /// Such failures count against the peer's liveness rather than
    /// aborting the caller.
    pub fn is_unacknowledged(&self) -> bool {
        matches!(self, Self::NoAck(_) | Self::UnknownDestination(_))
    }
}

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sender address
    pub from: Address,
    /// Message bytes, command byte first
    pub payload: Vec<u8>,
}

/// Transport between the master and its modules.
#[async_trait]
pub trait Link: Send + Sync {
    /// Own address on the link.
    fn address(&self) -> Address;

    /// Send one message. `Ok` means the receiver acknowledged it.
    ///
    /// Broadcasts are never acknowledged and return `Ok` once sent.
    async fn send(&self, to: Address, payload: &[u8], timeout: Duration) -> Result<(), LinkError>;

    /// Next incoming packet, waiting at most `wait`.
    async fn receive(&self, wait: Duration) -> Result<Option<Packet>, LinkError>;

    /// Periodic housekeeping.
    async fn update(&self) -> Result<(), LinkError> {
        Ok(())
    }
}
