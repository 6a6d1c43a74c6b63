//! # Transport Abstraction
//!
//! A minimal, async interface for moving packets between endpoints.
//!
//! ## Philosophy
//!
//! - **Packet-Oriented**: The transport moves whole `Packet`s. Whether they
//!   cross as structured objects or as bytes (see `crate::json`) is the
//!   transport's business.
//! - **Duplex**: `send` and `recv` are independent. Correlation of calls and
//!   responses lives entirely in the registry, never in the transport.

use std::fmt;

use crate::packet::Packet;

/// Errors that occur at the channel layer.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The peer is unreachable or the channel was dropped.
    ConnectionLost(String),
    /// The packet could not be encoded for this channel.
    Encode(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Encode(msg) => write!(f, "Encode failed: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A channel that carries packets to and from one peer.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Hands a packet to the channel.
    ///
    /// # invariants
    /// - Must not interpret the packet beyond encoding it.
    /// - Must preserve the order of packets sent from one task.
    async fn send(&self, packet: Packet) -> Result<()>;

    /// Waits for the next inbound packet.
    ///
    /// Returns `Ok(None)` once the channel is closed. Push-style hosts that
    /// feed `Endpoint::route` themselves may return `Ok(None)` right away.
    async fn recv(&self) -> Result<Option<Packet>>;
}
