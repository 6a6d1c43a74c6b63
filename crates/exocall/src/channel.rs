//! In-process duplex transport.
//!
//! Connects two endpoints in the same process, the way a worker boundary or
//! an iframe bridge would, without any serialization.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::packet::Packet;
use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportError;

/// A duplex channel transport using tokio mpsc channels.
///
/// Packets sent via `send()` appear on the peer's `recv()` and vice versa.
pub struct DuplexChannelTransport {
    tx: mpsc::UnboundedSender<Packet>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Packet>>>,
}

impl DuplexChannelTransport {
    /// Creates a new transport from separate tx and rx channels.
    pub fn new(
        tx: mpsc::UnboundedSender<Packet>,
        rx: mpsc::UnboundedReceiver<Packet>,
    ) -> Self {
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Creates a pair of transports connected to each other.
    ///
    /// Packets sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self::new(tx_a, rx_b);
        let b = Self::new(tx_b, rx_a);

        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, packet: Packet) -> transport::Result<()> {
        self.tx
            .send(packet)
            .map_err(|_| TransportError::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Packet>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
