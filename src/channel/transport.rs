/// Text-only transports the message channel can ride on
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result};

/// Outbound half of a text transport
///
/// Delivery is fire-and-forget; ordering is whatever the underlying medium
/// guarantees. Both built-in transports preserve send order.
pub trait Transport: Send + Sync {
    fn post(&self, text: String) -> Result<()>;
}

/// In-process transport backed by an unbounded channel
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<String>,
}

/// One side of a connected in-memory pair
pub struct Endpoint {
    /// Posts to the opposite side
    pub transport: Arc<MemoryTransport>,
    /// Text posted by the opposite side, in send order
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create two connected endpoints (e.g. host page and chart frame)
    pub fn pair() -> (Endpoint, Endpoint) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Endpoint {
            transport: Arc::new(MemoryTransport { tx: b_tx }),
            inbound: a_rx,
        };
        let b = Endpoint {
            transport: Arc::new(MemoryTransport { tx: a_tx }),
            inbound: b_rx,
        };

        (a, b)
    }
}

impl Transport for MemoryTransport {
    fn post(&self, text: String) -> Result<()> {
        self.tx
            .send(text)
            .map_err(|_| BridgeError::TransportClosed("peer endpoint dropped".to_string()))
    }
}
