//! Outbound side of the gateway connection.
//!
//! The core never owns a socket. It writes complete frames into a
//! [`FrameSink`]; the runtime's WebSocket server attaches and detaches the
//! live connection behind a [`ConnectionSlot`] as peers come and go.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{TransportError, TransportResult};

/// Something that accepts complete outbound frames.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Queues one serialized frame for the peer.
    async fn send_frame(&self, frame: Vec<u8>) -> TransportResult<()>;
}

/// Shared handle to a sink.
pub type BoxedFrameSink = Arc<dyn FrameSink>;

/// Identifies one attached connection.
pub type ConnectionId = u64;

struct Attached {
    id: ConnectionId,
    tx: mpsc::Sender<Vec<u8>>,
}

/// Holds the write channel of the currently active gateway connection.
///
/// Only one connection is active at a time; attaching a new one replaces the
/// previous writer.
#[derive(Default)]
pub struct ConnectionSlot {
    current: RwLock<Option<Attached>>,
    next_id: AtomicU64,
}

impl ConnectionSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `tx` the active writer and returns its connection id.
    ///
    /// Returns the id of the connection that was replaced, if any.
    pub fn attach(&self, tx: mpsc::Sender<Vec<u8>>) -> (ConnectionId, Option<ConnectionId>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self
            .current
            .write()
            .replace(Attached { id, tx })
            .map(|old| old.id);
        info!(connection = id, replaced = ?previous, "Gateway connection attached");
        (id, previous)
    }

    /// Detaches the writer if `id` is still the active connection.
    ///
    /// Returns `false` when a newer connection already took over.
    pub fn detach(&self, id: ConnectionId) -> bool {
        let mut current = self.current.write();
        match current.as_ref() {
            Some(attached) if attached.id == id => {
                *current = None;
                debug!(connection = id, "Gateway connection detached");
                true
            }
            _ => false,
        }
    }

    /// Returns whether a connection is attached.
    pub fn is_connected(&self) -> bool {
        self.current.read().is_some()
    }

    /// Returns the id of the active connection.
    pub fn current_id(&self) -> Option<ConnectionId> {
        self.current.read().as_ref().map(|a| a.id)
    }
}

#[async_trait]
impl FrameSink for ConnectionSlot {
    async fn send_frame(&self, frame: Vec<u8>) -> TransportResult<()> {
        // Clone the sender so the lock is released before awaiting.
        let tx = self
            .current
            .read()
            .as_ref()
            .map(|a| a.tx.clone())
            .ok_or(TransportError::NotConnected)?;

        tx.send(frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}
