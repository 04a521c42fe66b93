//! Registry of open WebSocket sessions.
//!
//! Each session owns a cancellation token that fires when the socket closes
//! or the server drains. `DashMap` keeps registration and removal lock-free
//! across sessions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a connection, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Close frame a session sends when it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: &'static str,
}

impl CloseReason {
    /// Normal closure after the session handled its message(s).
    pub const SERVED: Self = Self {
        code: 1000,
        reason: "request served",
    };

    /// The server is going away.
    pub const SHUTTING_DOWN: Self = Self {
        code: 1001,
        reason: "server shutting down",
    };
}

/// Handle to one open socket session.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Route the socket was opened on.
    pub target: String,
    pub connected_at: Instant,
    cancel: CancellationToken,
    draining: AtomicBool,
}

impl ConnectionHandle {
    /// Token cancelled when this connection goes away.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Marks the connection as closed and cancels in-flight work.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Cancels the session because the server is shutting down.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Close frame appropriate for how the session is ending.
    #[must_use]
    pub fn close_reason(&self) -> CloseReason {
        if self.is_draining() {
            CloseReason::SHUTTING_DOWN
        } else {
            CloseReason::SERVED
        }
    }
}

/// Thread-safe registry of all open sessions.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    ///
    /// Connection IDs start at 1 (0 is reserved as "no connection").
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a session opened on `target`.
    pub fn register(&self, target: impl Into<String>) -> Arc<ConnectionHandle> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle {
            id,
            target: target.into(),
            connected_at: Instant::now(),
            cancel: CancellationToken::new(),
            draining: AtomicBool::new(false),
        });
        self.connections.insert(id, Arc::clone(&handle));
        handle
    }

    /// Removes a connection from the registry, returning its handle if found.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    /// Looks up a connection by ID.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|r| r.value().clone())
    }

    /// Returns the total number of open sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Removes every session and cancels it with the shutdown close reason.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let keys: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();

        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, handle)) = self.connections.remove(&key) {
                handle.begin_drain();
                handles.push(handle);
            }
        }
        handles
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
