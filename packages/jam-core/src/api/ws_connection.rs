//! WebSocket connection tracking.
//!
//! - `WsConnectionManager`: tracks which user is connected to which room
//! - `ConnectionGuard`: RAII guard that unregisters on disconnect

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

struct ConnectionState {
    room_id: String,
    user_id: String,
    cancel_token: CancellationToken,
}

/// Manages all active jam WebSocket connections.
///
/// Every connection token is a child of one global token so `close_all`
/// is a single cancel. `close_room` cancels the connections of one room.
pub struct WsConnectionManager {
    /// connection_id -> state
    connections: DashMap<String, ConnectionState>,
    next_id: AtomicU64,
    /// Replaced with a fresh token after `close_all()`.
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers `user_id`'s connection to `room_id`.
    ///
    /// The returned guard unregisters the connection when dropped.
    pub fn register(self: &Arc<Self>, room_id: &str, user_id: &str) -> ConnectionGuard {
        let conn_id = format!("ws-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_token = self.global_cancel.read().child_token();

        self.connections.insert(
            conn_id.clone(),
            ConnectionState {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                cancel_token: cancel_token.clone(),
            },
        );
        log::info!(
            "[WS] {} registered for {} in room {} (total: {})",
            conn_id,
            user_id,
            room_id,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, id: &str) {
        if let Some((_, state)) = self.connections.remove(id) {
            log::info!(
                "[WS] {} unregistered ({} in room {}, remaining: {})",
                id,
                state.user_id,
                state.room_id,
                self.connections.len()
            );
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections currently attached to `room_id`.
    pub fn room_connection_count(&self, room_id: &str) -> usize {
        self.connections
            .iter()
            .filter(|c| c.room_id == room_id)
            .count()
    }

    /// Force-closes every connection in `room_id`. Returns how many were signaled.
    pub fn close_room(&self, room_id: &str) -> usize {
        let mut count = 0;
        for conn in self.connections.iter().filter(|c| c.room_id == room_id) {
            conn.cancel_token.cancel();
            count += 1;
        }
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s) in room {}", count, room_id);
        }
        count
    }

    /// Force-closes all connections. New connections are still accepted afterwards.
    ///
    /// Returns the number of connections that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters a connection when dropped, including on panic or early return.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled when this connection is force-closed.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}
