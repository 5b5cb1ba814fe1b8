//! Subscription fan-out from room channels to local consumers.
//!
//! Each subscription owns a dedicated store stream and one pump task that
//! forwards payloads into a bounded buffer. The [`SubscriptionRegistry`]
//! keeps a cancellation handle per `(room_id, subscriber_id)` so supervising
//! code can force-close orphans, one room at a time or all at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::store::{StoreError, StoreStream};

type SubscriptionKey = (String, String);

/// Tracks every live subscription pump.
pub struct SubscriptionRegistry {
    /// Active pumps: (room_id, subscriber_id) -> cancel handle
    active: DashMap<SubscriptionKey, CancellationToken>,
    next_id: AtomicU64,
    /// Parent of every pump token. Replaced after `close_all()`.
    global_cancel: RwLock<CancellationToken>,
    /// Capacity of each consumer buffer.
    buffer: usize,
}

impl SubscriptionRegistry {
    /// Creates a registry whose consumers buffer up to `buffer` messages.
    pub fn new(buffer: usize) -> Self {
        Self {
            active: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
            buffer: buffer.max(1),
        }
    }

    /// Starts pumping `stream` into a new bounded buffer.
    ///
    /// The pump exits when the returned [`Subscription`] is cancelled or
    /// dropped, when the store stream errors or ends, or when the registry
    /// force-closes it. On every exit path it releases the store stream and
    /// unregisters itself.
    pub fn subscribe(self: &Arc<Self>, room_id: &str, stream: StoreStream) -> Subscription {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = self.global_cancel.read().child_token();
        let key = (room_id.to_string(), id.clone());

        self.active.insert(key.clone(), token.clone());
        log::debug!(
            "[Fanout] Subscription {} opened for room {} (total: {})",
            id,
            room_id,
            self.active.len()
        );

        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(Arc::clone(self).pump(key, stream, tx, token.clone()));

        Subscription {
            id,
            room_id: room_id.to_string(),
            rx,
            _guard: token.clone().drop_guard(),
            cancel_token: token,
        }
    }

    async fn pump(
        self: Arc<Self>,
        key: SubscriptionKey,
        mut stream: StoreStream,
        tx: mpsc::Sender<Bytes>,
        token: CancellationToken,
    ) {
        let (room_id, id) = (&key.0, &key.1);

        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    log::debug!("[Fanout] {} cancelled", id);
                    break;
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(payload)) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            log::debug!("[Fanout] {} cancelled while sending", id);
                            break;
                        }
                        sent = tx.send(payload) => {
                            if sent.is_err() {
                                log::debug!("[Fanout] {} consumer dropped", id);
                                break;
                            }
                        }
                    }
                }
                Some(Err(StoreError::Lagged(missed))) => {
                    log::warn!(
                        "[Fanout] {} (room {}) missed {} message(s)",
                        id,
                        room_id,
                        missed
                    );
                }
                Some(Err(e)) => {
                    log::warn!("[Fanout] {} store stream failed: {}", id, e);
                    break;
                }
                None => {
                    log::debug!("[Fanout] {} channel closed for room {}", id, room_id);
                    break;
                }
            }
        }

        drop(stream);
        self.unregister(&key);
    }

    fn unregister(&self, key: &SubscriptionKey) {
        if self.active.remove(key).is_some() {
            log::debug!(
                "[Fanout] Subscription {} closed (remaining: {})",
                key.1,
                self.active.len()
            );
        }
    }

    /// Cancels one subscription. Returns `false` if it is not active.
    pub fn cancel(&self, room_id: &str, subscriber_id: &str) -> bool {
        let key = (room_id.to_string(), subscriber_id.to_string());
        match self.active.get(&key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every subscription to `room_id`. Returns how many were signaled.
    pub fn cancel_room(&self, room_id: &str) -> usize {
        let mut count = 0;
        for entry in self.active.iter().filter(|e| e.key().0 == room_id) {
            entry.value().cancel();
            count += 1;
        }
        if count > 0 {
            log::info!("[Fanout] Cancelled {} subscription(s) for room {}", count, room_id);
        }
        count
    }

    /// Force-closes every subscription.
    ///
    /// Returns the number of subscriptions that were signaled. New
    /// subscriptions can still be opened afterwards.
    pub fn close_all(&self) -> usize {
        let count = self.active.len();
        if count > 0 {
            log::info!("[Fanout] Force-closing {} subscription(s)", count);
        }
        let mut guard = self.global_cancel.write();
        guard.cancel();
        *guard = CancellationToken::new();
        count
    }

    /// Number of pumps that have not yet exited.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Rooms with at least one active subscription.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.active.iter().map(|e| e.key().0.clone()).collect();
        rooms.sort();
        rooms.dedup();
        rooms
    }
}

/// Consumer end of one subscription.
///
/// Dropping it cancels the pump.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    room_id: String,
    rx: mpsc::Receiver<Bytes>,
    _guard: DropGuard,
    cancel_token: CancellationToken,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Receives the next payload. `None` once the pump has exited and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Signals the pump to stop.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}
