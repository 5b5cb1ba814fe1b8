//! Room state storage on top of the Session Store.
//!
//! Translates jam domain operations into the fixed key-naming scheme
//! (`jam:{room}:{suffix}`) and publishes encoded [`JamMessage`]s on the
//! room's event channel.
//!
//! Nothing here is transactional. Each method is a handful of independent
//! store calls and a concurrent caller can interleave between any two of
//! them. Every mutation refreshes the idle expiry of the room's keys.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::directory::ResolvedDisplay;
use crate::error::JamResult;
use crate::protocol::{JamMessage, MessageType};
use crate::protocol_constants::{
    EVENTS_SUFFIX, FIELD_PAUSED, FIELD_POSITION, FIELD_TRACK_ID, HOST_SUFFIX, IMAGES_SUFFIX,
    LAST_LOAD_SUFFIX, NAMES_SUFFIX, PARTICIPANTS_SUFFIX, READY_SUFFIX, ROOM_KEY_PREFIX,
    TRACK_SUFFIX,
};
use crate::store::{SessionStore, StoreError, StoreStream};
use crate::utils::new_room_id;

/// Every store key belonging to one room.
#[derive(Debug, Clone)]
pub(crate) struct RoomKeys {
    pub host: String,
    pub track: String,
    pub participants: String,
    pub ready: String,
    pub names: String,
    pub images: String,
    pub last_load: String,
    pub events: String,
}

impl RoomKeys {
    pub fn new(room_id: &str) -> Self {
        let key = |suffix: &str| format!("{ROOM_KEY_PREFIX}:{room_id}:{suffix}");
        Self {
            host: key(HOST_SUFFIX),
            track: key(TRACK_SUFFIX),
            participants: key(PARTICIPANTS_SUFFIX),
            ready: key(READY_SUFFIX),
            names: key(NAMES_SUFFIX),
            images: key(IMAGES_SUFFIX),
            last_load: key(LAST_LOAD_SUFFIX),
            events: key(EVENTS_SUFFIX),
        }
    }

    /// Keys whose expiry follows room activity.
    fn state_keys(&self) -> [&str; 6] {
        [
            &self.host,
            &self.track,
            &self.participants,
            &self.ready,
            &self.names,
            &self.images,
        ]
    }

    /// Every key to delete when the room is destroyed.
    fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state_keys().iter().map(|k| k.to_string()).collect();
        keys.push(self.last_load.clone());
        keys
    }
}

/// Current transport state of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackState {
    pub track_id: String,
    /// Elapsed offset in milliseconds.
    pub position: i64,
    pub paused: bool,
}

/// Jam room storage and broadcast.
pub struct RoomRepository {
    store: Arc<dyn SessionStore>,
    /// Expiry refreshed on every mutation. `None` keeps rooms forever.
    idle_ttl: Option<Duration>,
}

impl RoomRepository {
    /// Creates a repository over the given store.
    pub fn new(store: Arc<dyn SessionStore>, idle_ttl: Option<Duration>) -> Self {
        Self { store, idle_ttl }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Allocates a room id and stores the host with paused track state.
    pub async fn create_room(
        &self,
        host_id: &str,
        track_id: &str,
        position: i64,
    ) -> JamResult<String> {
        let room_id = new_room_id();
        let keys = RoomKeys::new(&room_id);

        self.store.set(&keys.host, host_id, None).await?;
        self.store
            .hset(
                &keys.track,
                &[
                    (FIELD_TRACK_ID, track_id.to_string()),
                    (FIELD_POSITION, position.to_string()),
                    (FIELD_PAUSED, true.to_string()),
                ],
            )
            .await?;
        self.touch(&keys).await?;

        log::info!(
            "[RoomRepo] Created room {} (host={}, track={})",
            room_id,
            host_id,
            track_id
        );
        Ok(room_id)
    }

    /// Whether the room currently exists.
    pub async fn exists_room(&self, room_id: &str) -> JamResult<bool> {
        Ok(self.get_host(room_id).await?.is_some())
    }

    /// Reads the host id. `None` means the room does not exist.
    pub async fn get_host(&self, room_id: &str) -> JamResult<Option<String>> {
        Ok(self.store.get(&RoomKeys::new(room_id).host).await?)
    }

    /// Deletes every key of the room and closes its event channel.
    pub async fn destroy_room(&self, room_id: &str) -> JamResult<()> {
        let keys = RoomKeys::new(room_id);
        let removed = self.store.del(&keys.all_keys()).await?;
        self.store.close_channel(&keys.events).await?;
        log::info!("[RoomRepo] Destroyed room {} ({} key(s))", room_id, removed);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport state
    // ─────────────────────────────────────────────────────────────────────────

    /// Reads the current track, position and pause flag.
    pub async fn track_state(&self, room_id: &str) -> JamResult<TrackState> {
        let keys = RoomKeys::new(room_id);
        let fields = self.store.hgetall(&keys.track).await?;

        let position = match fields.get(FIELD_POSITION) {
            Some(raw) => raw.parse().map_err(|_| StoreError::InvalidValue {
                key: keys.track.clone(),
                field: FIELD_POSITION.to_string(),
            })?,
            None => 0,
        };
        // An unreadable flag errs on the side of paused.
        let paused = fields.get(FIELD_PAUSED).map_or(true, |v| v != "false");

        Ok(TrackState {
            track_id: fields.get(FIELD_TRACK_ID).cloned().unwrap_or_default(),
            position,
            paused,
        })
    }

    pub async fn set_paused(&self, room_id: &str, paused: bool) -> JamResult<()> {
        let keys = RoomKeys::new(room_id);
        self.store
            .hset(&keys.track, &[(FIELD_PAUSED, paused.to_string())])
            .await?;
        self.touch(&keys).await
    }

    pub async fn set_position(&self, room_id: &str, position: i64) -> JamResult<()> {
        let keys = RoomKeys::new(room_id);
        self.store
            .hset(&keys.track, &[(FIELD_POSITION, position.to_string())])
            .await?;
        self.touch(&keys).await
    }

    /// Switches to a new track: position 0, paused, readiness cleared.
    pub async fn load_track(&self, room_id: &str, track_id: &str) -> JamResult<()> {
        let keys = RoomKeys::new(room_id);
        self.store
            .hset(
                &keys.track,
                &[
                    (FIELD_TRACK_ID, track_id.to_string()),
                    (FIELD_POSITION, 0.to_string()),
                    (FIELD_PAUSED, true.to_string()),
                ],
            )
            .await?;
        self.store.del(&[keys.ready.clone()]).await?;
        self.touch(&keys).await
    }

    /// Whether a `load` for `track_id` was broadcast within the dedup window.
    pub async fn is_duplicate_load(&self, room_id: &str, track_id: &str) -> JamResult<bool> {
        let keys = RoomKeys::new(room_id);
        Ok(self.store.get(&keys.last_load).await?.as_deref() == Some(track_id))
    }

    /// Records that a `load` for `track_id` was just broadcast.
    pub async fn record_load(&self, room_id: &str, track_id: &str, window: Duration) -> JamResult<()> {
        if window.is_zero() {
            return Ok(());
        }
        let keys = RoomKeys::new(room_id);
        self.store
            .set(&keys.last_load, track_id, Some(window))
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Participants and readiness
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers a participant. Returns `true` if newly added.
    pub async fn add_participant(&self, room_id: &str, user_id: &str) -> JamResult<bool> {
        let keys = RoomKeys::new(room_id);
        let added = self.store.sadd(&keys.participants, user_id).await?;
        self.touch(&keys).await?;
        Ok(added)
    }

    /// Removes a participant along with its readiness and cached display info.
    ///
    /// Returns `true` if the user was a participant.
    pub async fn remove_participant(&self, room_id: &str, user_id: &str) -> JamResult<bool> {
        let keys = RoomKeys::new(room_id);
        let removed = self.store.srem(&keys.participants, user_id).await?;
        self.store.srem(&keys.ready, user_id).await?;
        self.store.hdel(&keys.names, &[user_id]).await?;
        self.store.hdel(&keys.images, &[user_id]).await?;
        self.touch(&keys).await?;
        Ok(removed)
    }

    /// Participant ids, sorted for stable snapshots.
    pub async fn participants(&self, room_id: &str) -> JamResult<Vec<String>> {
        let mut users = self
            .store
            .smembers(&RoomKeys::new(room_id).participants)
            .await?;
        users.sort();
        Ok(users)
    }

    pub async fn is_participant(&self, room_id: &str, user_id: &str) -> JamResult<bool> {
        Ok(self
            .store
            .sismember(&RoomKeys::new(room_id).participants, user_id)
            .await?)
    }

    pub async fn participant_count(&self, room_id: &str) -> JamResult<usize> {
        Ok(self
            .store
            .scard(&RoomKeys::new(room_id).participants)
            .await?)
    }

    /// Marks a user ready for the current track. Returns `true` if newly ready.
    pub async fn mark_ready(&self, room_id: &str, user_id: &str) -> JamResult<bool> {
        let keys = RoomKeys::new(room_id);
        let added = self.store.sadd(&keys.ready, user_id).await?;
        self.touch(&keys).await?;
        Ok(added)
    }

    pub async fn ready_count(&self, room_id: &str) -> JamResult<usize> {
        Ok(self.store.scard(&RoomKeys::new(room_id).ready).await?)
    }

    /// Ready users who are current participants. The host never counts.
    pub async fn ready_participant_count(&self, room_id: &str) -> JamResult<usize> {
        let keys = RoomKeys::new(room_id);
        let ready = self.store.smembers(&keys.ready).await?;
        if ready.is_empty() {
            return Ok(0);
        }
        let participants: HashSet<String> =
            self.store.smembers(&keys.participants).await?.into_iter().collect();
        Ok(ready.iter().filter(|u| participants.contains(*u)).count())
    }

    pub async fn is_ready(&self, room_id: &str, user_id: &str) -> JamResult<bool> {
        Ok(self
            .store
            .sismember(&RoomKeys::new(room_id).ready, user_id)
            .await?)
    }

    /// Readiness of every known user (host and participants).
    pub async fn readiness_map(&self, room_id: &str) -> JamResult<HashMap<String, bool>> {
        let keys = RoomKeys::new(room_id);
        let ready = self.store.smembers(&keys.ready).await?;

        let mut users = self.participants(room_id).await?;
        if let Some(host) = self.store.get(&keys.host).await? {
            users.push(host);
        }

        Ok(users
            .into_iter()
            .map(|user| {
                let loaded = ready.contains(&user);
                (user, loaded)
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Display cache
    // ─────────────────────────────────────────────────────────────────────────

    /// Caches resolved display metadata for a user in this room.
    pub async fn cache_display(
        &self,
        room_id: &str,
        user_id: &str,
        display: &ResolvedDisplay,
    ) -> JamResult<()> {
        let keys = RoomKeys::new(room_id);
        self.store
            .hset(&keys.names, &[(user_id, display.display_name.clone())])
            .await?;
        self.store
            .hset(&keys.images, &[(user_id, display.avatar_url.clone())])
            .await?;
        self.touch(&keys).await
    }

    /// Cached `(names, images)` maps for the room.
    pub async fn display_cache(
        &self,
        room_id: &str,
    ) -> JamResult<(HashMap<String, String>, HashMap<String, String>)> {
        let keys = RoomKeys::new(room_id);
        let names = self.store.hgetall(&keys.names).await?;
        let images = self.store.hgetall(&keys.images).await?;
        Ok((names, images))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Snapshot and broadcast
    // ─────────────────────────────────────────────────────────────────────────

    /// Builds the `init` message for a joining client.
    ///
    /// Returns `None` if the room does not exist.
    pub async fn snapshot(&self, room_id: &str) -> JamResult<Option<JamMessage>> {
        let Some(host_id) = self.get_host(room_id).await? else {
            return Ok(None);
        };
        let track = self.track_state(room_id).await?;
        let users = self.participants(room_id).await?;
        let loaded = self.readiness_map(room_id).await?;
        let (mut names, mut images) = self.display_cache(room_id).await?;

        // Every known user gets an entry, cached or not.
        for user in users.iter().chain(std::iter::once(&host_id)) {
            names.entry(user.clone()).or_default();
            images.entry(user.clone()).or_default();
        }

        let mut msg = JamMessage::new(MessageType::Init);
        msg.track_id = Some(track.track_id);
        msg.position = track.position;
        msg.paused = Some(track.paused);
        msg.host_id = Some(host_id);
        msg.users = Some(users);
        msg.loaded = Some(loaded);
        msg.user_names = Some(names);
        msg.user_images = Some(images);
        Ok(Some(msg))
    }

    /// Publishes a message on the room's event channel.
    ///
    /// Returns the number of subscribers that received it.
    pub async fn broadcast(&self, room_id: &str, msg: &JamMessage) -> JamResult<usize> {
        let payload = Bytes::from(msg.encode()?);
        let delivered = self
            .store
            .publish(&RoomKeys::new(room_id).events, payload)
            .await?;
        tracing::debug!(room_id, kind = %msg.kind, delivered, "jam_broadcast");
        Ok(delivered)
    }

    /// Opens a dedicated subscription to the room's event channel.
    pub async fn subscribe(&self, room_id: &str) -> JamResult<StoreStream> {
        Ok(self.store.subscribe(&RoomKeys::new(room_id).events).await?)
    }

    /// Refreshes the idle expiry of every room state key.
    async fn touch(&self, keys: &RoomKeys) -> JamResult<()> {
        let Some(ttl) = self.idle_ttl else {
            return Ok(());
        };
        for key in keys.state_keys() {
            self.store.expire(key, ttl).await?;
        }
        Ok(())
    }
}
