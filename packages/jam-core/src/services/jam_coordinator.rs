//! Session coordinator for jam rooms.
//!
//! Owns the authorization rules and the playback control state machine:
//! - room lifecycle (create, join, leave)
//! - host-only transport commands, checked against a fresh host lookup
//! - the readiness barrier that gates `play`
//! - typed event subscriptions for upstream transports
//!
//! Every operation is a short sequence of independent store calls. A
//! concurrent join, leave or load can land between any two of them; the
//! resulting glitches (an extra or missing `play`, out-of-order `load`s)
//! are corrected by the next triggering event.

use std::sync::Arc;
use std::time::Duration;

use crate::directory::{resolve_display_or_default, UserDirectory};
use crate::error::{JamError, JamResult};
use crate::protocol::{ClientCommand, JamMessage, MessageType};
use crate::services::room_repository::RoomRepository;
use crate::services::subscriptions::{Subscription, SubscriptionRegistry};
use crate::utils::validate_id;

/// Coordinates jam rooms on top of the [`RoomRepository`].
pub struct JamCoordinator {
    repo: Arc<RoomRepository>,
    directory: Arc<dyn UserDirectory>,
    subscriptions: Arc<SubscriptionRegistry>,
    load_dedup_window: Duration,
}

impl JamCoordinator {
    pub fn new(
        repo: Arc<RoomRepository>,
        directory: Arc<dyn UserDirectory>,
        subscriptions: Arc<SubscriptionRegistry>,
        load_dedup_window: Duration,
    ) -> Self {
        Self {
            repo,
            directory,
            subscriptions,
            load_dedup_window,
        }
    }

    pub fn repository(&self) -> &Arc<RoomRepository> {
        &self.repo
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Room lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Creates a room hosted by `host_id`, paused at `position` of `track_id`.
    ///
    /// Returns `(room_id, host_id)`.
    pub async fn create_jam(
        &self,
        host_id: &str,
        track_id: &str,
        position: i64,
    ) -> JamResult<(String, String)> {
        validate_id("host_id", host_id).map_err(JamError::InvalidRequest)?;
        validate_id("track_id", track_id).map_err(JamError::InvalidRequest)?;
        if position < 0 {
            return Err(JamError::InvalidRequest("position must be >= 0".into()));
        }

        let room_id = self.repo.create_room(host_id, track_id, position).await?;

        let display = resolve_display_or_default(self.directory.as_ref(), host_id).await;
        self.repo.cache_display(&room_id, host_id, &display).await?;

        log::info!("[Jam] {} created room {}", host_id, room_id);
        Ok((room_id, host_id.to_string()))
    }

    /// Joins `user_id` to a room and returns the `init` snapshot.
    ///
    /// The host rejoining only receives the snapshot. Anyone else is
    /// registered, pauses the room and is announced with `user:joined`.
    pub async fn join_jam(&self, room_id: &str, user_id: &str) -> JamResult<JamMessage> {
        validate_id("user_id", user_id).map_err(JamError::InvalidRequest)?;
        let host_id = self.require_host(room_id).await?;

        if host_id != user_id {
            // Enrichment first so the announcement carries it.
            let display = resolve_display_or_default(self.directory.as_ref(), user_id).await;
            self.repo.cache_display(room_id, user_id, &display).await?;
            self.repo.add_participant(room_id, user_id).await?;
            self.repo.set_paused(room_id, true).await?;

            let mut joined =
                JamMessage::user_joined(user_id, &display.display_name, &display.avatar_url);
            joined.paused = Some(true);
            self.repo.broadcast(room_id, &joined).await?;

            log::info!("[Jam] {} joined room {}", user_id, room_id);
            self.check_all_ready_and_play(room_id).await;
        } else {
            log::debug!("[Jam] Host {} rejoined room {}", user_id, room_id);
        }

        self.repo
            .snapshot(room_id)
            .await?
            .ok_or_else(|| JamError::RoomNotFound(room_id.to_string()))
    }

    /// Removes `user_id` from a room. The host leaving closes the room.
    pub async fn leave_jam(&self, room_id: &str, user_id: &str) -> JamResult<()> {
        let host_id = self.require_host(room_id).await?;

        if host_id == user_id {
            self.repo
                .broadcast(room_id, &JamMessage::new(MessageType::JamClosed))
                .await?;
            self.repo.destroy_room(room_id).await?;
            log::info!("[Jam] Host {} left, room {} closed", user_id, room_id);
            return Ok(());
        }

        if !self.repo.remove_participant(room_id, user_id).await? {
            log::debug!("[Jam] {} was not in room {}", user_id, room_id);
            return Ok(());
        }
        self.repo
            .broadcast(room_id, &JamMessage::user_left(user_id))
            .await?;
        log::info!("[Jam] {} left room {}", user_id, room_id);

        self.check_all_ready_and_play(room_id).await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Control messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Applies one inbound client message.
    ///
    /// Nothing is mutated unless the message parses into a [`ClientCommand`],
    /// the room exists and, for host commands, `user_id` is the current host.
    pub async fn handle_client_message(
        &self,
        room_id: &str,
        user_id: &str,
        msg: JamMessage,
    ) -> JamResult<()> {
        let command = ClientCommand::try_from(msg)?;
        let host_id = self.require_host(room_id).await?;
        let is_host = host_id == user_id;

        if command.requires_host() && !is_host {
            log::warn!(
                "[Jam] Rejected {:?} from non-host {} in room {}",
                command,
                user_id,
                room_id
            );
            return Err(JamError::NotHost(user_id.to_string()));
        }

        match command {
            ClientCommand::Load { track_id } => self.load(room_id, &track_id).await,
            ClientCommand::Play => {
                self.check_all_ready_and_play(room_id).await;
                Ok(())
            }
            ClientCommand::Pause => {
                self.repo.set_paused(room_id, true).await?;
                let mut pause = JamMessage::new(MessageType::Pause);
                pause.paused = Some(true);
                self.repo.broadcast(room_id, &pause).await?;
                Ok(())
            }
            ClientCommand::Seek { position } => {
                self.repo.set_position(room_id, position).await?;
                self.repo
                    .broadcast(room_id, &JamMessage::seek(position))
                    .await?;
                Ok(())
            }
            ClientCommand::Ready => {
                if !is_host && !self.repo.is_participant(room_id, user_id).await? {
                    return Err(JamError::InvalidRequest(format!(
                        "{user_id} is not a member of room {room_id}"
                    )));
                }
                self.repo.mark_ready(room_id, user_id).await?;
                let loaded = self.repo.readiness_map(room_id).await?;
                self.repo
                    .broadcast(room_id, &JamMessage::ready(loaded))
                    .await?;
                self.check_all_ready_and_play(room_id).await;
                Ok(())
            }
        }
    }

    async fn load(&self, room_id: &str, track_id: &str) -> JamResult<()> {
        if self.repo.is_duplicate_load(room_id, track_id).await? {
            log::debug!(
                "[Jam] Ignoring repeated load of {} in room {}",
                track_id,
                room_id
            );
            return Ok(());
        }

        self.repo.load_track(room_id, track_id).await?;
        self.repo
            .record_load(room_id, track_id, self.load_dedup_window)
            .await?;
        self.repo
            .broadcast(room_id, &JamMessage::load(track_id))
            .await?;
        log::info!("[Jam] Room {} loaded {}", room_id, track_id);
        Ok(())
    }

    /// Broadcasts `play` if every participant is ready.
    ///
    /// Returns whether `play` was sent. Store failures are logged and
    /// reported as `false`; callers have already completed their own work.
    pub async fn check_all_ready_and_play(&self, room_id: &str) -> bool {
        match self.try_ready_and_play(room_id).await {
            Ok(played) => played,
            Err(e) => {
                log::warn!("[Jam] Readiness check for room {} failed: {}", room_id, e);
                false
            }
        }
    }

    async fn try_ready_and_play(&self, room_id: &str) -> JamResult<bool> {
        let participants = self.repo.participant_count(room_id).await?;
        let ready = self.repo.ready_participant_count(room_id).await?;
        if ready < participants {
            log::debug!(
                "[Jam] Room {} waiting on readiness ({}/{})",
                room_id,
                ready,
                participants
            );
            return Ok(false);
        }

        let mut play = JamMessage::new(MessageType::Play);
        play.paused = Some(false);
        self.repo.broadcast(room_id, &play).await?;
        log::info!("[Jam] Room {} ready ({}/{}), playing", room_id, ready, participants);
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    /// Opens a typed event stream for a room.
    pub async fn subscribe_to_jam_messages(&self, room_id: &str) -> JamResult<JamEvents> {
        self.require_host(room_id).await?;
        let stream = self.repo.subscribe(room_id).await?;
        Ok(JamEvents {
            inner: self.subscriptions.subscribe(room_id, stream),
        })
    }

    async fn require_host(&self, room_id: &str) -> JamResult<String> {
        self.repo
            .get_host(room_id)
            .await?
            .ok_or_else(|| JamError::RoomNotFound(room_id.to_string()))
    }
}

/// Typed event stream of one room.
///
/// Ends when the room closes or the subscription is cancelled. Dropping it
/// cancels the underlying pump.
#[derive(Debug)]
pub struct JamEvents {
    inner: Subscription,
}

impl JamEvents {
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn room_id(&self) -> &str {
        self.inner.room_id()
    }

    /// Next decodable event. Malformed payloads are logged and skipped.
    pub async fn next(&mut self) -> Option<JamMessage> {
        loop {
            let payload = self.inner.recv().await?;
            match JamMessage::decode(&payload) {
                Ok(msg) => return Some(msg),
                Err(e) => {
                    log::warn!(
                        "[Jam] Dropping malformed event in room {}: {}",
                        self.inner.room_id(),
                        e
                    );
                }
            }
        }
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryError, DisplayInfo, StaticUserDirectory};
    use crate::services::room_repository::TrackState;
    use crate::store::{MemoryStore, SessionStore};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct FailingDirectory;

    #[async_trait]
    impl UserDirectory for FailingDirectory {
        async fn resolve_display(&self, _user_id: &str) -> Result<DisplayInfo, DirectoryError> {
            Err(DirectoryError::HttpStatus(502))
        }
    }

    struct Fixture {
        jam: JamCoordinator,
        store: Arc<MemoryStore>,
    }

    fn fixture_with(directory: Arc<dyn UserDirectory>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(RoomRepository::new(store.clone(), None));
        let jam = JamCoordinator::new(
            repo,
            directory,
            Arc::new(SubscriptionRegistry::new(100)),
            Duration::from_secs(2),
        );
        Fixture { jam, store }
    }

    fn fixture() -> Fixture {
        let directory = StaticUserDirectory::new();
        directory.insert("h1", "Host", Some("http://img/h1"));
        directory.insert("u1", "Ann", Some("http://img/u1"));
        directory.insert("u2", "Bob", None);
        fixture_with(Arc::new(directory))
    }

    fn command(kind: MessageType) -> JamMessage {
        JamMessage::new(kind)
    }

    fn host_load(track_id: &str) -> JamMessage {
        let mut msg = command(MessageType::HostLoad);
        msg.track_id = Some(track_id.into());
        msg
    }

    fn host_seek(position: i64) -> JamMessage {
        let mut msg = command(MessageType::HostSeek);
        msg.position = position;
        msg
    }

    async fn next_event(events: &mut JamEvents) -> JamMessage {
        tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .expect("timed out waiting for event")
            .expect("event stream ended")
    }

    /// Publishes a marker and asserts it is the next event, proving nothing
    /// else was broadcast in between.
    async fn assert_no_broadcast(f: &Fixture, room: &str, events: &mut JamEvents) {
        let marker = JamMessage::error_reply(MessageType::Init, "marker");
        f.jam.repository().broadcast(room, &marker).await.unwrap();
        assert_eq!(next_event(events).await, marker);
    }

    async fn room_with_participant(f: &Fixture) -> String {
        let (room, _) = f.jam.create_jam("h1", "t1", 1000).await.unwrap();
        f.jam.join_jam(&room, "u1").await.unwrap();
        room
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_jam_starts_paused() {
        let f = fixture();
        let (room, host) = f.jam.create_jam("h1", "t1", 1000).await.unwrap();

        assert_eq!(host, "h1");
        let repo = f.jam.repository();
        assert_eq!(repo.get_host(&room).await.unwrap().as_deref(), Some("h1"));
        assert_eq!(
            repo.track_state(&room).await.unwrap(),
            TrackState {
                track_id: "t1".into(),
                position: 1000,
                paused: true,
            }
        );
        let (names, images) = repo.display_cache(&room).await.unwrap();
        assert_eq!(names["h1"], "Host");
        assert_eq!(images["h1"], "http://img/h1");
    }

    #[tokio::test]
    async fn create_jam_rejects_blank_ids() {
        let f = fixture();
        let err = f.jam.create_jam("", "t1", 0).await.unwrap_err();
        assert_eq!(err.code(), "invalid_request");
        let err = f.jam.create_jam("h1", "t1", -5).await.unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[tokio::test]
    async fn join_announces_user_and_forces_pause() {
        let f = fixture();
        let (room, _) = f.jam.create_jam("h1", "t1", 1000).await.unwrap();
        f.jam.repository().set_paused(&room, false).await.unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        let init = f.jam.join_jam(&room, "u1").await.unwrap();

        let joined = next_event(&mut events).await;
        assert_eq!(joined.kind, MessageType::UserJoined);
        assert_eq!(joined.user_id.as_deref(), Some("u1"));
        assert_eq!(joined.user_names.unwrap()["u1"], "Ann");
        assert_eq!(joined.user_images.unwrap()["u1"], "http://img/u1");
        assert!(f.jam.repository().track_state(&room).await.unwrap().paused);

        assert_eq!(init.kind, MessageType::Init);
        assert_eq!(init.host_id.as_deref(), Some("h1"));
        assert_eq!(init.users.unwrap(), vec!["u1".to_string()]);
        assert_eq!(init.paused, Some(true));
        let names = init.user_names.unwrap();
        assert_eq!(names["h1"], "Host");
        assert_eq!(names["u1"], "Ann");
        let loaded = init.loaded.unwrap();
        assert_eq!(loaded.get("h1"), Some(&false));
        assert_eq!(loaded.get("u1"), Some(&false));
    }

    #[tokio::test]
    async fn host_rejoin_is_idempotent() {
        let f = fixture();
        let (room, _) = f.jam.create_jam("h1", "t1", 0).await.unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        let init = f.jam.join_jam(&room, "h1").await.unwrap();

        assert!(init.users.unwrap().is_empty());
        assert_eq!(f.jam.repository().participant_count(&room).await.unwrap(), 0);
        assert_no_broadcast(&f, &room, &mut events).await;
    }

    #[tokio::test]
    async fn join_missing_room_is_not_found() {
        let f = fixture();
        let err = f.jam.join_jam("nope", "u1").await.unwrap_err();
        assert!(matches!(err, JamError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn directory_failure_does_not_block_join() {
        let f = fixture_with(Arc::new(FailingDirectory));
        let (room, _) = f.jam.create_jam("h1", "t1", 0).await.unwrap();

        let init = f.jam.join_jam(&room, "u1").await.unwrap();

        assert_eq!(init.users.unwrap(), vec!["u1".to_string()]);
        assert_eq!(init.user_names.unwrap()["u1"], "");
        assert_eq!(init.user_images.unwrap()["u1"], "");
    }

    #[tokio::test]
    async fn host_leave_closes_room() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam.leave_jam(&room, "h1").await.unwrap();

        assert_eq!(next_event(&mut events).await.kind, MessageType::JamClosed);
        let end = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap();
        assert!(end.is_none());

        assert!(!f.jam.repository().exists_room(&room).await.unwrap());
        assert_eq!(f.store.key_count(), 0);

        let err = f
            .jam
            .handle_client_message(&room, "h1", command(MessageType::HostPause))
            .await
            .unwrap_err();
        assert!(matches!(err, JamError::RoomNotFound(_)));
        let err = f.jam.join_jam(&room, "u2").await.unwrap_err();
        assert!(matches!(err, JamError::RoomNotFound(_)));
        let err = f.jam.leave_jam(&room, "u1").await.unwrap_err();
        assert!(matches!(err, JamError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn participant_leave_rechecks_barrier() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        f.jam.join_jam(&room, "u2").await.unwrap();
        f.jam
            .handle_client_message(&room, "u1", command(MessageType::ClientReady))
            .await
            .unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam.leave_jam(&room, "u2").await.unwrap();

        let left = next_event(&mut events).await;
        assert_eq!(left.kind, MessageType::UserLeft);
        assert_eq!(left.user_id.as_deref(), Some("u2"));
        assert_eq!(next_event(&mut events).await.kind, MessageType::Play);

        let (names, _) = f.jam.repository().display_cache(&room).await.unwrap();
        assert!(!names.contains_key("u2"));
    }

    #[tokio::test]
    async fn leaving_twice_broadcasts_once() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        f.jam.join_jam(&room, "u2").await.unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam.leave_jam(&room, "u2").await.unwrap();
        assert_eq!(next_event(&mut events).await.kind, MessageType::UserLeft);

        f.jam.leave_jam(&room, "u2").await.unwrap();
        assert_no_broadcast(&f, &room, &mut events).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Control messages
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn load_clears_readiness_and_is_deduplicated() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        f.jam
            .handle_client_message(&room, "u1", command(MessageType::ClientReady))
            .await
            .unwrap();
        f.jam
            .handle_client_message(&room, "h1", command(MessageType::ClientReady))
            .await
            .unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam
            .handle_client_message(&room, "h1", host_load("t2"))
            .await
            .unwrap();
        f.jam
            .handle_client_message(&room, "h1", host_load("t2"))
            .await
            .unwrap();

        let repo = f.jam.repository();
        assert_eq!(repo.ready_count(&room).await.unwrap(), 0);
        assert_eq!(
            repo.track_state(&room).await.unwrap(),
            TrackState {
                track_id: "t2".into(),
                position: 0,
                paused: true,
            }
        );

        let load = next_event(&mut events).await;
        assert_eq!(load.kind, MessageType::Load);
        assert_eq!(load.track_id.as_deref(), Some("t2"));
        assert_no_broadcast(&f, &room, &mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn load_can_repeat_after_dedup_window() {
        let f = fixture();
        let (room, _) = f.jam.create_jam("h1", "t1", 0).await.unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam
            .handle_client_message(&room, "h1", host_load("t2"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        f.jam
            .handle_client_message(&room, "h1", host_load("t2"))
            .await
            .unwrap();

        assert_eq!(next_event(&mut events).await.kind, MessageType::Load);
        assert_eq!(next_event(&mut events).await.kind, MessageType::Load);
    }

    #[tokio::test]
    async fn sole_participant_ready_triggers_play() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam
            .handle_client_message(&room, "u1", command(MessageType::ClientReady))
            .await
            .unwrap();

        let ready = next_event(&mut events).await;
        assert_eq!(ready.kind, MessageType::Ready);
        let loaded = ready.loaded.unwrap();
        assert_eq!(loaded["u1"], true);
        assert_eq!(loaded["h1"], false);
        assert_eq!(next_event(&mut events).await.kind, MessageType::Play);
        assert!(f.jam.repository().is_ready(&room, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn ready_host_does_not_stand_in_for_participant() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        f.jam.join_jam(&room, "u2").await.unwrap();
        f.jam
            .handle_client_message(&room, "u1", command(MessageType::ClientReady))
            .await
            .unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam
            .handle_client_message(&room, "h1", command(MessageType::ClientReady))
            .await
            .unwrap();

        let ready = next_event(&mut events).await;
        assert_eq!(ready.kind, MessageType::Ready);
        assert_eq!(ready.loaded.unwrap()["h1"], true);
        assert_no_broadcast(&f, &room, &mut events).await;
        assert!(!f.jam.check_all_ready_and_play(&room).await);
    }

    #[tokio::test]
    async fn host_play_waits_for_stragglers() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        f.jam.join_jam(&room, "u2").await.unwrap();
        f.jam
            .handle_client_message(&room, "u1", command(MessageType::ClientReady))
            .await
            .unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam
            .handle_client_message(&room, "h1", command(MessageType::HostPlay))
            .await
            .unwrap();
        assert_no_broadcast(&f, &room, &mut events).await;

        f.jam
            .handle_client_message(&room, "u2", command(MessageType::ClientReady))
            .await
            .unwrap();
        assert_eq!(next_event(&mut events).await.kind, MessageType::Ready);
        assert_eq!(next_event(&mut events).await.kind, MessageType::Play);
    }

    #[tokio::test]
    async fn barrier_is_vacuous_without_participants() {
        let f = fixture();
        let (room, _) = f.jam.create_jam("h1", "t1", 0).await.unwrap();
        assert!(f.jam.check_all_ready_and_play(&room).await);
    }

    #[tokio::test]
    async fn pause_and_seek_update_state() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        f.jam.repository().set_paused(&room, false).await.unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.jam
            .handle_client_message(&room, "h1", host_seek(42_000))
            .await
            .unwrap();
        let seek = next_event(&mut events).await;
        assert_eq!(seek.kind, MessageType::Seek);
        assert_eq!(seek.position, 42_000);
        let state = f.jam.repository().track_state(&room).await.unwrap();
        assert_eq!(state.position, 42_000);
        assert!(!state.paused, "seek must not alter paused");

        f.jam
            .handle_client_message(&room, "h1", command(MessageType::HostPause))
            .await
            .unwrap();
        assert_eq!(next_event(&mut events).await.kind, MessageType::Pause);
        assert!(f.jam.repository().track_state(&room).await.unwrap().paused);
    }

    #[tokio::test]
    async fn non_host_commands_are_rejected_without_effects() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        f.jam.repository().set_paused(&room, false).await.unwrap();
        let before = f.jam.repository().track_state(&room).await.unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        for msg in [
            host_load("t9"),
            command(MessageType::HostPlay),
            command(MessageType::HostPause),
            host_seek(5),
        ] {
            let err = f
                .jam
                .handle_client_message(&room, "u1", msg)
                .await
                .unwrap_err();
            assert!(matches!(err, JamError::NotHost(ref u) if u == "u1"));
        }

        assert_eq!(f.jam.repository().track_state(&room).await.unwrap(), before);
        assert_no_broadcast(&f, &room, &mut events).await;
    }

    #[tokio::test]
    async fn inbound_jam_closed_is_rejected() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        let err = f
            .jam
            .handle_client_message(&room, "h1", command(MessageType::JamClosed))
            .await
            .unwrap_err();

        assert!(matches!(err, JamError::JamClosed));
        assert!(f.jam.repository().exists_room(&room).await.unwrap());
        assert_no_broadcast(&f, &room, &mut events).await;
    }

    #[tokio::test]
    async fn broadcast_only_types_are_invalid_inbound() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        let err = f
            .jam
            .handle_client_message(&room, "h1", command(MessageType::Play))
            .await
            .unwrap_err();
        assert!(matches!(err, JamError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn ready_from_stranger_is_rejected() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        let err = f
            .jam
            .handle_client_message(&room, "zz", command(MessageType::ClientReady))
            .await
            .unwrap_err();
        assert!(matches!(err, JamError::InvalidRequest(_)));
        assert_eq!(f.jam.repository().ready_count(&room).await.unwrap(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Store failures
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn store_outage_surfaces_as_store_error() {
        let f = fixture();
        let room = room_with_participant(&f).await;
        f.store.set_available(false);

        let err = f.jam.create_jam("h2", "t1", 0).await.unwrap_err();
        assert_eq!(err.code(), "store_unavailable");
        let err = f
            .jam
            .handle_client_message(&room, "h1", command(MessageType::HostPause))
            .await
            .unwrap_err();
        assert!(matches!(err, JamError::Store(_)));

        assert!(!f.jam.check_all_ready_and_play(&room).await);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn subscribe_to_missing_room_is_not_found() {
        let f = fixture();
        let err = f.jam.subscribe_to_jam_messages("nope").await.unwrap_err();
        assert!(matches!(err, JamError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let f = fixture();
        let (room, _) = f.jam.create_jam("h1", "t1", 0).await.unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();

        f.store
            .publish(
                &format!("jam:{room}:events"),
                Bytes::from_static(b"{not json"),
            )
            .await
            .unwrap();
        f.jam
            .handle_client_message(&room, "h1", command(MessageType::HostPause))
            .await
            .unwrap();

        assert_eq!(next_event(&mut events).await.kind, MessageType::Pause);
    }

    #[tokio::test]
    async fn cancelled_events_release_store_connection() {
        let f = fixture();
        let (room, _) = f.jam.create_jam("h1", "t1", 0).await.unwrap();
        let mut events = f.jam.subscribe_to_jam_messages(&room).await.unwrap();
        assert_eq!(f.store.open_subscriptions(), 1);

        events.cancel();
        let end = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap();
        assert!(end.is_none());

        tokio::time::timeout(Duration::from_secs(1), async {
            while f.jam.subscriptions().active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.store.open_subscriptions(), 0);
    }
}
