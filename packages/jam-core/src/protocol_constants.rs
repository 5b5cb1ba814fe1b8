//! Fixed protocol constants that should NOT be changed.
//!
//! Key names and message type strings are shared with clients and with any
//! other process talking to the same Session Store. Changing them breaks
//! interoperability with rooms created by older builds.

// ─────────────────────────────────────────────────────────────────────────────
// Session Store Key Naming
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix for every key belonging to a jam room.
pub const ROOM_KEY_PREFIX: &str = "jam";

/// Scalar holding the host user id.
pub const HOST_SUFFIX: &str = "host";

/// Hash holding `track_id`, `position` and `paused`.
pub const TRACK_SUFFIX: &str = "track";

/// Set of participant ids (host excluded).
pub const PARTICIPANTS_SUFFIX: &str = "participants";

/// Set of ids that finished loading the current track.
pub const READY_SUFFIX: &str = "ready";

/// Hash: user id -> display name.
pub const NAMES_SUFFIX: &str = "names";

/// Hash: user id -> avatar URL.
pub const IMAGES_SUFFIX: &str = "images";

/// Short-lived scalar holding the track id of the last `load` broadcast.
pub const LAST_LOAD_SUFFIX: &str = "last_load";

/// Pub/sub channel carrying serialized room events.
pub const EVENTS_SUFFIX: &str = "events";

/// Hash field names inside the track hash.
pub const FIELD_TRACK_ID: &str = "track_id";
pub const FIELD_POSITION: &str = "position";
pub const FIELD_PAUSED: &str = "paused";

// ─────────────────────────────────────────────────────────────────────────────
// Fan-out
// ─────────────────────────────────────────────────────────────────────────────

/// Default capacity of a subscriber's local buffer (messages).
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 100;

/// Capacity of each in-process pub/sub channel.
pub const STORE_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Timing
// ─────────────────────────────────────────────────────────────────────────────

/// Window during which a replayed `host:load` for the same track is ignored.
pub const DEFAULT_LOAD_DEDUP_WINDOW_MS: u64 = 2000;

/// Idle time after which an untouched room expires (6 hours).
pub const DEFAULT_ROOM_IDLE_TTL_SECS: u64 = 6 * 60 * 60;

/// Interval between janitor sweeps.
pub const DEFAULT_JANITOR_INTERVAL_SECS: u64 = 60;

/// Timeout for User Directory HTTP lookups.
pub const DEFAULT_DIRECTORY_TIMEOUT_SECS: u64 = 5;

/// WebSocket heartbeat timeout (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 60;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "jam-sync";

/// Default HTTP/WS port for the standalone server.
pub const DEFAULT_PORT: u16 = 49500;

/// Ports tried after `DEFAULT_PORT` when auto-allocating.
pub const PORT_SEARCH_SPAN: u16 = 10;
