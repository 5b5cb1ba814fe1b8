//! Jam Core - room-scoped playback synchronization.
//!
//! A host and any number of participants listen to the same track in
//! lockstep. The host alone controls transport (load, play, pause, seek);
//! participants confirm they finished loading before playback resumes.
//!
//! # Architecture
//!
//! - [`store`]: the shared Session Store abstraction and its in-process backend
//! - [`directory`]: best-effort display metadata lookups
//! - [`services`]: room repository, session coordinator, subscription fan-out
//! - [`protocol`]: the JSON wire messages
//! - [`api`]: HTTP and WebSocket gateway
//! - [`bootstrap`]: service wiring, janitor, shutdown
//!
//! All room state lives in the Session Store. Nothing in this crate locks it;
//! multi-step operations are not transactional and tolerate interleaving.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod protocol_constants;
pub mod services;
pub mod store;
pub mod utils;

pub use config::JamConfig;
pub use directory::{
    resolve_display_or_default, DirectoryError, DisplayInfo, HttpUserDirectory,
    NoopUserDirectory, ResolvedDisplay, StaticUserDirectory, UserDirectory,
};
pub use error::{ErrorCode, JamError, JamResult};
pub use protocol::{ClientCommand, JamMessage, MessageType};
pub use store::{MemoryStore, SessionStore, StoreError, StoreResult, StoreStream};

pub use services::{
    JamCoordinator, JamEvents, RoomRepository, Subscription, SubscriptionRegistry, TrackState,
};

pub use bootstrap::{bootstrap_services, BootstrappedServices, SweepReport};

pub use api::{start_server, AppState, ServerError, WsConnectionManager};
