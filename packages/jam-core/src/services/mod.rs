//! Application services layer.
//!
//! Business logic between the gateway and the Session Store:
//! storage translation, coordination rules and subscription fan-out.

pub mod jam_coordinator;
pub mod room_repository;
pub mod subscriptions;

pub use jam_coordinator::{JamCoordinator, JamEvents};
pub use room_repository::{RoomRepository, TrackState};
pub use subscriptions::{Subscription, SubscriptionRegistry};
