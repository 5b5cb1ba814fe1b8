//! Application bootstrap and dependency wiring.
//!
//! The composition root: every service is created and wired here, in
//! dependency order, so the relationships are visible in one place.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::WsConnectionManager;
use crate::config::JamConfig;
use crate::directory::{HttpUserDirectory, NoopUserDirectory, UserDirectory};
use crate::error::{JamError, JamResult};
use crate::services::{JamCoordinator, RoomRepository, SubscriptionRegistry};
use crate::store::{MemoryStore, SessionStore};

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// In-process Session Store backend.
    pub store: Arc<MemoryStore>,
    pub repository: Arc<RoomRepository>,
    pub coordinator: Arc<JamCoordinator>,
    pub subscriptions: Arc<SubscriptionRegistry>,
    pub directory: Arc<dyn UserDirectory>,
    pub ws_manager: Arc<WsConnectionManager>,
    pub config: JamConfig,
    /// Cancelled on shutdown; stops background tasks.
    pub cancel_token: CancellationToken,
}

/// Outcome of one janitor pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired keys and idle channels removed from the store.
    pub purged: usize,
    /// Rooms whose leftover subscriptions and sockets were force-closed.
    pub reaped_rooms: usize,
}

impl BootstrappedServices {
    /// Spawns the janitor that expires idle rooms and reaps their orphans.
    pub fn start_background_tasks(&self) {
        let services = self.clone();
        let interval = self.config.janitor_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = services.cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = services.sweep().await;
                        if report != SweepReport::default() {
                            log::info!(
                                "[Janitor] Purged {} key(s), reaped {} room(s)",
                                report.purged,
                                report.reaped_rooms
                            );
                        }
                    }
                }
            }
            log::debug!("[Janitor] Stopped");
        });
    }

    /// Runs one janitor pass.
    ///
    /// Purges expired state, then force-closes subscriptions and sockets
    /// still attached to rooms that no longer exist.
    pub async fn sweep(&self) -> SweepReport {
        let purged = self.store.purge_expired();
        let mut reaped_rooms = 0;

        for room_id in self.subscriptions.rooms() {
            match self.repository.exists_room(&room_id).await {
                Ok(true) => {}
                Ok(false) => {
                    self.subscriptions.cancel_room(&room_id);
                    self.ws_manager.close_room(&room_id);
                    reaped_rooms += 1;
                }
                Err(e) => {
                    log::warn!("[Janitor] Sweep aborted: {}", e);
                    break;
                }
            }
        }

        SweepReport {
            purged,
            reaped_rooms,
        }
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.cancel_token.cancel();

        let sockets = self.ws_manager.close_all();
        let subscriptions = self.subscriptions.close_all();
        log::info!(
            "[Bootstrap] Closed {} WebSocket connection(s) and {} subscription(s)",
            sockets,
            subscriptions
        );

        log::info!("[Bootstrap] Shutdown complete");
    }
}

fn create_directory(config: &JamConfig) -> JamResult<Arc<dyn UserDirectory>> {
    match &config.directory_url {
        Some(url) => {
            log::info!("[Bootstrap] Using user directory at {}", url);
            let directory = HttpUserDirectory::new(url, config.directory_timeout())
                .map_err(|e| JamError::Internal(format!("Failed to create directory client: {e}")))?;
            Ok(Arc::new(directory))
        }
        None => {
            log::info!("[Bootstrap] No user directory configured; display names stay empty");
            Ok(Arc::new(NoopUserDirectory))
        }
    }
}

/// Bootstraps all services with their dependencies.
///
/// Wiring order:
/// 1. Session Store
/// 2. Room repository (store, idle expiry)
/// 3. Subscription registry
/// 4. User Directory
/// 5. Coordinator (repository, directory, registry)
/// 6. WebSocket connection manager
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the directory
/// client cannot be created.
pub fn bootstrap_services(config: &JamConfig) -> JamResult<BootstrappedServices> {
    config
        .validate()
        .map_err(|e| JamError::Internal(format!("Invalid configuration: {e}")))?;

    let store = Arc::new(MemoryStore::new());

    let repository = Arc::new(RoomRepository::new(
        Arc::clone(&store) as Arc<dyn SessionStore>,
        config.room_idle_ttl(),
    ));

    let subscriptions = Arc::new(SubscriptionRegistry::new(config.subscription_buffer));

    let directory = create_directory(config)?;

    let coordinator = Arc::new(JamCoordinator::new(
        Arc::clone(&repository),
        Arc::clone(&directory),
        Arc::clone(&subscriptions),
        config.load_dedup_window(),
    ));

    let ws_manager = Arc::new(WsConnectionManager::new());

    Ok(BootstrappedServices {
        store,
        repository,
        coordinator,
        subscriptions,
        directory,
        ws_manager,
        config: config.clone(),
        cancel_token: CancellationToken::new(),
    })
}
