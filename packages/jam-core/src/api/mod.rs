//! HTTP/WebSocket gateway.
//!
//! Thin handlers that delegate to the [`JamCoordinator`]. Also provides
//! router construction and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::bootstrap::BootstrappedServices;
use crate::config::JamConfig;
use crate::protocol_constants::{DEFAULT_PORT, PORT_SEARCH_SPAN};
use crate::services::JamCoordinator;
use crate::store::SessionStore;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<JamCoordinator>,
    /// Used directly only for readiness probes.
    pub store: Arc<dyn SessionStore>,
    pub ws_manager: Arc<WsConnectionManager>,
    pub config: Arc<JamConfig>,
}

impl AppState {
    pub fn new(services: &BootstrappedServices) -> Self {
        Self {
            coordinator: Arc::clone(&services.coordinator),
            store: Arc::clone(&services.store) as Arc<dyn SessionStore>,
            ws_manager: Arc::clone(&services.ws_manager),
            config: Arc::new(services.config.clone()),
        }
    }
}

async fn find_available_port(start: u16, end: u16) -> Result<(u16, TcpListener), ServerError> {
    for port in start..=end {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        if let Ok(listener) = TcpListener::bind(&addr).await {
            return Ok((port, listener));
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds the configured port, or the first free port from the default range.
pub async fn bind(config: &JamConfig) -> Result<(u16, TcpListener), ServerError> {
    if config.preferred_port > 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.preferred_port));
        Ok((config.preferred_port, TcpListener::bind(&addr).await?))
    } else {
        find_available_port(DEFAULT_PORT, DEFAULT_PORT + PORT_SEARCH_SPAN).await
    }
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let (port, listener) = bind(&state.config).await?;
    log::info!("Server listening on http://0.0.0.0:{}", port);
    serve(listener, state).await
}

/// Serves the gateway on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ServerError> {
    let app = http::create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::bootstrap::bootstrap_services;
    use tokio::task::JoinHandle;

    /// Gateway bound to an ephemeral localhost port. Aborted on drop.
    pub struct TestServer {
        pub base_url: String,
        pub ws_url: String,
        pub services: BootstrappedServices,
        handle: JoinHandle<()>,
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    pub async fn spawn_test_server() -> TestServer {
        spawn_test_server_with(JamConfig::default()).await
    }

    pub async fn spawn_test_server_with(config: JamConfig) -> TestServer {
        let services = bootstrap_services(&config).unwrap();
        let state = AppState::new(&services);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = serve(listener, state).await;
        });

        TestServer {
            base_url: format!("http://{addr}"),
            ws_url: format!("ws://{addr}"),
            services,
            handle,
        }
    }
}
