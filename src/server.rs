use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::backend::AgentBackend;
use crate::config::Config;
use crate::telephony::ws;
use crate::turn::TurnTranslator;

/// Shared state behind every call connection.
pub struct BridgeState {
    pub translator: TurnTranslator,
    pub backend: Arc<dyn AgentBackend>,
    status: StatusSnapshot,
}

/// Read-only operational snapshot served at `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub port: u16,
    pub path: String,
    pub allowlist: Vec<String>,
}

/// The inbound server, explicitly constructed and owned rather than
/// process-global, so instances can be started and stopped independently.
pub struct BridgeServer {
    config: Config,
    backend: Arc<dyn AgentBackend>,
}

/// Handle to a running bridge: bound address plus shutdown control.
pub struct BridgeHandle {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl BridgeHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

impl BridgeServer {
    pub fn new(config: Config, backend: Arc<dyn AgentBackend>) -> Self {
        Self { config, backend }
    }

    /// Bind the listener and start serving. Port 0 binds an ephemeral port;
    /// the bound address is on the returned handle.
    pub async fn start(self) -> Result<BridgeHandle, ServerError> {
        let addr: SocketAddr = format!(
            "{}:{}",
            self.config.server.host, self.config.server.port
        )
        .parse()
        .map_err(|_| {
            ServerError::InvalidAddress(format!(
                "{}:{}",
                self.config.server.host, self.config.server.port
            ))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        let local = listener.local_addr().map_err(ServerError::Bind)?;

        let prefix = normalize_prefix(&self.config.server.path_prefix);
        let translator = TurnTranslator::new(
            self.config.bridge.greeting.clone(),
            self.config.bridge.allowlist.clone(),
            Duration::from_millis(self.config.bridge.response_timeout_ms),
        );
        let state = Arc::new(BridgeState {
            translator,
            backend: self.backend,
            status: StatusSnapshot {
                running: true,
                port: local.port(),
                path: prefix.clone(),
                allowlist: self.config.bridge.allowlist.clone(),
            },
        });

        let app = Router::new()
            .route(&prefix, get(ws::handle_anonymous_upgrade))
            .route(&format!("{prefix}/{{call_id}}"), get(ws::handle_call_upgrade))
            .route("/status", get(status))
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        tracing::info!(addr = %local, path = %prefix, "Bridge listening");

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });

        Ok(BridgeHandle {
            addr: local,
            shutdown,
            task,
        })
    }
}

async fn status(State(state): State<Arc<BridgeState>>) -> Json<StatusSnapshot> {
    Json(state.status.clone())
}

async fn health() -> &'static str {
    "ok"
}

/// Ensure a leading slash and no trailing slash.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),
    #[error("Failed to bind listener: {0}")]
    Bind(std::io::Error),
}
