//! Local HTTP server exposing the latest usage status

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

use crate::api::auth::{validate_bearer, Allowlist};
use crate::api::handler::render_status;
use crate::usage::models::ApiConfig;
use crate::usage::snapshot::SnapshotStore;

const NO_DATA_BODY: &str = r#"{"error":"no data"}"#;

/// Error type for the status server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

struct Inner {
    store: Arc<SnapshotStore>,
    token: String,
    allowlist: Allowlist,
}

/// Shared server state: the snapshot store plus access rules
#[derive(Clone)]
pub struct ApiState {
    inner: Arc<Inner>,
}

impl ApiState {
    pub fn new(config: &ApiConfig, store: Arc<SnapshotStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                token: config.token.clone(),
                allowlist: Allowlist::parse(&config.allowed_cidrs),
            }),
        }
    }

    /// Neither a token nor an allowlist guards the endpoint
    pub fn is_open(&self) -> bool {
        self.inner.token.is_empty() && self.inner.allowlist.is_empty()
    }
}

/// Routes served by the status server
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(handle_status))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

/// Embedded status server
pub struct StatusServer {
    config: ApiConfig,
    state: ApiState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl StatusServer {
    pub fn new(config: ApiConfig, store: Arc<SnapshotStore>) -> Self {
        let state = ApiState::new(&config, store);
        Self {
            config,
            state,
            shutdown_tx: None,
        }
    }

    /// Bind and serve in a background task, returning the bound address
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.state.is_open() {
            warn!("Status API is unauthenticated and open to all hosts (consider --api-token or --api-allow)");
        }

        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!("Status API listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let app = router(self.state.clone());
        tokio::spawn(async move {
            let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    info!("Status API shutting down");
                })
                .await;
            if let Err(e) = result {
                error!("Status API stopped: {}", e);
            }
        });

        Ok(local_addr)
    }

    /// Stop the server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Render the latest snapshot as of the request. The allowlist is checked before the token.
async fn handle_status(
    State(state): State<ApiState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());

    if !state.inner.allowlist.allows(peer) {
        debug!("Rejected status request from {:?}", peer);
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    if !validate_bearer(&headers, &state.inner.token) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let Some(snapshot) = state.inner.store.latest() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "application/json")],
            NO_DATA_BODY,
        )
            .into_response();
    };

    match render_status(&snapshot, Utc::now()) {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "max-age=5"),
            ],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to serialize status: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}
