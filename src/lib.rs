pub mod api;
pub mod auth;
pub mod cli;
pub mod db;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod storage;
pub mod token;
pub mod upload;
pub mod usage;

use api::create_api_router;
use axum::{Json, Router, routing::get};
use db::Database;
use rate_limit::RateLimits;
use serde_json::{Value, json};
use session::SessionSettings;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use token::TokenCodec;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use upload::UploadLimits;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Codec for access and refresh tokens
    pub tokens: Arc<TokenCodec>,
    /// Root directory for uploaded files
    pub upload_dir: PathBuf,
    /// Token lifetimes and session reuse policy
    pub sessions: SessionSettings,
    pub upload_limits: UploadLimits,
    pub rate_limits: RateLimits,
    /// Trust X-Forwarded-For for the client IP (requires running behind a proxy)
    pub trust_proxy: bool,
    /// Cancelled when the server begins shutting down
    pub shutdown: CancellationToken,
}

async fn hello() -> Json<Value> {
    Json(json!({ "message": "Hello from mediavault" }))
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(hello))
        .merge(create_api_router(config))
        .layer(TraceLayer::new_for_http())
}

/// Run the server on the given listener until `config.shutdown` is cancelled.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let shutdown = config.shutdown.clone();
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
