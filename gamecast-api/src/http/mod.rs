// Module: http
// HTTP/JSON endpoints and the host/viewer WebSocket channels

pub mod error;
pub mod health;
pub mod session;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use gamecast_core::bootstrap::Services;
use gamecast_core::metrics::MetricsCounter;
use gamecast_core::service::InviteNotifier;
use gamecast_core::session::{ConnectionGateway, SessionDirectory};
use gamecast_core::Config;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<SessionDirectory>,
    pub gateway: ConnectionGateway,
    pub metrics: Arc<MetricsCounter>,
    pub invites: Arc<dyn InviteNotifier>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Arc<Config>, services: &Services) -> Self {
        Self {
            config,
            directory: Arc::clone(&services.directory),
            gateway: services.gateway.clone(),
            metrics: Arc::clone(&services.metrics),
            invites: Arc::clone(&services.invites),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        .route(
            "/initSharedGame",
            post(session::create_session).fallback(error::method_not_allowed),
        )
        .route(
            "/stats",
            get(session::server_stats).fallback(error::method_not_allowed),
        )
        .route("/metrics", get(session::prometheus_metrics))
        .route("/hostGame", get(websocket::host_handler))
        .route("/viewGame", get(websocket::viewer_handler));

    // Apply layers before state
    let router = router
        .layer(RequestBodyLimitLayer::new(state.config.relay.max_frame_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
