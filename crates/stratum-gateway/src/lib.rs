//! Stratum HTTP record API.
//!
//! Exposes the record operations of a compiled application over REST.
//! Bearer tokens are verified here; everything else is delegated to
//! [`stratum_core::RecordService`].

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

pub use auth::{Claims, Session, TokenVerifier};
pub use config::{Args, GatewayConfig, StorageBackend, UnsupportedStorage};
pub use error::AppError;

use std::sync::Arc;

use axum::Router;
use stratum_core::{RecordService, SessionResolver};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Record operations of the served application.
    pub service: RecordService,
    /// Session resolution for verified identities.
    pub resolver: SessionResolver,
    /// Bearer token verification.
    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    /// Create new application state.
    pub fn new(service: RecordService, config: &GatewayConfig) -> Self {
        Self {
            service,
            resolver: SessionResolver::default(),
            verifier: Arc::new(TokenVerifier::new(config.jwt_secret.as_deref())),
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::tables::routes())
        .merge(routes::records::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
