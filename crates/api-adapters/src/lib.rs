//! # api-adapters
//!
//! HTTP JSON surface over `KarmaBoard`. Every request names its caller
//! explicitly; there is no session.
//!
//! The axum router is compiled with the `web-axum` feature.

#[cfg(feature = "web-axum")]
pub mod error;
#[cfg(feature = "web-axum")]
pub mod handlers;
#[cfg(feature = "web-axum")]
pub mod middleware;

#[cfg(feature = "web-axum")]
pub use error::ApiError;
#[cfg(feature = "web-axum")]
pub use handlers::AppState;

#[cfg(feature = "web-axum")]
use axum::{
    routing::{get, post},
    Router,
};

/// Builds the versioned API router plus `/health`.
#[cfg(feature = "web-axum")]
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/votes", post(handlers::apply_vote))
        .route("/targets/{id}/score", get(handlers::get_score))
        .route("/targets/{id}/votes/{voter_id}", get(handlers::get_vote))
        .route("/users/{id}/karma", get(handlers::get_karma))
        .route("/users/{id}/karma/rebuild", post(handlers::rebuild_karma))
        .route("/stats", get(handlers::site_stats))
        .route("/communities/{id}/stats", get(handlers::community_stats));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .layer(middleware::cors_policy())
        .layer(middleware::trace_layer())
        .with_state(state)
}
