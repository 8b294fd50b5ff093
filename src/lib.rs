pub mod captcha;
pub mod config;
pub mod continuation;
pub mod crypto;
pub mod error;
pub mod git;
pub mod mail;
pub mod rate_limit;
pub mod routes;
pub mod site_config;
pub mod spam;
pub mod state;
pub mod submission;
pub mod subscriptions;
pub mod template;
pub mod webhook;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::{AppState, SharedState};

pub fn build_app(config: Config) -> Router {
    let max_body_size = config.max_body_size;
    let state: SharedState = Arc::new(AppState::new(config));

    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        // Submission endpoints are called cross-origin from third-party sites.
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
