pub mod confirm;
pub mod encrypt;
pub mod process;
pub mod response;
pub mod webhook;

use axum::Router;
use axum::routing::{get, post};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Submission intake
        .route(
            "/v3/entry/{service}/{username}/{repository}/{branch}",
            post(process::entry),
        )
        .route(
            "/v3/entry/{service}/{username}/{repository}/{branch}/{property}",
            post(process::entry_with_property),
        )
        // Hosting-provider webhooks
        .route(
            "/v3/webhook/{service}/{username}/{repository}/{branch}",
            post(webhook::event),
        )
        .route(
            "/v3/webhook/{service}/{username}/{repository}/{branch}/{property}",
            post(webhook::event_with_property),
        )
        // Double opt-in redemption
        .route(
            "/v3/confirm/{service}/{username}/{repository}/{branch}",
            get(confirm::confirm),
        )
        .route(
            "/v3/confirm/{service}/{username}/{repository}/{branch}/{property}",
            get(confirm::confirm_with_property),
        )
        // Token sealing
        .route("/v3/encrypt/{text}", get(encrypt::encrypt))
}
