use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::crypto;
use crate::state::SharedState;

/// Public token-sealing endpoint, used by site owners to seal secrets (API
/// keys, CAPTCHA secrets, OAuth tokens) for their configuration files. Being
/// public is why sealed payloads embed a pepper: anyone can mint a
/// structurally valid token here.
pub async fn encrypt(State(state): State<SharedState>, Path(text): Path<String>) -> Response {
    match crypto::seal(&text, &state.config.encryption_key) {
        Ok(token) => (StatusCode::OK, token).into_response(),
        Err(e) => {
            tracing::error!("Seal failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Could not encrypt text").into_response()
        }
    }
}
