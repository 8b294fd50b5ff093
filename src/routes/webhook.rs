use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::git::{self, GitProvider, RepoParameters};
use crate::mail::MailgunProvider;
use crate::state::SharedState;
use crate::webhook;

pub async fn event(
    State(state): State<SharedState>,
    Path((service, username, repository, branch)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, service, username, repository, branch, None, headers, body).await
}

pub async fn event_with_property(
    State(state): State<SharedState>,
    Path((service, username, repository, branch, property)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(
        state,
        service,
        username,
        repository,
        branch,
        Some(property),
        headers,
        body,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn handle(
    state: SharedState,
    service: String,
    username: String,
    repository: String,
    branch: String,
    property: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let service: GitProvider = match service.parse() {
        Ok(service) => service,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"errors": [e]}))).into_response();
        }
    };

    let params = RepoParameters {
        service,
        username,
        repository,
        branch,
        property,
    };

    let git = git::factory(&params, &state.config, &state.http);
    let mail_provider = Arc::new(MailgunProvider::new(state.http.clone()));

    match webhook::handle(
        &state.config,
        &params,
        &headers,
        &body,
        git,
        mail_provider,
        state.http.clone(),
    )
    .await
    {
        Ok(outcome) => {
            if let webhook::WebhookOutcome::Ignored(reason) = &outcome {
                tracing::debug!("Webhook ignored: {reason}");
            }
            (StatusCode::OK, Json(json!({"success": true}))).into_response()
        }
        Err(errors) => {
            for error in &errors {
                tracing::warn!("Webhook processing error: {error}");
            }
            let messages: Vec<String> = errors.iter().map(|e| e.public_message()).collect();
            (StatusCode::BAD_REQUEST, Json(json!({"errors": messages}))).into_response()
        }
    }
}
