use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;
use serde_json::json;

use crate::git::{self, GitProvider, RepoParameters};
use crate::mail::MailgunProvider;
use crate::state::SharedState;
use crate::submission::ConfigPath;
use crate::submission::metadata::RequestMetadata;
use crate::submission::pipeline::Processor;
use crate::subscriptions::confirmation;

#[derive(Deserialize)]
pub struct ConfirmQuery {
    /// The sealed confirmation token from the emailed link.
    data: String,
}

pub async fn confirm(
    State(state): State<SharedState>,
    Path((service, username, repository, branch)): Path<(String, String, String, String)>,
    Query(query): Query<ConfirmQuery>,
) -> Response {
    handle(state, service, username, repository, branch, None, query).await
}

pub async fn confirm_with_property(
    State(state): State<SharedState>,
    Path((service, username, repository, branch, property)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    Query(query): Query<ConfirmQuery>,
) -> Response {
    handle(
        state,
        service,
        username,
        repository,
        branch,
        Some(property),
        query,
    )
    .await
}

async fn handle(
    state: SharedState,
    service: String,
    username: String,
    repository: String,
    branch: String,
    property: Option<String>,
    query: ConfirmQuery,
) -> Response {
    let service: GitProvider = match service.parse() {
        Ok(service) => service,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e}))).into_response();
        }
    };

    // The token has to open before anything else: the redirect URLs
    // themselves are inside it.
    let data = match confirmation::redeem(&query.data, &state.config) {
        Ok(data) => data,
        Err(e) => return e.into_response(),
    };

    let params = RepoParameters {
        service,
        username,
        repository,
        branch,
        property: property.clone(),
    };

    let git = git::factory(&params, &state.config, &state.http);
    let mail_provider = Arc::new(MailgunProvider::new(state.http.clone()));

    let processor = Processor::new(
        state.config.clone(),
        params,
        ConfigPath::new(property),
        git,
        mail_provider,
        None,
        state.http.clone(),
        RequestMetadata::default(),
    );

    match processor.create_subscription(&data).await {
        Ok(()) => match &data.subscribe_confirm_redirect {
            Some(url) => Redirect::to(url).into_response(),
            None => (StatusCode::OK, Json(json!({"success": true}))).into_response(),
        },
        Err(e) => {
            tracing::error!("Subscription confirmation failed: {e}");
            match &data.subscribe_confirm_redirect_error {
                Some(url) => Redirect::to(url).into_response(),
                None => e.into_response(),
            }
        }
    }
}
