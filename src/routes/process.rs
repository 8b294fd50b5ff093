use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::captcha::RecaptchaVerifier;
use crate::git::{self, GitProvider, RepoParameters};
use crate::mail::MailgunProvider;
use crate::spam::AkismetChecker;
use crate::state::SharedState;
use crate::submission::pipeline::{self, Processor};
use crate::submission::{ConfigPath, FieldMap, SubmissionOptions, metadata, parser};

use super::response;

pub async fn entry(
    State(state): State<SharedState>,
    Path((service, username, repository, branch)): Path<(String, String, String, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(state, service, username, repository, branch, None, addr, headers, body).await
}

pub async fn entry_with_property(
    State(state): State<SharedState>,
    Path((service, username, repository, branch, property)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
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
        addr,
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
    addr: SocketAddr,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let service: GitProvider = match service.parse() {
        Ok(service) => service,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e}))).into_response();
        }
    };

    let params = RepoParameters {
        service,
        username,
        repository,
        branch,
        property: property.clone(),
    };

    let meta = metadata::extract(&headers, Some(addr.ip()), &state.config.trusted_proxies);

    if let Err(retry_after) = state.submission_limiter.check(
        &params.slug(),
        addr.ip(),
        state.config.rate_limit,
        state.config.rate_limit_window_secs,
    ) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": format!("Rate limited. Retry after {retry_after}s")})),
        )
            .into_response();
    }

    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());
    let raw = if content_type.is_some_and(|ct| ct.contains("multipart/form-data")) {
        parser::parse_multipart(&headers, body).await
    } else {
        parser::parse_body(content_type, &body)
    };
    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e}))).into_response();
        }
    };

    let fields: FieldMap = match raw.get("fields") {
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(fields) => fields,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("Malformed fields: {e}")})),
                )
                    .into_response();
            }
        },
        None => FieldMap::new(),
    };

    let options: SubmissionOptions = match raw.get("options") {
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(options) => options,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("Malformed options: {e}")})),
                )
                    .into_response();
            }
        },
        None => SubmissionOptions::default(),
    };

    let git = git::factory(&params, &state.config, &state.http);
    let mail_provider = Arc::new(MailgunProvider::new(state.http.clone()));
    let spam = match (&state.config.akismet_api_key, &state.config.akismet_site) {
        (Some(key), Some(site)) => Some(Arc::new(AkismetChecker::new(
            state.http.clone(),
            key.clone(),
            site.clone(),
        )) as Arc<dyn crate::spam::SpamChecker>),
        _ => None,
    };

    let processor = Processor::new(
        state.config.clone(),
        params,
        ConfigPath::new(property),
        git,
        mail_provider,
        spam,
        state.http.clone(),
        meta.clone(),
    );

    let redirect_error = options.redirect_error.clone();

    let site = match processor.site_config().await {
        Ok(site) => site,
        Err(e) => return response::failure(e, redirect_error.as_deref()),
    };

    let captcha = RecaptchaVerifier::new(state.http.clone());
    let captcha_response = raw.get("g-recaptcha-response").and_then(|v| v.as_str());
    if let Err(e) = pipeline::check_recaptcha(
        &captcha,
        &state.config,
        &site,
        &options,
        captcha_response,
        &meta.ip,
    )
    .await
    {
        return response::failure(e, redirect_error.as_deref());
    }

    match processor.process_entry(&site, fields, options).await {
        Ok(outcome) => response::success(&outcome),
        Err(e) => response::failure(e, redirect_error.as_deref()),
    }
}
