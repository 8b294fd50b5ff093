use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;

use crate::error::AppError;
use crate::submission::pipeline::{ProcessOutcome, SecondaryErrors};

/// Encode a successful submission into the response: a redirect when the
/// caller supplied one (with any secondary errors in the query string so the
/// destination page can surface them), a JSON payload otherwise.
pub fn success(outcome: &ProcessOutcome) -> Response {
    if let Some(redirect) = &outcome.redirect {
        return Redirect::to(&with_secondary_errors(
            redirect,
            outcome.secondary_errors.as_ref(),
        ))
        .into_response();
    }

    let mut body = json!({
        "success": true,
        "fields": outcome.fields,
    });
    if let Some(secondary) = &outcome.secondary_errors {
        body["secondaryErrors"] = json!(secondary);
    }

    (StatusCode::OK, Json(body)).into_response()
}

/// Encode a failed submission: the caller's error redirect when supplied,
/// the error payload otherwise.
pub fn failure(error: AppError, redirect_error: Option<&str>) -> Response {
    tracing::warn!("Submission failed: {error}");
    if let Some(url) = redirect_error {
        return Redirect::to(url).into_response();
    }
    error.into_response()
}

fn with_secondary_errors(url: &str, secondary: Option<&SecondaryErrors>) -> String {
    let Some(secondary) = secondary else {
        return url.to_string();
    };

    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("subscribeError", &secondary.subscribe_error.to_string())
        .append_pair(
            "subscribeConfirmError",
            &secondary.subscribe_confirm_error.to_string(),
        )
        .finish();

    if url.contains('?') {
        format!("{url}&{query}")
    } else {
        format!("{url}?{query}")
    }
}
