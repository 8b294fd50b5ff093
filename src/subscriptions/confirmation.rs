//! Double opt-in confirmation flow.
//!
//! The confirmation email carries a sealed token holding the entire
//! subscription context. Redemption is stateless: the token proves itself
//! via the embedded pepper and environment tag, and nothing is kept
//! server-side between issue and redeem. Tokens expire after a configured
//! TTL; single-use tracking is deliberately not done, since a replayed redemption
//! is harmless because the membership add is idempotent.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::Config;
use crate::crypto;
use crate::error::AppError;
use crate::mail::{MailAgent, OutboundMessage};
use crate::submission::{FieldMap, SubmissionOptions};
use crate::template::{self, TemplateContext};

use super::notification::load_template;

pub const CONFIRM_TEXT_START: &str = "<!--confirmTextStart-->";
pub const CONFIRM_TEXT_END: &str = "<!--confirmTextEnd-->";

const SUBJECT_TEMPLATE: &str = "confirmation-subject.html";
const CONTENT_TEMPLATE: &str = "confirmation-content.html";

/// The subscription context a confirmation token carries: enough to perform
/// the membership add without any server-side session, plus the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationData {
    pub subscriber_email_address: String,
    pub parent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    pub subscribe_consent_date: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_consent_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_consent_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_consent_text: Option<String>,
    pub subscribe_confirm_context: String,
    pub subscribe_confirm_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_confirm_redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe_confirm_redirect_error: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenEnvelope {
    pepper: String,
    #[serde(default)]
    exe_env: Option<String>,
    issued_at: i64,
    #[serde(flatten)]
    data: ConfirmationData,
}

/// Single opt-in ("consent") audit fields derived from request options.
/// Falls back to the origin URL and the parent name when the explicit
/// consent fields were not supplied.
pub fn consent_vars(options: &SubmissionOptions) -> serde_json::Value {
    json!({
        "subscribeConsentDate": options
            .subscribe_consent_date
            .unwrap_or_else(|| Utc::now().timestamp()),
        "subscribeConsentUrl": options
            .subscribe_consent_url
            .clone()
            .or_else(|| options.origin.clone()),
        "subscribeConsentContext": options
            .subscribe_consent_context
            .clone()
            .or_else(|| options.parent_name.clone()),
        "subscribeConsentText": options.subscribe_consent_text,
    })
}

pub fn issue_token(data: &ConfirmationData, config: &Config) -> Result<String, String> {
    let envelope = TokenEnvelope {
        pepper: config.crypto_pepper.clone(),
        exe_env: config.exe_env.clone(),
        issued_at: Utc::now().timestamp(),
        data: data.clone(),
    };
    crypto::seal_json(&envelope, &config.encryption_key)
}

/// Open a confirmation token and verify its provenance and age. Every
/// failure mode maps to the same generic authenticity error.
pub fn redeem(token: &str, config: &Config) -> Result<ConfirmationData, AppError> {
    let envelope: TokenEnvelope = crypto::open_json(token, &config.encryption_key)
        .map_err(|e| AppError::Authenticity(format!("Confirmation token did not open: {e}")))?;

    if envelope.pepper != config.crypto_pepper {
        return Err(AppError::Authenticity(
            "Confirmation token pepper mismatch".to_string(),
        ));
    }
    if envelope.exe_env != config.exe_env {
        return Err(AppError::Authenticity(
            "Confirmation token environment mismatch".to_string(),
        ));
    }

    let age = Utc::now().timestamp() - envelope.issued_at;
    if age > config.confirm_token_ttl_secs {
        return Err(AppError::Authenticity(format!(
            "Confirmation token expired ({age}s old)"
        )));
    }

    Ok(envelope.data)
}

/// Render and send the confirmation email. Returns the error only for
/// transport failures; template problems fall back to defaults.
pub async fn send_confirmation_email(
    mail: &dyn MailAgent,
    config: &Config,
    to: &str,
    fields: &FieldMap,
    extended_fields: &FieldMap,
    options: &SubmissionOptions,
    site_name: &str,
) -> Result<(), AppError> {
    let parent = options
        .parent
        .clone()
        .ok_or_else(|| AppError::Internal("Confirmation issued without a parent".to_string()))?;

    let mut ctx = TemplateContext {
        fields: json!(fields),
        extended_fields: json!(extended_fields),
        options: serde_json::to_value(options)
            .map_err(|e| AppError::Internal(format!("Options not serializable: {e}")))?,
        data: json!({ "siteName": site_name }),
        confirm_link: None,
    };

    let subject = build_subject(config, &ctx, site_name).await;

    let template = load_template(config, CONTENT_TEMPLATE).await;
    let template_or_default = template.clone().unwrap_or_else(|| default_content(options));

    // The confirmation text is lifted from the raw template, delimiters and
    // all, so the audit trail records exactly what the subscriber was shown.
    let confirm_text = extract_confirm_text(&template_or_default);

    let consent = consent_vars(options);
    let data = ConfirmationData {
        subscriber_email_address: to.to_string(),
        parent,
        parent_name: options.parent_name.clone(),
        subscribe_consent_date: consent["subscribeConsentDate"].as_i64().unwrap_or_default(),
        subscribe_consent_url: consent["subscribeConsentUrl"].as_str().map(String::from),
        subscribe_consent_context: consent["subscribeConsentContext"]
            .as_str()
            .map(String::from),
        subscribe_consent_text: options.subscribe_consent_text.clone(),
        subscribe_confirm_context: format!("Email \"{}\"", subject.trim()),
        subscribe_confirm_text: confirm_text,
        subscribe_confirm_redirect: options.subscribe_confirm_redirect.clone(),
        subscribe_confirm_redirect_error: options.subscribe_confirm_redirect_error.clone(),
    };

    let token = issue_token(&data, config)
        .map_err(|e| AppError::Internal(format!("Could not seal confirmation token: {e}")))?;
    let confirm_url = options.subscribe_confirm_url.clone().unwrap_or_default();
    let encoded: String = form_urlencoded::byte_serialize(token.as_bytes()).collect();
    ctx.confirm_link = Some(format!("{confirm_url}?data={encoded}"));

    let html = {
        let rendered = template::render(&template_or_default, &ctx);
        if rendered.trim().is_empty() {
            tracing::warn!("Confirmation content template rendered blank; using default");
            template::render(&default_content(options), &ctx)
        } else {
            rendered
        }
    };

    let mut from = format!(
        "{} <{}>",
        config.email_from_name, config.email_from_address
    );
    let mut subject = subject;
    if let Some(tag) = config.env_tag() {
        from = format!("{tag} - {from}");
        subject = format!("{tag} - {subject}");
    }

    let message = OutboundMessage {
        reply_to: from.clone(),
        from,
        to: to.to_string(),
        subject,
        html,
    };

    mail.send_message(&message)
        .await
        .map_err(|e| AppError::Mail(e.to_string()))
}

async fn build_subject(config: &Config, ctx: &TemplateContext, site_name: &str) -> String {
    if let Some(template) = load_template(config, SUBJECT_TEMPLATE).await {
        let rendered = template::render(&template, ctx);
        if !rendered.trim().is_empty() {
            return rendered.trim().to_string();
        }
        tracing::warn!("Confirmation subject template rendered blank; using default");
    }
    format!("Please confirm your subscription to {site_name}")
}

fn default_content(options: &SubmissionOptions) -> String {
    let origin = options.origin.clone().unwrap_or_default();
    format!(
        "<html>\n  <body>\n    You have requested to be notified every time a new comment is added to <a href=\"{origin}\">{origin}</a>.\n    <br>\n    <br>\n    {CONFIRM_TEXT_START}Please confirm your subscription request by clicking this link:{CONFIRM_TEXT_END} <a href=\"{{{{confirmLink}}}}\">{{{{confirmLink}}}}</a><br>\n    <br>\n  </body>\n</html>\n"
    )
}

fn extract_confirm_text(template: &str) -> String {
    let Some(start) = template.find(CONFIRM_TEXT_START) else {
        return String::new();
    };
    let start = start + CONFIRM_TEXT_START.len();
    let Some(end) = template[start..].find(CONFIRM_TEXT_END) else {
        return String::new();
    };
    template[start..start + end].to_string()
}
