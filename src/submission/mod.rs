pub mod fields;
pub mod format;
pub mod metadata;
pub mod parser;
pub mod pipeline;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Submitted form fields, in stable order. Values are JSON primitives.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Where to find the site configuration inside the target repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPath {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ConfigPath {
    pub fn new(property: Option<String>) -> Self {
        Self {
            file: "staticpost.yml".to_string(),
            path: property,
        }
    }
}

/// Request metadata sent alongside the fields. Everything here is
/// client-supplied and advisory except the auth token and the reCAPTCHA
/// credentials, which are verified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmissionOptions {
    /// Id of the entry being commented on/subscribed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Human-readable name of the parent entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Full URL of the page the submission came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Name of the field holding the submitter's email, set when the
    /// submitter ticked "notify me".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<String>,
    /// Field whose (hashed) value identifies the commenter in suppression
    /// checks. Defaults to "email".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_error: Option<String>,
    /// Sealed hosting-provider OAuth token for authenticated submissions.
    #[serde(rename = "auth-token", skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(rename = "reCaptcha", skip_serializing_if = "Option::is_none")]
    pub recaptcha: Option<RecaptchaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_consent_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_consent_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_consent_context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_consent_text: Option<String>,
    /// Base URL the confirmation link points back at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_confirm_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_confirm_redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_confirm_redirect_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecaptchaOptions {
    pub site_key: String,
    /// Sealed copy of the site's reCAPTCHA secret.
    pub secret: String,
}
