use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Request-scoped failure taxonomy.
///
/// Configuration, authenticity, and validation errors are fatal for the
/// request and never retried. Spam is a normal rejection outcome, not a
/// system fault. Collaborator transport errors carry the underlying error
/// text for diagnostics. Side-channel (subscription) failures are NOT
/// represented here; they ride along on a successful result as secondary
/// errors.
#[derive(Debug, Clone)]
pub enum AppError {
    MissingConfigBlock,
    MissingConfigFields(Vec<String>),
    BranchMismatch,
    MissingRequiredFields(Vec<String>),
    InvalidFields(Vec<String>),
    Spam,
    /// Signature/token/pepper/environment mismatch. The inner detail is for
    /// logs only; callers see a generic category so probing requests learn
    /// nothing about which check tripped.
    Authenticity(String),
    RecaptchaMissingCredentials,
    RecaptchaConfigMismatch,
    InvalidFormat(String),
    MissingContentTransform,
    /// A webhook delivery missing the pieces every real provider sends.
    BadWebhook(String),
    Git(String),
    Mail(String),
    Internal(String),
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::MissingConfigBlock => "MISSING_CONFIG_BLOCK",
            AppError::MissingConfigFields(_) => "MISSING_CONFIG_FIELDS",
            AppError::BranchMismatch => "BRANCH_MISMATCH",
            AppError::MissingRequiredFields(_) => "MISSING_REQUIRED_FIELDS",
            AppError::InvalidFields(_) => "INVALID_FIELDS",
            AppError::Spam => "IS_SPAM",
            AppError::Authenticity(_) => "AUTH_TOKEN_INVALID",
            AppError::RecaptchaMissingCredentials => "RECAPTCHA_MISSING_CREDENTIALS",
            AppError::RecaptchaConfigMismatch => "RECAPTCHA_CONFIG_MISMATCH",
            AppError::InvalidFormat(_) => "INVALID_FORMAT",
            AppError::MissingContentTransform => "NO_FRONTMATTER_CONTENT_TRANSFORM",
            AppError::BadWebhook(_) => "BAD_WEBHOOK_REQUEST",
            AppError::Git(_) => "GIT_ERROR",
            AppError::Mail(_) => "MAIL_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingConfigBlock
            | AppError::MissingConfigFields(_)
            | AppError::BranchMismatch
            | AppError::MissingRequiredFields(_)
            | AppError::InvalidFields(_)
            | AppError::Spam
            | AppError::RecaptchaMissingCredentials
            | AppError::RecaptchaConfigMismatch
            | AppError::InvalidFormat(_)
            | AppError::MissingContentTransform
            | AppError::BadWebhook(_) => StatusCode::BAD_REQUEST,
            AppError::Authenticity(_) => StatusCode::UNAUTHORIZED,
            AppError::Git(_) | AppError::Mail(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Offending field names, when the error carries them.
    pub fn data(&self) -> Option<&[String]> {
        match self {
            AppError::MissingConfigFields(fields)
            | AppError::MissingRequiredFields(fields)
            | AppError::InvalidFields(fields) => Some(fields),
            _ => None,
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            AppError::MissingConfigBlock => "Site configuration block not found".to_string(),
            AppError::MissingConfigFields(_) => {
                "Site configuration is missing required fields".to_string()
            }
            AppError::BranchMismatch => {
                "Request branch does not match the configured branch".to_string()
            }
            AppError::MissingRequiredFields(_) => "Required fields are missing".to_string(),
            AppError::InvalidFields(_) => "Fields not allowed by the site were supplied".to_string(),
            AppError::Spam => "Submission rejected".to_string(),
            // Deliberately generic.
            AppError::Authenticity(_) => "Unable to verify authenticity of request".to_string(),
            AppError::RecaptchaMissingCredentials => "Missing reCAPTCHA credentials".to_string(),
            AppError::RecaptchaConfigMismatch => {
                "reCAPTCHA credentials do not match the site configuration".to_string()
            }
            AppError::InvalidFormat(format) => format!("Unsupported entry format: {format}"),
            AppError::MissingContentTransform => {
                "Frontmatter format requires a frontmatterContent transform".to_string()
            }
            AppError::BadWebhook(detail) => format!("Malformed webhook request: {detail}"),
            AppError::Git(e) => format!("Hosting provider error: {e}"),
            AppError::Mail(e) => format!("Mail provider error: {e}"),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::MissingConfigFields(fields) => {
                write!(f, "MISSING_CONFIG_FIELDS: {}", fields.join(", "))
            }
            AppError::MissingRequiredFields(fields) => {
                write!(f, "MISSING_REQUIRED_FIELDS: {}", fields.join(", "))
            }
            AppError::InvalidFields(fields) => {
                write!(f, "INVALID_FIELDS: {}", fields.join(", "))
            }
            AppError::Authenticity(detail) => write!(f, "AUTH_TOKEN_INVALID: {detail}"),
            AppError::InvalidFormat(format) => write!(f, "INVALID_FORMAT: {format}"),
            AppError::BadWebhook(detail) => write!(f, "BAD_WEBHOOK_REQUEST: {detail}"),
            AppError::Git(e) => write!(f, "GIT_ERROR: {e}"),
            AppError::Mail(e) => write!(f, "MAIL_ERROR: {e}"),
            AppError::Internal(e) => write!(f, "INTERNAL_ERROR: {e}"),
            other => write!(f, "{}", other.error_code()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Authenticity(detail) => tracing::warn!("Authenticity failure: {detail}"),
            AppError::Internal(detail) => tracing::error!("Internal error: {detail}"),
            _ => {}
        }

        let mut body = json!({
            "success": false,
            "errorCode": self.error_code(),
            "message": self.public_message(),
        });

        if let Some(data) = self.data() {
            body["data"] = json!(data);
        }

        if !matches!(self, AppError::Authenticity(_) | AppError::Internal(_)) {
            body["rawError"] = json!(self.to_string());
        }

        (self.status(), axum::Json(body)).into_response()
    }
}
