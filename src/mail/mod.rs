pub mod mailgun;

use std::sync::Arc;

use async_trait::async_trait;

/// A mailing list to create. Access and reply policy are set explicitly:
/// only list owners may post, and replies go to the sender rather than the
/// whole list.
#[derive(Debug, Clone)]
pub struct NewList {
    pub address: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub access_level: String,
    pub reply_preference: String,
}

#[derive(Debug, Clone)]
pub struct NewMember {
    pub address: String,
    /// Consent/confirmation audit fields stored alongside the membership.
    pub vars: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub address: String,
    pub subscribed: bool,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    /// Set explicitly on every message: a "sender" reply preference on the
    /// list would otherwise route replies to the provider's postmaster.
    pub reply_to: String,
}

#[derive(Debug)]
pub enum MailError {
    Status { code: u16, message: String },
    Transport(String),
}

impl MailError {
    /// The provider rejects a second add of the same address with a 400.
    pub fn is_duplicate_member(&self) -> bool {
        matches!(self, MailError::Status { code: 400, .. })
    }
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::Status { code, message } => write!(f, "HTTP {code}: {message}"),
            MailError::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        MailError::Transport(err.to_string())
    }
}

/// The mailing-list/transactional-mail surface the core consumes. The store
/// is shared and concurrently accessed, so create/add must be treated as
/// idempotent at-least-once operations by callers.
#[async_trait]
pub trait MailAgent: Send + Sync {
    fn domain(&self) -> &str;

    /// None when the list does not exist; an error only for real failures.
    async fn get_list(&self, address: &str) -> Result<Option<()>, MailError>;

    async fn create_list(&self, list: &NewList) -> Result<(), MailError>;

    async fn add_member(&self, list_address: &str, member: &NewMember) -> Result<(), MailError>;

    async fn list_members(&self, list_address: &str) -> Result<Vec<Member>, MailError>;

    /// None when the address is not on the list.
    async fn get_member(
        &self,
        list_address: &str,
        address: &str,
    ) -> Result<Option<Member>, MailError>;

    async fn send_message(&self, message: &OutboundMessage) -> Result<(), MailError>;
}

/// Builds a [`MailAgent`] once the per-site credentials are known. Site
/// configuration may override the deployment's API key and domain, and that
/// configuration is only available after the repository has been read, so
/// agent construction has to be deferred.
pub trait MailProvider: Send + Sync {
    fn agent(&self, api_key: &str, domain: &str) -> Arc<dyn MailAgent>;
}

pub struct MailgunProvider {
    http: reqwest::Client,
}

impl MailgunProvider {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl MailProvider for MailgunProvider {
    fn agent(&self, api_key: &str, domain: &str) -> Arc<dyn MailAgent> {
        Arc::new(mailgun::MailgunAgent::new(
            self.http.clone(),
            api_key.to_string(),
            domain.to_string(),
        ))
    }
}
