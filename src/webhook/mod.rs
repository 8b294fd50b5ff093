//! Webhook merge coordinator.
//!
//! Hosting providers fan every merge-request event to every listener, so
//! most deliveries are noise: events for other branches, for unmerged
//! requests, or for pull requests humans opened by hand. Those all terminate
//! without error. Only authentication problems are hard failures: a
//! configured secret that does not verify means the request cannot be
//! trusted at all.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::Value;

use crate::config::Config;
use crate::continuation;
use crate::error::AppError;
use crate::git::{BRANCH_PREFIX, GitProvider, GitService, RepoParameters};
use crate::mail::MailProvider;
use crate::site_config::{self, SiteConfig};
use crate::submission::metadata::RequestMetadata;
use crate::submission::pipeline::Processor;
use crate::submission::ConfigPath;

/// Merge-request attributes, normalized across providers.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeEvent {
    pub number: i64,
    pub target_branch: String,
    pub source_branch: String,
    pub body: String,
    pub merged: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// All gates passed; any deferred work was dispatched.
    Handled,
    /// A benign terminal state: the event was not for us.
    Ignored(String),
}

/// Run an inbound hosting-provider event through the gate sequence:
/// event-type, authentication, branch, merge, branch-origin, continuation.
pub async fn handle(
    config: &Config,
    params: &RepoParameters,
    headers: &HeaderMap,
    raw_body: &[u8],
    git: Arc<dyn GitService>,
    mail_provider: Arc<dyn MailProvider>,
    http: reqwest::Client,
) -> Result<WebhookOutcome, Vec<AppError>> {
    let mut errors = Vec::new();

    // Gate: event kind.
    match event_kind(params.service, headers) {
        EventKind::Relevant => {}
        EventKind::Missing => {
            return Err(vec![AppError::BadWebhook(
                "No event header in webhook request".to_string(),
            )]);
        }
        EventKind::Other(kind) => {
            tracing::debug!("Ignoring webhook event kind {kind}");
            return Ok(WebhookOutcome::Ignored(format!("event kind {kind}")));
        }
    }

    // The site config supplies the webhook secret and the branch this
    // deployment cares about; without it we can't authenticate.
    let site = load_site_config(params, git.as_ref()).await.map_err(|e| vec![e])?;

    authenticate(config, &site, params.service, headers, raw_body).map_err(|e| vec![e])?;

    let payload: Value = serde_json::from_slice(raw_body)
        .map_err(|e| vec![AppError::BadWebhook(format!("Unparseable payload: {e}"))])?;
    let event = extract_event(params.service, &payload).map_err(|e| vec![e])?;

    // Gate: target branch. Every listener on the repository gets this event;
    // only the deployment configured for the target branch should act.
    let config_branch = if !site.branch.is_empty() {
        site.branch.clone()
    } else {
        config
            .branch
            .clone()
            .unwrap_or_else(|| event.target_branch.clone())
    };

    if config_branch != params.branch || params.branch != event.target_branch {
        tracing::info!(
            "Merge branch mismatch for request #{}: config={config_branch}, params={}, target={}",
            event.number,
            params.branch,
            event.target_branch
        );
        return Ok(WebhookOutcome::Ignored(format!(
            "branch mismatch for request #{}",
            event.number
        )));
    }

    // Gate: the request must actually have been merged, not just closed.
    if !event.merged {
        tracing::info!("Request #{} not merged", event.number);
        return Ok(WebhookOutcome::Ignored(format!(
            "request #{} not merged",
            event.number
        )));
    }

    // Gate: only branches this service generated carry continuations; anything
    // else is a human pull request that happens to target our branch.
    if !event.source_branch.starts_with(BRANCH_PREFIX) {
        tracing::info!(
            "Request #{} not generated by this service (source branch {})",
            event.number,
            event.source_branch
        );
        return Ok(WebhookOutcome::Ignored(format!(
            "request #{} from foreign branch",
            event.number
        )));
    }

    // A review body without a continuation is normal: notifications were off
    // when the review was opened.
    if let Some(deferred) = continuation::decode(&event.body, config) {
        let processor = Processor::new(
            config.clone(),
            params.clone(),
            deferred.config_path.clone(),
            git.clone(),
            mail_provider,
            None,
            http,
            RequestMetadata::default(),
        );

        if let Err(e) = processor.process_merge(&deferred).await {
            tracing::error!("Deferred notification for request #{} failed: {e}", event.number);
            errors.push(e);
        }
    }

    // GitHub leaves merged source branches around; GitLab removes them
    // itself. A branch someone already deleted is fine.
    if params.service == GitProvider::GitHub {
        if let Err(e) = git.delete_branch(&event.source_branch).await {
            if !e.is_missing_ref() {
                tracing::error!("Failed to delete branch {}: {e}", event.source_branch);
                errors.push(AppError::Git(format!(
                    "Failed to delete branch {}: {e}",
                    event.source_branch
                )));
            }
        }
    }

    if errors.is_empty() {
        Ok(WebhookOutcome::Handled)
    } else {
        Err(errors)
    }
}

enum EventKind {
    Relevant,
    Missing,
    Other(String),
}

fn event_kind(service: GitProvider, headers: &HeaderMap) -> EventKind {
    let (header, wanted) = match service {
        GitProvider::GitHub => ("x-github-event", "pull_request"),
        GitProvider::GitLab => ("x-gitlab-event", "Merge Request Hook"),
    };

    match headers.get(header).and_then(|v| v.to_str().ok()) {
        None => EventKind::Missing,
        Some(kind) if kind == wanted => EventKind::Relevant,
        Some(kind) => EventKind::Other(kind.to_string()),
    }
}

async fn load_site_config(
    params: &RepoParameters,
    git: &dyn GitService,
) -> Result<SiteConfig, AppError> {
    let config_path = ConfigPath::new(params.property.clone());
    let raw = git
        .read_file(&config_path.file)
        .await
        .map_err(|e| AppError::Git(format!("Could not read site config: {e}")))?;
    site_config::parse(&raw, config_path.path.as_deref())
}

/// Verify the provider's authenticity proof when a secret is configured.
/// No configured secret means authentication is skipped and the request is
/// trusted, a deliberate lower-security fallback.
fn authenticate(
    config: &Config,
    site: &SiteConfig,
    service: GitProvider,
    headers: &HeaderMap,
    raw_body: &[u8],
) -> Result<(), AppError> {
    match service {
        GitProvider::GitHub => {
            let Some(secret) = site
                .github_webhook_secret
                .as_deref()
                .or(config.github_webhook_secret.as_deref())
            else {
                return Ok(());
            };

            let signature = headers
                .get("x-hub-signature")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    AppError::Authenticity("No signature in webhook request".to_string())
                })?;

            if !crate::crypto::verify_github_signature(secret, raw_body, signature) {
                return Err(AppError::Authenticity(
                    "Webhook signature did not verify".to_string(),
                ));
            }
            Ok(())
        }
        GitProvider::GitLab => {
            let Some(secret) = site
                .gitlab_webhook_secret
                .as_deref()
                .or(config.gitlab_webhook_secret.as_deref())
            else {
                return Ok(());
            };

            let token = headers
                .get("x-gitlab-token")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    AppError::Authenticity("No token in webhook request".to_string())
                })?;

            if !crate::crypto::verify_shared_token(secret, token) {
                return Err(AppError::Authenticity(
                    "Webhook token did not match".to_string(),
                ));
            }
            Ok(())
        }
    }
}

fn extract_event(service: GitProvider, payload: &Value) -> Result<MergeEvent, AppError> {
    let missing = |what: &str| AppError::BadWebhook(format!("Payload missing {what}"));

    match service {
        GitProvider::GitHub => {
            let pr = payload.get("pull_request").ok_or_else(|| missing("pull_request"))?;
            Ok(MergeEvent {
                number: payload["number"].as_i64().ok_or_else(|| missing("number"))?,
                target_branch: pr["base"]["ref"]
                    .as_str()
                    .ok_or_else(|| missing("base.ref"))?
                    .to_string(),
                source_branch: pr["head"]["ref"]
                    .as_str()
                    .ok_or_else(|| missing("head.ref"))?
                    .to_string(),
                body: pr["body"].as_str().unwrap_or_default().to_string(),
                // A closed-unmerged PR also arrives with state "closed";
                // the merged flag is the only reliable signal.
                merged: pr["merged"].as_bool().unwrap_or(false),
            })
        }
        GitProvider::GitLab => {
            let attrs = payload
                .get("object_attributes")
                .ok_or_else(|| missing("object_attributes"))?;
            Ok(MergeEvent {
                number: attrs["iid"].as_i64().ok_or_else(|| missing("iid"))?,
                target_branch: attrs["target_branch"]
                    .as_str()
                    .ok_or_else(|| missing("target_branch"))?
                    .to_string(),
                source_branch: attrs["source_branch"]
                    .as_str()
                    .ok_or_else(|| missing("source_branch"))?
                    .to_string(),
                body: attrs["description"].as_str().unwrap_or_default().to_string(),
                merged: attrs["state"].as_str() == Some("merged"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn github_event_extraction() {
        let payload = json!({
            "number": 7,
            "pull_request": {
                "base": {"ref": "main"},
                "head": {"ref": "staticpost_abc"},
                "body": "review body",
                "merged": true,
            },
        });
        let event = extract_event(GitProvider::GitHub, &payload).unwrap();
        assert_eq!(
            event,
            MergeEvent {
                number: 7,
                target_branch: "main".to_string(),
                source_branch: "staticpost_abc".to_string(),
                body: "review body".to_string(),
                merged: true,
            }
        );
    }

    #[test]
    fn github_closed_without_merge_is_not_merged() {
        let payload = json!({
            "number": 7,
            "pull_request": {
                "base": {"ref": "main"},
                "head": {"ref": "staticpost_abc"},
                "body": null,
                "merged": false,
            },
        });
        let event = extract_event(GitProvider::GitHub, &payload).unwrap();
        assert!(!event.merged);
        assert_eq!(event.body, "");
    }

    #[test]
    fn gitlab_event_extraction() {
        let payload = json!({
            "object_attributes": {
                "iid": 3,
                "target_branch": "main",
                "source_branch": "staticpost_xyz",
                "description": "desc",
                "state": "merged",
            },
        });
        let event = extract_event(GitProvider::GitLab, &payload).unwrap();
        assert!(event.merged);
        assert_eq!(event.number, 3);

        let closed = json!({
            "object_attributes": {
                "iid": 3,
                "target_branch": "main",
                "source_branch": "staticpost_xyz",
                "description": "desc",
                "state": "closed",
            },
        });
        assert!(!extract_event(GitProvider::GitLab, &closed).unwrap().merged);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(extract_event(GitProvider::GitHub, &json!({})).is_err());
        assert!(extract_event(GitProvider::GitLab, &json!({"object_attributes": {}})).is_err());
    }

    #[test]
    fn event_kind_matching() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            event_kind(GitProvider::GitHub, &headers),
            EventKind::Missing
        ));

        headers.insert("x-github-event", "issues".parse().unwrap());
        assert!(matches!(
            event_kind(GitProvider::GitHub, &headers),
            EventKind::Other(_)
        ));

        headers.insert("x-github-event", "pull_request".parse().unwrap());
        assert!(matches!(
            event_kind(GitProvider::GitHub, &headers),
            EventKind::Relevant
        ));
    }
}
