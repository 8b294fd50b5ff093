pub mod github;
pub mod gitlab;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Branch prefix for review branches created by this service. The webhook
/// coordinator uses it to tell its own merge requests apart from human ones.
pub const BRANCH_PREFIX: &str = "staticpost_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    GitHub,
    GitLab,
}

impl std::str::FromStr for GitProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(GitProvider::GitHub),
            "gitlab" => Ok(GitProvider::GitLab),
            other => Err(format!("Unknown git service: {other}")),
        }
    }
}

/// The repository a request targets, taken from the URL path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoParameters {
    pub service: GitProvider,
    pub username: String,
    pub repository: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl RepoParameters {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.username, self.repository)
    }
}

#[derive(Debug)]
pub enum GitError {
    /// The provider answered with a non-success status.
    Status { code: u16, message: String },
    Transport(String),
}

impl GitError {
    /// Branch deletion races with the provider's own cleanup; a missing ref
    /// comes back as 404 (GitLab) or 422 (GitHub).
    pub fn is_missing_ref(&self) -> bool {
        matches!(self, GitError::Status { code: 404 | 422, .. })
    }
}

impl std::fmt::Display for GitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitError::Status { code, message } => write!(f, "HTTP {code}: {message}"),
            GitError::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl From<reqwest::Error> for GitError {
    fn from(err: reqwest::Error) -> Self {
        GitError::Transport(err.to_string())
    }
}

/// The hosting-provider surface the core consumes. One implementation per
/// provider; tests substitute in-memory doubles.
#[async_trait]
pub trait GitService: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, GitError>;

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), GitError>;

    /// Create `branch` off the configured base branch, commit the file to it,
    /// and open a review (pull/merge request) with the given body.
    async fn write_file_and_open_review(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
        review_body: &str,
    ) -> Result<(), GitError>;

    async fn delete_branch(&self, branch: &str) -> Result<(), GitError>;

    /// The user the configured (or supplied OAuth) token belongs to, as the
    /// provider's raw JSON object.
    async fn get_current_user(&self) -> Result<serde_json::Value, GitError>;
}

/// Build a provider client for the given repository using the deployment's
/// own access token.
pub fn factory(
    params: &RepoParameters,
    config: &Config,
    http: &reqwest::Client,
) -> Arc<dyn GitService> {
    let token = match params.service {
        GitProvider::GitHub => config.github_token.clone(),
        GitProvider::GitLab => config.gitlab_token.clone(),
    };
    with_token(params, token, http)
}

/// Build a provider client with an explicit token, used when acting on
/// behalf of an authenticated submitter.
pub fn with_token(
    params: &RepoParameters,
    token: Option<String>,
    http: &reqwest::Client,
) -> Arc<dyn GitService> {
    match params.service {
        GitProvider::GitHub => Arc::new(github::GithubClient::new(
            http.clone(),
            params.username.clone(),
            params.repository.clone(),
            params.branch.clone(),
            token,
        )),
        GitProvider::GitLab => Arc::new(gitlab::GitlabClient::new(
            http.clone(),
            params.username.clone(),
            params.repository.clone(),
            params.branch.clone(),
            token,
        )),
    }
}
