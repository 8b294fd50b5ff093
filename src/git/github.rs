use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;

use super::{GitError, GitService};

const API_BASE: &str = "https://api.github.com";

pub struct GithubClient {
    http: reqwest::Client,
    owner: String,
    repo: String,
    /// Base branch for reads, direct commits, and review targets.
    branch: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(
        http: reqwest::Client,
        owner: String,
        repo: String,
        branch: String,
        token: Option<String>,
    ) -> Self {
        Self {
            http,
            owner,
            repo,
            branch,
            token,
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .header("User-Agent", "staticpost")
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{API_BASE}/repos/{}/{}/{tail}", self.owner, self.repo)
    }

    async fn put_contents(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), GitError> {
        let resp = self
            .request(reqwest::Method::PUT, self.repo_url(&format!("contents/{path}")))
            .json(&json!({
                "message": message,
                "content": BASE64.encode(content.as_bytes()),
                "branch": branch,
            }))
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    async fn branch_head_sha(&self) -> Result<String, GitError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                self.repo_url(&format!("git/ref/heads/{}", self.branch)),
            )
            .send()
            .await?;
        let body: serde_json::Value = check(resp).await?.json().await?;
        body["object"]["sha"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| GitError::Transport("Missing object.sha in ref response".to_string()))
    }
}

#[async_trait]
impl GitService for GithubClient {
    async fn read_file(&self, path: &str) -> Result<String, GitError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                self.repo_url(&format!("contents/{path}")),
            )
            .query(&[("ref", self.branch.as_str())])
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await?;
        Ok(check(resp).await?.text().await?)
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), GitError> {
        self.put_contents(path, content, branch, message).await
    }

    async fn write_file_and_open_review(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
        review_body: &str,
    ) -> Result<(), GitError> {
        let base_sha = self.branch_head_sha().await?;

        let resp = self
            .request(reqwest::Method::POST, self.repo_url("git/refs"))
            .json(&json!({
                "ref": format!("refs/heads/{branch}"),
                "sha": base_sha,
            }))
            .send()
            .await?;
        check(resp).await?;

        self.put_contents(path, content, branch, message).await?;

        let resp = self
            .request(reqwest::Method::POST, self.repo_url("pulls"))
            .json(&json!({
                "title": message,
                "head": branch,
                "base": self.branch,
                "body": review_body,
            }))
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), GitError> {
        let resp = self
            .request(
                reqwest::Method::DELETE,
                self.repo_url(&format!("git/refs/heads/{branch}")),
            )
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    async fn get_current_user(&self) -> Result<serde_json::Value, GitError> {
        let resp = self
            .request(reqwest::Method::GET, format!("{API_BASE}/user"))
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GitError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message: String = resp
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(512)
        .collect();
    Err(GitError::Status {
        code: status.as_u16(),
        message,
    })
}
