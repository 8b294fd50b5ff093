use async_trait::async_trait;
use serde_json::json;

use super::{GitError, GitService};

const API_BASE: &str = "https://gitlab.com/api/v4";

pub struct GitlabClient {
    http: reqwest::Client,
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
}

impl GitlabClient {
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
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.token {
            req = req.header("PRIVATE-TOKEN", token.clone());
        }
        req
    }

    fn project_url(&self, tail: &str) -> String {
        let project = urlencode(&format!("{}/{}", self.owner, self.repo));
        format!("{API_BASE}/projects/{project}/{tail}")
    }

    async fn commit_file(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), GitError> {
        let resp = self
            .request(
                reqwest::Method::POST,
                self.project_url(&format!("repository/files/{}", urlencode(path))),
            )
            .json(&json!({
                "branch": branch,
                "content": content,
                "commit_message": message,
            }))
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }
}

#[async_trait]
impl GitService for GitlabClient {
    async fn read_file(&self, path: &str) -> Result<String, GitError> {
        let resp = self
            .request(
                reqwest::Method::GET,
                self.project_url(&format!("repository/files/{}/raw", urlencode(path))),
            )
            .query(&[("ref", self.branch.as_str())])
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
        self.commit_file(path, content, branch, message).await
    }

    async fn write_file_and_open_review(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
        review_body: &str,
    ) -> Result<(), GitError> {
        let resp = self
            .request(reqwest::Method::POST, self.project_url("repository/branches"))
            .query(&[("branch", branch), ("ref", self.branch.as_str())])
            .send()
            .await?;
        check(resp).await?;

        self.commit_file(path, content, branch, message).await?;

        // GitLab removes the source branch itself when the request merges.
        let resp = self
            .request(reqwest::Method::POST, self.project_url("merge_requests"))
            .json(&json!({
                "source_branch": branch,
                "target_branch": self.branch,
                "title": message,
                "description": review_body,
                "remove_source_branch": true,
            }))
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), GitError> {
        let resp = self
            .request(
                reqwest::Method::DELETE,
                self.project_url(&format!("repository/branches/{}", urlencode(branch))),
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

/// Strict percent-encoding for GitLab path components, where `/` inside a
/// file path or project id must arrive as `%2F`.
fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
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
