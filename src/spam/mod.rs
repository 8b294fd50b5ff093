use async_trait::async_trait;

/// What the spam service gets to look at for one submission.
#[derive(Debug, Clone, Default)]
pub struct SpamCheckRequest {
    pub user_ip: String,
    pub user_agent: String,
    pub comment_type: String,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub author_url: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug)]
pub struct SpamError(pub String);

impl std::fmt::Display for SpamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<reqwest::Error> for SpamError {
    fn from(err: reqwest::Error) -> Self {
        SpamError(err.to_string())
    }
}

#[async_trait]
pub trait SpamChecker: Send + Sync {
    /// Returns true when the submission is judged to be spam.
    async fn check(&self, request: &SpamCheckRequest) -> Result<bool, SpamError>;
}

pub struct AkismetChecker {
    http: reqwest::Client,
    api_key: String,
    site: String,
}

impl AkismetChecker {
    pub fn new(http: reqwest::Client, api_key: String, site: String) -> Self {
        Self {
            http,
            api_key,
            site,
        }
    }
}

#[async_trait]
impl SpamChecker for AkismetChecker {
    async fn check(&self, request: &SpamCheckRequest) -> Result<bool, SpamError> {
        let mut form = vec![
            ("blog", self.site.clone()),
            ("user_ip", request.user_ip.clone()),
            ("user_agent", request.user_agent.clone()),
            ("comment_type", request.comment_type.clone()),
        ];
        if let Some(author) = &request.author {
            form.push(("comment_author", author.clone()));
        }
        if let Some(email) = &request.author_email {
            form.push(("comment_author_email", email.clone()));
        }
        if let Some(url) = &request.author_url {
            form.push(("comment_author_url", url.clone()));
        }
        if let Some(content) = &request.content {
            form.push(("comment_content", content.clone()));
        }

        let resp = self
            .http
            .post(format!(
                "https://{}.rest.akismet.com/1.1/comment-check",
                self.api_key
            ))
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SpamError(format!(
                "Spam check failed with HTTP {}",
                resp.status()
            )));
        }

        let body = resp.text().await?;
        match body.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(SpamError(format!("Unexpected spam check response: {other}"))),
        }
    }
}
