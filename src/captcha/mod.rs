use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug)]
pub struct CaptchaError(pub String);

impl std::fmt::Display for CaptchaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<reqwest::Error> for CaptchaError {
    fn from(err: reqwest::Error) -> Self {
        CaptchaError(err.to_string())
    }
}

#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    /// Returns true when the challenge response checks out.
    async fn verify(
        &self,
        secret: &str,
        response: &str,
        remote_ip: Option<&str>,
    ) -> Result<bool, CaptchaError>;
}

pub struct RecaptchaVerifier {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct VerifyResponse {
    success: bool,
}

impl RecaptchaVerifier {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(
        &self,
        secret: &str,
        response: &str,
        remote_ip: Option<&str>,
    ) -> Result<bool, CaptchaError> {
        let mut form = vec![
            ("secret", secret.to_string()),
            ("response", response.to_string()),
        ];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip.to_string()));
        }

        let resp = self
            .http
            .post("https://www.google.com/recaptcha/api/siteverify")
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CaptchaError(format!(
                "CAPTCHA verification failed with HTTP {}",
                resp.status()
            )));
        }

        let body: VerifyResponse = resp.json().await?;
        Ok(body.success)
    }
}
