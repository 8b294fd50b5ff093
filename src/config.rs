use std::net::IpAddr;
use std::path::PathBuf;

use ipnet::IpNet;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    /// Key for sealing opaque tokens (confirmation links, deferred continuations).
    pub encryption_key: String,
    /// Shared secret embedded in every public-facing sealed payload. The seal
    /// endpoint is open to anyone, so the pepper check on the way back in is
    /// the actual authenticity boundary.
    pub crypto_pepper: String,
    /// Environment tag ("dev", "staging", ...). Embedded in list addresses,
    /// sealed payloads, and outbound email so environments can't cross-talk.
    pub exe_env: Option<String>,
    pub exe_env_production: String,
    /// Fallback target branch for webhook events when the site config has none.
    pub branch: Option<String>,
    pub github_token: Option<String>,
    pub github_webhook_secret: Option<String>,
    pub gitlab_token: Option<String>,
    pub gitlab_webhook_secret: Option<String>,
    pub email_api_key: Option<String>,
    pub email_domain: Option<String>,
    pub email_from_address: String,
    pub email_from_name: String,
    pub akismet_api_key: Option<String>,
    pub akismet_site: Option<String>,
    /// Directory holding site-customizable email templates.
    pub template_dir: PathBuf,
    /// Maximum age of a subscription confirmation token before redemption is refused.
    pub confirm_token_ttl_secs: i64,
    pub max_body_size: usize,
    pub trusted_proxies: Vec<IpNet>,
    pub rate_limit: u32,
    pub rate_limit_window_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let encryption_key = env_required("STATICPOST_ENCRYPTION_KEY")?;
        let crypto_pepper = env_required("STATICPOST_CRYPTO_PEPPER")?;

        let host: IpAddr = env_or("STATICPOST_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid STATICPOST_HOST: {e}"))?;

        let port: u16 = env_or("STATICPOST_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid STATICPOST_PORT: {e}"))?;

        let log_level = env_or("STATICPOST_LOG_LEVEL", "info");

        let exe_env = env_optional("STATICPOST_EXE_ENV");
        let exe_env_production = env_or("STATICPOST_EXE_ENV_PRODUCTION", "production");

        let max_body_size: usize = env_or("STATICPOST_MAX_BODY_SIZE", "1048576")
            .parse()
            .map_err(|e| format!("Invalid STATICPOST_MAX_BODY_SIZE: {e}"))?;

        let trusted_proxies: Vec<IpNet> = env_or("STATICPOST_TRUSTED_PROXIES", "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| format!("Invalid STATICPOST_TRUSTED_PROXIES entry '{s}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let confirm_token_ttl_secs: i64 = env_or("STATICPOST_CONFIRM_TOKEN_TTL_SECS", "2592000")
            .parse()
            .map_err(|e| format!("Invalid STATICPOST_CONFIRM_TOKEN_TTL_SECS: {e}"))?;

        let rate_limit: u32 = env_or("STATICPOST_RATE_LIMIT", "10")
            .parse()
            .map_err(|e| format!("Invalid STATICPOST_RATE_LIMIT: {e}"))?;

        let rate_limit_window_secs: u64 = env_or("STATICPOST_RATE_LIMIT_WINDOW_SECS", "60")
            .parse()
            .map_err(|e| format!("Invalid STATICPOST_RATE_LIMIT_WINDOW_SECS: {e}"))?;

        Ok(Config {
            host,
            port,
            log_level,
            encryption_key,
            crypto_pepper,
            exe_env,
            exe_env_production,
            branch: env_optional("STATICPOST_BRANCH"),
            github_token: env_optional("STATICPOST_GITHUB_TOKEN"),
            github_webhook_secret: env_optional("STATICPOST_GITHUB_WEBHOOK_SECRET"),
            gitlab_token: env_optional("STATICPOST_GITLAB_TOKEN"),
            gitlab_webhook_secret: env_optional("STATICPOST_GITLAB_WEBHOOK_SECRET"),
            email_api_key: env_optional("STATICPOST_EMAIL_API_KEY"),
            email_domain: env_optional("STATICPOST_EMAIL_DOMAIN"),
            email_from_address: env_or("STATICPOST_EMAIL_FROM_ADDRESS", "noreply@staticpost.net"),
            email_from_name: env_or("STATICPOST_EMAIL_FROM_NAME", "Staticpost"),
            akismet_api_key: env_optional("STATICPOST_AKISMET_API_KEY"),
            akismet_site: env_optional("STATICPOST_AKISMET_SITE"),
            template_dir: PathBuf::from(env_or("STATICPOST_TEMPLATE_DIR", "templates")),
            confirm_token_ttl_secs,
            max_body_size,
            trusted_proxies,
            rate_limit,
            rate_limit_window_secs,
        })
    }

    /// True when the configured environment tag identifies a non-production
    /// deployment. Non-production environments mark outbound email and mailing
    /// list names so they can't be mistaken for the real thing.
    pub fn is_non_production(&self) -> bool {
        match &self.exe_env {
            Some(env) => env != &self.exe_env_production,
            None => false,
        }
    }

    /// Environment tag to prefix onto user-visible strings, when applicable.
    pub fn env_tag(&self) -> Option<&str> {
        if self.is_non_production() {
            self.exe_env.as_deref()
        } else {
            None
        }
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        host: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        log_level: "debug".to_string(),
        encryption_key: "test-encryption-key".to_string(),
        crypto_pepper: "test-pepper".to_string(),
        exe_env: Some("dev".to_string()),
        exe_env_production: "production".to_string(),
        branch: None,
        github_token: None,
        github_webhook_secret: None,
        gitlab_token: None,
        gitlab_webhook_secret: None,
        email_api_key: Some("key-test".to_string()),
        email_domain: Some("mail.example.com".to_string()),
        email_from_address: "noreply@example.com".to_string(),
        email_from_name: "Staticpost".to_string(),
        akismet_api_key: None,
        akismet_site: None,
        // Point away from the shipped templates so tests exercise the
        // built-in defaults.
        template_dir: PathBuf::from("no-such-directory"),
        confirm_token_ttl_secs: 2_592_000,
        max_body_size: 1_048_576,
        trusted_proxies: Vec::new(),
        rate_limit: 10,
        rate_limit_window_secs: 60,
    }
}
