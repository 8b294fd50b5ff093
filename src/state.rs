use std::sync::Arc;

use crate::config::Config;
use crate::rate_limit::SubmissionRateLimiter;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    /// Shared HTTP client for every outbound collaborator call.
    pub http: reqwest::Client,
    pub submission_limiter: SubmissionRateLimiter,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            config,
            http,
            submission_limiter: SubmissionRateLimiter::new(),
        }
    }
}
