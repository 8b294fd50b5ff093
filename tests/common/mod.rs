//! In-memory collaborator doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use staticpost::config::Config;
use staticpost::git::{GitError, GitService};
use staticpost::mail::{
    MailAgent, MailError, MailProvider, Member, NewList, NewMember, OutboundMessage,
};
use staticpost::spam::{SpamChecker, SpamCheckRequest, SpamError};

pub fn test_config() -> Config {
    Config {
        host: IpAddr::from([127, 0, 0, 1]),
        port: 0,
        log_level: "debug".to_string(),
        encryption_key: "integration-test-key".to_string(),
        crypto_pepper: "integration-test-pepper".to_string(),
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
        template_dir: PathBuf::from("no-such-directory"),
        confirm_token_ttl_secs: 2_592_000,
        max_body_size: 1_048_576,
        trusted_proxies: Vec::new(),
        rate_limit: 10,
        rate_limit_window_secs: 60,
    }
}

#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub path: String,
    pub content: String,
    pub branch: String,
    pub message: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub path: String,
    pub content: String,
    pub branch: String,
    pub message: String,
}

/// Hosting-provider double backed by an in-memory file map.
#[derive(Default)]
pub struct MockGit {
    pub files: Mutex<HashMap<String, String>>,
    pub commits: Mutex<Vec<Commit>>,
    pub reviews: Mutex<Vec<ReviewRequest>>,
    pub deleted_branches: Mutex<Vec<String>>,
    pub fail_delete_with: Mutex<Option<u16>>,
}

impl MockGit {
    pub fn with_site_config(config: &str) -> Arc<Self> {
        let git = Self::default();
        git.files
            .lock()
            .unwrap()
            .insert("staticpost.yml".to_string(), config.to_string());
        Arc::new(git)
    }
}

#[async_trait]
impl GitService for MockGit {
    async fn read_file(&self, path: &str) -> Result<String, GitError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or(GitError::Status {
                code: 404,
                message: format!("{path} not found"),
            })
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
    ) -> Result<(), GitError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
        self.commits.lock().unwrap().push(Commit {
            path: path.to_string(),
            content: content.to_string(),
            branch: branch.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn write_file_and_open_review(
        &self,
        path: &str,
        content: &str,
        branch: &str,
        message: &str,
        review_body: &str,
    ) -> Result<(), GitError> {
        self.reviews.lock().unwrap().push(ReviewRequest {
            path: path.to_string(),
            content: content.to_string(),
            branch: branch.to_string(),
            message: message.to_string(),
            body: review_body.to_string(),
        });
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), GitError> {
        if let Some(code) = *self.fail_delete_with.lock().unwrap() {
            return Err(GitError::Status {
                code,
                message: "Reference does not exist".to_string(),
            });
        }
        self.deleted_branches.lock().unwrap().push(branch.to_string());
        Ok(())
    }

    async fn get_current_user(&self) -> Result<serde_json::Value, GitError> {
        Ok(serde_json::json!({"login": "octocat", "name": "Mona"}))
    }
}

/// Mailing-list double with programmable failure modes.
#[derive(Default)]
pub struct MockMail {
    pub lists: Mutex<HashMap<String, Vec<Member>>>,
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub duplicate_on_add: bool,
}

#[async_trait]
impl MailAgent for MockMail {
    fn domain(&self) -> &str {
        "mail.example.com"
    }

    async fn get_list(&self, address: &str) -> Result<Option<()>, MailError> {
        Ok(self.lists.lock().unwrap().get(address).map(|_| ()))
    }

    async fn create_list(&self, list: &NewList) -> Result<(), MailError> {
        self.lists
            .lock()
            .unwrap()
            .entry(list.address.clone())
            .or_default();
        Ok(())
    }

    async fn add_member(&self, list: &str, member: &NewMember) -> Result<(), MailError> {
        if self.duplicate_on_add {
            return Err(MailError::Status {
                code: 400,
                message: "Address already exists".to_string(),
            });
        }
        let mut lists = self.lists.lock().unwrap();
        let members = lists.entry(list.to_string()).or_default();
        if members.iter().any(|m| m.address == member.address) {
            return Err(MailError::Status {
                code: 400,
                message: "Address already exists".to_string(),
            });
        }
        members.push(Member {
            address: member.address.clone(),
            subscribed: true,
        });
        Ok(())
    }

    async fn list_members(&self, list: &str) -> Result<Vec<Member>, MailError> {
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(list)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_member(&self, list: &str, address: &str) -> Result<Option<Member>, MailError> {
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(list)
            .and_then(|members| members.iter().find(|m| m.address == address).cloned()))
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Hands out the same mock agent regardless of credentials.
pub struct StubMailProvider(pub Arc<MockMail>);

impl MailProvider for StubMailProvider {
    fn agent(&self, _api_key: &str, _domain: &str) -> Arc<dyn MailAgent> {
        self.0.clone()
    }
}

pub struct MockSpam {
    pub verdict: bool,
}

#[async_trait]
impl SpamChecker for MockSpam {
    async fn check(&self, _request: &SpamCheckRequest) -> Result<bool, SpamError> {
        Ok(self.verdict)
    }
}
