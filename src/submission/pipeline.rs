use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::captcha::CaptchaVerifier;
use crate::config::Config;
use crate::continuation::{self, DeferredContinuation};
use crate::crypto;
use crate::error::AppError;
use crate::git::{self, BRANCH_PREFIX, GitService, RepoParameters};
use crate::mail::MailProvider;
use crate::site_config::{self, SiteConfig};
use crate::spam::{SpamCheckRequest, SpamChecker};
use crate::subscriptions::confirmation::ConfirmationData;
use crate::subscriptions::{SubscriptionContext, SubscriptionsManager};

use super::metadata::RequestMetadata;
use super::{ConfigPath, FieldMap, SubmissionOptions, fields as field_ops, format};

/// Failures in the subscribe-on-submit side channel. They ride along on a
/// successful result; the entry itself was persisted.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryErrors {
    pub subscribe_error: bool,
    pub subscribe_confirm_error: bool,
}

impl SecondaryErrors {
    fn into_option(self) -> Option<Self> {
        (self.subscribe_error || self.subscribe_confirm_error).then_some(self)
    }
}

#[derive(Debug)]
pub struct ProcessOutcome {
    pub fields: FieldMap,
    pub redirect: Option<String>,
    pub secondary_errors: Option<SecondaryErrors>,
}

/// Drives one submission (or one resumed merge) end to end. Holds no state
/// beyond the request: collaborators come in through the constructor and
/// per-site configuration is read fresh from the target repository.
pub struct Processor {
    config: Config,
    params: RepoParameters,
    config_path: ConfigPath,
    git: Arc<dyn GitService>,
    mail_provider: Arc<dyn MailProvider>,
    spam: Option<Arc<dyn SpamChecker>>,
    http: reqwest::Client,
    metadata: RequestMetadata,
    uid: String,
}

impl Processor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        params: RepoParameters,
        config_path: ConfigPath,
        git: Arc<dyn GitService>,
        mail_provider: Arc<dyn MailProvider>,
        spam: Option<Arc<dyn SpamChecker>>,
        http: reqwest::Client,
        metadata: RequestMetadata,
    ) -> Self {
        Self {
            config,
            params,
            config_path,
            git,
            mail_provider,
            spam,
            http,
            metadata,
            uid: Uuid::now_v7().to_string(),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Read and validate the site's configuration from the target repository.
    /// The config's own branch must match the branch the request addressed.
    pub async fn site_config(&self) -> Result<SiteConfig, AppError> {
        let raw = self
            .git
            .read_file(&self.config_path.file)
            .await
            .map_err(|e| AppError::Git(format!("Could not read site config: {e}")))?;

        let site = site_config::parse(&raw, self.config_path.path.as_deref())?;

        if site.branch != self.params.branch {
            return Err(AppError::BranchMismatch);
        }

        Ok(site)
    }

    /// The subscriptions engine for this site, or None when notifications
    /// are off. Site-level credentials override the deployment's.
    pub fn subscriptions(
        &self,
        site: &SiteConfig,
    ) -> Result<Option<SubscriptionsManager>, AppError> {
        if !site.notifications.enabled {
            return Ok(None);
        }

        let api_key = match &site.notifications.api_key {
            Some(sealed) => crypto::open(sealed, &self.config.encryption_key).map_err(|e| {
                AppError::Mail(format!("Site notification API key did not open: {e}"))
            })?,
            None => self.config.email_api_key.clone().ok_or_else(|| {
                AppError::Mail("Notifications enabled but no mail API key configured".to_string())
            })?,
        };

        let domain = site
            .notifications
            .domain
            .clone()
            .or_else(|| self.config.email_domain.clone())
            .ok_or_else(|| {
                AppError::Mail("Notifications enabled but no mail domain configured".to_string())
            })?;

        Ok(Some(SubscriptionsManager::new(
            self.mail_provider.agent(&api_key, &domain),
            self.config.clone(),
            &self.params,
        )))
    }

    /// Resolve the authenticated submitter when the site requires auth. The
    /// sealed OAuth token opens to a hosting-provider token; the user object
    /// it belongs to feeds the `user` generated fields.
    async fn check_auth(
        &self,
        site: &SiteConfig,
        options: &SubmissionOptions,
    ) -> Result<Option<Value>, AppError> {
        if !site.auth.required {
            return Ok(None);
        }

        let sealed = options
            .auth_token
            .as_deref()
            .ok_or_else(|| AppError::Authenticity("Auth token missing".to_string()))?;

        let oauth_token = crypto::open(sealed, &self.config.encryption_key)
            .map_err(|e| AppError::Authenticity(format!("Auth token did not open: {e}")))?;

        let user_git = git::with_token(&self.params, Some(oauth_token), &self.http);
        let user = user_git
            .get_current_user()
            .await
            .map_err(|e| AppError::Authenticity(format!("Could not resolve submitter: {e}")))?;

        Ok(Some(user))
    }

    async fn check_spam(&self, site: &SiteConfig, fields: &FieldMap) -> Result<(), AppError> {
        if !site.akismet.enabled {
            return Ok(());
        }

        let Some(spam) = &self.spam else {
            return Err(AppError::Internal(
                "Site enables spam checking but no spam credentials are configured".to_string(),
            ));
        };

        let field_str = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let request = SpamCheckRequest {
            user_ip: self.metadata.ip.clone(),
            user_agent: self.metadata.user_agent.clone(),
            comment_type: site.akismet.comment_type.clone(),
            author: field_str(&site.akismet.author),
            author_email: field_str(&site.akismet.author_email),
            author_url: field_str(&site.akismet.author_url),
            content: field_str(&site.akismet.content),
        };

        let is_spam = spam
            .check(&request)
            .await
            .map_err(|e| AppError::Internal(format!("Spam check failed: {e}")))?;

        if is_spam {
            return Err(AppError::Spam);
        }
        Ok(())
    }

    /// Run one submission: validate, spam-check, generate, transform, and
    /// persist, with the subscribe-on-submit side channel isolated from the
    /// primary result.
    pub async fn process_entry(
        &self,
        site: &SiteConfig,
        mut fields: FieldMap,
        options: SubmissionOptions,
    ) -> Result<ProcessOutcome, AppError> {
        // The side channel needs the cleartext email even after a hash
        // transform has replaced it in the persisted fields.
        let raw_fields = fields.clone();

        let git_user = self.check_auth(site, &options).await?;
        self.check_spam(site, &fields).await?;

        field_ops::validate(&mut fields, site)?;
        field_ops::apply_generated(&mut fields, site, git_user.as_ref());
        field_ops::apply_transforms(&mut fields, site);
        let extended_fields =
            field_ops::apply_internal(&fields, &self.uid, options.parent.as_deref());

        let content = format::render_entry(site, &extended_fields)?;
        let file_path = format::entry_file_path(site, &self.uid, &fields, &options);
        let message = format::commit_message(site, &self.uid, &fields, &options);

        let subscriptions = self.subscriptions(site)?;

        // Subscribe-on-submit runs regardless of moderation; its failures
        // are secondary and never block persistence.
        let mut secondary = SecondaryErrors::default();
        if let (Some(subs), Some(parent), Some(subscribe_field)) =
            (&subscriptions, &options.parent, &options.subscribe)
        {
            let email = raw_fields
                .get(subscribe_field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());

            if let Some(email) = email {
                if site.notifications.double_opt_in {
                    if let Err(e) = subs
                        .send_confirmation(email, &fields, &extended_fields, &options, &site.name)
                        .await
                    {
                        tracing::error!("Error sending confirmation email for {parent}: {e}");
                        secondary.subscribe_confirm_error = true;
                    }
                } else if let Some(ctx) = SubscriptionContext::from_options(&options) {
                    if let Err(e) = subs
                        .ensure_subscribed(&ctx, email, site.notifications.consent_model)
                        .await
                    {
                        tracing::error!("Error subscribing commenter to {parent}: {e}");
                        secondary.subscribe_error = true;
                    }
                }
            }
        }

        if site.moderation {
            let branch = format!("{BRANCH_PREFIX}{}", self.uid);

            let marker = if site.notifications.enabled {
                let deferred = DeferredContinuation {
                    config_path: self.config_path.clone(),
                    fields: fields.clone(),
                    extended_fields: extended_fields.clone(),
                    options: options.clone(),
                    parameters: self.params.clone(),
                };
                Some(continuation::encode(&deferred, &self.config).map_err(|e| {
                    AppError::Internal(format!("Could not seal continuation: {e}"))
                })?)
            } else {
                None
            };

            let body = format::review_body(site, &fields, marker.as_deref());
            self.git
                .write_file_and_open_review(&file_path, &content, &branch, &message, &body)
                .await
                .map_err(|e| AppError::Git(e.to_string()))?;
        } else {
            self.git
                .write_file(&file_path, &content, &self.params.branch, &message)
                .await
                .map_err(|e| AppError::Git(e.to_string()))?;

            // Without moderation there is no merge event to wait for; notify
            // immediately. Failures are logged, never propagated.
            if let (Some(subs), Some(parent)) = (&subscriptions, &options.parent) {
                if let Err(e) = subs
                    .notify_if_warranted(parent, &fields, &extended_fields, &options, &site.name)
                    .await
                {
                    tracing::error!("Notification after direct commit failed: {e}");
                }
            }
        }

        Ok(ProcessOutcome {
            fields,
            redirect: options.redirect.clone(),
            secondary_errors: secondary.into_option(),
        })
    }

    /// Resume the notify path for a merged review, the same commit-side
    /// logic that runs synchronously when moderation is off.
    pub async fn process_merge(&self, deferred: &DeferredContinuation) -> Result<(), AppError> {
        let site = self.site_config().await?;

        let subscriptions = self.subscriptions(&site)?.ok_or_else(|| {
            AppError::Mail("Continuation present but notifications are disabled".to_string())
        })?;

        let parent = deferred.options.parent.as_deref().ok_or_else(|| {
            AppError::Internal("Continuation without a parent entry".to_string())
        })?;

        subscriptions
            .notify_if_warranted(
                parent,
                &deferred.fields,
                &deferred.extended_fields,
                &deferred.options,
                &site.name,
            )
            .await?;

        Ok(())
    }

    /// Complete a double opt-in: add the subscriber with the audit context
    /// carried by the redeemed confirmation token.
    pub async fn create_subscription(&self, data: &ConfirmationData) -> Result<(), AppError> {
        let site = self.site_config().await?;

        let subscriptions = self.subscriptions(&site)?.ok_or_else(|| {
            AppError::Mail("Notifications are disabled for this site".to_string())
        })?;

        let context = SubscriptionContext::from_confirmation(data);
        subscriptions
            .ensure_subscribed(
                &context,
                &data.subscriber_email_address,
                site.notifications.consent_model,
            )
            .await
            .map_err(|e| AppError::Mail(e.to_string()))
    }
}

/// Verify the site's CAPTCHA when enabled. The client echoes the site key
/// and a sealed copy of the secret; both must match the site configuration
/// before the challenge response is checked with the verifier.
pub async fn check_recaptcha(
    captcha: &dyn CaptchaVerifier,
    config: &Config,
    site: &SiteConfig,
    options: &SubmissionOptions,
    captcha_response: Option<&str>,
    remote_ip: &str,
) -> Result<(), AppError> {
    if !site.recaptcha.enabled {
        return Ok(());
    }

    let Some(client_captcha) = &options.recaptcha else {
        return Err(AppError::RecaptchaMissingCredentials);
    };
    if client_captcha.site_key.is_empty() || client_captcha.secret.is_empty() {
        return Err(AppError::RecaptchaMissingCredentials);
    }

    let client_secret = crypto::open(&client_captcha.secret, &config.encryption_key)
        .map_err(|_| AppError::RecaptchaConfigMismatch)?;
    let site_secret = crypto::open(&site.recaptcha.secret, &config.encryption_key)
        .map_err(|_| AppError::RecaptchaConfigMismatch)?;

    if client_captcha.site_key != site.recaptcha.site_key || client_secret != site_secret {
        return Err(AppError::RecaptchaConfigMismatch);
    }

    let response = captcha_response.ok_or(AppError::RecaptchaMissingCredentials)?;

    let passed = captcha
        .verify(&site_secret, response, Some(remote_ip))
        .await
        .map_err(|e| AppError::Internal(format!("CAPTCHA verification failed: {e}")))?;

    if !passed {
        return Err(AppError::Authenticity(
            "reCAPTCHA challenge failed".to_string(),
        ));
    }
    Ok(())
}
