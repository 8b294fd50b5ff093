pub mod confirmation;
pub mod notification;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::crypto;
use crate::error::AppError;
use crate::git::RepoParameters;
use crate::mail::{MailAgent, MailError, NewList, NewMember};
use crate::site_config::ConsentModel;
use crate::submission::{FieldMap, SubmissionOptions};

use confirmation::ConfirmationData;

/// Everything needed to create a membership and its audit trail. Built from
/// request options on the single opt-in path and from a redeemed
/// confirmation token on the double opt-in path.
#[derive(Debug, Clone)]
pub struct SubscriptionContext {
    pub entry_id: String,
    pub entry_name: Option<String>,
    pub consent_date: Option<i64>,
    pub consent_url: Option<String>,
    pub consent_context: Option<String>,
    pub consent_text: Option<String>,
    pub confirm_context: Option<String>,
    pub confirm_text: Option<String>,
}

impl SubscriptionContext {
    pub fn from_options(options: &SubmissionOptions) -> Option<Self> {
        let consent = confirmation::consent_vars(options);
        Some(Self {
            entry_id: options.parent.clone()?,
            entry_name: options.parent_name.clone(),
            consent_date: consent["subscribeConsentDate"].as_i64(),
            consent_url: consent["subscribeConsentUrl"].as_str().map(String::from),
            consent_context: consent["subscribeConsentContext"].as_str().map(String::from),
            consent_text: options.subscribe_consent_text.clone(),
            confirm_context: None,
            confirm_text: None,
        })
    }

    pub fn from_confirmation(data: &ConfirmationData) -> Self {
        Self {
            entry_id: data.parent.clone(),
            entry_name: data.parent_name.clone(),
            consent_date: Some(data.subscribe_consent_date),
            consent_url: data.subscribe_consent_url.clone(),
            consent_context: data.subscribe_consent_context.clone(),
            consent_text: data.subscribe_consent_text.clone(),
            confirm_context: Some(data.subscribe_confirm_context.clone()),
            confirm_text: Some(data.subscribe_confirm_text.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// The commenter was the list's only subscriber; nobody else to tell.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Issued,
    AlreadySubscribed,
}

/// Maps entries to mailing lists and keeps membership idempotent against a
/// store this service does not own. List addresses are a pure function of
/// their inputs so the submission-time and merge-time paths resolve the same
/// list with no shared state.
pub struct SubscriptionsManager {
    mail: Arc<dyn MailAgent>,
    config: Config,
    username: String,
    repository: String,
}

impl SubscriptionsManager {
    pub fn new(mail: Arc<dyn MailAgent>, config: Config, params: &RepoParameters) -> Self {
        Self {
            mail,
            config,
            username: params.username.clone(),
            repository: params.repository.clone(),
        }
    }

    /// Deterministic pseudonymous address for an entry's mailing list.
    pub fn list_address(&self, entry_id: &str) -> String {
        let env = self.config.exe_env.as_deref().unwrap_or("");
        let digest = hex::encode(Sha256::digest(
            format!("{env}-{}-{}-{entry_id}", self.username, self.repository).as_bytes(),
        ));
        let short = &digest[..32];

        let compound = if env.is_empty() {
            short.to_string()
        } else {
            format!("{env}-{short}")
        };

        format!("{compound}@{}", self.mail.domain())
    }

    /// The list's address when it exists, None otherwise.
    async fn find_list(&self, entry_id: &str) -> Result<Option<String>, MailError> {
        let address = self.list_address(entry_id);
        Ok(self.mail.get_list(&address).await?.map(|_| address))
    }

    /// Create the list if needed and add the member. Both mutations are
    /// at-least-once: a duplicate create or add from a racing request is
    /// treated as success.
    pub async fn ensure_subscribed(
        &self,
        context: &SubscriptionContext,
        email: &str,
        consent_model: ConsentModel,
    ) -> Result<(), MailError> {
        let address = self.list_address(&context.entry_id);

        if self.find_list(&context.entry_id).await?.is_none() {
            let list = self.build_list(context, &address);
            match self.mail.create_list(&list).await {
                Ok(()) => {}
                Err(e) if e.is_duplicate_member() => {
                    tracing::debug!("List {address} already exists");
                }
                Err(e) => return Err(e),
            }
        }

        let member = NewMember {
            address: email.to_string(),
            vars: self.member_vars(context, consent_model),
        };

        match self.mail.add_member(&address, &member).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_duplicate_member() => {
                tracing::debug!("{} already a member of {address}", crypto::email_digest(email));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn build_list(&self, context: &SubscriptionContext, address: &str) -> NewList {
        let env_tag = self.config.env_tag();

        let (name, description) = match &context.entry_name {
            Some(entry_name) => {
                let mut name = entry_name.clone();
                // The generated address is an opaque hash; a readable name and
                // a description naming the hash inputs make the list findable.
                let mut description = format!(
                    "Subscribers to {} ({}/{})",
                    context.entry_id, self.username, self.repository
                );
                if let Some(tag) = env_tag {
                    name = format!("{tag} - {name}");
                    description = format!("{tag} - {description}");
                }
                (Some(name), Some(description))
            }
            None => (None, None),
        };

        NewList {
            address: address.to_string(),
            name,
            description,
            access_level: "readonly".to_string(),
            reply_preference: "sender".to_string(),
        }
    }

    fn member_vars(
        &self,
        context: &SubscriptionContext,
        consent_model: ConsentModel,
    ) -> Option<Value> {
        match consent_model {
            ConsentModel::None => None,
            ConsentModel::Single => Some(serde_json::json!({
                "subscribeConsentDate": context
                    .consent_date
                    .unwrap_or_else(|| Utc::now().timestamp()),
                "subscribeConsentUrl": context.consent_url,
                "subscribeConsentContext": context.consent_context,
                "subscribeConsentText": context.consent_text,
            })),
            ConsentModel::Double => Some(serde_json::json!({
                "subscribeConsentDate": context
                    .consent_date
                    .unwrap_or_else(|| Utc::now().timestamp()),
                "subscribeConsentUrl": context.consent_url,
                "subscribeConsentContext": context.consent_context,
                "subscribeConsentText": context.consent_text,
                "subscribeConfirmDate": Utc::now().timestamp(),
                "subscribeConfirmContext": context.confirm_context,
                "subscribeConfirmText": context.confirm_text,
            })),
        }
    }

    /// Notify the entry's list of new activity, unless the commenter is the
    /// only subscriber; nobody wants an email about their own first, sole
    /// comment. Membership inspection failures assume other subscribers
    /// exist and send anyway.
    pub async fn notify_if_warranted(
        &self,
        entry_id: &str,
        fields: &FieldMap,
        extended_fields: &FieldMap,
        options: &SubmissionOptions,
        site_name: &str,
    ) -> Result<NotifyOutcome, AppError> {
        let Some(address) = self
            .find_list(entry_id)
            .await
            .map_err(|e| AppError::Mail(e.to_string()))?
        else {
            return Err(AppError::Mail(format!(
                "Unable to find mailing list for {entry_id}"
            )));
        };

        if self.commenter_is_only_subscriber(&address, fields, options).await {
            tracing::info!("Commenter is the only subscriber; suppressing notification");
            return Ok(NotifyOutcome::Suppressed);
        }

        notification::send_notification_email(
            self.mail.as_ref(),
            &self.config,
            &address,
            fields,
            extended_fields,
            options,
            site_name,
        )
        .await?;

        Ok(NotifyOutcome::Sent)
    }

    /// The membership check runs at merge time too, when only the hashed
    /// commenter address is available, so list addresses are hashed before
    /// comparison.
    async fn commenter_is_only_subscriber(
        &self,
        address: &str,
        fields: &FieldMap,
        options: &SubmissionOptions,
    ) -> bool {
        let members = match self.mail.list_members(address).await {
            Ok(members) => members,
            Err(e) => {
                tracing::error!(
                    "Error inspecting members of {address}: {e}. Assuming commenter is not the only subscriber."
                );
                return false;
            }
        };

        if members.len() != 1 {
            return false;
        }

        let email_field = options.email_field.as_deref().unwrap_or("email");
        let Some(commenter_hashed) = fields.get(email_field).and_then(Value::as_str) else {
            return false;
        };

        crypto::email_digest(&members[0].address) == commenter_hashed
    }

    /// True unless the address is already on the list and marked subscribed.
    /// Any lookup failure defaults to true: better to re-confirm than to
    /// silently not subscribe someone.
    pub async fn needs_confirmation(&self, email: &str, entry_id: &str) -> bool {
        let address = match self.find_list(entry_id).await {
            Ok(Some(address)) => address,
            Ok(None) => return true,
            Err(e) => {
                tracing::error!(
                    "Error looking up mailing list for {entry_id}: {e}. Sending confirmation."
                );
                return true;
            }
        };

        match self.mail.get_member(&address, email).await {
            Ok(Some(member)) => !member.subscribed,
            Ok(None) => true,
            Err(e) => {
                tracing::error!(
                    "Error looking up member of {address}: {e}. Sending confirmation."
                );
                true
            }
        }
    }

    /// Issue a confirmation email unless the recipient is already a
    /// confirmed subscriber.
    pub async fn send_confirmation(
        &self,
        to: &str,
        fields: &FieldMap,
        extended_fields: &FieldMap,
        options: &SubmissionOptions,
        site_name: &str,
    ) -> Result<ConfirmationOutcome, AppError> {
        let Some(entry_id) = options.parent.as_deref() else {
            return Err(AppError::Internal(
                "Confirmation requested without a parent entry".to_string(),
            ));
        };

        if !self.needs_confirmation(to, entry_id).await {
            tracing::info!("Recipient already subscribed to {entry_id}; suppressing confirmation");
            return Ok(ConfirmationOutcome::AlreadySubscribed);
        }

        confirmation::send_confirmation_email(
            self.mail.as_ref(),
            &self.config,
            to,
            fields,
            extended_fields,
            options,
            site_name,
        )
        .await?;

        Ok(ConfirmationOutcome::Issued)
    }
}
