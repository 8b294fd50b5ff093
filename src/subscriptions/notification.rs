use serde_json::json;

use crate::config::Config;
use crate::error::AppError;
use crate::mail::{MailAgent, OutboundMessage};
use crate::submission::{FieldMap, SubmissionOptions};
use crate::template::{self, TemplateContext};

const SUBJECT_TEMPLATE: &str = "notification-subject.html";
const CONTENT_TEMPLATE: &str = "notification-content.html";

/// Render and send the "new activity" email to a mailing list. Template
/// failures fall back to built-in defaults; transport failures surface to
/// the caller.
pub async fn send_notification_email(
    mail: &dyn MailAgent,
    config: &Config,
    list_address: &str,
    fields: &FieldMap,
    extended_fields: &FieldMap,
    options: &SubmissionOptions,
    site_name: &str,
) -> Result<(), AppError> {
    let ctx = TemplateContext {
        fields: json!(fields),
        extended_fields: json!(extended_fields),
        options: serde_json::to_value(options)
            .map_err(|e| AppError::Internal(format!("Options not serializable: {e}")))?,
        data: json!({ "siteName": site_name }),
        confirm_link: None,
    };

    let subject = build_subject(config, &ctx, site_name).await;
    let html = build_content(config, &ctx, options).await;

    let mut from = format!(
        "{} <{}>",
        config.email_from_name, config.email_from_address
    );
    let mut subject = subject;
    if let Some(tag) = config.env_tag() {
        from = format!("{tag} - {from}");
        subject = format!("{tag} - {subject}");
    }

    let message = OutboundMessage {
        reply_to: from.clone(),
        from,
        to: list_address.to_string(),
        subject,
        html,
    };

    mail.send_message(&message)
        .await
        .map_err(|e| AppError::Mail(e.to_string()))
}

async fn build_subject(config: &Config, ctx: &TemplateContext, site_name: &str) -> String {
    if let Some(template) = load_template(config, SUBJECT_TEMPLATE).await {
        let rendered = template::render(&template, ctx);
        if !rendered.trim().is_empty() {
            return rendered.trim().to_string();
        }
        tracing::warn!("Notification subject template rendered blank; using default");
    }
    format!("There is a new comment at {site_name}")
}

async fn build_content(config: &Config, ctx: &TemplateContext, options: &SubmissionOptions) -> String {
    if let Some(template) = load_template(config, CONTENT_TEMPLATE).await {
        let rendered = template::render(&template, ctx);
        if !rendered.trim().is_empty() {
            return rendered;
        }
        tracing::warn!("Notification content template rendered blank; using default");
    }

    let origin = options.origin.clone().unwrap_or_default();
    format!(
        "<html>\n  <body>\n    There is a new comment at <a href=\"{origin}\">{origin}</a>.\n    <br>\n    <br>\n    If you prefer, you may <a href=\"%mailing_list_unsubscribe_url%\">unsubscribe</a> from future emails.<br>\n    <br>\n  </body>\n</html>\n"
    )
}

/// Read a site-customizable template. Missing or unreadable files are a
/// normal condition; the caller falls back to a built-in default.
pub(crate) async fn load_template(config: &Config, name: &str) -> Option<String> {
    let path = config.template_dir.join(name);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) if !content.trim().is_empty() => Some(content),
        Ok(_) => {
            tracing::warn!("Template {} is empty; using default", path.display());
            None
        }
        Err(e) => {
            tracing::debug!("Template {} not readable ({e}); using default", path.display());
            None
        }
    }
}
