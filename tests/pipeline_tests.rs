//! End-to-end submission pipeline scenarios against in-memory collaborators.

mod common;

use std::sync::Arc;

use serde_json::json;

use staticpost::continuation;
use staticpost::crypto;
use staticpost::error::AppError;
use staticpost::git::{GitProvider, RepoParameters};
use staticpost::submission::metadata::RequestMetadata;
use staticpost::submission::pipeline::Processor;
use staticpost::submission::{ConfigPath, FieldMap, SubmissionOptions};
use staticpost::subscriptions::confirmation;

use common::{MockGit, MockMail, MockSpam, StubMailProvider, test_config};

const SITE_BASE: &str = r#"
allowedFields: [name, email, message]
requiredFields: [name, email, message]
branch: main
format: yaml
path: _data/comments/{options.parent}
name: Example Blog
transforms:
  email: hash
"#;

fn params() -> RepoParameters {
    RepoParameters {
        service: GitProvider::GitHub,
        username: "owner".to_string(),
        repository: "blog".to_string(),
        branch: "main".to_string(),
        property: None,
    }
}

fn processor(git: Arc<MockGit>, mail: Arc<MockMail>, spam: Option<bool>) -> Processor {
    Processor::new(
        test_config(),
        params(),
        ConfigPath::new(None),
        git,
        Arc::new(StubMailProvider(mail)),
        spam.map(|verdict| Arc::new(MockSpam { verdict }) as Arc<dyn staticpost::spam::SpamChecker>),
        reqwest::Client::new(),
        RequestMetadata::default(),
    )
}

fn fields() -> FieldMap {
    let mut f = FieldMap::new();
    f.insert("name".to_string(), json!("Ada"));
    f.insert("email".to_string(), json!("ada@example.com"));
    f.insert("message".to_string(), json!("First!"));
    f
}

fn subscribe_options() -> SubmissionOptions {
    SubmissionOptions {
        parent: Some("post-1".to_string()),
        parent_name: Some("My first post".to_string()),
        origin: Some("https://example.com/post-1".to_string()),
        subscribe: Some("email".to_string()),
        subscribe_confirm_url: Some("https://example.com/v3/confirm/github/owner/blog/main".to_string()),
        ..Default::default()
    }
}

/// Scenario A: moderated submission with double opt-in and the subscribe box
/// ticked opens exactly one review carrying one continuation marker, and
/// attempts one confirmation email, with no secondary errors.
#[tokio::test]
async fn moderated_submission_with_double_opt_in() {
    let site_yaml = format!(
        "{SITE_BASE}moderation: true\nnotifications:\n  enabled: true\n  doubleOptIn: true\n  consentModel: double\n"
    );
    let git = MockGit::with_site_config(&site_yaml);
    let mail = Arc::new(MockMail::default());
    let p = processor(git.clone(), mail.clone(), None);

    let site = p.site_config().await.unwrap();
    let outcome = p
        .process_entry(&site, fields(), subscribe_options())
        .await
        .unwrap();

    assert!(outcome.secondary_errors.is_none());
    // The persisted email is hashed, not cleartext.
    assert_eq!(
        outcome.fields["email"],
        json!(crypto::email_digest("ada@example.com"))
    );

    // No direct commit; one review on a generated branch.
    assert!(git.commits.lock().unwrap().is_empty());
    let reviews = git.reviews.lock().unwrap();
    assert_eq!(reviews.len(), 1);
    let review = &reviews[0];
    assert!(review.branch.starts_with("staticpost_"));
    assert_eq!(
        review.path,
        format!("_data/comments/post-1/{}.yml", p.uid())
    );
    assert!(review.content.contains("name: Ada"));
    assert!(!review.content.contains("ada@example.com"));

    // Exactly one continuation marker, and it decodes back to this request.
    assert_eq!(review.body.matches(continuation::MARKER_START).count(), 1);
    let deferred = continuation::decode(&review.body, &test_config()).unwrap();
    assert_eq!(deferred.options.parent.as_deref(), Some("post-1"));
    assert_eq!(deferred.extended_fields["_parent"], json!("post-1"));
    assert_eq!(deferred.extended_fields["_id"], json!(p.uid()));

    // One confirmation email to the commenter.
    let sent = mail.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ada@example.com");
    assert!(sent[0].html.contains("?data="));
}

/// Scenario D continued: the emailed token redeems into a subscription, and
/// a duplicate-member response from the list provider is still success.
#[tokio::test]
async fn confirmation_token_redeems_and_duplicate_add_is_success() {
    let site_yaml = format!(
        "{SITE_BASE}moderation: true\nnotifications:\n  enabled: true\n  doubleOptIn: true\n  consentModel: double\n"
    );
    let git = MockGit::with_site_config(&site_yaml);
    let mail = Arc::new(MockMail::default());
    let p = processor(git.clone(), mail.clone(), None);

    let site = p.site_config().await.unwrap();
    p.process_entry(&site, fields(), subscribe_options())
        .await
        .unwrap();

    // Pull the sealed token back out of the confirmation email.
    let html = mail.sent.lock().unwrap()[0].html.clone();
    let start = html.find("?data=").unwrap() + "?data=".len();
    let end = html[start..].find('"').unwrap() + start;
    let token = &html[start..end];

    let config = test_config();
    let data = confirmation::redeem(token, &config).unwrap();
    assert_eq!(data.subscriber_email_address, "ada@example.com");
    assert_eq!(data.parent, "post-1");
    assert!(!data.subscribe_confirm_text.is_empty());

    // First redemption subscribes.
    let p2 = processor(git.clone(), mail.clone(), None);
    p2.create_subscription(&data).await.unwrap();
    assert_eq!(mail.lists.lock().unwrap().len(), 1);

    // A provider that answers "already a member" is still success.
    let dup_mail = Arc::new(MockMail {
        duplicate_on_add: true,
        ..Default::default()
    });
    let p3 = processor(git, dup_mail, None);
    p3.create_subscription(&data).await.unwrap();
}

/// Single opt-in subscribes immediately, and a direct (unmoderated) commit
/// triggers the notify path.
#[tokio::test]
async fn unmoderated_submission_with_single_opt_in() {
    let site_yaml = format!(
        "{SITE_BASE}moderation: false\nnotifications:\n  enabled: true\n  consentModel: single\n"
    );
    let git = MockGit::with_site_config(&site_yaml);
    let mail = Arc::new(MockMail::default());

    // Someone else is already subscribed, so the notification must go out.
    {
        let p = processor(git.clone(), mail.clone(), None);
        let site = p.site_config().await.unwrap();
        let subs = p.subscriptions(&site).unwrap().unwrap();
        mail.lists.lock().unwrap().insert(
            subs.list_address("post-1"),
            vec![staticpost::mail::Member {
                address: "bob@example.com".to_string(),
                subscribed: true,
            }],
        );
    }

    let git2 = git.clone();
    let mail2 = mail.clone();
    let p = processor(git2, mail2, None);
    let site = p.site_config().await.unwrap();
    let outcome = p
        .process_entry(&site, fields(), subscribe_options())
        .await
        .unwrap();

    assert!(outcome.secondary_errors.is_none());

    // Direct commit to the request branch, no review.
    let commits = git.commits.lock().unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].branch, "main");
    assert!(git.reviews.lock().unwrap().is_empty());

    // The commenter was subscribed, and the list notified.
    let lists = mail.lists.lock().unwrap();
    let members = lists.values().next().unwrap();
    assert!(members.iter().any(|m| m.address == "ada@example.com"));

    let sent = mail.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("Example Blog"));
}

/// Subscription failures are secondary: the entry still persists.
#[tokio::test]
async fn subscribe_failure_is_secondary() {
    let site_yaml = format!(
        "{SITE_BASE}moderation: false\nnotifications:\n  enabled: true\n  consentModel: single\n"
    );
    let git = MockGit::with_site_config(&site_yaml);
    let mail = Arc::new(MockMail::default());

    // A mail double whose member add always fails hard.
    struct FailingAdd(Arc<MockMail>);

    #[async_trait::async_trait]
    impl staticpost::mail::MailAgent for FailingAdd {
        fn domain(&self) -> &str {
            self.0.domain()
        }
        async fn get_list(&self, a: &str) -> Result<Option<()>, staticpost::mail::MailError> {
            self.0.get_list(a).await
        }
        async fn create_list(
            &self,
            l: &staticpost::mail::NewList,
        ) -> Result<(), staticpost::mail::MailError> {
            self.0.create_list(l).await
        }
        async fn add_member(
            &self,
            _l: &str,
            _m: &staticpost::mail::NewMember,
        ) -> Result<(), staticpost::mail::MailError> {
            Err(staticpost::mail::MailError::Transport("boom".to_string()))
        }
        async fn list_members(
            &self,
            l: &str,
        ) -> Result<Vec<staticpost::mail::Member>, staticpost::mail::MailError> {
            self.0.list_members(l).await
        }
        async fn get_member(
            &self,
            l: &str,
            a: &str,
        ) -> Result<Option<staticpost::mail::Member>, staticpost::mail::MailError> {
            self.0.get_member(l, a).await
        }
        async fn send_message(
            &self,
            m: &staticpost::mail::OutboundMessage,
        ) -> Result<(), staticpost::mail::MailError> {
            self.0.send_message(m).await
        }
    }

    struct FailingProvider(Arc<MockMail>);
    impl staticpost::mail::MailProvider for FailingProvider {
        fn agent(&self, _k: &str, _d: &str) -> Arc<dyn staticpost::mail::MailAgent> {
            Arc::new(FailingAdd(self.0.clone()))
        }
    }

    let p = Processor::new(
        test_config(),
        params(),
        ConfigPath::new(None),
        git.clone(),
        Arc::new(FailingProvider(mail)),
        None,
        reqwest::Client::new(),
        RequestMetadata::default(),
    );

    let site = p.site_config().await.unwrap();
    let outcome = p
        .process_entry(&site, fields(), subscribe_options())
        .await
        .unwrap();

    let secondary = outcome.secondary_errors.unwrap();
    assert!(secondary.subscribe_error);
    assert!(!secondary.subscribe_confirm_error);
    // The entry itself still landed.
    assert_eq!(git.commits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn spam_rejection_stops_the_pipeline() {
    let site_yaml = format!("{SITE_BASE}moderation: false\nakismet:\n  enabled: true\n  author: name\n  content: message\n");
    let git = MockGit::with_site_config(&site_yaml);
    let mail = Arc::new(MockMail::default());
    let p = processor(git.clone(), mail, Some(true));

    let site = p.site_config().await.unwrap();
    let err = p
        .process_entry(&site, fields(), SubmissionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Spam));
    assert!(git.commits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn validation_failures_name_the_offending_fields() {
    let git = MockGit::with_site_config(&format!("{SITE_BASE}moderation: false\n"));
    let mail = Arc::new(MockMail::default());
    let p = processor(git, mail, None);
    let site = p.site_config().await.unwrap();

    let mut missing = fields();
    missing.remove("message");
    match p
        .process_entry(&site, missing, SubmissionOptions::default())
        .await
        .unwrap_err()
    {
        AppError::MissingRequiredFields(names) => assert_eq!(names, vec!["message".to_string()]),
        other => panic!("unexpected error: {other}"),
    }

    let mut extra = fields();
    extra.insert("website".to_string(), json!("https://spam.example"));
    match p
        .process_entry(&site, extra, SubmissionOptions::default())
        .await
        .unwrap_err()
    {
        AppError::InvalidFields(names) => assert_eq!(names, vec!["website".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn branch_mismatch_is_a_config_error() {
    let git = MockGit::with_site_config(&SITE_BASE.replace("branch: main", "branch: master"));
    let mail = Arc::new(MockMail::default());
    let p = processor(git, mail, None);

    assert!(matches!(
        p.site_config().await.unwrap_err(),
        AppError::BranchMismatch
    ));
}
