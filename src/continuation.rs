//! Deferred continuation codec.
//!
//! When moderation is on, the notification workflow has to pause until a
//! human merges the review. There is no database: the continuation rides
//! inside the review body itself, sealed into an opaque token between fixed
//! delimiters, and comes back verbatim in the merge webhook payload. Most
//! webhook-triggered documents are unrelated human content, so every decode
//! failure means "no continuation present", never an error.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::crypto;
use crate::git::RepoParameters;
use crate::submission::{ConfigPath, FieldMap, SubmissionOptions};

pub const MARKER_START: &str = "<!--staticpost_notification:";
pub const MARKER_END: &str = "-->";

const VERSION: u32 = 1;

/// Everything needed to resume the notify path at merge time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredContinuation {
    pub config_path: ConfigPath,
    pub fields: FieldMap,
    pub extended_fields: FieldMap,
    pub options: SubmissionOptions,
    pub parameters: RepoParameters,
}

/// Wire form: the continuation plus a version tag and the provenance fields.
/// The seal endpoint is public, so pepper and environment are re-checked on
/// decode; they are the authenticity boundary, not the encryption.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    version: u32,
    pepper: String,
    #[serde(default)]
    exe_env: Option<String>,
    #[serde(flatten)]
    continuation: DeferredContinuation,
}

/// Seal a continuation into the marker text to append to a review body.
pub fn encode(continuation: &DeferredContinuation, config: &Config) -> Result<String, String> {
    let envelope = Envelope {
        version: VERSION,
        pepper: config.crypto_pepper.clone(),
        exe_env: config.exe_env.clone(),
        continuation: continuation.clone(),
    };
    let token = crypto::seal_json(&envelope, &config.encryption_key)?;
    Ok(format!("{MARKER_START}{token}{MARKER_END}"))
}

/// Best-effort extraction of a continuation from arbitrary document text.
pub fn decode(document: &str, config: &Config) -> Option<DeferredContinuation> {
    let start = document.find(MARKER_START)? + MARKER_START.len();
    let end = document[start..].find(MARKER_END)? + start;
    let token = &document[start..end];

    let envelope: Envelope = match crypto::open_json(token, &config.encryption_key) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!("Continuation token did not open: {e}");
            return None;
        }
    };

    if envelope.version != VERSION {
        tracing::debug!("Unknown continuation version {}", envelope.version);
        return None;
    }
    if envelope.pepper != config.crypto_pepper || envelope.exe_env != config.exe_env {
        tracing::warn!("Continuation provenance check failed");
        return None;
    }

    Some(envelope.continuation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::git::{GitProvider, RepoParameters};
    use proptest::prelude::*;
    use serde_json::json;

    fn continuation() -> DeferredContinuation {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), json!("Ada"));
        fields.insert("email".to_string(), json!("8c3d..."));

        let mut extended = fields.clone();
        extended.insert("_id".to_string(), json!("0190-abc"));
        extended.insert("_parent".to_string(), json!("post-1"));

        DeferredContinuation {
            config_path: ConfigPath::new(Some("comments".to_string())),
            fields,
            extended_fields: extended,
            options: SubmissionOptions {
                parent: Some("post-1".to_string()),
                origin: Some("https://example.com/post-1".to_string()),
                ..Default::default()
            },
            parameters: RepoParameters {
                service: GitProvider::GitHub,
                username: "owner".to_string(),
                repository: "blog".to_string(),
                branch: "main".to_string(),
                property: Some("comments".to_string()),
            },
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let config = test_config();
        let marker = encode(&continuation(), &config).unwrap();
        let body = format!("Dear human,\n\n| Field | Content |\n\n{marker}\n");

        let decoded = decode(&body, &config).unwrap();
        assert_eq!(decoded, continuation());
    }

    #[test]
    fn marker_text_is_well_delimited() {
        let config = test_config();
        let marker = encode(&continuation(), &config).unwrap();
        assert!(marker.starts_with(MARKER_START));
        assert!(marker.ends_with(MARKER_END));
        // Exactly one marker pair.
        assert_eq!(marker.matches(MARKER_START).count(), 1);
    }

    #[test]
    fn document_without_marker_decodes_to_none() {
        let config = test_config();
        assert!(decode("Just a human pull request body.", &config).is_none());
        assert!(decode("", &config).is_none());
    }

    #[test]
    fn garbage_token_decodes_to_none() {
        let config = test_config();
        let body = format!("{MARKER_START}not-a-real-token{MARKER_END}");
        assert!(decode(&body, &config).is_none());
    }

    #[test]
    fn wrong_pepper_decodes_to_none() {
        let config = test_config();
        let marker = encode(&continuation(), &config).unwrap();

        let mut other = test_config();
        other.crypto_pepper = "different-pepper".to_string();
        assert!(decode(&marker, &other).is_none());
    }

    #[test]
    fn wrong_environment_decodes_to_none() {
        let config = test_config();
        let marker = encode(&continuation(), &config).unwrap();

        let mut other = test_config();
        other.exe_env = Some("staging".to_string());
        assert!(decode(&marker, &other).is_none());
    }

    #[test]
    fn first_marker_wins() {
        let config = test_config();
        let good = encode(&continuation(), &config).unwrap();
        // A bogus marker before the real one swallows the decode attempt;
        // that is the non-greedy first-match contract.
        let body = format!("{MARKER_START}bogus{MARKER_END} {good}");
        assert!(decode(&body, &config).is_none());
    }

    proptest! {
        #[test]
        fn prop_roundtrip_arbitrary_fields(
            keys in proptest::collection::vec("[a-z]{1,12}", 0..6),
            values in proptest::collection::vec(".{0,40}", 0..6),
        ) {
            let config = test_config();
            let mut c = continuation();
            c.fields = keys
                .iter()
                .zip(values.iter())
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();

            let marker = encode(&c, &config).unwrap();
            let decoded = decode(&marker, &config).unwrap();
            prop_assert_eq!(decoded, c);
        }
    }
}
