use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::AppError;

/// Keys that must be present in a site's configuration block.
const REQUIRED_KEYS: [&str; 4] = ["allowedFields", "branch", "format", "path"];

/// Per-site configuration, read from `staticpost.yml` in the target
/// repository on every request. Immutable once parsed; merged with global
/// configuration explicitly at use sites, never through a singleton.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub allowed_fields: Vec<String>,
    pub branch: String,
    pub format: EntryFormat,
    pub path: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub extension: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    /// Human-readable site name, used in notification emails.
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub moderation: bool,
    #[serde(default = "default_pull_request_body")]
    pub pull_request_body: String,
    #[serde(default)]
    pub generated_fields: BTreeMap<String, GeneratedField>,
    #[serde(default)]
    pub transforms: BTreeMap<String, TransformSpec>,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub akismet: AkismetConfig,
    #[serde(default, rename = "reCaptcha")]
    pub recaptcha: RecaptchaConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub github_webhook_secret: Option<String>,
    #[serde(default)]
    pub gitlab_webhook_secret: Option<String>,
}

fn default_commit_message() -> String {
    "Add new submission".to_string()
}

fn default_true() -> bool {
    true
}

fn default_pull_request_body() -> String {
    "Dear human,\n\nHere's a new entry for your approval. :tada:\n\n\
     Merge the pull request to accept it, or close it to send it away.\n\n\
     :heart: Your friendly Staticpost bot\n\n---\n"
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryFormat {
    Json,
    #[serde(alias = "yml")]
    Yaml,
    Frontmatter,
}

impl EntryFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            EntryFormat::Json => "json",
            EntryFormat::Yaml => "yml",
            EntryFormat::Frontmatter => "md",
        }
    }
}

/// One transform name or a list of them, as sites write either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransformSpec {
    One(Transform),
    Many(Vec<Transform>),
}

impl TransformSpec {
    pub fn iter(&self) -> impl Iterator<Item = &Transform> {
        match self {
            TransformSpec::One(t) => std::slice::from_ref(t).iter(),
            TransformSpec::Many(ts) => ts.as_slice().iter(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transform {
    /// Replace the value with its hex digest. Applied to email fields so the
    /// cleartext address never reaches the repository.
    Hash,
    Upcase,
    Downcase,
    /// Marks the field holding the document body for the frontmatter format.
    FrontmatterContent,
}

/// A generated field is either a typed generator or a literal constant.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GeneratedField {
    Spec(GeneratedFieldSpec),
    Literal(serde_json::Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GeneratedFieldSpec {
    Date {
        #[serde(default)]
        options: DateOptions,
    },
    /// A property of the authenticated submitter, e.g. `login` or `name`.
    User { options: UserOptions },
    /// Slugified copy of another submitted field.
    Slugify { options: SlugifyOptions },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DateOptions {
    #[serde(default)]
    pub format: DateFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum DateFormat {
    #[default]
    #[serde(rename = "iso8601")]
    Iso8601,
    #[serde(rename = "timestamp")]
    Timestamp,
    #[serde(rename = "timestamp-seconds")]
    TimestampSeconds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserOptions {
    pub property: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlugifyOptions {
    pub field: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Sealed mail-provider API key; overrides the global key when present.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub double_opt_in: bool,
    #[serde(default)]
    pub consent_model: ConsentModel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentModel {
    #[default]
    None,
    Single,
    Double,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AkismetConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub author_url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub comment_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecaptchaConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub site_key: String,
    /// Sealed secret; compared against the sealed secret the client echoes back.
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub required: bool,
}

/// Parse a site configuration document, optionally descending into a
/// dot-separated property path first (multi-site repositories keep one block
/// per site under distinct top-level keys).
pub fn parse(document: &str, property: Option<&str>) -> Result<SiteConfig, AppError> {
    let root: serde_yaml_ng::Value = serde_yaml_ng::from_str(document).map_err(|e| {
        tracing::warn!("Unparseable site config: {e}");
        AppError::MissingConfigBlock
    })?;

    let mut node = &root;
    if let Some(property) = property.filter(|p| !p.is_empty()) {
        for segment in property.split('.') {
            node = node.get(segment).ok_or(AppError::MissingConfigBlock)?;
        }
    }

    let mapping = node.as_mapping().ok_or(AppError::MissingConfigBlock)?;

    let missing: Vec<String> = REQUIRED_KEYS
        .iter()
        .filter(|key| !mapping.contains_key(&serde_yaml_ng::Value::String(key.to_string())))
        .map(|key| key.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(AppError::MissingConfigFields(missing));
    }

    serde_yaml_ng::from_value(node.clone()).map_err(|e| {
        tracing::warn!("Malformed site config: {e}");
        AppError::MissingConfigBlock
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
allowedFields: [name, email, message]
branch: main
format: yaml
path: _data/comments/{options.parent}
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse(MINIMAL, None).unwrap();
        assert_eq!(config.branch, "main");
        assert_eq!(config.format, EntryFormat::Yaml);
        assert!(config.moderation);
        assert!(config.required_fields.is_empty());
        assert!(!config.notifications.enabled);
        assert_eq!(config.notifications.consent_model, ConsentModel::None);
    }

    #[test]
    fn missing_required_keys_are_listed() {
        let err = parse("allowedFields: [a]\nbranch: main\n", None).unwrap_err();
        match err {
            AppError::MissingConfigFields(fields) => {
                assert_eq!(fields, vec!["format".to_string(), "path".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn property_path_selects_a_subtree() {
        let doc = format!("comments:\n{}", indent(MINIMAL));
        let config = parse(&doc, Some("comments")).unwrap();
        assert_eq!(config.branch, "main");

        assert!(matches!(
            parse(&doc, Some("missing")),
            Err(AppError::MissingConfigBlock)
        ));
    }

    #[test]
    fn yml_is_an_alias_for_yaml() {
        let doc = MINIMAL.replace("format: yaml", "format: yml");
        assert_eq!(parse(&doc, None).unwrap().format, EntryFormat::Yaml);
    }

    #[test]
    fn generated_fields_accept_spec_and_literal() {
        let doc = format!(
            "{MINIMAL}generatedFields:\n  date:\n    type: date\n    options:\n      format: timestamp-seconds\n  source: website\n"
        );
        let config = parse(&doc, None).unwrap();

        match config.generated_fields.get("date").unwrap() {
            GeneratedField::Spec(GeneratedFieldSpec::Date { options }) => {
                assert_eq!(options.format, DateFormat::TimestampSeconds);
            }
            other => panic!("unexpected generated field: {other:?}"),
        }
        match config.generated_fields.get("source").unwrap() {
            GeneratedField::Literal(value) => assert_eq!(value, "website"),
            other => panic!("unexpected generated field: {other:?}"),
        }
    }

    #[test]
    fn transforms_accept_one_or_many() {
        let doc = format!("{MINIMAL}transforms:\n  email: hash\n  message: [downcase]\n");
        let config = parse(&doc, None).unwrap();

        let email: Vec<_> = config.transforms["email"].iter().collect();
        assert_eq!(email, vec![&Transform::Hash]);
        let message: Vec<_> = config.transforms["message"].iter().collect();
        assert_eq!(message, vec![&Transform::Downcase]);
    }

    fn indent(block: &str) -> String {
        block
            .lines()
            .map(|l| {
                if l.is_empty() {
                    String::new()
                } else {
                    format!("  {l}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
