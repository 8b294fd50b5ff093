use serde_json::Value;

use crate::error::AppError;
use crate::site_config::{EntryFormat, SiteConfig, Transform};
use crate::template;

use super::{FieldMap, SubmissionOptions};

/// Serialize the extended fields into the site's configured entry format.
pub fn render_entry(site: &SiteConfig, extended_fields: &FieldMap) -> Result<String, AppError> {
    match site.format {
        EntryFormat::Json => serde_json::to_string(extended_fields)
            .map_err(|e| AppError::Internal(format!("JSON serialization failed: {e}"))),
        EntryFormat::Yaml => serde_yaml_ng::to_string(extended_fields)
            .map_err(|e| AppError::Internal(format!("YAML serialization failed: {e}"))),
        EntryFormat::Frontmatter => {
            let content_field = frontmatter_content_field(site)
                .ok_or(AppError::MissingContentTransform)?;

            let content = extended_fields
                .get(&content_field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let mut attributes = extended_fields.clone();
            attributes.remove(&content_field);

            let yaml = serde_yaml_ng::to_string(&attributes)
                .map_err(|e| AppError::Internal(format!("YAML serialization failed: {e}")))?;

            Ok(format!("---\n{yaml}---\n{content}\n"))
        }
    }
}

/// The field flagged as the document body for the frontmatter format.
fn frontmatter_content_field(site: &SiteConfig) -> Option<String> {
    site.transforms.iter().find_map(|(field, spec)| {
        spec.iter()
            .any(|t| *t == Transform::FrontmatterContent)
            .then(|| field.clone())
    })
}

/// The repository path for a new entry: placeholder-resolved directory and
/// filename plus a format-appropriate extension. The filename defaults to
/// the entry's unique id when the site configures none.
pub fn entry_file_path(
    site: &SiteConfig,
    uid: &str,
    fields: &FieldMap,
    options: &SubmissionOptions,
) -> String {
    let fields_value = serde_json::to_value(fields).unwrap_or(Value::Null);
    let options_value = serde_json::to_value(options).unwrap_or(Value::Null);

    let filename = if site.filename.is_empty() {
        uid.to_string()
    } else {
        template::resolve_placeholders(&site.filename, uid, &fields_value, &options_value)
    };

    let mut path = template::resolve_placeholders(&site.path, uid, &fields_value, &options_value);
    if path.ends_with('/') {
        path.pop();
    }

    let extension = if site.extension.is_empty() {
        site.format.extension().to_string()
    } else {
        site.extension.trim_start_matches('.').to_string()
    };

    format!("{path}/{filename}.{extension}")
}

/// Placeholder-resolved commit message.
pub fn commit_message(
    site: &SiteConfig,
    uid: &str,
    fields: &FieldMap,
    options: &SubmissionOptions,
) -> String {
    let fields_value = serde_json::to_value(fields).unwrap_or(Value::Null);
    let options_value = serde_json::to_value(options).unwrap_or(Value::Null);
    template::resolve_placeholders(&site.commit_message, uid, &fields_value, &options_value)
}

/// The human-facing review body: the site's preamble, a markdown table of
/// the submitted fields, and optionally a sealed continuation marker.
pub fn review_body(site: &SiteConfig, fields: &FieldMap, continuation: Option<&str>) -> String {
    let mut table = String::from("| Field | Content |\n| --- | --- |\n");
    for (name, value) in fields {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        table.push_str(&format!("| {name} | {} |\n", rendered.replace('\n', " ")));
    }

    let mut body = format!("{}{table}", site.pull_request_body);
    if let Some(marker) = continuation {
        body.push_str("\n\n");
        body.push_str(marker);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site_config;
    use serde_json::json;

    fn site(doc: &str) -> SiteConfig {
        site_config::parse(doc, None).unwrap()
    }

    fn extended() -> FieldMap {
        let mut f = FieldMap::new();
        f.insert("_id".to_string(), json!("uid-1"));
        f.insert("name".to_string(), json!("Ada"));
        f.insert("message".to_string(), json!("First!"));
        f
    }

    const BASE: &str = "allowedFields: [name, message]\nbranch: main\npath: _data/{options.parent}\nformat: ";

    #[test]
    fn renders_json_and_yaml() {
        let json_out = render_entry(&site(&format!("{BASE}json\n")), &extended()).unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&json_out).unwrap()["name"],
            "Ada"
        );

        let yaml_out = render_entry(&site(&format!("{BASE}yaml\n")), &extended()).unwrap();
        assert!(yaml_out.contains("name: Ada"));
        assert!(yaml_out.contains("_id: uid-1"));
    }

    #[test]
    fn renders_frontmatter_with_content_transform() {
        let config = site(&format!(
            "{BASE}frontmatter\ntransforms:\n  message: frontmatterContent\n"
        ));
        let out = render_entry(&config, &extended()).unwrap();
        assert!(out.starts_with("---\n"));
        assert!(out.contains("name: Ada"));
        assert!(out.ends_with("---\nFirst!\n"));
        assert!(!out.contains("message:"));
    }

    #[test]
    fn frontmatter_without_content_transform_is_an_error() {
        let config = site(&format!("{BASE}frontmatter\n"));
        assert!(matches!(
            render_entry(&config, &extended()),
            Err(AppError::MissingContentTransform)
        ));
    }

    #[test]
    fn file_path_resolves_placeholders_and_extension() {
        let config = site(&format!("{BASE}yaml\n"));
        let options = SubmissionOptions {
            parent: Some("post-1".to_string()),
            ..Default::default()
        };
        let path = entry_file_path(&config, "uid-1", &FieldMap::new(), &options);
        assert_eq!(path, "_data/post-1/uid-1.yml");
    }

    #[test]
    fn file_path_uses_configured_filename_and_extension() {
        let config = site(&format!(
            "{BASE}frontmatter\nfilename: comment-{{@id}}\nextension: .markdown\n"
        ));
        let path = entry_file_path(&config, "uid-1", &FieldMap::new(), &SubmissionOptions {
            parent: Some("p".to_string()),
            ..Default::default()
        });
        assert_eq!(path, "_data/p/comment-uid-1.markdown");
    }

    #[test]
    fn trailing_slash_in_path_is_dropped() {
        let config = site("allowedFields: [a]\nbranch: main\npath: _data/comments/\nformat: json\n");
        let path = entry_file_path(&config, "uid-1", &FieldMap::new(), &SubmissionOptions::default());
        assert_eq!(path, "_data/comments/uid-1.json");
    }

    #[test]
    fn review_body_contains_table_and_marker() {
        let config = site(&format!("{BASE}yaml\n"));
        let body = review_body(&config, &extended(), Some("<!--m:tok-->"));
        assert!(body.contains("| name | Ada |"));
        assert!(body.contains("| message | First! |"));
        assert!(body.ends_with("<!--m:tok-->"));
        assert!(body.starts_with(&config.pull_request_body));
    }
}
