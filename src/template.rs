use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;

static TEMPLATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+(?:\.\w+)*)\s*\}\}").unwrap());

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").unwrap());

/// Rendering context for email subject/body templates. All namespaces are
/// JSON values so site templates can reach any submitted or generated field.
pub struct TemplateContext {
    pub fields: Value,
    pub extended_fields: Value,
    pub options: Value,
    pub data: Value,
    pub confirm_link: Option<String>,
}

/// Replace `{{namespace.path}}` placeholders with values from the context.
/// Unknown placeholders render as empty strings.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    TEMPLATE_RE
        .replace_all(template, |caps: &regex::Captures| {
            resolve(&caps[1], ctx).unwrap_or_default()
        })
        .to_string()
}

fn resolve(path: &str, ctx: &TemplateContext) -> Option<String> {
    let (namespace, rest) = match path.split_once('.') {
        Some((ns, rest)) => (ns, Some(rest)),
        None => (path, None),
    };

    match (namespace, rest) {
        ("fields", Some(rest)) => lookup(&ctx.fields, rest),
        ("extendedFields", Some(rest)) => lookup(&ctx.extended_fields, rest),
        ("options", Some(rest)) => lookup(&ctx.options, rest),
        ("data", Some(rest)) => lookup(&ctx.data, rest),
        ("confirmLink", None) => ctx.confirm_link.clone(),
        _ => None,
    }
}

fn lookup(value: &Value, path: &str) -> Option<String> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    value_to_string(current)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Resolve single-brace placeholders in paths, filenames, and commit
/// messages: `{@id}`, `{@timestamp}` (epoch millis), `{@date:<format>}`
/// (a chrono strftime pattern), `{fields.*}`, and `{options.*}`.
/// Unresolvable placeholders become empty strings.
pub fn resolve_placeholders(subject: &str, uid: &str, fields: &Value, options: &Value) -> String {
    PLACEHOLDER_RE
        .replace_all(subject, |caps: &regex::Captures| {
            let property = &caps[1];

            match property {
                "@id" => uid.to_string(),
                "@timestamp" => Utc::now().timestamp_millis().to_string(),
                _ => {
                    if let Some(pattern) = property.strip_prefix("@date:") {
                        Utc::now().format(pattern).to_string()
                    } else if let Some(rest) = property.strip_prefix("fields.") {
                        lookup(fields, rest).unwrap_or_default()
                    } else if let Some(rest) = property.strip_prefix("options.") {
                        lookup(options, rest).unwrap_or_default()
                    } else {
                        String::new()
                    }
                }
            }
        })
        .to_string()
}
