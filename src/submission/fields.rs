use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::crypto;
use crate::error::AppError;
use crate::site_config::{
    DateFormat, GeneratedField, GeneratedFieldSpec, SiteConfig, Transform,
};

use super::FieldMap;

/// Check submitted fields against the site's allowed/required lists and trim
/// string values in place. A field outside the allowed set with a non-empty
/// value is an error; an empty unknown field is tolerated (unticked form
/// inputs post empty strings).
pub fn validate(fields: &mut FieldMap, site: &SiteConfig) -> Result<(), AppError> {
    let mut invalid = Vec::new();

    for (name, value) in fields.iter_mut() {
        if let Value::String(s) = value {
            *s = s.trim().to_string();
        }

        let empty = matches!(value, Value::String(s) if s.is_empty());
        if !site.allowed_fields.contains(name) && !empty {
            invalid.push(name.clone());
        }
    }

    let missing: Vec<String> = site
        .required_fields
        .iter()
        .filter(|name| {
            match fields.get(*name) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            }
        })
        .cloned()
        .collect();

    if !missing.is_empty() {
        return Err(AppError::MissingRequiredFields(missing));
    }
    if !invalid.is_empty() {
        return Err(AppError::InvalidFields(invalid));
    }

    Ok(())
}

/// Add site-configured generated fields: dates, authenticated-submitter
/// properties, slugified derivations, and literal constants.
pub fn apply_generated(fields: &mut FieldMap, site: &SiteConfig, git_user: Option<&Value>) {
    for (name, generated) in &site.generated_fields {
        match generated {
            GeneratedField::Spec(GeneratedFieldSpec::Date { options }) => {
                fields.insert(name.clone(), date_value(options.format));
            }
            GeneratedField::Spec(GeneratedFieldSpec::User { options }) => {
                if let Some(value) = git_user.and_then(|user| lookup_path(user, &options.property))
                {
                    fields.insert(name.clone(), value.clone());
                }
            }
            GeneratedField::Spec(GeneratedFieldSpec::Slugify { options }) => {
                if let Some(Value::String(source)) = fields.get(&options.field) {
                    fields.insert(name.clone(), Value::String(slugify(source)));
                }
            }
            GeneratedField::Literal(value) => {
                fields.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Apply site-configured field transforms in place. `frontmatterContent` is
/// a marker for the output format, not a value transform.
pub fn apply_transforms(fields: &mut FieldMap, site: &SiteConfig) {
    for (name, spec) in &site.transforms {
        let Some(value) = fields.get_mut(name) else {
            continue;
        };

        for transform in spec.iter() {
            let Value::String(s) = value else { continue };
            match transform {
                Transform::Hash => *s = crypto::email_digest(s),
                Transform::Upcase => *s = s.to_uppercase(),
                Transform::Downcase => *s = s.to_lowercase(),
                Transform::FrontmatterContent => {}
            }
        }
    }
}

/// Build the extended field map: the generated unique id, the parent
/// reference when present, then everything submitted. This is the unit that
/// actually reaches storage.
pub fn apply_internal(fields: &FieldMap, uid: &str, parent: Option<&str>) -> FieldMap {
    let mut extended = FieldMap::new();
    extended.insert("_id".to_string(), Value::String(uid.to_string()));
    if let Some(parent) = parent {
        extended.insert("_parent".to_string(), Value::String(parent.to_string()));
    }
    for (name, value) in fields {
        extended.insert(name.clone(), value.clone());
    }
    extended
}

fn date_value(format: DateFormat) -> Value {
    let now = Utc::now();
    match format {
        DateFormat::Iso8601 => Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        DateFormat::Timestamp => Value::from(now.timestamp_millis()),
        DateFormat::TimestampSeconds => Value::from(now.timestamp()),
    }
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Lowercased, hyphen-separated derivation of a field, safe for paths.
pub fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = true;
    for c in input.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
