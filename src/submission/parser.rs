use axum::http::HeaderMap;
use serde_json::{Map, Value};

/// Parse a submission body based on Content-Type. JSON bodies arrive nested;
/// form bodies use bracketed keys (`fields[name]`, `options[parent]`) which
/// are nested here so both shapes come out identical.
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Value, String> {
    let ct = content_type.unwrap_or("application/json");

    if ct.contains("application/json") {
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON: {e}"))
    } else if ct.contains("application/x-www-form-urlencoded") {
        parse_form_urlencoded(body)
    } else if ct.contains("multipart/form-data") {
        Err("multipart".to_string())
    } else {
        // Try JSON first, then form-urlencoded
        serde_json::from_slice(body)
            .or_else(|_| parse_form_urlencoded(body))
            .map_err(|e| format!("Unable to parse body: {e}"))
    }
}

fn parse_form_urlencoded(body: &[u8]) -> Result<Value, String> {
    let mut map = Map::new();
    for (key, value) in form_urlencoded::parse(body) {
        insert_bracketed(&mut map, &key, Value::String(value.into_owned()));
    }
    Ok(Value::Object(map))
}

/// Parse multipart form data using multer.
pub async fn parse_multipart(headers: &HeaderMap, body: bytes::Bytes) -> Result<Value, String> {
    let boundary = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or_else(|| "Missing multipart boundary".to_string())?;

    let stream = futures_util::stream::once(async { Ok::<_, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut map = Map::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Multipart error: {e}"))?
    {
        let name = field.name().unwrap_or("unknown").to_string();
        let value = field
            .text()
            .await
            .map_err(|e| format!("Field read error: {e}"))?;
        insert_bracketed(&mut map, &name, Value::String(value));
    }

    Ok(Value::Object(map))
}

/// Insert `a[b][c] = v` as `{"a": {"b": {"c": v}}}`. Keys without brackets
/// insert flat.
fn insert_bracketed(map: &mut Map<String, Value>, key: &str, value: Value) {
    let mut segments = Vec::new();
    let root_end = key.find('[').unwrap_or(key.len());
    segments.push(&key[..root_end]);

    let mut rest = &key[root_end..];
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        segments.push(&rest[open + 1..open + close]);
        rest = &rest[open + close + 1..];
    }

    let mut current = map;
    for (i, segment) in segments.iter().enumerate() {
        if i == segments.len() - 1 {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            // A flat key and a bracketed key collided; the nested shape wins.
            *entry = Value::Object(Map::new());
        }
        let Some(next) = entry.as_object_mut() else {
            return;
        };
        current = next;
    }
}
