use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ContentBlock, ImageRef};

/// Shown instead of a bare `>` prompt.
pub const START_CONVERSATION_PROMPT: &str = "Enter your message to start the conversation:";

/// Appended to text cut by [`truncate_markdown`].
const ELLIPSIS: &str = "…";

fn nested<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    data.get("content")
        .and_then(Value::as_object)
        .and_then(|c| c.get(key))
        .or_else(|| data.get(key))
}

fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Timestamp for a frame: the backend's own if it parses, else now.
///
/// Accepts RFC 3339 strings and epoch seconds/milliseconds.
pub fn generate_timestamp(data: &Map<String, Value>) -> String {
    let parsed = match nested(data, "timestamp") {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Some(Value::Number(n)) => n.as_f64().and_then(|secs| {
            // Anything past year ~2286 in seconds is really milliseconds.
            let millis = if secs > 1e10 { secs } else { secs * 1000.0 };
            DateTime::<Utc>::from_timestamp_millis(millis as i64)
        }),
        _ => None,
    };
    parsed
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(now_timestamp)
}

/// Message id from the frame's `uuid`/`id` (nested under `content` first),
/// or a fresh v4 uuid.
pub fn generate_message_id(data: &Map<String, Value>) -> String {
    non_empty_str(nested(data, "uuid"))
        .or_else(|| non_empty_str(nested(data, "id")))
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn normalize_prompt(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed == ">" {
        START_CONVERSATION_PROMPT.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn is_password_prompt(data: &Map<String, Value>) -> bool {
    match nested(data, "password") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Render an arbitrary JSON value as display text. Strings are used as-is,
/// everything else is serialized.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Turn whatever the backend sent as `content` into ordered blocks.
///
/// When `image_url` is given every image block points at it instead, keeping
/// only `alt` from the original block.
pub fn normalize_content(raw: &Value, image_url: Option<&str>) -> Vec<ContentBlock> {
    match raw {
        Value::Null => Vec::new(),
        Value::String(s) => vec![ContentBlock::text(s.clone())],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) => Some(ContentBlock::text(s.clone())),
                Value::Object(_) => Some(normalize_block(item, image_url)),
                other => Some(ContentBlock::text(value_to_text(other))),
            })
            .collect(),
        Value::Object(_) => vec![normalize_block(raw, image_url)],
        other => vec![ContentBlock::text(value_to_text(other))],
    }
}

fn normalize_block(item: &Value, image_url: Option<&str>) -> ContentBlock {
    // Covers both `image_url: {url, alt?}` and `image_url: "<url>"`.
    if let Some(url) = image_url {
        if item.get("type").and_then(Value::as_str) == Some("image_url") {
            let alt = item
                .get("image_url")
                .and_then(|i| i.get("alt"))
                .and_then(Value::as_str)
                .map(String::from);
            return ContentBlock::ImageUrl {
                image_url: ImageRef {
                    url: url.to_string(),
                    alt,
                    extra: Map::new(),
                },
            };
        }
    }
    serde_json::from_value::<ContentBlock>(item.clone()).unwrap_or_else(|_| ContentBlock::Other(item.clone()))
}

/// Shorten markdown to at most `max_chars` characters (plus an ellipsis)
/// without splitting a character, preferring a word boundary, and closing a
/// code fence left open by the cut.
pub fn truncate_markdown(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }

    let truncated: String = trimmed.chars().take(max_chars).collect();
    let boundary = truncated
        .rfind(char::is_whitespace)
        .filter(|&i| i > 0)
        .unwrap_or(truncated.len());
    let mut out = truncated[..boundary].trim_end().to_string();

    if out.matches("```").count() % 2 == 1 {
        out.push_str("\n```");
        out.push('\n');
    }
    out.push_str(ELLIPSIS);
    out
}
