use serde_json::{Map, Value};

/// How many layers of JSON-in-a-JSON-string we are willing to peel.
const MAX_UNWRAP_DEPTH: usize = 3;

/// One inbound unit from the transport: a text line or an already-parsed value.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFrame {
    Text(String),
    Value(Value),
}

impl From<&str> for RawFrame {
    fn from(s: &str) -> Self {
        RawFrame::Text(s.to_string())
    }
}

impl From<String> for RawFrame {
    fn from(s: String) -> Self {
        RawFrame::Text(s)
    }
}

impl From<Value> for RawFrame {
    fn from(v: Value) -> Self {
        RawFrame::Value(v)
    }
}

impl RawFrame {
    /// The frame as the backend sent it, for echoing back in results.
    pub fn original_text(&self) -> String {
        match self {
            RawFrame::Text(s) => s.clone(),
            RawFrame::Value(Value::String(s)) => s.clone(),
            RawFrame::Value(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// A JSON object, ready for type dispatch.
    Envelope(Map<String, Value>),
    /// Anything that is not a JSON object. Only scanned for the end marker.
    PlainText(String),
}

impl DecodedFrame {
    pub fn frame_type(&self) -> Option<&str> {
        match self {
            DecodedFrame::Envelope(map) => map.get("type").and_then(Value::as_str),
            DecodedFrame::PlainText(_) => None,
        }
    }
}

/// Decode a raw frame. `None` means there is nothing to process.
pub fn decode(raw: Option<&RawFrame>) -> Option<DecodedFrame> {
    match raw? {
        RawFrame::Text(s) => decode_text(s),
        RawFrame::Value(v) => decode_value(v.clone(), 0),
    }
}

fn decode_text(raw: &str) -> Option<DecodedFrame> {
    let clean = strip_ansi_escapes::strip_str(raw);
    let clean = clean.trim_end_matches(['\n', '\r']).trim();
    if clean.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(clean) {
        Ok(value) => decode_value(value, 0),
        Err(_) => Some(DecodedFrame::PlainText(clean.to_string())),
    }
}

fn decode_value(value: Value, depth: usize) -> Option<DecodedFrame> {
    match value {
        Value::Null => None,
        Value::Object(map) => Some(DecodedFrame::Envelope(map)),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            if depth < MAX_UNWRAP_DEPTH {
                if let Ok(inner) = serde_json::from_str::<Value>(trimmed) {
                    if inner.is_object() || inner.is_string() || inner.is_null() {
                        return decode_value(inner, depth + 1);
                    }
                }
            }
            Some(DecodedFrame::PlainText(trimmed.to_string()))
        }
        other => Some(DecodedFrame::PlainText(other.to_string())),
    }
}

/// Parse a value that may be a JSON document stored in a string.
///
/// Some backends serialize nested payloads twice, so strings are re-parsed
/// until an object appears. Returns `None` when nothing object-shaped is found.
pub fn parse_nested_object(value: &Value) -> Option<Map<String, Value>> {
    let mut current = value.clone();
    for _ in 0..=MAX_UNWRAP_DEPTH {
        match current {
            Value::Object(map) => return Some(map),
            Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
                Ok(inner) => current = inner,
                Err(e) => {
                    tracing::debug!(error = %e, "nested payload is not JSON");
                    return None;
                }
            },
            _ => return None,
        }
    }
    None
}
