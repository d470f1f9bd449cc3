//! `print` frames carry three unrelated payloads: the participant roster,
//! the end-of-workflow marker, and the run timeline.

use serde_json::{Map, Value};

use super::decode::parse_nested_object;
use super::handlers::{content_object, str_field};
use super::{ProcessContext, ProcessError};
use crate::messages::{Participant, ProcessingResult, TimelineData};

type HandlerResult = Result<Option<ProcessingResult>, ProcessError>;

const TIMELINE_ARRAYS: [&str; 3] = ["timeline", "cost_timeline", "agents"];
const TIMELINE_OBJECTS: [&str; 2] = ["summary", "metadata"];

pub(super) fn handle_print(data: &Map<String, Value>, ctx: &ProcessContext<'_>) -> HandlerResult {
    let payloads = print_payloads(data);

    for payload in &payloads {
        // TODO: drop the recursive unwrap once the backend stops double-dumping the roster
        if let Some(participants) = parse_nested_object(payload)
            .as_ref()
            .and_then(participants_from)
        {
            return Ok(Some(ProcessingResult::Participants(participants)));
        }
    }

    if contains_end_marker(data, ctx.end_marker) {
        return Ok(Some(ProcessingResult::WorkflowEnd { message: None }));
    }

    for payload in &payloads {
        let Some(inner) = parse_nested_object(payload) else {
            continue;
        };
        if str_field(&inner, "type") == Some("timeline") {
            return timeline_result(inner.get("content"));
        }
    }

    Ok(None)
}

pub(super) fn handle_timeline(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    timeline_result(data.get("content").or_else(|| data.get("data")))
}

pub(super) fn handle_participants(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    let from_content = || {
        data.get("content")
            .and_then(parse_nested_object)
            .as_ref()
            .and_then(participants_from)
    };
    Ok(participants_from(data)
        .or_else(from_content)
        .map(ProcessingResult::Participants))
}

/// Where a `print` frame may hide its payload: `content.data`, then `data`.
fn print_payloads(data: &Map<String, Value>) -> Vec<&Value> {
    let mut payloads = Vec::new();
    if let Some(v) = content_object(data).and_then(|c| c.get("data")) {
        payloads.push(v);
    }
    if let Some(v) = data.get("data") {
        payloads.push(v);
    }
    payloads
}

/// Roster from `{ participants: [...] }`. Every entry must carry a string
/// `name`, otherwise the whole roster is rejected.
fn participants_from(map: &Map<String, Value>) -> Option<Vec<Participant>> {
    let entries = map.get("participants")?.as_array()?;
    entries
        .iter()
        .map(|entry| {
            let entry = entry.as_object()?;
            let name = str_field(entry, "name")?;
            Some(Participant {
                id: str_field(entry, "id").unwrap_or(name).to_string(),
                name: name.to_string(),
                is_user: str_field(entry, "humanInputMode") == Some("ALWAYS"),
                agent_type: str_field(entry, "agentType").map(String::from),
            })
        })
        .collect()
}

fn contains_end_marker(data: &Map<String, Value>, marker: &str) -> bool {
    let has_marker = |v: Option<&Value>| match v {
        Some(Value::String(s)) => s.contains(marker),
        Some(Value::Object(m)) => str_field(m, "message").is_some_and(|s| s.contains(marker)),
        _ => false,
    };

    let content = data.get("content");
    if let Some(Value::String(s)) = content {
        if s.contains(marker) {
            return true;
        }
    }
    has_marker(content.and_then(|c| c.get("data"))) || has_marker(data.get("data"))
}

fn timeline_result(content: Option<&Value>) -> HandlerResult {
    let Some(content) = content.and_then(parse_nested_object) else {
        return Ok(None);
    };
    let complete = TIMELINE_ARRAYS
        .iter()
        .all(|key| content.get(*key).is_some_and(Value::is_array))
        && TIMELINE_OBJECTS
            .iter()
            .all(|key| content.get(*key).is_some_and(|v| !v.is_null()));
    if !complete {
        return Ok(None);
    }

    let timeline: TimelineData = serde_json::from_value(Value::Object(content))?;
    Ok(Some(ProcessingResult::Timeline(timeline)))
}
