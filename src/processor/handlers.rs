use serde_json::{Map, Value};
use uuid::Uuid;

use super::print::{handle_participants, handle_print, handle_timeline};
use super::{Handler, ProcessContext, ProcessError};
use crate::messages::normalize::{
    generate_message_id, generate_timestamp, is_password_prompt, normalize_content,
    normalize_prompt, value_to_text,
};
use crate::messages::{CanonicalMessage, MessageKind, ProcessingResult};

type HandlerResult = Result<Option<ProcessingResult>, ProcessError>;

/// The registry, in the order handlers are tried.
pub fn default_handlers() -> Vec<Handler> {
    vec![
        Handler {
            name: "input_request",
            can_handle: |t| t == "input_request",
            handle: handle_input_request,
        },
        Handler {
            name: "input_request_invalid_input",
            can_handle: |t| t == "input_request_invalid_input",
            handle: |_, _| Ok(None),
        },
        Handler {
            name: "using_auto_reply",
            can_handle: |t| t == "using_auto_reply",
            handle: handle_using_auto_reply,
        },
        Handler {
            name: "print",
            can_handle: |t| t == "print",
            handle: handle_print,
        },
        Handler {
            name: "timeline",
            can_handle: |t| t == "timeline",
            handle: handle_timeline,
        },
        Handler {
            name: "participants",
            can_handle: |t| t == "participants",
            handle: handle_participants,
        },
        Handler {
            name: "text",
            can_handle: |t| text_kind(t).is_some(),
            handle: handle_text,
        },
        Handler {
            name: "termination",
            can_handle: |t| t == "termination",
            handle: handle_termination,
        },
        Handler {
            name: "error",
            can_handle: |t| t == "error",
            handle: handle_error,
        },
        Handler {
            name: "function_execution",
            can_handle: |t| t == "execute_function" || t == "executed_function",
            handle: handle_function_execution,
        },
        Handler {
            name: "group_chat_run_chat",
            can_handle: |t| t == "group_chat_run_chat",
            handle: handle_group_chat_run,
        },
        Handler {
            name: "select_speaker",
            can_handle: |t| t == "select_speaker" || t == "select_speaker_invalid_input",
            handle: handle_select_speaker,
        },
        Handler {
            name: "generate_code_execution_reply",
            can_handle: |t| t == "generate_code_execution_reply",
            handle: handle_code_execution_reply,
        },
    ]
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

pub(super) fn content_object(data: &Map<String, Value>) -> Option<&Map<String, Value>> {
    data.get("content").and_then(Value::as_object)
}

pub(super) fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    str_field(map, key).map(String::from)
}

fn frame_type(data: &Map<String, Value>) -> &str {
    str_field(data, "type").unwrap_or_default()
}

fn text_kind(t: &str) -> Option<MessageKind> {
    match t {
        "text" => Some(MessageKind::Text),
        "tool_call" => Some(MessageKind::ToolCall),
        "termination_and_human_reply_no_input" => Some(MessageKind::TerminationAndHumanReplyNoInput),
        _ => None,
    }
}

fn system_message(data: &Map<String, Value>, id: String, text: impl Into<String>) -> CanonicalMessage {
    CanonicalMessage::new(id, generate_timestamp(data), MessageKind::System, text)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_input_request(data: &Map<String, Value>, ctx: &ProcessContext<'_>) -> HandlerResult {
    let Some(request_id) = str_field(data, "request_id").filter(|id| !id.is_empty()) else {
        return Ok(None);
    };
    let Some(prompt) = str_field(data, "prompt")
        .or_else(|| content_object(data).and_then(|c| str_field(c, "prompt")))
    else {
        return Ok(None);
    };

    let prompt = normalize_prompt(prompt);
    let mut message = CanonicalMessage::new(
        request_id.to_string(),
        generate_timestamp(data),
        MessageKind::InputRequest,
        prompt.clone(),
    );
    message.request_id = Some(ctx.request_id.unwrap_or(request_id).to_string());
    message.prompt = Some(prompt);
    message.password = Some(is_password_prompt(data));
    if let Some(content) = content_object(data) {
        message.sender = string_field(content, "sender");
        message.recipient = string_field(content, "recipient");
    }
    Ok(Some(ProcessingResult::Message(message)))
}

fn handle_using_auto_reply(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    let message = system_message(data, generate_message_id(data), "Using auto reply");
    let message = match content_object(data) {
        Some(c) => message.with_route(string_field(c, "sender"), string_field(c, "recipient")),
        None => message,
    };
    Ok(Some(ProcessingResult::Message(message)))
}

fn handle_text(data: &Map<String, Value>, ctx: &ProcessContext<'_>) -> HandlerResult {
    let Some(kind) = text_kind(frame_type(data)) else {
        return Ok(None);
    };
    let Some(content) = content_object(data) else {
        return Ok(None);
    };
    let Some(inner) = content.get("content").filter(|v| !v.is_null()) else {
        return Ok(None);
    };

    let blocks = normalize_content(inner, ctx.image_url);
    if blocks.is_empty() {
        return Ok(None);
    }

    let mut message = CanonicalMessage::new(
        generate_message_id(data),
        generate_timestamp(data),
        kind,
        String::new(),
    )
    .with_route(string_field(content, "sender"), string_field(content, "recipient"));
    message.content = blocks;
    Ok(Some(ProcessingResult::Message(message)))
}

fn handle_termination(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    let reason = content_object(data)
        .and_then(|c| str_field(c, "termination_reason"))
        .or_else(|| str_field(data, "termination_reason"));
    let Some(reason) = reason else {
        return Ok(None);
    };
    let message = system_message(data, generate_message_id(data), reason);
    Ok(Some(ProcessingResult::Message(message)))
}

fn handle_error(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    let Some(content) = content_object(data) else {
        return Ok(None);
    };
    let (Some(uuid), Some(error), Some(sender), Some(recipient)) = (
        str_field(content, "uuid"),
        str_field(content, "error"),
        str_field(content, "sender"),
        str_field(content, "recipient"),
    ) else {
        return Ok(None);
    };

    let mut message = system_message(data, uuid.to_string(), format!("Error: {error}"))
        .with_route(Some(sender.to_string()), Some(recipient.to_string()));
    message.error = Some(error.to_string());
    Ok(Some(ProcessingResult::Message(message)))
}

fn handle_function_execution(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    let empty = Map::new();
    let content = content_object(data).unwrap_or(&empty);
    let func_name = str_field(content, "func_name").unwrap_or("undefined");
    let id = str_field(content, "uuid")
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let (kind, text) = if frame_type(data) == "executed_function" {
        let succeeded = content
            .get("is_exec_success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let mut text = if succeeded {
            format!("Executed function: {func_name}")
        } else {
            format!("Function execution failed: {func_name}")
        };
        if let Some(result) = content.get("content").filter(|v| !v.is_null()) {
            text.push_str(&format!("\nResult: {}", stringify(result)?));
        }
        (MessageKind::ExecutedFunction, text)
    } else {
        let mut text = format!("Executing function: {func_name}");
        if let Some(args) = content.get("arguments").filter(|v| !v.is_null()) {
            text.push_str(&format!("\nArguments: {}", stringify(args)?));
        }
        (MessageKind::ExecuteFunction, text)
    };

    let message = CanonicalMessage::new(id, generate_timestamp(data), kind, text)
        .with_route(string_field(content, "sender"), string_field(content, "recipient"));
    Ok(Some(ProcessingResult::Message(message)))
}

fn stringify(value: &Value) -> Result<String, ProcessError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

fn handle_group_chat_run(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    let Some(content) = content_object(data) else {
        return Ok(None);
    };
    let (Some(speaker), Some(uuid)) = (str_field(content, "speaker"), str_field(content, "uuid")) else {
        return Ok(None);
    };
    let message = system_message(data, uuid.to_string(), format!("Next speaker: {speaker}"))
        .with_route(Some(speaker.to_string()), None);
    Ok(Some(ProcessingResult::Message(message)))
}

fn handle_select_speaker(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    let Some(agents) = content_object(data)
        .and_then(|c| c.get("agents"))
        .and_then(Value::as_array)
    else {
        return Ok(None);
    };

    let header = if frame_type(data) == "select_speaker_invalid_input" {
        "Invalid selection. Please select the next speaker from the following list:"
    } else {
        "Please select the next speaker from the following list:"
    };
    let mut text = header.to_string();
    for (i, agent) in agents.iter().enumerate() {
        text.push_str(&format!("\n{}. {}", i + 1, value_to_text(agent)));
    }

    let message = system_message(data, generate_message_id(data), text);
    Ok(Some(ProcessingResult::Message(message)))
}

fn handle_code_execution_reply(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> HandlerResult {
    let Some(content) = content_object(data) else {
        return Ok(None);
    };
    let (Some(sender), Some(recipient)) = (str_field(content, "sender"), str_field(content, "recipient"))
    else {
        return Ok(None);
    };
    let message = system_message(data, generate_message_id(data), "Generating code execution reply")
        .with_route(Some(sender.to_string()), Some(recipient.to_string()));
    Ok(Some(ProcessingResult::Message(message)))
}
