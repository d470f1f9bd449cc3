use serde_json::{Value, json};

use super::*;
use crate::messages::normalize::START_CONVERSATION_PROMPT;
use crate::messages::{CanonicalMessage, ContentBlock, Participant};

fn processor() -> MessageProcessor {
    MessageProcessor::default()
}

fn run(frame: &str) -> Option<ProcessingResult> {
    processor().process(&RawFrame::from(frame), None, None)
}

fn run_value(frame: Value) -> Option<ProcessingResult> {
    processor().process(&RawFrame::from(frame), None, None)
}

fn message(result: Option<ProcessingResult>) -> CanonicalMessage {
    match result {
        Some(ProcessingResult::Message(m)) => m,
        other => panic!("expected message, got {other:?}"),
    }
}

fn participants(result: Option<ProcessingResult>) -> Vec<Participant> {
    match result {
        Some(ProcessingResult::Participants(p)) => p,
        other => panic!("expected participants, got {other:?}"),
    }
}

// --- Input requests ---

#[test]
fn test_input_request_with_context() {
    let frame = r#"{"type":"input_request","request_id":"req-123","prompt":"Enter your input:"}"#;
    let msg = message(processor().process(&RawFrame::from(frame), Some("current-req"), None));
    assert_eq!(msg.id, "req-123");
    assert_eq!(msg.request_id.as_deref(), Some("current-req"));
    assert_eq!(msg.content, vec![ContentBlock::text("Enter your input:")]);
    assert_eq!(msg.password, Some(false));
    assert_eq!(msg.kind, MessageKind::InputRequest);
}

#[test]
fn test_input_request_without_context_uses_own_id() {
    let msg = message(run(r#"{"type":"input_request","request_id":"req-9","prompt":"Name?"}"#));
    assert_eq!(msg.request_id.as_deref(), Some("req-9"));
}

#[test]
fn test_input_request_chevron_prompt() {
    let msg = message(run(r#"{"type":"input_request","request_id":"req-123","prompt":">"}"#));
    assert_eq!(msg.first_text(), Some(START_CONVERSATION_PROMPT));
    assert_eq!(msg.prompt.as_deref(), Some(START_CONVERSATION_PROMPT));
}

#[test]
fn test_input_request_password_always_boolean() {
    for (password, expected) in [
        (json!(true), true),
        (json!("True"), true),
        (json!("false"), false),
        (json!(null), false),
        (json!(3), false),
    ] {
        let frame = json!({"type": "input_request", "request_id": "r", "prompt": "pw:", "password": password});
        assert_eq!(message(run_value(frame)).password, Some(expected));
    }
    let msg = message(run(r#"{"type":"input_request","request_id":"r","prompt":"x"}"#));
    assert_eq!(msg.password, Some(false));
}

#[test]
fn test_input_request_rejects_bad_shape() {
    assert!(run(r#"{"type":"input_request","request_id":"","prompt":"x"}"#).is_none());
    assert!(run(r#"{"type":"input_request","prompt":"x"}"#).is_none());
    assert!(run(r#"{"type":"input_request","request_id":"r","prompt":5}"#).is_none());
}

#[test]
fn test_invalid_input_dropped() {
    assert!(run(r#"{"type":"input_request_invalid_input","request_id":"r","prompt":"x"}"#).is_none());
}

// --- Dispatch ---

#[test]
fn test_unknown_types_dropped() {
    assert!(run(r#"{"type":"mystery","content":{"content":"hi"}}"#).is_none());
    assert!(run(r#"{"content":{"content":"hi"}}"#).is_none());
    assert!(run("").is_none());
    assert!(run("null").is_none());
}

#[test]
fn test_first_matching_handler_wins() {
    let first: Handler = Handler {
        name: "first",
        can_handle: |t| t == "text",
        handle: |_, _| Ok(Some(ProcessingResult::WorkflowEnd { message: Some("first".into()) })),
    };
    let mut handlers = vec![first];
    handlers.extend(default_handlers());
    let p = MessageProcessor::with_handlers(ProcessorConfig::default(), handlers);
    let result = p.process(&RawFrame::from(r#"{"type":"text","content":{"content":"x"}}"#), None, None);
    assert_eq!(result, Some(ProcessingResult::WorkflowEnd { message: Some("first".into()) }));
}

#[test]
fn test_registry_order_is_stable() {
    let names: Vec<&str> = default_handlers().iter().map(|h| h.name).collect();
    assert_eq!(names.first(), Some(&"input_request"));
    assert_eq!(names.last(), Some(&"generate_code_execution_reply"));
}

#[test]
fn test_handler_bug_surfaces_as_error() {
    let broken: Handler = Handler {
        name: "broken",
        can_handle: |t| t == "text",
        handle: |_, _| {
            let mut m = CanonicalMessage::new("x".into(), "t".into(), MessageKind::Text, "");
            m.content.clear();
            Ok(Some(ProcessingResult::Message(m)))
        },
    };
    let p = MessageProcessor::with_handlers(ProcessorConfig::default(), vec![broken]);
    let frame = RawFrame::from(r#"{"type":"text"}"#);
    let err = p.try_process(&frame, None, None).unwrap_err();
    assert!(matches!(err, ProcessError::EmptyContent { handler: "broken", .. }));
    assert!(p.process(&frame, None, None).is_none());
}

// --- Workflow end ---

#[test]
fn test_raw_end_marker() {
    let raw = format!("{DEFAULT_WORKFLOW_END_MARKER} successfully");
    assert_eq!(
        run(&raw),
        Some(ProcessingResult::WorkflowEnd { message: Some(raw.clone()) })
    );
    assert_eq!(
        serde_json::to_value(run(&raw)).unwrap(),
        json!({"isWorkflowEnd": true, "message": raw})
    );
}

#[test]
fn test_raw_text_without_marker_dropped() {
    assert!(run("just some log line").is_none());
}

#[test]
fn test_print_end_marker() {
    let frame = json!({"type": "print", "content": {"data": format!("{DEFAULT_WORKFLOW_END_MARKER}!")}});
    assert_eq!(run_value(frame), Some(ProcessingResult::WorkflowEnd { message: None }));
    let frame = json!({"type": "print", "content": {"data": {"message": DEFAULT_WORKFLOW_END_MARKER}}});
    assert!(run_value(frame).unwrap().is_workflow_end());
}

#[test]
fn test_custom_end_marker() {
    let p = MessageProcessor::new(ProcessorConfig {
        workflow_end_marker: "ALL DONE".into(),
    });
    let result = p.process(&RawFrame::from("ALL DONE\n"), None, None);
    assert!(result.unwrap().is_workflow_end());
}

// --- Participants ---

#[test]
fn test_double_encoded_participants() {
    let frame = r#"{"type":"print","content":{"data":"{\"participants\":[{\"name\":\"u\",\"humanInputMode\":\"ALWAYS\"}]}"}}"#;
    let roster = participants(run(frame));
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].name, "u");
    assert!(roster[0].is_user);
}

#[test]
fn test_triple_encoded_participants() {
    let inner = json!({"participants": [{"name": "a"}]}).to_string();
    let frame = json!({"type": "print", "content": {"data": serde_json::to_string(&inner).unwrap()}});
    assert_eq!(participants(run_value(frame))[0].name, "a");
}

#[test]
fn test_participants_in_top_level_data() {
    let frame = json!({"type": "print", "data": {"participants": [{"name": "a", "humanInputMode": "NEVER"}]}});
    let roster = participants(run_value(frame));
    assert!(!roster[0].is_user);
}

#[test]
fn test_bare_participants_object() {
    let roster = participants(run(r#"{"participants":[{"name":"x"},{"name":"y","humanInputMode":"ALWAYS"}]}"#));
    assert_eq!(roster.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), vec!["x", "y"]);
}

#[test]
fn test_participants_missing_name_rejected() {
    let frame = r#"{"type":"print","content":{"data":"{\"participants\":[{\"humanInputMode\":\"ALWAYS\"}]}"}}"#;
    assert!(run(frame).is_none());
}

// --- Timeline ---

fn timeline_content() -> Value {
    json!({
        "timeline": [{"id": "s1"}],
        "cost_timeline": [{"cost": 0.1}],
        "summary": {"total_sessions": 1},
        "metadata": {"cost_max": 0.1},
        "agents": [{"name": "a"}]
    })
}

#[test]
fn test_print_timeline() {
    let frame = json!({"type": "print", "data": {"type": "timeline", "content": timeline_content()}});
    match run_value(frame) {
        Some(ProcessingResult::Timeline(t)) => {
            assert_eq!(t.timeline.len(), 1);
            assert_eq!(t.summary["total_sessions"], 1);
        }
        other => panic!("expected timeline, got {other:?}"),
    }
}

#[test]
fn test_print_timeline_as_string() {
    let payload = json!({"type": "timeline", "content": timeline_content()}).to_string();
    let frame = json!({"type": "print", "content": {"data": payload}});
    assert!(matches!(run_value(frame), Some(ProcessingResult::Timeline(_))));
}

#[test]
fn test_direct_timeline() {
    let frame = json!({"type": "timeline", "content": timeline_content()});
    assert!(matches!(run_value(frame), Some(ProcessingResult::Timeline(_))));
}

#[test]
fn test_timeline_missing_fields_dropped() {
    let mut content = timeline_content();
    content["summary"] = Value::Null;
    let frame = json!({"type": "print", "data": {"type": "timeline", "content": content}});
    assert!(run_value(frame).is_none());

    let mut content = timeline_content();
    content.as_object_mut().unwrap().remove("agents");
    assert!(run_value(json!({"type": "timeline", "content": content})).is_none());
}

// --- Text-like ---

#[test]
fn test_text_message() {
    let frame = json!({
        "type": "text",
        "content": {"uuid": "u-1", "content": "hello", "sender": "assistant", "recipient": "user"}
    });
    let msg = message(run_value(frame));
    assert_eq!(msg.id, "u-1");
    assert_eq!(msg.kind, MessageKind::Text);
    assert_eq!(msg.first_text(), Some("hello"));
    assert_eq!(msg.sender.as_deref(), Some("assistant"));
    assert_eq!(msg.recipient.as_deref(), Some("user"));
}

#[test]
fn test_tool_call_and_termination_reply_kinds() {
    let msg = message(run(r#"{"type":"tool_call","content":{"content":"call x"}}"#));
    assert_eq!(msg.kind, MessageKind::ToolCall);
    let msg = message(run(r#"{"type":"termination_and_human_reply_no_input","content":{"content":"bye"}}"#));
    assert_eq!(msg.kind, MessageKind::TerminationAndHumanReplyNoInput);
}

#[test]
fn test_text_requires_inner_content() {
    assert!(run(r#"{"type":"text","content":{"sender":"a"}}"#).is_none());
    assert!(run(r#"{"type":"text","content":{"content":[]}}"#).is_none());
    assert!(run(r#"{"type":"text"}"#).is_none());
}

#[test]
fn test_text_image_url_substitution() {
    let frame = json!({
        "type": "text",
        "content": {"content": [
            {"type": "text", "text": "see"},
            {"type": "image_url", "image_url": {"url": "local.png", "alt": "chart", "detail": "auto"}}
        ]}
    });
    let msg = message(processor().process(&RawFrame::from(frame), None, Some("https://cdn/x.png")));
    assert_eq!(
        serde_json::to_value(&msg.content).unwrap(),
        json!([
            {"type": "text", "text": "see"},
            {"type": "image_url", "image_url": {"url": "https://cdn/x.png", "alt": "chart"}}
        ])
    );
}

#[test]
fn test_ansi_wrapped_text_frame() {
    let frame = "\x1b[1m{\"type\":\"text\",\"content\":{\"content\":\"bold\"}}\x1b[0m\n";
    assert_eq!(message(run(frame)).first_text(), Some("bold"));
}

// --- System messages ---

#[test]
fn test_using_auto_reply() {
    let msg = message(run(r#"{"type":"using_auto_reply","content":{"uuid":"ar-1"}}"#));
    assert_eq!(msg.id, "ar-1");
    assert_eq!(msg.kind, MessageKind::System);
    assert_eq!(msg.first_text(), Some("Using auto reply"));
    let msg = message(run(r#"{"type":"using_auto_reply"}"#));
    assert!(!msg.id.is_empty());
}

#[test]
fn test_termination_reasons() {
    let msg = message(run(r#"{"type":"termination","content":{"termination_reason":"max turns"}}"#));
    assert_eq!(msg.first_text(), Some("max turns"));
    let msg = message(run(r#"{"type":"termination","termination_reason":"done"}"#));
    assert_eq!(msg.first_text(), Some("done"));
    assert!(run(r#"{"type":"termination","content":{}}"#).is_none());
}

#[test]
fn test_error_frame() {
    let frame = json!({
        "type": "error",
        "content": {"uuid": "e-1", "error": "boom", "sender": "a", "recipient": "b"}
    });
    let msg = message(run_value(frame));
    assert_eq!(msg.id, "e-1");
    assert_eq!(msg.kind, MessageKind::System);
    assert_eq!(msg.first_text(), Some("Error: boom"));
    assert_eq!(msg.error.as_deref(), Some("boom"));
}

#[test]
fn test_error_frame_missing_fields() {
    assert!(run(r#"{"type":"error","content":{}}"#).is_none());
    assert!(run(r#"{"type":"error","content":{"uuid":"e","error":"x","sender":"a"}}"#).is_none());
}

#[test]
fn test_execute_function() {
    let frame = json!({
        "type": "execute_function",
        "content": {"uuid": "f-1", "func_name": "search", "arguments": {"q": "rust"}, "recipient": "a"}
    });
    let msg = message(run_value(frame));
    assert_eq!(msg.id, "f-1");
    assert_eq!(msg.kind, MessageKind::ExecuteFunction);
    assert_eq!(msg.first_text(), Some("Executing function: search\nArguments: {\"q\":\"rust\"}"));
}

#[test]
fn test_execute_function_without_name() {
    let msg = message(run(r#"{"type":"execute_function","content":{}}"#));
    assert_eq!(msg.first_text(), Some("Executing function: undefined"));
    assert!(!msg.id.is_empty());
}

#[test]
fn test_executed_function() {
    let frame = json!({
        "type": "executed_function",
        "content": {"func_name": "search", "content": "3 hits", "is_exec_success": true}
    });
    let msg = message(run_value(frame));
    assert_eq!(msg.kind, MessageKind::ExecutedFunction);
    assert_eq!(msg.first_text(), Some("Executed function: search\nResult: 3 hits"));

    let frame = json!({"type": "executed_function", "content": {"func_name": "f", "is_exec_success": false}});
    assert_eq!(message(run_value(frame)).first_text(), Some("Function execution failed: f"));
}

#[test]
fn test_group_chat_run() {
    let msg = message(run(r#"{"type":"group_chat_run_chat","content":{"uuid":"g-1","speaker":"critic"}}"#));
    assert_eq!(msg.id, "g-1");
    assert_eq!(msg.first_text(), Some("Next speaker: critic"));
    assert!(run(r#"{"type":"group_chat_run_chat","content":{"speaker":"critic"}}"#).is_none());
}

#[test]
fn test_select_speaker_listing() {
    let msg = message(run(r#"{"type":"select_speaker","content":{"agents":["a","b"]}}"#));
    assert_eq!(
        msg.first_text(),
        Some("Please select the next speaker from the following list:\n1. a\n2. b")
    );
    let msg = message(run(r#"{"type":"select_speaker_invalid_input","content":{"agents":["a"]}}"#));
    assert!(msg.first_text().unwrap().starts_with("Invalid selection."));
    assert!(run(r#"{"type":"select_speaker","content":{}}"#).is_none());
}

#[test]
fn test_code_execution_reply() {
    let msg = message(run(
        r#"{"type":"generate_code_execution_reply","content":{"sender":"a","recipient":"b"}}"#,
    ));
    assert_eq!(msg.first_text(), Some("Generating code execution reply"));
    assert_eq!(msg.sender.as_deref(), Some("a"));
    assert!(run(r#"{"type":"generate_code_execution_reply","content":{"sender":"a"}}"#).is_none());
}
