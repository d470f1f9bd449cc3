use serde_json::{Map, Value};

use super::control::Breakpoint;
use super::{ControlInputRequest, StepEvent};
use crate::messages::ProcessingResult;
use crate::messages::normalize::value_to_text;
use crate::processor::{
    DecodedFrame, Handler, MessageProcessor, ProcessContext, ProcessError, RawFrame, decode,
    envelope_type, find_handler,
};

/// Outcome of processing one frame in step-by-step mode.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// The backend paused on (or reported) an event.
    Event(StepEvent),
    Print(String),
    ControlRequest(ControlInputRequest),
    /// Full breakpoint list, replacing what we had.
    Breakpoints(Vec<Breakpoint>),
    BreakpointAdded(Breakpoint),
    BreakpointRemoved(Breakpoint),
    BreakpointsCleared,
    Stats(Value),
    Help(Value),
    Error(String),
    /// A regular chat frame seen while stepping.
    Chat(ProcessingResult),
}

type StepHandlerResult = Result<Option<StepResult>, ProcessError>;

pub fn step_handlers() -> Vec<Handler<StepResult>> {
    vec![
        Handler {
            name: "debug_print",
            can_handle: |t| t == "debug_print",
            handle: handle_print,
        },
        Handler {
            name: "debug_input_request",
            can_handle: |t| t == "debug_input_request",
            handle: handle_input_request,
        },
        Handler {
            name: "debug_event_info",
            can_handle: |t| t == "debug_event_info",
            handle: handle_event_info,
        },
        Handler {
            name: "debug_stats",
            can_handle: |t| t == "debug_stats",
            handle: |data, _| Ok(payload(data, "stats").cloned().map(StepResult::Stats)),
        },
        Handler {
            name: "debug_help",
            can_handle: |t| t == "debug_help",
            handle: |data, _| Ok(payload(data, "help").cloned().map(StepResult::Help)),
        },
        Handler {
            name: "debug_error",
            can_handle: |t| t == "debug_error",
            handle: |data, _| {
                Ok(payload(data, "error")
                    .map(value_to_text)
                    .filter(|s| !s.is_empty())
                    .map(StepResult::Error))
            },
        },
        Handler {
            name: "debug_breakpoints_list",
            can_handle: |t| t == "debug_breakpoints_list",
            handle: handle_breakpoints_list,
        },
        Handler {
            name: "debug_breakpoint_added",
            can_handle: |t| t == "debug_breakpoint_added",
            handle: |data, _| Ok(breakpoint(data).map(StepResult::BreakpointAdded)),
        },
        Handler {
            name: "debug_breakpoint_removed",
            can_handle: |t| t == "debug_breakpoint_removed",
            handle: |data, _| Ok(breakpoint(data).map(StepResult::BreakpointRemoved)),
        },
        Handler {
            name: "debug_breakpoint_cleared",
            can_handle: |t| t == "debug_breakpoint_cleared",
            handle: |_, _| Ok(Some(StepResult::BreakpointsCleared)),
        },
    ]
}

/// `data[key]`, falling back to `content`, ignoring nulls.
fn payload<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    data.get(key)
        .or_else(|| data.get("content"))
        .filter(|v| !v.is_null())
}

fn breakpoint(data: &Map<String, Value>) -> Option<Breakpoint> {
    let value = payload(data, "breakpoint")?;
    serde_json::from_value(value.clone())
        .inspect_err(|e| tracing::debug!(error = %e, "malformed breakpoint"))
        .ok()
}

fn handle_print(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> StepHandlerResult {
    let text = payload(data, "message").map(value_to_text).unwrap_or_default();
    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(StepResult::Print(text)))
}

fn handle_input_request(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> StepHandlerResult {
    let Some(request_id) = data
        .get("request_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
    else {
        return Ok(None);
    };
    let prompt = data
        .get("prompt")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    Ok(Some(StepResult::ControlRequest(ControlInputRequest {
        request_id: request_id.to_string(),
        prompt,
    })))
}

fn handle_event_info(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> StepHandlerResult {
    let Some(event) = payload(data, "event").and_then(Value::as_object) else {
        return Ok(None);
    };
    Ok(Some(StepResult::Event(StepEvent::from_event(event))))
}

fn handle_breakpoints_list(data: &Map<String, Value>, _ctx: &ProcessContext<'_>) -> StepHandlerResult {
    let Some(entries) = payload(data, "breakpoints").and_then(Value::as_array) else {
        return Ok(None);
    };
    let parsed: Result<Vec<Breakpoint>, _> = entries
        .iter()
        .map(|v| serde_json::from_value::<Breakpoint>(v.clone()))
        .collect();
    match parsed {
        Ok(breakpoints) => Ok(Some(StepResult::Breakpoints(breakpoints))),
        Err(e) => {
            tracing::debug!(error = %e, "malformed breakpoint list");
            Ok(None)
        }
    }
}

/// Runs step-control frames through their own registry and everything else
/// through the chat processor.
#[derive(Debug, Clone)]
pub struct StepProcessor {
    chat: MessageProcessor,
    handlers: Vec<Handler<StepResult>>,
}

impl Default for StepProcessor {
    fn default() -> Self {
        Self::new(MessageProcessor::default())
    }
}

impl StepProcessor {
    pub fn new(chat: MessageProcessor) -> Self {
        Self {
            chat,
            handlers: step_handlers(),
        }
    }

    pub fn chat(&self) -> &MessageProcessor {
        &self.chat
    }

    pub fn process(
        &self,
        frame: &RawFrame,
        request_id: Option<&str>,
        image_url: Option<&str>,
    ) -> Option<StepResult> {
        match self.try_process(frame, request_id, image_url) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "step frame processing failed");
                None
            }
        }
    }

    pub fn try_process(
        &self,
        frame: &RawFrame,
        request_id: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<Option<StepResult>, ProcessError> {
        let Some(decoded) = decode(Some(frame)) else {
            return Ok(None);
        };
        let ctx = ProcessContext {
            request_id,
            image_url,
            end_marker: &self.chat.config().workflow_end_marker,
        };

        if let DecodedFrame::Envelope(data) = &decoded {
            let step_handler = envelope_type(data).and_then(|t| find_handler(&self.handlers, t));
            if let Some(handler) = step_handler {
                return match (handler.handle)(data, &ctx)? {
                    Some(StepResult::Print(text)) => self.resolve_print(text, &ctx),
                    other => Ok(other),
                };
            }
        }

        Ok(self.chat.dispatch(&decoded, frame, &ctx)?.map(StepResult::Chat))
    }

    /// Printed text may itself be a chat frame (roster, timeline) or the
    /// end-of-workflow marker.
    fn resolve_print(&self, text: String, ctx: &ProcessContext<'_>) -> Result<Option<StepResult>, ProcessError> {
        let raw = RawFrame::Text(text.clone());
        if let Some(decoded) = decode(Some(&raw)) {
            if let Some(result) = self.chat.dispatch(&decoded, &raw, ctx)? {
                return Ok(Some(StepResult::Chat(result)));
            }
        }
        Ok(Some(StepResult::Print(text)))
    }
}
