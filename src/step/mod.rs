pub mod control;
pub mod processor;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::dedup::{DedupCache, compose_key, fingerprint};
use crate::chat::{ActiveRequest, ChatError, ErrorCode};
use crate::messages::normalize::{generate_message_id, generate_timestamp, truncate_markdown, value_to_text};
use crate::messages::{CanonicalMessage, Participant, ProcessingResult, TimelineData};
use crate::responses::ControlResponse;
use control::{Breakpoint, ControlCommand};
pub use processor::{StepProcessor, StepResult};

/// Longest event summary kept in history.
const SUMMARY_CHARS: usize = 200;

/// One entry in the step-by-step event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub summary: String,
    pub data: Value,
}

impl StepEvent {
    /// Build from the `event` object of a `debug_event_info` frame.
    pub fn from_event(event: &Map<String, Value>) -> Self {
        let content = event.get("content");
        let routed = content.and_then(Value::as_object).unwrap_or(event);
        let route = |key: &str| {
            routed
                .get(key)
                .or_else(|| event.get(key))
                .and_then(Value::as_str)
                .map(String::from)
        };
        let body = match content {
            Some(Value::Object(c)) => c.get("content").map(value_to_text).unwrap_or_default(),
            Some(other) => value_to_text(other),
            None => String::new(),
        };
        Self {
            id: generate_message_id(event),
            timestamp: generate_timestamp(event),
            event_type: event
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            sender: route("sender"),
            recipient: route("recipient"),
            summary: truncate_markdown(&body, SUMMARY_CHARS),
            data: Value::Object(event.clone()),
        }
    }

    pub fn from_message(message: &CanonicalMessage) -> Self {
        let body = message
            .content
            .iter()
            .filter_map(|b| b.as_text())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            id: message.id.clone(),
            timestamp: message.timestamp.clone(),
            event_type: message.kind.as_str().to_string(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            summary: truncate_markdown(&body, SUMMARY_CHARS),
            data: serde_json::to_value(message).unwrap_or_default(),
        }
    }

    /// Free text the backend printed while paused.
    pub fn print(text: &str) -> Self {
        let mut data = Map::new();
        data.insert("type".into(), Value::from("debug_print"));
        data.insert("content".into(), Value::from(text));
        Self {
            id: generate_message_id(&Map::new()),
            timestamp: generate_timestamp(&Map::new()),
            event_type: "debug_print".to_string(),
            sender: None,
            recipient: None,
            summary: truncate_markdown(text, SUMMARY_CHARS),
            data: Value::Object(data),
        }
    }

    pub fn dedup_key(&self) -> String {
        compose_key(
            &self.id,
            self.sender.as_deref(),
            self.recipient.as_deref(),
            fingerprint(&self.summary),
        )
    }
}

/// A pending `debug_input_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlInputRequest {
    pub request_id: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
    pub active: bool,
    pub show: bool,
    pub done: bool,
    pub active_request: Option<ActiveRequest>,
    pub participants: Vec<Participant>,
    pub timeline: Option<TimelineData>,
    pub error: Option<ChatError>,
    pub breakpoints: Vec<Breakpoint>,
    pub event_history: Vec<StepEvent>,
    /// Id of the event the backend is paused on.
    pub current_event: Option<String>,
    pub pending_control_input: Option<ControlInputRequest>,
    pub auto_continue: bool,
    pub stats: Option<Value>,
    pub help: Option<Value>,
    #[serde(skip)]
    dedup: DedupCache,
}

impl Default for StepState {
    fn default() -> Self {
        Self::new(crate::chat::dedup::DEFAULT_DEDUP_CAPACITY)
    }
}

impl StepState {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            active: false,
            show: false,
            done: false,
            active_request: None,
            participants: Vec::new(),
            timeline: None,
            error: None,
            breakpoints: Vec::new(),
            event_history: Vec::new(),
            current_event: None,
            pending_control_input: None,
            auto_continue: false,
            stats: None,
            help: None,
            dedup: DedupCache::new(dedup_capacity),
        }
    }

    pub fn current_event(&self) -> Option<&StepEvent> {
        let id = self.current_event.as_deref()?;
        self.event_history.iter().rev().find(|e| e.id == id)
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }
}

#[derive(Debug, Clone)]
pub enum StepAction {
    SetActive(bool),
    SetShow(bool),
    SetActiveRequest(Option<ActiveRequest>),
    SetError(Option<ChatError>),
    SetTimeline(Option<TimelineData>),
    SetParticipants(Vec<Participant>),
    AddEvent(StepEvent),
    AddEvents(Vec<StepEvent>),
    RemoveEvent(String),
    ClearEvents,
    SetCurrentEvent(Option<String>),
    SetPendingControlInput(Option<ControlInputRequest>),
    SetBreakpoints(Vec<Breakpoint>),
    SetAutoContinue(bool),
    SetStats(Option<Value>),
    SetHelp(Option<Value>),
    /// Terminal: the workflow finished.
    Done,
    Reset,
}

pub fn reduce(state: &mut StepState, action: StepAction) {
    // Errors stay visible after the run ends.
    if state.done && !matches!(action, StepAction::Reset | StepAction::SetShow(_) | StepAction::SetError(_)) {
        tracing::debug!(?action, "step session done, action ignored");
        return;
    }
    match action {
        StepAction::SetActive(active) => state.active = active,
        StepAction::SetShow(show) => state.show = show,
        StepAction::SetActiveRequest(request) => state.active_request = request,
        StepAction::SetError(error) => state.error = error,
        StepAction::SetTimeline(timeline) => state.timeline = timeline,
        StepAction::SetParticipants(participants) => state.participants = participants,
        StepAction::AddEvent(event) => add_event(state, event),
        StepAction::AddEvents(events) => {
            for event in events {
                add_event(state, event);
            }
        }
        StepAction::RemoveEvent(id) => {
            let dedup = &mut state.dedup;
            state.event_history.retain(|e| {
                if e.id == id {
                    dedup.remove(&e.dedup_key());
                    false
                } else {
                    true
                }
            });
            if state.current_event.as_deref() == Some(id.as_str()) {
                state.current_event = None;
            }
        }
        StepAction::ClearEvents => {
            state.event_history.clear();
            state.dedup.clear();
            state.current_event = None;
        }
        StepAction::SetCurrentEvent(id) => state.current_event = id,
        StepAction::SetPendingControlInput(request) => state.pending_control_input = request,
        StepAction::SetBreakpoints(breakpoints) => state.breakpoints = breakpoints,
        StepAction::SetAutoContinue(auto) => state.auto_continue = auto,
        StepAction::SetStats(stats) => state.stats = stats,
        StepAction::SetHelp(help) => state.help = help,
        StepAction::Done => {
            state.done = true;
            state.active = false;
            state.active_request = None;
            state.pending_control_input = None;
        }
        StepAction::Reset => {
            *state = StepState::new(state.dedup.capacity());
        }
    }
}

fn add_event(state: &mut StepState, event: StepEvent) {
    if state.dedup.insert(event.dedup_key()) {
        state.event_history.push(event);
    } else {
        tracing::debug!(id = %event.id, "duplicate event dropped");
    }
}

/// Fold a step result into state. Returns the control response to send when
/// auto-continue answers a control request on the user's behalf.
pub fn fold_step_result(state: &mut StepState, result: StepResult) -> Option<ControlResponse> {
    if !state.active || state.done {
        tracing::debug!("step session inactive, result ignored");
        return None;
    }
    match result {
        StepResult::Event(event) => {
            let id = event.id.clone();
            reduce(state, StepAction::AddEvent(event));
            reduce(state, StepAction::SetCurrentEvent(Some(id)));
        }
        StepResult::Print(text) => reduce(state, StepAction::AddEvent(StepEvent::print(&text))),
        StepResult::ControlRequest(request) => {
            if state.auto_continue {
                tracing::debug!(request_id = %request.request_id, "auto-continuing");
                reduce(state, StepAction::SetPendingControlInput(None));
                return Some(ControlResponse::new(
                    request.request_id,
                    ControlCommand::Continue.as_input(),
                ));
            }
            reduce(state, StepAction::SetPendingControlInput(Some(request)));
        }
        StepResult::Breakpoints(breakpoints) => reduce(state, StepAction::SetBreakpoints(breakpoints)),
        StepResult::BreakpointAdded(breakpoint) => {
            let mut breakpoints = state.breakpoints.clone();
            if !breakpoints.iter().any(|b| b.same_as(&breakpoint)) {
                breakpoints.push(breakpoint);
            }
            reduce(state, StepAction::SetBreakpoints(breakpoints));
        }
        StepResult::BreakpointRemoved(breakpoint) => {
            let mut breakpoints = state.breakpoints.clone();
            breakpoints.retain(|b| !b.same_as(&breakpoint));
            reduce(state, StepAction::SetBreakpoints(breakpoints));
        }
        StepResult::BreakpointsCleared => reduce(state, StepAction::SetBreakpoints(Vec::new())),
        StepResult::Stats(stats) => reduce(state, StepAction::SetStats(Some(stats))),
        StepResult::Help(help) => reduce(state, StepAction::SetHelp(Some(help))),
        StepResult::Error(message) => reduce(
            state,
            StepAction::SetError(Some(ChatError {
                code: ErrorCode::StepError,
                message,
            })),
        ),
        StepResult::Chat(result) => fold_chat_result(state, result),
    }
    None
}

fn fold_chat_result(state: &mut StepState, result: ProcessingResult) {
    match result {
        ProcessingResult::Message(message) => {
            if let Some(request) = ActiveRequest::from_message(&message) {
                reduce(state, StepAction::SetActiveRequest(Some(request)));
            }
            reduce(state, StepAction::AddEvent(StepEvent::from_message(&message)));
        }
        ProcessingResult::Participants(participants) => {
            reduce(state, StepAction::SetParticipants(participants));
        }
        ProcessingResult::Timeline(timeline) => {
            reduce(state, StepAction::SetTimeline(Some(timeline)));
        }
        ProcessingResult::WorkflowEnd { .. } => {
            tracing::info!(events = state.event_history.len(), "step-by-step run finished");
            reduce(state, StepAction::Done);
        }
    }
}
