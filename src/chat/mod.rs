pub mod dedup;

use serde::{Deserialize, Serialize};

use crate::messages::{CanonicalMessage, MessageKind, Participant, ProcessingResult, TimelineData};
use dedup::{DedupCache, message_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A frame could not be processed because of a processor bug.
    ProcessingError,
    /// The transport feeding frames failed.
    ConnectionError,
    /// The backend reported an error while stepping through a run.
    StepError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatError {
    pub code: ErrorCode,
    pub message: String,
}

impl ChatError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ProcessingError,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ConnectionError,
            message: message.into(),
        }
    }
}

/// The one input request the UI is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRequest {
    pub request_id: String,
    pub prompt: String,
    pub password: bool,
}

impl ActiveRequest {
    pub fn from_message(message: &CanonicalMessage) -> Option<Self> {
        if message.kind != MessageKind::InputRequest {
            return None;
        }
        Some(Self {
            request_id: message.request_id.clone().unwrap_or_else(|| message.id.clone()),
            prompt: message
                .prompt
                .clone()
                .or_else(|| message.first_text().map(String::from))
                .unwrap_or_default(),
            password: message.password.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatState {
    pub messages: Vec<CanonicalMessage>,
    pub active_request: Option<ActiveRequest>,
    pub participants: Vec<Participant>,
    pub timeline: Option<TimelineData>,
    pub error: Option<ChatError>,
    pub active: bool,
    pub show: bool,
    #[serde(skip)]
    dedup: DedupCache,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(dedup::DEFAULT_DEDUP_CAPACITY)
    }
}

impl ChatState {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            messages: Vec::new(),
            active_request: None,
            participants: Vec::new(),
            timeline: None,
            error: None,
            active: false,
            show: false,
            dedup: DedupCache::new(dedup_capacity),
        }
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }
}

#[derive(Debug, Clone)]
pub enum ChatAction {
    SetActive(bool),
    SetShow(bool),
    /// Replaces any pending request.
    SetActiveRequest(Option<ActiveRequest>),
    SetError(Option<ChatError>),
    SetTimeline(Option<TimelineData>),
    /// Replaces the whole roster.
    SetParticipants(Vec<Participant>),
    AddMessage(CanonicalMessage),
    RemoveMessage(String),
    ClearMessages,
    Reset,
}

pub fn reduce(state: &mut ChatState, action: ChatAction) {
    match action {
        ChatAction::SetActive(active) => state.active = active,
        ChatAction::SetShow(show) => state.show = show,
        ChatAction::SetActiveRequest(request) => {
            if let (Some(old), Some(new)) = (&state.active_request, &request) {
                if old.request_id != new.request_id {
                    tracing::debug!(
                        superseded = %old.request_id,
                        request_id = %new.request_id,
                        "input request superseded"
                    );
                }
            }
            state.active_request = request;
        }
        ChatAction::SetError(error) => state.error = error,
        ChatAction::SetTimeline(timeline) => state.timeline = timeline,
        ChatAction::SetParticipants(participants) => state.participants = participants,
        ChatAction::AddMessage(message) => {
            if state.dedup.insert(message_key(&message)) {
                state.messages.push(message);
            } else {
                tracing::debug!(id = %message.id, "duplicate message dropped");
            }
        }
        ChatAction::RemoveMessage(id) => {
            let dedup = &mut state.dedup;
            state.messages.retain(|m| {
                if m.id == id {
                    dedup.remove(&message_key(m));
                    false
                } else {
                    true
                }
            });
        }
        ChatAction::ClearMessages => {
            state.messages.clear();
            state.dedup.clear();
        }
        ChatAction::Reset => {
            *state = ChatState::new(state.dedup.capacity());
        }
    }
}

/// Fold one processing result into chat state. Ignored once the session is
/// no longer active.
pub fn fold_result(state: &mut ChatState, result: ProcessingResult) {
    if !state.active {
        tracing::debug!("session inactive, result ignored");
        return;
    }
    match result {
        ProcessingResult::Message(message) => {
            if let Some(request) = ActiveRequest::from_message(&message) {
                reduce(state, ChatAction::SetActiveRequest(Some(request)));
            }
            reduce(state, ChatAction::AddMessage(message));
        }
        ProcessingResult::Participants(participants) => {
            reduce(state, ChatAction::SetParticipants(participants));
        }
        ProcessingResult::Timeline(timeline) => {
            reduce(state, ChatAction::SetTimeline(Some(timeline)));
        }
        ProcessingResult::WorkflowEnd { .. } => {
            tracing::info!(messages = state.messages.len(), "workflow finished");
            reduce(state, ChatAction::SetActiveRequest(None));
            reduce(state, ChatAction::SetActive(false));
        }
    }
}
