pub mod normalize;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// The closed set of message kinds a canonical message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    InputRequest,
    Text,
    ToolCall,
    TerminationAndHumanReplyNoInput,
    System,
    ExecuteFunction,
    ExecutedFunction,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::InputRequest => "input_request",
            MessageKind::Text => "text",
            MessageKind::ToolCall => "tool_call",
            MessageKind::TerminationAndHumanReplyNoInput => "termination_and_human_reply_no_input",
            MessageKind::System => "system",
            MessageKind::ExecuteFunction => "execute_function",
            MessageKind::ExecutedFunction => "executed_function",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// Fields the backend attached that we do not interpret (e.g. `detail`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One typed block of message content.
///
/// Blocks we do not model are carried through untouched so the UI can
/// decide how to render them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        /// Annotations such as `cache_control`, passed through as-is.
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    ImageUrl {
        image_url: ImageRef,
    },
    #[serde(untagged)]
    Other(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text {
            text: text.into(),
            extra: Map::new(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CanonicalMessage {
    /// A message with a single text block and no routing fields.
    pub fn new(id: String, timestamp: String, kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            id,
            timestamp,
            kind,
            content: vec![ContentBlock::text(text)],
            sender: None,
            recipient: None,
            request_id: None,
            prompt: None,
            password: None,
            error: None,
        }
    }

    pub fn with_route(mut self, sender: Option<String>, recipient: Option<String>) -> Self {
        self.sender = sender;
        self.recipient = recipient;
        self
    }

    /// First text block, if any. Handy for previews and tests.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub is_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
}

/// The `{ all, users }` roster shape older UI code consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyParticipants {
    pub all: Vec<String>,
    pub users: Vec<String>,
}

pub fn legacy_participants(participants: &[Participant]) -> LegacyParticipants {
    LegacyParticipants {
        all: participants.iter().map(|p| p.name.clone()).collect(),
        users: participants
            .iter()
            .filter(|p| p.is_user)
            .map(|p| p.name.clone())
            .collect(),
    }
}

/// Run timeline snapshot as emitted by the backend at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineData {
    pub timeline: Vec<Value>,
    pub cost_timeline: Vec<Value>,
    pub summary: Value,
    pub metadata: Value,
    pub agents: Vec<Value>,
}

/// Outcome of processing one frame. `None` at the call site means
/// "drop silently".
///
/// Serializes to the shape UI collaborators consume: `{message}`,
/// `{participants}`, `{timeline}` or `{isWorkflowEnd: true, message?}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingResult {
    Message(CanonicalMessage),
    Participants(Vec<Participant>),
    Timeline(TimelineData),
    WorkflowEnd { message: Option<String> },
}

impl Serialize for ProcessingResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ProcessingResult::Message(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("message", message)?;
                map.end()
            }
            ProcessingResult::Participants(participants) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("participants", participants)?;
                map.end()
            }
            ProcessingResult::Timeline(timeline) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("timeline", timeline)?;
                map.end()
            }
            ProcessingResult::WorkflowEnd { message } => {
                let mut map = serializer.serialize_map(Some(1 + usize::from(message.is_some())))?;
                map.serialize_entry("isWorkflowEnd", &true)?;
                if let Some(message) = message {
                    map.serialize_entry("message", message)?;
                }
                map.end()
            }
        }
    }
}

impl ProcessingResult {
    pub fn is_workflow_end(&self) -> bool {
        matches!(self, ProcessingResult::WorkflowEnd { .. })
    }

    pub fn as_message(&self) -> Option<&CanonicalMessage> {
        match self {
            ProcessingResult::Message(m) => Some(m),
            _ => None,
        }
    }
}
