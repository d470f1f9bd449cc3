//! Payloads sent back to the backend. Delivery is the transport's job.

use serde::Serialize;

use crate::chat::ActiveRequest;

/// Reply to an `input_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_id: String,
    pub data: String,
}

impl InputResponse {
    pub fn new(request: &ActiveRequest, data: impl Into<String>) -> Self {
        Self {
            kind: "input_response",
            request_id: request.request_id.clone(),
            data: data.into(),
        }
    }
}

/// Reply to a `debug_input_request` while stepping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_id: String,
    pub data: String,
}

impl ControlResponse {
    pub fn new(request_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: "debug_input_response",
            request_id: request_id.into(),
            data: data.into(),
        }
    }
}

/// Anything a session asks the transport to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Input(InputResponse),
    Control(ControlResponse),
}

impl From<InputResponse> for Outbound {
    fn from(response: InputResponse) -> Self {
        Outbound::Input(response)
    }
}

impl From<ControlResponse> for Outbound {
    fn from(response: ControlResponse) -> Self {
        Outbound::Control(response)
    }
}
