pub mod decode;
mod handlers;
mod print;

#[cfg(test)]
mod tests;

use serde_json::{Map, Value};

use crate::messages::{MessageKind, ProcessingResult};
pub use decode::{DecodedFrame, RawFrame, decode};
pub use handlers::default_handlers;

/// Sentinel the backend prints once a workflow has run to completion.
pub const DEFAULT_WORKFLOW_END_MARKER: &str = "<Waldiez> - Workflow finished";

/// Unexpected failures while processing a frame.
///
/// Malformed or unrecognized frames are not errors; they are dropped.
/// These variants indicate a bug in a handler and surface as
/// `PROCESSING_ERROR` state.
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("handler {handler} produced a {kind} message without content")]
    EmptyContent {
        handler: &'static str,
        kind: &'static str,
    },

    #[error("handler {handler} produced an input request without a password flag")]
    MissingPasswordFlag { handler: &'static str },

    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub workflow_end_marker: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workflow_end_marker: DEFAULT_WORKFLOW_END_MARKER.to_string(),
        }
    }
}

/// Caller-supplied context threaded through to handlers.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    /// Id of the input request the caller is currently waiting on.
    pub request_id: Option<&'a str>,
    /// URL substituted into image content blocks.
    pub image_url: Option<&'a str>,
    pub end_marker: &'a str,
}

pub type HandleFn<R = ProcessingResult> =
    fn(&Map<String, Value>, &ProcessContext<'_>) -> Result<Option<R>, ProcessError>;

/// One registry entry: a predicate over the frame type and its transform.
pub struct Handler<R = ProcessingResult> {
    pub name: &'static str,
    pub can_handle: fn(&str) -> bool,
    pub handle: HandleFn<R>,
}

impl<R> Clone for Handler<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Handler<R> {}

impl<R> std::fmt::Debug for Handler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

/// First handler in `handlers` that accepts `frame_type`.
pub fn find_handler<'h, R>(handlers: &'h [Handler<R>], frame_type: &str) -> Option<&'h Handler<R>> {
    handlers.iter().find(|h| (h.can_handle)(frame_type))
}

/// Classifies decoded frames and routes each to the first matching handler.
#[derive(Debug, Clone)]
pub struct MessageProcessor {
    handlers: Vec<Handler>,
    config: ProcessorConfig,
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new(ProcessorConfig::default())
    }
}

impl MessageProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self::with_handlers(config, default_handlers())
    }

    pub fn with_handlers(config: ProcessorConfig, handlers: Vec<Handler>) -> Self {
        Self { handlers, config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Process one frame, swallowing unexpected failures (they are logged).
    pub fn process(
        &self,
        frame: &RawFrame,
        request_id: Option<&str>,
        image_url: Option<&str>,
    ) -> Option<ProcessingResult> {
        match self.try_process(frame, request_id, image_url) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "frame processing failed");
                None
            }
        }
    }

    pub fn try_process(
        &self,
        frame: &RawFrame,
        request_id: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<Option<ProcessingResult>, ProcessError> {
        let Some(decoded) = decode(Some(frame)) else {
            return Ok(None);
        };
        let ctx = ProcessContext {
            request_id,
            image_url,
            end_marker: &self.config.workflow_end_marker,
        };
        self.dispatch(&decoded, frame, &ctx)
    }

    /// Route an already-decoded frame.
    pub fn dispatch(
        &self,
        decoded: &DecodedFrame,
        original: &RawFrame,
        ctx: &ProcessContext<'_>,
    ) -> Result<Option<ProcessingResult>, ProcessError> {
        let data = match decoded {
            DecodedFrame::PlainText(text) => {
                if text.contains(ctx.end_marker) {
                    return Ok(Some(ProcessingResult::WorkflowEnd {
                        message: Some(original.original_text()),
                    }));
                }
                tracing::debug!("dropping non-JSON frame");
                return Ok(None);
            }
            DecodedFrame::Envelope(data) => data,
        };

        let Some(frame_type) = envelope_type(data) else {
            tracing::debug!("dropping frame without a type");
            return Ok(None);
        };

        let Some(handler) = find_handler(&self.handlers, frame_type) else {
            tracing::debug!(frame_type, "no handler for frame type");
            return Ok(None);
        };

        let result = (handler.handle)(data, ctx)?;
        if result.is_none() {
            tracing::debug!(frame_type, handler = handler.name, "handler rejected frame");
        }
        if let Some(ProcessingResult::Message(message)) = &result {
            check_message(handler.name, message)?;
        }
        Ok(result)
    }
}

/// The frame's `type`, or `participants` for a bare roster object.
pub fn envelope_type(data: &Map<String, Value>) -> Option<&str> {
    match data.get("type").and_then(Value::as_str) {
        Some(t) => Some(t),
        None if data.get("participants").is_some_and(Value::is_array) => Some("participants"),
        None => None,
    }
}

fn check_message(
    handler: &'static str,
    message: &crate::messages::CanonicalMessage,
) -> Result<(), ProcessError> {
    if message.content.is_empty() {
        return Err(ProcessError::EmptyContent {
            handler,
            kind: message.kind.as_str(),
        });
    }
    if message.kind == MessageKind::InputRequest && message.password.is_none() {
        return Err(ProcessError::MissingPasswordFlag { handler });
    }
    Ok(())
}
