//! Owns one run's state and feeds it frames, user replies and transport
//! failures. A session can be driven directly or moved into a tokio task that
//! serializes all access to it.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::chat::{self, ChatAction, ChatError, ChatState, ErrorCode};
use crate::config::Config;
use crate::processor::{MessageProcessor, RawFrame};
use crate::responses::{ControlResponse, InputResponse, Outbound};
use crate::step::control::ControlCommand;
use crate::step::{self, StepAction, StepProcessor, StepState};

const SNAPSHOT_CAPACITY: usize = 256;

pub trait Session: Send + 'static {
    type Snapshot: Clone + Send + 'static;

    /// Begin a fresh run.
    fn start(&mut self);
    fn handle_frame(&mut self, frame: &RawFrame) -> Option<Outbound>;
    fn connection_error(&mut self, message: &str);
    /// The user's reply to whatever request is pending.
    fn respond(&mut self, text: &str) -> Option<Outbound>;
    fn reset(&mut self);
    fn snapshot(&self) -> Self::Snapshot;
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    processor: MessageProcessor,
    state: ChatState,
    image_url: Option<String>,
    request_context: Option<String>,
}

impl ChatSession {
    pub fn new(config: &Config) -> Self {
        Self::with_processor(
            MessageProcessor::new(config.processor_config()),
            config.dedup_capacity,
            config.image_url.clone(),
        )
    }

    pub fn with_processor(processor: MessageProcessor, dedup_capacity: usize, image_url: Option<String>) -> Self {
        Self {
            processor,
            state: ChatState::new(dedup_capacity),
            image_url,
            request_context: None,
        }
    }

    /// Request id the host is tracking; stamped onto incoming input requests.
    pub fn with_request_context(mut self, request_id: Option<String>) -> Self {
        self.request_context = request_id;
        self
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn dispatch(&mut self, action: ChatAction) {
        chat::reduce(&mut self.state, action);
    }
}

impl Session for ChatSession {
    type Snapshot = ChatState;

    fn start(&mut self) {
        self.dispatch(ChatAction::Reset);
        self.dispatch(ChatAction::SetActive(true));
        self.dispatch(ChatAction::SetShow(true));
        tracing::info!("chat session started");
    }

    fn handle_frame(&mut self, frame: &RawFrame) -> Option<Outbound> {
        let result = self.processor.try_process(
            frame,
            self.request_context.as_deref(),
            self.image_url.as_deref(),
        );
        match result {
            Ok(Some(result)) => chat::fold_result(&mut self.state, result),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "frame processing failed");
                self.dispatch(ChatAction::SetError(Some(ChatError::processing(e.to_string()))));
            }
        }
        None
    }

    fn connection_error(&mut self, message: &str) {
        tracing::error!(error = %message, "connection failed");
        self.dispatch(ChatAction::SetError(Some(ChatError::connection(message))));
    }

    fn respond(&mut self, text: &str) -> Option<Outbound> {
        let Some(request) = self.state.active_request.clone() else {
            tracing::debug!("no pending input request, reply dropped");
            return None;
        };
        self.dispatch(ChatAction::SetActiveRequest(None));
        Some(InputResponse::new(&request, text).into())
    }

    fn reset(&mut self) {
        self.dispatch(ChatAction::Reset);
    }

    fn snapshot(&self) -> ChatState {
        self.state.clone()
    }
}

#[derive(Debug, Clone)]
pub struct StepSession {
    processor: StepProcessor,
    state: StepState,
    image_url: Option<String>,
    request_context: Option<String>,
    auto_continue: bool,
}

impl StepSession {
    pub fn new(config: &Config) -> Self {
        Self::with_processor(
            StepProcessor::new(MessageProcessor::new(config.processor_config())),
            config.dedup_capacity,
            config.image_url.clone(),
        )
    }

    pub fn with_processor(processor: StepProcessor, dedup_capacity: usize, image_url: Option<String>) -> Self {
        Self {
            processor,
            state: StepState::new(dedup_capacity),
            image_url,
            request_context: None,
            auto_continue: false,
        }
    }

    pub fn with_request_context(mut self, request_id: Option<String>) -> Self {
        self.request_context = request_id;
        self
    }

    /// Answer every control request with `continue`. Survives restarts.
    pub fn with_auto_continue(mut self, auto_continue: bool) -> Self {
        self.auto_continue = auto_continue;
        self
    }

    pub fn set_auto_continue(&mut self, auto_continue: bool) {
        self.auto_continue = auto_continue;
        self.dispatch(StepAction::SetAutoContinue(auto_continue));
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    pub fn dispatch(&mut self, action: StepAction) {
        step::reduce(&mut self.state, action);
    }

    fn step_error(&mut self, message: String) {
        self.dispatch(StepAction::SetError(Some(ChatError {
            code: ErrorCode::StepError,
            message,
        })));
    }
}

impl Session for StepSession {
    type Snapshot = StepState;

    fn start(&mut self) {
        self.dispatch(StepAction::Reset);
        self.dispatch(StepAction::SetActive(true));
        self.dispatch(StepAction::SetShow(true));
        self.dispatch(StepAction::SetAutoContinue(self.auto_continue));
        tracing::info!(auto_continue = self.auto_continue, "step session started");
    }

    fn handle_frame(&mut self, frame: &RawFrame) -> Option<Outbound> {
        let result = self.processor.try_process(
            frame,
            self.request_context.as_deref(),
            self.image_url.as_deref(),
        );
        match result {
            Ok(Some(result)) => step::fold_step_result(&mut self.state, result).map(Outbound::from),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "step frame processing failed");
                self.dispatch(StepAction::SetError(Some(ChatError::processing(e.to_string()))));
                None
            }
        }
    }

    fn connection_error(&mut self, message: &str) {
        tracing::error!(error = %message, "connection failed");
        self.dispatch(StepAction::SetError(Some(ChatError::connection(message))));
    }

    /// Control requests take precedence over chat input requests.
    fn respond(&mut self, text: &str) -> Option<Outbound> {
        if let Some(pending) = self.state.pending_control_input.clone() {
            let command = match text.parse::<ControlCommand>() {
                Ok(command) => command,
                Err(e) => {
                    tracing::warn!(error = %e, "rejected control reply");
                    self.step_error(e.to_string());
                    return None;
                }
            };
            tracing::debug!(request_id = %pending.request_id, %command, "control reply");
            self.dispatch(StepAction::SetPendingControlInput(None));
            return Some(ControlResponse::new(pending.request_id, command.as_input()).into());
        }
        if let Some(request) = self.state.active_request.clone() {
            self.dispatch(StepAction::SetActiveRequest(None));
            return Some(InputResponse::new(&request, text).into());
        }
        tracing::debug!("nothing pending, reply dropped");
        None
    }

    fn reset(&mut self) {
        self.dispatch(StepAction::Reset);
    }

    fn snapshot(&self) -> StepState {
        self.state.clone()
    }
}

/// Messages accepted by a spawned session task.
#[derive(Debug, Clone)]
pub enum SessionInput {
    Frame(RawFrame),
    ConnectionError(String),
    Respond(String),
    /// Discard state and start a new run.
    Reset,
    Close,
}

/// Channels connected to a running session task. The task returns the
/// final snapshot once `input` is closed or `Close` is sent.
pub struct SessionHandle<S: Session> {
    pub input: mpsc::UnboundedSender<SessionInput>,
    pub snapshots: broadcast::Receiver<S::Snapshot>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub task: JoinHandle<S::Snapshot>,
}

pub fn spawn_session<S: Session>(session: S) -> SessionHandle<S> {
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = broadcast::channel(SNAPSHOT_CAPACITY);
    let task = tokio::spawn(run_session(session, input_rx, snapshot_tx, outbound_tx));
    SessionHandle {
        input: input_tx,
        snapshots: snapshot_rx,
        outbound: outbound_rx,
        task,
    }
}

pub fn spawn_chat_session(config: &Config) -> SessionHandle<ChatSession> {
    spawn_session(ChatSession::new(config))
}

pub fn spawn_step_session(config: &Config, auto_continue: bool) -> SessionHandle<StepSession> {
    spawn_session(StepSession::new(config).with_auto_continue(auto_continue))
}

async fn run_session<S: Session>(
    mut session: S,
    mut input: mpsc::UnboundedReceiver<SessionInput>,
    snapshots: broadcast::Sender<S::Snapshot>,
    outbound: mpsc::UnboundedSender<Outbound>,
) -> S::Snapshot {
    session.start();
    // No subscribers is fine; snapshots are best-effort.
    let _ = snapshots.send(session.snapshot());

    while let Some(message) = input.recv().await {
        let reply = match message {
            SessionInput::Frame(frame) => session.handle_frame(&frame),
            SessionInput::ConnectionError(error) => {
                session.connection_error(&error);
                None
            }
            SessionInput::Respond(text) => session.respond(&text),
            SessionInput::Reset => {
                session.reset();
                session.start();
                None
            }
            SessionInput::Close => break,
        };
        if let Some(reply) = reply {
            if outbound.send(reply).is_err() {
                tracing::warn!("outbound channel closed, response dropped");
            }
        }
        let _ = snapshots.send(session.snapshot());
    }

    tracing::debug!("session task exiting");
    session.snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{CanonicalMessage, MessageKind, ProcessingResult};
    use crate::processor::{Handler, ProcessorConfig};

    fn frame(s: &str) -> RawFrame {
        RawFrame::from(s)
    }

    fn chat_session() -> ChatSession {
        let mut session = ChatSession::new(&Config::default());
        session.start();
        session
    }

    fn step_session() -> StepSession {
        let mut session = StepSession::new(&Config::default());
        session.start();
        session
    }

    #[test]
    fn test_chat_respond_clears_request() {
        let mut session = chat_session();
        session.handle_frame(&frame(r#"{"type":"input_request","request_id":"r1","prompt":"Name?"}"#));
        assert_eq!(session.state().active_request.as_ref().unwrap().request_id, "r1");

        let reply = session.respond("Ada").unwrap();
        assert_eq!(
            reply,
            Outbound::Input(InputResponse {
                kind: "input_response",
                request_id: "r1".into(),
                data: "Ada".into(),
            })
        );
        assert!(session.state().active_request.is_none());
        assert!(session.respond("again").is_none());
    }

    #[test]
    fn test_request_context_is_stamped() {
        let mut session = ChatSession::new(&Config::default()).with_request_context(Some("pinned".into()));
        session.start();
        session.handle_frame(&frame(r#"{"type":"input_request","request_id":"r1","prompt":"?"}"#));
        let request = session.state().active_request.clone().unwrap();
        assert_eq!(request.request_id, "pinned");
    }

    #[test]
    fn test_processing_error_becomes_state() {
        let broken: Handler = Handler {
            name: "broken",
            can_handle: |t| t == "text",
            handle: |_, _| {
                Ok(Some(ProcessingResult::Message(CanonicalMessage {
                    content: Vec::new(),
                    ..CanonicalMessage::new("x".into(), "t".into(), MessageKind::Text, "")
                })))
            },
        };
        let processor = MessageProcessor::with_handlers(ProcessorConfig::default(), vec![broken]);
        let mut session = ChatSession::with_processor(processor, 10, None);
        session.start();
        session.handle_frame(&frame(r#"{"type":"text","content":"hi"}"#));
        let error = session.state().error.clone().unwrap();
        assert_eq!(error.code, ErrorCode::ProcessingError);
        assert!(error.message.contains("broken"));
    }

    #[test]
    fn test_connection_error_recorded() {
        let mut session = chat_session();
        session.connection_error("socket closed");
        let error = session.state().error.clone().unwrap();
        assert_eq!(error.code, ErrorCode::ConnectionError);
        assert_eq!(error.message, "socket closed");
    }

    #[test]
    fn test_step_control_reply() {
        let mut session = step_session();
        session.handle_frame(&frame(r#"{"type":"debug_input_request","request_id":"d1","prompt":"[c]ontinue"}"#));
        assert!(session.state().pending_control_input.is_some());

        assert!(session.respond("fly").is_none());
        assert_eq!(session.state().error.as_ref().unwrap().code, ErrorCode::StepError);
        assert!(session.state().pending_control_input.is_some());

        let reply = session.respond("ab agent:critic").unwrap();
        assert_eq!(reply, Outbound::Control(ControlResponse::new("d1", "ab agent:critic")));
        assert!(session.state().pending_control_input.is_none());
    }

    #[test]
    fn test_step_auto_continue_replies_on_frame() {
        let mut session = StepSession::new(&Config::default()).with_auto_continue(true);
        session.start();
        let reply = session.handle_frame(&frame(r#"{"type":"debug_input_request","request_id":"d7","prompt":"?"}"#));
        assert_eq!(reply, Some(Outbound::Control(ControlResponse::new("d7", "c"))));

        session.set_auto_continue(false);
        assert!(session
            .handle_frame(&frame(r#"{"type":"debug_input_request","request_id":"d8","prompt":"?"}"#))
            .is_none());
    }

    #[test]
    fn test_step_chat_input_when_no_control_pending() {
        let mut session = step_session();
        session.handle_frame(&frame(r#"{"type":"input_request","request_id":"r1","prompt":">"}"#));
        let reply = session.respond("go").unwrap();
        assert!(matches!(reply, Outbound::Input(r) if r.request_id == "r1"));
    }

    #[tokio::test]
    async fn test_spawned_chat_session_runs_to_end() {
        let SessionHandle {
            input,
            mut snapshots,
            mut outbound,
            task,
        } = spawn_chat_session(&Config::default());

        input
            .send(SessionInput::Frame(frame(r#"{"type":"input_request","request_id":"r1","prompt":">"}"#)))
            .unwrap();
        input.send(SessionInput::Respond("hello".into())).unwrap();
        input
            .send(SessionInput::Frame(frame(r#"{"type":"text","content":{"uuid":"m1","content":"hi","sender":"a"}}"#)))
            .unwrap();
        input
            .send(SessionInput::Frame(frame("<Waldiez> - Workflow finished")))
            .unwrap();
        drop(input);

        let state = task.await.unwrap();
        assert!(!state.active);
        assert_eq!(state.messages.len(), 2);

        match outbound.recv().await {
            Some(Outbound::Input(r)) => {
                assert_eq!(r.request_id, "r1");
                assert_eq!(r.data, "hello");
            }
            other => panic!("expected input response, got {other:?}"),
        }

        let first = snapshots.recv().await.unwrap();
        assert!(first.active);
        assert!(first.messages.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_session_close_and_reset() {
        let handle = spawn_step_session(&Config::default(), false);
        handle
            .input
            .send(SessionInput::Frame(frame(r#"{"type":"debug_error","error":"bad"}"#)))
            .unwrap();
        handle.input.send(SessionInput::Reset).unwrap();
        handle.input.send(SessionInput::Close).unwrap();
        let state = handle.task.await.unwrap();
        assert!(state.error.is_none());
        assert!(state.active);
    }
}
