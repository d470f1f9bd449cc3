use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointKind {
    Event,
    Agent,
    AgentEvent,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointRule {
    #[serde(rename = "type")]
    pub kind: BreakpointKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A breakpoint as the backend reports it: either a spec string
/// (`event:text`, `agent:critic`, `critic:tool_call`, `all`) or a rule object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Breakpoint {
    Spec(String),
    Rule(BreakpointRule),
}

impl Breakpoint {
    /// The spec string used when sending add/remove commands.
    pub fn spec(&self) -> String {
        match self {
            Breakpoint::Spec(s) => s.clone(),
            Breakpoint::Rule(rule) => {
                let event = rule.event_type.as_deref().unwrap_or("*");
                let agent = rule.agent_name.as_deref().unwrap_or("*");
                match rule.kind {
                    BreakpointKind::Event => format!("event:{event}"),
                    BreakpointKind::Agent => format!("agent:{agent}"),
                    BreakpointKind::AgentEvent => format!("{agent}:{event}"),
                    BreakpointKind::All => "all".to_string(),
                }
            }
        }
    }

    /// Two breakpoints are the same if they resolve to the same spec.
    pub fn same_as(&self, other: &Breakpoint) -> bool {
        self.spec() == other.spec()
    }
}

/// Commands a user can answer a control request with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Continue,
    Step,
    /// Run to the next breakpoint without stopping.
    Run,
    Quit,
    Info,
    Help,
    Stats,
    ListBreakpoints,
    ClearBreakpoints,
    AddBreakpoint(String),
    RemoveBreakpoint(String),
}

impl ControlCommand {
    /// The wire form sent as `data` in a control response.
    pub fn as_input(&self) -> String {
        match self {
            ControlCommand::Continue => "c".to_string(),
            ControlCommand::Step => "s".to_string(),
            ControlCommand::Run => "r".to_string(),
            ControlCommand::Quit => "q".to_string(),
            ControlCommand::Info => "i".to_string(),
            ControlCommand::Help => "h".to_string(),
            ControlCommand::Stats => "st".to_string(),
            ControlCommand::ListBreakpoints => "lb".to_string(),
            ControlCommand::ClearBreakpoints => "cb".to_string(),
            ControlCommand::AddBreakpoint(spec) => format!("ab {spec}"),
            ControlCommand::RemoveBreakpoint(spec) => format!("rb {spec}"),
        }
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_input())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown control command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for ControlCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (trimmed, ""),
        };
        let command = match (head.to_ascii_lowercase().as_str(), rest.is_empty()) {
            // An empty reply continues, same as pressing enter in a debugger.
            ("" | "c" | "continue", true) => ControlCommand::Continue,
            ("s" | "step", true) => ControlCommand::Step,
            ("r" | "run", true) => ControlCommand::Run,
            ("q" | "quit", true) => ControlCommand::Quit,
            ("i" | "info", true) => ControlCommand::Info,
            ("h" | "help", true) => ControlCommand::Help,
            ("st" | "stats", true) => ControlCommand::Stats,
            ("lb", true) => ControlCommand::ListBreakpoints,
            ("cb", true) => ControlCommand::ClearBreakpoints,
            ("ab", false) => ControlCommand::AddBreakpoint(rest.to_string()),
            ("rb", false) => ControlCommand::RemoveBreakpoint(rest.to_string()),
            _ => return Err(UnknownCommand(trimmed.to_string())),
        };
        Ok(command)
    }
}
