//! Command envelopes: one externally-originated request awaiting its step.

use serde::{Deserialize, Serialize};
use steplock_env::{AgentId, Direction, EnvError, ViewerId};
use thiserror::Error;

/// Errors raised at the inbound boundary. Rejected input is never queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundaryError {
    #[error("Invalid viewer index: {0}")]
    InvalidViewer(u32),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unknown command kind: {0}")]
    UnknownCommand(String),

    #[error("Malformed command: {0}")]
    Malformed(String),

    #[error(transparent)]
    Invalid(#[from] EnvError),
}

/// Wire names of every command kind, in declaration order.
pub const COMMAND_KINDS: [&str; 9] = [
    "deliver_response",
    "tool_status",
    "set_status",
    "clear_session",
    "register_agent",
    "unregister_agent",
    "set_movement",
    "stop_movement",
    "set_observer_mode",
];

/// One external request, as a closed sum type.
///
/// `agent: None` means "the current default agent" and is resolved during
/// dispatch, not at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// An agent's reply to a viewer.
    DeliverResponse {
        viewer: ViewerId,
        #[serde(default)]
        agent: Option<AgentId>,
        text: String,
    },

    /// The agent started using a tool on the viewer's behalf.
    ToolStatus {
        viewer: ViewerId,
        #[serde(default)]
        agent: Option<AgentId>,
        tool: String,
    },

    /// Free-form status line for a viewer.
    SetStatus { viewer: ViewerId, text: String },

    /// Clear one agent's session, or all of the viewer's sessions.
    ClearSession {
        viewer: ViewerId,
        #[serde(default)]
        agent: Option<AgentId>,
    },

    /// Add an agent, or relabel it if it already exists.
    RegisterAgent {
        agent: AgentId,
        #[serde(default)]
        label: Option<String>,
    },

    /// Remove an agent (refused for the last remaining one).
    UnregisterAgent { agent: AgentId },

    /// Keep the agent's actor walking in a direction.
    SetMovement { agent: AgentId, direction: Direction },

    /// Stop the agent's actor.
    StopMovement { agent: AgentId },

    /// Force connected viewers into (or out of) observation-only mode.
    SetObserverMode { enabled: bool },
}

impl Command {
    /// Decodes and validates one wire record (a JSON object with a `kind`).
    pub fn decode(line: &str) -> Result<Self, BoundaryError> {
        let value: serde_json::Value = serde_json::from_str(line.trim())
            .map_err(|e| BoundaryError::Malformed(e.to_string()))?;

        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or(BoundaryError::MissingField("kind"))?;
        if !COMMAND_KINDS.contains(&kind) {
            return Err(BoundaryError::UnknownCommand(kind.to_string()));
        }

        let command: Command = serde_json::from_value(value)
            .map_err(|e| BoundaryError::Malformed(e.to_string()))?;
        command.validate()?;
        Ok(command)
    }

    /// Encodes the command as a single-line wire record.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Checks the fields the type system cannot.
    pub fn validate(&self) -> Result<(), BoundaryError> {
        if let Some(viewer) = self.viewer() {
            if !viewer.is_valid() {
                return Err(BoundaryError::InvalidViewer(viewer.0));
            }
        }
        if let Some(agent) = self.agent() {
            if !agent.is_valid() {
                return Err(EnvError::EmptyIdentifier("agent").into());
            }
        }

        match self {
            Command::DeliverResponse { text, .. } if text.trim().is_empty() => {
                Err(BoundaryError::MissingField("text"))
            }
            Command::ToolStatus { tool, .. } if tool.trim().is_empty() => {
                Err(BoundaryError::MissingField("tool"))
            }
            Command::RegisterAgent { label: Some(label), .. } if label.trim().is_empty() => {
                Err(BoundaryError::MissingField("label"))
            }
            _ => Ok(()),
        }
    }

    /// Wire name of this command's kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::DeliverResponse { .. } => "deliver_response",
            Command::ToolStatus { .. } => "tool_status",
            Command::SetStatus { .. } => "set_status",
            Command::ClearSession { .. } => "clear_session",
            Command::RegisterAgent { .. } => "register_agent",
            Command::UnregisterAgent { .. } => "unregister_agent",
            Command::SetMovement { .. } => "set_movement",
            Command::StopMovement { .. } => "stop_movement",
            Command::SetObserverMode { .. } => "set_observer_mode",
        }
    }

    /// The viewer this command targets, if any.
    pub fn viewer(&self) -> Option<ViewerId> {
        match self {
            Command::DeliverResponse { viewer, .. }
            | Command::ToolStatus { viewer, .. }
            | Command::SetStatus { viewer, .. }
            | Command::ClearSession { viewer, .. } => Some(*viewer),
            _ => None,
        }
    }

    /// The agent this command names explicitly, if any.
    pub fn agent(&self) -> Option<&AgentId> {
        match self {
            Command::DeliverResponse { agent, .. }
            | Command::ToolStatus { agent, .. }
            | Command::ClearSession { agent, .. } => agent.as_ref(),
            Command::RegisterAgent { agent, .. }
            | Command::UnregisterAgent { agent }
            | Command::SetMovement { agent, .. }
            | Command::StopMovement { agent } => Some(agent),
            Command::SetStatus { .. } | Command::SetObserverMode { .. } => None,
        }
    }
}

/// A queued command with its position in the global application order.
///
/// Immutable once created; consumed exactly once by the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sequence number assigned under the queue lock at append time
    pub seq: u64,

    /// The request itself
    pub command: Command,
}

impl Envelope {
    pub fn new(seq: u64, command: Command) -> Self {
        Self { seq, command }
    }
}
