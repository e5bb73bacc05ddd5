//! Per-viewer selection state and the presentation-triggered inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use steplock_env::{AgentId, SurfaceHandle, ViewerId};

/// Selection and surface state of one viewer.
///
/// Only `active_agent` is persisted. Surface, badges, size and connection
/// are presentation bookkeeping and reset on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerState {
    /// Tab the viewer is looking at; always a registered agent after a step
    pub active_agent: AgentId,

    #[serde(skip)]
    pub surface: Option<SurfaceHandle>,

    #[serde(skip)]
    pub connected: bool,

    #[serde(skip)]
    pub surface_size: Option<(u32, u32)>,

    /// Unread counts per non-active tab
    #[serde(skip)]
    pub badges: BTreeMap<AgentId, u32>,
}

impl ViewerState {
    pub fn new(active_agent: AgentId) -> Self {
        Self {
            active_agent,
            surface: None,
            connected: false,
            surface_size: None,
            badges: BTreeMap::new(),
        }
    }

    /// Returns true if a chat window is open.
    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    /// Unread count for a tab.
    pub fn badge(&self, agent: &AgentId) -> u32 {
        self.badges.get(agent).copied().unwrap_or(0)
    }
}

/// A replicated input triggered from a viewer's presentation surface.
///
/// Unlike envelopes these originate inside the simulation (player actions
/// are already part of every replica's input stream), so they need no
/// boundary. They are applied after the step's envelope batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "input", rename_all = "snake_case")]
pub enum ViewerInput {
    /// The viewer connected.
    Joined { viewer: ViewerId },

    /// The viewer disconnected. Sessions are kept.
    Left { viewer: ViewerId },

    /// The chat window was opened.
    OpenSurface { viewer: ViewerId },

    /// The chat window was closed.
    CloseSurface { viewer: ViewerId },

    /// The chat window was dragged to a new size.
    Resize { viewer: ViewerId, width: u32, height: u32 },

    /// A tab was clicked.
    SelectTab { viewer: ViewerId, agent: AgentId },

    /// The viewer pressed send.
    Submit { viewer: ViewerId, text: String },
}

impl ViewerInput {
    pub fn viewer(&self) -> ViewerId {
        match self {
            ViewerInput::Joined { viewer }
            | ViewerInput::Left { viewer }
            | ViewerInput::OpenSurface { viewer }
            | ViewerInput::CloseSurface { viewer }
            | ViewerInput::Resize { viewer, .. }
            | ViewerInput::SelectTab { viewer, .. }
            | ViewerInput::Submit { viewer, .. } => *viewer,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ViewerInput::Joined { .. } => "joined",
            ViewerInput::Left { .. } => "left",
            ViewerInput::OpenSurface { .. } => "open_surface",
            ViewerInput::CloseSurface { .. } => "close_surface",
            ViewerInput::Resize { .. } => "resize",
            ViewerInput::SelectTab { .. } => "select_tab",
            ViewerInput::Submit { .. } => "submit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_fields_are_not_persisted() {
        let mut state = ViewerState::new(AgentId::default_agent());
        state.surface = Some(SurfaceHandle(3));
        state.connected = true;
        state.badges.insert(AgentId::default_agent(), 4);

        let json = serde_json::to_string(&state).unwrap();
        let back: ViewerState = serde_json::from_str(&json).unwrap();

        assert_eq!(back.active_agent, AgentId::default_agent());
        assert!(!back.has_surface());
        assert!(!back.connected);
        assert_eq!(back.badge(&AgentId::default_agent()), 0);
    }
}
