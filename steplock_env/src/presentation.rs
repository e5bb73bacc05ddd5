//! Presentation seam: the chat windows that mirror core state.

use crate::types::{AgentId, Role, SurfaceHandle, ViewerId};
use serde::{Deserialize, Serialize};

/// A notification from the step processor to the presentation layer.
///
/// Emitted only while a step is being processed and delivered after the
/// step completes. The presentation layer renders these; it never feeds
/// state back except through replicated viewer inputs.
///
/// # Flow
///
/// ```text
/// Processor (step N)            Runtime                 Presentation
///   |-- dispatch envelope -------->|                          |
///   |   (events collected)         |                          |
///   |-- StepReport --------------->|                          |
///   |                              |-- notify(event) x n ---->|
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PresentationEvent {
    /// Append a message to a viewer's tab for an agent.
    AppendMessage {
        viewer: ViewerId,
        agent: AgentId,
        role: Role,
        text: String,
    },

    /// Replace the viewer's status line.
    SetStatus { viewer: ViewerId, text: String },

    /// Add a tab for a newly registered agent.
    AddTab {
        viewer: ViewerId,
        agent: AgentId,
        label: String,
    },

    /// An already registered agent changed its display label.
    RelabelTab {
        viewer: ViewerId,
        agent: AgentId,
        label: String,
    },

    /// Remove the tab of an unregistered agent.
    RemoveTab { viewer: ViewerId, agent: AgentId },

    /// Make a tab the viewer's active one.
    SelectTab { viewer: ViewerId, agent: AgentId },

    /// A message arrived on a tab that is not active.
    IncrementBadge { viewer: ViewerId, agent: AgentId },

    /// Drop rendered history; `agent = None` clears every tab.
    ClearMessages {
        viewer: ViewerId,
        agent: Option<AgentId>,
    },

    /// A chat window was opened.
    OpenSurface {
        viewer: ViewerId,
        handle: SurfaceHandle,
    },

    /// The chat window was closed.
    CloseSurface { viewer: ViewerId },

    /// The chat window was resized (already clamped).
    ResizeSurface {
        viewer: ViewerId,
        width: u32,
        height: u32,
    },

    /// Observation-only mode toggled for the viewer.
    ObserverMode { viewer: ViewerId, enabled: bool },
}

impl PresentationEvent {
    /// The viewer this event is addressed to.
    pub fn viewer(&self) -> ViewerId {
        match self {
            PresentationEvent::AppendMessage { viewer, .. }
            | PresentationEvent::SetStatus { viewer, .. }
            | PresentationEvent::AddTab { viewer, .. }
            | PresentationEvent::RelabelTab { viewer, .. }
            | PresentationEvent::RemoveTab { viewer, .. }
            | PresentationEvent::SelectTab { viewer, .. }
            | PresentationEvent::IncrementBadge { viewer, .. }
            | PresentationEvent::ClearMessages { viewer, .. }
            | PresentationEvent::OpenSurface { viewer, .. }
            | PresentationEvent::CloseSurface { viewer }
            | PresentationEvent::ResizeSurface { viewer, .. }
            | PresentationEvent::ObserverMode { viewer, .. } => *viewer,
        }
    }
}

/// Receiver of presentation events.
///
/// Implementations mirror core state reactively. They must not call back
/// into the core.
pub trait PresentationAdapter {
    /// Handles one event.
    fn notify(&mut self, event: &PresentationEvent);
}

/// Presentation adapter that discards every event (headless hosts).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresentation;

impl PresentationAdapter for NullPresentation {
    fn notify(&mut self, _event: &PresentationEvent) {}
}

impl<P: PresentationAdapter + ?Sized> PresentationAdapter for Box<P> {
    fn notify(&mut self, event: &PresentationEvent) {
        (**self).notify(event);
    }
}
