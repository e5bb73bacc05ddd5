//! Core configuration.

/// Maximum messages kept per (viewer, agent) session.
pub const HISTORY_CAP: usize = 100;

/// Configuration for the step processor.
///
/// Every replica must run with the same configuration; it is part of the
/// deterministic input just like the envelope batches.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Messages kept per session before the oldest is evicted (default: 100).
    /// A cap of 0 is raised to 1; see [`CoreConfig::effective_history_cap`].
    pub history_cap: usize,

    /// Display label of the lazily created placeholder agent
    pub default_agent_label: String,

    /// Status shown after an agent response lands
    pub ready_status: String,

    /// Status shown while a submitted message waits for a response
    pub thinking_status: String,

    /// Smallest surface size a resize may produce (width, height)
    pub min_surface: (u32, u32),

    /// Largest surface size a resize may produce (width, height)
    pub max_surface: (u32, u32),
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history_cap: HISTORY_CAP,
            default_agent_label: "Claude".to_string(),
            ready_status: "[color=0.4,0.8,0.4]Ready[/color]".to_string(),
            thinking_status: "[color=1,0.8,0.2]Thinking...[/color]".to_string(),
            min_surface: (280, 200),
            max_surface: (1600, 1200),
        }
    }
}

impl CoreConfig {
    /// The cap sessions actually enforce: `history_cap`, but at least 1.
    pub fn effective_history_cap(&self) -> usize {
        self.history_cap.max(1)
    }

    /// Clamps a requested surface size to the configured bounds.
    pub fn clamp_surface(&self, width: u32, height: u32) -> (u32, u32) {
        (
            width.clamp(self.min_surface.0, self.max_surface.0),
            height.clamp(self.min_surface.1, self.max_surface.1),
        )
    }
}
