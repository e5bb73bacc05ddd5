//! Movement state table: per-agent walking directives.
//!
//! ```text
//!          set_walk              set_walk (new direction)
//!   Idle ------------> Moving <------------------------+
//!    ^                   |  |                          |
//!    |                   |  +--------------------------+
//!    |         stop_walk |
//!    |                   v
//!    +---- one pass -- StoppingThisStep
//! ```
//!
//! Walking directives persist and are re-applied every step, so the
//! external controller does not have to resend them. Stop directives are
//! one-shot: applied once, then reclaimed, which keeps the table bounded by
//! the number of agents that are actually moving.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use steplock_env::{ActorHost, AgentId, Direction, WalkingState};
use tracing::debug;

/// One agent's pending directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDirective {
    pub is_moving: bool,
    pub direction: Direction,
}

impl MovementDirective {
    /// The state the actor receives for this directive.
    pub fn walking_state(&self) -> WalkingState {
        if self.is_moving {
            WalkingState::Walking(self.direction)
        } else {
            WalkingState::Stopped
        }
    }
}

/// Where an agent is in its movement lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementPhase {
    Idle,
    Moving(Direction),
    StoppingThisStep,
}

/// Counters from one end-of-step movement pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementReport {
    /// Directives handed to a live actor during the pass
    pub applied: usize,
    /// Directives whose actor was missing or dead
    pub stale: usize,
    /// Stop entries removed after the pass
    pub reclaimed: usize,
}

/// Transient table of walking directives. Never persisted.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MovementTable {
    entries: BTreeMap<AgentId, MovementDirective>,
    applied_this_step: BTreeSet<AgentId>,
}

impl MovementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a walking directive.
    pub fn set_walk(&mut self, agent: &AgentId, direction: Direction) {
        self.entries.insert(
            agent.clone(),
            MovementDirective {
                is_moving: true,
                direction,
            },
        );
    }

    /// Upserts a stop directive, keeping the last known direction.
    pub fn stop_walk(&mut self, agent: &AgentId) {
        let direction = self
            .entries
            .get(agent)
            .map_or(Direction::North, |d| d.direction);
        self.entries.insert(
            agent.clone(),
            MovementDirective {
                is_moving: false,
                direction,
            },
        );
    }

    /// Drops an agent's entry without applying it.
    pub fn remove(&mut self, agent: &AgentId) -> Option<MovementDirective> {
        self.entries.remove(agent)
    }

    pub fn get(&self, agent: &AgentId) -> Option<&MovementDirective> {
        self.entries.get(agent)
    }

    pub fn phase(&self, agent: &AgentId) -> MovementPhase {
        match self.entries.get(agent) {
            None => MovementPhase::Idle,
            Some(d) if d.is_moving => MovementPhase::Moving(d.direction),
            Some(_) => MovementPhase::StoppingThisStep,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentId, &MovementDirective)> {
        self.entries.iter()
    }

    /// Applies the agent's current entry right away, during dispatch.
    ///
    /// Returns false if there is no entry or the actor is not valid.
    pub fn apply_now<H: ActorHost>(&mut self, agent: &AgentId, host: &mut H) -> bool {
        let Some(directive) = self.entries.get(agent) else {
            return false;
        };
        if !host.is_actor_valid(agent) {
            debug!(%agent, "movement target has no live actor");
            return false;
        }
        host.apply_walking(agent, directive.walking_state());
        self.applied_this_step.insert(agent.clone());
        true
    }

    /// End-of-step pass: re-applies every entry not already applied during
    /// this step's dispatch, then reclaims stop entries.
    pub fn apply_step<H: ActorHost>(&mut self, host: &mut H) -> MovementReport {
        let mut report = MovementReport::default();

        for (agent, directive) in &self.entries {
            if self.applied_this_step.contains(agent) {
                continue;
            }
            if host.is_actor_valid(agent) {
                host.apply_walking(agent, directive.walking_state());
                report.applied += 1;
            } else {
                report.stale += 1;
            }
        }

        let before = self.entries.len();
        self.entries.retain(|_, d| d.is_moving);
        report.reclaimed = before - self.entries.len();
        self.applied_this_step.clear();

        report
    }
}
