//! Actor seam: the simulated characters agents walk around with.

use crate::types::{AgentId, Direction, Position};
use serde::{Deserialize, Serialize};

/// The walking directive an actor receives for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalkingState {
    /// Keep walking in the given direction.
    Walking(Direction),
    /// Stand still.
    Stopped,
}

impl WalkingState {
    /// Returns true for `Walking(_)`.
    pub fn is_moving(&self) -> bool {
        matches!(self, WalkingState::Walking(_))
    }
}

/// The host simulation's view of agent-controlled actors.
///
/// The core never owns actors. It asks the host whether an agent's actor is
/// still alive and hands it walking directives during the step.
///
/// # Implementations
///
/// - **Host**: wraps the game's character entities
/// - **Simulation**: `ActorField` in `steplock_sim`, a kinematic stand-in
///
/// # Determinism
///
/// Every method is called from inside the deterministic step. Implementations
/// must answer from replicated state only.
pub trait ActorHost {
    /// Returns true if the agent's actor exists and can receive directives.
    fn is_actor_valid(&self, agent: &AgentId) -> bool;

    /// Applies a walking directive to the agent's actor.
    ///
    /// Only called after `is_actor_valid` returned true in the same step.
    fn apply_walking(&mut self, agent: &AgentId, state: WalkingState);

    /// Current position of the agent's actor, if it exists.
    fn actor_position(&self, agent: &AgentId) -> Option<Position>;

    /// Positions of every live actor, in agent-id order.
    ///
    /// Published after each step so external callers can read positions
    /// without touching the simulation.
    fn actor_positions(&self) -> Vec<(AgentId, Position)>;
}

/// Host with no actors. Every movement directive becomes a stale reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActors;

impl ActorHost for NoActors {
    fn is_actor_valid(&self, _agent: &AgentId) -> bool {
        false
    }

    fn apply_walking(&mut self, _agent: &AgentId, _state: WalkingState) {}

    fn actor_position(&self, _agent: &AgentId) -> Option<Position> {
        None
    }

    fn actor_positions(&self) -> Vec<(AgentId, Position)> {
        Vec::new()
    }
}
