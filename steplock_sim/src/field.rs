//! Simulated actor field.
//!
//! Stands in for the host game's characters:
//! - Positions of every agent's actor (kinematics)
//! - Walking state set by the processor's directives
//! - A log of every directive received, for ordering checks

use nalgebra::Vector2;
use std::collections::BTreeMap;
use steplock_env::{ActorHost, AgentId, Direction, Position, WalkingState};

/// One simulated character.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    /// Position in tiles (screen coordinates, +y is south)
    pub position: Vector2<f64>,

    /// Direction the actor keeps walking in, if any
    pub heading: Option<Direction>,

    /// False once killed; a dead actor receives no directives
    pub alive: bool,
}

impl Actor {
    pub fn new(position: Vector2<f64>) -> Self {
        Self {
            position,
            heading: None,
            alive: true,
        }
    }
}

/// Every actor of one replica.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorField {
    actors: BTreeMap<AgentId, Actor>,

    /// Walking speed in tiles per second
    speed: f64,

    /// Directives received, in order
    directives: Vec<(AgentId, WalkingState)>,
}

impl ActorField {
    pub fn new(speed: f64) -> Self {
        Self {
            actors: BTreeMap::new(),
            speed,
            directives: Vec::new(),
        }
    }

    /// Spawns (or revives) the agent's actor at a position.
    pub fn spawn(&mut self, agent: &AgentId, position: Vector2<f64>) {
        self.actors.insert(agent.clone(), Actor::new(position));
    }

    /// Kills the agent's actor. It keeps its last position.
    pub fn kill(&mut self, agent: &AgentId) {
        if let Some(actor) = self.actors.get_mut(agent) {
            actor.alive = false;
            actor.heading = None;
        }
    }

    /// Stops every actor without logging a directive (a reloaded world).
    pub fn halt_all(&mut self) {
        for actor in self.actors.values_mut() {
            actor.heading = None;
        }
    }

    /// Advances every walking actor by `dt` seconds.
    pub fn advance(&mut self, dt: f64) {
        for actor in self.actors.values_mut() {
            if !actor.alive {
                continue;
            }
            if let Some(direction) = actor.heading {
                let (dx, dy) = direction.unit_vector();
                actor.position += Vector2::new(dx, dy) * self.speed * dt;
            }
        }
    }

    pub fn actor(&self, agent: &AgentId) -> Option<&Actor> {
        self.actors.get(agent)
    }

    pub fn position(&self, agent: &AgentId) -> Option<Vector2<f64>> {
        self.actors.get(agent).map(|a| a.position)
    }

    pub fn heading(&self, agent: &AgentId) -> Option<Direction> {
        self.actors.get(agent).and_then(|a| a.heading)
    }

    /// Every directive received so far, in order.
    pub fn directives(&self) -> &[(AgentId, WalkingState)] {
        &self.directives
    }

    /// Directives received by one agent's actor, in order.
    pub fn directive_log(&self, agent: &AgentId) -> Vec<WalkingState> {
        self.directives
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn clear_log(&mut self) {
        self.directives.clear();
    }

    pub fn alive_count(&self) -> usize {
        self.actors.values().filter(|a| a.alive).count()
    }
}

impl Default for ActorField {
    fn default() -> Self {
        Self::new(4.0)
    }
}

impl ActorHost for ActorField {
    fn is_actor_valid(&self, agent: &AgentId) -> bool {
        self.actors.get(agent).is_some_and(|a| a.alive)
    }

    fn apply_walking(&mut self, agent: &AgentId, state: WalkingState) {
        if let Some(actor) = self.actors.get_mut(agent) {
            actor.heading = match state {
                WalkingState::Walking(direction) => Some(direction),
                WalkingState::Stopped => None,
            };
        }
        self.directives.push((agent.clone(), state));
    }

    fn actor_position(&self, agent: &AgentId) -> Option<Position> {
        self.actors
            .get(agent)
            .filter(|a| a.alive)
            .map(|a| Position::new(a.position.x, a.position.y))
    }

    fn actor_positions(&self) -> Vec<(AgentId, Position)> {
        self.actors
            .iter()
            .filter(|(_, a)| a.alive)
            .map(|(id, a)| (id.clone(), Position::new(a.position.x, a.position.y)))
            .collect()
    }
}
