//! Test doubles shared by the unit tests.

use std::collections::BTreeMap;
use steplock_env::{
    ActorHost, AgentId, Position, PresentationAdapter, PresentationEvent, WalkingState,
};

pub(crate) fn id(raw: &str) -> AgentId {
    AgentId::parse(raw).unwrap()
}

/// Actor host that records every directive it receives.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct RecordingHost {
    pub alive: BTreeMap<AgentId, Position>,
    pub log: Vec<(AgentId, WalkingState)>,
}

impl RecordingHost {
    pub fn with_actors(ids: &[&str]) -> Self {
        let mut host = Self::default();
        for raw in ids {
            host.spawn(raw);
        }
        host
    }

    pub fn spawn(&mut self, raw: &str) {
        self.alive.insert(id(raw), Position::new(0.0, 0.0));
    }

    pub fn kill(&mut self, raw: &str) {
        self.alive.remove(&id(raw));
    }

    pub fn log_for(&self, raw: &str) -> Vec<WalkingState> {
        let agent = id(raw);
        self.log
            .iter()
            .filter(|(a, _)| a == &agent)
            .map(|(_, state)| *state)
            .collect()
    }
}

impl ActorHost for RecordingHost {
    fn is_actor_valid(&self, agent: &AgentId) -> bool {
        self.alive.contains_key(agent)
    }

    fn apply_walking(&mut self, agent: &AgentId, state: WalkingState) {
        if let (Some(pos), WalkingState::Walking(direction)) = (self.alive.get_mut(agent), state) {
            let (dx, dy) = direction.unit_vector();
            pos.x += dx;
            pos.y += dy;
        }
        self.log.push((agent.clone(), state));
    }

    fn actor_position(&self, agent: &AgentId) -> Option<Position> {
        self.alive.get(agent).copied()
    }

    fn actor_positions(&self) -> Vec<(AgentId, Position)> {
        self.alive.iter().map(|(a, p)| (a.clone(), *p)).collect()
    }
}

/// Presentation adapter that keeps every event.
#[derive(Debug, Default)]
pub(crate) struct EventLog(pub Vec<PresentationEvent>);

impl PresentationAdapter for EventLog {
    fn notify(&mut self, event: &PresentationEvent) {
        self.0.push(event.clone());
    }
}
