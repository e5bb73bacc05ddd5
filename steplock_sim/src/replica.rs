//! One simulated host: a runtime driving its own actor field and mirror.

use crate::field::ActorField;
use crate::mirror::MirrorPresentation;
use nalgebra::Vector2;
use steplock_core::{
    ChatRequest, CoreConfig, CoreState, Envelope, HostRuntime, SnapshotError, SnapshotStore,
    StepReport, ViewerInput,
};
use steplock_env::AgentId;

/// A replica of the simulation.
///
/// Replicas never share state. They only agree because they apply the same
/// batches and inputs to the same starting state.
pub struct Replica {
    index: usize,
    runtime: HostRuntime<ActorField, MirrorPresentation>,
}

impl Replica {
    pub fn new(index: usize, config: CoreConfig, actor_speed: f64) -> Self {
        let mirror = MirrorPresentation::new(config.effective_history_cap());
        Self {
            index,
            runtime: HostRuntime::new(config, ActorField::new(actor_speed), mirror),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Advances the actors by `dt` seconds, then runs one core step.
    pub fn step(&mut self, batch: Vec<Envelope>, inputs: Vec<ViewerInput>, dt: f64) -> StepReport {
        self.runtime.host_mut().advance(dt);
        self.runtime.step_with(batch, inputs)
    }

    pub fn spawn_actor(&mut self, agent: &AgentId, position: Vector2<f64>) {
        self.runtime.host_mut().spawn(agent, position);
    }

    pub fn kill_actor(&mut self, agent: &AgentId) {
        self.runtime.host_mut().kill(agent);
    }

    pub fn digest(&self) -> Result<String, serde_json::Error> {
        self.runtime.state().digest()
    }

    /// Checks that this replica's chat windows show exactly what it stores.
    pub fn verify_mirror(&self) -> Result<(), String> {
        self.runtime
            .presentation()
            .verify(self.runtime.state())
            .map_err(|reason| format!("replica {}: {}", self.index, reason))
    }

    pub fn take_outbound(&mut self) -> Vec<ChatRequest> {
        self.runtime.take_outbound()
    }

    pub fn save(&self, store: &dyn SnapshotStore, slot: &str) -> Result<(), SnapshotError> {
        self.runtime.save(store, slot)
    }

    /// Restores a snapshot. Surfaces and directives are not persisted, so
    /// the mirror starts over with every window closed and actors stand still.
    pub fn restore(&mut self, store: &dyn SnapshotStore, slot: &str) -> Result<bool, SnapshotError> {
        let restored = self.runtime.restore(store, slot)?;
        if restored {
            let cap = self.runtime.processor().config().effective_history_cap();
            *self.runtime.presentation_mut() = MirrorPresentation::new(cap);
            self.runtime.host_mut().halt_all();
        }
        Ok(restored)
    }

    pub fn state(&self) -> &CoreState {
        self.runtime.state()
    }

    pub fn field(&self) -> &ActorField {
        self.runtime.host()
    }

    pub fn mirror(&self) -> &MirrorPresentation {
        self.runtime.presentation()
    }
}
