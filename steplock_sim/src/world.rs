//! SimWorld - lockstep replicas behind one authoritative boundary.
//!
//! External callers append to a single boundary. Each step the batch is
//! drained once and handed, together with the step's viewer inputs, to
//! every replica. Replicas that stay deterministic end every step with
//! identical state digests.

use crate::error::ScenarioFailure;
use crate::exporter::{TraceExport, TraceFrame};
use crate::replica::Replica;
use nalgebra::Vector2;
use steplock_core::{
    ChatRequest, CoreConfig, InboundBoundary, SnapshotStore, StepReport, ViewerInput, HISTORY_CAP,
};
use steplock_env::{ActorHost, AgentId};
use tracing::{debug, warn};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of lockstep replicas
    pub replicas: usize,

    /// Number of viewers (ids `1..=viewers`)
    pub viewers: u32,

    /// Steps a scenario runs for
    pub steps: u64,

    /// Simulation steps per second
    pub tick_rate_hz: u32,

    /// Per-session message cap
    pub history_cap: usize,

    /// Actor walking speed in tiles per second
    pub actor_speed: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            replicas: 3,
            viewers: 2,
            steps: 300,
            tick_rate_hz: 60,
            history_cap: HISTORY_CAP,
            actor_speed: 4.0,
        }
    }
}

impl SimConfig {
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            history_cap: self.history_cap,
            ..CoreConfig::default()
        }
    }

    /// Seconds per step.
    pub fn dt(&self) -> f64 {
        1.0 / self.tick_rate_hz.max(1) as f64
    }
}

/// The container for one simulation run.
pub struct SimWorld {
    config: SimConfig,

    /// The only queue external callers see
    boundary: InboundBoundary,

    replicas: Vec<Replica>,

    /// Viewer inputs for the next step, shared by every replica
    inputs: Vec<ViewerInput>,

    /// Chat requests produced by replica 0
    outbound: Vec<ChatRequest>,

    trace: Option<TraceExport>,
}

impl SimWorld {
    pub fn new(config: SimConfig) -> Self {
        let count = config.replicas.max(1);
        let replicas = (0..count)
            .map(|i| Replica::new(i, config.core_config(), config.actor_speed))
            .collect();
        Self {
            config,
            boundary: InboundBoundary::new(),
            replicas,
            inputs: Vec::new(),
            outbound: Vec::new(),
            trace: None,
        }
    }

    /// Starts recording a trace frame for every step.
    pub fn with_trace(mut self, scenario: &str) -> Self {
        self.trace = Some(TraceExport::new(scenario, self.config.seed, self.replicas.len()));
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// A handle for external callers.
    pub fn boundary(&self) -> InboundBoundary {
        self.boundary.clone()
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    /// Replica 0, whose view stands for the whole simulation.
    pub fn primary(&self) -> &Replica {
        &self.replicas[0]
    }

    /// Spawns the agent's actor on every replica.
    pub fn spawn_actor(&mut self, agent: &AgentId, position: Vector2<f64>) {
        for replica in &mut self.replicas {
            replica.spawn_actor(agent, position);
        }
    }

    pub fn kill_actor(&mut self, agent: &AgentId) {
        for replica in &mut self.replicas {
            replica.kill_actor(agent);
        }
    }

    pub fn push_input(&mut self, input: ViewerInput) {
        self.inputs.push(input);
    }

    /// Runs one lockstep step on every replica.
    ///
    /// Fails as soon as two replicas disagree on their step report or on
    /// their state digest.
    pub fn step(&mut self) -> Result<StepReport, ScenarioFailure> {
        let batch = self.boundary.drain();
        let inputs = std::mem::take(&mut self.inputs);
        let kinds: Vec<String> = batch.iter().map(|e| e.command.kind().to_string()).collect();
        let dt = self.config.dt();

        let mut reports = Vec::with_capacity(self.replicas.len());
        for replica in &mut self.replicas {
            reports.push(replica.step(batch.clone(), inputs.clone(), dt));
        }

        let digests = self.digests()?;
        let step = reports[0].step;
        if reports.iter().any(|r| r != &reports[0]) || digests.iter().any(|d| d != &digests[0]) {
            warn!(step, ?digests, "replicas diverged");
            return Err(ScenarioFailure::Divergence { step, digests });
        }

        self.boundary
            .publish_positions(self.replicas[0].field().actor_positions());
        self.outbound.extend(self.replicas[0].take_outbound());
        for replica in self.replicas.iter_mut().skip(1) {
            replica.take_outbound();
        }

        if let Some(trace) = &mut self.trace {
            trace.add_frame(TraceFrame::new(&reports[0], kinds, digests));
        }
        debug!(step, applied = reports[0].applied, "lockstep step complete");

        Ok(reports.swap_remove(0))
    }

    /// Runs `steps` empty steps (inputs already queued still apply).
    pub fn run_idle(&mut self, steps: u64) -> Result<(), ScenarioFailure> {
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    pub fn digests(&self) -> Result<Vec<String>, serde_json::Error> {
        self.replicas.iter().map(Replica::digest).collect()
    }

    pub fn converged(&self) -> Result<bool, serde_json::Error> {
        let digests = self.digests()?;
        Ok(digests.windows(2).all(|pair| pair[0] == pair[1]))
    }

    /// Checks every replica's rendered windows against its stored state.
    pub fn verify_mirrors(&self) -> Result<(), ScenarioFailure> {
        for replica in &self.replicas {
            replica.verify_mirror().map_err(ScenarioFailure::Assertion)?;
        }
        Ok(())
    }

    pub fn take_outbound(&mut self) -> Vec<ChatRequest> {
        std::mem::take(&mut self.outbound)
    }

    /// Saves the primary replica's state to a slot.
    pub fn save(&self, store: &dyn SnapshotStore, slot: &str) -> Result<(), ScenarioFailure> {
        self.replicas[0].save(store, slot)?;
        Ok(())
    }

    /// Loads a slot into every replica.
    pub fn restore(&mut self, store: &dyn SnapshotStore, slot: &str) -> Result<bool, ScenarioFailure> {
        let mut restored = true;
        for replica in &mut self.replicas {
            restored &= replica.restore(store, slot)?;
        }
        self.inputs.clear();
        self.outbound.clear();
        Ok(restored)
    }

    pub fn take_trace(&mut self) -> Option<TraceExport> {
        self.trace.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptGenerator;
    use proptest::prelude::*;
    use steplock_env::{Position, ViewerId};

    fn world(replicas: usize) -> SimWorld {
        SimWorld::new(SimConfig {
            replicas,
            tick_rate_hz: 10,
            ..SimConfig::default()
        })
    }

    #[test]
    fn test_step_applies_batch_to_every_replica() {
        let mut world = world(3);
        let boundary = world.boundary();
        boundary.deliver_response(ViewerId(1), None, "hi").unwrap();

        let report = world.step().unwrap();

        assert_eq!(report.applied, 1);
        for replica in world.replicas() {
            assert_eq!(replica.state().sessions().total_messages(), 1);
        }
        assert!(world.converged().unwrap());
    }

    #[test]
    fn test_positions_published_from_primary() {
        let mut world = world(2);
        let scout = AgentId::parse("scout").unwrap();
        world.spawn_actor(&scout, Vector2::new(0.0, 0.0));
        let boundary = world.boundary();

        boundary.set_movement("scout", "south").unwrap();
        world.step().unwrap();
        world.step().unwrap();

        // dt = 0.1s at 4 tiles/s: one step of walking so far
        let position = boundary.query_position("scout").unwrap();
        assert_eq!(position.x, 0.0);
        assert!((position.y - 0.4).abs() < 1e-9);
        assert_ne!(position, Position::new(0.0, 0.0));
    }

    #[test]
    fn test_trace_records_every_step() {
        let mut world = world(2).with_trace("unit");
        world.boundary().set_status(ViewerId(1), "busy").unwrap();
        world.run_idle(3).unwrap();

        let trace = world.take_trace().unwrap();
        assert_eq!(trace.frames.len(), 3);
        assert_eq!(trace.frames[0].kinds, vec!["set_status".to_string()]);
        assert_eq!(trace.frames[0].digests.len(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn prop_replicas_converge_for_any_seed(seed in any::<u64>()) {
            let mut world = world(3);
            let mut script = ScriptGenerator::new(seed, 2);
            for agent in script.agents().to_vec() {
                world.spawn_actor(&agent, Vector2::zeros());
            }
            let boundary = world.boundary();

            for _ in 0..30 {
                for command in script.batch(5) {
                    prop_assert!(boundary.submit(command).is_ok());
                }
                for input in script.inputs(2) {
                    world.push_input(input);
                }
                prop_assert!(world.step().is_ok());
            }

            prop_assert!(world.converged().unwrap());
            prop_assert!(world.verify_mirrors().is_ok());
        }
    }
}
