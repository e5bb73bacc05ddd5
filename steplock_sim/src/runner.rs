//! Scenario runner - executes the deterministic simulation scenarios.
//!
//! Every scenario drives a `SimWorld` of lockstep replicas. `SimWorld::step`
//! already fails on the first digest divergence; the scenarios add their own
//! assertions on top (history caps, registry invariants, movement semantics,
//! displayed history equal to stored history).

use crate::error::{ensure, ScenarioFailure};
use crate::exporter::TraceExport;
use crate::feed::ExternalFeed;
use crate::scenarios::ScenarioId;
use crate::script::{CommandMix, ScriptGenerator};
use crate::world::{SimConfig, SimWorld};
use nalgebra::Vector2;
use serde::Serialize;
use std::time::Duration;
use steplock_core::{Command, SledSnapshotStore, StepReport, ViewerInput};
use steplock_env::{AgentId, Direction, Role, ViewerId, WalkingState};
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total steps executed (primary world only)
    pub total_steps: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub steps: u64,
    pub applied: u64,
    pub stale: u64,
    pub refused: u64,
    pub ignored: u64,
    pub evicted: u64,
    pub events: u64,
    pub outbound: u64,
    pub movement_applied: u64,
    pub movement_stale: u64,
    pub reclaimed: u64,

    /// Appends made by concurrent producers
    pub feed_sent: u64,
}

impl ScenarioMetrics {
    /// Adds one step's counters.
    pub fn absorb(&mut self, report: &StepReport) {
        self.steps += 1;
        self.applied += report.applied as u64;
        self.stale += report.stale as u64;
        self.refused += report.refused as u64;
        self.ignored += report.ignored as u64;
        self.evicted += report.evicted as u64;
        self.events += report.events.len() as u64;
        self.outbound += report.outbound.len() as u64;
        self.movement_applied += report.movement.applied as u64;
        self.movement_stale += report.movement.stale as u64;
        self.reclaimed += report.movement.reclaimed as u64;
    }
}

/// A world plus the metrics of its primary replica.
struct Run {
    world: SimWorld,
    metrics: ScenarioMetrics,
}

impl Run {
    fn new(world: SimWorld) -> Self {
        Self {
            world,
            metrics: ScenarioMetrics::default(),
        }
    }

    fn step(&mut self) -> Result<StepReport, ScenarioFailure> {
        let report = self.world.step()?;
        self.metrics.absorb(&report);
        Ok(report)
    }

    fn steps(&mut self, count: u64) -> Result<(), ScenarioFailure> {
        for _ in 0..count {
            self.step()?;
        }
        Ok(())
    }

    /// Queues a join and an open window for viewers `1..=viewers`.
    fn open_windows(&mut self, viewers: u32) {
        for viewer in (1..=viewers).map(ViewerId) {
            self.world.push_input(ViewerInput::Joined { viewer });
            self.world.push_input(ViewerInput::OpenSurface { viewer });
        }
    }

    fn submit_all(&mut self, commands: Vec<Command>) -> Result<(), ScenarioFailure> {
        let boundary = self.world.boundary();
        for command in commands {
            boundary.submit(command)?;
        }
        Ok(())
    }

    fn push_inputs(&mut self, inputs: Vec<ViewerInput>) {
        for input in inputs {
            self.world.push_input(input);
        }
    }

    /// Plays the external agent process: answers every chat request.
    fn answer_outbound(&mut self) -> Result<usize, ScenarioFailure> {
        let boundary = self.world.boundary();
        let requests = self.world.take_outbound();
        for request in &requests {
            boundary.deliver_response(
                request.viewer,
                Some(request.agent.as_str()),
                format!("re: {}", request.text),
            )?;
        }
        Ok(requests.len())
    }
}

/// Registry, selection and cap invariants on every replica, plus the mirrors.
fn check_invariants(world: &SimWorld) -> Result<(), ScenarioFailure> {
    for replica in world.replicas() {
        let state = replica.state();
        let index = replica.index();
        ensure(!state.registry().is_empty(), || {
            format!("replica {}: registry is empty", index)
        })?;

        for (viewer, view) in state.viewers() {
            ensure(state.registry().contains(&view.active_agent), || {
                format!(
                    "replica {}: {} has unregistered active agent {}",
                    index, viewer, view.active_agent
                )
            })?;
        }

        let sessions = state.sessions();
        for viewer in sessions.viewers() {
            for agent in sessions.agents_of(viewer) {
                let len = sessions.history_len(viewer, agent);
                ensure(len <= sessions.cap(), || {
                    format!("replica {}: {}/{} holds {} messages", index, viewer, agent, len)
                })?;
            }
        }
    }
    world.verify_mirrors()
}

fn agent(raw: &str) -> Result<AgentId, ScenarioFailure> {
    AgentId::parse(raw).map_err(|e| ScenarioFailure::Assertion(e.to_string()))
}

/// Runs simulation scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of lockstep replicas
    replicas: usize,

    /// Number of viewers
    viewers: u32,

    /// Steps for the open-ended scenarios
    steps: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        let defaults = SimConfig::default();
        Self {
            seed,
            replicas: defaults.replicas,
            viewers: defaults.viewers,
            steps: defaults.steps,
        }
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas.max(1);
        self
    }

    pub fn with_viewers(mut self, viewers: u32) -> Self {
        self.viewers = viewers.max(1);
        self
    }

    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps.max(1);
        self
    }

    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            replicas: self.replicas,
            viewers: self.viewers,
            steps: self.steps,
            ..SimConfig::default()
        }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, false).0
    }

    /// Runs a scenario and also returns its per-step trace.
    pub fn run_traced(&self, scenario: ScenarioId) -> (ScenarioResult, TraceExport) {
        let (result, trace) = self.execute(scenario, true);
        let trace =
            trace.unwrap_or_else(|| TraceExport::new(scenario.name(), self.seed, self.replicas));
        (result, trace)
    }

    fn execute(&self, scenario: ScenarioId, traced: bool) -> (ScenarioResult, Option<TraceExport>) {
        info!(
            "Starting scenario: {} (seed={}, replicas={})",
            scenario.name(),
            self.seed,
            self.replicas
        );

        let mut world = SimWorld::new(self.config());
        if traced {
            world = world.with_trace(scenario.name());
        }
        let mut run = Run::new(world);

        let outcome = match scenario {
            ScenarioId::Conversation => self.run_conversation(&mut run),
            ScenarioId::HistoryCap => self.run_history_cap(&mut run),
            ScenarioId::AgentChurn => self.run_agent_churn(&mut run),
            ScenarioId::Movement => self.run_movement(&mut run),
            ScenarioId::Convergence => self.run_convergence(&mut run),
            ScenarioId::ConcurrentFeed => self.run_concurrent_feed(&mut run),
            ScenarioId::SaveReload => self.run_save_reload(&mut run),
            ScenarioId::ObserverMode => self.run_observer_mode(&mut run),
        };

        let failure_reason = match outcome {
            Ok(()) => {
                info!("✓ {} passed after {} steps", scenario.name(), run.metrics.steps);
                None
            }
            Err(failure) => {
                warn!("✗ {} failed: {}", scenario.name(), failure);
                Some(failure.to_string())
            }
        };
        let passed = failure_reason.is_none();

        let mut trace = run.world.take_trace();
        if let Some(trace) = &mut trace {
            trace.finalize(passed, failure_reason.clone());
        }

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_steps: run.metrics.steps,
            failure_reason,
            metrics: run.metrics,
        };
        (result, trace)
    }

    /// SIM-001: Conversation.
    ///
    /// Random chat traffic across viewers and agents while a stand-in agent
    /// process answers every outbound request.
    ///
    /// **Assertion**: every window shows exactly the stored history, and the
    /// registry/selection invariants hold after every step.
    fn run_conversation(&self, run: &mut Run) -> Result<(), ScenarioFailure> {
        let mut script = ScriptGenerator::new(self.seed, self.viewers);
        for (i, agent) in script.agents().to_vec().iter().enumerate() {
            run.world.spawn_actor(agent, Vector2::new(i as f64 * 4.0, 0.0));
        }

        run.open_windows(self.viewers);
        run.step()?;

        let boundary = run.world.boundary();
        boundary.register_agent("scout", Some("Scout"))?;
        boundary.register_agent("miner", Some("Miner"))?;
        boundary.register_agent("builder", None)?;
        run.step()?;

        let mut answered = 0;
        for step in 0..self.steps {
            run.submit_all(script.batch(6))?;
            run.push_inputs(script.inputs(2));
            run.step()?;
            answered += run.answer_outbound()?;
            check_invariants(&run.world)?;

            if step % 50 == 0 {
                debug!(
                    "  step={} | messages={} | answered={}",
                    step,
                    run.world.primary().state().sessions().total_messages(),
                    answered
                );
            }
        }

        ensure(run.metrics.applied > 0, || "no envelope was ever applied".into())?;
        info!("✓ Conversation: {} envelopes, {} requests answered", run.metrics.applied, answered);
        Ok(())
    }

    /// SIM-002: HistoryCap.
    ///
    /// **Assertion**: after cap + 50 responses the session holds exactly the
    /// newest `cap` messages, oldest first, and the window renders the same.
    fn run_history_cap(&self, run: &mut Run) -> Result<(), ScenarioFailure> {
        let cap = run.world.config().history_cap;
        let viewer = ViewerId(1);
        let default = AgentId::default_agent();
        let boundary = run.world.boundary();

        run.open_windows(1);
        run.step()?;

        let total = cap + 50;
        for n in 0..total {
            boundary.deliver_response(viewer, None, format!("m{}", n))?;
            if n % 25 == 24 {
                run.step()?;
            }
        }
        run.step()?;

        for replica in run.world.replicas() {
            let texts: Vec<String> = replica
                .state()
                .sessions()
                .session(viewer, &default)
                .map(|s| s.messages().map(|m| m.text.clone()).collect())
                .unwrap_or_default();
            ensure(texts.len() == cap, || format!("{} messages kept, cap is {}", texts.len(), cap))?;
            ensure(texts.first() == Some(&format!("m{}", total - cap)), || {
                format!("oldest kept message is {:?}", texts.first())
            })?;
            ensure(texts.last() == Some(&format!("m{}", total - 1)), || {
                format!("newest kept message is {:?}", texts.last())
            })?;
            ensure(replica.mirror().rendered(viewer, &default).len() == cap, || {
                "rendered list not capped".into()
            })?;
        }
        ensure(run.metrics.evicted == 50, || format!("{} evictions, expected 50", run.metrics.evicted))?;
        run.world.verify_mirrors()?;

        boundary.clear_session(viewer, None)?;
        run.step()?;
        ensure(run.world.primary().state().sessions().history_len(viewer, &default) == 0, || {
            "clear left messages behind".into()
        })?;
        run.world.verify_mirrors()?;

        info!("✓ HistoryCap: {} evicted, {} kept", run.metrics.evicted, cap);
        Ok(())
    }

    /// SIM-003: AgentChurn.
    ///
    /// **Assertion**: the registry never empties, every active agent stays
    /// registered, and a mass unregister keeps exactly one agent and every
    /// session.
    fn run_agent_churn(&self, run: &mut Run) -> Result<(), ScenarioFailure> {
        let mut script = ScriptGenerator::new(self.seed, self.viewers)
            .with_mix(CommandMix::churn())
            .with_agents(&["default", "scout", "miner", "builder", "crafter"]);

        run.open_windows(self.viewers);
        run.step()?;

        for _ in 0..self.steps {
            run.submit_all(script.batch(8))?;
            run.push_inputs(script.inputs(1));
            run.step()?;
            check_invariants(&run.world)?;
        }

        let boundary = run.world.boundary();
        let registered: Vec<AgentId> = run
            .world
            .primary()
            .state()
            .registry()
            .ids()
            .cloned()
            .collect();
        for agent in &registered {
            boundary.unregister_agent(agent.as_str())?;
        }
        let report = run.step()?;
        check_invariants(&run.world)?;

        let state = run.world.primary().state();
        ensure(state.registry().len() == 1, || {
            format!("{} agents left after mass unregister", state.registry().len())
        })?;
        ensure(report.refused == 1, || format!("{} refusals, expected 1", report.refused))?;
        for viewer in (1..=self.viewers).map(ViewerId) {
            let kept: Vec<&AgentId> = state.sessions().agents_of(viewer).collect();
            for agent in &registered {
                ensure(kept.contains(&agent), || format!("{}/{} session dropped", viewer, agent))?;
            }
        }

        info!(
            "✓ AgentChurn: {} applied, {} stale, {} refused",
            run.metrics.applied, run.metrics.stale, run.metrics.refused
        );
        Ok(())
    }

    /// SIM-004: Movement.
    ///
    /// **Assertion**: set+stop in one step delivers exactly walk then stop,
    /// walking persists across steps, dead actors are skipped without losing
    /// the directive, and unregistering stops the actor.
    fn run_movement(&self, run: &mut Run) -> Result<(), ScenarioFailure> {
        let scout = agent("scout")?;
        let miner = agent("miner")?;
        let builder = agent("builder")?;
        run.world.spawn_actor(&scout, Vector2::new(0.0, 0.0));
        run.world.spawn_actor(&miner, Vector2::new(10.0, 10.0));
        run.world.spawn_actor(&builder, Vector2::new(-10.0, 5.0));
        let boundary = run.world.boundary();

        // Set and stop in the same step
        boundary.set_movement("scout", "east")?;
        boundary.stop_movement("scout")?;
        run.step()?;
        for replica in run.world.replicas() {
            let log = replica.field().directive_log(&scout);
            ensure(
                log == vec![WalkingState::Walking(Direction::East), WalkingState::Stopped],
                || format!("scout received {:?}", log),
            )?;
            ensure(replica.state().movement().get(&scout).is_none(), || {
                "stop entry was not reclaimed".into()
            })?;
        }

        // Walking persists
        boundary.set_movement("miner", "north")?;
        run.step()?;
        run.steps(10)?;
        let field = run.world.primary().field();
        let log = field.directive_log(&miner);
        ensure(
            log.len() == 11 && log.iter().all(|s| *s == WalkingState::Walking(Direction::North)),
            || format!("miner received {:?}", log),
        )?;
        let expected_y = 10.0 - 10.0 * run.world.config().actor_speed * run.world.config().dt();
        let position = field
            .position(&miner)
            .ok_or_else(|| ScenarioFailure::Assertion("miner vanished".into()))?;
        ensure((position.y - expected_y).abs() < 1e-9 && position.x == 10.0, || {
            format!("miner at ({}, {}), expected y {}", position.x, position.y, expected_y)
        })?;
        let published = boundary.query_position("miner");
        ensure(published.is_some_and(|p| p.x == position.x && p.y == position.y), || {
            format!("published position {:?}", published)
        })?;

        // Dead actor
        run.world.kill_actor(&builder);
        boundary.set_movement("builder", "west")?;
        let report = run.step()?;
        ensure(report.stale == 1, || format!("{} stale, expected 1", report.stale))?;
        ensure(run.world.primary().field().directive_log(&builder).is_empty(), || {
            "dead actor received a directive".into()
        })?;
        ensure(run.world.primary().state().movement().get(&builder).is_some(), || {
            "directive for a dead actor was dropped".into()
        })?;
        boundary.stop_movement("builder")?;
        let report = run.step()?;
        ensure(report.movement.reclaimed == 1, || {
            format!("{} reclaimed, expected 1", report.movement.reclaimed)
        })?;

        // Unregister stops the actor
        boundary.register_agent("scout", None)?;
        boundary.register_agent("miner", None)?;
        run.step()?;
        boundary.unregister_agent("miner")?;
        run.step()?;
        let before = run.world.primary().field().position(&miner);
        run.steps(3)?;
        let field = run.world.primary().field();
        ensure(field.directive_log(&miner).last() == Some(&WalkingState::Stopped), || {
            "unregistered agent was not stopped".into()
        })?;
        ensure(field.position(&miner) == before, || "unregistered agent kept walking".into())?;

        // Random directives, then stop everyone
        let mut script = ScriptGenerator::new(self.seed, self.viewers)
            .with_mix(CommandMix::movement())
            .with_agents(&["scout", "miner", "builder"]);
        for _ in 0..self.steps {
            run.submit_all(script.batch(4))?;
            run.step()?;
        }
        for raw in ["scout", "miner", "builder"] {
            boundary.stop_movement(raw)?;
        }
        run.step()?;
        for replica in run.world.replicas() {
            ensure(replica.state().movement().is_empty(), || {
                format!("replica {}: movement entries left", replica.index())
            })?;
        }

        info!(
            "✓ Movement: {} pass directives, {} stale, {} reclaimed",
            run.metrics.movement_applied, run.metrics.movement_stale, run.metrics.reclaimed
        );
        Ok(())
    }

    /// SIM-005: Convergence.
    ///
    /// **Assertion**: every replica's digest matches after every step, and a
    /// second world fed the same seed ends on the same digest.
    fn run_convergence(&self, run: &mut Run) -> Result<(), ScenarioFailure> {
        let first = self.convergence_script(run)?;

        let mut replay = Run::new(SimWorld::new(self.config()));
        let second = self.convergence_script(&mut replay)?;
        ensure(first == second, || format!("replay ended on {} instead of {}", second, first))?;

        info!("✓ Convergence: {} replicas agree on {}", self.replicas, &first[..12]);
        Ok(())
    }

    fn convergence_script(&self, run: &mut Run) -> Result<String, ScenarioFailure> {
        let mut script = ScriptGenerator::new(self.seed, self.viewers);
        let agents = script.agents().to_vec();
        for (i, agent) in agents.iter().enumerate() {
            run.world.spawn_actor(agent, Vector2::new(0.0, i as f64 * 3.0));
        }
        run.open_windows(self.viewers);

        for step in 0..self.steps {
            let victim = &agents[(step / 40) as usize % agents.len()];
            if step % 40 == 20 {
                run.world.kill_actor(victim);
            } else if step % 40 == 39 {
                run.world.spawn_actor(victim, Vector2::zeros());
            }

            run.submit_all(script.batch(6))?;
            run.push_inputs(script.inputs(3));
            run.step()?;
            run.answer_outbound()?;
        }

        check_invariants(&run.world)?;
        ensure(run.world.converged()?, || "replicas disagree at the end".into())?;
        Ok(run.world.primary().digest()?)
    }

    /// SIM-006: ConcurrentFeed.
    ///
    /// Tokio producers append through boundary clones while this thread keeps
    /// stepping. Batch boundaries vary from run to run; what the replicas
    /// apply must not.
    ///
    /// **Assertion**: nothing lost, nothing reordered within a producer,
    /// sequence numbers strictly increasing across steps.
    fn run_concurrent_feed(&self, run: &mut Run) -> Result<(), ScenarioFailure> {
        let cap = run.world.config().history_cap;
        let per_producer = (cap as u32).min(50);
        let feed = ExternalFeed::new(4, per_producer);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()?;
        let boundary = run.world.boundary();
        let handle = runtime.spawn(feed.run(boundary.clone()));

        let mut last_seq: Option<u64> = None;
        loop {
            let finished = handle.is_finished();
            let report = run.step()?;
            for seq in &report.seqs {
                ensure(last_seq.map_or(true, |last| *seq > last), || {
                    format!("seq {} applied after {:?}", seq, last_seq)
                })?;
                last_seq = Some(*seq);
            }
            if finished && boundary.pending_len() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_micros(200));
        }

        let sent = runtime
            .block_on(handle)
            .map_err(|e| ScenarioFailure::Join(e.to_string()))??;
        run.metrics.feed_sent = sent.sent;
        let expected = u64::from(feed.producers()) * u64::from(per_producer);
        ensure(sent.sent == expected && sent.rejected == 0, || {
            format!("{} sent, {} rejected, expected {}", sent.sent, sent.rejected, expected)
        })?;

        let default = AgentId::default_agent();
        for replica in run.world.replicas() {
            for producer in 0..feed.producers() {
                let viewer = ExternalFeed::viewer_of(producer);
                let texts: Vec<String> = replica
                    .state()
                    .sessions()
                    .session(viewer, &default)
                    .map(|s| s.messages().map(|m| m.text.clone()).collect())
                    .unwrap_or_default();
                let wanted: Vec<String> = (0..per_producer)
                    .map(|n| ExternalFeed::text_of(producer, n))
                    .collect();
                ensure(texts == wanted, || {
                    format!("replica {}: producer {} history out of order", replica.index(), producer)
                })?;
            }
        }

        info!("✓ ConcurrentFeed: {} appends over {} steps", sent.sent, run.metrics.steps);
        Ok(())
    }

    /// SIM-007: SaveReload.
    ///
    /// **Assertion**: a reload restores registry, sessions, selection and
    /// observer flag exactly, and clears directives and surfaces.
    fn run_save_reload(&self, run: &mut Run) -> Result<(), ScenarioFailure> {
        let store = SledSnapshotStore::open_temp()?;
        let mut script = ScriptGenerator::new(self.seed, self.viewers);
        for agent in script.agents().to_vec() {
            run.world.spawn_actor(&agent, Vector2::zeros());
        }
        run.open_windows(self.viewers);
        let boundary = run.world.boundary();
        boundary.register_agent("scout", Some("Scout"))?;

        let half = (self.steps / 2).max(1);
        for _ in 0..half {
            run.submit_all(script.batch(5))?;
            run.push_inputs(script.inputs(2));
            run.step()?;
            run.answer_outbound()?;
        }
        boundary.set_movement("scout", "east")?;
        run.step()?;

        let saved_step = run.world.primary().state().step();
        let saved = serde_json::to_value(run.world.primary().state())?;
        run.world.save(&store, "quick")?;

        for _ in 0..half {
            run.submit_all(script.batch(5))?;
            run.push_inputs(script.inputs(2));
            run.step()?;
            run.answer_outbound()?;
        }

        ensure(run.world.restore(&store, "quick")?, || "slot was empty".into())?;
        for replica in run.world.replicas() {
            let state = replica.state();
            ensure(serde_json::to_value(state)? == saved, || {
                format!("replica {}: restored state differs from saved", replica.index())
            })?;
            ensure(state.step() == saved_step, || "step counter not restored".into())?;
            ensure(state.movement().is_empty(), || "movement survived a reload".into())?;
            ensure(state.viewers().all(|(_, v)| v.surface.is_none()), || {
                "surface survived a reload".into()
            })?;
        }
        ensure(run.world.converged()?, || "replicas disagree after reload".into())?;

        // Reopened windows replay the restored history
        run.open_windows(self.viewers);
        run.step()?;
        check_invariants(&run.world)?;
        let scout = agent("scout")?;
        let before = run.world.primary().field().position(&scout);
        run.steps(5)?;
        ensure(run.world.primary().field().position(&scout) == before, || {
            "actor kept walking after reload".into()
        })?;

        ensure(!run.world.restore(&store, "missing")?, || "missing slot restored".into())?;

        info!("✓ SaveReload: restored step {} from sled", saved_step);
        Ok(())
    }

    /// SIM-008: ObserverMode.
    ///
    /// **Assertion**: submits are refused while the mode is on, late joiners
    /// learn about it, and submits work again once it is off.
    fn run_observer_mode(&self, run: &mut Run) -> Result<(), ScenarioFailure> {
        let boundary = run.world.boundary();
        run.open_windows(self.viewers);
        run.step()?;

        boundary.set_observer_mode(true)?;
        run.step()?;
        for viewer in (1..=self.viewers).map(ViewerId) {
            ensure(
                run.world
                    .primary()
                    .mirror()
                    .window(viewer)
                    .is_some_and(|w| w.observer),
                || format!("{} never saw observer mode", viewer),
            )?;
        }

        for viewer in (1..=self.viewers).map(ViewerId) {
            run.world.push_input(ViewerInput::Submit { viewer, text: "hello?".into() });
        }
        let report = run.step()?;
        ensure(report.refused == self.viewers as usize, || {
            format!("{} refused, expected {}", report.refused, self.viewers)
        })?;
        ensure(report.outbound.is_empty(), || "refused submit produced a request".into())?;
        ensure(run.world.primary().state().sessions().total_messages() == 0, || {
            "refused submit was stored".into()
        })?;

        let late = ViewerId(self.viewers + 1);
        run.world.push_input(ViewerInput::Joined { viewer: late });
        run.world.push_input(ViewerInput::OpenSurface { viewer: late });
        run.step()?;
        ensure(
            run.world.primary().mirror().window(late).is_some_and(|w| w.observer),
            || "late joiner missed observer mode".into(),
        )?;

        boundary.set_observer_mode(false)?;
        run.world.push_input(ViewerInput::Submit { viewer: late, text: "now?".into() });
        let report = run.step()?;
        ensure(report.outbound.len() == 1, || format!("{} requests", report.outbound.len()))?;
        run.answer_outbound()?;
        run.step()?;

        let default = AgentId::default_agent();
        let roles: Vec<Role> = run
            .world
            .primary()
            .state()
            .sessions()
            .session(late, &default)
            .map(|s| s.messages().map(|m| m.role).collect())
            .unwrap_or_default();
        ensure(roles == vec![Role::User, Role::Agent], || format!("late history {:?}", roles))?;
        check_invariants(&run.world)?;

        info!("✓ ObserverMode: {} submits refused", run.metrics.refused);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_passes(scenario: ScenarioId, runner: ScenarioRunner) {
        let result = runner.run(scenario);
        assert!(result.passed, "{}: {:?}", scenario, result.failure_reason);
        assert!(result.total_steps > 0);
    }

    #[test]
    fn test_conversation() {
        assert_passes(ScenarioId::Conversation, ScenarioRunner::new(42).with_steps(80));
    }

    #[test]
    fn test_history_cap() {
        let result = ScenarioRunner::new(42).run(ScenarioId::HistoryCap);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.evicted, 50);
    }

    #[test]
    fn test_agent_churn() {
        assert_passes(ScenarioId::AgentChurn, ScenarioRunner::new(7).with_steps(80));
    }

    #[test]
    fn test_movement() {
        assert_passes(ScenarioId::Movement, ScenarioRunner::new(3).with_steps(40));
    }

    #[test]
    fn test_convergence_many_replicas() {
        assert_passes(
            ScenarioId::Convergence,
            ScenarioRunner::new(11).with_replicas(5).with_viewers(3).with_steps(120),
        );
    }

    #[test]
    fn test_concurrent_feed() {
        let result = ScenarioRunner::new(42).with_replicas(2).run(ScenarioId::ConcurrentFeed);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.feed_sent, 200);
    }

    #[test]
    fn test_save_reload() {
        assert_passes(ScenarioId::SaveReload, ScenarioRunner::new(5).with_steps(60));
    }

    #[test]
    fn test_observer_mode() {
        assert_passes(ScenarioId::ObserverMode, ScenarioRunner::new(42));
    }

    #[test]
    fn test_same_seed_same_trace() {
        let runner = ScenarioRunner::new(99).with_steps(40);
        let (first, trace_a) = runner.run_traced(ScenarioId::Conversation);
        let (second, trace_b) = runner.run_traced(ScenarioId::Conversation);

        assert!(first.passed && second.passed);
        assert_eq!(first.metrics, second.metrics);
        assert_eq!(trace_a.frames, trace_b.frames);
        assert!(trace_a.passed);
    }
}
