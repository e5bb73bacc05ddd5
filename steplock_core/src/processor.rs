//! Deterministic queue processor.
//!
//! Runs exactly once per simulation step. The caller hands it the batch it
//! drained from the boundary; the processor applies the batch in order, then
//! the step's viewer inputs, then the movement pass. Nothing here reads a
//! clock, a random source or any I/O, so every replica that applies the same
//! batch to the same state ends in the same state.
//!
//! # Step order
//!
//! ```text
//! step += 1
//!   |-- envelopes (append order) --> registry / sessions / movement
//!   |-- viewer inputs             --> selection / surfaces / submits
//!   |-- movement pass             --> actors
//!   v
//! StepReport { events, outbound, counters }
//! ```
//!
//! Every handler is total: stale references are skipped, refused
//! invariant violations leave state unchanged, and both are only counted.

use crate::config::CoreConfig;
use crate::envelope::{Command, Envelope};
use crate::movement::{MovementReport, MovementTable};
use crate::registry::{AgentRegistry, Registration, Removal};
use crate::session::{Message, SessionStore};
use crate::viewer::{ViewerInput, ViewerState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use steplock_env::{
    ActorHost, AgentId, Direction, PresentationEvent, RequestId, Role, SurfaceHandle, ViewerId,
    WalkingState,
};
use tracing::{debug, info};

/// Everything the processor owns.
///
/// Registry, sessions, active-agent selection and the observer flag are
/// persisted. The movement table and surface counter are transient and come
/// back empty from a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreState {
    pub(crate) step: u64,
    pub(crate) registry: AgentRegistry,
    pub(crate) sessions: SessionStore,
    pub(crate) viewers: BTreeMap<ViewerId, ViewerState>,
    pub(crate) observer_mode: bool,

    #[serde(skip)]
    pub(crate) movement: MovementTable,

    #[serde(skip)]
    pub(crate) next_surface: u32,
}

impl CoreState {
    /// Creates an empty state whose sessions keep `history_cap` messages.
    pub fn new(history_cap: usize) -> Self {
        Self {
            step: 0,
            registry: AgentRegistry::new(),
            sessions: SessionStore::new(history_cap),
            viewers: BTreeMap::new(),
            observer_mode: false,
            movement: MovementTable::new(),
            next_surface: 0,
        }
    }

    /// Creates an empty state sized by the config.
    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.effective_history_cap())
    }

    /// Number of the last completed step (0 before the first).
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn movement(&self) -> &MovementTable {
        &self.movement
    }

    pub fn observer_mode(&self) -> bool {
        self.observer_mode
    }

    pub fn viewer(&self, viewer: ViewerId) -> Option<&ViewerState> {
        self.viewers.get(&viewer)
    }

    pub fn viewers(&self) -> impl Iterator<Item = (ViewerId, &ViewerState)> {
        self.viewers.iter().map(|(id, state)| (*id, state))
    }

    /// The viewer's selected tab.
    pub fn active_agent(&self, viewer: ViewerId) -> Option<&AgentId> {
        self.viewers.get(&viewer).map(|v| &v.active_agent)
    }

    /// SHA-256 over the replicated state, as lowercase hex.
    ///
    /// Covers the persisted fields and the movement table, so two replicas
    /// with equal digests agree on registry, sessions and movement.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self)?);
        for entry in self.movement.iter() {
            hasher.update(serde_json::to_vec(&entry)?);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new(crate::config::HISTORY_CAP)
    }
}

/// A submitted viewer message, handed to the external agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub request_id: RequestId,
    pub viewer: ViewerId,
    pub agent: AgentId,
    pub text: String,
    pub step: u64,
}

impl ChatRequest {
    /// Encodes the request as one JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// What one step did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: u64,

    /// Sequence numbers of the envelopes in the order they were applied
    pub seqs: Vec<u64>,

    /// Envelopes and viewer inputs that took effect
    pub applied: usize,

    /// Skipped because the viewer, agent or actor no longer exists
    pub stale: usize,

    /// Refused to protect an invariant (last agent, observer mode)
    pub refused: usize,

    /// No-ops such as a blank submit or reopening an open surface
    pub ignored: usize,

    /// Messages dropped by the history cap
    pub evicted: usize,

    /// Presentation events, in emission order
    pub events: Vec<PresentationEvent>,

    /// Chat requests for the external agent process
    pub outbound: Vec<ChatRequest>,

    pub movement: MovementReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Applied,
    Stale,
    Refused,
    Ignored,
}

/// Applies step batches to a `CoreState`.
#[derive(Debug, Clone, Default)]
pub struct Processor {
    config: CoreConfig,
}

impl Processor {
    pub fn new(config: CoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Runs one step.
    ///
    /// `batch` is applied strictly in the given order, which is the order
    /// the boundary drained it in. `inputs` follow the batch.
    pub fn step<H: ActorHost>(
        &self,
        state: &mut CoreState,
        batch: Vec<Envelope>,
        inputs: Vec<ViewerInput>,
        host: &mut H,
    ) -> StepReport {
        state.step += 1;
        let step = state.step;

        let mut dispatch = Dispatch {
            config: &self.config,
            state,
            host,
            report: StepReport {
                step,
                ..StepReport::default()
            },
        };

        for envelope in batch {
            dispatch.apply_envelope(envelope);
        }
        for input in inputs {
            dispatch.apply_input(input);
        }

        let Dispatch {
            state,
            host,
            mut report,
            ..
        } = dispatch;
        report.movement = state.movement.apply_step(host);

        debug!(
            step,
            applied = report.applied,
            stale = report.stale,
            refused = report.refused,
            events = report.events.len(),
            "step complete"
        );
        report
    }
}

struct Dispatch<'a, H> {
    config: &'a CoreConfig,
    state: &'a mut CoreState,
    host: &'a mut H,
    report: StepReport,
}

impl<'a, H: ActorHost> Dispatch<'a, H> {
    fn apply_envelope(&mut self, envelope: Envelope) {
        let Envelope { seq, command } = envelope;
        let kind = command.kind();

        let outcome = match command {
            Command::DeliverResponse {
                viewer,
                agent,
                text,
            } => self.deliver_response(viewer, agent, text),
            Command::ToolStatus {
                viewer,
                agent,
                tool,
            } => self.tool_status(viewer, agent, tool),
            Command::SetStatus { viewer, text } => self.set_status(viewer, text),
            Command::ClearSession { viewer, agent } => self.clear_session(viewer, agent),
            Command::RegisterAgent { agent, label } => self.register_agent(agent, label),
            Command::UnregisterAgent { agent } => self.unregister_agent(agent),
            Command::SetMovement { agent, direction } => self.set_movement(agent, direction),
            Command::StopMovement { agent } => self.stop_movement(agent),
            Command::SetObserverMode { enabled } => self.set_observer_mode(enabled),
        };

        debug!(seq, kind, ?outcome, "dispatched");
        self.report.seqs.push(seq);
        self.tally(outcome);
    }

    fn apply_input(&mut self, input: ViewerInput) {
        let viewer = input.viewer();
        let name = input.name();

        let outcome = if !viewer.is_valid() {
            Outcome::Stale
        } else {
            match input {
                ViewerInput::Joined { viewer } => self.joined(viewer),
                ViewerInput::Left { viewer } => self.left(viewer),
                ViewerInput::OpenSurface { viewer } => self.open_surface(viewer),
                ViewerInput::CloseSurface { viewer } => {
                    if self.close_surface(viewer) {
                        Outcome::Applied
                    } else {
                        Outcome::Ignored
                    }
                }
                ViewerInput::Resize {
                    viewer,
                    width,
                    height,
                } => self.resize(viewer, width, height),
                ViewerInput::SelectTab { viewer, agent } => self.select_tab(viewer, agent),
                ViewerInput::Submit { viewer, text } => self.submit(viewer, text),
            }
        };

        debug!(%viewer, input = name, ?outcome, "viewer input");
        self.tally(outcome);
    }

    fn tally(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.report.applied += 1,
            Outcome::Stale => self.report.stale += 1,
            Outcome::Refused => self.report.refused += 1,
            Outcome::Ignored => self.report.ignored += 1,
        }
    }

    // ---- agent resolution ----

    /// The first registered agent, registering the placeholder if the
    /// registry is still empty.
    fn default_agent(&mut self) -> AgentId {
        if self
            .state
            .registry
            .ensure_placeholder(&self.config.default_agent_label)
        {
            info!(agent = AgentId::DEFAULT, "registered placeholder agent");
            self.state.sessions.ensure_agent(&AgentId::default_agent());
        }
        self.state
            .registry
            .first()
            .map(|a| a.id.clone())
            .unwrap_or_else(AgentId::default_agent)
    }

    fn resolve_agent(&mut self, agent: Option<AgentId>) -> Option<AgentId> {
        match agent {
            Some(agent) if self.state.registry.contains(&agent) => Some(agent),
            Some(agent) => {
                debug!(%agent, "agent is not registered");
                None
            }
            None => Some(self.default_agent()),
        }
    }

    /// Makes the viewer known, with sessions for every registered agent.
    fn ensure_viewer(&mut self, viewer: ViewerId) {
        let first = self.default_agent();
        if self.state.viewers.contains_key(&viewer) {
            return;
        }
        let state = &mut *self.state;
        state.sessions.ensure_viewer(viewer, state.registry.ids());
        state.viewers.insert(viewer, ViewerState::new(first));
        debug!(%viewer, "viewer became known");
    }

    // ---- presentation helpers ----

    fn has_surface(&self, viewer: ViewerId) -> bool {
        self.state
            .viewers
            .get(&viewer)
            .is_some_and(ViewerState::has_surface)
    }

    fn emit_to(&mut self, viewer: ViewerId, event: PresentationEvent) {
        if self.has_surface(viewer) {
            self.report.events.push(event);
        }
    }

    /// Emits one event per viewer with an open surface, in viewer order.
    fn broadcast(&mut self, make: impl Fn(ViewerId) -> PresentationEvent) {
        let open: Vec<ViewerId> = self
            .state
            .viewers
            .iter()
            .filter(|(_, v)| v.has_surface())
            .map(|(id, _)| *id)
            .collect();
        self.report.events.extend(open.into_iter().map(make));
    }

    fn show_status(&mut self, viewer: ViewerId, text: String) {
        self.emit_to(viewer, PresentationEvent::SetStatus { viewer, text });
    }

    /// Appends to history and mirrors the message onto an open surface.
    fn append_message(&mut self, viewer: ViewerId, agent: &AgentId, role: Role, text: String) {
        let message = Message::new(role, text.clone(), self.state.step);
        if self.state.sessions.append(viewer, agent, message).is_some() {
            self.report.evicted += 1;
        }

        let Some(view) = self.state.viewers.get_mut(&viewer) else {
            return;
        };
        let unread = &view.active_agent != agent;
        if unread {
            *view.badges.entry(agent.clone()).or_insert(0) += 1;
        }
        if !view.has_surface() {
            return;
        }
        self.report.events.push(PresentationEvent::AppendMessage {
            viewer,
            agent: agent.clone(),
            role,
            text,
        });
        if unread {
            self.report.events.push(PresentationEvent::IncrementBadge {
                viewer,
                agent: agent.clone(),
            });
        }
    }

    // ---- envelope handlers ----

    fn deliver_response(
        &mut self,
        viewer: ViewerId,
        agent: Option<AgentId>,
        text: String,
    ) -> Outcome {
        let Some(agent) = self.resolve_agent(agent) else {
            return Outcome::Stale;
        };
        self.ensure_viewer(viewer);
        self.append_message(viewer, &agent, Role::Agent, text);
        let config = self.config;
        self.show_status(viewer, config.ready_status.clone());
        Outcome::Applied
    }

    fn tool_status(&mut self, viewer: ViewerId, agent: Option<AgentId>, tool: String) -> Outcome {
        let Some(agent) = self.resolve_agent(agent) else {
            return Outcome::Stale;
        };
        self.ensure_viewer(viewer);
        let label = self.state.registry.label_of(&agent);
        self.show_status(viewer, format!("{label}: {tool}..."));
        Outcome::Applied
    }

    fn set_status(&mut self, viewer: ViewerId, text: String) -> Outcome {
        self.ensure_viewer(viewer);
        self.show_status(viewer, text);
        Outcome::Applied
    }

    fn clear_session(&mut self, viewer: ViewerId, agent: Option<AgentId>) -> Outcome {
        if let Some(agent) = &agent {
            if !self.state.registry.contains(agent) {
                debug!(%agent, "clear for unregistered agent");
                return Outcome::Stale;
            }
        }
        self.ensure_viewer(viewer);

        let state = &mut *self.state;
        state
            .sessions
            .clear(viewer, agent.as_ref(), state.registry.ids());
        if let Some(view) = state.viewers.get_mut(&viewer) {
            match &agent {
                Some(agent) => {
                    view.badges.remove(agent);
                }
                None => view.badges.clear(),
            }
            if view.has_surface() {
                self.report
                    .events
                    .push(PresentationEvent::ClearMessages { viewer, agent });
            }
        }
        Outcome::Applied
    }

    fn register_agent(&mut self, agent: AgentId, label: Option<String>) -> Outcome {
        match self.state.registry.register(agent.clone(), label) {
            Registration::Added => {
                let label = self.state.registry.label_of(&agent);
                info!(%agent, %label, "agent registered");
                self.state.sessions.ensure_agent(&agent);
                self.add_tab(&agent, &label);
            }
            Registration::Relabeled => {
                let label = self.state.registry.label_of(&agent);
                info!(%agent, %label, "agent relabeled");
                self.broadcast(|viewer| PresentationEvent::RelabelTab {
                    viewer,
                    agent: agent.clone(),
                    label: label.clone(),
                });
            }
            Registration::Unchanged => debug!(%agent, "agent already registered"),
        }
        Outcome::Applied
    }

    /// Adds the agent's tab to every open surface. A re-registered agent
    /// brings back whatever history its sessions kept.
    fn add_tab(&mut self, agent: &AgentId, label: &str) {
        let state = &*self.state;
        let mut events = Vec::new();
        for (viewer, view) in &state.viewers {
            if !view.has_surface() {
                continue;
            }
            events.push(PresentationEvent::AddTab {
                viewer: *viewer,
                agent: agent.clone(),
                label: label.to_string(),
            });
            let Some(session) = state.sessions.session(*viewer, agent) else {
                continue;
            };
            events.extend(session.messages().map(|m| PresentationEvent::AppendMessage {
                viewer: *viewer,
                agent: agent.clone(),
                role: m.role,
                text: m.text.clone(),
            }));
        }
        self.report.events.extend(events);
    }

    fn unregister_agent(&mut self, agent: AgentId) -> Outcome {
        match self.state.registry.unregister(&agent) {
            Removal::Removed(_) => {
                info!(%agent, "agent unregistered");
                self.broadcast(|viewer| PresentationEvent::RemoveTab {
                    viewer,
                    agent: agent.clone(),
                });

                self.state.movement.remove(&agent);
                if self.host.is_actor_valid(&agent) {
                    self.host.apply_walking(&agent, WalkingState::Stopped);
                }

                self.reassign_active(&agent);
                Outcome::Applied
            }
            Removal::Refused => {
                info!(%agent, "refusing to unregister the last agent");
                Outcome::Refused
            }
            Removal::Unknown => Outcome::Stale,
        }
    }

    /// Moves every viewer looking at `removed` to the first remaining agent.
    fn reassign_active(&mut self, removed: &AgentId) {
        let Some(first) = self.state.registry.first().map(|a| a.id.clone()) else {
            return;
        };
        for (viewer, view) in self.state.viewers.iter_mut() {
            view.badges.remove(removed);
            if &view.active_agent != removed {
                continue;
            }
            view.active_agent = first.clone();
            view.badges.remove(&first);
            debug!(%viewer, agent = %first, "active agent reassigned");
            if view.has_surface() {
                self.report.events.push(PresentationEvent::SelectTab {
                    viewer: *viewer,
                    agent: first.clone(),
                });
            }
        }
    }

    fn set_movement(&mut self, agent: AgentId, direction: Direction) -> Outcome {
        self.state.movement.set_walk(&agent, direction);
        self.apply_movement(&agent)
    }

    fn stop_movement(&mut self, agent: AgentId) -> Outcome {
        self.state.movement.stop_walk(&agent);
        self.apply_movement(&agent)
    }

    fn apply_movement(&mut self, agent: &AgentId) -> Outcome {
        if self.state.movement.apply_now(agent, &mut *self.host) {
            Outcome::Applied
        } else {
            Outcome::Stale
        }
    }

    fn set_observer_mode(&mut self, enabled: bool) -> Outcome {
        self.state.observer_mode = enabled;
        info!(enabled, "observer mode");
        let connected: Vec<ViewerId> = self
            .state
            .viewers
            .iter()
            .filter(|(_, v)| v.connected)
            .map(|(id, _)| *id)
            .collect();
        self.report.events.extend(
            connected
                .into_iter()
                .map(|viewer| PresentationEvent::ObserverMode { viewer, enabled }),
        );
        Outcome::Applied
    }

    // ---- viewer input handlers ----

    fn joined(&mut self, viewer: ViewerId) -> Outcome {
        self.ensure_viewer(viewer);
        if let Some(view) = self.state.viewers.get_mut(&viewer) {
            view.connected = true;
        }
        if self.state.observer_mode {
            self.report.events.push(PresentationEvent::ObserverMode {
                viewer,
                enabled: true,
            });
        }
        Outcome::Applied
    }

    fn left(&mut self, viewer: ViewerId) -> Outcome {
        let Some(view) = self.state.viewers.get_mut(&viewer) else {
            return Outcome::Stale;
        };
        view.connected = false;
        self.close_surface(viewer);
        Outcome::Applied
    }

    /// Opens the chat window and replays registry and history onto it.
    fn open_surface(&mut self, viewer: ViewerId) -> Outcome {
        self.ensure_viewer(viewer);
        if self.has_surface(viewer) {
            return Outcome::Ignored;
        }

        let state = &mut *self.state;
        state.next_surface += 1;
        let handle = SurfaceHandle(state.next_surface);
        let Some(view) = state.viewers.get_mut(&viewer) else {
            return Outcome::Stale;
        };
        view.surface = Some(handle);

        let mut events = vec![PresentationEvent::OpenSurface { viewer, handle }];
        for agent in state.registry.iter() {
            events.push(PresentationEvent::AddTab {
                viewer,
                agent: agent.id.clone(),
                label: agent.label.clone(),
            });
        }
        for agent in state.registry.ids() {
            let Some(session) = state.sessions.session(viewer, agent) else {
                continue;
            };
            for message in session.messages() {
                events.push(PresentationEvent::AppendMessage {
                    viewer,
                    agent: agent.clone(),
                    role: message.role,
                    text: message.text.clone(),
                });
            }
        }
        events.push(PresentationEvent::SelectTab {
            viewer,
            agent: view.active_agent.clone(),
        });
        // Unread counts kept while the window was closed.
        for (agent, count) in &view.badges {
            for _ in 0..*count {
                events.push(PresentationEvent::IncrementBadge {
                    viewer,
                    agent: agent.clone(),
                });
            }
        }
        if let Some((width, height)) = view.surface_size {
            events.push(PresentationEvent::ResizeSurface {
                viewer,
                width,
                height,
            });
        }
        if state.observer_mode {
            events.push(PresentationEvent::ObserverMode {
                viewer,
                enabled: true,
            });
        }

        self.report.events.extend(events);
        Outcome::Applied
    }

    /// Returns true if a surface was open.
    fn close_surface(&mut self, viewer: ViewerId) -> bool {
        let Some(view) = self.state.viewers.get_mut(&viewer) else {
            return false;
        };
        if view.surface.take().is_none() {
            return false;
        }
        self.report
            .events
            .push(PresentationEvent::CloseSurface { viewer });
        true
    }

    fn resize(&mut self, viewer: ViewerId, width: u32, height: u32) -> Outcome {
        let (width, height) = self.config.clamp_surface(width, height);
        let Some(view) = self.state.viewers.get_mut(&viewer) else {
            return Outcome::Stale;
        };
        view.surface_size = Some((width, height));
        if view.has_surface() {
            self.report.events.push(PresentationEvent::ResizeSurface {
                viewer,
                width,
                height,
            });
        }
        Outcome::Applied
    }

    fn select_tab(&mut self, viewer: ViewerId, agent: AgentId) -> Outcome {
        if !self.state.registry.contains(&agent) {
            return Outcome::Stale;
        }
        let Some(view) = self.state.viewers.get_mut(&viewer) else {
            return Outcome::Stale;
        };
        view.active_agent = agent.clone();
        view.badges.remove(&agent);
        if view.has_surface() {
            self.report
                .events
                .push(PresentationEvent::SelectTab { viewer, agent });
        }
        Outcome::Applied
    }

    fn submit(&mut self, viewer: ViewerId, text: String) -> Outcome {
        if self.state.observer_mode {
            return Outcome::Refused;
        }
        let text = text.trim();
        if text.is_empty() {
            return Outcome::Ignored;
        }

        self.ensure_viewer(viewer);
        let Some(agent) = self.state.active_agent(viewer).cloned() else {
            return Outcome::Stale;
        };
        self.append_message(viewer, &agent, Role::User, text.to_string());
        let config = self.config;
        self.show_status(viewer, config.thinking_status.clone());

        let step = self.state.step;
        let ordinal = self.report.outbound.len() as u64;
        self.report.outbound.push(ChatRequest {
            request_id: RequestId::derive(step, ordinal),
            viewer,
            agent,
            text: text.to_string(),
            step,
        });
        Outcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::InboundBoundary;
    use crate::testing::{id, RecordingHost};
    use proptest::prelude::*;

    fn envelopes(commands: Vec<Command>) -> Vec<Envelope> {
        commands
            .into_iter()
            .enumerate()
            .map(|(seq, command)| Envelope::new(seq as u64, command))
            .collect()
    }

    fn register(agent: &str, label: Option<&str>) -> Command {
        Command::RegisterAgent {
            agent: id(agent),
            label: label.map(str::to_string),
        }
    }

    fn respond(viewer: u32, agent: Option<&str>, text: &str) -> Command {
        Command::DeliverResponse {
            viewer: ViewerId(viewer),
            agent: agent.map(id),
            text: text.to_string(),
        }
    }

    struct Harness {
        processor: Processor,
        state: CoreState,
        host: RecordingHost,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                processor: Processor::default(),
                state: CoreState::default(),
                host: RecordingHost::default(),
            }
        }

        fn commands(&mut self, commands: Vec<Command>) -> StepReport {
            self.processor
                .step(&mut self.state, envelopes(commands), Vec::new(), &mut self.host)
        }

        fn inputs(&mut self, inputs: Vec<ViewerInput>) -> StepReport {
            self.processor
                .step(&mut self.state, Vec::new(), inputs, &mut self.host)
        }

        fn open(&mut self, viewer: u32) -> StepReport {
            self.inputs(vec![
                ViewerInput::Joined { viewer: ViewerId(viewer) },
                ViewerInput::OpenSurface { viewer: ViewerId(viewer) },
            ])
        }
    }

    #[test]
    fn test_step_counter_advances() {
        let mut h = Harness::new();
        assert_eq!(h.commands(Vec::new()).step, 1);
        assert_eq!(h.commands(Vec::new()).step, 2);
        assert_eq!(h.state.step(), 2);
    }

    #[test]
    fn test_submit_creates_session_for_new_viewer() {
        let mut h = Harness::new();
        h.commands(vec![register("scout", Some("Scout"))]);

        let report = h.inputs(vec![ViewerInput::Submit {
            viewer: ViewerId(1),
            text: "hello".into(),
        }]);

        let session = h.state.sessions().session(ViewerId(1), &id("scout")).unwrap();
        assert_eq!(session.len(), 1);
        let message = session.last().unwrap();
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text, "hello");
        assert_eq!(message.step, 2);

        assert_eq!(report.outbound.len(), 1);
        assert_eq!(report.outbound[0].agent, id("scout"));
        assert_eq!(report.outbound[0].request_id, RequestId::derive(2, 0));
    }

    #[test]
    fn test_response_without_agent_creates_placeholder() {
        let mut h = Harness::new();
        let report = h.commands(vec![respond(1, None, "hi")]);

        assert_eq!(report.applied, 1);
        let first = h.state.registry().first().unwrap();
        assert_eq!(first.id, AgentId::default_agent());
        assert_eq!(first.label, "Claude");
        assert_eq!(h.state.sessions().history_len(ViewerId(1), &first.id), 1);
        assert_eq!(h.state.active_agent(ViewerId(1)), Some(&AgentId::default_agent()));
    }

    #[test]
    fn test_response_for_unknown_agent_is_stale() {
        let mut h = Harness::new();
        h.commands(vec![register("a", None)]);

        let report = h.commands(vec![respond(1, Some("ghost"), "boo")]);

        assert_eq!(report.stale, 1);
        assert_eq!(h.state.sessions().total_messages(), 0);
        assert!(!h.state.registry().contains(&id("ghost")));
    }

    #[test]
    fn test_unregister_reassigns_active_agent() {
        let mut h = Harness::new();
        h.commands(vec![register("a", None), register("b", None)]);
        h.open(1);
        assert_eq!(h.state.active_agent(ViewerId(1)), Some(&id("a")));

        let report = h.commands(vec![Command::UnregisterAgent { agent: id("a") }]);

        assert_eq!(h.state.active_agent(ViewerId(1)), Some(&id("b")));
        assert_eq!(
            report.events,
            vec![
                PresentationEvent::RemoveTab { viewer: ViewerId(1), agent: id("a") },
                PresentationEvent::SelectTab { viewer: ViewerId(1), agent: id("b") },
            ]
        );
    }

    #[test]
    fn test_sole_agent_is_never_removed() {
        let mut h = Harness::new();
        h.commands(vec![register("a", None)]);

        let report = h.commands(vec![Command::UnregisterAgent { agent: id("a") }]);

        assert_eq!(report.refused, 1);
        assert_eq!(h.state.registry().len(), 1);

        // The lazily created placeholder is protected the same way
        let mut h = Harness::new();
        h.commands(vec![respond(1, None, "x")]);
        h.commands(vec![Command::UnregisterAgent { agent: AgentId::default_agent() }]);
        assert_eq!(h.state.registry().len(), 1);
    }

    #[test]
    fn test_removed_default_is_not_recreated() {
        let mut h = Harness::new();
        h.commands(vec![
            respond(1, None, "x"),
            register("scout", None),
            Command::UnregisterAgent { agent: AgentId::default_agent() },
            respond(1, None, "y"),
        ]);

        let ids: Vec<_> = h.state.registry().ids().map(|a| a.as_str()).collect();
        assert_eq!(ids, vec!["scout"]);
        assert_eq!(h.state.sessions().history_len(ViewerId(1), &id("scout")), 1);
        // History of the removed agent is kept
        assert_eq!(h.state.sessions().history_len(ViewerId(1), &AgentId::default_agent()), 1);
    }

    #[test]
    fn test_register_relabels_and_adds_tabs() {
        let mut h = Harness::new();
        h.commands(vec![register("a", None)]);
        h.open(1);

        let report = h.commands(vec![
            register("b", Some("Bee")),
            register("b", Some("Bee")),
            register("b", Some("Wasp")),
        ]);

        assert_eq!(h.state.registry().len(), 2);
        assert_eq!(
            report.events,
            vec![
                PresentationEvent::AddTab { viewer: ViewerId(1), agent: id("b"), label: "Bee".into() },
                PresentationEvent::RelabelTab { viewer: ViewerId(1), agent: id("b"), label: "Wasp".into() },
            ]
        );
        assert!(h.state.sessions().session(ViewerId(1), &id("b")).is_some());
    }

    #[test]
    fn test_reregistered_agent_brings_back_history() {
        let mut h = Harness::new();
        h.commands(vec![register("a", None), register("b", None), respond(1, Some("b"), "kept")]);
        h.open(1);
        h.commands(vec![Command::UnregisterAgent { agent: id("b") }]);

        let report = h.commands(vec![register("b", Some("Bee"))]);

        assert_eq!(
            report.events,
            vec![
                PresentationEvent::AddTab { viewer: ViewerId(1), agent: id("b"), label: "Bee".into() },
                PresentationEvent::AppendMessage {
                    viewer: ViewerId(1),
                    agent: id("b"),
                    role: Role::Agent,
                    text: "kept".into(),
                },
            ]
        );
    }

    #[test]
    fn test_history_cap_through_dispatch() {
        let mut h = Harness::new();
        let commands: Vec<_> = (0..150).map(|n| respond(1, None, &n.to_string())).collect();

        let report = h.commands(commands);

        assert_eq!(report.evicted, 50);
        let session = h.state.sessions().session(ViewerId(1), &AgentId::default_agent()).unwrap();
        let texts: Vec<_> = session.messages().map(|m| m.text.clone()).collect();
        let expected: Vec<_> = (50..150).map(|n| n.to_string()).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn test_envelopes_apply_in_append_order() {
        let mut h = Harness::new();
        h.commands(vec![register("a", None)]);
        h.open(1);
        h.open(2);
        h.open(3);

        let report = h.commands(vec![
            Command::SetStatus { viewer: ViewerId(3), text: "C".into() },
            Command::SetStatus { viewer: ViewerId(1), text: "A".into() },
            Command::SetStatus { viewer: ViewerId(2), text: "B".into() },
        ]);

        let order: Vec<_> = report
            .events
            .iter()
            .map(|e| match e {
                PresentationEvent::SetStatus { text, .. } => text.as_str(),
                _ => "?",
            })
            .collect();
        assert_eq!(order, vec!["C", "A", "B"]);
        assert_eq!(report.seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_badge_for_inactive_tab() {
        let mut h = Harness::new();
        h.commands(vec![register("a", None), register("b", None)]);
        h.open(1);

        let report = h.commands(vec![respond(1, Some("b"), "psst"), respond(1, Some("a"), "hi")]);

        assert!(report.events.contains(&PresentationEvent::IncrementBadge {
            viewer: ViewerId(1),
            agent: id("b"),
        }));
        let view = h.state.viewer(ViewerId(1)).unwrap();
        assert_eq!(view.badge(&id("b")), 1);
        assert_eq!(view.badge(&id("a")), 0);

        h.inputs(vec![ViewerInput::SelectTab { viewer: ViewerId(1), agent: id("b") }]);
        assert_eq!(h.state.viewer(ViewerId(1)).unwrap().badge(&id("b")), 0);
    }

    #[test]
    fn test_badges_survive_closed_window() {
        let mut h = Harness::new();
        h.commands(vec![register("a", None), register("b", None)]);
        h.open(1);
        h.inputs(vec![ViewerInput::CloseSurface { viewer: ViewerId(1) }]);

        let report = h.commands(vec![respond(1, Some("b"), "one"), respond(1, Some("b"), "two")]);
        assert!(!report
            .events
            .iter()
            .any(|e| matches!(e, PresentationEvent::IncrementBadge { .. })));
        assert_eq!(h.state.viewer(ViewerId(1)).unwrap().badge(&id("b")), 2);

        let report = h.inputs(vec![ViewerInput::OpenSurface { viewer: ViewerId(1) }]);
        let replayed = report
            .events
            .iter()
            .filter(|e| matches!(e, PresentationEvent::IncrementBadge { agent, .. } if *agent == id("b")))
            .count();
        assert_eq!(replayed, 2);
        assert_eq!(h.state.viewer(ViewerId(1)).unwrap().badge(&id("b")), 2);
    }

    #[test]
    fn test_wire_agent_id_matches_typed_id() {
        let boundary = InboundBoundary::new();
        boundary.register_agent("scout", None).unwrap();
        boundary
            .submit_wire(r#"{"kind":"register_agent","agent":" scout "}"#)
            .unwrap();

        let mut h = Harness::new();
        h.processor
            .step(&mut h.state, boundary.drain(), Vec::new(), &mut h.host);

        let ids: Vec<_> = h.state.registry().ids().cloned().collect();
        assert_eq!(ids, vec![id("scout")]);
    }

    #[test]
    fn test_tool_status_uses_label() {
        let mut h = Harness::new();
        h.commands(vec![register("scout", Some("Scout"))]);
        h.open(1);

        let report = h.commands(vec![Command::ToolStatus {
            viewer: ViewerId(1),
            agent: Some(id("scout")),
            tool: "mine".into(),
        }]);

        assert_eq!(
            report.events,
            vec![PresentationEvent::SetStatus { viewer: ViewerId(1), text: "Scout: mine...".into() }]
        );
        assert_eq!(h.state.sessions().total_messages(), 0);
    }

    #[test]
    fn test_clear_all_sessions_of_viewer() {
        let mut h = Harness::new();
        h.commands(vec![
            register("a", None),
            register("b", None),
            respond(1, Some("a"), "1"),
            respond(1, Some("b"), "2"),
            respond(2, Some("a"), "3"),
        ]);

        h.commands(vec![Command::ClearSession { viewer: ViewerId(1), agent: None }]);

        assert_eq!(h.state.sessions().history_len(ViewerId(1), &id("a")), 0);
        assert_eq!(h.state.sessions().history_len(ViewerId(1), &id("b")), 0);
        assert!(h.state.sessions().session(ViewerId(1), &id("b")).is_some());
        assert_eq!(h.state.sessions().history_len(ViewerId(2), &id("a")), 1);
    }

    #[test]
    fn test_set_then_stop_in_one_step_leaves_no_entry() {
        let mut h = Harness::new();
        h.host = RecordingHost::with_actors(&["scout"]);

        h.commands(vec![
            Command::SetMovement { agent: id("scout"), direction: Direction::East },
            Command::StopMovement { agent: id("scout") },
        ]);

        assert_eq!(
            h.host.log_for("scout"),
            vec![WalkingState::Walking(Direction::East), WalkingState::Stopped]
        );
        assert!(h.state.movement().is_empty());
    }

    #[test]
    fn test_walking_persists_without_resending() {
        let mut h = Harness::new();
        h.host = RecordingHost::with_actors(&["scout"]);

        h.commands(vec![Command::SetMovement { agent: id("scout"), direction: Direction::South }]);
        h.commands(Vec::new());
        h.commands(Vec::new());

        assert_eq!(h.host.log_for("scout").len(), 3);
        assert_eq!(h.host.actor_position(&id("scout")).unwrap().y, 3.0);
    }

    #[test]
    fn test_movement_for_dead_actor_is_stale() {
        let mut h = Harness::new();
        let report = h.commands(vec![Command::SetMovement { agent: id("ghost"), direction: Direction::North }]);
        assert_eq!(report.stale, 1);
        assert!(h.host.log.is_empty());
    }

    #[test]
    fn test_unregister_stops_actor() {
        let mut h = Harness::new();
        h.host = RecordingHost::with_actors(&["a", "b"]);
        h.commands(vec![
            register("a", None),
            register("b", None),
            Command::SetMovement { agent: id("b"), direction: Direction::West },
        ]);

        h.commands(vec![Command::UnregisterAgent { agent: id("b") }]);
        h.commands(Vec::new());

        assert_eq!(h.host.log_for("b").last(), Some(&WalkingState::Stopped));
        assert!(h.state.movement().get(&id("b")).is_none());
    }

    #[test]
    fn test_observer_mode_blocks_submit() {
        let mut h = Harness::new();
        h.open(1);

        let report = h.commands(vec![Command::SetObserverMode { enabled: true }]);
        assert_eq!(
            report.events,
            vec![PresentationEvent::ObserverMode { viewer: ViewerId(1), enabled: true }]
        );

        let report = h.inputs(vec![ViewerInput::Submit { viewer: ViewerId(1), text: "let me in".into() }]);
        assert_eq!(report.refused, 1);
        assert!(report.outbound.is_empty());

        // Late joiners are told too
        let report = h.inputs(vec![ViewerInput::Joined { viewer: ViewerId(2) }]);
        assert!(report.events.contains(&PresentationEvent::ObserverMode { viewer: ViewerId(2), enabled: true }));
    }

    #[test]
    fn test_blank_submit_is_ignored() {
        let mut h = Harness::new();
        let report = h.inputs(vec![ViewerInput::Submit { viewer: ViewerId(1), text: "   ".into() }]);
        assert_eq!(report.ignored, 1);
        assert!(h.state.registry().is_empty());
    }

    #[test]
    fn test_open_surface_replays_history() {
        let mut h = Harness::new();
        h.commands(vec![register("a", Some("Alpha")), respond(1, None, "earlier")]);

        let report = h.inputs(vec![ViewerInput::OpenSurface { viewer: ViewerId(1) }]);

        assert_eq!(
            report.events,
            vec![
                PresentationEvent::OpenSurface { viewer: ViewerId(1), handle: SurfaceHandle(1) },
                PresentationEvent::AddTab { viewer: ViewerId(1), agent: id("a"), label: "Alpha".into() },
                PresentationEvent::AppendMessage {
                    viewer: ViewerId(1),
                    agent: id("a"),
                    role: Role::Agent,
                    text: "earlier".into(),
                },
                PresentationEvent::SelectTab { viewer: ViewerId(1), agent: id("a") },
            ]
        );

        let again = h.inputs(vec![ViewerInput::OpenSurface { viewer: ViewerId(1) }]);
        assert_eq!(again.ignored, 1);
    }

    #[test]
    fn test_left_keeps_sessions() {
        let mut h = Harness::new();
        h.open(1);
        h.commands(vec![respond(1, None, "remember me")]);

        let report = h.inputs(vec![ViewerInput::Left { viewer: ViewerId(1) }]);

        assert!(report.events.contains(&PresentationEvent::CloseSurface { viewer: ViewerId(1) }));
        let view = h.state.viewer(ViewerId(1)).unwrap();
        assert!(!view.connected);
        assert!(!view.has_surface());
        assert_eq!(h.state.sessions().history_len(ViewerId(1), &AgentId::default_agent()), 1);
    }

    #[test]
    fn test_resize_is_clamped() {
        let mut h = Harness::new();
        h.open(1);
        let report = h.inputs(vec![ViewerInput::Resize { viewer: ViewerId(1), width: 10, height: 9000 }]);
        assert_eq!(
            report.events,
            vec![PresentationEvent::ResizeSurface { viewer: ViewerId(1), width: 280, height: 1200 }]
        );
    }

    #[test]
    fn test_chat_request_is_one_line() {
        let request = ChatRequest {
            request_id: RequestId::derive(4, 1),
            viewer: ViewerId(2),
            agent: id("scout"),
            text: "multi\nline".into(),
            step: 4,
        };
        let line = request.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        let back: ChatRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_digest_tracks_movement() {
        let mut h = Harness::new();
        let before = h.state.digest().unwrap();
        assert_eq!(before.len(), 64);

        h.state.movement.set_walk(&id("a"), Direction::East);
        assert_ne!(h.state.digest().unwrap(), before);
    }

    fn arb_agent() -> impl Strategy<Value = AgentId> {
        prop::sample::select(vec!["default", "a", "b", "c"]).prop_map(id)
    }

    fn arb_viewer() -> impl Strategy<Value = ViewerId> {
        (1u32..4).prop_map(ViewerId)
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        let direction = prop::sample::select(Direction::ALL.to_vec());
        prop_oneof![
            (arb_viewer(), prop::option::of(arb_agent()), "[a-z]{1,8}")
                .prop_map(|(viewer, agent, text)| Command::DeliverResponse { viewer, agent, text }),
            (arb_viewer(), prop::option::of(arb_agent()), "[a-z]{1,8}")
                .prop_map(|(viewer, agent, tool)| Command::ToolStatus { viewer, agent, tool }),
            (arb_viewer(), prop::option::of(arb_agent()))
                .prop_map(|(viewer, agent)| Command::ClearSession { viewer, agent }),
            (arb_agent(), prop::option::of("[A-Z][a-z]{1,6}"))
                .prop_map(|(agent, label)| Command::RegisterAgent { agent, label }),
            arb_agent().prop_map(|agent| Command::UnregisterAgent { agent }),
            (arb_agent(), direction).prop_map(|(agent, direction)| Command::SetMovement { agent, direction }),
            arb_agent().prop_map(|agent| Command::StopMovement { agent }),
            any::<bool>().prop_map(|enabled| Command::SetObserverMode { enabled }),
        ]
    }

    fn arb_input() -> impl Strategy<Value = ViewerInput> {
        prop_oneof![
            arb_viewer().prop_map(|viewer| ViewerInput::Joined { viewer }),
            arb_viewer().prop_map(|viewer| ViewerInput::OpenSurface { viewer }),
            arb_viewer().prop_map(|viewer| ViewerInput::CloseSurface { viewer }),
            (arb_viewer(), arb_agent()).prop_map(|(viewer, agent)| ViewerInput::SelectTab { viewer, agent }),
            (arb_viewer(), "[a-z ]{0,8}").prop_map(|(viewer, text)| ViewerInput::Submit { viewer, text }),
        ]
    }

    proptest! {
        #[test]
        fn prop_replay_is_deterministic(
            steps in prop::collection::vec(
                (prop::collection::vec(arb_command(), 0..8), prop::collection::vec(arb_input(), 0..3)),
                1..8,
            )
        ) {
            let processor = Processor::new(CoreConfig { history_cap: 5, ..CoreConfig::default() });
            let mut left = CoreState::new(5);
            let mut right = CoreState::new(5);
            let mut left_host = RecordingHost::with_actors(&["a", "b"]);
            let mut right_host = left_host.clone();

            for (commands, inputs) in steps {
                let batch = envelopes(commands);
                let a = processor.step(&mut left, batch.clone(), inputs.clone(), &mut left_host);
                let b = processor.step(&mut right, batch, inputs, &mut right_host);
                prop_assert_eq!(a, b);
            }

            prop_assert_eq!(&left, &right);
            prop_assert_eq!(left.digest().unwrap(), right.digest().unwrap());
            prop_assert_eq!(&left_host, &right_host);

            // Every known viewer looks at a registered agent
            for (_, view) in left.viewers() {
                prop_assert!(left.registry().contains(&view.active_agent));
            }
            // Only walking entries survive a step
            for (_, directive) in left.movement().iter() {
                prop_assert!(directive.is_moving);
            }
        }
    }
}
