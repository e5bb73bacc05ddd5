//! Inbound call boundary: the only entry point for code outside the step.
//!
//! Every operation validates its arguments, appends exactly one envelope to
//! the pending queue and returns. Nothing here touches registry, session,
//! movement or presentation state; the processor applies the envelopes at
//! the next step boundary.
//!
//! # Threading
//!
//! ```text
//! external thread A --append--+
//!                             |   Mutex<PendingQueue>   --drain (step N)--> Processor
//! external thread B --append--+
//! ```
//!
//! Appends may race each other; the lock makes each append atomic and the
//! sequence number records the order they won. The step thread takes the
//! whole queue in one swap, so an append that loses the race with a drain
//! lands in the next step instead of splitting the current one.

use crate::envelope::{BoundaryError, Command, Envelope};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use steplock_env::{AgentId, Direction, Position, ViewerId};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct PendingQueue {
    envelopes: Vec<Envelope>,
    next_seq: u64,
}

/// Cloneable handle to the pending queue and the published position board.
///
/// Clones share the same queue; hand one to each external caller.
#[derive(Debug, Clone, Default)]
pub struct InboundBoundary {
    queue: Arc<Mutex<PendingQueue>>,
    positions: Arc<RwLock<BTreeMap<AgentId, Position>>>,
    rejected: Arc<AtomicU64>,
}

impl InboundBoundary {
    /// Creates an empty boundary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an agent's reply for a viewer. `agent = None` targets the
    /// default agent.
    pub fn deliver_response(
        &self,
        viewer: ViewerId,
        agent: Option<&str>,
        text: impl Into<String>,
    ) -> Result<u64, BoundaryError> {
        let agent = self.parse_optional_agent(agent)?;
        self.submit(Command::DeliverResponse { viewer, agent, text: text.into() })
    }

    /// Queues a "using tool" notice for a viewer.
    pub fn report_tool_status(
        &self,
        viewer: ViewerId,
        agent: Option<&str>,
        tool: impl Into<String>,
    ) -> Result<u64, BoundaryError> {
        let agent = self.parse_optional_agent(agent)?;
        self.submit(Command::ToolStatus { viewer, agent, tool: tool.into() })
    }

    /// Queues a status line update.
    pub fn set_status(&self, viewer: ViewerId, text: impl Into<String>) -> Result<u64, BoundaryError> {
        self.submit(Command::SetStatus { viewer, text: text.into() })
    }

    /// Queues a session clear; `agent = None` clears every session of the viewer.
    pub fn clear_session(&self, viewer: ViewerId, agent: Option<&str>) -> Result<u64, BoundaryError> {
        let agent = self.parse_optional_agent(agent)?;
        self.submit(Command::ClearSession { viewer, agent })
    }

    /// Queues an agent registration. Registering an existing id relabels it.
    pub fn register_agent(&self, agent: &str, label: Option<&str>) -> Result<u64, BoundaryError> {
        let agent = self.parse_agent(agent)?;
        self.submit(Command::RegisterAgent { agent, label: label.map(str::to_string) })
    }

    /// Queues an agent removal.
    pub fn unregister_agent(&self, agent: &str) -> Result<u64, BoundaryError> {
        let agent = self.parse_agent(agent)?;
        self.submit(Command::UnregisterAgent { agent })
    }

    /// Queues a continuous walking directive. Accepts `n`, `north-east`, ...
    pub fn set_movement(&self, agent: &str, direction: &str) -> Result<u64, BoundaryError> {
        let agent = self.parse_agent(agent)?;
        let direction: Direction = direction.parse().map_err(|e| self.reject(e))?;
        self.submit(Command::SetMovement { agent, direction })
    }

    /// Queues a stop for the agent's actor.
    pub fn stop_movement(&self, agent: &str) -> Result<u64, BoundaryError> {
        let agent = self.parse_agent(agent)?;
        self.submit(Command::StopMovement { agent })
    }

    /// Queues an observer-mode toggle for all connected viewers.
    pub fn set_observer_mode(&self, enabled: bool) -> Result<u64, BoundaryError> {
        self.submit(Command::SetObserverMode { enabled })
    }

    /// Reads the agent actor's position as of the last completed step.
    ///
    /// Pure read with no ordering requirement: it never enqueues and is safe
    /// to call from any thread.
    pub fn query_position(&self, agent: &str) -> Option<Position> {
        let agent = AgentId::parse(agent).ok()?;
        let board = self.positions.read().unwrap_or_else(PoisonError::into_inner);
        board.get(&agent).copied()
    }

    /// Validates a typed command and appends it. Returns its sequence number.
    pub fn submit(&self, command: Command) -> Result<u64, BoundaryError> {
        command.validate().map_err(|e| self.reject(e))?;
        Ok(self.append(command))
    }

    /// Decodes one wire record and appends it. Returns its sequence number.
    pub fn submit_wire(&self, line: &str) -> Result<u64, BoundaryError> {
        let command = Command::decode(line).map_err(|e| self.reject(e))?;
        Ok(self.append(command))
    }

    /// Takes every pending envelope, leaving the queue empty.
    ///
    /// Called once per step by the step thread only.
    pub fn drain(&self) -> Vec<Envelope> {
        std::mem::take(&mut self.lock_queue().envelopes)
    }

    /// Number of envelopes waiting for the next step.
    pub fn pending_len(&self) -> usize {
        self.lock_queue().envelopes.len()
    }

    /// Number of calls rejected as malformed since creation.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Replaces the position board with the positions after a step.
    pub fn publish_positions(&self, positions: Vec<(AgentId, Position)>) {
        let mut board = self.positions.write().unwrap_or_else(PoisonError::into_inner);
        board.clear();
        board.extend(positions);
    }

    fn append(&self, command: Command) -> u64 {
        let mut queue = self.lock_queue();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        debug!(seq, kind = command.kind(), "enqueued");
        queue.envelopes.push(Envelope::new(seq, command));
        seq
    }

    // A producer that panicked mid-append cannot leave a half-written
    // envelope behind, so a poisoned queue is still consistent.
    fn lock_queue(&self) -> MutexGuard<'_, PendingQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn parse_agent(&self, raw: &str) -> Result<AgentId, BoundaryError> {
        AgentId::parse(raw).map_err(|e| self.reject(e))
    }

    fn parse_optional_agent(&self, raw: Option<&str>) -> Result<Option<AgentId>, BoundaryError> {
        raw.map(|raw| self.parse_agent(raw)).transpose()
    }

    fn reject(&self, err: impl Into<BoundaryError>) -> BoundaryError {
        let err = err.into();
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!("rejected inbound call: {}", err);
        err
    }
}
