//! Steplock Core - Deterministic command queue and multi-agent session state
//!
//! Lets an asynchronous external process (an agent runtime) drive state in a
//! lockstep simulation without breaking replica consistency:
//! 1. **Boundary**: external calls only append envelopes to a locked queue
//! 2. **Processor**: each step drains the queue in one swap and applies it in order
//! 3. **State**: agent registry, bounded sessions, viewer selection and movement
//!
//! Every replica that applies the same batches to the same starting state
//! reaches the same state, which `CoreState::digest` makes checkable.

pub mod boundary;
pub mod config;
pub mod envelope;
pub mod movement;
pub mod processor;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod snapshot;
pub mod viewer;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use boundary::InboundBoundary;
pub use config::{CoreConfig, HISTORY_CAP};
pub use envelope::{BoundaryError, Command, Envelope, COMMAND_KINDS};
pub use movement::{MovementDirective, MovementPhase, MovementReport, MovementTable};
pub use processor::{ChatRequest, CoreState, Processor, StepReport};
pub use registry::{Agent, AgentRegistry, Registration, Removal};
pub use runtime::HostRuntime;
pub use session::{Message, Session, SessionStore};
pub use snapshot::{
    MemorySnapshotStore, SledSnapshotStore, Snapshot, SnapshotError, SnapshotStore,
    SNAPSHOT_VERSION,
};
pub use viewer::{ViewerInput, ViewerState};
