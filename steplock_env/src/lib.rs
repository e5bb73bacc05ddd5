//! Steplock Host Seams
//!
//! This crate provides the vocabulary and the two host seams the steplock
//! core talks through, so the same core runs inside a real host simulation
//! and inside the deterministic test harness.
//!
//! # Core Concept: Replicated Inputs Only
//!
//! The core mutates state only inside a simulation step. Everything it may
//! consult there must be identical on every replica:
//! - Actors (`ActorHost`): validity, walking directives, positions
//! - Presentation (`PresentationAdapter`): write-only notifications
//!
//! Wall-clock time, randomness and I/O never cross these seams.
//!
//! # Example
//!
//! ```ignore
//! use steplock_env::{ActorHost, AgentId, WalkingState, Direction};
//!
//! fn nudge<H: ActorHost>(host: &mut H, agent: &AgentId) {
//!     if host.is_actor_valid(agent) {
//!         host.apply_walking(agent, WalkingState::Walking(Direction::North));
//!     }
//! }
//! ```

mod actor;
mod error;
mod presentation;
mod types;

pub use actor::{ActorHost, NoActors, WalkingState};
pub use error::EnvError;
pub use presentation::{NullPresentation, PresentationAdapter, PresentationEvent};
pub use types::{AgentId, Direction, Position, RequestId, Role, SurfaceHandle, ViewerId};
