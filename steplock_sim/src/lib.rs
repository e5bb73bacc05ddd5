//! Steplock Deterministic Simulation Testing Harness
//!
//! Runs several replicas of the steplock core in lockstep and checks that
//! they never disagree.
//!
//! # Core Principle: Same Inputs, Same State
//!
//! Every source of variation is pinned down by the harness:
//! - **Commands**: generated from a single 64-bit seed (`ScriptGenerator`)
//! - **Actors**: simulated kinematics with a fixed step (`ActorField`)
//! - **Producers**: real tokio tasks racing the drain (`ExternalFeed`); the
//!   batch boundaries they cause are shared by every replica
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │   producers ──▶ InboundBoundary ──drain once per step──┐    │
//! │                                                        │    │
//! │        ┌───────────────┬───────────────┬───────────────┘    │
//! │        ▼               ▼               ▼                    │
//! │  ┌──────────┐    ┌──────────┐    ┌──────────┐               │
//! │  │ Replica 0│    │ Replica 1│    │ Replica 2│   ...         │
//! │  │ core     │    │ core     │    │ core     │               │
//! │  │ field    │    │ field    │    │ field    │               │
//! │  │ mirror   │    │ mirror   │    │ mirror   │               │
//! │  └────┬─────┘    └────┬─────┘    └────┬─────┘               │
//! │       └─────── SHA-256 digests must match ──┘               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use steplock_sim::{ScenarioId, ScenarioRunner};
//!
//! let result = ScenarioRunner::new(42)
//!     .with_replicas(3)
//!     .run(ScenarioId::Convergence);
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod feed;
mod field;
mod mirror;
mod replica;
mod runner;
mod script;
mod world;
pub mod scenarios;

pub use error::ScenarioFailure;
pub use exporter::{TraceExport, TraceFrame};
pub use feed::{ExternalFeed, FeedReport};
pub use field::{Actor, ActorField};
pub use mirror::{MirrorPresentation, WindowMirror};
pub use replica::Replica;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use script::{CommandMix, ScriptGenerator};
pub use world::{SimConfig, SimWorld};
