//! Host runtime: ties the boundary, the processor and the host seams together.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        HostRuntime                            │
//! │                                                               │
//! │  external callers ──▶ InboundBoundary (Mutex queue)           │
//! │                              │ drain (once per tick)          │
//! │                              ▼                                │
//! │  viewer inputs ─────▶ Processor::step ──▶ CoreState           │
//! │                              │                                │
//! │             ┌────────────────┼──────────────────┐             │
//! │             ▼                ▼                  ▼             │
//! │      ActorHost (H)   PresentationAdapter (P)  outbound        │
//! │                                                               │
//! │  actor positions ──▶ position board (query_position)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use steplock_core::{CoreConfig, HostRuntime};
//! use steplock_env::{NoActors, NullPresentation, ViewerId};
//!
//! let mut runtime = HostRuntime::new(CoreConfig::default(), NoActors, NullPresentation);
//! let boundary = runtime.boundary();
//!
//! // From any thread:
//! boundary.deliver_response(ViewerId(1), None, "hello")?;
//!
//! // From the simulation's step:
//! let report = runtime.tick();
//! ```

use crate::boundary::InboundBoundary;
use crate::config::CoreConfig;
use crate::envelope::Envelope;
use crate::processor::{ChatRequest, CoreState, Processor, StepReport};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use crate::viewer::ViewerInput;
use steplock_env::{ActorHost, PresentationAdapter};
use tracing::info;

/// One simulation host's view of the core.
///
/// Generic over the actor host and presentation adapter, allowing the same
/// runtime to drive a real game host or the simulation harness.
pub struct HostRuntime<H, P>
where
    H: ActorHost,
    P: PresentationAdapter,
{
    boundary: InboundBoundary,
    processor: Processor,
    state: CoreState,
    host: H,
    presentation: P,

    /// Viewer inputs collected for the next tick
    inputs: Vec<ViewerInput>,

    /// Chat requests produced by submits, waiting to be taken
    outbox: Vec<ChatRequest>,
}

impl<H, P> HostRuntime<H, P>
where
    H: ActorHost,
    P: PresentationAdapter,
{
    /// Creates a runtime with an empty state and a fresh boundary.
    pub fn new(config: CoreConfig, host: H, presentation: P) -> Self {
        let state = CoreState::from_config(&config);
        Self {
            boundary: InboundBoundary::new(),
            processor: Processor::new(config),
            state,
            host,
            presentation,
            inputs: Vec::new(),
            outbox: Vec::new(),
        }
    }

    /// A handle for external callers. Clones share the same queue.
    pub fn boundary(&self) -> InboundBoundary {
        self.boundary.clone()
    }

    /// Queues a viewer input for the next tick.
    pub fn push_input(&mut self, input: ViewerInput) {
        self.inputs.push(input);
    }

    /// Runs one step: drain, apply, notify, publish positions.
    pub fn tick(&mut self) -> StepReport {
        let batch = self.boundary.drain();
        let inputs = std::mem::take(&mut self.inputs);
        self.step_with(batch, inputs)
    }

    /// Runs one step on a batch drained elsewhere.
    ///
    /// Replicas that share one authoritative boundary use this: the batch
    /// is drained once and handed to every replica.
    pub fn step_with(
        &mut self,
        batch: Vec<Envelope>,
        inputs: Vec<ViewerInput>,
    ) -> StepReport {
        let report = self
            .processor
            .step(&mut self.state, batch, inputs, &mut self.host);

        for event in &report.events {
            self.presentation.notify(event);
        }
        self.outbox.extend(report.outbound.iter().cloned());
        self.boundary.publish_positions(self.host.actor_positions());

        report
    }

    /// Takes the chat requests produced since the last call.
    pub fn take_outbound(&mut self) -> Vec<ChatRequest> {
        std::mem::take(&mut self.outbox)
    }

    /// Writes the persisted state to a slot.
    pub fn save(&self, store: &dyn SnapshotStore, slot: &str) -> Result<(), SnapshotError> {
        store.save(slot, &Snapshot::capture(&self.state))?;
        info!(slot, step = self.state.step(), "saved snapshot");
        Ok(())
    }

    /// Replaces the state with a slot's snapshot.
    ///
    /// Returns false if the slot is empty. Pending viewer inputs are
    /// dropped; envelopes already in the boundary stay queued.
    pub fn restore(&mut self, store: &dyn SnapshotStore, slot: &str) -> Result<bool, SnapshotError> {
        let Some(snapshot) = store.load(slot)? else {
            return Ok(false);
        };
        self.state = snapshot.restore()?;
        self.inputs.clear();
        info!(slot, step = self.state.step(), "restored snapshot");
        Ok(true)
    }

    pub fn state(&self) -> &CoreState {
        &self.state
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    pub fn presentation_mut(&mut self) -> &mut P {
        &mut self.presentation
    }
}
