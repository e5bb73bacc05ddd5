//! Save/load of the persisted core state.
//!
//! Only registry, sessions, active-agent selection and the observer flag
//! survive a reload. Movement directives, open surfaces, badges and
//! connection flags come back empty.

use crate::processor::CoreState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Snapshot version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
}

/// A versioned copy of the persisted state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub step: u64,
    pub state: CoreState,
}

impl Snapshot {
    /// Captures the persisted part of a state.
    pub fn capture(state: &CoreState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            step: state.step(),
            state: state.clone(),
        }
    }

    /// Returns the state, with every transient field reset.
    pub fn restore(self) -> Result<CoreState, SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                found: self.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        // Round-trip through the encoding so transient fields are dropped
        // even for snapshots that never left memory.
        let bytes = serde_json::to_vec(&self.state)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Storage for named snapshot slots.
pub trait SnapshotStore: Send + Sync {
    /// Writes a snapshot, replacing any previous one in the slot.
    fn save(&self, slot: &str, snapshot: &Snapshot) -> Result<(), SnapshotError>;

    /// Reads a slot. `Ok(None)` if it was never written.
    fn load(&self, slot: &str) -> Result<Option<Snapshot>, SnapshotError>;

    /// Names of every written slot, sorted.
    fn slots(&self) -> Result<Vec<String>, SnapshotError>;
}

/// In-process snapshot store. Keeps encoded bytes, like the durable one.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    slots: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, slot: &str, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let bytes = snapshot.to_bytes()?;
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(slot.to_string(), bytes);
        Ok(())
    }

    fn load(&self, slot: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(slot)
            .map(|bytes| Snapshot::from_bytes(bytes))
            .transpose()
    }

    fn slots(&self) -> Result<Vec<String>, SnapshotError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.keys().cloned().collect())
    }
}

/// Sled-based snapshot store
///
/// Uses an embedded key-value database for durability. One key per slot.
pub struct SledSnapshotStore {
    db: sled::Db,
}

impl SledSnapshotStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SnapshotError> {
        let db = sled::open(path)
            .map_err(|e| SnapshotError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store, removed when dropped
    pub fn open_temp() -> Result<Self, SnapshotError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| SnapshotError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn save(&self, slot: &str, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let bytes = snapshot.to_bytes()?;
        self.db
            .insert(slot.as_bytes(), bytes)
            .map_err(|e| SnapshotError::Storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| SnapshotError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn load(&self, slot: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let value = self
            .db
            .get(slot.as_bytes())
            .map_err(|e| SnapshotError::Storage(format!("Read failed: {}", e)))?;
        value.map(|bytes| Snapshot::from_bytes(&bytes)).transpose()
    }

    fn slots(&self) -> Result<Vec<String>, SnapshotError> {
        let mut names = Vec::new();
        for result in self.db.iter() {
            let (key, _) = result
                .map_err(|e| SnapshotError::Storage(format!("Iteration failed: {}", e)))?;
            names.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Command, Envelope};
    use crate::processor::Processor;
    use crate::testing::{id, RecordingHost};
    use crate::viewer::ViewerInput;
    use steplock_env::{Direction, ViewerId};

    fn busy_state() -> CoreState {
        let processor = Processor::default();
        let mut state = CoreState::default();
        let mut host = RecordingHost::with_actors(&["scout"]);
        let batch = vec![
            Envelope::new(0, Command::RegisterAgent { agent: id("scout"), label: Some("Scout".into()) }),
            Envelope::new(1, Command::DeliverResponse { viewer: ViewerId(1), agent: None, text: "hi".into() }),
            Envelope::new(2, Command::SetMovement { agent: id("scout"), direction: Direction::East }),
            Envelope::new(3, Command::SetObserverMode { enabled: true }),
        ];
        let inputs = vec![
            ViewerInput::Joined { viewer: ViewerId(1) },
            ViewerInput::OpenSurface { viewer: ViewerId(1) },
        ];
        processor.step(&mut state, batch, inputs, &mut host);
        state
    }

    #[test]
    fn test_restore_keeps_persisted_and_resets_transient() {
        let state = busy_state();
        assert!(!state.movement().is_empty());

        let restored = Snapshot::capture(&state).restore().unwrap();

        assert_eq!(restored.step(), 1);
        assert_eq!(restored.registry(), state.registry());
        assert_eq!(restored.sessions(), state.sessions());
        assert!(restored.observer_mode());
        assert_eq!(restored.active_agent(ViewerId(1)), Some(&id("scout")));

        assert!(restored.movement().is_empty());
        let view = restored.viewer(ViewerId(1)).unwrap();
        assert!(!view.has_surface());
        assert!(!view.connected);
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let mut snapshot = Snapshot::capture(&CoreState::default());
        snapshot.version = 99;
        assert!(matches!(
            snapshot.restore(),
            Err(SnapshotError::VersionMismatch { found: 99, expected: 1 })
        ));
    }

    #[test]
    fn test_memory_store_slots() {
        let store = MemorySnapshotStore::new();
        assert!(store.load("quick").unwrap().is_none());

        let snapshot = Snapshot::capture(&busy_state());
        store.save("quick", &snapshot).unwrap();
        store.save("auto", &snapshot).unwrap();

        assert_eq!(store.slots().unwrap(), vec!["auto", "quick"]);
        let loaded = store.load("quick").unwrap().unwrap();
        assert_eq!(loaded.restore().unwrap(), snapshot.restore().unwrap());
    }

    #[test]
    fn test_sled_store_round_trip() {
        let store = SledSnapshotStore::open_temp().unwrap();
        let snapshot = Snapshot::capture(&busy_state());

        store.save("slot-1", &snapshot).unwrap();

        let loaded = store.load("slot-1").unwrap().unwrap();
        assert_eq!(loaded.step, 1);
        assert_eq!(loaded.restore().unwrap().digest().unwrap(), snapshot.restore().unwrap().digest().unwrap());
        assert_eq!(store.slots().unwrap(), vec!["slot-1"]);
        assert!(store.load("missing").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_bytes_are_an_encoding_error() {
        assert!(matches!(Snapshot::from_bytes(b"{nope"), Err(SnapshotError::Encoding(_))));
    }
}
