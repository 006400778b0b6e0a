// Snapshot store - latest published machine set, shared with readers
use crate::domain::machine::{MachineSet, MachineSnapshot};
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the most recently published `MachineSet`.
///
/// Publishing swaps a whole `Arc<MachineSet>`, so a reader gets either the old
/// set or the new one, never a mix of both.
pub struct SnapshotStore {
    current: RwLock<Arc<MachineSet>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(MachineSet::default())
    }
}

impl SnapshotStore {
    pub fn new(initial: MachineSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn publish(&self, set: MachineSet) {
        let cycle = set.cycle;
        *self.current.write() = Arc::new(set);
        tracing::debug!("Published machine set for cycle {}", cycle);
    }

    pub fn read_all(&self) -> Arc<MachineSet> {
        self.current.read().clone()
    }

    pub fn read_one(&self, index: usize) -> Option<MachineSnapshot> {
        self.current.read().get(index).cloned()
    }
}
