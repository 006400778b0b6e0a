// In-memory ring of recent status transitions per machine
use crate::domain::history::StatusTransition;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

pub struct HistoryLog {
    limit: usize,
    entries: Mutex<HashMap<usize, VecDeque<StatusTransition>>>,
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, transition: StatusTransition) {
        if self.limit == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        let ring = entries.entry(transition.index).or_default();
        if ring.len() == self.limit {
            ring.pop_front();
        }
        ring.push_back(transition);
    }

    /// Transitions for machine `index`, oldest first.
    pub fn recent(&self, index: usize) -> Vec<StatusTransition> {
        self.entries
            .lock()
            .get(&index)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}
