use crate::incident::IncidentRecord;
use std::sync::{PoisonError, RwLock};

/// In-memory, append-only incident history. Grows without bound and is lost
/// on restart.
#[derive(Debug, Default)]
pub struct IncidentStore {
    records: RwLock<Vec<IncidentRecord>>,
}

impl IncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: IncidentRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// All incidents, newest `created_at` first.
    pub fn list_recent(&self) -> Vec<IncidentRecord> {
        let mut records = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
