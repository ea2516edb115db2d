use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::{AuditEntry, AuditEventType};

/// Consumer of audit records.
///
/// Called at most once per produced record and never expected to report
/// failure back to the caller: a recorder that cannot persist an entry logs
/// and drops it.
pub trait AuditRecorder: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Recorder that keeps entries in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditRecorder for MemoryRecorder {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().push(entry);
    }
}

impl<R: AuditRecorder + ?Sized> AuditRecorder for Arc<R> {
    fn record(&self, entry: AuditEntry) {
        (**self).record(entry)
    }
}
