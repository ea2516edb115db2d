use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::ValidationError;
use crate::loader::{self, LoadLimits};
use crate::schema::RuleDefinitions;
use crate::snapshot::RuleSnapshot;

/// Holds the active [`RuleSnapshot`] and publishes replacements atomically.
///
/// Readers clone the `Arc` under a momentary read lock and then evaluate
/// without holding anything, so [`activate`](Self::activate) never waits on
/// an in-flight evaluation.
pub struct RuleStore {
    active: RwLock<Arc<RuleSnapshot>>,
    next_version: AtomicU64,
    limits: LoadLimits,
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current();
        f.debug_struct("RuleStore")
            .field("version", &current.version())
            .field("num_policies", &current.policies().len())
            .field("num_event_rules", &current.event_rules().len())
            .finish()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(LoadLimits::default())
    }
}

impl RuleStore {
    /// A store whose active snapshot is empty (version 0).
    pub fn new(limits: LoadLimits) -> Self {
        Self {
            active: RwLock::new(Arc::new(RuleSnapshot::empty())),
            next_version: AtomicU64::new(1),
            limits,
        }
    }

    /// Validate and compile `defs` into a new, not yet active, snapshot.
    pub fn load(&self, defs: &RuleDefinitions) -> Result<RuleSnapshot, ValidationError> {
        // Compile first so rejected sets do not consume version numbers.
        let staged = loader::compile_snapshot(defs, 0, &self.limits)?;
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        Ok(staged.with_version(version))
    }

    pub fn load_str(&self, yaml: &str) -> Result<RuleSnapshot, ValidationError> {
        self.load(&loader::parse_definitions(yaml)?)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<RuleSnapshot, ValidationError> {
        self.load(&loader::read_definitions(path)?)
    }

    /// Publish `snapshot` as the active one. Evaluations already holding the
    /// previous snapshot keep it.
    pub fn activate(&self, snapshot: RuleSnapshot) -> Arc<RuleSnapshot> {
        let snapshot = Arc::new(snapshot);
        let previous = std::mem::replace(&mut *self.active.write(), Arc::clone(&snapshot));
        info!(
            previous = previous.version(),
            version = snapshot.version(),
            policies = snapshot.policies().len(),
            event_rules = snapshot.event_rules().len(),
            "rule snapshot activated"
        );
        snapshot
    }

    /// The active snapshot.
    pub fn current(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&self.active.read())
    }

    /// Load and activate in one step. On error the active snapshot is
    /// untouched.
    pub fn reload(&self, defs: &RuleDefinitions) -> Result<Arc<RuleSnapshot>, ValidationError> {
        let snapshot = self.load(defs)?;
        Ok(self.activate(snapshot))
    }

    pub fn reload_str(&self, yaml: &str) -> Result<Arc<RuleSnapshot>, ValidationError> {
        let snapshot = self.load_str(yaml)?;
        Ok(self.activate(snapshot))
    }

    pub fn reload_file(&self, path: impl AsRef<Path>) -> Result<Arc<RuleSnapshot>, ValidationError> {
        let snapshot = self.load_file(path)?;
        Ok(self.activate(snapshot))
    }
}
