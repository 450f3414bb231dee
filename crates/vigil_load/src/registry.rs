//! Unit registry
//!
//! The registry owns every unit for the duration of a run. Units are
//! keyed by identity, grouped by target phase, and classified required or
//! optional. The protocol borrows the registry during execution and
//! writes only unit status; `clear` is the single disposal path.

use std::collections::HashMap;

use thiserror::Error;
use vigil_frame::ContextStats;

use crate::phase::Phase;
use crate::unit::{status_weight, LoadUnit, UnitError, UnitStatus};

/// Registration and lookup errors
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A unit with this id is already registered
    #[error("unit already registered: {0}")]
    DuplicateRegistration(String),
    /// Unit ids must be non-empty
    #[error("unit id must not be empty")]
    EmptyId,
    /// No unit with this id
    #[error("unknown unit: {0}")]
    UnknownUnit(String),
}

/// A registered unit together with its run state.
pub struct UnitEntry<S> {
    unit: Box<dyn LoadUnit<S>>,
    id: String,
    phase: Phase,
    required: bool,
    status: UnitStatus,
    /// Wall-clock time of the last execution (ms); retained across resets
    /// as a cost hint for the executor
    elapsed_ms: f64,
    stats: ContextStats,
    error: Option<UnitError>,
}

impl<S> UnitEntry<S> {
    fn new(unit: Box<dyn LoadUnit<S>>) -> Self {
        let id = unit.id().to_string();
        let phase = unit.phase();
        let required = unit.required();
        Self {
            unit,
            id,
            phase,
            required,
            status: UnitStatus::Pending,
            elapsed_ms: 0.0,
            stats: ContextStats::default(),
            error: None,
        }
    }

    /// Unit identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Target phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether readiness requires this unit.
    pub fn required(&self) -> bool {
        self.required
    }

    /// Current status.
    pub fn status(&self) -> UnitStatus {
        self.status
    }

    /// Wall-clock time of the last execution (ms).
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    /// Execution statistics from the last run.
    pub fn stats(&self) -> &ContextStats {
        &self.stats
    }

    /// Error from the last failed step or validation, if any.
    pub fn error(&self) -> Option<&UnitError> {
        self.error.as_ref()
    }

    /// The unit itself.
    pub fn unit(&self) -> &dyn LoadUnit<S> {
        self.unit.as_ref()
    }

    /// Mutable access for the executor.
    pub fn unit_mut(&mut self) -> &mut dyn LoadUnit<S> {
        self.unit.as_mut()
    }
}

/// Registry of load units for one run.
pub struct UnitRegistry<S> {
    /// Entries in registration order
    entries: Vec<UnitEntry<S>>,
    /// Identity index into `entries`
    by_id: HashMap<String, usize>,
}

impl<S> UnitRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    /// Register a unit. Rejects empty and duplicate identities.
    pub fn register(&mut self, unit: Box<dyn LoadUnit<S>>) -> Result<(), RegistryError> {
        let id = unit.id().to_string();
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicateRegistration(id));
        }
        log::debug!("registered unit '{}' for phase {}", id, unit.phase());
        self.by_id.insert(id, self.entries.len());
        self.entries.push(UnitEntry::new(unit));
        Ok(())
    }

    /// Register several units, stopping at the first error.
    pub fn register_all(
        &mut self,
        units: impl IntoIterator<Item = Box<dyn LoadUnit<S>>>,
    ) -> Result<(), RegistryError> {
        for unit in units {
            self.register(unit)?;
        }
        Ok(())
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no units are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &str) -> Option<&UnitEntry<S>> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    /// Look up an entry mutably by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut UnitEntry<S>> {
        let idx = *self.by_id.get(id)?;
        Some(&mut self.entries[idx])
    }

    /// Ids of units targeting a phase, in registration order.
    pub fn ids_in_phase(&self, phase: Phase) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.phase == phase)
            .map(|e| e.id.clone())
            .collect()
    }

    /// Ids of units targeting a phase, split (required, optional), each
    /// in registration order.
    pub fn phase_split(&self, phase: Phase) -> (Vec<String>, Vec<String>) {
        let mut required = Vec::new();
        let mut optional = Vec::new();
        for entry in self.entries.iter().filter(|e| e.phase == phase) {
            if entry.required {
                required.push(entry.id.clone());
            } else {
                optional.push(entry.id.clone());
            }
        }
        (required, optional)
    }

    /// Entries with the given status.
    pub fn by_status(&self, status: UnitStatus) -> Vec<&UnitEntry<S>> {
        self.entries.iter().filter(|e| e.status == status).collect()
    }

    /// All required entries.
    pub fn required_units(&self) -> Vec<&UnitEntry<S>> {
        self.entries.iter().filter(|e| e.required).collect()
    }

    /// All optional entries.
    pub fn optional_units(&self) -> Vec<&UnitEntry<S>> {
        self.entries.iter().filter(|e| !e.required).collect()
    }

    /// All entries in canonical phase order; registration order within a
    /// phase.
    pub fn in_phase_order(&self) -> Vec<&UnitEntry<S>> {
        let mut out: Vec<&UnitEntry<S>> = self.entries.iter().collect();
        out.sort_by_key(|e| e.phase.order_index());
        out
    }

    /// Set a unit's status.
    pub fn set_status(&mut self, id: &str, status: UnitStatus) -> Result<(), RegistryError> {
        let entry = self
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownUnit(id.to_string()))?;
        entry.status = status;
        Ok(())
    }

    /// Record the outcome of one execution.
    pub fn record_run(
        &mut self,
        id: &str,
        status: UnitStatus,
        elapsed_ms: f64,
        stats: ContextStats,
        error: Option<UnitError>,
    ) -> Result<(), RegistryError> {
        let entry = self
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownUnit(id.to_string()))?;
        entry.status = status;
        entry.elapsed_ms = elapsed_ms;
        entry.stats = stats;
        entry.error = error;
        Ok(())
    }

    /// Interim progress estimate from unit statuses.
    ///
    /// Used only until the progress model takes over. Returns 1.0 for an
    /// empty population.
    pub fn progress(&self, required_only: bool) -> f64 {
        let population: Vec<&UnitEntry<S>> = self
            .entries
            .iter()
            .filter(|e| !required_only || e.required)
            .collect();
        if population.is_empty() {
            return 1.0;
        }
        let sum: f64 = population.iter().map(|e| status_weight(e.status)).sum();
        sum / population.len() as f64
    }

    /// Return every unit to `Pending` and restart its step sequence.
    ///
    /// Recorded elapsed times survive as cost hints for the next run.
    pub fn reset_all(&mut self) {
        for entry in &mut self.entries {
            entry.status = UnitStatus::Pending;
            entry.stats = ContextStats::default();
            entry.error = None;
            entry.unit.reset();
        }
    }

    /// Dispose every unit exactly once and empty the registry.
    pub fn clear(&mut self) {
        for mut entry in self.entries.drain(..) {
            entry.unit.dispose();
        }
        self.by_id.clear();
    }
}

impl<S> Default for UnitRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Drop for UnitRegistry<S> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{StepContext, StepOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullScene;

    struct TestUnit {
        id: String,
        phase: Phase,
        required: bool,
        disposals: Arc<AtomicUsize>,
    }

    impl TestUnit {
        fn boxed(id: &str, phase: Phase, required: bool) -> Box<dyn LoadUnit<NullScene>> {
            Box::new(Self {
                id: id.to_string(),
                phase,
                required,
                disposals: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl LoadUnit<NullScene> for TestUnit {
        fn id(&self) -> &str {
            &self.id
        }

        fn phase(&self) -> Phase {
            self.phase
        }

        fn required(&self) -> bool {
            self.required
        }

        fn step(
            &mut self,
            _scene: &mut NullScene,
            _ctx: &StepContext<'_>,
        ) -> Result<StepOutcome, UnitError> {
            Ok(StepOutcome::Complete)
        }

        fn dispose(&mut self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_register_and_query() {
        let mut registry = UnitRegistry::new();
        registry
            .register(TestUnit::boxed("terrain", Phase::Fetching, true))
            .unwrap();
        registry
            .register(TestUnit::boxed("decals", Phase::Fetching, false))
            .unwrap();
        registry
            .register(TestUnit::boxed("materials", Phase::Warming, true))
            .unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.get("terrain").is_some());
        assert_eq!(registry.ids_in_phase(Phase::Fetching).len(), 2);
        assert_eq!(registry.required_units().len(), 2);
        assert_eq!(registry.optional_units().len(), 1);

        let (required, optional) = registry.phase_split(Phase::Fetching);
        assert_eq!(required, vec!["terrain"]);
        assert_eq!(optional, vec!["decals"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = UnitRegistry::new();
        registry
            .register(TestUnit::boxed("terrain", Phase::Fetching, true))
            .unwrap();
        let err = registry
            .register(TestUnit::boxed("terrain", Phase::Building, true))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRegistration(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut registry = UnitRegistry::new();
        let err = registry
            .register(TestUnit::boxed("", Phase::Fetching, true))
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyId));
    }

    #[test]
    fn test_progress_weights() {
        let mut registry = UnitRegistry::new();
        registry
            .register(TestUnit::boxed("a", Phase::Fetching, true))
            .unwrap();
        registry
            .register(TestUnit::boxed("b", Phase::Fetching, true))
            .unwrap();

        assert_eq!(registry.progress(true), 0.0);

        registry.set_status("a", UnitStatus::Loading).unwrap();
        assert_eq!(registry.progress(true), 0.25);

        registry.set_status("a", UnitStatus::Loaded).unwrap();
        registry.set_status("b", UnitStatus::Validated).unwrap();
        assert_eq!(registry.progress(true), 0.9);
    }

    #[test]
    fn test_progress_empty_population() {
        let registry: UnitRegistry<NullScene> = UnitRegistry::new();
        assert_eq!(registry.progress(true), 1.0);
        assert_eq!(registry.progress(false), 1.0);
    }

    #[test]
    fn test_clear_disposes_once() {
        let disposals = Arc::new(AtomicUsize::new(0));
        let mut registry = UnitRegistry::new();
        registry
            .register(Box::new(TestUnit {
                id: "terrain".to_string(),
                phase: Phase::Fetching,
                required: true,
                disposals: disposals.clone(),
            }))
            .unwrap();

        registry.clear();
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());

        // Second clear is a no-op.
        registry.clear();
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reregister_after_clear() {
        let mut registry = UnitRegistry::new();
        registry
            .register(TestUnit::boxed("terrain", Phase::Fetching, true))
            .unwrap();
        registry.clear();
        registry
            .register(TestUnit::boxed("terrain", Phase::Fetching, true))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("terrain").unwrap().status(), UnitStatus::Pending);
    }

    #[test]
    fn test_reset_all_preserves_elapsed_hint() {
        let mut registry = UnitRegistry::new();
        registry
            .register(TestUnit::boxed("terrain", Phase::Fetching, true))
            .unwrap();
        registry
            .record_run(
                "terrain",
                UnitStatus::Loaded,
                18.0,
                ContextStats::default(),
                None,
            )
            .unwrap();

        registry.reset_all();
        let entry = registry.get("terrain").unwrap();
        assert_eq!(entry.status(), UnitStatus::Pending);
        assert_eq!(entry.elapsed_ms(), 18.0);
    }
}
