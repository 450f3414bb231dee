//! Load units
//!
//! A load unit is the host application's piece of loading work, expressed
//! as a restartable step sequence: each `step` call performs a bounded
//! chunk and returns, and the executor decides at that boundary whether
//! the unit continues in this frame or suspends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_frame::ExecutionContext;

use crate::phase::Phase;

/// Cost estimate a unit declares up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostHint {
    Light,
    Medium,
    Heavy,
}

/// Status of a unit within one run.
///
/// Progression is monotonic per run; only `reset` returns to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Loading,
    Loaded,
    Validated,
    Failed,
    Skipped,
}

impl UnitStatus {
    /// Whether the unit no longer needs execution.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Validated | Self::Loaded | Self::Skipped)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::Validated => write!(f, "validated"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Interim progress weight of a status, used by the registry estimator.
pub fn status_weight(status: UnitStatus) -> f64 {
    match status {
        UnitStatus::Pending => 0.0,
        UnitStatus::Loading => 0.5,
        UnitStatus::Loaded => 0.8,
        UnitStatus::Validated => 1.0,
        UnitStatus::Failed => 0.0,
        UnitStatus::Skipped => 1.0,
    }
}

/// Error from a unit step or validator.
#[derive(Debug, Clone, Error)]
pub enum UnitError {
    /// Asset not found
    #[error("asset not found: {0}")]
    Missing(String),
    /// IO error
    #[error("io error: {0}")]
    Io(String),
    /// Parse/decode error
    #[error("parse error: {0}")]
    Parse(String),
    /// Anything else
    #[error("{0}")]
    Message(String),
}

/// Result of one unit step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More steps remain
    Continue,
    /// The unit finished its work
    Complete,
}

/// What a step may see: the execution context and a progress sink.
pub struct StepContext<'a> {
    exec: &'a Arc<ExecutionContext>,
    on_progress: &'a dyn Fn(f64),
}

impl<'a> StepContext<'a> {
    /// Create a step context over an execution context and progress sink.
    pub fn new(exec: &'a Arc<ExecutionContext>, on_progress: &'a dyn Fn(f64)) -> Self {
        Self { exec, on_progress }
    }

    /// The execution context driving this unit.
    pub fn execution(&self) -> &ExecutionContext {
        self.exec
    }

    /// Time elapsed in the current frame slice (ms).
    pub fn elapsed(&self) -> f64 {
        self.exec.elapsed()
    }

    /// Whether the current slice has consumed its budget.
    ///
    /// Units with naturally coarse steps may consult this to pick a
    /// smaller chunk; the executor enforces the budget regardless.
    pub fn is_over_budget(&self) -> bool {
        self.exec.is_over_budget()
    }

    /// Ask for `n` host frames of recovery before the next step.
    ///
    /// Call immediately after an uncooperative blocking call so the
    /// compositor regains scheduling confidence.
    pub fn request_recovery_frames(&self, n: u64) {
        self.exec.request_recovery_frames(n);
    }

    /// Report fractional progress in [0, 1] for this unit.
    pub fn set_progress(&self, fraction: f64) {
        (self.on_progress)(fraction.clamp(0.0, 1.0));
    }
}

/// A load unit produced by the host application.
///
/// `S` is the host's scene type; units mutate it in bounded steps.
pub trait LoadUnit<S>: Send {
    /// Unique, non-empty identity.
    fn id(&self) -> &str;

    /// Phase this unit executes in.
    fn phase(&self) -> Phase;

    /// Whether readiness requires this unit.
    fn required(&self) -> bool {
        true
    }

    /// Declared cost estimate.
    fn cost(&self) -> CostHint {
        CostHint::Medium
    }

    /// Perform one bounded chunk of work.
    fn step(&mut self, scene: &mut S, ctx: &StepContext<'_>) -> Result<StepOutcome, UnitError>;

    /// Post-load validation. `None` when the unit has no validator.
    fn validate(&self, _scene: &S) -> Option<bool> {
        None
    }

    /// Release resources owned by the unit. Called exactly once, from
    /// the registry's disposal path.
    fn dispose(&mut self) {}

    /// Restart the step sequence so the unit can run again.
    fn reset(&mut self) {}
}
