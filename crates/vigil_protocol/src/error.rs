//! Protocol failure taxonomy and run report
//!
//! The protocol never throws at its run surface: every run ends in a
//! [`ProtocolReport`], and failures are carried inside it as the first
//! error together with the phase reached and accumulated timings.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_load::Phase;

/// A visual requirement still unmet when the checker gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequirement {
    pub id: String,
    pub name: String,
    /// Last observed failure reason
    pub reason: String,
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ProtocolError {
    /// The caller cancelled the run
    #[error("cancelled: {0}")]
    Cancelled(String),
    /// A required unit failed to load or validate
    #[error("unit '{id}' failed: {cause}")]
    UnitFailed { id: String, cause: String },
    /// The render-ready barrier could not confirm the frame loop
    #[error("render-ready barrier failed: {0}")]
    BarrierTimeout(String),
    /// The engine-awakened barrier exhausted its budget with no evidence
    #[error("engine-awakened hard failure: {0}")]
    AwakenedHardFail(String),
    /// Visual requirements were still unmet after the final attempt
    #[error("visual requirements unmet: {}", format_pending(.0))]
    VisualRequirementUnmet(Vec<PendingRequirement>),
    /// Two units claimed the same identity
    #[error("duplicate registration: {0}")]
    DuplicateRegistration(String),
    /// The protocol was driven out of its lifecycle
    #[error("invalid state: {0}")]
    InvalidState(String),
}

fn format_pending(pending: &[PendingRequirement]) -> String {
    pending
        .iter()
        .map(|p| format!("{} ({})", p.id, p.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// How the engine-awakened barrier passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwakenedDisposition {
    /// Consecutive natural stability observed
    Normal,
    /// The loop is throttle-locked but genuinely running
    ThrottleStable,
    /// Running but jittery; minimum activity observed
    Graceful,
    /// No acceptable evidence inside the hard timeout
    HardFail,
}

impl std::fmt::Display for AwakenedDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::ThrottleStable => write!(f, "throttle-stable"),
            Self::Graceful => write!(f, "graceful"),
            Self::HardFail => write!(f, "hard-fail"),
        }
    }
}

/// Evidence gathered by the engine-awakened barrier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwakenedReport {
    pub disposition: AwakenedDisposition,
    /// Delay from the end of the burst to the first natural frame (ms)
    pub first_frame_delay_ms: f64,
    /// Average interval across stable natural frames (ms)
    pub avg_stable_interval_ms: f64,
    /// Largest natural interval observed (ms)
    pub max_interval_ms: f64,
    /// Total forced frames issued across all bursts
    pub burst_count: u32,
    /// Natural frames observed
    pub natural_frames: u32,
}

/// Wall-clock time spent in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub elapsed_ms: f64,
}

/// The structured result of one protocol run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolReport {
    /// Terminal phase: `Ready` or `Failed`
    pub phase: Phase,
    /// Total wall-clock time of the run (ms)
    pub elapsed_ms: f64,
    /// Per-phase wall-clock timings, in traversal order
    pub phase_timings: Vec<PhaseTiming>,
    /// Units whose status ended `Failed`
    pub failed_units: Vec<String>,
    /// Units absorbed as `Skipped`
    pub skipped_units: Vec<String>,
    /// First error captured, when the run failed
    pub first_error: Option<ProtocolError>,
    /// Engine-awakened evidence, when that barrier ran
    pub awakened: Option<AwakenedReport>,
    /// Stabilization ended by the fail-safe cap rather than by sustain
    pub stabilization_fail_safe: bool,
    /// Units that exceeded the single-block design-failure threshold
    pub design_failures: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnitFailed {
            id: "terrain".to_string(),
            cause: "parse error: bad chunk".to_string(),
        };
        assert_eq!(err.to_string(), "unit 'terrain' failed: parse error: bad chunk");

        let err = ProtocolError::VisualRequirementUnmet(vec![PendingRequirement {
            id: "hero-mesh".to_string(),
            name: "Hero mesh".to_string(),
            reason: "not in scene graph".to_string(),
        }]);
        assert!(err.to_string().contains("hero-mesh (not in scene graph)"));
    }

    #[test]
    fn test_report_serializes() {
        let report = ProtocolReport {
            phase: Phase::Ready,
            elapsed_ms: 812.5,
            phase_timings: vec![PhaseTiming {
                phase: Phase::Warming,
                elapsed_ms: 120.0,
            }],
            failed_units: Vec::new(),
            skipped_units: vec!["decals".to_string()],
            first_error: None,
            awakened: Some(AwakenedReport {
                disposition: AwakenedDisposition::Normal,
                first_frame_delay_ms: 18.0,
                avg_stable_interval_ms: 16.7,
                max_interval_ms: 22.0,
                burst_count: 5,
                natural_frames: 4,
            }),
            stabilization_fail_safe: false,
            design_failures: Vec::new(),
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"phase\":\"ready\""));
        assert!(json.contains("\"disposition\":\"normal\""));
    }
}
