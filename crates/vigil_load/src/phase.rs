//! Loading phases

use serde::{Deserialize, Serialize};

/// Phases of the readiness pipeline, in fixed canonical order.
///
/// `Pending` and `Failed` are terminals; the protocol never visits phases
/// out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not started
    Pending,
    /// Fetching raw assets
    Fetching,
    /// Building scene structures from fetched data
    Building,
    /// Warming caches, compiling materials and shaders
    Warming,
    /// Render-ready barrier and barrier-phase units
    Barrier,
    /// Engine-awakened barrier, visual units and visual requirements
    VisualReady,
    /// Sustained-stability hold before declaring readiness
    Stabilizing,
    /// Terminal success
    Ready,
    /// Terminal failure
    Failed,
}

impl Phase {
    /// All phases in canonical order.
    pub const ORDER: [Phase; 9] = [
        Phase::Pending,
        Phase::Fetching,
        Phase::Building,
        Phase::Warming,
        Phase::Barrier,
        Phase::VisualReady,
        Phase::Stabilizing,
        Phase::Ready,
        Phase::Failed,
    ];

    /// Phases a load unit may target, in execution order.
    pub const UNIT_PHASES: [Phase; 5] = [
        Phase::Fetching,
        Phase::Building,
        Phase::Warming,
        Phase::Barrier,
        Phase::VisualReady,
    ];

    /// Position in the canonical order.
    pub fn order_index(&self) -> usize {
        Self::ORDER.iter().position(|p| p == self).unwrap_or(0)
    }

    /// Whether this phase ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed)
    }

    /// Whether load units may target this phase.
    pub fn accepts_units(&self) -> bool {
        Self::UNIT_PHASES.contains(self)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fetching => write!(f, "fetching"),
            Self::Building => write!(f, "building"),
            Self::Warming => write!(f, "warming"),
            Self::Barrier => write!(f, "barrier"),
            Self::VisualReady => write!(f, "visual_ready"),
            Self::Stabilizing => write!(f, "stabilizing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
