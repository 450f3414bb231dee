//! Progress model
//!
//! Maps phase plus weighted unit completion to a raw progress value
//! inside the current phase's band, then derives the displayed progress
//! with compression and hold semantics. Display may lag raw but never
//! runs ahead of evidence: reaching 1.0 before visual readiness has been
//! verified is a programming error, enforced at the display-update
//! boundary.
//!
//! Phase bands (closed ranges of raw progress):
//! fetching [0, 0.10] - building [0.10, 0.70] - warming [0.70, 0.85] -
//! barrier [0.85, 0.90] - visual-ready [0.90, 1.00] - stabilizing 1.00.

use std::collections::HashMap;

use vigil_load::{status_weight, Phase, UnitStatus};

use crate::options::ProgressOptions;

/// Raw progress band for a phase. `None` holds the current value.
pub fn band(phase: Phase) -> Option<(f64, f64)> {
    match phase {
        Phase::Pending => Some((0.0, 0.0)),
        Phase::Fetching => Some((0.0, 0.10)),
        Phase::Building => Some((0.10, 0.70)),
        Phase::Warming => Some((0.70, 0.85)),
        Phase::Barrier => Some((0.85, 0.90)),
        Phase::VisualReady => Some((0.90, 1.0)),
        Phase::Stabilizing | Phase::Ready => Some((1.0, 1.0)),
        Phase::Failed => None,
    }
}

struct UnitSlot {
    phase: Phase,
    weight: f64,
    status: UnitStatus,
}

/// Display-progress state machine.
pub struct ProgressModel {
    options: ProgressOptions,
    phase: Phase,
    raw: f64,
    display: f64,
    units: HashMap<String, UnitSlot>,
    /// Set when the current phase's gate resolved (e.g. barrier success),
    /// lifting raw to the band's upper bound
    phase_complete: bool,
    visual_complete: bool,
}

impl ProgressModel {
    /// Create a model with the given compression parameters.
    pub fn new(options: ProgressOptions) -> Self {
        Self {
            options,
            phase: Phase::Pending,
            raw: 0.0,
            display: 0.0,
            units: HashMap::new(),
            phase_complete: false,
            visual_complete: false,
        }
    }

    /// Current raw progress in [0, 1].
    pub fn raw(&self) -> f64 {
        self.raw
    }

    /// Current display progress in [0, 1].
    pub fn display(&self) -> f64 {
        self.display
    }

    /// Phase the model is tracking.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether visual readiness has been verified.
    pub fn visual_complete(&self) -> bool {
        self.visual_complete
    }

    /// Track a unit with the default weight (required 1.0, optional 0.5).
    pub fn register_unit(&mut self, id: impl Into<String>, phase: Phase, required: bool) {
        let weight = if required { 1.0 } else { 0.5 };
        self.units.insert(
            id.into(),
            UnitSlot {
                phase,
                weight,
                status: UnitStatus::Pending,
            },
        );
    }

    /// Override a unit's weight.
    pub fn set_weight(&mut self, id: &str, weight: f64) {
        if let Some(slot) = self.units.get_mut(id) {
            slot.weight = weight.max(0.0);
        }
    }

    /// Record a unit status change and recompute raw progress.
    pub fn update_status(&mut self, id: &str, status: UnitStatus) {
        if let Some(slot) = self.units.get_mut(id) {
            slot.status = status;
        }
        self.recompute_raw();
    }

    /// Enter a phase: raw lands on the band's lower bound and unit
    /// completion moves it toward the upper bound.
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_complete = false;
        self.recompute_raw();
    }

    /// The current phase's gate resolved; raw lifts to the band's upper
    /// bound (e.g. 0.90 on barrier success).
    pub fn complete_phase(&mut self) {
        self.phase_complete = true;
        self.recompute_raw();
    }

    /// Mark visual readiness verified, permitting display to reach 1.0.
    pub fn set_visual_complete(&mut self) {
        self.visual_complete = true;
    }

    /// Advance display progress one animation tick (~16 ms cadence).
    ///
    /// Returns true when display moved.
    pub fn tick(&mut self) -> bool {
        match self.phase {
            Phase::Pending | Phase::Fetching | Phase::Building | Phase::Warming => {
                self.set_display(self.raw)
            }
            Phase::Barrier => self.compress_toward(self.raw, 1.0),
            Phase::VisualReady => {
                let cap = if self.visual_complete {
                    1.0
                } else {
                    self.options.visual_display_cap
                };
                let target = self.raw.min(cap);
                self.compress_toward(target, self.options.visual_rate_scale)
            }
            Phase::Stabilizing | Phase::Ready => self.set_display(1.0),
            Phase::Failed => false,
        }
    }

    /// Forget everything and return to the pending state.
    pub fn reset(&mut self) {
        self.phase = Phase::Pending;
        self.raw = 0.0;
        self.display = 0.0;
        self.units.clear();
        self.phase_complete = false;
        self.visual_complete = false;
    }

    fn recompute_raw(&mut self) {
        let Some((lo, hi)) = band(self.phase) else {
            return;
        };
        let raw = if self.phase_complete {
            hi
        } else {
            let mut total = 0.0;
            let mut done = 0.0;
            for slot in self.units.values().filter(|s| s.phase == self.phase) {
                total += slot.weight;
                done += slot.weight * status_weight(slot.status);
            }
            if total > 0.0 {
                lo + (done / total) * (hi - lo)
            } else {
                lo
            }
        };
        // Raw is monotonic across phase entries and clamped to the band.
        self.raw = self.raw.max(raw.clamp(lo, hi));
    }

    fn compress_toward(&mut self, target: f64, rate_scale: f64) -> bool {
        let delta = target - self.display;
        if delta <= 0.0 {
            return false;
        }
        let lerp = self.options.barrier_lerp * rate_scale;
        let min_inc = self.options.barrier_min_inc * rate_scale;
        let max_inc = self.options.barrier_max_inc * rate_scale;
        let inc = (delta * lerp).clamp(min_inc, max_inc).min(delta);
        self.set_display(self.display + inc)
    }

    fn set_display(&mut self, value: f64) -> bool {
        let value = value.clamp(0.0, 1.0);
        if value <= self.display {
            return false;
        }
        debug_assert!(
            value < 1.0 || self.visual_complete,
            "display progress reached 1.0 before visual readiness was verified"
        );
        self.display = value;
        true
    }
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self::new(ProgressOptions::default())
    }
}
