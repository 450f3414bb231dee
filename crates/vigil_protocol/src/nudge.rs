//! Throttle-breaking nudge
//!
//! Opt-in recovery strategy for a host compositor that has locked the
//! frame callback to its punitive cadence: perturbing the hardware
//! scaling scalar by a tiny delta forces the compositor to reconsider
//! the surface, which can dislodge the throttle. The protocol never
//! invokes this itself; callers may apply it after a graceful or
//! throttle-stable barrier disposition.

use crate::surface::RenderSurface;

/// Hardware-scaling perturbation helper.
#[derive(Debug)]
pub struct ThrottleNudge {
    delta: f64,
    original: Option<f64>,
}

impl ThrottleNudge {
    /// Default scaling delta, small enough to be visually invisible.
    pub const DEFAULT_DELTA: f64 = 0.003;

    /// Create a nudge with the default delta.
    pub fn new() -> Self {
        Self::with_delta(Self::DEFAULT_DELTA)
    }

    /// Create a nudge with an explicit delta.
    pub fn with_delta(delta: f64) -> Self {
        Self {
            delta,
            original: None,
        }
    }

    /// Whether the perturbation is currently applied.
    pub fn is_applied(&self) -> bool {
        self.original.is_some()
    }

    /// Perturb the surface's hardware scaling. No-op while applied.
    pub fn apply<S: RenderSurface>(&mut self, scene: &mut S) {
        if self.original.is_some() {
            return;
        }
        let current = scene.hardware_scaling();
        self.original = Some(current);
        scene.set_hardware_scaling(current + self.delta);
        log::debug!(
            "throttle nudge applied: hardware scaling {:.4} -> {:.4}",
            current,
            current + self.delta
        );
    }

    /// Restore the original scaling. No-op when not applied.
    pub fn restore<S: RenderSurface>(&mut self, scene: &mut S) {
        if let Some(original) = self.original.take() {
            scene.set_hardware_scaling(original);
            log::debug!("throttle nudge restored: hardware scaling {:.4}", original);
        }
    }
}

impl Default for ThrottleNudge {
    fn default() -> Self {
        Self::new()
    }
}
