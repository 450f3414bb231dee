//! Protocol configuration
//!
//! All configuration is a closed set of named fields with documented
//! defaults. There are no open-ended key/value maps.

use serde::{Deserialize, Serialize};
use vigil_frame::{GuardConfig, ThrottleConfig};
use vigil_load::{ExecutorConfig, Phase, UnitStatus};

/// Render-ready barrier options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierValidationOptions {
    /// Rendered frames to retry camera validation before failing
    pub max_retry_frames: u32,
    /// Whether camera evidence is required at all; when false the first
    /// rendered frame confirms the barrier
    pub require_camera_render: bool,
    /// Rendered frames between validation attempts
    pub retry_frame_interval: u32,
}

impl Default for BarrierValidationOptions {
    fn default() -> Self {
        Self {
            max_retry_frames: 12,
            require_camera_render: true,
            retry_frame_interval: 1,
        }
    }
}

/// Engine-awakened barrier options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineAwakenedOptions {
    /// Consecutive stable natural frames required to pass normally
    pub min_consecutive_frames: u32,
    /// A natural interval under this is stable (ms)
    pub max_allowed_frame_gap_ms: f64,
    /// Hard timeout for the whole barrier (ms)
    pub max_wait_ms: f64,
    /// Forced frames per wake-up burst
    pub burst_frame_count: u32,
    /// Additional bursts allowed while no natural frame has arrived
    pub max_burst_retries: u32,
    /// Window without consecutive stability before the graceful check (ms)
    pub graceful_fallback_ms: f64,
    /// Natural frames required for a graceful pass
    pub min_natural_frames_for_graceful: u32,
    /// Whether throttle-stable acceptance is evaluated
    pub enable_throttle_detection: bool,
    /// Throttle-lock detector configuration for natural intervals
    pub throttle: ThrottleConfig,
}

impl Default for EngineAwakenedOptions {
    fn default() -> Self {
        Self {
            min_consecutive_frames: 3,
            max_allowed_frame_gap_ms: 100.0,
            max_wait_ms: 3000.0,
            burst_frame_count: 5,
            max_burst_retries: 2,
            graceful_fallback_ms: 200.0,
            min_natural_frames_for_graceful: 10,
            enable_throttle_detection: true,
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Stabilization options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizationOptions {
    /// Minimum sustain period before declaring ready (ms)
    pub min_time_ms: f64,
    /// Minimum sustained frame count before declaring ready
    pub min_stable_frames: u32,
    /// Fail-safe cap: stabilization ends successfully here with a
    /// warning (ms)
    pub max_time_ms: f64,
}

impl Default for StabilizationOptions {
    fn default() -> Self {
        Self {
            min_time_ms: 400.0,
            min_stable_frames: 8,
            max_time_ms: 1500.0,
        }
    }
}

/// Visual-ready checker options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualCheckerOptions {
    /// Maximum evaluation attempts before failing
    pub max_attempts: u32,
    /// Delay between attempts (ms)
    pub attempt_delay_ms: f64,
    /// Consecutive ready observations required per requirement
    pub min_consecutive: u32,
}

impl Default for VisualCheckerOptions {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            attempt_delay_ms: 50.0,
            min_consecutive: 3,
        }
    }
}

/// Display-compression parameters for the progress model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressOptions {
    /// Lerp factor toward raw progress in the barrier phase
    pub barrier_lerp: f64,
    /// Minimum per-tick display increment in the barrier phase
    pub barrier_min_inc: f64,
    /// Maximum per-tick display increment in the barrier phase
    pub barrier_max_inc: f64,
    /// Rate and clamp multiplier applied in the visual-ready phase
    pub visual_rate_scale: f64,
    /// Display ceiling while the visual-ready phase executes
    pub visual_display_cap: f64,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            barrier_lerp: 0.03,
            barrier_min_inc: 0.001,
            barrier_max_inc: 0.015,
            visual_rate_scale: 1.5,
            visual_display_cap: 0.98,
        }
    }
}

/// Complete protocol configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolOptions {
    pub barrier_validation: BarrierValidationOptions,
    pub engine_awakened: EngineAwakenedOptions,
    pub stabilization: StabilizationOptions,
    pub visual: VisualCheckerOptions,
    pub progress: ProgressOptions,
    pub executor: ExecutorConfig,
    pub guard: GuardConfig,
}

/// Caller hooks fired by the protocol.
///
/// `on_after_ready` fires exactly once, on the first host frame callback
/// strictly after the frame that declared readiness, so callers never run
/// game logic inside the declaring frame.
pub struct ProtocolCallbacks<S> {
    pub on_phase_change: Option<Box<dyn FnMut(Phase, Phase) + Send>>,
    pub on_progress: Option<Box<dyn FnMut(f64, f64) + Send>>,
    pub on_log: Option<Box<dyn FnMut(&str) + Send>>,
    pub on_unit_status_change: Option<Box<dyn FnMut(&str, UnitStatus) + Send>>,
    pub on_unit_start: Option<Box<dyn FnMut(&str) + Send>>,
    pub on_unit_end: Option<Box<dyn FnMut(&str) + Send>>,
    pub on_after_ready: Option<Box<dyn FnOnce(&mut S) + Send>>,
}

impl<S> Default for ProtocolCallbacks<S> {
    fn default() -> Self {
        Self {
            on_phase_change: None,
            on_progress: None,
            on_log: None,
            on_unit_status_change: None,
            on_unit_start: None,
            on_unit_end: None,
            on_after_ready: None,
        }
    }
}

impl<S> std::fmt::Debug for ProtocolCallbacks<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolCallbacks")
            .field("on_phase_change", &self.on_phase_change.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_log", &self.on_log.is_some())
            .field(
                "on_unit_status_change",
                &self.on_unit_status_change.is_some(),
            )
            .field("on_unit_start", &self.on_unit_start.is_some())
            .field("on_unit_end", &self.on_unit_end.is_some())
            .field("on_after_ready", &self.on_after_ready.is_some())
            .finish()
    }
}
