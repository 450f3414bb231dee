//! # Vigil Protocol
//!
//! The readiness protocol for real-time rendering initialization: drives
//! a scene from "assets requested" to the point where a user cannot
//! visually distinguish it from a fully playable scene, while the main
//! thread stays responsive to the host's frame scheduler.
//!
//! ## Architecture
//!
//! ```text
//! Host frame callbacks ──► LoadingProtocol ──► LoadExecutor ──► Units
//!                               │  ▲                  │
//!                               │  └── FrameHealthGuard (pauses/resumes)
//!                               ▼
//!            Barriers (render-ready, engine-awakened)
//!                               │
//!                               ▼
//!            Visual checker ──► Stabilization ──► launch
//!
//! ProgressModel + StateEmitter observe every transition.
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Evidence over timers** - phase transitions are gated by renderer
//!    evidence; only three timeouts are authoritative
//! 2. **Display never lies** - display progress cannot reach 1.0 before
//!    visual readiness has been verified
//! 3. **The protocol never throws** - every run ends in a structured
//!    report, even on failure
//! 4. **Throttled is still running** - a throttle-locked frame loop
//!    passes the barriers instead of hanging them

pub mod awakened;
pub mod emitter;
pub mod error;
pub mod nudge;
pub mod options;
pub mod progress;
pub mod protocol;
pub mod render_ready;
pub mod surface;
pub mod visual;

pub use awakened::{AwakenedPump, EngineAwakenedBarrier};
pub use emitter::{
    dispose_global, global, init_global, EventKind, LoadingEvent, StateEmitter, Subscription,
};
pub use error::{
    AwakenedDisposition, AwakenedReport, PendingRequirement, PhaseTiming, ProtocolError,
    ProtocolReport,
};
pub use nudge::ThrottleNudge;
pub use options::{
    BarrierValidationOptions, EngineAwakenedOptions, ProgressOptions, ProtocolCallbacks,
    ProtocolOptions, StabilizationOptions, VisualCheckerOptions,
};
pub use progress::{band, ProgressModel};
pub use protocol::{CancelHandle, LoadingProtocol};
pub use render_ready::{BarrierPump, RenderReadyBarrier};
pub use surface::{CameraPose, RenderSurface};
pub use visual::{CheckerPump, RequirementProbe, VisualReadyChecker, VisualRequirement};

// The phase vocabulary and unit contracts live in vigil_load; re-export
// the pieces protocol consumers always need.
pub use vigil_load::{CostHint, LoadUnit, Phase, StepContext, StepOutcome, UnitError, UnitStatus};
