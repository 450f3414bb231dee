//! # Vigil Frame
//!
//! Frame-domain primitives for the Vigil readiness protocol:
//! - Monotonic frame clock (and a deterministic manual clock for harnesses)
//! - Throttle-lock detection over sliding interval windows
//! - An independent frame health guard that pauses and resumes work
//! - Per-unit execution contexts enforcing a strict frame budget
//!
//! ## Key Invariants
//!
//! 1. **The guard keeps measuring** - its frame chain is independent of the
//!    renderer's loop, so a stalled renderer cannot blind it
//! 2. **Budgets are evidence** - the clock is monotonic milliseconds; callers
//!    never assume sub-millisecond precision
//! 3. **Subscribers are weak** - the guard must not keep an unfinished unit
//!    alive past its execution

pub mod clock;
pub mod context;
pub mod guard;
pub mod throttle;

pub use clock::{FrameClock, ManualClock, MonotonicClock};
pub use context::{ContextStats, ExecutionContext};
pub use guard::{
    FrameHealthGuard, FrameRecord, GuardConfig, GuardMetrics, HealthStatus, Visibility,
};
pub use throttle::{ThrottleConfig, ThrottleLockDetector};
