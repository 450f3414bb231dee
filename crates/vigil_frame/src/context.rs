//! Per-unit execution context
//!
//! An execution context tracks one unit's frame budget: when the current
//! frame slice started, how much of the budget is gone, whether the health
//! guard has paused the unit, and the counters that end up in the unit's
//! execution statistics. The context lives exactly as long as one unit
//! execution and is shared between the executor and the guard as an `Arc`
//! (the guard only ever holds it weakly).

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::FrameClock;

/// Snapshot of a context's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextStats {
    /// Total yields observed (forced and voluntary)
    pub yields: u64,
    /// Yields forced by budget exhaustion
    pub forced_yields: u64,
    /// Recovery frames awaited after uncooperative blocking calls
    pub recovery_frames: u64,
    /// Total time spent inside unit steps (ms)
    pub total_work_ms: f64,
    /// Longest single unyielded work span (ms)
    pub max_single_block_ms: f64,
    /// Whether any single block exceeded the design-failure threshold
    pub design_failure: bool,
}

/// Budget tracker for one unit execution.
pub struct ExecutionContext {
    clock: Arc<dyn FrameClock>,
    /// Per-frame work budget (ms)
    budget_ms: f64,
    /// Single-block span that flags a design failure (ms)
    design_failure_ms: f64,
    /// Start of the current frame slice
    frame_start: Mutex<f64>,
    paused: AtomicBool,
    pause_reason: Mutex<Option<String>>,
    yields: AtomicU64,
    forced_yields: AtomicU64,
    recovery_frames: AtomicU64,
    /// Host frames still to be awaited before work resumes
    pending_recovery: AtomicU64,
    total_work_ms: Mutex<f64>,
    max_single_block_ms: Mutex<f64>,
    design_failure: AtomicBool,
}

impl ExecutionContext {
    /// Create a context with the given budget.
    pub fn new(clock: Arc<dyn FrameClock>, budget_ms: f64, design_failure_ms: f64) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            budget_ms,
            design_failure_ms,
            frame_start: Mutex::new(now),
            paused: AtomicBool::new(false),
            pause_reason: Mutex::new(None),
            yields: AtomicU64::new(0),
            forced_yields: AtomicU64::new(0),
            recovery_frames: AtomicU64::new(0),
            pending_recovery: AtomicU64::new(0),
            total_work_ms: Mutex::new(0.0),
            max_single_block_ms: Mutex::new(0.0),
            design_failure: AtomicBool::new(false),
        }
    }

    /// The configured per-frame budget (ms).
    pub fn budget_ms(&self) -> f64 {
        self.budget_ms
    }

    /// Capture the start of a fresh frame slice.
    pub fn start_frame(&self) {
        *self.frame_start.lock() = self.clock.now_ms();
    }

    /// Time elapsed in the current frame slice (ms).
    pub fn elapsed(&self) -> f64 {
        self.clock.now_ms() - *self.frame_start.lock()
    }

    /// Whether the current slice has consumed its budget.
    pub fn is_over_budget(&self) -> bool {
        self.elapsed() >= self.budget_ms
    }

    /// Whether the unit may keep stepping: not paused and within budget.
    pub fn is_healthy(&self) -> bool {
        !self.is_paused() && !self.is_over_budget()
    }

    /// Whether the guard has paused this context.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// The reason for the current pause, if any.
    pub fn pause_reason(&self) -> Option<String> {
        self.pause_reason.lock().clone()
    }

    /// Pause the context, recording why.
    pub fn pause(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!("execution context paused: {}", reason);
        *self.pause_reason.lock() = Some(reason);
        self.paused.store(true, Ordering::Release);
    }

    /// Resume the context and restart its frame timer.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            *self.pause_reason.lock() = None;
            self.start_frame();
            log::debug!("execution context resumed");
        }
    }

    /// Record one unyielded work span (ms).
    ///
    /// A span at or beyond the design-failure threshold raises a flag that
    /// is retained for reporting; it never aborts the run.
    pub fn record_block(&self, block_ms: f64) {
        *self.total_work_ms.lock() += block_ms;
        let mut max = self.max_single_block_ms.lock();
        if block_ms > *max {
            *max = block_ms;
        }
        if block_ms >= self.design_failure_ms && !self.design_failure.swap(true, Ordering::AcqRel) {
            log::warn!(
                "design failure: single work block of {:.1}ms exceeds {:.0}ms",
                block_ms,
                self.design_failure_ms
            );
        }
    }

    /// Record a yield; `forced` when budget exhaustion caused it.
    pub fn record_yield(&self, forced: bool) {
        self.yields.fetch_add(1, Ordering::Relaxed);
        if forced {
            self.forced_yields.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Request `n` recovery frames before work resumes.
    ///
    /// Units call this immediately after an uncooperative blocking call
    /// (e.g. a synchronous parse) so the host's compositor regains
    /// scheduling confidence before the next slice.
    pub fn request_recovery_frames(&self, n: u64) {
        self.pending_recovery.fetch_add(n, Ordering::AcqRel);
    }

    /// Host frames still pending before work resumes.
    pub fn pending_recovery_frames(&self) -> u64 {
        self.pending_recovery.load(Ordering::Acquire)
    }

    /// Consume one awaited recovery frame.
    ///
    /// Returns true when the countdown completes on this frame; the
    /// recovery counter is incremented and the frame timer restarted so
    /// budget measurement begins cleanly.
    pub fn consume_recovery_frame(&self) -> bool {
        let prev = self.pending_recovery.load(Ordering::Acquire);
        if prev == 0 {
            return false;
        }
        self.recovery_frames.fetch_add(1, Ordering::Relaxed);
        if self.pending_recovery.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.start_frame();
            true
        } else {
            false
        }
    }

    /// Whether any single block exceeded the design-failure threshold.
    pub fn has_design_failure(&self) -> bool {
        self.design_failure.load(Ordering::Acquire)
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> ContextStats {
        ContextStats {
            yields: self.yields.load(Ordering::Relaxed),
            forced_yields: self.forced_yields.load(Ordering::Relaxed),
            recovery_frames: self.recovery_frames.load(Ordering::Relaxed),
            total_work_ms: *self.total_work_ms.lock(),
            max_single_block_ms: *self.max_single_block_ms.lock(),
            design_failure: self.design_failure.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("budget_ms", &self.budget_ms)
            .field("paused", &self.is_paused())
            .field("stats", &self.stats())
            .finish()
    }
}
