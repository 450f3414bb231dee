//! Frame health guard
//!
//! The guard runs its own frame-callback chain, independent of the
//! renderer's loop: the host glue calls [`FrameHealthGuard::tick`] on every
//! host frame callback, whether or not the renderer produced anything.
//! Each tick classifies the recent cadence and pauses or resumes the
//! execution contexts subscribed to it.
//!
//! Classification priority per tick:
//! 1. Throttle pattern in the interval window - `Locked`
//! 2. Single interval at or beyond the critical gap - `Critical` (pause)
//! 3. Window average at or beyond the warning threshold - `Warning`
//! 4. Interval under the healthy threshold - count consecutive healthy
//!    frames; at the recovery threshold, `Healthy` (resume)

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::throttle::{ThrottleConfig, ThrottleLockDetector};

/// Frame health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Recent interval under the healthy threshold
    Healthy,
    /// Window average at or beyond the warning threshold
    Warning,
    /// A single interval at or beyond the critical gap
    Critical,
    /// Interval window matches the throttle pattern
    Locked,
    /// Transient state while verifying a return to healthy
    Recovering,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
            Self::Locked => write!(f, "locked"),
            Self::Recovering => write!(f, "recovering"),
        }
    }
}

/// Document visibility as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// One observed frame on the guard's own chain.
///
/// Independent of the renderer's internal frame counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRecord {
    /// Ordinal on the guard's chain
    pub index: u64,
    /// Absolute time (ms)
    pub time_ms: f64,
    /// Interval since the previous frame (ms); zero for the first
    pub interval_ms: f64,
    /// Visibility at observation time
    pub visibility: Visibility,
}

/// Guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Number of intervals in the rolling window
    pub window: usize,
    /// Intervals under this count as healthy (ms)
    pub healthy_ms: f64,
    /// Window average at or beyond this is a warning (ms)
    pub warning_ms: f64,
    /// A single interval at or beyond this is critical (ms)
    pub critical_ms: f64,
    /// Consecutive healthy frames required to recover
    pub recovery_frames: u32,
    /// Consecutive healthy frames required when leaving `Locked`
    pub locked_recovery_frames: u32,
    /// Observation window after the engine-awakened barrier passes (ms)
    pub post_awakening_watch_ms: f64,
    /// Throttle-lock detector configuration
    pub throttle: ThrottleConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            window: 5,
            healthy_ms: 20.0,
            warning_ms: 33.3,
            critical_ms: 50.0,
            recovery_frames: 3,
            locked_recovery_frames: 6,
            post_awakening_watch_ms: 500.0,
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Snapshot of the guard's current view of the frame chain.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardMetrics {
    /// Current classification
    pub status: HealthStatus,
    /// Frames observed on the guard's chain
    pub frame_index: u64,
    /// Last observed interval (ms)
    pub last_interval_ms: f64,
    /// Average interval over the rolling window (ms)
    pub window_avg_ms: f64,
    /// Live subscribed contexts
    pub subscribers: usize,
}

type LockedCallback = Box<dyn Fn(f64, f64) + Send + Sync>;
type StatusCallback = Box<dyn Fn(HealthStatus, HealthStatus) + Send + Sync>;
type DegradationCallback = Box<dyn Fn(HealthStatus) + Send + Sync>;

struct GuardState {
    last_tick_ms: Option<f64>,
    frame_index: u64,
    window: VecDeque<f64>,
    status: HealthStatus,
    consecutive_healthy: u32,
    /// Recovery must clear the longer threshold after a lock
    leaving_locked: bool,
    post_watch_until: Option<f64>,
    post_watch_fired: bool,
    last_interval_ms: f64,
}

impl GuardState {
    fn window_avg(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }
}

/// Independent frame-cadence monitor.
///
/// All methods take `&self`; internal state lives behind locks so a
/// callback fired from a tick may re-enter the guard (subscribe,
/// unsubscribe, read status) without deadlocking. Pause and resume
/// iterate a snapshot of the subscriber set for the same reason.
pub struct FrameHealthGuard {
    config: GuardConfig,
    state: Mutex<GuardState>,
    throttle: Mutex<ThrottleLockDetector>,
    subscribers: Mutex<Vec<Weak<ExecutionContext>>>,
    on_locked: Mutex<Option<LockedCallback>>,
    on_status_change: Mutex<Option<StatusCallback>>,
    on_degradation: Mutex<Option<DegradationCallback>>,
}

impl FrameHealthGuard {
    /// Create a guard with the given configuration.
    pub fn new(config: GuardConfig) -> Self {
        let throttle = ThrottleLockDetector::new(config.throttle.clone());
        Self {
            config,
            state: Mutex::new(GuardState {
                last_tick_ms: None,
                frame_index: 0,
                window: VecDeque::new(),
                status: HealthStatus::Healthy,
                consecutive_healthy: 0,
                leaving_locked: false,
                post_watch_until: None,
                post_watch_fired: false,
                last_interval_ms: 0.0,
            }),
            throttle: Mutex::new(throttle),
            subscribers: Mutex::new(Vec::new()),
            on_locked: Mutex::new(None),
            on_status_change: Mutex::new(None),
            on_degradation: Mutex::new(None),
        }
    }

    /// The configuration in effect.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Set the callback fired on entering `Locked`, with window mean and
    /// standard deviation.
    pub fn set_on_locked<F>(&self, callback: F)
    where
        F: Fn(f64, f64) + Send + Sync + 'static,
    {
        *self.on_locked.lock() = Some(Box::new(callback));
    }

    /// Set the callback fired on every status transition.
    pub fn set_on_status_change<F>(&self, callback: F)
    where
        F: Fn(HealthStatus, HealthStatus) + Send + Sync + 'static,
    {
        *self.on_status_change.lock() = Some(Box::new(callback));
    }

    /// Set the callback fired when health regresses inside the
    /// post-awakening watch window. Advisory only.
    pub fn set_on_post_awakening_degradation<F>(&self, callback: F)
    where
        F: Fn(HealthStatus) + Send + Sync + 'static,
    {
        *self.on_degradation.lock() = Some(Box::new(callback));
    }

    /// Subscribe an execution context to pause/resume control.
    pub fn connect(&self, ctx: &Arc<ExecutionContext>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|weak| weak.strong_count() > 0);
        subscribers.push(Arc::downgrade(ctx));
    }

    /// Remove an execution context from the subscriber set.
    ///
    /// Every `connect` in a unit's setup must be paired with a
    /// `disconnect` in its teardown.
    pub fn disconnect(&self, ctx: &Arc<ExecutionContext>) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|weak| match weak.upgrade() {
            Some(live) => !Arc::ptr_eq(&live, ctx),
            None => false,
        });
    }

    /// Live subscribed contexts.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Current classification.
    pub fn status(&self) -> HealthStatus {
        self.state.lock().status
    }

    /// Whether work should hold: critical, locked, or still recovering.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self.status(),
            HealthStatus::Critical | HealthStatus::Locked | HealthStatus::Recovering
        )
    }

    /// Snapshot the guard's view of the chain.
    pub fn metrics(&self) -> GuardMetrics {
        let state = self.state.lock();
        GuardMetrics {
            status: state.status,
            frame_index: state.frame_index,
            last_interval_ms: state.last_interval_ms,
            window_avg_ms: state.window_avg(),
            subscribers: self.subscriber_count(),
        }
    }

    /// Begin the post-awakening observation window.
    ///
    /// If the status regresses to `Critical` or `Locked` before the window
    /// ends, the degradation callback fires once.
    pub fn begin_post_awakening_watch(&self, now_ms: f64) {
        let mut state = self.state.lock();
        state.post_watch_until = Some(now_ms + self.config.post_awakening_watch_ms);
        state.post_watch_fired = false;
    }

    /// Observe one frame on the guard's chain.
    pub fn tick(&self, now_ms: f64) -> FrameRecord {
        self.tick_with_visibility(now_ms, Visibility::Visible)
    }

    /// Observe one frame, recording the host's visibility signal.
    pub fn tick_with_visibility(&self, now_ms: f64, visibility: Visibility) -> FrameRecord {
        let mut state = self.state.lock();
        state.frame_index += 1;
        let index = state.frame_index;

        let dt = match state.last_tick_ms {
            Some(last) => now_ms - last,
            None => {
                // First frame on the chain: nothing to classify yet.
                state.last_tick_ms = Some(now_ms);
                return FrameRecord {
                    index,
                    time_ms: now_ms,
                    interval_ms: 0.0,
                    visibility,
                };
            }
        };
        state.last_tick_ms = Some(now_ms);
        state.last_interval_ms = dt;

        if state.window.len() >= self.config.window {
            state.window.pop_front();
        }
        state.window.push_back(dt);

        let locked = {
            let mut throttle = self.throttle.lock();
            throttle.push(dt);
            throttle.is_locked()
        };

        let old = state.status;
        let mut pause_reason = None;
        let mut resume = false;

        let recovering = matches!(
            state.status,
            HealthStatus::Critical | HealthStatus::Locked | HealthStatus::Recovering
        );

        if locked {
            state.status = HealthStatus::Locked;
            state.consecutive_healthy = 0;
            state.leaving_locked = true;
        } else if dt >= self.config.critical_ms {
            state.status = HealthStatus::Critical;
            state.consecutive_healthy = 0;
            pause_reason = Some(format!("critical frame gap of {:.0}ms", dt));
        } else if recovering {
            // Verify the return to healthy by streak; the window average
            // still carries the gap that got us here and must not keep
            // recovery from being observed.
            if dt < self.config.healthy_ms {
                state.consecutive_healthy += 1;
                let needed = if state.leaving_locked {
                    self.config.locked_recovery_frames
                } else {
                    self.config.recovery_frames
                };
                if state.consecutive_healthy >= needed {
                    state.status = HealthStatus::Healthy;
                    state.leaving_locked = false;
                    resume = true;
                } else {
                    state.status = HealthStatus::Recovering;
                }
            } else {
                state.status = HealthStatus::Recovering;
                state.consecutive_healthy = 0;
            }
        } else if state.window_avg() >= self.config.warning_ms {
            state.status = HealthStatus::Warning;
            state.consecutive_healthy = 0;
        } else if dt < self.config.healthy_ms {
            state.status = HealthStatus::Healthy;
        } else {
            // Between healthy and critical with a calm window: hold the
            // current status.
            state.consecutive_healthy = 0;
        }

        let new = state.status;
        // Only a transition into a degraded state counts as a regression;
        // a watch armed while already locked stays quiet.
        let watch_regressed = match (state.post_watch_until, new) {
            (Some(until), HealthStatus::Critical | HealthStatus::Locked)
                if new != old && now_ms <= until && !state.post_watch_fired =>
            {
                state.post_watch_fired = true;
                true
            }
            _ => false,
        };
        if let Some(until) = state.post_watch_until {
            if now_ms > until {
                state.post_watch_until = None;
            }
        }
        drop(state);

        if let Some(reason) = pause_reason {
            self.pause_subscribers(&reason);
        }
        if resume {
            self.resume_subscribers();
        }

        if new != old {
            log::debug!("frame health {} -> {} (dt {:.1}ms)", old, new, dt);
            if new == HealthStatus::Locked {
                let (mean, stddev) = {
                    let throttle = self.throttle.lock();
                    (throttle.mean(), throttle.stddev())
                };
                log::info!(
                    "throttle lock detected: mean {:.1}ms, stddev {:.2}ms",
                    mean,
                    stddev
                );
                let taken = self.on_locked.lock().take();
                if let Some(callback) = taken {
                    callback(mean, stddev);
                    *self.on_locked.lock() = Some(callback);
                }
            }
            let taken = self.on_status_change.lock().take();
            if let Some(callback) = taken {
                callback(old, new);
                *self.on_status_change.lock() = Some(callback);
            }
        }

        if watch_regressed {
            log::warn!("health regressed to {} inside post-awakening watch", new);
            let taken = self.on_degradation.lock().take();
            if let Some(callback) = taken {
                callback(new);
                *self.on_degradation.lock() = Some(callback);
            }
        }

        FrameRecord {
            index,
            time_ms: now_ms,
            interval_ms: dt,
            visibility,
        }
    }

    /// Stop the guard and clear its state.
    ///
    /// All contexts must have been disconnected by their owners; a live
    /// subscriber here is a leaked `connect`.
    pub fn stop(&self) {
        let live = self.subscriber_count();
        debug_assert_eq!(live, 0, "guard stopped with {} leaked subscribers", live);
        if live > 0 {
            log::warn!("guard stopped with {} leaked subscribers", live);
        }
        self.subscribers.lock().clear();
        self.throttle.lock().reset();
        let mut state = self.state.lock();
        state.last_tick_ms = None;
        state.window.clear();
        state.status = HealthStatus::Healthy;
        state.consecutive_healthy = 0;
        state.leaving_locked = false;
        state.post_watch_until = None;
        state.post_watch_fired = false;
    }

    fn snapshot_subscribers(&self) -> Vec<Arc<ExecutionContext>> {
        // Snapshot before invoking anything: a pause callback may mutate
        // the subscriber set reentrantly.
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|weak| weak.strong_count() > 0);
        subscribers.iter().filter_map(Weak::upgrade).collect()
    }

    fn pause_subscribers(&self, reason: &str) {
        for ctx in self.snapshot_subscribers() {
            ctx.pause(reason);
        }
    }

    fn resume_subscribers(&self) {
        for ctx in self.snapshot_subscribers() {
            ctx.resume();
        }
    }
}

impl Default for FrameHealthGuard {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}
