//! Engine-awakened barrier
//!
//! The stronger of the two barriers: verifies sustained natural frame
//! production, not mere registration.
//!
//! Phase 1 issues a wake-up burst of forced frames, one full
//! begin/render/end cycle per host frame callback. A single synchronous
//! render does not establish animation intent with the compositor; a
//! burst does. Burst frames are never counted.
//!
//! Phase 2 watches the renderer's natural before-render cadence for N
//! consecutive stable intervals. A throttle-locked cadence passes as
//! throttle-stable, a jittery-but-active loop passes gracefully once
//! minimum activity is observed, and the hard timeout is the only
//! unconditional exit.

use vigil_frame::ThrottleLockDetector;

use crate::error::{AwakenedDisposition, AwakenedReport};
use crate::options::EngineAwakenedOptions;
use crate::surface::RenderSurface;

/// Result of feeding one frame event to the barrier.
#[derive(Debug, Clone, PartialEq)]
pub enum AwakenedPump {
    Pending,
    Passed(AwakenedReport),
    Failed {
        report: AwakenedReport,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Issuing forced frames
    Burst { issued_in_round: u32 },
    /// Watching natural cadence
    Natural,
    Resolved,
}

/// Two-phase hard gate for sustained frame production.
#[derive(Debug)]
pub struct EngineAwakenedBarrier {
    options: EngineAwakenedOptions,
    stage: Stage,
    started_ms: f64,
    /// Bursts begun, including the first
    burst_rounds: u32,
    /// Forced frames issued in total
    burst_total: u32,
    natural_window_start_ms: f64,
    last_natural_ms: Option<f64>,
    natural_count: u32,
    consecutive_stable: u32,
    first_frame_delay_ms: Option<f64>,
    stable_sum_ms: f64,
    stable_count: u32,
    max_interval_ms: f64,
    throttle: ThrottleLockDetector,
}

impl EngineAwakenedBarrier {
    /// Create the barrier; `now_ms` starts the hard-timeout clock.
    pub fn new(options: EngineAwakenedOptions, now_ms: f64) -> Self {
        let throttle = ThrottleLockDetector::new(options.throttle.clone());
        Self {
            options,
            stage: Stage::Burst { issued_in_round: 0 },
            started_ms: now_ms,
            burst_rounds: 1,
            burst_total: 0,
            natural_window_start_ms: now_ms,
            last_natural_ms: None,
            natural_count: 0,
            consecutive_stable: 0,
            first_frame_delay_ms: None,
            stable_sum_ms: 0.0,
            stable_count: 0,
            max_interval_ms: 0.0,
            throttle,
        }
    }

    /// Natural frames observed so far.
    pub fn natural_count(&self) -> u32 {
        self.natural_count
    }

    /// Forced frames issued so far.
    pub fn burst_total(&self) -> u32 {
        self.burst_total
    }

    /// Drive the barrier from a host frame callback.
    ///
    /// During the burst each call issues one full forced frame cycle.
    /// Afterwards this is where the graceful-fallback, burst-retry and
    /// hard-timeout clocks are consulted.
    pub fn on_host_frame<S: RenderSurface>(&mut self, scene: &mut S, now_ms: f64) -> AwakenedPump {
        if self.stage == Stage::Resolved {
            return AwakenedPump::Pending;
        }

        if now_ms - self.started_ms >= self.options.max_wait_ms {
            return self.resolve_timeout();
        }

        match self.stage {
            Stage::Burst { issued_in_round } => {
                scene.begin_frame();
                scene.render_frame();
                scene.end_frame();
                self.burst_total += 1;
                let issued = issued_in_round + 1;
                if issued >= self.options.burst_frame_count {
                    log::debug!(
                        "wake-up burst {} complete ({} forced frames total)",
                        self.burst_rounds,
                        self.burst_total
                    );
                    self.stage = Stage::Natural;
                    self.natural_window_start_ms = now_ms;
                } else {
                    self.stage = Stage::Burst {
                        issued_in_round: issued,
                    };
                }
                AwakenedPump::Pending
            }
            Stage::Natural => {
                if now_ms - self.natural_window_start_ms >= self.options.graceful_fallback_ms {
                    if self.natural_count >= self.options.min_natural_frames_for_graceful {
                        log::info!(
                            "engine awakened gracefully: {} natural frames, no consecutive stability",
                            self.natural_count
                        );
                        return self.pass(AwakenedDisposition::Graceful);
                    }
                    if self.natural_count == 0
                        && self.burst_rounds < 1 + self.options.max_burst_retries
                    {
                        // The renderer produced nothing at all; nudge it
                        // with another burst.
                        self.burst_rounds += 1;
                        self.stage = Stage::Burst { issued_in_round: 0 };
                        log::debug!("no natural frames yet, starting burst {}", self.burst_rounds);
                    }
                }
                AwakenedPump::Pending
            }
            Stage::Resolved => AwakenedPump::Pending,
        }
    }

    /// Observe one natural before-render frame.
    pub fn on_before_render(&mut self, now_ms: f64) -> AwakenedPump {
        if self.stage != Stage::Natural {
            // Frames induced by the burst are forced, not natural.
            return AwakenedPump::Pending;
        }

        self.natural_count += 1;

        let last = match self.last_natural_ms.replace(now_ms) {
            Some(last) => last,
            None => {
                // Cold start: the first natural frame carries no usable
                // interval and is exempt from the stability judgment.
                self.first_frame_delay_ms = Some(now_ms - self.natural_window_start_ms);
                return AwakenedPump::Pending;
            }
        };

        let dt = now_ms - last;
        if dt > self.max_interval_ms {
            self.max_interval_ms = dt;
        }

        if self.options.enable_throttle_detection {
            self.throttle.push(dt);
            if self.throttle.is_locked() {
                log::info!(
                    "engine awakened throttle-stable: mean {:.1}ms, stddev {:.2}ms",
                    self.throttle.mean(),
                    self.throttle.stddev()
                );
                return self.pass(AwakenedDisposition::ThrottleStable);
            }
        }

        if dt < self.options.max_allowed_frame_gap_ms {
            self.consecutive_stable += 1;
            self.stable_sum_ms += dt;
            self.stable_count += 1;
            if self.consecutive_stable >= self.options.min_consecutive_frames {
                log::info!(
                    "engine awakened: {} consecutive stable frames",
                    self.consecutive_stable
                );
                return self.pass(AwakenedDisposition::Normal);
            }
        } else {
            self.consecutive_stable = 0;
        }

        AwakenedPump::Pending
    }

    fn resolve_timeout(&mut self) -> AwakenedPump {
        if self.natural_count >= self.options.min_natural_frames_for_graceful {
            log::warn!(
                "engine-awakened hard timeout; passing gracefully with {} natural frames",
                self.natural_count
            );
            return self.pass(AwakenedDisposition::Graceful);
        }
        self.stage = Stage::Resolved;
        let report = self.report(AwakenedDisposition::HardFail);
        let reason = format!(
            "no stable frame evidence within {:.0}ms ({} natural frames, {} forced)",
            self.options.max_wait_ms, self.natural_count, self.burst_total
        );
        log::error!("engine-awakened barrier failed: {}", reason);
        AwakenedPump::Failed { report, reason }
    }

    fn pass(&mut self, disposition: AwakenedDisposition) -> AwakenedPump {
        self.stage = Stage::Resolved;
        AwakenedPump::Passed(self.report(disposition))
    }

    fn report(&self, disposition: AwakenedDisposition) -> AwakenedReport {
        let avg_stable = if self.stable_count > 0 {
            self.stable_sum_ms / self.stable_count as f64
        } else {
            0.0
        };
        AwakenedReport {
            disposition,
            first_frame_delay_ms: self.first_frame_delay_ms.unwrap_or(0.0),
            avg_stable_interval_ms: avg_stable,
            max_interval_ms: self.max_interval_ms,
            burst_count: self.burst_total,
            natural_frames: self.natural_count,
        }
    }
}
