//! Render-ready barrier
//!
//! Confirms the renderer's frame loop has truly started, using camera
//! evidence only: an active camera with a finite position and a finite
//! view matrix, observed on a rendered frame. Mesh counts, visibility and
//! elapsed time are deliberately not consulted; they have masked
//! correctness defects before.

use crate::options::BarrierValidationOptions;
use crate::surface::RenderSurface;

/// Result of feeding one rendered frame to the barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierPump {
    /// Evidence not yet acceptable; keep rendering
    Pending,
    /// The frame loop is confirmed
    Confirmed {
        /// Rendered frames observed before confirmation
        frames_seen: u32,
    },
    /// Retries exhausted
    Failed { reason: String },
}

/// One-shot confirmation gate over the after-render observable.
#[derive(Debug)]
pub struct RenderReadyBarrier {
    options: BarrierValidationOptions,
    frames_seen: u32,
    attempts: u32,
    frames_since_attempt: u32,
    last_reason: Option<String>,
    resolved: bool,
}

impl RenderReadyBarrier {
    /// Create a barrier with the given options.
    pub fn new(options: BarrierValidationOptions) -> Self {
        Self {
            options,
            frames_seen: 0,
            attempts: 0,
            frames_since_attempt: 0,
            last_reason: None,
            resolved: false,
        }
    }

    /// Rendered frames observed so far.
    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    /// Feed one after-render frame.
    pub fn on_after_render<S: RenderSurface>(&mut self, scene: &S) -> BarrierPump {
        if self.resolved {
            return BarrierPump::Pending;
        }
        self.frames_seen += 1;

        if !self.options.require_camera_render {
            // A rendered frame is itself the evidence in this mode.
            self.resolved = true;
            return BarrierPump::Confirmed {
                frames_seen: self.frames_seen,
            };
        }

        // Space validation attempts by the configured frame interval.
        if self.frames_seen > 1 {
            self.frames_since_attempt += 1;
            if self.frames_since_attempt < self.options.retry_frame_interval {
                return BarrierPump::Pending;
            }
        }
        self.frames_since_attempt = 0;

        match Self::validate(scene) {
            Ok(()) => {
                self.resolved = true;
                log::debug!(
                    "render-ready barrier confirmed on frame {}",
                    self.frames_seen
                );
                BarrierPump::Confirmed {
                    frames_seen: self.frames_seen,
                }
            }
            Err(reason) => {
                self.attempts += 1;
                log::debug!(
                    "render-ready validation failed (attempt {}): {}",
                    self.attempts,
                    reason
                );
                self.last_reason = Some(reason.clone());
                if self.attempts >= self.options.max_retry_frames {
                    self.resolved = true;
                    BarrierPump::Failed { reason }
                } else {
                    BarrierPump::Pending
                }
            }
        }
    }

    fn validate<S: RenderSurface>(scene: &S) -> Result<(), String> {
        let pose = scene
            .camera_pose()
            .ok_or_else(|| "no active camera".to_string())?;
        if !pose.position.is_finite() {
            return Err("camera position is not finite".to_string());
        }
        if !pose
            .view_matrix
            .to_cols_array()
            .iter()
            .all(|v| v.is_finite())
        {
            return Err("camera view matrix is not finite".to_string());
        }
        Ok(())
    }
}
