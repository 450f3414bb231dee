//! Renderer contract
//!
//! The protocol never implements rendering; it consumes this trait. The
//! host's scene type implements it so barriers can gather physical
//! evidence (camera pose, forced frame cycles, surface geometry) and the
//! before/after-render observables arrive as pump calls on the protocol.

use glam::{DMat4, DVec3};

/// Pose of the active camera, as sampled from the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    /// World-space position
    pub position: DVec3,
    /// View matrix
    pub view_matrix: DMat4,
}

impl CameraPose {
    /// Whether every component of the pose is finite: all three position
    /// components and all sixteen matrix elements.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.view_matrix.to_cols_array().iter().all(|v| v.is_finite())
    }
}

/// What the protocol needs from a rendering surface.
pub trait RenderSurface {
    /// The active camera's pose, if a camera is active.
    fn camera_pose(&self) -> Option<CameraPose>;

    /// Begin one frame cycle.
    fn begin_frame(&mut self);

    /// Render the frame.
    fn render_frame(&mut self);

    /// End the frame cycle.
    fn end_frame(&mut self);

    /// Current render target size in pixels.
    fn render_size(&self) -> (u32, u32);

    /// Hardware scaling scalar in effect.
    fn hardware_scaling(&self) -> f64;

    /// Adjust the hardware scaling scalar.
    fn set_hardware_scaling(&mut self, scaling: f64);
}
