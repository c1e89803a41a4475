//! Renderer configuration.

use nbody_gpu::{GpuError, Result};

/// Configuration for [`ParticleRenderer`](crate::ParticleRenderer).
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
    /// Point sprite size in pixels.
    pub point_size: f32,
    /// Frames recorded ahead of the GPU.
    pub frames_in_flight: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            point_size: 1.0,
            frames_in_flight: 2,
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_point_size(mut self, point_size: f32) -> Self {
        self.point_size = point_size;
        self
    }

    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GpuError::InvalidState(format!(
                "Render target must not be empty, got {}x{}",
                self.width, self.height
            )));
        }
        if self.frames_in_flight == 0 {
            return Err(GpuError::InvalidState(
                "Need at least one frame in flight".to_string(),
            ));
        }
        Ok(())
    }

    /// Contents of the vertex shader's view uniform: x = aspect correction
    /// (height / width), y = point size.
    pub fn view_uniform(&self) -> [f32; 4] {
        [
            self.height as f32 / self.width as f32,
            self.point_size,
            0.0,
            0.0,
        ]
    }
}
