//! GPU-visible particle and timing layouts.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

use crate::constants::TOTAL_PARTICLES;

/// Authoritative simulation state of one particle.
///
/// `xy` is the position, `zw` the velocity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ParticleState {
    pub position_velocity: [f32; 4],
}

impl ParticleState {
    /// Create a particle from position and velocity.
    #[inline]
    pub fn new(position: Vec2, velocity: Vec2) -> Self {
        Self {
            position_velocity: [position.x, position.y, velocity.x, velocity.y],
        }
    }

    #[inline]
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.position_velocity[0], self.position_velocity[1])
    }

    #[inline]
    pub fn velocity(&self) -> Vec2 {
        Vec2::new(self.position_velocity[2], self.position_velocity[3])
    }
}

/// Per-particle data written by the position pass and read by the vertex shader.
///
/// `xy` is the position, `z` the speed used for coloring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DrawParticle {
    pub position_speed: [f32; 4],
}

impl From<Vec4> for DrawParticle {
    fn from(v: Vec4) -> Self {
        Self {
            position_speed: v.to_array(),
        }
    }
}

/// Timing data for one simulation step.
///
/// Uploaded into a slot's timing region before its compute submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct StepTiming {
    /// Step counter, wraps at [`TOTAL_PARTICLES`]
    pub frame_number: i32,
    /// Wall-clock seconds since the previous step was dispatched
    pub delta_seconds: f32,
}

impl StepTiming {
    /// Size in bytes of the per-slot timing region (one 4x4 float matrix).
    pub const REGION_SIZE: u64 = 64;

    /// Timing for the next step after this one.
    ///
    /// The frame counter wraps back to zero once it reaches the particle count.
    #[must_use]
    pub fn advance(self, delta_seconds: f32) -> Self {
        let next = self.frame_number + 1;
        Self {
            frame_number: if next >= TOTAL_PARTICLES as i32 { 0 } else { next },
            delta_seconds,
        }
    }

    /// The timing region contents as uploaded to the GPU.
    ///
    /// Both values are stored as floats, as the shaders read the region as a `mat4`.
    pub fn region(&self) -> [f32; 16] {
        let mut region = [0.0; 16];
        region[0] = self.frame_number as f32;
        region[1] = self.delta_seconds;
        region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_shader_structs() {
        assert_eq!(std::mem::size_of::<ParticleState>(), 16);
        assert_eq!(std::mem::size_of::<DrawParticle>(), 16);
        assert_eq!(
            std::mem::size_of::<[f32; 16]>() as u64,
            StepTiming::REGION_SIZE
        );
    }

    #[test]
    fn particle_accessors() {
        let p = ParticleState::new(Vec2::new(1.0, 2.0), Vec2::new(3.0, 4.0));
        assert_eq!(p.position(), Vec2::new(1.0, 2.0));
        assert_eq!(p.velocity(), Vec2::new(3.0, 4.0));
    }

    #[test]
    fn timing_wraps_at_particle_count() {
        let timing = StepTiming {
            frame_number: TOTAL_PARTICLES as i32 - 2,
            delta_seconds: 0.0,
        };

        let timing = timing.advance(0.5);
        assert_eq!(timing.frame_number, TOTAL_PARTICLES as i32 - 1);
        assert_eq!(timing.delta_seconds, 0.5);

        let timing = timing.advance(0.25);
        assert_eq!(timing.frame_number, 0);
    }

    #[test]
    fn timing_region_layout() {
        let region = StepTiming {
            frame_number: 7,
            delta_seconds: 0.016,
        }
        .region();

        assert_eq!(region[0], 7.0);
        assert_eq!(region[1], 0.016);
        assert!(region[2..].iter().all(|v| *v == 0.0));
    }
}
