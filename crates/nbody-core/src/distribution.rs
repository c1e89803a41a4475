//! Initial particle distribution.

use glam::Vec2;

use crate::random::XorShift64;
use crate::types::ParticleState;

/// Seed used for the reference distribution.
pub const DEFAULT_SEED: u64 = 0;

/// Initial orbital speed factor applied to the tangent of each position.
const ORBIT_SPEED: f32 = 0.05;

/// Generate `count` particles on a disk, each moving tangentially.
///
/// Radius falls off as `1 - d^2` for a uniformly drawn `d`, which packs
/// particles toward the rim. Velocity is the position rotated by 90 degrees
/// and scaled, so the cloud starts out rotating counter-clockwise.
pub fn initial_particles(count: usize, seed: u64) -> Vec<ParticleState> {
    let mut rng = XorShift64::new(seed);

    (0..count)
        .map(|_| {
            let distance = rng.next_f32();
            let angle = rng.next_f32() * std::f32::consts::TAU;

            let radius = 1.0 - distance * distance;
            let position = Vec2::new(angle.sin(), angle.cos()) * radius;
            let velocity = position.perp() * ORBIT_SPEED;

            ParticleState::new(position, velocity)
        })
        .collect()
}
