//! Core types for the asynchronous N-body particle sample.
//!
//! This crate provides the plain data shared between the host and the
//! simulation/render shaders:
//! - GPU buffer layouts for simulation and draw data
//! - Per-step timing uploaded to the compute pass
//! - The deterministic initial particle distribution

pub mod distribution;
pub mod random;
pub mod types;

pub use distribution::initial_particles;
pub use random::XorShift64;
pub use types::{DrawParticle, ParticleState, StepTiming};

/// Simulation-wide constants
pub mod constants {
    /// Number of simulated particles
    pub const TOTAL_PARTICLES: u32 = 1024 * 64;
    /// Local workgroup size of both simulation compute shaders
    pub const COMPUTE_LOCAL_SIZE: u32 = 128;
    /// Workgroups dispatched per simulation pass
    pub const DISPATCH_GROUPS: u32 = TOTAL_PARTICLES / COMPUTE_LOCAL_SIZE;
    /// Total mass of the particle cloud, split evenly across particles
    pub const TOTAL_MASS: f32 = 1024.0 * 1024.0 * 64.0;
    /// Number of buffer slots used by the mailbox in the reference setup
    pub const DEFAULT_SLOT_COUNT: usize = 3;
}
