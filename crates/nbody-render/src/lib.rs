//! Offscreen particle renderer for the asynchronous N-body simulation.
//!
//! The renderer draws whichever slot the render loop picked for the frame,
//! acquiring it from the compute queue family when it was swapped in.

pub mod config;
pub mod renderer;

pub use config::RendererConfig;
pub use renderer::ParticleRenderer;
