//! Vulkan backend for the asynchronous N-body simulation.
//!
//! [`ComputeSlotPool`] owns the buffer slots and the prerecorded command
//! buffers that move them between the async compute queue and the render
//! queue. It implements [`nbody_async::SlotBackend`], so an
//! [`nbody_async::AsyncRunner`] can drive it from the simulation thread.

pub mod config;
pub mod pool;

pub use config::{PoolConfig, MIN_SLOT_COUNT};
pub use pool::ComputeSlotPool;
