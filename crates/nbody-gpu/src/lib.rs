//! Vulkan layer for the async compute N-body sample.
//!
//! This crate provides:
//! - Instance and device creation with a render queue and an async compute queue
//! - GPU capability detection
//! - Memory allocation via gpu-allocator
//! - Command buffer, fence and descriptor helpers
//! - Queue family ownership transfer barriers

pub mod barriers;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod queues;
pub mod sync;

pub use barriers::OwnershipTransfer;
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::CommandPool;
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{write_storage_buffer, write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{ComputePipeline, GraphicsPipeline, GraphicsPipelineConfig};
pub use queues::{select_queues, QueueSelection, QueueSlot};
pub use sync::create_fence;

pub use gpu_allocator::MemoryLocation;
