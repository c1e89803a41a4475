//! Vulkan buffer slots cycled between the async compute queue and the render queue.

use std::mem::size_of;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use nbody_async::{SlotBackend, SlotIndex};
use nbody_core::constants::{COMPUTE_LOCAL_SIZE, DISPATCH_GROUPS, TOTAL_PARTICLES};
use nbody_core::{initial_particles, DrawParticle, ParticleState, StepTiming};
use nbody_gpu::barriers::compute_to_compute;
use nbody_gpu::command::{execute_single_time_commands, record, submit};
use nbody_gpu::pipeline::create_pipeline_layout;
use nbody_gpu::sync::{fence_signaled, reset_fence, wait_for_fence};
use nbody_gpu::{
    create_fence, write_storage_buffer, CommandPool, ComputePipeline, DescriptorPool,
    DescriptorSetLayoutBuilder, GpuBuffer, GpuContext, GpuError, MemoryLocation,
    OwnershipTransfer, Result,
};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;

const TIMING_BINDING: u32 = 0;
const SIMULATION_BINDING: u32 = 1;
const DRAW_BINDING: u32 = 2;

/// Byte offset of a slot's timing region inside the shared timing buffer.
pub fn timing_offset(slot: SlotIndex, stride: u64) -> u64 {
    u64::from(slot.0) * stride
}

fn simulation_bytes() -> u64 {
    u64::from(TOTAL_PARTICLES) * size_of::<ParticleState>() as u64
}

fn draw_bytes() -> u64 {
    u64::from(TOTAL_PARTICLES) * size_of::<DrawParticle>() as u64
}

struct Slot {
    draw: GpuBuffer,
    return_fence: vk::Fence,
    compute_cmd: vk::CommandBuffer,
    wake_cmd: vk::CommandBuffer,
    descriptor_set: vk::DescriptorSet,
}

/// Pool of draw buffers written by the async compute queue and read by the
/// render queue.
///
/// Every slot owns a draw buffer, a return fence and two prerecorded command
/// buffers. The compute command buffer acquires the slot from the render
/// family, runs the velocity and position passes and releases the slot back
/// to the render family. The wake command buffer, submitted on the render
/// queue, releases the slot to the compute family again.
///
/// The simulation buffer is shared by all slots. Only one compute submission
/// is in flight at a time, so consecutive steps are ordered on the compute
/// queue.
pub struct ComputeSlotPool {
    ctx: Arc<GpuContext>,
    slots: Vec<Slot>,
    simulation: Option<GpuBuffer>,
    timing: Option<GpuBuffer>,
    timing_stride: u64,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    velocity_pipeline: Option<ComputePipeline>,
    position_pipeline: Option<ComputePipeline>,
    descriptor_pool: Option<DescriptorPool>,
    compute_pool: Option<CommandPool>,
    wake_pool: Option<CommandPool>,
    compute_fence: vk::Fence,
}

impl ComputeSlotPool {
    /// Create every slot, upload the initial particles and record the
    /// per-slot command buffers.
    ///
    /// Objects created before a failure are destroyed on return.
    pub fn new(ctx: Arc<GpuContext>, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let caps = ctx.capabilities();
        if !caps.supports_dispatch(COMPUTE_LOCAL_SIZE, simulation_bytes()) {
            return Err(GpuError::InvalidState(format!(
                "Device cannot run {COMPUTE_LOCAL_SIZE}-wide workgroups over {} bytes",
                simulation_bytes()
            )));
        }
        let timing_stride = caps.storage_region_stride(StepTiming::REGION_SIZE);

        let mut pool = Self {
            ctx,
            slots: Vec::with_capacity(config.slot_count),
            simulation: None,
            timing: None,
            timing_stride,
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            velocity_pipeline: None,
            position_pipeline: None,
            descriptor_pool: None,
            compute_pool: None,
            wake_pool: None,
            compute_fence: vk::Fence::null(),
        };
        pool.init(&config)?;

        info!(
            "Created {} buffer slots ({} particles, compute family {}, render family {})",
            pool.slots.len(),
            TOTAL_PARTICLES,
            pool.compute_family(),
            pool.render_family()
        );
        Ok(pool)
    }

    fn init(&mut self, config: &PoolConfig) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let device = ctx.device();

        unsafe {
            self.set_layout = DescriptorSetLayoutBuilder::new()
                .storage_buffer(TIMING_BINDING, vk::ShaderStageFlags::COMPUTE)
                .storage_buffer(SIMULATION_BINDING, vk::ShaderStageFlags::COMPUTE)
                .storage_buffer(DRAW_BINDING, vk::ShaderStageFlags::COMPUTE)
                .build(device)?;
            self.pipeline_layout = create_pipeline_layout(device, &[self.set_layout])?;
            self.velocity_pipeline = Some(ComputePipeline::new(
                device,
                nbody_shaders::velocity_update_shader(),
                self.pipeline_layout,
            )?);
            self.position_pipeline = Some(ComputePipeline::new(
                device,
                nbody_shaders::position_update_shader(),
                self.pipeline_layout,
            )?);

            self.compute_pool = Some(CommandPool::new(
                device,
                ctx.compute_queue_family(),
                vk::CommandPoolCreateFlags::empty(),
            )?);
            self.wake_pool = Some(CommandPool::new(
                device,
                ctx.render_queue_family(),
                vk::CommandPoolCreateFlags::empty(),
            )?);
        }

        self.create_simulation_buffer(config.seed)?;

        let slot_count = config.slot_count as u32;
        let timing = ctx.allocator().lock().create_buffer(
            self.timing_stride * u64::from(slot_count),
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::CpuToGpu,
            "step timing",
        )?;
        timing.write_bytes(0, &vec![0u8; timing.size as usize])?;
        self.timing = Some(timing);

        for i in 0..config.slot_count {
            let draw = ctx.allocator().lock().create_buffer(
                draw_bytes(),
                vk::BufferUsageFlags::STORAGE_BUFFER,
                MemoryLocation::GpuOnly,
                &format!("slot {i} draw"),
            )?;
            // Pushed before the fence so a failed fence still frees the buffer.
            self.slots.push(Slot {
                draw,
                return_fence: vk::Fence::null(),
                compute_cmd: vk::CommandBuffer::null(),
                wake_cmd: vk::CommandBuffer::null(),
                descriptor_set: vk::DescriptorSet::null(),
            });
            let fence = unsafe { create_fence(device, false) }?;
            self.slots[i].return_fence = fence;
        }

        self.compute_fence = unsafe { create_fence(device, false) }?;

        self.allocate_descriptor_sets(slot_count)?;
        self.record_commands(slot_count)
    }

    /// Fill the simulation buffer with the initial distribution through a
    /// staging copy on the compute queue.
    fn create_simulation_buffer(&mut self, seed: u64) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let particles = initial_particles(TOTAL_PARTICLES as usize, seed);
        let size = simulation_bytes();

        let simulation = ctx.allocator().lock().create_buffer(
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            "simulation",
        )?;
        let dst = simulation.buffer;
        self.simulation = Some(simulation);

        let mut staging = ctx.allocator().lock().create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "simulation staging",
        )?;

        let upload = staging.write_pod(0, &particles).and_then(|()| {
            let Some(pool) = self.compute_pool.as_ref() else {
                return Err(GpuError::InvalidState("Compute command pool missing".to_string()));
            };
            let device = ctx.device();
            unsafe {
                execute_single_time_commands(device, pool, ctx.compute_queue(), |cmd| {
                    let region = vk::BufferCopy::default().size(size);
                    device.cmd_copy_buffer(cmd, staging.buffer, dst, &[region]);

                    let barrier = vk::BufferMemoryBarrier::default()
                        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .dst_access_mask(
                            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                        )
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(dst)
                        .offset(0)
                        .size(vk::WHOLE_SIZE);
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::COMPUTE_SHADER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    );
                })
            }
        });

        let freed = ctx.allocator().lock().free_buffer(&mut staging);
        upload?;
        freed?;

        debug!("Uploaded {} particles (seed {seed})", particles.len());
        Ok(())
    }

    fn allocate_descriptor_sets(&mut self, slot_count: u32) -> Result<()> {
        let device = self.ctx.device();
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(3 * slot_count)];
        let descriptor_pool = unsafe { DescriptorPool::new(device, slot_count, &pool_sizes) }?;
        let layouts = vec![self.set_layout; slot_count as usize];
        let sets = unsafe { descriptor_pool.allocate(device, &layouts) };
        self.descriptor_pool = Some(descriptor_pool);
        let sets = sets?;

        let (Some(timing), Some(simulation)) = (self.timing.as_ref(), self.simulation.as_ref())
        else {
            return Err(GpuError::InvalidState("Shared buffers missing".to_string()));
        };

        let stride = self.timing_stride;
        for (i, (slot, set)) in self.slots.iter_mut().zip(sets).enumerate() {
            slot.descriptor_set = set;
            unsafe {
                write_storage_buffer(
                    device,
                    set,
                    TIMING_BINDING,
                    timing.buffer,
                    timing_offset(SlotIndex::from(i), stride),
                    StepTiming::REGION_SIZE,
                );
                write_storage_buffer(
                    device,
                    set,
                    SIMULATION_BINDING,
                    simulation.buffer,
                    0,
                    vk::WHOLE_SIZE,
                );
                write_storage_buffer(device, set, DRAW_BINDING, slot.draw.buffer, 0, vk::WHOLE_SIZE);
            }
        }
        Ok(())
    }

    fn record_commands(&mut self, slot_count: u32) -> Result<()> {
        let device = self.ctx.device();
        let (Some(compute_pool), Some(wake_pool)) =
            (self.compute_pool.as_ref(), self.wake_pool.as_ref())
        else {
            return Err(GpuError::InvalidState("Command pools missing".to_string()));
        };
        let (Some(velocity), Some(position), Some(simulation)) = (
            self.velocity_pipeline.as_ref(),
            self.position_pipeline.as_ref(),
            self.simulation.as_ref(),
        ) else {
            return Err(GpuError::InvalidState("Compute pipelines missing".to_string()));
        };

        let compute_cmds = unsafe { compute_pool.allocate(device, slot_count) }?;
        let wake_cmds = unsafe { wake_pool.allocate(device, slot_count) }?;
        let layout = self.pipeline_layout;

        let compute_family = self.ctx.compute_queue_family();
        let render_family = self.ctx.render_queue_family();
        let to_compute = OwnershipTransfer::render_to_compute(render_family, compute_family);
        let to_render = OwnershipTransfer::compute_to_render(compute_family, render_family);

        for ((slot, compute_cmd), wake_cmd) in self.slots.iter_mut().zip(compute_cmds).zip(wake_cmds) {
            let draw = slot.draw.buffer;
            let set = slot.descriptor_set;

            // The first submission acquires without a matching release; the
            // slot contents are overwritten, so nothing is lost.
            unsafe {
                record(device, compute_cmd, |cmd| {
                    to_compute.record_acquire(device, cmd, draw);
                    compute_to_compute(device, cmd, simulation.buffer);

                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::COMPUTE,
                        layout,
                        0,
                        &[set],
                        &[],
                    );

                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, velocity.pipeline);
                    device.cmd_dispatch(cmd, DISPATCH_GROUPS, 1, 1);

                    compute_to_compute(device, cmd, simulation.buffer);

                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, position.pipeline);
                    device.cmd_dispatch(cmd, DISPATCH_GROUPS, 1, 1);

                    to_render.record_release(device, cmd, draw);
                })?;
            }
            slot.compute_cmd = compute_cmd;

            unsafe {
                record(device, wake_cmd, |cmd| {
                    to_compute.record_release(device, cmd, draw);
                })?;
            }
            slot.wake_cmd = wake_cmd;
        }
        Ok(())
    }

    fn slot(&self, slot: SlotIndex) -> Result<&Slot> {
        self.slots
            .get(slot.index())
            .ok_or_else(|| GpuError::InvalidState(format!("Slot {slot} out of range")))
    }

    /// Draw buffer of `slot`.
    ///
    /// # Panics
    /// Panics if `slot` is out of range.
    pub fn buffer_for_index(&self, slot: SlotIndex) -> vk::Buffer {
        self.slots[slot.index()].draw.buffer
    }

    pub fn compute_family(&self) -> u32 {
        self.ctx.compute_queue_family()
    }

    pub fn render_family(&self) -> u32 {
        self.ctx.render_queue_family()
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }
}

impl SlotBackend for ComputeSlotPool {
    type Error = GpuError;

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn submit_compute(&self, slot: SlotIndex, timing: &StepTiming) -> Result<()> {
        let cmd = self.slot(slot)?.compute_cmd;
        let timing_buffer = self
            .timing
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Timing buffer missing".to_string()))?;
        timing_buffer.write_pod(timing_offset(slot, self.timing_stride), &timing.region())?;

        unsafe { submit(self.ctx.device(), self.ctx.compute_queue(), cmd, self.compute_fence) }
    }

    fn wait_compute(&self, timeout: Duration) -> Result<bool> {
        let device = self.ctx.device();
        unsafe {
            if !wait_for_fence(device, self.compute_fence, timeout)? {
                return Ok(false);
            }
            reset_fence(device, self.compute_fence)?;
        }
        Ok(true)
    }

    fn submit_return(&self, slot: SlotIndex) -> Result<()> {
        let slot = self.slot(slot)?;
        unsafe {
            submit(
                self.ctx.device(),
                self.ctx.render_queue(),
                slot.wake_cmd,
                slot.return_fence,
            )
        }
    }

    fn poll_return(&self, slot: SlotIndex) -> Result<bool> {
        let fence = self.slot(slot)?.return_fence;
        unsafe { fence_signaled(self.ctx.device(), fence) }
    }

    fn wait_return(&self, slot: SlotIndex, timeout: Duration) -> Result<bool> {
        let fence = self.slot(slot)?.return_fence;
        unsafe { wait_for_fence(self.ctx.device(), fence, timeout) }
    }

    fn reset_return(&self, slot: SlotIndex) -> Result<()> {
        let fence = self.slot(slot)?.return_fence;
        unsafe { reset_fence(self.ctx.device(), fence) }
    }
}

impl Drop for ComputeSlotPool {
    fn drop(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let device = ctx.device();

        unsafe {
            if let Err(e) = device.device_wait_idle() {
                warn!("Device wait failed while dropping slot pool: {e}");
            }

            // Pools free their command buffers and descriptor sets.
            if let Some(pool) = self.compute_pool.take() {
                pool.destroy(device);
            }
            if let Some(pool) = self.wake_pool.take() {
                pool.destroy(device);
            }
            if let Some(pool) = self.descriptor_pool.take() {
                pool.destroy(device);
            }
            if let Some(pipeline) = self.velocity_pipeline.take() {
                pipeline.destroy(device);
            }
            if let Some(pipeline) = self.position_pipeline.take() {
                pipeline.destroy(device);
            }
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_fence(self.compute_fence, None);
            for slot in &self.slots {
                device.destroy_fence(slot.return_fence, None);
            }
        }

        let mut allocator = ctx.allocator().lock();
        let buffers = self
            .slots
            .iter_mut()
            .map(|slot| &mut slot.draw)
            .chain(self.simulation.as_mut())
            .chain(self.timing.as_mut());
        for buffer in buffers {
            if let Err(e) = allocator.free_buffer(buffer) {
                warn!("Failed to free slot pool buffer: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_regions_do_not_overlap() {
        let stride = 256;
        let offsets: Vec<u64> = (0..3).map(|i| timing_offset(SlotIndex(i), stride)).collect();
        assert_eq!(offsets, vec![0, 256, 512]);
        for pair in offsets.windows(2) {
            assert!(pair[1] - pair[0] >= StepTiming::REGION_SIZE);
        }
    }

    #[test]
    fn buffer_sizes_cover_all_particles() {
        assert_eq!(simulation_bytes(), 64 * 1024 * 16);
        assert_eq!(draw_bytes(), 64 * 1024 * 16);
        assert_eq!(DISPATCH_GROUPS * COMPUTE_LOCAL_SIZE, TOTAL_PARTICLES);
    }
}
