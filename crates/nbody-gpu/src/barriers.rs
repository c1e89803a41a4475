//! Buffer barriers, including queue family ownership transfers.
//!
//! Moving a buffer between queue families takes two barriers with matching
//! family indices: a release recorded on the source queue and an acquire
//! recorded on the destination queue. When both queues share a family the
//! same calls degrade to plain execution and memory barriers.

use ash::vk;

/// One side of a buffer hand-off between queue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipTransfer {
    pub src_family: u32,
    pub dst_family: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl OwnershipTransfer {
    /// Compute writes handed to the vertex shader on the render queue.
    pub fn compute_to_render(compute_family: u32, render_family: u32) -> Self {
        Self {
            src_family: compute_family,
            dst_family: render_family,
            src_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            dst_stage: vk::PipelineStageFlags::VERTEX_SHADER,
            src_access: vk::AccessFlags::SHADER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    /// Vertex shader reads handed back to the compute queue for overwriting.
    pub fn render_to_compute(render_family: u32, compute_family: u32) -> Self {
        Self {
            src_family: render_family,
            dst_family: compute_family,
            src_stage: vk::PipelineStageFlags::VERTEX_SHADER,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            src_access: vk::AccessFlags::SHADER_READ,
            dst_access: vk::AccessFlags::SHADER_WRITE,
        }
    }

    /// Whether the two queues belong to different families.
    pub fn crosses_families(&self) -> bool {
        self.src_family != self.dst_family
    }

    fn families(&self) -> (u32, u32) {
        if self.crosses_families() {
            (self.src_family, self.dst_family)
        } else {
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        }
    }

    /// Barrier for the source queue. Its destination access is ignored by
    /// Vulkan for a cross-family release.
    pub fn release_barrier(&self, buffer: vk::Buffer) -> vk::BufferMemoryBarrier<'static> {
        let (src, dst) = self.families();
        let dst_access = if self.crosses_families() {
            vk::AccessFlags::empty()
        } else {
            self.dst_access
        };
        vk::BufferMemoryBarrier::default()
            .src_access_mask(self.src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(src)
            .dst_queue_family_index(dst)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
    }

    /// Barrier for the destination queue. Its source access is ignored by
    /// Vulkan for a cross-family acquire.
    pub fn acquire_barrier(&self, buffer: vk::Buffer) -> vk::BufferMemoryBarrier<'static> {
        let (src, dst) = self.families();
        let src_access = if self.crosses_families() {
            vk::AccessFlags::empty()
        } else {
            self.src_access
        };
        vk::BufferMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(self.dst_access)
            .src_queue_family_index(src)
            .dst_queue_family_index(dst)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
    }

    /// Record the release on the source queue's command buffer.
    ///
    /// # Safety
    /// The device and command buffer must be valid and recording.
    pub unsafe fn record_release(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
    ) {
        let dst_stage = if self.crosses_families() {
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        } else {
            self.dst_stage
        };
        device.cmd_pipeline_barrier(
            cmd,
            self.src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[self.release_barrier(buffer)],
            &[],
        );
    }

    /// Record the acquire on the destination queue's command buffer.
    ///
    /// # Safety
    /// The device and command buffer must be valid and recording.
    pub unsafe fn record_acquire(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
    ) {
        let src_stage = if self.crosses_families() {
            vk::PipelineStageFlags::TOP_OF_PIPE
        } else {
            self.src_stage
        };
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            self.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[self.acquire_barrier(buffer)],
            &[],
        );
    }
}

/// Record a barrier between two compute passes over the same buffer.
///
/// # Safety
/// The device and command buffer must be valid and recording.
pub unsafe fn compute_to_compute(device: &ash::Device, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
    let barrier = vk::BufferMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE);

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::DependencyFlags::empty(),
        &[],
        &[barrier],
        &[],
    );
}
