//! Command buffer management.

use ash::vk;

use crate::error::Result;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(&self, device: &ash::Device, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers)
    }

    /// Destroy the command pool, freeing its command buffers.
    ///
    /// # Safety
    /// The device must be valid and no command buffer from the pool may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Record a reusable command buffer in one go.
///
/// # Safety
/// The device and command buffer must be valid and the buffer not pending.
pub unsafe fn record<F>(device: &ash::Device, cmd: vk::CommandBuffer, f: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::empty())?;
    f(cmd);
    end_command_buffer(device, cmd)
}

/// Submit one command buffer to a queue, signaling `fence` on completion.
///
/// # Safety
/// All handles must be valid, and the queue must not be used concurrently
/// from another thread.
pub unsafe fn submit(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
) -> Result<()> {
    let command_buffers = [cmd];
    let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Execute a one-time command buffer and wait for the queue to go idle.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool.allocate(device, 1)?[0];

    let result = run_once(device, queue, cmd, f);
    device.free_command_buffers(pool.handle(), &[cmd]);
    result
}

unsafe fn run_once<F>(device: &ash::Device, queue: vk::Queue, cmd: vk::CommandBuffer, f: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    f(cmd);
    end_command_buffer(device, cmd)?;
    submit(device, queue, cmd, vk::Fence::null())?;
    device.queue_wait_idle(queue)?;
    Ok(())
}
