//! Particle draw pass.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use nbody_async::FrameSelection;
use nbody_core::constants::TOTAL_PARTICLES;
use nbody_gpu::command::{begin_command_buffer, end_command_buffer, submit};
use nbody_gpu::sync::{reset_fence, wait_for_fence};
use nbody_gpu::{
    create_fence, write_storage_buffer, write_uniform_buffer, CommandPool, DescriptorPool,
    DescriptorSetLayoutBuilder, GpuBuffer, GpuContext, GpuError, GpuImage, GraphicsPipeline,
    GraphicsPipelineConfig, MemoryLocation, OwnershipTransfer, Result,
};
use tracing::{debug, warn};

use crate::config::RendererConfig;

const COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const PARTICLE_BINDING: u32 = 0;
const VIEW_BINDING: u32 = 1;

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

struct Frame {
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    descriptor_set: vk::DescriptorSet,
}

/// Draws the particles of one slot per frame into an offscreen color target.
///
/// All submissions go to the render queue. A slot that was swapped in since
/// the previous frame gets the acquire half of the compute-to-render
/// ownership transfer before the vertex shader reads it.
pub struct ParticleRenderer {
    ctx: Arc<GpuContext>,
    config: RendererConfig,
    pipeline: Option<GraphicsPipeline>,
    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: Option<DescriptorPool>,
    command_pool: Option<CommandPool>,
    view: Option<GpuBuffer>,
    target: Option<GpuImage>,
    target_view: vk::ImageView,
    frames: Vec<Frame>,
    frame_index: usize,
    frames_submitted: u64,
}

impl ParticleRenderer {
    pub fn new(ctx: Arc<GpuContext>, config: RendererConfig) -> Result<Self> {
        config.validate()?;

        let mut renderer = Self {
            ctx,
            config,
            pipeline: None,
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: None,
            command_pool: None,
            view: None,
            target: None,
            target_view: vk::ImageView::null(),
            frames: Vec::new(),
            frame_index: 0,
            frames_submitted: 0,
        };
        renderer.init()?;

        debug!(
            "Particle renderer ready: {}x{}, {} frames in flight",
            renderer.config.width, renderer.config.height, renderer.config.frames_in_flight
        );
        Ok(renderer)
    }

    fn init(&mut self) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let device = ctx.device();
        let frame_count = self.config.frames_in_flight as u32;

        unsafe {
            self.set_layout = DescriptorSetLayoutBuilder::new()
                .storage_buffer(PARTICLE_BINDING, vk::ShaderStageFlags::VERTEX)
                .uniform_buffer(VIEW_BINDING, vk::ShaderStageFlags::VERTEX)
                .build(device)?;

            let pipeline_config = GraphicsPipelineConfig {
                vertex_shader: nbody_shaders::particle_vertex_shader().to_vec(),
                fragment_shader: nbody_shaders::particle_fragment_shader().to_vec(),
                topology: vk::PrimitiveTopology::POINT_LIST,
                color_format: COLOR_FORMAT,
                additive_blend: true,
            };
            self.pipeline = Some(GraphicsPipeline::new(
                device,
                &pipeline_config,
                &[self.set_layout],
            )?);

            self.command_pool = Some(CommandPool::new(
                device,
                ctx.render_queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?);
        }

        let view = ctx.allocator().lock().create_buffer(
            std::mem::size_of::<[f32; 4]>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "particle view",
        )?;
        view.write_pod(0, &self.config.view_uniform())?;
        let view_buffer = view.buffer;
        self.view = Some(view);

        self.create_target()?;

        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(frame_count),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(frame_count),
        ];
        let descriptor_pool = unsafe { DescriptorPool::new(device, frame_count, &pool_sizes) }?;
        let layouts = vec![self.set_layout; frame_count as usize];
        let sets = unsafe { descriptor_pool.allocate(device, &layouts) };
        self.descriptor_pool = Some(descriptor_pool);
        let sets = sets?;

        let Some(command_pool) = self.command_pool.as_ref() else {
            return Err(GpuError::InvalidState("Command pool missing".to_string()));
        };
        let cmds = unsafe { command_pool.allocate(device, frame_count) }?;

        for (set, cmd) in sets.into_iter().zip(cmds) {
            unsafe {
                write_uniform_buffer(
                    device,
                    set,
                    VIEW_BINDING,
                    view_buffer,
                    0,
                    vk::WHOLE_SIZE,
                );
            }
            self.frames.push(Frame {
                cmd,
                fence: vk::Fence::null(),
                descriptor_set: set,
            });
        }
        for frame in &mut self.frames {
            frame.fence = unsafe { create_fence(device, true) }?;
        }

        Ok(())
    }

    fn create_target(&mut self) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(COLOR_FORMAT)
            .extent(vk::Extent3D {
                width: self.config.width,
                height: self.config.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let target = ctx
            .allocator()
            .lock()
            .create_image(&image_info, MemoryLocation::GpuOnly, "particle target")?;
        let image = target.image;
        self.target = Some(target);

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(COLOR_FORMAT)
            .subresource_range(COLOR_RANGE);
        self.target_view = unsafe { ctx.device().create_image_view(&view_info, None) }?;
        Ok(())
    }

    /// Record and submit the draw of `buffer`, the buffer of `selection.slot`.
    ///
    /// Waits for the frame that last used the same per-frame resources.
    pub fn draw_frame(&mut self, selection: &FrameSelection, buffer: vk::Buffer) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let device = ctx.device();
        let frame = &self.frames[self.frame_index];

        let (Some(pipeline), Some(target)) = (self.pipeline.as_ref(), self.target.as_ref()) else {
            return Err(GpuError::InvalidState("Renderer not initialized".to_string()));
        };

        unsafe {
            wait_for_fence(device, frame.fence, Duration::MAX)?;
            reset_fence(device, frame.fence)?;

            write_storage_buffer(
                device,
                frame.descriptor_set,
                PARTICLE_BINDING,
                buffer,
                0,
                vk::WHOLE_SIZE,
            );

            device.reset_command_buffer(frame.cmd, vk::CommandBufferResetFlags::empty())?;
            begin_command_buffer(device, frame.cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

            if selection.swapped {
                OwnershipTransfer::compute_to_render(
                    ctx.compute_queue_family(),
                    ctx.render_queue_family(),
                )
                .record_acquire(device, frame.cmd, buffer);
            }

            self.record_draw(device, frame, pipeline, target.image);

            end_command_buffer(device, frame.cmd)?;
            submit(device, ctx.render_queue(), frame.cmd, frame.fence)?;
        }

        self.frame_index = (self.frame_index + 1) % self.frames.len();
        self.frames_submitted += 1;
        Ok(())
    }

    unsafe fn record_draw(
        &self,
        device: &ash::Device,
        frame: &Frame,
        pipeline: &GraphicsPipeline,
        image: vk::Image,
    ) {
        let cmd = frame.cmd;

        // The previous frame's writes to the shared target must land first.
        let to_attachment = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .image(image)
            .subresource_range(COLOR_RANGE);
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(std::slice::from_ref(&to_attachment));
        device.cmd_pipeline_barrier2(cmd, &dependency_info);

        let extent = vk::Extent2D {
            width: self.config.width,
            height: self.config.height,
        };
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.target_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));

        device.cmd_begin_rendering(cmd, &rendering_info);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(
            cmd,
            0,
            &[vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            }],
        );

        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.layout,
            0,
            &[frame.descriptor_set],
            &[],
        );
        device.cmd_draw(cmd, TOTAL_PARTICLES, 1, 0, 0);

        device.cmd_end_rendering(cmd);
    }

    /// Draw submissions made so far.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl Drop for ParticleRenderer {
    fn drop(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let device = ctx.device();

        unsafe {
            if let Err(e) = device.device_wait_idle() {
                warn!("Device wait failed while dropping renderer: {e}");
            }

            for frame in &self.frames {
                device.destroy_fence(frame.fence, None);
            }
            if let Some(pool) = self.command_pool.take() {
                pool.destroy(device);
            }
            if let Some(pool) = self.descriptor_pool.take() {
                pool.destroy(device);
            }
            if let Some(pipeline) = self.pipeline.take() {
                pipeline.destroy(device);
            }
            device.destroy_descriptor_set_layout(self.set_layout, None);
            device.destroy_image_view(self.target_view, None);
        }

        let mut allocator = ctx.allocator().lock();
        if let Some(mut view) = self.view.take() {
            if let Err(e) = allocator.free_buffer(&mut view) {
                warn!("Failed to free view buffer: {e}");
            }
        }
        if let Some(mut target) = self.target.take() {
            if let Err(e) = allocator.free_image(&mut target) {
                warn!("Failed to free render target: {e}");
            }
        }
    }
}
