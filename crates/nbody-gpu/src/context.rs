//! GPU context management.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::info;

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use crate::queues::{select_queues, QueueSelection};

/// Device with one render queue and one async compute queue.
///
/// Each queue is only ever submitted to from one thread at a time: the
/// render queue by the render loop, the compute queue by the simulation
/// worker (and by setup before the worker starts).
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Mutex<GpuAllocator>,

    queues: QueueSelection,
    render_queue: vk::Queue,
    compute_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Queue families and indices in use.
    pub fn queues(&self) -> &QueueSelection {
        &self.queues
    }

    pub fn render_queue(&self) -> vk::Queue {
        self.render_queue
    }

    pub fn render_queue_family(&self) -> u32 {
        self.queues.render.family
    }

    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    pub fn compute_queue_family(&self) -> u32 {
        self.queues.compute.family
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Allocator memory must be released before the device goes away.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "nbody-async".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context.
    ///
    /// Fails with [`GpuError::NoAsyncComputeQueue`] if no device offers a
    /// compute queue separate from its render queue.
    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        // Everything after this point must destroy the instance on failure.
        match unsafe { Self::open_device(&instance) } {
            Ok((physical_device, capabilities, queues, device, allocator)) => {
                let render_queue =
                    unsafe { device.get_device_queue(queues.render.family, queues.render.index) };
                let compute_queue =
                    unsafe { device.get_device_queue(queues.compute.family, queues.compute.index) };

                Ok(GpuContext {
                    entry,
                    instance,
                    physical_device,
                    device,
                    capabilities,
                    allocator: Mutex::new(allocator),
                    queues,
                    render_queue,
                    compute_queue,
                })
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    unsafe fn open_device(
        instance: &ash::Instance,
    ) -> Result<(
        vk::PhysicalDevice,
        GpuCapabilities,
        QueueSelection,
        Arc<ash::Device>,
        GpuAllocator,
    )> {
        let physical_device = select_physical_device(instance)?;
        let capabilities = GpuCapabilities::query(instance, physical_device);
        info!("Selected GPU: {}", capabilities.summary());

        let families = instance.get_physical_device_queue_family_properties(physical_device);
        let queues = select_queues(&families)?;
        info!(
            "Render queue family {}, async compute queue family {} index {}",
            queues.render.family, queues.compute.family, queues.compute.index
        );

        let device = Arc::new(create_device(instance, physical_device, &queues)?);

        match GpuAllocator::new(instance, Arc::clone(&device), physical_device) {
            Ok(allocator) => Ok((physical_device, capabilities, queues, device, allocator)),
            Err(e) => {
                device.destroy_device(None);
                Err(e)
            }
        }
    }
}

/// Create the logical device with the render and compute queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queues: &QueueSelection,
) -> Result<ash::Device> {
    let requests = queues.queue_requests();
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = requests
        .iter()
        .map(|(family, priorities)| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(*family)
                .queue_priorities(priorities)
        })
        .collect();

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .push_next(&mut features2);

    let device = instance.create_device(physical_device, &device_create_info, None)?;
    Ok(device)
}
