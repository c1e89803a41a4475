//! Vulkan instance creation and device selection.

use std::ffi::{CStr, CString};

use ash::vk;
use tracing::{debug, warn};

use crate::error::{GpuError, Result};
use crate::queues::select_queues;

/// Validation layer enabled on request.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Create a Vulkan instance.
///
/// Rendering is offscreen, so no surface extensions are requested.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"nbody-async")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let mut layers: Vec<*const std::ffi::c_char> = Vec::new();
    if enable_validation {
        let available = entry.enumerate_instance_layer_properties()?;
        let found = available
            .iter()
            .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == VALIDATION_LAYER);
        if found {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            warn!(
                "Validation layer {} not available",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
    }

    #[cfg(target_os = "macos")]
    let extensions = [ash::khr::portability_enumeration::NAME.as_ptr()];
    #[cfg(not(target_os = "macos"))]
    let extensions: [*const std::ffi::c_char; 0] = [];

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;
    Ok(instance)
}

/// Select the best physical device.
///
/// Devices without Vulkan 1.3 or without any async compute queue are
/// skipped. If no device qualifies, the error says why the best candidate
/// was rejected.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    let mut best: Option<(i32, vk::PhysicalDevice)> = None;
    let mut rejection = GpuError::NoSuitableDevice;

    for device in devices {
        match score_physical_device(instance, device) {
            Ok(score) => {
                if best.map_or(true, |(s, _)| score > s) {
                    best = Some((score, device));
                }
            }
            Err(e) => {
                debug!("Skipping physical device: {e}");
                rejection = e;
            }
        }
    }

    best.map(|(_, device)| device).ok_or(rejection)
}

/// Score a physical device for selection.
unsafe fn score_physical_device(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Result<i32> {
    let properties = instance.get_physical_device_properties(device);

    let api_version = properties.api_version;
    if vk::api_version_major(api_version) < 1
        || (vk::api_version_major(api_version) == 1 && vk::api_version_minor(api_version) < 3)
    {
        return Err(GpuError::NoSuitableDevice);
    }

    let families = instance.get_physical_device_queue_family_properties(device);
    let queues = select_queues(&families)?;

    let mut score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    };

    // A separate compute family actually overlaps with rendering.
    if queues.separate_families() {
        score += 200;
    }

    Ok(score)
}
