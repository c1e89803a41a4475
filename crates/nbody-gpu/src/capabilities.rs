//! GPU capability detection.

use std::ffi::CStr;

use ash::vk;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub api_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    pub max_compute_workgroup_size: [u32; 3],
    pub max_compute_workgroup_invocations: u32,
    pub max_storage_buffer_range: u32,
    pub min_storage_buffer_offset_alignment: u64,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned(),
            api_version: properties.api_version,
            device_local_memory_mb,
            max_compute_workgroup_size: properties.limits.max_compute_work_group_size,
            max_compute_workgroup_invocations: properties.limits.max_compute_work_group_invocations,
            max_storage_buffer_range: properties.limits.max_storage_buffer_range,
            min_storage_buffer_offset_alignment: properties
                .limits
                .min_storage_buffer_offset_alignment,
        }
    }

    /// Whether the device can run a compute shader with `local_size` invocations
    /// over a storage buffer of `buffer_bytes`.
    pub fn supports_dispatch(&self, local_size: u32, buffer_bytes: u64) -> bool {
        local_size <= self.max_compute_workgroup_size[0]
            && local_size <= self.max_compute_workgroup_invocations
            && buffer_bytes <= u64::from(self.max_storage_buffer_range)
    }

    /// Round `size` up so consecutive regions of it are valid storage buffer offsets.
    pub fn storage_region_stride(&self, size: u64) -> u64 {
        let align = self.min_storage_buffer_offset_alignment.max(1);
        size.div_ceil(align) * align
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test".into(),
            api_version: vk::API_VERSION_1_3,
            device_local_memory_mb: 0,
            max_compute_workgroup_size: [1024, 1024, 64],
            max_compute_workgroup_invocations: 1024,
            max_storage_buffer_range: 1 << 27,
            min_storage_buffer_offset_alignment: 256,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn dispatch_limits() {
        let caps = caps();
        assert!(caps.supports_dispatch(128, 1 << 20));
        assert!(!caps.supports_dispatch(2048, 1 << 20));
        assert!(!caps.supports_dispatch(128, 1 << 28));
        assert!(caps.summary().contains("Vulkan 1.3.0"));
    }

    #[test]
    fn region_stride_respects_alignment() {
        let mut caps = caps();
        assert_eq!(caps.storage_region_stride(64), 256);
        caps.min_storage_buffer_offset_alignment = 16;
        assert_eq!(caps.storage_region_stride(64), 64);
        assert_eq!(caps.storage_region_stride(70), 80);
    }
}
