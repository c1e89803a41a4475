//! Render and async compute queue selection.

use ash::vk;

use crate::error::{GpuError, Result};

/// A single queue: family plus index within the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    pub family: u32,
    pub index: u32,
}

/// The two queues the sample runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSelection {
    /// Graphics + compute queue that draws.
    pub render: QueueSlot,
    /// Queue the simulation runs on, distinct from `render`.
    pub compute: QueueSlot,
}

impl QueueSelection {
    /// Whether compute runs on a different queue family than rendering.
    ///
    /// Buffers then need real ownership transfers between the families.
    pub fn separate_families(&self) -> bool {
        self.render.family != self.compute.family
    }

    /// Queue priorities to request per family, `(family, priorities)`.
    ///
    /// The compute queue gets a lower priority than the render queue.
    pub fn queue_requests(&self) -> Vec<(u32, Vec<f32>)> {
        if self.separate_families() {
            vec![
                (self.render.family, vec![RENDER_PRIORITY]),
                (self.compute.family, vec![COMPUTE_PRIORITY]),
            ]
        } else {
            vec![(self.render.family, vec![RENDER_PRIORITY, COMPUTE_PRIORITY])]
        }
    }
}

const RENDER_PRIORITY: f32 = 1.0;
const COMPUTE_PRIORITY: f32 = 0.5;

/// Pick the render queue and an async compute queue.
///
/// The render family is the first family supporting graphics and compute.
/// Any other family with compute support is preferred for async compute; if
/// there is none, a second queue of the render family is used.
pub fn select_queues(families: &[vk::QueueFamilyProperties]) -> Result<QueueSelection> {
    let graphics_compute = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;

    let mut render: Option<(u32, u32)> = None;
    let mut compute_family = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 || !family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
            continue;
        }

        if render.is_none() && family.queue_flags.contains(graphics_compute) {
            render = Some((i, family.queue_count));
        } else if compute_family.is_none() {
            compute_family = Some(i);
        }
    }

    let (render_family, render_count) = render.ok_or(GpuError::NoSuitableDevice)?;

    let compute = match compute_family {
        Some(family) => QueueSlot { family, index: 0 },
        None if render_count > 1 => QueueSlot {
            family: render_family,
            index: 1,
        },
        None => return Err(GpuError::NoAsyncComputeQueue),
    };

    Ok(QueueSelection {
        render: QueueSlot {
            family: render_family,
            index: 0,
        },
        compute,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    const GFX: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw()
            | vk::QueueFlags::COMPUTE.as_raw()
            | vk::QueueFlags::TRANSFER.as_raw(),
    );

    #[test]
    fn prefers_dedicated_compute_family() {
        let families = [
            family(GFX, 16),
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 8),
        ];
        let selection = select_queues(&families).unwrap();
        assert_eq!(selection.render, QueueSlot { family: 0, index: 0 });
        assert_eq!(selection.compute, QueueSlot { family: 2, index: 0 });
        assert!(selection.separate_families());
        assert_eq!(selection.queue_requests().len(), 2);
    }

    #[test]
    fn falls_back_to_second_render_queue() {
        let families = [family(GFX, 2), family(vk::QueueFlags::TRANSFER, 1)];
        let selection = select_queues(&families).unwrap();
        assert_eq!(selection.compute, QueueSlot { family: 0, index: 1 });
        assert!(!selection.separate_families());
        assert_eq!(selection.queue_requests(), vec![(0, vec![1.0, 0.5])]);
    }

    #[test]
    fn single_queue_has_no_async_compute() {
        let families = [family(GFX, 1)];
        assert!(matches!(
            select_queues(&families),
            Err(GpuError::NoAsyncComputeQueue)
        ));
    }

    #[test]
    fn requires_graphics() {
        let families = [family(vk::QueueFlags::COMPUTE, 4)];
        assert!(matches!(
            select_queues(&families),
            Err(GpuError::NoSuitableDevice)
        ));
    }

    #[test]
    fn skips_empty_families() {
        let families = [
            family(GFX, 1),
            family(vk::QueueFlags::COMPUTE, 0),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        let selection = select_queues(&families).unwrap();
        assert_eq!(selection.compute.family, 2);
    }
}
