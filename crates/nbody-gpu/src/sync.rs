//! Fence helpers.

use std::time::Duration;

use ash::vk;

use crate::error::Result;

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Fence wait timeout in nanoseconds, saturating at "forever".
pub fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Wait for a fence. Returns `false` if `timeout` elapsed first.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout: Duration,
) -> Result<bool> {
    match device.wait_for_fences(&[fence], true, timeout_ns(timeout)) {
        Ok(()) => Ok(true),
        Err(vk::Result::TIMEOUT) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Non-blocking fence check.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn fence_signaled(device: &ash::Device, fence: vk::Fence) -> Result<bool> {
    Ok(device.get_fence_status(fence)?)
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid, and the fence not pending.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_conversion() {
        assert_eq!(timeout_ns(Duration::from_millis(1)), 1_000_000);
        assert_eq!(timeout_ns(Duration::MAX), u64::MAX);
    }
}
