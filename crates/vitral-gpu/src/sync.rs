//! Synchronization primitives.

use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

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

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// The two binary semaphores used by one frame.
///
/// Created at `draw_begin` and destroyed at `draw_update`; never reused
/// across frames.
pub struct FrameSemaphores {
    /// Signaled when the acquired swapchain image is ready.
    pub acquire: vk::Semaphore,
    /// Signaled when rendering to the image is complete.
    pub render_complete: vk::Semaphore,
}

impl FrameSemaphores {
    /// Create the semaphore pair for one frame.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let acquire = create_semaphore(device)?;
        let render_complete = match create_semaphore(device) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(acquire, None);
                return Err(e);
            }
        };

        Ok(Self {
            acquire,
            render_complete,
        })
    }

    /// Destroy both semaphores.
    ///
    /// # Safety
    /// The device must be valid and the semaphores must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.acquire, None);
        device.destroy_semaphore(self.render_complete, None);
    }
}
