//! GPU context management.

use crate::error::{GpuError, Result};
use crate::instance::{create_instance, find_graphics_queue_family, select_physical_device};
use ash::vk;
use std::ffi::CStr;

/// Main GPU context holding the Vulkan connection.
///
/// Owns the device, the single graphics/present queue, the one primary
/// command buffer every resource-creation and frame operation records into,
/// and the submit fence guarding one-shot submissions.
pub struct DeviceContext {
    // Entry must be kept alive for the lifetime of the context
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) memory_properties: vk::PhysicalDeviceMemoryProperties,

    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,

    pub(crate) command_pool: vk::CommandPool,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) submit_fence: vk::Fence,
}

impl DeviceContext {
    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the graphics/present queue.
    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Get the graphics/present queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get the shared primary command buffer.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Get the submit fence used by one-shot submissions.
    pub fn submit_fence(&self) -> vk::Fence {
        self.submit_fence
    }

    /// Get the cached device memory properties.
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Select a memory type index for an allocation.
    ///
    /// See [`memory_type_from_properties`] for the selection semantics.
    pub fn memory_type_index(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> u32 {
        memory_type_from_properties(&self.memory_properties, type_bits, required)
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            self.device.destroy_fence(self.submit_fence, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct DeviceContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for DeviceContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Vitral".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl DeviceContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<DeviceContext> {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        // Create Vulkan instance
        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        // Select best physical device
        let physical_device = unsafe { select_physical_device(&instance) }?;

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let queue_family = unsafe { find_graphics_queue_family(&instance, physical_device) }?;

        // Create logical device and retrieve the queue
        let device = unsafe { create_device(&instance, physical_device, queue_family) }?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        // One resettable primary command buffer shared by every submission
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info)?[0] };

        let fence_info = vk::FenceCreateInfo::default();
        let submit_fence = unsafe { device.create_fence(&fence_info, None)? };

        Ok(DeviceContext {
            entry,
            instance,
            physical_device,
            device,
            memory_properties,
            queue_family,
            queue,
            command_pool,
            command_buffer,
            submit_fence,
        })
    }
}

/// Required device extensions.
fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Create the logical device.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extensions = required_device_extensions();
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extension_names);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok(device)
}

/// Select a memory type index satisfying `type_bits` and `required` flags.
///
/// Iterates memory types in index order and returns the first whose bit is
/// set in `type_bits` and whose property flags are a superset of `required`.
/// When nothing matches, falls back to index 0 with a warning; the resulting
/// allocation class may be wrong on such devices (documented degraded mode).
pub fn memory_type_from_properties(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> u32 {
    for i in 0..properties.memory_type_count {
        if type_bits & (1 << i) != 0
            && properties.memory_types[i as usize]
                .property_flags
                .contains(required)
        {
            return i;
        }
    }

    tracing::warn!(
        "No memory type matches mask {type_bits:#x} with {required:?}; falling back to type 0"
    );
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &property_flags) in flags.iter().enumerate() {
            properties.memory_types[i].property_flags = property_flags;
        }
        properties
    }

    #[test]
    fn lowest_matching_index_wins() {
        let properties = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = memory_type_from_properties(
            &properties,
            0b111,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index, 1);
    }

    #[test]
    fn type_bits_mask_skips_excluded_types() {
        let properties = properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        // Type 0 matches the flags but is excluded by the mask.
        let index =
            memory_type_from_properties(&properties, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, 1);
    }

    #[test]
    fn superset_flags_are_accepted() {
        let properties = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let index =
            memory_type_from_properties(&properties, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, 1);
    }

    #[test]
    fn no_match_falls_back_to_zero() {
        let properties = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);

        let index =
            memory_type_from_properties(&properties, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert_eq!(index, 0);
    }

    #[test]
    fn empty_required_flags_match_any_type() {
        let properties = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);

        let index = memory_type_from_properties(&properties, 0b1, vk::MemoryPropertyFlags::empty());
        assert_eq!(index, 0);
    }
}
