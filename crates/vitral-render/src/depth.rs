//! Depth buffer resource.

use ash::vk;
use vitral_gpu::command::one_shot_submit;
use vitral_gpu::error::Result;
use vitral_gpu::{DeviceContext, TrackedImage};

/// Fixed depth format for the whole engine.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;

/// A single depth image sized to the swapchain extent.
///
/// Recreated with every swapchain generation.
pub struct DepthBuffer {
    pub image: TrackedImage,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl DepthBuffer {
    /// Create the depth image, bind its memory, transition it to the depth
    /// attachment layout, and build its view.
    ///
    /// # Safety
    /// The context must be valid.
    pub unsafe fn new(ctx: &DeviceContext, extent: vk::Extent2D) -> Result<Self> {
        let device = ctx.device();

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw_image = device.create_image(&image_info, None)?;

        let requirements = device.get_image_memory_requirements(raw_image);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(ctx.memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::empty(),
            ));

        let memory = match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(raw_image, None);
                return Err(e.into());
            }
        };

        let mut image =
            TrackedImage::new(raw_image, vk::ImageAspectFlags::DEPTH, vk::ImageLayout::UNDEFINED);

        let result = device
            .bind_image_memory(raw_image, memory, 0)
            .map_err(vitral_gpu::GpuError::from)
            .and_then(|()| {
                one_shot_submit(ctx, |cmd| {
                    image.transition_to(
                        device,
                        cmd,
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                    );
                })
            })
            .and_then(|()| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(raw_image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(DEPTH_FORMAT)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::DEPTH)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );
                device
                    .create_image_view(&view_info, None)
                    .map_err(vitral_gpu::GpuError::from)
            });

        match result {
            Ok(view) => Ok(Self {
                image,
                memory,
                view,
            }),
            Err(e) => {
                device.destroy_image(raw_image, None);
                device.free_memory(memory, None);
                Err(e)
            }
        }
    }

    /// Destroy the view, image, and memory.
    ///
    /// # Safety
    /// The device must be valid and the depth buffer must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.image.image(), None);
        device.free_memory(self.memory, None);
    }
}
