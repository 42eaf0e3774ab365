//! Layout-tracked image transitions.
//!
//! Every image the engine transitions is wrapped in a [`TrackedImage`] that
//! remembers its current layout, so barriers are always recorded with the
//! access masks matching the actual old/new layout pair instead of being
//! hand-written at each call site.

use ash::vk;

/// An image whose current layout is tracked on the CPU side.
pub struct TrackedImage {
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    layout: vk::ImageLayout,
}

impl TrackedImage {
    /// Wrap an image currently in the given layout.
    pub fn new(image: vk::Image, aspect: vk::ImageAspectFlags, layout: vk::ImageLayout) -> Self {
        Self {
            image,
            aspect,
            layout,
        }
    }

    /// Get the raw image handle.
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Get the current layout.
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Record a pipeline barrier transitioning this image to `new_layout`.
    ///
    /// Access masks are derived from the old/new layout pair; the caller
    /// supplies only the stage masks of the dependency. A transition to the
    /// current layout records nothing.
    ///
    /// # Safety
    /// The device and command buffer must be valid, the command buffer must
    /// be recording, and the image's actual layout must match the tracked
    /// layout.
    pub unsafe fn transition_to(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        if new_layout == self.layout {
            return;
        }

        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(src_access_mask(self.layout))
            .dst_access_mask(dst_access_mask(new_layout))
            .old_layout(self.layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(self.aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );

        self.layout = new_layout;
    }
}

/// Access the GPU must finish before leaving `layout`.
fn src_access_mask(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::MEMORY_READ,
        _ => vk::AccessFlags::empty(),
    }
}

/// Access that must wait until the image is in `layout`.
fn dst_access_mask(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::MEMORY_READ,
        _ => vk::AccessFlags::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_to_color_attachment_masks() {
        // The draw_begin barrier.
        assert_eq!(
            src_access_mask(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AccessFlags::MEMORY_READ
        );
        assert_eq!(
            dst_access_mask(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn color_attachment_to_present_masks() {
        // The pre-present barrier.
        assert_eq!(
            src_access_mask(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(
            dst_access_mask(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AccessFlags::MEMORY_READ
        );
    }

    #[test]
    fn staged_texture_upload_masks() {
        assert_eq!(
            src_access_mask(vk::ImageLayout::PREINITIALIZED),
            vk::AccessFlags::HOST_WRITE
        );
        assert_eq!(
            dst_access_mask(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            vk::AccessFlags::TRANSFER_READ
        );
        assert_eq!(
            dst_access_mask(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            src_access_mask(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            dst_access_mask(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            vk::AccessFlags::SHADER_READ
        );
    }

    #[test]
    fn undefined_layout_has_no_src_access() {
        assert_eq!(
            src_access_mask(vk::ImageLayout::UNDEFINED),
            vk::AccessFlags::empty()
        );
        assert_eq!(
            dst_access_mask(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }
}
