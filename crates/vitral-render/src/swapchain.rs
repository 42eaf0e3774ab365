//! Swapchain management.

use ash::vk;
use vitral_gpu::command::one_shot_submit;
use vitral_gpu::error::{GpuError, Result};
use vitral_gpu::{DeviceContext, SurfaceContext, TrackedImage};

/// Fallback color format used when the driver reports UNDEFINED.
pub const FALLBACK_COLOR_FORMAT: vk::Format = vk::Format::B8G8R8_UNORM;

/// Swapchain wrapper.
///
/// Owns the presentable images (layout-tracked) and their color views.
/// Never mutated in place: a resize destroys the whole generation and
/// creates a new one.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<TrackedImage>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain and transition its images to a presentable
    /// layout.
    ///
    /// Each image starts UNDEFINED and is moved to PRESENT_SRC through a
    /// one-shot submission before its view is created.
    ///
    /// # Safety
    /// The context and surface must be valid.
    pub unsafe fn create(
        ctx: &DeviceContext,
        surface: &SurfaceContext,
        fallback_extent: vk::Extent2D,
    ) -> Result<Self> {
        let info = surface.query_info(ctx)?;

        let format = select_color_format(&info.formats);
        let image_count = select_image_count(&info.capabilities);
        let extent = select_extent(&info.capabilities, fallback_extent);
        let present_mode = select_present_mode(&info.present_modes);
        let pre_transform = select_pre_transform(&info.capabilities);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format)
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let handle = surface
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let raw_images = match surface.swapchain_loader.get_swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                surface.swapchain_loader.destroy_swapchain(handle, None);
                return Err(GpuError::from(e));
            }
        };

        tracing::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            raw_images.len(),
            format,
            present_mode,
        );

        let mut images = Vec::with_capacity(raw_images.len());
        let mut image_views = Vec::with_capacity(raw_images.len());

        for &raw in &raw_images {
            let mut image = TrackedImage::new(
                raw,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
            );

            // New swapchain images start in an undefined layout and must be
            // transitioned before first use.
            let result = one_shot_submit(ctx, |cmd| {
                image.transition_to(
                    ctx.device(),
                    cmd,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                );
            })
            .and_then(|()| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(raw)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::R,
                        g: vk::ComponentSwizzle::G,
                        b: vk::ComponentSwizzle::B,
                        a: vk::ComponentSwizzle::A,
                    })
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );
                ctx.device()
                    .create_image_view(&view_info, None)
                    .map_err(GpuError::from)
            });

            match result {
                Ok(view) => {
                    images.push(image);
                    image_views.push(view);
                }
                Err(e) => {
                    for view in image_views {
                        ctx.device().destroy_image_view(view, None);
                    }
                    surface.swapchain_loader.destroy_swapchain(handle, None);
                    return Err(e);
                }
            }
        }

        Ok(Self {
            handle,
            images,
            image_views,
            format,
            extent,
        })
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroy the image views and the swapchain handle.
    ///
    /// Used on error-unwind paths; a full generation teardown interleaves
    /// framebuffer destruction and is driven by `SwapchainGeneration`.
    ///
    /// # Safety
    /// All handles must be valid and the swapchain must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device, surface: &SurfaceContext) {
        for view in self.image_views.drain(..) {
            device.destroy_image_view(view, None);
        }
        surface.swapchain_loader.destroy_swapchain(self.handle, None);
    }
}

/// Select the swapchain color format.
///
/// The first reported format wins; a driver reporting UNDEFINED leaves the
/// choice to us and gets the fixed BGR8 fallback.
pub fn select_color_format(formats: &[vk::SurfaceFormatKHR]) -> vk::Format {
    match formats.first() {
        Some(first) if first.format != vk::Format::UNDEFINED => first.format,
        _ => FALLBACK_COLOR_FORMAT,
    }
}

/// Select the number of presentable images to request.
///
/// The minimum required count; a single image when the surface cannot
/// double-buffer (`max_image_count` of 1). A `max_image_count` of 0 means
/// unlimited.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if capabilities.max_image_count > 0 && capabilities.max_image_count < 2 {
        1
    } else {
        capabilities.min_image_count
    }
}

/// Select the swapchain extent.
///
/// The surface's current extent, unless it reports "any extent"
/// (`u32::MAX`), in which case the configured fallback is used.
pub fn select_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    fallback: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width == u32::MAX {
        fallback
    } else {
        capabilities.current_extent
    }
}

/// Select the present mode: MAILBOX when available, else FIFO.
///
/// FIFO is always supported, so this never fails and is always vsync-safe.
pub fn select_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Select the pre-transform: identity when supported, else whatever the
/// surface is currently using.
pub fn select_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reported_format_wins() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(select_color_format(&formats), vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn undefined_format_falls_back_to_bgr8() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert_eq!(select_color_format(&formats), FALLBACK_COLOR_FORMAT);
    }

    #[test]
    fn image_count_uses_minimum_required() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        let count = select_image_count(&capabilities);
        assert!((2..=3).contains(&count));
        assert_eq!(count, 2);
    }

    #[test]
    fn single_buffer_surface_gets_one_image() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 1,
            max_image_count: 1,
            ..Default::default()
        };
        assert_eq!(select_image_count(&capabilities), 1);
    }

    #[test]
    fn unlimited_max_uses_minimum() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(select_image_count(&capabilities), 3);
    }

    #[test]
    fn defined_extent_is_used_as_is() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = select_extent(
            &capabilities,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
        );
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn any_extent_uses_fallback() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            ..Default::default()
        };
        let extent = select_extent(
            &capabilities,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
        );
        assert_eq!(extent.width, 640);
        assert_eq!(extent.height, 480);
    }

    #[test]
    fn mailbox_preferred_over_fifo() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(select_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_is_the_fallback_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(select_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }
}
