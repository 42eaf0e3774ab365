//! Texture upload and sampling resources.
//!
//! Pixels arrive as packed RGB bytes and are expanded to RGBA on upload,
//! synthesizing the alpha channel per [`AlphaMode`]. Devices that can
//! sample a linear-tiled image use it directly; everything else gets a
//! staged copy into an optimal-tiled image.

use ash::vk;
use vitral_gpu::command::one_shot_submit_polling;
use vitral_gpu::error::{GpuError, Result};
use vitral_gpu::{DeviceContext, TrackedImage};

/// Fixed texel format for all textures.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// How the alpha channel is synthesized from RGB input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    /// Every texel is fully opaque.
    Opaque,
    /// Texels matching the key color become fully transparent.
    ColorKey { r: u8, g: u8, b: u8 },
    /// Every texel gets the same constant alpha.
    Constant(u8),
}

/// Whether the device can sample directly from a linear-tiled image of the
/// texture format.
pub fn linear_sampling_supported(properties: &vk::FormatProperties) -> bool {
    properties
        .linear_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE)
}

/// Expand packed RGB rows into an RGBA destination with the given row
/// pitch, synthesizing alpha per `mode`.
///
/// `dst` must hold at least `height * pitch` bytes and `rgb` at least
/// `width * height * 3`.
pub fn fill_rgba_rows(
    dst: &mut [u8],
    rgb: &[u8],
    width: usize,
    height: usize,
    pitch: usize,
    mode: AlphaMode,
) {
    for y in 0..height {
        let row = &mut dst[y * pitch..y * pitch + width * 4];
        for x in 0..width {
            let src = &rgb[(y * width + x) * 3..(y * width + x) * 3 + 3];
            let texel = &mut row[x * 4..x * 4 + 4];
            texel[..3].copy_from_slice(src);
            texel[3] = match mode {
                AlphaMode::Opaque => 255,
                AlphaMode::ColorKey { r, g, b } => {
                    if src[0] == r && src[1] == g && src[2] == b {
                        0
                    } else {
                        255
                    }
                }
                AlphaMode::Constant(alpha) => alpha,
            };
        }
    }
}

/// The optimal-tiled half of a staged texture.
pub struct OptimalImage {
    pub image: TrackedImage,
    pub memory: vk::DeviceMemory,
}

/// A sampled image resource.
///
/// Either "direct" (the linear-tiled mappable image is sampled as-is) or
/// "staged" (the mappable image is copied into an optimal-tiled one, which
/// becomes the sampled image). The choice is made once at creation from
/// device format support and never changes; the mappable resources are
/// retained either way so the texture can be re-uploaded.
pub struct Texture {
    pub staged: bool,
    pub mappable_image: TrackedImage,
    pub mappable_memory: vk::DeviceMemory,
    pub optimal: Option<OptimalImage>,
    pub sampler: vk::Sampler,
    pub view: vk::ImageView,
    pub width: u32,
    pub height: u32,
    /// Driver-reported size of the mappable allocation.
    pub size: vk::DeviceSize,
    /// Row pitch of the mappable image.
    pub pitch: vk::DeviceSize,
}

impl Texture {
    /// Upload RGB pixels into a new texture.
    ///
    /// # Safety
    /// The context must be valid.
    pub unsafe fn new(
        ctx: &DeviceContext,
        width: u32,
        height: u32,
        rgb_pixels: &[u8],
        mode: AlphaMode,
    ) -> Result<Self> {
        let device = ctx.device();

        let expected = width as usize * height as usize * 3;
        if rgb_pixels.len() < expected {
            return Err(GpuError::TextureUpload(format!(
                "{}x{} needs {expected} RGB bytes, got {}",
                width,
                height,
                rgb_pixels.len()
            )));
        }

        // Stage through an optimal-tiled image unless the device can sample
        // linear tiling directly.
        let format_properties = ctx
            .instance()
            .get_physical_device_format_properties(ctx.physical_device(), TEXTURE_FORMAT);
        let staged = !linear_sampling_supported(&format_properties);

        if staged {
            tracing::debug!("Linear sampling unsupported; staging texture through optimal tiling");
        }

        // The CPU-writable image. When staging, it is only a transfer
        // source; otherwise it is the sampled image itself.
        let usage = if staged {
            vk::ImageUsageFlags::TRANSFER_SRC
        } else {
            vk::ImageUsageFlags::SAMPLED
        };
        let mappable_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::LINEAR)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::PREINITIALIZED);

        let raw_mappable = device.create_image(&mappable_info, None)?;

        let requirements = device.get_image_memory_requirements(raw_mappable);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(ctx.memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ));

        let mappable_memory = match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(raw_mappable, None);
                return Err(e.into());
            }
        };

        if let Err(e) = device.bind_image_memory(raw_mappable, mappable_memory, 0) {
            device.destroy_image(raw_mappable, None);
            device.free_memory(mappable_memory, None);
            return Err(e.into());
        }

        let subresource = vk::ImageSubresource::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .array_layer(0);
        let layout = device.get_image_subresource_layout(raw_mappable, subresource);

        let mut texture = Self {
            staged,
            mappable_image: TrackedImage::new(
                raw_mappable,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::PREINITIALIZED,
            ),
            mappable_memory,
            optimal: None,
            sampler: vk::Sampler::null(),
            view: vk::ImageView::null(),
            width,
            height,
            size: requirements.size,
            pitch: layout.row_pitch,
        };

        if staged {
            if let Err(e) = texture.create_optimal_image(ctx) {
                texture.destroy(device);
                return Err(e);
            }
        }

        if let Err(e) = texture
            .upload_pixels(ctx, rgb_pixels, mode)
            .and_then(|()| texture.finalize_layouts(ctx))
            .and_then(|()| texture.create_sampler_and_view(device))
        {
            texture.destroy(device);
            return Err(e);
        }

        Ok(texture)
    }

    /// Re-upload pixels into an existing texture.
    ///
    /// The staged/direct path chosen at creation is replayed. The alpha
    /// handling may change per call; the extent may not.
    ///
    /// # Safety
    /// The context must be valid and the texture must not be in use by an
    /// in-flight frame.
    pub unsafe fn update(
        &mut self,
        ctx: &DeviceContext,
        rgb_pixels: &[u8],
        mode: AlphaMode,
    ) -> Result<()> {
        let expected = self.width as usize * self.height as usize * 3;
        if rgb_pixels.len() < expected {
            return Err(GpuError::TextureUpload(format!(
                "{}x{} needs {expected} RGB bytes, got {}",
                self.width,
                self.height,
                rgb_pixels.len()
            )));
        }

        self.upload_pixels(ctx, rgb_pixels, mode)?;
        self.finalize_layouts(ctx)
    }

    /// The image shaders sample from.
    pub fn final_image(&self) -> vk::Image {
        self.optimal
            .as_ref()
            .map_or(self.mappable_image.image(), |optimal| optimal.image.image())
    }

    /// Create the optimal-tiled image and bind device-local memory sized
    /// from the optimal image's own requirements.
    unsafe fn create_optimal_image(&mut self, ctx: &DeviceContext) -> Result<()> {
        let device = ctx.device();

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let raw_image = device.create_image(&image_info, None)?;

        let requirements = device.get_image_memory_requirements(raw_image);
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(ctx.memory_type_index(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ));

        let memory = match device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_image(raw_image, None);
                return Err(e.into());
            }
        };

        if let Err(e) = device.bind_image_memory(raw_image, memory, 0) {
            device.destroy_image(raw_image, None);
            device.free_memory(memory, None);
            return Err(e.into());
        }

        self.optimal = Some(OptimalImage {
            image: TrackedImage::new(
                raw_image,
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
            ),
            memory,
        });

        Ok(())
    }

    /// Map the mappable memory and expand the RGB pixels into it.
    unsafe fn upload_pixels(
        &mut self,
        ctx: &DeviceContext,
        rgb_pixels: &[u8],
        mode: AlphaMode,
    ) -> Result<()> {
        let device = ctx.device();

        let data = device.map_memory(
            self.mappable_memory,
            0,
            vk::WHOLE_SIZE,
            vk::MemoryMapFlags::empty(),
        )?;
        let dst = std::slice::from_raw_parts_mut(data.cast::<u8>(), self.size as usize);

        fill_rgba_rows(
            dst,
            rgb_pixels,
            self.width as usize,
            self.height as usize,
            self.pitch as usize,
            mode,
        );

        device.unmap_memory(self.mappable_memory);
        Ok(())
    }

    /// Move the uploaded pixels into their sampled layout.
    ///
    /// Direct path: the mappable image itself becomes shader-readable.
    /// Staged path: mappable becomes a transfer source, the optimal image
    /// a transfer destination, a full-extent copy runs, and the optimal
    /// image becomes shader-readable. The submission is fenced and polled
    /// until the GPU finishes.
    unsafe fn finalize_layouts(&mut self, ctx: &DeviceContext) -> Result<()> {
        let device = ctx.device();
        let width = self.width;
        let height = self.height;

        if let Some(optimal) = &mut self.optimal {
            let mappable = &mut self.mappable_image;
            one_shot_submit_polling(ctx, |cmd| {
                mappable.transition_to(
                    device,
                    cmd,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::PipelineStageFlags::HOST,
                    vk::PipelineStageFlags::TRANSFER,
                );
                optimal.image.transition_to(
                    device,
                    cmd,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                );

                let subresource = vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1);
                let region = vk::ImageCopy::default()
                    .src_subresource(subresource)
                    .dst_subresource(subresource)
                    .extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    });
                device.cmd_copy_image(
                    cmd,
                    mappable.image(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    optimal.image.image(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );

                optimal.image.transition_to(
                    device,
                    cmd,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                );
            })
        } else if self.mappable_image.layout() == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
            // Re-upload on the direct path: host-coherent writes become
            // visible at the next submission, no transition needed.
            Ok(())
        } else {
            let mappable = &mut self.mappable_image;
            one_shot_submit_polling(ctx, |cmd| {
                mappable.transition_to(
                    device,
                    cmd,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::PipelineStageFlags::HOST,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                );
            })
        }
    }

    /// Create the sampler and the shader-read view on the final image.
    unsafe fn create_sampler_and_view(&mut self, device: &ash::Device) -> Result<()> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        self.sampler = device.create_sampler(&sampler_info, None)?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(self.final_image())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
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

        self.view = device.create_image_view(&view_info, None)?;
        Ok(())
    }

    /// Destroy every resource this texture owns.
    ///
    /// # Safety
    /// The device must be valid and the texture must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        if self.view != vk::ImageView::null() {
            device.destroy_image_view(self.view, None);
        }
        if self.sampler != vk::Sampler::null() {
            device.destroy_sampler(self.sampler, None);
        }
        if let Some(optimal) = &self.optimal {
            device.destroy_image(optimal.image.image(), None);
            device.free_memory(optimal.memory, None);
        }
        device.destroy_image(self.mappable_image.image(), None);
        device.free_memory(self.mappable_memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_mode_forces_full_alpha() {
        let rgb = [1u8, 2, 3, 4, 5, 6];
        let mut dst = [0u8; 8];
        fill_rgba_rows(&mut dst, &rgb, 2, 1, 8, AlphaMode::Opaque);
        assert_eq!(dst, [1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn color_key_zeroes_matching_texels() {
        // The 2x1 scenario: first texel matches the key, second does not.
        let rgb = [10u8, 20, 30, 40, 50, 60];
        let mut dst = [0u8; 8];
        fill_rgba_rows(
            &mut dst,
            &rgb,
            2,
            1,
            8,
            AlphaMode::ColorKey {
                r: 10,
                g: 20,
                b: 30,
            },
        );
        assert_eq!(dst, [10, 20, 30, 0, 40, 50, 60, 255]);
    }

    #[test]
    fn constant_mode_ignores_pixel_values() {
        let rgb = [9u8, 9, 9, 200, 200, 200];
        let mut dst = [0u8; 8];
        fill_rgba_rows(&mut dst, &rgb, 2, 1, 8, AlphaMode::Constant(77));
        assert_eq!(dst, [9, 9, 9, 77, 200, 200, 200, 77]);
    }

    #[test]
    fn rows_respect_the_driver_pitch() {
        // 1x2 image with a 12-byte pitch: the second row starts at byte 12,
        // and the padding between rows is untouched.
        let rgb = [1u8, 2, 3, 4, 5, 6];
        let mut dst = [0xAAu8; 24];
        fill_rgba_rows(&mut dst, &rgb, 1, 2, 12, AlphaMode::Opaque);
        assert_eq!(&dst[0..4], &[1, 2, 3, 255]);
        assert_eq!(&dst[4..12], &[0xAA; 8]);
        assert_eq!(&dst[12..16], &[4, 5, 6, 255]);
        assert_eq!(&dst[16..24], &[0xAA; 8]);
    }

    #[test]
    fn staged_decision_follows_linear_sampling_support() {
        let unsupported = vk::FormatProperties::default();
        assert!(!linear_sampling_supported(&unsupported));

        let supported = vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::SAMPLED_IMAGE
                | vk::FormatFeatureFlags::TRANSFER_SRC,
            ..Default::default()
        };
        assert!(linear_sampling_supported(&supported));
    }
}
