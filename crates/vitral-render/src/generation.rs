//! The swapchain generation: every resource that lives and dies with one
//! swapchain.

use crate::depth::DepthBuffer;
use crate::render_pass::{create_framebuffers, create_render_pass};
use crate::swapchain::Swapchain;
use ash::vk;
use vitral_gpu::error::Result;
use vitral_gpu::{DeviceContext, SurfaceContext};

/// The swapchain, its depth buffer, render pass, and framebuffers.
///
/// These four are one unit: all are destroyed and rebuilt together on
/// resize, never partially. `create` tears down everything it already
/// built when a later step fails, so a failed rebuild leaves nothing
/// behind.
pub struct SwapchainGeneration {
    pub swapchain: Swapchain,
    pub depth: DepthBuffer,
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainGeneration {
    /// Build a complete generation: swapchain, depth buffer, render pass,
    /// then one framebuffer per swapchain image.
    ///
    /// # Safety
    /// The context and surface must be valid, and no previous generation
    /// may still reference the surface.
    pub unsafe fn create(
        ctx: &DeviceContext,
        surface: &SurfaceContext,
        fallback_extent: vk::Extent2D,
    ) -> Result<Self> {
        let device = ctx.device();

        let mut swapchain = Swapchain::create(ctx, surface, fallback_extent)?;

        let depth = match DepthBuffer::new(ctx, swapchain.extent) {
            Ok(depth) => depth,
            Err(e) => {
                swapchain.destroy(device, surface);
                return Err(e);
            }
        };

        let render_pass = match create_render_pass(device, swapchain.format) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                depth.destroy(device);
                swapchain.destroy(device, surface);
                return Err(e);
            }
        };

        let framebuffers = match create_framebuffers(
            device,
            render_pass,
            &swapchain.image_views,
            depth.view,
            swapchain.extent,
        ) {
            Ok(framebuffers) => framebuffers,
            Err(e) => {
                device.destroy_render_pass(render_pass, None);
                depth.destroy(device);
                swapchain.destroy(device, surface);
                return Err(e);
            }
        };

        Ok(Self {
            swapchain,
            depth,
            render_pass,
            framebuffers,
        })
    }

    /// The extent shared by every member of this generation.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Destroy the whole generation.
    ///
    /// Order matters at the API level: per-image framebuffers and views
    /// first, then the render pass, the depth resources, and finally the
    /// swapchain handle.
    ///
    /// # Safety
    /// The device must be idle and nothing may reference this generation.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext, surface: &SurfaceContext) {
        let device = ctx.device();

        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }
        for view in self.swapchain.image_views.drain(..) {
            device.destroy_image_view(view, None);
        }
        device.destroy_render_pass(self.render_pass, None);
        self.depth.destroy(device);
        surface
            .swapchain_loader
            .destroy_swapchain(self.swapchain.handle, None);
    }
}
