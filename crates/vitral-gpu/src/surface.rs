//! Surface management for windowed rendering.
//!
//! Provides abstractions for Vulkan surface creation and management,
//! hiding the raw-window-handle complexity from the rest of the engine.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Surface context for windowed rendering.
///
/// Manages the Vulkan surface and the surface/swapchain extension loaders.
pub struct SurfaceContext {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader.
    pub swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    /// Create a new surface context from a window.
    ///
    /// # Safety
    /// The GPU context must be valid and the window must have valid handles.
    pub unsafe fn from_window<W>(ctx: &DeviceContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            ctx.entry(),
            ctx.instance(),
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        Ok(Self::from_raw(ctx, surface))
    }

    /// Adopt an externally created surface belonging to this context's
    /// instance. The caller transfers ownership; `destroy` releases it.
    pub fn from_raw(ctx: &DeviceContext, surface: vk::SurfaceKHR) -> Self {
        let surface_loader = ash::khr::surface::Instance::new(ctx.entry(), ctx.instance());
        let swapchain_loader = ash::khr::swapchain::Device::new(ctx.instance(), ctx.device());

        let this = Self {
            surface,
            surface_loader,
            swapchain_loader,
        };
        this.warn_if_present_unsupported(ctx);
        this
    }

    /// Warn when the context's queue family cannot present to this surface.
    /// Presentation on such devices is undefined; this is a degraded mode,
    /// not an error.
    fn warn_if_present_unsupported(&self, ctx: &DeviceContext) {
        let supported = unsafe {
            self.surface_loader.get_physical_device_surface_support(
                ctx.physical_device(),
                ctx.queue_family(),
                self.surface,
            )
        };
        match supported {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Queue family {} cannot present to this surface",
                    ctx.queue_family()
                );
            }
            Err(e) => tracing::warn!("Surface support query failed: {e}"),
        }
    }

    /// Query surface capabilities, formats, and present modes.
    pub fn query_info(&self, ctx: &DeviceContext) -> Result<SurfaceInfo> {
        unsafe {
            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device(), self.surface)?;

            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(ctx.physical_device(), self.surface)?;

            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(ctx.physical_device(), self.surface)?;

            Ok(SurfaceInfo {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// The surface must not be in use.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// Surface capabilities query result.
pub struct SurfaceInfo {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
