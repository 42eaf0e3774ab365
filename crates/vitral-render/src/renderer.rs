//! The renderer façade.
//!
//! Owns the device context, surface, current swapchain generation, and the
//! frame state machine, and exposes the public resource and drawing
//! operations. All GPU work is synchronous: every submitting operation
//! blocks on a fence before returning, so exactly one frame is ever in
//! flight.

use crate::frame::FrameState;
use crate::generation::SwapchainGeneration;
use crate::pipeline::{self, Pipeline, Shader};
use crate::shape::{Instance, Shape};
use crate::texture::{AlphaMode, Texture};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vitral_gpu::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use vitral_gpu::error::{GpuError, Result};
use vitral_gpu::sync::create_fence;
use vitral_gpu::{DeviceContext, DeviceContextBuilder, FrameSemaphores, SurfaceContext};

/// Renderer startup configuration.
#[derive(Clone)]
pub struct RendererConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Initial surface width, used when the surface reports no extent.
    pub width: u32,
    /// Initial surface height, used when the surface reports no extent.
    pub height: u32,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "Vitral".to_string(),
            width: 1280,
            height: 720,
            validation: cfg!(debug_assertions),
        }
    }
}

/// The presentation and rendering engine for one surface.
pub struct Renderer {
    ctx: DeviceContext,
    surface: SurfaceContext,
    generation: Option<SwapchainGeneration>,
    state: FrameState,
    fallback_extent: vk::Extent2D,
}

impl Renderer {
    /// Create a renderer for a window.
    pub fn from_window<W>(config: &RendererConfig, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let ctx = DeviceContextBuilder::new()
            .app_name(config.app_name.clone())
            .validation(config.validation)
            .build()?;

        // SAFETY: The context was just built and the window outlives this
        // call.
        let surface = unsafe { SurfaceContext::from_window(&ctx, window)? };

        Self::new(ctx, surface, config.width, config.height)
    }

    /// Create a renderer from an existing context and surface.
    ///
    /// `width`/`height` are the fallback extent used when the surface
    /// reports no fixed extent.
    pub fn new(
        ctx: DeviceContext,
        surface: SurfaceContext,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let fallback_extent = vk::Extent2D { width, height };

        // SAFETY: Context and surface are valid; nothing references the
        // surface yet.
        let generation = unsafe { SwapchainGeneration::create(&ctx, &surface, fallback_extent) };
        let generation = match generation {
            Ok(generation) => generation,
            Err(e) => {
                // SAFETY: No generation holds the surface.
                unsafe { surface.destroy() };
                return Err(e);
            }
        };

        Ok(Self {
            ctx,
            surface,
            generation: Some(generation),
            state: FrameState::Idle,
            fallback_extent,
        })
    }

    /// Get the device context.
    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    /// The current swapchain extent, when a generation exists.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.generation.as_ref().map(SwapchainGeneration::extent)
    }

    /// Rebuild the swapchain generation for a new surface size.
    ///
    /// Waits for the device to go idle, destroys the old generation as a
    /// unit, and installs a new one. On failure no generation is installed
    /// and subsequent draw calls fail until a resize succeeds. Pipelines
    /// survive: the rebuilt render pass is compatible because the surface
    /// format does not change across resizes.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if !self.state.is_idle() {
            return Err(GpuError::InvalidState(
                "resize while a frame is in flight".to_string(),
            ));
        }

        self.ctx.wait_idle()?;

        if let Some(mut generation) = self.generation.take() {
            // SAFETY: The device is idle and the frame state is Idle.
            unsafe { generation.destroy(&self.ctx, &self.surface) };
        }

        self.fallback_extent = vk::Extent2D { width, height };

        // SAFETY: The old generation is gone; the surface is free.
        let generation =
            unsafe { SwapchainGeneration::create(&self.ctx, &self.surface, self.fallback_extent)? };

        tracing::info!("Swapchain generation rebuilt at {}x{}", width, height);
        self.generation = Some(generation);
        Ok(())
    }

    /// Create a shader pair from SPIR-V words.
    pub fn create_shader(
        &self,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
        texture_count: u32,
    ) -> Result<Shader> {
        // SAFETY: The device is valid; SPIR-V validity is the caller's
        // contract with the shader toolchain.
        unsafe { Shader::new(self.ctx.device(), vertex_spirv, fragment_spirv, texture_count) }
    }

    /// Build one pipeline per shader against the current render pass,
    /// destroying the shader modules afterwards.
    pub fn create_pipelines(&self, shaders: Vec<Shader>) -> Result<Vec<Pipeline>> {
        let generation = self.generation()?;
        // SAFETY: Device, render pass, and shader modules are valid.
        unsafe { pipeline::create_pipelines(self.ctx.device(), generation.render_pass, shaders) }
    }

    /// Create a shape from raw vertex floats (8 per vertex).
    pub fn create_shape(&self, pipeline: &Pipeline, vertices: &[f32]) -> Result<Shape> {
        // SAFETY: Context and pipeline are valid.
        unsafe { Shape::new(&self.ctx, pipeline, vertices) }
    }

    /// Upload RGB pixels into a new texture.
    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        rgb_pixels: &[u8],
        mode: AlphaMode,
    ) -> Result<Texture> {
        // SAFETY: The context is valid.
        unsafe { Texture::new(&self.ctx, width, height, rgb_pixels, mode) }
    }

    /// Re-upload pixels into an existing texture.
    pub fn update_texture(
        &self,
        texture: &mut Texture,
        rgb_pixels: &[u8],
        mode: AlphaMode,
    ) -> Result<()> {
        if !self.state.is_idle() {
            return Err(GpuError::InvalidState(
                "texture update while a frame is in flight".to_string(),
            ));
        }
        // SAFETY: The context is valid and no frame is in flight.
        unsafe { texture.update(&self.ctx, rgb_pixels, mode) }
    }

    /// Create a per-draw instance bound to a pipeline and optionally a
    /// texture.
    pub fn create_instance(
        &self,
        pipeline: &Pipeline,
        texture: Option<&Texture>,
    ) -> Result<Instance> {
        // SAFETY: Context, pipeline, and texture are valid.
        unsafe { Instance::new(&self.ctx, pipeline, texture) }
    }

    /// Point an instance's texture binding at a different texture.
    pub fn update_instance_texture(&self, instance: &Instance, texture: &Texture) -> Result<()> {
        if !self.state.is_idle() {
            return Err(GpuError::InvalidState(
                "descriptor update while a frame is in flight".to_string(),
            ));
        }
        // SAFETY: Device and texture are valid and no frame is in flight.
        unsafe { instance.set_texture(self.ctx.device(), texture) };
        Ok(())
    }

    /// Write an instance's transform matrix.
    pub fn set_matrix(&self, instance: &Instance, matrix: &[f32; 16]) -> Result<()> {
        // SAFETY: The device is valid; the blocking frame design guarantees
        // the previous frame finished reading the buffer.
        unsafe { instance.set_matrix(self.ctx.device(), matrix) }
    }

    /// Begin a frame: acquire a swapchain image and start recording.
    ///
    /// When acquisition fails the frame is skipped: nothing is recorded,
    /// `draw_shape` becomes a no-op, and `draw_update` returns without
    /// presenting. The caller is expected to `resize` afterwards.
    pub fn draw_begin(&mut self, clear_color: [f32; 3]) -> Result<()> {
        if !self.state.is_idle() {
            return Err(GpuError::InvalidState(
                "draw_begin while a frame is already in flight".to_string(),
            ));
        }
        let generation = self
            .generation
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("no swapchain generation".to_string()))?;

        let device = self.ctx.device();
        let cmd = self.ctx.command_buffer();

        // SAFETY: The device is valid.
        let semaphores = unsafe { FrameSemaphores::new(device)? };

        // SAFETY: Swapchain and semaphore are valid.
        let acquired = unsafe {
            self.surface.swapchain_loader.acquire_next_image(
                generation.swapchain.handle,
                u64::MAX,
                semaphores.acquire,
                vk::Fence::null(),
            )
        };

        let image_index = match acquired {
            Ok((index, _suboptimal)) => index,
            Err(result) => {
                tracing::debug!("Image acquisition failed ({result}); skipping frame");
                self.state = FrameState::after_acquire(None, semaphores);
                return Ok(());
            }
        };

        let extent = generation.extent();
        // SAFETY: The command buffer is reset; the acquired image is in
        // PRESENT_SRC as tracked.
        unsafe {
            if let Err(e) = begin_command_buffer(device, cmd) {
                semaphores.destroy(device);
                return Err(e);
            }

            generation.swapchain.images[image_index as usize].transition_to(
                device,
                cmd,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
            );

            let clear_values = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [clear_color[0], clear_color[1], clear_color[2], 1.0],
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(generation.render_pass)
                .framebuffer(generation.framebuffers[image_index as usize])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }],
            );
        }

        self.state = FrameState::after_acquire(Some(image_index), semaphores);
        Ok(())
    }

    /// Record one draw: bind the shape's vertex buffer and pipeline, the
    /// instance's descriptor set, and issue the draw call.
    ///
    /// A no-op when the frame was skipped at acquisition.
    pub fn draw_shape(&mut self, shape: &Shape, instance: &Instance) -> Result<()> {
        match &self.state {
            FrameState::Recording { .. } => {
                let device = self.ctx.device();
                let cmd = self.ctx.command_buffer();
                // SAFETY: The command buffer is recording inside the render
                // pass; shape and instance are valid.
                unsafe {
                    device.cmd_bind_vertex_buffers(cmd, 0, &[shape.vertex_buffer], &[0]);
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, shape.pipeline);
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        shape.pipeline_layout,
                        0,
                        &[instance.descriptor_set],
                        &[],
                    );
                    device.cmd_draw(cmd, shape.vertex_count, 1, 0, 0);
                }
                Ok(())
            }
            FrameState::Skipped { .. } => Ok(()),
            FrameState::Idle => Err(GpuError::InvalidState(
                "draw_shape outside a frame".to_string(),
            )),
        }
    }

    /// End the frame: submit, present, and block until the GPU is idle.
    ///
    /// Returns `false` when the frame was skipped at acquisition (the
    /// per-frame semaphores are still released), `true` when it was
    /// presented.
    pub fn draw_update(&mut self) -> Result<bool> {
        match std::mem::replace(&mut self.state, FrameState::Idle) {
            FrameState::Idle => Err(GpuError::InvalidState(
                "draw_update without draw_begin".to_string(),
            )),
            FrameState::Skipped { semaphores } => {
                // SAFETY: Nothing was submitted; the semaphores are unused
                // apart from the failed acquire.
                unsafe { semaphores.destroy(self.ctx.device()) };
                Ok(false)
            }
            FrameState::Recording {
                image_index,
                semaphores,
            } => {
                let result = self.submit_and_present(image_index, &semaphores);
                // SAFETY: Submission completed or failed; either way the
                // device-side waits are done before we get here.
                unsafe { semaphores.destroy(self.ctx.device()) };
                result.map(|()| true)
            }
        }
    }

    /// Destroy a shape once no frame references it.
    pub fn destroy_shape(&self, shape: Shape) -> Result<()> {
        self.ensure_idle("shape destruction")?;
        // SAFETY: The frame state is Idle and the blocking frame design
        // means the GPU finished with the buffer.
        unsafe { shape.destroy(self.ctx.device()) };
        Ok(())
    }

    /// Destroy an instance once no frame references it.
    pub fn destroy_instance(&self, instance: Instance) -> Result<()> {
        self.ensure_idle("instance destruction")?;
        // SAFETY: As for destroy_shape.
        unsafe { instance.destroy(self.ctx.device()) };
        Ok(())
    }

    /// Destroy a texture once no frame references it.
    pub fn destroy_texture(&self, texture: Texture) -> Result<()> {
        self.ensure_idle("texture destruction")?;
        // SAFETY: As for destroy_shape.
        unsafe { texture.destroy(self.ctx.device()) };
        Ok(())
    }

    /// Destroy a pipeline. The caller must have destroyed every shape and
    /// instance that referenced it first.
    pub fn destroy_pipeline(&self, pipeline: Pipeline) -> Result<()> {
        self.ensure_idle("pipeline destruction")?;
        // SAFETY: As for destroy_shape.
        unsafe { pipeline.destroy(self.ctx.device()) };
        Ok(())
    }

    fn ensure_idle(&self, what: &str) -> Result<()> {
        if self.state.is_idle() {
            Ok(())
        } else {
            Err(GpuError::InvalidState(format!(
                "{what} while a frame is in flight"
            )))
        }
    }

    fn generation(&self) -> Result<&SwapchainGeneration> {
        self.generation
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("no swapchain generation".to_string()))
    }

    fn submit_and_present(&mut self, image_index: u32, semaphores: &FrameSemaphores) -> Result<()> {
        let generation = self
            .generation
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("no swapchain generation".to_string()))?;
        let device = self.ctx.device();
        let cmd = self.ctx.command_buffer();

        // SAFETY: The command buffer is recording inside the render pass
        // begun by draw_begin; the tracked image layout is
        // COLOR_ATTACHMENT_OPTIMAL.
        unsafe {
            device.cmd_end_render_pass(cmd);

            generation.swapchain.images[image_index as usize].transition_to(
                device,
                cmd,
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            );

            end_command_buffer(device, cmd)?;

            let fence = create_fence(device, false)?;
            let wait_stages = [vk::PipelineStageFlags::BOTTOM_OF_PIPE];
            let mut submitted = submit_command_buffers(
                device,
                self.ctx.queue(),
                &[cmd],
                std::slice::from_ref(&semaphores.acquire),
                &wait_stages,
                std::slice::from_ref(&semaphores.render_complete),
                fence,
            );
            if submitted.is_ok() {
                submitted = device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(GpuError::from);
            }
            device.destroy_fence(fence, None);
            let reset = device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty());
            submitted?;
            reset?;

            let swapchains = [generation.swapchain.handle];
            let image_indices = [image_index];
            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(std::slice::from_ref(&semaphores.render_complete))
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            match self
                .surface
                .swapchain_loader
                .queue_present(self.ctx.queue(), &present_info)
            {
                Ok(_suboptimal) => {}
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    tracing::debug!("Swapchain out of date at present; caller should resize");
                }
                Err(e) => return Err(e.into()),
            }

            device.device_wait_idle()?;
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.ctx.wait_idle();
        let device = self.ctx.device();

        // Release any in-flight frame semaphores
        match std::mem::replace(&mut self.state, FrameState::Idle) {
            FrameState::Recording { semaphores, .. } | FrameState::Skipped { semaphores } => {
                // SAFETY: The device is idle.
                unsafe { semaphores.destroy(device) };
            }
            FrameState::Idle => {}
        }

        if let Some(mut generation) = self.generation.take() {
            // SAFETY: The device is idle and nothing references the
            // generation.
            unsafe { generation.destroy(&self.ctx, &self.surface) };
        }

        // SAFETY: The generation holding the surface is gone. The context
        // (device, instance) is dropped after this body runs.
        unsafe { self.surface.destroy() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_documented_values() {
        let config = RendererConfig::default();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.app_name, "Vitral");
    }
}
