//! Render pass and framebuffer construction.

use crate::depth::DEPTH_FORMAT;
use ash::vk;
use vitral_gpu::error::{GpuError, Result};

/// Create the forward render pass: one color and one depth attachment,
/// combined into a single graphics subpass.
///
/// Both attachments keep their attachment-optimal layout across the pass;
/// the frame loop moves the color image between PRESENT_SRC and
/// COLOR_ATTACHMENT_OPTIMAL with explicit barriers.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
) -> Result<vk::RenderPass> {
    let attachments = [
        // Color buffer
        vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        // Depth buffer
        vk::AttachmentDescription::default()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
    ];

    let color_reference = vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let depth_reference = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(std::slice::from_ref(&color_reference))
        .depth_stencil_attachment(&depth_reference);

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(std::slice::from_ref(&subpass));

    let render_pass = device
        .create_render_pass(&create_info, None)
        .map_err(GpuError::from)?;

    Ok(render_pass)
}

/// Create one framebuffer per swapchain image, pairing each image's color
/// view with the single shared depth view.
///
/// Already-created framebuffers are destroyed when a later one fails.
///
/// # Safety
/// The device, render pass, and views must be valid.
pub unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    color_views: &[vk::ImageView],
    depth_view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(color_views.len());

    for &color_view in color_views {
        let attachments = [color_view, depth_view];
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match device.create_framebuffer(&create_info, None) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    device.destroy_framebuffer(framebuffer, None);
                }
                return Err(e.into());
            }
        }
    }

    Ok(framebuffers)
}
