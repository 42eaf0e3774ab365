//! Command buffer helpers and one-shot submission.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use ash::vk;

/// Timeout for one poll iteration while waiting on a transient fence.
const FENCE_POLL_TIMEOUT_NS: u64 = 1_000;

/// Begin recording a one-time-submit command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Record and submit a one-shot command buffer on the context's shared
/// command buffer, blocking on the context's submit fence.
///
/// The fence and command buffer are reset afterwards so the next one-shot
/// can reuse them. Used by swapchain-image and depth-buffer transitions.
///
/// # Safety
/// The context must be valid and its command buffer must not be recording.
pub unsafe fn one_shot_submit<F>(ctx: &DeviceContext, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let device = ctx.device();
    let cmd = ctx.command_buffer();

    begin_command_buffer(device, cmd)?;
    record(cmd);
    end_command_buffer(device, cmd)?;

    submit_command_buffers(device, ctx.queue(), &[cmd], &[], &[], &[], ctx.submit_fence())?;

    device.wait_for_fences(&[ctx.submit_fence()], true, u64::MAX)?;
    device.reset_fences(&[ctx.submit_fence()])?;
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

    Ok(())
}

/// Record and submit a one-shot command buffer, polling a transient fence
/// with a short timeout until the GPU signals it.
///
/// Used by the texture upload path.
///
/// # Safety
/// The context must be valid and its command buffer must not be recording.
pub unsafe fn one_shot_submit_polling<F>(ctx: &DeviceContext, record: F) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let device = ctx.device();
    let cmd = ctx.command_buffer();

    begin_command_buffer(device, cmd)?;
    record(cmd);
    end_command_buffer(device, cmd)?;

    let fence_info = vk::FenceCreateInfo::default();
    let fence = device.create_fence(&fence_info, None)?;

    if let Err(e) =
        submit_command_buffers(device, ctx.queue(), &[cmd], &[], &[], &[], fence)
    {
        device.destroy_fence(fence, None);
        return Err(e);
    }

    loop {
        match device.wait_for_fences(&[fence], true, FENCE_POLL_TIMEOUT_NS) {
            Ok(()) => break,
            Err(vk::Result::TIMEOUT) => continue,
            Err(e) => {
                device.destroy_fence(fence, None);
                return Err(GpuError::from(e));
            }
        }
    }

    device.destroy_fence(fence, None);
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

    Ok(())
}
