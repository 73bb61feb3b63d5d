//! The device capability set the frame graph is built on
//!
//! Everything the frame graph needs from the native API goes through
//! [`GpuDevice`]: object creation, command recording, submission and the
//! swapchain. Implementations use interior mutability so a single device can
//! be shared behind an `Arc` by the graph and by pass callbacks.

use std::any::Any;
use std::time::Duration;

use crate::backend::types::*;
use crate::error::GraphicsResult;

/// Device, queue, command-buffer and swapchain operations used by the frame graph
pub trait GpuDevice: Send + Sync + 'static {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Allow pass callbacks to downcast to the concrete device
    fn as_any(&self) -> &dyn Any;

    // Objects

    fn create_image(&self, desc: &ImageDescriptor) -> GraphicsResult<ImageHandle>;

    fn destroy_image(&self, image: ImageHandle);

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> GraphicsResult<RenderPassHandle>;

    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    fn create_render_target(
        &self,
        desc: &RenderTargetDescriptor,
    ) -> GraphicsResult<RenderTargetHandle>;

    fn destroy_render_target(&self, render_target: RenderTargetHandle);

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle>;

    /// Block until the fence is signaled; `None` waits forever
    fn wait_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> GraphicsResult<()>;

    fn reset_fence(&self, fence: FenceHandle) -> GraphicsResult<()>;

    fn destroy_fence(&self, fence: FenceHandle);

    // Queue and command buffers

    /// Allocate a primary command buffer from the render queue
    fn allocate_command_buffer(&self) -> GraphicsResult<CommandBufferHandle>;

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle);

    /// Begin recording; previously recorded contents are discarded
    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()>;

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()>;

    /// Submit to the render queue, optionally signaling a fence on completion
    fn submit(
        &self,
        command_buffer: CommandBufferHandle,
        signal: Option<FenceHandle>,
    ) -> GraphicsResult<()>;

    /// Block until the device has finished all submitted work
    fn wait_idle(&self) -> GraphicsResult<()>;

    // Recording
    //
    // An unknown handle fails the call; the command buffer must then be
    // ended and not submitted.

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: CommandBufferHandle,
        barriers: &[ImageBarrier],
    ) -> GraphicsResult<()>;

    fn cmd_begin_render_pass(
        &self,
        command_buffer: CommandBufferHandle,
        begin: &RenderPassBegin<'_>,
    ) -> GraphicsResult<()>;

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()>;

    fn cmd_blit_image(
        &self,
        command_buffer: CommandBufferHandle,
        region: &BlitRegion,
    ) -> GraphicsResult<()>;

    // Swapchain

    /// Acquire the next presentable image; `fence` is signaled once it is usable
    fn acquire_next_image(&self, fence: FenceHandle) -> GraphicsResult<AcquiredImage>;

    fn present(&self, image_index: u32) -> GraphicsResult<()>;

    fn swapchain_extent(&self) -> Extent2d;

    fn swapchain_format(&self) -> TextureFormat;

    fn swapchain_image_count(&self) -> u32;

    fn swapchain_image(&self, index: u32) -> Option<ImageHandle>;

    /// Rebuild the swapchain; `extent` is used when the surface leaves the size to us
    fn recreate_swapchain(&self, extent: Extent2d) -> GraphicsResult<()>;
}
