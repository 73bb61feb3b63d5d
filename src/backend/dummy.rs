//! Dummy device for testing and development.
//!
//! This device doesn't talk to a GPU. It hands out handles, keeps track of
//! which objects are alive, and appends every recorded or queue-level
//! operation to a command log that tests can inspect.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::traits::GpuDevice;
use crate::backend::types::*;
use crate::error::{GraphicsError, GraphicsResult};

/// One operation observed by the [`DummyDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginCommandBuffer(CommandBufferHandle),
    EndCommandBuffer(CommandBufferHandle),
    PipelineBarrier {
        command_buffer: CommandBufferHandle,
        barriers: Vec<ImageBarrier>,
    },
    BeginRenderPass {
        command_buffer: CommandBufferHandle,
        render_pass: RenderPassHandle,
        render_target: RenderTargetHandle,
        clear_values: Vec<ClearValue>,
    },
    EndRenderPass(CommandBufferHandle),
    BlitImage {
        command_buffer: CommandBufferHandle,
        region: BlitRegion,
    },
    Submit {
        command_buffer: CommandBufferHandle,
        signal: Option<FenceHandle>,
    },
    AcquireImage {
        index: u32,
    },
    WaitFence(FenceHandle),
    Present {
        index: u32,
    },
    RecreateSwapchain(Extent2d),
}

#[derive(Debug)]
struct DummyState {
    extent: Extent2d,
    format: TextureFormat,
    swapchain_images: Vec<ImageHandle>,
    next_swapchain_image: u32,
    outdated_on_acquire: bool,
    /// Submits still to let through, then the error the next one fails with
    failing_submit: Option<(usize, GraphicsError)>,
    images: HashMap<u64, ImageDescriptor>,
    render_passes: HashMap<u64, RenderPassDescriptor>,
    render_targets: HashMap<u64, RenderTargetDescriptor>,
    command_buffers: HashSet<u64>,
    recording: HashSet<u64>,
    fences: HashMap<u64, bool>,
    commands: Vec<RecordedCommand>,
}

impl DummyState {
    fn check_recording(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        if self.recording.contains(&command_buffer.0) {
            Ok(())
        } else {
            Err(GraphicsError::RecordingFailed(format!(
                "command buffer {} is not recording",
                command_buffer.0
            )))
        }
    }

    /// Resource images and swapchain images are both valid barrier and blit targets.
    fn check_image(&self, image: ImageHandle) -> GraphicsResult<()> {
        if self.images.contains_key(&image.0) || self.swapchain_images.contains(&image) {
            Ok(())
        } else {
            Err(GraphicsError::InvalidHandle {
                kind: "image",
                id: image.0,
            })
        }
    }
}

/// Dummy GPU device.
#[derive(Debug)]
pub struct DummyDevice {
    state: Mutex<DummyState>,
    next_id: AtomicU64,
}

impl DummyDevice {
    /// Create a dummy device with a three-image swapchain of the given size.
    pub fn new(extent: Extent2d) -> Self {
        Self::with_image_count(extent, 3)
    }

    pub fn with_image_count(extent: Extent2d, image_count: u32) -> Self {
        let next_id = AtomicU64::new(1);
        let swapchain_images = (0..image_count)
            .map(|_| ImageHandle(next_id.fetch_add(1, Ordering::Relaxed)))
            .collect();

        Self {
            state: Mutex::new(DummyState {
                extent,
                format: TextureFormat::Bgra8UnormSrgb,
                swapchain_images,
                next_swapchain_image: 0,
                outdated_on_acquire: false,
                failing_submit: None,
                images: HashMap::new(),
                render_passes: HashMap::new(),
                render_targets: HashMap::new(),
                command_buffers: HashSet::new(),
                recording: HashSet::new(),
                fences: HashMap::new(),
                commands: Vec::new(),
            }),
            next_id,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Snapshot of everything recorded so far.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state.lock().commands.clone()
    }

    /// Count recorded commands matching a predicate.
    pub fn count_commands(&self, predicate: impl Fn(&RecordedCommand) -> bool) -> usize {
        self.state.lock().commands.iter().filter(|c| predicate(c)).count()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Make the next `acquire_next_image` report an out-of-date surface.
    pub fn mark_surface_outdated(&self) {
        self.state.lock().outdated_on_acquire = true;
    }

    /// Let `skip` submits through, then fail the next one with `error`.
    ///
    /// The failing submit records nothing and signals no fence.
    pub fn fail_submit_after(&self, skip: usize, error: GraphicsError) {
        self.state.lock().failing_submit = Some((skip, error));
    }

    /// Change the surface size; takes effect on the next swapchain recreation.
    pub fn set_surface_extent(&self, extent: Extent2d) {
        self.state.lock().extent = extent;
    }

    pub fn image_descriptor(&self, image: ImageHandle) -> Option<ImageDescriptor> {
        self.state.lock().images.get(&image.0).cloned()
    }

    pub fn render_pass_descriptor(
        &self,
        render_pass: RenderPassHandle,
    ) -> Option<RenderPassDescriptor> {
        self.state.lock().render_passes.get(&render_pass.0).cloned()
    }

    pub fn render_target_descriptor(
        &self,
        render_target: RenderTargetHandle,
    ) -> Option<RenderTargetDescriptor> {
        self.state.lock().render_targets.get(&render_target.0).cloned()
    }

    /// Number of objects of every kind that have not been destroyed yet.
    pub fn live_object_count(&self) -> usize {
        let state = self.state.lock();
        state.images.len()
            + state.render_passes.len()
            + state.render_targets.len()
            + state.command_buffers.len()
            + state.fences.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.state.lock().images.len()
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new(Extent2d::new(1280, 720))
    }
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn create_image(&self, desc: &ImageDescriptor) -> GraphicsResult<ImageHandle> {
        if desc.extent.is_empty() || desc.mip_levels == 0 {
            return Err(GraphicsError::ResourceCreationFailed {
                kind: "image",
                reason: format!("degenerate image {:?}", desc),
            });
        }
        log::trace!(
            "DummyDevice: creating image {:?} ({}x{}, {:?}, {:?})",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.usage
        );
        let id = self.next_id();
        self.state.lock().images.insert(id, desc.clone());
        Ok(ImageHandle(id))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.state.lock().images.remove(&image.0);
    }

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> GraphicsResult<RenderPassHandle> {
        log::trace!(
            "DummyDevice: creating render pass {:?} with {} attachments",
            desc.label,
            desc.attachments.len()
        );
        let id = self.next_id();
        self.state.lock().render_passes.insert(id, desc.clone());
        Ok(RenderPassHandle(id))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.state.lock().render_passes.remove(&render_pass.0);
    }

    fn create_render_target(
        &self,
        desc: &RenderTargetDescriptor,
    ) -> GraphicsResult<RenderTargetHandle> {
        let mut state = self.state.lock();
        let pass = state
            .render_passes
            .get(&desc.render_pass.0)
            .ok_or(GraphicsError::InvalidHandle {
                kind: "render pass",
                id: desc.render_pass.0,
            })?;
        if pass.attachments.len() != desc.attachments.len() {
            return Err(GraphicsError::ResourceCreationFailed {
                kind: "render target",
                reason: format!(
                    "render pass has {} attachments, {} images given",
                    pass.attachments.len(),
                    desc.attachments.len()
                ),
            });
        }
        for image in &desc.attachments {
            if !state.images.contains_key(&image.0) {
                return Err(GraphicsError::InvalidHandle {
                    kind: "image",
                    id: image.0,
                });
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.render_targets.insert(id, desc.clone());
        Ok(RenderTargetHandle(id))
    }

    fn destroy_render_target(&self, render_target: RenderTargetHandle) {
        self.state.lock().render_targets.remove(&render_target.0);
    }

    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle> {
        let id = self.next_id();
        self.state.lock().fences.insert(id, signaled);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&self, fence: FenceHandle, _timeout: Option<Duration>) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        match state.fences.get(&fence.0) {
            Some(true) => {
                state.commands.push(RecordedCommand::WaitFence(fence));
                Ok(())
            }
            // Nothing will ever signal it: a real device would hang here
            Some(false) => Err(GraphicsError::Timeout),
            None => Err(GraphicsError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            }),
        }
    }

    fn reset_fence(&self, fence: FenceHandle) -> GraphicsResult<()> {
        match self.state.lock().fences.get_mut(&fence.0) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(GraphicsError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            }),
        }
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.state.lock().fences.remove(&fence.0);
    }

    fn allocate_command_buffer(&self) -> GraphicsResult<CommandBufferHandle> {
        let id = self.next_id();
        self.state.lock().command_buffers.insert(id);
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle) {
        let mut state = self.state.lock();
        state.command_buffers.remove(&command_buffer.0);
        state.recording.remove(&command_buffer.0);
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        if !state.command_buffers.contains(&command_buffer.0) {
            return Err(GraphicsError::InvalidHandle {
                kind: "command buffer",
                id: command_buffer.0,
            });
        }
        if !state.recording.insert(command_buffer.0) {
            return Err(GraphicsError::RecordingFailed(format!(
                "command buffer {} is already recording",
                command_buffer.0
            )));
        }
        state
            .commands
            .push(RecordedCommand::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        if !state.recording.remove(&command_buffer.0) {
            return Err(GraphicsError::RecordingFailed(format!(
                "command buffer {} is not recording",
                command_buffer.0
            )));
        }
        state
            .commands
            .push(RecordedCommand::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn submit(
        &self,
        command_buffer: CommandBufferHandle,
        signal: Option<FenceHandle>,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        if state.recording.contains(&command_buffer.0) {
            return Err(GraphicsError::SubmitFailed(format!(
                "command buffer {} is still recording",
                command_buffer.0
            )));
        }
        if let Some((skip, _)) = state.failing_submit.as_mut() {
            if *skip > 0 {
                *skip -= 1;
            } else if let Some((_, error)) = state.failing_submit.take() {
                return Err(error);
            }
        }
        // Work completes immediately, so the fence is signaled right away
        if let Some(fence) = signal {
            match state.fences.get_mut(&fence.0) {
                Some(signaled) => *signaled = true,
                None => {
                    return Err(GraphicsError::InvalidHandle {
                        kind: "fence",
                        id: fence.0,
                    })
                }
            }
        }
        state.commands.push(RecordedCommand::Submit {
            command_buffer,
            signal,
        });
        Ok(())
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        Ok(())
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: CommandBufferHandle,
        barriers: &[ImageBarrier],
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.check_recording(command_buffer)?;
        for barrier in barriers {
            state.check_image(barrier.image)?;
        }
        if !barriers.is_empty() {
            state.commands.push(RecordedCommand::PipelineBarrier {
                command_buffer,
                barriers: barriers.to_vec(),
            });
        }
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: CommandBufferHandle,
        begin: &RenderPassBegin<'_>,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.check_recording(command_buffer)?;
        if !state.render_passes.contains_key(&begin.render_pass.0) {
            return Err(GraphicsError::InvalidHandle {
                kind: "render pass",
                id: begin.render_pass.0,
            });
        }
        if !state.render_targets.contains_key(&begin.render_target.0) {
            return Err(GraphicsError::InvalidHandle {
                kind: "render target",
                id: begin.render_target.0,
            });
        }
        state.commands.push(RecordedCommand::BeginRenderPass {
            command_buffer,
            render_pass: begin.render_pass,
            render_target: begin.render_target,
            clear_values: begin.clear_values.to_vec(),
        });
        Ok(())
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.check_recording(command_buffer)?;
        state
            .commands
            .push(RecordedCommand::EndRenderPass(command_buffer));
        Ok(())
    }

    fn cmd_blit_image(
        &self,
        command_buffer: CommandBufferHandle,
        region: &BlitRegion,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.check_recording(command_buffer)?;
        state.check_image(region.src)?;
        state.check_image(region.dst)?;
        state.commands.push(RecordedCommand::BlitImage {
            command_buffer,
            region: *region,
        });
        Ok(())
    }

    fn acquire_next_image(&self, fence: FenceHandle) -> GraphicsResult<AcquiredImage> {
        let mut state = self.state.lock();
        if state.outdated_on_acquire {
            state.outdated_on_acquire = false;
            return Err(GraphicsError::SurfaceOutdated);
        }
        let count = state.swapchain_images.len() as u32;
        if count == 0 {
            return Err(GraphicsError::AcquireImageFailed("swapchain has no images".into()));
        }
        let index = state.next_swapchain_image;
        state.next_swapchain_image = (index + 1) % count;
        match state.fences.get_mut(&fence.0) {
            Some(signaled) => *signaled = true,
            None => {
                return Err(GraphicsError::InvalidHandle {
                    kind: "fence",
                    id: fence.0,
                })
            }
        }
        state.commands.push(RecordedCommand::AcquireImage { index });
        Ok(AcquiredImage {
            index,
            image: state.swapchain_images[index as usize],
            suboptimal: false,
        })
    }

    fn present(&self, image_index: u32) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        if image_index as usize >= state.swapchain_images.len() {
            return Err(GraphicsError::PresentFailed(format!(
                "image index {} out of range",
                image_index
            )));
        }
        state
            .commands
            .push(RecordedCommand::Present { index: image_index });
        Ok(())
    }

    fn swapchain_extent(&self) -> Extent2d {
        self.state.lock().extent
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.state.lock().format
    }

    fn swapchain_image_count(&self) -> u32 {
        self.state.lock().swapchain_images.len() as u32
    }

    fn swapchain_image(&self, index: u32) -> Option<ImageHandle> {
        self.state.lock().swapchain_images.get(index as usize).copied()
    }

    fn recreate_swapchain(&self, extent: Extent2d) -> GraphicsResult<()> {
        let count = self.swapchain_image_count();
        let images: Vec<ImageHandle> = (0..count).map(|_| ImageHandle(self.next_id())).collect();
        let mut state = self.state.lock();
        if state.extent.is_empty() {
            state.extent = extent;
        }
        state.swapchain_images = images;
        state.next_swapchain_image = 0;
        let current = state.extent;
        state
            .commands
            .push(RecordedCommand::RecreateSwapchain(current));
        log::debug!("DummyDevice: swapchain recreated at {:?}", current);
        Ok(())
    }
}
