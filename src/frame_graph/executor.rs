//! Per-frame execution

use crate::backend::traits::GpuDevice;
use crate::backend::types::*;
use crate::error::{GraphicsError, GraphicsResult};
use crate::frame_graph::graph::{CompiledPass, CompiledResource, FrameGraph};
use crate::frame_graph::pass::PassContext;

impl<S> FrameGraph<S> {
    /// Record, submit and present one frame.
    ///
    /// Passes run in declaration order, each on its own command buffer. Every
    /// attachment gets a full-pipeline barrier into the pass's starting
    /// layout before the render pass begins. The resource linked to the
    /// swapchain sink is then blitted into the acquired image and presented.
    ///
    /// Tracked layouts only change once a submit succeeds, and an acquired
    /// swapchain image is presented even when the frame fails, so the graph
    /// can keep executing after an error.
    ///
    /// On [`GraphicsError::SurfaceOutdated`] the device's swapchain is
    /// recreated before the error is returned; the caller should rebuild and
    /// recompile the graph for the new extent.
    pub fn execute(&mut self, scene: &S) -> GraphicsResult<()> {
        let acquired = match self.acquire() {
            Ok(acquired) => acquired,
            Err(GraphicsError::SurfaceOutdated) => return self.surface_outdated(),
            Err(e) => return Err(e),
        };
        if acquired.suboptimal {
            log::debug!(
                "[{}] Swapchain image {} is suboptimal",
                self.config.label,
                acquired.index
            );
        }

        if let Err(e) = self.record_passes(scene) {
            self.release_image(acquired);
            return Err(e);
        }

        match self.blit_and_present(acquired) {
            Ok(()) => {
                self.frame_index += 1;
                Ok(())
            }
            Err(GraphicsError::SurfaceOutdated) => self.surface_outdated(),
            Err(e) => Err(e),
        }
    }

    fn acquire(&self) -> GraphicsResult<AcquiredImage> {
        let device = self.device.as_ref();
        let fence = self.sync.acquire_fence;

        let acquired = device.acquire_next_image(fence)?;
        device.wait_fence(fence, None)?;
        device.reset_fence(fence)?;

        log::trace!(
            "[{}] Frame {}: acquired swapchain image {}",
            self.config.label,
            self.frame_index,
            acquired.index
        );
        Ok(acquired)
    }

    fn record_passes(&mut self, scene: &S) -> GraphicsResult<()> {
        let device = self.device.as_ref();
        for pass in self.passes.iter_mut() {
            record_pass(device, pass, &mut self.resources, scene)?;
        }
        Ok(())
    }

    fn blit_and_present(&mut self, acquired: AcquiredImage) -> GraphicsResult<()> {
        let device = self.device.as_ref();
        let command_buffer = self.sync.blit_command_buffer;
        let fence = self.sync.present_fence;
        let source = &self.resources[self.final_resource];
        let region = BlitRegion {
            src: source.image,
            src_extent: source.extent,
            dst: acquired.image,
            dst_extent: device.swapchain_extent(),
            filter: self.config.blit_filter,
        };

        let submitted = device
            .begin_command_buffer(command_buffer)
            .and_then(|()| {
                let recorded = record_blit(device, command_buffer, source.current_layout, &region);
                let ended = device.end_command_buffer(command_buffer);
                recorded.and(ended)
            })
            .and_then(|()| device.submit(command_buffer, Some(fence)));
        if let Err(e) = submitted {
            self.release_image(acquired);
            return Err(e);
        }
        self.resources[self.final_resource].current_layout = ImageLayout::TransferSrc;

        // Submitted work already moves the image to PresentSrc; present it
        // whatever the wait reports
        let waited = device
            .wait_fence(fence, None)
            .and_then(|()| device.reset_fence(fence));
        let presented = device.present(acquired.index);
        waited.and(presented)
    }

    /// Present an acquired image untouched so a failed frame does not hold on to it.
    fn release_image(&self, acquired: AcquiredImage) {
        if let Err(e) = self.present_untouched(acquired) {
            log::warn!(
                "[{}] Could not release swapchain image {}: {}",
                self.config.label,
                acquired.index,
                e
            );
        }
    }

    fn present_untouched(&self, acquired: AcquiredImage) -> GraphicsResult<()> {
        let device = self.device.as_ref();
        let command_buffer = self.sync.blit_command_buffer;
        let fence = self.sync.present_fence;

        device.begin_command_buffer(command_buffer)?;
        let recorded = device.cmd_pipeline_barrier(
            command_buffer,
            &[ImageBarrier::coarse(
                acquired.image,
                ImageLayout::Undefined,
                ImageLayout::PresentSrc,
            )],
        );
        let ended = device.end_command_buffer(command_buffer);
        recorded.and(ended)?;

        device.submit(command_buffer, Some(fence))?;
        device.wait_fence(fence, None)?;
        device.reset_fence(fence)?;
        device.present(acquired.index)
    }

    fn surface_outdated(&self) -> GraphicsResult<()> {
        log::info!(
            "[{}] Surface out of date, recreating swapchain",
            self.config.label
        );
        self.device.recreate_swapchain(self.extent)?;
        Err(GraphicsError::SurfaceOutdated)
    }
}

fn record_blit(
    device: &dyn GpuDevice,
    command_buffer: CommandBufferHandle,
    source_layout: ImageLayout,
    region: &BlitRegion,
) -> GraphicsResult<()> {
    device.cmd_pipeline_barrier(
        command_buffer,
        &[
            ImageBarrier::coarse(region.src, source_layout, ImageLayout::TransferSrc),
            ImageBarrier::coarse(region.dst, ImageLayout::Undefined, ImageLayout::TransferDst),
        ],
    )?;
    device.cmd_blit_image(command_buffer, region)?;
    device.cmd_pipeline_barrier(
        command_buffer,
        &[ImageBarrier::coarse(
            region.dst,
            ImageLayout::TransferDst,
            ImageLayout::PresentSrc,
        )],
    )
}

fn record_pass<S>(
    device: &dyn GpuDevice,
    pass: &mut CompiledPass<S>,
    resources: &mut [CompiledResource],
    scene: &S,
) -> GraphicsResult<()> {
    let command_buffer = pass.command_buffer;

    // Emitted even when the layout already matches: it is also the
    // dependency on whatever the previous pass wrote
    let barriers: Vec<ImageBarrier> = pass
        .attachments
        .iter()
        .map(|&(resource, layout)| {
            let resource = &resources[resource];
            ImageBarrier::coarse(resource.image, resource.current_layout, layout)
        })
        .collect();

    device.begin_command_buffer(command_buffer)?;
    let recorded = record_commands(device, pass, &barriers, scene);
    let ended = device.end_command_buffer(command_buffer);
    recorded.and(ended)?;

    log::trace!("Submitting pass '{}'", pass.name);
    device.submit(command_buffer, None)?;

    for &(resource, layout) in &pass.attachments {
        resources[resource].current_layout = layout;
    }
    Ok(())
}

fn record_commands<S>(
    device: &dyn GpuDevice,
    pass: &mut CompiledPass<S>,
    barriers: &[ImageBarrier],
    scene: &S,
) -> GraphicsResult<()> {
    let command_buffer = pass.command_buffer;
    device.cmd_pipeline_barrier(command_buffer, barriers)?;
    device.cmd_begin_render_pass(
        command_buffer,
        &RenderPassBegin {
            render_pass: pass.render_pass,
            render_target: pass.render_target,
            extent: pass.extent,
            clear_values: &pass.clear_values,
        },
    )?;
    if let Some(record) = pass.record.as_mut() {
        let mut ctx = PassContext {
            device,
            command_buffer,
            render_pass: pass.render_pass,
            render_target: pass.render_target,
            extent: pass.extent,
            pass_name: &pass.name,
        };
        record(&mut ctx, scene);
    }
    device.cmd_end_render_pass(command_buffer)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::dummy::{DummyDevice, RecordedCommand};
    use crate::frame_graph::pass::{Drain, PassDesc, Source};
    use crate::frame_graph::resource::ResourceDesc;
    use crate::frame_graph::scheme::FrameGraphScheme;

    fn two_pass_graph(device: Arc<DummyDevice>) -> FrameGraph<()> {
        let mut scheme = FrameGraphScheme::new();
        scheme
            .add_resource("Color", ResourceDesc::new(TextureFormat::Rgba8Unorm))
            .add_resource("Depth", ResourceDesc::new(TextureFormat::Depth32Float))
            .add_pass(
                "Scene",
                PassDesc::new()
                    .with_drain(Drain::color("Color"))
                    .with_drain(Drain::depth_stencil("Depth"))
                    .with_source(Source::new("Color")),
            )
            .add_pass(
                "Post",
                PassDesc::new()
                    .with_drain(Drain::color("Color").with_load_op(LoadOp::Load))
                    .with_source(Source::new("Color")),
            )
            .add_link("$.Color", "Scene.Color")
            .add_link("$.Depth", "Scene.Depth")
            .add_link("Scene.Color", "Post.Color")
            .add_link("Post.Color", "$.BLIT_TO_SWAPCHAIN");
        scheme.compile(device).unwrap()
    }

    fn barriers(device: &DummyDevice) -> Vec<Vec<ImageBarrier>> {
        device
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCommand::PipelineBarrier { barriers, .. } => Some(barriers),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_layout_tracking_across_frames() {
        let device = Arc::new(DummyDevice::default());
        let mut graph = two_pass_graph(device.clone());
        let color = graph.resource_image("Color").unwrap();

        graph.execute(&()).unwrap();
        let first = barriers(&device);
        // Scene, Post, blit in, blit out
        assert_eq!(first.len(), 4);
        assert_eq!(first[0][0].old_layout, ImageLayout::Undefined);
        assert_eq!(first[0][0].new_layout, ImageLayout::ColorAttachment);
        assert_eq!(first[0][1].new_layout, ImageLayout::DepthStencilAttachment);
        // Same layout, barrier still emitted
        assert_eq!(first[1][0].old_layout, ImageLayout::ColorAttachment);
        assert_eq!(first[1][0].new_layout, ImageLayout::ColorAttachment);
        assert_eq!(first[2][0].image, color);
        assert_eq!(first[2][0].new_layout, ImageLayout::TransferSrc);
        assert_eq!(first[2][1].new_layout, ImageLayout::TransferDst);
        assert_eq!(first[3][0].new_layout, ImageLayout::PresentSrc);
        assert_eq!(graph.current_layout("Color"), Some(ImageLayout::TransferSrc));
        assert_eq!(
            graph.current_layout("Depth"),
            Some(ImageLayout::DepthStencilAttachment)
        );

        device.clear_commands();
        graph.execute(&()).unwrap();
        let second = barriers(&device);
        assert_eq!(second[0][0].old_layout, ImageLayout::TransferSrc);
        assert_eq!(second[0][1].old_layout, ImageLayout::DepthStencilAttachment);
        assert_eq!(graph.frame_index(), 2);
    }

    #[test]
    fn test_frame_command_order() {
        let device = Arc::new(DummyDevice::default());
        let mut graph = two_pass_graph(device.clone());
        graph.execute(&()).unwrap();

        let commands = device.commands();
        assert!(matches!(commands[0], RecordedCommand::AcquireImage { index: 0 }));
        assert!(matches!(commands[1], RecordedCommand::WaitFence(_)));
        assert!(matches!(
            commands.last(),
            Some(RecordedCommand::Present { index: 0 })
        ));

        let submits: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Submit { signal, .. } => Some(signal.is_some()),
                _ => None,
            })
            .collect();
        // Passes submit without a fence; only the blit signals one
        assert_eq!(submits, vec![false, false, true]);
    }

    #[test]
    fn test_failed_submit_keeps_layouts_and_releases_image() {
        let device = Arc::new(DummyDevice::default());
        let mut graph = two_pass_graph(device.clone());
        let target = device.swapchain_image(0).unwrap();
        device.fail_submit_after(0, GraphicsError::DeviceLost);

        assert_eq!(graph.execute(&()), Err(GraphicsError::DeviceLost));
        assert_eq!(graph.current_layout("Color"), Some(ImageLayout::Undefined));
        assert_eq!(graph.current_layout("Depth"), Some(ImageLayout::Undefined));
        assert_eq!(graph.frame_index(), 0);

        // The acquired image went back to the swapchain untouched
        assert_eq!(
            device.count_commands(|c| matches!(c, RecordedCommand::Present { index: 0 })),
            1
        );
        let released = barriers(&device).pop().unwrap();
        assert_eq!(
            released,
            vec![ImageBarrier::coarse(
                target,
                ImageLayout::Undefined,
                ImageLayout::PresentSrc
            )]
        );

        device.clear_commands();
        graph.execute(&()).unwrap();
        let next = barriers(&device);
        assert_eq!(next[0][0].old_layout, ImageLayout::Undefined);
        assert_eq!(next[0][1].old_layout, ImageLayout::Undefined);
        assert_eq!(graph.frame_index(), 1);
    }

    #[test]
    fn test_outdated_surface_recreates_swapchain() {
        let device = Arc::new(DummyDevice::default());
        let mut graph = two_pass_graph(device.clone());
        device.mark_surface_outdated();

        assert_eq!(graph.execute(&()), Err(GraphicsError::SurfaceOutdated));
        assert_eq!(
            device.count_commands(|c| matches!(c, RecordedCommand::RecreateSwapchain(_))),
            1
        );
        assert_eq!(device.count_commands(|c| matches!(c, RecordedCommand::Submit { .. })), 0);
        assert_eq!(graph.frame_index(), 0);

        // The next frame works again
        assert!(graph.execute(&()).is_ok());
    }
}
