//! Compiled frame graph
//!
//! Owns every device object it creates: resource images, one render pass,
//! render target and command buffer per pass, plus the blit command buffer
//! and the two per-frame fences. All of them are destroyed on drop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::traits::GpuDevice;
use crate::backend::types::*;
use crate::config::FrameGraphConfig;
use crate::error::{GraphError, GraphicsResult};
use crate::frame_graph::layout::{GraphLayout, ResolvedPass};
use crate::frame_graph::pass::RecordFn;
use crate::frame_graph::resource::ResourceDesc;

/// A render pass handle stamped with the graph that owns it.
///
/// Resolve it through [`FrameGraph::resolve_render_pass`]; a reference minted
/// by another (possibly dropped) graph is rejected instead of handing out a
/// dangling native object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassRef {
    handle: RenderPassHandle,
    generation: u64,
}

impl RenderPassRef {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub(crate) struct CompiledResource {
    pub name: String,
    pub desc: ResourceDesc,
    pub usage: ImageUsage,
    pub image: ImageHandle,
    pub extent: Extent2d,
    /// Layout the image is left in by the last recorded use
    pub current_layout: ImageLayout,
}

pub(crate) struct CompiledPass<S> {
    pub name: String,
    pub render_pass: RenderPassHandle,
    pub render_target: RenderTargetHandle,
    pub command_buffer: CommandBufferHandle,
    pub extent: Extent2d,
    /// (resource index, starting layout) per attachment
    pub attachments: Vec<(usize, ImageLayout)>,
    pub clear_values: Vec<ClearValue>,
    pub record: Option<RecordFn<S>>,
}

/// Objects used once per frame outside of any pass.
pub(crate) struct FrameSync {
    pub blit_command_buffer: CommandBufferHandle,
    pub acquire_fence: FenceHandle,
    pub present_fence: FenceHandle,
}

impl FrameSync {
    fn new(device: &dyn GpuDevice) -> GraphicsResult<Self> {
        let blit_command_buffer = device.allocate_command_buffer()?;
        let acquire_fence = device.create_fence(false).map_err(|e| {
            device.free_command_buffer(blit_command_buffer);
            e
        })?;
        let present_fence = device.create_fence(false).map_err(|e| {
            device.destroy_fence(acquire_fence);
            device.free_command_buffer(blit_command_buffer);
            e
        })?;
        Ok(Self {
            blit_command_buffer,
            acquire_fence,
            present_fence,
        })
    }

    fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_fence(self.present_fence);
        device.destroy_fence(self.acquire_fence);
        device.free_command_buffer(self.blit_command_buffer);
    }
}

/// An executable frame built from a [`FrameGraphScheme`](crate::frame_graph::FrameGraphScheme).
///
/// Images are sized against the swapchain extent at compile time and never
/// resized. When the swapchain changes size, rebuild the scheme and compile
/// again (see [`is_outdated`](Self::is_outdated)).
pub struct FrameGraph<S> {
    pub(crate) device: Arc<dyn GpuDevice>,
    pub(crate) config: FrameGraphConfig,
    generation: u64,
    pub(crate) extent: Extent2d,
    link_count: usize,
    pub(crate) resources: Vec<CompiledResource>,
    pub(crate) passes: Vec<CompiledPass<S>>,
    pub(crate) final_resource: usize,
    pub(crate) sync: FrameSync,
    pub(crate) frame_index: u64,
}

impl<S> FrameGraph<S> {
    pub(crate) fn new(
        device: Arc<dyn GpuDevice>,
        layout: GraphLayout,
        records: Vec<Option<RecordFn<S>>>,
        config: FrameGraphConfig,
    ) -> GraphicsResult<Self> {
        static GENERATION: AtomicU64 = AtomicU64::new(1);

        let sync = FrameSync::new(device.as_ref())?;
        let extent = device.swapchain_extent();

        // Filled in step by step so a failure part way drops what exists
        let mut graph = Self {
            device,
            config,
            generation: GENERATION.fetch_add(1, Ordering::Relaxed),
            extent,
            link_count: layout.link_count,
            resources: Vec::with_capacity(layout.resources.len()),
            passes: Vec::with_capacity(layout.passes.len()),
            final_resource: layout.final_resource,
            sync,
            frame_index: 0,
        };

        for resource in layout.resources {
            let image_extent = resource.desc.resolve_extent(extent);
            let image = graph.device.create_image(&ImageDescriptor {
                label: Some(format!("{}/{}", graph.config.label, resource.name)),
                extent: image_extent,
                mip_levels: resource.desc.mip_levels,
                format: resource.desc.format,
                usage: resource.usage,
            })?;
            log::debug!(
                "[{}] Allocated '{}' {}x{} {:?} usage {:?}",
                graph.config.label,
                resource.name,
                image_extent.width,
                image_extent.height,
                resource.desc.format,
                resource.usage
            );
            graph.resources.push(CompiledResource {
                name: resource.name,
                desc: resource.desc,
                usage: resource.usage,
                image,
                extent: image_extent,
                current_layout: ImageLayout::Undefined,
            });
        }

        for (pass, record) in layout.passes.into_iter().zip(records) {
            let compiled = graph.build_pass(pass, record)?;
            graph.passes.push(compiled);
        }

        log::info!(
            "[{}] Frame graph generation {} ready at {}x{}",
            graph.config.label,
            graph.generation,
            extent.width,
            extent.height
        );

        Ok(graph)
    }

    fn build_pass(
        &self,
        pass: ResolvedPass,
        record: Option<RecordFn<S>>,
    ) -> GraphicsResult<CompiledPass<S>> {
        let device = self.device.as_ref();

        let render_pass = device.create_render_pass(&RenderPassDescriptor {
            label: Some(format!("{}/{}", self.config.label, pass.name)),
            attachments: pass
                .attachments
                .iter()
                .map(|a| AttachmentDescriptor {
                    format: self.resources[a.resource].desc.format,
                    binding: a.binding,
                    load_op: a.load_op,
                    store_op: a.store_op,
                    layout: a.layout,
                })
                .collect(),
        })?;

        // The render target can't be larger than its smallest attachment
        let extent = pass
            .attachments
            .iter()
            .map(|a| self.resources[a.resource].extent)
            .reduce(|a, b| Extent2d::new(a.width.min(b.width), a.height.min(b.height)))
            .unwrap_or(self.extent);

        let render_target = match device.create_render_target(&RenderTargetDescriptor {
            label: Some(format!("{}/{}", self.config.label, pass.name)),
            render_pass,
            attachments: pass
                .attachments
                .iter()
                .map(|a| self.resources[a.resource].image)
                .collect(),
            extent,
        }) {
            Ok(render_target) => render_target,
            Err(e) => {
                device.destroy_render_pass(render_pass);
                return Err(e);
            }
        };

        let command_buffer = match device.allocate_command_buffer() {
            Ok(command_buffer) => command_buffer,
            Err(e) => {
                device.destroy_render_target(render_target);
                device.destroy_render_pass(render_pass);
                return Err(e);
            }
        };

        log::debug!(
            "[{}] Built pass '{}' with {} attachments",
            self.config.label,
            pass.name,
            pass.attachments.len()
        );

        Ok(CompiledPass {
            render_pass,
            render_target,
            command_buffer,
            extent,
            attachments: pass
                .attachments
                .iter()
                .map(|a| (a.resource, a.layout))
                .collect(),
            clear_values: pass.attachments.iter().map(|a| a.clear_value).collect(),
            name: pass.name,
            record,
        })
    }

    /// Reference to the native render pass of `pass_name`.
    pub fn render_pass_object(&self, pass_name: &str) -> Option<RenderPassRef> {
        self.passes
            .iter()
            .find(|p| p.name == pass_name)
            .map(|p| RenderPassRef {
                handle: p.render_pass,
                generation: self.generation,
            })
    }

    /// The native render pass behind `render_pass`, if it belongs to this graph.
    pub fn resolve_render_pass(
        &self,
        render_pass: &RenderPassRef,
    ) -> Result<RenderPassHandle, GraphError> {
        if render_pass.generation != self.generation {
            return Err(GraphError::StaleRenderPass {
                found: render_pass.generation,
                expected: self.generation,
            });
        }
        Ok(render_pass.handle)
    }

    /// Pass names in execution order
    pub fn pass_names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|p| p.name.as_str())
    }

    /// Root resource names in declaration order
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().map(|r| r.name.as_str())
    }

    pub fn link_count(&self) -> usize {
        self.link_count
    }

    pub fn resource_usage(&self, name: &str) -> Option<ImageUsage> {
        self.resource(name).map(|r| r.usage)
    }

    /// Layout the resource was left in by the last executed frame
    pub fn current_layout(&self, name: &str) -> Option<ImageLayout> {
        self.resource(name).map(|r| r.current_layout)
    }

    pub fn resource_image(&self, name: &str) -> Option<ImageHandle> {
        self.resource(name).map(|r| r.image)
    }

    pub fn resource_extent(&self, name: &str) -> Option<Extent2d> {
        self.resource(name).map(|r| r.extent)
    }

    /// Name of the resource blitted into the swapchain
    pub fn final_resource_name(&self) -> &str {
        &self.resources[self.final_resource].name
    }

    /// Swapchain extent the graph was compiled against
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Process-unique id of this graph
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of frames executed successfully
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Whether the swapchain no longer matches the extent the graph was built for
    pub fn is_outdated(&self) -> bool {
        self.device.swapchain_extent() != self.extent
    }

    fn resource(&self, name: &str) -> Option<&CompiledResource> {
        self.resources.iter().find(|r| r.name == name)
    }
}

impl<S> Drop for FrameGraph<S> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!(
                "[{}] wait_idle failed while dropping frame graph: {}",
                self.config.label,
                e
            );
        }

        let device = self.device.as_ref();
        for pass in self.passes.drain(..) {
            device.free_command_buffer(pass.command_buffer);
            device.destroy_render_target(pass.render_target);
            device.destroy_render_pass(pass.render_pass);
        }
        for resource in self.resources.drain(..) {
            device.destroy_image(resource.image);
        }
        self.sync.destroy(device);

        log::debug!(
            "[{}] Frame graph generation {} destroyed",
            self.config.label,
            self.generation
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::frame_graph::pass::{Drain, PassDesc, Source};
    use crate::frame_graph::scheme::FrameGraphScheme;

    fn scheme() -> FrameGraphScheme<()> {
        let mut scheme = FrameGraphScheme::new();
        scheme
            .add_resource("Color", ResourceDesc::new(TextureFormat::Rgba8Unorm))
            .add_resource(
                "Half",
                ResourceDesc::new(TextureFormat::Rgba16Float).with_relative_size(0.5, 0.5),
            )
            .add_pass(
                "Main",
                PassDesc::new()
                    .with_drain(Drain::color("Color"))
                    .with_drain(Drain::color("Half"))
                    .with_source(Source::new("Color")),
            )
            .add_link("$.Color", "Main.Color")
            .add_link("$.Half", "Main.Half")
            .add_link("Main.Color", "$.BLIT_TO_SWAPCHAIN");
        scheme
    }

    #[test]
    fn test_images_follow_swapchain_extent() {
        let device = Arc::new(DummyDevice::new(Extent2d::new(800, 600)));
        let graph = scheme().compile(device.clone()).unwrap();

        assert_eq!(graph.resource_extent("Color"), Some(Extent2d::new(800, 600)));
        assert_eq!(graph.resource_extent("Half"), Some(Extent2d::new(400, 300)));
        assert_eq!(graph.passes[0].extent, Extent2d::new(400, 300));
        assert_eq!(graph.final_resource_name(), "Color");

        let image = graph.resource_image("Half").unwrap();
        let desc = device.image_descriptor(image).unwrap();
        assert_eq!(desc.usage, ImageUsage::COLOR_ATTACHMENT);
        assert_eq!(desc.label.as_deref(), Some("frame-graph/Half"));
    }

    #[test]
    fn test_render_pass_store_ops() {
        let device = Arc::new(DummyDevice::default());
        let graph = scheme().compile(device.clone()).unwrap();

        let render_pass = graph.render_pass_object("Main").unwrap();
        let handle = graph.resolve_render_pass(&render_pass).unwrap();
        let desc = device.render_pass_descriptor(handle).unwrap();
        assert_eq!(desc.attachments[0].store_op, StoreOp::Store);
        assert_eq!(desc.attachments[1].store_op, StoreOp::Discard);
        assert!(graph.render_pass_object("Missing").is_none());
    }

    #[test]
    fn test_drop_releases_everything() {
        let device = Arc::new(DummyDevice::default());
        let graph = scheme().compile(device.clone()).unwrap();
        assert!(device.live_object_count() > 0);

        drop(graph);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_outdated_after_resize() {
        let device = Arc::new(DummyDevice::new(Extent2d::new(640, 480)));
        let graph = scheme().compile(device.clone()).unwrap();
        assert!(!graph.is_outdated());

        device.set_surface_extent(Extent2d::new(1024, 768));
        assert!(graph.is_outdated());
    }
}
