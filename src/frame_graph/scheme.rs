//! Frame graph scheme builder

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::traits::GpuDevice;
use crate::config::FrameGraphConfig;
use crate::error::{Error, GraphError};
use crate::frame_graph::address::is_valid_pass_name;
use crate::frame_graph::graph::FrameGraph;
use crate::frame_graph::layout::GraphLayout;
use crate::frame_graph::pass::PassDesc;
use crate::frame_graph::resource::ResourceDesc;

/// A directed edge from a source address to a drain address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Link {
    pub source: String,
    pub drain: String,
}

/// Builder collecting passes, root resources and links.
///
/// Authoring mistakes (duplicate names, a drain linked twice) panic right
/// away. Everything that depends on the whole graph is checked by
/// [`validate`](Self::validate), which [`compile`](Self::compile) runs first.
pub struct FrameGraphScheme<S> {
    pub(crate) passes: Vec<(String, PassDesc<S>)>,
    pass_lookup: HashMap<String, usize>,
    pub(crate) resources: Vec<(String, ResourceDesc)>,
    resource_lookup: HashMap<String, usize>,
    pub(crate) links: Vec<Link>,
    linked_drains: HashSet<String>,
}

impl<S> FrameGraphScheme<S> {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_lookup: HashMap::new(),
            resources: Vec::new(),
            resource_lookup: HashMap::new(),
            links: Vec::new(),
            linked_drains: HashSet::new(),
        }
    }

    /// Add a pass. Passes execute in the order they are added.
    pub fn add_pass(&mut self, name: impl Into<String>, desc: PassDesc<S>) -> &mut Self {
        let name = name.into();
        assert!(
            is_valid_pass_name(&name),
            "Invalid pass name '{}': must be non-empty, not '$' and contain no '.'",
            name
        );
        assert!(
            !self.pass_lookup.contains_key(&name),
            "Pass '{}' added twice",
            name
        );
        self.pass_lookup.insert(name.clone(), self.passes.len());
        self.passes.push((name, desc));
        self
    }

    /// Link a source address to a drain address.
    ///
    /// Sources are `"<Pass>.<Slot>"` or `"$.<Resource>"`; drains are
    /// `"<Pass>.<Slot>"` or [`SWAPCHAIN_SINK`](crate::frame_graph::SWAPCHAIN_SINK).
    pub fn add_link(&mut self, source: impl Into<String>, drain: impl Into<String>) -> &mut Self {
        let source = source.into();
        let drain = drain.into();
        assert!(
            self.linked_drains.insert(drain.clone()),
            "Drain '{}' already has an incoming link",
            drain
        );
        self.links.push(Link { source, drain });
        self
    }

    /// Declare a root resource, addressed as `"$.<name>"`.
    pub fn add_resource(&mut self, name: impl Into<String>, desc: ResourceDesc) -> &mut Self {
        let name = name.into();
        assert!(
            !self.resource_lookup.contains_key(&name),
            "Resource '{}' added twice",
            name
        );
        self.resource_lookup.insert(name.clone(), self.resources.len());
        self.resources.push((name, desc));
        self
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub(crate) fn pass_index(&self, name: &str) -> Option<usize> {
        self.pass_lookup.get(name).copied()
    }

    pub(crate) fn resource_index(&self, name: &str) -> Option<usize> {
        self.resource_lookup.get(name).copied()
    }

    /// Check the scheme and resolve it into a device-free [`GraphLayout`].
    ///
    /// This is the contract `compile` relies on. It fails when:
    /// - a link names an unknown pass, slot or resource, or runs the wrong
    ///   way (a root resource as drain, the swapchain sink as source)
    /// - a drain has no incoming link, or a source has no drain of the same name
    /// - following links backward from a drain never reaches a root resource
    /// - one pass binds the same resource twice, or declares two depth drains
    /// - a root resource is never linked, or nothing feeds the swapchain sink
    /// - with strict declaration order, a pass consumes a later pass's output
    pub fn validate(&self) -> Result<GraphLayout, GraphError> {
        self.validate_with_config(&FrameGraphConfig::default())
    }

    pub fn validate_with_config(&self, config: &FrameGraphConfig) -> Result<GraphLayout, GraphError> {
        GraphLayout::resolve(self, config)
    }

    /// Validate the scheme and build a [`FrameGraph`] on `device`.
    pub fn compile(self, device: Arc<dyn GpuDevice>) -> Result<FrameGraph<S>, Error> {
        self.compile_with_config(device, FrameGraphConfig::default())
    }

    pub fn compile_with_config(
        mut self,
        device: Arc<dyn GpuDevice>,
        config: FrameGraphConfig,
    ) -> Result<FrameGraph<S>, Error> {
        let layout = self.validate_with_config(&config)?;
        let records = self
            .passes
            .iter_mut()
            .map(|(_, desc)| desc.take_record())
            .collect();

        log::info!(
            "[{}] Compiling frame graph on {} device: {} passes, {} resources, {} links",
            config.label,
            device.name(),
            layout.passes.len(),
            layout.resources.len(),
            layout.link_count
        );

        Ok(FrameGraph::new(device, layout, records, config)?)
    }
}

impl<S> Default for FrameGraphScheme<S> {
    fn default() -> Self {
        Self::new()
    }
}
