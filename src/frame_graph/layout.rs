//! Validation and resolution of a scheme into a device-free layout
//!
//! Addresses are parsed once here and interned to indices. Two walks run on
//! the interned graph:
//! - backward from each drain to the root resource that physically backs it
//! - forward from each root resource to collect the image usage it needs

use std::collections::{HashMap, HashSet};

use crate::backend::types::*;
use crate::config::FrameGraphConfig;
use crate::error::GraphError;
use crate::frame_graph::address::Address;
use crate::frame_graph::resource::ResourceDesc;
use crate::frame_graph::scheme::FrameGraphScheme;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SourceNode {
    Root(usize),
    Pass { pass: usize, drain: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DrainNode {
    Sink,
    Pass { pass: usize, drain: usize },
}

/// A root resource with its inferred usage.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub name: String,
    pub desc: ResourceDesc,
    pub usage: ImageUsage,
}

/// One attachment of a pass, bound to the resource that backs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAttachment {
    pub drain: String,
    /// Index into [`GraphLayout::resources`]
    pub resource: usize,
    pub binding: BindingMode,
    /// Layout the resource is transitioned to before the pass begins
    pub layout: ImageLayout,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: ClearValue,
    /// The pass hands this attachment on through a same-named source
    pub has_source: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPass {
    pub name: String,
    /// In drain declaration order
    pub attachments: Vec<ResolvedAttachment>,
}

/// A validated scheme: every address resolved, usage inferred.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphLayout {
    pub resources: Vec<ResolvedResource>,
    /// In declaration (execution) order
    pub passes: Vec<ResolvedPass>,
    /// Index of the resource blitted into the swapchain
    pub final_resource: usize,
    pub link_count: usize,
}

impl GraphLayout {
    pub fn resource(&self, name: &str) -> Option<&ResolvedResource> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn pass(&self, name: &str) -> Option<&ResolvedPass> {
        self.passes.iter().find(|p| p.name == name)
    }

    pub(crate) fn resolve<S>(
        scheme: &FrameGraphScheme<S>,
        config: &FrameGraphConfig,
    ) -> Result<Self, GraphError> {
        for (name, desc) in &scheme.resources {
            desc.validate(name)?;
        }

        let links = LinkTable::build(scheme)?;

        for (pass_index, (pass_name, desc)) in scheme.passes.iter().enumerate() {
            let depth_drains = desc
                .drains()
                .iter()
                .filter(|d| d.binding == BindingMode::DepthStencilAttachment)
                .count();
            if depth_drains > 1 {
                return Err(GraphError::MultipleDepthAttachments(pass_name.clone()));
            }

            for (drain_index, drain) in desc.drains().iter().enumerate() {
                let node = DrainNode::Pass {
                    pass: pass_index,
                    drain: drain_index,
                };
                if !links.incoming.contains_key(&node) {
                    return Err(GraphError::UnlinkedDrain {
                        pass: pass_name.clone(),
                        drain: drain.name.clone(),
                    });
                }
            }

            for source in desc.sources() {
                if desc.drain(&source.name).is_none() {
                    return Err(GraphError::SourceWithoutDrain {
                        pass: pass_name.clone(),
                        source_name: source.name.clone(),
                    });
                }
            }
        }

        if !links.incoming.contains_key(&DrainNode::Sink) {
            return Err(GraphError::MissingSwapchainLink);
        }

        // Backward walk: which root resource backs each drain
        let mut passes = Vec::with_capacity(scheme.passes.len());
        for (pass_index, (pass_name, desc)) in scheme.passes.iter().enumerate() {
            let mut attachments: Vec<ResolvedAttachment> = Vec::with_capacity(desc.drains().len());
            for (drain_index, drain) in desc.drains().iter().enumerate() {
                let resource = links.resolve(
                    scheme,
                    DrainNode::Pass {
                        pass: pass_index,
                        drain: drain_index,
                    },
                )?;
                if attachments.iter().any(|a| a.resource == resource) {
                    return Err(GraphError::AliasedAttachment {
                        pass: pass_name.clone(),
                        resource: scheme.resources[resource].0.clone(),
                    });
                }

                let has_source = desc.has_source(&drain.name);
                attachments.push(ResolvedAttachment {
                    drain: drain.name.clone(),
                    resource,
                    binding: drain.binding,
                    layout: drain.binding.starting_layout(),
                    load_op: drain.load_op,
                    store_op: if has_source {
                        StoreOp::Store
                    } else {
                        StoreOp::Discard
                    },
                    clear_value: drain.clear_value,
                    has_source,
                });
            }
            passes.push(ResolvedPass {
                name: pass_name.clone(),
                attachments,
            });
        }
        let final_resource = links.resolve(scheme, DrainNode::Sink)?;
        let (final_name, final_desc) = &scheme.resources[final_resource];
        if final_desc.format.is_depth_stencil() {
            return Err(GraphError::DepthSwapchainSource(final_name.clone()));
        }

        links.check_declaration_order(scheme, config)?;

        // Forward walk: what each root resource is used as
        let mut resources = Vec::with_capacity(scheme.resources.len());
        for (resource_index, (name, desc)) in scheme.resources.iter().enumerate() {
            let usage = links.infer_usage(scheme, resource_index);
            if usage.is_empty() {
                return Err(GraphError::UnusedResource(name.clone()));
            }
            resources.push(ResolvedResource {
                name: name.clone(),
                desc: desc.clone(),
                usage,
            });
        }

        for (pass_index, pass) in passes.iter().enumerate() {
            for (drain_index, attachment) in pass.attachments.iter().enumerate() {
                let node = SourceNode::Pass {
                    pass: pass_index,
                    drain: drain_index,
                };
                if attachment.has_source && !links.outgoing.contains_key(&node) {
                    log::warn!(
                        "[{}] Source '{}.{}' is stored but never linked",
                        config.label,
                        pass.name,
                        attachment.drain
                    );
                }
            }
        }

        log::debug!(
            "[{}] Frame graph resolved; '{}' feeds the swapchain",
            config.label,
            resources[final_resource].name
        );

        Ok(Self {
            resources,
            passes,
            final_resource,
            link_count: scheme.links.len(),
        })
    }
}

/// Links with every address interned.
struct LinkTable {
    /// Every link, in declaration order
    edges: Vec<(SourceNode, DrainNode)>,
    incoming: HashMap<DrainNode, SourceNode>,
    outgoing: HashMap<SourceNode, Vec<DrainNode>>,
    link_count: usize,
}

impl LinkTable {
    fn build<S>(scheme: &FrameGraphScheme<S>) -> Result<Self, GraphError> {
        let mut edges = Vec::with_capacity(scheme.links.len());
        let mut incoming = HashMap::new();
        let mut outgoing: HashMap<SourceNode, Vec<DrainNode>> = HashMap::new();

        for link in &scheme.links {
            let source = Self::source_node(scheme, &link.source)?;
            let drain = Self::drain_node(scheme, &link.drain)?;
            edges.push((source, drain));
            incoming.insert(drain, source);
            outgoing.entry(source).or_default().push(drain);
        }

        Ok(Self {
            edges,
            incoming,
            outgoing,
            link_count: scheme.links.len(),
        })
    }

    fn source_node<S>(scheme: &FrameGraphScheme<S>, address: &str) -> Result<SourceNode, GraphError> {
        match Address::parse(address)? {
            Address::Root(name) => scheme
                .resource_index(name)
                .map(SourceNode::Root)
                .ok_or_else(|| GraphError::UnknownResource {
                    address: address.to_string(),
                    resource: name.to_string(),
                }),
            Address::SwapchainSink => Err(GraphError::SinkAsSource),
            Address::Slot { pass, slot } => {
                let pass_index = Self::pass_index(scheme, address, pass)?;
                let desc = &scheme.passes[pass_index].1;
                if !desc.has_source(slot) {
                    return Err(GraphError::UnknownSource {
                        address: address.to_string(),
                        pass: pass.to_string(),
                    });
                }
                // A source continues the same-named drain; validation rejects
                // sources without one after all links are interned
                match desc.drains().iter().position(|d| d.name == slot) {
                    Some(drain) => Ok(SourceNode::Pass {
                        pass: pass_index,
                        drain,
                    }),
                    None => Err(GraphError::SourceWithoutDrain {
                        pass: pass.to_string(),
                        source_name: slot.to_string(),
                    }),
                }
            }
        }
    }

    fn drain_node<S>(scheme: &FrameGraphScheme<S>, address: &str) -> Result<DrainNode, GraphError> {
        match Address::parse(address)? {
            Address::Root(_) => Err(GraphError::RootAsDrain(address.to_string())),
            Address::SwapchainSink => Ok(DrainNode::Sink),
            Address::Slot { pass, slot } => {
                let pass_index = Self::pass_index(scheme, address, pass)?;
                scheme.passes[pass_index]
                    .1
                    .drains()
                    .iter()
                    .position(|d| d.name == slot)
                    .map(|drain| DrainNode::Pass {
                        pass: pass_index,
                        drain,
                    })
                    .ok_or_else(|| GraphError::UnknownDrain {
                        address: address.to_string(),
                        pass: pass.to_string(),
                    })
            }
        }
    }

    fn pass_index<S>(
        scheme: &FrameGraphScheme<S>,
        address: &str,
        pass: &str,
    ) -> Result<usize, GraphError> {
        scheme
            .pass_index(pass)
            .ok_or_else(|| GraphError::UnknownPass {
                address: address.to_string(),
                pass: pass.to_string(),
            })
    }

    /// Follow links backward from `drain` until a root resource is reached.
    ///
    /// Every step consumes one link, so a walk longer than the link count
    /// must be going round a cycle.
    fn resolve<S>(&self, scheme: &FrameGraphScheme<S>, drain: DrainNode) -> Result<usize, GraphError> {
        let mut current = drain;
        for _ in 0..=self.link_count {
            let source = self.incoming.get(&current).copied().ok_or_else(|| {
                Self::unlinked(scheme, current)
            })?;
            match source {
                SourceNode::Root(resource) => return Ok(resource),
                SourceNode::Pass { pass, drain } => current = DrainNode::Pass { pass, drain },
            }
        }

        let (pass, drain) = Self::drain_names(scheme, drain);
        Err(GraphError::CyclicChain { pass, drain })
    }

    /// Follow links forward from a root resource and collect its usage.
    fn infer_usage<S>(&self, scheme: &FrameGraphScheme<S>, resource: usize) -> ImageUsage {
        let mut usage = ImageUsage::empty();
        let mut visited = HashSet::new();
        let mut pending: Vec<DrainNode> = self
            .outgoing
            .get(&SourceNode::Root(resource))
            .cloned()
            .unwrap_or_default();

        while let Some(node) = pending.pop() {
            if !visited.insert(node) {
                continue;
            }
            match node {
                DrainNode::Sink => usage |= ImageUsage::TRANSFER_SRC,
                DrainNode::Pass { pass, drain } => {
                    let desc = &scheme.passes[pass].1;
                    let declared = &desc.drains()[drain];
                    usage |= declared.binding.required_usage();
                    if desc.has_source(&declared.name) {
                        if let Some(next) = self.outgoing.get(&SourceNode::Pass { pass, drain }) {
                            pending.extend(next.iter().copied());
                        }
                    }
                }
            }
        }
        usage
    }

    fn check_declaration_order<S>(
        &self,
        scheme: &FrameGraphScheme<S>,
        config: &FrameGraphConfig,
    ) -> Result<(), GraphError> {
        for &(source, drain) in &self.edges {
            let (SourceNode::Pass { pass: producer, .. }, DrainNode::Pass { pass: consumer, .. }) =
                (source, drain)
            else {
                continue;
            };
            if producer <= consumer {
                continue;
            }

            let consumer = scheme.passes[consumer].0.clone();
            let producer = scheme.passes[producer].0.clone();
            if config.strict_declaration_order {
                return Err(GraphError::OutOfOrder { consumer, producer });
            }
            log::warn!(
                "[{}] Pass '{}' consumes output of '{}', which runs after it",
                config.label,
                consumer,
                producer
            );
        }
        Ok(())
    }

    fn unlinked<S>(scheme: &FrameGraphScheme<S>, node: DrainNode) -> GraphError {
        match node {
            DrainNode::Sink => GraphError::MissingSwapchainLink,
            DrainNode::Pass { .. } => {
                let (pass, drain) = Self::drain_names(scheme, node);
                GraphError::UnlinkedDrain { pass, drain }
            }
        }
    }

    fn drain_names<S>(scheme: &FrameGraphScheme<S>, node: DrainNode) -> (String, String) {
        match node {
            DrainNode::Sink => (String::from("$"), String::from("BLIT_TO_SWAPCHAIN")),
            DrainNode::Pass { pass, drain } => {
                let (name, desc) = &scheme.passes[pass];
                (name.clone(), desc.drains()[drain].name.clone())
            }
        }
    }
}
