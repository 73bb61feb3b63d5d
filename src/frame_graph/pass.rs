//! Pass descriptors and the context handed to recording callbacks

use std::fmt;

use crate::backend::traits::GpuDevice;
use crate::backend::types::*;

/// Recording callback of a pass.
///
/// Called once per [`FrameGraph::execute`](crate::frame_graph::FrameGraph::execute),
/// inside the pass's render pass, with the scene passed to `execute`.
pub type RecordFn<S> = Box<dyn FnMut(&mut PassContext<'_>, &S) + Send>;

/// A named input slot of a pass, bound as an attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Drain {
    pub name: String,
    pub binding: BindingMode,
    pub load_op: LoadOp,
    /// Used when `load_op` is [`LoadOp::Clear`]
    pub clear_value: ClearValue,
}

impl Drain {
    pub fn new(name: impl Into<String>, binding: BindingMode) -> Self {
        let clear_value = match binding {
            BindingMode::DepthStencilAttachment => ClearValue::depth(1.0),
            _ => ClearValue::default(),
        };
        let load_op = match binding {
            BindingMode::InputAttachment => LoadOp::Load,
            _ => LoadOp::Clear,
        };
        Self {
            name: name.into(),
            binding,
            load_op,
            clear_value,
        }
    }

    /// Color attachment cleared to opaque black.
    pub fn color(name: impl Into<String>) -> Self {
        Self::new(name, BindingMode::ColorAttachment)
    }

    /// Depth-stencil attachment cleared to depth 1.0.
    pub fn depth_stencil(name: impl Into<String>) -> Self {
        Self::new(name, BindingMode::DepthStencilAttachment)
    }

    /// Input attachment; contents are loaded.
    pub fn input(name: impl Into<String>) -> Self {
        Self::new(name, BindingMode::InputAttachment)
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = clear_value;
        self
    }
}

/// A named output slot of a pass.
///
/// A source always continues the drain of the same name: the pass writes
/// that attachment in place and hands it on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub name: String,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Declaration of a single pass.
pub struct PassDesc<S> {
    drains: Vec<Drain>,
    sources: Vec<Source>,
    record: Option<RecordFn<S>>,
}

impl<S> PassDesc<S> {
    pub fn new() -> Self {
        Self {
            drains: Vec::new(),
            sources: Vec::new(),
            record: None,
        }
    }

    /// Add a drain. Attachment order in the render pass follows declaration order.
    pub fn with_drain(mut self, drain: Drain) -> Self {
        assert!(
            self.drain(&drain.name).is_none(),
            "Drain '{}' declared twice",
            drain.name
        );
        self.drains.push(drain);
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        assert!(
            !self.has_source(&source.name),
            "Source '{}' declared twice",
            source.name
        );
        self.sources.push(source);
        self
    }

    pub fn with_record<F>(mut self, record: F) -> Self
    where
        F: FnMut(&mut PassContext<'_>, &S) + Send + 'static,
    {
        self.record = Some(Box::new(record));
        self
    }

    pub fn drains(&self) -> &[Drain] {
        &self.drains
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn drain(&self, name: &str) -> Option<&Drain> {
        self.drains.iter().find(|d| d.name == name)
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.iter().any(|s| s.name == name)
    }

    pub(crate) fn take_record(&mut self) -> Option<RecordFn<S>> {
        self.record.take()
    }
}

impl<S> Default for PassDesc<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for PassDesc<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassDesc")
            .field("drains", &self.drains)
            .field("sources", &self.sources)
            .field("has_record", &self.record.is_some())
            .finish()
    }
}

/// What a recording callback gets to work with.
///
/// The render pass is already begun on `command_buffer`; the callback only
/// records draw work into it.
pub struct PassContext<'a> {
    pub device: &'a dyn GpuDevice,
    pub command_buffer: CommandBufferHandle,
    pub render_pass: RenderPassHandle,
    pub render_target: RenderTargetHandle,
    pub extent: Extent2d,
    pub pass_name: &'a str,
}

impl<'a> PassContext<'a> {
    /// Get the device as its concrete type
    pub fn device_as<D: GpuDevice>(&self) -> Option<&'a D> {
        self.device.as_any().downcast_ref::<D>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_defaults() {
        let color = Drain::color("Albedo");
        assert_eq!(color.load_op, LoadOp::Clear);
        assert_eq!(color.clear_value, ClearValue::Color([0.0, 0.0, 0.0, 1.0]));

        let depth = Drain::depth_stencil("Depth");
        assert_eq!(depth.clear_value, ClearValue::depth(1.0));

        let input = Drain::input("GBuffer");
        assert_eq!(input.load_op, LoadOp::Load);
        assert_eq!(input.binding.starting_layout(), ImageLayout::ShaderReadOnly);
    }

    #[test]
    fn test_pass_desc_lookup() {
        let desc: PassDesc<()> = PassDesc::new()
            .with_drain(Drain::color("Color"))
            .with_drain(Drain::depth_stencil("Depth"))
            .with_source(Source::new("Color"));

        assert_eq!(desc.drains().len(), 2);
        assert!(desc.has_source("Color"));
        assert!(!desc.has_source("Depth"));
        assert_eq!(
            desc.drain("Depth").map(|d| d.binding),
            Some(BindingMode::DepthStencilAttachment)
        );
    }

    #[test]
    #[should_panic(expected = "declared twice")]
    fn test_duplicate_drain_panics() {
        let _: PassDesc<()> = PassDesc::new()
            .with_drain(Drain::color("Color"))
            .with_drain(Drain::color("Color"));
    }
}
