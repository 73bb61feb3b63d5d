//! Common types shared between the frame graph and device implementations

use bitflags::bitflags;

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Wrap a raw id handed out by a device implementation.
            pub fn from_raw(id: u64) -> Self {
                Self(id)
            }

            /// The raw id of this handle.
            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

device_handle!(
    /// Handle to a device image (including swapchain images)
    ImageHandle
);
device_handle!(
    /// Handle to a native render-pass object
    RenderPassHandle
);
device_handle!(
    /// Handle to a render target (framebuffer)
    RenderTargetHandle
);
device_handle!(
    /// Handle to a primary command buffer
    CommandBufferHandle
);
device_handle!(
    /// Handle to a CPU-waitable fence
    FenceHandle
);

/// Two-dimensional extent in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pixel formats a frame graph resource can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R32Float,
    Depth32Float,
    Depth24PlusStencil8,
    Depth32FloatStencil8,
}

impl TextureFormat {
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float
                | TextureFormat::Depth24PlusStencil8
                | TextureFormat::Depth32FloatStencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth24PlusStencil8 | TextureFormat::Depth32FloatStencil8
        )
    }
}

bitflags! {
    /// Usage flags an image is created with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const COLOR_ATTACHMENT = 1 << 3;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 4;
        const INPUT_ATTACHMENT = 1 << 5;
    }
}

bitflags! {
    /// Pipeline stages used as barrier synchronization scopes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const EARLY_FRAGMENT_TESTS = 1 << 1;
        const FRAGMENT_SHADER = 1 << 2;
        const LATE_FRAGMENT_TESTS = 1 << 3;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 4;
        const TRANSFER = 1 << 5;
        const BOTTOM_OF_PIPE = 1 << 6;
    }
}

bitflags! {
    /// Memory access masks used as barrier access scopes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const SHADER_READ = 1 << 0;
        const COLOR_ATTACHMENT_WRITE = 1 << 1;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 2;
        const TRANSFER_READ = 1 << 3;
        const TRANSFER_WRITE = 1 << 4;
        const MEMORY_READ = 1 << 5;
        const MEMORY_WRITE = 1 << 6;
    }
}

/// Image layout states a resource moves through during a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents undefined; the layout every image starts in
    #[default]
    Undefined,
    ColorAttachment,
    DepthStencilAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
    General,
}

/// How a drain is bound inside its pass's native render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingMode {
    ColorAttachment,
    DepthStencilAttachment,
    InputAttachment,
}

impl BindingMode {
    /// Layout the attachment must be in when its pass begins.
    pub fn starting_layout(self) -> ImageLayout {
        match self {
            BindingMode::ColorAttachment => ImageLayout::ColorAttachment,
            BindingMode::DepthStencilAttachment => ImageLayout::DepthStencilAttachment,
            BindingMode::InputAttachment => ImageLayout::ShaderReadOnly,
        }
    }

    /// Image usage this binding requires from the backing image.
    pub fn required_usage(self) -> ImageUsage {
        match self {
            BindingMode::ColorAttachment => ImageUsage::COLOR_ATTACHMENT,
            BindingMode::DepthStencilAttachment => ImageUsage::DEPTH_STENCIL_ATTACHMENT,
            BindingMode::InputAttachment => ImageUsage::INPUT_ATTACHMENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Clear with the drain's clear value
    #[default]
    Clear,
    Load,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    #[default]
    Store,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn color(r: f32, g: f32, b: f32, a: f32) -> Self {
        ClearValue::Color([r, g, b, a])
    }

    pub fn depth(depth: f32) -> Self {
        ClearValue::DepthStencil { depth, stencil: 0 }
    }
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color([0.0, 0.0, 0.0, 1.0])
    }
}

/// Sampling filter used by image blits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

/// Image descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub extent: Extent2d,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: ImageUsage,
}

/// One attachment of a native render pass
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentDescriptor {
    pub format: TextureFormat,
    pub binding: BindingMode,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    /// Used as both the initial and the final layout of the attachment
    pub layout: ImageLayout,
}

/// Render pass descriptor (single subpass)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
}

/// Render target (framebuffer) descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetDescriptor {
    pub label: Option<String>,
    pub render_pass: RenderPassHandle,
    /// One image per attachment, in render pass attachment order
    pub attachments: Vec<ImageHandle>,
    pub extent: Extent2d,
}

/// Image layout transition plus the execution and memory dependency around it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

impl ImageBarrier {
    /// Full-pipeline barrier: waits for everything before, blocks everything after.
    pub fn coarse(image: ImageHandle, old_layout: ImageLayout, new_layout: ImageLayout) -> Self {
        Self {
            image,
            old_layout,
            new_layout,
            src_stages: PipelineStages::BOTTOM_OF_PIPE,
            dst_stages: PipelineStages::TOP_OF_PIPE,
            src_access: AccessFlags::MEMORY_WRITE,
            dst_access: AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
        }
    }
}

/// Parameters for beginning a render pass on a command buffer
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBegin<'a> {
    pub render_pass: RenderPassHandle,
    pub render_target: RenderTargetHandle,
    pub extent: Extent2d,
    pub clear_values: &'a [ClearValue],
}

/// Whole-image blit from mip 0 of `src` into mip 0 of `dst`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitRegion {
    pub src: ImageHandle,
    pub src_extent: Extent2d,
    pub dst: ImageHandle,
    pub dst_extent: Extent2d,
    pub filter: Filter,
}

/// Swapchain image handed out by `acquire_next_image`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub image: ImageHandle,
    /// The swapchain still works but no longer matches the surface exactly
    pub suboptimal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_mode_layouts() {
        assert_eq!(
            BindingMode::ColorAttachment.starting_layout(),
            ImageLayout::ColorAttachment
        );
        assert_eq!(
            BindingMode::DepthStencilAttachment.starting_layout(),
            ImageLayout::DepthStencilAttachment
        );
        assert_eq!(
            BindingMode::InputAttachment.starting_layout(),
            ImageLayout::ShaderReadOnly
        );
    }

    #[test]
    fn test_coarse_barrier_scope() {
        let barrier = ImageBarrier::coarse(
            ImageHandle::from_raw(7),
            ImageLayout::Undefined,
            ImageLayout::TransferSrc,
        );
        assert_eq!(barrier.src_stages, PipelineStages::BOTTOM_OF_PIPE);
        assert_eq!(barrier.dst_stages, PipelineStages::TOP_OF_PIPE);
        assert!(barrier.dst_access.contains(AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE));
    }

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(TextureFormat::Depth24PlusStencil8.has_stencil());
        assert!(!TextureFormat::Rgba16Float.is_depth_stencil());
    }
}
