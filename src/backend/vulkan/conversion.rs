//! Conversions between frame graph types and Vulkan types.

use ash::vk;

use crate::backend::types::*;
use crate::error::GraphicsError;

/// Convert TextureFormat to Vulkan format.
pub fn convert_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// Convert a Vulkan swapchain format back; unknown formats map to `None`.
pub fn convert_format_back(format: vk::Format) -> Option<TextureFormat> {
    Some(match format {
        vk::Format::R8G8B8A8_UNORM => TextureFormat::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => TextureFormat::Rgba8UnormSrgb,
        vk::Format::B8G8R8A8_UNORM => TextureFormat::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => TextureFormat::Bgra8UnormSrgb,
        vk::Format::R16G16B16A16_SFLOAT => TextureFormat::Rgba16Float,
        _ => return None,
    })
}

/// Convert ImageUsage flags to Vulkan image usage flags.
pub fn convert_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(ImageUsage::TRANSFER_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::COLOR_ATTACHMENT) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
        result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(ImageUsage::INPUT_ATTACHMENT) {
        result |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
    }

    result
}

pub fn convert_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        ImageLayout::General => vk::ImageLayout::GENERAL,
    }
}

pub fn convert_stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    let mut result = vk::PipelineStageFlags::empty();

    if stages.contains(PipelineStages::TOP_OF_PIPE) {
        result |= vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if stages.contains(PipelineStages::EARLY_FRAGMENT_TESTS) {
        result |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::FRAGMENT_SHADER) {
        result |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(PipelineStages::LATE_FRAGMENT_TESTS) {
        result |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT) {
        result |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if stages.contains(PipelineStages::TRANSFER) {
        result |= vk::PipelineStageFlags::TRANSFER;
    }
    if stages.contains(PipelineStages::BOTTOM_OF_PIPE) {
        result |= vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }

    result
}

pub fn convert_access(access: AccessFlags) -> vk::AccessFlags {
    let mut result = vk::AccessFlags::empty();

    if access.contains(AccessFlags::SHADER_READ) {
        result |= vk::AccessFlags::SHADER_READ;
    }
    if access.contains(AccessFlags::COLOR_ATTACHMENT_WRITE) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if access.contains(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE) {
        result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if access.contains(AccessFlags::TRANSFER_READ) {
        result |= vk::AccessFlags::TRANSFER_READ;
    }
    if access.contains(AccessFlags::TRANSFER_WRITE) {
        result |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if access.contains(AccessFlags::MEMORY_READ) {
        result |= vk::AccessFlags::MEMORY_READ;
    }
    if access.contains(AccessFlags::MEMORY_WRITE) {
        result |= vk::AccessFlags::MEMORY_WRITE;
    }

    result
}

pub fn convert_load_op(load_op: LoadOp) -> vk::AttachmentLoadOp {
    match load_op {
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub fn convert_store_op(store_op: StoreOp) -> vk::AttachmentStoreOp {
    match store_op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::Discard => vk::AttachmentStoreOp::DONT_CARE,
    }
}

pub fn convert_clear_value(value: ClearValue) -> vk::ClearValue {
    match value {
        ClearValue::Color(float32) => vk::ClearValue {
            color: vk::ClearColorValue { float32 },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

pub fn convert_filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

/// Aspect mask covering every aspect of a format.
pub fn aspect_mask(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth_stencil() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Map a Vulkan error code onto the device error the frame graph reacts to.
pub fn map_vk_error(result: vk::Result, context: &str) -> GraphicsError {
    match result {
        vk::Result::ERROR_OUT_OF_DATE_KHR => GraphicsError::SurfaceOutdated,
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GraphicsError::OutOfMemory
        }
        vk::Result::TIMEOUT => GraphicsError::Timeout,
        other => GraphicsError::Internal(format!("{}: {}", context, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_aspects() {
        assert_eq!(
            aspect_mask(TextureFormat::Depth32Float),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask(TextureFormat::Depth24PlusStencil8),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_mask(TextureFormat::Rgba8Unorm),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn test_usage_conversion() {
        let usage = convert_image_usage(ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC);
        assert_eq!(
            usage,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            map_vk_error(vk::Result::ERROR_OUT_OF_DATE_KHR, "acquire"),
            GraphicsError::SurfaceOutdated
        );
        assert_eq!(
            map_vk_error(vk::Result::ERROR_DEVICE_LOST, "submit"),
            GraphicsError::DeviceLost
        );
    }

    #[test]
    fn test_format_round_trip_for_swapchain_formats() {
        for format in [TextureFormat::Bgra8UnormSrgb, TextureFormat::Rgba8Unorm] {
            assert_eq!(convert_format_back(convert_format(format)), Some(format));
        }
        assert_eq!(convert_format_back(vk::Format::D32_SFLOAT), None);
    }
}
