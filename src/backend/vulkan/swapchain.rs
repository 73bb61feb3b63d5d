//! Swapchain creation.
//!
//! The frame graph never renders into swapchain images directly; it blits
//! into them. The swapchain is therefore created with `TRANSFER_DST` usage
//! and no image views.

use ash::khr::{surface, swapchain};
use ash::vk;

use crate::backend::types::Extent2d;
use crate::error::{GraphicsError, GraphicsResult};

pub(super) struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

pub(super) struct SwapchainRequest {
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
    /// Used only when the surface lets the swapchain pick its size
    pub extent: Extent2d,
    pub vsync: bool,
    pub old_swapchain: vk::SwapchainKHR,
}

pub(super) fn create_swapchain(
    surface_fn: &surface::Instance,
    swapchain_fn: &swapchain::Device,
    request: &SwapchainRequest,
) -> GraphicsResult<Swapchain> {
    let failed = |e: vk::Result| GraphicsError::SwapchainCreationFailed(e.to_string());

    let (capabilities, formats, present_modes) = unsafe {
        (
            surface_fn
                .get_physical_device_surface_capabilities(request.physical_device, request.surface)
                .map_err(failed)?,
            surface_fn
                .get_physical_device_surface_formats(request.physical_device, request.surface)
                .map_err(failed)?,
            surface_fn
                .get_physical_device_surface_present_modes(request.physical_device, request.surface)
                .map_err(failed)?,
        )
    };

    if !capabilities
        .supported_usage_flags
        .contains(vk::ImageUsageFlags::TRANSFER_DST)
    {
        return Err(GraphicsError::SwapchainCreationFailed(
            "surface does not support transfer destination images".into(),
        ));
    }

    // Prefer SRGB
    let format = formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| GraphicsError::SwapchainCreationFailed("surface has no formats".into()))?;

    let present_mode = if request.vsync {
        vk::PresentModeKHR::FIFO
    } else {
        present_modes
            .iter()
            .copied()
            .find(|&m| m == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO)
    };

    let extent = if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: request.extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: request.extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    };
    if extent.width == 0 || extent.height == 0 {
        return Err(GraphicsError::SurfaceOutdated);
    }

    let image_count = (capabilities.min_image_count + 1).min(if capabilities.max_image_count > 0 {
        capabilities.max_image_count
    } else {
        u32::MAX
    });

    let swapchain_info = vk::SwapchainCreateInfoKHR::default()
        .surface(request.surface)
        .min_image_count(image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true)
        .old_swapchain(request.old_swapchain);

    let handle = unsafe { swapchain_fn.create_swapchain(&swapchain_info, None) }.map_err(failed)?;
    let images = match unsafe { swapchain_fn.get_swapchain_images(handle) } {
        Ok(images) => images,
        Err(e) => {
            unsafe { swapchain_fn.destroy_swapchain(handle, None) };
            return Err(failed(e));
        }
    };

    log::info!(
        "Swapchain created: {}x{} {:?} {:?}, {} images",
        extent.width,
        extent.height,
        format.format,
        present_mode,
        images.len()
    );

    Ok(Swapchain {
        handle,
        images,
        format: format.format,
        extent,
    })
}
