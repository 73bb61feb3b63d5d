//! Vulkan device implementation using ash
//!
//! One graphics queue that can also present, one command pool, and
//! `gpu-allocator` for image memory. Every object handed out through
//! [`GpuDevice`] lives in a handle table behind a mutex.

mod conversion;
mod instance;
mod swapchain;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ash::khr::{surface, swapchain as khr_swapchain};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::traits::GpuDevice;
use crate::backend::types::*;
use crate::config::VulkanDeviceConfig;
use crate::error::{GraphicsError, GraphicsResult};

pub use conversion::*;
use swapchain::{Swapchain, SwapchainRequest};

struct VkImage {
    image: vk::Image,
    /// Full-image view of mip 0; `None` for swapchain images
    view: Option<vk::ImageView>,
    /// `None` for swapchain images, which the swapchain owns
    allocation: Option<Allocation>,
    aspect: vk::ImageAspectFlags,
}

struct DeviceState {
    allocator: Option<Allocator>,
    images: HashMap<u64, VkImage>,
    render_passes: HashMap<u64, vk::RenderPass>,
    render_targets: HashMap<u64, vk::Framebuffer>,
    command_buffers: HashMap<u64, vk::CommandBuffer>,
    fences: HashMap<u64, vk::Fence>,
    swapchain: Swapchain,
    /// Handles of the swapchain images, by swapchain index
    swapchain_handles: Vec<ImageHandle>,
}

impl DeviceState {
    fn command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<vk::CommandBuffer> {
        self.command_buffers
            .get(&command_buffer.0)
            .copied()
            .ok_or(GraphicsError::InvalidHandle {
                kind: "command buffer",
                id: command_buffer.0,
            })
    }

    fn image(&self, image: ImageHandle) -> GraphicsResult<&VkImage> {
        self.images.get(&image.0).ok_or(GraphicsError::InvalidHandle {
            kind: "image",
            id: image.0,
        })
    }
}

/// Vulkan device presenting to a window surface
pub struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_fn: surface::Instance,
    swapchain_fn: khr_swapchain::Device,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    command_pool: vk::CommandPool,
    vsync: bool,
    state: Mutex<DeviceState>,
    next_id: AtomicU64,
}

impl VulkanDevice {
    /// Create a device presenting to `window`.
    ///
    /// `extent` is the window's inner size; it is only used when the surface
    /// does not dictate the swapchain size itself.
    pub fn new<W>(window: &W, extent: Extent2d, config: &VulkanDeviceConfig) -> GraphicsResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let init_failed = |e: vk::Result| GraphicsError::InitializationFailed(e.to_string());

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GraphicsError::InitializationFailed(e.to_string()))?;

        let display_handle = window
            .display_handle()
            .map_err(|e| GraphicsError::InitializationFailed(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GraphicsError::InitializationFailed(e.to_string()))?
            .as_raw();

        let instance::InstanceBundle {
            instance,
            debug_utils,
        } = instance::create_instance(&entry, display_handle, config)?;

        let surface_fn = surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .map_err(init_failed)?;

        let physical_devices = unsafe { instance.enumerate_physical_devices() }.map_err(init_failed)?;
        let (physical_device, queue_family) = physical_devices
            .into_iter()
            .filter_map(|pd| {
                Self::find_queue_family(&instance, pd, &surface_fn, surface).map(|qf| (pd, qf))
            })
            .max_by_key(|&(pd, _)| {
                let properties = unsafe { instance.get_physical_device_properties(pd) };
                properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
            })
            .ok_or_else(|| {
                GraphicsError::InitializationFailed("No suitable physical device".into())
            })?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("Using Vulkan device: {}", device_name);

        let queue_priorities = [1.0f32];
        let queue_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];

        let device_extensions = [khr_swapchain::NAME.as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::default();
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&device_features);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(init_failed)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GraphicsError::InitializationFailed(e.to_string()))?;

        let swapchain_fn = khr_swapchain::Device::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool =
            unsafe { device.create_command_pool(&pool_info, None) }.map_err(init_failed)?;

        let swapchain = swapchain::create_swapchain(
            &surface_fn,
            &swapchain_fn,
            &SwapchainRequest {
                physical_device,
                surface,
                extent,
                vsync: config.vsync,
                old_swapchain: vk::SwapchainKHR::null(),
            },
        )?;

        let vulkan = Self {
            _entry: entry,
            instance,
            debug_utils,
            surface_fn,
            swapchain_fn,
            surface,
            physical_device,
            device,
            queue,
            queue_family,
            command_pool,
            vsync: config.vsync,
            state: Mutex::new(DeviceState {
                allocator: Some(allocator),
                images: HashMap::new(),
                render_passes: HashMap::new(),
                render_targets: HashMap::new(),
                command_buffers: HashMap::new(),
                fences: HashMap::new(),
                swapchain,
                swapchain_handles: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        };
        vulkan.register_swapchain_images(&mut vulkan.state.lock());

        Ok(vulkan)
    }

    fn find_queue_family(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface_fn: &surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Option<u32> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        queue_families
            .iter()
            .enumerate()
            .find(|(index, family)| {
                let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                let supports_surface = unsafe {
                    surface_fn
                        .get_physical_device_surface_support(physical_device, *index as u32, surface)
                        .unwrap_or(false)
                };
                supports_graphics && supports_surface
            })
            .map(|(index, _)| index as u32)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register_swapchain_images(&self, state: &mut DeviceState) {
        for handle in state.swapchain_handles.drain(..) {
            state.images.remove(&handle.0);
        }
        let images = state.swapchain.images.clone();
        for image in images {
            let id = self.next_id();
            state.images.insert(
                id,
                VkImage {
                    image,
                    view: None,
                    allocation: None,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
            );
            state.swapchain_handles.push(ImageHandle(id));
        }
    }

    /// The logical device, for recording draw work inside pass callbacks
    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn vk_command_buffer(&self, command_buffer: CommandBufferHandle) -> Option<vk::CommandBuffer> {
        self.state.lock().command_buffers.get(&command_buffer.0).copied()
    }

    pub fn vk_render_pass(&self, render_pass: RenderPassHandle) -> Option<vk::RenderPass> {
        self.state.lock().render_passes.get(&render_pass.0).copied()
    }

    pub fn vk_image(&self, image: ImageHandle) -> Option<vk::Image> {
        self.state.lock().images.get(&image.0).map(|i| i.image)
    }

    fn command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<vk::CommandBuffer> {
        self.state.lock().command_buffer(command_buffer)
    }

    fn fence(&self, fence: FenceHandle) -> GraphicsResult<vk::Fence> {
        self.state
            .lock()
            .fences
            .get(&fence.0)
            .copied()
            .ok_or(GraphicsError::InvalidHandle {
                kind: "fence",
                id: fence.0,
            })
    }

    fn create_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> GraphicsResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed {
                kind: "image view",
                reason: e.to_string(),
            }
        })
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn create_image(&self, desc: &ImageDescriptor) -> GraphicsResult<ImageHandle> {
        let failed = |reason: String| GraphicsError::ResourceCreationFailed {
            kind: "image",
            reason,
        };
        let format = convert_format(desc.format);
        let aspect = aspect_mask(desc.format);

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(convert_image_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| failed(e.to_string()))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let mut state = self.state.lock();
        let allocation = state
            .allocator
            .as_mut()
            .ok_or_else(|| failed("allocator not available".into()))
            .and_then(|allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: desc.label.as_deref().unwrap_or("frame graph image"),
                        requirements,
                        location: MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| failed(e.to_string()))
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| failed(e.to_string()))
        .and_then(|_| self.create_view(image, format, aspect));
        let view = match bound {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                if let Some(allocator) = state.allocator.as_mut() {
                    let _ = allocator.free(allocation);
                }
                return Err(e);
            }
        };

        let id = self.next_id();
        state.images.insert(
            id,
            VkImage {
                image,
                view: Some(view),
                allocation: Some(allocation),
                aspect,
            },
        );
        log::debug!("Vulkan: created image {} {:?}", id, desc.label);
        Ok(ImageHandle(id))
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut state = self.state.lock();
        // Swapchain images are owned by the swapchain
        let owned = state
            .images
            .get(&image.0)
            .is_some_and(|i| i.allocation.is_some());
        if !owned {
            return;
        }
        let Some(VkImage {
            image: vk_image,
            view,
            allocation: Some(allocation),
            ..
        }) = state.images.remove(&image.0)
        else {
            return;
        };
        unsafe {
            if let Some(view) = view {
                self.device.destroy_image_view(view, None);
            }
            self.device.destroy_image(vk_image, None);
        }
        if let Some(allocator) = state.allocator.as_mut() {
            let _ = allocator.free(allocation);
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> GraphicsResult<RenderPassHandle> {
        let attachments: Vec<vk::AttachmentDescription> = desc
            .attachments
            .iter()
            .map(|a| {
                let layout = convert_layout(a.layout);
                let load_op = convert_load_op(a.load_op);
                let store_op = convert_store_op(a.store_op);
                let (stencil_load_op, stencil_store_op) = if a.format.has_stencil() {
                    (load_op, store_op)
                } else {
                    (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
                };
                vk::AttachmentDescription::default()
                    .format(convert_format(a.format))
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(load_op)
                    .store_op(store_op)
                    .stencil_load_op(stencil_load_op)
                    .stencil_store_op(stencil_store_op)
                    .initial_layout(layout)
                    .final_layout(layout)
            })
            .collect();

        let reference = |index: usize, layout: ImageLayout| vk::AttachmentReference {
            attachment: index as u32,
            layout: convert_layout(layout),
        };
        let mut color_refs = Vec::new();
        let mut input_refs = Vec::new();
        let mut depth_ref = None;
        for (index, attachment) in desc.attachments.iter().enumerate() {
            match attachment.binding {
                BindingMode::ColorAttachment => color_refs.push(reference(index, attachment.layout)),
                BindingMode::InputAttachment => input_refs.push(reference(index, attachment.layout)),
                BindingMode::DepthStencilAttachment => {
                    depth_ref = Some(reference(index, attachment.layout))
                }
            }
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .input_attachments(&input_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses);

        let render_pass = unsafe { self.device.create_render_pass(&render_pass_info, None) }
            .map_err(|e| GraphicsError::ResourceCreationFailed {
                kind: "render pass",
                reason: e.to_string(),
            })?;

        let id = self.next_id();
        self.state.lock().render_passes.insert(id, render_pass);
        log::debug!("Vulkan: created render pass {} {:?}", id, desc.label);
        Ok(RenderPassHandle(id))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        if let Some(render_pass) = self.state.lock().render_passes.remove(&render_pass.0) {
            unsafe { self.device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_render_target(
        &self,
        desc: &RenderTargetDescriptor,
    ) -> GraphicsResult<RenderTargetHandle> {
        let mut state = self.state.lock();
        let render_pass = *state.render_passes.get(&desc.render_pass.0).ok_or(
            GraphicsError::InvalidHandle {
                kind: "render pass",
                id: desc.render_pass.0,
            },
        )?;
        let views = desc
            .attachments
            .iter()
            .map(|image| {
                state
                    .images
                    .get(&image.0)
                    .and_then(|i| i.view)
                    .ok_or(GraphicsError::InvalidHandle {
                        kind: "image",
                        id: image.0,
                    })
            })
            .collect::<GraphicsResult<Vec<_>>>()?;

        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(desc.extent.width)
            .height(desc.extent.height)
            .layers(1);

        let framebuffer = unsafe { self.device.create_framebuffer(&framebuffer_info, None) }
            .map_err(|e| GraphicsError::ResourceCreationFailed {
                kind: "render target",
                reason: e.to_string(),
            })?;

        let id = self.next_id();
        state.render_targets.insert(id, framebuffer);
        Ok(RenderTargetHandle(id))
    }

    fn destroy_render_target(&self, render_target: RenderTargetHandle) {
        if let Some(framebuffer) = self.state.lock().render_targets.remove(&render_target.0) {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(|e| GraphicsError::ResourceCreationFailed {
            kind: "fence",
            reason: e.to_string(),
        })?;

        let id = self.next_id();
        self.state.lock().fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&self, fence: FenceHandle, timeout: Option<Duration>) -> GraphicsResult<()> {
        let fence = self.fence(fence)?;
        let timeout = timeout.map_or(u64::MAX, |t| t.as_nanos().min(u64::MAX as u128) as u64);
        unsafe { self.device.wait_for_fences(&[fence], true, timeout) }
            .map_err(|e| map_vk_error(e, "wait for fence"))
    }

    fn reset_fence(&self, fence: FenceHandle) -> GraphicsResult<()> {
        let fence = self.fence(fence)?;
        unsafe { self.device.reset_fences(&[fence]) }.map_err(|e| map_vk_error(e, "reset fence"))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        if let Some(fence) = self.state.lock().fences.remove(&fence.0) {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }

    fn allocate_command_buffer(&self) -> GraphicsResult<CommandBufferHandle> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        // The pool is externally synchronized by the state lock
        let mut state = self.state.lock();
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| GraphicsError::ResourceCreationFailed {
                kind: "command buffer",
                reason: e.to_string(),
            })?
            .into_iter()
            .next()
            .ok_or_else(|| GraphicsError::Internal("no command buffer allocated".into()))?;

        let id = self.next_id();
        state.command_buffers.insert(id, command_buffer);
        Ok(CommandBufferHandle(id))
    }

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle) {
        let mut state = self.state.lock();
        if let Some(command_buffer) = state.command_buffers.remove(&command_buffer.0) {
            unsafe {
                self.device
                    .free_command_buffers(self.command_pool, &[command_buffer])
            };
        }
    }

    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let cmd = self.command_buffer(command_buffer)?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| GraphicsError::RecordingFailed(e.to_string()))
    }

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let cmd = self.command_buffer(command_buffer)?;
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| GraphicsError::RecordingFailed(e.to_string()))
    }

    fn submit(
        &self,
        command_buffer: CommandBufferHandle,
        signal: Option<FenceHandle>,
    ) -> GraphicsResult<()> {
        let cmd = self.command_buffer(command_buffer)?;
        let fence = match signal {
            Some(fence) => self.fence(fence)?,
            None => vk::Fence::null(),
        };

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        // Queue access is externally synchronized by the state lock
        let _state = self.state.lock();
        unsafe { self.device.queue_submit(self.queue, &[submit_info], fence) }
            .map_err(|e| match map_vk_error(e, "queue submit") {
                GraphicsError::Internal(reason) => GraphicsError::SubmitFailed(reason),
                other => other,
            })
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| map_vk_error(e, "wait idle"))
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: CommandBufferHandle,
        barriers: &[ImageBarrier],
    ) -> GraphicsResult<()> {
        let state = self.state.lock();
        let cmd = state.command_buffer(command_buffer)?;

        let mut src_stages = vk::PipelineStageFlags::empty();
        let mut dst_stages = vk::PipelineStageFlags::empty();
        let image_barriers = barriers
            .iter()
            .map(|barrier| -> GraphicsResult<vk::ImageMemoryBarrier> {
                let image = state.image(barrier.image)?;
                src_stages |= convert_stages(barrier.src_stages);
                dst_stages |= convert_stages(barrier.dst_stages);
                Ok(vk::ImageMemoryBarrier::default()
                    .old_layout(convert_layout(barrier.old_layout))
                    .new_layout(convert_layout(barrier.new_layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: image.aspect,
                        base_mip_level: 0,
                        level_count: vk::REMAINING_MIP_LEVELS,
                        base_array_layer: 0,
                        layer_count: vk::REMAINING_ARRAY_LAYERS,
                    })
                    .src_access_mask(convert_access(barrier.src_access))
                    .dst_access_mask(convert_access(barrier.dst_access)))
            })
            .collect::<GraphicsResult<Vec<_>>>()?;
        if image_barriers.is_empty() {
            return Ok(());
        }

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stages,
                dst_stages,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &image_barriers,
            );
        }
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: CommandBufferHandle,
        begin: &RenderPassBegin<'_>,
    ) -> GraphicsResult<()> {
        let state = self.state.lock();
        let cmd = state.command_buffer(command_buffer)?;
        let render_pass = *state.render_passes.get(&begin.render_pass.0).ok_or(
            GraphicsError::InvalidHandle {
                kind: "render pass",
                id: begin.render_pass.0,
            },
        )?;
        let framebuffer = *state.render_targets.get(&begin.render_target.0).ok_or(
            GraphicsError::InvalidHandle {
                kind: "render target",
                id: begin.render_target.0,
            },
        )?;

        let clear_values: Vec<vk::ClearValue> = begin
            .clear_values
            .iter()
            .map(|&value| convert_clear_value(value))
            .collect();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: begin.extent.width,
                    height: begin.extent.height,
                },
            })
            .clear_values(&clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE)
        };
        Ok(())
    }

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let cmd = self.command_buffer(command_buffer)?;
        unsafe { self.device.cmd_end_render_pass(cmd) };
        Ok(())
    }

    fn cmd_blit_image(
        &self,
        command_buffer: CommandBufferHandle,
        region: &BlitRegion,
    ) -> GraphicsResult<()> {
        let state = self.state.lock();
        let cmd = state.command_buffer(command_buffer)?;
        let src = state.image(region.src)?;
        let dst = state.image(region.dst)?;

        let corner = |extent: Extent2d| vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let layers = |aspect_mask: vk::ImageAspectFlags| vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let blit = vk::ImageBlit::default()
            .src_subresource(layers(src.aspect))
            .src_offsets([vk::Offset3D::default(), corner(region.src_extent)])
            .dst_subresource(layers(dst.aspect))
            .dst_offsets([vk::Offset3D::default(), corner(region.dst_extent)]);

        unsafe {
            self.device.cmd_blit_image(
                cmd,
                src.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                convert_filter(region.filter),
            );
        }
        Ok(())
    }

    fn acquire_next_image(&self, fence: FenceHandle) -> GraphicsResult<AcquiredImage> {
        let fence = self.fence(fence)?;
        let state = self.state.lock();
        let (index, suboptimal) = unsafe {
            self.swapchain_fn.acquire_next_image(
                state.swapchain.handle,
                u64::MAX,
                vk::Semaphore::null(),
                fence,
            )
        }
        .map_err(|e| match map_vk_error(e, "acquire") {
            GraphicsError::Internal(reason) => GraphicsError::AcquireImageFailed(reason),
            other => other,
        })?;

        let image = state
            .swapchain_handles
            .get(index as usize)
            .copied()
            .ok_or_else(|| GraphicsError::AcquireImageFailed(format!("bad image index {}", index)))?;
        Ok(AcquiredImage {
            index,
            image,
            suboptimal,
        })
    }

    fn present(&self, image_index: u32) -> GraphicsResult<()> {
        let state = self.state.lock();
        let swapchains = [state.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_fn.queue_present(self.queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => {
                log::debug!("Vulkan: present reported a suboptimal swapchain");
                Ok(())
            }
            Err(e) => Err(match map_vk_error(e, "present") {
                GraphicsError::Internal(reason) => GraphicsError::PresentFailed(reason),
                other => other,
            }),
        }
    }

    fn swapchain_extent(&self) -> Extent2d {
        let extent = self.state.lock().swapchain.extent;
        Extent2d::new(extent.width, extent.height)
    }

    fn swapchain_format(&self) -> TextureFormat {
        let format = self.state.lock().swapchain.format;
        convert_format_back(format).unwrap_or(TextureFormat::Bgra8UnormSrgb)
    }

    fn swapchain_image_count(&self) -> u32 {
        self.state.lock().swapchain_handles.len() as u32
    }

    fn swapchain_image(&self, index: u32) -> Option<ImageHandle> {
        self.state.lock().swapchain_handles.get(index as usize).copied()
    }

    fn recreate_swapchain(&self, extent: Extent2d) -> GraphicsResult<()> {
        self.wait_idle()?;

        let mut state = self.state.lock();
        let old = state.swapchain.handle;
        let swapchain = swapchain::create_swapchain(
            &self.surface_fn,
            &self.swapchain_fn,
            &SwapchainRequest {
                physical_device: self.physical_device,
                surface: self.surface,
                extent,
                vsync: self.vsync,
                old_swapchain: old,
            },
        )?;
        unsafe { self.swapchain_fn.destroy_swapchain(old, None) };
        state.swapchain = swapchain;
        self.register_swapchain_images(&mut state);
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let state = self.state.get_mut();
            for (_, framebuffer) in state.render_targets.drain() {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for (_, render_pass) in state.render_passes.drain() {
                self.device.destroy_render_pass(render_pass, None);
            }
            for (_, image) in state.images.drain() {
                if let Some(view) = image.view {
                    self.device.destroy_image_view(view, None);
                }
                if let Some(allocation) = image.allocation {
                    self.device.destroy_image(image.image, None);
                    if let Some(allocator) = state.allocator.as_mut() {
                        let _ = allocator.free(allocation);
                    }
                }
            }
            for (_, fence) in state.fences.drain() {
                self.device.destroy_fence(fence, None);
            }
            state.command_buffers.clear();
            self.device.destroy_command_pool(self.command_pool, None);

            // The allocator must go before the device
            drop(state.allocator.take());

            self.swapchain_fn
                .destroy_swapchain(state.swapchain.handle, None);
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.surface_fn.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}
