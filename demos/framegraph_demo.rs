//! Two-pass frame graph rendered into a window
//!
//! Run with:
//!   cargo run --example framegraph_demo
//!   cargo run --example framegraph_demo -- --frames 600 --no-vsync
//!
//! The "Scene" pass clears color and depth, then paints an animated
//! background. The "Post" pass loads that color and paints a box on top.
//! The result is blitted into the swapchain.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use clap::Parser;
use framegraph::*;
use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

#[derive(Parser, Debug)]
#[command(about = "Renders a two-pass frame graph into a window")]
struct Args {
    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Present with MAILBOX when available instead of FIFO
    #[arg(long)]
    no_vsync: bool,
}

/// What the pass callbacks read each frame
struct Scene {
    time: f32,
}

/// Clear `rect` of the first attachment of the current pass to `color`.
fn clear_rect(ctx: &PassContext<'_>, rect: vk::Rect2D, color: [f32; 4]) {
    let Some(vulkan) = ctx.device_as::<VulkanDevice>() else {
        return;
    };
    let Some(cmd) = vulkan.vk_command_buffer(ctx.command_buffer) else {
        return;
    };

    let attachment = vk::ClearAttachment {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        color_attachment: 0,
        clear_value: vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
    };
    let rect = vk::ClearRect {
        rect,
        base_array_layer: 0,
        layer_count: 1,
    };
    unsafe {
        vulkan
            .raw_device()
            .cmd_clear_attachments(cmd, &[attachment], &[rect])
    };
}

fn full_rect(extent: Extent2d) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: vk::Extent2D {
            width: extent.width,
            height: extent.height,
        },
    }
}

fn build_scheme() -> FrameGraphScheme<Scene> {
    let mut scheme = FrameGraphScheme::new();
    scheme
        .add_resource("Color", ResourceDesc::new(TextureFormat::Rgba8Unorm))
        .add_resource("Depth", ResourceDesc::new(TextureFormat::Depth32Float))
        .add_pass(
            "Scene",
            PassDesc::new()
                .with_drain(Drain::color("Color").with_clear_value(ClearValue::color(0.0, 0.0, 0.0, 1.0)))
                .with_drain(Drain::depth_stencil("Depth"))
                .with_source(Source::new("Color"))
                .with_record(|ctx, scene: &Scene| {
                    let t = scene.time;
                    let color = [
                        0.5 + 0.5 * t.sin(),
                        0.5 + 0.5 * (t * 0.7).sin(),
                        0.5 + 0.5 * (t * 1.3).cos(),
                        1.0,
                    ];
                    clear_rect(ctx, full_rect(ctx.extent), color);
                }),
        )
        .add_pass(
            "Post",
            PassDesc::new()
                .with_drain(Drain::color("Color").with_load_op(LoadOp::Load))
                .with_source(Source::new("Color"))
                .with_record(|ctx, scene: &Scene| {
                    let extent = ctx.extent;
                    let size = vk::Extent2D {
                        width: extent.width / 3,
                        height: extent.height / 3,
                    };
                    let swing = (scene.time.sin() * 0.5 + 0.5) * (extent.width - size.width) as f32;
                    let rect = vk::Rect2D {
                        offset: vk::Offset2D {
                            x: swing as i32,
                            y: ((extent.height - size.height) / 2) as i32,
                        },
                        extent: size,
                    };
                    clear_rect(ctx, rect, [1.0, 1.0, 1.0, 1.0]);
                }),
        )
        .add_link("$.Color", "Scene.Color")
        .add_link("$.Depth", "Scene.Depth")
        .add_link("Scene.Color", "Post.Color")
        .add_link("Post.Color", SWAPCHAIN_SINK);
    scheme
}

/// Fields drop in order: the graph before the device, the device before the window.
struct App {
    graph: Option<FrameGraph<Scene>>,
    device: Arc<VulkanDevice>,
    window: Window,
    started: Instant,
    frames: u64,
    max_frames: Option<u64>,
    needs_rebuild: bool,
}

impl App {
    fn window_extent(&self) -> Extent2d {
        let size = self.window.inner_size();
        Extent2d::new(size.width, size.height)
    }

    fn rebuild(&mut self) -> Result<(), Error> {
        self.graph = None;
        self.device.recreate_swapchain(self.window_extent())?;
        self.graph = Some(build_scheme().compile(self.device.clone())?);
        self.needs_rebuild = false;
        Ok(())
    }

    /// Returns false when the app should exit.
    fn frame(&mut self) -> Result<bool, Error> {
        if self.window_extent().is_empty() {
            // Minimized
            return Ok(true);
        }
        let outdated = self.graph.as_ref().map_or(true, |g| g.is_outdated());
        if self.needs_rebuild || outdated {
            self.rebuild()?;
        }
        let Some(graph) = self.graph.as_mut() else {
            return Ok(true);
        };

        let scene = Scene {
            time: self.started.elapsed().as_secs_f32(),
        };
        match graph.execute(&scene) {
            Ok(()) => self.frames += 1,
            Err(GraphicsError::SurfaceOutdated) => self.needs_rebuild = true,
            Err(e) => return Err(e.into()),
        }

        Ok(self.max_frames.map_or(true, |max| self.frames < max))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title("Frame Graph Demo")
        .with_inner_size(PhysicalSize::new(1280, 720))
        .build(&event_loop)?;

    let size = window.inner_size();
    let config = VulkanDeviceConfig {
        vsync: !args.no_vsync,
        ..Default::default()
    };
    let device = Arc::new(VulkanDevice::new(
        &window,
        Extent2d::new(size.width, size.height),
        &config,
    )?);
    let graph = build_scheme().compile(device.clone())?;

    let mut app = App {
        graph: Some(graph),
        device,
        window,
        started: Instant::now(),
        frames: 0,
        max_frames: args.frames,
        needs_rebuild: false,
    };

    event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                ..
            } => elwt.exit(),
            Event::WindowEvent {
                event: WindowEvent::Resized(_),
                ..
            } => app.needs_rebuild = true,
            Event::AboutToWait => match app.frame() {
                Ok(true) => app.window.request_redraw(),
                Ok(false) => {
                    log::info!("Rendered {} frames", app.frames);
                    elwt.exit();
                }
                Err(e) => {
                    log::error!("Frame failed: {}", e);
                    elwt.exit();
                }
            },
            _ => {}
        }
    })?;

    Ok(())
}
