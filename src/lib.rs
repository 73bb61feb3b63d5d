//! Frame Graph - declarative render passes compiled into an executable frame
//!
//! A [`FrameGraphScheme`] collects named passes, graph-level resources and
//! the links between pass outputs (sources) and pass inputs (drains).
//! Compiling it against a [`GpuDevice`] validates the wiring, infers image
//! usage, allocates images, builds native render passes and render targets,
//! and yields a [`FrameGraph`] that executes one frame per call:
//! acquire, per-pass barriers and recording, final blit, present.
//!
//! Two devices are provided:
//! - [`DummyDevice`]: records commands instead of executing them (tests)
//! - `VulkanDevice`: native Vulkan via ash (feature `vulkan-backend`)
//!
//! ```
//! use framegraph::*;
//!
//! let device = std::sync::Arc::new(DummyDevice::new(Extent2d::new(640, 480)));
//!
//! let mut scheme = FrameGraphScheme::<()>::new();
//! scheme
//!     .add_resource("Color", ResourceDesc::new(TextureFormat::Rgba8Unorm))
//!     .add_pass(
//!         "Main",
//!         PassDesc::new()
//!             .with_drain(Drain::color("Color"))
//!             .with_source(Source::new("Color")),
//!     )
//!     .add_link("$.Color", "Main.Color")
//!     .add_link("Main.Color", SWAPCHAIN_SINK);
//!
//! let mut graph = scheme.compile(device).unwrap();
//! graph.execute(&()).unwrap();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod frame_graph;

pub use backend::dummy::{DummyDevice, RecordedCommand};
pub use backend::traits::GpuDevice;
pub use backend::types::*;
#[cfg(feature = "vulkan-backend")]
pub use backend::vulkan::VulkanDevice;
pub use config::{FrameGraphConfig, VulkanDeviceConfig};
pub use error::{Error, GraphError, GraphicsError, GraphicsResult};
pub use frame_graph::*;
