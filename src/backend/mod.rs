//! Device abstraction layer
//!
//! Provides the [`GpuDevice`] trait the frame graph records through, the
//! types shared with it, and two implementations:
//! - [`dummy::DummyDevice`]: records commands instead of executing them (tests)
//! - [`vulkan::VulkanDevice`]: native Vulkan via ash (feature `vulkan-backend`)

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub use dummy::{DummyDevice, RecordedCommand};
pub use traits::*;
pub use types::*;
