//! Frame graph
//!
//! Passes are declared with named drains (attachments they bind) and sources
//! (drains they hand on to later passes). Links connect sources to drains by
//! address: `"<Pass>.<Slot>"` for pass slots, `"$.<Resource>"` for root
//! resources and [`SWAPCHAIN_SINK`] for the frame's output.
//!
//! Passes run in declaration order. The graph does not sort them; it only
//! inserts layout transitions between them and blits the resource linked to
//! the sink into the swapchain image.

pub mod address;
mod executor;
pub mod graph;
pub mod layout;
pub mod pass;
pub mod resource;
pub mod scheme;

pub use address::{Address, ROOT_SCOPE, SWAPCHAIN_SINK};
pub use graph::{FrameGraph, RenderPassRef};
pub use layout::{GraphLayout, ResolvedAttachment, ResolvedPass, ResolvedResource};
pub use pass::{Drain, PassContext, PassDesc, RecordFn, Source};
pub use resource::ResourceDesc;
pub use scheme::FrameGraphScheme;
