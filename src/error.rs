//! Error types for the frame graph and the devices beneath it.

use thiserror::Error;

/// Errors reported by a [`GpuDevice`](crate::backend::GpuDevice) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error("Failed to initialize device: {0}")]
    InitializationFailed(String),
    #[error("Failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("Failed to create {kind}: {reason}")]
    ResourceCreationFailed { kind: &'static str, reason: String },
    #[error("Command recording failed: {0}")]
    RecordingFailed(String),
    #[error("Queue submission failed: {0}")]
    SubmitFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Fence wait timed out")]
    Timeout,
    #[error("Unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("Surface is out of date and the swapchain must be recreated")]
    SurfaceOutdated,
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
    #[error("Internal device error: {0}")]
    Internal(String),
}

pub type GraphicsResult<T> = Result<T, GraphicsError>;

/// Errors found while validating a [`FrameGraphScheme`](crate::frame_graph::FrameGraphScheme)
/// or while using a compiled graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Malformed address '{0}', expected '<scope>.<slot>'")]
    MalformedAddress(String),
    #[error("Link '{address}' names unknown pass '{pass}'")]
    UnknownPass { address: String, pass: String },
    #[error("Link '{address}' names no drain of pass '{pass}'")]
    UnknownDrain { address: String, pass: String },
    #[error("Link '{address}' names no source of pass '{pass}'")]
    UnknownSource { address: String, pass: String },
    #[error("Link '{address}' names undeclared resource '{resource}'")]
    UnknownResource { address: String, resource: String },
    #[error("Root resource '{0}' cannot be the drain of a link")]
    RootAsDrain(String),
    #[error("The swapchain sink cannot be the source of a link")]
    SinkAsSource,
    #[error("Drain '{pass}.{drain}' has no incoming link")]
    UnlinkedDrain { pass: String, drain: String },
    #[error("Source '{pass}.{source_name}' has no drain with the same name")]
    SourceWithoutDrain { pass: String, source_name: String },
    #[error("Drain '{pass}.{drain}' never resolves to a root resource (cycle)")]
    CyclicChain { pass: String, drain: String },
    #[error("Pass '{pass}' binds resource '{resource}' more than once")]
    AliasedAttachment { pass: String, resource: String },
    #[error("Pass '{0}' declares more than one depth-stencil drain")]
    MultipleDepthAttachments(String),
    #[error("Resource '{0}' is never consumed by any link")]
    UnusedResource(String),
    #[error("Invalid resource '{name}': {reason}")]
    InvalidResource { name: String, reason: String },
    #[error("Nothing is linked to the swapchain sink")]
    MissingSwapchainLink,
    #[error("Resource '{0}' has a depth format and cannot be blitted into the swapchain")]
    DepthSwapchainSource(String),
    #[error("Pass '{consumer}' consumes output of '{producer}', which is not declared before it")]
    OutOfOrder { consumer: String, producer: String },
    #[error("Render pass reference from graph generation {found} used with generation {expected}")]
    StaleRenderPass { found: u64, expected: u64 },
}

/// Any error that can come out of compiling or running a frame graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::UnlinkedDrain {
            pass: "Lighting".to_string(),
            drain: "Albedo".to_string(),
        };
        assert_eq!(err.to_string(), "Drain 'Lighting.Albedo' has no incoming link");

        let err: Error = GraphicsError::SurfaceOutdated.into();
        assert_eq!(
            err.to_string(),
            "Surface is out of date and the swapchain must be recreated"
        );
    }
}
