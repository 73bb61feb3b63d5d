//! Configuration for frame graphs and devices

use crate::backend::types::Filter;

/// Options applied when compiling a [`FrameGraphScheme`](crate::frame_graph::FrameGraphScheme)
#[derive(Debug, Clone)]
pub struct FrameGraphConfig {
    /// Filter used when blitting the final resource into the swapchain image
    pub blit_filter: Filter,
    /// Fail compilation when a pass consumes the output of a pass declared after it
    pub strict_declaration_order: bool,
    /// Prefix for debug labels and log lines
    pub label: String,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            blit_filter: Filter::Linear,
            strict_declaration_order: false,
            label: "frame-graph".to_string(),
        }
    }
}

impl FrameGraphConfig {
    pub fn with_blit_filter(mut self, filter: Filter) -> Self {
        self.blit_filter = filter;
        self
    }

    pub fn with_strict_declaration_order(mut self, strict: bool) -> Self {
        self.strict_declaration_order = strict;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Configuration for creating a Vulkan device
#[derive(Debug, Clone)]
pub struct VulkanDeviceConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Prefer FIFO presentation; otherwise MAILBOX is used when available
    pub vsync: bool,
    /// Enable the Khronos validation layer
    pub validation: bool,
}

impl Default for VulkanDeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Frame Graph".to_string(),
            vsync: true,
            validation: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FrameGraphConfig::default();
        assert_eq!(config.blit_filter, Filter::Linear);
        assert!(!config.strict_declaration_order);

        let config = config
            .with_blit_filter(Filter::Nearest)
            .with_label("shadow-graph");
        assert_eq!(config.blit_filter, Filter::Nearest);
        assert_eq!(config.label, "shadow-graph");
    }
}
