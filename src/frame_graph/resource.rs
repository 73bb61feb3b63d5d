//! Root resource descriptors

use crate::backend::types::{Extent2d, TextureFormat};
use crate::error::GraphError;

/// Describes a graph-level image whose size follows the swapchain.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDesc {
    /// Width relative to the swapchain (1.0 = full width)
    pub width_scale: f32,
    /// Height relative to the swapchain (1.0 = full height)
    pub height_scale: f32,
    pub format: TextureFormat,
    pub mip_levels: u32,
}

impl ResourceDesc {
    /// Full-screen, single-mip image of the given format.
    pub fn new(format: TextureFormat) -> Self {
        Self {
            width_scale: 1.0,
            height_scale: 1.0,
            format,
            mip_levels: 1,
        }
    }

    pub fn with_relative_size(mut self, width_scale: f32, height_scale: f32) -> Self {
        self.width_scale = width_scale;
        self.height_scale = height_scale;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// Size of the backing image for a swapchain of `extent`; never zero.
    pub fn resolve_extent(&self, extent: Extent2d) -> Extent2d {
        let scale = |size: u32, factor: f32| ((size as f32 * factor).ceil() as u32).max(1);
        Extent2d::new(
            scale(extent.width, self.width_scale),
            scale(extent.height, self.height_scale),
        )
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), GraphError> {
        let invalid = |reason: String| GraphError::InvalidResource {
            name: name.to_string(),
            reason,
        };
        for scale in [self.width_scale, self.height_scale] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(invalid(format!("size scale {} is not positive", scale)));
            }
        }
        if self.mip_levels == 0 {
            return Err(invalid("mip level count is zero".to_string()));
        }
        Ok(())
    }
}

impl Default for ResourceDesc {
    fn default() -> Self {
        Self::new(TextureFormat::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_extent() {
        let extent = Extent2d::new(1280, 720);

        let full = ResourceDesc::new(TextureFormat::Rgba16Float);
        assert_eq!(full.resolve_extent(extent), extent);

        let half = full.clone().with_relative_size(0.5, 0.5);
        assert_eq!(half.resolve_extent(Extent2d::new(101, 33)), Extent2d::new(51, 17));

        let tiny = full.with_relative_size(0.001, 0.001);
        assert_eq!(tiny.resolve_extent(Extent2d::new(10, 10)), Extent2d::new(1, 1));
    }

    #[test]
    fn test_validate() {
        assert!(ResourceDesc::default().validate("Color").is_ok());
        assert!(ResourceDesc::default()
            .with_relative_size(0.0, 1.0)
            .validate("Color")
            .is_err());
        assert!(ResourceDesc::default()
            .with_relative_size(f32::NAN, 1.0)
            .validate("Color")
            .is_err());
        assert!(ResourceDesc::default()
            .with_mip_levels(0)
            .validate("Color")
            .is_err());
    }
}
