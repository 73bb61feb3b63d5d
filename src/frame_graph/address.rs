//! Link addresses

use crate::error::GraphError;

/// Scope naming the graph itself rather than a pass.
pub const ROOT_SCOPE: &str = "$";

/// The synthetic drain whose input is blitted into the swapchain image.
pub const SWAPCHAIN_SINK: &str = "$.BLIT_TO_SWAPCHAIN";

const SINK_SLOT: &str = "BLIT_TO_SWAPCHAIN";

/// A parsed `<scope>.<slot>` address.
///
/// The string is split on its first `.`, so slot names may contain dots but
/// pass names may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address<'a> {
    /// `$.<name>`: a root resource
    Root(&'a str),
    /// `$.BLIT_TO_SWAPCHAIN`
    SwapchainSink,
    /// `<pass>.<slot>`
    Slot { pass: &'a str, slot: &'a str },
}

impl<'a> Address<'a> {
    pub fn parse(address: &'a str) -> Result<Self, GraphError> {
        let malformed = || GraphError::MalformedAddress(address.to_string());
        let (scope, slot) = address.split_once('.').ok_or_else(malformed)?;
        if scope.is_empty() || slot.is_empty() {
            return Err(malformed());
        }

        Ok(match (scope, slot) {
            (ROOT_SCOPE, SINK_SLOT) => Address::SwapchainSink,
            (ROOT_SCOPE, name) => Address::Root(name),
            (pass, slot) => Address::Slot { pass, slot },
        })
    }
}

/// Address of a root resource.
pub fn root(resource: &str) -> String {
    format!("{}.{}", ROOT_SCOPE, resource)
}

/// Address of a pass slot.
pub fn slot(pass: &str, slot: &str) -> String {
    format!("{}.{}", pass, slot)
}

/// Whether `name` can be used as the scope of an address.
pub fn is_valid_pass_name(name: &str) -> bool {
    !name.is_empty() && name != ROOT_SCOPE && !name.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(Address::parse("$.Color"), Ok(Address::Root("Color")));
        assert_eq!(Address::parse(SWAPCHAIN_SINK), Ok(Address::SwapchainSink));
        assert_eq!(
            Address::parse("Lighting.HDR"),
            Ok(Address::Slot {
                pass: "Lighting",
                slot: "HDR"
            })
        );
        assert_eq!(
            Address::parse("Bloom.mip.0"),
            Ok(Address::Slot {
                pass: "Bloom",
                slot: "mip.0"
            })
        );
    }

    #[test]
    fn test_malformed_addresses() {
        for bad in ["Color", ".Color", "Pass.", ""] {
            assert_eq!(
                Address::parse(bad),
                Err(GraphError::MalformedAddress(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_pass_names() {
        assert!(is_valid_pass_name("GBuffer"));
        assert!(!is_valid_pass_name("$"));
        assert!(!is_valid_pass_name("G.Buffer"));
        assert!(!is_valid_pass_name(""));
        assert_eq!(root("Depth"), "$.Depth");
        assert_eq!(slot("GBuffer", "Depth"), "GBuffer.Depth");
    }
}
