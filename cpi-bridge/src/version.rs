//! Version information for the bridge.

/// cpi-bridge version from Cargo.toml
pub const CPI_BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    pub cpi_bridge: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            cpi_bridge: CPI_BRIDGE_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        assert_eq!(VersionInfo::new().cpi_bridge, CPI_BRIDGE_VERSION);
    }

    #[test]
    fn version_info_serializes() {
        let info = VersionInfo { cpi_bridge: "0.1.0" };
        insta::assert_json_snapshot!(info, @r#"
        {
          "cpi_bridge": "0.1.0"
        }
        "#);
    }
}
