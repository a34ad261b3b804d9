//! Setup-time configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::capability::{Extension, Feature, FeatureList};
use crate::error::{XrError, XrResult};
use crate::instance::ApplicationIdentity;
use crate::interop::ApiVersion;
use crate::types::{EnvironmentBlendMode, FormFactor, ReferenceSpaceKind, ViewConfigurationKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrConfig {
    pub identity: ApplicationIdentity,
    pub features: FeatureList,
    /// Acceptable view configurations, most preferred first.
    pub view_configurations: Vec<ViewConfigurationKind>,
    /// Acceptable blend modes, most preferred first.
    pub blend_modes: Vec<EnvironmentBlendMode>,
    pub gpu_api_version: ApiVersion,
    pub form_factor: FormFactor,
    pub reference_space: ReferenceSpaceKind,
    /// Request a debug messenger when the debug utils extension is negotiated.
    pub debug_messenger: bool,
}

impl Default for XrConfig {
    fn default() -> Self {
        Self {
            identity: ApplicationIdentity::default(),
            features: FeatureList::new()
                .require(Feature::Extension(Extension::KhrVulkanEnable2))
                .request(Feature::Extension(Extension::ExtDebugUtils)),
            view_configurations: vec![
                ViewConfigurationKind::PrimaryStereo,
                ViewConfigurationKind::PrimaryMono,
            ],
            blend_modes: vec![
                EnvironmentBlendMode::Opaque,
                EnvironmentBlendMode::AlphaBlend,
                EnvironmentBlendMode::Additive,
            ],
            gpu_api_version: ApiVersion::new(1, 2, 0),
            form_factor: FormFactor::HeadMountedDisplay,
            reference_space: ReferenceSpaceKind::Stage,
            debug_messenger: true,
        }
    }
}

impl XrConfig {
    pub fn from_json_str(json: &str) -> XrResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| XrError::config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> XrResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading config");
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> XrResult<String> {
        serde_json::to_string_pretty(self).map_err(XrError::config)
    }

    pub fn validate(&self) -> XrResult<()> {
        if self.identity.name.trim().is_empty() {
            return Err(XrError::config("application name must not be empty"));
        }
        if self.view_configurations.is_empty() {
            return Err(XrError::config("view configuration preference list is empty"));
        }
        if self.blend_modes.is_empty() {
            return Err(XrError::config("blend mode preference list is empty"));
        }
        if self.gpu_api_version.major == 0 {
            return Err(XrError::config(format!(
                "GPU API version {} has a zero major version",
                self.gpu_api_version
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = XrConfig::default();
        config.validate().unwrap();
        assert_eq!(config.view_configurations[0], ViewConfigurationKind::PrimaryStereo);
        assert!(config.features.iter().any(|r| r.required));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = XrConfig::from_json_str(
            r#"{
                "identity": { "name": "viewer", "version": 3 },
                "view_configurations": ["primary_mono"],
                "features": [
                    { "kind": "extension", "name": "XR_KHR_vulkan_enable2", "required": true },
                    { "kind": "api_layer", "name": "XR_APILAYER_LUNARG_core_validation" }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.identity.name, "viewer");
        assert_eq!(config.identity.engine_name, "halo");
        assert_eq!(config.view_configurations, vec![ViewConfigurationKind::PrimaryMono]);
        assert_eq!(config.blend_modes, XrConfig::default().blend_modes);
        assert_eq!(config.features.len(), 2);
        let layer = config.features.iter().nth(1).unwrap();
        assert!(!layer.required);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = XrConfig::from_json_str(
            r#"{ "features": [{ "kind": "extension", "name": "XR_ACME_teleport" }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, XrError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = XrConfig::default();
        config.identity.name = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = XrConfig::default();
        config.blend_modes.clear();
        assert!(config.validate().is_err());

        let mut config = XrConfig::default();
        config.view_configurations.clear();
        assert!(config.validate().is_err());

        let mut config = XrConfig::default();
        config.gpu_api_version = ApiVersion::new(0, 9, 0);
        assert!(matches!(config.validate(), Err(XrError::Config(_))));
    }

    #[test]
    fn test_json_round_trip_preserves_config() {
        let config = XrConfig::default();
        let json = config.to_json_string().unwrap();
        assert_eq!(XrConfig::from_json_str(&json).unwrap(), config);
    }
}
