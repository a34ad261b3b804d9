//! Capability negotiation: resolving the requested api layers and extensions
//! against what the runtime advertises.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RtResultExt, XrError, XrResult};
use crate::runtime::XrRuntime;

/// Api layers this crate knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiLayer {
    CoreValidation,
    ApiDump,
    BestPracticesValidation,
}

const API_LAYER_NAMES: &[(ApiLayer, &str)] = &[
    (ApiLayer::CoreValidation, "XR_APILAYER_LUNARG_core_validation"),
    (ApiLayer::ApiDump, "XR_APILAYER_LUNARG_api_dump"),
    (
        ApiLayer::BestPracticesValidation,
        "XR_APILAYER_KHRONOS_best_practices_validation",
    ),
];

/// Instance extensions this crate knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    KhrVulkanEnable2,
    KhrCompositionLayerDepth,
    KhrVisibilityMask,
    KhrAndroidCreateInstance,
    ExtDebugUtils,
    ExtHandTracking,
    ExtEyeGazeInteraction,
    ExtHpMixedRealityController,
    FbDisplayRefreshRate,
    MsftHandInteraction,
}

const EXTENSION_NAMES: &[(Extension, &str)] = &[
    (Extension::KhrVulkanEnable2, "XR_KHR_vulkan_enable2"),
    (
        Extension::KhrCompositionLayerDepth,
        "XR_KHR_composition_layer_depth",
    ),
    (Extension::KhrVisibilityMask, "XR_KHR_visibility_mask"),
    (
        Extension::KhrAndroidCreateInstance,
        "XR_KHR_android_create_instance",
    ),
    (Extension::ExtDebugUtils, "XR_EXT_debug_utils"),
    (Extension::ExtHandTracking, "XR_EXT_hand_tracking"),
    (Extension::ExtEyeGazeInteraction, "XR_EXT_eye_gaze_interaction"),
    (
        Extension::ExtHpMixedRealityController,
        "XR_EXT_hp_mixed_reality_controller",
    ),
    (Extension::FbDisplayRefreshRate, "XR_FB_display_refresh_rate"),
    (Extension::MsftHandInteraction, "XR_MSFT_hand_interaction"),
];

impl ApiLayer {
    pub fn name(self) -> &'static str {
        API_LAYER_NAMES
            .iter()
            .find(|(layer, _)| *layer == self)
            .map(|(_, name)| *name)
            .unwrap_or("XR_APILAYER_UNKNOWN")
    }
}

impl Extension {
    pub fn name(self) -> &'static str {
        EXTENSION_NAMES
            .iter()
            .find(|(ext, _)| *ext == self)
            .map(|(_, name)| *name)
            .unwrap_or("XR_UNKNOWN_extension")
    }
}

impl FromStr for ApiLayer {
    type Err = XrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        API_LAYER_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(layer, _)| *layer)
            .ok_or_else(|| XrError::config(format!("unknown api layer '{s}'")))
    }
}

impl FromStr for Extension {
    type Err = XrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EXTENSION_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(ext, _)| *ext)
            .ok_or_else(|| XrError::config(format!("unknown extension '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    ApiLayer(ApiLayer),
    Extension(Extension),
}

impl Feature {
    pub fn name(self) -> &'static str {
        match self {
            Feature::ApiLayer(layer) => layer.name(),
            Feature::Extension(ext) => ext.name(),
        }
    }

    fn kind(self) -> FeatureKind {
        match self {
            Feature::ApiLayer(_) => FeatureKind::ApiLayer,
            Feature::Extension(_) => FeatureKind::Extension,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    ApiLayer,
    Extension,
}

/// One requested api layer or extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFeatureRequest", into = "RawFeatureRequest")]
pub struct FeatureRequest {
    pub feature: Feature,
    pub required: bool,
}

impl FeatureRequest {
    pub fn required(feature: Feature) -> Self {
        Self {
            feature,
            required: true,
        }
    }

    pub fn optional(feature: Feature) -> Self {
        Self {
            feature,
            required: false,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawFeatureRequest {
    kind: FeatureKind,
    name: String,
    #[serde(default)]
    required: bool,
}

impl TryFrom<RawFeatureRequest> for FeatureRequest {
    type Error = XrError;

    fn try_from(raw: RawFeatureRequest) -> Result<Self, Self::Error> {
        let feature = match raw.kind {
            FeatureKind::ApiLayer => Feature::ApiLayer(raw.name.parse()?),
            FeatureKind::Extension => Feature::Extension(raw.name.parse()?),
        };
        Ok(Self {
            feature,
            required: raw.required,
        })
    }
}

impl From<FeatureRequest> for RawFeatureRequest {
    fn from(req: FeatureRequest) -> Self {
        Self {
            kind: req.feature.kind(),
            name: req.feature.name().to_string(),
            required: req.required,
        }
    }
}

/// Ordered, duplicate-free list of feature requests.
///
/// Pushing a feature that is already present keeps the first position and
/// upgrades it to required if either request was required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<FeatureRequest>", into = "Vec<FeatureRequest>")]
pub struct FeatureList {
    entries: Vec<FeatureRequest>,
}

impl FeatureList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: FeatureRequest) {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.feature == request.feature)
        {
            Some(existing) => existing.required |= request.required,
            None => self.entries.push(request),
        }
    }

    pub fn require(mut self, feature: Feature) -> Self {
        self.push(FeatureRequest::required(feature));
        self
    }

    pub fn request(mut self, feature: Feature) -> Self {
        self.push(FeatureRequest::optional(feature));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureRequest> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<FeatureRequest>> for FeatureList {
    fn from(requests: Vec<FeatureRequest>) -> Self {
        requests.into_iter().collect()
    }
}

impl From<FeatureList> for Vec<FeatureRequest> {
    fn from(list: FeatureList) -> Self {
        list.entries
    }
}

impl FromIterator<FeatureRequest> for FeatureList {
    fn from_iter<I: IntoIterator<Item = FeatureRequest>>(iter: I) -> Self {
        let mut list = FeatureList::new();
        for request in iter {
            list.push(request);
        }
        list
    }
}

/// The requested features the runtime confirmed, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NegotiatedCapabilitySet {
    features: Vec<Feature>,
}

impl NegotiatedCapabilitySet {
    pub fn contains(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn has_extension(&self, ext: Extension) -> bool {
        self.contains(Feature::Extension(ext))
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.features
            .iter()
            .filter(|f| matches!(f, Feature::ApiLayer(_)))
            .map(|f| f.name())
            .collect()
    }

    pub fn extension_names(&self) -> Vec<&'static str> {
        self.features
            .iter()
            .filter(|f| matches!(f, Feature::Extension(_)))
            .map(|f| f.name())
            .collect()
    }
}

/// Query the runtime and negotiate `requested` against its advertised layers and extensions.
///
/// Only inspects the runtime; calling it twice yields the same result.
pub fn negotiate<R: XrRuntime + ?Sized>(
    runtime: &R,
    requested: &FeatureList,
) -> XrResult<NegotiatedCapabilitySet> {
    let layers = runtime
        .enumerate_api_layers()
        .op("xrEnumerateApiLayerProperties")?;
    let extensions = runtime
        .enumerate_extensions()
        .op("xrEnumerateInstanceExtensionProperties")?;
    negotiate_against(requested, &layers, &extensions)
}

/// Stable filter of `requested` against advertised name lists.
pub fn negotiate_against(
    requested: &FeatureList,
    advertised_layers: &[String],
    advertised_extensions: &[String],
) -> XrResult<NegotiatedCapabilitySet> {
    let mut features = Vec::with_capacity(requested.len());
    let mut missing_required = Vec::new();

    for request in requested.iter() {
        let advertised = match request.feature {
            Feature::ApiLayer(_) => advertised_layers,
            Feature::Extension(_) => advertised_extensions,
        };
        let name = request.feature.name();
        if advertised.iter().any(|candidate| candidate == name) {
            features.push(request.feature);
        } else if request.required {
            tracing::error!(feature = name, "required capability not advertised by runtime");
            missing_required.push(name);
        } else {
            tracing::warn!(feature = name, "optional capability not available, dropping");
        }
    }

    if !missing_required.is_empty() {
        return Err(XrError::capability_unsupported(missing_required.join(", ")));
    }

    Ok(NegotiatedCapabilitySet { features })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_required_present_optional_missing() {
        let requested = FeatureList::new()
            .require(Feature::Extension(Extension::KhrVulkanEnable2))
            .request(Feature::Extension(Extension::ExtHandTracking));
        let caps =
            negotiate_against(&requested, &[], &names(&["XR_KHR_vulkan_enable2"])).unwrap();
        assert_eq!(
            caps.features(),
            &[Feature::Extension(Extension::KhrVulkanEnable2)]
        );
    }

    #[test]
    fn test_required_missing_is_fatal() {
        let requested = FeatureList::new().require(Feature::Extension(Extension::KhrVulkanEnable2));
        let err = negotiate_against(&requested, &[], &[]).unwrap_err();
        assert!(matches!(err, XrError::CapabilityUnsupported(ref n) if n == "XR_KHR_vulkan_enable2"));
    }

    #[test]
    fn test_layers_and_extensions_are_checked_separately() {
        // A layer name in the extension list must not satisfy a layer request.
        let requested =
            FeatureList::new().request(Feature::ApiLayer(ApiLayer::CoreValidation));
        let caps = negotiate_against(
            &requested,
            &[],
            &names(&["XR_APILAYER_LUNARG_core_validation"]),
        )
        .unwrap();
        assert!(caps.features().is_empty());
    }

    #[test]
    fn test_order_is_preserved() {
        let requested = FeatureList::new()
            .request(Feature::Extension(Extension::ExtDebugUtils))
            .request(Feature::ApiLayer(ApiLayer::ApiDump))
            .require(Feature::Extension(Extension::KhrVulkanEnable2))
            .request(Feature::Extension(Extension::ExtHandTracking));
        let caps = negotiate_against(
            &requested,
            &names(&["XR_APILAYER_LUNARG_api_dump"]),
            &names(&[
                "XR_EXT_hand_tracking",
                "XR_KHR_vulkan_enable2",
                "XR_EXT_debug_utils",
            ]),
        )
        .unwrap();
        assert_eq!(
            caps.features(),
            &[
                Feature::Extension(Extension::ExtDebugUtils),
                Feature::ApiLayer(ApiLayer::ApiDump),
                Feature::Extension(Extension::KhrVulkanEnable2),
                Feature::Extension(Extension::ExtHandTracking),
            ]
        );
        assert_eq!(caps.layer_names(), vec!["XR_APILAYER_LUNARG_api_dump"]);
    }

    #[test]
    fn test_duplicate_requests_merge() {
        let list = FeatureList::new()
            .request(Feature::Extension(Extension::ExtDebugUtils))
            .request(Feature::Extension(Extension::ExtHandTracking))
            .require(Feature::Extension(Extension::ExtDebugUtils));
        let entries: Vec<_> = list.iter().copied().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            FeatureRequest::required(Feature::Extension(Extension::ExtDebugUtils))
        );
    }

    #[test]
    fn test_feature_request_json() {
        let json = r#"[
            {"kind": "extension", "name": "XR_KHR_vulkan_enable2", "required": true},
            {"kind": "api_layer", "name": "XR_APILAYER_LUNARG_core_validation"}
        ]"#;
        let list: FeatureList = serde_json::from_str(json).unwrap();
        let entries: Vec<_> = list.iter().copied().collect();
        assert_eq!(
            entries,
            vec![
                FeatureRequest::required(Feature::Extension(Extension::KhrVulkanEnable2)),
                FeatureRequest::optional(Feature::ApiLayer(ApiLayer::CoreValidation)),
            ]
        );

        let unknown = r#"[{"kind": "extension", "name": "XR_FOO_bar"}]"#;
        assert!(serde_json::from_str::<FeatureList>(unknown).is_err());
    }
}
