//! Setup-path tests against the dummy runtime:
//! capability negotiation, instance creation, system resolution and GPU interop.

use halo_xr::dummy::HandleKind;
use halo_xr::{
    ApiVersion, ChainEntry, DummyRuntime, Extension, Feature, FeatureList, GraphicsRequest,
    ViewConfigurationKind, XrConfig, XrContext, XrError, XrRuntime,
};

const VULKAN2: Feature = Feature::Extension(Extension::KhrVulkanEnable2);
const HAND_TRACKING: Feature = Feature::Extension(Extension::ExtHandTracking);

fn context(runtime: DummyRuntime, config: XrConfig) -> XrContext<DummyRuntime> {
    XrContext::new(runtime, config).expect("valid config")
}

#[test]
fn test_optional_extension_dropped_when_absent() {
    let config = XrConfig {
        features: FeatureList::new().require(VULKAN2).request(HAND_TRACKING),
        ..XrConfig::default()
    };
    let runtime = DummyRuntime::new().with_extensions(&["XR_KHR_vulkan_enable2"]);
    let mut ctx = context(runtime, config);

    ctx.setup().expect("setup succeeds without the optional extension");

    let caps = ctx.capabilities().unwrap();
    assert_eq!(caps.features(), &[VULKAN2]);
    assert!(!caps.contains(HAND_TRACKING));
}

#[test]
fn test_missing_required_extension_is_fatal() {
    let config = XrConfig {
        features: FeatureList::new().require(VULKAN2),
        ..XrConfig::default()
    };
    let runtime = DummyRuntime::new().with_extensions(&[]);
    let mut ctx = context(runtime, config);

    let err = ctx.setup().unwrap_err();
    assert!(matches!(err, XrError::CapabilityUnsupported(ref names) if names.contains("XR_KHR_vulkan_enable2")));
    assert!(ctx.instance_handle().is_none());
    assert_eq!(ctx.runtime().call_count("xrCreateInstance"), 0);
    assert_eq!(ctx.runtime().live_handle_count(), 0);
}

#[test]
fn test_negotiation_never_exceeds_advertised_set() {
    let config = XrConfig {
        features: FeatureList::new()
            .request(VULKAN2)
            .request(HAND_TRACKING)
            .request(Feature::Extension(Extension::ExtDebugUtils))
            .request(Feature::ApiLayer(halo_xr::ApiLayer::ApiDump)),
        ..XrConfig::default()
    };
    let mut ctx = context(DummyRuntime::new(), config);
    ctx.setup().unwrap();

    let runtime = ctx.runtime();
    let layers = runtime.enumerate_api_layers().unwrap();
    let extensions = runtime.enumerate_extensions().unwrap();
    let caps = ctx.capabilities().unwrap();
    for name in caps.extension_names() {
        assert!(extensions.iter().any(|e| e == name), "{name}");
    }
    for name in caps.layer_names() {
        assert!(layers.iter().any(|l| l == name), "{name}");
    }
    assert_eq!(caps.features().len(), 2);
}

#[test]
fn test_view_configuration_falls_back_to_mono() {
    let runtime =
        DummyRuntime::new().with_view_configurations(&[ViewConfigurationKind::PrimaryMono]);
    let mut ctx = context(runtime, XrConfig::default());
    ctx.setup().unwrap();

    let views = ctx.view_configuration().unwrap();
    assert_eq!(views.kind(), ViewConfigurationKind::PrimaryMono);
    assert_eq!(views.views().len(), 1);
}

#[test]
fn test_unsupported_blend_mode_leaves_no_instance() {
    let runtime = DummyRuntime::new().with_blend_modes(&[halo_xr::EnvironmentBlendMode::Additive]);
    let config = XrConfig {
        blend_modes: vec![halo_xr::EnvironmentBlendMode::Opaque],
        ..XrConfig::default()
    };
    let mut ctx = context(runtime, config);

    assert!(matches!(ctx.setup(), Err(XrError::Unsupported(_))));
    assert!(ctx.instance_handle().is_none());
    assert_eq!(ctx.runtime().live_handles(HandleKind::Instance), 0);
}

#[test]
fn test_missing_form_factor_reports_system_not_found() {
    let runtime = DummyRuntime::new().with_form_factors(&[halo_xr::FormFactor::HandheldDisplay]);
    let mut ctx = context(runtime, XrConfig::default());

    assert!(matches!(ctx.setup(), Err(XrError::SystemNotFound(_))));
    assert_eq!(ctx.runtime().live_handle_count(), 0);
}

#[test]
fn test_instance_creation_failure() {
    let mut runtime = DummyRuntime::new();
    runtime.fail("xrCreateInstance");
    let mut ctx = context(runtime, XrConfig::default());

    assert!(matches!(ctx.setup(), Err(XrError::InstanceCreationFailed(_))));
    assert!(ctx.instance_handle().is_none());
}

#[test]
fn test_second_setup_is_rejected() {
    let mut ctx = context(DummyRuntime::new(), XrConfig::default());
    ctx.setup().unwrap();
    assert!(matches!(ctx.setup(), Err(XrError::InvalidState(_))));
    assert_eq!(ctx.runtime().live_handles(HandleKind::Instance), 1);
}

#[test]
fn test_debug_messenger_chained_only_when_negotiated() {
    let mut ctx = context(DummyRuntime::new(), XrConfig::default());
    ctx.setup().unwrap();
    assert!(matches!(
        ctx.runtime().last_chain(),
        [ChainEntry::DebugMessenger(_)]
    ));

    let runtime = DummyRuntime::new().with_extensions(&["XR_KHR_vulkan_enable2"]);
    let mut ctx = context(runtime, XrConfig::default());
    ctx.setup().unwrap();
    assert!(ctx.runtime().last_chain().is_empty());
}

#[test]
fn test_gpu_api_version_clamped_to_runtime_window() {
    let runtime =
        DummyRuntime::new().with_api_range(ApiVersion::new(1, 1, 0), ApiVersion::new(1, 2, 0));
    let config = XrConfig {
        gpu_api_version: ApiVersion::new(1, 3, 0),
        ..XrConfig::default()
    };
    let mut ctx = context(runtime, config);
    ctx.setup().unwrap();
    ctx.initialize_graphics(GraphicsRequest::default()).unwrap();

    assert_eq!(ctx.runtime().gpu_api_version(), Some(ApiVersion::new(1, 2, 0)));
}

#[test]
fn test_graphics_binding_uses_first_graphics_queue_family() {
    let mut ctx = context(DummyRuntime::new(), XrConfig::default());
    ctx.setup().unwrap();
    let binding = ctx.initialize_graphics(GraphicsRequest::default()).unwrap();

    assert_eq!(binding.queue_family_index, 1);
    assert_eq!(binding.queue_index, 0);
    assert_eq!(ctx.graphics_binding(), Some(&binding));
    assert_eq!(ctx.physical_device().unwrap().name, "Dummy GPU");
}

#[test]
fn test_graphics_binding_set_once() {
    let mut ctx = context(DummyRuntime::new(), XrConfig::default());
    ctx.setup().unwrap();
    ctx.initialize_graphics(GraphicsRequest::default()).unwrap();

    assert!(matches!(
        ctx.set_graphics_binding(0),
        Err(XrError::InvalidState(_))
    ));
}

#[test]
fn test_gpu_half_failure_rolls_back_instance() {
    let mut runtime = DummyRuntime::new();
    runtime.fail_gpu("xrCreateVulkanInstanceKHR");
    let mut ctx = context(runtime, XrConfig::default());
    ctx.setup().unwrap();

    let err = ctx.initialize_graphics(GraphicsRequest::default()).unwrap_err();
    assert!(matches!(err, XrError::Interop(_)));
    assert_eq!(ctx.runtime().live_handles(HandleKind::GpuInstance), 0);
    assert_eq!(ctx.runtime().call_count("vkDestroyInstance"), 1);
    assert!(ctx.graphics_binding().is_none());
}

#[test]
fn test_device_failure_releases_gpu_instance() {
    let mut runtime = DummyRuntime::new();
    runtime.fail("xrCreateVulkanDeviceKHR");
    let mut ctx = context(runtime, XrConfig::default());
    ctx.setup().unwrap();

    let err = ctx.initialize_graphics(GraphicsRequest::default()).unwrap_err();
    assert!(err.is_runtime());
    assert_eq!(ctx.runtime().live_handles(HandleKind::GpuInstance), 0);
    assert_eq!(ctx.runtime().live_handles(HandleKind::GpuDevice), 0);
}

#[test]
fn test_session_requires_graphics_binding() {
    let mut ctx = context(DummyRuntime::new(), XrConfig::default());
    ctx.setup().unwrap();
    assert!(matches!(ctx.start_session(), Err(XrError::InvalidState(_))));
}

#[test]
fn test_session_creation_failure_leaves_nothing() {
    let mut ctx = context(DummyRuntime::new(), XrConfig::default());
    ctx.setup().unwrap();
    ctx.initialize_graphics(GraphicsRequest::default()).unwrap();
    ctx.runtime_mut().fail("xrCreateReferenceSpace");

    assert!(matches!(
        ctx.start_session(),
        Err(XrError::SessionCreationFailed(_))
    ));
    assert!(ctx.session_handle().is_none());
    assert_eq!(ctx.runtime().live_handles(HandleKind::Session), 0);
}

#[test]
fn test_shutdown_releases_every_handle() {
    let mut ctx = context(DummyRuntime::new(), XrConfig::default());
    ctx.setup().unwrap();
    ctx.initialize_graphics(GraphicsRequest::default()).unwrap();
    ctx.create_action_set("menu", "Menu", 0).unwrap();
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();
    assert!(ctx.is_running());

    ctx.shutdown();
    assert_eq!(ctx.runtime().live_handle_count(), 0);
    assert!(ctx.instance_handle().is_none());
    ctx.shutdown();
}
