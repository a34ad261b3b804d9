#![forbid(unsafe_code)]

//! XR session lifecycle and device-interop core.
//!
//! The crate talks to an XR runtime only through the [`XrRuntime`] trait.
//! `halo-xr-openxr` provides the OpenXR/Vulkan implementation; [`DummyRuntime`]
//! is a deterministic in-process one.

pub mod actions;
pub mod capability;
pub mod config;
pub mod context;
pub mod dummy;
pub mod error;
pub mod events;
pub mod frame;
pub mod instance;
pub mod interop;
pub mod pose;
pub mod runtime;
pub mod session;
pub mod swapchain;
pub mod system;
pub mod types;

pub use actions::{ActionBindingRegistry, ActionKey, BindingSuggestion};
pub use capability::{ApiLayer, Extension, Feature, FeatureList, FeatureRequest, NegotiatedCapabilitySet};
pub use config::XrConfig;
pub use context::{GraphicsRequest, XrContext};
pub use dummy::DummyRuntime;
pub use error::{ResultCode, RtResult, XrError, XrResult};
pub use events::RuntimeEvent;
pub use frame::{FrameBegin, FrameScheduler, FrameSubmission, ProjectionLayer, ProjectionView};
pub use instance::{
    AndroidLoaderConfig, ApplicationIdentity, ChainArena, ChainEntry, DebugMessageTypes,
    DebugMessengerConfig, DebugSeverity, InstanceChainBuilder, InstanceCreateDesc, RuntimeInstance,
};
pub use interop::{
    ApiVersion, ApiVersionRange, DeviceInteropBridge, GpuDeviceDesc, GpuInstanceDesc,
    GraphicsBinding, PhysicalDeviceInfo, QueueFamilyInfo,
};
pub use pose::{EntityId, MirrorTarget, PoseActionRequest, PoseSlot, PoseTracker, SceneTransforms};
pub use runtime::{
    ActionHandle, ActionSetHandle, GpuCreateOutcome, GpuDeviceHandle, GpuInstanceHandle,
    InstanceHandle, PhysicalDeviceHandle, SessionHandle, SpaceHandle, SwapchainHandle, SystemId,
    XrRuntime,
};
pub use session::{EventOutcome, LifecycleContext, LifecycleListener, SessionState, SessionStateMachine};
pub use swapchain::{Swapchain, SwapchainRegistry};
pub use system::{ResolvedSystem, ViewConfiguration};
pub use types::*;
