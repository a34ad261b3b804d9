//! The seam between the session core and a concrete XR runtime.
//!
//! Every native call the core makes goes through [`XrRuntime`]. Handles are
//! opaque integers minted by the runtime implementation; the core never
//! interprets them.

use crate::error::{ResultCode, RtResult};
use crate::events::RuntimeEvent;
use crate::frame::FrameSubmission;
use crate::instance::InstanceCreateDesc;
use crate::interop::{
    ApiVersionRange, GpuDeviceDesc, GpuInstanceDesc, GraphicsBinding, PhysicalDeviceInfo,
};
use crate::types::{
    ActionKind, ActionState, EnvironmentBlendMode, FormFactor, ReferenceSpaceKind,
    SpaceLocation, SwapchainCreateDesc, Time, ViewConfigurationKind, ViewDescriptor, ViewPose,
    FrameTiming,
};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn into_raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// The application's connection to the runtime.
    InstanceHandle
);
handle!(
    /// A physical XR system selected by form factor.
    SystemId
);
handle!(SessionHandle);
handle!(SpaceHandle);
handle!(ActionSetHandle);
handle!(ActionHandle);
handle!(SwapchainHandle);
handle!(
    /// Native GPU instance (`VkInstance`).
    GpuInstanceHandle
);
handle!(
    /// Native GPU physical device (`VkPhysicalDevice`).
    PhysicalDeviceHandle
);
handle!(
    /// Native GPU logical device (`VkDevice`).
    GpuDeviceHandle
);

/// Outcome of a combined runtime + GPU create call.
///
/// The runtime half and the GPU half report independently. A handle may be
/// present even when one half failed; the caller owns rolling it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuCreateOutcome<H> {
    pub handle: Option<H>,
    pub runtime: RtResult<()>,
    pub gpu: RtResult<()>,
}

impl<H> GpuCreateOutcome<H> {
    pub fn success(handle: H) -> Self {
        Self {
            handle: Some(handle),
            runtime: Ok(()),
            gpu: Ok(()),
        }
    }

    pub fn runtime_failure(code: ResultCode) -> Self {
        Self {
            handle: None,
            runtime: Err(code),
            gpu: Ok(()),
        }
    }
}

pub trait XrRuntime {
    // Capability discovery
    fn enumerate_api_layers(&self) -> RtResult<Vec<String>>;
    fn enumerate_extensions(&self) -> RtResult<Vec<String>>;

    // Instance
    fn create_instance(&mut self, desc: &InstanceCreateDesc<'_>) -> RtResult<InstanceHandle>;
    fn destroy_instance(&mut self, instance: InstanceHandle);
    fn poll_event(&mut self, instance: InstanceHandle) -> RtResult<Option<RuntimeEvent>>;

    // System
    fn system(&mut self, instance: InstanceHandle, form_factor: FormFactor) -> RtResult<SystemId>;
    fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RtResult<Vec<ViewConfigurationKind>>;
    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        kind: ViewConfigurationKind,
    ) -> RtResult<Vec<ViewDescriptor>>;
    fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        kind: ViewConfigurationKind,
    ) -> RtResult<Vec<EnvironmentBlendMode>>;

    // GPU interop
    fn graphics_requirements(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RtResult<ApiVersionRange>;
    fn create_gpu_instance(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        desc: &GpuInstanceDesc,
    ) -> GpuCreateOutcome<GpuInstanceHandle>;
    fn gpu_physical_device(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        gpu_instance: GpuInstanceHandle,
    ) -> RtResult<PhysicalDeviceInfo>;
    fn create_gpu_device(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        physical_device: PhysicalDeviceHandle,
        desc: &GpuDeviceDesc,
    ) -> GpuCreateOutcome<GpuDeviceHandle>;
    fn destroy_gpu_device(&mut self, device: GpuDeviceHandle);
    fn destroy_gpu_instance(&mut self, gpu_instance: GpuInstanceHandle);

    // Session
    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RtResult<SessionHandle>;
    fn destroy_session(&mut self, session: SessionHandle);
    fn begin_session(&mut self, session: SessionHandle, kind: ViewConfigurationKind)
        -> RtResult<()>;
    fn end_session(&mut self, session: SessionHandle) -> RtResult<()>;
    fn request_exit_session(&mut self, session: SessionHandle) -> RtResult<()>;

    // Spaces
    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> RtResult<SpaceHandle>;
    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> RtResult<SpaceHandle>;
    fn destroy_space(&mut self, space: SpaceHandle);
    fn locate_space(&self, space: SpaceHandle, base: SpaceHandle, time: Time)
        -> RtResult<SpaceLocation>;
    fn locate_views(
        &self,
        session: SessionHandle,
        kind: ViewConfigurationKind,
        time: Time,
        space: SpaceHandle,
    ) -> RtResult<Vec<ViewPose>>;

    // Frames
    fn wait_frame(&mut self, session: SessionHandle) -> RtResult<FrameTiming>;
    fn begin_frame(&mut self, session: SessionHandle) -> RtResult<()>;
    fn end_frame(&mut self, session: SessionHandle, frame: &FrameSubmission) -> RtResult<()>;

    // Actions
    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> RtResult<ActionSetHandle>;
    fn destroy_action_set(&mut self, set: ActionSetHandle);
    fn create_action(
        &mut self,
        set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        kind: ActionKind,
        subaction_paths: &[String],
    ) -> RtResult<ActionHandle>;
    fn suggest_interaction_profile_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: &str,
        bindings: &[(ActionHandle, String)],
    ) -> RtResult<()>;
    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        sets: &[ActionSetHandle],
    ) -> RtResult<()>;
    fn sync_actions(&mut self, session: SessionHandle, sets: &[ActionSetHandle]) -> RtResult<()>;
    fn action_state(&self, session: SessionHandle, action: ActionHandle)
        -> RtResult<ActionState>;

    // Swapchains
    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> RtResult<Vec<i64>>;
    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        desc: &SwapchainCreateDesc,
    ) -> RtResult<SwapchainHandle>;
    fn enumerate_swapchain_images(&self, swapchain: SwapchainHandle) -> RtResult<Vec<u64>>;
    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RtResult<u32>;
    fn wait_swapchain_image(&mut self, swapchain: SwapchainHandle, timeout_ns: i64)
        -> RtResult<()>;
    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RtResult<()>;
    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle);
}
