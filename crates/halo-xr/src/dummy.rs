//! Deterministic in-process runtime.
//!
//! Used by the test suite and the `simulate` command. Every call is recorded
//! in a journal under its native operation name, failures can be injected per
//! operation, and live handles are counted so teardown can be verified.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::actions::ActionKey;
use crate::error::{ResultCode, RtResult};
use crate::events::RuntimeEvent;
use crate::frame::FrameSubmission;
use crate::instance::{ChainEntry, InstanceCreateDesc};
use crate::interop::{
    ApiVersion, ApiVersionRange, GpuDeviceDesc, GpuInstanceDesc, GraphicsBinding,
    PhysicalDeviceInfo, QueueFamilyInfo,
};
use crate::runtime::{
    ActionHandle, ActionSetHandle, GpuCreateOutcome, GpuDeviceHandle, GpuInstanceHandle,
    InstanceHandle, PhysicalDeviceHandle, SessionHandle, SpaceHandle, SwapchainHandle, SystemId,
    XrRuntime,
};
use crate::session::SessionState;
use crate::types::{
    ActionKind, ActionState, ActionStateValue, EnvironmentBlendMode, Fov, FormFactor, FrameTiming,
    Pose, ReferenceSpaceKind, SpaceLocation, SwapchainCreateDesc, Time, ViewConfigurationKind,
    ViewDescriptor, ViewPose,
};

/// `VK_FORMAT_R8G8B8A8_SRGB`
pub const FORMAT_RGBA8_SRGB: i64 = 43;
/// `VK_FORMAT_B8G8R8A8_SRGB`
pub const FORMAT_BGRA8_SRGB: i64 = 50;

const HALF_IPD: f32 = 0.032;
const IMAGES_PER_SWAPCHAIN: u64 = 3;

const RESULT_CODES: &[(&str, i32)] = &[
    ("XR_ERROR_RUNTIME_FAILURE", -2),
    ("XR_ERROR_EXTENSION_NOT_PRESENT", -9),
    ("XR_ERROR_HANDLE_INVALID", -12),
    ("XR_ERROR_INSTANCE_LOST", -13),
    ("XR_ERROR_SESSION_RUNNING", -14),
    ("XR_ERROR_SESSION_NOT_RUNNING", -16),
    ("XR_ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED", -26),
    ("XR_ERROR_SESSION_NOT_READY", -28),
    ("XR_ERROR_FORM_FACTOR_UNAVAILABLE", -35),
    ("XR_ERROR_API_LAYER_NOT_PRESENT", -36),
    ("XR_ERROR_CALL_ORDER_INVALID", -37),
    ("XR_ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED", -41),
    ("XR_ERROR_ACTIONSET_NOT_ATTACHED", -46),
    ("XR_ERROR_ACTIONSETS_ALREADY_ATTACHED", -47),
    ("VK_ERROR_INITIALIZATION_FAILED", -3),
];

/// Build a [`ResultCode`] from its name, as the dummy reports it.
pub fn result_code(name: &str) -> ResultCode {
    let raw = RESULT_CODES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, raw)| *raw)
        .unwrap_or(-1);
    ResultCode::new(raw, name)
}

/// Categories of live handles the dummy keeps track of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandleKind {
    Instance,
    Session,
    Space,
    ActionSet,
    Action,
    Swapchain,
    GpuInstance,
    GpuDevice,
}

#[derive(Debug, Default)]
struct SessionRecord {
    running: bool,
    exit_requested: bool,
    frame_open: bool,
    attached: Vec<ActionSetHandle>,
}

#[derive(Debug, Clone, Copy)]
enum SpaceSource {
    Reference,
    Action(ActionHandle),
}

#[derive(Debug)]
struct ActionRecord {
    set: ActionSetHandle,
    name: String,
    kind: ActionKind,
}

#[derive(Debug)]
struct SwapchainRecord {
    images: Vec<u64>,
    next_image: u32,
}

pub struct DummyRuntime {
    layers: Vec<String>,
    extensions: Vec<String>,
    form_factors: Vec<FormFactor>,
    view_configurations: Vec<ViewConfigurationKind>,
    blend_modes: Vec<EnvironmentBlendMode>,
    api_range: ApiVersionRange,
    swapchain_formats: Vec<i64>,
    auto_advance: bool,
    should_render: bool,
    frame_period: i64,
    clock: i64,

    next_handle: u64,
    live: BTreeMap<u64, HandleKind>,
    journal: RefCell<Vec<&'static str>>,
    failures: HashMap<&'static str, ResultCode>,
    gpu_failures: HashMap<&'static str, ResultCode>,

    events: VecDeque<RuntimeEvent>,
    sessions: HashMap<SessionHandle, SessionRecord>,
    spaces: HashMap<SpaceHandle, SpaceSource>,
    action_sets: HashMap<ActionSetHandle, String>,
    actions: HashMap<ActionHandle, ActionRecord>,
    swapchains: HashMap<SwapchainHandle, SwapchainRecord>,
    poses: HashMap<ActionHandle, Pose>,
    action_values: HashMap<ActionHandle, ActionStateValue>,

    last_chain: Vec<ChainEntry>,
    gpu_api_version: Option<ApiVersion>,
    suggested: Vec<(String, Vec<String>)>,
    submissions: Vec<FrameSubmission>,
    syncs: usize,
}

impl Default for DummyRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyRuntime {
    pub fn new() -> Self {
        Self {
            layers: vec!["XR_APILAYER_LUNARG_core_validation".to_string()],
            extensions: vec![
                "XR_KHR_vulkan_enable2".to_string(),
                "XR_EXT_debug_utils".to_string(),
            ],
            form_factors: vec![FormFactor::HeadMountedDisplay],
            view_configurations: vec![ViewConfigurationKind::PrimaryStereo],
            blend_modes: vec![EnvironmentBlendMode::Opaque],
            api_range: ApiVersionRange {
                min: ApiVersion::new(1, 0, 0),
                max: ApiVersion::new(1, 3, 0),
            },
            swapchain_formats: vec![FORMAT_BGRA8_SRGB, FORMAT_RGBA8_SRGB],
            auto_advance: true,
            should_render: true,
            frame_period: 11_111_111,
            clock: 0,
            next_handle: 1,
            live: BTreeMap::new(),
            journal: RefCell::new(Vec::new()),
            failures: HashMap::new(),
            gpu_failures: HashMap::new(),
            events: VecDeque::new(),
            sessions: HashMap::new(),
            spaces: HashMap::new(),
            action_sets: HashMap::new(),
            actions: HashMap::new(),
            swapchains: HashMap::new(),
            poses: HashMap::new(),
            action_values: HashMap::new(),
            last_chain: Vec::new(),
            gpu_api_version: None,
            suggested: Vec::new(),
            submissions: Vec::new(),
            syncs: 0,
        }
    }

    pub fn with_layers(mut self, layers: &[&str]) -> Self {
        self.layers = layers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_form_factors(mut self, form_factors: &[FormFactor]) -> Self {
        self.form_factors = form_factors.to_vec();
        self
    }

    pub fn with_view_configurations(mut self, kinds: &[ViewConfigurationKind]) -> Self {
        self.view_configurations = kinds.to_vec();
        self
    }

    pub fn with_blend_modes(mut self, modes: &[EnvironmentBlendMode]) -> Self {
        self.blend_modes = modes.to_vec();
        self
    }

    pub fn with_api_range(mut self, min: ApiVersion, max: ApiVersion) -> Self {
        self.api_range = ApiVersionRange { min, max };
        self
    }

    pub fn with_swapchain_formats(mut self, formats: &[i64]) -> Self {
        self.swapchain_formats = formats.to_vec();
        self
    }

    /// When disabled, session state events are only produced by [`push_event`](Self::push_event).
    pub fn with_auto_advance(mut self, auto_advance: bool) -> Self {
        self.auto_advance = auto_advance;
        self
    }

    pub fn set_should_render(&mut self, should_render: bool) {
        self.should_render = should_render;
    }

    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    pub fn push_state(&mut self, session: SessionHandle, state: SessionState) {
        let time = Time::from_nanos(self.clock);
        self.push_event(RuntimeEvent::SessionStateChanged {
            session,
            state,
            time,
        });
    }

    /// Make every call to `op` fail with `XR_ERROR_RUNTIME_FAILURE`.
    pub fn fail(&mut self, op: &'static str) {
        self.fail_with(op, result_code("XR_ERROR_RUNTIME_FAILURE"));
    }

    pub fn fail_with(&mut self, op: &'static str, code: ResultCode) {
        self.failures.insert(op, code);
    }

    /// Make the GPU half of a combined create call fail after producing a handle.
    pub fn fail_gpu(&mut self, op: &'static str) {
        self.gpu_failures
            .insert(op, result_code("VK_ERROR_INITIALIZATION_FAILED"));
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
        self.gpu_failures.clear();
    }

    /// Pose reported for the action space of `key`.
    pub fn set_pose(&mut self, key: &ActionKey, pose: Pose) {
        if let Some(action) = self.find_action(key) {
            self.poses.insert(action, pose);
        }
    }

    pub fn clear_pose(&mut self, key: &ActionKey) {
        if let Some(action) = self.find_action(key) {
            self.poses.remove(&action);
        }
    }

    pub fn set_action_value(&mut self, key: &ActionKey, value: ActionStateValue) {
        if let Some(action) = self.find_action(key) {
            self.action_values.insert(action, value);
        }
    }

    fn find_action(&self, key: &ActionKey) -> Option<ActionHandle> {
        self.actions.iter().find_map(|(handle, record)| {
            let set = self.action_sets.get(&record.set)?;
            (set == &key.action_set && record.name == key.action).then_some(*handle)
        })
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.journal.borrow().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.journal.borrow().iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.journal.borrow_mut().clear();
    }

    pub fn live_handles(&self, kind: HandleKind) -> usize {
        self.live.values().filter(|k| **k == kind).count()
    }

    pub fn live_handle_count(&self) -> usize {
        self.live.len()
    }

    pub fn last_chain(&self) -> &[ChainEntry] {
        &self.last_chain
    }

    pub fn gpu_api_version(&self) -> Option<ApiVersion> {
        self.gpu_api_version
    }

    pub fn suggested_bindings(&self) -> &[(String, Vec<String>)] {
        &self.suggested
    }

    pub fn submissions(&self) -> &[FrameSubmission] {
        &self.submissions
    }

    pub fn sync_count(&self) -> usize {
        self.syncs
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn enter(&self, op: &'static str) -> RtResult<()> {
        self.journal.borrow_mut().push(op);
        match self.failures.get(op) {
            Some(code) => Err(code.clone()),
            None => Ok(()),
        }
    }

    fn mint(&mut self, kind: HandleKind) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.live.insert(raw, kind);
        raw
    }

    fn release(&mut self, raw: u64, kind: HandleKind) {
        if self.live.get(&raw) == Some(&kind) {
            self.live.remove(&raw);
        } else {
            tracing::warn!(raw, ?kind, "dummy runtime asked to destroy an unknown handle");
        }
    }

    fn is_live(&self, raw: u64, kind: HandleKind) -> bool {
        self.live.get(&raw) == Some(&kind)
    }

    fn check_handle(&self, raw: u64, kind: HandleKind) -> RtResult<()> {
        if self.is_live(raw, kind) {
            Ok(())
        } else {
            Err(result_code("XR_ERROR_HANDLE_INVALID"))
        }
    }

    fn session_mut(&mut self, session: SessionHandle) -> RtResult<&mut SessionRecord> {
        self.sessions
            .get_mut(&session)
            .ok_or_else(|| result_code("XR_ERROR_HANDLE_INVALID"))
    }

    fn running_session(&self, session: SessionHandle) -> RtResult<&SessionRecord> {
        match self.sessions.get(&session) {
            Some(record) if record.running => Ok(record),
            Some(_) => Err(result_code("XR_ERROR_SESSION_NOT_RUNNING")),
            None => Err(result_code("XR_ERROR_HANDLE_INVALID")),
        }
    }

    fn scripted(&mut self, session: SessionHandle, states: &[SessionState]) {
        if !self.auto_advance {
            return;
        }
        for state in states {
            self.push_state(session, *state);
        }
    }

    fn view_descriptor() -> ViewDescriptor {
        ViewDescriptor {
            recommended_width: 1440,
            max_width: 2880,
            recommended_height: 1600,
            max_height: 3200,
            recommended_sample_count: 1,
            max_sample_count: 4,
        }
    }
}

impl XrRuntime for DummyRuntime {
    fn enumerate_api_layers(&self) -> RtResult<Vec<String>> {
        self.enter("xrEnumerateApiLayerProperties")?;
        Ok(self.layers.clone())
    }

    fn enumerate_extensions(&self) -> RtResult<Vec<String>> {
        self.enter("xrEnumerateInstanceExtensionProperties")?;
        Ok(self.extensions.clone())
    }

    fn create_instance(&mut self, desc: &InstanceCreateDesc<'_>) -> RtResult<InstanceHandle> {
        self.enter("xrCreateInstance")?;
        for name in desc.capabilities.extension_names() {
            if !self.extensions.iter().any(|ext| ext == name) {
                return Err(result_code("XR_ERROR_EXTENSION_NOT_PRESENT"));
            }
        }
        for name in desc.capabilities.layer_names() {
            if !self.layers.iter().any(|layer| layer == name) {
                return Err(result_code("XR_ERROR_API_LAYER_NOT_PRESENT"));
            }
        }
        self.last_chain = desc.chain.to_vec();
        Ok(InstanceHandle::from_raw(self.mint(HandleKind::Instance)))
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) {
        self.journal.borrow_mut().push("xrDestroyInstance");
        self.release(instance.into_raw(), HandleKind::Instance);
        self.events.clear();
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> RtResult<Option<RuntimeEvent>> {
        self.enter("xrPollEvent")?;
        self.check_handle(instance.into_raw(), HandleKind::Instance)?;
        Ok(self.events.pop_front())
    }

    fn system(&mut self, instance: InstanceHandle, form_factor: FormFactor) -> RtResult<SystemId> {
        self.enter("xrGetSystem")?;
        self.check_handle(instance.into_raw(), HandleKind::Instance)?;
        match self.form_factors.iter().position(|f| *f == form_factor) {
            Some(index) => Ok(SystemId::from_raw(index as u64 + 1)),
            None => Err(result_code("XR_ERROR_FORM_FACTOR_UNAVAILABLE")),
        }
    }

    fn enumerate_view_configurations(
        &self,
        _instance: InstanceHandle,
        _system: SystemId,
    ) -> RtResult<Vec<ViewConfigurationKind>> {
        self.enter("xrEnumerateViewConfigurations")?;
        Ok(self.view_configurations.clone())
    }

    fn enumerate_view_configuration_views(
        &self,
        _instance: InstanceHandle,
        _system: SystemId,
        kind: ViewConfigurationKind,
    ) -> RtResult<Vec<ViewDescriptor>> {
        self.enter("xrEnumerateViewConfigurationViews")?;
        Ok(vec![Self::view_descriptor(); kind.view_count()])
    }

    fn enumerate_environment_blend_modes(
        &self,
        _instance: InstanceHandle,
        _system: SystemId,
        _kind: ViewConfigurationKind,
    ) -> RtResult<Vec<EnvironmentBlendMode>> {
        self.enter("xrEnumerateEnvironmentBlendModes")?;
        Ok(self.blend_modes.clone())
    }

    fn graphics_requirements(
        &self,
        _instance: InstanceHandle,
        _system: SystemId,
    ) -> RtResult<ApiVersionRange> {
        self.enter("xrGetVulkanGraphicsRequirements2KHR")?;
        Ok(self.api_range)
    }

    fn create_gpu_instance(
        &mut self,
        _instance: InstanceHandle,
        _system: SystemId,
        desc: &GpuInstanceDesc,
    ) -> GpuCreateOutcome<GpuInstanceHandle> {
        const OP: &str = "xrCreateVulkanInstanceKHR";
        if let Err(code) = self.enter(OP) {
            return GpuCreateOutcome::runtime_failure(code);
        }
        self.gpu_api_version = Some(desc.api_version);
        let handle = GpuInstanceHandle::from_raw(self.mint(HandleKind::GpuInstance));
        GpuCreateOutcome {
            handle: Some(handle),
            runtime: Ok(()),
            gpu: self.gpu_failures.get(OP).cloned().map_or(Ok(()), Err),
        }
    }

    fn gpu_physical_device(
        &mut self,
        _instance: InstanceHandle,
        _system: SystemId,
        gpu_instance: GpuInstanceHandle,
    ) -> RtResult<PhysicalDeviceInfo> {
        self.enter("xrGetVulkanGraphicsDevice2KHR")?;
        self.check_handle(gpu_instance.into_raw(), HandleKind::GpuInstance)?;
        Ok(PhysicalDeviceInfo {
            handle: PhysicalDeviceHandle::from_raw(0x1000),
            name: "Dummy GPU".to_string(),
            queue_families: vec![
                QueueFamilyInfo {
                    graphics: false,
                    queue_count: 2,
                },
                QueueFamilyInfo {
                    graphics: true,
                    queue_count: 1,
                },
            ],
        })
    }

    fn create_gpu_device(
        &mut self,
        _instance: InstanceHandle,
        _system: SystemId,
        _physical_device: PhysicalDeviceHandle,
        _desc: &GpuDeviceDesc,
    ) -> GpuCreateOutcome<GpuDeviceHandle> {
        const OP: &str = "xrCreateVulkanDeviceKHR";
        if let Err(code) = self.enter(OP) {
            return GpuCreateOutcome::runtime_failure(code);
        }
        let handle = GpuDeviceHandle::from_raw(self.mint(HandleKind::GpuDevice));
        GpuCreateOutcome {
            handle: Some(handle),
            runtime: Ok(()),
            gpu: self.gpu_failures.get(OP).cloned().map_or(Ok(()), Err),
        }
    }

    fn destroy_gpu_device(&mut self, device: GpuDeviceHandle) {
        self.journal.borrow_mut().push("vkDestroyDevice");
        self.release(device.into_raw(), HandleKind::GpuDevice);
    }

    fn destroy_gpu_instance(&mut self, gpu_instance: GpuInstanceHandle) {
        self.journal.borrow_mut().push("vkDestroyInstance");
        self.release(gpu_instance.into_raw(), HandleKind::GpuInstance);
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        _system: SystemId,
        binding: &GraphicsBinding,
    ) -> RtResult<SessionHandle> {
        self.enter("xrCreateSession")?;
        self.check_handle(instance.into_raw(), HandleKind::Instance)?;
        self.check_handle(binding.device.into_raw(), HandleKind::GpuDevice)?;
        let session = SessionHandle::from_raw(self.mint(HandleKind::Session));
        self.sessions.insert(session, SessionRecord::default());
        self.scripted(session, &[SessionState::Idle, SessionState::Ready]);
        Ok(session)
    }

    fn destroy_session(&mut self, session: SessionHandle) {
        self.journal.borrow_mut().push("xrDestroySession");
        self.sessions.remove(&session);
        self.release(session.into_raw(), HandleKind::Session);
        self.events.retain(|event| match event {
            RuntimeEvent::SessionStateChanged { session: s, .. }
            | RuntimeEvent::InteractionProfileChanged { session: s }
            | RuntimeEvent::ReferenceSpaceChangePending { session: s, .. } => *s != session,
            _ => true,
        });
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        kind: ViewConfigurationKind,
    ) -> RtResult<()> {
        self.enter("xrBeginSession")?;
        if !self.view_configurations.contains(&kind) {
            return Err(result_code("XR_ERROR_VIEW_CONFIGURATION_TYPE_UNSUPPORTED"));
        }
        let record = self.session_mut(session)?;
        if record.running {
            return Err(result_code("XR_ERROR_SESSION_RUNNING"));
        }
        record.running = true;
        self.scripted(
            session,
            &[
                SessionState::Synchronized,
                SessionState::Visible,
                SessionState::Focused,
            ],
        );
        Ok(())
    }

    fn end_session(&mut self, session: SessionHandle) -> RtResult<()> {
        self.enter("xrEndSession")?;
        let record = self.session_mut(session)?;
        if !record.running {
            return Err(result_code("XR_ERROR_SESSION_NOT_RUNNING"));
        }
        record.running = false;
        record.frame_open = false;
        let exit_requested = record.exit_requested;
        self.scripted(session, &[SessionState::Idle]);
        if exit_requested {
            self.scripted(session, &[SessionState::Exiting]);
        }
        Ok(())
    }

    fn request_exit_session(&mut self, session: SessionHandle) -> RtResult<()> {
        self.enter("xrRequestExitSession")?;
        let record = self.session_mut(session)?;
        if !record.running {
            return Err(result_code("XR_ERROR_SESSION_NOT_RUNNING"));
        }
        record.exit_requested = true;
        self.scripted(session, &[SessionState::Stopping]);
        Ok(())
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        _kind: ReferenceSpaceKind,
    ) -> RtResult<SpaceHandle> {
        self.enter("xrCreateReferenceSpace")?;
        self.check_handle(session.into_raw(), HandleKind::Session)?;
        let space = SpaceHandle::from_raw(self.mint(HandleKind::Space));
        self.spaces.insert(space, SpaceSource::Reference);
        Ok(space)
    }

    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> RtResult<SpaceHandle> {
        self.enter("xrCreateActionSpace")?;
        self.check_handle(session.into_raw(), HandleKind::Session)?;
        self.check_handle(action.into_raw(), HandleKind::Action)?;
        let space = SpaceHandle::from_raw(self.mint(HandleKind::Space));
        self.spaces.insert(space, SpaceSource::Action(action));
        Ok(space)
    }

    fn destroy_space(&mut self, space: SpaceHandle) {
        self.journal.borrow_mut().push("xrDestroySpace");
        self.spaces.remove(&space);
        self.release(space.into_raw(), HandleKind::Space);
    }

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        _time: Time,
    ) -> RtResult<SpaceLocation> {
        self.enter("xrLocateSpace")?;
        self.check_handle(base.into_raw(), HandleKind::Space)?;
        let source = self
            .spaces
            .get(&space)
            .ok_or_else(|| result_code("XR_ERROR_HANDLE_INVALID"))?;
        let pose = match source {
            SpaceSource::Reference => Some(Pose::IDENTITY),
            SpaceSource::Action(action) => self.poses.get(action).copied(),
        };
        Ok(match pose {
            Some(pose) => SpaceLocation {
                pose,
                position_valid: true,
                orientation_valid: true,
                position_tracked: true,
                orientation_tracked: true,
            },
            None => SpaceLocation::default(),
        })
    }

    fn locate_views(
        &self,
        session: SessionHandle,
        kind: ViewConfigurationKind,
        _time: Time,
        space: SpaceHandle,
    ) -> RtResult<Vec<ViewPose>> {
        self.enter("xrLocateViews")?;
        self.running_session(session)?;
        self.check_handle(space.into_raw(), HandleKind::Space)?;
        let fov = Fov {
            angle_left: -0.785,
            angle_right: 0.785,
            angle_up: 0.785,
            angle_down: -0.785,
        };
        let count = kind.view_count();
        Ok((0..count)
            .map(|index| {
                let x = match (count, index % 2) {
                    (1, _) => 0.0,
                    (_, 0) => -HALF_IPD,
                    _ => HALF_IPD,
                };
                ViewPose {
                    pose: Pose {
                        position: [x, 1.6, 0.0],
                        orientation: Pose::IDENTITY.orientation,
                    },
                    fov,
                }
            })
            .collect())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RtResult<FrameTiming> {
        self.enter("xrWaitFrame")?;
        self.running_session(session)?;
        self.clock += self.frame_period;
        Ok(FrameTiming {
            predicted_display_time: Time::from_nanos(self.clock),
            predicted_display_period: self.frame_period,
            should_render: self.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RtResult<()> {
        self.enter("xrBeginFrame")?;
        self.running_session(session)?;
        let record = self.session_mut(session)?;
        if record.frame_open {
            return Err(result_code("XR_ERROR_CALL_ORDER_INVALID"));
        }
        record.frame_open = true;
        Ok(())
    }

    fn end_frame(&mut self, session: SessionHandle, frame: &FrameSubmission) -> RtResult<()> {
        self.enter("xrEndFrame")?;
        self.running_session(session)?;
        let record = self.session_mut(session)?;
        if !record.frame_open {
            return Err(result_code("XR_ERROR_CALL_ORDER_INVALID"));
        }
        record.frame_open = false;
        self.submissions.push(frame.clone());
        Ok(())
    }

    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        _localized_name: &str,
        _priority: u32,
    ) -> RtResult<ActionSetHandle> {
        self.enter("xrCreateActionSet")?;
        self.check_handle(instance.into_raw(), HandleKind::Instance)?;
        let set = ActionSetHandle::from_raw(self.mint(HandleKind::ActionSet));
        self.action_sets.insert(set, name.to_string());
        Ok(set)
    }

    fn destroy_action_set(&mut self, set: ActionSetHandle) {
        self.journal.borrow_mut().push("xrDestroyActionSet");
        let owned: Vec<ActionHandle> = self
            .actions
            .iter()
            .filter(|(_, record)| record.set == set)
            .map(|(handle, _)| *handle)
            .collect();
        for action in owned {
            self.actions.remove(&action);
            self.poses.remove(&action);
            self.action_values.remove(&action);
            self.release(action.into_raw(), HandleKind::Action);
        }
        self.action_sets.remove(&set);
        self.release(set.into_raw(), HandleKind::ActionSet);
    }

    fn create_action(
        &mut self,
        set: ActionSetHandle,
        name: &str,
        _localized_name: &str,
        kind: ActionKind,
        _subaction_paths: &[String],
    ) -> RtResult<ActionHandle> {
        self.enter("xrCreateAction")?;
        self.check_handle(set.into_raw(), HandleKind::ActionSet)?;
        let action = ActionHandle::from_raw(self.mint(HandleKind::Action));
        self.actions.insert(
            action,
            ActionRecord {
                set,
                name: name.to_string(),
                kind,
            },
        );
        Ok(action)
    }

    fn suggest_interaction_profile_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: &str,
        bindings: &[(ActionHandle, String)],
    ) -> RtResult<()> {
        self.enter("xrSuggestInteractionProfileBindings")?;
        self.check_handle(instance.into_raw(), HandleKind::Instance)?;
        for (action, _) in bindings {
            self.check_handle(action.into_raw(), HandleKind::Action)?;
        }
        self.suggested.push((
            profile.to_string(),
            bindings.iter().map(|(_, path)| path.clone()).collect(),
        ));
        Ok(())
    }

    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        sets: &[ActionSetHandle],
    ) -> RtResult<()> {
        self.enter("xrAttachSessionActionSets")?;
        let record = self.session_mut(session)?;
        if !record.attached.is_empty() {
            return Err(result_code("XR_ERROR_ACTIONSETS_ALREADY_ATTACHED"));
        }
        record.attached = sets.to_vec();
        Ok(())
    }

    fn sync_actions(&mut self, session: SessionHandle, sets: &[ActionSetHandle]) -> RtResult<()> {
        self.enter("xrSyncActions")?;
        let record = self.running_session(session)?;
        if sets.iter().any(|set| !record.attached.contains(set)) {
            return Err(result_code("XR_ERROR_ACTIONSET_NOT_ATTACHED"));
        }
        self.syncs += 1;
        Ok(())
    }

    fn action_state(&self, session: SessionHandle, action: ActionHandle) -> RtResult<ActionState> {
        self.enter("xrGetActionState")?;
        self.check_handle(session.into_raw(), HandleKind::Session)?;
        let record = self
            .actions
            .get(&action)
            .ok_or_else(|| result_code("XR_ERROR_HANDLE_INVALID"))?;
        if let Some(value) = self.action_values.get(&action) {
            return Ok(ActionState {
                value: *value,
                is_active: true,
            });
        }
        let value = match record.kind {
            ActionKind::Boolean => ActionStateValue::Boolean {
                current: false,
                changed: false,
            },
            ActionKind::Float => ActionStateValue::Float {
                current: 0.0,
                changed: false,
            },
            ActionKind::Vector2 => ActionStateValue::Vector2 {
                current: [0.0; 2],
                changed: false,
            },
            ActionKind::Pose => ActionStateValue::Pose,
        };
        Ok(ActionState {
            value,
            is_active: self.poses.contains_key(&action),
        })
    }

    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> RtResult<Vec<i64>> {
        self.enter("xrEnumerateSwapchainFormats")?;
        self.check_handle(session.into_raw(), HandleKind::Session)?;
        Ok(self.swapchain_formats.clone())
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        desc: &SwapchainCreateDesc,
    ) -> RtResult<SwapchainHandle> {
        self.enter("xrCreateSwapchain")?;
        self.check_handle(session.into_raw(), HandleKind::Session)?;
        if !self.swapchain_formats.contains(&desc.format) {
            return Err(result_code("XR_ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED"));
        }
        let raw = self.mint(HandleKind::Swapchain);
        let images = (0..IMAGES_PER_SWAPCHAIN).map(|i| (raw << 8) | i).collect();
        let handle = SwapchainHandle::from_raw(raw);
        self.swapchains.insert(
            handle,
            SwapchainRecord {
                images,
                next_image: 0,
            },
        );
        Ok(handle)
    }

    fn enumerate_swapchain_images(&self, swapchain: SwapchainHandle) -> RtResult<Vec<u64>> {
        self.enter("xrEnumerateSwapchainImages")?;
        self.swapchains
            .get(&swapchain)
            .map(|record| record.images.clone())
            .ok_or_else(|| result_code("XR_ERROR_HANDLE_INVALID"))
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RtResult<u32> {
        self.enter("xrAcquireSwapchainImage")?;
        let record = self
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| result_code("XR_ERROR_HANDLE_INVALID"))?;
        let index = record.next_image;
        record.next_image = (index + 1) % record.images.len() as u32;
        Ok(index)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        _timeout_ns: i64,
    ) -> RtResult<()> {
        self.enter("xrWaitSwapchainImage")?;
        self.check_handle(swapchain.into_raw(), HandleKind::Swapchain)
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RtResult<()> {
        self.enter("xrReleaseSwapchainImage")?;
        self.check_handle(swapchain.into_raw(), HandleKind::Swapchain)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        self.journal.borrow_mut().push("xrDestroySwapchain");
        self.swapchains.remove(&swapchain);
        self.release(swapchain.into_raw(), HandleKind::Swapchain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_lookup() {
        let code = result_code("XR_ERROR_SESSION_NOT_RUNNING");
        assert_eq!(code.raw, -16);
        assert_eq!(code.to_string(), "XR_ERROR_SESSION_NOT_RUNNING (-16)");
        assert_eq!(result_code("XR_ERROR_NOT_IN_TABLE").raw, -1);
    }

    #[test]
    fn test_injected_failure_is_journaled() {
        let mut rt = DummyRuntime::new();
        rt.fail("xrEnumerateApiLayerProperties");
        let err = rt.enumerate_api_layers().unwrap_err();
        assert_eq!(err.name, "XR_ERROR_RUNTIME_FAILURE");
        assert_eq!(rt.calls(), vec!["xrEnumerateApiLayerProperties"]);
        rt.clear_failures();
        assert!(rt.enumerate_api_layers().is_ok());
    }

    #[test]
    fn test_unknown_instance_cannot_poll() {
        let mut rt = DummyRuntime::new();
        let err = rt.poll_event(InstanceHandle::from_raw(99)).unwrap_err();
        assert_eq!(err.name, "XR_ERROR_HANDLE_INVALID");
    }

    #[test]
    fn test_stereo_views_straddle_center() {
        let mut rt = DummyRuntime::new();
        let session = SessionHandle::from_raw(rt.mint(HandleKind::Session));
        rt.sessions.insert(
            session,
            SessionRecord {
                running: true,
                ..Default::default()
            },
        );
        let space = SpaceHandle::from_raw(rt.mint(HandleKind::Space));
        let views = rt
            .locate_views(session, ViewConfigurationKind::PrimaryStereo, Time::ZERO, space)
            .unwrap();
        assert_eq!(views.len(), 2);
        assert!(views[0].pose.position[0] < 0.0);
        assert!(views[1].pose.position[0] > 0.0);
    }
}
