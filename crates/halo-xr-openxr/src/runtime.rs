//! [`XrRuntime`] over the system OpenXR loader with Vulkan graphics.

use std::collections::HashMap;
use std::ffi::{c_char, CString};

use halo_xr::{
    ActionHandle, ActionKind, ActionSetHandle, ActionState, ActionStateValue, ApiVersionRange,
    ChainArena, ChainEntry, EnvironmentBlendMode, FormFactor, FrameSubmission, FrameTiming,
    GpuCreateOutcome, GpuDeviceDesc, GpuDeviceHandle, GpuInstanceDesc, GpuInstanceHandle,
    GraphicsBinding, InstanceCreateDesc, InstanceHandle, PhysicalDeviceHandle,
    PhysicalDeviceInfo, ReferenceSpaceKind, ResultCode, RtResult, RuntimeEvent, SessionHandle,
    SpaceHandle, SpaceLocation, SwapchainCreateDesc, SwapchainHandle, SystemId, Time,
    ViewConfigurationKind, ViewDescriptor, ViewPose, XrRuntime,
};
use openxr as xr;
use xr::sys;
use xr::sys::Handle as _;

use crate::convert::{
    blend_mode_from_xr, blend_mode_to_xr, bool_state, extension_names, extension_set,
    float_state, form_factor, fov_from_xr, fov_to_xr, place_cstr, pose_from_xr, pose_to_xr,
    rect_to_xr, reference_space_from_xr, reference_space_to_xr, session_state, space_location,
    swapchain_usage, time_from_xr, time_to_xr, vector2_state, view_configuration_from_xr,
    view_configuration_to_xr, view_descriptor, xr_code,
};
use crate::debug::{build_chain, ChainNode, DebugMessenger};
use crate::error::BackendError;
use crate::vulkan::VulkanInterop;

const API_VERSION: xr::Version = xr::Version::new(1, 0, 0);

fn missing_handle() -> ResultCode {
    xr_code(sys::Result::ERROR_HANDLE_INVALID)
}

fn cstrings(names: &[&str]) -> RtResult<Vec<CString>> {
    names
        .iter()
        .map(|name| CString::new(*name).map_err(|_| xr_code(sys::Result::ERROR_NAME_INVALID)))
        .collect()
}

enum AnyAction {
    Boolean(xr::Action<bool>),
    Float(xr::Action<f32>),
    Vector2(xr::Action<xr::Vector2f>),
    Pose(xr::Action<xr::Posef>),
}

impl AnyAction {
    fn binding(&self, path: xr::Path) -> xr::Binding<'_> {
        match self {
            AnyAction::Boolean(action) => xr::Binding::new(action, path),
            AnyAction::Float(action) => xr::Binding::new(action, path),
            AnyAction::Vector2(action) => xr::Binding::new(action, path),
            AnyAction::Pose(action) => xr::Binding::new(action, path),
        }
    }
}

struct LiveInstance {
    handle: InstanceHandle,
    // Must drop before `instance`.
    _messenger: Option<DebugMessenger>,
    instance: xr::Instance,
}

type Sessions = HashMap<SessionHandle, LiveSession>;

struct LiveSession {
    session: xr::Session<xr::Vulkan>,
    waiter: xr::FrameWaiter,
    stream: xr::FrameStream<xr::Vulkan>,
}

/// OpenXR runtime reached through the platform loader.
///
/// One instance at a time. XR object handles are minted locally; GPU handles
/// are the native Vulkan values so they can be handed to other Vulkan code.
pub struct OpenXrRuntime {
    entry: xr::Entry,
    vulkan: VulkanInterop,
    event_buffer: xr::EventDataBuffer,
    next_handle: u64,
    instance: Option<LiveInstance>,
    sessions: Sessions,
    spaces: HashMap<SpaceHandle, xr::Space>,
    action_sets: HashMap<ActionSetHandle, xr::ActionSet>,
    actions: HashMap<ActionHandle, AnyAction>,
    swapchains: HashMap<SwapchainHandle, xr::Swapchain<xr::Vulkan>>,
}

impl OpenXrRuntime {
    pub fn load() -> Result<Self, BackendError> {
        // SAFETY: loads the platform OpenXR loader library.
        let entry = unsafe { xr::Entry::load() }
            .map_err(|e| BackendError::OpenXrLoad(format!("{e:?}")))?;
        let vulkan = VulkanInterop::load()?;
        tracing::debug!("OpenXR and Vulkan loaders loaded");
        Ok(Self {
            entry,
            vulkan,
            event_buffer: xr::EventDataBuffer::new(),
            next_handle: 0,
            instance: None,
            sessions: HashMap::new(),
            spaces: HashMap::new(),
            action_sets: HashMap::new(),
            actions: HashMap::new(),
            swapchains: HashMap::new(),
        })
    }

    pub fn vulkan_instance(&self, handle: GpuInstanceHandle) -> Option<&ash::Instance> {
        self.vulkan.instance(handle)
    }

    pub fn vulkan_device(&self, handle: GpuDeviceHandle) -> Option<&ash::Device> {
        self.vulkan.device(handle)
    }

    fn mint(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn xr_instance(&self, handle: InstanceHandle) -> RtResult<&xr::Instance> {
        self.instance
            .as_ref()
            .filter(|live| live.handle == handle)
            .map(|live| &live.instance)
            .ok_or_else(missing_handle)
    }

    fn any_instance(&self) -> RtResult<&xr::Instance> {
        self.instance
            .as_ref()
            .map(|live| &live.instance)
            .ok_or_else(missing_handle)
    }

    fn session(&self, handle: SessionHandle) -> RtResult<&LiveSession> {
        self.sessions.get(&handle).ok_or_else(missing_handle)
    }

    fn session_mut(&mut self, handle: SessionHandle) -> RtResult<&mut LiveSession> {
        self.sessions.get_mut(&handle).ok_or_else(missing_handle)
    }

    fn swapchain_mut(
        &mut self,
        handle: SwapchainHandle,
    ) -> RtResult<&mut xr::Swapchain<xr::Vulkan>> {
        self.swapchains.get_mut(&handle).ok_or_else(missing_handle)
    }

    fn release_all(&mut self) {
        self.swapchains.clear();
        self.spaces.clear();
        self.actions.clear();
        self.action_sets.clear();
        self.sessions.clear();
        self.vulkan.clear();
        self.instance = None;
    }
}

fn session_for_raw(sessions: &Sessions, raw: sys::Session) -> Option<SessionHandle> {
    sessions
        .iter()
        .find(|(_, live)| live.session.as_raw().into_raw() == raw.into_raw())
        .map(|(handle, _)| *handle)
}

fn map_event(sessions: &Sessions, event: xr::Event<'_>) -> RuntimeEvent {
    use xr::Event;

    let unknown_session = |ty: sys::StructureType| RuntimeEvent::Unknown {
        raw_type: ty.into_raw(),
    };
    match event {
        Event::SessionStateChanged(e) => match session_for_raw(sessions, e.session()) {
            Some(session) => RuntimeEvent::SessionStateChanged {
                session,
                state: session_state(e.state()),
                time: time_from_xr(e.time()),
            },
            None => unknown_session(sys::EventDataSessionStateChanged::TYPE),
        },
        Event::InstanceLossPending(e) => RuntimeEvent::InstanceLossPending {
            loss_time: time_from_xr(e.loss_time()),
        },
        Event::EventsLost(e) => RuntimeEvent::EventsLost {
            count: e.lost_event_count(),
        },
        Event::InteractionProfileChanged(e) => match session_for_raw(sessions, e.session()) {
            Some(session) => RuntimeEvent::InteractionProfileChanged { session },
            None => unknown_session(sys::EventDataInteractionProfileChanged::TYPE),
        },
        Event::ReferenceSpaceChangePending(e) => match session_for_raw(sessions, e.session()) {
            Some(session) => RuntimeEvent::ReferenceSpaceChangePending {
                session,
                kind: reference_space_from_xr(e.reference_space_type()),
                change_time: time_from_xr(e.change_time()),
            },
            None => unknown_session(sys::EventDataReferenceSpaceChangePending::TYPE),
        },
        // Event types this crate does not consume are not distinguished.
        _ => RuntimeEvent::Unknown { raw_type: 0 },
    }
}

/// Destroy an instance handle that never made it into an `xr::Instance`.
unsafe fn destroy_raw_instance(entry: &xr::Entry, instance: sys::Instance) {
    let mut function: Option<sys::pfn::VoidFunction> = None;
    let name = b"xrDestroyInstance\0";
    let result =
        (entry.fp().get_instance_proc_addr)(instance, name.as_ptr() as *const c_char, &mut function);
    match function {
        Some(function) if result.into_raw() >= 0 => {
            let destroy: sys::pfn::DestroyInstance = std::mem::transmute(function);
            destroy(instance);
        }
        _ => tracing::error!(result = ?result, "could not resolve xrDestroyInstance, leaking instance"),
    }
}

impl XrRuntime for OpenXrRuntime {
    fn enumerate_api_layers(&self) -> RtResult<Vec<String>> {
        let layers = self.entry.enumerate_layers().map_err(xr_code)?;
        Ok(layers.into_iter().map(|layer| layer.layer_name).collect())
    }

    fn enumerate_extensions(&self) -> RtResult<Vec<String>> {
        let set = self.entry.enumerate_extensions().map_err(xr_code)?;
        Ok(extension_names(&set))
    }

    fn create_instance(&mut self, desc: &InstanceCreateDesc<'_>) -> RtResult<InstanceHandle> {
        if self.instance.is_some() {
            return Err(xr_code(sys::Result::ERROR_LIMIT_REACHED));
        }
        let enabled_extensions = desc.capabilities.extension_names();
        let layer_names = desc.capabilities.layer_names();
        let extensions = cstrings(&enabled_extensions)?;
        let layers = cstrings(&layer_names)?;
        let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

        let mut application_info = sys::ApplicationInfo {
            application_name: [0; sys::MAX_APPLICATION_NAME_SIZE],
            application_version: desc.identity.version,
            engine_name: [0; sys::MAX_ENGINE_NAME_SIZE],
            engine_version: desc.identity.engine_version,
            api_version: API_VERSION,
        };
        place_cstr(&mut application_info.application_name, &desc.identity.name);
        place_cstr(&mut application_info.engine_name, &desc.identity.engine_name);

        let mut arena: ChainArena<ChainNode> = ChainArena::new();
        let next = build_chain(desc.chain, &mut arena);
        let info = sys::InstanceCreateInfo {
            ty: sys::InstanceCreateInfo::TYPE,
            next,
            create_flags: sys::InstanceCreateFlags::EMPTY,
            application_info,
            enabled_api_layer_count: layer_ptrs.len() as u32,
            enabled_api_layer_names: layer_ptrs.as_ptr(),
            enabled_extension_count: extension_ptrs.len() as u32,
            enabled_extension_names: extension_ptrs.as_ptr(),
        };

        let mut raw = sys::Instance::NULL;
        // SAFETY: `info`, its name arrays and every chain node outlive the call.
        let result = unsafe { (self.entry.fp().create_instance)(&info, &mut raw) };
        drop(arena);
        if result.into_raw() < 0 {
            return Err(xr_code(result));
        }

        let required = extension_set(enabled_extensions.iter().copied());
        // SAFETY: `raw` was just created by this entry with exactly `required` enabled.
        let loaded = unsafe {
            xr::InstanceExtensions::load(&self.entry, raw, &required)
                .and_then(|exts| xr::Instance::from_raw(self.entry.clone(), raw, exts))
        };
        let instance = match loaded {
            Ok(instance) => instance,
            Err(code) => {
                // SAFETY: nothing else references `raw`.
                unsafe { destroy_raw_instance(&self.entry, raw) };
                return Err(xr_code(code));
            }
        };

        let messenger = desc.chain.iter().find_map(|entry| match entry {
            ChainEntry::DebugMessenger(config) => DebugMessenger::create(&instance, config),
            ChainEntry::AndroidLoader(_) => None,
        });
        if let Ok(props) = instance.properties() {
            tracing::info!(
                runtime = %props.runtime_name,
                version = %props.runtime_version,
                "OpenXR runtime"
            );
        }

        let handle = InstanceHandle::from_raw(self.mint());
        self.instance = Some(LiveInstance {
            handle,
            _messenger: messenger,
            instance,
        });
        Ok(handle)
    }

    fn destroy_instance(&mut self, instance: InstanceHandle) {
        if self.xr_instance(instance).is_ok() {
            self.release_all();
        }
    }

    fn poll_event(&mut self, instance: InstanceHandle) -> RtResult<Option<RuntimeEvent>> {
        let live = self
            .instance
            .as_ref()
            .filter(|live| live.handle == instance)
            .ok_or_else(missing_handle)?;
        let event = live
            .instance
            .poll_event(&mut self.event_buffer)
            .map_err(xr_code)?;
        Ok(event.map(|event| map_event(&self.sessions, event)))
    }

    fn system(&mut self, instance: InstanceHandle, ff: FormFactor) -> RtResult<SystemId> {
        let system = self
            .xr_instance(instance)?
            .system(form_factor(ff))
            .map_err(xr_code)?;
        Ok(SystemId::from_raw(system.into_raw()))
    }

    fn enumerate_view_configurations(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RtResult<Vec<ViewConfigurationKind>> {
        let types = self
            .xr_instance(instance)?
            .enumerate_view_configurations(xr::SystemId::from_raw(system.into_raw()))
            .map_err(xr_code)?;
        Ok(types.into_iter().filter_map(view_configuration_from_xr).collect())
    }

    fn enumerate_view_configuration_views(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        kind: ViewConfigurationKind,
    ) -> RtResult<Vec<ViewDescriptor>> {
        let views = self
            .xr_instance(instance)?
            .enumerate_view_configuration_views(
                xr::SystemId::from_raw(system.into_raw()),
                view_configuration_to_xr(kind),
            )
            .map_err(xr_code)?;
        Ok(views.iter().map(view_descriptor).collect())
    }

    fn enumerate_environment_blend_modes(
        &self,
        instance: InstanceHandle,
        system: SystemId,
        kind: ViewConfigurationKind,
    ) -> RtResult<Vec<EnvironmentBlendMode>> {
        let modes = self
            .xr_instance(instance)?
            .enumerate_environment_blend_modes(
                xr::SystemId::from_raw(system.into_raw()),
                view_configuration_to_xr(kind),
            )
            .map_err(xr_code)?;
        Ok(modes.into_iter().filter_map(blend_mode_from_xr).collect())
    }

    fn graphics_requirements(
        &self,
        instance: InstanceHandle,
        system: SystemId,
    ) -> RtResult<ApiVersionRange> {
        VulkanInterop::requirements(
            self.xr_instance(instance)?,
            xr::SystemId::from_raw(system.into_raw()),
        )
    }

    fn create_gpu_instance(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        desc: &GpuInstanceDesc,
    ) -> GpuCreateOutcome<GpuInstanceHandle> {
        let Some(live) = self.instance.as_ref().filter(|live| live.handle == instance) else {
            return GpuCreateOutcome::runtime_failure(missing_handle());
        };
        self.vulkan.create_instance(
            &live.instance,
            xr::SystemId::from_raw(system.into_raw()),
            desc,
        )
    }

    fn gpu_physical_device(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        gpu_instance: GpuInstanceHandle,
    ) -> RtResult<PhysicalDeviceInfo> {
        let live = self
            .instance
            .as_ref()
            .filter(|live| live.handle == instance)
            .ok_or_else(missing_handle)?;
        self.vulkan.physical_device(
            &live.instance,
            xr::SystemId::from_raw(system.into_raw()),
            gpu_instance,
        )
    }

    fn create_gpu_device(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        physical_device: PhysicalDeviceHandle,
        desc: &GpuDeviceDesc,
    ) -> GpuCreateOutcome<GpuDeviceHandle> {
        let Some(live) = self.instance.as_ref().filter(|live| live.handle == instance) else {
            return GpuCreateOutcome::runtime_failure(missing_handle());
        };
        self.vulkan.create_device(
            &live.instance,
            xr::SystemId::from_raw(system.into_raw()),
            physical_device,
            desc,
        )
    }

    fn destroy_gpu_device(&mut self, device: GpuDeviceHandle) {
        self.vulkan.destroy_device(device);
    }

    fn destroy_gpu_instance(&mut self, gpu_instance: GpuInstanceHandle) {
        self.vulkan.destroy_instance(gpu_instance);
    }

    fn create_session(
        &mut self,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> RtResult<SessionHandle> {
        let info = xr::vulkan::SessionCreateInfo {
            instance: binding.instance.into_raw() as _,
            physical_device: binding.physical_device.into_raw() as _,
            device: binding.device.into_raw() as _,
            queue_family_index: binding.queue_family_index,
            queue_index: binding.queue_index,
        };
        // SAFETY: the binding's objects were created through this runtime and stay alive
        // until the session is destroyed.
        let (session, waiter, stream) = unsafe {
            self.xr_instance(instance)?
                .create_session::<xr::Vulkan>(xr::SystemId::from_raw(system.into_raw()), &info)
        }
        .map_err(xr_code)?;
        let handle = SessionHandle::from_raw(self.mint());
        self.sessions.insert(
            handle,
            LiveSession {
                session,
                waiter,
                stream,
            },
        );
        Ok(handle)
    }

    fn destroy_session(&mut self, session: SessionHandle) {
        self.sessions.remove(&session);
    }

    fn begin_session(
        &mut self,
        session: SessionHandle,
        kind: ViewConfigurationKind,
    ) -> RtResult<()> {
        self.session(session)?
            .session
            .begin(view_configuration_to_xr(kind))
            .map(|_| ())
            .map_err(xr_code)
    }

    fn end_session(&mut self, session: SessionHandle) -> RtResult<()> {
        self.session(session)?
            .session
            .end()
            .map(|_| ())
            .map_err(xr_code)
    }

    fn request_exit_session(&mut self, session: SessionHandle) -> RtResult<()> {
        self.session(session)?
            .session
            .request_exit()
            .map_err(xr_code)
    }

    fn create_reference_space(
        &mut self,
        session: SessionHandle,
        kind: ReferenceSpaceKind,
    ) -> RtResult<SpaceHandle> {
        let space = self
            .session(session)?
            .session
            .create_reference_space(reference_space_to_xr(kind), xr::Posef::IDENTITY)
            .map_err(xr_code)?;
        let handle = SpaceHandle::from_raw(self.mint());
        self.spaces.insert(handle, space);
        Ok(handle)
    }

    fn create_action_space(
        &mut self,
        session: SessionHandle,
        action: ActionHandle,
    ) -> RtResult<SpaceHandle> {
        let live = self.session(session)?;
        let space = match self.actions.get(&action) {
            Some(AnyAction::Pose(action)) => action
                .create_space(&live.session, xr::Path::NULL, xr::Posef::IDENTITY)
                .map_err(xr_code)?,
            Some(_) => return Err(xr_code(sys::Result::ERROR_ACTION_TYPE_MISMATCH)),
            None => return Err(missing_handle()),
        };
        let handle = SpaceHandle::from_raw(self.mint());
        self.spaces.insert(handle, space);
        Ok(handle)
    }

    fn destroy_space(&mut self, space: SpaceHandle) {
        self.spaces.remove(&space);
    }

    fn locate_space(
        &self,
        space: SpaceHandle,
        base: SpaceHandle,
        time: Time,
    ) -> RtResult<SpaceLocation> {
        let (space, base) = match (self.spaces.get(&space), self.spaces.get(&base)) {
            (Some(space), Some(base)) => (space, base),
            _ => return Err(missing_handle()),
        };
        let location = space.locate(base, time_to_xr(time)).map_err(xr_code)?;
        Ok(space_location(&location))
    }

    fn locate_views(
        &self,
        session: SessionHandle,
        kind: ViewConfigurationKind,
        time: Time,
        space: SpaceHandle,
    ) -> RtResult<Vec<ViewPose>> {
        let live = self.session(session)?;
        let space = self.spaces.get(&space).ok_or_else(missing_handle)?;
        let (_, views) = live
            .session
            .locate_views(view_configuration_to_xr(kind), time_to_xr(time), space)
            .map_err(xr_code)?;
        Ok(views
            .iter()
            .map(|view| ViewPose {
                pose: pose_from_xr(view.pose),
                fov: fov_from_xr(view.fov),
            })
            .collect())
    }

    fn wait_frame(&mut self, session: SessionHandle) -> RtResult<FrameTiming> {
        let state = self.session_mut(session)?.waiter.wait().map_err(xr_code)?;
        Ok(FrameTiming {
            predicted_display_time: time_from_xr(state.predicted_display_time),
            predicted_display_period: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self, session: SessionHandle) -> RtResult<()> {
        self.session_mut(session)?
            .stream
            .begin()
            .map(|_| ())
            .map_err(xr_code)
    }

    fn end_frame(&mut self, session: SessionHandle, frame: &FrameSubmission) -> RtResult<()> {
        let live = self.sessions.get_mut(&session).ok_or_else(missing_handle)?;
        let spaces = &self.spaces;
        let swapchains = &self.swapchains;

        let mut layers = Vec::with_capacity(frame.layers.len());
        for layer in &frame.layers {
            let space = spaces.get(&layer.space).ok_or_else(missing_handle)?;
            let views = layer
                .views
                .iter()
                .map(|view| {
                    let swapchain = swapchains.get(&view.swapchain).ok_or_else(missing_handle)?;
                    Ok(xr::CompositionLayerProjectionView::new()
                        .pose(pose_to_xr(view.pose))
                        .fov(fov_to_xr(view.fov))
                        .sub_image(
                            xr::SwapchainSubImage::new()
                                .swapchain(swapchain)
                                .image_array_index(view.image_array_index)
                                .image_rect(rect_to_xr(view.image_rect)),
                        ))
                })
                .collect::<RtResult<Vec<_>>>()?;
            layers.push((space, views));
        }
        let projections: Vec<_> = layers
            .iter()
            .map(|(space, views)| xr::CompositionLayerProjection::new().space(space).views(views))
            .collect();
        let bases: Vec<&xr::CompositionLayerBase<'_, xr::Vulkan>> =
            projections.iter().map(|projection| &**projection).collect();

        live.stream
            .end(
                time_to_xr(frame.display_time),
                blend_mode_to_xr(frame.blend_mode),
                &bases,
            )
            .map_err(xr_code)
    }

    fn create_action_set(
        &mut self,
        instance: InstanceHandle,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> RtResult<ActionSetHandle> {
        let set = self
            .xr_instance(instance)?
            .create_action_set(name, localized_name, priority)
            .map_err(xr_code)?;
        let handle = ActionSetHandle::from_raw(self.mint());
        self.action_sets.insert(handle, set);
        Ok(handle)
    }

    fn destroy_action_set(&mut self, set: ActionSetHandle) {
        self.action_sets.remove(&set);
    }

    fn create_action(
        &mut self,
        set: ActionSetHandle,
        name: &str,
        localized_name: &str,
        kind: ActionKind,
        subaction_paths: &[String],
    ) -> RtResult<ActionHandle> {
        let instance = self.any_instance()?;
        let paths = subaction_paths
            .iter()
            .map(|path| instance.string_to_path(path))
            .collect::<xr::Result<Vec<_>>>()
            .map_err(xr_code)?;
        let set = self.action_sets.get(&set).ok_or_else(missing_handle)?;
        let action = match kind {
            ActionKind::Boolean => set
                .create_action::<bool>(name, localized_name, &paths)
                .map(AnyAction::Boolean),
            ActionKind::Float => set
                .create_action::<f32>(name, localized_name, &paths)
                .map(AnyAction::Float),
            ActionKind::Vector2 => set
                .create_action::<xr::Vector2f>(name, localized_name, &paths)
                .map(AnyAction::Vector2),
            ActionKind::Pose => set
                .create_action::<xr::Posef>(name, localized_name, &paths)
                .map(AnyAction::Pose),
        }
        .map_err(xr_code)?;
        let handle = ActionHandle::from_raw(self.mint());
        self.actions.insert(handle, action);
        Ok(handle)
    }

    fn suggest_interaction_profile_bindings(
        &mut self,
        instance: InstanceHandle,
        profile: &str,
        bindings: &[(ActionHandle, String)],
    ) -> RtResult<()> {
        let instance = self.xr_instance(instance)?;
        let profile = instance.string_to_path(profile).map_err(xr_code)?;
        let mut suggested = Vec::with_capacity(bindings.len());
        for (action, path) in bindings {
            let action = self.actions.get(action).ok_or_else(missing_handle)?;
            let path = instance.string_to_path(path).map_err(xr_code)?;
            suggested.push(action.binding(path));
        }
        instance
            .suggest_interaction_profile_bindings(profile, &suggested)
            .map_err(xr_code)
    }

    fn attach_action_sets(
        &mut self,
        session: SessionHandle,
        sets: &[ActionSetHandle],
    ) -> RtResult<()> {
        let sets = sets
            .iter()
            .map(|set| self.action_sets.get(set).ok_or_else(missing_handle))
            .collect::<RtResult<Vec<_>>>()?;
        self.session(session)?
            .session
            .attach_action_sets(&sets)
            .map_err(xr_code)
    }

    fn sync_actions(&mut self, session: SessionHandle, sets: &[ActionSetHandle]) -> RtResult<()> {
        let active = sets
            .iter()
            .map(|set| {
                self.action_sets
                    .get(set)
                    .map(xr::ActiveActionSet::new)
                    .ok_or_else(missing_handle)
            })
            .collect::<RtResult<Vec<_>>>()?;
        self.session(session)?
            .session
            .sync_actions(&active)
            .map_err(xr_code)
    }

    fn action_state(&self, session: SessionHandle, action: ActionHandle) -> RtResult<ActionState> {
        let session = &self.session(session)?.session;
        let action = self.actions.get(&action).ok_or_else(missing_handle)?;
        let (value, is_active) = match action {
            AnyAction::Boolean(action) => {
                let state = action.state(session, xr::Path::NULL).map_err(xr_code)?;
                let active = state.is_active;
                (bool_state(state), active)
            }
            AnyAction::Float(action) => {
                let state = action.state(session, xr::Path::NULL).map_err(xr_code)?;
                let active = state.is_active;
                (float_state(state), active)
            }
            AnyAction::Vector2(action) => {
                let state = action.state(session, xr::Path::NULL).map_err(xr_code)?;
                let active = state.is_active;
                (vector2_state(state), active)
            }
            AnyAction::Pose(action) => {
                let active = action.is_active(session, xr::Path::NULL).map_err(xr_code)?;
                (ActionStateValue::Pose, active)
            }
        };
        Ok(ActionState { value, is_active })
    }

    fn enumerate_swapchain_formats(&self, session: SessionHandle) -> RtResult<Vec<i64>> {
        let formats = self
            .session(session)?
            .session
            .enumerate_swapchain_formats()
            .map_err(xr_code)?;
        Ok(formats.into_iter().map(i64::from).collect())
    }

    fn create_swapchain(
        &mut self,
        session: SessionHandle,
        desc: &SwapchainCreateDesc,
    ) -> RtResult<SwapchainHandle> {
        let format = u32::try_from(desc.format)
            .map_err(|_| xr_code(sys::Result::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED))?;
        let swapchain = self
            .session(session)?
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags: swapchain_usage(desc.usage),
                format,
                sample_count: desc.sample_count,
                width: desc.width,
                height: desc.height,
                face_count: desc.face_count,
                array_size: desc.array_size,
                mip_count: desc.mip_count,
            })
            .map_err(xr_code)?;
        let handle = SwapchainHandle::from_raw(self.mint());
        self.swapchains.insert(handle, swapchain);
        Ok(handle)
    }

    fn enumerate_swapchain_images(&self, swapchain: SwapchainHandle) -> RtResult<Vec<u64>> {
        self.swapchains
            .get(&swapchain)
            .ok_or_else(missing_handle)?
            .enumerate_images()
            .map_err(xr_code)
    }

    fn acquire_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RtResult<u32> {
        self.swapchain_mut(swapchain)?
            .acquire_image()
            .map_err(xr_code)
    }

    fn wait_swapchain_image(
        &mut self,
        swapchain: SwapchainHandle,
        timeout_ns: i64,
    ) -> RtResult<()> {
        self.swapchain_mut(swapchain)?
            .wait_image(xr::Duration::from_nanos(timeout_ns))
            .map_err(xr_code)
    }

    fn release_swapchain_image(&mut self, swapchain: SwapchainHandle) -> RtResult<()> {
        self.swapchain_mut(swapchain)?
            .release_image()
            .map_err(xr_code)
    }

    fn destroy_swapchain(&mut self, swapchain: SwapchainHandle) {
        self.swapchains.remove(&swapchain);
    }
}

impl Drop for OpenXrRuntime {
    fn drop(&mut self) {
        self.release_all();
    }
}
