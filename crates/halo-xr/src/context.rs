//! The application-facing coordinator.
//!
//! `XrContext` owns the runtime, the single live instance, the resolved
//! system, the GPU interop bridge and the session state machine. A tick is
//! `process_events` → `sync_actions` → `begin_frame` → render → `end_frame`
//! → `update_pose_actions`.

use crate::actions::{ActionBindingRegistry, ActionKey, BindingSuggestion};
use crate::capability::{self, NegotiatedCapabilitySet};
use crate::config::XrConfig;
use crate::error::{XrError, XrResult};
use crate::frame::{FrameBegin, ProjectionView};
use crate::instance::{ChainEntry, DebugMessengerConfig, InstanceChainBuilder, RuntimeInstance};
use crate::interop::{
    DeviceInteropBridge, GpuDeviceDesc, GpuInstanceDesc, GraphicsBinding, PhysicalDeviceInfo,
};
use crate::pose::{PoseActionRequest, PoseSlot, SceneTransforms};
use crate::runtime::{
    ActionHandle, ActionSetHandle, GpuDeviceHandle, GpuInstanceHandle, InstanceHandle,
    SessionHandle, SwapchainHandle, XrRuntime,
};
use crate::session::{
    EventOutcome, LifecycleContext, LifecycleListener, SessionState, SessionStateMachine,
};
use crate::swapchain::{Swapchain, SwapchainRegistry};
use crate::system::{self, ResolvedSystem, ViewConfiguration};
use crate::types::{
    ActionKind, ActionState, EnvironmentBlendMode, SwapchainCreateDesc, Time, ViewPose,
};

/// Inputs for [`XrContext::initialize_graphics`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphicsRequest {
    pub instance_extensions: Vec<String>,
    pub instance_layers: Vec<String>,
    pub device: GpuDeviceDesc,
    pub queue_index: u32,
}

pub struct XrContext<R: XrRuntime> {
    runtime: R,
    config: XrConfig,
    instance: Option<RuntimeInstance>,
    system: Option<ResolvedSystem>,
    interop: DeviceInteropBridge,
    session: SessionStateMachine<R>,
}

impl<R: XrRuntime> XrContext<R> {
    pub fn new(runtime: R, config: XrConfig) -> XrResult<Self> {
        config.validate()?;
        let session = SessionStateMachine::new(config.reference_space);
        Ok(Self {
            runtime,
            config,
            instance: None,
            system: None,
            interop: DeviceInteropBridge::new(),
            session,
        })
    }

    pub fn config(&self) -> &XrConfig {
        &self.config
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn instance_handle(&self) -> Option<InstanceHandle> {
        self.instance.as_ref().map(RuntimeInstance::handle)
    }

    pub fn capabilities(&self) -> Option<&NegotiatedCapabilitySet> {
        self.instance.as_ref().map(RuntimeInstance::capabilities)
    }

    pub fn system(&self) -> Option<&ResolvedSystem> {
        self.system.as_ref()
    }

    pub fn view_configuration(&self) -> Option<&ViewConfiguration> {
        self.system.as_ref().map(|s| &s.view_configuration)
    }

    pub fn blend_mode(&self) -> Option<EnvironmentBlendMode> {
        self.system.as_ref().map(|s| s.blend_mode)
    }

    pub fn graphics_binding(&self) -> Option<&GraphicsBinding> {
        self.interop.graphics_binding()
    }

    pub fn physical_device(&self) -> Option<&PhysicalDeviceInfo> {
        self.interop.physical_device()
    }

    pub fn session_handle(&self) -> Option<SessionHandle> {
        self.session.handle()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn actions(&self) -> &ActionBindingRegistry {
        self.session.actions()
    }

    pub fn swapchains(&self) -> &SwapchainRegistry {
        self.session.swapchains()
    }

    pub fn frames_begun(&self) -> u64 {
        self.session.frames().frames_begun()
    }

    pub fn frames_ended(&self) -> u64 {
        self.session.frames().frames_ended()
    }

    fn live_instance(&self) -> XrResult<(InstanceHandle, &ResolvedSystem)> {
        match (&self.instance, &self.system) {
            (Some(instance), Some(system)) => Ok((instance.handle(), system)),
            _ => Err(XrError::invalid_state("runtime instance not set up")),
        }
    }

    /// Negotiate capabilities, create the instance and resolve the system.
    pub fn setup(&mut self) -> XrResult<()> {
        let mut chain = InstanceChainBuilder::new();
        if self.config.debug_messenger {
            chain = chain.with(ChainEntry::DebugMessenger(DebugMessengerConfig::default()));
        }
        self.setup_with_chain(chain)
    }

    /// [`setup`](Self::setup) with caller-supplied chain entries.
    pub fn setup_with_chain(&mut self, chain: InstanceChainBuilder) -> XrResult<()> {
        if self.instance.is_some() {
            return Err(XrError::invalid_state("a runtime instance is already live"));
        }
        let capabilities = capability::negotiate(&self.runtime, &self.config.features)?;
        let instance = RuntimeInstance::create(
            &mut self.runtime,
            capabilities,
            &self.config.identity,
            chain,
        )?;
        match system::resolve(
            &mut self.runtime,
            instance.handle(),
            self.config.form_factor,
            &self.config.view_configurations,
            &self.config.blend_modes,
        ) {
            Ok(system) => {
                self.instance = Some(instance);
                self.system = Some(system);
                Ok(())
            }
            Err(err) => {
                instance.destroy(&mut self.runtime);
                Err(err)
            }
        }
    }

    pub fn create_gpu_instance(&mut self, desc: GpuInstanceDesc) -> XrResult<GpuInstanceHandle> {
        let (instance, system) = self.live_instance()?;
        let system = system.id;
        self.interop
            .create_gpu_instance(&mut self.runtime, instance, system, desc)
    }

    pub fn select_physical_device(&mut self) -> XrResult<&PhysicalDeviceInfo> {
        let (instance, system) = self.live_instance()?;
        let system = system.id;
        self.interop
            .select_physical_device(&mut self.runtime, instance, system)
    }

    pub fn create_gpu_device(&mut self, desc: GpuDeviceDesc) -> XrResult<GpuDeviceHandle> {
        let (instance, system) = self.live_instance()?;
        let system = system.id;
        self.interop
            .create_gpu_device(&mut self.runtime, instance, system, desc)
    }

    pub fn set_graphics_binding(&mut self, queue_index: u32) -> XrResult<GraphicsBinding> {
        self.interop.set_graphics_binding(queue_index)
    }

    /// GPU instance, physical device, device and binding in one step.
    ///
    /// Any failure releases everything created by this call.
    pub fn initialize_graphics(&mut self, request: GraphicsRequest) -> XrResult<GraphicsBinding> {
        let identity = &self.config.identity;
        let desc = GpuInstanceDesc {
            application_name: identity.name.clone(),
            application_version: identity.version,
            engine_name: identity.engine_name.clone(),
            engine_version: identity.engine_version,
            api_version: self.config.gpu_api_version,
            extensions: request.instance_extensions,
            layers: request.instance_layers,
        };
        let result = self
            .create_gpu_instance(desc)
            .and_then(|_| self.select_physical_device().map(|_| ()))
            .and_then(|_| self.create_gpu_device(request.device))
            .and_then(|_| self.set_graphics_binding(request.queue_index));
        if result.is_err() {
            self.interop.teardown(&mut self.runtime);
        }
        result
    }

    /// Create the session from the graphics binding. The session begins once
    /// the runtime reports it ready.
    pub fn start_session(&mut self) -> XrResult<SessionHandle> {
        let (instance, system) = self.live_instance()?;
        let system = system.id;
        let binding = *self
            .interop
            .graphics_binding()
            .ok_or_else(|| XrError::invalid_state("graphics binding not set"))?;
        self.session
            .create(&mut self.runtime, instance, system, &binding)
    }

    /// Request a graceful stop. Teardown happens in a later `process_events`.
    pub fn stop_session(&mut self) -> XrResult<()> {
        self.session.request_exit(&mut self.runtime)
    }

    /// Drain runtime events. Instance loss tears down the whole instance.
    pub fn process_events(&mut self) -> XrResult<EventOutcome> {
        let (instance, system) = match (&self.instance, &self.system) {
            (Some(instance), Some(system)) => (instance.handle(), system),
            _ => return Ok(EventOutcome::default()),
        };
        let (outcome, result) =
            self.session
                .drain(&mut self.runtime, instance, &system.view_configuration);
        if outcome.instance_lost {
            tracing::warn!("runtime instance lost, tearing down");
            self.teardown_instance();
        }
        result.map(|()| outcome)
    }

    pub fn sync_actions(&mut self, active_sets: &[&str]) -> XrResult<()> {
        self.session.sync_actions(&mut self.runtime, active_sets)
    }

    pub fn begin_frame(&mut self) -> XrResult<FrameBegin> {
        match self.blend_mode() {
            Some(blend) => self.session.begin_frame(&mut self.runtime, blend),
            None => Ok(FrameBegin::default()),
        }
    }

    pub fn locate_views(&self, time: Time) -> XrResult<Vec<ViewPose>> {
        let view_configuration = self.view_configuration().ok_or(XrError::SessionNotRunning)?;
        self.session
            .locate_views(&self.runtime, view_configuration, time)
    }

    pub fn end_frame(&mut self, display_time: Time, views: &[ProjectionView]) -> XrResult<()> {
        let blend = self.blend_mode().ok_or(XrError::SessionNotRunning)?;
        self.session
            .end_frame(&mut self.runtime, display_time, blend, views)
    }

    pub fn update_pose_actions(
        &self,
        time: Time,
        scene: Option<&mut dyn SceneTransforms>,
    ) -> XrResult<()> {
        self.session.update_pose_actions(&self.runtime, time, scene)
    }

    pub fn create_action_set(
        &mut self,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> XrResult<ActionSetHandle> {
        let (instance, _) = self.live_instance()?;
        self.session.actions_mut().create_action_set(
            &mut self.runtime,
            instance,
            name,
            localized_name,
            priority,
        )
    }

    pub fn create_action(
        &mut self,
        key: ActionKey,
        localized_name: &str,
        kind: ActionKind,
        subaction_paths: &[String],
    ) -> XrResult<ActionHandle> {
        self.session.actions_mut().create_action(
            &mut self.runtime,
            key,
            localized_name,
            kind,
            subaction_paths,
        )
    }

    pub fn suggest_bindings(
        &mut self,
        profile: &str,
        bindings: &[BindingSuggestion],
    ) -> XrResult<usize> {
        let (instance, _) = self.live_instance()?;
        self.session
            .actions_mut()
            .suggest_bindings(&mut self.runtime, instance, profile, bindings)
    }

    /// Choose the sets attached to the session; attaches at once if it is running.
    pub fn attach_action_sets(&mut self, sets: &[&str]) -> XrResult<()> {
        self.session.actions_mut().request_attach(sets)?;
        match self.session.handle() {
            Some(session) if self.session.is_running() => self
                .session
                .actions_mut()
                .attach(&mut self.runtime, session),
            _ => Ok(()),
        }
    }

    pub fn register_pose_actions(
        &mut self,
        requests: Vec<PoseActionRequest>,
    ) -> XrResult<Vec<PoseSlot>> {
        self.session
            .register_pose_actions(&mut self.runtime, requests)
    }

    pub fn pose_slot(&self, key: &ActionKey) -> Option<PoseSlot> {
        self.session.pose_slot(key)
    }

    pub fn action_state(&self, key: &ActionKey) -> XrResult<ActionState> {
        let session = self.session.handle().ok_or(XrError::SessionNotRunning)?;
        self.session.actions().action_state(&self.runtime, session, key)
    }

    pub fn swapchain_formats(&self) -> XrResult<Vec<i64>> {
        self.session.swapchain_formats(&self.runtime)
    }

    pub fn create_swapchain(&mut self, desc: &SwapchainCreateDesc) -> XrResult<&Swapchain> {
        self.session.create_swapchain(&mut self.runtime, desc)
    }

    pub fn destroy_swapchain(&mut self, handle: SwapchainHandle) -> XrResult<()> {
        self.session.destroy_swapchain(&mut self.runtime, handle)
    }

    pub fn acquire_swapchain_image(&mut self, handle: SwapchainHandle) -> XrResult<u32> {
        self.session
            .acquire_swapchain_image(&mut self.runtime, handle)
    }

    pub fn wait_swapchain_image(&mut self, handle: SwapchainHandle, timeout_ns: i64) -> XrResult<()> {
        self.session
            .wait_swapchain_image(&mut self.runtime, handle, timeout_ns)
    }

    pub fn release_swapchain_image(&mut self, handle: SwapchainHandle) -> XrResult<()> {
        self.session
            .release_swapchain_image(&mut self.runtime, handle)
    }

    pub fn add_graphics_listener(&mut self, listener: Box<dyn LifecycleListener<R>>) {
        self.session.add_graphics_listener(listener);
    }

    pub fn add_action_listener(&mut self, listener: Box<dyn LifecycleListener<R>>) {
        self.session.add_action_listener(listener);
    }

    pub fn on_graphics_lifecycle<F>(&mut self, listener: F)
    where
        F: FnMut(bool, &mut LifecycleContext<'_, R>) -> XrResult<()> + 'static,
    {
        self.session.add_graphics_listener(Box::new(listener));
    }

    pub fn on_action_lifecycle<F>(&mut self, listener: F)
    where
        F: FnMut(bool, &mut LifecycleContext<'_, R>) -> XrResult<()> + 'static,
    {
        self.session.add_action_listener(Box::new(listener));
    }

    fn teardown_instance(&mut self) {
        if let Some(view_configuration) = self.view_configuration().cloned() {
            self.session.shutdown(&mut self.runtime, &view_configuration);
        }
        self.session.actions_mut().clear(&mut self.runtime);
        self.interop.teardown(&mut self.runtime);
        self.system = None;
        if let Some(instance) = self.instance.take() {
            instance.destroy(&mut self.runtime);
        }
    }

    /// Release the session and every instance-scoped object. Idempotent.
    pub fn shutdown(&mut self) {
        if self.instance.is_none() {
            return;
        }
        self.teardown_instance();
        tracing::info!("xr context shut down");
    }
}

impl<R: XrRuntime> Drop for XrContext<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
