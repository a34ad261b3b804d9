//! Session ownership and the event-driven lifecycle state machine.
//!
//! All session-scoped handles (the session itself, the stage space, pose
//! action spaces and swapchains) are created and destroyed here. State only
//! changes while draining runtime events, and collaborator callbacks run
//! synchronously inside that drain.

use crate::actions::{ActionBindingRegistry, ActionKey};
use crate::error::{RtResultExt, XrError, XrResult};
use crate::events::RuntimeEvent;
use crate::frame::{FrameBegin, FrameScheduler, ProjectionLayer, ProjectionView};
use crate::interop::GraphicsBinding;
use crate::pose::{PoseActionRequest, PoseSlot, PoseTracker, SceneTransforms};
use crate::runtime::{InstanceHandle, SessionHandle, SpaceHandle, SwapchainHandle, SystemId, XrRuntime};
use crate::swapchain::{Swapchain, SwapchainRegistry};
use crate::system::ViewConfiguration;
use crate::types::{
    ActionKind, EnvironmentBlendMode, ReferenceSpaceKind, SwapchainCreateDesc, SwapchainUsage,
    Time, ViewPose,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    /// Frame submission and action sync are only meaningful in these states.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Synchronized | Self::Visible | Self::Focused)
    }
}

/// Session-scoped resources handed to a collaborator during a lifecycle callback.
pub struct LifecycleContext<'a, R: XrRuntime + ?Sized> {
    runtime: &'a mut R,
    session: SessionHandle,
    view_configuration: &'a ViewConfiguration,
    swapchains: &'a mut SwapchainRegistry,
}

impl<'a, R: XrRuntime + ?Sized> LifecycleContext<'a, R> {
    pub fn runtime(&self) -> &R {
        self.runtime
    }

    pub fn session(&self) -> SessionHandle {
        self.session
    }

    pub fn view_configuration(&self) -> &ViewConfiguration {
        self.view_configuration
    }

    pub fn swapchain_formats(&self) -> XrResult<Vec<i64>> {
        self.runtime
            .enumerate_swapchain_formats(self.session)
            .op("xrEnumerateSwapchainFormats")
    }

    pub fn create_swapchain(
        &mut self,
        usage: SwapchainUsage,
        format: i64,
        sample_count: u32,
        width: u32,
        height: u32,
    ) -> XrResult<&Swapchain> {
        let desc = SwapchainCreateDesc::new(usage, format, sample_count, width, height);
        self.create_swapchain_with(&desc)
    }

    pub fn create_swapchain_with(&mut self, desc: &SwapchainCreateDesc) -> XrResult<&Swapchain> {
        self.swapchains.create(&mut *self.runtime, self.session, desc)
    }

    pub fn swapchain(&self, handle: SwapchainHandle) -> Option<&Swapchain> {
        self.swapchains.get(handle)
    }

    pub fn destroy_swapchain(&mut self, handle: SwapchainHandle) -> XrResult<()> {
        self.swapchains.destroy(&mut *self.runtime, handle)
    }
}

/// Receives `on_session_lifecycle(true)` after the session begins and
/// `on_session_lifecycle(false)` before its resources are released.
pub trait LifecycleListener<R: XrRuntime + ?Sized> {
    fn on_session_lifecycle(
        &mut self,
        started: bool,
        ctx: &mut LifecycleContext<'_, R>,
    ) -> XrResult<()>;
}

impl<R, F> LifecycleListener<R> for F
where
    R: XrRuntime + ?Sized,
    F: FnMut(bool, &mut LifecycleContext<'_, R>) -> XrResult<()>,
{
    fn on_session_lifecycle(
        &mut self,
        started: bool,
        ctx: &mut LifecycleContext<'_, R>,
    ) -> XrResult<()> {
        self(started, ctx)
    }
}

type Listeners<R> = Vec<Box<dyn LifecycleListener<R>>>;

fn dispatch<R: XrRuntime>(
    listeners: &mut Listeners<R>,
    started: bool,
    ctx: &mut LifecycleContext<'_, R>,
    group: &'static str,
) -> XrResult<()> {
    let mut first_error = None;
    for listener in listeners.iter_mut() {
        if let Err(err) = listener.on_session_lifecycle(started, ctx) {
            tracing::error!(group, started, error = %err, "lifecycle listener failed");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// What a call to [`SessionStateMachine::process_events`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOutcome {
    pub events: usize,
    /// The instance is being lost; the owner must tear it down.
    pub instance_lost: bool,
    /// The session ended after an exit request or an `Exiting` event.
    pub exit: bool,
}

pub struct SessionStateMachine<R: XrRuntime> {
    handle: Option<SessionHandle>,
    state: SessionState,
    running: bool,
    exit_requested: bool,
    lifecycle_started: bool,
    reference_space: ReferenceSpaceKind,
    stage_space: Option<SpaceHandle>,
    swapchains: SwapchainRegistry,
    frames: FrameScheduler,
    actions: ActionBindingRegistry,
    poses: PoseTracker,
    graphics_listeners: Listeners<R>,
    action_listeners: Listeners<R>,
}

impl<R: XrRuntime> SessionStateMachine<R> {
    pub fn new(reference_space: ReferenceSpaceKind) -> Self {
        Self {
            handle: None,
            state: SessionState::Unknown,
            running: false,
            exit_requested: false,
            lifecycle_started: false,
            reference_space,
            stage_space: None,
            swapchains: SwapchainRegistry::new(),
            frames: FrameScheduler::new(),
            actions: ActionBindingRegistry::new(),
            poses: PoseTracker::new(),
            graphics_listeners: Vec::new(),
            action_listeners: Vec::new(),
        }
    }

    pub fn handle(&self) -> Option<SessionHandle> {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stage_space(&self) -> Option<SpaceHandle> {
        self.stage_space
    }

    pub fn swapchains(&self) -> &SwapchainRegistry {
        &self.swapchains
    }

    pub fn frames(&self) -> &FrameScheduler {
        &self.frames
    }

    pub fn actions(&self) -> &ActionBindingRegistry {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut ActionBindingRegistry {
        &mut self.actions
    }

    pub fn poses(&self) -> &PoseTracker {
        &self.poses
    }

    pub fn add_graphics_listener(&mut self, listener: Box<dyn LifecycleListener<R>>) {
        self.graphics_listeners.push(listener);
    }

    pub fn add_action_listener(&mut self, listener: Box<dyn LifecycleListener<R>>) {
        self.action_listeners.push(listener);
    }

    /// Create the session, its reference space and any pending pose spaces.
    ///
    /// Nothing is left behind on failure.
    pub fn create(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        system: SystemId,
        binding: &GraphicsBinding,
    ) -> XrResult<SessionHandle> {
        if self.handle.is_some() {
            return Err(XrError::invalid_state("session already exists"));
        }
        let session = runtime
            .create_session(instance, system, binding)
            .map_err(|code| {
                tracing::error!(op = "xrCreateSession", result = %code.name, raw = code.raw, "runtime call failed");
                XrError::SessionCreationFailed(code.to_string())
            })?;

        let stage = match runtime
            .create_reference_space(session, self.reference_space)
            .op("xrCreateReferenceSpace")
        {
            Ok(space) => space,
            Err(err) => {
                runtime.destroy_session(session);
                return Err(XrError::SessionCreationFailed(err.to_string()));
            }
        };
        if let Err(err) = self.poses.create_spaces(runtime, session) {
            runtime.destroy_space(stage);
            runtime.destroy_session(session);
            return Err(XrError::SessionCreationFailed(err.to_string()));
        }

        self.handle = Some(session);
        self.stage_space = Some(stage);
        self.state = SessionState::Idle;
        self.running = false;
        self.exit_requested = false;
        tracing::info!(
            session = session.into_raw(),
            reference_space = ?self.reference_space,
            pose_spaces = self.poses.live_spaces(),
            "session created"
        );
        Ok(session)
    }

    /// Ask the runtime to end the session. Teardown happens when the
    /// resulting `Stopping` event is processed.
    pub fn request_exit(&mut self, runtime: &mut R) -> XrResult<()> {
        let session = self.handle.ok_or(XrError::SessionNotRunning)?;
        self.exit_requested = true;
        if !self.running {
            tracing::debug!("exit requested before the session began");
            return Ok(());
        }
        runtime
            .request_exit_session(session)
            .op("xrRequestExitSession")
    }

    /// Drain the runtime's event queue, applying each event in order.
    ///
    /// The queue is always drained to the end; the first failure is returned
    /// afterwards. A session stuck in `Ready` after a failed begin is begun
    /// again before polling.
    pub fn process_events(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        view_configuration: &ViewConfiguration,
    ) -> XrResult<EventOutcome> {
        let (outcome, result) = self.drain(runtime, instance, view_configuration);
        result.map(|()| outcome)
    }

    /// [`process_events`](Self::process_events) that hands back the outcome
    /// even when a step failed, so instance loss is never missed.
    pub(crate) fn drain(
        &mut self,
        runtime: &mut R,
        instance: InstanceHandle,
        view_configuration: &ViewConfiguration,
    ) -> (EventOutcome, XrResult<()>) {
        let mut outcome = EventOutcome::default();
        let mut first_error = None;

        if self.handle.is_some() && self.state == SessionState::Ready && !self.running {
            tracing::info!("retrying begin of a ready session");
            if let Err(err) = self.begin(runtime, view_configuration) {
                first_error.get_or_insert(err);
            }
        }

        loop {
            let event = match runtime.poll_event(instance).op("xrPollEvent") {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    first_error.get_or_insert(err);
                    break;
                }
            };
            outcome.events += 1;
            if let Err(err) = self.handle_event(runtime, event, view_configuration, &mut outcome) {
                tracing::warn!(error = %err, "event handling failed, draining the rest");
                first_error.get_or_insert(err);
            }
        }
        (outcome, first_error.map_or(Ok(()), Err))
    }

    fn handle_event(
        &mut self,
        runtime: &mut R,
        event: RuntimeEvent,
        view_configuration: &ViewConfiguration,
        outcome: &mut EventOutcome,
    ) -> XrResult<()> {
        match event {
            RuntimeEvent::SessionStateChanged {
                session,
                state,
                time,
            } => {
                if self.handle != Some(session) {
                    tracing::debug!(
                        session = session.into_raw(),
                        ?state,
                        "ignoring state change for another session"
                    );
                    return Ok(());
                }
                tracing::info!(from = ?self.state, to = ?state, time = time.as_nanos(), "session state changed");
                self.transition(runtime, state, view_configuration, outcome)
            }
            RuntimeEvent::InstanceLossPending { loss_time } => {
                tracing::warn!(loss_time = loss_time.as_nanos(), "instance loss pending");
                if self.handle.is_some() {
                    self.state = SessionState::LossPending;
                    self.teardown(runtime, view_configuration, true);
                }
                outcome.instance_lost = true;
                Ok(())
            }
            RuntimeEvent::EventsLost { count } => {
                tracing::warn!(count, "runtime event queue overflowed");
                Ok(())
            }
            RuntimeEvent::InteractionProfileChanged { session } => {
                tracing::debug!(session = session.into_raw(), "interaction profile changed");
                Ok(())
            }
            RuntimeEvent::ReferenceSpaceChangePending {
                kind, change_time, ..
            } => {
                tracing::info!(?kind, change_time = change_time.as_nanos(), "reference space change pending");
                Ok(())
            }
            RuntimeEvent::Unknown { raw_type } => {
                tracing::trace!(raw_type, "ignoring unknown event");
                Ok(())
            }
        }
    }

    fn transition(
        &mut self,
        runtime: &mut R,
        state: SessionState,
        view_configuration: &ViewConfiguration,
        outcome: &mut EventOutcome,
    ) -> XrResult<()> {
        self.state = state;
        match state {
            SessionState::Ready => self.begin(runtime, view_configuration),
            SessionState::Stopping => {
                let exit = self.exit_requested;
                self.teardown(runtime, view_configuration, false);
                outcome.exit |= exit;
                Ok(())
            }
            SessionState::LossPending => {
                self.teardown(runtime, view_configuration, true);
                outcome.instance_lost = true;
                Ok(())
            }
            SessionState::Exiting => {
                self.teardown(runtime, view_configuration, true);
                outcome.exit = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn begin(&mut self, runtime: &mut R, view_configuration: &ViewConfiguration) -> XrResult<()> {
        let Some(session) = self.handle else {
            return Ok(());
        };
        if self.running {
            return Ok(());
        }
        runtime
            .begin_session(session, view_configuration.kind())
            .op("xrBeginSession")?;
        self.running = true;
        self.lifecycle_started = true;
        tracing::info!(view_configuration = ?view_configuration.kind(), "session running");

        let mut ctx = LifecycleContext {
            runtime: &mut *runtime,
            session,
            view_configuration,
            swapchains: &mut self.swapchains,
        };
        let graphics = dispatch(&mut self.graphics_listeners, true, &mut ctx, "graphics");
        let attached = self.actions.attach(&mut *ctx.runtime, session);
        let actions = dispatch(&mut self.action_listeners, true, &mut ctx, "actions");
        graphics.and(attached).and(actions)
    }

    /// Release everything session-scoped. Runs to completion; failures are logged.
    fn teardown(
        &mut self,
        runtime: &mut R,
        view_configuration: &ViewConfiguration,
        release_registrations: bool,
    ) {
        let Some(session) = self.handle else {
            return;
        };
        if self.running {
            if let Err(err) = runtime.end_session(session).op("xrEndSession") {
                tracing::warn!(error = %err, "continuing teardown after failed end");
            }
            self.running = false;
        }

        self.poses.release_spaces(runtime);
        if let Some(stage) = self.stage_space.take() {
            runtime.destroy_space(stage);
        }

        if std::mem::take(&mut self.lifecycle_started) {
            let mut ctx = LifecycleContext {
                runtime: &mut *runtime,
                session,
                view_configuration,
                swapchains: &mut self.swapchains,
            };
            let _ = dispatch(&mut self.action_listeners, false, &mut ctx, "actions");
            self.actions.detach();
            let _ = dispatch(&mut self.graphics_listeners, false, &mut ctx, "graphics");
        } else {
            self.actions.detach();
        }

        self.swapchains.sweep(runtime);
        if release_registrations {
            self.poses.clear();
        }
        runtime.destroy_session(session);
        self.handle = None;
        self.exit_requested = false;
        self.frames.reset();
        tracing::info!(state = ?self.state, "session torn down");
    }

    /// Tear down whatever session exists, independent of events.
    pub fn shutdown(&mut self, runtime: &mut R, view_configuration: &ViewConfiguration) {
        self.teardown(runtime, view_configuration, true);
    }

    pub fn begin_frame(
        &mut self,
        runtime: &mut R,
        blend_mode: EnvironmentBlendMode,
    ) -> XrResult<FrameBegin> {
        match self.handle {
            Some(session) if self.running => {
                self.frames
                    .begin_frame(runtime, session, self.state, blend_mode)
            }
            _ => Ok(FrameBegin::default()),
        }
    }

    /// Submit one projection layer built from `views`, or no layer when empty.
    pub fn end_frame(
        &mut self,
        runtime: &mut R,
        display_time: Time,
        blend_mode: EnvironmentBlendMode,
        views: &[ProjectionView],
    ) -> XrResult<()> {
        let session = self.handle.ok_or(XrError::SessionNotRunning)?;
        let layer = self.stage_space.map(|space| ProjectionLayer {
            space,
            views: views.to_vec(),
        });
        self.frames
            .end_frame(runtime, session, display_time, blend_mode, layer)
    }

    pub fn locate_views(
        &self,
        runtime: &R,
        view_configuration: &ViewConfiguration,
        time: Time,
    ) -> XrResult<Vec<ViewPose>> {
        match (self.handle, self.stage_space) {
            (Some(session), Some(stage)) if self.running => runtime
                .locate_views(session, view_configuration.kind(), time, stage)
                .op("xrLocateViews"),
            _ => Err(XrError::SessionNotRunning),
        }
    }

    pub fn sync_actions(&self, runtime: &mut R, active_sets: &[&str]) -> XrResult<()> {
        match self.handle {
            Some(session) => self
                .actions
                .sync_actions(runtime, session, self.state, active_sets),
            None => Ok(()),
        }
    }

    pub fn update_pose_actions(
        &self,
        runtime: &R,
        time: Time,
        scene: Option<&mut dyn SceneTransforms>,
    ) -> XrResult<()> {
        if !self.state.is_active() {
            return Ok(());
        }
        match self.stage_space {
            Some(stage) => self.poses.update(runtime, stage, time, scene),
            None => Ok(()),
        }
    }

    /// Register pose actions. The whole batch is rejected on any duplicate or
    /// unknown action; spaces are created at once when a session exists.
    pub fn register_pose_actions(
        &mut self,
        runtime: &mut R,
        requests: Vec<PoseActionRequest>,
    ) -> XrResult<Vec<PoseSlot>> {
        let mut resolved = Vec::with_capacity(requests.len());
        for request in requests {
            let (action, kind) = self
                .actions
                .action(&request.key)
                .ok_or_else(|| XrError::UnknownAction(request.key.to_string()))?;
            if kind != ActionKind::Pose {
                return Err(XrError::invalid_state(format!(
                    "action '{}' is {kind:?}, not a pose action",
                    request.key
                )));
            }
            resolved.push((request.key, action, request.mirror));
        }
        let count = resolved.len();
        let slots = self.poses.register(resolved)?;
        if let Some(session) = self.handle {
            if let Err(err) = self.poses.create_spaces(runtime, session) {
                tracing::error!(error = %err, "pose space creation failed, registrations kept for next session");
                return Err(err);
            }
        }
        tracing::debug!(count, "pose actions registered");
        Ok(slots)
    }

    pub fn pose_slot(&self, key: &ActionKey) -> Option<PoseSlot> {
        self.poses.slot(key)
    }

    pub fn create_swapchain(&mut self, runtime: &mut R, desc: &SwapchainCreateDesc) -> XrResult<&Swapchain> {
        let session = self.handle.ok_or(XrError::SessionNotRunning)?;
        self.swapchains.create(runtime, session, desc)
    }

    pub fn destroy_swapchain(&mut self, runtime: &mut R, handle: SwapchainHandle) -> XrResult<()> {
        self.swapchains.destroy(runtime, handle)
    }

    pub fn swapchain_formats(&self, runtime: &R) -> XrResult<Vec<i64>> {
        let session = self.handle.ok_or(XrError::SessionNotRunning)?;
        runtime
            .enumerate_swapchain_formats(session)
            .op("xrEnumerateSwapchainFormats")
    }

    pub fn acquire_swapchain_image(&self, runtime: &mut R, handle: SwapchainHandle) -> XrResult<u32> {
        self.swapchains.acquire(runtime, handle)
    }

    pub fn wait_swapchain_image(
        &self,
        runtime: &mut R,
        handle: SwapchainHandle,
        timeout_ns: i64,
    ) -> XrResult<()> {
        self.swapchains.wait(runtime, handle, timeout_ns)
    }

    pub fn release_swapchain_image(&self, runtime: &mut R, handle: SwapchainHandle) -> XrResult<()> {
        self.swapchains.release(runtime, handle)
    }
}
