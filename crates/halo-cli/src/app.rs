//! Session driver shared by the `run` and `simulate` commands.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use halo_xr::actions::{KHR_SIMPLE_CONTROLLER, OCULUS_TOUCH_CONTROLLER};
use halo_xr::swapchain::choose_swapchain_format;
use halo_xr::{
    ActionKey, ActionKind, BindingSuggestion, GraphicsRequest, LifecycleContext,
    PoseActionRequest, PoseSlot, ProjectionView, Rect2D, SwapchainCreateDesc, SwapchainHandle,
    SwapchainUsage, Time, XrContext, XrResult, XrRuntime,
};
use serde::Serialize;

const VK_FORMAT_R8G8B8A8_SRGB: i64 = 43;
const VK_FORMAT_B8G8R8A8_SRGB: i64 = 50;

const ACTION_SET: &str = "halo";
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Sleep between event polls while no session is running.
/// Bounded so a runtime that never becomes ready cannot hang the process.
const MAX_IDLE_POLLS: u32 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    pub frames_begun: u64,
    pub frames_ended: u64,
    pub frames_rendered: u64,
    pub events: usize,
    pub swapchains_created: usize,
    pub instance_lost: bool,
}

/// One swapchain per view, recreated on every session start.
#[derive(Debug, Default)]
struct EyeSwapchains {
    swapchains: Vec<(SwapchainHandle, u32, u32)>,
    created: usize,
}

fn create_eye_swapchains<R: XrRuntime + ?Sized>(
    eyes: &RefCell<EyeSwapchains>,
    started: bool,
    ctx: &mut LifecycleContext<'_, R>,
) -> XrResult<()> {
    let mut eyes = eyes.borrow_mut();
    if !started {
        // The session sweeps its swapchains after this callback.
        eyes.swapchains.clear();
        return Ok(());
    }
    let advertised = ctx.swapchain_formats()?;
    let format = choose_swapchain_format(
        &advertised,
        &[VK_FORMAT_R8G8B8A8_SRGB, VK_FORMAT_B8G8R8A8_SRGB],
    )
    .or_else(|| advertised.first().copied())
    .ok_or_else(|| halo_xr::XrError::unsupported("runtime advertises no swapchain formats"))?;

    let views = ctx.view_configuration().views().to_vec();
    for view in views {
        let desc = SwapchainCreateDesc::new(
            SwapchainUsage::COLOR_ATTACHMENT | SwapchainUsage::SAMPLED,
            format,
            1,
            view.recommended_width,
            view.recommended_height,
        );
        let handle = ctx.create_swapchain_with(&desc)?.handle();
        eyes.swapchains
            .push((handle, view.recommended_width, view.recommended_height));
        eyes.created += 1;
    }
    tracing::info!(count = eyes.swapchains.len(), format, "eye swapchains created");
    Ok(())
}

fn grip_actions() -> (ActionKey, ActionKey, ActionKey) {
    (
        ActionKey::new(ACTION_SET, "select"),
        ActionKey::new(ACTION_SET, "left_grip"),
        ActionKey::new(ACTION_SET, "right_grip"),
    )
}

/// Create the demo action set and suggest bindings for common controllers.
fn declare_actions<R: XrRuntime>(ctx: &mut XrContext<R>) -> Result<Vec<PoseSlot>> {
    let (select, left, right) = grip_actions();
    ctx.create_action_set(ACTION_SET, "Halo", 0)?;
    ctx.create_action(select.clone(), "Select", ActionKind::Float, &[])?;
    ctx.create_action(left.clone(), "Left grip", ActionKind::Pose, &[])?;
    ctx.create_action(right.clone(), "Right grip", ActionKind::Pose, &[])?;

    let bindings = [
        BindingSuggestion::new(select.clone(), "/user/hand/right/input/select/click"),
        BindingSuggestion::new(select, "/user/hand/right/input/trigger/value"),
        BindingSuggestion::new(left.clone(), "/user/hand/left/input/grip/pose"),
        BindingSuggestion::new(right.clone(), "/user/hand/right/input/grip/pose"),
    ];
    for profile in [KHR_SIMPLE_CONTROLLER, OCULUS_TOUCH_CONTROLLER] {
        let submitted = ctx.suggest_bindings(profile, &bindings)?;
        tracing::debug!(profile, submitted, "bindings suggested");
    }
    ctx.attach_action_sets(&[ACTION_SET])?;

    Ok(ctx.register_pose_actions(vec![
        PoseActionRequest::new(left),
        PoseActionRequest::new(right),
    ])?)
}

/// Acquire, wait and release one image per eye and describe the projection views.
fn render<R: XrRuntime>(
    ctx: &mut XrContext<R>,
    eyes: &RefCell<EyeSwapchains>,
    time: Time,
) -> XrResult<Vec<ProjectionView>> {
    let views = ctx.locate_views(time)?;
    let targets = eyes.borrow().swapchains.clone();
    let mut projection = Vec::with_capacity(views.len());
    for (view, (swapchain, width, height)) in views.iter().zip(targets) {
        ctx.acquire_swapchain_image(swapchain)?;
        ctx.wait_swapchain_image(swapchain, i64::MAX)?;
        ctx.release_swapchain_image(swapchain)?;
        projection.push(ProjectionView {
            pose: view.pose,
            fov: view.fov,
            swapchain,
            image_rect: Rect2D {
                x: 0,
                y: 0,
                width: width as i32,
                height: height as i32,
            },
            image_array_index: 0,
        });
    }
    Ok(projection)
}

/// Create a fresh session after the runtime stopped the previous one on its own.
fn resume_session<R: XrRuntime>(ctx: &mut XrContext<R>, stop_requested: bool) -> Result<bool> {
    if stop_requested || ctx.session_handle().is_some() {
        return Ok(false);
    }
    tracing::info!("session stopped by the runtime, starting a new one");
    ctx.start_session().context("session re-creation failed")?;
    Ok(true)
}

/// Set up, start a session, render `frames` frames, then stop gracefully.
pub fn drive<R: XrRuntime>(ctx: &mut XrContext<R>, frames: u64) -> Result<RunSummary> {
    ctx.setup().context("XR setup failed")?;
    ctx.initialize_graphics(GraphicsRequest::default())
        .context("graphics initialization failed")?;
    let grips = declare_actions(ctx)?;

    let eyes = Rc::new(RefCell::new(EyeSwapchains::default()));
    let listener_eyes = eyes.clone();
    ctx.on_graphics_lifecycle(move |started, lifecycle| {
        create_eye_swapchains(&listener_eyes, started, lifecycle)
    });
    ctx.start_session().context("session creation failed")?;

    let mut summary = RunSummary::default();
    let mut stop_requested = false;
    let mut idle_polls = 0;
    loop {
        let outcome = ctx.process_events()?;
        summary.events += outcome.events;
        if outcome.instance_lost {
            summary.instance_lost = true;
            break;
        }
        if outcome.exit {
            break;
        }
        if !ctx.is_running() {
            if resume_session(ctx, stop_requested)? {
                idle_polls = 0;
            }
            idle_polls += 1;
            if idle_polls > MAX_IDLE_POLLS {
                anyhow::bail!("session never started running");
            }
            std::thread::sleep(IDLE_POLL);
            continue;
        }

        ctx.sync_actions(&[ACTION_SET])?;
        let frame = ctx.begin_frame()?;
        if frame.should_render {
            let time = frame.predicted_display_time;
            let rendered = render(ctx, &eyes, time);
            let views = rendered.as_deref().unwrap_or_default();
            ctx.end_frame(time, views)?;
            rendered?;
            ctx.update_pose_actions(time, None)?;
            summary.frames_rendered += 1;
        }

        if summary.frames_rendered >= frames && !stop_requested {
            let left = grips[0].pose();
            tracing::info!(
                rendered = summary.frames_rendered,
                left_grip = ?left.position,
                "frame budget reached, requesting exit"
            );
            ctx.stop_session()?;
            stop_requested = true;
        }
    }

    summary.frames_begun = ctx.frames_begun();
    summary.frames_ended = ctx.frames_ended();
    summary.swapchains_created = eyes.borrow().created;
    ctx.shutdown();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_xr::dummy::HandleKind;
    use halo_xr::{DummyRuntime, RuntimeEvent, SessionState, XrConfig};

    #[test]
    fn test_drive_renders_budget_and_exits() {
        let mut ctx = XrContext::new(DummyRuntime::new(), XrConfig::default()).unwrap();
        let summary = drive(&mut ctx, 5).unwrap();

        assert_eq!(summary.frames_rendered, 5);
        assert_eq!(summary.frames_begun, summary.frames_ended);
        assert_eq!(summary.swapchains_created, 2);
        assert!(!summary.instance_lost);
        assert_eq!(ctx.runtime().live_handle_count(), 0);

        let submission = &ctx.runtime().submissions()[0];
        assert_eq!(submission.layers[0].views.len(), 2);
    }

    #[test]
    fn test_drive_reports_instance_loss() {
        let mut runtime = DummyRuntime::new();
        runtime.push_event(RuntimeEvent::InstanceLossPending {
            loss_time: Time::from_nanos(1),
        });
        let mut ctx = XrContext::new(runtime, XrConfig::default()).unwrap();

        let summary = drive(&mut ctx, 100).unwrap();

        assert!(summary.instance_lost);
        assert_eq!(summary.frames_rendered, 0);
        assert_eq!(ctx.runtime().live_handles(HandleKind::Instance), 0);
    }

    #[test]
    fn test_drive_surfaces_setup_failure() {
        let runtime = DummyRuntime::new().with_extensions(&[]);
        let mut ctx = XrContext::new(runtime, XrConfig::default()).unwrap();

        let err = drive(&mut ctx, 1).unwrap_err();
        assert!(format!("{err:#}").contains("XR setup failed"));
    }

    #[test]
    fn test_drive_ends_open_frame_when_rendering_fails() {
        let mut runtime = DummyRuntime::new();
        runtime.fail("xrAcquireSwapchainImage");
        let mut ctx = XrContext::new(runtime, XrConfig::default()).unwrap();

        assert!(drive(&mut ctx, 3).is_err());
        assert_eq!(ctx.frames_begun(), 1);
        assert_eq!(ctx.frames_ended(), 1);
        let submission = ctx.runtime().submissions().last().unwrap();
        assert!(submission.layers.is_empty());
    }

    #[test]
    fn test_resume_session_after_runtime_stop() {
        let mut ctx = XrContext::new(DummyRuntime::new(), XrConfig::default()).unwrap();
        ctx.setup().unwrap();
        ctx.initialize_graphics(GraphicsRequest::default()).unwrap();
        ctx.start_session().unwrap();
        ctx.process_events().unwrap();
        assert!(!resume_session(&mut ctx, false).unwrap());

        let handle = ctx.session_handle().unwrap();
        ctx.runtime_mut().push_state(handle, SessionState::Stopping);
        let outcome = ctx.process_events().unwrap();
        assert!(!outcome.exit);
        assert!(ctx.session_handle().is_none());

        assert!(!resume_session(&mut ctx, true).unwrap());
        assert!(resume_session(&mut ctx, false).unwrap());
        ctx.process_events().unwrap();
        assert!(ctx.is_running());
        assert_eq!(ctx.state(), SessionState::Focused);
    }
}
