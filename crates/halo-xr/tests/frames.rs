//! Frame protocol tests: strict begin/end alternation, the no-render path,
//! and display time progression.

use halo_xr::{
    DummyRuntime, GraphicsRequest, ProjectionView, Rect2D, SessionState, SwapchainCreateDesc,
    SwapchainHandle, SwapchainUsage, XrConfig, XrContext, XrError,
};

fn running_context(runtime: DummyRuntime) -> XrContext<DummyRuntime> {
    let mut ctx = XrContext::new(runtime, XrConfig::default()).expect("valid config");
    ctx.setup().expect("setup");
    ctx.initialize_graphics(GraphicsRequest::default())
        .expect("graphics");
    ctx.start_session().expect("session");
    ctx.process_events().expect("events");
    ctx
}

fn projection_views(ctx: &XrContext<DummyRuntime>, swapchain: SwapchainHandle, time: halo_xr::Time) -> Vec<ProjectionView> {
    ctx.locate_views(time)
        .unwrap()
        .into_iter()
        .enumerate()
        .map(|(index, view)| ProjectionView {
            pose: view.pose,
            fov: view.fov,
            swapchain,
            image_rect: Rect2D {
                x: 0,
                y: 0,
                width: 1440,
                height: 1600,
            },
            image_array_index: index as u32,
        })
        .collect()
}

fn stereo_swapchain(ctx: &mut XrContext<DummyRuntime>) -> SwapchainHandle {
    let format = ctx.swapchain_formats().unwrap()[0];
    let desc = SwapchainCreateDesc::new(SwapchainUsage::COLOR_ATTACHMENT, format, 1, 1440, 1600)
        .with_array_size(2);
    ctx.create_swapchain(&desc).unwrap().handle()
}

#[test]
fn test_rendered_frame_submits_projection_layer() {
    let mut ctx = running_context(DummyRuntime::new());
    let swapchain = stereo_swapchain(&mut ctx);
    ctx.runtime().clear_calls();

    let frame = ctx.begin_frame().unwrap();
    assert!(frame.should_render);
    let image = ctx.acquire_swapchain_image(swapchain).unwrap();
    ctx.wait_swapchain_image(swapchain, i64::MAX).unwrap();
    ctx.release_swapchain_image(swapchain).unwrap();
    let views = projection_views(&ctx, swapchain, frame.predicted_display_time);
    ctx.end_frame(frame.predicted_display_time, &views).unwrap();

    assert_eq!(image, 0);
    let submission = ctx.runtime().submissions().last().unwrap();
    assert_eq!(submission.display_time, frame.predicted_display_time);
    assert_eq!(submission.layers.len(), 1);
    assert_eq!(submission.layers[0].views.len(), 2);
    assert_eq!(submission.layers[0].views[1].image_array_index, 1);

    let protocol: Vec<_> = ctx
        .runtime()
        .calls()
        .into_iter()
        .filter(|op| op.ends_with("Frame"))
        .collect();
    assert_eq!(protocol, vec!["xrWaitFrame", "xrBeginFrame", "xrEndFrame"]);
}

#[test]
fn test_runtime_no_render_ends_frame_immediately() {
    let mut ctx = running_context(DummyRuntime::new());
    ctx.runtime_mut().set_should_render(false);

    let frame = ctx.begin_frame().unwrap();

    assert!(!frame.should_render);
    assert_eq!(ctx.frames_begun(), 1);
    assert_eq!(ctx.frames_ended(), 1);
    assert!(ctx.runtime().submissions()[0].layers.is_empty());
    assert!(matches!(
        ctx.end_frame(frame.predicted_display_time, &[]),
        Err(XrError::FrameProtocol(_))
    ));
}

#[test]
fn test_inactive_state_skips_render_but_keeps_alternation() {
    let mut ctx = XrContext::new(DummyRuntime::new().with_auto_advance(false), XrConfig::default()).unwrap();
    ctx.setup().unwrap();
    ctx.initialize_graphics(GraphicsRequest::default()).unwrap();
    let session = ctx.start_session().unwrap();
    ctx.runtime_mut().push_state(session, SessionState::Idle);
    ctx.runtime_mut().push_state(session, SessionState::Ready);
    ctx.process_events().unwrap();
    assert!(ctx.is_running());

    let frame = ctx.begin_frame().unwrap();

    assert!(!frame.should_render);
    assert_eq!(ctx.runtime().call_count("xrWaitFrame"), 1);
    assert_eq!(ctx.runtime().call_count("xrBeginFrame"), 1);
    assert_eq!(ctx.runtime().call_count("xrEndFrame"), 1);
}

#[test]
fn test_double_begin_is_a_protocol_violation() {
    let mut ctx = running_context(DummyRuntime::new());
    ctx.begin_frame().unwrap();

    assert!(matches!(ctx.begin_frame(), Err(XrError::FrameProtocol(_))));
    assert_eq!(ctx.runtime().call_count("xrWaitFrame"), 1);
}

#[test]
fn test_end_without_begin_is_a_protocol_violation() {
    let mut ctx = running_context(DummyRuntime::new());
    let err = ctx.end_frame(halo_xr::Time::from_nanos(1), &[]).unwrap_err();
    assert!(matches!(err, XrError::FrameProtocol(_)));
    assert_eq!(ctx.runtime().call_count("xrEndFrame"), 0);
}

#[test]
fn test_not_running_returns_idle_frame_without_runtime_calls() {
    let mut ctx = XrContext::new(DummyRuntime::new(), XrConfig::default()).unwrap();
    ctx.setup().unwrap();
    ctx.initialize_graphics(GraphicsRequest::default()).unwrap();
    ctx.start_session().unwrap();

    let frame = ctx.begin_frame().unwrap();

    assert!(!frame.should_render);
    assert_eq!(frame.predicted_display_time, halo_xr::Time::ZERO);
    assert_eq!(ctx.runtime().call_count("xrWaitFrame"), 0);
    assert_eq!(ctx.frames_begun(), 0);
}

#[test]
fn test_every_begin_matched_by_one_end() {
    let mut ctx = running_context(DummyRuntime::new());
    let mut last_time = None;
    for frame_index in 0..12 {
        ctx.runtime_mut().set_should_render(frame_index % 3 != 0);
        let frame = ctx.begin_frame().unwrap();
        if frame.should_render {
            ctx.end_frame(frame.predicted_display_time, &[]).unwrap();
        }
        if let Some(last) = last_time {
            assert!(frame.predicted_display_time > last);
        }
        last_time = Some(frame.predicted_display_time);
        assert!(frame.predicted_display_period > 0);
    }
    assert_eq!(ctx.frames_begun(), 12);
    assert_eq!(ctx.frames_ended(), 12);
    assert_eq!(ctx.runtime().call_count("xrBeginFrame"), 12);
    assert_eq!(ctx.runtime().call_count("xrEndFrame"), 12);
    assert!(ctx.runtime().submissions().iter().all(|s| s.layers.is_empty()));
}

#[test]
fn test_wait_failure_leaves_no_open_frame() {
    let mut ctx = running_context(DummyRuntime::new());
    ctx.runtime_mut().fail("xrWaitFrame");

    let err = ctx.begin_frame().unwrap_err();
    assert!(matches!(err, XrError::Runtime { op: "xrWaitFrame", .. }));

    ctx.runtime_mut().clear_failures();
    let frame = ctx.begin_frame().unwrap();
    assert!(frame.should_render);
    ctx.end_frame(frame.predicted_display_time, &[]).unwrap();
}

#[test]
fn test_locate_views_requires_running_session() {
    let mut ctx = XrContext::new(DummyRuntime::new(), XrConfig::default()).unwrap();
    ctx.setup().unwrap();
    assert!(matches!(
        ctx.locate_views(halo_xr::Time::ZERO),
        Err(XrError::SessionNotRunning)
    ));
}

#[test]
fn test_teardown_with_open_frame_resets_scheduler() {
    let mut ctx = running_context(DummyRuntime::new());
    ctx.begin_frame().unwrap();
    let session = ctx.session_handle().unwrap();
    ctx.runtime_mut().push_state(session, SessionState::Stopping);
    ctx.process_events().unwrap();

    ctx.start_session().unwrap();
    ctx.process_events().unwrap();
    let frame = ctx.begin_frame().unwrap();
    assert!(frame.should_render);
    ctx.end_frame(frame.predicted_display_time, &[]).unwrap();
}
