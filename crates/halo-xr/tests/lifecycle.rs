//! Session state machine tests: event-driven begin/teardown, callback
//! ordering, two-phase stop and instance loss.

use std::cell::RefCell;
use std::rc::Rc;

use halo_xr::dummy::HandleKind;
use halo_xr::{
    ActionKey, ActionKind, DummyRuntime, GraphicsRequest, PoseActionRequest, RuntimeEvent,
    SessionHandle, SessionState, SwapchainUsage, Time, XrConfig, XrContext, XrError,
};

type Log = Rc<RefCell<Vec<String>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ready_context(runtime: DummyRuntime) -> XrContext<DummyRuntime> {
    init_tracing();
    let mut ctx = XrContext::new(runtime, XrConfig::default()).expect("valid config");
    ctx.setup().expect("setup");
    ctx.initialize_graphics(GraphicsRequest::default())
        .expect("graphics");
    ctx
}

fn record_lifecycle(ctx: &mut XrContext<DummyRuntime>) -> Log {
    let log: Log = Rc::default();
    let graphics = log.clone();
    ctx.on_graphics_lifecycle(move |started, _| {
        graphics.borrow_mut().push(format!("graphics:{started}"));
        Ok(())
    });
    let actions = log.clone();
    ctx.on_action_lifecycle(move |started, _| {
        actions.borrow_mut().push(format!("actions:{started}"));
        Ok(())
    });
    log
}

fn hand_poses(ctx: &mut XrContext<DummyRuntime>) -> Vec<ActionKey> {
    ctx.create_action_set("hands", "Hands", 0).unwrap();
    let keys = vec![
        ActionKey::new("hands", "left_grip"),
        ActionKey::new("hands", "right_grip"),
    ];
    for key in &keys {
        ctx.create_action(key.clone(), &key.action, ActionKind::Pose, &[])
            .unwrap();
    }
    ctx.register_pose_actions(keys.iter().cloned().map(PoseActionRequest::new).collect())
        .unwrap();
    keys
}

fn session(ctx: &XrContext<DummyRuntime>) -> SessionHandle {
    ctx.session_handle().expect("live session")
}

#[test]
fn test_ready_begins_session_and_reaches_focused() {
    let mut ctx = ready_context(DummyRuntime::new());
    let log = record_lifecycle(&mut ctx);

    ctx.start_session().unwrap();
    assert_eq!(ctx.state(), SessionState::Idle);
    assert!(!ctx.is_running());

    let outcome = ctx.process_events().unwrap();
    assert_eq!(outcome.events, 5);
    assert_eq!(ctx.state(), SessionState::Focused);
    assert!(ctx.is_running());
    assert_eq!(*log.borrow(), vec!["graphics:true", "actions:true"]);
    assert_eq!(ctx.runtime().call_count("xrBeginSession"), 1);
}

#[test]
fn test_ready_to_focused_fires_no_teardown() {
    let mut ctx = ready_context(DummyRuntime::new().with_auto_advance(false));
    let log = record_lifecycle(&mut ctx);
    ctx.start_session().unwrap();
    let handle = session(&ctx);

    ctx.runtime_mut().push_state(handle, SessionState::Idle);
    ctx.runtime_mut().push_state(handle, SessionState::Ready);
    ctx.process_events().unwrap();
    assert_eq!(ctx.state(), SessionState::Ready);

    ctx.runtime_mut().push_state(handle, SessionState::Focused);
    ctx.process_events().unwrap();

    assert_eq!(ctx.state(), SessionState::Focused);
    assert!(!log.borrow().iter().any(|entry| entry.ends_with("false")));
    assert_eq!(ctx.runtime().call_count("xrEndSession"), 0);
    assert_eq!(ctx.session_handle(), Some(handle));
}

#[test]
fn test_stopping_tears_down_session_resources() {
    let mut ctx = ready_context(DummyRuntime::new());
    let log = record_lifecycle(&mut ctx);
    let keys = hand_poses(&mut ctx);
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();
    assert_eq!(ctx.runtime().live_handles(HandleKind::Space), 3);

    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::Stopping);
    let outcome = ctx.process_events().unwrap();

    assert!(!outcome.exit);
    assert!(ctx.session_handle().is_none());
    assert!(!ctx.is_running());
    assert_eq!(ctx.runtime().call_count("xrEndSession"), 1);
    assert_eq!(ctx.runtime().live_handles(HandleKind::Space), 0);
    assert_eq!(ctx.runtime().live_handles(HandleKind::Session), 0);
    let falses = log.borrow().iter().filter(|e| e.ends_with("false")).count();
    assert_eq!(falses, 2);
    assert_eq!(
        log.borrow().iter().filter(|e| *e == "graphics:false").count(),
        1
    );
    // registrations survive a plain stop
    assert!(ctx.pose_slot(&keys[0]).is_some());
}

#[test]
fn test_teardown_notifies_actions_before_graphics() {
    let mut ctx = ready_context(DummyRuntime::new());
    let log = record_lifecycle(&mut ctx);
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();

    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::Exiting);
    ctx.process_events().unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["graphics:true", "actions:true", "actions:false", "graphics:false"]
    );
}

#[test]
fn test_stop_session_is_two_phase() {
    let mut ctx = ready_context(DummyRuntime::new());
    let log = record_lifecycle(&mut ctx);
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();

    ctx.stop_session().unwrap();
    assert!(ctx.is_running());
    assert!(ctx.session_handle().is_some());
    assert_eq!(log.borrow().len(), 2);

    let outcome = ctx.process_events().unwrap();
    assert!(outcome.exit);
    assert!(ctx.session_handle().is_none());
    assert_eq!(ctx.state(), SessionState::Stopping);
    assert_eq!(ctx.runtime().live_handles(HandleKind::Session), 0);
    assert_eq!(ctx.runtime().pending_events(), 0);
    assert_eq!(log.borrow().len(), 4);
}

#[test]
fn test_session_can_restart_after_stop() {
    let mut ctx = ready_context(DummyRuntime::new());
    let log = record_lifecycle(&mut ctx);
    hand_poses(&mut ctx);
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();
    let first = session(&ctx);
    ctx.runtime_mut().push_state(first, SessionState::Stopping);
    ctx.process_events().unwrap();

    let second = ctx.start_session().unwrap();
    ctx.process_events().unwrap();

    assert_ne!(first, second);
    assert_eq!(ctx.state(), SessionState::Focused);
    assert_eq!(ctx.runtime().live_handles(HandleKind::Space), 3);
    assert_eq!(ctx.runtime().call_count("xrAttachSessionActionSets"), 2);
    assert_eq!(log.borrow().last().map(String::as_str), Some("actions:true"));
}

#[test]
fn test_exiting_releases_pose_registrations() {
    let mut ctx = ready_context(DummyRuntime::new());
    let keys = hand_poses(&mut ctx);
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();

    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::Exiting);
    let outcome = ctx.process_events().unwrap();

    assert!(outcome.exit);
    assert!(ctx.pose_slot(&keys[0]).is_none());
    assert!(ctx.session_handle().is_none());
    assert!(ctx.instance_handle().is_some());
}

#[test]
fn test_loss_pending_tears_down_instance() {
    let mut ctx = ready_context(DummyRuntime::new());
    let log = record_lifecycle(&mut ctx);
    hand_poses(&mut ctx);
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();

    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::LossPending);
    let outcome = ctx.process_events().unwrap();

    assert!(outcome.instance_lost);
    assert!(ctx.session_handle().is_none());
    assert!(ctx.instance_handle().is_none());
    assert!(ctx.system().is_none());
    assert!(ctx.graphics_binding().is_none());
    assert_eq!(ctx.runtime().live_handle_count(), 0);
    assert_eq!(*log.borrow(), vec!["graphics:true", "actions:true", "actions:false", "graphics:false"]);

    // A new setup is allowed once the old instance is gone.
    ctx.setup().unwrap();
    assert!(ctx.instance_handle().is_some());
}

#[test]
fn test_instance_loss_event_behaves_like_loss_pending() {
    let mut ctx = ready_context(DummyRuntime::new());
    let log = record_lifecycle(&mut ctx);
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();

    ctx.runtime_mut().push_event(RuntimeEvent::InstanceLossPending {
        loss_time: Time::from_nanos(1_000),
    });
    let outcome = ctx.process_events().unwrap();

    assert!(outcome.instance_lost);
    assert_eq!(ctx.state(), SessionState::LossPending);
    assert_eq!(ctx.runtime().live_handle_count(), 0);
    assert_eq!(log.borrow().len(), 4);
}

#[test]
fn test_events_for_other_sessions_are_ignored() {
    let mut ctx = ready_context(DummyRuntime::new());
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();

    ctx.runtime_mut()
        .push_state(SessionHandle::from_raw(9_999), SessionState::Stopping);
    ctx.runtime_mut().push_event(RuntimeEvent::EventsLost { count: 3 });
    ctx.runtime_mut().push_event(RuntimeEvent::Unknown { raw_type: 1_000_052_000 });
    let outcome = ctx.process_events().unwrap();

    assert_eq!(outcome.events, 3);
    assert_eq!(ctx.state(), SessionState::Focused);
    assert!(ctx.is_running());
}

#[test]
fn test_no_callbacks_when_session_never_began() {
    let mut ctx = ready_context(DummyRuntime::new().with_auto_advance(false));
    let log = record_lifecycle(&mut ctx);
    ctx.start_session().unwrap();
    let handle = session(&ctx);

    ctx.runtime_mut().push_state(handle, SessionState::Idle);
    ctx.runtime_mut().push_state(handle, SessionState::Exiting);
    ctx.process_events().unwrap();

    assert!(log.borrow().is_empty());
    assert_eq!(ctx.runtime().call_count("xrEndSession"), 0);
    assert_eq!(ctx.runtime().live_handles(HandleKind::Session), 0);
}

#[test]
fn test_begin_failure_is_reported_without_callbacks() {
    let mut ctx = ready_context(DummyRuntime::new());
    let log = record_lifecycle(&mut ctx);
    ctx.start_session().unwrap();
    ctx.runtime_mut().fail("xrBeginSession");

    let err = ctx.process_events().unwrap_err();
    assert!(matches!(err, XrError::Runtime { op: "xrBeginSession", .. }));
    assert!(!ctx.is_running());
    assert!(log.borrow().is_empty());
}

#[test]
fn test_begin_failure_drains_queue_and_retries() {
    let mut ctx = ready_context(DummyRuntime::new().with_auto_advance(false));
    let log = record_lifecycle(&mut ctx);
    ctx.start_session().unwrap();
    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::Ready);
    ctx.runtime_mut().push_event(RuntimeEvent::EventsLost { count: 1 });
    ctx.runtime_mut().fail("xrBeginSession");

    let err = ctx.process_events().unwrap_err();
    assert!(matches!(err, XrError::Runtime { op: "xrBeginSession", .. }));
    assert_eq!(ctx.runtime().pending_events(), 0);
    assert_eq!(ctx.state(), SessionState::Ready);
    assert!(!ctx.is_running());

    ctx.runtime_mut().clear_failures();
    let outcome = ctx.process_events().unwrap();
    assert_eq!(outcome.events, 0);
    assert!(ctx.is_running());
    assert_eq!(ctx.runtime().call_count("xrBeginSession"), 2);
    assert_eq!(*log.borrow(), vec!["graphics:true", "actions:true"]);
}

#[test]
fn test_begin_failure_still_applies_later_stopping() {
    let mut ctx = ready_context(DummyRuntime::new().with_auto_advance(false));
    ctx.start_session().unwrap();
    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::Ready);
    ctx.runtime_mut().push_state(handle, SessionState::Stopping);
    ctx.runtime_mut().fail("xrBeginSession");

    assert!(ctx.process_events().is_err());
    assert_eq!(ctx.runtime().pending_events(), 0);
    assert_eq!(ctx.state(), SessionState::Stopping);
    assert!(ctx.session_handle().is_none());
    assert_eq!(ctx.runtime().live_handles(HandleKind::Session), 0);
}

#[test]
fn test_listener_failure_still_drains_queue() {
    let mut ctx = ready_context(DummyRuntime::new());
    ctx.on_graphics_lifecycle(|started, _| {
        if started {
            Err(XrError::invalid_state("renderer not ready"))
        } else {
            Ok(())
        }
    });
    ctx.start_session().unwrap();

    let err = ctx.process_events().unwrap_err();
    assert!(matches!(err, XrError::InvalidState(_)));
    assert_eq!(ctx.runtime().pending_events(), 0);
    assert_eq!(ctx.state(), SessionState::Focused);
    assert!(ctx.is_running());
}

#[test]
fn test_instance_loss_is_handled_when_another_event_fails() {
    let mut ctx = ready_context(DummyRuntime::new().with_auto_advance(false));
    ctx.start_session().unwrap();
    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::Ready);
    ctx.runtime_mut().push_event(RuntimeEvent::InstanceLossPending {
        loss_time: Time::from_nanos(500),
    });
    ctx.runtime_mut().fail("xrBeginSession");

    assert!(ctx.process_events().is_err());
    assert!(ctx.instance_handle().is_none());
    assert!(ctx.graphics_binding().is_none());
    assert_eq!(ctx.runtime().live_handle_count(), 0);
}

#[test]
fn test_leftover_swapchains_are_swept() {
    let mut ctx = ready_context(DummyRuntime::new());
    ctx.on_graphics_lifecycle(|started, lc| {
        if started {
            let format = lc.swapchain_formats()?[0];
            let views: Vec<_> = lc.view_configuration().views().to_vec();
            for view in views {
                lc.create_swapchain(
                    SwapchainUsage::COLOR_ATTACHMENT | SwapchainUsage::SAMPLED,
                    format,
                    view.recommended_sample_count,
                    view.recommended_width,
                    view.recommended_height,
                )?;
            }
        }
        Ok(())
    });
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();
    assert_eq!(ctx.swapchains().len(), 2);
    assert_eq!(ctx.runtime().live_handles(HandleKind::Swapchain), 2);

    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::Stopping);
    ctx.process_events().unwrap();

    assert!(ctx.swapchains().is_empty());
    assert_eq!(ctx.runtime().live_handles(HandleKind::Swapchain), 0);
}

#[test]
fn test_swapchains_released_by_collaborator_are_not_destroyed_twice() {
    let mut ctx = ready_context(DummyRuntime::new());
    let created = Rc::new(RefCell::new(Vec::new()));
    let owned = created.clone();
    ctx.on_graphics_lifecycle(move |started, lc| {
        if started {
            let format = lc.swapchain_formats()?[0];
            let handle = lc
                .create_swapchain(SwapchainUsage::COLOR_ATTACHMENT, format, 1, 640, 480)?
                .handle();
            owned.borrow_mut().push(handle);
        } else {
            for handle in owned.borrow_mut().drain(..) {
                lc.destroy_swapchain(handle)?;
            }
        }
        Ok(())
    });
    ctx.start_session().unwrap();
    ctx.process_events().unwrap();
    assert_eq!(created.borrow().len(), 1);

    let handle = session(&ctx);
    ctx.runtime_mut().push_state(handle, SessionState::Stopping);
    ctx.process_events().unwrap();

    assert_eq!(ctx.runtime().call_count("xrDestroySwapchain"), 1);
    assert_eq!(ctx.runtime().live_handles(HandleKind::Swapchain), 0);
}
