//! Integration test for the display dispatcher routing, stashing and event merging.

mod support;

use lumen_renderer::{RendererConfig, ThreadingMode};
use lumen_shared::commands::{
    CreateDisplay, CreateOffscreenBuffer, DestroyDisplay, LogInfo, LogStatistics, ReadPixels,
    ReceiveScene, ScenePublished, SceneUnpublished, SetClearColor, SetSceneMapping, SetSceneState,
    UpdateScene,
};
use lumen_shared::{
    DataConsumerId, DisplayConfig, DisplayHandle, LoopMode, OffscreenBufferHandle, PublicationMode, Rect,
    RendererCommand, RendererCommandKind, RendererEvent, RendererEventType, RendererSceneState,
    SceneId, SceneInfo, SceneUpdate, Vec4,
};
use std::sync::atomic::Ordering;
use std::time::Duration;
use support::{
    dispatch, mock_dispatcher, mock_dispatcher_with_config, renderer_events, scene_control_events,
};

const D1: DisplayHandle = DisplayHandle(1);
const D2: DisplayHandle = DisplayHandle(2);
const D3: DisplayHandle = DisplayHandle(3);

fn create_display(display: DisplayHandle) -> RendererCommand {
    CreateDisplay {
        display,
        config: DisplayConfig::default(),
    }
    .into()
}

fn published(scene: u64) -> RendererCommand {
    ScenePublished {
        scene: SceneId(scene),
        mode: PublicationMode::LocalOnly,
    }
    .into()
}

fn mapping(scene: u64, display: DisplayHandle) -> RendererCommand {
    SetSceneMapping {
        scene: SceneId(scene),
        display,
    }
    .into()
}

fn scene_state(scene: u64, state: RendererSceneState) -> RendererCommand {
    SetSceneState {
        scene: SceneId(scene),
        state,
    }
    .into()
}

fn clear_color(display: DisplayHandle, color: Vec4) -> RendererCommand {
    SetClearColor {
        display,
        buffer: None,
        color,
    }
    .into()
}

fn read_pixels(display: DisplayHandle) -> RendererCommand {
    ReadPixels {
        display,
        buffer: None,
        region: Rect::new(0, 0, 4, 4),
        full_screen: false,
        file_name: None,
    }
    .into()
}

fn state_changed(scene: u64, state: RendererSceneState) -> RendererEvent {
    RendererEvent::scene_state_changed(SceneId(scene), state)
}

fn event_types(events: &[RendererEvent]) -> Vec<RendererEventType> {
    events.iter().map(|event| event.event_type).collect()
}

// =============================================================================
// DISPLAY LIFECYCLE
// =============================================================================

#[test]
fn test_can_create_display() {
    let (dispatcher, registry) = mock_dispatcher();
    assert_eq!(dispatcher.threading_mode(), ThreadingMode::Undecided);

    dispatch(&dispatcher, vec![create_display(D1)]);

    assert_eq!(dispatcher.displays(), vec![D1]);
    assert_eq!(dispatcher.threading_mode(), ThreadingMode::Unthreaded);
    assert_eq!(
        registry.bundle(D1).received_kinds(),
        vec![RendererCommandKind::CreateDisplay]
    );
    assert!(registry.thread(D1).is_none());
}

#[test]
fn test_display_removed_after_destroyed_event() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(
        &dispatcher,
        vec![create_display(D1), create_display(D2), mapping(5, D1)],
    );

    registry
        .bundle(D1)
        .emit_renderer_event(RendererEvent::new(RendererEventType::DisplayDestroyed).with_display(D1));
    let events = renderer_events(&dispatcher);
    assert_eq!(event_types(&events), vec![RendererEventType::DisplayDestroyed]);
    assert_eq!(dispatcher.displays(), vec![D2]);

    // the scene lost its display, so its commands go to everyone left
    let remaining = registry.bundle(D2);
    remaining.take_received();
    dispatch(&dispatcher, vec![scene_state(5, RendererSceneState::Rendered)]);
    assert_eq!(remaining.received_kinds(), vec![RendererCommandKind::SetSceneState]);
}

#[test]
fn test_display_removed_after_create_failed_event() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1)]);

    registry
        .bundle(D1)
        .emit_renderer_event(RendererEvent::new(RendererEventType::DisplayCreateFailed).with_display(D1));
    let events = renderer_events(&dispatcher);

    assert_eq!(event_types(&events), vec![RendererEventType::DisplayCreateFailed]);
    assert!(dispatcher.displays().is_empty());

    // handle is free again
    dispatch(&dispatcher, vec![create_display(D1)]);
    assert_eq!(dispatcher.displays(), vec![D1]);
}

#[test]
#[should_panic(expected = "created twice")]
fn test_duplicate_display_panics() {
    let (dispatcher, _registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1)]);
    dispatch(&dispatcher, vec![create_display(D1)]);
}

// =============================================================================
// ROUTING
// =============================================================================

#[test]
fn test_pushes_command_to_destination_display() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    let (first, second) = (registry.bundle(D1), registry.bundle(D2));
    first.take_received();
    second.take_received();

    dispatch(
        &dispatcher,
        vec![CreateOffscreenBuffer {
            display: D2,
            buffer: OffscreenBufferHandle(3),
            width: 16,
            height: 16,
            sample_count: 0,
            interruptible: false,
        }
        .into()],
    );

    assert!(first.received_kinds().is_empty());
    assert_eq!(
        second.received_kinds(),
        vec![RendererCommandKind::CreateOffscreenBuffer]
    );
}

#[test]
fn test_pushes_scene_commands_to_mapped_display_in_one_batch() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    let (first, second) = (registry.bundle(D1), registry.bundle(D2));
    first.take_received();
    second.take_received();
    let pushes_before = second.push_calls();

    dispatch(
        &dispatcher,
        vec![mapping(33, D2), scene_state(33, RendererSceneState::Ready)],
    );

    assert!(first.received_kinds().is_empty());
    assert_eq!(
        second.received_kinds(),
        vec![
            RendererCommandKind::SetSceneMapping,
            RendererCommandKind::SetSceneState
        ]
    );
    assert_eq!(second.push_calls(), pushes_before + 1);
}

#[test]
fn test_no_push_without_commands() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    let first = registry.bundle(D1);
    assert_eq!(first.push_calls(), 1);

    dispatch(&dispatcher, vec![read_pixels(D2)]);
    dispatch(&dispatcher, Vec::new());

    assert_eq!(first.push_calls(), 1);
    assert_eq!(registry.bundle(D2).push_calls(), 2);
}

#[test]
fn test_unknown_display_yields_fail_event() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1)]);
    registry.bundle(D1).take_received();

    dispatch(&dispatcher, vec![DestroyDisplay { display: D3 }.into()]);

    let events = renderer_events(&dispatcher);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, RendererEventType::DisplayDestroyFailed);
    assert_eq!(events[0].display_handle, Some(D3));
    assert!(registry.bundle(D1).received_kinds().is_empty());

    // not stashed for a later display with that handle
    dispatch(&dispatcher, vec![create_display(D3)]);
    assert_eq!(
        registry.bundle(D3).received_kinds(),
        vec![RendererCommandKind::CreateDisplay]
    );
}

#[test]
fn test_scene_commands_stashed_for_missing_display() {
    let (dispatcher, registry) = mock_dispatcher();

    dispatch(
        &dispatcher,
        vec![mapping(7, D2), scene_state(7, RendererSceneState::Ready)],
    );
    assert!(renderer_events(&dispatcher).is_empty());
    assert!(scene_control_events(&dispatcher).is_empty());

    dispatch(&dispatcher, vec![create_display(D2)]);
    assert_eq!(
        registry.bundle(D2).received_kinds(),
        vec![
            RendererCommandKind::SetSceneMapping,
            RendererCommandKind::SetSceneState,
            RendererCommandKind::CreateDisplay
        ]
    );

    // handed over exactly once
    dispatch(
        &dispatcher,
        vec![DestroyDisplay { display: D2 }.into()],
    );
    registry
        .bundle(D2)
        .emit_renderer_event(RendererEvent::new(RendererEventType::DisplayDestroyed).with_display(D2));
    renderer_events(&dispatcher);
    dispatch(&dispatcher, vec![create_display(D2)]);
    assert_eq!(
        registry.bundle(D2).received_kinds(),
        vec![RendererCommandKind::CreateDisplay]
    );
}

#[test]
fn test_broadcast_reaches_all_displays() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    let (first, second) = (registry.bundle(D1), registry.bundle(D2));
    first.take_received();
    second.take_received();

    dispatch(&dispatcher, vec![published(5)]);

    assert_eq!(first.take_received(), vec![published(5)]);
    assert_eq!(second.take_received(), vec![published(5)]);
}

#[test]
fn test_broadcast_history_replayed_to_new_display() {
    let (dispatcher, registry) = mock_dispatcher();
    let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
    let green = Vec4::new(0.0, 1.0, 0.0, 1.0);

    dispatch(
        &dispatcher,
        vec![
            published(7),
            clear_color(D1, red),
            published(8),
            clear_color(D1, green),
            SceneUnpublished { scene: SceneId(8) }.into(),
            LogStatistics.into(),
        ],
    );
    dispatch(&dispatcher, vec![create_display(D1)]);

    assert_eq!(
        registry.bundle(D1).take_received(),
        vec![published(7), clear_color(D1, green), create_display(D1)]
    );

    // and again for a display created later
    dispatch(&dispatcher, vec![published(9)]);
    dispatch(&dispatcher, vec![create_display(D2)]);
    assert_eq!(
        registry.bundle(D2).take_received(),
        vec![
            published(7),
            clear_color(D1, green),
            published(9),
            create_display(D2)
        ]
    );
}

#[test]
fn test_referenced_scene_follows_master_display() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(
        &dispatcher,
        vec![create_display(D1), create_display(D2), mapping(3, D1)],
    );
    let (first, second) = (registry.bundle(D1), registry.bundle(D2));
    second.set_master_scene(SceneId(9), SceneId(3));
    first.take_received();
    second.take_received();

    dispatch(
        &dispatcher,
        vec![
            ReceiveScene {
                info: SceneInfo::new(SceneId(9)),
            }
            .into(),
            UpdateScene {
                scene: SceneId(9),
                update: SceneUpdate::new(1, Vec::new()),
            }
            .into(),
        ],
    );

    assert_eq!(
        first.received_kinds(),
        vec![RendererCommandKind::ReceiveScene, RendererCommandKind::UpdateScene]
    );
    assert!(second.received_kinds().is_empty());
}

#[test]
fn test_referenced_scene_without_master_is_broadcast() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    let (first, second) = (registry.bundle(D1), registry.bundle(D2));
    first.take_received();
    second.take_received();

    dispatch(
        &dispatcher,
        vec![
            ReceiveScene {
                info: SceneInfo::new(SceneId(9)),
            }
            .into(),
            UpdateScene {
                scene: SceneId(9),
                update: SceneUpdate::new(1, Vec::new()),
            }
            .into(),
        ],
    );

    // the flush cannot be copied, so only the scene itself is broadcast
    assert_eq!(first.received_kinds(), vec![RendererCommandKind::ReceiveScene]);
    assert_eq!(second.received_kinds(), vec![RendererCommandKind::ReceiveScene]);
}

#[test]
fn test_log_info_stamped_per_display() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    dispatcher.set_min_frame_duration(Duration::from_millis(10), D2);
    dispatcher.set_loop_mode(LoopMode::UpdateOnly);
    let (first, second) = (registry.bundle(D1), registry.bundle(D2));
    first.take_received();
    second.take_received();

    dispatch(&dispatcher, vec![LogInfo::default().into()]);

    let default_duration = RendererConfig::default().default_min_frame_duration();
    for (bundle, expected) in [(first, default_duration), (second, Duration::from_millis(10))] {
        let received = bundle.take_received();
        assert_eq!(received.len(), 1);
        let RendererCommand::LogInfo(log) = &received[0] else {
            panic!("expected LogInfo, got {:?}", received[0]);
        };
        assert_eq!(log.min_frame_time, Some(expected));
        assert!(!log.displays_threaded);
        assert!(!log.display_threads_running);
        assert_eq!(log.loop_mode, LoopMode::UpdateOnly);
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[test]
fn test_dispatches_events_from_all_displays() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    let (first, second) = (registry.bundle(D1), registry.bundle(D2));

    first.emit_renderer_event(
        RendererEvent::new(RendererEventType::OffscreenBufferCreated).with_display(D1),
    );
    second.emit_renderer_event(
        RendererEvent::new(RendererEventType::ReadPixelsFromFramebuffer).with_display(D2),
    );
    first.emit_scene_control_event(
        RendererEvent::new(RendererEventType::SceneFlushed).with_scene(SceneId(1)),
    );
    second.emit_scene_control_event(
        RendererEvent::new(RendererEventType::SceneDataLinked).with_consumer(SceneId(2), DataConsumerId(4)),
    );

    assert_eq!(
        event_types(&renderer_events(&dispatcher)),
        vec![
            RendererEventType::OffscreenBufferCreated,
            RendererEventType::ReadPixelsFromFramebuffer
        ]
    );
    assert_eq!(
        event_types(&scene_control_events(&dispatcher)),
        vec![RendererEventType::SceneFlushed, RendererEventType::SceneDataLinked]
    );
    assert!(renderer_events(&dispatcher).is_empty());
}

#[test]
fn test_broadcast_echo_events_only_from_first_display() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(
        &dispatcher,
        vec![create_display(D1), create_display(D2), create_display(D3)],
    );

    for display in [D1, D2, D3] {
        let bundle = registry.bundle(display);
        let echo = RendererEvent::new(RendererEventType::ScenePublished)
            .with_scene(SceneId(5))
            .with_display(display);
        bundle.emit_scene_control_event(echo.clone());
        bundle.emit_renderer_event(echo);
        bundle.emit_scene_control_event(
            RendererEvent::new(RendererEventType::SceneUnpublished)
                .with_scene(SceneId(6))
                .with_display(display),
        );
    }

    let scene_events = scene_control_events(&dispatcher);
    assert_eq!(
        event_types(&scene_events),
        vec![RendererEventType::ScenePublished, RendererEventType::SceneUnpublished]
    );
    assert!(scene_events.iter().all(|event| event.display_handle == Some(D1)));

    let events = renderer_events(&dispatcher);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].display_handle, Some(D1));
}

#[test]
fn test_broadcast_echo_falls_to_next_display_after_first_is_gone() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    registry
        .bundle(D1)
        .emit_renderer_event(RendererEvent::new(RendererEventType::DisplayDestroyed).with_display(D1));
    renderer_events(&dispatcher);

    registry.bundle(D2).emit_scene_control_event(
        RendererEvent::new(RendererEventType::ScenePublished).with_scene(SceneId(5)),
    );

    assert_eq!(
        event_types(&scene_control_events(&dispatcher)),
        vec![RendererEventType::ScenePublished]
    );
}

#[test]
fn test_scene_state_events_reported_once() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(
        &dispatcher,
        vec![create_display(D1), create_display(D2), create_display(D3)],
    );
    let bundles = [registry.bundle(D1), registry.bundle(D2), registry.bundle(D3)];

    // unowned: first display speaks for all
    for bundle in &bundles {
        bundle.emit_scene_control_event(state_changed(4, RendererSceneState::Available));
    }
    let events = scene_control_events(&dispatcher);
    assert_eq!(events, vec![state_changed(4, RendererSceneState::Available)]);

    // Ready claims the scene for the reporting display
    bundles[1].emit_scene_control_event(state_changed(4, RendererSceneState::Ready));
    bundles[2].emit_scene_control_event(state_changed(4, RendererSceneState::Available));
    let events = scene_control_events(&dispatcher);
    assert_eq!(events, vec![state_changed(4, RendererSceneState::Ready)]);

    bundles[0].emit_scene_control_event(state_changed(4, RendererSceneState::Available));
    bundles[1].emit_scene_control_event(state_changed(4, RendererSceneState::Rendered));
    let events = scene_control_events(&dispatcher);
    assert_eq!(events, vec![state_changed(4, RendererSceneState::Rendered)]);
}

#[test]
fn test_scene_ownership_released_with_display() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    let (first, second) = (registry.bundle(D1), registry.bundle(D2));

    second.emit_scene_control_event(state_changed(4, RendererSceneState::Ready));
    assert_eq!(scene_control_events(&dispatcher).len(), 1);

    second.emit_renderer_event(RendererEvent::new(RendererEventType::DisplayDestroyed).with_display(D2));
    renderer_events(&dispatcher);

    first.emit_scene_control_event(state_changed(4, RendererSceneState::Available));
    assert_eq!(
        scene_control_events(&dispatcher),
        vec![state_changed(4, RendererSceneState::Available)]
    );
}

#[test]
fn test_injected_events_follow_display_events() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1)]);
    let bundle = registry.bundle(D1);

    dispatcher.inject_renderer_event(RendererEvent::new(RendererEventType::WindowResized));
    dispatcher.inject_scene_control_event(
        RendererEvent::new(RendererEventType::SceneDataLinkFailed).with_scene(SceneId(2)),
    );
    bundle.emit_renderer_event(RendererEvent::new(RendererEventType::DisplayCreated).with_display(D1));
    bundle.emit_scene_control_event(RendererEvent::new(RendererEventType::SceneFlushed));

    assert_eq!(
        event_types(&renderer_events(&dispatcher)),
        vec![RendererEventType::DisplayCreated, RendererEventType::WindowResized]
    );
    assert_eq!(
        event_types(&scene_control_events(&dispatcher)),
        vec![RendererEventType::SceneFlushed, RendererEventType::SceneDataLinkFailed]
    );
    assert!(renderer_events(&dispatcher).is_empty());
    assert!(scene_control_events(&dispatcher).is_empty());
}

// =============================================================================
// UNTHREADED LOOP
// =============================================================================

#[test]
fn test_do_one_loop_sleeps_after_last_display() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1)]);
    let first = registry.bundle(D1);

    dispatcher.do_one_loop(Duration::from_millis(1));
    assert_eq!(
        first.loops(),
        vec![(LoopMode::UpdateAndRender, Duration::from_millis(1))]
    );
    assert_eq!(first.context_enables(), 0);

    dispatch(&dispatcher, vec![create_display(D2)]);
    dispatcher.do_one_loop(Duration::from_millis(1));
    assert_eq!(first.loops()[1], (LoopMode::UpdateAndRender, Duration::ZERO));
    assert_eq!(
        registry.bundle(D2).loops(),
        vec![(LoopMode::UpdateAndRender, Duration::from_millis(1))]
    );
    assert_eq!(first.context_enables(), 1);
    assert_eq!(registry.bundle(D2).context_enables(), 1);
}

#[test]
fn test_context_enabled_after_display_removed() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    let first = registry.bundle(D1);
    registry
        .bundle(D2)
        .emit_renderer_event(RendererEvent::new(RendererEventType::DisplayDestroyed).with_display(D2));
    renderer_events(&dispatcher);

    dispatcher.do_one_loop(Duration::ZERO);
    assert_eq!(first.context_enables(), 1);

    dispatcher.do_one_loop(Duration::ZERO);
    assert_eq!(first.context_enables(), 1);
}

#[test]
fn test_display_internals_reachable_unthreaded() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1)]);
    registry.bundle(D1).set_system_compositor(true);

    assert_eq!(
        dispatcher.with_ec_manager(D1, |manager| manager.stream_buffer_count()),
        Some(0)
    );
    assert_eq!(dispatcher.with_ec_manager(D2, |manager| manager.stream_buffer_count()), None);
    assert_eq!(dispatcher.with_embedded_compositor(D1, |_| ()), None);
    assert!(dispatcher.has_system_compositor_controller());
}

// =============================================================================
// THREADED
// =============================================================================

#[test]
fn test_threaded_display_gets_configured_thread() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatcher.start_display_threads_updating();
    dispatcher.set_loop_mode(LoopMode::UpdateOnly);
    dispatcher.set_min_frame_duration(Duration::from_millis(20), D1);

    dispatch(&dispatcher, vec![create_display(D1)]);
    assert_eq!(dispatcher.threading_mode(), ThreadingMode::Threaded);

    let thread = registry.thread(D1).unwrap();
    {
        let calls = thread.calls.lock();
        assert!(calls.updating);
        assert_eq!(calls.start_calls, 1);
        assert_eq!(calls.loop_mode, Some(LoopMode::UpdateOnly));
        assert_eq!(calls.min_frame_duration, Some(Duration::from_millis(20)));
    }

    dispatcher.stop_display_threads_updating();
    dispatcher.set_loop_mode(LoopMode::UpdateAndRender);
    dispatcher.set_min_frame_duration(Duration::from_millis(5), D1);
    let calls = thread.calls.lock();
    assert!(!calls.updating);
    assert_eq!(calls.stop_calls, 1);
    assert_eq!(calls.loop_mode, Some(LoopMode::UpdateAndRender));
    assert_eq!(calls.min_frame_duration, Some(Duration::from_millis(5)));
}

#[test]
fn test_display_created_while_stopped_stays_parked() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatcher.start_display_threads_updating();
    dispatcher.stop_display_threads_updating();

    dispatch(&dispatcher, vec![create_display(D1)]);
    assert!(!registry.thread(D1).unwrap().calls.lock().updating);

    dispatcher.start_display_threads_updating();
    assert!(registry.thread(D1).unwrap().calls.lock().updating);
    assert!(dispatcher.is_updating());
}

#[test]
fn test_display_config_frame_duration_unless_overridden() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatcher.start_display_threads_updating();
    dispatcher.set_min_frame_duration(Duration::from_millis(40), D2);
    let config = DisplayConfig {
        min_frame_duration_us: Some(25_000),
        ..DisplayConfig::default()
    };

    dispatch(
        &dispatcher,
        vec![
            CreateDisplay {
                display: D1,
                config: config.clone(),
            }
            .into(),
            CreateDisplay { display: D2, config }.into(),
        ],
    );

    assert_eq!(dispatcher.min_frame_duration(D1), Duration::from_millis(25));
    assert_eq!(
        registry.thread(D1).unwrap().calls.lock().min_frame_duration,
        Some(Duration::from_millis(25))
    );
    assert_eq!(dispatcher.min_frame_duration(D2), Duration::from_millis(40));
}

#[test]
fn test_thread_spawn_failure_reports_create_failed() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatcher.start_display_threads_updating();
    registry.fail_thread_spawn.store(true, Ordering::SeqCst);

    dispatch(&dispatcher, vec![create_display(D1)]);

    assert!(dispatcher.displays().is_empty());
    let events = renderer_events(&dispatcher);
    assert_eq!(event_types(&events), vec![RendererEventType::DisplayCreateFailed]);
    assert_eq!(events[0].display_handle, Some(D1));
}

#[test]
fn test_log_info_stamped_threaded() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatcher.start_display_threads_updating();
    dispatch(&dispatcher, vec![create_display(D1)]);
    let bundle = registry.bundle(D1);
    bundle.take_received();

    dispatch(&dispatcher, vec![LogInfo::default().into()]);

    let received = bundle.take_received();
    let RendererCommand::LogInfo(log) = &received[0] else {
        panic!("expected LogInfo, got {:?}", received[0]);
    };
    assert!(log.displays_threaded);
    assert!(log.display_threads_running);
}

#[test]
fn test_stuck_display_check_samples_frame_counters() {
    // 5 frames per second, so a check every 2 dispatch loops
    let config = RendererConfig {
        default_min_frame_duration_us: 200_000,
        watchdog_notification_interval_ms: 1,
        ..RendererConfig::default()
    };
    assert_eq!(config.stuck_display_check_period(), 2);
    let (dispatcher, registry) = mock_dispatcher_with_config(config);
    dispatcher.start_display_threads_updating();

    dispatch(&dispatcher, vec![create_display(D1), create_display(D2)]);
    dispatch(&dispatcher, Vec::new());
    let d1 = registry.thread(D1).unwrap();
    let d2 = registry.thread(D2).unwrap();
    assert_eq!(d1.frame_counter_reads.load(Ordering::SeqCst), 0);
    assert!(dispatcher.potentially_stuck_displays().is_empty());

    std::thread::sleep(Duration::from_millis(5));
    dispatch(&dispatcher, Vec::new());
    assert_eq!(d1.frame_counter_reads.load(Ordering::SeqCst), 1);
    assert_eq!(d2.frame_counter_reads.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.potentially_stuck_displays(), vec![D1, D2]);

    // only D1 makes progress
    d1.frame_counter.store(7, Ordering::SeqCst);
    dispatch(&dispatcher, Vec::new());
    dispatch(&dispatcher, Vec::new());
    std::thread::sleep(Duration::from_millis(5));
    dispatch(&dispatcher, Vec::new());
    assert_eq!(d1.frame_counter_reads.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.potentially_stuck_displays(), vec![D2]);

    // parked threads are not expected to make progress
    dispatcher.stop_display_threads_updating();
    for _ in 0..4 {
        std::thread::sleep(Duration::from_millis(2));
        dispatch(&dispatcher, Vec::new());
    }
    assert_eq!(d1.frame_counter_reads.load(Ordering::SeqCst), 2);
    assert_eq!(d2.frame_counter_reads.load(Ordering::SeqCst), 2);
}

#[test]
fn test_stuck_display_check_waits_for_watchdog_interval() {
    let config = RendererConfig {
        default_min_frame_duration_us: 200_000,
        watchdog_notification_interval_ms: 60_000,
        ..RendererConfig::default()
    };
    let (dispatcher, registry) = mock_dispatcher_with_config(config);
    dispatcher.start_display_threads_updating();

    dispatch(&dispatcher, vec![create_display(D1)]);
    for _ in 0..10 {
        dispatch(&dispatcher, Vec::new());
    }
    assert_eq!(registry.thread(D1).unwrap().frame_counter_reads.load(Ordering::SeqCst), 0);
}

#[test]
fn test_event_drain_resets_dispatch_loop_counter() {
    let config = RendererConfig {
        max_dispatch_loops_without_event_drain: 3,
        ..RendererConfig::default()
    };
    let (dispatcher, _registry) = mock_dispatcher_with_config(config);

    dispatch(&dispatcher, vec![create_display(D1)]);
    dispatch(&dispatcher, Vec::new());
    assert_eq!(dispatcher.loops_since_event_drain(), 2);

    renderer_events(&dispatcher);
    assert_eq!(dispatcher.loops_since_event_drain(), 0);

    dispatch(&dispatcher, Vec::new());
    scene_control_events(&dispatcher);
    assert_eq!(dispatcher.loops_since_event_drain(), 0);

    // warns once past the limit, then counts again from zero
    for _ in 0..3 {
        dispatch(&dispatcher, Vec::new());
    }
    assert_eq!(dispatcher.loops_since_event_drain(), 3);
    dispatch(&dispatcher, Vec::new());
    assert_eq!(dispatcher.loops_since_event_drain(), 0);
}

#[test]
#[should_panic(expected = "created unthreaded")]
fn test_threads_after_unthreaded_displays_removed_panics() {
    let (dispatcher, registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1)]);
    registry
        .bundle(D1)
        .emit_renderer_event(RendererEvent::new(RendererEventType::DisplayDestroyed).with_display(D1));
    renderer_events(&dispatcher);
    assert!(dispatcher.displays().is_empty());

    dispatcher.start_display_threads_updating();
}

#[test]
#[should_panic(expected = "own threads")]
fn test_do_one_loop_panics_when_threaded() {
    let (dispatcher, _registry) = mock_dispatcher();
    dispatcher.start_display_threads_updating();
    dispatcher.do_one_loop(Duration::ZERO);
}

#[test]
#[should_panic(expected = "created unthreaded")]
fn test_threads_after_unthreaded_display_panics() {
    let (dispatcher, _registry) = mock_dispatcher();
    dispatch(&dispatcher, vec![create_display(D1)]);
    dispatcher.start_display_threads_updating();
}

#[test]
#[should_panic(expected = "threaded")]
fn test_display_internals_unreachable_threaded() {
    let (dispatcher, _registry) = mock_dispatcher();
    dispatcher.start_display_threads_updating();
    dispatch(&dispatcher, vec![create_display(D1)]);
    let _ = dispatcher.with_ec_manager(D1, |manager| manager.stream_buffer_count());
}
