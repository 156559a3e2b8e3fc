//! Recording doubles for dispatcher tests.

#![allow(dead_code)]

use lumen_renderer::{
    DisplayBundle, DisplayDispatcher, DisplayFactory, DisplayThreadControl,
    EmbeddedCompositingManager, EmbeddedCompositor, RendererConfig, RendererError, RendererResult,
};
use lumen_shared::{
    DisplayConfig, DisplayHandle, LoopMode, RendererCommand, RendererCommandKind, RendererEvent,
    SceneId,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// BUNDLE
// =============================================================================

/// Display bundle recording everything the dispatcher does to it.
#[derive(Default)]
pub struct MockBundle {
    received: Mutex<Vec<RendererCommand>>,
    push_calls: AtomicUsize,
    renderer_events: Mutex<Vec<RendererEvent>>,
    scene_control_events: Mutex<Vec<RendererEvent>>,
    master_scenes: Mutex<HashMap<SceneId, SceneId>>,
    loops: Mutex<Vec<(LoopMode, Duration)>>,
    context_enables: AtomicUsize,
    system_compositor: AtomicBool,
    ec_manager: Mutex<EmbeddedCompositingManager>,
    trace: AtomicU32,
}

impl MockBundle {
    /// Kinds of all commands received so far, in order.
    pub fn received_kinds(&self) -> Vec<RendererCommandKind> {
        self.received.lock().iter().map(RendererCommand::kind).collect()
    }

    /// Removes and returns all commands received so far.
    pub fn take_received(&self) -> Vec<RendererCommand> {
        std::mem::take(&mut *self.received.lock())
    }

    /// Number of non-empty pushes.
    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn emit_renderer_event(&self, event: RendererEvent) {
        self.renderer_events.lock().push(event);
    }

    pub fn emit_scene_control_event(&self, event: RendererEvent) {
        self.scene_control_events.lock().push(event);
    }

    pub fn set_master_scene(&self, referenced: SceneId, master: SceneId) {
        self.master_scenes.lock().insert(referenced, master);
    }

    pub fn set_system_compositor(&self, present: bool) {
        self.system_compositor.store(present, Ordering::SeqCst);
    }

    pub fn loops(&self) -> Vec<(LoopMode, Duration)> {
        self.loops.lock().clone()
    }

    pub fn context_enables(&self) -> usize {
        self.context_enables.load(Ordering::SeqCst)
    }
}

impl DisplayBundle for MockBundle {
    fn push_and_consume_commands(&self, cmds: &mut Vec<RendererCommand>) {
        if !cmds.is_empty() {
            self.push_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.received.lock().append(cmds);
    }

    fn dispatch_renderer_events(&self, out: &mut Vec<RendererEvent>) {
        out.append(&mut self.renderer_events.lock());
    }

    fn dispatch_scene_control_events(&self, out: &mut Vec<RendererEvent>) {
        out.append(&mut self.scene_control_events.lock());
    }

    fn do_one_loop(&self, loop_mode: LoopMode, sleep_time: Duration) {
        self.loops.lock().push((loop_mode, sleep_time));
    }

    fn enable_context(&self) {
        self.context_enables.fetch_add(1, Ordering::SeqCst);
    }

    fn find_master_scene_for_referenced_scene(&self, scene: SceneId) -> Option<SceneId> {
        self.master_scenes.lock().get(&scene).copied()
    }

    fn with_ec_manager(&self, f: &mut dyn FnMut(&mut EmbeddedCompositingManager)) {
        f(&mut self.ec_manager.lock());
    }

    fn with_embedded_compositor(&self, _f: &mut dyn FnMut(&mut dyn EmbeddedCompositor)) -> bool {
        false
    }

    fn has_system_compositor_controller(&self) -> bool {
        self.system_compositor.load(Ordering::SeqCst)
    }

    fn trace_id(&self) -> u32 {
        self.trace.load(Ordering::SeqCst)
    }
}

// =============================================================================
// THREAD
// =============================================================================

/// Calls made on a display thread.
#[derive(Debug, Default)]
pub struct ThreadCalls {
    pub updating: bool,
    pub start_calls: usize,
    pub stop_calls: usize,
    pub loop_mode: Option<LoopMode>,
    pub min_frame_duration: Option<Duration>,
}

/// Shared state of a mock display thread.
#[derive(Default)]
pub struct MockThreadState {
    pub calls: Mutex<ThreadCalls>,
    pub frame_counter: AtomicU64,
    /// Times the dispatcher sampled `frame_counter`.
    pub frame_counter_reads: AtomicUsize,
}

struct MockThread(Arc<MockThreadState>);

impl DisplayThreadControl for MockThread {
    fn start_updating(&self) {
        let mut calls = self.0.calls.lock();
        calls.updating = true;
        calls.start_calls += 1;
    }

    fn stop_updating(&self) {
        let mut calls = self.0.calls.lock();
        calls.updating = false;
        calls.stop_calls += 1;
    }

    fn set_loop_mode(&self, mode: LoopMode) {
        self.0.calls.lock().loop_mode = Some(mode);
    }

    fn set_min_frame_duration(&self, duration: Duration) {
        self.0.calls.lock().min_frame_duration = Some(duration);
    }

    fn frame_counter(&self) -> u64 {
        self.0.frame_counter_reads.fetch_add(1, Ordering::SeqCst);
        self.0.frame_counter.load(Ordering::SeqCst)
    }
}

// =============================================================================
// FACTORY
// =============================================================================

/// Every bundle and thread a [`MockFactory`] created, by display.
#[derive(Default)]
pub struct MockRegistry {
    bundles: Mutex<BTreeMap<DisplayHandle, Arc<MockBundle>>>,
    threads: Mutex<BTreeMap<DisplayHandle, Arc<MockThreadState>>>,
    pub fail_thread_spawn: AtomicBool,
}

impl MockRegistry {
    /// Latest bundle created for `display`.
    pub fn bundle(&self, display: DisplayHandle) -> Arc<MockBundle> {
        Arc::clone(
            self.bundles
                .lock()
                .get(&display)
                .unwrap_or_else(|| panic!("no bundle created for display {display}")),
        )
    }

    /// Latest thread created for `display`.
    pub fn thread(&self, display: DisplayHandle) -> Option<Arc<MockThreadState>> {
        self.threads.lock().get(&display).cloned()
    }

    pub fn bundles_created(&self) -> usize {
        self.bundles.lock().len()
    }
}

pub struct MockFactory {
    registry: Arc<MockRegistry>,
}

impl DisplayFactory for MockFactory {
    fn create_display_bundle(
        &self,
        display: DisplayHandle,
        _display_config: &DisplayConfig,
        _renderer_config: &RendererConfig,
    ) -> Arc<dyn DisplayBundle> {
        let bundle = Arc::new(MockBundle::default());
        self.registry.bundles.lock().insert(display, Arc::clone(&bundle));
        bundle
    }

    fn create_display_thread(
        &self,
        display: DisplayHandle,
        _bundle: Arc<dyn DisplayBundle>,
        _min_frame_duration: Duration,
        _renderer_config: &RendererConfig,
    ) -> RendererResult<Box<dyn DisplayThreadControl>> {
        if self.registry.fail_thread_spawn.load(Ordering::SeqCst) {
            return Err(RendererError::ThreadSpawn {
                name: format!("lumen-display-{display}"),
                reason: "refused by test".to_owned(),
            });
        }
        let state = Arc::new(MockThreadState::default());
        self.registry.threads.lock().insert(display, Arc::clone(&state));
        Ok(Box::new(MockThread(state)))
    }
}

pub fn mock_factory() -> (MockFactory, Arc<MockRegistry>) {
    let registry = Arc::new(MockRegistry::default());
    let factory = MockFactory {
        registry: Arc::clone(&registry),
    };
    (factory, registry)
}

/// Dispatcher on a recording factory.
pub fn mock_dispatcher() -> (DisplayDispatcher, Arc<MockRegistry>) {
    mock_dispatcher_with_config(RendererConfig::default())
}

pub fn mock_dispatcher_with_config(config: RendererConfig) -> (DisplayDispatcher, Arc<MockRegistry>) {
    let (factory, registry) = mock_factory();
    (DisplayDispatcher::new(config, Box::new(factory)), registry)
}

// =============================================================================
// HELPERS
// =============================================================================

/// Dispatches `cmds` as one batch.
pub fn dispatch(dispatcher: &DisplayDispatcher, cmds: Vec<RendererCommand>) {
    let mut cmds = cmds;
    dispatcher.dispatch_commands(&mut cmds);
    assert!(cmds.is_empty());
}

pub fn renderer_events(dispatcher: &DisplayDispatcher) -> Vec<RendererEvent> {
    let mut events = Vec::new();
    dispatcher.dispatch_renderer_events(&mut events);
    events
}

pub fn scene_control_events(dispatcher: &DisplayDispatcher) -> Vec<RendererEvent> {
    let mut events = Vec::new();
    dispatcher.dispatch_scene_control_events(&mut events);
    events
}

/// Polls `condition` for up to five seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
