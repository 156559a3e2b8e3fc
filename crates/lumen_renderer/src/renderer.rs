//! # Renderer
//!
//! Owner of the command buffer, the dispatcher and the dispatching thread.
//!
//! A renderer is driven in exactly one of two ways for its whole lifetime:
//!
//! - `do_one_loop` from the caller's thread, once per frame
//! - `start_thread`, after which displays run on their own threads and a
//!   dispatching thread feeds them
//!
//! ```rust,ignore
//! use lumen_renderer::{NullSceneEventSender, Renderer, RendererConfig};
//! use lumen_shared::{commands::CreateDisplay, DisplayConfig, DisplayHandle};
//!
//! let mut renderer = Renderer::headless(RendererConfig::default(), Arc::new(NullSceneEventSender))?;
//! renderer.enqueue(CreateDisplay { display: DisplayHandle(1), config: DisplayConfig::default() });
//! renderer.do_one_loop()?;
//! ```

use crate::command_buffer::RendererCommandBuffer;
use crate::command_dispatching_thread::CommandDispatchingThread;
use crate::config::RendererConfig;
use crate::display_bundle::SceneEventSender;
use crate::display_dispatcher::DisplayDispatcher;
use crate::display_factory::{DisplayFactory, PlatformDisplayFactory};
use crate::error::{RendererError, RendererResult};
use crate::platform::HeadlessPlatformFactory;
use crate::watchdog::{ThreadAliveNotifier, ThreadWatchdog};
use lumen_shared::constants::MAX_FRAMERATE;
use lumen_shared::{DisplayHandle, LoopMode, RendererCommand, RendererEvent};
use std::sync::Arc;
use std::time::Duration;

/// How the renderer loop is driven.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopThreadType {
    /// Neither `do_one_loop` nor `start_thread` called yet.
    #[default]
    Undefined,
    /// Driven by the caller through `do_one_loop`.
    UsingDoOneLoop,
    /// Driven by renderer-owned threads.
    InRendererOwnThread,
}

/// Renderer facade.
pub struct Renderer {
    command_buffer: Arc<RendererCommandBuffer>,
    dispatcher: Arc<DisplayDispatcher>,
    watchdog: Arc<ThreadWatchdog>,
    dispatching_thread: Option<CommandDispatchingThread>,
    loop_thread_type: LoopThreadType,
    threads_updating: bool,
    loop_mode: LoopMode,
    scratch: Vec<RendererCommand>,
}

impl Renderer {
    /// Creates a renderer on a display factory.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::InvalidConfig`] for an invalid config.
    pub fn new(
        config: RendererConfig,
        factory: Box<dyn DisplayFactory>,
        watchdog: Arc<ThreadWatchdog>,
    ) -> RendererResult<Self> {
        config.validate()?;
        tracing::info!("renderer created: {:?}", config);
        Ok(Self {
            command_buffer: Arc::new(RendererCommandBuffer::new()),
            dispatcher: Arc::new(DisplayDispatcher::new(config, factory)),
            watchdog,
            dispatching_thread: None,
            loop_thread_type: LoopThreadType::Undefined,
            threads_updating: false,
            loop_mode: LoopMode::default(),
            scratch: Vec::new(),
        })
    }

    /// Creates a renderer whose displays render into memory.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::InvalidConfig`] for an invalid config.
    pub fn headless(
        config: RendererConfig,
        scene_event_sender: Arc<dyn SceneEventSender>,
    ) -> RendererResult<Self> {
        let watchdog = Arc::new(ThreadWatchdog::new());
        let factory = PlatformDisplayFactory::new(
            Arc::new(HeadlessPlatformFactory),
            scene_event_sender,
            Arc::clone(&watchdog) as Arc<dyn ThreadAliveNotifier>,
        );
        Self::new(config, Box::new(factory), watchdog)
    }

    /// Buffer any thread may enqueue commands into.
    #[must_use]
    pub const fn command_buffer(&self) -> &Arc<RendererCommandBuffer> {
        &self.command_buffer
    }

    /// Enqueues one command.
    pub fn enqueue(&self, cmd: impl Into<RendererCommand>) {
        self.command_buffer.enqueue_command(cmd);
    }

    /// Dispatches pending commands and runs one step of every display.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::LoopModeConflict`] once `start_thread` was
    /// called.
    pub fn do_one_loop(&mut self) -> RendererResult<()> {
        if self.loop_thread_type == LoopThreadType::InRendererOwnThread {
            return Err(RendererError::LoopModeConflict("by its own threads"));
        }
        self.loop_thread_type = LoopThreadType::UsingDoOneLoop;

        self.command_buffer.swap_commands(&mut self.scratch);
        self.dispatcher.dispatch_commands(&mut self.scratch);
        self.dispatcher.do_one_loop(Duration::ZERO);
        Ok(())
    }

    /// Starts display threads and, the first time, the dispatching thread.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::LoopModeConflict`] after `do_one_loop` was
    /// used, or [`RendererError::ThreadSpawn`].
    pub fn start_thread(&mut self) -> RendererResult<()> {
        if self.loop_thread_type == LoopThreadType::UsingDoOneLoop {
            return Err(RendererError::LoopModeConflict("by do_one_loop"));
        }

        // threaded mode must be set before queued CreateDisplay commands are dispatched
        self.dispatcher.start_display_threads_updating();
        self.threads_updating = true;

        if self.dispatching_thread.is_none() {
            let interval = self.dispatcher.renderer_config().watchdog_notification_interval();
            self.dispatching_thread = Some(CommandDispatchingThread::spawn(
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.command_buffer),
                Arc::clone(&self.watchdog) as Arc<dyn ThreadAliveNotifier>,
                interval,
            )?);
        }
        self.loop_thread_type = LoopThreadType::InRendererOwnThread;
        Ok(())
    }

    /// Parks display threads. Commands keep being dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::LoopModeConflict`] if `start_thread` was
    /// never called.
    pub fn stop_thread(&mut self) -> RendererResult<()> {
        if self.loop_thread_type != LoopThreadType::InRendererOwnThread {
            return Err(RendererError::LoopModeConflict("by the caller, not by threads"));
        }
        self.dispatcher.stop_display_threads_updating();
        self.threads_updating = false;
        Ok(())
    }

    /// Whether display threads are looping.
    #[must_use]
    pub const fn is_thread_running(&self) -> bool {
        self.threads_updating
    }

    /// How the renderer is driven.
    #[must_use]
    pub const fn loop_thread_type(&self) -> LoopThreadType {
        self.loop_thread_type
    }

    /// Sets the loop mode of all displays.
    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        self.dispatcher.set_loop_mode(mode);
    }

    /// Current loop mode.
    #[must_use]
    pub const fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Limits the framerate of a display thread.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::InvalidFramerate`] outside
    /// `(0, MAX_FRAMERATE]`, or [`RendererError::LoopModeConflict`] when the
    /// caller drives the loop.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_framerate_limit(&self, display: DisplayHandle, fps: f32) -> RendererResult<()> {
        if !(fps > 0.0 && fps <= MAX_FRAMERATE) {
            return Err(RendererError::InvalidFramerate(format!("{fps} fps")));
        }
        if self.loop_thread_type == LoopThreadType::UsingDoOneLoop {
            return Err(RendererError::LoopModeConflict("by do_one_loop, framerate is up to the caller"));
        }

        let micros = (1_000_000.0 / f64::from(fps)).round() as u64;
        let duration = Duration::from_micros(micros);
        self.dispatcher.set_min_frame_duration(duration, display);
        Ok(())
    }

    /// Framerate limit of a display thread.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn framerate_limit(&self, display: DisplayHandle) -> f32 {
        let micros = self.dispatcher.min_frame_duration(display).as_micros().max(1);
        1_000_000.0 / micros as f32
    }

    /// Appends renderer events.
    pub fn dispatch_renderer_events(&self, events: &mut Vec<RendererEvent>) {
        self.dispatcher.dispatch_renderer_events(events);
    }

    /// Appends scene control events.
    pub fn dispatch_scene_control_events(&self, events: &mut Vec<RendererEvent>) {
        self.dispatcher.dispatch_scene_control_events(events);
    }

    /// Underlying dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<DisplayDispatcher> {
        &self.dispatcher
    }

    /// Heartbeats of renderer threads.
    #[must_use]
    pub const fn watchdog(&self) -> &Arc<ThreadWatchdog> {
        &self.watchdog
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // stop feeding displays before they are torn down with the dispatcher
        if let Some(mut thread) = self.dispatching_thread.take() {
            thread.stop();
        }
    }
}
