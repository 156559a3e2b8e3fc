//! # Lumen Renderer
//!
//! Command dispatch and per-display execution for the Lumen renderer.
//!
//! ## Design Principles
//!
//! 1. **Routing never blocks** - the dispatcher only enqueues into display queues
//! 2. **Failures are events** - a command that cannot reach its display yields a failure event
//! 3. **Late displays catch up** - broadcast history is replayed to every new display
//! 4. **One owner per scene** - scene state events are reported once, by the owning display
//!
//! ## Thread Model
//!
//! ```text
//!   any thread ──> RendererCommandBuffer ──> CommandDispatchingThread
//!                                                   │
//!                                           DisplayDispatcher
//!                                          ┌────────┼────────┐
//!                                     DisplayThread  ...  DisplayThread
//!                                     DisplayBundle       DisplayBundle
//! ```
//!
//! Without threads, the caller drives everything through
//! [`Renderer::do_one_loop`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use lumen_renderer::{NullSceneEventSender, Renderer, RendererConfig};
//!
//! let mut renderer = Renderer::headless(RendererConfig::default(), Arc::new(NullSceneEventSender))?;
//! renderer.start_thread()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod command_buffer;
pub mod command_dispatching_thread;
pub mod command_utils;
pub mod config;
pub mod display_bundle;
pub mod display_dispatcher;
pub mod display_factory;
pub mod display_thread;
pub mod embedded_compositing;
pub mod error;
pub mod platform;
pub mod renderer;
pub mod scene_display_tracker;
pub mod watchdog;

pub use command_buffer::RendererCommandBuffer;
pub use command_dispatching_thread::CommandDispatchingThread;
pub use command_utils::{StashPolicy, StashSlot};
pub use config::RendererConfig;
pub use display_bundle::{DisplayBundle, NullSceneEventSender, PlatformDisplayBundle, SceneEventSender};
pub use display_dispatcher::{DisplayDispatcher, ThreadingMode};
pub use display_factory::{DisplayFactory, PlatformDisplayFactory};
pub use display_thread::{DisplayThread, DisplayThreadControl};
pub use embedded_compositing::EmbeddedCompositingManager;
pub use error::{RendererError, RendererResult};
pub use platform::{
    EmbeddedCompositor, HeadlessPlatform, HeadlessPlatformFactory, Platform, PlatformFactory,
    SystemCompositorController,
};
pub use renderer::{LoopThreadType, Renderer};
pub use scene_display_tracker::SceneDisplayTracker;
pub use watchdog::{NullAliveNotifier, ThreadAliveNotifier, ThreadWatchdog};
