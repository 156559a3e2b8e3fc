//! # Command Dispatching Thread
//!
//! Producer side of threaded mode: waits on the [`RendererCommandBuffer`],
//! hands every drained batch to the [`DisplayDispatcher`] and sends a
//! heartbeat at least once per notification interval.

use crate::command_buffer::RendererCommandBuffer;
use crate::display_dispatcher::DisplayDispatcher;
use crate::error::{RendererError, RendererResult};
use crate::watchdog::ThreadAliveNotifier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Name of the dispatching thread, also its watchdog identity.
pub const COMMAND_DISPATCHING_THREAD_NAME: &str = "lumen-dispatch";

/// Thread draining the command buffer into the dispatcher.
pub struct CommandDispatchingThread {
    shutdown: Arc<AtomicBool>,
    buffer: Arc<RendererCommandBuffer>,
    handle: Option<JoinHandle<()>>,
}

impl CommandDispatchingThread {
    /// Spawns the thread.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::ThreadSpawn`] if the OS refuses the thread.
    pub fn spawn(
        dispatcher: Arc<DisplayDispatcher>,
        buffer: Arc<RendererCommandBuffer>,
        notifier: Arc<dyn ThreadAliveNotifier>,
        alive_interval: Duration,
    ) -> RendererResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_buffer = Arc::clone(&buffer);
        let handle = thread::Builder::new()
            .name(COMMAND_DISPATCHING_THREAD_NAME.to_owned())
            .spawn(move || {
                Self::dispatch_loop(
                    &dispatcher,
                    &thread_buffer,
                    &*notifier,
                    &thread_shutdown,
                    alive_interval,
                );
            })
            .map_err(|e| RendererError::ThreadSpawn {
                name: COMMAND_DISPATCHING_THREAD_NAME.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            shutdown,
            buffer,
            handle: Some(handle),
        })
    }

    fn dispatch_loop(
        dispatcher: &DisplayDispatcher,
        buffer: &RendererCommandBuffer,
        notifier: &dyn ThreadAliveNotifier,
        shutdown: &AtomicBool,
        alive_interval: Duration,
    ) {
        tracing::debug!("{} started", COMMAND_DISPATCHING_THREAD_NAME);
        let mut cmds = Vec::new();

        while !shutdown.load(Ordering::Acquire) {
            buffer.wait_for_commands(alive_interval, &mut cmds);
            notifier.notify_alive(COMMAND_DISPATCHING_THREAD_NAME);

            if !cmds.is_empty() {
                dispatcher.dispatch_commands(&mut cmds);
            }
        }

        tracing::debug!("{} stopped", COMMAND_DISPATCHING_THREAD_NAME);
    }

    /// Whether the thread has not been stopped yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Acquire)
    }

    /// Stops the thread and waits for it. Commands still in the buffer stay
    /// there.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.buffer.wake_up();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("{} panicked", COMMAND_DISPATCHING_THREAD_NAME);
            }
        }
    }
}

impl Drop for CommandDispatchingThread {
    fn drop(&mut self) {
        self.stop();
    }
}
