//! # Display Thread
//!
//! Drives one [`DisplayBundle`] on a dedicated thread.
//!
//! The thread idles on a condition variable until updating is enabled, then
//! loops at the display's minimum frame duration. Stopping updates parks the
//! thread without destroying it. Dropping the [`DisplayThread`] shuts it down
//! and joins it.

use crate::display_bundle::DisplayBundle;
use crate::error::{RendererError, RendererResult};
use crate::watchdog::ThreadAliveNotifier;
use lumen_shared::{DisplayHandle, LoopMode};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Control surface of a per-display thread.
pub trait DisplayThreadControl: Send {
    /// Starts (or resumes) looping.
    fn start_updating(&self);

    /// Parks the thread after its current iteration.
    fn stop_updating(&self);

    /// Switches between update-only and update-and-render.
    fn set_loop_mode(&self, mode: LoopMode);

    /// Sets the target duration of one loop iteration.
    fn set_min_frame_duration(&self, duration: Duration);

    /// Number of completed loop iterations.
    fn frame_counter(&self) -> u64;
}

#[derive(Debug)]
struct ThreadControl {
    updating: bool,
    shutdown: bool,
    loop_mode: LoopMode,
    min_frame_duration: Duration,
}

struct Shared {
    control: Mutex<ThreadControl>,
    wake: Condvar,
    frame_counter: AtomicU64,
}

/// Owned handle of a running display thread.
pub struct DisplayThread {
    display: DisplayHandle,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl DisplayThread {
    /// Spawns the thread. It stays idle until [`start_updating`] is called.
    ///
    /// [`start_updating`]: DisplayThreadControl::start_updating
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::ThreadSpawn`] if the OS refuses the thread.
    pub fn spawn(
        display: DisplayHandle,
        bundle: Arc<dyn DisplayBundle>,
        min_frame_duration: Duration,
        notifier: Arc<dyn ThreadAliveNotifier>,
        alive_interval: Duration,
    ) -> RendererResult<Self> {
        let shared = Arc::new(Shared {
            control: Mutex::new(ThreadControl {
                updating: false,
                shutdown: false,
                loop_mode: LoopMode::default(),
                min_frame_duration,
            }),
            wake: Condvar::new(),
            frame_counter: AtomicU64::new(0),
        });

        let name = format!("lumen-display-{display}");
        let thread_shared = Arc::clone(&shared);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                Self::run(&thread_name, &*bundle, &thread_shared, &*notifier, alive_interval);
            })
            .map_err(|e| RendererError::ThreadSpawn {
                name,
                reason: e.to_string(),
            })?;

        Ok(Self {
            display,
            shared,
            handle: Some(handle),
        })
    }

    /// Display driven by this thread.
    #[must_use]
    pub const fn display(&self) -> DisplayHandle {
        self.display
    }

    fn run(
        name: &str,
        bundle: &dyn DisplayBundle,
        shared: &Shared,
        notifier: &dyn ThreadAliveNotifier,
        alive_interval: Duration,
    ) {
        tracing::debug!("{} started", name);
        let mut previous_work = Duration::ZERO;

        loop {
            let (loop_mode, min_frame_duration) = {
                let mut control = shared.control.lock();
                while !control.updating && !control.shutdown {
                    shared.wake.wait_for(&mut control, alive_interval);
                    notifier.notify_alive(name);
                }
                if control.shutdown {
                    break;
                }
                (control.loop_mode, control.min_frame_duration)
            };

            let sleep_time = min_frame_duration.saturating_sub(previous_work);
            let start = Instant::now();
            bundle.do_one_loop(loop_mode, sleep_time);
            previous_work = start.elapsed().saturating_sub(sleep_time);

            shared.frame_counter.fetch_add(1, Ordering::Relaxed);
            notifier.notify_alive(name);
        }

        tracing::debug!("{} stopped", name);
    }

    fn update_control(&self, f: impl FnOnce(&mut ThreadControl)) {
        let mut control = self.shared.control.lock();
        f(&mut control);
        self.shared.wake.notify_all();
    }
}

impl DisplayThreadControl for DisplayThread {
    fn start_updating(&self) {
        self.update_control(|control| control.updating = true);
    }

    fn stop_updating(&self) {
        self.update_control(|control| control.updating = false);
    }

    fn set_loop_mode(&self, mode: LoopMode) {
        self.update_control(|control| control.loop_mode = mode);
    }

    fn set_min_frame_duration(&self, duration: Duration) {
        self.update_control(|control| control.min_frame_duration = duration);
    }

    fn frame_counter(&self) -> u64 {
        self.shared.frame_counter.load(Ordering::Relaxed)
    }
}

impl Drop for DisplayThread {
    fn drop(&mut self) {
        self.update_control(|control| control.shutdown = true);

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("display thread {} panicked", self.display);
            }
        }
    }
}
