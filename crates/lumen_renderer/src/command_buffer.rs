//! # Renderer Command Buffer
//!
//! Thread-safe inbox of the renderer. Any thread enqueues; the command
//! dispatching thread (or `do_one_loop`) swaps the whole content out.
//!
//! ```text
//!   client API ─────┐
//!   scene protocol ─┼──> [RendererCommandBuffer] ──> dispatching thread ──> dispatcher
//!   renderer API ───┘      (mutex + condvar)
//! ```

use lumen_shared::RendererCommand;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Pending commands plus a wake-up flag.
#[derive(Debug, Default)]
struct Inbox {
    commands: Vec<RendererCommand>,
    wake_requested: bool,
}

/// Mutex-guarded command list with a condition variable for the consumer.
#[derive(Debug, Default)]
pub struct RendererCommandBuffer {
    inbox: Mutex<Inbox>,
    not_empty: Condvar,
}

impl RendererCommandBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one command and wakes the consumer.
    pub fn enqueue_command(&self, cmd: impl Into<RendererCommand>) {
        let mut inbox = self.inbox.lock();
        inbox.commands.push(cmd.into());
        self.not_empty.notify_one();
    }

    /// Appends commands in order and wakes the consumer.
    pub fn enqueue_commands(&self, cmds: impl IntoIterator<Item = RendererCommand>) {
        let mut inbox = self.inbox.lock();
        inbox.commands.extend(cmds);
        if !inbox.commands.is_empty() {
            self.not_empty.notify_one();
        }
    }

    /// Moves every pending command into `out`, in enqueue order.
    ///
    /// `out` is appended to, not cleared.
    pub fn swap_commands(&self, out: &mut Vec<RendererCommand>) {
        let mut inbox = self.inbox.lock();
        if out.is_empty() {
            std::mem::swap(&mut inbox.commands, out);
        } else {
            out.append(&mut inbox.commands);
        }
    }

    /// Blocks until commands arrive, [`wake_up`](Self::wake_up) is called or
    /// `timeout` expires, then moves pending commands into `out`.
    ///
    /// Returns `true` when the wait ended early (commands or wake-up).
    pub fn wait_for_commands(&self, timeout: Duration, out: &mut Vec<RendererCommand>) -> bool {
        let mut inbox = self.inbox.lock();
        if inbox.commands.is_empty() && !inbox.wake_requested {
            self.not_empty.wait_for(&mut inbox, timeout);
        }
        let woke = !inbox.commands.is_empty() || inbox.wake_requested;
        inbox.wake_requested = false;
        out.append(&mut inbox.commands);
        woke
    }

    /// Interrupts a pending [`wait_for_commands`](Self::wait_for_commands).
    pub fn wake_up(&self) {
        let mut inbox = self.inbox.lock();
        inbox.wake_requested = true;
        self.not_empty.notify_all();
    }

    /// Number of pending commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inbox.lock().commands.len()
    }

    /// Whether no command is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inbox.lock().commands.is_empty()
    }
}
