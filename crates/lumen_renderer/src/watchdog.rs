//! Thread liveness reporting.
//!
//! Long-running renderer threads call [`ThreadAliveNotifier::notify_alive`]
//! at least once per notification interval, including while idle.
//! [`ThreadWatchdog`] records the heartbeats and reports threads whose last
//! heartbeat is older than a given age.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Receives heartbeats from renderer threads.
pub trait ThreadAliveNotifier: Send + Sync {
    /// Reports that the named thread is still making progress.
    fn notify_alive(&self, thread: &str);
}

/// Notifier that discards heartbeats.
#[derive(Debug, Default)]
pub struct NullAliveNotifier;

impl ThreadAliveNotifier for NullAliveNotifier {
    fn notify_alive(&self, _thread: &str) {}
}

/// Heartbeat book of all renderer threads.
#[derive(Debug, Default)]
pub struct ThreadWatchdog {
    heartbeats: Mutex<HashMap<String, (Instant, u64)>>,
}

impl ThreadWatchdog {
    /// Creates an empty watchdog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the last heartbeat from `thread`.
    #[must_use]
    pub fn last_heartbeat(&self, thread: &str) -> Option<Instant> {
        self.heartbeats.lock().get(thread).map(|(at, _)| *at)
    }

    /// Number of heartbeats received from `thread`.
    #[must_use]
    pub fn heartbeat_count(&self, thread: &str) -> u64 {
        self.heartbeats.lock().get(thread).map_or(0, |(_, count)| *count)
    }

    /// Threads whose last heartbeat is older than `max_age`, sorted by name.
    #[must_use]
    pub fn stale_threads(&self, max_age: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut stale: Vec<String> = self
            .heartbeats
            .lock()
            .iter()
            .filter(|(_, (at, _))| now.duration_since(*at) > max_age)
            .map(|(name, _)| name.clone())
            .collect();
        stale.sort();
        stale
    }

    /// Forgets a thread that exited.
    pub fn unregister(&self, thread: &str) {
        self.heartbeats.lock().remove(thread);
    }
}

impl ThreadAliveNotifier for ThreadWatchdog {
    fn notify_alive(&self, thread: &str) {
        let mut heartbeats = self.heartbeats.lock();
        match heartbeats.get_mut(thread) {
            Some((at, count)) => {
                *at = Instant::now();
                *count += 1;
            }
            None => {
                tracing::trace!("watchdog: first heartbeat from {}", thread);
                heartbeats.insert(thread.to_owned(), (Instant::now(), 1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeats_are_counted() {
        let watchdog = ThreadWatchdog::new();
        assert!(watchdog.last_heartbeat("a").is_none());

        watchdog.notify_alive("a");
        watchdog.notify_alive("a");
        assert_eq!(watchdog.heartbeat_count("a"), 2);
        assert!(watchdog.last_heartbeat("a").is_some());
    }

    #[test]
    fn test_stale_threads() {
        let watchdog = ThreadWatchdog::new();
        watchdog.notify_alive("b");
        watchdog.notify_alive("a");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(watchdog.stale_threads(Duration::from_millis(1)), vec!["a", "b"]);
        assert!(watchdog.stale_threads(Duration::from_secs(60)).is_empty());

        watchdog.unregister("a");
        assert_eq!(watchdog.stale_threads(Duration::from_millis(1)), vec!["b"]);
    }
}
