//! Creation of per-display execution units.

use crate::config::RendererConfig;
use crate::display_bundle::{DisplayBundle, PlatformDisplayBundle, SceneEventSender};
use crate::display_thread::{DisplayThread, DisplayThreadControl};
use crate::error::RendererResult;
use crate::platform::PlatformFactory;
use crate::watchdog::ThreadAliveNotifier;
use lumen_shared::{DisplayConfig, DisplayHandle};
use std::sync::Arc;
use std::time::Duration;

/// Creates display bundles and, in threaded mode, their threads.
///
/// The dispatcher owns one factory for its lifetime. Tests replace it with a
/// recording implementation.
pub trait DisplayFactory: Send + Sync {
    /// Creates the execution unit of a new display.
    fn create_display_bundle(
        &self,
        display: DisplayHandle,
        display_config: &DisplayConfig,
        renderer_config: &RendererConfig,
    ) -> Arc<dyn DisplayBundle>;

    /// Spawns the thread driving `bundle`. The thread starts idle.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    fn create_display_thread(
        &self,
        display: DisplayHandle,
        bundle: Arc<dyn DisplayBundle>,
        min_frame_duration: Duration,
        renderer_config: &RendererConfig,
    ) -> RendererResult<Box<dyn DisplayThreadControl>>;
}

/// Factory producing [`PlatformDisplayBundle`]s on a [`PlatformFactory`].
pub struct PlatformDisplayFactory {
    platform_factory: Arc<dyn PlatformFactory>,
    scene_event_sender: Arc<dyn SceneEventSender>,
    notifier: Arc<dyn ThreadAliveNotifier>,
}

impl PlatformDisplayFactory {
    /// Creates a factory. Display threads report liveness to `notifier`.
    #[must_use]
    pub fn new(
        platform_factory: Arc<dyn PlatformFactory>,
        scene_event_sender: Arc<dyn SceneEventSender>,
        notifier: Arc<dyn ThreadAliveNotifier>,
    ) -> Self {
        Self {
            platform_factory,
            scene_event_sender,
            notifier,
        }
    }
}

impl DisplayFactory for PlatformDisplayFactory {
    fn create_display_bundle(
        &self,
        display: DisplayHandle,
        display_config: &DisplayConfig,
        renderer_config: &RendererConfig,
    ) -> Arc<dyn DisplayBundle> {
        Arc::new(PlatformDisplayBundle::new(
            display,
            display_config.clone(),
            renderer_config.clone(),
            Arc::clone(&self.platform_factory),
            Arc::clone(&self.scene_event_sender),
        ))
    }

    fn create_display_thread(
        &self,
        display: DisplayHandle,
        bundle: Arc<dyn DisplayBundle>,
        min_frame_duration: Duration,
        renderer_config: &RendererConfig,
    ) -> RendererResult<Box<dyn DisplayThreadControl>> {
        let thread = DisplayThread::spawn(
            display,
            bundle,
            min_frame_duration,
            Arc::clone(&self.notifier),
            renderer_config.watchdog_notification_interval(),
        )?;
        Ok(Box::new(thread))
    }
}
