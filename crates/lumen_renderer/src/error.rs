//! # Renderer Error Types
//!
//! Errors at the configuration and thread-management boundary.
//!
//! Command routing never produces these: a command that cannot be routed
//! becomes a failure [`RendererEvent`](lumen_shared::RendererEvent) instead.

use thiserror::Error;

/// Errors that can occur while configuring or driving the renderer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendererError {
    /// Invalid configuration value or file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("cannot read configuration {path}: {reason}")]
    ConfigIo {
        /// File that was read.
        path: String,
        /// OS error text.
        reason: String,
    },

    /// A renderer-owned thread could not be spawned.
    #[error("failed to spawn thread {name}: {reason}")]
    ThreadSpawn {
        /// Thread name.
        name: String,
        /// OS error text.
        reason: String,
    },

    /// Framerate limit outside `(0, MAX_FRAMERATE]`.
    #[error("invalid framerate limit: {0}")]
    InvalidFramerate(String),

    /// The renderer was driven both by `do_one_loop` and by its own thread.
    #[error("renderer loop is already driven {0}")]
    LoopModeConflict(&'static str),

    /// Platform for a display could not be created.
    #[error("platform creation failed: {0}")]
    PlatformCreation(String),
}

/// Result type for renderer operations.
pub type RendererResult<T> = Result<T, RendererError>;
