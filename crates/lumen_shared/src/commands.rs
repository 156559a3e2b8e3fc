//! # Renderer Commands
//!
//! The closed set of operations a scene producer can ask the renderer to
//! perform. Every variant wraps a payload struct of the same name, so
//! routing code can match exhaustively and the compiler flags every match
//! that needs updating when a command is added.
//!
//! ```text
//!   producer ──> RendererCommand ──> command buffer ──> dispatcher ──> display(s)
//! ```
//!
//! Commands are moved, not shared. Broadcasting one to several displays
//! duplicates it with [`RendererCommand::copy`], which is only legal for
//! copyable kinds (everything except `UpdateScene`).

use crate::display_config::DisplayConfig;
use crate::ids::{
    DataConsumerId, DataProviderId, DisplayHandle, ExternalBufferHandle, OffscreenBufferHandle,
    SceneId, StreamBufferHandle, WaylandIviLayerId, WaylandIviSurfaceId,
};
use crate::math::{Rect, Vec4};
use crate::scene::{PublicationMode, RendererSceneState, SceneInfo, SceneUpdate, StreamSource};
use std::fmt;
use std::time::Duration;

// =============================================================================
// AUXILIARY TYPES
// =============================================================================

/// What a display loop does each iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LoopMode {
    /// Apply scene updates and render.
    #[default]
    UpdateAndRender,
    /// Apply scene updates only; nothing is drawn.
    UpdateOnly,
}

/// Buffer aspects cleared at the start of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClearFlags(pub u32);

impl ClearFlags {
    /// Clear nothing.
    pub const NONE: Self = Self(0);
    /// Clear color.
    pub const COLOR: Self = Self(1);
    /// Clear depth.
    pub const DEPTH: Self = Self(1 << 1);
    /// Clear stencil.
    pub const STENCIL: Self = Self(1 << 2);
    /// Clear everything.
    pub const ALL: Self = Self(0b111);

    /// Whether every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for ClearFlags {
    fn default() -> Self {
        Self::ALL
    }
}

/// Subject of a `LogInfo` request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LogTopic {
    /// Displays and their threads
    Displays,
    /// Scene states per display
    SceneStates,
    /// Offscreen, stream and external buffers
    Buffers,
    /// Data links
    Links,
    /// Embedded compositor surfaces
    EmbeddedCompositor,
    /// Everything above
    #[default]
    All,
}

/// Operation on the platform system compositor.
#[derive(Clone, Debug, PartialEq)]
pub enum SystemCompositorOp {
    /// Show or hide an IVI surface.
    SetIviSurfaceVisibility {
        /// Surface
        surface: WaylandIviSurfaceId,
        /// Visible
        visible: bool,
    },
    /// Change an IVI surface opacity.
    SetIviSurfaceOpacity {
        /// Surface
        surface: WaylandIviSurfaceId,
        /// Opacity in `0.0..=1.0`
        opacity: f32,
    },
    /// Move or resize an IVI surface.
    SetIviSurfaceDestRectangle {
        /// Surface
        surface: WaylandIviSurfaceId,
        /// Destination rectangle on screen
        rectangle: Rect,
    },
    /// Show or hide an IVI layer.
    SetIviLayerVisibility {
        /// Layer
        layer: WaylandIviLayerId,
        /// Visible
        visible: bool,
    },
    /// Place an IVI surface on an IVI layer.
    AddIviSurfaceToIviLayer {
        /// Surface
        surface: WaylandIviSurfaceId,
        /// Layer
        layer: WaylandIviLayerId,
    },
    /// Save a screenshot of a screen to a file.
    Screenshot {
        /// Target file
        file_name: String,
        /// Screen index; `None` for the only screen
        screen: Option<u32>,
    },
}

// =============================================================================
// PAYLOADS - SCENE LIFECYCLE
// =============================================================================

/// A producer published a scene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenePublished {
    /// Published scene
    pub scene: SceneId,
    /// Publication mode
    pub mode: PublicationMode,
}

/// A producer withdrew a scene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneUnpublished {
    /// Withdrawn scene
    pub scene: SceneId,
}

/// Initial content of a subscribed scene arrived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveScene {
    /// Scene description
    pub info: SceneInfo,
}

/// A flush of a subscribed scene arrived.
#[derive(Debug, PartialEq, Eq)]
pub struct UpdateScene {
    /// Updated scene
    pub scene: SceneId,
    /// Flushed actions and resources
    pub update: SceneUpdate,
}

// =============================================================================
// PAYLOADS - SCENE MAPPING & STATE
// =============================================================================

/// Requests a target state for a scene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetSceneState {
    /// Scene
    pub scene: SceneId,
    /// Requested state
    pub state: RendererSceneState,
}

/// Assigns a scene to the display that will render it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetSceneMapping {
    /// Scene
    pub scene: SceneId,
    /// Owning display
    pub display: DisplayHandle,
}

/// Chooses where a mapped scene renders into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetSceneDisplayBufferAssignment {
    /// Scene
    pub scene: SceneId,
    /// Offscreen buffer, or `None` for the display framebuffer
    pub buffer: Option<OffscreenBufferHandle>,
    /// Render order within the buffer
    pub render_order: i32,
}

// =============================================================================
// PAYLOADS - DATA LINKING
// =============================================================================

/// Links a provider slot of one scene to a consumer slot of another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkData {
    /// Scene owning the provider
    pub provider_scene: SceneId,
    /// Provider slot
    pub provider: DataProviderId,
    /// Scene owning the consumer
    pub consumer_scene: SceneId,
    /// Consumer slot
    pub consumer: DataConsumerId,
}

/// Links an offscreen buffer as texture to a consumer slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkOffscreenBuffer {
    /// Provider buffer
    pub buffer: OffscreenBufferHandle,
    /// Scene owning the consumer
    pub consumer_scene: SceneId,
    /// Consumer slot
    pub consumer: DataConsumerId,
}

/// Links a stream buffer as texture to a consumer slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkStreamBuffer {
    /// Provider buffer
    pub buffer: StreamBufferHandle,
    /// Scene owning the consumer
    pub consumer_scene: SceneId,
    /// Consumer slot
    pub consumer: DataConsumerId,
}

/// Links an external buffer as texture to a consumer slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkExternalBuffer {
    /// Provider buffer
    pub buffer: ExternalBufferHandle,
    /// Scene owning the consumer
    pub consumer_scene: SceneId,
    /// Consumer slot
    pub consumer: DataConsumerId,
}

/// Removes whatever link feeds a consumer slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnlinkData {
    /// Scene owning the consumer
    pub consumer_scene: SceneId,
    /// Consumer slot
    pub consumer: DataConsumerId,
}

// =============================================================================
// PAYLOADS - DISPLAYS & BUFFERS
// =============================================================================

/// Creates a display with the given handle.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateDisplay {
    /// Handle chosen by the producer
    pub display: DisplayHandle,
    /// Window and context configuration
    pub config: DisplayConfig,
}

/// Destroys a display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestroyDisplay {
    /// Display
    pub display: DisplayHandle,
}

/// Creates an offscreen buffer on a display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateOffscreenBuffer {
    /// Display
    pub display: DisplayHandle,
    /// Handle chosen by the producer
    pub buffer: OffscreenBufferHandle,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// MSAA sample count; 0 disables multisampling
    pub sample_count: u32,
    /// Rendered with leftover frame time only
    pub interruptible: bool,
}

/// Destroys an offscreen buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestroyOffscreenBuffer {
    /// Display
    pub display: DisplayHandle,
    /// Buffer
    pub buffer: OffscreenBufferHandle,
}

/// Creates a stream buffer fed by an embedded-compositor surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateStreamBuffer {
    /// Display
    pub display: DisplayHandle,
    /// Handle chosen by the producer
    pub buffer: StreamBufferHandle,
    /// Feeding surface
    pub source: StreamSource,
}

/// Destroys a stream buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestroyStreamBuffer {
    /// Display
    pub display: DisplayHandle,
    /// Buffer
    pub buffer: StreamBufferHandle,
}

/// Creates a buffer filled by an external producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateExternalBuffer {
    /// Display
    pub display: DisplayHandle,
    /// Handle chosen by the producer
    pub buffer: ExternalBufferHandle,
}

/// Destroys an external buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DestroyExternalBuffer {
    /// Display
    pub display: DisplayHandle,
    /// Buffer
    pub buffer: ExternalBufferHandle,
}

// =============================================================================
// PAYLOADS - DISPLAY CONTROL
// =============================================================================

/// Sets which aspects of a buffer get cleared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetClearFlags {
    /// Display
    pub display: DisplayHandle,
    /// Offscreen buffer, or `None` for the framebuffer
    pub buffer: Option<OffscreenBufferHandle>,
    /// Flags
    pub flags: ClearFlags,
}

/// Sets the clear color of a buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct SetClearColor {
    /// Display
    pub display: DisplayHandle,
    /// Offscreen buffer, or `None` for the framebuffer
    pub buffer: Option<OffscreenBufferHandle>,
    /// Color
    pub color: Vec4,
}

/// Informs a display about a resize of a window it does not own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetExternallyOwnedWindowSize {
    /// Display
    pub display: DisplayHandle,
    /// New width
    pub width: u32,
    /// New height
    pub height: u32,
}

/// Reads back pixels after the next rendered frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadPixels {
    /// Display
    pub display: DisplayHandle,
    /// Offscreen buffer, or `None` for the framebuffer
    pub buffer: Option<OffscreenBufferHandle>,
    /// Region to read; ignored when `full_screen`
    pub region: Rect,
    /// Read the whole buffer
    pub full_screen: bool,
    /// Write to this file instead of emitting pixel data
    pub file_name: Option<String>,
}

/// Logs a text once every earlier command of the display was executed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationEcho {
    /// Display
    pub display: DisplayHandle,
    /// Text to log
    pub text: String,
}

/// Forwards an operation to the platform system compositor.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemCompositorControl {
    /// Display whose platform owns the compositor controller
    pub display: DisplayHandle,
    /// Operation
    pub op: SystemCompositorOp,
}

// =============================================================================
// PAYLOADS - DIAGNOSTICS & GLOBAL LIMITS
// =============================================================================

/// Dumps renderer state to the log.
///
/// The last four fields are stamped by the dispatcher.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogInfo {
    /// What to log
    pub topic: LogTopic,
    /// Include per-object details
    pub verbose: bool,
    /// Only log objects whose name contains this
    pub node_filter: String,
    /// Displays run on their own threads
    pub displays_threaded: bool,
    /// Display threads are currently looping
    pub display_threads_running: bool,
    /// Current loop mode
    pub loop_mode: LoopMode,
    /// Minimum frame duration of the receiving display
    pub min_frame_time: Option<Duration>,
}

/// Dumps frame statistics to the log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogStatistics;

/// Limits time spent per frame on uploads and interruptible rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetFrameTimerLimits {
    /// Budget for scene resource uploads
    pub scene_resources_upload: Duration,
    /// Budget for interruptible offscreen buffers
    pub offscreen_buffer_render: Duration,
}

/// Pending flushes after which a scene is force-applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetLimitsFlushesForceApply {
    /// Limit
    pub limit: u32,
}

/// Pending flushes after which a scene is force-unsubscribed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetLimitsFlushesForceUnsubscribe {
    /// Limit
    pub limit: u32,
}

/// Toggles skipping rendering of buffers whose content did not change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetSkippingOfUnmodifiedBuffers {
    /// Enable skipping
    pub enable: bool,
}

// =============================================================================
// COMMAND ENUM
// =============================================================================

macro_rules! renderer_commands {
    (
        copyable { $( $(#[$cdoc:meta])* $copyable:ident, )* }
        move_only { $( $(#[$mdoc:meta])* $moved:ident, )* }
    ) => {
        /// A single renderer-directed operation.
        #[derive(Debug, PartialEq)]
        pub enum RendererCommand {
            $( $(#[$cdoc])* $copyable($copyable), )*
            $( $(#[$mdoc])* $moved($moved), )*
        }

        /// Payload-free mirror of [`RendererCommand`], for logs and per-kind policy.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum RendererCommandKind {
            $( $(#[$cdoc])* $copyable, )*
            $( $(#[$mdoc])* $moved, )*
        }

        impl RendererCommand {
            /// Kind of this command.
            #[must_use]
            pub const fn kind(&self) -> RendererCommandKind {
                match self {
                    $( Self::$copyable(_) => RendererCommandKind::$copyable, )*
                    $( Self::$moved(_) => RendererCommandKind::$moved, )*
                }
            }

            /// Duplicates the command, or `None` for move-only kinds.
            #[must_use]
            pub fn try_copy(&self) -> Option<Self> {
                match self {
                    $( Self::$copyable(cmd) => Some(Self::$copyable(cmd.clone())), )*
                    $( Self::$moved(_) => None, )*
                }
            }
        }

        impl RendererCommandKind {
            /// Whether commands of this kind may be duplicated.
            #[must_use]
            pub const fn is_copyable(self) -> bool {
                match self {
                    $( Self::$copyable => true, )*
                    $( Self::$moved => false, )*
                }
            }

            /// Name used in logs.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$copyable => stringify!($copyable), )*
                    $( Self::$moved => stringify!($moved), )*
                }
            }
        }

        $(
            impl From<$copyable> for RendererCommand {
                fn from(cmd: $copyable) -> Self {
                    Self::$copyable(cmd)
                }
            }
        )*
        $(
            impl From<$moved> for RendererCommand {
                fn from(cmd: $moved) -> Self {
                    Self::$moved(cmd)
                }
            }
        )*
    };
}

renderer_commands! {
    copyable {
        /// A scene was published
        ScenePublished,
        /// A scene was unpublished
        SceneUnpublished,
        /// Initial scene content arrived
        ReceiveScene,
        /// Target state request
        SetSceneState,
        /// Scene to display assignment
        SetSceneMapping,
        /// Scene to buffer assignment
        SetSceneDisplayBufferAssignment,
        /// Provider to consumer link
        LinkData,
        /// Offscreen buffer to consumer link
        LinkOffscreenBuffer,
        /// Stream buffer to consumer link
        LinkStreamBuffer,
        /// External buffer to consumer link
        LinkExternalBuffer,
        /// Consumer unlink
        UnlinkData,
        /// Display creation
        CreateDisplay,
        /// Display destruction
        DestroyDisplay,
        /// Offscreen buffer creation
        CreateOffscreenBuffer,
        /// Offscreen buffer destruction
        DestroyOffscreenBuffer,
        /// Stream buffer creation
        CreateStreamBuffer,
        /// Stream buffer destruction
        DestroyStreamBuffer,
        /// External buffer creation
        CreateExternalBuffer,
        /// External buffer destruction
        DestroyExternalBuffer,
        /// Clear flags of a buffer
        SetClearFlags,
        /// Clear color of a buffer
        SetClearColor,
        /// Size of an externally owned window
        SetExternallyOwnedWindowSize,
        /// Pixel read-back
        ReadPixels,
        /// Ordered log marker
        ConfirmationEcho,
        /// System compositor operation
        SystemCompositorControl,
        /// State dump
        LogInfo,
        /// Statistics dump
        LogStatistics,
        /// Frame time budgets
        SetFrameTimerLimits,
        /// Force-apply flush limit
        SetLimitsFlushesForceApply,
        /// Force-unsubscribe flush limit
        SetLimitsFlushesForceUnsubscribe,
        /// Unmodified buffer skipping
        SetSkippingOfUnmodifiedBuffers,
    }
    move_only {
        /// A scene flush arrived
        UpdateScene,
    }
}

impl RendererCommand {
    /// Duplicates the command for broadcast.
    ///
    /// # Panics
    ///
    /// Panics for move-only kinds (`UpdateScene`). Callers check
    /// [`RendererCommandKind::is_copyable`] first.
    #[must_use]
    pub fn copy(&self) -> Self {
        match self.try_copy() {
            Some(copy) => copy,
            None => panic!("renderer command {} is not copyable", self.kind()),
        }
    }
}

impl fmt::Display for RendererCommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for RendererCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScenePublished(c) => write!(f, "ScenePublished(scene={})", c.scene),
            Self::SceneUnpublished(c) => write!(f, "SceneUnpublished(scene={})", c.scene),
            Self::ReceiveScene(c) => write!(f, "ReceiveScene(scene={})", c.info.scene_id),
            Self::UpdateScene(c) => write!(
                f,
                "UpdateScene(scene={}, flush={})",
                c.scene, c.update.flush_index
            ),
            Self::SetSceneState(c) => {
                write!(f, "SetSceneState(scene={}, state={})", c.scene, c.state)
            }
            Self::SetSceneMapping(c) => {
                write!(f, "SetSceneMapping(scene={}, display={})", c.scene, c.display)
            }
            Self::CreateDisplay(c) => write!(f, "CreateDisplay(display={})", c.display),
            Self::DestroyDisplay(c) => write!(f, "DestroyDisplay(display={})", c.display),
            other => f.write_str(other.kind().name()),
        }
    }
}
