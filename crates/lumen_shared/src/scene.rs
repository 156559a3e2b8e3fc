//! Scene-side payloads carried by renderer commands.

use crate::ids::{DataConsumerId, DataProviderId, SceneId, WaylandIviSurfaceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Renderer-side state of a scene on one display.
///
/// States are ordered: a scene must pass through every lower state before
/// reaching a higher one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RendererSceneState {
    /// Not published, or unknown to the display.
    #[default]
    Unavailable,
    /// Published and known, but not subscribed.
    Available,
    /// Subscribed, received and mapped; resources are uploaded.
    Ready,
    /// Shown on its display.
    Rendered,
}

impl fmt::Display for RendererSceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unavailable => "Unavailable",
            Self::Available => "Available",
            Self::Ready => "Ready",
            Self::Rendered => "Rendered",
        };
        f.write_str(name)
    }
}

/// Who may subscribe to a published scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublicationMode {
    /// Only renderers in the same process.
    #[default]
    LocalOnly,
    /// Local and remote renderers.
    LocalAndRemote,
}

/// Description of a scene as announced by its producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SceneInfo {
    /// Scene being described
    pub scene_id: SceneId,
    /// Human readable name, for logs only
    pub friendly_name: String,
    /// Publication mode chosen by the producer
    pub publication_mode: PublicationMode,
}

impl SceneInfo {
    /// Scene info with an empty friendly name.
    #[must_use]
    pub fn new(scene_id: SceneId) -> Self {
        Self {
            scene_id,
            friendly_name: String::new(),
            publication_mode: PublicationMode::default(),
        }
    }
}

/// One action inside a scene update.
///
/// Only the actions the renderer core inspects are structured; everything
/// else travels as an opaque serialized blob.
#[derive(Debug, PartialEq, Eq)]
pub enum SceneAction {
    /// The scene embeds another scene by reference.
    AddSceneReference {
        /// Embedded (referenced) scene
        referenced: SceneId,
    },
    /// The scene drops a previously embedded scene.
    RemoveSceneReference {
        /// Referenced scene being dropped
        referenced: SceneId,
    },
    /// Declares a data provider slot.
    CreateDataProvider {
        /// Provider slot id
        provider: DataProviderId,
    },
    /// Declares a data consumer slot.
    CreateDataConsumer {
        /// Consumer slot id
        consumer: DataConsumerId,
    },
    /// Serialized action the core does not interpret.
    Opaque(Vec<u8>),
}

/// A flushed batch of scene actions plus resource payloads.
///
/// Deliberately not `Clone`: updates can carry megabytes of resource data
/// and must be moved, never duplicated.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SceneUpdate {
    /// Producer-side flush counter
    pub flush_index: u64,
    /// Actions in flush order
    pub actions: Vec<SceneAction>,
    /// Serialized resource blobs uploaded with this flush
    pub resources: Vec<Vec<u8>>,
}

impl SceneUpdate {
    /// Update with a flush index and the given actions.
    #[must_use]
    pub fn new(flush_index: u64, actions: Vec<SceneAction>) -> Self {
        Self {
            flush_index,
            actions,
            resources: Vec::new(),
        }
    }

    /// Total size of all resource payloads in bytes.
    #[must_use]
    pub fn resource_bytes(&self) -> usize {
        self.resources.iter().map(Vec::len).sum()
    }
}

/// Source of a stream buffer: an embedded-compositor surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamSource(pub WaylandIviSurfaceId);

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ivi-surface:{}", self.0)
    }
}
