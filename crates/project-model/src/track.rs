//! Timeline tracks.

use serde::{Deserialize, Serialize};

use crate::clip::Clip;
use crate::media::MediaKind;

/// An ordered lane of clips. Gaps are allowed; overlapping video is
/// resolved by track priority (lower index wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MediaKind,

    /// Clips in insertion order.
    #[serde(default)]
    pub clips: Vec<Clip>,

    #[serde(default)]
    pub muted: bool,
}

impl Track {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            clips: vec![],
            muted: false,
        }
    }

    pub fn with_clip(mut self, clip: Clip) -> Self {
        self.clips.push(clip);
        self
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }
}
