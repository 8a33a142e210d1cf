//! Imported media files.

use serde::{Deserialize, Serialize};

/// Kind of media a file or track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

/// A source file known to the project. Immutable once imported.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub kind: MediaKind,

    /// Source location (filesystem path).
    #[serde(rename = "url")]
    pub path: String,

    /// Declared duration in seconds.
    pub duration: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// Precomputed thumbnail (data URL). Never read by the renderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    /// Precomputed peak envelope. Never read by the renderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<f32>>,
}

impl MediaFile {
    pub fn video(
        id: impl Into<String>,
        path: impl Into<String>,
        duration: f64,
        width: u32,
        height: u32,
        framerate: f64,
    ) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            name: file_name(&path),
            kind: MediaKind::Video,
            path,
            duration,
            framerate: Some(framerate),
            width: Some(width),
            height: Some(height),
            thumbnail: None,
            waveform: None,
        }
    }

    pub fn audio(id: impl Into<String>, path: impl Into<String>, duration: f64) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            name: file_name(&path),
            kind: MediaKind::Audio,
            path,
            duration,
            framerate: None,
            width: None,
            height: None,
            thumbnail: None,
            waveform: None,
        }
    }

    /// Source pixel size, when known.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }
}

fn file_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
