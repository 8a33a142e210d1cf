//! Project container, persistence, and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clip::Clip;
use crate::geometry::MAX_CROP;
use crate::media::MediaFile;
use crate::timing;
use crate::track::Track;
use crate::transition::Transition;

/// Top-level project snapshot handed to the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub media_files: Vec<MediaFile>,

    /// Tracks in priority order: index 0 is drawn on top.
    #[serde(default)]
    pub tracks: Vec<Track>,

    #[serde(default)]
    pub transitions: Vec<Transition>,

    /// Editing frame grid.
    #[serde(default = "default_framerate")]
    pub framerate: f64,
}

fn default_framerate() -> f64 {
    30.0
}

/// What a project needs from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProjectFeatures {
    /// At least one audible clip on an audio track.
    pub has_audio: bool,
    pub has_text_overlay: bool,
    pub has_transform_or_crop: bool,
}

impl ProjectFeatures {
    pub fn detect(project: &Project) -> Self {
        let mut features = Self::default();
        for track in &project.tracks {
            for clip in &track.clips {
                if project.media(&clip.media_id).is_none() {
                    continue;
                }
                if track.is_audio() && !track.muted {
                    features.has_audio = true;
                }
                if track.is_video() {
                    features.has_text_overlay |= clip.text_overlay.is_some();
                    features.has_transform_or_crop |= clip.has_framing();
                }
            }
        }
        features
    }
}

impl Project {
    pub fn new(name: impl Into<String>, framerate: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            media_files: vec![],
            tracks: vec![],
            transitions: vec![],
            framerate,
        }
    }

    /// Total length: latest clip end over all tracks, 0 when empty.
    pub fn duration(&self) -> f64 {
        timing::project_duration(self)
    }

    pub fn media(&self, id: &str) -> Option<&MediaFile> {
        self.media_files.iter().find(|m| m.id == id)
    }

    pub fn transitions_for<'a>(&'a self, clip_id: &'a str) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| t.clip_id == clip_id)
    }

    /// Every clip with its track index and resolved media, in track order.
    pub fn placed_clips(&self) -> impl Iterator<Item = (usize, &Track, &Clip, &MediaFile)> {
        self.tracks.iter().enumerate().flat_map(move |(index, track)| {
            track.clips.iter().filter_map(move |clip| {
                self.media(&clip.media_id)
                    .map(|media| (index, track, clip, media))
            })
        })
    }

    /// Load a project from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref().to_path_buf();
        let json = std::fs::read_to_string(&path).map_err(|e| ProjectError::IoError {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ProjectError::ParseError { path, source: e })
    }

    /// Save the project as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProjectError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ProjectError::ParseError {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, json).map_err(|e| ProjectError::IoError { path, source: e })
    }

    /// Structural problems that would make a render meaningless.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        for track in &self.tracks {
            for clip in &track.clips {
                let Some(media) = self.media(&clip.media_id) else {
                    errors.push(format!(
                        "Clip {} on track {} references missing media {}",
                        clip.id, track.id, clip.media_id
                    ));
                    continue;
                };
                if media.duration - clip.trim_start - clip.trim_end < 0.0 {
                    errors.push(format!(
                        "Clip {} trims {:.3}s + {:.3}s from {:.3}s of media",
                        clip.id, clip.trim_start, clip.trim_end, media.duration
                    ));
                }
                if let Some(crop) = clip.crop {
                    let edges = [crop.left, crop.right, crop.top, crop.bottom];
                    if edges.iter().any(|v| !(0.0..=MAX_CROP).contains(v)) {
                        errors.push(format!(
                            "Clip {} crop {:?} outside [0, {MAX_CROP}]",
                            clip.id, edges
                        ));
                    }
                }
            }
        }

        for transition in &self.transitions {
            let exists = self
                .tracks
                .iter()
                .any(|t| t.clips.iter().any(|c| c.id == transition.clip_id));
            if !exists {
                errors.push(format!(
                    "Transition {} references missing clip {}",
                    transition.id, transition.clip_id
                ));
            }
        }

        errors
    }

    /// Like [`Project::validate`] but as a single error.
    pub fn ensure_valid(&self) -> Result<(), ProjectError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProjectError::ValidationError {
                message: errors.join("; "),
            })
        }
    }

    /// Media files whose source path does not exist on disk.
    pub fn missing_sources(&self) -> Vec<PathBuf> {
        self.media_files
            .iter()
            .map(|m| PathBuf::from(&m.path))
            .filter(|p| !p.exists())
            .collect()
    }
}

/// Errors that can occur when working with projects.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid project: {message}")]
    ValidationError { message: String },
}
