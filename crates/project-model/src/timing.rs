//! Timing resolver.
//!
//! Pure functions mapping a clip's trim, speed, and reverse settings to
//! timeline placement and source positions. No I/O, no state.

use crate::clip::Clip;
use crate::media::MediaFile;
use crate::project::Project;
use crate::track::Track;

/// Playback rate actually used for a clip. Non-positive or non-finite
/// values behave as 1.
pub fn effective_speed(speed: f64) -> f64 {
    if speed.is_finite() && speed > 0.0 {
        speed.max(f64::EPSILON)
    } else {
        1.0
    }
}

/// Seconds of source material the clip plays.
pub fn clip_source_duration(clip: &Clip, media: &MediaFile) -> f64 {
    (media.duration - clip.trim_start - clip.trim_end).max(0.0)
}

/// Seconds the clip occupies on the timeline.
pub fn clip_timeline_duration(clip: &Clip, media: &MediaFile) -> f64 {
    clip_source_duration(clip, media) / effective_speed(clip.speed)
}

pub fn clip_end_time(clip: &Clip, media: &MediaFile) -> f64 {
    clip.start_time + clip_timeline_duration(clip, media)
}

/// Source position shown at timeline time `t`, clamped to the trimmed window.
pub fn source_time_at(clip: &Clip, media: &MediaFile, t: f64) -> f64 {
    resolve_clip(clip, media).source_time(t)
}

/// Snap a value to the nearest frame boundary. Invalid framerates leave the
/// value unchanged.
pub fn quantize_to_frame(value: f64, framerate: f64) -> f64 {
    if !(framerate.is_finite() && framerate > 0.0) {
        return value;
    }
    (value * framerate).round() / framerate
}

/// Latest clip end on a track; 0 when empty. Clips whose media is missing
/// are ignored.
pub fn track_duration(track: &Track, media: &[MediaFile]) -> f64 {
    track
        .clips
        .iter()
        .filter_map(|clip| {
            media
                .iter()
                .find(|m| m.id == clip.media_id)
                .map(|m| clip_end_time(clip, m))
        })
        .fold(0.0, f64::max)
}

pub fn project_duration(project: &Project) -> f64 {
    project
        .tracks
        .iter()
        .map(|track| track_duration(track, &project.media_files))
        .fold(0.0, f64::max)
}

/// A clip's timing, resolved once against its media.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipTiming {
    /// Timeline start.
    pub start: f64,
    /// Timeline end (exclusive).
    pub end: f64,
    /// First source second played (`trimStart`).
    pub source_start: f64,
    /// Source second where playback stops (`duration - trimEnd`).
    pub source_end: f64,
    pub speed: f64,
    pub reverse: bool,
}

pub fn resolve_clip(clip: &Clip, media: &MediaFile) -> ClipTiming {
    let source_start = clip.trim_start.max(0.0);
    let source_end = (media.duration - clip.trim_end).max(source_start);
    ClipTiming {
        start: clip.start_time,
        end: clip_end_time(clip, media),
        source_start,
        source_end,
        speed: effective_speed(clip.speed),
        reverse: clip.reverse,
    }
}

impl ClipTiming {
    pub fn timeline_duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn source_duration(&self) -> f64 {
        self.source_end - self.source_start
    }

    /// Whether the clip is on screen at `t` (half-open interval).
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    pub fn source_time(&self, t: f64) -> f64 {
        let elapsed = (t - self.start) * self.speed;
        let raw = if self.reverse {
            self.source_end - elapsed
        } else {
            self.source_start + elapsed
        };
        raw.clamp(self.source_start, self.source_end)
    }
}
