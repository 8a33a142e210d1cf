//! Clips placed on timeline tracks.

use serde::{Deserialize, Serialize};

use crate::geometry::{Crop, Transform};
use crate::timing::quantize_to_frame;

/// One placement of a media file on a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    pub id: String,

    pub media_id: String,

    /// Timeline position of the first frame, in seconds.
    pub start_time: f64,

    /// Seconds removed from the head of the source.
    #[serde(default)]
    pub trim_start: f64,

    /// Seconds removed from the tail of the source.
    #[serde(default)]
    pub trim_end: f64,

    /// Playback rate. Non-positive values behave as 1.
    #[serde(default = "default_speed")]
    pub speed: f64,

    #[serde(default)]
    pub reverse: bool,

    /// Blend opacity in `[0, 1]`.
    #[serde(default = "default_opacity")]
    pub opacity: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Transform>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop: Option<Crop>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_overlay: Option<TextOverlay>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,

    /// Paired clip on another track (audio extracted from a video clip).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_clip_id: Option<String>,
}

fn default_speed() -> f64 {
    1.0
}

fn default_opacity() -> f64 {
    1.0
}

/// Text drawn over a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOverlay {
    pub text: String,

    /// Horizontal anchor as a fraction of output width.
    #[serde(default = "half")]
    pub x: f64,

    /// Vertical anchor as a fraction of output height.
    #[serde(default = "half")]
    pub y: f64,

    /// Glyph height in output pixels.
    #[serde(default = "default_font_size")]
    pub font_size: f64,

    /// `#rrggbb` or `#rrggbbaa`.
    #[serde(default = "default_color")]
    pub color: String,

    /// Offset from the clip's start time.
    #[serde(default)]
    pub start: f64,

    /// Visible duration; the rest of the clip when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

fn half() -> f64 {
    0.5
}

fn default_font_size() -> f64 {
    48.0
}

fn default_color() -> String {
    "#ffffff".to_string()
}

impl TextOverlay {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            x: 0.5,
            y: 0.5,
            font_size: default_font_size(),
            color: default_color(),
            start: 0.0,
            duration: None,
        }
    }

    /// RGBA colour, white when the string does not parse.
    pub fn rgba(&self) -> [u8; 4] {
        parse_hex_color(&self.color).unwrap_or([255, 255, 255, 255])
    }
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(s: &str) -> Option<[u8; 4]> {
    let hex = s.trim().strip_prefix('#')?;
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [255u8; 4];
            for (i, ch) in hex.chars().enumerate() {
                let v = ch.to_digit(16)? as u8;
                out[i] = v * 17;
            }
            Some(out)
        }
        6 => Some([byte(0)?, byte(2)?, byte(4)?, 255]),
        8 => Some([byte(0)?, byte(2)?, byte(4)?, byte(6)?]),
        _ => None,
    }
}

/// Per-pixel colour adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Effect {
    /// Additive offset in `[-1, 1]`.
    Brightness { value: f64 },
    /// Multiplier around mid-grey; 1 is unchanged.
    Contrast { value: f64 },
    /// Multiplier on chroma; 0 is greyscale, 1 is unchanged.
    Saturation { value: f64 },
    Grayscale,
}

impl Clip {
    pub fn new(id: impl Into<String>, media_id: impl Into<String>, start_time: f64) -> Self {
        Self {
            id: id.into(),
            media_id: media_id.into(),
            start_time,
            trim_start: 0.0,
            trim_end: 0.0,
            speed: 1.0,
            reverse: false,
            opacity: 1.0,
            transform: None,
            crop: None,
            text_overlay: None,
            effects: vec![],
            linked_clip_id: None,
        }
    }

    pub fn with_trim(mut self, trim_start: f64, trim_end: f64) -> Self {
        self.trim_start = trim_start;
        self.trim_end = trim_end;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Move the clip, snapping to the frame grid.
    pub fn set_start_time(&mut self, value: f64, framerate: f64) {
        self.start_time = quantize_to_frame(value.max(0.0), framerate);
    }

    pub fn set_trim_start(&mut self, value: f64, framerate: f64) {
        self.trim_start = quantize_to_frame(value.max(0.0), framerate);
    }

    pub fn set_trim_end(&mut self, value: f64, framerate: f64) {
        self.trim_end = quantize_to_frame(value.max(0.0), framerate);
    }

    /// Whether the clip needs crop or transform support from a backend.
    pub fn has_framing(&self) -> bool {
        self.transform.is_some_and(|t| !t.is_identity())
            || self.crop.is_some_and(|c| !c.is_identity())
    }

    pub fn effective_opacity(&self) -> f64 {
        if self.opacity.is_finite() {
            self.opacity.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_defaults_from_minimal_json() {
        let clip: Clip =
            serde_json::from_str(r#"{"id":"c1","mediaId":"m1","startTime":2.0}"#).unwrap();
        assert_eq!(clip.speed, 1.0);
        assert_eq!(clip.opacity, 1.0);
        assert!(!clip.reverse);
        assert!(clip.effects.is_empty());
        assert!(!clip.has_framing());
    }

    #[test]
    fn test_setters_snap_to_frames() {
        let mut clip = Clip::new("c", "m", 0.0);
        clip.set_start_time(1.01, 30.0);
        assert!((clip.start_time - 1.0).abs() < 1e-12);
        clip.set_trim_start(0.52, 10.0);
        assert!((clip.trim_start - 0.5).abs() < 1e-12);
        clip.set_trim_end(-3.0, 30.0);
        assert_eq!(clip.trim_end, 0.0);
    }

    #[test]
    fn test_identity_framing_is_not_framing() {
        let mut clip = Clip::new("c", "m", 0.0);
        clip.transform = Some(Transform::default());
        clip.crop = Some(Crop::default());
        assert!(!clip.has_framing());
        clip.crop = Some(Crop::new(0.1, 0.0, 0.0, 0.0));
        assert!(clip.has_framing());
    }

    #[test]
    fn test_effect_wire_shape() {
        let effects: Vec<Effect> = serde_json::from_str(
            r#"[{"type":"brightness","value":0.2},{"type":"grayscale"}]"#,
        )
        .unwrap();
        assert_eq!(effects[0], Effect::Brightness { value: 0.2 });
        assert_eq!(effects[1], Effect::Grayscale);
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("#ff8000"), Some([255, 128, 0, 255]));
        assert_eq!(parse_hex_color("#fff"), Some([255, 255, 255, 255]));
        assert_eq!(parse_hex_color("#00000080"), Some([0, 0, 0, 128]));
        assert_eq!(parse_hex_color("red"), None);
        assert_eq!(TextOverlay::new("hi").rgba(), [255, 255, 255, 255]);
    }
}
