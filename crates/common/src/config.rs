//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Protocol version the native render service must report on `/health`.
pub const NATIVE_SERVICE_VERSION: &str = "2026-02-19-concat-v1";

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Render pipeline tuning.
    pub render: RenderEngineConfig,

    /// Native render service connection.
    pub native_service: NativeServiceConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Tunables for the streaming pipeline, mixer, and transcoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderEngineConfig {
    /// Compressed samples fed past the target so reordered frames resolve.
    pub lookahead_ms: u64,

    /// Distance within which a decoded frame counts as matching a target.
    pub pick_tolerance_ms: u64,

    /// Pending decoder inputs before feeding pauses for outputs to drain.
    pub decoder_queue_depth: usize,

    /// Pending encoder frames before the next output frame waits.
    pub encoder_queue_depth: usize,

    /// Forced keyframe spacing in the encoded output.
    pub keyframe_interval_secs: f64,

    /// Longest a drain wait may make no progress before the render fails.
    pub stall_timeout_ms: u64,

    /// Canonical mixer sample rate.
    pub audio_sample_rate: u32,

    /// Canonical mixer channel count.
    pub audio_channels: u16,

    /// Encoded audio bitrate.
    pub audio_bitrate_kbps: u32,

    /// Transcoder executable for the compatibility path.
    pub ffmpeg_path: String,

    /// Font used for text overlays. Discovered from system paths when unset.
    pub font_path: Option<PathBuf>,
}

/// Native render service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeServiceConfig {
    /// Base URL, e.g. `http://127.0.0.1:8765`.
    pub base_url: String,

    /// Exact version the service must report.
    pub required_version: String,

    /// Timeout for the health probe.
    pub health_timeout_ms: u64,

    /// Timeout for a full render request.
    pub render_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cutroom=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RenderEngineConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 500,
            pick_tolerance_ms: 35,
            decoder_queue_depth: 8,
            encoder_queue_depth: 8,
            keyframe_interval_secs: 2.0,
            stall_timeout_ms: 5_000,
            audio_sample_rate: 48_000,
            audio_channels: 2,
            audio_bitrate_kbps: 128,
            ffmpeg_path: "ffmpeg".to_string(),
            font_path: None,
        }
    }
}

impl RenderEngineConfig {
    pub fn lookahead_us(&self) -> i64 {
        self.lookahead_ms as i64 * 1_000
    }

    pub fn pick_tolerance_us(&self) -> i64 {
        self.pick_tolerance_ms as i64 * 1_000
    }

    /// Keyframe spacing in output frames, never below one.
    pub fn keyframe_interval_frames(&self, fps: f64) -> u64 {
        ((self.keyframe_interval_secs * fps).round() as u64).max(1)
    }
}

impl Default for NativeServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_string(),
            required_version: NATIVE_SERVICE_VERSION.to_string(),
            health_timeout_ms: 1_500,
            render_timeout_secs: 600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("cutroom").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_defaults() {
        let config = RenderEngineConfig::default();
        assert_eq!(config.lookahead_us(), 500_000);
        assert_eq!(config.pick_tolerance_us(), 35_000);
        assert_eq!(config.encoder_queue_depth, 8);
        assert_eq!(config.keyframe_interval_frames(30.0), 60);
    }

    #[test]
    fn test_keyframe_interval_never_zero() {
        let config = RenderEngineConfig {
            keyframe_interval_secs: 0.0,
            ..Default::default()
        };
        assert_eq!(config.keyframe_interval_frames(30.0), 1);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"render": {"lookahead_ms": 250}}"#).unwrap();
        assert_eq!(parsed.render.lookahead_ms, 250);
        assert_eq!(parsed.render.pick_tolerance_ms, 35);
        assert_eq!(
            parsed.native_service.required_version,
            NATIVE_SERVICE_VERSION
        );
        assert_eq!(parsed.logging.level, "info");
    }
}
