//! Output settings for a render.

use serde::{Deserialize, Serialize};

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Webm,
}

impl ContainerFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::Webm => "video/webm",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Webm => "webm",
        }
    }
}

impl std::str::FromStr for ContainerFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(ContainerFormat::Mp4),
            "webm" => Ok(ContainerFormat::Webm),
            other => Err(format!("unknown container format: {other}")),
        }
    }
}

/// Which backend the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    /// Walk the fallback chain.
    #[default]
    Auto,
    /// Native render service only.
    Python,
    /// Streaming hardware pipeline only.
    Gpu,
    /// Filter-graph transcoder only.
    Compatibility,
}

impl EngineChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineChoice::Auto => "auto",
            EngineChoice::Python => "python",
            EngineChoice::Gpu => "gpu",
            EngineChoice::Compatibility => "compatibility",
        }
    }
}

impl std::str::FromStr for EngineChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(EngineChoice::Auto),
            "python" | "native" => Ok(EngineChoice::Python),
            "gpu" | "streaming" => Ok(EngineChoice::Gpu),
            "compatibility" | "ffmpeg" => Ok(EngineChoice::Compatibility),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

/// Requested output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Video bitrate in kbps.
    pub bitrate: u32,
    pub framerate: f64,
    pub format: ContainerFormat,
    #[serde(default)]
    pub engine: EngineChoice,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            bitrate: 8000,
            framerate: 30.0,
            format: ContainerFormat::Mp4,
            engine: EngineChoice::Auto,
        }
    }
}

impl RenderSettings {
    /// Check values a backend cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("invalid output size {}x{}", self.width, self.height));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!(
                "output size {}x{} must be even for 4:2:0 encoding",
                self.width, self.height
            ));
        }
        if !(self.framerate.is_finite() && self.framerate > 0.0) {
            return Err(format!("invalid framerate {}", self.framerate));
        }
        if self.bitrate == 0 {
            return Err("bitrate must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_wire_format() {
        let settings: RenderSettings = serde_json::from_str(
            r#"{"width":1280,"height":720,"bitrate":4000,"framerate":30,"format":"webm"}"#,
        )
        .unwrap();
        assert_eq!(settings.engine, EngineChoice::Auto);
        assert_eq!(settings.format.mime(), "video/webm");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_odd_size() {
        let settings = RenderSettings {
            width: 1281,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_engine_from_str() {
        assert_eq!("GPU".parse::<EngineChoice>(), Ok(EngineChoice::Gpu));
        assert!("turbo".parse::<EngineChoice>().is_err());
    }
}
