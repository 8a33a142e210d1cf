//! Backend selection.
//!
//! A pure decision over the requested engine, what the project uses, and
//! what this host can do. The result is an ordered list of strategies; the
//! runner in [`crate::export`] walks it.

use cutroom_common::error::{CutroomError, CutroomResult};
use cutroom_project_model::{ContainerFormat, EngineChoice, ProjectFeatures};

/// The closed set of render strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Local HTTP render service.
    NativeService,
    /// In-process demux/decode/composite/encode pipeline.
    Streaming,
    /// Concat filter graph run by the external transcoder.
    FilterGraph,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::NativeService => "native-service",
            Strategy::Streaming => "streaming",
            Strategy::FilterGraph => "filter-graph",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the host can do for the streaming pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// A codec backend that can decode sources and encode the output.
    pub hardware_codecs: bool,
    /// A font is loaded for drawing text overlays.
    pub text_rendering: bool,
}

/// Ordered strategies to attempt.
pub fn plan(
    requested: EngineChoice,
    features: ProjectFeatures,
    caps: Capabilities,
    format: ContainerFormat,
) -> CutroomResult<Vec<Strategy>> {
    let mp4_with_audio = format == ContainerFormat::Mp4 && features.has_audio;

    match requested {
        EngineChoice::Python => {
            if features.has_transform_or_crop {
                return Err(CutroomError::config(
                    "The native render service does not support transform or crop; \
                     choose the auto, gpu, or compatibility engine",
                ));
            }
            if features.has_text_overlay {
                tracing::warn!("Native render service ignores text overlays");
            }
            Ok(vec![Strategy::NativeService])
        }
        EngineChoice::Gpu => {
            if !caps.hardware_codecs {
                return Err(CutroomError::unavailable(
                    "No hardware codec backend is available on this host",
                ));
            }
            if mp4_with_audio {
                tracing::warn!(
                    "Streaming pipeline muxing separate audio into MP4 is less reliable than the compatibility engine"
                );
            }
            if features.has_text_overlay && !caps.text_rendering {
                tracing::warn!("No font available; text overlays will be skipped");
            }
            Ok(vec![Strategy::Streaming])
        }
        EngineChoice::Compatibility => Ok(vec![Strategy::FilterGraph]),
        EngineChoice::Auto => {
            let mut strategies = Vec::with_capacity(3);
            if !features.has_transform_or_crop && !features.has_text_overlay {
                strategies.push(Strategy::NativeService);
            }
            let text_ok = !features.has_text_overlay || caps.text_rendering;
            if caps.hardware_codecs && !mp4_with_audio && text_ok {
                strategies.push(Strategy::Streaming);
            }
            strategies.push(Strategy::FilterGraph);
            Ok(strategies)
        }
    }
}
