//! Render context: everything a render borrows from its host.

use std::sync::Arc;

use cutroom_common::clock::{Clock, MonotonicClock};
use cutroom_common::config::AppConfig;

use crate::audio_mix::{AudioSourceDecoder, SymphoniaDecoder};
use crate::codec::{default_backend, CodecBackend};
use crate::fonts::{load_font, LoadedFont};
use crate::native_service::NativeServiceClient;
use crate::selector::Capabilities;

/// Owns the codec backend, audio decoder, native-service client, clock,
/// and font used by one or more renders.
pub struct RenderContext {
    config: AppConfig,
    codecs: Box<dyn CodecBackend>,
    audio: Box<dyn AudioSourceDecoder>,
    native: NativeServiceClient,
    clock: Arc<dyn Clock>,
    font: Option<LoadedFont>,
}

impl RenderContext {
    /// Context with the best codec backend this build has and a system font.
    pub fn from_config(config: &AppConfig) -> Self {
        let font = load_font(config.render.font_path.as_deref());
        Self {
            config: config.clone(),
            codecs: default_backend(),
            audio: Box::new(SymphoniaDecoder),
            native: NativeServiceClient::new(config.native_service.clone()),
            clock: Arc::new(MonotonicClock::new()),
            font,
        }
    }

    /// Context without a font or font discovery.
    pub fn bare(config: &AppConfig) -> Self {
        Self {
            config: config.clone(),
            codecs: default_backend(),
            audio: Box::new(SymphoniaDecoder),
            native: NativeServiceClient::new(config.native_service.clone()),
            clock: Arc::new(MonotonicClock::new()),
            font: None,
        }
    }

    pub fn with_codecs(mut self, codecs: impl CodecBackend + 'static) -> Self {
        self.codecs = Box::new(codecs);
        self
    }

    pub fn with_audio(mut self, audio: impl AudioSourceDecoder + 'static) -> Self {
        self.audio = Box::new(audio);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_font(mut self, font: Option<LoadedFont>) -> Self {
        self.font = font;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn codecs(&self) -> &dyn CodecBackend {
        self.codecs.as_ref()
    }

    pub fn audio_decoder(&self) -> &dyn AudioSourceDecoder {
        self.audio.as_ref()
    }

    pub fn native_service(&self) -> &NativeServiceClient {
        &self.native
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn font(&self) -> Option<&LoadedFont> {
        self.font.as_ref()
    }

    /// What the streaming pipeline can do on this host.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            hardware_codecs: self.codecs.capabilities().hardware_codecs,
            text_rendering: self.font.is_some(),
        }
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("codecs", &self.codecs.name())
            .field("native_service", &self.native.base_url())
            .field("font", &self.font)
            .finish_non_exhaustive()
    }
}
