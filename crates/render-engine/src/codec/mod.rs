//! Codec abstraction for the streaming pipeline.
//!
//! A [`CodecBackend`] demuxes sources into compressed samples, hands out
//! decoders for them, and opens an [`OutputWriter`] that encodes and muxes
//! the result. Decoders and writers are asynchronous in the codec sense:
//! input can be accepted before output is ready, and `pending` reports
//! how far behind they are.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::RgbaImage;

use cutroom_common::error::{CutroomError, CutroomResult};
use cutroom_project_model::{ContainerFormat, MediaFile};

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod synthetic;

/// One compressed access unit from a demuxed source.
#[derive(Debug, Clone)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub is_keyframe: bool,
}

/// Counts a decoded frame as live until it is dropped.
#[derive(Debug)]
pub struct FrameGuard {
    live: Arc<AtomicUsize>,
}

impl FrameGuard {
    pub fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { live }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A decoded picture. Dropping it releases the decoder's surface.
#[derive(Debug)]
pub struct DecodedFrame {
    pub image: RgbaImage,
    pub timestamp_us: i64,
    _guard: Option<FrameGuard>,
}

impl DecodedFrame {
    pub fn new(image: RgbaImage, timestamp_us: i64) -> Self {
        Self {
            image,
            timestamp_us,
            _guard: None,
        }
    }

    pub fn tracked(image: RgbaImage, timestamp_us: i64, guard: FrameGuard) -> Self {
        Self {
            image,
            timestamp_us,
            _guard: Some(guard),
        }
    }
}

pub trait VideoDecoder: Send {
    /// Queue one compressed sample. The first sample after open or
    /// [`reset`](VideoDecoder::reset) must be a keyframe.
    fn decode(&mut self, sample: &EncodedSample) -> CutroomResult<()>;

    /// Samples accepted but not yet emitted as frames.
    fn pending(&self) -> usize;

    /// Next frame in presentation order, if one is ready.
    fn next_frame(&mut self) -> CutroomResult<Option<DecodedFrame>>;

    /// No more input follows; everything pending becomes available.
    fn flush(&mut self) -> CutroomResult<()>;

    /// Discard all queued input and output.
    fn reset(&mut self);

    /// Release the decoder. Later calls are no-ops or errors.
    fn close(&mut self);
}

/// A demuxed video track and a decoder ready for it.
pub struct VideoTrackSource {
    /// Samples in decode order. Keyframe timestamps increase.
    pub samples: Vec<EncodedSample>,
    pub decoder: Box<dyn VideoDecoder>,
    pub width: u32,
    pub height: u32,
}

/// Audio stream parameters for the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
}

/// What the output container should hold.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bitrate_kbps: u32,
    pub format: ContainerFormat,
    pub keyframe_interval: u64,
    pub audio: Option<AudioSpec>,
}

/// A chunk of interleaved float samples.
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    pub samples: &'a [f32],
    pub channels: u16,
    pub sample_rate: u32,
    /// Presentation time of the first sample.
    pub timestamp_us: i64,
}

impl AudioBlock<'_> {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

pub trait OutputWriter: Send {
    /// Submit one composited frame. Timestamps must strictly increase.
    fn encode_video(&mut self, frame: &RgbaImage, timestamp_us: i64, keyframe: bool)
        -> CutroomResult<()>;

    /// Frames submitted but not yet encoded.
    fn pending_video(&self) -> usize;

    /// Let the encoder make progress. Returns frames completed.
    fn poll(&mut self) -> CutroomResult<usize>;

    /// Samples per channel the audio encoder wants per block.
    fn audio_frame_size(&self) -> usize;

    fn encode_audio(&mut self, block: &AudioBlock<'_>) -> CutroomResult<()>;

    /// Drain both encoders, write the trailer, and return the container.
    fn finish(self: Box<Self>) -> CutroomResult<Vec<u8>>;

    /// Drop everything without producing output.
    fn abort(self: Box<Self>);
}

/// Capabilities a backend reports to the selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub hardware_codecs: bool,
    /// Video encoder the backend would use, for display.
    pub video_encoder: Option<String>,
}

pub trait CodecBackend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Demux a video source and open a decoder for it.
    fn open_video(&self, media: &MediaFile) -> CutroomResult<VideoTrackSource>;

    fn open_writer(&self, spec: &OutputSpec) -> CutroomResult<Box<dyn OutputWriter>>;
}

/// Backend used when no in-process codecs are compiled in.
#[derive(Debug, Default)]
pub struct NoCodecs;

impl CodecBackend for NoCodecs {
    fn name(&self) -> &str {
        "none"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn open_video(&self, media: &MediaFile) -> CutroomResult<VideoTrackSource> {
        Err(CutroomError::unavailable(format!(
            "No codec backend to decode {}",
            media.name
        )))
    }

    fn open_writer(&self, _spec: &OutputSpec) -> CutroomResult<Box<dyn OutputWriter>> {
        Err(CutroomError::unavailable("No codec backend to encode output"))
    }
}

/// Video encoder picked for H.264 output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderChoice {
    pub name: String,
    pub hardware: bool,
}

/// First hardware encoder that actually opens, then the software one.
///
/// Being compiled into the codec library is not enough: a build can ship
/// `h264_nvenc` on a host with no such device, so every candidate goes
/// through `opens`.
pub fn choose_h264_encoder(
    hardware: &[&str],
    software: &str,
    mut opens: impl FnMut(&str) -> bool,
) -> Option<EncoderChoice> {
    for &name in hardware {
        if opens(name) {
            return Some(EncoderChoice {
                name: name.to_string(),
                hardware: true,
            });
        }
        tracing::debug!(encoder = name, "Hardware encoder did not open; trying the next one");
    }
    opens(software).then(|| EncoderChoice {
        name: software.to_string(),
        hardware: false,
    })
}

/// The best backend this build offers.
pub fn default_backend() -> Box<dyn CodecBackend> {
    #[cfg(feature = "ffmpeg")]
    {
        match ffmpeg::FfmpegBackend::probe() {
            Ok(backend) => return Box::new(backend),
            Err(e) => {
                tracing::warn!(error = %e, "FFmpeg codec backend unavailable");
            }
        }
    }
    Box::new(NoCodecs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_guard_counts_live_frames() {
        let live = Arc::new(AtomicUsize::new(0));
        let a = DecodedFrame::tracked(RgbaImage::new(2, 2), 0, FrameGuard::new(live.clone()));
        let b = DecodedFrame::tracked(RgbaImage::new(2, 2), 1, FrameGuard::new(live.clone()));
        assert_eq!(live.load(Ordering::SeqCst), 2);
        drop(a);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        drop(b);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_codecs_is_unavailable() {
        let backend = NoCodecs;
        assert!(!backend.capabilities().hardware_codecs);
        let media = MediaFile::video("m", "/x.mp4", 1.0, 2, 2, 30.0);
        let err = backend.open_video(&media).err().unwrap();
        assert_eq!(
            err.class(),
            cutroom_common::error::ErrorClass::Unavailable
        );
    }

    const HW: &[&str] = &["h264_nvenc", "h264_qsv", "h264_amf", "h264_videotoolbox"];

    #[test]
    fn test_encoder_choice_skips_hardware_that_fails_to_open() {
        // Built with nvenc and qsv, but only the software encoder has a device.
        let mut tried = vec![];
        let choice = choose_h264_encoder(HW, "libx264", |name| {
            tried.push(name.to_string());
            name == "libx264"
        })
        .unwrap();
        assert_eq!(choice.name, "libx264");
        assert!(!choice.hardware);
        assert_eq!(
            tried,
            ["h264_nvenc", "h264_qsv", "h264_amf", "h264_videotoolbox", "libx264"]
        );
    }

    #[test]
    fn test_encoder_choice_prefers_first_working_hardware() {
        let choice = choose_h264_encoder(HW, "libx264", |name| {
            name == "h264_amf" || name == "libx264"
        })
        .unwrap();
        assert_eq!(
            choice,
            EncoderChoice {
                name: "h264_amf".into(),
                hardware: true
            }
        );
    }

    #[test]
    fn test_encoder_choice_none_when_nothing_opens() {
        assert_eq!(choose_h264_encoder(HW, "libx264", |_| false), None);
    }

    #[test]
    fn test_audio_block_frames() {
        let samples = [0.0f32; 10];
        let block = AudioBlock {
            samples: &samples,
            channels: 2,
            sample_rate: 48_000,
            timestamp_us: 0,
        };
        assert_eq!(block.frames(), 5);
    }
}
