//! Deterministic in-memory codec backend.
//!
//! Sources are registered by media id and produce solid-colour frames whose
//! colour encodes the source frame index. The decoder holds back
//! `reorder_depth` frames like a B-frame decoder, and the writer completes
//! one frame per `poll` so backpressure is observable. The output container
//! is JSON and can be read back with [`SyntheticContainer::parse`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use cutroom_common::clock::{frame_duration_us, frame_timestamp_us};
use cutroom_common::error::{CutroomError, CutroomResult};
use cutroom_project_model::MediaFile;

use super::{
    AudioBlock, BackendCapabilities, CodecBackend, DecodedFrame, EncodedSample, FrameGuard,
    OutputSpec, OutputWriter, VideoDecoder, VideoTrackSource,
};
use crate::audio_mix::{AudioSourceDecoder, DecodedAudio};

/// Shape of a synthetic video source.
#[derive(Debug, Clone)]
pub struct SyntheticMedia {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration: f64,
    /// Keyframe spacing in frames.
    pub gop: usize,
    /// Frames held back until later input arrives.
    pub reorder_depth: usize,
    /// Never emit a frame.
    pub stall: bool,
    /// Fail when this source frame index is decoded.
    pub corrupt_frame: Option<u64>,
}

impl SyntheticMedia {
    pub fn new(width: u32, height: u32, fps: f64, duration: f64) -> Self {
        Self {
            width,
            height,
            fps,
            duration,
            gop: 15,
            reorder_depth: 2,
            stall: false,
            corrupt_frame: None,
        }
    }

    pub fn with_gop(mut self, gop: usize) -> Self {
        self.gop = gop.max(1);
        self
    }

    pub fn with_reorder_depth(mut self, depth: usize) -> Self {
        self.reorder_depth = depth;
        self
    }

    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn corrupt_at(mut self, frame: u64) -> Self {
        self.corrupt_frame = Some(frame);
        self
    }

    fn frame_count(&self) -> u64 {
        (self.duration * self.fps - 1e-6).ceil().max(0.0) as u64
    }

    fn samples(&self) -> Vec<EncodedSample> {
        let duration_us = frame_duration_us(self.fps);
        (0..self.frame_count())
            .map(|i| EncodedSample {
                data: i.to_le_bytes().to_vec(),
                timestamp_us: frame_timestamp_us(i, self.fps),
                duration_us,
                is_keyframe: i as usize % self.gop == 0,
            })
            .collect()
    }
}

/// Colour of synthetic source frame `index`.
pub fn synthetic_color(index: u64) -> [u8; 4] {
    [
        (index * 37 % 251) as u8,
        (index * 11 % 241) as u8,
        (index * 5 % 239) as u8,
        255,
    ]
}

/// Resource counters shared by everything a backend hands out.
#[derive(Debug, Default)]
pub struct SyntheticStats {
    decoders_opened: AtomicUsize,
    decoders_closed: AtomicUsize,
    decoder_resets: AtomicUsize,
    live_frames: Arc<AtomicUsize>,
    writers_opened: AtomicUsize,
    writers_finished: AtomicUsize,
    writers_aborted: AtomicUsize,
    max_pending_video: AtomicUsize,
}

impl SyntheticStats {
    pub fn decoders_opened(&self) -> usize {
        self.decoders_opened.load(Ordering::SeqCst)
    }

    pub fn decoders_closed(&self) -> usize {
        self.decoders_closed.load(Ordering::SeqCst)
    }

    pub fn decoder_resets(&self) -> usize {
        self.decoder_resets.load(Ordering::SeqCst)
    }

    /// Decoded frames not yet dropped.
    pub fn live_frames(&self) -> usize {
        self.live_frames.load(Ordering::SeqCst)
    }

    pub fn writers_opened(&self) -> usize {
        self.writers_opened.load(Ordering::SeqCst)
    }

    pub fn writers_finished(&self) -> usize {
        self.writers_finished.load(Ordering::SeqCst)
    }

    pub fn writers_aborted(&self) -> usize {
        self.writers_aborted.load(Ordering::SeqCst)
    }

    /// Largest encoder queue seen right after a submit.
    pub fn max_pending_video(&self) -> usize {
        self.max_pending_video.load(Ordering::SeqCst)
    }
}

pub struct SyntheticBackend {
    media: HashMap<String, SyntheticMedia>,
    stats: Arc<SyntheticStats>,
    hardware: bool,
    audio_frame_size: usize,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            media: HashMap::new(),
            stats: Arc::new(SyntheticStats::default()),
            hardware: true,
            audio_frame_size: 1024,
        }
    }

    pub fn with_media(mut self, media_id: impl Into<String>, media: SyntheticMedia) -> Self {
        self.media.insert(media_id.into(), media);
        self
    }

    /// Report no hardware codecs to the selector.
    pub fn without_hardware(mut self) -> Self {
        self.hardware = false;
        self
    }

    pub fn stats(&self) -> Arc<SyntheticStats> {
        self.stats.clone()
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            hardware_codecs: self.hardware,
            video_encoder: Some("synthetic".to_string()),
        }
    }

    fn open_video(&self, media: &MediaFile) -> CutroomResult<VideoTrackSource> {
        let source = self.media.get(&media.id).ok_or_else(|| CutroomError::FileNotFound {
            path: media.path.clone().into(),
        })?;
        self.stats.decoders_opened.fetch_add(1, Ordering::SeqCst);
        Ok(VideoTrackSource {
            samples: source.samples(),
            decoder: Box::new(SyntheticDecoder {
                width: source.width,
                height: source.height,
                reorder_depth: source.reorder_depth,
                stall: source.stall,
                corrupt_frame: source.corrupt_frame,
                inflight: VecDeque::new(),
                need_keyframe: true,
                flushing: false,
                closed: false,
                stats: self.stats.clone(),
            }),
            width: source.width,
            height: source.height,
        })
    }

    fn open_writer(&self, spec: &OutputSpec) -> CutroomResult<Box<dyn OutputWriter>> {
        self.stats.writers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticWriter {
            spec: spec.clone(),
            pending: VecDeque::new(),
            done: vec![],
            last_timestamp_us: None,
            audio: spec.audio.map(|a| SyntheticAudioTrack {
                sample_rate: a.sample_rate,
                channels: a.channels,
                frames: 0,
                blocks: 0,
                peak: 0.0,
            }),
            audio_frame_size: self.audio_frame_size,
            stats: self.stats.clone(),
        }))
    }
}

struct SyntheticDecoder {
    width: u32,
    height: u32,
    reorder_depth: usize,
    stall: bool,
    corrupt_frame: Option<u64>,
    inflight: VecDeque<(i64, u64)>,
    need_keyframe: bool,
    flushing: bool,
    closed: bool,
    stats: Arc<SyntheticStats>,
}

impl SyntheticDecoder {
    fn make_frame(&self, timestamp_us: i64, index: u64) -> DecodedFrame {
        let image = RgbaImage::from_pixel(self.width, self.height, Rgba(synthetic_color(index)));
        DecodedFrame::tracked(
            image,
            timestamp_us,
            FrameGuard::new(self.stats.live_frames.clone()),
        )
    }
}

impl VideoDecoder for SyntheticDecoder {
    fn decode(&mut self, sample: &EncodedSample) -> CutroomResult<()> {
        if self.closed {
            return Err(CutroomError::decode("decoder is closed"));
        }
        if self.need_keyframe && !sample.is_keyframe {
            return Err(CutroomError::decode(format!(
                "sample at {}us is not a keyframe",
                sample.timestamp_us
            )));
        }
        let bytes: [u8; 8] = sample
            .data
            .as_slice()
            .try_into()
            .map_err(|_| CutroomError::decode("malformed synthetic sample"))?;
        let index = u64::from_le_bytes(bytes);
        if self.corrupt_frame == Some(index) {
            return Err(CutroomError::decode(format!("corrupt sample {index}")));
        }
        self.need_keyframe = false;
        self.inflight.push_back((sample.timestamp_us, index));
        Ok(())
    }

    fn pending(&self) -> usize {
        self.inflight.len()
    }

    fn next_frame(&mut self) -> CutroomResult<Option<DecodedFrame>> {
        if self.closed || self.stall {
            return Ok(None);
        }
        let ready = self.inflight.len() > self.reorder_depth
            || (self.flushing && !self.inflight.is_empty());
        if !ready {
            return Ok(None);
        }
        Ok(self
            .inflight
            .pop_front()
            .map(|(ts, index)| self.make_frame(ts, index)))
    }

    fn flush(&mut self) -> CutroomResult<()> {
        self.flushing = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.inflight.clear();
        self.need_keyframe = true;
        self.flushing = false;
        self.stats.decoder_resets.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inflight.clear();
            self.stats.decoders_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// One encoded frame in a synthetic container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticVideoFrame {
    pub timestamp_us: i64,
    pub keyframe: bool,
    /// Centre pixel of the submitted frame.
    pub color: [u8; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticAudioTrack {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel.
    pub frames: u64,
    pub blocks: u64,
    pub peak: f32,
}

/// The bytes a synthetic writer produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticContainer {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video: Vec<SyntheticVideoFrame>,
    pub audio: Option<SyntheticAudioTrack>,
}

impl SyntheticContainer {
    pub fn parse(bytes: &[u8]) -> CutroomResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

struct SyntheticWriter {
    spec: OutputSpec,
    pending: VecDeque<SyntheticVideoFrame>,
    done: Vec<SyntheticVideoFrame>,
    last_timestamp_us: Option<i64>,
    audio: Option<SyntheticAudioTrack>,
    audio_frame_size: usize,
    stats: Arc<SyntheticStats>,
}

impl OutputWriter for SyntheticWriter {
    fn encode_video(
        &mut self,
        frame: &RgbaImage,
        timestamp_us: i64,
        keyframe: bool,
    ) -> CutroomResult<()> {
        if frame.width() != self.spec.width || frame.height() != self.spec.height {
            return Err(CutroomError::encode(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.spec.width,
                self.spec.height
            )));
        }
        if self.last_timestamp_us.is_some_and(|last| timestamp_us <= last) {
            return Err(CutroomError::encode(format!(
                "timestamp {timestamp_us}us is not after the previous frame"
            )));
        }
        self.last_timestamp_us = Some(timestamp_us);
        let color = frame
            .get_pixel(frame.width() / 2, frame.height() / 2)
            .0;
        self.pending.push_back(SyntheticVideoFrame {
            timestamp_us,
            keyframe,
            color,
        });
        self.stats
            .max_pending_video
            .fetch_max(self.pending.len(), Ordering::SeqCst);
        Ok(())
    }

    fn pending_video(&self) -> usize {
        self.pending.len()
    }

    fn poll(&mut self) -> CutroomResult<usize> {
        match self.pending.pop_front() {
            Some(frame) => {
                self.done.push(frame);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn audio_frame_size(&self) -> usize {
        self.audio_frame_size
    }

    fn encode_audio(&mut self, block: &AudioBlock<'_>) -> CutroomResult<()> {
        let track = self
            .audio
            .as_mut()
            .ok_or_else(|| CutroomError::encode("output has no audio stream"))?;
        if block.channels != track.channels || block.sample_rate != track.sample_rate {
            return Err(CutroomError::encode(format!(
                "audio block is {}ch@{}Hz, stream is {}ch@{}Hz",
                block.channels, block.sample_rate, track.channels, track.sample_rate
            )));
        }
        track.frames += block.frames() as u64;
        track.blocks += 1;
        track.peak = block
            .samples
            .iter()
            .fold(track.peak, |peak, s| peak.max(s.abs()));
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> CutroomResult<Vec<u8>> {
        while self.poll()? > 0 {}
        let container = SyntheticContainer {
            mime: self.spec.format.mime().to_string(),
            width: self.spec.width,
            height: self.spec.height,
            fps: self.spec.fps,
            video: std::mem::take(&mut self.done),
            audio: self.audio.take(),
        };
        self.stats.writers_finished.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::to_vec(&container)?)
    }

    fn abort(self: Box<Self>) {
        self.stats.writers_aborted.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory audio sources keyed by media id.
#[derive(Debug, Default)]
pub struct SyntheticAudio {
    sources: HashMap<String, DecodedAudio>,
}

impl SyntheticAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, media_id: impl Into<String>, audio: DecodedAudio) -> Self {
        self.sources.insert(media_id.into(), audio);
        self
    }

    /// A source holding `value` in every sample.
    pub fn with_constant(
        self,
        media_id: impl Into<String>,
        value: f32,
        seconds: f64,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        let frames = (seconds * sample_rate as f64).round() as usize;
        self.with_source(
            media_id,
            DecodedAudio {
                samples: vec![value; frames * channels as usize],
                sample_rate,
                channels,
            },
        )
    }
}

impl AudioSourceDecoder for SyntheticAudio {
    fn decode(&self, media: &MediaFile) -> CutroomResult<DecodedAudio> {
        self.sources
            .get(&media.id)
            .cloned()
            .ok_or_else(|| CutroomError::FileNotFound {
                path: media.path.clone().into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutroom_project_model::ContainerFormat;

    fn backend() -> SyntheticBackend {
        SyntheticBackend::new().with_media("m1", SyntheticMedia::new(8, 8, 30.0, 1.0).with_gop(10))
    }

    fn media() -> MediaFile {
        MediaFile::video("m1", "/synthetic/m1.mp4", 1.0, 8, 8, 30.0)
    }

    #[test]
    fn test_samples_and_keyframes() {
        let source = backend().open_video(&media()).unwrap();
        assert_eq!(source.samples.len(), 30);
        assert!(source.samples[0].is_keyframe);
        assert!(source.samples[10].is_keyframe);
        assert!(!source.samples[11].is_keyframe);
        assert_eq!(source.samples[3].timestamp_us, 100_000);
    }

    #[test]
    fn test_decoder_requires_keyframe_first() {
        let mut source = backend().open_video(&media()).unwrap();
        let err = source.decoder.decode(&source.samples[1]).unwrap_err();
        assert!(matches!(err, CutroomError::Decode { .. }));
    }

    #[test]
    fn test_decoder_reorder_delay_and_flush() {
        let backend = backend();
        let stats = backend.stats();
        let mut source = backend.open_video(&media()).unwrap();
        for sample in &source.samples[..3] {
            source.decoder.decode(sample).unwrap();
        }
        // Depth 2 holds back two frames.
        let first = source.decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.timestamp_us, 0);
        assert_eq!(first.image.get_pixel(0, 0).0, synthetic_color(0));
        assert!(source.decoder.next_frame().unwrap().is_none());
        assert_eq!(source.decoder.pending(), 2);

        source.decoder.flush().unwrap();
        let mut rest = vec![];
        while let Some(frame) = source.decoder.next_frame().unwrap() {
            rest.push(frame);
        }
        assert_eq!(rest.len(), 2);
        assert_eq!(stats.live_frames(), 3);
        drop(first);
        drop(rest);
        assert_eq!(stats.live_frames(), 0);

        source.decoder.close();
        source.decoder.close();
        assert_eq!(stats.decoders_opened(), 1);
        assert_eq!(stats.decoders_closed(), 1);
    }

    #[test]
    fn test_writer_backpressure_and_container() {
        let backend = backend();
        let spec = OutputSpec {
            width: 4,
            height: 4,
            fps: 30.0,
            bitrate_kbps: 1000,
            format: ContainerFormat::Webm,
            keyframe_interval: 60,
            audio: None,
        };
        let mut writer = backend.open_writer(&spec).unwrap();
        let frame = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        writer.encode_video(&frame, 0, true).unwrap();
        writer.encode_video(&frame, 33_333, false).unwrap();
        assert_eq!(writer.pending_video(), 2);
        assert_eq!(writer.poll().unwrap(), 1);
        assert_eq!(writer.pending_video(), 1);
        assert!(writer.encode_video(&frame, 33_333, false).is_err());
        assert!(writer
            .encode_audio(&AudioBlock {
                samples: &[0.0; 4],
                channels: 2,
                sample_rate: 48_000,
                timestamp_us: 0
            })
            .is_err());

        let bytes = writer.finish().unwrap();
        let container = SyntheticContainer::parse(&bytes).unwrap();
        assert_eq!(container.mime, "video/webm");
        assert_eq!(container.video.len(), 2);
        assert!(container.video[0].keyframe);
        assert_eq!(container.video[1].color, [1, 2, 3, 255]);
    }
}
