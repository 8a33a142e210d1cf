//! In-process codecs through the FFmpeg libraries (`ffmpeg-next`).
//!
//! Sources are demuxed up front into a sample table; packets carry their
//! presentation time in microseconds so decoded frames come back in the
//! same units. Output is muxed into a scratch file and read back when the
//! writer finishes.

use std::path::Path;

use ffmpeg::codec;
use ffmpeg::format;
use ffmpeg::media::Type;
use ffmpeg::software::scaling;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::Rescale;
use ffmpeg_next as ffmpeg;
use image::RgbaImage;

use cutroom_common::error::{CutroomError, CutroomResult};
use cutroom_project_model::{ContainerFormat, MediaFile};

use super::{
    choose_h264_encoder, AudioBlock, BackendCapabilities, CodecBackend, DecodedFrame,
    EncodedSample, OutputSpec, OutputWriter, VideoDecoder, VideoTrackSource,
};

/// Hardware H.264 encoders, most preferred first.
const HARDWARE_H264: &[&str] = &["h264_nvenc", "h264_qsv", "h264_amf", "h264_videotoolbox"];
const SOFTWARE_H264: &str = "libx264";
const VP9: &str = "libvpx-vp9";

/// Microsecond time base used for packets and frames.
const MICROS: ffmpeg::Rational = ffmpeg::Rational(1, 1_000_000);

/// Scaling contexts are used from one task at a time.
struct SendScaler(scaling::Context);
// SAFETY: a scaler is owned by one decoder or writer and never shared.
unsafe impl Send for SendScaler {}

impl std::ops::Deref for SendScaler {
    type Target = scaling::Context;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for SendScaler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn ff_err(what: &str) -> impl Fn(ffmpeg::Error) -> String + '_ {
    move |e| format!("{what}: {e}")
}

/// A stream's start time in its own ticks; unset (`AV_NOPTS_VALUE`) is 0.
fn stream_start(ticks: i64) -> i64 {
    if ticks == i64::MIN {
        0
    } else {
        ticks
    }
}

/// Packet time relative to the stream start, in microseconds. Edit lists
/// often start a stream after zero while trims count from its first frame.
fn source_time_us(ticks: i64, start_ticks: i64, time_base: ffmpeg::Rational) -> i64 {
    (ticks - start_ticks).rescale(time_base, MICROS)
}

fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Eof)
        || matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}

/// Whether `name` is compiled in and opens on this host at a tiny size.
fn encoder_opens(name: &str) -> bool {
    let Some(codec) = ffmpeg::encoder::find_by_name(name) else {
        return false;
    };
    let Ok(mut ctx) = codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()
    else {
        return false;
    };
    ctx.set_width(64);
    ctx.set_height(64);
    ctx.set_format(format::Pixel::YUV420P);
    ctx.set_time_base(MICROS);
    ctx.set_frame_rate(Some(ffmpeg::Rational(30, 1)));
    ctx.set_bit_rate(500_000);
    match ctx.open_as(codec) {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!(encoder = name, error = %e, "Encoder failed to open");
            false
        }
    }
}

/// Codec backend over the system FFmpeg libraries.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    h264_encoder: String,
    hardware: bool,
}

impl FfmpegBackend {
    /// Initialize FFmpeg and pick encoders.
    pub fn probe() -> CutroomResult<Self> {
        ffmpeg::init().map_err(|e| CutroomError::unavailable(format!("FFmpeg init: {e}")))?;

        let choice = choose_h264_encoder(HARDWARE_H264, SOFTWARE_H264, encoder_opens)
            .ok_or_else(|| CutroomError::unavailable("FFmpeg has no usable H.264 encoder"))?;
        tracing::info!(
            encoder = %choice.name,
            hardware = choice.hardware,
            "FFmpeg codec backend ready"
        );
        Ok(Self {
            h264_encoder: choice.name,
            hardware: choice.hardware,
        })
    }

    fn video_encoder_for(&self, format: ContainerFormat) -> &str {
        match format {
            ContainerFormat::Mp4 => &self.h264_encoder,
            ContainerFormat::Webm => VP9,
        }
    }
}

impl CodecBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            hardware_codecs: self.hardware,
            video_encoder: Some(self.h264_encoder.clone()),
        }
    }

    fn open_video(&self, media: &MediaFile) -> CutroomResult<VideoTrackSource> {
        let path = Path::new(&media.path);
        if !path.exists() {
            return Err(CutroomError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let mut input = format::input(&path)
            .map_err(|e| CutroomError::decode(ff_err("Open input")(e)))?;
        let stream = input
            .streams()
            .best(Type::Video)
            .ok_or_else(|| CutroomError::decode(format!("{} has no video stream", media.name)))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let start_ticks = stream_start(stream.start_time());

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| CutroomError::decode(ff_err("Open decoder")(e)))?;
        let (width, height) = (decoder.width(), decoder.height());

        let mut samples = vec![];
        for (stream, packet) in input.packets() {
            if stream.index() != stream_index {
                continue;
            }
            let Some(pts) = packet.pts().or(packet.dts()) else {
                continue;
            };
            samples.push(EncodedSample {
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                timestamp_us: source_time_us(pts, start_ticks, time_base),
                duration_us: packet.duration().rescale(time_base, MICROS),
                is_keyframe: packet.is_key(),
            });
        }
        tracing::debug!(
            media = %media.name,
            samples = samples.len(),
            width,
            height,
            "Demuxed video source"
        );

        Ok(VideoTrackSource {
            samples,
            decoder: Box::new(FfmpegDecoder {
                decoder,
                scaler: None,
                pending: 0,
                closed: false,
            }),
            width,
            height,
        })
    }

    fn open_writer(&self, spec: &OutputSpec) -> CutroomResult<Box<dyn OutputWriter>> {
        FfmpegWriter::open(spec, self.video_encoder_for(spec.format))
            .map(|w| Box::new(w) as Box<dyn OutputWriter>)
    }
}

struct FfmpegDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<SendScaler>,
    pending: usize,
    closed: bool,
}

impl FfmpegDecoder {
    fn to_rgba(&mut self, frame: &VideoFrame) -> CutroomResult<RgbaImage> {
        let (w, h) = (frame.width(), frame.height());
        if self.scaler.is_none() {
            let scaler = scaling::Context::get(
                frame.format(),
                w,
                h,
                format::Pixel::RGBA,
                w,
                h,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| CutroomError::decode(ff_err("Scaler init")(e)))?;
            self.scaler = Some(SendScaler(scaler));
        }
        let mut rgba = VideoFrame::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .run(frame, &mut rgba)
                .map_err(|e| CutroomError::decode(ff_err("Scale frame")(e)))?;
        }

        let row = w as usize * 4;
        let stride = rgba.stride(0);
        let data = rgba.data(0);
        let mut buf = Vec::with_capacity(row * h as usize);
        for y in 0..h as usize {
            buf.extend_from_slice(&data[y * stride..y * stride + row]);
        }
        RgbaImage::from_raw(w, h, buf)
            .ok_or_else(|| CutroomError::decode("decoded frame has the wrong size"))
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn decode(&mut self, sample: &EncodedSample) -> CutroomResult<()> {
        if self.closed {
            return Err(CutroomError::decode("decoder is closed"));
        }
        let mut packet = ffmpeg::Packet::copy(&sample.data);
        packet.set_pts(Some(sample.timestamp_us));
        packet.set_duration(sample.duration_us);
        if sample.is_keyframe {
            packet.set_flags(codec::packet::Flags::KEY);
        }
        self.decoder
            .send_packet(&packet)
            .map_err(|e| CutroomError::decode(ff_err("Send packet")(e)))?;
        self.pending += 1;
        Ok(())
    }

    fn pending(&self) -> usize {
        self.pending
    }

    fn next_frame(&mut self) -> CutroomResult<Option<DecodedFrame>> {
        if self.closed {
            return Ok(None);
        }
        let mut frame = VideoFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                self.pending = self.pending.saturating_sub(1);
                let timestamp_us = frame.timestamp().or(frame.pts()).unwrap_or(0);
                let image = self.to_rgba(&frame)?;
                Ok(Some(DecodedFrame::new(image, timestamp_us)))
            }
            Err(e) if is_again(&e) => Ok(None),
            Err(e) => Err(CutroomError::decode(ff_err("Receive frame")(e))),
        }
    }

    fn flush(&mut self) -> CutroomResult<()> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(()),
            Err(e) if is_again(&e) => Ok(()),
            Err(e) => Err(CutroomError::decode(ff_err("Flush decoder")(e))),
        }
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.pending = 0;
    }

    fn close(&mut self) {
        if !self.closed {
            self.decoder.flush();
            self.closed = true;
            self.pending = 0;
        }
    }
}

struct AudioOut {
    encoder: codec::encoder::Audio,
    stream: usize,
    time_base: ffmpeg::Rational,
    frame_size: usize,
    format: format::Sample,
    layout: ffmpeg::ChannelLayout,
    next_pts: i64,
}

struct FfmpegWriter {
    scratch: tempfile::NamedTempFile,
    output: format::context::Output,
    video: codec::encoder::Video,
    video_stream: usize,
    scaler: SendScaler,
    width: u32,
    height: u32,
    audio: Option<AudioOut>,
    submitted: usize,
    written: usize,
}

impl FfmpegWriter {
    fn open(spec: &OutputSpec, video_encoder: &str) -> CutroomResult<Self> {
        let scratch = tempfile::Builder::new()
            .prefix("cutroom-stream-")
            .suffix(&format!(".{}", spec.format.extension()))
            .tempfile()?;
        let mut output = format::output_as(scratch.path(), spec.format.extension())
            .map_err(|e| CutroomError::encode(ff_err("Open output")(e)))?;
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find_by_name(video_encoder).ok_or_else(|| {
            CutroomError::unavailable(format!("Encoder {video_encoder} not found"))
        })?;
        let mut stream = output
            .add_stream(codec)
            .map_err(|e| CutroomError::encode(ff_err("Add video stream")(e)))?;
        let video_stream = stream.index();

        let mut ctx = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| CutroomError::encode(ff_err("Video encoder context")(e)))?;
        ctx.set_width(spec.width);
        ctx.set_height(spec.height);
        ctx.set_format(format::Pixel::YUV420P);
        ctx.set_time_base(MICROS);
        ctx.set_frame_rate(Some(ffmpeg::Rational::from(spec.fps)));
        ctx.set_bit_rate(spec.bitrate_kbps as usize * 1000);
        ctx.set_gop(spec.keyframe_interval.max(1) as u32);
        if global_header {
            ctx.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let mut opts = ffmpeg::Dictionary::new();
        if video_encoder == SOFTWARE_H264 {
            opts.set("preset", "ultrafast");
        }
        let video = ctx
            .open_as_with(codec, opts)
            .map_err(|e| CutroomError::encode(ff_err("Open video encoder")(e)))?;
        stream.set_parameters(&video);
        stream.set_time_base(MICROS);

        let audio = match spec.audio {
            Some(audio) => Some(Self::open_audio(&mut output, spec.format, audio, global_header)?),
            None => None,
        };

        output
            .write_header()
            .map_err(|e| CutroomError::encode(ff_err("Write header")(e)))?;

        let scaler = scaling::Context::get(
            format::Pixel::RGBA,
            spec.width,
            spec.height,
            format::Pixel::YUV420P,
            spec.width,
            spec.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| CutroomError::encode(ff_err("Scaler init")(e)))?;

        tracing::info!(
            encoder = video_encoder,
            path = %scratch.path().display(),
            audio = audio.is_some(),
            "Opened FFmpeg output"
        );
        Ok(Self {
            scratch,
            output,
            video,
            video_stream,
            scaler: SendScaler(scaler),
            width: spec.width,
            height: spec.height,
            audio,
            submitted: 0,
            written: 0,
        })
    }

    fn open_audio(
        output: &mut format::context::Output,
        container: ContainerFormat,
        spec: super::AudioSpec,
        global_header: bool,
    ) -> CutroomResult<AudioOut> {
        let name = match container {
            ContainerFormat::Mp4 => "aac",
            ContainerFormat::Webm => "libopus",
        };
        let codec = ffmpeg::encoder::find_by_name(name)
            .ok_or_else(|| CutroomError::unavailable(format!("Audio encoder {name} not found")))?;
        let format = codec
            .audio()
            .ok()
            .and_then(|a| a.formats())
            .and_then(|mut formats| {
                formats.find(|f| matches!(f, format::Sample::F32(_)))
            })
            .unwrap_or(format::Sample::F32(format::sample::Type::Planar));
        let layout = if spec.channels == 1 {
            ffmpeg::ChannelLayout::MONO
        } else {
            ffmpeg::ChannelLayout::STEREO
        };
        let time_base = ffmpeg::Rational(1, spec.sample_rate as i32);

        let mut stream = output
            .add_stream(codec)
            .map_err(|e| CutroomError::encode(ff_err("Add audio stream")(e)))?;
        let index = stream.index();
        let mut ctx = codec::context::Context::new_with_codec(codec)
            .encoder()
            .audio()
            .map_err(|e| CutroomError::encode(ff_err("Audio encoder context")(e)))?;
        ctx.set_rate(spec.sample_rate as i32);
        ctx.set_channel_layout(layout);
        ctx.set_format(format);
        ctx.set_bit_rate(spec.bitrate_kbps as usize * 1000);
        ctx.set_time_base(time_base);
        if global_header {
            ctx.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let encoder = ctx
            .open_as(codec)
            .map_err(|e| CutroomError::encode(ff_err("Open audio encoder")(e)))?;
        stream.set_parameters(&encoder);
        let frame_size = match encoder.frame_size() {
            0 => 1024,
            n => n as usize,
        };
        Ok(AudioOut {
            encoder,
            stream: index,
            time_base,
            frame_size,
            format,
            layout,
            next_pts: 0,
        })
    }

    fn drain_video(&mut self) -> CutroomResult<usize> {
        let dst = self
            .output
            .stream(self.video_stream)
            .map(|s| s.time_base())
            .unwrap_or(MICROS);
        let mut count = 0;
        let mut packet = ffmpeg::Packet::empty();
        while self.video.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.video_stream);
            packet.rescale_ts(MICROS, dst);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| CutroomError::encode(ff_err("Write video packet")(e)))?;
            count += 1;
        }
        self.written += count;
        Ok(count)
    }

    fn drain_audio(&mut self) -> CutroomResult<()> {
        let Some(audio) = self.audio.as_mut() else {
            return Ok(());
        };
        let dst = self
            .output
            .stream(audio.stream)
            .map(|s| s.time_base())
            .unwrap_or(audio.time_base);
        let mut packet = ffmpeg::Packet::empty();
        while audio.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(audio.stream);
            packet.rescale_ts(audio.time_base, dst);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| CutroomError::encode(ff_err("Write audio packet")(e)))?;
        }
        Ok(())
    }
}

impl OutputWriter for FfmpegWriter {
    fn encode_video(
        &mut self,
        frame: &RgbaImage,
        timestamp_us: i64,
        keyframe: bool,
    ) -> CutroomResult<()> {
        let (w, h) = (self.width, self.height);
        let mut rgba = VideoFrame::new(format::Pixel::RGBA, w, h);
        let stride = rgba.stride(0);
        let row = w as usize * 4;
        let src = frame.as_raw();
        let dst = rgba.data_mut(0);
        for y in 0..h as usize {
            dst[y * stride..y * stride + row].copy_from_slice(&src[y * row..(y + 1) * row]);
        }

        let mut yuv = VideoFrame::empty();
        self.scaler
            .run(&rgba, &mut yuv)
            .map_err(|e| CutroomError::encode(ff_err("Scale frame")(e)))?;
        yuv.set_pts(Some(timestamp_us));
        if keyframe {
            yuv.set_kind(ffmpeg::picture::Type::I);
        }
        self.video
            .send_frame(&yuv)
            .map_err(|e| CutroomError::encode(ff_err("Send frame")(e)))?;
        self.submitted += 1;
        self.drain_video()?;
        Ok(())
    }

    fn pending_video(&self) -> usize {
        self.submitted.saturating_sub(self.written)
    }

    fn poll(&mut self) -> CutroomResult<usize> {
        self.drain_video()
    }

    fn audio_frame_size(&self) -> usize {
        self.audio.as_ref().map(|a| a.frame_size).unwrap_or(1024)
    }

    fn encode_audio(&mut self, block: &AudioBlock<'_>) -> CutroomResult<()> {
        let Some(audio) = self.audio.as_mut() else {
            return Err(CutroomError::encode("output has no audio stream"));
        };
        let channels = block.channels.max(1) as usize;
        let frames = block.frames();
        let mut frame = AudioFrame::new(audio.format, frames, audio.layout);
        frame.set_rate(block.sample_rate);
        match audio.format {
            format::Sample::F32(format::sample::Type::Planar) => {
                for ch in 0..channels {
                    let plane = frame.plane_mut::<f32>(ch);
                    for (i, out) in plane.iter_mut().enumerate().take(frames) {
                        *out = block.samples[i * channels + ch];
                    }
                }
            }
            format::Sample::F32(format::sample::Type::Packed) => {
                let data = frame.data_mut(0);
                for (i, sample) in block.samples.iter().enumerate() {
                    data[i * 4..i * 4 + 4].copy_from_slice(&sample.to_ne_bytes());
                }
            }
            other => {
                return Err(CutroomError::encode(format!(
                    "unsupported audio sample format {other:?}"
                )))
            }
        }
        frame.set_pts(Some(audio.next_pts));
        audio.next_pts += frames as i64;
        audio
            .encoder
            .send_frame(&frame)
            .map_err(|e| CutroomError::encode(ff_err("Send audio frame")(e)))?;
        self.drain_audio()
    }

    fn finish(mut self: Box<Self>) -> CutroomResult<Vec<u8>> {
        self.video
            .send_eof()
            .map_err(|e| CutroomError::encode(ff_err("Flush video encoder")(e)))?;
        self.drain_video()?;
        if let Some(audio) = self.audio.as_mut() {
            audio
                .encoder
                .send_eof()
                .map_err(|e| CutroomError::encode(ff_err("Flush audio encoder")(e)))?;
        }
        self.drain_audio()?;
        self.output
            .write_trailer()
            .map_err(|e| CutroomError::encode(ff_err("Write trailer")(e)))?;
        let bytes = std::fs::read(self.scratch.path())?;
        tracing::debug!(bytes = bytes.len(), frames = self.written, "FFmpeg output finished");
        Ok(bytes)
    }

    fn abort(self: Box<Self>) {
        tracing::debug!(
            path = %self.scratch.path().display(),
            "Discarding unfinished FFmpeg output"
        );
    }
}
