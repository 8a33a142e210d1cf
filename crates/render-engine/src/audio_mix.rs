//! Offline audio mixer.
//!
//! Every audible clip on an audio track is rendered into one buffer at the
//! canonical rate and channel count. Speed is a playback-rate change with
//! linear interpolation, reverse reads the source backwards, and overlaps
//! add. Samples are not clamped here; the encoder input is.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use cutroom_common::error::{CutroomError, CutroomResult};
use cutroom_project_model::timing::resolve_clip;
use cutroom_project_model::transition::clip_envelope;
use cutroom_project_model::{MediaFile, Project};

use crate::cancel::CancelFlag;

/// Fully decoded PCM, interleaved.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Convert to `channels` output channels.
    pub fn remix(self, channels: u16) -> DecodedAudio {
        if self.channels == channels || self.channels == 0 {
            return self;
        }
        let src = self.channels as usize;
        let dst = channels as usize;
        let frames = self.frames();
        let mut out = Vec::with_capacity(frames * dst);
        for frame in self.samples.chunks_exact(src) {
            for c in 0..dst {
                let value = if src == 1 {
                    frame[0]
                } else if dst == 1 {
                    frame.iter().sum::<f32>() / src as f32
                } else {
                    frame[c.min(src - 1)]
                };
                out.push(value);
            }
        }
        DecodedAudio {
            samples: out,
            sample_rate: self.sample_rate,
            channels,
        }
    }

    /// Linearly interpolated sample at fractional frame `pos`; silence
    /// outside the decoded range.
    fn sample_at(&self, pos: f64, channel: usize) -> f32 {
        let frames = self.frames();
        if frames == 0 || pos < 0.0 || pos >= frames as f64 {
            return 0.0;
        }
        let ch = self.channels as usize;
        let i0 = pos.floor() as usize;
        let i1 = (i0 + 1).min(frames - 1);
        let frac = (pos - i0 as f64) as f32;
        let a = self.samples[i0 * ch + channel];
        let b = self.samples[i1 * ch + channel];
        a + (b - a) * frac
    }
}

/// Decodes a whole audio source into memory.
pub trait AudioSourceDecoder: Send + Sync {
    fn decode(&self, media: &MediaFile) -> CutroomResult<DecodedAudio>;
}

/// Symphonia-backed decoder with gapless trimming disabled, so encoder
/// priming stays in the output and is removed by the mixer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl AudioSourceDecoder for SymphoniaDecoder {
    fn decode(&self, media: &MediaFile) -> CutroomResult<DecodedAudio> {
        decode_file(Path::new(&media.path))
    }
}

fn decode_file(path: &Path) -> CutroomResult<DecodedAudio> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CutroomError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            CutroomError::Io(e)
        }
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let fmt_opts = FormatOptions {
        enable_gapless: false,
        ..Default::default()
    };
    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &MetadataOptions::default())
        .map_err(|e| CutroomError::audio(format!("Probe {}: {e}", path.display())))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| CutroomError::audio(format!("No audio track in {}", path.display())))?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(48_000);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| CutroomError::audio(format!("Open decoder for {}: {e}", path.display())))?;

    let mut samples = Vec::new();
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => {
                return Err(CutroomError::audio(format!(
                    "Read {}: {e}",
                    path.display()
                )))
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count() as u16;
                let buf = buffer.get_or_insert_with(|| {
                    SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
                });
                if buf.capacity() < decoded.capacity() * spec.channels.count() {
                    *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                }
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping undecodable audio packet");
            }
            Err(e) => {
                return Err(CutroomError::audio(format!(
                    "Decode {}: {e}",
                    path.display()
                )))
            }
        }
    }

    if channels == 0 {
        return Err(CutroomError::audio(format!(
            "Unknown channel layout in {}",
            path.display()
        )));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// The mixed timeline audio.
#[derive(Debug, Clone, PartialEq)]
pub struct MixBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MixBuffer {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample value at `time` seconds on `channel`.
    pub fn sample_at_time(&self, time: f64, channel: usize) -> f32 {
        let frame = (time * self.sample_rate as f64).floor() as usize;
        self.samples
            .get(frame * self.channels as usize + channel)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Render every audible audio-track clip of `project` into one buffer of
/// exactly the project duration.
pub fn mix_project_audio(
    project: &Project,
    decoder: &dyn AudioSourceDecoder,
    sample_rate: u32,
    channels: u16,
    cancel: &CancelFlag,
) -> CutroomResult<MixBuffer> {
    let sr = sample_rate as f64;
    let ch = channels as usize;
    let total_frames = (project.duration() * sr).ceil() as usize;
    let mut out = vec![0.0f32; total_frames * ch];
    let mut sources: HashMap<String, DecodedAudio> = HashMap::new();

    for (track_index, track, clip, media) in project.placed_clips() {
        if !track.is_audio() || track.muted {
            continue;
        }
        cancel.check()?;

        if !sources.contains_key(&media.id) {
            let decoded = decoder.decode(media)?.remix(channels);
            sources.insert(media.id.clone(), decoded);
        }
        let Some(source) = sources.get(&media.id) else {
            continue;
        };

        let timing = resolve_clip(clip, media);
        let clip_duration = timing.timeline_duration();
        if clip_duration <= 0.0 || source.sample_rate == 0 {
            continue;
        }

        let src_rate = source.sample_rate as f64;
        let priming = (source.duration() - media.duration).max(0.0);
        let skip_frames = (priming * src_rate).round();

        let first = (timing.start * sr).round().max(0.0) as usize;
        let last = ((timing.end * sr).round().max(0.0) as usize).min(total_frames);
        let transitions: Vec<_> = project.transitions_for(&clip.id).collect();

        tracing::debug!(
            clip = %clip.id,
            track = track_index,
            first,
            last,
            priming_secs = priming,
            "Mixing audio clip"
        );

        for n in first..last {
            let t = n as f64 / sr;
            let pos = skip_frames + timing.source_time(t) * src_rate;
            let gain = if transitions.is_empty() {
                1.0
            } else {
                clip_envelope(transitions.iter().copied(), t - timing.start, clip_duration) as f32
            };
            let base = n * ch;
            for c in 0..ch {
                out[base + c] += source.sample_at(pos, c) * gain;
            }
        }
    }

    Ok(MixBuffer {
        samples: out,
        sample_rate,
        channels,
    })
}

/// Copy of `samples` limited to `[-1, 1]`, ready for an encoder.
pub fn clamp_for_encode(samples: &[f32]) -> Vec<f32> {
    samples.iter().map(|s| s.clamp(-1.0, 1.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::synthetic::SyntheticAudio;
    use cutroom_project_model::{Clip, MediaKind, Track, Transition, TransitionKind};

    const RATE: u32 = 8_000;

    fn project_with(clips: Vec<(Clip, MediaFile)>) -> Project {
        let mut project = Project::new("mix", 30.0);
        let mut track = Track::new("a1", MediaKind::Audio);
        for (clip, media) in clips {
            if project.media(&media.id).is_none() {
                project.media_files.push(media);
            }
            track.clips.push(clip);
        }
        project.tracks.push(track);
        project
    }

    #[test]
    fn test_overlapping_clips_add() {
        let project = project_with(vec![
            (Clip::new("c1", "a", 0.0), MediaFile::audio("a", "a.wav", 3.0)),
            (Clip::new("c2", "b", 2.0), MediaFile::audio("b", "b.wav", 3.0)),
        ]);
        let audio = SyntheticAudio::new()
            .with_constant("a", 0.25, 3.0, RATE, 2)
            .with_constant("b", 0.5, 3.0, RATE, 2);

        let mix = mix_project_audio(&project, &audio, RATE, 2, &CancelFlag::new()).unwrap();
        assert!((mix.duration() - 5.0).abs() < 1e-9);
        assert!((mix.sample_at_time(1.0, 0) - 0.25).abs() < 1e-6);
        assert!((mix.sample_at_time(2.5, 1) - 0.75).abs() < 1e-6);
        assert!((mix.sample_at_time(4.0, 0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_priming_excess_is_skipped() {
        // One second of silence priming, then a ramp.
        let mut samples = vec![0.0f32; RATE as usize];
        samples.extend((0..RATE * 2).map(|i| i as f32 / (RATE * 2) as f32));
        let decoded = DecodedAudio {
            samples,
            sample_rate: RATE,
            channels: 1,
        };
        let project = project_with(vec![(
            Clip::new("c1", "a", 0.0),
            MediaFile::audio("a", "a.m4a", 2.0),
        )]);
        let audio = SyntheticAudio::new().with_source("a", decoded);
        let mix = mix_project_audio(&project, &audio, RATE, 1, &CancelFlag::new()).unwrap();
        assert!((mix.duration() - 2.0).abs() < 1e-9);
        assert!((mix.sample_at_time(1.0, 0) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_speed_and_reverse() {
        let ramp = DecodedAudio {
            samples: (0..RATE * 4).map(|i| i as f32 / RATE as f32).collect(),
            sample_rate: RATE,
            channels: 1,
        };
        let fast = Clip::new("c1", "a", 0.0).with_speed(2.0);
        let project = project_with(vec![(fast, MediaFile::audio("a", "a.wav", 4.0))]);
        let audio = SyntheticAudio::new().with_source("a", ramp.clone());
        let mix = mix_project_audio(&project, &audio, RATE, 1, &CancelFlag::new()).unwrap();
        assert!((mix.duration() - 2.0).abs() < 1e-9);
        // At t=1 a 2x clip plays source second 2.
        assert!((mix.sample_at_time(1.0, 0) - 2.0).abs() < 1e-3);

        let reversed = Clip::new("c1", "a", 0.0).reversed();
        let project = project_with(vec![(reversed, MediaFile::audio("a", "a.wav", 4.0))]);
        let mix = mix_project_audio(&project, &audio, RATE, 1, &CancelFlag::new()).unwrap();
        assert!((mix.sample_at_time(1.0, 0) - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_muted_tracks_and_fade() {
        let mut project = project_with(vec![(
            Clip::new("c1", "a", 0.0),
            MediaFile::audio("a", "a.wav", 2.0),
        )]);
        project.transitions.push(Transition {
            id: "t".into(),
            clip_id: "c1".into(),
            kind: TransitionKind::FadeIn,
            duration: 1.0,
        });
        let audio = SyntheticAudio::new().with_constant("a", 1.0, 2.0, RATE, 1);
        let mix = mix_project_audio(&project, &audio, RATE, 1, &CancelFlag::new()).unwrap();
        assert!((mix.sample_at_time(0.5, 0) - 0.5).abs() < 1e-3);
        assert!((mix.sample_at_time(1.5, 0) - 1.0).abs() < 1e-6);

        project.tracks[0].muted = true;
        let mix = mix_project_audio(&project, &audio, RATE, 1, &CancelFlag::new()).unwrap();
        assert!(mix.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_cancelled_mix() {
        let project = project_with(vec![(
            Clip::new("c1", "a", 0.0),
            MediaFile::audio("a", "a.wav", 1.0),
        )]);
        let audio = SyntheticAudio::new().with_constant("a", 1.0, 1.0, RATE, 1);
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            mix_project_audio(&project, &audio, RATE, 1, &cancel),
            Err(CutroomError::Cancelled)
        ));
    }

    #[test]
    fn test_remix_and_clamp() {
        let mono = DecodedAudio {
            samples: vec![0.5, -0.5],
            sample_rate: RATE,
            channels: 1,
        };
        assert_eq!(mono.clone().remix(2).samples, vec![0.5, 0.5, -0.5, -0.5]);
        let stereo = DecodedAudio {
            samples: vec![1.0, 0.0],
            sample_rate: RATE,
            channels: 2,
        };
        assert_eq!(stereo.remix(1).samples, vec![0.5]);
        assert_eq!(clamp_for_encode(&[1.5, -2.0, 0.25]), vec![1.0, -1.0, 0.25]);
    }
}
