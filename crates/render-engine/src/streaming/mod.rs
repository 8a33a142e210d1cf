//! Streaming codec pipeline.
//!
//! Renders a project frame by frame in-process: every active clip's source
//! is demuxed and decoded through a [`ClipSlot`], the picked frames are
//! composited onto one canvas, and the canvas is handed to the output
//! encoder. The mixed audio follows the video into the same container.
//!
//! ```text
//! samples ─▶ decoder ─▶ frame FIFO ─▶ pick ─┐
//! samples ─▶ decoder ─▶ frame FIFO ─▶ pick ─┼─▶ canvas ─▶ encoder ─▶ mux
//!                                 text ─────┘                 ▲
//! audio clips ─▶ offline mix ─────────────────────────────────┘
//! ```

pub mod frames;
pub mod samples;
pub mod slot;

use std::time::Duration;

use cutroom_common::clock::{frame_timestamp_us, secs_to_us, Clock, Deadline};
use cutroom_common::error::{CutroomError, CutroomResult};
use cutroom_project_model::timing::{resolve_clip, ClipTiming};
use cutroom_project_model::{
    clip_envelope, Clip, MediaFile, Project, ProjectFeatures, RenderSettings, TextOverlay,
    Transition,
};

use crate::audio_mix::{clamp_for_encode, mix_project_audio};
use crate::cancel::CancelFlag;
use crate::codec::{AudioBlock, AudioSpec, OutputSpec, OutputWriter};
use crate::compositor::{Canvas, ClipLayer};
use crate::context::RenderContext;
use crate::progress::{ProgressSink, RenderStage};

pub use slot::{AdvanceConfig, AdvanceOutcome, ClipSlot};

/// Number of output frames for `duration` seconds at `fps`.
pub fn total_frames(duration: f64, fps: f64) -> u64 {
    if duration <= 0.0 || fps <= 0.0 {
        return 0;
    }
    (duration * fps - 1e-6).ceil().max(0.0) as u64
}

/// A video clip scheduled for compositing.
struct VideoLayerPlan<'p> {
    track_index: usize,
    clip: &'p Clip,
    media: &'p MediaFile,
    timing: ClipTiming,
    transitions: Vec<&'p Transition>,
}

impl VideoLayerPlan<'_> {
    fn layer(&self, t: f64) -> ClipLayer<'_> {
        let envelope = if self.transitions.is_empty() {
            1.0
        } else {
            clip_envelope(
                self.transitions.iter().copied(),
                t - self.timing.start,
                self.timing.timeline_duration(),
            )
        };
        ClipLayer {
            crop: self.clip.crop.unwrap_or_default(),
            transform: self.clip.transform.unwrap_or_default(),
            opacity: self.clip.effective_opacity() * envelope,
            effects: &self.clip.effects,
        }
    }

    /// Text overlay visible at `t`, if any.
    fn text_at(&self, t: f64) -> Option<&TextOverlay> {
        let overlay = self.clip.text_overlay.as_ref()?;
        let from = self.timing.start + overlay.start.max(0.0);
        let to = match overlay.duration {
            Some(d) => (from + d.max(0.0)).min(self.timing.end),
            None => self.timing.end,
        };
        (t >= from && t < to).then_some(overlay)
    }
}

/// Video clips in compositing order: highest track index first, so the
/// lowest index ends up on top.
fn plan_layers(project: &Project) -> Vec<VideoLayerPlan<'_>> {
    let mut layers: Vec<_> = project
        .placed_clips()
        .filter(|(_, track, _, _)| track.is_video() && !track.muted)
        .map(|(track_index, _, clip, media)| VideoLayerPlan {
            track_index,
            clip,
            media,
            timing: resolve_clip(clip, media),
            transitions: project.transitions_for(&clip.id).collect(),
        })
        .filter(|layer| layer.timing.timeline_duration() > 0.0)
        .collect();
    layers.sort_by(|a, b| b.track_index.cmp(&a.track_index));
    layers
}

enum SlotState {
    Idle,
    Open(ClipSlot),
    Done,
}

/// Everything that must be released whatever way the render ends.
struct Session {
    slots: Vec<SlotState>,
    writer: Option<Box<dyn OutputWriter>>,
}

impl Session {
    fn close_slot(&mut self, index: usize) {
        if let SlotState::Open(mut slot) = std::mem::replace(&mut self.slots[index], SlotState::Done)
        {
            slot.close();
        }
    }

    fn teardown(&mut self) {
        for index in 0..self.slots.len() {
            self.close_slot(index);
        }
        if let Some(writer) = self.writer.take() {
            tracing::debug!("Aborting unfinished output writer");
            writer.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Render `project` through the in-process codec backend.
pub async fn render_streaming(
    ctx: &RenderContext,
    project: &Project,
    settings: &RenderSettings,
    progress: &ProgressSink,
    cancel: &CancelFlag,
) -> CutroomResult<Vec<u8>> {
    let engine = &ctx.config().render;
    let fps = settings.framerate;
    let duration = project.duration();
    let frame_count = total_frames(duration, fps);
    let features = ProjectFeatures::detect(project);
    let layers = plan_layers(project);

    let spec = OutputSpec {
        width: settings.width,
        height: settings.height,
        fps,
        bitrate_kbps: settings.bitrate,
        format: settings.format,
        keyframe_interval: engine.keyframe_interval_frames(fps),
        audio: features.has_audio.then_some(AudioSpec {
            sample_rate: engine.audio_sample_rate,
            channels: engine.audio_channels,
            bitrate_kbps: engine.audio_bitrate_kbps,
        }),
    };
    let advance = AdvanceConfig {
        lookahead_us: engine.lookahead_us(),
        pick_tolerance_us: engine.pick_tolerance_us(),
        decoder_queue_depth: engine.decoder_queue_depth,
        stall_timeout: Duration::from_millis(engine.stall_timeout_ms),
    };

    tracing::info!(
        backend = ctx.codecs().name(),
        frames = frame_count,
        layers = layers.len(),
        width = spec.width,
        height = spec.height,
        fps,
        audio = spec.audio.is_some(),
        "Starting streaming render"
    );

    let mut session = Session {
        slots: layers.iter().map(|_| SlotState::Idle).collect(),
        writer: Some(ctx.codecs().open_writer(&spec)?),
    };
    let result = run(
        ctx, project, &layers, &spec, &advance, frame_count, &mut session, progress, cancel,
    )
    .await;
    session.teardown();
    result
}

#[allow(clippy::too_many_arguments)]
async fn run(
    ctx: &RenderContext,
    project: &Project,
    layers: &[VideoLayerPlan<'_>],
    spec: &OutputSpec,
    advance: &AdvanceConfig,
    frame_count: u64,
    session: &mut Session,
    progress: &ProgressSink,
    cancel: &CancelFlag,
) -> CutroomResult<Vec<u8>> {
    let engine = &ctx.config().render;
    let clock = ctx.clock();
    let font = ctx.font();
    let mut canvas = Canvas::new(spec.width, spec.height);
    let mut warned_no_font = false;

    progress.report(RenderStage::Rendering, 0, "Rendering frames");

    for index in 0..frame_count {
        cancel.check()?;
        let t = index as f64 / spec.fps;
        canvas.clear();

        for (i, layer) in layers.iter().enumerate() {
            if t >= layer.timing.end {
                session.close_slot(i);
                continue;
            }
            if !layer.timing.contains(t) {
                continue;
            }
            if matches!(session.slots[i], SlotState::Idle) {
                let source = ctx.codecs().open_video(layer.media)?;
                let start_us = secs_to_us(layer.timing.source_time(t));
                let id = layer.clip.id.clone();
                let slot = if layer.timing.reverse {
                    ClipSlot::open_reversed(id, source, start_us, advance)
                } else {
                    ClipSlot::open(id, source, start_us, advance)
                };
                session.slots[i] = SlotState::Open(slot);
            }
            let SlotState::Open(slot) = &mut session.slots[i] else {
                continue;
            };

            let target_us = secs_to_us(layer.timing.source_time(t));
            slot.advance(target_us, advance, clock).await?;
            match slot.pick(target_us) {
                Some(frame) => canvas.draw(&frame.image, &layer.layer(t)),
                None => tracing::trace!(clip = %layer.clip.id, target_us, "No frame for target"),
            }
        }

        for layer in layers {
            let Some(overlay) = layer.text_at(t) else {
                continue;
            };
            match font {
                Some(font) => canvas.draw_text(&font.font, overlay),
                None if !warned_no_font => {
                    tracing::warn!(clip = %layer.clip.id, "No font loaded; skipping text overlays");
                    warned_no_font = true;
                }
                None => {}
            }
        }

        let writer = session
            .writer
            .as_mut()
            .ok_or_else(|| CutroomError::encode("output writer already closed"))?;
        let keyframe = index % spec.keyframe_interval.max(1) == 0;
        writer.encode_video(canvas.image(), frame_timestamp_us(index, spec.fps), keyframe)?;
        drain_encoder(
            writer.as_mut(),
            engine.encoder_queue_depth,
            Duration::from_millis(engine.stall_timeout_ms),
            clock,
        )
        .await?;

        progress.fraction(
            RenderStage::Rendering,
            index + 1,
            frame_count,
            format!("Rendered frame {}/{}", index + 1, frame_count),
        );
        // One suspension per frame so a caller on the same task sees
        // progress and can trip cancellation.
        tokio::task::yield_now().await;
    }

    for i in 0..session.slots.len() {
        session.close_slot(i);
    }

    if let Some(audio) = spec.audio {
        let writer = session
            .writer
            .as_mut()
            .ok_or_else(|| CutroomError::encode("output writer already closed"))?;
        encode_audio(ctx, project, audio, writer.as_mut(), progress, cancel)?;
    }

    cancel.check()?;
    progress.report(RenderStage::Finalizing, 0, "Finalizing container");
    let writer = session
        .writer
        .take()
        .ok_or_else(|| CutroomError::encode("output writer already closed"))?;
    let bytes = writer.finish()?;
    progress.report(RenderStage::Finalizing, 100, "Container finalized");
    tracing::info!(bytes = bytes.len(), frames = frame_count, "Streaming render finished");
    Ok(bytes)
}

/// Wait until the encoder queue is back within `depth`.
async fn drain_encoder(
    writer: &mut dyn OutputWriter,
    depth: usize,
    stall_timeout: Duration,
    clock: &dyn Clock,
) -> CutroomResult<()> {
    if writer.pending_video() <= depth {
        return Ok(());
    }
    let deadline = Deadline::after(clock, stall_timeout);
    while writer.pending_video() > depth {
        if writer.poll()? > 0 {
            continue;
        }
        if deadline.expired(clock) {
            return Err(CutroomError::encode(format!(
                "encoder stalled with {} frames pending",
                writer.pending_video()
            )));
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}

fn encode_audio(
    ctx: &RenderContext,
    project: &Project,
    audio: AudioSpec,
    writer: &mut dyn OutputWriter,
    progress: &ProgressSink,
    cancel: &CancelFlag,
) -> CutroomResult<()> {
    progress.report(RenderStage::Encoding, 0, "Mixing audio");
    let mix = mix_project_audio(
        project,
        ctx.audio_decoder(),
        audio.sample_rate,
        audio.channels,
        cancel,
    )?;

    let channels = audio.channels.max(1) as usize;
    let chunk_frames = writer.audio_frame_size().max(1);
    let total = mix.frames();
    let mut done = 0usize;
    while done < total {
        cancel.check()?;
        let end = (done + chunk_frames).min(total);
        let samples = clamp_for_encode(&mix.samples[done * channels..end * channels]);
        writer.encode_audio(&AudioBlock {
            samples: &samples,
            channels: audio.channels,
            sample_rate: audio.sample_rate,
            timestamp_us: secs_to_us(done as f64 / audio.sample_rate as f64),
        })?;
        done = end;
        progress.fraction(
            RenderStage::Encoding,
            done as u64,
            total as u64,
            "Encoding audio",
        );
    }
    tracing::debug!(frames = total, "Audio encoded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_frames() {
        assert_eq!(total_frames(10.0, 30.0), 300);
        assert_eq!(total_frames(1.0 / 3.0, 30.0), 10);
        assert_eq!(total_frames(0.0, 30.0), 0);
        assert_eq!(total_frames(0.01, 30.0), 1);
    }
}
