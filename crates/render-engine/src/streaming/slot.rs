//! Per-clip decode state.
//!
//! A slot owns one source's sample table, its decoder, and the frames
//! decoded so far. [`ClipSlot::advance`] feeds compressed samples up to a
//! lookahead horizon past the target, waits for the decoder when its queue
//! is full, and seeks when the target leaves the decoded range.
//!
//! A reversed slot decodes a whole GOP per seek and hands its frames out
//! newest first, so the decoder is reset once per GOP rather than per frame.

use std::time::Duration;

use cutroom_common::clock::{Clock, Deadline};
use cutroom_common::error::{CutroomError, CutroomResult};

use super::frames::FrameQueue;
use super::samples::{gop_end, keyframe_at_or_before, longest_gop, nominal_frame_duration_us};
use crate::codec::{DecodedFrame, EncodedSample, VideoDecoder, VideoTrackSource};

/// Decode tuning shared by every slot in a render.
#[derive(Debug, Clone, Copy)]
pub struct AdvanceConfig {
    pub lookahead_us: i64,
    pub pick_tolerance_us: i64,
    /// Pending decoder inputs before feeding pauses.
    pub decoder_queue_depth: usize,
    pub stall_timeout: Duration,
}

/// Where [`ClipSlot::advance`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Everything up to the horizon has been fed.
    Satisfied,
    /// The sample table is exhausted and the decoder drained.
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
enum AdvanceState {
    Feeding,
    WaitingForOutput { deadline: Deadline },
}

pub struct ClipSlot {
    clip_id: String,
    samples: Vec<EncodedSample>,
    decoder: Box<dyn VideoDecoder>,
    /// Next sample to feed.
    cursor: usize,
    /// Keyframe the cursor was last positioned at.
    gop_start: usize,
    /// Feeding stops before this sample. The table length unless reversed.
    feed_end: usize,
    reverse: bool,
    queue: FrameQueue,
    /// Frames older than this are discarded on arrival.
    floor_us: i64,
    tolerance_us: i64,
    half_frame_us: i64,
    flushed: bool,
    closed: bool,
}

impl ClipSlot {
    /// Position a freshly opened source at the keyframe before `start_us`.
    pub fn open(
        clip_id: impl Into<String>,
        source: VideoTrackSource,
        start_us: i64,
        config: &AdvanceConfig,
    ) -> Self {
        Self::with_direction(clip_id.into(), source, start_us, false, config)
    }

    /// Open for targets that move backwards through the source.
    pub fn open_reversed(
        clip_id: impl Into<String>,
        source: VideoTrackSource,
        start_us: i64,
        config: &AdvanceConfig,
    ) -> Self {
        Self::with_direction(clip_id.into(), source, start_us, true, config)
    }

    fn with_direction(
        clip_id: String,
        source: VideoTrackSource,
        start_us: i64,
        reverse: bool,
        config: &AdvanceConfig,
    ) -> Self {
        let frame_us = nominal_frame_duration_us(&source.samples);
        let tolerance_us = config.pick_tolerance_us.max(frame_us);
        let capacity = if reverse {
            longest_gop(&source.samples) + config.decoder_queue_depth + 2
        } else {
            match frame_us {
                0 => 64,
                d => ((config.lookahead_us + tolerance_us) / d) as usize + config.decoder_queue_depth + 2,
            }
        };
        tracing::debug!(
            clip = %clip_id,
            samples = source.samples.len(),
            start_us,
            reverse,
            "Opened clip decoder"
        );
        let mut slot = Self {
            clip_id,
            samples: source.samples,
            decoder: source.decoder,
            cursor: 0,
            gop_start: 0,
            feed_end: 0,
            reverse,
            queue: FrameQueue::new(capacity),
            floor_us: 0,
            tolerance_us,
            half_frame_us: frame_us / 2,
            flushed: false,
            closed: false,
        };
        slot.position(start_us);
        slot
    }

    pub fn clip_id(&self) -> &str {
        &self.clip_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Make frames around `target_us` available to [`pick`](Self::pick).
    pub async fn advance(
        &mut self,
        target_us: i64,
        config: &AdvanceConfig,
        clock: &dyn Clock,
    ) -> CutroomResult<AdvanceOutcome> {
        if self.closed {
            return Err(CutroomError::decode(format!(
                "clip {} decoder already closed",
                self.clip_id
            )));
        }
        if self.needs_seek(target_us) {
            self.seek(target_us);
        }

        let horizon = target_us + config.lookahead_us;
        let depth = config.decoder_queue_depth.max(1);
        let mut state = AdvanceState::Feeding;
        loop {
            state = match state {
                AdvanceState::Feeding => {
                    while self.wants_sample(horizon) && self.decoder.pending() < depth {
                        self.decoder.decode(&self.samples[self.cursor])?;
                        self.cursor += 1;
                    }
                    self.collect()?;

                    if self.wants_sample(horizon) {
                        if self.decoder.pending() < depth {
                            AdvanceState::Feeding
                        } else {
                            AdvanceState::WaitingForOutput {
                                deadline: Deadline::after(clock, config.stall_timeout),
                            }
                        }
                    } else if self.cursor >= self.feed_end {
                        // A reversed slot drains the decoder at every GOP end.
                        if !self.flushed {
                            self.decoder.flush()?;
                            self.flushed = true;
                        }
                        self.collect()?;
                        return Ok(if self.feed_end >= self.samples.len() {
                            AdvanceOutcome::Exhausted
                        } else {
                            AdvanceOutcome::Satisfied
                        });
                    } else {
                        return Ok(AdvanceOutcome::Satisfied);
                    }
                }
                AdvanceState::WaitingForOutput { deadline } => {
                    tokio::task::yield_now().await;
                    self.collect()?;
                    if self.decoder.pending() < depth {
                        AdvanceState::Feeding
                    } else if deadline.expired(clock) {
                        tracing::warn!(
                            clip = %self.clip_id,
                            pending = self.decoder.pending(),
                            target_us,
                            "Decoder produced no output before the stall timeout"
                        );
                        return Err(CutroomError::decode(format!(
                            "decoder stalled on clip {} with {} samples pending",
                            self.clip_id,
                            self.decoder.pending()
                        )));
                    } else {
                        AdvanceState::WaitingForOutput { deadline }
                    }
                }
            };
        }
    }

    /// Frame closest to `target_us`, once [`advance`](Self::advance) ran.
    pub fn pick(&mut self, target_us: i64) -> Option<&DecodedFrame> {
        if self.reverse {
            self.queue.pick_descending(target_us)
        } else {
            self.queue.pick(target_us)
        }
    }

    /// Release the decoder and every frame. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.decoder.reset();
        self.decoder.close();
        self.queue.clear();
        self.closed = true;
        tracing::debug!(clip = %self.clip_id, "Closed clip decoder");
    }

    fn wants_sample(&self, horizon: i64) -> bool {
        self.cursor < self.feed_end
            && (self.reverse || self.samples[self.cursor].timestamp_us <= horizon)
    }

    fn needs_seek(&self, target_us: i64) -> bool {
        if target_us < self.floor_us {
            return true;
        }
        if self.reverse {
            return keyframe_at_or_before(&self.samples, target_us) != self.gop_start;
        }
        if let Some(front) = self.queue.front_timestamp_us() {
            // An older frame than the head could be closer.
            if target_us + self.half_frame_us < front {
                return true;
            }
        }
        // A keyframe past everything fed already sits at or before the target.
        keyframe_at_or_before(&self.samples, target_us) > self.cursor
    }

    fn seek(&mut self, target_us: i64) {
        tracing::trace!(
            clip = %self.clip_id,
            target_us,
            from = self.cursor,
            "Seeking decoder"
        );
        self.decoder.reset();
        self.queue.clear();
        self.position(target_us);
    }

    /// Point the cursor at the keyframe before `target_us`.
    fn position(&mut self, target_us: i64) {
        let cursor = keyframe_at_or_before(&self.samples, target_us);
        self.cursor = cursor;
        self.gop_start = cursor;
        self.flushed = false;
        if self.reverse {
            self.feed_end = gop_end(&self.samples, cursor);
            self.floor_us = self
                .samples
                .get(cursor)
                .map_or(target_us, |s| s.timestamp_us.min(target_us))
                - self.tolerance_us;
        } else {
            self.feed_end = self.samples.len();
            self.floor_us = target_us - self.tolerance_us;
        }
    }

    /// Move every ready decoder output into the queue.
    fn collect(&mut self) -> CutroomResult<usize> {
        let mut kept = 0;
        while let Some(frame) = self.decoder.next_frame()? {
            if frame.timestamp_us < self.floor_us {
                continue;
            }
            self.queue.push(frame);
            kept += 1;
        }
        Ok(kept)
    }
}

impl Drop for ClipSlot {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::synthetic::{synthetic_color, SyntheticBackend, SyntheticMedia};
    use crate::codec::CodecBackend;
    use cutroom_common::clock::{ManualClock, MonotonicClock};
    use cutroom_project_model::MediaFile;

    fn config() -> AdvanceConfig {
        AdvanceConfig {
            lookahead_us: 200_000,
            pick_tolerance_us: 35_000,
            decoder_queue_depth: 4,
            stall_timeout: Duration::from_millis(100),
        }
    }

    fn media() -> MediaFile {
        MediaFile::video("m", "/synthetic/m.mp4", 2.0, 4, 4, 25.0)
    }

    fn open(backend: &SyntheticBackend, start_us: i64) -> ClipSlot {
        let source = backend.open_video(&media()).unwrap();
        ClipSlot::open("c1", source, start_us, &config())
    }

    #[tokio::test]
    async fn test_sequential_playback_picks_each_frame() {
        let backend =
            SyntheticBackend::new().with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0).with_gop(10));
        let stats = backend.stats();
        let clock = MonotonicClock::new();
        let mut slot = open(&backend, 0);
        for i in 0..50u64 {
            let target = i as i64 * 40_000;
            slot.advance(target, &config(), &clock).await.unwrap();
            let frame = slot.pick(target).unwrap();
            assert_eq!(frame.timestamp_us, target);
            assert_eq!(frame.image.get_pixel(0, 0).0, synthetic_color(i));
        }
        // Forward playback never needs to reset the decoder.
        assert_eq!(stats.decoder_resets(), 0);
        drop(slot);
        assert_eq!(stats.decoders_closed(), 1);
        assert_eq!(stats.live_frames(), 0);
    }

    #[tokio::test]
    async fn test_start_mid_gop_discards_older_frames() {
        let backend =
            SyntheticBackend::new().with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0).with_gop(10));
        let clock = MonotonicClock::new();
        let mut slot = open(&backend, 600_000);
        slot.advance(600_000, &config(), &clock).await.unwrap();
        let frame = slot.pick(600_000).unwrap();
        assert_eq!(frame.timestamp_us, 600_000);
        assert_eq!(frame.image.get_pixel(0, 0).0, synthetic_color(15));
    }

    #[tokio::test]
    async fn test_backward_target_seeks() {
        let backend =
            SyntheticBackend::new().with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0).with_gop(10));
        let stats = backend.stats();
        let clock = MonotonicClock::new();
        let mut slot = open(&backend, 1_000_000);
        slot.advance(1_000_000, &config(), &clock).await.unwrap();
        assert_eq!(slot.pick(1_000_000).unwrap().timestamp_us, 1_000_000);

        slot.advance(120_000, &config(), &clock).await.unwrap();
        assert_eq!(slot.pick(120_000).unwrap().timestamp_us, 120_000);
        assert_eq!(stats.decoder_resets(), 1);
    }

    #[tokio::test]
    async fn test_reversed_playback_decodes_each_gop_once() {
        let backend =
            SyntheticBackend::new().with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0).with_gop(10));
        let stats = backend.stats();
        let clock = MonotonicClock::new();
        let source = backend.open_video(&media()).unwrap();
        let mut slot = ClipSlot::open_reversed("c1", source, 49 * 40_000, &config());
        for i in (0..50u64).rev() {
            let target = i as i64 * 40_000;
            slot.advance(target, &config(), &clock).await.unwrap();
            let frame = slot.pick(target).unwrap();
            assert_eq!(frame.timestamp_us, target);
            assert_eq!(frame.image.get_pixel(0, 0).0, synthetic_color(i));
        }
        // Five GOPs: the first comes from the open, each later one costs one reset.
        assert_eq!(stats.decoder_resets(), 4);
        drop(slot);
        assert_eq!(stats.live_frames(), 0);
    }

    #[tokio::test]
    async fn test_far_forward_target_seeks() {
        let backend =
            SyntheticBackend::new().with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0).with_gop(10));
        let stats = backend.stats();
        let clock = MonotonicClock::new();
        let mut slot = open(&backend, 0);
        slot.advance(0, &config(), &clock).await.unwrap();
        slot.advance(1_600_000, &config(), &clock).await.unwrap();
        assert_eq!(slot.pick(1_600_000).unwrap().timestamp_us, 1_600_000);
        assert_eq!(stats.decoder_resets(), 1);
    }

    #[tokio::test]
    async fn test_end_of_source_flushes() {
        let backend = SyntheticBackend::new()
            .with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0).with_reorder_depth(3));
        let clock = MonotonicClock::new();
        let mut slot = open(&backend, 0);
        let last = 49 * 40_000;
        let outcome = slot.advance(last, &config(), &clock).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Exhausted);
        assert_eq!(slot.pick(last).unwrap().timestamp_us, last);
    }

    #[tokio::test]
    async fn test_stalled_decoder_times_out() {
        let backend =
            SyntheticBackend::new().with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0).stalled());
        let clock = ManualClock::with_auto_advance(Duration::from_millis(10));
        let mut slot = open(&backend, 0);
        let err = slot.advance(0, &config(), &clock).await.unwrap_err();
        assert!(matches!(err, CutroomError::Decode { .. }));
        assert!(err.to_string().contains("stalled"));
    }

    #[tokio::test]
    async fn test_corrupt_sample_fails_advance() {
        let backend = SyntheticBackend::new()
            .with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0).corrupt_at(3));
        let clock = MonotonicClock::new();
        let mut slot = open(&backend, 0);
        assert!(slot.advance(0, &config(), &clock).await.is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let backend = SyntheticBackend::new().with_media("m", SyntheticMedia::new(4, 4, 25.0, 2.0));
        let stats = backend.stats();
        let mut slot = open(&backend, 0);
        slot.close();
        slot.close();
        assert!(slot.is_closed());
        drop(slot);
        assert_eq!(stats.decoders_closed(), 1);
    }
}
