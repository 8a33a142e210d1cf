//! Decoded frame FIFO with nearest-timestamp picking.

use std::collections::VecDeque;

use crate::codec::DecodedFrame;

/// Bounded queue of decoded frames in ascending timestamp order.
///
/// Picking a frame drops everything older than it. The picked frame stays
/// at the head so the next target can reuse it when no closer frame exists.
#[derive(Debug)]
pub struct FrameQueue {
    frames: VecDeque<DecodedFrame>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(2),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn front_timestamp_us(&self) -> Option<i64> {
        self.frames.front().map(|f| f.timestamp_us)
    }

    pub fn back_timestamp_us(&self) -> Option<i64> {
        self.frames.back().map(|f| f.timestamp_us)
    }

    /// Insert in timestamp order. When full, the oldest frame is dropped.
    pub fn push(&mut self, frame: DecodedFrame) {
        let at = self
            .frames
            .iter()
            .rposition(|f| f.timestamp_us <= frame.timestamp_us)
            .map_or(0, |i| i + 1);
        self.frames.insert(at, frame);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    /// The frame closest to `target_us`; ties go to the earlier frame.
    pub fn pick(&mut self, target_us: i64) -> Option<&DecodedFrame> {
        let best = self
            .frames
            .iter()
            .enumerate()
            .min_by_key(|(i, f)| ((f.timestamp_us - target_us).abs(), *i))
            .map(|(i, _)| i)?;
        self.frames.drain(..best);
        self.frames.front()
    }

    /// Like [`pick`](Self::pick) for targets that only move backwards:
    /// frames newer than the chosen one are dropped instead.
    pub fn pick_descending(&mut self, target_us: i64) -> Option<&DecodedFrame> {
        let best = self
            .frames
            .iter()
            .enumerate()
            .min_by_key(|(i, f)| ((f.timestamp_us - target_us).abs(), *i))
            .map(|(i, _)| i)?;
        self.frames.truncate(best + 1);
        self.frames.back()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn frame(ts: i64) -> DecodedFrame {
        DecodedFrame::new(RgbaImage::new(1, 1), ts)
    }

    fn queue(timestamps: &[i64]) -> FrameQueue {
        let mut q = FrameQueue::new(16);
        for &ts in timestamps {
            q.push(frame(ts));
        }
        q
    }

    #[test]
    fn test_push_keeps_order() {
        let q = queue(&[40, 0, 80, 20]);
        assert_eq!(q.front_timestamp_us(), Some(0));
        assert_eq!(q.back_timestamp_us(), Some(80));
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn test_pick_closest_and_drop_older() {
        let mut q = queue(&[0, 40, 80, 120]);
        assert_eq!(q.pick(70).map(|f| f.timestamp_us), Some(80));
        assert_eq!(q.len(), 2);
        assert_eq!(q.front_timestamp_us(), Some(80));
    }

    #[test]
    fn test_pick_tie_prefers_earlier() {
        let mut q = queue(&[0, 40]);
        assert_eq!(q.pick(20).map(|f| f.timestamp_us), Some(0));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_pick_keeps_frame_for_reuse() {
        let mut q = queue(&[100]);
        assert_eq!(q.pick(90).map(|f| f.timestamp_us), Some(100));
        assert_eq!(q.pick(95).map(|f| f.timestamp_us), Some(100));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_pick_descending_drops_newer() {
        let mut q = queue(&[0, 40, 80, 120]);
        assert_eq!(q.pick_descending(90).map(|f| f.timestamp_us), Some(80));
        assert_eq!(q.len(), 3);
        assert_eq!(q.back_timestamp_us(), Some(80));
        assert_eq!(q.pick_descending(45).map(|f| f.timestamp_us), Some(40));
        assert_eq!(q.front_timestamp_us(), Some(0));
    }

    #[test]
    fn test_pick_empty() {
        let mut q = FrameQueue::new(4);
        assert!(q.pick(0).is_none());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut q = FrameQueue::new(2);
        for ts in [0, 10, 20] {
            q.push(frame(ts));
        }
        assert_eq!(q.len(), 2);
        assert_eq!(q.front_timestamp_us(), Some(10));
    }
}
