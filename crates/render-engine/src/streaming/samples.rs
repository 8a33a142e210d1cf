//! Sample table lookups.

use crate::codec::EncodedSample;

/// Index of the last keyframe at or before `target_us`.
///
/// Falls back to the first keyframe in the table when the target precedes
/// every keyframe, and to 0 when there are none.
pub fn keyframe_at_or_before(samples: &[EncodedSample], target_us: i64) -> usize {
    let mut found = None;
    for (index, sample) in samples.iter().enumerate() {
        if sample.timestamp_us > target_us {
            break;
        }
        if sample.is_keyframe {
            found = Some(index);
        }
    }
    found
        .or_else(|| samples.iter().position(|s| s.is_keyframe))
        .unwrap_or(0)
}

/// Index one past the last sample of the GOP that starts at `keyframe`.
pub fn gop_end(samples: &[EncodedSample], keyframe: usize) -> usize {
    samples
        .iter()
        .enumerate()
        .skip(keyframe + 1)
        .find(|(_, s)| s.is_keyframe)
        .map_or(samples.len(), |(i, _)| i)
}

/// Sample count of the longest GOP in the table.
pub fn longest_gop(samples: &[EncodedSample]) -> usize {
    let mut longest = 0;
    let mut start = 0;
    for (index, sample) in samples.iter().enumerate().skip(1) {
        if sample.is_keyframe {
            longest = longest.max(index - start);
            start = index;
        }
    }
    longest.max(samples.len() - start)
}

/// Typical spacing between samples, used as the source frame duration.
pub fn nominal_frame_duration_us(samples: &[EncodedSample]) -> i64 {
    samples
        .iter()
        .map(|s| s.duration_us)
        .find(|d| *d > 0)
        .or_else(|| {
            samples
                .windows(2)
                .map(|w| w[1].timestamp_us - w[0].timestamp_us)
                .find(|d| *d > 0)
        })
        .unwrap_or(0)
}
