//! Clip transitions.
//!
//! Transitions shape opacity and gain near clip edges. They never move a
//! clip in time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransitionKind {
    FadeIn,
    FadeOut,
    /// Fade in and out over the same duration.
    Crossfade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: String,
    pub clip_id: String,
    pub kind: TransitionKind,
    /// Ramp length in seconds.
    pub duration: f64,
}

impl Transition {
    /// Multiplier in `[0, 1]` at `offset` seconds into a clip lasting
    /// `clip_duration` seconds.
    pub fn envelope(&self, offset: f64, clip_duration: f64) -> f64 {
        let ramp = self.duration.min(clip_duration).max(0.0);
        if ramp <= 0.0 {
            return 1.0;
        }
        let fade_in = (offset / ramp).clamp(0.0, 1.0);
        let fade_out = ((clip_duration - offset) / ramp).clamp(0.0, 1.0);
        match self.kind {
            TransitionKind::FadeIn => fade_in,
            TransitionKind::FadeOut => fade_out,
            TransitionKind::Crossfade => fade_in.min(fade_out),
        }
    }

    pub fn fades_in(&self) -> bool {
        matches!(self.kind, TransitionKind::FadeIn | TransitionKind::Crossfade)
    }

    pub fn fades_out(&self) -> bool {
        matches!(self.kind, TransitionKind::FadeOut | TransitionKind::Crossfade)
    }
}

/// Combined envelope of every transition attached to a clip.
pub fn clip_envelope<'a>(
    transitions: impl IntoIterator<Item = &'a Transition>,
    offset: f64,
    clip_duration: f64,
) -> f64 {
    transitions
        .into_iter()
        .map(|t| t.envelope(offset, clip_duration))
        .fold(1.0, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(kind: TransitionKind, duration: f64) -> Transition {
        Transition {
            id: "t".into(),
            clip_id: "c".into(),
            kind,
            duration,
        }
    }

    #[test]
    fn test_fade_in_ramps_from_zero() {
        let t = transition(TransitionKind::FadeIn, 1.0);
        assert_eq!(t.envelope(0.0, 4.0), 0.0);
        assert!((t.envelope(0.5, 4.0) - 0.5).abs() < 1e-12);
        assert_eq!(t.envelope(2.0, 4.0), 1.0);
    }

    #[test]
    fn test_crossfade_covers_both_edges() {
        let t = transition(TransitionKind::Crossfade, 1.0);
        assert!((t.envelope(3.75, 4.0) - 0.25).abs() < 1e-12);
        assert!((t.envelope(0.25, 4.0) - 0.25).abs() < 1e-12);
        assert_eq!(t.envelope(2.0, 4.0), 1.0);
    }

    #[test]
    fn test_zero_duration_is_transparent() {
        let t = transition(TransitionKind::FadeOut, 0.0);
        assert_eq!(t.envelope(4.0, 4.0), 1.0);
    }

    #[test]
    fn test_kind_wire_names() {
        let kind: TransitionKind = serde_json::from_str("\"fadeOut\"").unwrap();
        assert_eq!(kind, TransitionKind::FadeOut);
        assert_eq!(clip_envelope(std::iter::empty(), 0.0, 1.0), 1.0);
    }
}
