//! Flattening overlapping clips into a gapless sequence of spans.
//!
//! Concatenation needs one source per instant. Every clip boundary is
//! snapped to the grid, and each interval between neighbouring boundaries
//! goes to the highest-priority clip covering it: lowest track index, then
//! the latest start. Intervals nobody covers become filler.

use cutroom_project_model::timing::ClipTiming;

/// A clip competing for the timeline.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Lower wins.
    pub track_index: usize,
    pub timing: ClipTiming,
}

/// A stretch of timeline played by one candidate, or by filler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start: f64,
    pub end: f64,
    /// Index into the candidate list; `None` is a gap.
    pub winner: Option<usize>,
}

impl Span {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Round `t` to the nearest multiple of `step`.
pub fn snap(t: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return t;
    }
    (t / step).round() * step
}

/// Partition `[0, total)` into spans.
///
/// Boundaries land on the `step` grid except the final one, which is
/// exactly `total`. Spans shorter than one step at the tail are folded into
/// their predecessor, and interior gaps whose unsnapped length is under one
/// step go to the clip before them, so filler only covers real gaps.
pub fn flatten(candidates: &[Candidate], total: f64, step: f64) -> Vec<Span> {
    if total <= 0.0 {
        return vec![];
    }
    let bounds: Vec<(f64, f64)> = candidates
        .iter()
        .map(|c| {
            (
                snap(c.timing.start, step).clamp(0.0, total),
                snap(c.timing.end, step).clamp(0.0, total),
            )
        })
        .collect();

    let mut edges: Vec<f64> = vec![0.0, total];
    for &(s, e) in &bounds {
        edges.push(s);
        edges.push(e);
    }
    edges.sort_by(f64::total_cmp);
    edges.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    let mut spans: Vec<Span> = vec![];
    for pair in edges.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a <= 1e-9 {
            continue;
        }
        let mid = (a + b) / 2.0;
        let winner = bounds
            .iter()
            .enumerate()
            .filter(|(_, bound)| mid >= bound.0 && mid < bound.1)
            .min_by(|(i, _), (j, _)| {
                let (ci, cj) = (&candidates[*i], &candidates[*j]);
                ci.track_index
                    .cmp(&cj.track_index)
                    .then(cj.timing.start.total_cmp(&ci.timing.start))
                    .then(j.cmp(i))
            })
            .map(|(i, _)| i);

        match spans.last_mut() {
            Some(last) if last.winner == winner => last.end = b,
            _ => spans.push(Span {
                start: a,
                end: b,
                winner,
            }),
        }
    }

    let mut spans = absorb_short_gaps(spans, candidates, step);

    // Fold a sub-step tail into the span before it.
    if spans.len() > 1 {
        if let Some(tail) = spans.last().copied() {
            if tail.duration() < step - 1e-9 {
                spans.pop();
                if let Some(last) = spans.last_mut() {
                    last.end = tail.end;
                }
            }
        }
    }
    spans
}

/// Hand an interior gap to the clip before it when the unsnapped clips are
/// less than one step apart. Snapping alone can turn such a gap into a whole
/// step of filler.
fn absorb_short_gaps(spans: Vec<Span>, candidates: &[Candidate], step: f64) -> Vec<Span> {
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for (i, span) in spans.iter().enumerate() {
        let interior = i > 0 && i + 1 < spans.len();
        if span.winner.is_none() && interior {
            let mid = (span.start + span.end) / 2.0;
            let before = candidates
                .iter()
                .map(|c| c.timing.end)
                .filter(|&end| end <= mid)
                .fold(f64::NEG_INFINITY, f64::max);
            let after = candidates
                .iter()
                .map(|c| c.timing.start)
                .filter(|&start| start >= mid)
                .fold(f64::INFINITY, f64::min);
            if after - before < step - 1e-9 {
                if let Some(last) = out.last_mut() {
                    last.end = span.end;
                    continue;
                }
            }
        }
        match out.last_mut() {
            Some(last) if last.winner == span.winner => last.end = span.end,
            _ => out.push(*span),
        }
    }
    out
}
