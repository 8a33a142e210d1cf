//! Typed render progress delivered over a channel.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

/// Stages of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStage {
    Preparing,
    Rendering,
    Encoding,
    Finalizing,
    Complete,
    Failed,
}

/// Render progress report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderProgress {
    pub stage: RenderStage,

    /// Percentage within the current stage, `0..=100`.
    pub progress: u8,

    pub message: String,
}

/// Sending half of the progress channel.
///
/// Reports are monotonic within a stage: a lower percentage than the last
/// one sent for the same stage is dropped. Entering a new stage or calling
/// [`restart`](Self::restart) resets it.
#[derive(Debug)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<RenderProgress>>,
    last: Mutex<Option<(RenderStage, u8)>>,
}

/// Create a connected sink and receiver.
pub fn progress_channel() -> (ProgressSink, mpsc::UnboundedReceiver<RenderProgress>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressSink {
            tx: Some(tx),
            last: Mutex::new(None),
        },
        rx,
    )
}

impl ProgressSink {
    /// A sink nobody listens to.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            last: Mutex::new(None),
        }
    }

    pub fn report(&self, stage: RenderStage, progress: u8, message: impl Into<String>) {
        let progress = progress.min(100);
        {
            let mut last = match self.last.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some((last_stage, last_progress)) = *last {
                if last_stage == stage && progress < last_progress {
                    return;
                }
            }
            *last = Some((stage, progress));
        }

        let report = RenderProgress {
            stage,
            progress,
            message: message.into(),
        };
        tracing::trace!(stage = ?report.stage, progress = report.progress, "{}", report.message);
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is watching; the render carries on.
            let _ = tx.send(report);
        }
    }

    /// Report `done / total` as a percentage of `stage`.
    pub fn fraction(&self, stage: RenderStage, done: u64, total: u64, message: impl Into<String>) {
        let pct = if total == 0 {
            100
        } else {
            ((done.min(total) * 100) / total) as u8
        };
        self.report(stage, pct, message);
    }

    pub fn complete(&self, message: impl Into<String>) {
        self.report(RenderStage::Complete, 100, message);
    }

    pub fn fail(&self, message: impl Into<String>) {
        self.report(RenderStage::Failed, 100, message);
    }

    /// Forget the last report so a fresh attempt can start again from 0.
    pub fn restart(&self) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = None;
    }

    /// The last stage reported, if any.
    pub fn current_stage(&self) -> Option<RenderStage> {
        match self.last.lock() {
            Ok(guard) => guard.map(|(stage, _)| stage),
            Err(poisoned) => poisoned.into_inner().map(|(stage, _)| stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<RenderProgress>) -> Vec<RenderProgress> {
        let mut out = vec![];
        while let Ok(p) = rx.try_recv() {
            out.push(p);
        }
        out
    }

    #[test]
    fn test_monotonic_within_stage() {
        let (sink, mut rx) = progress_channel();
        sink.report(RenderStage::Rendering, 10, "a");
        sink.report(RenderStage::Rendering, 5, "b");
        sink.report(RenderStage::Rendering, 40, "c");
        let got: Vec<u8> = drain(&mut rx).iter().map(|p| p.progress).collect();
        assert_eq!(got, vec![10, 40]);
    }

    #[test]
    fn test_stage_transition_resets() {
        let (sink, mut rx) = progress_channel();
        sink.report(RenderStage::Rendering, 90, "frames");
        sink.report(RenderStage::Encoding, 0, "audio");
        sink.report(RenderStage::Rendering, 0, "fallback");
        let got = drain(&mut rx);
        assert_eq!(got.len(), 3);
        assert_eq!(got[2].stage, RenderStage::Rendering);
        assert_eq!(got[2].progress, 0);
    }

    #[test]
    fn test_restart_accepts_lower_progress() {
        let (sink, mut rx) = progress_channel();
        sink.report(RenderStage::Rendering, 60, "first attempt");
        sink.restart();
        assert_eq!(sink.current_stage(), None);
        sink.report(RenderStage::Rendering, 10, "second attempt");
        sink.report(RenderStage::Rendering, 5, "stale");
        let got: Vec<u8> = drain(&mut rx).iter().map(|p| p.progress).collect();
        assert_eq!(got, vec![60, 10]);
    }

    #[test]
    fn test_fraction_and_clamp() {
        let (sink, mut rx) = progress_channel();
        sink.fraction(RenderStage::Rendering, 150, 300, "half");
        sink.fraction(RenderStage::Encoding, 0, 0, "nothing");
        sink.report(RenderStage::Finalizing, 250, "over");
        let got: Vec<u8> = drain(&mut rx).iter().map(|p| p.progress).collect();
        assert_eq!(got, vec![50, 100, 100]);
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (sink, rx) = progress_channel();
        drop(rx);
        sink.fail("boom");
        assert_eq!(sink.current_stage(), Some(RenderStage::Failed));
        ProgressSink::disabled().complete("ok");
    }

    #[test]
    fn test_stage_serializes_lowercase() {
        let json = serde_json::to_string(&RenderStage::Finalizing).unwrap();
        assert_eq!(json, "\"finalizing\"");
    }
}
