//! Running the external transcoder and following its progress output.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use cutroom_common::clock::secs_to_us;
use cutroom_common::error::{CutroomError, CutroomResult};

use crate::cancel::CancelFlag;
use crate::progress::{ProgressSink, RenderStage};

/// Characters of stderr kept for error reports.
const STDERR_TAIL_CHARS: usize = 4000;

/// Key/value state from `-progress pipe:1`.
#[derive(Debug, Default)]
pub(crate) struct ProgressState {
    out_time_us: u64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite the name, `out_time_ms` is also microseconds.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.trim().parse::<i64>() {
                    self.out_time_us = us.max(0) as u64;
                }
            }
            "progress" => {
                self.complete = value.trim() == "end";
            }
            _ => {}
        }
    }
}

/// A transcoder executable.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: String,
}

impl Transcoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn is_available(&self) -> bool {
        if self.program.contains('/') {
            Path::new(&self.program).is_file()
        } else {
            command_exists(&self.program)
        }
    }

    /// Run with `args`, reporting progress against `duration` seconds of
    /// output. Cancellation kills the child.
    pub async fn run(
        &self,
        args: &[String],
        duration: f64,
        progress: &ProgressSink,
        cancel: &CancelFlag,
    ) -> CutroomResult<()> {
        cancel.check()?;
        tracing::debug!(program = %self.program, args = ?args, "Running transcoder");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CutroomError::unavailable(format!("Transcoder '{}' not found", self.program))
                } else {
                    CutroomError::render(format!("Failed to start {}: {e}", self.program))
                }
            })?;

        tracing::info!(pid = child.id(), args_len = args.len(), "Transcoder started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CutroomError::render("Failed to capture transcoder stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CutroomError::render("Failed to capture transcoder stderr"))?;

        // Drained concurrently so a full stderr pipe cannot block the child.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read transcoder stderr: {err}>"),
            }
        });

        let duration_us = secs_to_us(duration).max(0) as u64;
        let mut state = ProgressState::default();
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = cancel.cancelled() => {
                    tracing::info!("Killing transcoder after cancellation");
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Err(CutroomError::Cancelled);
                }
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    return Err(CutroomError::render(format!(
                        "Failed reading transcoder progress: {e}"
                    )))
                }
            };
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            state.update(key, value);
            if key == "progress" {
                if state.complete {
                    progress.report(RenderStage::Rendering, 100, "Transcoder finished");
                } else {
                    progress.fraction(
                        RenderStage::Rendering,
                        state.out_time_us,
                        duration_us,
                        "Transcoding",
                    );
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| CutroomError::render(format!("Failed to wait on transcoder: {e}")))?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(CutroomError::render(format!(
                "Transcoder failed ({status}): {}",
                tail(stderr_output.trim(), STDERR_TAIL_CHARS)
            )));
        }
        tracing::info!(out_time_us = state.out_time_us, "Transcoder exited cleanly");
        Ok(())
    }
}

/// Last `max` characters of `s`.
fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

fn command_exists(binary: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::progress_channel;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_progress_state_parses_both_keys() {
        let mut state = ProgressState::default();
        state.update("out_time_ms", "1500000");
        assert_eq!(state.out_time_us, 1_500_000);
        state.update("out_time_us", "N/A");
        assert_eq!(state.out_time_us, 1_500_000);
        state.update("out_time_us", "-10");
        assert_eq!(state.out_time_us, 0);
        state.update("progress", "continue");
        assert!(!state.complete);
        state.update("progress", "end");
        assert!(state.complete);
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("héllo", 4), "éllo");
    }

    #[tokio::test]
    async fn test_progress_lines_reach_completion() {
        let (sink, mut rx) = progress_channel();
        let script = "printf 'frame=1\\nout_time_us=1000000\\nprogress=continue\\nout_time_us=2000000\\nprogress=end\\n'";
        Transcoder::new("sh")
            .run(&sh(script), 2.0, &sink, &CancelFlag::new())
            .await
            .unwrap();
        let mut got = vec![];
        while let Ok(p) = rx.try_recv() {
            got.push(p.progress);
        }
        assert_eq!(got, vec![50, 100]);
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let err = Transcoder::new("sh")
            .run(
                &sh("echo boom >&2; exit 3"),
                1.0,
                &ProgressSink::disabled(),
                &CancelFlag::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CutroomError::Render { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let cancel = CancelFlag::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trip.cancel();
        });
        let started = std::time::Instant::now();
        let err = Transcoder::new("sh")
            .run(&sh("sleep 5"), 5.0, &ProgressSink::disabled(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CutroomError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let transcoder = Transcoder::new("cutroom-no-such-transcoder");
        assert!(!transcoder.is_available());
        let err = transcoder
            .run(&[], 1.0, &ProgressSink::disabled(), &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CutroomError::Unavailable { .. }));
    }

    #[test]
    fn test_shell_is_available() {
        assert!(Transcoder::new("sh").is_available());
        assert!(!Transcoder::new("/definitely/not/here").is_available());
    }
}
