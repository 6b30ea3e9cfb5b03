use std::path::Path;
use std::time::Duration;

use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::Multiplexer;
use crate::error::TmuxError;

/// Polling budget for [`wait_for_text`]
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub interval: Duration,
    /// Scroll-back lines captured per poll
    pub lines: usize,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            interval: Duration::from_millis(500),
            lines: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Matched,
    /// The budget ran out; carries the final capture for diagnosis
    TimedOut { last_capture: String },
}

impl WaitOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, WaitOutcome::Matched)
    }
}

/// Poll a pane until `pattern` shows up in its output or `opts.timeout` passes.
///
/// tmux has no way to block on pane output, so this captures, sleeps
/// `opts.interval` and tries again. Not finding the text is a normal
/// outcome. Errors are only returned when tmux itself fails.
pub async fn wait_for_text<M: Multiplexer + ?Sized>(
    mux: &M,
    socket: &Path,
    target: &str,
    pattern: &Regex,
    opts: WaitOptions,
) -> Result<WaitOutcome, TmuxError> {
    let start = Instant::now();
    let mut polls = 0u32;

    loop {
        let text = mux.capture_pane(socket, target, opts.lines).await?;
        polls += 1;
        if pattern.is_match(&text) {
            debug!(target, polls, elapsed = ?start.elapsed(), "pattern found");
            return Ok(WaitOutcome::Matched);
        }
        if start.elapsed() >= opts.timeout {
            break;
        }
        sleep(opts.interval).await;
    }

    let last_capture = mux.capture_pane(socket, target, opts.lines).await?;
    warn!(
        target,
        pattern = pattern.as_str(),
        timeout = ?opts.timeout,
        "timed out waiting for pattern; last output:\n{}",
        last_capture
    );
    Ok(WaitOutcome::TimedOut { last_capture })
}
