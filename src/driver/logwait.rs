//! Bounded polling for the completion marker in the server log.

use crate::server::LogSource;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a bounded wait on the server log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogWait {
    /// A log line containing the marker, verbatim.
    Matched(String),
    TimedOut,
}

/// Parameters for one marker wait.
pub struct WaitParams<'a> {
    pub source: &'a dyn LogSource,
    pub marker: &'a str,
    pub tail_lines: usize,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Poll the log tail until a line contains `marker` (case-insensitive
/// substring) or the deadline passes. The tail is always inspected at least
/// once, even with a zero timeout.
pub async fn wait_for_marker(params: WaitParams<'_>) -> LogWait {
    let WaitParams {
        source,
        marker,
        tail_lines,
        timeout,
        poll_interval,
    } = params;

    let marker = marker.to_lowercase();
    let deadline = Instant::now() + timeout;
    loop {
        for line in source.latest_logs(tail_lines) {
            if line.to_lowercase().contains(&marker) {
                return LogWait::Matched(line);
            }
        }
        if Instant::now() >= deadline {
            return LogWait::TimedOut;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

static MS_VALUE: OnceLock<Regex> = OnceLock::new();

/// Extract the millisecond value from a matched log line, e.g.
/// `... total time = 87.5 ms ...` yields `87.5`.
pub fn parse_marker_ms(line: &str) -> Option<f64> {
    let re = MS_VALUE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*ms").expect("static pattern"));
    re.captures(line)?.get(1)?.as_str().parse().ok()
}
