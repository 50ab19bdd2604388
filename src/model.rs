use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fully resolved settings for one benchmark run, built from CLI arguments
/// and menu selections in `cli::build_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub prompts_file: PathBuf,
    pub mode: RunMode,
    pub server_bin: String,
    pub debug_env: String,
    pub log_dir: PathBuf,
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub typing_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub share_typing_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
    #[serde(with = "humantime_serde")]
    pub log_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub detect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub warmup: Duration,
    #[serde(with = "humantime_serde")]
    pub kill_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub marker: String,
    pub log_tail_lines: usize,
    pub default_model: String,
    pub share_command: String,
    pub transcript_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub results_dir: PathBuf,
    pub build_command: Option<String>,
}

/// Which benchmarking path a run takes.
///
/// `Timed` manages the local serving process and scrapes its log for
/// per-prompt durations; `Untimed` only injects prompts with a fixed dwell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Timed,
    Untimed,
}

/// Mutable state accumulated over one run.
///
/// Replaces what would otherwise be process-wide globals: the detected model
/// name, the ordered timing list, and the selected mode travel together
/// through the driver and into the converter.
#[derive(Debug)]
pub struct RunContext {
    pub model_name: String,
    pub timings: Vec<f64>,
    pub mode: RunMode,
}

impl RunContext {
    pub fn new(mode: RunMode, default_model: &str) -> Self {
        Self {
            model_name: default_model.to_string(),
            timings: Vec::new(),
            mode,
        }
    }
}

/// One completed user/assistant pair. `time` is the parsed or fallback
/// duration in milliseconds, `None` once the timing list is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
    pub time: Option<f64>,
}

/// Per-run summary embedded in the exported document. Field names match the
/// consuming dashboard's expected JSON exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub name: String,
    pub date: String,
    pub file_name: String,
    pub total_time: f64,
    pub prompt: Vec<Exchange>,
}

/// The exported conversation document: a single session keyed `"0"` holding
/// one run summary. Written once per converter run, never mutated after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDocument {
    #[serde(rename = "0")]
    pub session: Vec<RunSummary>,
}

#[cfg(test)]
impl RunConfig {
    /// Config with all delays zeroed so driver tests run instantly.
    pub(crate) fn for_tests(root: &std::path::Path) -> Self {
        Self {
            prompts_file: root.join("prompts_list.txt"),
            mode: RunMode::Timed,
            server_bin: "definitely-not-a-real-binary".to_string(),
            debug_env: "OLLAMA_DEBUG".to_string(),
            log_dir: root.join("logs"),
            settle_delay: Duration::ZERO,
            typing_interval: Duration::ZERO,
            share_typing_interval: Duration::ZERO,
            dwell: Duration::ZERO,
            log_timeout: Duration::ZERO,
            detect_timeout: Duration::ZERO,
            warmup: Duration::ZERO,
            kill_settle: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            marker: "total time".to_string(),
            log_tail_lines: 50,
            default_model: "granite3.1-dense:8b".to_string(),
            share_command: "/share".to_string(),
            transcript_dir: root.join("sessions"),
            staging_dir: root.join("outputfiles"),
            results_dir: root.join("prompt-results"),
            build_command: None,
        }
    }
}
