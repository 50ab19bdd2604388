//! Lifecycle management for the local model-serving process.
//!
//! Owns at most one `<binary> serve` child per run, with combined
//! stdout/stderr redirected into a timestamped log file. Log queries are
//! best-effort: read errors are warned about and surface as empty results,
//! never as failures in the caller's flow.

use crate::model::RunConfig;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use time::macros::format_description;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Read access to the server's current log file, split out so the driver's
/// polling loop can run against a fake in tests.
pub trait LogSource {
    /// Last `n` lines of the current log, oldest first. Empty when no log
    /// file exists yet or it cannot be read.
    fn latest_logs(&self, n: usize) -> Vec<String>;
}

pub struct ServerManager {
    binary: String,
    debug_env: String,
    log_dir: PathBuf,
    warmup: Duration,
    kill_settle: Duration,
    log_file: Option<PathBuf>,
    child: Option<Child>,
}

impl ServerManager {
    pub fn new(cfg: &RunConfig) -> Self {
        Self {
            binary: cfg.server_bin.clone(),
            debug_env: cfg.debug_env.clone(),
            log_dir: cfg.log_dir.clone(),
            warmup: cfg.warmup,
            kill_settle: cfg.kill_settle,
            log_file: None,
            child: None,
        }
    }

    /// Start the serving process. A conflicting instance is killed first
    /// (hard kill, then a settle period). Returns `false` instead of an
    /// error on any failure so the caller can abort just the timed path.
    pub async fn start(&mut self) -> bool {
        match self.try_start().await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to start {} server: {e:#}", self.binary);
                println!("Error starting {} server: {e:#}", self.binary);
                false
            }
        }
    }

    async fn try_start(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir)
            .with_context(|| format!("create log directory {}", self.log_dir.display()))?;

        if process_running(&self.binary).await {
            println!(
                "Warning: {} server is already running. Stopping and restarting...",
                self.binary
            );
            kill_by_name(&self.binary).await;
            tokio::time::sleep(self.kill_settle).await;
        }

        let path = self.log_dir.join(log_file_name(&self.binary));
        let log = std::fs::File::create(&path)
            .with_context(|| format!("create log file {}", path.display()))?;
        let err = log.try_clone().context("clone log handle for stderr")?;

        let child = Command::new(&self.binary)
            .arg("serve")
            .env(&self.debug_env, "1")
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err))
            .spawn()
            .with_context(|| format!("spawn `{} serve`", self.binary))?;

        info!(pid = child.id(), log = %path.display(), "server spawned");
        self.log_file = Some(path.clone());
        self.child = Some(child);

        // Give the server time to accept requests before the first prompt.
        tokio::time::sleep(self.warmup).await;

        if let Some(pid) = self.child.as_ref().and_then(Child::id) {
            println!("{} server started. Process ID: {pid}", self.binary);
        }
        println!("Server logs are being written to: {}", path.display());
        Ok(())
    }

    /// All log lines containing the literal substring `term`.
    pub fn search_logs(&self, term: &str) -> Vec<String> {
        let Some(path) = &self.log_file else {
            return Vec::new();
        };
        match std::fs::read_to_string(path) {
            Ok(text) => text
                .lines()
                .filter(|l| l.contains(term))
                .map(|l| l.trim_end().to_string())
                .collect(),
            Err(e) => {
                warn!("error searching logs: {e}");
                Vec::new()
            }
        }
    }

    /// Graceful stop of the owned child, then a hard kill of anything else
    /// still matching the binary name. Both halves are best-effort.
    pub async fn stop(&mut self) {
        if let Some(child) = self.child.take() {
            if let Some(pid) = child.id() {
                terminate_pid(pid).await;
            }
            println!("{} server stopped.", self.binary);
        }
        kill_by_name(&self.binary).await;
    }
}

impl LogSource for ServerManager {
    fn latest_logs(&self, n: usize) -> Vec<String> {
        let Some(path) = &self.log_file else {
            return Vec::new();
        };
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let lines: Vec<&str> = text.lines().collect();
                lines
                    .iter()
                    .skip(lines.len().saturating_sub(n))
                    .map(|l| l.to_string())
                    .collect()
            }
            Err(e) => {
                warn!("error reading logs: {e}");
                Vec::new()
            }
        }
    }
}

/// Timestamped log file name, one per `start()` call.
fn log_file_name(binary: &str) -> String {
    let stamp = crate::storage::local_now()
        .format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{binary}_server_{stamp}.log")
}

/// Whether any running process matches `name` (substring, like the serving
/// CLI's own process naming).
async fn process_running(name: &str) -> bool {
    match Command::new("pgrep")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            warn!("pgrep {name} failed: {e}");
            false
        }
    }
}

/// Hard-kill every process matching `name`. Failures are non-fatal.
async fn kill_by_name(name: &str) {
    if let Err(e) = Command::new("pkill")
        .arg("-9")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        warn!("pkill {name} failed: {e}");
    }
}

async fn terminate_pid(pid: u32) {
    if let Err(e) = Command::new("kill")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        warn!("terminate pid {pid} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    fn manager_with_log(dir: &Path, lines: &[&str]) -> ServerManager {
        let cfg = RunConfig::for_tests(dir);
        let mut mgr = ServerManager::new(&cfg);
        let path = dir.join("server.log");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        mgr.log_file = Some(path);
        mgr
    }

    #[test]
    fn latest_logs_returns_tail_in_order() {
        let dir = tempdir().unwrap();
        let mgr = manager_with_log(dir.path(), &["one", "two", "three", "four"]);

        assert_eq!(mgr.latest_logs(2), vec!["three", "four"]);
        assert_eq!(mgr.latest_logs(10).len(), 4);
    }

    #[test]
    fn latest_logs_without_log_file_is_empty() {
        let dir = tempdir().unwrap();
        let cfg = RunConfig::for_tests(dir.path());
        let mgr = ServerManager::new(&cfg);

        assert!(mgr.latest_logs(10).is_empty());
    }

    #[test]
    fn latest_logs_swallows_read_errors() {
        let dir = tempdir().unwrap();
        let cfg = RunConfig::for_tests(dir.path());
        let mut mgr = ServerManager::new(&cfg);
        mgr.log_file = Some(dir.path().join("missing.log"));

        assert!(mgr.latest_logs(10).is_empty());
    }

    #[test]
    fn search_logs_matches_literal_substring() {
        let dir = tempdir().unwrap();
        let mgr = manager_with_log(
            dir.path(),
            &[
                "llama_server: load complete",
                "llama_server: total time = 87.5 ms",
                "unrelated line",
            ],
        );

        let hits = mgr.search_logs("total time");
        assert_eq!(hits, vec!["llama_server: total time = 87.5 ms"]);
        assert!(mgr.search_logs("no such needle").is_empty());
    }

    #[test]
    fn log_file_name_carries_binary_and_timestamp() {
        let name = log_file_name("ollama");
        assert!(name.starts_with("ollama_server_"));
        assert!(name.ends_with(".log"));
        // ollama_server_YYYYmmdd_HHMMSS.log
        let stamp = name
            .trim_start_matches("ollama_server_")
            .trim_end_matches(".log");
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'_');
    }
}
