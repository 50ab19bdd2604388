//! Model-name detection via the serving CLI's status output.
//!
//! `<binary> ps` prints a tabular listing of loaded models; the first column
//! of the first data row is the active model's identifier.

use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

/// Poll the status command until a model row appears or the deadline passes.
/// Returns `None` on timeout; the caller falls back to a configured default.
pub async fn detect_model_name(
    binary: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Option<String> {
    println!("Waiting to fetch the model name...");
    let start = Instant::now();
    while start.elapsed() < timeout {
        render_countdown(start.elapsed(), timeout);
        match status_output(binary).await {
            Ok(stdout) => {
                if let Some(name) = first_model_row(&stdout) {
                    println!();
                    return Some(name);
                }
            }
            Err(e) => debug!("status command failed: {e:#}"),
        }
        tokio::time::sleep(poll_interval).await;
    }
    println!();
    None
}

async fn status_output(binary: &str) -> Result<String> {
    let out = Command::new(binary)
        .arg("ps")
        .output()
        .await
        .with_context(|| format!("run `{binary} ps`"))?;
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// First column of the first data row (the line after the header).
fn first_model_row(stdout: &str) -> Option<String> {
    let row = stdout.lines().nth(1)?.trim();
    if row.is_empty() {
        return None;
    }
    row.split_whitespace().next().map(str::to_string)
}

fn render_countdown(elapsed: Duration, timeout: Duration) {
    let total = timeout.as_secs().max(1) as usize;
    let done = (elapsed.as_secs() as usize).min(total);
    print!(
        "\r[{}{}] {}s remaining",
        "#".repeat(done),
        "-".repeat(total - done),
        total - done
    );
    let _ = std::io::stdout().flush();
}
