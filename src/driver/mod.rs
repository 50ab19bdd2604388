//! Automation driver.
//!
//! Iterates prompt lines from the input file and runs one send cycle per
//! prompt: settle, inject keystrokes, submit, then either scrape the server
//! log for a timing (timed mode) or dwell (untimed mode). Exactly one timing
//! is recorded per successfully injected prompt in timed mode.

mod detect;
mod logwait;

pub use logwait::{parse_marker_ms, wait_for_marker, LogWait, WaitParams};

use crate::inject::{ControlKey, InjectError, Injector};
use crate::model::{RunConfig, RunContext, RunMode};
use crate::server::LogSource;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::warn;

/// Non-blank trimmed prompt lines, in file order.
pub fn read_prompt_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read prompt file {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Send every prompt from the configured input file, accumulating timings
/// into the run context in timed mode.
pub async fn run_prompts(
    cfg: &RunConfig,
    ctx: &mut RunContext,
    injector: &mut dyn Injector,
    server: Option<&dyn LogSource>,
) -> Result<()> {
    let prompts = read_prompt_lines(&cfg.prompts_file)?;
    for prompt in &prompts {
        println!("\n> Sending prompt: {prompt}");
        println!("  [focus the chat input now]");
        send_prompt(cfg, ctx, injector, server, prompt).await;
    }
    Ok(())
}

/// One send cycle. The fail-safe aborts only this prompt; every other path
/// in timed mode ends with exactly one recorded timing.
async fn send_prompt(
    cfg: &RunConfig,
    ctx: &mut RunContext,
    injector: &mut dyn Injector,
    server: Option<&dyn LogSource>,
    prompt: &str,
) {
    // Fallback timing covers the whole cycle, settle sleep included.
    let local_start = Instant::now();
    tokio::time::sleep(cfg.settle_delay).await;

    if let Err(e) = inject_prompt(injector, prompt, cfg.typing_interval) {
        report_injection_failure(&e);
        return;
    }

    match (ctx.mode, server) {
        (RunMode::Timed, Some(source)) => {
            let timing = resolve_timing(cfg, source, local_start).await;
            ctx.timings.push(timing);

            // Only the very first timing triggers model-name detection.
            if ctx.timings.len() == 1 {
                match detect::detect_model_name(
                    &cfg.server_bin,
                    cfg.detect_timeout,
                    cfg.poll_interval,
                )
                .await
                {
                    Some(name) => {
                        println!("Detected model: {name}");
                        ctx.model_name = name;
                    }
                    None => {
                        println!(
                            "Failed to detect model name automatically; using {}",
                            cfg.default_model
                        );
                        ctx.model_name = cfg.default_model.clone();
                    }
                }
            }
        }
        _ => tokio::time::sleep(cfg.dwell).await,
    }
}

fn inject_prompt(
    injector: &mut dyn Injector,
    prompt: &str,
    interval: Duration,
) -> Result<(), InjectError> {
    injector.type_text(prompt, interval)?;
    injector.press(ControlKey::Enter)?;
    injector.press(ControlKey::Enter)
}

fn report_injection_failure(e: &InjectError) {
    match e {
        InjectError::FailSafe => {
            warn!("fail-safe triggered, skipping current prompt");
            println!("Fail-safe triggered; skipping this prompt.");
        }
        other => {
            warn!("keystroke injection failed: {other}");
            println!("Could not inject prompt: {other}");
        }
    }
}

/// Parsed log timing when available, wall-clock fallback otherwise.
async fn resolve_timing(cfg: &RunConfig, source: &dyn LogSource, local_start: Instant) -> f64 {
    let outcome = wait_for_marker(WaitParams {
        source,
        marker: &cfg.marker,
        tail_lines: cfg.log_tail_lines,
        timeout: cfg.log_timeout,
        poll_interval: cfg.poll_interval,
    })
    .await;

    match outcome {
        LogWait::Matched(line) => match parse_marker_ms(&line) {
            Some(ms) => {
                println!("Parsed timing from log: {ms} ms");
                ms
            }
            None => fallback_timing(local_start, "marker line had no millisecond value"),
        },
        LogWait::TimedOut => fallback_timing(local_start, "marker not found before timeout"),
    }
}

fn fallback_timing(local_start: Instant, reason: &str) -> f64 {
    let elapsed_ms = local_start.elapsed().as_secs_f64() * 1000.0;
    warn!("log lookup failed ({reason}); using fallback timing");
    println!("Log lookup failed ({reason}); using local elapsed {elapsed_ms:.2} ms");
    elapsed_ms
}

/// Share/Export step: issue the chat app's share command so it writes the
/// transcript file. Injection failures are reported, never propagated.
pub async fn share_transcript(cfg: &RunConfig, injector: &mut dyn Injector) {
    if let Err(e) = inject_prompt(injector, &cfg.share_command, cfg.share_typing_interval) {
        report_injection_failure(&e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    /// Records typed text; optionally fails the Nth `type_text` call.
    struct ScriptedInjector {
        typed: Vec<String>,
        presses: usize,
        fail_on_call: Option<usize>,
        calls: usize,
    }

    impl ScriptedInjector {
        fn new() -> Self {
            Self {
                typed: Vec::new(),
                presses: 0,
                fail_on_call: None,
                calls: 0,
            }
        }

        fn failing_on(call: usize) -> Self {
            Self {
                fail_on_call: Some(call),
                ..Self::new()
            }
        }
    }

    impl Injector for ScriptedInjector {
        fn type_text(&mut self, text: &str, _interval: Duration) -> Result<(), InjectError> {
            self.calls += 1;
            if self.fail_on_call == Some(self.calls) {
                return Err(InjectError::FailSafe);
            }
            self.typed.push(text.to_string());
            Ok(())
        }

        fn press(&mut self, _key: ControlKey) -> Result<(), InjectError> {
            self.presses += 1;
            Ok(())
        }
    }

    struct StaticLogs(Vec<String>);

    impl LogSource for StaticLogs {
        fn latest_logs(&self, n: usize) -> Vec<String> {
            let skip = self.0.len().saturating_sub(n);
            self.0.iter().skip(skip).cloned().collect()
        }
    }

    fn write_prompts(dir: &Path, contents: &str) -> RunConfig {
        let cfg = RunConfig::for_tests(dir);
        let mut f = std::fs::File::create(&cfg.prompts_file).unwrap();
        write!(f, "{contents}").unwrap();
        cfg
    }

    #[test]
    fn prompt_lines_skip_blanks_and_trim() {
        let dir = tempdir().unwrap();
        let cfg = write_prompts(dir.path(), "first\n\n  second  \n   \nthird\n");

        let lines = read_prompt_lines(&cfg.prompts_file).unwrap();
        assert_eq!(lines, vec!["first", "second", "third"]);
    }

    #[test]
    fn missing_prompt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let cfg = RunConfig::for_tests(dir.path());
        assert!(read_prompt_lines(&cfg.prompts_file).is_err());
    }

    #[tokio::test]
    async fn timed_mode_records_one_parsed_timing_per_prompt() {
        let dir = tempdir().unwrap();
        let cfg = write_prompts(dir.path(), "What is 2+2?\nAnd 3+3?\n");
        let mut ctx = RunContext::new(RunMode::Timed, &cfg.default_model);
        let mut injector = ScriptedInjector::new();
        let logs = StaticLogs(vec!["llama: total time = 87.5 ms".to_string()]);

        run_prompts(&cfg, &mut ctx, &mut injector, Some(&logs))
            .await
            .unwrap();

        assert_eq!(injector.typed, vec!["What is 2+2?", "And 3+3?"]);
        // submit + newline per prompt
        assert_eq!(injector.presses, 4);
        assert_eq!(ctx.timings, vec![87.5, 87.5]);
        // detection cannot run here, so the configured default sticks
        assert_eq!(ctx.model_name, cfg.default_model);
    }

    #[tokio::test]
    async fn timed_mode_falls_back_to_wall_clock_on_timeout() {
        let dir = tempdir().unwrap();
        let cfg = write_prompts(dir.path(), "only prompt\n");
        let mut ctx = RunContext::new(RunMode::Timed, &cfg.default_model);
        let mut injector = ScriptedInjector::new();
        let logs = StaticLogs(vec!["nothing useful here".to_string()]);

        run_prompts(&cfg, &mut ctx, &mut injector, Some(&logs))
            .await
            .unwrap();

        assert_eq!(ctx.timings.len(), 1);
        assert!(ctx.timings[0] >= 0.0);
    }

    #[tokio::test]
    async fn marker_without_number_also_falls_back() {
        let dir = tempdir().unwrap();
        let cfg = write_prompts(dir.path(), "only prompt\n");
        let mut ctx = RunContext::new(RunMode::Timed, &cfg.default_model);
        let mut injector = ScriptedInjector::new();
        let logs = StaticLogs(vec!["total time = unknown".to_string()]);

        run_prompts(&cfg, &mut ctx, &mut injector, Some(&logs))
            .await
            .unwrap();

        assert_eq!(ctx.timings.len(), 1);
    }

    #[tokio::test]
    async fn untimed_mode_records_no_timings() {
        let dir = tempdir().unwrap();
        let mut cfg = write_prompts(dir.path(), "a\nb\nc\n");
        cfg.mode = RunMode::Untimed;
        let mut ctx = RunContext::new(RunMode::Untimed, &cfg.default_model);
        let mut injector = ScriptedInjector::new();

        run_prompts(&cfg, &mut ctx, &mut injector, None)
            .await
            .unwrap();

        assert_eq!(injector.typed.len(), 3);
        assert!(ctx.timings.is_empty());
    }

    #[tokio::test]
    async fn fail_safe_skips_current_prompt_and_continues() {
        let dir = tempdir().unwrap();
        let cfg = write_prompts(dir.path(), "first\nsecond\n");
        let mut ctx = RunContext::new(RunMode::Timed, &cfg.default_model);
        let mut injector = ScriptedInjector::failing_on(1);
        let logs = StaticLogs(vec!["total time = 10 ms".to_string()]);

        run_prompts(&cfg, &mut ctx, &mut injector, Some(&logs))
            .await
            .unwrap();

        // the aborted prompt records no timing; the run carries on
        assert_eq!(injector.typed, vec!["second"]);
        assert_eq!(ctx.timings, vec![10.0]);
    }

    #[tokio::test]
    async fn share_injects_command_and_confirms_twice() {
        let dir = tempdir().unwrap();
        let cfg = RunConfig::for_tests(dir.path());
        let mut injector = ScriptedInjector::new();

        share_transcript(&cfg, &mut injector).await;

        assert_eq!(injector.typed, vec!["/share"]);
        assert_eq!(injector.presses, 2);
    }
}
