use crate::driver;
use crate::inject::EnigoInjector;
use crate::model::{RunConfig, RunContext, RunMode};
use crate::server::{LogSource, ServerManager};
use crate::{storage, transcript};
use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{theme::ColorfulTheme, Select};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "prompt-bench",
    version,
    about = "Drive a chat UI with scripted prompts and capture model timings"
)]
pub struct Cli {
    /// Prompt file to send (skips the input-file menu)
    #[arg(long)]
    pub prompts_file: Option<PathBuf>,

    /// Benchmark mode (skips the mode menu)
    #[arg(long, value_enum)]
    pub mode: Option<RunMode>,

    /// Serving binary managed in timed mode
    #[arg(long, default_value = "ollama")]
    pub server_bin: String,

    /// Environment variable set to 1 so the server emits per-request timings
    #[arg(long, default_value = "OLLAMA_DEBUG")]
    pub debug_env: String,

    /// Directory for server log files
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Delay before typing each prompt
    #[arg(long, default_value = "3s")]
    pub settle_delay: humantime::Duration,

    /// Per-character typing interval
    #[arg(long, default_value = "100ms")]
    pub typing_interval: humantime::Duration,

    /// Per-character typing interval for the share command
    #[arg(long, default_value = "80ms")]
    pub share_typing_interval: humantime::Duration,

    /// Wait after each prompt in untimed mode
    #[arg(long, default_value = "20s")]
    pub dwell: humantime::Duration,

    /// Deadline for finding the completion marker in the server log
    #[arg(long, default_value = "60s")]
    pub log_timeout: humantime::Duration,

    /// Deadline for detecting the active model name
    #[arg(long, default_value = "30s")]
    pub detect_timeout: humantime::Duration,

    /// Wait for the server to accept requests after spawning
    #[arg(long, default_value = "10s")]
    pub warmup: humantime::Duration,

    /// Settle period after killing a conflicting server instance
    #[arg(long, default_value = "3s")]
    pub kill_settle: humantime::Duration,

    /// Interval between log/status polls
    #[arg(long, default_value = "1s")]
    pub poll_interval: humantime::Duration,

    /// Completion marker searched for in the server log (case-insensitive)
    #[arg(long, default_value = "total time")]
    pub marker: String,

    /// Log lines fetched per poll
    #[arg(long, default_value_t = 50)]
    pub log_tail_lines: usize,

    /// Model identifier used when detection fails
    #[arg(long, default_value = "granite3.1-dense:8b")]
    pub default_model: String,

    /// Chat command that exports the transcript
    #[arg(long, default_value = "/share")]
    pub share_command: String,

    /// Directory the chat app exports transcripts into
    /// (defaults to ~/.continue/sessions)
    #[arg(long)]
    pub transcript_dir: Option<PathBuf>,

    /// Local staging directory for copied transcripts
    #[arg(long, default_value = "outputfiles")]
    pub staging_dir: PathBuf,

    /// Root directory for generated JSON documents
    #[arg(long, default_value = "prompt-results")]
    pub results_dir: PathBuf,

    /// Shell command run after conversion (e.g. a dashboard rebuild)
    #[arg(long)]
    pub build_command: Option<String>,
}

/// Build a `RunConfig` from CLI arguments and menu selections.
pub fn build_config(args: &Cli, prompts_file: PathBuf, mode: RunMode) -> RunConfig {
    RunConfig {
        prompts_file,
        mode,
        server_bin: args.server_bin.clone(),
        debug_env: args.debug_env.clone(),
        log_dir: args.log_dir.clone(),
        settle_delay: Duration::from(args.settle_delay),
        typing_interval: Duration::from(args.typing_interval),
        share_typing_interval: Duration::from(args.share_typing_interval),
        dwell: Duration::from(args.dwell),
        log_timeout: Duration::from(args.log_timeout),
        detect_timeout: Duration::from(args.detect_timeout),
        warmup: Duration::from(args.warmup),
        kill_settle: Duration::from(args.kill_settle),
        poll_interval: Duration::from(args.poll_interval),
        marker: args.marker.clone(),
        log_tail_lines: args.log_tail_lines,
        default_model: args.default_model.clone(),
        share_command: args.share_command.clone(),
        transcript_dir: args
            .transcript_dir
            .clone()
            .unwrap_or_else(default_transcript_dir),
        staging_dir: args.staging_dir.clone(),
        results_dir: args.results_dir.clone(),
        build_command: args.build_command.clone(),
    }
}

fn default_transcript_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".continue")
        .join("sessions")
}

/// Fixed selection menu. Returns `None` when the user picks Exit.
fn select_from_menu(title: &str, options: &[&str]) -> Result<Option<usize>> {
    let choice = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(title)
        .items(options)
        .default(0)
        .interact()
        .context("menu selection failed")?;
    if options[choice] == "Exit" {
        Ok(None)
    } else {
        Ok(Some(choice))
    }
}

fn choose_prompts_file(args: &Cli) -> Result<Option<PathBuf>> {
    if let Some(path) = &args.prompts_file {
        return Ok(Some(path.clone()));
    }
    Ok(
        match select_from_menu(
            "Select prompt file",
            &["Simple Chat Prompts", "Context Providers", "Exit"],
        )? {
            Some(0) => Some(PathBuf::from("prompts_list.txt")),
            Some(_) => Some(PathBuf::from("context_providers.txt")),
            None => None,
        },
    )
}

fn choose_mode(args: &Cli) -> Result<Option<RunMode>> {
    if let Some(mode) = args.mode {
        return Ok(Some(mode));
    }
    Ok(
        match select_from_menu("Select model type", &["Granite", "Other Models", "Exit"])? {
            Some(0) => Some(RunMode::Timed),
            Some(_) => Some(RunMode::Untimed),
            None => None,
        },
    )
}

pub async fn run(args: Cli) -> Result<()> {
    let Some(prompts_file) = choose_prompts_file(&args)? else {
        return Ok(());
    };
    let Some(mode) = choose_mode(&args)? else {
        return Ok(());
    };

    let cfg = build_config(&args, prompts_file, mode);
    let mut ctx = RunContext::new(mode, &cfg.default_model);

    let mut server = None;
    if mode == RunMode::Timed {
        println!("\nStarting {} server...", cfg.server_bin);
        let mut manager = ServerManager::new(&cfg);
        if !manager.start().await {
            println!(
                "Failed to start the {} server; aborting the timed run.",
                cfg.server_bin
            );
            return Ok(());
        }
        server = Some(manager);
    }

    println!(
        "\nExecuting prompts from '{}' ({:?} mode)",
        cfg.prompts_file.display(),
        mode
    );
    let mut injector = EnigoInjector::new()
        .map_err(|e| anyhow::anyhow!("initialize keystroke backend: {e}"))?;

    let log_source = server.as_ref().map(|s| s as &dyn LogSource);
    if let Err(e) = driver::run_prompts(&cfg, &mut ctx, &mut injector, log_source).await {
        println!("{e:#}");
    }

    if let Some(manager) = &server {
        let marker_lines = manager.search_logs(&cfg.marker);
        tracing::debug!(
            "server log recorded {} '{}' line(s) this run",
            marker_lines.len(),
            cfg.marker
        );
    }

    driver::share_transcript(&cfg, &mut injector).await;
    if let Err(e) = storage::stage_transcript(&cfg.transcript_dir, &cfg.staging_dir) {
        println!("Could not stage the exported transcript: {e:#}");
    }

    if ctx.timings.is_empty() {
        println!("\nNo timings recorded; exchanges will carry no durations.");
    } else {
        println!("\nRecorded {} timing(s), generating JSON...", ctx.timings.len());
    }
    match transcript::generate_json(&cfg, &ctx) {
        Ok(path) => println!("Wrote {}", path.display()),
        Err(e) => println!("Transcript conversion failed: {e:#}"),
    }

    if let Some(mut manager) = server {
        manager.stop().await;
    }

    if let Some(cmd) = &cfg.build_command {
        run_build_command(cmd).await;
    }

    println!("\nAll done!");
    Ok(())
}

/// Post-run build hook. Exit status is reported, never propagated.
async fn run_build_command(cmd: &str) {
    println!("\nRunning post-run build: {cmd}");
    match tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .status()
        .await
    {
        Ok(status) if status.success() => println!("Build finished."),
        Ok(status) => println!("Build exited with {status}."),
        Err(e) => println!("Build failed to start: {e}"),
    }
}
