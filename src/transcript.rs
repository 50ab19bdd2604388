//! Transcript converter.
//!
//! Parses the chat app's exported markup into completed user/assistant
//! exchanges and emits the structured JSON document. The export format
//! quote-prefixes every line and opens with an assistant greeting, so the
//! first assistant block is discarded and quote markers are stripped twice
//! (once per line, once more when a block is flushed).

use crate::model::{ConversationDocument, Exchange, RunConfig, RunContext, RunSummary};
use crate::storage;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::OnceLock;
use time::macros::format_description;

const USER_HEADER: &str = "#### _User_";
const ASSISTANT_HEADER: &str = "#### _Assistant_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    User,
    Assistant,
}

static QUOTE_PREFIX: OnceLock<Regex> = OnceLock::new();

fn strip_quote_markers(line: &str) -> Cow<'_, str> {
    let re = QUOTE_PREFIX.get_or_init(|| Regex::new(r"^>+\s*").expect("static pattern"));
    re.replace(line, "")
}

/// Parse transcript text into completed exchanges, pairing each with the
/// next unused timing by arrival order. Timings beyond the exchange count
/// are left unused here; exchanges beyond the timing count get `None`.
pub fn parse_exchanges(text: &str, timings: &[f64], share_command: &str) -> Vec<Exchange> {
    let share = share_command.trim().to_lowercase();
    let mut current_role: Option<Role> = None;
    let mut buffer: Vec<String> = Vec::new();
    let mut pending_user: Option<String> = None;
    let mut first_assistant_skipped = false;
    let mut exchanges: Vec<Exchange> = Vec::new();

    for raw in text.lines() {
        let line = strip_quote_markers(raw).trim_end().to_string();
        if line.is_empty() {
            continue;
        }

        let header = match line.as_str() {
            ASSISTANT_HEADER => Some(Role::Assistant),
            USER_HEADER => Some(Role::User),
            _ => None,
        };

        if let Some(role) = header {
            if let Some(prev) = current_role {
                flush_block(
                    prev,
                    &buffer,
                    &share,
                    timings,
                    &mut pending_user,
                    &mut first_assistant_skipped,
                    &mut exchanges,
                );
            }
            current_role = Some(role);
            buffer.clear();
            continue;
        }

        if line.trim().to_lowercase() == share {
            continue;
        }
        buffer.push(line);
    }

    if let Some(role) = current_role {
        flush_block(
            role,
            &buffer,
            &share,
            timings,
            &mut pending_user,
            &mut first_assistant_skipped,
            &mut exchanges,
        );
    }

    exchanges
}

/// Flush one role's accumulated block at a role transition or end of input.
fn flush_block(
    role: Role,
    buffer: &[String],
    share: &str,
    timings: &[f64],
    pending_user: &mut Option<String>,
    first_assistant_skipped: &mut bool,
    exchanges: &mut Vec<Exchange>,
) {
    // Quote markers stripped once more; blank interior lines dropped.
    let content = buffer
        .iter()
        .map(|l| strip_quote_markers(l))
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if content.is_empty() || content.trim().to_lowercase() == share {
        return;
    }

    match role {
        Role::User => {
            // An unpaired earlier user block is dropped silently.
            *pending_user = Some(content);
        }
        Role::Assistant => {
            // The exporter opens every transcript with an assistant
            // greeting; that first block is not a real answer.
            if !*first_assistant_skipped {
                *first_assistant_skipped = true;
                return;
            }
            if let Some(user) = pending_user.take() {
                let time = timings.get(exchanges.len()).copied();
                exchanges.push(Exchange {
                    user,
                    assistant: content,
                    time,
                });
            }
        }
    }
}

/// Build the conversation document for one run. `total_time` sums every
/// recorded timing, including any the exchanges did not consume.
pub fn build_document(
    model_name: &str,
    date: &str,
    file_name: &str,
    exchanges: Vec<Exchange>,
    timings: &[f64],
) -> ConversationDocument {
    ConversationDocument {
        session: vec![RunSummary {
            name: model_name.to_string(),
            date: date.to_string(),
            file_name: file_name.to_string(),
            total_time: timings.iter().sum(),
            prompt: exchanges,
        }],
    }
}

/// End-to-end conversion: read the newest staged transcript, pair exchanges
/// with the run's timings, and write the JSON document under the results
/// root. Returns the path of the written file.
pub fn generate_json(cfg: &RunConfig, ctx: &RunContext) -> Result<PathBuf> {
    let transcript = storage::latest_file_in(&cfg.staging_dir)?
        .ok_or_else(|| anyhow!("no staged transcript in {}", cfg.staging_dir.display()))?;
    println!(
        "JSON file is being created on the basis of: {}",
        transcript.display()
    );

    let text = std::fs::read_to_string(&transcript)
        .with_context(|| format!("read transcript {}", transcript.display()))?;

    let stamp = storage::local_now()
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "unknown".to_string());
    let file_name = format!("{}_{}.json", ctx.model_name, stamp);

    let exchanges = parse_exchanges(&text, &ctx.timings, &cfg.share_command);
    let doc = build_document(&ctx.model_name, &stamp, &file_name, exchanges, &ctx.timings);
    storage::write_document(&cfg.results_dir, &ctx.model_name, &file_name, &doc)
}
