//! Output-file management: staging copies of exported transcripts and
//! writing generated result documents.

use crate::model::ConversationDocument;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::warn;

/// Local wall-clock time, falling back to UTC when the offset is
/// undeterminable (e.g. multi-threaded environments on some platforms).
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Most recently modified file directly inside `dir`, if any.
pub fn latest_file_in(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?
    {
        let entry = entry.context("read directory entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, p)| p))
}

/// Copy the newest exported transcript into the local staging directory.
/// Returns `None` (with a warning) when the export directory is empty or
/// missing; the run continues without a transcript.
pub fn stage_transcript(transcript_dir: &Path, staging_dir: &Path) -> Result<Option<PathBuf>> {
    let Some(src) = latest_file_in(transcript_dir)? else {
        warn!("no transcript found in {}", transcript_dir.display());
        println!(
            "Warning: no exported transcript found in {}",
            transcript_dir.display()
        );
        return Ok(None);
    };

    std::fs::create_dir_all(staging_dir)
        .with_context(|| format!("create staging directory {}", staging_dir.display()))?;
    let name = src
        .file_name()
        .context("transcript path has no file name")?;
    let dest = staging_dir.join(name);
    std::fs::copy(&src, &dest)
        .with_context(|| format!("copy {} to {}", src.display(), dest.display()))?;
    println!("Staged transcript: {}", dest.display());
    Ok(Some(dest))
}

/// Write the document to `<results_root>/<model_name>/<file_name>`, creating
/// the model directory if absent.
pub fn write_document(
    results_root: &Path,
    model_name: &str,
    file_name: &str,
    doc: &ConversationDocument,
) -> Result<PathBuf> {
    let dir = results_root.join(model_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create results directory {}", dir.display()))?;
    let path = dir.join(file_name);
    let json = serde_json::to_string_pretty(doc).context("serialize conversation document")?;
    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    println!("Final JSON file name: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exchange, RunSummary};
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn touch(path: &Path, age: Duration) {
        File::create(path).unwrap();
        let f = File::options().write(true).open(path).unwrap();
        f.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn latest_file_prefers_newest_modification() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("old.md"), Duration::from_secs(600));
        touch(&dir.path().join("new.md"), Duration::from_secs(5));
        touch(&dir.path().join("mid.md"), Duration::from_secs(60));

        let latest = latest_file_in(dir.path()).unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "new.md");
    }

    #[test]
    fn latest_file_in_missing_or_empty_dir_is_none() {
        let dir = tempdir().unwrap();
        assert!(latest_file_in(&dir.path().join("nope")).unwrap().is_none());
        assert!(latest_file_in(dir.path()).unwrap().is_none());
    }

    #[test]
    fn stage_transcript_copies_newest_export() {
        let dir = tempdir().unwrap();
        let exports = dir.path().join("sessions");
        let staging = dir.path().join("outputfiles");
        std::fs::create_dir_all(&exports).unwrap();
        touch(&exports.join("stale.md"), Duration::from_secs(600));
        std::fs::write(exports.join("fresh.md"), "> #### _User_\n> hi\n").unwrap();

        let staged = stage_transcript(&exports, &staging).unwrap().unwrap();
        assert_eq!(staged.file_name().unwrap(), "fresh.md");
        assert!(staged.exists());
    }

    #[test]
    fn stage_transcript_without_exports_is_noop() {
        let dir = tempdir().unwrap();
        let staged =
            stage_transcript(&dir.path().join("sessions"), &dir.path().join("out")).unwrap();
        assert!(staged.is_none());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn write_document_creates_model_directory() {
        let dir = tempdir().unwrap();
        let doc = ConversationDocument {
            session: vec![RunSummary {
                name: "m".to_string(),
                date: "20250101T000000".to_string(),
                file_name: "m_20250101T000000.json".to_string(),
                total_time: 0.0,
                prompt: vec![Exchange {
                    user: "q".to_string(),
                    assistant: "a".to_string(),
                    time: None,
                }],
            }],
        };

        let path = write_document(dir.path(), "m", "m_20250101T000000.json", &doc).unwrap();
        assert!(path.ends_with("m/m_20250101T000000.json"));

        let text = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["0"][0]["file_name"], "m_20250101T000000.json");
    }
}
