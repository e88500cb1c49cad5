use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::mutator::BackupStatus;
use crate::run::FileOutcome;

const MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeLogEntry {
    pub timestamp: String,
    pub path: String,
    pub action: String,
    pub replacements: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChangeLogEntry {
    pub fn from_outcome(outcome: &FileOutcome, dry_run: bool) -> Self {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        let path = outcome.path.display().to_string();
        match &outcome.result {
            Ok(report) => {
                let action = match report.replacements {
                    0 => "not-found",
                    _ if dry_run => "dry-run",
                    _ => "replaced",
                };
                let (backup, message) = match &report.backup {
                    Some(BackupStatus::Created(bak)) => (Some(bak.display().to_string()), None),
                    Some(BackupStatus::Failed(err)) => (None, Some(err.to_string())),
                    None => (None, None),
                };
                Self {
                    timestamp,
                    path,
                    action: action.into(),
                    replacements: report.replacements,
                    encoding: Some(report.encoding.to_string()),
                    backup,
                    message,
                }
            }
            Err(err) => Self {
                timestamp,
                path,
                action: "error".into(),
                replacements: 0,
                encoding: None,
                backup: None,
                message: Some(err.to_string()),
            },
        }
    }
}

/// Appends one JSON line to the change log at `log_path`, keeping only the
/// newest entries.
pub fn record_outcome(log_path: &Path, outcome: &FileOutcome, dry_run: bool) -> Result<()> {
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let entry = ChangeLogEntry::from_outcome(outcome, dry_run);
    let json = serde_json::to_string(&entry)?;
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;
    writeln!(file, "{json}")?;
    truncate_log(log_path)?;
    Ok(())
}

/// The last `tail` entries, oldest first. A missing log reads as empty.
pub fn read_recent(log_path: &Path, tail: usize) -> Result<Vec<ChangeLogEntry>> {
    let file = match fs::File::open(log_path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("reading {}", log_path.display()));
        }
    };
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // lines written by other versions are skipped rather than fatal
        if let Ok(entry) = serde_json::from_str::<ChangeLogEntry>(&line) {
            entries.push(entry);
        }
    }
    let skip = entries.len().saturating_sub(tail);
    Ok(entries.split_off(skip))
}

fn truncate_log(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let reader = BufReader::new(file);
    let lines: Vec<_> = reader.lines().collect::<Result<_, _>>()?;
    if lines.len() <= MAX_ENTRIES {
        return Ok(());
    }
    let keep = &lines[lines.len() - MAX_ENTRIES..];
    fs::write(path, keep.join("\n") + "\n")?;
    Ok(())
}
