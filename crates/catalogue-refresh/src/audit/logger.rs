//! JSONL run ledger: one line per finished retailer run.
//!
//! - Append-only, one JSON object per line
//! - Rotated when the file exceeds `MAX_LOG_SIZE` (10 MB)
//! - Rotated files are named `.1`, `.2`, `.3` (oldest dropped)

use crate::pipeline::{RunOutcome, RunReport};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Maximum ledger size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated generations kept.
const MAX_ROTATIONS: u32 = 3;

/// One finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: String,
    pub run_id: String,
    pub retailer: String,
    /// `done` or `failed`.
    pub outcome: String,
    pub stage: Option<String>,
    pub error_kind: Option<String>,
    pub message: Option<String>,
    pub http_status: Option<u16>,
    pub pages: Option<usize>,
    pub document_url: Option<String>,
    pub strategy: Option<String>,
    pub duration_ms: u64,
}

impl RunRecord {
    pub fn from_report(run_id: Uuid, report: &RunReport) -> Self {
        let (outcome, stage, error_kind, message, http_status, pages) = match &report.outcome {
            RunOutcome::Done(snapshot) => ("done", None, None, None, None, Some(snapshot.page_count())),
            RunOutcome::Failed { stage, error } => (
                "failed",
                Some(stage.as_str().to_string()),
                Some(error.kind().as_str().to_string()),
                Some(error.to_string()),
                error.http_status(),
                None,
            ),
        };

        Self {
            timestamp: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            retailer: report.retailer.to_string(),
            outcome: outcome.to_string(),
            stage,
            error_kind,
            message,
            http_status,
            pages,
            document_url: report.document_url.as_ref().map(|u| u.to_string()),
            strategy: report.strategy.map(|s| s.as_str().to_string()),
            duration_ms: report.duration.as_millis() as u64,
        }
    }
}

/// Append-only JSONL ledger with rotation.
pub struct RunLedger {
    file: File,
    path: PathBuf,
    /// Approximate current size; reset on rotation.
    current_size: u64,
}

impl RunLedger {
    /// Open or create the ledger file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run ledger: {}", path.display()))?;

        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record.
    pub fn append(&mut self, record: &RunRecord) -> Result<()> {
        if self.current_size >= MAX_LOG_SIZE {
            self.rotate()?;
        }

        let json = serde_json::to_string(record)?;
        writeln!(self.file, "{json}").context("failed to write run ledger")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Rotate: `runs.jsonl.2` -> `.3`, `.1` -> `.2`, current -> `.1`.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("failed to reopen run ledger after rotation")?;
        self.current_size = 0;
        Ok(())
    }
}

/// Last `limit` records of the current ledger file, oldest first.
/// Lines that fail to parse are skipped.
pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<RunRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)
        .with_context(|| format!("failed to open run ledger: {}", path.display()))?;
    let records: Vec<RunRecord> = BufReader::new(file)
        .lines()
        .map_while(|line| line.ok())
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect();
    let skip = records.len().saturating_sub(limit);
    Ok(records.into_iter().skip(skip).collect())
}

/// `runs.jsonl.1`, `runs.jsonl.2`, ...
fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("runs.jsonl")
    );
    base.with_file_name(name)
}
