//! Show what is currently published for each retailer.

use crate::audit::{read_recent, RunRecord};
use crate::cli::output::{self, Styled};
use crate::publish::{CatalogueStore, Publisher, SqliteStore};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// How many ledger lines to scan for each retailer's latest run.
const LEDGER_SCAN: usize = 200;

#[derive(Debug, Serialize)]
struct RetailerStatus {
    retailer: String,
    rows: usize,
    week_date: Option<String>,
    files_on_disk: usize,
    /// Files with no store record pointing at them.
    orphans: Vec<String>,
    /// Store records whose file is missing.
    missing: Vec<String>,
    last_run: Option<RunRecord>,
}

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = Arc::new(
        SqliteStore::open(&config.database_path)
            .with_context(|| format!("failed to open store {}", config.database_path.display()))?,
    );
    let publisher = Publisher::new(config.publish_root.clone(), store.clone());

    let recent = match &config.run_log_path {
        Some(path) => read_recent(path, LEDGER_SCAN).unwrap_or_default(),
        None => Vec::new(),
    };

    let mut statuses = Vec::with_capacity(config.retailers.len());
    for retailer in &config.retailers {
        let records = store.records(&retailer.id)?;
        let files = publisher
            .files_on_disk(&retailer.id)
            .with_context(|| format!("failed to list files for {}", retailer.id))?;

        let referenced: HashSet<&str> = records
            .iter()
            .filter_map(|r| r.image_reference.rsplit('/').next())
            .collect();
        let on_disk: HashSet<&str> = files.iter().map(String::as_str).collect();

        statuses.push(RetailerStatus {
            retailer: retailer.id.to_string(),
            rows: records.len(),
            week_date: records.first().map(|r| r.week_date.to_string()),
            files_on_disk: files.len(),
            orphans: files
                .iter()
                .filter(|f| !referenced.contains(f.as_str()))
                .cloned()
                .collect(),
            missing: referenced
                .iter()
                .filter(|f| !on_disk.contains(*f))
                .map(|f| f.to_string())
                .collect(),
            last_run: recent
                .iter()
                .rev()
                .find(|r| r.retailer == retailer.id.as_str())
                .cloned(),
        });
    }

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "publish_root": config.publish_root.display().to_string(),
            "database": config.database_path.display().to_string(),
            "schedule": config.schedule.to_string(),
            "retailers": statuses,
        }));
        return Ok(());
    }

    let s = Styled::new();
    println!("Catalogue status");
    println!("================");
    println!("Publish root: {}", config.publish_root.display());
    println!("Database:     {}", config.database_path.display());
    println!("Schedule:     {}", config.schedule);
    println!();

    for st in &statuses {
        let sym = if st.rows > 0 && st.missing.is_empty() {
            s.ok_sym()
        } else {
            s.warn_sym()
        };
        println!(
            "{sym} {:<12} {} pages, week {}, {} file(s) on disk",
            st.retailer,
            st.rows,
            st.week_date.as_deref().unwrap_or("-"),
            st.files_on_disk
        );
        if !st.orphans.is_empty() {
            println!("    orphans: {}", st.orphans.join(", "));
        }
        if !st.missing.is_empty() {
            println!("    missing: {}", st.missing.join(", "));
        }
        if let Some(last) = &st.last_run {
            let detail = match (&last.stage, &last.error_kind) {
                (Some(stage), Some(kind)) => format!("failed while {stage} ({kind})"),
                _ => format!("{} pages", last.pages.unwrap_or(0)),
            };
            println!("    last run {}: {} {}", last.timestamp, last.outcome, s.dim(&detail));
        }
    }
    Ok(())
}
