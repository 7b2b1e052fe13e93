//! `catalogue schedule`: refresh every week until interrupted.

use crate::cli::output::{self, Styled};
use crate::cli::run_cmd::print_summary;
use crate::orchestrator::Orchestrator;
use crate::pipeline::CancelFlag;
use crate::schedule::{self, WeeklySchedule};
use anyhow::{anyhow, Result};
use chrono::Local;
use std::path::Path;
use std::sync::Arc;

pub async fn run(
    config_path: Option<&Path>,
    day: Option<&str>,
    at: Option<&str>,
    run_now: bool,
) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    if day.is_some() || at.is_some() {
        let day = day
            .map(str::to_string)
            .unwrap_or_else(|| config.schedule.weekday.to_string());
        let at = at
            .map(str::to_string)
            .unwrap_or_else(|| config.schedule.at.format("%H:%M").to_string());
        config.schedule = WeeklySchedule::parse(&day, &at).map_err(|e| anyhow!(e))?;
    }
    let weekly = config.schedule;

    let cancel = CancelFlag::new();
    let stop = super::cancel_on_ctrl_c(cancel.clone());
    let orchestrator = Arc::new(Orchestrator::from_config(config, cancel)?);

    if run_now {
        let summary = orchestrator.run_all().await;
        print_summary(&summary);
        if orchestrator.is_cancelled() {
            return Ok(());
        }
    }

    let handle = schedule::start(Arc::clone(&orchestrator), weekly);

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "schedule": weekly.to_string(),
            "next_run": weekly.next_after(&Local::now()).map(|t| t.to_rfc3339()),
        }));
    } else if !output::is_quiet() {
        let s = Styled::new();
        eprintln!("  {} Scheduler running: {weekly}", s.ok_sym());
        if let Some(next) = weekly.next_after(&Local::now()) {
            eprintln!("  Next refresh at {}", next.format("%Y-%m-%d %H:%M %Z"));
        }
        eprintln!("  Press Ctrl-C to stop.");
    }

    stop.notified().await;
    handle.stop().await;

    if !output::is_quiet() && !output::is_json() {
        eprintln!("  {} Scheduler stopped.", Styled::new().ok_sym());
    }
    Ok(())
}
