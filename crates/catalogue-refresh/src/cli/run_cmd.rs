//! `catalogue run`: refresh retailers now.

use crate::audit::RunRecord;
use crate::cli::output::{self, Styled};
use crate::orchestrator::{Orchestrator, RunSummary};
use crate::pipeline::{CancelFlag, RunOutcome};
use anyhow::{bail, Result};
use std::path::Path;

/// Run the named retailers (all when `retailers` is empty).
pub async fn run(
    config_path: Option<&Path>,
    retailers: &[String],
    parallel: Option<usize>,
) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    if let Some(n) = parallel {
        if n == 0 {
            bail!("--parallel must be at least 1");
        }
        config.max_parallel = n;
    }

    let cancel = CancelFlag::new();
    super::cancel_on_ctrl_c(cancel.clone());
    let orchestrator = Orchestrator::from_config(config, cancel)?;

    let summary = if retailers.is_empty() {
        orchestrator.run_all().await
    } else {
        orchestrator.run_selected(retailers).await?
    };

    print_summary(&summary);

    if !summary.all_succeeded() {
        bail!(
            "{} of {} retailer(s) failed",
            summary.failed(),
            summary.reports.len()
        );
    }
    Ok(())
}

/// Print a run summary in the selected output mode.
pub fn print_summary(summary: &RunSummary) {
    if output::is_json() {
        let records: Vec<RunRecord> = summary
            .reports
            .iter()
            .map(|r| RunRecord::from_report(summary.run_id, r))
            .collect();
        output::print_json(&serde_json::json!({
            "run_id": summary.run_id.to_string(),
            "succeeded": summary.succeeded(),
            "failed": summary.failed(),
            "duration_ms": summary.duration.as_millis() as u64,
            "retailers": records,
        }));
        return;
    }
    if output::is_quiet() {
        return;
    }

    let s = Styled::new();
    for report in &summary.reports {
        let secs = report.duration.as_secs_f64();
        match &report.outcome {
            RunOutcome::Done(snapshot) => {
                let strategy = report.strategy.map(|k| k.as_str()).unwrap_or("-");
                eprintln!(
                    "  {} {:<12} {} pages  {}",
                    s.ok_sym(),
                    report.retailer,
                    snapshot.page_count(),
                    s.dim(&format!("({strategy}, {secs:.1}s)"))
                );
                if snapshot.stale_remaining > 0 {
                    eprintln!(
                        "    {} {} stale file(s) could not be removed",
                        s.warn_sym(),
                        snapshot.stale_remaining
                    );
                }
            }
            RunOutcome::Failed { stage, error } => {
                eprintln!(
                    "  {} {:<12} failed while {stage}: {error}  {}",
                    s.fail_sym(),
                    report.retailer,
                    s.dim(&format!("({}, {secs:.1}s)", error.kind().as_str()))
                );
            }
        }
    }
    eprintln!(
        "  {} succeeded, {} failed in {:.1}s",
        summary.succeeded(),
        summary.failed(),
        summary.duration.as_secs_f64()
    );
}
