//! Runs the retailer pipeline for each configured retailer.
//!
//! Retailers are independent: one failure never stops the others. Runs are
//! sequential by default with a fixed pause between retailers; with
//! `max_parallel > 1` up to that many run at once, each in its own browser
//! session, and their starts are still spaced by the same pause.

use crate::acquisition::DocumentFetcher;
use crate::audit::{RunLedger, RunRecord};
use crate::config::{ConfigError, RefreshConfig, RetailerConfig};
use crate::pipeline::{CancelFlag, PipelineSettings, RetailerPipeline, RunReport};
use crate::publish::{CatalogueStore, Publisher, SqliteStore};
use crate::raster::{PdfiumRasterizer, Rasterizer};
use crate::renderer::chromium::{find_chromium, ChromiumLauncher};
use crate::renderer::Launcher;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one `run_all` (or selected-retailer) invocation.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// In configuration order.
    pub reports: Vec<RunReport>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_done()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

pub struct Orchestrator {
    config: RefreshConfig,
    pipeline: RetailerPipeline,
    ledger: Option<Mutex<RunLedger>>,
    /// Start time of the most recent retailer run, for spacing parallel starts.
    last_start: tokio::sync::Mutex<Option<Instant>>,
}

impl Orchestrator {
    pub fn new(config: RefreshConfig, pipeline: RetailerPipeline) -> Self {
        Self {
            config,
            pipeline,
            ledger: None,
            last_start: tokio::sync::Mutex::new(None),
        }
    }

    /// Wire the production stack: Chromium, reqwest, PDFium and SQLite.
    pub fn from_config(config: RefreshConfig, cancel: CancelFlag) -> Result<Self> {
        let chrome = find_chromium(config.chromium_path.as_ref()).context(
            "Chromium not found. Install Chrome/Chromium or set CATALOGUE_CHROMIUM_PATH.",
        )?;
        let launcher: Arc<dyn Launcher> =
            Arc::new(ChromiumLauncher::new(Some(chrome), config.user_agent.clone()));
        let fetcher = DocumentFetcher::new(config.fetch_timeout, &config.user_agent)
            .context("failed to build HTTP client")?;
        let rasterizer: Arc<dyn Rasterizer> =
            Arc::new(PdfiumRasterizer::new().context("PDFium unavailable")?);
        let store: Arc<dyn CatalogueStore> = Arc::new(
            SqliteStore::open(&config.database_path).with_context(|| {
                format!("failed to open store {}", config.database_path.display())
            })?,
        );
        let publisher = Publisher::new(config.publish_root.clone(), store);

        let pipeline = RetailerPipeline::new(
            launcher,
            fetcher,
            rasterizer,
            publisher,
            PipelineSettings::from(&config),
            cancel,
        );

        let mut orchestrator = Self::new(config, pipeline);
        if let Some(path) = orchestrator.config.run_log_path.clone() {
            match RunLedger::open(&path) {
                Ok(ledger) => orchestrator = orchestrator.with_ledger(ledger),
                Err(e) => warn!("run ledger disabled: {e:#}"),
            }
        }
        Ok(orchestrator)
    }

    pub fn with_ledger(mut self, ledger: RunLedger) -> Self {
        self.ledger = Some(Mutex::new(ledger));
        self
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Publisher {
        self.pipeline.publisher()
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.pipeline.cancel_flag().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.pipeline.cancel_flag().is_cancelled()
    }

    /// Run a single retailer now.
    pub async fn run_once(&self, retailer: &str) -> Result<RunReport, ConfigError> {
        let config = self
            .config
            .retailer(retailer)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown retailer {retailer:?}")))?;
        let run_id = Uuid::new_v4();
        Ok(self.run_retailer(run_id, config).await)
    }

    /// Run every configured retailer.
    pub async fn run_all(&self) -> RunSummary {
        let retailers: Vec<&RetailerConfig> = self.config.retailers.iter().collect();
        self.run_many(&retailers).await
    }

    /// Run the named retailers, in the order given. A repeated id runs once:
    /// two concurrent runs would sweep each other's files.
    pub async fn run_selected(&self, ids: &[String]) -> Result<RunSummary, ConfigError> {
        let mut seen = HashSet::new();
        let mut retailers = Vec::with_capacity(ids.len());
        for id in ids {
            let retailer = self
                .config
                .retailer(id)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown retailer {id:?}")))?;
            if seen.insert(retailer.id.as_str()) {
                retailers.push(retailer);
            } else {
                warn!(retailer = %retailer.id, "retailer selected more than once; running it once");
            }
        }
        Ok(self.run_many(&retailers).await)
    }

    async fn run_many(&self, retailers: &[&RetailerConfig]) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let parallel = self.config.max_parallel.max(1);
        info!(
            %run_id,
            retailers = retailers.len(),
            parallel,
            "refresh run starting"
        );

        let reports = if parallel == 1 {
            let mut reports = Vec::with_capacity(retailers.len());
            for (i, retailer) in retailers.iter().enumerate() {
                if i > 0 {
                    self.pause().await;
                }
                reports.push(self.run_retailer(run_id, retailer).await);
            }
            reports
        } else {
            // Boxed up front so the future stays `Send` for `tokio::spawn`.
            let mut runs: Vec<Pin<Box<dyn Future<Output = RunReport> + Send + '_>>> =
                Vec::with_capacity(retailers.len());
            for &retailer in retailers {
                runs.push(Box::pin(async move {
                    self.await_start_slot().await;
                    self.run_retailer(run_id, retailer).await
                }));
            }
            stream::iter(runs)
                .buffered(parallel)
                .collect::<Vec<_>>()
                .await
        };

        let summary = RunSummary {
            run_id,
            reports,
            duration: started.elapsed(),
        };
        info!(
            %run_id,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            elapsed_ms = summary.duration.as_millis() as u64,
            "refresh run finished"
        );
        summary
    }

    async fn run_retailer(&self, run_id: Uuid, retailer: &RetailerConfig) -> RunReport {
        info!(%run_id, retailer = %retailer.id, "starting retailer");
        let report = self.pipeline.run(retailer).await;
        self.record(run_id, &report);
        report
    }

    /// Inter-retailer pause for sequential runs; skipped once cancelled.
    async fn pause(&self) {
        let delay = self.config.inter_retailer_delay;
        if !delay.is_zero() && !self.is_cancelled() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Wait until at least `inter_retailer_delay` has passed since the previous
    /// start, then claim this start.
    async fn await_start_slot(&self) {
        let mut last = self.last_start.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.config.inter_retailer_delay;
            if !self.is_cancelled() {
                tokio::time::sleep_until(ready_at.into()).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn record(&self, run_id: Uuid, report: &RunReport) {
        let Some(ledger) = &self.ledger else { return };
        let record = RunRecord::from_report(run_id, report);
        match ledger.lock() {
            Ok(mut ledger) => {
                if let Err(e) = ledger.append(&record) {
                    warn!(retailer = %report.retailer, "failed to write run ledger: {e:#}");
                }
            }
            Err(_) => warn!("run ledger lock poisoned; record dropped"),
        }
    }
}
