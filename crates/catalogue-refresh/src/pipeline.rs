//! One retailer's refresh run as a state machine.
//!
//! `Idle -> Locating -> Fetching -> Rasterizing -> Publishing -> Done`, or a
//! terminal `Failed(stage, reason)` from any non-terminal state. Nothing
//! persisted is touched before `Publishing`, so a failure in an earlier
//! stage leaves the previous snapshot exactly as it was. The cancellation
//! flag is checked at every transition.

use crate::acquisition::{ContentCheck, DocumentFetcher};
use crate::config::{LocationPrestep, RefreshConfig, RetailerConfig};
use crate::error::{RasterError, RefreshError};
use crate::locator::{Located, Locator, StrategyKind};
use crate::publish::Publisher;
use crate::raster::Rasterizer;
use crate::renderer::{Launcher, RenderContext, Renderer};
use crate::types::{CatalogueSnapshot, PageImage, RetailerId};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// Pipeline states. `Failed` is carried by [`RunOutcome::Failed`] together
/// with the stage it was entered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Locating,
    Fetching,
    Rasterizing,
    Publishing,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Locating => "locating",
            Self::Fetching => "fetching",
            Self::Rasterizing => "rasterizing",
            Self::Publishing => "publishing",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide stop request, shared by every pipeline and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Done(CatalogueSnapshot),
    Failed { stage: Stage, error: RefreshError },
}

/// Everything known about one finished run.
#[derive(Debug)]
pub struct RunReport {
    pub retailer: RetailerId,
    pub outcome: RunOutcome,
    /// States entered, in order, starting with `Idle`.
    pub transitions: Vec<Stage>,
    pub document_url: Option<Url>,
    pub strategy: Option<StrategyKind>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        matches!(self.outcome, RunOutcome::Done(_))
    }

    pub fn snapshot(&self) -> Option<&CatalogueSnapshot> {
        match &self.outcome {
            RunOutcome::Done(snapshot) => Some(snapshot),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&RefreshError> {
        match &self.outcome {
            RunOutcome::Done(_) => None,
            RunOutcome::Failed { error, .. } => Some(error),
        }
    }

    /// Stage a failed run stopped in.
    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.outcome {
            RunOutcome::Done(_) => None,
            RunOutcome::Failed { stage, .. } => Some(*stage),
        }
    }
}

/// Timing knobs a pipeline needs from [`RefreshConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub navigation_timeout: Duration,
    pub render_settle: Duration,
    /// Longest the rasterizer may run before the stage fails.
    pub raster_timeout: Duration,
    /// Date stamped on published files; today (local) when unset.
    pub week_date: Option<NaiveDate>,
}

impl From<&RefreshConfig> for PipelineSettings {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            navigation_timeout: config.navigation_timeout,
            render_settle: config.render_settle,
            raster_timeout: config.raster_timeout,
            week_date: None,
        }
    }
}

/// Tracks the current state and checks for cancellation on every move.
struct Progress<'a> {
    retailer: &'a RetailerId,
    cancel: &'a CancelFlag,
    stage: Stage,
    transitions: Vec<Stage>,
    located: Option<Located>,
}

impl<'a> Progress<'a> {
    fn new(retailer: &'a RetailerId, cancel: &'a CancelFlag) -> Self {
        Self {
            retailer,
            cancel,
            stage: Stage::Idle,
            transitions: vec![Stage::Idle],
            located: None,
        }
    }

    fn enter(&mut self, next: Stage) -> Result<(), RefreshError> {
        if self.cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }
        debug!(retailer = %self.retailer, from = %self.stage, to = %next, "transition");
        self.stage = next;
        self.transitions.push(next);
        Ok(())
    }
}

/// Composes Locator, Fetcher, Rasterizer and Publisher for one retailer.
#[derive(Clone)]
pub struct RetailerPipeline {
    launcher: Arc<dyn Launcher>,
    fetcher: DocumentFetcher,
    rasterizer: Arc<dyn Rasterizer>,
    publisher: Publisher,
    settings: PipelineSettings,
    cancel: CancelFlag,
}

impl RetailerPipeline {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        fetcher: DocumentFetcher,
        rasterizer: Arc<dyn Rasterizer>,
        publisher: Publisher,
        settings: PipelineSettings,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            launcher,
            fetcher,
            rasterizer,
            publisher,
            settings,
            cancel,
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    fn week_date(&self) -> NaiveDate {
        self.settings
            .week_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    /// Run the retailer once. Never panics on stage failure; the outcome says
    /// where and why it stopped.
    pub async fn run(&self, retailer: &RetailerConfig) -> RunReport {
        let started = Instant::now();
        let mut progress = Progress::new(&retailer.id, &self.cancel);

        let outcome = match self.drive(retailer, &mut progress).await {
            Ok(snapshot) => {
                info!(
                    retailer = %retailer.id,
                    pages = snapshot.page_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "refresh done"
                );
                RunOutcome::Done(snapshot)
            }
            Err(error) => {
                let stage = progress.stage;
                error!(
                    retailer = %retailer.id,
                    stage = %stage,
                    kind = error.kind().as_str(),
                    "refresh failed: {error}"
                );
                RunOutcome::Failed { stage, error }
            }
        };

        let located = progress.located.take();
        RunReport {
            retailer: retailer.id.clone(),
            outcome,
            transitions: progress.transitions,
            document_url: located.as_ref().map(|l| l.url.clone()),
            strategy: located.map(|l| l.strategy),
            duration: started.elapsed(),
        }
    }

    async fn drive(
        &self,
        retailer: &RetailerConfig,
        progress: &mut Progress<'_>,
    ) -> Result<CatalogueSnapshot, RefreshError> {
        progress.enter(Stage::Locating)?;
        let located = self.locate(retailer).await?;
        let document_url = located.url.clone();
        progress.located = Some(located);

        progress.enter(Stage::Fetching)?;
        let check = ContentCheck::for_pattern(&retailer.document_pattern);
        let fetcher = self.fetcher.for_run()?;
        let document = fetcher
            .fetch_document(&retailer.id, &document_url, check)
            .await?;
        info!(
            retailer = %retailer.id,
            bytes = document.bytes.len(),
            "fetched {}",
            document.source_url
        );

        progress.enter(Stage::Rasterizing)?;
        let pages = self.rasterize(document.bytes).await?;
        info!(retailer = %retailer.id, pages = pages.len(), "rasterized");

        progress.enter(Stage::Publishing)?;
        let publisher = self.publisher.clone();
        let id = retailer.id.clone();
        let week_date = self.week_date();
        let snapshot =
            tokio::task::spawn_blocking(move || publisher.publish(&id, &pages, week_date))
                .await
                .map_err(|e| RefreshError::Internal(format!("publisher task failed: {e}")))??;

        // Committed; cancellation no longer applies.
        progress.stage = Stage::Done;
        progress.transitions.push(Stage::Done);
        Ok(snapshot)
    }

    /// Render on a blocking thread, giving up after `raster_timeout`. A timed-out
    /// render thread is abandoned; its result is never published.
    async fn rasterize(&self, bytes: Vec<u8>) -> Result<Vec<PageImage>, RasterError> {
        let rasterizer = Arc::clone(&self.rasterizer);
        let limit = self.settings.raster_timeout;
        let task = tokio::task::spawn_blocking(move || rasterizer.rasterize(&bytes));
        match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RasterError::Internal {
                page: 0,
                reason: format!("rasterizer task failed: {e}"),
            }),
            Err(_) => Err(RasterError::Internal {
                page: 0,
                reason: format!("rasterizer timed out after {}s", limit.as_secs_f64()),
            }),
        }
    }

    /// Run discovery inside a fresh browser session that is always shut down.
    async fn locate(&self, retailer: &RetailerConfig) -> Result<Located, RefreshError> {
        let locator = Locator::for_retailer(retailer)?;

        let renderer = self
            .launcher
            .launch()
            .await
            .map_err(|e| RefreshError::Browser(format!("launch failed: {e:#}")))?;

        let result = self.locate_in_session(renderer.as_ref(), retailer, &locator).await;

        if let Err(e) = renderer.shutdown().await {
            warn!(retailer = %retailer.id, "browser shutdown failed: {e:#}");
        }
        result
    }

    async fn locate_in_session(
        &self,
        renderer: &dyn Renderer,
        retailer: &RetailerConfig,
        locator: &Locator,
    ) -> Result<Located, RefreshError> {
        let mut ctx = renderer
            .new_context()
            .await
            .map_err(|e| RefreshError::Browser(format!("failed to open tab: {e:#}")))?;

        let result = self.discover(ctx.as_mut(), retailer, locator).await;

        if let Err(e) = ctx.close().await {
            warn!(retailer = %retailer.id, "failed to close tab: {e:#}");
        }
        result
    }

    async fn discover(
        &self,
        ctx: &mut dyn RenderContext,
        retailer: &RetailerConfig,
        locator: &Locator,
    ) -> Result<Located, RefreshError> {
        self.open(ctx, &retailer.entry_url).await?;

        if let Some(prestep) = &retailer.prestep {
            self.apply_prestep(ctx, &retailer.id, prestep).await;
        }

        let (page_url, html) = self.capture(ctx, &retailer.entry_url).await?;
        if let Some(found) = locator.locate_html(&page_url, &html) {
            return Ok(found);
        }

        if retailer.follow_catalogue_links {
            if let Some(subpage) = locator.catalogue_subpage_html(&page_url, &html) {
                info!(retailer = %retailer.id, "nothing on entry page, trying {subpage}");
                self.open(ctx, &subpage).await?;
                let (sub_url, sub_html) = self.capture(ctx, &subpage).await?;
                if let Some(found) = locator.locate_html(&sub_url, &sub_html) {
                    return Ok(found);
                }
            }
        }

        Err(RefreshError::DiscoveryNotFound {
            page: page_url.to_string(),
        })
    }

    async fn open(&self, ctx: &mut dyn RenderContext, url: &Url) -> Result<(), RefreshError> {
        let timeout_ms = self.settings.navigation_timeout.as_millis() as u64;
        let nav = ctx
            .navigate(url.as_str(), timeout_ms)
            .await
            .map_err(|e| RefreshError::Browser(format!("navigation to {url} failed: {e:#}")))?;
        debug!(url = %nav.final_url, load_ms = nav.load_time_ms, "page loaded");
        self.settle().await;
        Ok(())
    }

    /// Current URL and rendered HTML of the tab.
    async fn capture(
        &self,
        ctx: &mut dyn RenderContext,
        fallback: &Url,
    ) -> Result<(Url, String), RefreshError> {
        let html = ctx
            .get_html()
            .await
            .map_err(|e| RefreshError::Browser(format!("failed to read page: {e:#}")))?;
        let url = match ctx.get_url().await {
            Ok(raw) => Url::parse(&raw).unwrap_or_else(|_| fallback.clone()),
            Err(_) => fallback.clone(),
        };
        Ok((url, html))
    }

    /// Best effort: every failure here is logged and discovery carries on.
    async fn apply_prestep(
        &self,
        ctx: &mut dyn RenderContext,
        retailer: &RetailerId,
        prestep: &LocationPrestep,
    ) {
        let mut filled = None;
        for selector in &prestep.input_selectors {
            match ctx.fill(selector, &prestep.value).await {
                Ok(()) => {
                    filled = Some(selector);
                    break;
                }
                Err(e) => debug!(retailer = %retailer, selector = %selector, "pre-step input unusable: {e:#}"),
            }
        }
        let Some(input) = filled else {
            warn!(retailer = %retailer, "location pre-step skipped: no input matched");
            return;
        };

        let submitted = {
            let mut clicked = false;
            for selector in &prestep.submit_selectors {
                match ctx.click(selector).await {
                    Ok(()) => {
                        clicked = true;
                        break;
                    }
                    Err(e) => {
                        debug!(retailer = %retailer, selector = %selector, "pre-step submit unusable: {e:#}")
                    }
                }
            }
            clicked
        };
        if submitted {
            info!(retailer = %retailer, input = %input, "location pre-step applied");
        } else {
            warn!(retailer = %retailer, "location pre-step: value entered but nothing submitted");
        }
        self.settle().await;
    }

    async fn settle(&self) {
        if !self.settings.render_settle.is_zero() {
            tokio::time::sleep(self.settings.render_settle).await;
        }
    }
}
