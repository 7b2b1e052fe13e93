//! Shared fixtures: a scripted browser, a fake rasterizer and a wiremock
//! document server wired into a real publisher and SQLite store.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use catalogue_refresh::acquisition::DocumentFetcher;
use catalogue_refresh::audit::RunLedger;
use catalogue_refresh::config::{RefreshConfig, RetailerConfig, DEFAULT_USER_AGENT};
use catalogue_refresh::error::RasterError;
use catalogue_refresh::pipeline::{CancelFlag, PipelineSettings, RetailerPipeline};
use catalogue_refresh::publish::{CatalogueRecord, CatalogueStore, Publisher, SqliteStore};
use catalogue_refresh::raster::Rasterizer;
use catalogue_refresh::renderer::{Launcher, NavigationResult, RenderContext, Renderer};
use catalogue_refresh::types::{PageImage, RetailerId};
use catalogue_refresh::Orchestrator;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Scripted browser ──

/// A location form that reveals different HTML once filled and submitted.
#[derive(Clone)]
pub struct ScriptedForm {
    pub input: String,
    pub submit: String,
    pub revealed_html: String,
}

#[derive(Default)]
struct Site {
    pages: HashMap<String, String>,
    forms: HashMap<String, ScriptedForm>,
}

/// Fake browser: serves fixed HTML per URL and counts session lifecycle calls.
#[derive(Default)]
pub struct FakeLauncher {
    site: Arc<Mutex<Site>>,
    pub launches: AtomicUsize,
    pub shutdowns: Arc<AtomicUsize>,
    pub contexts_closed: Arc<AtomicUsize>,
    pub fail_launch: std::sync::atomic::AtomicBool,
    /// Values typed into inputs, as `selector=value`.
    pub typed: Arc<Mutex<Vec<String>>>,
}

impl FakeLauncher {
    pub fn set_page(&self, url: &str, html: &str) {
        let mut site = self.site.lock().unwrap();
        site.pages.insert(normalize(url), html.to_string());
    }

    pub fn set_form(&self, url: &str, form: ScriptedForm) {
        let mut site = self.site.lock().unwrap();
        site.forms.insert(normalize(url), form);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn contexts_closed(&self) -> usize {
        self.contexts_closed.load(Ordering::SeqCst)
    }
}

fn normalize(url: &str) -> String {
    Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn Renderer>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(anyhow!("Chromium exited during startup"));
        }
        Ok(Box::new(FakeRenderer {
            site: Arc::clone(&self.site),
            shutdowns: Arc::clone(&self.shutdowns),
            contexts_closed: Arc::clone(&self.contexts_closed),
            typed: Arc::clone(&self.typed),
            active: Arc::new(AtomicUsize::new(0)),
        }))
    }
}

struct FakeRenderer {
    site: Arc<Mutex<Site>>,
    shutdowns: Arc<AtomicUsize>,
    contexts_closed: Arc<AtomicUsize>,
    typed: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            site: Arc::clone(&self.site),
            contexts_closed: Arc::clone(&self.contexts_closed),
            typed: Arc::clone(&self.typed),
            active: Arc::clone(&self.active),
            current: None,
            state: Mutex::new(FormState::default()),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FormState {
    filled: bool,
    revealed: Option<String>,
}

struct FakeContext {
    site: Arc<Mutex<Site>>,
    contexts_closed: Arc<AtomicUsize>,
    typed: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    current: Option<String>,
    state: Mutex<FormState>,
}

impl FakeContext {
    fn form(&self) -> Option<ScriptedForm> {
        let url = self.current.as_ref()?;
        self.site.lock().unwrap().forms.get(url).cloned()
    }
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
        let key = normalize(url);
        if !self.site.lock().unwrap().pages.contains_key(&key) {
            return Err(anyhow!("net::ERR_NAME_NOT_RESOLVED at {url}"));
        }
        self.current = Some(key.clone());
        *self.state.lock().unwrap() = FormState::default();
        Ok(NavigationResult {
            final_url: key,
            load_time_ms: 1,
        })
    }

    async fn get_html(&self) -> Result<String> {
        if let Some(revealed) = &self.state.lock().unwrap().revealed {
            return Ok(revealed.clone());
        }
        let url = self.current.as_ref().ok_or_else(|| anyhow!("no page loaded"))?;
        Ok(self.site.lock().unwrap().pages[url].clone())
    }

    async fn get_url(&self) -> Result<String> {
        self.current.clone().ok_or_else(|| anyhow!("no page loaded"))
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        match self.form() {
            Some(form) if form.input == selector => {
                self.typed.lock().unwrap().push(format!("{selector}={text}"));
                self.state.lock().unwrap().filled = true;
                Ok(())
            }
            _ => Err(anyhow!("no element matches {selector}")),
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        match self.form() {
            Some(form) if form.submit == selector => {
                let mut state = self.state.lock().unwrap();
                if state.filled {
                    state.revealed = Some(form.revealed_html);
                }
                Ok(())
            }
            _ => Err(anyhow!("no element matches {selector}")),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.contexts_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── Fake rasterizer ──

/// Reads `pages=N` from a fake PDF body and emits N small "JPEGs" whose bytes
/// name the document and the page. `corrupt` anywhere in the body is a parse failure.
pub struct FakeRasterizer {
    pub calls: AtomicUsize,
    /// Raised while rasterizing, to simulate a shutdown signal mid-run.
    pub cancel_during: Mutex<Option<CancelFlag>>,
    /// Time spent "rendering" before answering.
    pub delay: Mutex<Option<Duration>>,
}

impl FakeRasterizer {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            cancel_during: Mutex::new(None),
            delay: Mutex::new(None),
        }
    }
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(&self, document: &[u8]) -> Result<Vec<PageImage>, RasterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = self.cancel_during.lock().unwrap().as_ref() {
            flag.cancel();
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let body = String::from_utf8_lossy(document);
        if body.contains("corrupt") {
            return Err(RasterError::Malformed("xref table not found".into()));
        }
        let pages: u32 = body
            .split_whitespace()
            .find_map(|tok| tok.strip_prefix("pages="))
            .and_then(|n| n.parse().ok())
            .ok_or(RasterError::Empty)?;
        let tag = body
            .split_whitespace()
            .find_map(|tok| tok.strip_prefix("tag="))
            .unwrap_or("doc")
            .to_string();

        Ok((1..=pages)
            .map(|index| PageImage {
                index,
                bytes: format!("jpeg {tag} page {index}").into_bytes(),
                width: 1240,
                height: 1754,
            })
            .collect())
    }
}

/// Body of a fake PDF document.
pub fn fake_pdf(pages: u32, tag: &str) -> Vec<u8> {
    format!("%PDF-1.7\npages={pages} tag={tag}\n%%EOF").into_bytes()
}

// ── Harness ──

pub struct Harness {
    pub server: MockServer,
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub launcher: Arc<FakeLauncher>,
    pub rasterizer: Arc<FakeRasterizer>,
    pub cancel: CancelFlag,
    pub raster_timeout: Duration,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("catalogue.db")).unwrap());
        Self {
            server: MockServer::start().await,
            dir,
            store,
            launcher: Arc::new(FakeLauncher::default()),
            rasterizer: Arc::new(FakeRasterizer::new()),
            cancel: CancelFlag::new(),
            raster_timeout: Duration::from_secs(5),
        }
    }

    /// Absolute URL on the document server.
    pub fn doc_url(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    pub async fn serve(&self, route: &str, status: u16, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    pub async fn serve_pdf(&self, route: &str, pages: u32, tag: &str) {
        self.serve(route, 200, fake_pdf(pages, tag)).await;
    }

    pub fn retailer(&self, id: &str, entry_url: &str) -> RetailerConfig {
        let mut cfg = RetailerConfig::coles().unwrap();
        cfg.id = RetailerId::parse(id).unwrap();
        cfg.entry_url = Url::parse(entry_url).unwrap();
        cfg
    }

    pub fn publish_root(&self) -> std::path::PathBuf {
        self.dir.path().join("public")
    }

    pub fn publisher(&self) -> Publisher {
        let store: Arc<dyn CatalogueStore> = self.store.clone();
        Publisher::new(self.publish_root(), store)
    }

    pub fn pipeline(&self, week_date: NaiveDate) -> RetailerPipeline {
        let launcher: Arc<dyn Launcher> = self.launcher.clone();
        let rasterizer: Arc<dyn Rasterizer> = self.rasterizer.clone();
        RetailerPipeline::new(
            launcher,
            DocumentFetcher::new(Duration::from_secs(5), DEFAULT_USER_AGENT).unwrap(),
            rasterizer,
            self.publisher(),
            PipelineSettings {
                navigation_timeout: Duration::from_secs(5),
                render_settle: Duration::ZERO,
                raster_timeout: self.raster_timeout,
                week_date: Some(week_date),
            },
            self.cancel.clone(),
        )
    }

    pub fn config(&self, retailers: Vec<RetailerConfig>) -> RefreshConfig {
        RefreshConfig {
            publish_root: self.publish_root(),
            database_path: self.dir.path().join("catalogue.db"),
            run_log_path: Some(self.ledger_path()),
            render_settle: Duration::ZERO,
            inter_retailer_delay: Duration::ZERO,
            retailers,
            ..RefreshConfig::default()
        }
    }

    /// Orchestrator over the fake stack, recording to the config's run ledger.
    pub fn orchestrator(&self, config: RefreshConfig, week_date: NaiveDate) -> Orchestrator {
        let ledger = config
            .run_log_path
            .as_deref()
            .map(|path| RunLedger::open(path).unwrap());
        let orchestrator = Orchestrator::new(config, self.pipeline(week_date));
        match ledger {
            Some(ledger) => orchestrator.with_ledger(ledger),
            None => orchestrator,
        }
    }

    pub fn ledger_path(&self) -> std::path::PathBuf {
        self.dir.path().join("runs.jsonl")
    }

    pub fn records(&self, retailer: &str) -> Vec<CatalogueRecord> {
        self.store
            .records(&RetailerId::parse(retailer).unwrap())
            .unwrap()
    }

    /// File name -> contents for a retailer's directory.
    pub fn files(&self, retailer: &str) -> BTreeMap<String, Vec<u8>> {
        dir_contents(&self.publish_root().join("catalogue_images").join(retailer))
    }
}

pub fn dir_contents(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return BTreeMap::new();
    };
    entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| {
            (
                e.file_name().to_string_lossy().into_owned(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A retailer page with the current catalogue under the marker and an
/// archived catalogue elsewhere.
pub fn weekly_page(current_pdf: &str, archive_pdf: &str) -> String {
    format!(
        r#"<html><body>
          <nav><a href="/">Home</a></nav>
          <section class="archive">
            <h3>Past catalogues</h3>
            <a href="{archive_pdf}">Download PDF</a>
          </section>
          <section class="current">
            <div class="hero"><h2>This week's catalogue</h2></div>
            <div class="actions"><a href="{current_pdf}"><span>Download PDF</span></a></div>
          </section>
        </body></html>"#
    )
}
