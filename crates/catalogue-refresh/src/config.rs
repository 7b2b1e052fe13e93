//! Runtime configuration: retailer definitions and pipeline settings.
//!
//! Settings are resolved in three layers:
//! 1. Built-in defaults (the two supported retailers, 60s fetch timeout, ...)
//! 2. An optional JSON file (`--config` or `CATALOGUE_CONFIG`)
//! 3. `CATALOGUE_*` environment overrides

use crate::schedule::WeeklySchedule;
use crate::types::RetailerId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Desktop Chrome identity; the catalogue sites reject default client identities.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/120.0.0.0 Safari/537.36";

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 60;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RASTER_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RENDER_SETTLE_SECS: u64 = 3;
const DEFAULT_RETAILER_DELAY_SECS: u64 = 5;
const DEFAULT_MAX_PARALLEL: usize = 1;

/// Case-insensitive ".pdf" anywhere in the link.
pub const DEFAULT_DOCUMENT_PATTERN: &str = r"(?i)\.pdf";

/// Marker phrase that anchors the current week's catalogue section.
pub const DEFAULT_ANCHOR_MARKER: &str = "This week's catalogue";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Location context submitted before discovery (e.g. a postcode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationPrestep {
    /// CSS selectors for the input; the first one present is used.
    pub input_selectors: Vec<String>,
    /// Value typed into the input.
    pub value: String,
    /// CSS selectors for the submit control; the first one present is clicked.
    #[serde(default)]
    pub submit_selectors: Vec<String>,
}

/// One retailer's catalogue source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetailerConfig {
    pub id: RetailerId,
    /// Page that lists the current catalogue.
    pub entry_url: Url,
    /// Phrases that mark the current-week section (matched case-insensitively).
    #[serde(default = "default_anchor_markers")]
    pub anchor_markers: Vec<String>,
    /// Regex a link must match to count as a catalogue document.
    #[serde(default = "default_document_pattern")]
    pub document_pattern: String,
    #[serde(default)]
    pub prestep: Option<LocationPrestep>,
    /// Retry discovery once on the first catalogue sub-page when the entry
    /// page yields nothing.
    #[serde(default)]
    pub follow_catalogue_links: bool,
}

fn default_anchor_markers() -> Vec<String> {
    vec![DEFAULT_ANCHOR_MARKER.to_string()]
}

fn default_document_pattern() -> String {
    DEFAULT_DOCUMENT_PATTERN.to_string()
}

fn builtin_id(raw: &str) -> Result<RetailerId, ConfigError> {
    RetailerId::parse(raw).map_err(|e| ConfigError::Invalid(format!("built-in retailer: {e}")))
}

fn builtin_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid(format!("built-in url {raw}: {e}")))
}

/// Coles and Woolworths. A definition that fails to build is logged and left
/// out; `validate` then rejects an empty list.
fn builtin_retailers() -> Vec<RetailerConfig> {
    [RetailerConfig::coles(), RetailerConfig::woolworths()]
        .into_iter()
        .filter_map(|built| match built {
            Ok(retailer) => Some(retailer),
            Err(e) => {
                tracing::error!("skipping built-in retailer: {e}");
                None
            }
        })
        .collect()
}

impl RetailerConfig {
    /// The built-in Coles definition.
    pub fn coles() -> Result<Self, ConfigError> {
        Ok(Self {
            id: builtin_id("coles")?,
            entry_url: builtin_url("https://www.coles.com.au/catalogues")?,
            anchor_markers: default_anchor_markers(),
            document_pattern: default_document_pattern(),
            prestep: None,
            follow_catalogue_links: false,
        })
    }

    /// The built-in Woolworths definition (needs a postcode before the
    /// catalogue section renders).
    pub fn woolworths() -> Result<Self, ConfigError> {
        Ok(Self {
            id: builtin_id("woolworths")?,
            entry_url: builtin_url("https://www.woolworths.com.au/shop/catalogue")?,
            anchor_markers: default_anchor_markers(),
            document_pattern: default_document_pattern(),
            prestep: Some(LocationPrestep {
                input_selectors: vec![
                    r#"input[placeholder*="postcode"]"#.to_string(),
                    r#"input[placeholder*="Postcode"]"#.to_string(),
                    r#"input[name*="postcode"]"#.to_string(),
                    r#"input[id*="postcode"]"#.to_string(),
                ],
                value: "2000".to_string(),
                submit_selectors: vec![
                    r#"button[type="submit"]"#.to_string(),
                    ".submit-button".to_string(),
                ],
            }),
            follow_catalogue_links: true,
        })
    }

    /// Compiled document pattern. Validated by [`RefreshConfig::validate`].
    pub fn document_regex(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.document_pattern).map_err(|e| {
            ConfigError::Invalid(format!(
                "retailer {}: bad document_pattern {:?}: {e}",
                self.id, self.document_pattern
            ))
        })
    }
}

/// Fully resolved settings for a refresh process.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Root under which `catalogue_images/{retailer}/` lives.
    pub publish_root: PathBuf,
    pub database_path: PathBuf,
    pub run_log_path: Option<PathBuf>,
    pub fetch_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Upper bound on rendering one document to page images.
    pub raster_timeout: Duration,
    /// Wait after navigation (and after the pre-step) for client-side rendering.
    pub render_settle: Duration,
    pub inter_retailer_delay: Duration,
    pub max_parallel: usize,
    pub user_agent: String,
    pub chromium_path: Option<PathBuf>,
    pub schedule: WeeklySchedule,
    pub retailers: Vec<RetailerConfig>,
}

/// On-disk shape of the JSON config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    publish_root: Option<PathBuf>,
    database_path: Option<PathBuf>,
    run_log_path: Option<PathBuf>,
    fetch_timeout_secs: Option<u64>,
    navigation_timeout_secs: Option<u64>,
    raster_timeout_secs: Option<u64>,
    render_settle_secs: Option<u64>,
    inter_retailer_delay_secs: Option<u64>,
    max_parallel: Option<usize>,
    user_agent: Option<String>,
    chromium_path: Option<PathBuf>,
    schedule: Option<WeeklySchedule>,
    retailers: Option<Vec<RetailerConfig>>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        let home = base_dir();
        Self {
            publish_root: home.join("public"),
            database_path: home.join("catalogue.db"),
            run_log_path: Some(home.join("runs.jsonl")),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            navigation_timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            raster_timeout: Duration::from_secs(DEFAULT_RASTER_TIMEOUT_SECS),
            render_settle: Duration::from_secs(DEFAULT_RENDER_SETTLE_SECS),
            inter_retailer_delay: Duration::from_secs(DEFAULT_RETAILER_DELAY_SECS),
            max_parallel: DEFAULT_MAX_PARALLEL,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chromium_path: None,
            schedule: WeeklySchedule::default(),
            retailers: builtin_retailers(),
        }
    }
}

impl RefreshConfig {
    /// Resolve defaults, then the optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        let env_path = read_env_string("CATALOGUE_CONFIG").map(PathBuf::from);
        if let Some(path) = path.map(Path::to_path_buf).or(env_path) {
            cfg.apply_file(&path)?;
        }

        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.publish_root {
            self.publish_root = v;
        }
        if let Some(v) = file.database_path {
            self.database_path = v;
        }
        if let Some(v) = file.run_log_path {
            self.run_log_path = Some(v);
        }
        if let Some(v) = file.fetch_timeout_secs {
            self.fetch_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.navigation_timeout_secs {
            self.navigation_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.raster_timeout_secs {
            self.raster_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.render_settle_secs {
            self.render_settle = Duration::from_secs(v);
        }
        if let Some(v) = file.inter_retailer_delay_secs {
            self.inter_retailer_delay = Duration::from_secs(v);
        }
        if let Some(v) = file.max_parallel {
            self.max_parallel = v;
        }
        if let Some(v) = file.user_agent {
            self.user_agent = v;
        }
        if let Some(v) = file.chromium_path {
            self.chromium_path = Some(v);
        }
        if let Some(v) = file.schedule {
            self.schedule = v;
        }
        if let Some(v) = file.retailers {
            self.retailers = v;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(v) = read_env_string("CATALOGUE_PUBLISH_ROOT") {
            self.publish_root = PathBuf::from(v);
        }
        if let Some(v) = read_env_string("CATALOGUE_DB_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = read_env_string("CATALOGUE_RUN_LOG") {
            self.run_log_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = read_env_string("CATALOGUE_CHROMIUM_PATH") {
            self.chromium_path = Some(PathBuf::from(v));
        }
        self.fetch_timeout = Duration::from_secs(read_env_u64(
            "CATALOGUE_FETCH_TIMEOUT_SECS",
            self.fetch_timeout.as_secs(),
        ));
        self.raster_timeout = Duration::from_secs(read_env_u64(
            "CATALOGUE_RASTER_TIMEOUT_SECS",
            self.raster_timeout.as_secs(),
        ));
        self.inter_retailer_delay = Duration::from_secs(read_env_u64(
            "CATALOGUE_RETAILER_DELAY_SECS",
            self.inter_retailer_delay.as_secs(),
        ));
        self.max_parallel = read_env_usize("CATALOGUE_MAX_PARALLEL", self.max_parallel);
    }

    /// Check invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::Invalid("max_parallel must be at least 1".into()));
        }
        if self.fetch_timeout.is_zero()
            || self.navigation_timeout.is_zero()
            || self.raster_timeout.is_zero()
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.retailers.is_empty() {
            return Err(ConfigError::Invalid("no retailers configured".into()));
        }

        let mut seen = HashSet::new();
        for retailer in &self.retailers {
            if !seen.insert(retailer.id.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate retailer id {}",
                    retailer.id
                )));
            }
            if !matches!(retailer.entry_url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "retailer {}: entry_url must be http(s)",
                    retailer.id
                )));
            }
            if retailer.anchor_markers.iter().all(|m| m.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "retailer {}: at least one anchor marker is required",
                    retailer.id
                )));
            }
            retailer.document_regex()?;
            if let Some(prestep) = &retailer.prestep {
                if prestep.input_selectors.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "retailer {}: prestep needs at least one input selector",
                        retailer.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up a configured retailer.
    pub fn retailer(&self, id: &str) -> Option<&RetailerConfig> {
        self.retailers.iter().find(|r| r.id.as_str() == id)
    }
}

/// `~/.catalogue-refresh`
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".catalogue-refresh")
}

fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_usize(name: &str, default_value: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}
