use chrono::NaiveTime;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::BatchSettings;
use crate::constants::*;
use crate::error::{Result, ScraperError};
use crate::pipeline::PipelineSettings;
use crate::renderer::{BrowserOptions, RenderTimeouts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Mode {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(ScraperError::Config(format!("unknown mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: Mode,
    pub host: String,
    pub port: u16,
    /// Directory served for paths no route claims.
    pub static_dir: Option<PathBuf>,
    /// Venue list replacing the built-in one.
    pub venues_path: Option<PathBuf>,
    pub browser: BrowserConfig,
    pub render: RenderConfig,
    pub pacing: PacingConfig,
    pub schedule: ScheduleConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub launch_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub navigation_timeout_ms: u64,
    pub settle_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub detail_delay_ms: u64,
    pub venue_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Local time of day for the daily run, `HH:MM`.
    pub daily_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite file, or `:memory:` for a store that does not survive restarts.
    pub path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            static_dir: None,
            venues_path: None,
            browser: BrowserConfig::default(),
            render: RenderConfig::default(),
            pacing: PacingConfig::default(),
            schedule: ScheduleConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            launch_timeout_ms: DEFAULT_BROWSER_LAUNCH_TIMEOUT_MS,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            settle_timeout_ms: DEFAULT_SETTLE_TIMEOUT_MS,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            detail_delay_ms: DEFAULT_DETAIL_DELAY_MS,
            venue_delay_ms: DEFAULT_VENUE_DELAY_MS,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { enabled: true, daily_at: DEFAULT_DAILY_AT.to_string() }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { path: DEFAULT_CACHE_PATH.to_string() }
    }
}

impl AppConfig {
    /// Reads `path` when it exists (defaults otherwise), then applies
    /// environment overrides. `.env` is loaded first if present.
    pub fn load(path: &Path) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                ScraperError::Config(format!("Failed to read config file '{}': {e}", path.display()))
            })?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `APP_ENV`, `PORT`, `CHROMIUM_PATH`, `CACHE_DB_PATH` and
    /// `VENUES_PATH` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(mode) = get("APP_ENV") {
            self.mode = mode.parse()?;
        }
        if let Some(port) = get("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|e| ScraperError::Config(format!("PORT '{port}' is not a port number: {e}")))?;
        }
        if let Some(path) = get("CHROMIUM_PATH") {
            self.browser.executable = Some(PathBuf::from(path));
        }
        if let Some(path) = get("CACHE_DB_PATH") {
            self.cache.path = path;
        }
        if let Some(path) = get("VENUES_PATH") {
            self.venues_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.daily_at()?;
        if self.render.navigation_timeout_ms == 0 {
            return Err(ScraperError::Config("render.navigation_timeout_ms must be positive".into()));
        }
        if self.cache.path.trim().is_empty() {
            return Err(ScraperError::Config("cache.path is empty".into()));
        }
        Ok(())
    }

    pub fn daily_at(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.schedule.daily_at.trim(), "%H:%M").map_err(|e| {
            ScraperError::Config(format!("schedule.daily_at '{}' is not HH:MM: {e}", self.schedule.daily_at))
        })
    }

    pub fn render_timeouts(&self) -> RenderTimeouts {
        RenderTimeouts {
            navigation: Duration::from_millis(self.render.navigation_timeout_ms),
            settle: Duration::from_millis(self.render.settle_timeout_ms),
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            pipeline: PipelineSettings {
                timeouts: self.render_timeouts(),
                detail_delay: Duration::from_millis(self.pacing.detail_delay_ms),
            },
            venue_delay: Duration::from_millis(self.pacing.venue_delay_ms),
        }
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            executable: self.browser.executable.clone(),
            headless: self.browser.headless,
            launch_timeout: Duration::from_millis(self.browser.launch_timeout_ms),
        }
    }

    pub fn uses_memory_cache(&self) -> bool {
        self.cache.path == IN_MEMORY_CACHE
    }
}
