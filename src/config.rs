use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use rand::Rng;
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "verifier";
const ENV_PREFIX: &str = "TOW";

/// Run settings: defaults, then `verifier.toml`, then `TOW_*` env vars.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workers: usize,
    pub max_urls_to_check: usize,
    pub page_load_timeout_ms: u64,
    pub results_wait_timeout_ms: u64,
    pub record_delay_ms: [u64; 2],
    pub search_settle_ms: [u64; 2],
    pub page_settle_ms: u64,
    pub url_delay_ms: u64,
    pub engine_error_cooldown_secs: u64,
    pub blocked_cooldown_secs: u64,
    pub max_recycles: usize,
    pub recycle_every: usize,
    pub snapshot_interval_secs: u64,
    pub input_path: PathBuf,
    pub results_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub webdriver_url: String,
    pub headless: bool,
    /// Worker that keeps a visible browser when `headless` is on, for auditing.
    pub visible_worker: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            workers: 4,
            max_urls_to_check: 10,
            page_load_timeout_ms: 12_000,
            results_wait_timeout_ms: 4_000,
            record_delay_ms: [3_000, 6_000],
            search_settle_ms: [2_000, 4_000],
            page_settle_ms: 300,
            url_delay_ms: 500,
            engine_error_cooldown_secs: 10,
            blocked_cooldown_secs: 60,
            max_recycles: 3,
            recycle_every: 30,
            snapshot_interval_secs: 60,
            input_path: PathBuf::from("census_filtered.csv"),
            results_path: PathBuf::from("towing_companies_verified.csv"),
            checkpoint_path: PathBuf::from("processed_dots.csv"),
            webdriver_url: "http://localhost:4444".to_string(),
            headless: false,
            visible_worker: Some(0),
        }
    }
}

impl Settings {
    /// Load layered settings. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn results_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.results_wait_timeout_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            record_delay_ms: self.record_delay_ms,
            search_settle_ms: self.search_settle_ms,
            page_settle: Duration::from_millis(self.page_settle_ms),
            url_delay: Duration::from_millis(self.url_delay_ms),
            engine_error_cooldown: Duration::from_secs(self.engine_error_cooldown_secs),
            blocked_cooldown: Duration::from_secs(self.blocked_cooldown_secs),
        }
    }
}

/// Courtesy delays and cooldowns. None of them affect correctness.
#[derive(Debug, Clone)]
pub struct Pacing {
    pub record_delay_ms: [u64; 2],
    pub search_settle_ms: [u64; 2],
    pub page_settle: Duration,
    pub url_delay: Duration,
    pub engine_error_cooldown: Duration,
    pub blocked_cooldown: Duration,
}

impl Pacing {
    #[cfg(test)]
    pub fn zero() -> Self {
        Pacing {
            record_delay_ms: [0, 0],
            search_settle_ms: [0, 0],
            page_settle: Duration::ZERO,
            url_delay: Duration::ZERO,
            engine_error_cooldown: Duration::ZERO,
            blocked_cooldown: Duration::ZERO,
        }
    }

    pub fn record_delay(&self) -> Duration {
        jitter(self.record_delay_ms)
    }

    pub fn search_settle(&self) -> Duration {
        jitter(self.search_settle_ms)
    }
}

fn jitter([min, max]: [u64; 2]) -> Duration {
    if max <= min {
        return Duration::from_millis(min);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// Sleep, skipping the timer entirely for zero delays.
pub async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
