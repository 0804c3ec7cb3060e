use crate::config::{
    validate_common, DEFAULT_CACHE_DIR, DEFAULT_CONCURRENCY, DEFAULT_FAILURES,
    DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_INPUT, DEFAULT_MAX_BACKOFF_MS, DEFAULT_OUTPUT,
    DEFAULT_REQUEST_DELAY_MS, DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECS,
};
use crate::core::fetch::DEFAULT_ENDPOINT;
use crate::core::ConfigProvider;
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "partner-etl")]
#[command(about = "Collects reseller partners for a list of locations into one CSV")]
pub struct CliConfig {
    /// Input CSV: country,country_code,region,region_code[,city]
    #[arg(short, long, default_value = DEFAULT_INPUT)]
    pub input: String,

    /// Output CSV with one row per partner
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: String,

    /// Report of skipped rows and failed locations
    #[arg(long, default_value = DEFAULT_FAILURES)]
    pub failures: String,

    /// Directory holding cached responses between runs
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: String,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    #[arg(long, default_value_t = DEFAULT_RETRY_ATTEMPTS)]
    pub retry_attempts: u32,

    #[arg(long, default_value_t = DEFAULT_INITIAL_BACKOFF_MS)]
    pub initial_backoff_ms: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_BACKOFF_MS)]
    pub max_backoff_ms: u64,

    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Pause after each successful request
    #[arg(long, default_value_t = DEFAULT_REQUEST_DELAY_MS)]
    pub request_delay_ms: u64,

    /// Send bare requests without the browser-like headers
    #[arg(long)]
    pub no_browser_headers: bool,

    /// Ignore cached responses and fetch every location again
    #[arg(long)]
    pub force_refresh: bool,

    /// Load settings from a TOML file instead of the flags above
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Emit JSON log lines
    #[arg(long)]
    pub log_json: bool,
}

impl ConfigProvider for CliConfig {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn input_path(&self) -> &str {
        &self.input
    }

    fn output_path(&self) -> &str {
        &self.output
    }

    fn failures_path(&self) -> &str {
        &self.failures
    }

    fn cache_dir(&self) -> &str {
        &self.cache_dir
    }

    fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    fn force_refresh(&self) -> bool {
        self.force_refresh
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn browser_headers(&self) -> bool {
        !self.no_browser_headers
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_common(self)
    }
}
