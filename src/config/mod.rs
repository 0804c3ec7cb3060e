#[cfg(feature = "cli")]
pub mod cli;
pub mod storage;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::CliConfig;
pub use storage::LocalStorage;

use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_distinct_paths, validate_path, validate_range, validate_url,
};

pub const DEFAULT_INPUT: &str = "locations.csv";
pub const DEFAULT_OUTPUT: &str = "partners.csv";
pub const DEFAULT_FAILURES: &str = "failures.csv";
pub const DEFAULT_CACHE_DIR: &str = "html_cache";
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Upper bound on parallel requests against the partner service.
pub const MAX_CONCURRENCY: usize = 32;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 500;

/// Checks shared by every configuration source.
pub(crate) fn validate_common(config: &impl crate::core::ConfigProvider) -> Result<()> {
    validate_url("endpoint", config.endpoint())?;
    validate_path("input", config.input_path())?;
    validate_path("output", config.output_path())?;
    validate_path("failures", config.failures_path())?;
    validate_path("cache_dir", config.cache_dir())?;
    validate_distinct_paths(&[
        ("input", config.input_path()),
        ("output", config.output_path()),
        ("failures", config.failures_path()),
    ])?;
    validate_range("concurrency", config.concurrency(), 1, MAX_CONCURRENCY)?;
    validate_range("retry_attempts", config.retry_attempts(), 1, 10)?;
    validate_range(
        "request_timeout_secs",
        config.request_timeout().as_secs(),
        1,
        600,
    )?;
    if config.max_backoff() < config.initial_backoff() {
        return Err(EtlError::InvalidConfigValueError {
            field: "max_backoff_ms".to_string(),
            value: config.max_backoff().as_millis().to_string(),
            reason: format!(
                "must be at least initial_backoff_ms ({})",
                config.initial_backoff().as_millis()
            ),
        });
    }
    Ok(())
}
