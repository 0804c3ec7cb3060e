use crate::config::LocalStorage;
use crate::core::aggregator::{AggregateReport, Aggregator, AggregatorOptions, RunOutcome};
use crate::core::cache::FileCacheStore;
use crate::core::fetch::{
    default_browser_headers, FetchClient, HttpPartnerSource, RetryPolicy, TokioSleeper,
};
use crate::core::location_queue::LocationQueue;
use crate::core::report::{failures_csv, partners_csv};
use crate::core::{CacheStore, ConfigProvider, PartnerSource, Sleeper, Storage};
use crate::utils::error::{EtlError, Result};
use tokio_util::sync::CancellationToken;

/// Where the engine reads its locations and writes its two reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub input: String,
    pub output: String,
    pub failures: String,
}

impl ReportPaths {
    pub fn from_config(config: &impl ConfigProvider) -> Self {
        Self {
            input: config.input_path().to_string(),
            output: config.output_path().to_string(),
            failures: config.failures_path().to_string(),
        }
    }
}

pub struct EtlEngine<S: Storage, C: CacheStore, P: PartnerSource, Z: Sleeper = TokioSleeper> {
    storage: S,
    aggregator: Aggregator<C, P, Z>,
    paths: ReportPaths,
}

/// Engine wired to the local filesystem and the real partner service.
pub type LocalEtlEngine = EtlEngine<LocalStorage, FileCacheStore, HttpPartnerSource, TokioSleeper>;

impl LocalEtlEngine {
    pub async fn from_config(
        config: &impl ConfigProvider,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let cache = FileCacheStore::open(config.cache_dir()).await?;
        if cache.is_read_only() {
            tracing::warn!(
                "⚠️ Cache directory {} is read-only, fresh responses will not be kept",
                config.cache_dir()
            );
        }

        let source = HttpPartnerSource::new(
            config.endpoint(),
            config.request_timeout(),
            request_headers(config),
        )?;
        let policy = RetryPolicy::new(
            config.retry_attempts(),
            config.initial_backoff(),
            config.max_backoff(),
        );
        let fetcher = FetchClient::new(source, policy).with_request_delay(config.request_delay());
        let options = AggregatorOptions {
            concurrency: config.concurrency(),
            force_refresh: config.force_refresh(),
        };
        let aggregator = Aggregator::new(cache, fetcher, options).with_cancellation(cancel);

        Ok(EtlEngine::new(
            LocalStorage::new("."),
            aggregator,
            ReportPaths::from_config(config),
        ))
    }
}

/// Browser defaults (when enabled) followed by the configured headers.
/// A configured header replaces a default of the same name.
pub fn request_headers(config: &impl ConfigProvider) -> Vec<(String, String)> {
    let extra = config.request_headers();
    let mut headers: Vec<(String, String)> = if config.browser_headers() {
        default_browser_headers()
            .into_iter()
            .filter(|(name, _)| !extra.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)))
            .collect()
    } else {
        Vec::new()
    };
    headers.extend(extra);
    headers
}

impl<S: Storage, C: CacheStore, P: PartnerSource, Z: Sleeper> EtlEngine<S, C, P, Z> {
    pub fn new(storage: S, aggregator: Aggregator<C, P, Z>, paths: ReportPaths) -> Self {
        Self {
            storage,
            aggregator,
            paths,
        }
    }

    pub fn aggregator(&self) -> &Aggregator<C, P, Z> {
        &self.aggregator
    }

    pub fn paths(&self) -> &ReportPaths {
        &self.paths
    }

    /// Runs extract, transform and load.
    ///
    /// Both reports are written before an unreachable upstream is turned into
    /// `EtlError::UpstreamUnreachable`, so the failure report is always on disk.
    pub async fn run(&self) -> Result<AggregateReport> {
        tracing::info!("🚀 Starting partner ETL from {}", self.paths.input);

        // Extract
        let queue = self.extract().await?;
        tracing::info!(
            "📥 {} location(s) queued ({} skipped, {} duplicate row(s))",
            queue.len(),
            queue.skipped().len(),
            queue.duplicates()
        );

        // Transform
        let report = self.aggregator.run(&queue).await;

        // Load
        self.load(&report).await?;
        log_summary(&report);

        if report.outcome() == RunOutcome::UpstreamUnreachable {
            return Err(EtlError::UpstreamUnreachable {
                failed_keys: report.failures.len(),
            });
        }
        Ok(report)
    }

    pub async fn extract(&self) -> Result<LocationQueue> {
        let bytes = self.storage.read_file(&self.paths.input).await?;
        LocationQueue::from_csv(bytes.as_slice()).map_err(|e| EtlError::InputError {
            message: format!("{}: {}", self.paths.input, e),
        })
    }

    pub async fn load(&self, report: &AggregateReport) -> Result<()> {
        self.storage
            .write_file(&self.paths.output, &partners_csv(&report.records)?)
            .await?;
        tracing::info!("📁 {} partner(s) written to {}", report.records.len(), self.paths.output);

        self.storage
            .write_file(&self.paths.failures, &failures_csv(report)?)
            .await?;
        let problems = report.failures.len() + report.skipped.len() + report.not_attempted.len();
        if problems > 0 {
            tracing::info!("📝 {} problem(s) written to {}", problems, self.paths.failures);
        }
        Ok(())
    }
}

fn log_summary(report: &AggregateReport) {
    let stats = &report.stats;
    tracing::info!(
        "📊 Summary: {} location(s), {} cache hit(s), {} fetched, {} failed, {} skipped row(s)",
        stats.keys,
        stats.cache_hits,
        stats.fetched,
        stats.failed,
        stats.skipped_rows
    );
    tracing::info!(
        "📊 {} partner(s), {} merge conflict(s), {} network request(s), {} cache write failure(s)",
        stats.records,
        stats.merge_conflicts,
        stats.network_requests,
        stats.cache_write_failures
    );

    match report.outcome() {
        RunOutcome::Complete => tracing::info!("✅ All locations resolved"),
        RunOutcome::PartialFailure => {
            for failure in &report.failures {
                tracing::warn!(
                    "❌ {} [{}] after {} attempt(s): {}",
                    failure.key,
                    failure.kind.as_str(),
                    failure.attempts,
                    failure.reason
                );
            }
        }
        RunOutcome::UpstreamUnreachable => {
            tracing::error!("🚨 Every location failed with a transient error; upstream unreachable")
        }
        RunOutcome::Cancelled => tracing::warn!(
            "⏹️ Run cancelled, {} location(s) not attempted",
            stats.not_attempted
        ),
    }
}
