use crate::core::dedup::PartnerSet;
use crate::core::fetch::FetchClient;
use crate::core::location_queue::LocationQueue;
use crate::core::parser::parse_partners;
use crate::domain::model::{FailureKind, KeyFailure, LocationKey, PartnerRecord, SkippedRow};
use crate::domain::ports::{CacheStore, PartnerSource, Sleeper};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorOptions {
    /// Keys resolved at the same time.
    pub concurrency: usize,
    /// Skip cache reads and re-fetch every key (fresh results still overwrite the cache).
    pub force_refresh: bool,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            force_refresh: false,
        }
    }
}

/// Per-key lifecycle: `Pending → CacheHit | Fetching → Fetched | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pending,
    CacheHit,
    Fetching,
    Fetched,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyStatus {
    pub key: LocationKey,
    pub state: KeyState,
    pub records: usize,
}

#[derive(Debug)]
enum Resolution {
    CacheHit(Vec<PartnerRecord>),
    Fetched {
        records: Vec<PartnerRecord>,
        cache_written: bool,
    },
    Failed(KeyFailure),
    /// Cancelled before a fetch was started.
    NotAttempted,
}

impl Resolution {
    fn state(&self) -> KeyState {
        match self {
            Resolution::CacheHit(_) => KeyState::CacheHit,
            Resolution::Fetched { .. } => KeyState::Fetched,
            Resolution::Failed(_) => KeyState::Failed,
            Resolution::NotAttempted => KeyState::Pending,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub keys: usize,
    pub cache_hits: usize,
    pub fetched: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub skipped_rows: usize,
    pub duplicate_rows: usize,
    pub records: usize,
    pub merge_conflicts: usize,
    pub cache_write_failures: usize,
    pub network_requests: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every key resolved.
    Complete,
    /// Some keys failed; the rest made it into the output.
    PartialFailure,
    /// Every key failed with a transient or rate-limit error: the service looks down.
    UpstreamUnreachable,
    /// Interrupted; keys that never started are listed as not attempted.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub records: Vec<PartnerRecord>,
    pub failures: Vec<KeyFailure>,
    pub not_attempted: Vec<LocationKey>,
    pub skipped: Vec<SkippedRow>,
    pub statuses: Vec<KeyStatus>,
    pub stats: RunStats,
    pub cancelled: bool,
}

impl AggregateReport {
    pub fn outcome(&self) -> RunOutcome {
        let interrupted = !self.not_attempted.is_empty()
            || self.failures.iter().any(|f| f.kind == FailureKind::Cancelled);
        if self.cancelled && interrupted {
            return RunOutcome::Cancelled;
        }
        if self.is_upstream_unreachable() {
            return RunOutcome::UpstreamUnreachable;
        }
        if self.failures.is_empty() {
            RunOutcome::Complete
        } else {
            RunOutcome::PartialFailure
        }
    }

    fn is_upstream_unreachable(&self) -> bool {
        !self.failures.is_empty()
            && self.stats.cache_hits == 0
            && self.stats.fetched == 0
            && self.not_attempted.is_empty()
            && self.failures.iter().all(|f| f.kind.is_retryable())
    }
}

/// Drives every queued key through cache-or-fetch and merges the results.
///
/// A key is fetched at most once per run (the queue holds no duplicates) and
/// never when the cache already has it, unless `force_refresh` is set.
pub struct Aggregator<C: CacheStore, P: PartnerSource, Z: Sleeper> {
    cache: C,
    fetcher: FetchClient<P, Z>,
    options: AggregatorOptions,
    cancel: CancellationToken,
}

impl<C: CacheStore, P: PartnerSource, Z: Sleeper> Aggregator<C, P, Z> {
    pub fn new(cache: C, fetcher: FetchClient<P, Z>, options: AggregatorOptions) -> Self {
        Self {
            cache,
            fetcher,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn fetcher(&self) -> &FetchClient<P, Z> {
        &self.fetcher
    }

    pub async fn run(&self, queue: &LocationQueue) -> AggregateReport {
        let keys = queue.keys();
        let concurrency = self.options.concurrency.max(1);
        let requests_before = self.fetcher.requests_sent();

        tracing::info!(
            "🚀 Resolving {} location(s) with concurrency {}{}",
            keys.len(),
            concurrency,
            if self.options.force_refresh { " (force refresh)" } else { "" }
        );

        let completed: Vec<(usize, Resolution)> = stream::iter(keys.iter().enumerate())
            .map(|(index, key)| async move { (index, self.resolve(key).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        // 完成順序不固定，依佇列順序重新排好再合併
        let mut slots: Vec<Option<Resolution>> = keys.iter().map(|_| None).collect();
        for (index, resolution) in completed {
            slots[index] = Some(resolution);
        }

        let mut partners = PartnerSet::new();
        let mut failures = Vec::new();
        let mut not_attempted = Vec::new();
        let mut statuses = Vec::with_capacity(keys.len());
        let mut stats = RunStats {
            keys: keys.len(),
            skipped_rows: queue.skipped().len(),
            duplicate_rows: queue.duplicates(),
            ..RunStats::default()
        };

        for (key, slot) in keys.iter().zip(slots) {
            let resolution = slot.unwrap_or(Resolution::NotAttempted);
            let state = resolution.state();
            let mut record_count = 0;

            match resolution {
                Resolution::CacheHit(records) => {
                    stats.cache_hits += 1;
                    record_count = records.len();
                    partners.merge(records);
                }
                Resolution::Fetched {
                    records,
                    cache_written,
                } => {
                    stats.fetched += 1;
                    if !cache_written {
                        stats.cache_write_failures += 1;
                    }
                    record_count = records.len();
                    partners.merge(records);
                }
                Resolution::Failed(failure) => {
                    stats.failed += 1;
                    failures.push(failure);
                }
                Resolution::NotAttempted => {
                    stats.not_attempted += 1;
                    not_attempted.push(key.clone());
                }
            }

            statuses.push(KeyStatus {
                key: key.clone(),
                state,
                records: record_count,
            });
        }

        stats.records = partners.len();
        stats.merge_conflicts = partners.conflicts();
        stats.network_requests = self.fetcher.requests_sent() - requests_before;

        AggregateReport {
            records: partners.into_records(),
            failures,
            not_attempted,
            skipped: queue.skipped().to_vec(),
            statuses,
            stats,
            cancelled: self.cancel.is_cancelled(),
        }
    }

    async fn resolve(&self, key: &LocationKey) -> Resolution {
        if !self.options.force_refresh {
            if let Some(records) = self.cached_records(key).await {
                transition(key, KeyState::Pending, KeyState::CacheHit);
                tracing::info!("📦 [cached] {}", key);
                return Resolution::CacheHit(records);
            }
        }

        if self.cancel.is_cancelled() {
            tracing::debug!("{}: cancelled before fetching", key);
            return Resolution::NotAttempted;
        }

        transition(key, KeyState::Pending, KeyState::Fetching);
        match self.fetcher.fetch(key, &self.cancel).await {
            Ok(fetched) => {
                tracing::info!(
                    "🌐 [fetched] {} ({} partner(s), {} attempt(s))",
                    key,
                    fetched.records.len(),
                    fetched.attempts
                );
                let cache_written = match self.cache.put(key, &fetched.payload).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!("⚠️ Could not cache response for {}: {}", key, e);
                        false
                    }
                };
                transition(key, KeyState::Fetching, KeyState::Fetched);
                Resolution::Fetched {
                    records: fetched.records,
                    cache_written,
                }
            }
            Err(failure) => {
                transition(key, KeyState::Fetching, KeyState::Failed);
                Resolution::Failed(failure)
            }
        }
    }

    /// Cache lookup; read errors and payloads that no longer parse count as misses.
    async fn cached_records(&self, key: &LocationKey) -> Option<Vec<PartnerRecord>> {
        let entry = match self.cache.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!("⚠️ Cache read failed for {}, fetching instead: {}", key, e);
                return None;
            }
        };

        match parse_partners(&entry.payload, key) {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(
                    "⚠️ Cached response for {} (from {}) no longer parses, fetching instead: {}",
                    key,
                    entry.fetched_at,
                    e
                );
                None
            }
        }
    }
}

fn transition(key: &LocationKey, from: KeyState, to: KeyState) {
    tracing::debug!("{}: {:?} → {:?}", key, from, to);
}
