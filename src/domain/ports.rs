use crate::domain::model::{CacheEntry, FetchError, LocationKey};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn endpoint(&self) -> &str;
    fn input_path(&self) -> &str;
    fn output_path(&self) -> &str;
    fn failures_path(&self) -> &str;
    fn cache_dir(&self) -> &str;
    fn concurrency(&self) -> usize;
    fn retry_attempts(&self) -> u32;
    fn initial_backoff(&self) -> Duration;
    fn max_backoff(&self) -> Duration;
    fn request_timeout(&self) -> Duration;
    fn request_delay(&self) -> Duration;
    fn force_refresh(&self) -> bool;
    /// Extra request headers, sent after the browser defaults.
    fn request_headers(&self) -> Vec<(String, String)>;
    fn browser_headers(&self) -> bool;
}

/// Durable key → raw response mapping that outlives a single run.
///
/// `get` returning `Ok(None)` means "must fetch"; an `Err` is a cache I/O
/// problem the caller may downgrade to a miss.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &LocationKey) -> Result<Option<CacheEntry>>;
    async fn put(&self, key: &LocationKey, payload: &str) -> Result<CacheEntry>;
}

/// A single request attempt against the partner service, returning the raw body.
#[async_trait]
pub trait PartnerSource: Send + Sync {
    async fn request(&self, key: &LocationKey) -> std::result::Result<String, FetchError>;
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}
