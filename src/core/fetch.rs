use crate::core::parser::parse_partners;
use crate::domain::model::{FailureKind, FetchError, FetchResult, FetchedPayload, KeyFailure, LocationKey};
use crate::domain::ports::{PartnerSource, Sleeper};
use crate::utils::error::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ENDPOINT: &str = "https://www.3cx.com/resellers/xcx-get-partners/";

/// Retry policy with exponential backoff.
///
/// Backoff doubles per failed attempt (`initial * 2^n`) up to `max_backoff`;
/// a random jitter below `initial_backoff` is added on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// Backoff after the `failed_attempts`-th failure (1-based), without jitter.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded retry state for one key: counts attempts and decides what follows a failure.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempts: 0 }
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_failure(&self, error: &FetchError, jitter: Duration) -> RetryDecision {
        if !error.kind.is_retryable() || self.attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp;
        }

        let backoff = self.policy.backoff(self.attempts);
        let delay = match (error.kind, error.retry_after) {
            // 伺服器有給 Retry-After 就照它的，但不超過上限
            (FailureKind::RateLimited, Some(retry_after)) => {
                retry_after.max(backoff).min(self.policy.max_backoff)
            }
            _ => backoff + jitter,
        };
        RetryDecision::RetryAfter(delay)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub fn default_browser_headers() -> Vec<(String, String)> {
    [
        ("accept", "*/*"),
        ("accept-language", "en-US,en;q=0.9"),
        ("cache-control", "no-cache"),
        ("origin", "https://www.3cx.com"),
        ("pragma", "no-cache"),
        ("referer", "https://www.3cx.com/ordering/find-reseller/"),
        (
            "user-agent",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36",
        ),
        ("x-requested-with", "XMLHttpRequest"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Posts the location form to the partner-locator endpoint.
pub struct HttpPartnerSource {
    client: Client,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl HttpPartnerSource {
    pub fn new(endpoint: &str, timeout: Duration, headers: Vec<(String, String)>) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            headers,
        })
    }

    fn form(key: &LocationKey) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("country", key.country_code().to_string()),
            ("state", key.region_code().to_string()),
            ("name", String::new()),
        ];
        if let Some(city) = key.city() {
            form.push(("city", city.to_string()));
        }
        form
    }
}

#[async_trait]
impl PartnerSource for HttpPartnerSource {
    async fn request(&self, key: &LocationKey) -> std::result::Result<String, FetchError> {
        let mut request = self.client.post(&self.endpoint).form(&Self::form(key));
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        tracing::debug!("Requesting partners for {} from {}", key, self.endpoint);
        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        tracing::debug!("Partner service answered {} for {}", status, key);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::rate_limited(
                format!("HTTP {}", status),
                retry_after,
            ));
        }
        if status.is_server_error() {
            return Err(FetchError::transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(FetchError::permanent(format!("HTTP {}", status)));
        }

        response.text().await.map_err(classify_transport_error)
    }
}

fn classify_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_builder() {
        FetchError::permanent(err.to_string())
    } else if err.is_timeout() {
        FetchError::transient(format!("timed out: {}", err))
    } else {
        FetchError::transient(err.to_string())
    }
}

/// One logical fetch per key: retries, jitter, politeness delay, response validation.
///
/// Never touches the cache; the caller persists the payload once it is known to parse.
pub struct FetchClient<P: PartnerSource, Z: Sleeper = TokioSleeper> {
    source: P,
    sleeper: Z,
    policy: RetryPolicy,
    request_delay: Duration,
    jitter_rng: Mutex<StdRng>,
    requests: AtomicU64,
}

impl<P: PartnerSource> FetchClient<P, TokioSleeper> {
    pub fn new(source: P, policy: RetryPolicy) -> Self {
        Self::with_sleeper(source, policy, TokioSleeper)
    }
}

impl<P: PartnerSource, Z: Sleeper> FetchClient<P, Z> {
    pub fn with_sleeper(source: P, policy: RetryPolicy, sleeper: Z) -> Self {
        Self {
            source,
            sleeper,
            policy,
            request_delay: Duration::ZERO,
            jitter_rng: Mutex::new(StdRng::from_entropy()),
            requests: AtomicU64::new(0),
        }
    }

    /// Pause after every successful response, to stay polite with the service.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.jitter_rng = Mutex::new(rng);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn source(&self) -> &P {
        &self.source
    }

    /// Network requests issued so far, retries included.
    pub fn requests_sent(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Runs the retry sequence for one key. A cancelled `cancel` token ends
    /// the sequence at the next backoff with a `Cancelled` failure.
    pub async fn fetch(&self, key: &LocationKey, cancel: &CancellationToken) -> FetchResult {
        let mut state = RetryState::new(self.policy.clone());

        loop {
            let attempt = state.begin_attempt();
            self.requests.fetch_add(1, Ordering::SeqCst);

            let error = match self.source.request(key).await {
                Ok(body) => {
                    if !self.request_delay.is_zero() {
                        self.sleeper.sleep(self.request_delay).await;
                    }
                    return match parse_partners(&body, key) {
                        Ok(records) => Ok(FetchedPayload {
                            payload: body,
                            records,
                            attempts: attempt,
                        }),
                        Err(e) => Err(KeyFailure {
                            key: key.clone(),
                            kind: FailureKind::Permanent,
                            attempts: attempt,
                            reason: format!("unparseable response: {}", e),
                        }),
                    };
                }
                Err(error) => error,
            };

            match state.on_failure(&error, self.jitter()) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        "🔁 {} attempt {}/{} failed ({}), retrying in {:?}",
                        key,
                        attempt,
                        self.policy.max_attempts,
                        error,
                        delay
                    );
                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = cancel.cancelled() => {}
                    }
                    if cancel.is_cancelled() {
                        tracing::warn!("⏹️ {} retries stopped after {} attempt(s): run cancelled", key, attempt);
                        return Err(KeyFailure {
                            key: key.clone(),
                            kind: FailureKind::Cancelled,
                            attempts: attempt,
                            reason: format!("run cancelled, last error: {}", error.message),
                        });
                    }
                }
                RetryDecision::GiveUp => {
                    tracing::warn!("❌ {} failed after {} attempt(s): {}", key, attempt, error);
                    return Err(KeyFailure {
                        key: key.clone(),
                        kind: error.kind,
                        attempts: attempt,
                        reason: error.message,
                    });
                }
            }
        }
    }

    fn jitter(&self) -> Duration {
        let bound = self.policy.initial_backoff.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = self
            .jitter_rng
            .lock()
            .map(|mut rng| rng.gen_range(0..bound))
            .unwrap_or(0);
        Duration::from_millis(jitter_ms)
    }
}
