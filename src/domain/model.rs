use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Normalized identifier for one geographic query.
///
/// Identity is the `(country_code, region_code, city)` triple; the display
/// names ride along for output rows and log lines only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationKey {
    country: String,
    country_code: String,
    region: String,
    region_code: String,
    city: Option<String>,
}

impl LocationKey {
    /// Builds a key from raw CSV fields: `country, country_code, region, region_code[, city]`.
    pub fn from_fields(fields: &[&str]) -> std::result::Result<Self, String> {
        if fields.len() < 4 {
            return Err(format!(
                "expected at least 4 columns (country, country_code, region, region_code), found {}",
                fields.len()
            ));
        }

        let country_code = normalize_code("country_code", fields[1])?;
        let region_code = normalize_code("region_code", fields[3])?;
        let country = non_blank_or(fields[0], &country_code);
        let region = non_blank_or(fields[2], &region_code);
        let city = fields.get(4).and_then(|c| collapse_whitespace(c));

        Ok(Self {
            country,
            country_code,
            region,
            region_code,
            city,
        })
    }

    pub fn new(
        country: &str,
        country_code: &str,
        region: &str,
        region_code: &str,
        city: Option<&str>,
    ) -> std::result::Result<Self, String> {
        let mut fields = vec![country, country_code, region, region_code];
        if let Some(city) = city {
            fields.push(city);
        }
        Self::from_fields(&fields)
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn region_code(&self) -> &str {
        &self.region_code
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    /// Filesystem-safe identifier, e.g. `US_CA_San_Francisco` or `AE_RK_`.
    pub fn cache_id(&self) -> String {
        let city_part = self
            .city
            .as_deref()
            .map(|city| {
                city.chars()
                    .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
                    .collect::<String>()
            })
            .unwrap_or_default();
        format!("{}_{}_{}", self.country_code, self.region_code, city_part)
    }

    /// File name stem for the cache entry, derived from the identity only.
    ///
    /// Codes never contain `_`, and the lowercased city keeps `[a-z0-9-]`
    /// while every other UTF-8 byte becomes `%XX`, so distinct keys never
    /// share a stem and equal keys always do: `US_CA_san%20jose`, `AE_RK_`.
    pub fn storage_id(&self) -> String {
        let mut id = format!("{}_{}_", self.country_code, self.region_code);
        if let Some(city) = &self.city {
            for byte in city.to_lowercase().bytes() {
                match byte {
                    b'a'..=b'z' | b'0'..=b'9' | b'-' => id.push(byte as char),
                    other => id.push_str(&format!("%{:02X}", other)),
                }
            }
        }
        id
    }

    fn identity(&self) -> (&str, &str, Option<String>) {
        (
            &self.country_code,
            &self.region_code,
            self.city.as_ref().map(|c| c.to_lowercase()),
        )
    }
}

impl PartialEq for LocationKey {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for LocationKey {}

impl Hash for LocationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.city {
            Some(city) => write!(f, "{} - {} - {}", self.country, self.region, city),
            None => write!(f, "{} - {}", self.country, self.region),
        }
    }
}

fn normalize_code(field: &str, raw: &str) -> std::result::Result<String, String> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(format!("{} is blank", field));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!("{} '{}' contains invalid characters", field, code));
    }
    Ok(code.to_ascii_uppercase())
}

fn non_blank_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

fn collapse_whitespace(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// One partner/reseller entity returned by the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerRecord {
    pub partner_id: String,
    pub company_name: String,
    pub partner_level: String,
    pub telephone: String,
    pub website: String,
    pub address: String,
    pub country: String,
    pub state: String,
    pub city: Option<String>,
    pub locations: Vec<LocationKey>,
}

impl PartnerRecord {
    /// True when the entity fields (not the location-derived ones) match.
    pub fn same_details(&self, other: &PartnerRecord) -> bool {
        self.company_name == other.company_name
            && self.partner_level == other.partner_level
            && self.telephone == other.telephone
            && self.website == other.website
            && self.address == other.address
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: LocationKey,
    pub payload: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    RateLimited,
    Permanent,
    /// Retry sequence stopped by a cancelled run.
    Cancelled,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Permanent => "permanent",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// Classified failure of a single request attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: FailureKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for FetchError {}

/// Terminal failure for one location key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFailure {
    pub key: LocationKey,
    pub kind: FailureKind,
    pub attempts: u32,
    pub reason: String,
}

/// Payload that came back from the service and parsed cleanly.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub payload: String,
    pub records: Vec<PartnerRecord>,
    pub attempts: u32,
}

pub type FetchResult = std::result::Result<FetchedPayload, KeyFailure>;

/// Input row that could not be turned into a `LocationKey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub line: u64,
    pub reason: String,
}
