use crate::config::{
    validate_common, DEFAULT_CACHE_DIR, DEFAULT_CONCURRENCY, DEFAULT_FAILURES,
    DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_INPUT, DEFAULT_MAX_BACKOFF_MS, DEFAULT_OUTPUT,
    DEFAULT_REQUEST_DELAY_MS, DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECS,
};
use crate::core::fetch::DEFAULT_ENDPOINT;
use crate::core::ConfigProvider;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::Validate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// 全部區段皆可省略，未設定的欄位使用與 CLI 相同的預設值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub source: SourceConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub browser_headers: bool,
    /// Extra request headers, sent after (and overriding) the browser defaults
    pub headers: BTreeMap<String, String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            browser_headers: true,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub path: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_INPUT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub path: String,
    pub failures_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_OUTPUT.to_string(),
            failures_path: DEFAULT_FAILURES.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: String,
    pub force_refresh: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: DEFAULT_CACHE_DIR.to_string(),
            force_refresh: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub retry_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            request_delay_ms: DEFAULT_REQUEST_DELAY_MS,
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| EtlError::ConfigError {
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${CACHE_DIR})，未定義的變數保持原樣
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }
}

impl ConfigProvider for TomlConfig {
    fn endpoint(&self) -> &str {
        &self.source.endpoint
    }

    fn input_path(&self) -> &str {
        &self.input.path
    }

    fn output_path(&self) -> &str {
        &self.output.path
    }

    fn failures_path(&self) -> &str {
        &self.output.failures_path
    }

    fn cache_dir(&self) -> &str {
        &self.cache.dir
    }

    fn concurrency(&self) -> usize {
        self.fetch.concurrency
    }

    fn retry_attempts(&self) -> u32 {
        self.fetch.retry_attempts
    }

    fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch.initial_backoff_ms)
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.fetch.max_backoff_ms)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_seconds)
    }

    fn request_delay(&self) -> Duration {
        Duration::from_millis(self.fetch.request_delay_ms)
    }

    fn force_refresh(&self) -> bool {
        self.cache.force_refresh
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        self.source
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn browser_headers(&self) -> bool {
        self.source.browser_headers
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        validate_common(self)?;
        for name in self.source.headers.keys() {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(EtlError::InvalidConfigValueError {
                    field: "source.headers".to_string(),
                    value: name.clone(),
                    reason: "not a valid HTTP header name".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();

        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.input_path(), "locations.csv");
        assert_eq!(config.failures_path(), "failures.csv");
        assert_eq!(config.concurrency(), 4);
        assert!(config.browser_headers());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_toml_config() {
        let toml_content = r#"
[source]
endpoint = "https://partners.example.com/lookup"
timeout_seconds = 10
browser_headers = false

[source.headers]
x-client = "partner-etl"

[input]
path = "data/locations.csv"

[output]
path = "out/partners.csv"
failures_path = "out/failures.csv"

[cache]
dir = "out/cache"
force_refresh = true

[fetch]
concurrency = 2
retry_attempts = 5
initial_backoff_ms = 100
max_backoff_ms = 1000
request_delay_ms = 0
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.endpoint(), "https://partners.example.com/lookup");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert!(!config.browser_headers());
        assert_eq!(
            config.request_headers(),
            vec![("x-client".to_string(), "partner-etl".to_string())]
        );
        assert_eq!(config.cache_dir(), "out/cache");
        assert!(config.force_refresh());
        assert_eq!(config.retry_attempts(), 5);
        assert_eq!(config.request_delay(), Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("PARTNER_ETL_TEST_CACHE", "/tmp/partner-cache");

        let toml_content = r#"
[cache]
dir = "${PARTNER_ETL_TEST_CACHE}"

[input]
path = "${PARTNER_ETL_UNDEFINED_VAR}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.cache_dir(), "/tmp/partner-cache");
        assert_eq!(config.input_path(), "${PARTNER_ETL_UNDEFINED_VAR}");

        std::env::remove_var("PARTNER_ETL_TEST_CACHE");
    }

    #[test]
    fn test_config_validation() {
        let bad_url = TomlConfig::from_toml_str("[source]\nendpoint = \"invalid-url\"\n").unwrap();
        assert!(bad_url.validate().is_err());

        let clash = TomlConfig::from_toml_str(
            "[output]\npath = \"same.csv\"\nfailures_path = \"same.csv\"\n",
        )
        .unwrap();
        assert!(clash.validate().is_err());

        let bad_header =
            TomlConfig::from_toml_str("[source.headers]\n\"bad header\" = \"x\"\n").unwrap();
        assert!(bad_header.validate().is_err());
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let err = TomlConfig::from_toml_str("[fetch]\nconcurrency = \"many\"\n").unwrap_err();
        assert!(matches!(err, EtlError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[input]\npath = \"file-test.csv\"\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.input_path(), "file-test.csv");
    }
}
