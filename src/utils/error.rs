use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP client error: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Input error: {message}")]
    InputError { message: String },

    #[error("Cache directory '{path}' is neither readable nor writable: {message}")]
    CacheUnavailable { path: String, message: String },

    #[error("Upstream service unreachable: all {failed_keys} location(s) failed with transient errors")]
    UpstreamUnreachable { failed_keys: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Network,
    Storage,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            EtlError::InputError { .. } | EtlError::CsvError(_) => ErrorCategory::Input,
            EtlError::ApiError(_) | EtlError::UpstreamUnreachable { .. } => ErrorCategory::Network,
            EtlError::IoError(_) | EtlError::CacheUnavailable { .. } => ErrorCategory::Storage,
            EtlError::SerializationError(_) => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EtlError::UpstreamUnreachable { .. } => ErrorSeverity::Critical,
            EtlError::CacheUnavailable { .. } => ErrorSeverity::Critical,
            EtlError::ApiError(_) => ErrorSeverity::Medium,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the command line flags or the TOML configuration file",
            ErrorCategory::Input => "Verify the input CSV has the columns country,country_code,region,region_code[,city]",
            ErrorCategory::Network => match self {
                EtlError::UpstreamUnreachable { .. } => {
                    "The partner service looks down or blocked; check connectivity and retry later (cached locations are kept)"
                }
                _ => "Check network connectivity and the endpoint URL",
            },
            ErrorCategory::Storage => "Check that the cache/output directories exist and are writable",
            ErrorCategory::Data => "Delete the offending cache entry and run again",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::UpstreamUnreachable { failed_keys } => format!(
                "Could not reach the partner service for any of the {} location(s)",
                failed_keys
            ),
            EtlError::CacheUnavailable { path, .. } => {
                format!("Cache directory '{}' cannot be used", path)
            }
            EtlError::InputError { message } => format!("Cannot read locations: {}", message),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
