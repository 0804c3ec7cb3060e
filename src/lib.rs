pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{toml_config::TomlConfig, LocalStorage};

pub use core::aggregator::{AggregateReport, Aggregator, AggregatorOptions, RunOutcome};
pub use core::etl::{EtlEngine, LocalEtlEngine, ReportPaths};
pub use core::ConfigProvider;
pub use domain::model::{LocationKey, PartnerRecord};
pub use utils::error::{EtlError, Result};
