pub mod aggregator;
pub mod cache;
pub mod dedup;
pub mod etl;
pub mod fetch;
pub mod location_queue;
pub mod parser;
pub mod report;

pub use crate::domain::model::{LocationKey, PartnerRecord};
pub use crate::domain::ports::{CacheStore, ConfigProvider, PartnerSource, Sleeper, Storage};
pub use crate::utils::error::Result;
