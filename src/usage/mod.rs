//! Claude Code Usage Monitor - usage ingestion, windowing and forecasting

pub mod models;
pub mod windower;
pub mod activity;
pub mod burn_rate;
pub mod depletion;
pub mod staleness;
pub mod quota;
pub mod weekly;
pub mod snapshot;
pub mod reader;
pub mod cache;
pub mod pricing;
pub mod oauth;
pub mod background;
pub mod stats;
pub mod config;

pub use models::*;
pub use snapshot::{SnapshotInputs, SnapshotStore, UsageSnapshot};
pub use cache::CacheManager;
pub use pricing::PricingCalculator;
pub use background::{start_background_refresh, Refresher};
