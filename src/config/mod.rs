//! Configuration: settings file, environment overrides, dataset filters.

mod filter;
mod settings;

pub use filter::{dataset_allowed, parse_filters, DatasetFilter};
pub use settings::{
    expand_env_vars, expand_vars_with, CacheSettings, LoggingSettings, QuerySettings, Settings,
    SettingsError, WarehouseSettings, WorkerSettings,
};
