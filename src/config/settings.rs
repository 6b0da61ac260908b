//! TOML-based configuration.
//!
//! Read from a config file (bqmeta.toml) with environment variable expansion
//! in path values, then overridden by the deployment environment variables.
//!
//! Example configuration:
//! ```toml
//! [warehouse]
//! project_ids = ["analytics-prod", "billing-prod"]
//! dataset_filters = ["analytics-prod.*", "billing-prod.invoices"]
//! credentials_path = "${HOME}/.config/gcloud/sa.json"
//! query_project_id = "analytics-prod"
//!
//! [cache]
//! ttl_seconds = 3600
//! base_dir = ".bq_metadata_cache"
//! fetch_concurrency = 8
//!
//! [query]
//! max_scan_bytes = 1073741824
//! default_limit = 10
//! timeout_seconds = 300
//! export_root = "./exports"
//!
//! [worker]
//! path = "./bqmeta-worker"
//! request_timeout_seconds = 60
//!
//! [logging]
//! format = "pretty"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::filter::{parse_filters, DatasetFilter};
use crate::observability::LogFormat;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnvValue { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    pub warehouse: WarehouseSettings,
    pub cache: CacheSettings,
    pub query: QuerySettings,
    pub worker: WorkerSettings,
    pub logging: LoggingSettings,
}

/// Which projects and datasets to serve.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WarehouseSettings {
    /// Projects to cache, in display order. Required.
    pub project_ids: Vec<String>,

    /// `project.*` or `project.dataset`. Empty means everything.
    pub dataset_filters: Vec<String>,

    /// Service account key file; ambient credentials when unset.
    pub credentials_path: Option<String>,

    /// Project billed for queries when the caller names none.
    pub query_project_id: Option<String>,
}

/// Metadata cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_seconds: u64,

    /// Directory holding the envelope file (supports ${ENV_VAR} expansion).
    pub base_dir: String,

    /// Parallel listing/schema calls per refresh.
    pub fetch_concurrency: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            base_dir: ".bq_metadata_cache".to_string(),
            fetch_concurrency: 8,
        }
    }
}

/// Query guard rails.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuerySettings {
    pub max_scan_bytes: u64,
    pub default_limit: u64,
    pub timeout_seconds: u64,

    /// Exports must resolve inside this directory.
    pub export_root: String,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_scan_bytes: 1024 * 1024 * 1024,
            default_limit: 10,
            timeout_seconds: 300,
            export_root: "./exports".to_string(),
        }
    }
}

/// Worker process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to worker binary; searched for when unset.
    pub path: Option<String>,

    /// Deadline for metadata calls. Query execution uses `query.timeout_seconds`.
    pub request_timeout_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `BQMETA_CONFIG`
    /// 2. `./bqmeta.toml`
    /// 3. `~/.config/bqmeta/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("BQMETA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("bqmeta.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("bqmeta").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// File (explicit path or default search), then process environment,
    /// then validation.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::load()?,
        };
        settings.apply_env_overrides(|name| env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply deployment environment overrides.
    ///
    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PROJECT_IDS") {
            self.warehouse.project_ids = split_list(&v);
        }
        if let Some(v) = get("DATASET_FILTERS") {
            self.warehouse.dataset_filters = split_list(&v);
        }
        if let Some(v) = get("GCP_SERVICE_ACCOUNT_KEY_PATH") {
            self.warehouse.credentials_path = Some(v);
        }
        if let Some(v) = get("QUERY_EXECUTION_PROJECT_ID") {
            self.warehouse.query_project_id = Some(v.trim().to_string());
        }
        if let Some(v) = get("CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = parse_number("CACHE_TTL_SECONDS", &v)?;
        }
        if let Some(v) = get("CACHE_FILE_BASE_DIR") {
            self.cache.base_dir = v;
        }
        if let Some(v) = get("MAX_SCAN_BYTES") {
            self.query.max_scan_bytes = parse_number("MAX_SCAN_BYTES", &v)?;
        }
        if let Some(v) = get("DEFAULT_QUERY_LIMIT") {
            self.query.default_limit = parse_number("DEFAULT_QUERY_LIMIT", &v)?;
        }
        if let Some(v) = get("QUERY_TIMEOUT_SECONDS") {
            self.query.timeout_seconds = parse_number("QUERY_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = get("EXPORT_ROOT") {
            self.query.export_root = v;
        }
        Ok(())
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.warehouse.project_ids.iter().all(|p| p.trim().is_empty()) {
            return Err(SettingsError::InvalidConfig(
                "at least one project id is required (warehouse.project_ids or PROJECT_IDS)"
                    .to_string(),
            ));
        }
        if self.query.default_limit == 0 {
            return Err(SettingsError::InvalidConfig(
                "query.default_limit must be greater than zero".to_string(),
            ));
        }
        if self.query.timeout_seconds == 0 {
            return Err(SettingsError::InvalidConfig(
                "query.timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.cache.fetch_concurrency == 0 {
            return Err(SettingsError::InvalidConfig(
                "cache.fetch_concurrency must be greater than zero".to_string(),
            ));
        }
        self.dataset_filters()?;
        Ok(())
    }

    /// Parsed dataset filters.
    pub fn dataset_filters(&self) -> Result<Vec<DatasetFilter>, SettingsError> {
        parse_filters(&self.warehouse.dataset_filters)
    }

    /// Configured projects, trimmed, blanks dropped.
    pub fn project_ids(&self) -> Vec<String> {
        self.warehouse
            .project_ids
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Project used to run a query: explicit, then configured query
    /// project, then the first configured project.
    pub fn query_project_id(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .or_else(|| self.warehouse.query_project_id.clone())
            .or_else(|| self.project_ids().into_iter().next())
    }

    /// Credential file with environment variables expanded.
    pub fn credentials_path(&self) -> Option<PathBuf> {
        let path = self.warehouse.credentials_path.as_ref()?;
        expand_env_vars(path).ok().map(PathBuf::from)
    }

    /// Cache directory with environment variables expanded.
    pub fn cache_dir(&self) -> Result<PathBuf, SettingsError> {
        expand_env_vars(&self.cache.base_dir).map(PathBuf::from)
    }

    /// Export root with environment variables expanded.
    pub fn export_root(&self) -> Result<PathBuf, SettingsError> {
        expand_env_vars(&self.query.export_root).map(PathBuf::from)
    }

    /// Configured worker binary, if any.
    pub fn worker_path(&self) -> Option<PathBuf> {
        let path = self.worker.path.as_ref()?;
        expand_env_vars(path).ok().map(PathBuf::from)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidEnvValue {
            name: name.to_string(),
            value: value.to_string(),
        })
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    expand_vars_with(s, |name| env::var(name).ok())
}

/// [`expand_env_vars`] against an arbitrary lookup.
pub fn expand_vars_with<F>(s: &str, lookup: F) -> Result<String, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let resolve = |name: &str| lookup(name).ok_or_else(|| SettingsError::MissingEnvVar(name.to_string()));

    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
            result.push_str(&resolve(&var_name)?);
        } else {
            let mut var_name = String::new();
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                var_name.push(ch);
                chars.next();
            }
            if var_name.is_empty() {
                // Lone `$`.
                result.push('$');
            } else {
                result.push_str(&resolve(&var_name)?);
            }
        }
    }

    Ok(result)
}
