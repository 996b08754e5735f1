//! Runtime configuration.
//!
//! # Responsibility
//! - Provide defaults for storage, paging, pool sizing and logging.
//! - Resolve overrides from `CRUDIFY_*` environment variables.
//!
//! # Invariants
//! - Blank values fall back to defaults.
//! - Unparsable or out-of-range numbers are rejected, never clamped.

use crate::logging::default_log_level;
use crate::query::DEFAULT_PAGE_SIZE;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "CRUDIFY_DB_PATH";
pub const ENV_PAGE_SIZE: &str = "CRUDIFY_PAGE_SIZE";
pub const ENV_POOL_SIZE: &str = "CRUDIFY_POOL_SIZE";
pub const ENV_LOG_LEVEL: &str = "CRUDIFY_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "CRUDIFY_LOG_DIR";
pub const ENV_LOG_MAX_FILE_MB: &str = "CRUDIFY_LOG_MAX_FILE_MB";
pub const ENV_LOG_KEEP_FILES: &str = "CRUDIFY_LOG_KEEP_FILES";

const DEFAULT_POOL_SIZE: usize = 2;
const MAX_POOL_SIZE: usize = 64;
const DEFAULT_LOG_MAX_FILE_MB: u64 = 10;
const DEFAULT_LOG_KEEP_FILES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidNumber { key: &'static str, value: String },
    OutOfRange {
        key: &'static str,
        value: String,
        min: i64,
        max: i64,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNumber { key, value } => {
                write!(f, "{key} must be a number, got `{value}`")
            }
            Self::OutOfRange {
                key,
                value,
                min,
                max,
            } => write!(f, "{key} must be within {min}..={max}, got `{value}`"),
        }
    }
}

impl Error for ConfigError {}

/// Settings of one service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrudConfig {
    /// Database file; `None` selects an isolated in-memory database.
    pub db_path: Option<PathBuf>,
    pub default_page_size: i64,
    /// Worker threads per operation pool.
    pub pool_size: usize,
    pub log_level: String,
    /// Absolute log directory; `None` leaves logging uninitialized.
    pub log_dir: Option<PathBuf>,
    /// Size at which the active log file is rotated.
    pub log_max_file_mb: u64,
    /// Rotated log files kept on disk.
    pub log_keep_files: usize,
}

impl Default for CrudConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            log_level: default_log_level().to_string(),
            log_dir: None,
            log_max_file_mb: DEFAULT_LOG_MAX_FILE_MB,
            log_keep_files: DEFAULT_LOG_KEEP_FILES,
        }
    }
}

impl CrudConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`; missing or blank keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(path) = read(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = read(ENV_PAGE_SIZE) {
            config.default_page_size = parse_in_range(ENV_PAGE_SIZE, &raw, 1, 10_000)?;
        }
        if let Some(raw) = read(ENV_POOL_SIZE) {
            let size = parse_in_range(ENV_POOL_SIZE, &raw, 1, MAX_POOL_SIZE as i64)?;
            config.pool_size = size as usize;
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        if let Some(dir) = read(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = read(ENV_LOG_MAX_FILE_MB) {
            config.log_max_file_mb = parse_in_range(ENV_LOG_MAX_FILE_MB, &raw, 1, 1024)? as u64;
        }
        if let Some(raw) = read(ENV_LOG_KEEP_FILES) {
            config.log_keep_files = parse_in_range(ENV_LOG_KEEP_FILES, &raw, 1, 100)? as usize;
        }
        Ok(config)
    }
}

fn parse_in_range(key: &'static str, raw: &str, min: i64, max: i64) -> Result<i64, ConfigError> {
    let value = raw.parse::<i64>().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })?;
    if !(min..=max).contains(&value) {
        return Err(ConfigError::OutOfRange {
            key,
            value: raw.to_string(),
            min,
            max,
        });
    }
    Ok(value)
}
