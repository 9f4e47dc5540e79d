use std::env;
use std::path::PathBuf;

use thiserror::Error;

pub const ENV_DB: &str = "COMPANION_DB";
pub const ENV_LOG: &str = "COMPANION_LOG";
pub const ENV_LOG_DIR: &str = "COMPANION_LOG_DIR";
pub const ENV_APPDATA: &str = "COMPANION_APPDATA";

pub const APP_IDENTIFIER: &str = "org.aacompanion.companion";
pub const DB_FILE_NAME: &str = "companion.sqlite3";
pub const DEFAULT_LOG_FILTER: &str = "companion=info,sqlx=warn";
pub const DEFAULT_LOG_MAX_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_LOG_MAX_FILES: usize = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no data directory available; pass --db or set COMPANION_DB")]
    NoDataDir,
    #[error("{var} is set but empty")]
    EmptyVar { var: &'static str },
}

/// Where the file sink writes and how much it keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub dir: Option<PathBuf>,
    pub max_bytes: usize,
    pub max_files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub log: LogConfig,
}

/// Values supplied on the command line. Anything left `None` falls back to
/// the environment and then to defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(overrides, |key| env::var(key).ok())
    }

    /// Same as [`AppConfig::resolve`] with an injectable environment lookup.
    pub fn resolve_with<F>(overrides: ConfigOverrides, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &'static str| -> Result<Option<String>, ConfigError> {
            match lookup(key) {
                Some(value) if value.trim().is_empty() => Err(ConfigError::EmptyVar { var: key }),
                other => Ok(other),
            }
        };

        let app_dir = match var(ENV_APPDATA)? {
            Some(dir) => Some(PathBuf::from(dir)),
            None => dirs::data_dir().map(|base| base.join(APP_IDENTIFIER)),
        };

        let db_path = match overrides.db_path {
            Some(path) => path,
            None => match var(ENV_DB)? {
                Some(path) => PathBuf::from(path),
                None => app_dir
                    .as_ref()
                    .map(|dir| dir.join(DB_FILE_NAME))
                    .ok_or(ConfigError::NoDataDir)?,
            },
        };

        let filter = match overrides.log_filter {
            Some(filter) => filter,
            None => var(ENV_LOG)?.unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        };

        let log_dir = match overrides.log_dir {
            Some(dir) => Some(dir),
            None => var(ENV_LOG_DIR)?.map(PathBuf::from),
        };

        Ok(AppConfig {
            db_path,
            log: LogConfig {
                filter,
                dir: log_dir,
                max_bytes: DEFAULT_LOG_MAX_BYTES,
                max_files: DEFAULT_LOG_MAX_FILES,
            },
        })
    }
}
