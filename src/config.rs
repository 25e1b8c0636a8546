use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = ".get_analytics_log.config.json";
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub s3: S3Config,
}

/// Credentials and location of the bucket holding the logs.
///
/// `access_key`, `secret_key` and `bucket` are the fields existing config
/// files carry; the rest are optional.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct S3Config {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config path directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("config file does not exist: {0}")]
    Missing(PathBuf),
    #[error("config is not regular file: {0}")]
    NotAFile(PathBuf),
    #[error("config file is empty: {0}")]
    Empty(PathBuf),
    #[error("can't read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("can't parse config file {0}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),
}

/// `~/.get_analytics_log.config.json`, or the bare file name when there is no home directory
pub fn default_config_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(DEFAULT_CONFIG_FILE),
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    // a bare file name has an empty parent, which means the working directory
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if !dir.exists() {
            return Err(ConfigError::MissingDirectory(dir.to_path_buf()));
        }
    }
    if !path.exists() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }

    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    if !metadata.is_file() {
        return Err(ConfigError::NotAFile(path.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(ConfigError::Empty(path.to_path_buf()));
    }

    let content = std::fs::read(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let config: Config =
        serde_json::from_slice(&content).map_err(|e| ConfigError::Json(path.to_path_buf(), e))?;

    log::debug!("loaded config from {} (bucket {})", path.display(), config.s3.bucket);
    Ok(config)
}
