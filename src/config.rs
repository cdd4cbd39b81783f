use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use thiserror::Error;

use crate::app::SyncSettings;
use crate::core::finance::FinanceAccount;
use crate::core::models::UserId;
use crate::core::service::ServiceSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{var}={value:?} is not valid")]
    InvalidEnv { var: &'static str, value: String },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub media_base_url: String,
    /// Key for anti-forgery tokens.
    pub token_secret: String,
    pub finance: FinanceAccount,
    pub service: ServiceSettings,
    pub sync: SyncSettings,
    /// Who the terminal client acts as.
    pub viewer: Option<UserId>,
    pub as_finance: bool,
}

/// On-disk representation. Every field is optional; missing ones fall back
/// to the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub db_path: Option<PathBuf>,
    pub media_dir: Option<PathBuf>,
    pub media_base_url: Option<String>,
    pub token_secret: Option<String>,
    pub finance_login: Option<String>,
    pub finance_email: Option<String>,
    pub finance_display_name: Option<String>,
    pub message_window: Option<u32>,
    pub upload_timeout_secs: Option<u64>,
    pub max_attachment_bytes: Option<u64>,
    pub max_text_chars: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub search_debounce_ms: Option<u64>,
    pub scroll_threshold_px: Option<f32>,
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join("deskchat")
}

fn config_path() -> PathBuf {
    app_dir(dirs::config_dir()).join("config.json")
}

impl FileConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(cfg))
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let data = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, data).map_err(write_err)
    }
}

fn env_parse<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match env(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}

fn env_flag(env: &impl Fn(&str) -> Option<String>, var: &str) -> bool {
    env(var).map(|v| v == "true" || v == "1").unwrap_or(false)
}

impl Config {
    /// Resolution order: env vars → config file → defaults.
    pub fn resolve() -> Result<Self, ConfigError> {
        let file = match FileConfig::load() {
            Ok(Some(fc)) => {
                log::info!("Config loaded from {}", config_path().display());
                fc
            }
            Ok(None) => {
                log::info!("No config file found, using defaults");
                FileConfig::default()
            }
            Err(e) => return Err(e),
        };
        Self::from_sources(file, |var| std::env::var(var).ok())
    }

    /// Merge a file config with an environment lookup.
    pub fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = app_dir(dirs::data_dir());
        let service_defaults = ServiceSettings::default();
        let sync_defaults = SyncSettings::default();

        let token_secret = match env("DESKCHAT_TOKEN_SECRET").or(file.token_secret) {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                log::warn!("No token secret configured, tokens will not survive a restart");
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(48)
                    .map(char::from)
                    .collect()
            }
        };

        let service = ServiceSettings {
            message_window: env_parse(&env, "DESKCHAT_MESSAGE_WINDOW")?
                .or(file.message_window)
                .unwrap_or(service_defaults.message_window),
            upload_timeout: env_parse(&env, "DESKCHAT_UPLOAD_TIMEOUT_SECS")?
                .or(file.upload_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(service_defaults.upload_timeout),
            max_attachment_bytes: env_parse(&env, "DESKCHAT_MAX_ATTACHMENT_BYTES")?
                .or(file.max_attachment_bytes)
                .unwrap_or(service_defaults.max_attachment_bytes),
            max_text_chars: env_parse(&env, "DESKCHAT_MAX_TEXT_CHARS")?
                .or(file.max_text_chars)
                .unwrap_or(service_defaults.max_text_chars),
        };

        let poll_interval_secs = match env_parse::<u64>(&env, "DESKCHAT_POLL_INTERVAL_SECS")? {
            Some(0) => {
                return Err(ConfigError::InvalidEnv {
                    var: "DESKCHAT_POLL_INTERVAL_SECS",
                    value: "0".into(),
                })
            }
            Some(secs) => Some(secs),
            None if file.poll_interval_secs == Some(0) => {
                return Err(ConfigError::Zero {
                    field: "poll_interval_secs",
                })
            }
            None => file.poll_interval_secs,
        };

        let sync = SyncSettings {
            poll_interval: poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(sync_defaults.poll_interval),
            search_debounce: env_parse(&env, "DESKCHAT_SEARCH_DEBOUNCE_MS")?
                .or(file.search_debounce_ms)
                .map(Duration::from_millis)
                .unwrap_or(sync_defaults.search_debounce),
            scroll_threshold: env_parse(&env, "DESKCHAT_SCROLL_THRESHOLD_PX")?
                .or(file.scroll_threshold_px)
                .unwrap_or(sync_defaults.scroll_threshold),
        };

        Ok(Config {
            db_path: env("DESKCHAT_DB")
                .map(PathBuf::from)
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("deskchat.db")),
            media_dir: env("DESKCHAT_MEDIA_DIR")
                .map(PathBuf::from)
                .or(file.media_dir)
                .unwrap_or_else(|| data_dir.join("media")),
            media_base_url: env("DESKCHAT_MEDIA_URL")
                .or(file.media_base_url)
                .unwrap_or_else(|| "http://localhost/media/".into()),
            token_secret,
            finance: FinanceAccount {
                login: env("DESKCHAT_FINANCE_LOGIN")
                    .or(file.finance_login)
                    .unwrap_or_else(|| "finance".into()),
                email: env("DESKCHAT_FINANCE_EMAIL")
                    .or(file.finance_email)
                    .unwrap_or_else(|| "finance@localhost".into()),
                display_name: env("DESKCHAT_FINANCE_NAME")
                    .or(file.finance_display_name)
                    .unwrap_or_else(|| "Finance".into()),
            },
            service,
            sync,
            viewer: env_parse(&env, "DESKCHAT_USER_ID")?,
            as_finance: env_flag(&env, "DESKCHAT_AS_FINANCE"),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_sources(FileConfig::default(), env_of(&[])).unwrap();

        assert_eq!(config.service, ServiceSettings::default());
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(config.finance.login, "finance");
        assert!(config.db_path.ends_with("deskchat/deskchat.db"));
        assert_eq!(config.token_secret.len(), 48);
        assert_eq!(config.viewer, None);
        assert!(!config.as_finance);
    }

    #[test]
    fn env_overrides_file() {
        let file = FileConfig {
            finance_login: Some("desk".into()),
            poll_interval_secs: Some(30),
            message_window: Some(20),
            ..FileConfig::default()
        };
        let env = env_of(&[
            ("DESKCHAT_POLL_INTERVAL_SECS", "5"),
            ("DESKCHAT_USER_ID", "42"),
            ("DESKCHAT_AS_FINANCE", "1"),
        ]);
        let config = Config::from_sources(file, env).unwrap();

        assert_eq!(config.sync.poll_interval, Duration::from_secs(5));
        assert_eq!(config.service.message_window, 20);
        assert_eq!(config.finance.login, "desk");
        assert_eq!(config.viewer, Some(42));
        assert!(config.as_finance);
    }

    #[test]
    fn malformed_env_is_an_error() {
        let err = Config::from_sources(
            FileConfig::default(),
            env_of(&[("DESKCHAT_USER_ID", "nobody")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "DESKCHAT_USER_ID",
                ..
            }
        ));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = Config::from_sources(
            FileConfig::default(),
            env_of(&[("DESKCHAT_POLL_INTERVAL_SECS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                var: "DESKCHAT_POLL_INTERVAL_SECS",
                ..
            }
        ));

        let file = FileConfig {
            poll_interval_secs: Some(0),
            ..FileConfig::default()
        };
        let err = Config::from_sources(file.clone(), env_of(&[])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Zero {
                field: "poll_interval_secs"
            }
        ));

        // A valid env value still wins over the file.
        let config =
            Config::from_sources(file, env_of(&[("DESKCHAT_POLL_INTERVAL_SECS", "15")])).unwrap();
        assert_eq!(config.sync.poll_interval, Duration::from_secs(15));
    }

    #[test]
    fn file_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let file = FileConfig {
            token_secret: Some("abc".into()),
            scroll_threshold_px: Some(120.0),
            ..FileConfig::default()
        };

        assert_eq!(FileConfig::load_from(&path).unwrap(), None);
        file.save_to(&path).unwrap();
        assert_eq!(FileConfig::load_from(&path).unwrap(), Some(file));
    }
}
