//! Core configuration.
//!
//! Loading flow:
//! 1. Start from [`CoreConfig::default()`].
//! 2. If the JSON file exists, read it; absent keys keep their defaults.
//! 3. Apply `RECORDKEEP_*` environment overrides.
//! 4. Validate.

use crate::calc::urgency::NearPolicy;
use crate::ledger::LockPolicy;
use crate::logging::{default_log_level, normalize_level};
use crate::model::sub_record::SubKind;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub const ENV_LOG_LEVEL: &str = "RECORDKEEP_LOG_LEVEL";
pub const ENV_DB_PATH: &str = "RECORDKEEP_DB_PATH";
pub const ENV_BLOB_ROOT: &str = "RECORDKEEP_BLOB_ROOT";

/// Configuration load/validation failure.
#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Json(serde_json::Error),
    /// A value parsed but is not usable.
    InvalidValue { key: &'static str, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config file: {err}"),
            Self::Json(err) => write!(f, "failed to parse config JSON: {err}"),
            Self::InvalidValue { key, message } => write!(f, "invalid config `{key}`: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Reminder queue settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReminderConfig {
    /// Whether entries due in two days count as pending.
    pub include_upcoming: bool,
}

/// Top-level core settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    pub log_level: String,
    /// Absolute directory for rolling log files; logging stays off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// SQLite database file; `None` means in-memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// Absolute root for uploaded files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_root: Option<PathBuf>,
    pub reminders: ReminderConfig,
    /// Extra fields editable after lock, per sub-record kind.
    pub lock_overrides: BTreeMap<SubKind, Vec<String>>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            log_dir: None,
            db_path: None,
            blob_root: None,
            reminders: ReminderConfig::default(),
            lock_overrides: BTreeMap::new(),
        }
    }
}

impl CoreConfig {
    /// Parses JSON text without env overrides or validation.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Applies `RECORDKEEP_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(level) = read(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(path) = read(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(root) = read(ENV_BLOB_ROOT) {
            self.blob_root = Some(PathBuf::from(root));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_level(&self.log_level).map_err(|err| ConfigError::InvalidValue {
            key: "logLevel",
            message: err.to_string(),
        })?;
        ensure_absolute("logDir", self.log_dir.as_deref())?;
        ensure_absolute("blobRoot", self.blob_root.as_deref())?;
        if let Some((kind, _)) = self
            .lock_overrides
            .iter()
            .find(|(_, fields)| fields.iter().any(|field| field.trim().is_empty()))
        {
            return Err(ConfigError::InvalidValue {
                key: "lockOverrides",
                message: format!("blank field name for `{kind}`"),
            });
        }
        Ok(())
    }

    /// Default lock overrides plus the configured extras.
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy::default().with_extra_overrides(&self.lock_overrides)
    }

    pub fn near_policy(&self) -> NearPolicy {
        NearPolicy {
            include_upcoming: self.reminders.include_upcoming,
        }
    }
}

/// Loads `path` (defaults when missing), applies process env overrides and
/// validates.
pub fn load_config(path: &Path) -> Result<CoreConfig, ConfigError> {
    load_config_with(path, |name| std::env::var(name).ok())
}

/// Same as [`load_config`] with an injectable env lookup.
pub fn load_config_with<F>(path: &Path, lookup: F) -> Result<CoreConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = if path.exists() {
        debug!("event=config_load module=config status=start source=file");
        CoreConfig::from_json_str(&std::fs::read_to_string(path)?)?
    } else {
        debug!("event=config_load module=config status=start source=defaults");
        CoreConfig::default()
    };
    config.apply_env_overrides(lookup);
    config.validate()?;
    Ok(config)
}

fn ensure_absolute(key: &'static str, path: Option<&Path>) -> Result<(), ConfigError> {
    match path {
        Some(path) if !path.is_absolute() => Err(ConfigError::InvalidValue {
            key,
            message: format!("must be an absolute path, got `{}`", path.display()),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{load_config_with, ConfigError, CoreConfig, ENV_DB_PATH, ENV_LOG_LEVEL};
    use crate::model::sub_record::SubKind;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = CoreConfig::from_json_str(r#"{"reminders":{"includeUpcoming":true}}"#).unwrap();
        assert!(config.reminders.include_upcoming);
        assert_eq!(config.log_level, CoreConfig::default().log_level);
        assert!(config.db_path.is_none());
        assert!(config.lock_overrides.is_empty());
    }

    #[test]
    fn lock_overrides_extend_default_policy() {
        let config =
            CoreConfig::from_json_str(r#"{"lockOverrides":{"payment":["paidAmount"]}}"#).unwrap();
        let policy = config.lock_policy();
        assert!(policy.editable_when_locked(SubKind::Payment, "paidAmount"));
        assert!(policy.editable_when_locked(SubKind::Payment, "reminderDate"));
        assert!(!policy.editable_when_locked(SubKind::Worker, "paidAmount"));
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recordkeep.json");
        std::fs::write(&path, r#"{"logLevel":"warn","dbPath":"/data/file.db"}"#).unwrap();

        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_LOG_LEVEL, "error"), (ENV_DB_PATH, "/data/env.db")]);
        let config =
            load_config_with(&path, |name| env.get(name).map(|value| value.to_string())).unwrap();
        assert_eq!(config.log_level, "error");
        assert_eq!(config.db_path, Some(PathBuf::from("/data/env.db")));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_with(&dir.path().join("absent.json"), |_| None).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn validation_rejects_bad_level_and_relative_dirs() {
        let config = CoreConfig::from_json_str(r#"{"logLevel":"loud"}"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "logLevel", .. })
        ));

        let config = CoreConfig::from_json_str(r#"{"blobRoot":"uploads"}"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "blobRoot", .. })
        ));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            CoreConfig::from_json_str("{"),
            Err(ConfigError::Json(_))
        ));
    }
}
