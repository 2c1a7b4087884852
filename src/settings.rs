//! User settings persistence.
//!
//! Stores preferences in ~/.ironlens/settings.json (a `.toml` file works
//! too). Settings are loaded with env var > settings file > default priority.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::billing::{Entitlements, JsonLedgerStore, Tier};
use crate::cache::{CacheConfig, DEFAULT_MEMORY_CAPACITY, DEFAULT_TTL};
use crate::error::SettingsError;
use crate::routing::RouterConfig;

/// Env var overriding `account.tier`.
pub const ENV_TIER: &str = "IRONLENS_TIER";
/// Env var overriding `cache.dir`.
pub const ENV_CACHE_DIR: &str = "IRONLENS_CACHE_DIR";
/// Env var overriding `ledger.state_path`.
pub const ENV_LEDGER_PATH: &str = "IRONLENS_LEDGER_PATH";

/// User settings persisted to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub account: AccountSettings,

    /// Per-tier caps and flags.
    #[serde(default)]
    pub entitlements: Entitlements,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Timeout for providers that declare none.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Provider invocations per request.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            provider_timeout_secs: default_provider_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Entries held in the memory tier.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Age at which cached results expire.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Disk tier directory. Defaults to ~/.ironlens/cache.
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            ttl_secs: default_ttl_secs(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LedgerSettings {
    /// Ledger state file. Defaults to ~/.ironlens/ledger.json.
    #[serde(default)]
    pub state_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccountSettings {
    #[serde(default)]
    pub tier: Tier,
}

impl Settings {
    /// Get the default settings file path (~/.ironlens/settings.json).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ironlens")
            .join("settings.json")
    }

    /// Load from the default path and apply env overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = Self::load_from(&Self::default_path())?;
        settings.apply_env();
        Ok(settings)
    }

    /// Load settings from a specific path, returning defaults if the file
    /// does not exist.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(io_error(path, e)),
        };

        if is_toml(path) {
            toml::from_str(&data).map_err(|e| SettingsError::Serialization(e.to_string()))
        } else {
            serde_json::from_str(&data).map_err(|e| SettingsError::Serialization(e.to_string()))
        }
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let data = if is_toml(path) {
            toml::to_string_pretty(self).map_err(|e| SettingsError::Serialization(e.to_string()))?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::Serialization(e.to_string()))?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
        std::fs::write(path, data).map_err(|e| io_error(path, e))
    }

    /// Apply `IRONLENS_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(tier) = lookup(ENV_TIER) {
            match tier.parse::<Tier>() {
                Ok(tier) => self.account.tier = tier,
                Err(e) => tracing::warn!(var = ENV_TIER, error = %e, "Ignoring invalid override"),
            }
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache.dir = Some(dir);
        }
        if let Some(path) = lookup(ENV_LEDGER_PATH).filter(|v| !v.is_empty()) {
            self.ledger.state_path = Some(path);
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            provider_timeout: Duration::from_secs(self.router.provider_timeout_secs),
            max_attempts: (self.router.max_attempts as usize).max(1),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            dir: self
                .cache
                .dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(CacheConfig::default_dir),
            memory_capacity: self.cache.memory_capacity,
            ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.ledger
            .state_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(JsonLedgerStore::default_path)
    }

    /// Get a setting value by dotted path (e.g., "router.max_attempts").
    pub fn get(&self, path: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;

        for part in path.split('.') {
            current = current.get(part)?;
        }

        Some(display_value(current))
    }

    /// Set a setting value by dotted path. The new value is parsed as the
    /// type of the value it replaces.
    pub fn set(&mut self, path: &str, value: &str) -> Result<(), SettingsError> {
        let invalid = |message: String| SettingsError::InvalidValue {
            path: path.to_string(),
            message,
        };

        self.replace(path, |existing| {
            Ok(match existing {
                serde_json::Value::Bool(_) => {
                    let b = value
                        .parse::<bool>()
                        .map_err(|_| invalid(format!("expected boolean, got '{}'", value)))?;
                    serde_json::Value::Bool(b)
                }
                serde_json::Value::Number(_) => {
                    let n = value
                        .parse::<u64>()
                        .map_err(|_| invalid(format!("expected non-negative integer, got '{}'", value)))?;
                    serde_json::Value::Number(n.into())
                }
                serde_json::Value::Null => {
                    // Option<T>: accept JSON, fall back to a plain string
                    serde_json::from_str(value).unwrap_or(serde_json::Value::String(value.to_string()))
                }
                serde_json::Value::Object(_) | serde_json::Value::Array(_) => serde_json::from_str(value)
                    .map_err(|e| invalid(format!("invalid JSON: {}", e)))?,
                serde_json::Value::String(_) => serde_json::Value::String(value.to_string()),
            })
        })
    }

    /// Reset a setting to its default value.
    pub fn reset(&mut self, path: &str) -> Result<(), SettingsError> {
        let defaults = serde_json::to_value(Self::default())
            .map_err(|e| SettingsError::Serialization(e.to_string()))?;
        let mut default_value = &defaults;
        for part in path.split('.') {
            default_value = default_value
                .get(part)
                .ok_or_else(|| SettingsError::PathNotFound(path.to_string()))?;
        }
        let default_value = default_value.clone();

        self.replace(path, |_| Ok(default_value))
    }

    /// Swap the JSON value at `path` for the one `update` derives from it.
    fn replace<F>(&mut self, path: &str, update: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&serde_json::Value) -> Result<serde_json::Value, SettingsError>,
    {
        let mut json =
            serde_json::to_value(&self).map_err(|e| SettingsError::Serialization(e.to_string()))?;

        let parts: Vec<&str> = path.split('.').collect();
        let Some((final_key, parents)) = parts.split_last() else {
            return Err(SettingsError::PathNotFound(path.to_string()));
        };

        let mut current = &mut json;
        for part in parents {
            current = current
                .get_mut(*part)
                .ok_or_else(|| SettingsError::PathNotFound(path.to_string()))?;
        }

        let obj = current
            .as_object_mut()
            .ok_or_else(|| SettingsError::PathNotFound(path.to_string()))?;
        let existing = obj
            .get(*final_key)
            .ok_or_else(|| SettingsError::PathNotFound(path.to_string()))?;

        let new_value = update(existing)?;
        obj.insert((*final_key).to_string(), new_value);

        *self = serde_json::from_value(json).map_err(|e| SettingsError::InvalidValue {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// List all settings as (path, value) pairs, sorted by path.
    pub fn list(&self) -> Vec<(String, String)> {
        let json = match serde_json::to_value(self) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        let mut results = Vec::new();
        collect_settings(&json, String::new(), &mut results);
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
}

fn io_error(path: &Path, source: std::io::Error) -> SettingsError {
    SettingsError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Recursively collect settings paths and values.
fn collect_settings(value: &serde_json::Value, prefix: String, results: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                collect_settings(val, path, results);
            }
        }
        other => results.push((prefix, display_value(other))),
    }
}
