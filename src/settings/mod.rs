//! Key-value settings with per-key sanitizers.
//!
//! [`Settings`] wraps a storage [`Backend`] and runs the sanitizer registered for a
//! key on every write. A sanitizer may rewrite the value or reject it; rejected
//! writes leave the stored value untouched.

mod file;
mod memory;

pub use file::{DEFAULT_REFRESH_INTERVAL, FileBackend};
pub use memory::MemoryBackend;

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write settings to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings document {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Rejected(String),
}

/// Storage behind [`Settings`]. Implementations only move values in and out.
pub trait Backend: Send + Sync {
    /// # Errors
    /// Returns an error if the underlying storage cannot be read.
    fn load(&self, key: &str) -> Result<Option<Value>, SettingsError>;

    /// # Errors
    /// Returns an error if the underlying storage cannot be written.
    fn store(&self, key: &str, value: Value) -> Result<(), SettingsError>;
}

pub type Sanitizer = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

pub struct Settings {
    backend: Arc<dyn Backend>,
    sanitizers: RwLock<HashMap<String, Sanitizer>>,
}

impl Settings {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            sanitizers: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    /// Register the sanitizer invoked on every [`Settings::set`] for `key`.
    /// A later registration for the same key replaces the earlier one.
    pub fn register_sanitizer<F>(&self, key: &str, sanitizer: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.sanitizers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Arc::new(sanitizer));
    }

    /// Read `key`, returning `default` when it was never written.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    pub fn get(&self, key: &str, default: Value) -> Result<Value, SettingsError> {
        Ok(self.backend.load(key)?.unwrap_or(default))
    }

    /// Read `key` as a string. Scalars are stringified, `null` and missing keys
    /// yield `default`.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    pub fn get_str(&self, key: &str, default: &str) -> Result<String, SettingsError> {
        let value = match self.backend.load(key)? {
            Some(Value::String(value)) => value,
            Some(Value::Null) | None => default.to_string(),
            Some(other) => other.to_string(),
        };
        Ok(value)
    }

    /// # Errors
    /// Returns an error if the backend cannot be read.
    pub fn contains(&self, key: &str) -> Result<bool, SettingsError> {
        Ok(self.backend.load(key)?.is_some())
    }

    /// Sanitize and persist `value`, returning what was stored.
    ///
    /// # Errors
    /// Returns [`SettingsError::Rejected`] if the registered sanitizer refuses the
    /// value, or a backend error if it cannot be written.
    pub fn set(&self, key: &str, value: Value) -> Result<Value, SettingsError> {
        let sanitizer = self
            .sanitizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();

        let value = match sanitizer {
            Some(sanitize) => sanitize(value).map_err(SettingsError::Rejected)?,
            None => value,
        };

        self.backend.store(key, value.clone())?;
        Ok(value)
    }

    /// Write `value` only if `key` does not exist yet. Returns whether it was written.
    ///
    /// # Errors
    /// Same as [`Settings::set`].
    pub fn add(&self, key: &str, value: Value) -> Result<bool, SettingsError> {
        if self.contains(key)? {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self
            .sanitizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Settings")
            .field("sanitized_keys", &keys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_returns_default_for_missing_key() -> Result<(), SettingsError> {
        let settings = Settings::in_memory();
        assert_eq!(settings.get("missing", json!("fallback"))?, json!("fallback"));
        assert_eq!(settings.get_str("missing", "fallback")?, "fallback");
        Ok(())
    }

    #[test]
    fn get_str_stringifies_scalars() -> Result<(), SettingsError> {
        let settings = Settings::in_memory();
        settings.set("number", json!(42))?;
        settings.set("null", Value::Null)?;
        assert_eq!(settings.get_str("number", "")?, "42");
        assert_eq!(settings.get_str("null", "default")?, "default");
        Ok(())
    }

    #[test]
    fn sanitizer_rewrites_values() -> Result<(), SettingsError> {
        let settings = Settings::in_memory();
        settings.register_sanitizer("name", |value| {
            Ok(Value::String(
                value.as_str().unwrap_or_default().to_uppercase(),
            ))
        });

        let stored = settings.set("name", json!("quiet"))?;
        assert_eq!(stored, json!("QUIET"));
        assert_eq!(settings.get_str("name", "")?, "QUIET");
        Ok(())
    }

    #[test]
    fn rejected_value_keeps_previous() -> Result<(), SettingsError> {
        let settings = Settings::in_memory();
        settings.set("name", json!("first"))?;
        settings.register_sanitizer("name", |value| {
            if value == json!("") {
                Err("empty".to_string())
            } else {
                Ok(value)
            }
        });

        let result = settings.set("name", json!(""));
        assert!(matches!(result, Err(SettingsError::Rejected(ref msg)) if msg == "empty"));
        assert_eq!(settings.get_str("name", "")?, "first");
        Ok(())
    }

    #[test]
    fn add_does_not_overwrite() -> Result<(), SettingsError> {
        let settings = Settings::in_memory();
        assert!(settings.add("key", json!("one"))?);
        assert!(!settings.add("key", json!("two"))?);
        assert_eq!(settings.get_str("key", "")?, "one");
        Ok(())
    }
}
