//! Store configuration.
//!
//! # Responsibility
//! - Describe where a store lives and how its connection behaves.
//! - Load and validate that description from JSON.
//!
//! # Invariants
//! - A validated config has a legal database name and positive cursor
//!   batch size and lifetime.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MAX_DATABASE_NAME_CHARS: usize = 64;

static FORBIDDEN_NAME_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/\\. "$*<>:|?]"#).expect("valid database name regex"));

/// Backing location of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLocation {
    File(PathBuf),
    /// Private to the opening process; gone when the store is dropped.
    Memory,
}

/// Configuration for opening a document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub location: StoreLocation,

    /// Logical database name, reported by the manager.
    pub database_name: String,

    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,

    /// Documents fetched per cursor round trip.
    pub cursor_batch_size: usize,

    /// Idle time after which a server-side cursor is evicted.
    pub cursor_lifetime_ms: u64,

    /// Create the default collections and version document on open.
    pub init_on_open: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::Memory,
            database_name: "rxnet".to_string(),
            busy_timeout_ms: 5_000,
            cursor_batch_size: 100,
            cursor_lifetime_ms: 600_000,
            init_on_open: false,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            ..Self::default()
        }
    }

    /// Parses a JSON config; absent keys take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(input).map_err(|err| format!("invalid store config: {err}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_database_name(&self.database_name)?;

        if self.cursor_batch_size == 0 {
            return Err("cursor_batch_size must be greater than 0".to_string());
        }

        if self.cursor_lifetime_ms == 0 {
            return Err("cursor_lifetime_ms must be greater than 0".to_string());
        }

        if let StoreLocation::File(path) = &self.location {
            if path.as_os_str().is_empty() {
                return Err("file location cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

/// Checks a database name: non-empty, at most 64 characters, none of
/// `/ \ . " $ * < > : | ?` or space.
pub fn validate_database_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("database_name cannot be empty".to_string());
    }
    if name.chars().count() > MAX_DATABASE_NAME_CHARS {
        return Err(format!(
            "database_name cannot exceed {MAX_DATABASE_NAME_CHARS} characters"
        ));
    }
    if let Some(found) = FORBIDDEN_NAME_CHARS_RE.find(name) {
        return Err(format!(
            "database_name contains forbidden character `{}`",
            found.as_str()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_database_name, StoreConfig, StoreLocation};
    use std::path::PathBuf;

    #[test]
    fn defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.location, StoreLocation::Memory);
        assert_eq!(config.cursor_batch_size, 100);
    }

    #[test]
    fn json_fills_missing_keys_with_defaults() {
        let config = StoreConfig::from_json_str(
            r#"{ "location": { "file": "/tmp/rxnet.db" }, "database_name": "chem_1" }"#,
        )
        .unwrap();
        assert_eq!(config.location, StoreLocation::File(PathBuf::from("/tmp/rxnet.db")));
        assert_eq!(config.busy_timeout_ms, 5_000);
        assert!(!config.init_on_open);
    }

    #[test]
    fn json_rejects_invalid_values() {
        let err = StoreConfig::from_json_str(r#"{ "cursor_batch_size": 0 }"#).unwrap_err();
        assert!(err.contains("cursor_batch_size"));
        assert!(StoreConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn database_names_follow_naming_rules() {
        assert!(validate_database_name("exploration_2024").is_ok());
        assert!(validate_database_name("").is_err());
        assert!(validate_database_name(&"x".repeat(65)).is_err());
        for bad in ["a/b", "a.b", "a b", "a$b", "a\"b", "a:b", "a?b", "a\\b"] {
            assert!(validate_database_name(bad).is_err(), "{bad} should be rejected");
        }
    }
}
