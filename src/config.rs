//! Repository configuration.
//!
//! A `Config` is a plain value handed to constructors. Sources, lowest
//! precedence first: built-in defaults, `<repository>/tagfs.json`, CLI flags.

use crate::error::{Result, TagError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const SETTINGS_FILE: &str = "tagfs.json";
pub const DEFAULT_DB_NAME: &str = "db.sqlite";

/// Which Metadata Index answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Derive everything from the on-disk link layout.
    #[default]
    Directory,
    /// Relational mirror in `db_name` at the repository root.
    Sql,
}

/// What to do when a display name matches several hashes in one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Lexicographically smallest hash wins.
    #[default]
    FirstByHash,
    /// Fail the lookup with `AmbiguousName`.
    Reject,
}

/// On-disk settings; every field optional so partial files work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub index: Option<IndexBackend>,
    pub db_name: Option<String>,
    pub ambiguity: Option<AmbiguityPolicy>,
    pub attr_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub repository: PathBuf,
    pub index: IndexBackend,
    pub db_name: String,
    pub ambiguity: AmbiguityPolicy,
    pub attr_ttl_secs: u64,
}

impl Config {
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
            index: IndexBackend::default(),
            db_name: DEFAULT_DB_NAME.to_string(),
            ambiguity: AmbiguityPolicy::default(),
            attr_ttl_secs: 1,
        }
    }

    /// Defaults overlaid with the repository's settings file, if any.
    pub fn load(repository: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::new(repository);
        let settings_path = config.settings_path();
        match std::fs::read_to_string(&settings_path) {
            Ok(raw) => {
                let settings: Settings = serde_json::from_str(&raw)
                    .map_err(|e| TagError::Config(format!("{}: {}", settings_path.display(), e)))?;
                config.apply(&settings);
                tracing::debug!("[Config] Loaded {}", settings_path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TagError::Io(e)),
        }
        Ok(config)
    }

    pub fn apply(&mut self, settings: &Settings) {
        if let Some(index) = settings.index {
            self.index = index;
        }
        if let Some(db_name) = &settings.db_name {
            self.db_name = db_name.clone();
        }
        if let Some(ambiguity) = settings.ambiguity {
            self.ambiguity = ambiguity;
        }
        if let Some(ttl) = settings.attr_ttl_secs {
            self.attr_ttl_secs = ttl;
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            index: Some(self.index),
            db_name: Some(self.db_name.clone()),
            ambiguity: Some(self.ambiguity),
            attr_ttl_secs: Some(self.attr_ttl_secs),
        }
    }

    /// Write the settings file unless one already exists.
    pub fn save_if_absent(&self) -> Result<bool> {
        let path = self.settings_path();
        if path.exists() {
            return Ok(false);
        }
        let raw = serde_json::to_string_pretty(&self.settings())
            .map_err(|e| TagError::Config(e.to_string()))?;
        std::fs::write(&path, raw)?;
        Ok(true)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.repository.join(SETTINGS_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.repository.join(&self.db_name)
    }

    pub fn default_repository() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("tagfs")
    }
}
