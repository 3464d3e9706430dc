// FILE: src/state.rs

use crate::config::{Config, IndexBackend};
use crate::engine::{QueryEngine, Tagger};
use crate::error::{Result, TagError};
use crate::storage::{connection, ContentStore, DirectoryIndex, MetadataIndex, SqlIndex};
use std::sync::Arc;

/// Everything one repository needs, built from a `Config` value.
///
/// Nothing here is process-global: two `TagState`s for two repositories
/// can be served side by side.
pub struct TagState {
    pub config: Config,
    pub store: Arc<ContentStore>,
    pub index: Arc<dyn MetadataIndex>,
    pub engine: QueryEngine,
}

/// Shared state wrapper for easy cloning and sharing
pub type SharedState = Arc<TagState>;

impl TagState {
    /// Open an existing repository.
    pub fn open(mut config: Config) -> Result<SharedState> {
        // Resolve symlinks once; the mount root must be the real directory
        config.repository = match std::fs::canonicalize(&config.repository) {
            Ok(path) if path.is_dir() => path,
            Ok(_) => {
                return Err(TagError::NotFound(format!("repository {} is not a directory", config.repository.display())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TagError::NotFound(format!(
                    "repository {} (run `tagfs init` first)",
                    config.repository.display()
                )));
            }
            Err(e) => return Err(TagError::Io(e)),
        };
        let store = Arc::new(ContentStore::new(config.repository.clone()));

        let index: Arc<dyn MetadataIndex> = match config.index {
            IndexBackend::Directory => Arc::new(DirectoryIndex::new(Arc::clone(&store))),
            IndexBackend::Sql => Arc::new(SqlIndex::open(&config.db_path())?),
        };
        tracing::info!(
            "[TagState] Repository {} ({} index)",
            store.repository().display(),
            index.backend_name()
        );

        let engine = QueryEngine::new(Arc::clone(&store), Arc::clone(&index), config.ambiguity);
        Ok(Arc::new(Self { config, store, index, engine }))
    }

    /// Bootstrap a repository (idempotent), then open it.
    pub fn init(config: Config) -> Result<SharedState> {
        let store = ContentStore::new(config.repository.clone());
        store.bootstrap()?;
        if config.save_if_absent()? {
            tracing::info!("[TagState] Wrote {}", config.settings_path().display());
        }
        if config.index == IndexBackend::Sql {
            drop(connection::open_connection(&config.db_path())?);
        }
        Self::open(config)
    }

    pub fn tagger(&self) -> Tagger {
        Tagger::new(Arc::clone(&self.store), Arc::clone(&self.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_requires_repository() {
        let dir = TempDir::new().unwrap();
        let err = TagState::open(Config::new(dir.path().join("missing"))).err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_open_resolves_symlinked_repository() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real");
        TagState::init(Config::new(&real)).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let state = TagState::open(Config::new(&link)).unwrap();
        assert_eq!(state.store.repository(), std::fs::canonicalize(&real).unwrap());
        assert_eq!(state.config.repository, state.store.repository());
    }

    #[test]
    fn test_init_is_idempotent_for_both_backends() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path().join("repo"));
        TagState::init(config.clone()).unwrap();
        TagState::init(config.clone()).unwrap();
        assert!(dir.path().join("repo/.names").is_dir());

        config.repository = dir.path().join("repo-sql");
        config.index = IndexBackend::Sql;
        let state = TagState::init(config).unwrap();
        assert_eq!(state.index.backend_name(), "sql");
        assert!(state.config.db_path().exists());
        // The database file is never mistaken for a tag
        assert!(state.engine.extendable_tags::<&str>(&[]).unwrap().is_empty());
    }
}
