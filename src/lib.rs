//! tagfs: a tag-query filesystem over a content-addressed repository
//!
//! Files are stored once per content hash and hardlinked under every tag
//! they carry. Mounting the repository turns each path of tags into an
//! AND query:
//! - Content Store (hash-sharded link layout on the backing filesystem)
//! - Metadata Index (directory-derived, or a SQLite mirror)
//! - Tag Drive (FUSE adapter, read-only)

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod state;
pub mod storage;
pub mod tag_drive;

pub use config::{AmbiguityPolicy, Config, IndexBackend};
pub use engine::{QueryEngine, TagOutcome, Tagger};
pub use error::{Result, TagError};
pub use state::{SharedState, TagState};
pub use storage::{ContentStore, DirectoryIndex, FileEntry, MetadataIndex, SqlIndex};
pub use tag_drive::TagDrive;
