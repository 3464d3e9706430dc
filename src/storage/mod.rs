// FILE: src/storage/mod.rs
pub mod connection;
pub mod content_store;
pub mod dir_index;
pub mod index;
pub mod sql_index;

// Common exports
pub use content_store::{ContentStore, Link, Placement};
pub use dir_index::DirectoryIndex;
pub use index::{FileEntry, MetadataIndex};
pub use sql_index::SqlIndex;
