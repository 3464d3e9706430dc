//! The Metadata Index capability.
//!
//! Two implementations answer the same point queries over (file, tag)
//! associations: [`DirectoryIndex`](super::dir_index::DirectoryIndex) reads
//! the Content Store layout, [`SqlIndex`](super::sql_index::SqlIndex) keeps a
//! relational mirror. For the same state they must return the same sets.

use crate::error::Result;
use std::collections::BTreeSet;

/// A file as seen through a query: display name plus content hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileEntry {
    pub display_name: String,
    pub hash: String,
}

impl FileEntry {
    pub fn new(display_name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self { display_name: display_name.into(), hash: hash.into() }
    }
}

pub trait MetadataIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn tag_exists(&self, name: &str) -> Result<bool>;
    fn ensure_tag(&self, name: &str) -> Result<()>;
    fn all_tags(&self) -> Result<BTreeSet<String>>;

    fn file_exists(&self, hash: &str) -> Result<bool>;
    fn ensure_file(&self, display_name: &str, hash: &str) -> Result<()>;

    fn is_tagged(&self, hash: &str, tag: &str) -> Result<bool>;
    /// Associate `hash` (under `display_name`) with `tag`. No-op if present.
    fn add_tag(&self, hash: &str, display_name: &str, tag: &str) -> Result<()>;

    /// Files whose tag set contains every tag in `tags`.
    ///
    /// Empty input matches nothing. Callers pass de-duplicated tags; the
    /// first tag decides which display names are reported.
    fn files_with_all(&self, tags: &[String]) -> Result<BTreeSet<FileEntry>>;

    /// Record one tagging: file, tag and association together.
    fn record(&self, display_name: &str, hash: &str, tag: &str) -> Result<()> {
        self.ensure_file(display_name, hash)?;
        self.ensure_tag(tag)?;
        self.add_tag(hash, display_name, tag)
    }
}

/// Drop repeated tags, keeping first occurrences in order.
pub fn dedup_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.iter()
        .map(|t| t.as_ref())
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect()
}
