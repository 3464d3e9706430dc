//! Query Engine: an ordered list of tags read as an AND filter.
//!
//! Pure reads. Every call goes back to the index, so a tagging that
//! finished before the call started is always visible.

use crate::config::AmbiguityPolicy;
use crate::core::bouncer::Bouncer;
use crate::core::hashing;
use crate::error::{Result, TagError};
use crate::storage::index::dedup_tags;
use crate::storage::{ContentStore, FileEntry, MetadataIndex};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<ContentStore>,
    index: Arc<dyn MetadataIndex>,
    ambiguity: AmbiguityPolicy,
}

impl QueryEngine {
    pub fn new(store: Arc<ContentStore>, index: Arc<dyn MetadataIndex>, ambiguity: AmbiguityPolicy) -> Self {
        Self { store, index, ambiguity }
    }

    pub fn index(&self) -> &Arc<dyn MetadataIndex> {
        &self.index
    }

    pub fn is_tag(&self, name: &str) -> Result<bool> {
        if Bouncer::check_tag(name).is_err() {
            return Ok(false);
        }
        self.index.tag_exists(name)
    }

    /// Files carrying every tag in `path_tags`. An empty query matches nothing.
    ///
    /// A name that could never be a tag (`..`, `/etc`, ...) is not one, so a
    /// query containing it matches nothing either.
    pub fn matching_files<S: AsRef<str>>(&self, path_tags: &[S]) -> Result<BTreeSet<FileEntry>> {
        let tags = dedup_tags(path_tags);
        if tags.is_empty() {
            return Ok(BTreeSet::new());
        }
        if let Some(bad) = tags.iter().find(|t| Bouncer::check_tag(t).is_err()) {
            tracing::debug!("[QueryEngine] '{}' is not a tag name", bad);
            return Ok(BTreeSet::new());
        }
        self.index.files_with_all(&tags)
    }

    /// Every known tag not already in `path_tags`.
    pub fn extendable_tags<S: AsRef<str>>(&self, path_tags: &[S]) -> Result<BTreeSet<String>> {
        let used: HashSet<&str> = path_tags.iter().map(|t| t.as_ref()).collect();
        let mut tags = self.index.all_tags()?;
        tags.retain(|t| !used.contains(t.as_str()));
        Ok(tags)
    }

    /// Resolve the last segment of a path under `path_tags` to one file.
    ///
    /// `hash+display_name` resolves exactly. A bare display name shared by
    /// several hashes follows the configured [`AmbiguityPolicy`].
    pub fn resolve_file<S: AsRef<str>>(&self, path_tags: &[S], segment: &str) -> Result<FileEntry> {
        let matches = self.matching_files(path_tags)?;

        if let Some((hash, name)) = hashing::split_link_name(segment) {
            let exact = FileEntry::new(name, hash);
            if matches.contains(&exact) {
                return Ok(exact);
            }
        }

        // BTreeSet order puts the smallest hash first for equal names
        let candidates: Vec<&FileEntry> = matches.iter().filter(|e| e.display_name == segment).collect();
        match candidates.as_slice() {
            [] => Err(TagError::NotFound(segment.to_string())),
            [only] => Ok((*only).clone()),
            [first, ..] => {
                let hashes: Vec<String> = candidates.iter().map(|e| e.hash.clone()).collect();
                match self.ambiguity {
                    AmbiguityPolicy::FirstByHash => {
                        tracing::warn!(
                            "[QueryEngine] '{}' matches {} files; serving {}",
                            segment, hashes.len(), first.hash
                        );
                        Ok((*first).clone())
                    }
                    AmbiguityPolicy::Reject => Err(TagError::AmbiguousName { name: segment.to_string(), hashes }),
                }
            }
        }
    }

    /// Where the content of `entry` lives for this query: under the first tag.
    pub fn physical_path<S: AsRef<str>>(&self, path_tags: &[S], entry: &FileEntry) -> Result<PathBuf> {
        let first = path_tags
            .first()
            .ok_or_else(|| TagError::NotFound(entry.display_name.clone()))?;
        Ok(self.store.resolve(first.as_ref(), &entry.hash, &entry.display_name))
    }
}
