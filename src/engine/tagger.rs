//! The write path: hash a source file, link it under a tag, record it.
//!
//! Order matters: the link goes in before the index write, so a reader can
//! see content that is linked but not yet indexed, never the reverse.

use crate::core::bouncer::Bouncer;
use crate::core::hashing;
use crate::core::permissions::Identity;
use crate::error::{Result, TagError};
use crate::storage::{ContentStore, MetadataIndex};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagOutcome {
    pub tag: String,
    pub hash: String,
    pub display_name: String,
    pub newly_linked: bool,
}

pub struct Tagger {
    store: Arc<ContentStore>,
    index: Arc<dyn MetadataIndex>,
    identity: Identity,
}

impl Tagger {
    pub fn new(store: Arc<ContentStore>, index: Arc<dyn MetadataIndex>) -> Self {
        Self { store, index, identity: Identity::capture() }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn tag_file(&self, source: &Path, tag: &str) -> Result<TagOutcome> {
        let mut outcomes = self.tag_file_with(source, &[tag])?;
        outcomes.pop().ok_or_else(|| TagError::State("no outcome for single tag".into()))
    }

    /// Tag one file with several tags, hashing it once.
    pub fn tag_file_with<S: AsRef<str>>(&self, source: &Path, tags: &[S]) -> Result<Vec<TagOutcome>> {
        for tag in tags {
            Bouncer::check_tag(tag.as_ref())?;
        }

        let display_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TagError::InvalidName(format!("{} has no UTF-8 file name", source.display())))?
            .to_string();
        Bouncer::check_display_name(&display_name)?;

        let meta = std::fs::metadata(source)?;
        if !meta.is_file() {
            return Err(TagError::InvalidName(format!("{} is not a regular file", source.display())));
        }

        let hash = hashing::hash_of_file(source)?;
        let mut outcomes = Vec::with_capacity(tags.len());

        for tag in tags {
            let tag = tag.as_ref();
            let placement = self.store.place(source, tag, &hash, &display_name)?;
            for dir in &placement.created_dirs {
                self.identity.enforce_ownership(dir)?;
            }
            self.store.index_by_name(&placement.path, &display_name, &hash)?;
            self.index.record(&display_name, &hash, tag)?;

            if placement.newly_linked {
                tracing::info!("[Tagger] Tagged {} ({}) with '{}'", display_name, &hash[..8], tag);
            } else {
                tracing::debug!("[Tagger] {} already tagged with '{}'", display_name, tag);
            }

            outcomes.push(TagOutcome {
                tag: tag.to_string(),
                hash: hash.clone(),
                display_name: display_name.clone(),
                newly_linked: placement.newly_linked,
            });
        }

        Ok(outcomes)
    }
}
