//! The Bouncer: decides which names may enter the tag namespace.
//!
//! Two jobs:
//! 1. Validate tag and display names before they touch the repository.
//! 2. Turn away OS probes (`.Trash`, `desktop.ini`, ...) at lookup time so
//!    file managers don't trigger a full query per probe.

use crate::error::{Result, TagError};

/// Reserved directory holding the name-hash reverse index.
pub const NAMES_DIR: &str = ".names";

const IGNORED_EXACT: &[&str] = &[
    "thumbs.db",
    "ehthumbs.db",
    "desktop.ini",
    "icon?",
    "folder.jpg",
    "autorun.inf",
    "$recycle.bin",
    "system volume information",
];

pub struct Bouncer;

impl Bouncer {
    /// A path segment that can be a directory name on the backing filesystem.
    fn check_segment(name: &str, what: &str) -> Result<()> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(TagError::InvalidName(format!("{} '{}'", what, name)));
        }
        if name.contains('/') || name.contains('\0') {
            return Err(TagError::InvalidName(format!("{} '{}' contains a separator", what, name)));
        }
        Ok(())
    }

    pub fn check_tag(name: &str) -> Result<()> {
        Self::check_segment(name, "tag")?;
        if name.starts_with('.') {
            // Dot-directories are reserved (.names) or hidden from list_tags
            return Err(TagError::InvalidName(format!("tag '{}' starts with '.'", name)));
        }
        Ok(())
    }

    pub fn check_display_name(name: &str) -> Result<()> {
        Self::check_segment(name, "display name")
    }

    /// Probes from desktop environments and shells that never name a tag.
    pub fn is_noise(name: &str) -> bool {
        let name_lower = name.to_lowercase();

        // Hidden and backup files: tags can't start with '.', only a
        // dotfile that was itself tagged could match.
        if name.ends_with('~') {
            return true;
        }
        if name.starts_with(".Trash") || name_lower == ".ds_store" || name_lower == ".xdg-volume-info" {
            return true;
        }

        IGNORED_EXACT.contains(&name_lower.as_str())
    }
}
