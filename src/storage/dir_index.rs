//! Directory-walk Metadata Index.
//!
//! Holds no state of its own: a link at `tag/prefix/hash+name` IS the
//! association, so every answer is re-derived from the Content Store.

use super::content_store::ContentStore;
use super::index::{FileEntry, MetadataIndex};
use crate::core::hashing::{self, prefix_of};
use crate::error::{Result, TagError};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

pub struct DirectoryIndex {
    store: Arc<ContentStore>,
}

impl DirectoryIndex {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self { store }
    }

    /// Hashes linked in one shard directory of one tag.
    fn shard_hashes(&self, tag: &str, prefix: &str) -> Result<HashSet<String>> {
        let mut hashes = HashSet::new();
        for entry in self.store.list_shard_entries(tag, prefix)? {
            if let Some((hash, _)) = hashing::split_link_name(&entry?) {
                hashes.insert(hash.to_string());
            }
        }
        Ok(hashes)
    }

    fn common_prefixes(&self, tags: &[String]) -> Result<HashSet<String>> {
        let mut common: Option<HashSet<String>> = None;
        for tag in tags {
            let prefixes: HashSet<String> = self.store.list_shard_prefixes(tag)?.collect::<Result<_>>()?;
            common = Some(match common {
                None => prefixes,
                Some(acc) => acc.intersection(&prefixes).cloned().collect(),
            });
            if common.as_ref().is_some_and(HashSet::is_empty) {
                break;
            }
        }
        Ok(common.unwrap_or_default())
    }

    fn common_hashes(&self, tags: &[String], prefix: &str) -> Result<HashSet<String>> {
        let mut common: Option<HashSet<String>> = None;
        for tag in tags {
            let hashes = self.shard_hashes(tag, prefix)?;
            common = Some(match common {
                None => hashes,
                Some(acc) => acc.intersection(&hashes).cloned().collect(),
            });
            if common.as_ref().is_some_and(HashSet::is_empty) {
                break;
            }
        }
        Ok(common.unwrap_or_default())
    }
}

impl MetadataIndex for DirectoryIndex {
    fn backend_name(&self) -> &'static str {
        "directory"
    }

    fn tag_exists(&self, name: &str) -> Result<bool> {
        Ok(self.store.tag_exists(name))
    }

    fn ensure_tag(&self, name: &str) -> Result<()> {
        if self.store.ensure_tag_dir(name)? {
            tracing::debug!("[DirectoryIndex] Created tag '{}'", name);
        }
        Ok(())
    }

    fn all_tags(&self) -> Result<BTreeSet<String>> {
        self.store.list_tags()?.collect()
    }

    fn file_exists(&self, hash: &str) -> Result<bool> {
        for tag in self.store.list_tags()? {
            if self.shard_hashes(&tag?, prefix_of(hash))?.contains(hash) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Files exist once the Content Store has linked them; this only checks.
    fn ensure_file(&self, display_name: &str, hash: &str) -> Result<()> {
        if self.file_exists(hash)? {
            Ok(())
        } else {
            Err(TagError::StoreInconsistency(format!("no link for {} ({})", display_name, hash)))
        }
    }

    fn is_tagged(&self, hash: &str, tag: &str) -> Result<bool> {
        Ok(self.shard_hashes(tag, prefix_of(hash))?.contains(hash))
    }

    /// The link placed by the Content Store is the association; verify it.
    fn add_tag(&self, hash: &str, display_name: &str, tag: &str) -> Result<()> {
        let path = self.store.resolve(tag, hash, display_name);
        if path.exists() {
            Ok(())
        } else {
            Err(TagError::StoreInconsistency(format!("missing link {}", path.display())))
        }
    }

    fn files_with_all(&self, tags: &[String]) -> Result<BTreeSet<FileEntry>> {
        let mut results = BTreeSet::new();
        let Some(first) = tags.first() else {
            return Ok(results);
        };

        for prefix in self.common_prefixes(tags)? {
            let hashes = self.common_hashes(tags, &prefix)?;
            if hashes.is_empty() {
                continue;
            }
            // Display names come from the first tag's shard
            for entry in self.store.list_shard_entries(first, &prefix)? {
                let entry = entry?;
                if let Some((hash, name)) = hashing::split_link_name(&entry) {
                    if hashes.contains(hash) {
                        results.insert(FileEntry::new(name, hash));
                    }
                }
            }
        }

        tracing::trace!("[DirectoryIndex] {:?} -> {} files", tags, results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hashing::hash_of_file;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: Arc<ContentStore>,
        index: DirectoryIndex,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(ContentStore::new(dir.path().join("repo")));
            store.bootstrap().unwrap();
            let index = DirectoryIndex::new(Arc::clone(&store));
            Self { dir, store, index }
        }

        fn tag(&self, name: &str, content: &str, tags: &[&str]) -> String {
            let src: PathBuf = self.dir.path().join(name);
            if !src.exists() {
                std::fs::write(&src, content).unwrap();
            }
            let hash = hash_of_file(&src).unwrap();
            for tag in tags {
                self.store.place(&src, tag, &hash, name).unwrap();
                self.index.record(name, &hash, tag).unwrap();
            }
            hash
        }
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_scenario() {
        let fx = Fixture::new();
        let h1 = fx.tag("a.txt", "short story", &["fiction", "short"]);
        let h2 = fx.tag("b.txt", "a very long story", &["fiction", "long"]);

        let fiction = fx.index.files_with_all(&tags(&["fiction"])).unwrap();
        assert_eq!(fiction, BTreeSet::from([FileEntry::new("a.txt", &h1), FileEntry::new("b.txt", &h2)]));

        let short = fx.index.files_with_all(&tags(&["fiction", "short"])).unwrap();
        assert_eq!(short, BTreeSet::from([FileEntry::new("a.txt", &h1)]));

        assert!(fx.index.files_with_all(&tags(&["short", "long"])).unwrap().is_empty());
        assert!(fx.index.files_with_all(&[]).unwrap().is_empty());
        assert!(fx.index.files_with_all(&tags(&["missing"])).unwrap().is_empty());
    }

    #[test]
    fn test_point_queries() {
        let fx = Fixture::new();
        let h1 = fx.tag("a.txt", "short story", &["fiction"]);

        assert!(fx.index.tag_exists("fiction").unwrap());
        assert!(!fx.index.tag_exists("long").unwrap());
        assert!(fx.index.file_exists(&h1).unwrap());
        assert!(fx.index.is_tagged(&h1, "fiction").unwrap());
        assert!(!fx.index.is_tagged(&h1, "long").unwrap());

        fx.index.ensure_tag("long").unwrap();
        fx.index.ensure_tag("long").unwrap();
        assert_eq!(fx.index.all_tags().unwrap(), BTreeSet::from(["fiction".to_string(), "long".to_string()]));
    }

    #[test]
    fn test_association_without_link_is_inconsistent() {
        let fx = Fixture::new();
        let h1 = fx.tag("a.txt", "short story", &["fiction"]);
        let err = fx.index.add_tag(&h1, "a.txt", "long").unwrap_err();
        assert!(matches!(err, TagError::StoreInconsistency(_)));

        let unknown = hashing::hash_of_string("nothing");
        assert!(matches!(fx.index.ensure_file("x", &unknown), Err(TagError::StoreInconsistency(_))));
    }

    #[test]
    fn test_first_tag_supplies_display_name() {
        let fx = Fixture::new();
        std::fs::write(fx.dir.path().join("one.txt"), "same bytes").unwrap();
        std::fs::write(fx.dir.path().join("two.txt"), "same bytes").unwrap();
        let h = fx.tag("one.txt", "", &["fiction"]);
        let h2 = fx.tag("two.txt", "", &["short"]);
        assert_eq!(h, h2);

        let a = fx.index.files_with_all(&tags(&["fiction", "short"])).unwrap();
        assert_eq!(a, BTreeSet::from([FileEntry::new("one.txt", &h)]));
        let b = fx.index.files_with_all(&tags(&["short", "fiction"])).unwrap();
        assert_eq!(b, BTreeSet::from([FileEntry::new("two.txt", &h)]));
    }
}
