// FILE: src/storage/content_store.rs
//! Content Store: the physical, hash-sharded link layout.
//!
//! ```text
//! repository/
//!   <tag>/<hash[0:2]>/<hash><display_name>      one hardlink per tag
//!   .names/<sha1(display_name)[0:2]>/<hash><display_name>
//! ```
//!
//! No query logic lives here, and nothing here writes to a Metadata Index.

use crate::core::bouncer::NAMES_DIR;
use crate::core::hashing::{self, prefix_of};
use crate::error::{Result, TagError};
use std::fs::{self, ReadDir};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One link in a tag's shard directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Link {
    pub tag: String,
    pub hash: String,
    pub display_name: String,
}

/// Result of placing content under a tag.
#[derive(Debug, Clone)]
pub struct Placement {
    pub path: PathBuf,
    pub newly_linked: bool,
    /// Directories this call created (tag and/or shard).
    pub created_dirs: Vec<PathBuf>,
}

/// Lazy listing of one directory's entry names.
///
/// A missing directory lists as empty. Each call to a `list_*` method
/// re-reads the directory; nothing is cached.
pub struct DirNames {
    inner: Option<ReadDir>,
    dirs_only: bool,
}

impl DirNames {
    fn open(path: &Path, dirs_only: bool) -> Result<Self> {
        match fs::read_dir(path) {
            Ok(rd) => Ok(Self { inner: Some(rd), dirs_only }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self { inner: None, dirs_only }),
            Err(e) => Err(TagError::Io(e)),
        }
    }
}

impl Iterator for DirNames {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let rd = self.inner.as_mut()?;
        loop {
            let entry = match rd.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(TagError::Io(e))),
            };
            if self.dirs_only {
                // Symlinked directories count, the same rule as `Path::is_dir`
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => {}
                    Ok(ft) if ft.is_symlink() && entry.path().is_dir() => {}
                    Ok(_) => continue,
                    Err(e) => return Some(Err(TagError::Io(e))),
                }
            }
            match entry.file_name().into_string() {
                Ok(name) => return Some(Ok(name)),
                Err(raw) => {
                    tracing::debug!("[ContentStore] Skipping non-UTF-8 entry {:?}", raw);
                    continue;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn repository(&self) -> &Path {
        &self.root
    }

    pub fn tag_dir(&self, tag: &str) -> PathBuf {
        self.root.join(tag)
    }

    pub fn names_dir(&self) -> PathBuf {
        self.root.join(NAMES_DIR)
    }

    /// Physical location of `hash+display_name` under `tag`. No I/O.
    pub fn resolve(&self, tag: &str, file_hash: &str, display_name: &str) -> PathBuf {
        self.root
            .join(tag)
            .join(prefix_of(file_hash))
            .join(format!("{}{}", file_hash, display_name))
    }

    /// Create the repository root and the reserved `.names` directory.
    pub fn bootstrap(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        ensure_dir(&self.names_dir())?;
        Ok(())
    }

    /// Hardlink `content_path` into `tag/hash_prefix/hash+display_name`.
    pub fn place(&self, content_path: &Path, tag: &str, file_hash: &str, display_name: &str) -> Result<Placement> {
        let tag_dir = self.tag_dir(tag);
        let shard_dir = tag_dir.join(prefix_of(file_hash));

        let mut created_dirs = Vec::new();
        for dir in [&tag_dir, &shard_dir] {
            if ensure_dir(dir)? {
                created_dirs.push(dir.to_path_buf());
            }
        }

        let path = self.resolve(tag, file_hash, display_name);
        // Link from a copy already in the repository so the content has one inode
        let source = self.stored_copy(file_hash, &path)?.unwrap_or_else(|| content_path.to_path_buf());
        let newly_linked = link_idempotent(&source, &path, file_hash)?;
        if newly_linked {
            tracing::debug!("[ContentStore] Linked {} -> {}", content_path.display(), path.display());
        } else {
            tracing::debug!("[ContentStore] Already linked: {}", path.display());
        }

        Ok(Placement { path, newly_linked, created_dirs })
    }

    /// Any link to `file_hash` already under some tag, other than `except`.
    pub fn stored_copy(&self, file_hash: &str, except: &Path) -> Result<Option<PathBuf>> {
        let prefix = prefix_of(file_hash);
        for tag in self.list_tags()? {
            let tag = tag?;
            for entry in self.list_shard_entries(&tag, prefix)? {
                let entry = entry?;
                if let Some((hash, _)) = hashing::split_link_name(&entry) {
                    let path = self.tag_dir(&tag).join(prefix).join(&entry);
                    if hash == file_hash && path != except {
                        return Ok(Some(path));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Secondary link under `.names/` keyed by the display name's hash.
    /// Silently succeeds if something is already there.
    pub fn index_by_name(&self, content_path: &Path, display_name: &str, file_hash: &str) -> Result<bool> {
        let name_dir = self.names_dir().join(prefix_of(&hashing::hash_of_string(display_name)).to_string());
        fs::create_dir_all(&name_dir)?;

        let path = name_dir.join(format!("{}{}", file_hash, display_name));
        match fs::hard_link(content_path, &path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(TagError::Io(e)),
        }
    }

    /// Hashes ever linked under `display_name`, via the `.names` index.
    pub fn lookup_name(&self, display_name: &str) -> Result<Vec<String>> {
        let name_dir = self.names_dir().join(prefix_of(&hashing::hash_of_string(display_name)).to_string());
        let mut hashes = Vec::new();
        for entry in DirNames::open(&name_dir, false)? {
            let entry = entry?;
            if let Some((hash, name)) = hashing::split_link_name(&entry) {
                if name == display_name {
                    hashes.push(hash.to_string());
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Tag directories directly under the repository root.
    pub fn list_tags(&self) -> Result<impl Iterator<Item = Result<String>>> {
        Ok(DirNames::open(&self.root, true)?.filter(|name| match name {
            Ok(name) => !name.starts_with('.'),
            Err(_) => true,
        }))
    }

    /// Create the tag directory if absent. Returns whether it created it.
    pub fn ensure_tag_dir(&self, tag: &str) -> Result<bool> {
        ensure_dir(&self.tag_dir(tag))
    }

    pub fn tag_exists(&self, tag: &str) -> bool {
        !tag.starts_with('.') && !tag.contains('/') && self.tag_dir(tag).is_dir()
    }

    pub fn list_shard_prefixes(&self, tag: &str) -> Result<DirNames> {
        DirNames::open(&self.tag_dir(tag), true)
    }

    pub fn list_shard_entries(&self, tag: &str, prefix: &str) -> Result<DirNames> {
        DirNames::open(&self.tag_dir(tag).join(prefix), false)
    }

    /// Every well-formed link under every tag.
    pub fn links(&self) -> Result<Vec<Link>> {
        let mut links = Vec::new();
        // filter_entry never sees entries skipped by min_depth, so walk from 1
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .min_depth(1)
            .max_depth(3)
            .into_iter()
            .filter_entry(|e| e.depth() != 1 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = entry.map_err(|e| {
                TagError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed")))
            })?;
            if entry.depth() != 3 || entry.file_type().is_dir() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let parts: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
            if let [tag, prefix, file] = parts[..] {
                match hashing::split_link_name(file) {
                    Some((hash, name)) if prefix_of(hash) == prefix => links.push(Link {
                        tag: tag.to_string(),
                        hash: hash.to_string(),
                        display_name: name.to_string(),
                    }),
                    _ => tracing::debug!("[ContentStore] Skipping malformed link {}", rel.display()),
                }
            }
        }
        links.sort();
        Ok(links)
    }
}

/// `mkdir` that treats "already exists" as success. Returns whether it created.
fn ensure_dir(path: &Path) -> Result<bool> {
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if path.is_dir() {
                Ok(false)
            } else {
                Err(TagError::StoreInconsistency(format!("{} exists and is not a directory", path.display())))
            }
        }
        Err(e) => Err(TagError::Io(e)),
    }
}

/// Hardlink, succeeding quietly if `dest` already holds content hashing to
/// `file_hash`. Different content at `dest` is `AlreadyLinked`.
fn link_idempotent(src: &Path, dest: &Path, file_hash: &str) -> Result<bool> {
    match fs::hard_link(src, dest) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let (a, b) = (fs::metadata(src)?, fs::symlink_metadata(dest)?);
            if a.dev() == b.dev() && a.ino() == b.ino() {
                return Ok(false);
            }
            if b.is_file() && hashing::hash_of_file(dest)? == file_hash {
                tracing::debug!("[ContentStore] {} already holds {}", dest.display(), file_hash);
                Ok(false)
            } else {
                Err(TagError::AlreadyLinked(dest.to_path_buf()))
            }
        }
        Err(e) => Err(TagError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hashing::hash_of_file;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ContentStore) {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path().join("repo"));
        store.bootstrap().unwrap();
        (dir, store)
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_place_is_idempotent() {
        let (dir, store) = setup();
        let src = write(&dir, "a.txt", "alpha");
        let hash = hash_of_file(&src).unwrap();

        let first = store.place(&src, "fiction", &hash, "a.txt").unwrap();
        assert!(first.newly_linked);
        assert_eq!(first.created_dirs.len(), 2);
        assert_eq!(first.path, store.resolve("fiction", &hash, "a.txt"));

        let second = store.place(&src, "fiction", &hash, "a.txt").unwrap();
        assert!(!second.newly_linked);
        assert!(second.created_dirs.is_empty());

        let entries: Vec<String> = store
            .list_shard_entries("fiction", &hash[..2])
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries, vec![format!("{}a.txt", hash)]);
    }

    #[test]
    fn test_place_rejects_different_content() {
        let (dir, store) = setup();
        let src = write(&dir, "a.txt", "alpha");
        let hash = hash_of_file(&src).unwrap();

        // Something else already sits where this content belongs
        let dest = store.resolve("fiction", &hash, "a.txt");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&dest, "tampered").unwrap();

        let err = store.place(&src, "fiction", &hash, "a.txt").unwrap_err();
        assert!(matches!(err, TagError::AlreadyLinked(_)));
    }

    #[test]
    fn test_identical_copies_share_one_inode() {
        let (dir, store) = setup();
        fs::create_dir_all(dir.path().join("x")).unwrap();
        fs::create_dir_all(dir.path().join("y")).unwrap();
        let first = write(&dir, "x/a.txt", "same bytes");
        let second = write(&dir, "y/a.txt", "same bytes");
        let hash = hash_of_file(&first).unwrap();
        assert_eq!(hash_of_file(&second).unwrap(), hash);

        assert!(store.place(&first, "fiction", &hash, "a.txt").unwrap().newly_linked);
        let again = store.place(&second, "fiction", &hash, "a.txt").unwrap();
        assert!(!again.newly_linked);

        // A new tag links the stored inode, not the second copy
        let long = store.place(&second, "long", &hash, "a.txt").unwrap();
        assert!(long.newly_linked);
        let (a, b) = (fs::metadata(&again.path).unwrap(), fs::metadata(&long.path).unwrap());
        assert_eq!((a.dev(), a.ino()), (b.dev(), b.ino()));
        assert_ne!(fs::metadata(&second).unwrap().ino(), b.ino());
        assert_eq!(store.stored_copy(&hash, &long.path).unwrap(), Some(again.path));
    }

    #[test]
    fn test_symlinked_tag_dir_is_listed() {
        let (dir, store) = setup();
        let src = write(&dir, "a.txt", "alpha");
        let hash = hash_of_file(&src).unwrap();
        store.place(&src, "fiction", &hash, "a.txt").unwrap();
        std::os::unix::fs::symlink(store.tag_dir("fiction"), store.tag_dir("novels")).unwrap();

        assert!(store.tag_exists("novels"));
        let tags: HashSet<String> = store.list_tags().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(tags, HashSet::from(["fiction".to_string(), "novels".to_string()]));
        assert!(store.links().unwrap().iter().any(|l| l.tag == "novels" && l.hash == hash));
    }

    #[test]
    fn test_listings() {
        let (dir, store) = setup();
        let a = write(&dir, "a.txt", "alpha");
        let b = write(&dir, "b.txt", "beta");
        let (ha, hb) = (hash_of_file(&a).unwrap(), hash_of_file(&b).unwrap());

        store.place(&a, "fiction", &ha, "a.txt").unwrap();
        store.place(&b, "fiction", &hb, "b.txt").unwrap();
        store.place(&b, "long", &hb, "b.txt").unwrap();

        let tags: HashSet<String> = store.list_tags().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(tags, HashSet::from(["fiction".to_string(), "long".to_string()]));

        let prefixes: HashSet<String> = store.list_shard_prefixes("fiction").unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(prefixes, HashSet::from([ha[..2].to_string(), hb[..2].to_string()]));

        // Missing tag lists as empty
        assert_eq!(store.list_shard_prefixes("nope").unwrap().count(), 0);

        let links = store.links().unwrap();
        assert_eq!(links.len(), 3);
        assert!(links.contains(&Link { tag: "long".into(), hash: hb.clone(), display_name: "b.txt".into() }));
    }

    #[test]
    fn test_name_index() {
        let (dir, store) = setup();
        let src = write(&dir, "a.txt", "alpha");
        let hash = hash_of_file(&src).unwrap();

        assert!(store.index_by_name(&src, "a.txt", &hash).unwrap());
        assert!(!store.index_by_name(&src, "a.txt", &hash).unwrap());
        assert_eq!(store.lookup_name("a.txt").unwrap(), vec![hash]);
        assert!(store.lookup_name("zzz.txt").unwrap().is_empty());

        // .names is never a tag
        assert!(!store.tag_exists(NAMES_DIR));
        assert_eq!(store.list_tags().unwrap().count(), 0);
    }
}
