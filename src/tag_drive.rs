// FILE: src/tag_drive.rs
//! Tag Drive: the FUSE face of the query engine.
//!
//! A mounted path is a query: `/fiction/long` lists every other tag as a
//! subdirectory plus the files tagged both `fiction` and `long`. The mount
//! is read-only; file content is served from the Content Store link under
//! the first tag of the path.

use crate::core::bouncer::Bouncer;
use crate::core::inode_store::{InodeStore, INODE_ROOT};
use crate::error::{Result, TagError};
use crate::state::SharedState;
use crate::storage::FileEntry;
use dashmap::DashMap;
use fuser::{FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, Request};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{File, Metadata};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// What a logical path resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Root,
    /// Every segment is a distinct known tag.
    TagDir { tags: Vec<String> },
    File { tags: Vec<String>, entry: FileEntry },
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: FileType,
    pub name: String,
}

fn os_err(code: i32) -> TagError {
    TagError::Io(std::io::Error::from_raw_os_error(code))
}

fn to_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        // st_mtime_nsec counts forward from the (negative) second
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

/// Real attributes of a backing path, reported under a virtual inode.
fn attr_from_metadata(ino: u64, meta: &Metadata) -> FileAttr {
    let kind = if meta.is_dir() {
        FileType::Directory
    } else if meta.file_type().is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    };
    let mtime = to_time(meta.mtime(), meta.mtime_nsec());
    FileAttr {
        ino,
        size: meta.size(),
        blocks: meta.blocks(),
        atime: to_time(meta.atime(), meta.atime_nsec()),
        mtime,
        ctime: to_time(meta.ctime(), meta.ctime_nsec()),
        crtime: meta.created().unwrap_or(mtime),
        kind,
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

pub struct TagDrive {
    pub state: SharedState,
    inodes: InodeStore,
    handles: DashMap<u64, File>,
    next_fh: AtomicU64,
    ttl: Duration,
}

impl TagDrive {
    pub fn new(state: SharedState) -> Self {
        let ttl = Duration::from_secs(state.config.attr_ttl_secs);
        Self {
            state,
            inodes: InodeStore::new(),
            handles: DashMap::new(),
            next_fh: AtomicU64::new(1),
            ttl,
        }
    }

    fn is_tag_path(&self, segments: &[String]) -> Result<bool> {
        let mut seen = HashSet::new();
        for segment in segments {
            if !seen.insert(segment.as_str()) || !self.state.engine.is_tag(segment)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Interpret a logical path. Re-derived on every call; nothing cached.
    pub fn resolve_node(&self, segments: &[String]) -> Result<Node> {
        let Some((last, prefix)) = segments.split_last() else {
            return Ok(Node::Root);
        };
        if !self.is_tag_path(prefix)? {
            return Err(TagError::NotFound(segments.join("/")));
        }

        // A tag name wins over a display name in the same position
        if !prefix.contains(last) && self.state.engine.is_tag(last)? {
            return Ok(Node::TagDir { tags: segments.to_vec() });
        }
        if prefix.is_empty() {
            return Err(TagError::NotFound(last.clone()));
        }

        let entry = self.state.engine.resolve_file(prefix, last)?;
        Ok(Node::File { tags: prefix.to_vec(), entry })
    }

    fn backing_path(&self, node: &Node) -> Result<PathBuf> {
        match node {
            Node::Root => Ok(self.state.store.repository().to_path_buf()),
            Node::TagDir { tags } => {
                let last = tags.last().ok_or_else(|| TagError::State("empty tag path".into()))?;
                Ok(self.state.store.tag_dir(last))
            }
            Node::File { tags, entry } => self.state.engine.physical_path(tags, entry),
        }
    }

    fn attr_for(&self, ino: u64, node: &Node) -> Result<FileAttr> {
        let path = self.backing_path(node)?;
        // Directories may be reached through a symlink; links themselves never are
        let meta = match node {
            Node::Root | Node::TagDir { .. } => std::fs::metadata(path)?,
            Node::File { .. } => std::fs::symlink_metadata(path)?,
        };
        Ok(attr_from_metadata(ino, &meta))
    }

    fn segments_of(&self, ino: u64) -> Result<Vec<String>> {
        self.inodes.segments(ino).ok_or_else(|| TagError::NotFound(format!("inode {}", ino)))
    }

    pub fn do_lookup(&self, parent: u64, name: &str) -> Result<FileAttr> {
        if Bouncer::is_noise(name) {
            return Err(TagError::NotFound(name.to_string()));
        }
        let segments = self.inodes
            .child_segments(parent, name)
            .ok_or_else(|| TagError::NotFound(format!("parent inode {}", parent)))?;

        let node = self.resolve_node(&segments)?;
        let ino = InodeStore::path_to_inode(&segments);
        let attr = self.attr_for(ino, &node)?;
        self.inodes.remember(segments);
        Ok(attr)
    }

    pub fn do_forget(&self, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    pub fn do_getattr(&self, ino: u64) -> Result<FileAttr> {
        let segments = self.segments_of(ino)?;
        let node = self.resolve_node(&segments)?;
        self.attr_for(ino, &node)
    }

    /// Extendable tags, then matching files, after `.` and `..`.
    pub fn do_readdir(&self, ino: u64) -> Result<Vec<DirEntry>> {
        let segments = self.segments_of(ino)?;
        let tags = match self.resolve_node(&segments)? {
            Node::Root => Vec::new(),
            Node::TagDir { tags } => tags,
            Node::File { .. } => return Err(os_err(libc::ENOTDIR)),
        };

        let parent = match segments.split_last() {
            Some((_, rest)) => InodeStore::path_to_inode(rest),
            None => INODE_ROOT,
        };
        let mut entries = vec![
            DirEntry { ino, kind: FileType::Directory, name: ".".to_string() },
            DirEntry { ino: parent, kind: FileType::Directory, name: "..".to_string() },
        ];

        let child = |name: &str| {
            let mut path = segments.clone();
            path.push(name.to_string());
            InodeStore::path_to_inode(&path)
        };

        let extendable = self.state.engine.extendable_tags(&tags)?;
        for tag in &extendable {
            entries.push(DirEntry { ino: child(tag), kind: FileType::Directory, name: tag.clone() });
        }

        let mut listed: HashSet<String> = HashSet::new();
        for FileEntry { display_name, .. } in self.state.engine.matching_files(&tags)? {
            if extendable.contains(&display_name) || !listed.insert(display_name.clone()) {
                continue;
            }
            entries.push(DirEntry { ino: child(&display_name), kind: FileType::RegularFile, name: display_name });
        }

        tracing::trace!("[TagDrive] readdir {:?}: {} entries", segments, entries.len());
        Ok(entries)
    }

    pub fn do_open(&self, ino: u64, flags: i32) -> Result<u64> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(os_err(libc::EROFS));
        }
        let segments = self.segments_of(ino)?;
        let node = self.resolve_node(&segments)?;
        if !matches!(node, Node::File { .. }) {
            return Err(os_err(libc::EISDIR));
        }

        let file = File::open(self.backing_path(&node)?)?;
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, file);
        tracing::debug!("[TagDrive] open {} -> fh {}", segments.join("/"), fh);
        Ok(fh)
    }

    pub fn do_read(&self, fh: u64, offset: i64, size: u32) -> Result<Vec<u8>> {
        let file = self.handles.get(&fh).ok_or_else(|| os_err(libc::EBADF))?;
        let offset = u64::try_from(offset).map_err(|_| os_err(libc::EINVAL))?;

        let mut buffer = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buffer.len() {
            match file.read_at(&mut buffer[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(TagError::Io(e)),
            }
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    pub fn do_release(&self, fh: u64) -> Result<()> {
        self.handles.remove(&fh).map(|_| ()).ok_or_else(|| os_err(libc::EBADF))
    }

    /// Everything is readable; nothing is writable.
    pub fn do_access(&self, ino: u64, mask: i32) -> Result<()> {
        self.segments_of(ino)?;
        if mask & libc::W_OK != 0 {
            return Err(os_err(libc::EROFS));
        }
        Ok(())
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn log_failure(op: &str, err: &TagError) {
        if err.is_not_found() {
            tracing::trace!("[TagDrive] {}: {}", op, err);
        } else {
            tracing::warn!("[TagDrive] {} failed: {}", op, err);
        }
    }
}

impl Filesystem for TagDrive {
    fn init(&mut self, _req: &Request, _config: &mut fuser::KernelConfig) -> std::result::Result<(), i32> {
        tracing::info!("[TagDrive] FUSE initialized on {}", self.state.store.repository().display());
        Ok(())
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.do_lookup(parent, name) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => {
                Self::log_failure("lookup", &e);
                reply.error(e.errno());
            }
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.do_forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.do_getattr(ino) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => {
                Self::log_failure("getattr", &e);
                reply.error(e.errno());
            }
        }
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let entries = match self.do_readdir(ino) {
            Ok(entries) => entries,
            Err(e) => {
                Self::log_failure("readdir", &e);
                reply.error(e.errno());
                return;
            }
        };
        for (i, entry) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            if reply.add(entry.ino, (i + 1) as i64, entry.kind, &entry.name) { break; }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.do_open(ino, flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => {
                Self::log_failure("open", &e);
                reply.error(e.errno());
            }
        }
    }

    fn read(&mut self, _req: &Request, _ino: u64, fh: u64, offset: i64, size: u32, _flags: i32, _lock_owner: Option<u64>, reply: ReplyData) {
        match self.do_read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                Self::log_failure("read", &e);
                reply.error(e.errno());
            }
        }
    }

    fn release(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, _lock_owner: Option<u64>, _flush: bool, reply: ReplyEmpty) {
        match self.do_release(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        match self.do_access(ino, mask) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, IndexBackend};
    use crate::core::hashing;
    use crate::core::permissions::Identity;
    use crate::state::TagState;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn mount(backend: IndexBackend) -> (TempDir, TagDrive) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::new(dir.path().join("repo"));
        config.index = backend;
        let state = TagState::init(config).unwrap();
        let tagger = state.tagger().with_identity(Identity { uid: 1000, gid: 1000, is_root: false });

        for (name, content, tags) in [
            ("a.txt", "short story", &["fiction", "short"]),
            ("b.txt", "a very long story", &["fiction", "long"]),
        ] {
            let src = dir.path().join(name);
            std::fs::write(&src, content).unwrap();
            tagger.tag_file_with(&src, tags).unwrap();
        }
        (dir, TagDrive::new(state))
    }

    fn names(entries: &[DirEntry]) -> BTreeSet<String> {
        entries.iter().map(|e| e.name.clone()).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_listing_is_extendable_tags_plus_files() {
        for backend in [IndexBackend::Directory, IndexBackend::Sql] {
            let (_dir, drive) = mount(backend);

            let root = drive.do_readdir(INODE_ROOT).unwrap();
            assert_eq!(names(&root), set(&[".", "..", "fiction", "long", "short"]));

            let fiction = drive.do_lookup(INODE_ROOT, "fiction").unwrap();
            assert!(matches!(fiction.kind, FileType::Directory));
            let listing = drive.do_readdir(fiction.ino).unwrap();
            assert_eq!(names(&listing), set(&[".", "..", "short", "long", "a.txt", "b.txt"]));

            let short = drive.do_lookup(fiction.ino, "short").unwrap();
            assert_eq!(names(&drive.do_readdir(short.ino).unwrap()), set(&[".", "..", "long", "a.txt"]));

            let dead_end = drive.do_lookup(short.ino, "long").unwrap();
            assert_eq!(names(&drive.do_readdir(dead_end.ino).unwrap()), set(&[".", ".."]));
        }
    }

    #[test]
    fn test_readdir_inodes_match_lookup() {
        let (_dir, drive) = mount(IndexBackend::Directory);
        let fiction = drive.do_lookup(INODE_ROOT, "fiction").unwrap();
        let listing = drive.do_readdir(fiction.ino).unwrap();
        let a = listing.iter().find(|e| e.name == "a.txt").unwrap();
        assert_eq!(drive.do_lookup(fiction.ino, "a.txt").unwrap().ino, a.ino);
        assert_eq!(listing[1].ino, INODE_ROOT);
    }

    #[test]
    fn test_stat_reports_backing_attributes() {
        let (_dir, drive) = mount(IndexBackend::Directory);
        let root = drive.do_getattr(INODE_ROOT).unwrap();
        assert!(matches!(root.kind, FileType::Directory));

        let fiction = drive.do_lookup(INODE_ROOT, "fiction").unwrap();
        let file = drive.do_lookup(fiction.ino, "a.txt").unwrap();
        assert!(matches!(file.kind, FileType::RegularFile));
        assert_eq!(file.size, "short story".len() as u64);
        // Linked from the source, two tags and the name index
        assert!(file.nlink >= 4);
        assert_eq!(drive.do_getattr(file.ino).unwrap().size, file.size);
    }

    #[test]
    fn test_unresolvable_paths() {
        let (_dir, drive) = mount(IndexBackend::Directory);
        let fiction = drive.do_lookup(INODE_ROOT, "fiction").unwrap();
        let short = drive.do_lookup(fiction.ino, "short").unwrap();

        for (parent, name) in [
            (INODE_ROOT, "a.txt"),        // no files at the root
            (INODE_ROOT, "missing"),
            (fiction.ino, "fiction"),     // tags don't repeat
            (short.ino, "b.txt"),         // not tagged short
            (INODE_ROOT, ".Trash-1000"),
            (424242, "fiction"),
        ] {
            let err = drive.do_lookup(parent, name).unwrap_err();
            assert_eq!(err.errno(), libc::ENOENT, "{} under {}", name, parent);
        }
        assert_eq!(drive.do_getattr(999_999).unwrap_err().errno(), libc::ENOENT);

        let file = drive.do_lookup(fiction.ino, "a.txt").unwrap();
        assert_eq!(drive.do_readdir(file.ino).unwrap_err().errno(), libc::ENOTDIR);
        assert_eq!(drive.do_open(fiction.ino, libc::O_RDONLY).unwrap_err().errno(), libc::EISDIR);
    }

    #[test]
    fn test_open_read_release_round_trip() {
        let (_dir, drive) = mount(IndexBackend::Sql);
        let long = drive.do_lookup(INODE_ROOT, "long").unwrap();
        let entries = drive.do_readdir(long.ino).unwrap();
        let b = entries.iter().find(|e| e.name == "b.txt").unwrap();
        drive.do_lookup(long.ino, "b.txt").unwrap();

        let fh = drive.do_open(b.ino, libc::O_RDONLY).unwrap();
        let head = drive.do_read(fh, 0, 6).unwrap();
        let tail = drive.do_read(fh, 6, 4096).unwrap();
        assert_eq!(head, b"a very");
        let whole = [head, tail].concat();
        assert_eq!(hashing::hash_of(&whole[..]).unwrap(), hashing::hash_of_string("a very long story"));
        assert!(drive.do_read(fh, 1000, 10).unwrap().is_empty());

        assert_eq!(drive.open_handles(), 1);
        drive.do_release(fh).unwrap();
        assert_eq!(drive.open_handles(), 0);
        assert_eq!(drive.do_read(fh, 0, 1).unwrap_err().errno(), libc::EBADF);
    }

    #[test]
    fn test_read_only_surface() {
        let (_dir, drive) = mount(IndexBackend::Directory);
        let fiction = drive.do_lookup(INODE_ROOT, "fiction").unwrap();
        let file = drive.do_lookup(fiction.ino, "a.txt").unwrap();

        assert_eq!(drive.do_open(file.ino, libc::O_RDWR).unwrap_err().errno(), libc::EROFS);
        assert!(drive.do_access(file.ino, libc::R_OK).is_ok());
        assert_eq!(drive.do_access(file.ino, libc::W_OK).unwrap_err().errno(), libc::EROFS);
    }

    #[test]
    fn test_symlinked_repository_root_is_a_directory() {
        let (dir, drive) = mount(IndexBackend::Directory);
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(drive.state.store.repository(), &link).unwrap();
        let drive = TagDrive::new(TagState::open(Config::new(&link)).unwrap());

        assert!(matches!(drive.do_getattr(INODE_ROOT).unwrap().kind, FileType::Directory));
        let fiction = drive.do_lookup(INODE_ROOT, "fiction").unwrap();
        assert_eq!(names(&drive.do_readdir(fiction.ino).unwrap()), set(&[".", "..", "short", "long", "a.txt", "b.txt"]));
    }

    #[test]
    fn test_symlinked_tag_is_listed_and_browsable() {
        let (_dir, drive) = mount(IndexBackend::Directory);
        let store = &drive.state.store;
        std::os::unix::fs::symlink(store.tag_dir("fiction"), store.tag_dir("novels")).unwrap();

        assert!(names(&drive.do_readdir(INODE_ROOT).unwrap()).contains("novels"));
        let novels = drive.do_lookup(INODE_ROOT, "novels").unwrap();
        assert!(matches!(novels.kind, FileType::Directory));
        assert!(drive.do_lookup(novels.ino, "a.txt").is_ok());
    }

    #[test]
    fn test_timestamps_keep_nanoseconds() {
        assert_eq!(to_time(1, 250_000_000), UNIX_EPOCH + Duration::from_millis(1250));
        assert_eq!(to_time(-1, 500_000_000), UNIX_EPOCH - Duration::from_millis(500));
        assert_eq!(to_time(-2, 0), UNIX_EPOCH - Duration::from_secs(2));
    }

    #[test]
    fn test_forget_prunes_inodes() {
        let (_dir, drive) = mount(IndexBackend::Directory);
        let fiction = drive.do_lookup(INODE_ROOT, "fiction").unwrap();
        drive.do_forget(fiction.ino, 1);
        assert_eq!(drive.do_getattr(fiction.ino).unwrap_err().errno(), libc::ENOENT);
        assert!(drive.do_lookup(INODE_ROOT, "fiction").is_ok());
    }
}
