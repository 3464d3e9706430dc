// FILE: src/core/inode_store.rs
//! Inode table for the virtual tree.
//!
//! Every node is named by its logical path (tag segments, optionally ending
//! in a display name). Inode numbers are a stable hash of that path, so
//! `readdir` can report the same number `lookup` will later hand out
//! without registering anything.

use dashmap::DashMap;

pub const INODE_ROOT: u64 = 1;

/// Hashed inodes never fall below this.
const FIRST_DYNAMIC_INODE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub segments: Vec<String>,
    pub lookups: u64,
}

pub struct InodeStore {
    nodes: DashMap<u64, Node>,
}

impl Default for InodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeStore {
    pub fn new() -> Self {
        let nodes = DashMap::new();
        nodes.insert(INODE_ROOT, Node { segments: Vec::new(), lookups: 1 });
        Self { nodes }
    }

    /// STABLE FNV-1a HASHING
    /// The same logical path yields the same inode across readdir() and lookup().
    pub fn path_to_inode(segments: &[String]) -> u64 {
        const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        if segments.is_empty() {
            return INODE_ROOT;
        }

        let mut hash = FNV_OFFSET_BASIS;
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                hash ^= b'/' as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
            for byte in segment.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }

        // Keep clear of the root and other reserved low numbers
        hash.max(FIRST_DYNAMIC_INODE)
    }

    pub fn child_segments(&self, parent: u64, name: &str) -> Option<Vec<String>> {
        let node = self.nodes.get(&parent)?;
        let mut segments = node.segments.clone();
        segments.push(name.to_string());
        Some(segments)
    }

    pub fn segments(&self, inode: u64) -> Option<Vec<String>> {
        self.nodes.get(&inode).map(|n| n.segments.clone())
    }

    /// Record one kernel lookup of `segments`, returning its inode.
    pub fn remember(&self, segments: Vec<String>) -> u64 {
        let inode = Self::path_to_inode(&segments);
        let mut entry = self.nodes.entry(inode).or_insert_with(|| Node { segments: Vec::new(), lookups: 0 });
        if entry.segments != segments {
            if entry.lookups > 0 {
                tracing::warn!("[InodeStore] Inode {} collision: {:?} replaces {:?}", inode, segments, entry.segments);
            }
            entry.segments = segments;
            entry.lookups = 0;
        }
        entry.lookups += 1;
        inode
    }

    /// Drop `nlookup` references; the node is pruned once none remain.
    pub fn forget(&self, inode: u64, nlookup: u64) {
        if inode == INODE_ROOT {
            return;
        }
        let remove = match self.nodes.get_mut(&inode) {
            Some(mut node) => {
                node.lookups = node.lookups.saturating_sub(nlookup);
                node.lookups == 0
            }
            None => false,
        };
        if remove {
            self.nodes.remove(&inode);
            tracing::trace!("[InodeStore] Pruned inode {}", inode);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
