//! Reconciliation between the on-disk links and the relational index.
//!
//! The query path tolerates drift (missing records simply don't show up);
//! these tools find it and repair it.

use crate::error::Result;
use crate::storage::{ContentStore, Link, MetadataIndex, SqlIndex};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InconsistencyKind {
    /// A link exists on disk with no matching `file_tag` row.
    LinkWithoutRecord,
    /// A `file_tag` row exists with no link on disk.
    RecordWithoutLink,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Inconsistency {
    pub kind: InconsistencyKind,
    pub link: Link,
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let what = match self.kind {
            InconsistencyKind::LinkWithoutRecord => "link without record",
            InconsistencyKind::RecordWithoutLink => "record without link",
        };
        write!(f, "{}: {}/{} ({})", what, self.link.tag, self.link.display_name, self.link.hash)
    }
}

pub fn verify(store: &ContentStore, sql: &SqlIndex) -> Result<Vec<Inconsistency>> {
    let on_disk: BTreeSet<Link> = store.links()?.into_iter().collect();
    let recorded: BTreeSet<Link> = sql.associations()?.into_iter().collect();

    let mut found: Vec<Inconsistency> = on_disk
        .difference(&recorded)
        .map(|link| Inconsistency { kind: InconsistencyKind::LinkWithoutRecord, link: link.clone() })
        .chain(
            recorded
                .difference(&on_disk)
                .map(|link| Inconsistency { kind: InconsistencyKind::RecordWithoutLink, link: link.clone() }),
        )
        .collect();
    found.sort();

    for item in &found {
        tracing::warn!("[Reconcile] {}", item);
    }
    Ok(found)
}

/// Record every on-disk link in the relational index. Returns the number of
/// links seen; already-recorded links are left as they are.
pub fn reindex(store: &ContentStore, sql: &SqlIndex) -> Result<usize> {
    // Tags with no files yet still exist as directories
    for tag in store.list_tags()? {
        sql.ensure_tag(&tag?)?;
    }

    let links = store.links()?;
    for link in &links {
        sql.record(&link.display_name, &link.hash, &link.tag)?;
    }
    tracing::info!("[Reconcile] Reindexed {} links", links.len());
    Ok(links.len())
}
