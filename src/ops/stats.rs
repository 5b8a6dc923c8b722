//! store statistics

use std::collections::HashSet;

use crate::error::Result;
use crate::hash::Hash;
use crate::index::open_index;
use crate::names::list_names;
use crate::object::list_blobs;
use crate::store::Store;

/// store statistics
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_names: usize,
    pub total_blobs: usize,
    pub total_blobs_bytes: u64,
    /// members recorded across all indexes
    pub total_entries: u64,
    pub referenced_blobs: usize,
    pub unreferenced_blobs_bytes: u64,
}

/// collect store statistics
pub fn stats(store: &Store) -> Result<StoreStats> {
    let mut s = StoreStats::default();
    let mut referenced: HashSet<Hash> = HashSet::new();

    for name in list_names(store)? {
        s.total_names += 1;
        for record in open_index(store, &name)? {
            let record = record?;
            s.total_entries += 1;
            if let Some(hash) = record.content {
                referenced.insert(hash);
            }
        }
    }

    for (hash, size) in list_blobs(store)? {
        s.total_blobs += 1;
        s.total_blobs_bytes += size;
        if referenced.contains(&hash) {
            s.referenced_blobs += 1;
        } else {
            s.unreferenced_blobs_bytes += size;
        }
    }

    Ok(s)
}
