use std::collections::HashSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::index::open_index;
use crate::names::list_names;
use crate::object::{blob_exists, list_blobs, verify_blob};
use crate::store::Store;

/// fsck report
#[derive(Debug, Default)]
pub struct FsckReport {
    /// blobs re-hashed
    pub blobs_checked: usize,
    /// indexes decoded end to end
    pub indexes_checked: usize,
    /// blobs whose content no longer matches their address
    pub corrupt_blobs: Vec<Hash>,
    /// indexes that failed to decode
    pub corrupt_indexes: Vec<CorruptIndex>,
    /// referenced blobs that are not in the store
    pub missing_blobs: Vec<MissingBlob>,
    /// blobs no index refers to
    pub unreferenced_blobs: usize,
}

impl FsckReport {
    pub fn is_ok(&self) -> bool {
        self.corrupt_blobs.is_empty()
            && self.corrupt_indexes.is_empty()
            && self.missing_blobs.is_empty()
    }
}

#[derive(Debug)]
pub struct CorruptIndex {
    pub name: String,
    pub message: String,
}

#[derive(Debug)]
pub struct MissingBlob {
    pub hash: Hash,
    /// stored name whose index refers to the blob
    pub name: String,
    /// member path inside that archive
    pub path: String,
}

/// verify store integrity
pub fn fsck(store: &Store) -> Result<FsckReport> {
    let mut report = FsckReport::default();
    let mut referenced = HashSet::new();

    for name in list_names(store)? {
        report.indexes_checked += 1;
        if let Err(e) = check_index(store, &name, &mut referenced, &mut report) {
            match e {
                Error::Decode { .. } => report.corrupt_indexes.push(CorruptIndex {
                    name,
                    message: e.to_string(),
                }),
                e => return Err(e),
            }
        }
    }

    for (hash, _) in list_blobs(store)? {
        report.blobs_checked += 1;
        match verify_blob(store, &hash) {
            Ok(()) => {}
            Err(Error::CorruptBlob(hash)) => report.corrupt_blobs.push(hash),
            Err(e) => return Err(e),
        }

        if !referenced.contains(&hash) {
            report.unreferenced_blobs += 1;
        }
    }

    Ok(report)
}

fn check_index(
    store: &Store,
    name: &str,
    referenced: &mut HashSet<Hash>,
    report: &mut FsckReport,
) -> Result<()> {
    debug!(name, "checking index");

    for record in open_index(store, name)? {
        let record = record?;
        let Some(hash) = record.content else {
            continue;
        };

        referenced.insert(hash);
        if !blob_exists(store, &hash) {
            report.missing_blobs.push(MissingBlob {
                hash,
                name: name.to_string(),
                path: record.entry.display_path().into_owned(),
            });
        }
    }

    Ok(())
}
