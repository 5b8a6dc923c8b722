use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::archive::{classify_read_error, open_archive_stream};
use crate::error::{Error, IoResultExt, Result};
use crate::index::{install_index, IndexWriter};
use crate::names::validate_name;
use crate::object::put_blob;
use crate::store::Store;
use crate::types::{Compression, EntryMeta, IndexRecord};

/// summary of one successful ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub compression: Compression,
    /// archive members recorded in the index
    pub entries: u64,
    pub regular_files: u64,
    /// blobs that were not already in the store
    pub blobs_stored: u64,
    /// content bytes read across all regular files
    pub bytes: u64,
}

/// store a compressed tar stream under `name`
///
/// the index for `name` is replaced only if the whole stream parses; on any
/// failure the previous index (if any) stays in place. blobs written before
/// the failure are kept.
pub fn ingest<R: Read>(store: &Store, name: &str, input: R) -> Result<IngestReport> {
    validate_name(name)?;
    let _lock = store.lock_name(name)?;

    let scratch = store.scratch_path("index");
    let result = write_index(store, input, &scratch)
        .and_then(|report| install_index(store, name, &scratch).map(|()| report));

    match result {
        Ok(report) => {
            info!(
                name,
                compression = %report.compression,
                entries = report.entries,
                blobs_stored = report.blobs_stored,
                bytes = report.bytes,
                "stored archive"
            );
            Ok(report)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(&scratch) {
                if rm.kind() != io::ErrorKind::NotFound {
                    warn!(path = %scratch.display(), error = %rm, "failed to remove scratch index");
                }
            }
            warn!(name, error = %e, "ingestion aborted");
            Err(e)
        }
    }
}

fn write_index<R: Read>(store: &Store, input: R, scratch: &Path) -> Result<IngestReport> {
    let mut stream = open_archive_stream(input)?;
    let compression = stream.compression;

    let file = File::create(scratch).with_path(scratch)?;
    let mut index = IndexWriter::new(BufWriter::new(file), compression)?;

    let mut report = IngestReport {
        compression,
        entries: 0,
        regular_files: 0,
        blobs_stored: 0,
        bytes: 0,
    };

    for entry in stream.archive.entries().map_err(classify_read_error)? {
        let mut entry = entry.map_err(classify_read_error)?;
        let meta = EntryMeta::from_entry(&mut entry).map_err(classify_read_error)?;

        let content = if meta.has_content() {
            let outcome = put_blob(store, &mut entry).map_err(|e| match e {
                Error::Source(e) => classify_read_error(e),
                other => other,
            })?;

            if outcome.size != meta.size {
                return Err(Error::Parse(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{}: body has {} bytes, header declares {}",
                        meta.display_path(),
                        outcome.size,
                        meta.size
                    ),
                )));
            }

            report.regular_files += 1;
            report.bytes += outcome.size;
            if outcome.stored {
                report.blobs_stored += 1;
            }
            Some(outcome.hash)
        } else {
            None
        };

        debug!(
            path = %meta.display_path(),
            kind = meta.kind().type_name(),
            size = meta.size,
            "recorded entry"
        );
        index.push(&IndexRecord::new(meta, content))?;
        report.entries += 1;
    }

    let writer = index.finish()?;
    let file = writer
        .into_inner()
        .map_err(|e| Error::Io {
            path: scratch.to_path_buf(),
            source: e.into_error(),
        })?;
    store.sync_file(&file, scratch)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::compute_hash;
    use crate::index::open_index;
    use crate::names::list_names;
    use crate::ops::fixtures::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use walkdir::WalkDir;

    fn count_blobs(store: &Store) -> usize {
        WalkDir::new(store.blobs_path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    fn records(store: &Store, name: &str) -> Vec<IndexRecord> {
        open_index(store, name)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_pair_shares_one_blob() {
        let (_dir, store) = test_store();

        let report = ingest(&store, "pair.tar.gz", &pair_tar_gz()[..]).unwrap();
        assert_eq!(report.compression, Compression::Gzip);
        assert_eq!(report.entries, 2);
        assert_eq!(report.regular_files, 2);
        assert_eq!(report.blobs_stored, 1);
        assert_eq!(report.bytes, 10);
        assert_eq!(count_blobs(&store), 1);

        let records = records(&store, "pair.tar.gz");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entry.path, b"a.txt");
        assert_eq!(records[1].entry.path, b"b.txt");
        assert_eq!(records[0].content, Some(compute_hash(b"hello")));
        assert_eq!(records[1].content, records[0].content);
        // the fixture leaves uid, gid and owner names blank
        assert_eq!(records[0].entry.uid, 0);
        assert_eq!(records[0].entry.gid, 0);
    }

    #[test]
    fn test_dedup_across_names() {
        let (_dir, store) = test_store();

        ingest(&store, "one.tgz", &pair_tar_gz()[..]).unwrap();
        let report = ingest(&store, "two.tgz", &pair_tar_gz()[..]).unwrap();

        assert_eq!(report.blobs_stored, 0);
        assert_eq!(count_blobs(&store), 1);
        assert_eq!(list_names(&store).unwrap(), vec!["one.tgz", "two.tgz"]);
    }

    #[test]
    fn test_non_regular_entries_have_no_content() {
        let (_dir, store) = test_store();

        let archive = gzip(&tar_with(|b| {
            add_dir(b, "pkg");
            add_symlink(b, "pkg/latest", "v1");
            add_file(b, "pkg/v1", b"data");
        }));
        let report = ingest(&store, "mixed.tgz", &archive[..]).unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.regular_files, 1);

        let records = records(&store, "mixed.tgz");
        assert!(records[0].content.is_none());
        assert!(records[1].content.is_none());
        assert_eq!(records[1].entry.link_name.as_deref(), Some(&b"v1"[..]));
        assert_eq!(records[2].content, Some(compute_hash(b"data")));
    }

    #[test]
    fn test_zstd_input() {
        let (_dir, store) = test_store();

        let archive = zstd_encode(&tar_with(|b| add_file(b, "z.txt", b"zstd body")));
        let report = ingest(&store, "z.tar.zst", &archive[..]).unwrap();

        assert_eq!(report.compression, Compression::Zstd);
        assert_eq!(open_index(&store, "z.tar.zst").unwrap().compression(), Compression::Zstd);
    }

    #[test]
    fn test_name_replacement() {
        let (_dir, store) = test_store();

        ingest(&store, "app.tgz", &pair_tar_gz()[..]).unwrap();
        let replacement = gzip(&tar_with(|b| add_file(b, "only.txt", b"new")));
        ingest(&store, "app.tgz", &replacement[..]).unwrap();

        let records = records(&store, "app.tgz");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry.path, b"only.txt");
    }

    #[test]
    fn test_malformed_input_keeps_prior_index() {
        let (_dir, store) = test_store();

        ingest(&store, "app.tgz", &pair_tar_gz()[..]).unwrap();

        let bad = gzip(&[0x42u8; 1024]);
        let err = ingest(&store, "app.tgz", &bad[..]).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));

        let err = ingest(&store, "app.tgz", &b"plain text"[..]).unwrap_err();
        assert!(matches!(err, Error::Decompression(_)));

        // valid members followed by a truncated body
        let mut truncated = tar_with(|b| {
            add_file(b, "first.txt", b"fine");
            add_file(b, "second.bin", &[9u8; 4096]);
        });
        truncated.truncate(512 * 3 + 100);
        let err = ingest(&store, "app.tgz", &gzip(&truncated)[..]).unwrap_err();
        assert!(err.is_bad_input());

        let records = records(&store, "app.tgz");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entry.path, b"a.txt");

        // no scratch files left behind
        assert_eq!(fs::read_dir(store.tmp_path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_first_ingest_installs_nothing() {
        let (_dir, store) = test_store();

        assert!(ingest(&store, "never.tgz", &b"\x1f\x8bgarbage"[..]).is_err());
        assert!(matches!(
            open_index(&store, "never.tgz"),
            Err(Error::NameNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_name() {
        let (_dir, store) = test_store();

        let err = ingest(&store, "../escape", &pair_tar_gz()[..]).unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }

    #[test]
    fn test_ingest_waits_for_name_lock() {
        let (_dir, store) = test_store();
        let archive = pair_tar_gz();

        let guard = store.lock_name("locked.tgz").unwrap();
        let (tx, rx) = mpsc::channel();

        std::thread::scope(|s| {
            let (store, archive) = (&store, &archive);
            s.spawn(move || {
                let result = ingest(store, "locked.tgz", &archive[..]);
                tx.send(result.is_ok()).unwrap();
            });

            std::thread::sleep(Duration::from_millis(200));
            assert!(rx.try_recv().is_err(), "ingest ran while the lock was held");

            drop(guard);
            assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
        });

        assert_eq!(records(&store, "locked.tgz").len(), 2);
    }
}
