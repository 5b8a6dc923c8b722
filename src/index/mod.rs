//! named archive indexes: on-disk placement plus the streaming codec

mod codec;

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;

pub use codec::{IndexHeader, IndexReader, IndexWriter, INDEX_MAGIC, INDEX_VERSION};

use crate::error::{Error, IoResultExt, Result};
use crate::names::index_path;
use crate::store::Store;

/// index reader over a stored index file
pub type StoredIndex = IndexReader<BufReader<File>>;

/// open the index stored under `name` for lazy decoding
pub fn open_index(store: &Store, name: &str) -> Result<StoredIndex> {
    let path = index_path(store, name)?;

    let file = File::open(&path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NameNotFound(name.to_string())
        } else {
            Error::Io {
                path: path.clone(),
                source: e,
            }
        }
    })?;

    // a directory here means `name` is only a prefix of other names
    if file.metadata().with_path(&path)?.is_dir() {
        return Err(Error::NameNotFound(name.to_string()));
    }

    IndexReader::with_origin(BufReader::new(file), path)
}

/// atomically install a fully written scratch index under `name`
///
/// replaces any previous index for `name` in a single rename.
pub fn install_index(store: &Store, name: &str, scratch: &Path) -> Result<()> {
    let path = index_path(store, name)?;

    let parent = match path.parent() {
        Some(parent) => parent.to_path_buf(),
        None => store.indexes_path(),
    };
    fs::create_dir_all(&parent).with_path(&parent)?;

    fs::rename(scratch, &path).with_path(&path)?;
    store.sync_dir(&parent)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Compression;
    use std::io::BufWriter;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::init(&dir.path().join("store")).unwrap();
        (dir, store)
    }

    fn write_scratch(store: &Store, compression: Compression) -> std::path::PathBuf {
        let scratch = store.scratch_path("index");
        let file = File::create(&scratch).unwrap();
        IndexWriter::new(BufWriter::new(file), compression)
            .unwrap()
            .finish()
            .unwrap();
        scratch
    }

    #[test]
    fn test_install_and_open() {
        let (_dir, store) = test_store();

        let scratch = write_scratch(&store, Compression::Zstd);
        install_index(&store, "nested/app.tar.zst", &scratch).unwrap();

        assert!(!scratch.exists());
        let index = open_index(&store, "nested/app.tar.zst").unwrap();
        assert_eq!(index.compression(), Compression::Zstd);
    }

    #[test]
    fn test_install_replaces() {
        let (_dir, store) = test_store();

        install_index(&store, "app.tgz", &write_scratch(&store, Compression::Gzip)).unwrap();
        install_index(&store, "app.tgz", &write_scratch(&store, Compression::Zstd)).unwrap();

        let index = open_index(&store, "app.tgz").unwrap();
        assert_eq!(index.compression(), Compression::Zstd);
    }

    #[test]
    fn test_open_missing() {
        let (_dir, store) = test_store();

        assert!(matches!(
            open_index(&store, "never.tar.gz"),
            Err(Error::NameNotFound(_))
        ));
    }

    #[test]
    fn test_open_prefix_directory_is_not_found() {
        let (_dir, store) = test_store();

        install_index(&store, "a/b.tgz", &write_scratch(&store, Compression::Gzip)).unwrap();
        assert!(matches!(open_index(&store, "a"), Err(Error::NameNotFound(_))));
    }
}
