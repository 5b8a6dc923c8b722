use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{ContentHasher, Hash};
use crate::store::Store;

use walkdir::WalkDir;

const COPY_BUF: usize = 64 * 1024;

/// outcome of a blob write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PutOutcome {
    pub hash: Hash,
    /// bytes consumed from the reader
    pub size: u64,
    /// false if an identical blob was already present
    pub stored: bool,
}

/// write a blob with streaming content of unknown length
///
/// content is copied into a scratch file while being hashed, then installed
/// at its digest address only if nothing is there yet. the scratch copy is
/// removed in every case.
///
/// read errors from `reader` are returned untouched as `Error::Source`, so
/// callers can classify failures of the stream they handed in.
pub fn put_blob<R: Read + ?Sized>(store: &Store, reader: &mut R) -> Result<PutOutcome> {
    let tmp_path = store.scratch_path("blob");
    let result = put_via_scratch(store, reader, &tmp_path);

    // the scratch file is either hard-linked into place or a duplicate
    match fs::remove_file(&tmp_path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) if result.is_ok() => return Err(Error::Io { path: tmp_path, source: e }),
        Err(_) => {}
    }

    result
}

fn put_via_scratch<R: Read + ?Sized>(
    store: &Store,
    reader: &mut R,
    tmp_path: &Path,
) -> Result<PutOutcome> {
    let mut hasher = ContentHasher::new();
    let mut size = 0u64;
    {
        let mut tmp_file = File::create(tmp_path).with_path(tmp_path)?;
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Source(e)),
            };
            hasher.update(&buf[..n]);
            tmp_file.write_all(&buf[..n]).with_path(tmp_path)?;
            size += n as u64;
        }
        store.sync_file(&tmp_file, tmp_path)?;
    }

    let hash = hasher.finalize();

    let (dir, file) = hash.to_path_components();
    let blob_dir = store.blobs_path().join(&dir);
    let blob_path = blob_dir.join(&file);

    // cheap dedup check before touching the shard directory
    if blob_path.exists() {
        return Ok(PutOutcome { hash, size, stored: false });
    }

    fs::create_dir_all(&blob_dir).with_path(&blob_dir)?;

    // install-if-absent: link(2) fails atomically when the target exists
    let stored = match fs::hard_link(tmp_path, &blob_path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => false,
        Err(e) => {
            return Err(Error::Io {
                path: blob_path,
                source: e,
            })
        }
    };

    if stored {
        store.sync_dir(&blob_dir)?;
    }

    Ok(PutOutcome { hash, size, stored })
}

/// get the filesystem path to a blob
pub fn blob_path(store: &Store, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    store.blobs_path().join(dir).join(file)
}

/// check if a blob exists in the content store
pub fn blob_exists(store: &Store, hash: &Hash) -> bool {
    blob_path(store, hash).exists()
}

/// open a blob for reading
pub fn open_blob(store: &Store, hash: &Hash) -> Result<File> {
    let path = blob_path(store, hash);
    File::open(&path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::BlobNotFound(*hash)
        } else {
            Error::Io { path, source: e }
        }
    })
}

/// read blob content into a writer (streaming)
pub fn read_blob_to<W: Write + ?Sized>(store: &Store, hash: &Hash, writer: &mut W) -> Result<u64> {
    let path = blob_path(store, hash);
    let mut file = open_blob(store, hash)?;
    io::copy(&mut file, writer).with_path(&path)
}

/// re-hash a stored blob and compare against its address
pub fn verify_blob(store: &Store, hash: &Hash) -> Result<()> {
    let path = blob_path(store, hash);
    let mut file = open_blob(store, hash)?;

    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; COPY_BUF];
    loop {
        let n = file.read(&mut buf).with_path(&path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    if hasher.finalize() != *hash {
        return Err(Error::CorruptBlob(*hash));
    }
    Ok(())
}

/// every blob on disk with its size in bytes
///
/// files that do not sit at a digest address are skipped.
pub fn list_blobs(store: &Store) -> Result<Vec<(Hash, u64)>> {
    let dir = store.blobs_path();
    let mut blobs = Vec::new();

    if !dir.exists() {
        return Ok(blobs);
    }

    for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| Error::Io {
            path: dir.clone(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("walkdir error")),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let parent_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("");

        if let Ok(hash) = Hash::from_hex(&format!("{}{}", parent_name, file_name)) {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            blobs.push((hash, size));
        }
    }

    blobs.sort();
    Ok(blobs)
}
