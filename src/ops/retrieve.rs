use std::io::{self, Read, Write};

use tracing::{debug, info, warn};

use crate::archive::ArchiveWriter;
use crate::error::{Error, Result};
use crate::index::{open_index, StoredIndex};
use crate::object::{blob_path, open_blob};
use crate::store::Store;
use crate::types::Compression;

/// a stored archive whose index is open and ready to replay
pub struct Retrieval<'a> {
    store: &'a Store,
    name: String,
    index: StoredIndex,
}

/// open the archive stored under `name`
///
/// fails with `NameNotFound` before anything is written, so callers can pick
/// a response before streaming.
pub fn open_archive<'a>(store: &'a Store, name: &str) -> Result<Retrieval<'a>> {
    let index = open_index(store, name)?;
    Ok(Retrieval {
        store,
        name: name.to_string(),
        index,
    })
}

/// stream the archive stored under `name` into `sink`
pub fn retrieve<W: Write>(store: &Store, name: &str, sink: W) -> Result<W> {
    open_archive(store, name)?.write_to(sink)
}

impl Retrieval<'_> {
    /// compression the archive was ingested with
    pub fn compression(&self) -> Compression {
        self.index.compression()
    }

    /// replay every member into `sink`, returning the sink once the
    /// compression framing is finalized
    ///
    /// a missing blob stops the stream with `BlobNotFound`. bytes already
    /// written stay written, but the trailer is never emitted, so the output
    /// cannot be mistaken for a complete archive.
    pub fn write_to<W: Write>(mut self, sink: W) -> Result<W> {
        let store = self.store;
        let mut writer = ArchiveWriter::new(sink, self.compression(), &store.config().output)
            .map_err(output_error)?;

        match self.replay(&mut writer) {
            Ok(entries) => {
                let sink = writer.finish().map_err(output_error)?;
                info!(name = %self.name, entries, "fetched archive");
                Ok(sink)
            }
            Err(e) => {
                writer.abort();
                warn!(name = %self.name, error = %e, "retrieval aborted");
                Err(e)
            }
        }
    }

    fn replay<W: Write>(&mut self, writer: &mut ArchiveWriter<W>) -> Result<u64> {
        let mut entries = 0;
        while let Some(record) = self.index.next_record()? {
            debug!(path = %record.entry.display_path(), "replaying entry");
            match &record.content {
                Some(hash) => {
                    let mut body = BlobBody {
                        inner: open_blob(self.store, hash)?,
                        remaining: record.entry.size,
                        short: false,
                        failed: false,
                    };
                    if let Err(e) = writer.append(&record.entry, &mut body) {
                        return Err(if body.short {
                            Error::CorruptBlob(*hash)
                        } else if body.failed {
                            Error::Io {
                                path: blob_path(self.store, hash),
                                source: e,
                            }
                        } else {
                            output_error(e)
                        });
                    }
                }
                None => writer
                    .append(&record.entry, io::empty())
                    .map_err(output_error)?,
            }
            entries += 1;
        }
        Ok(entries)
    }
}

/// blob reader that remembers whether a failure came from the blob side
struct BlobBody<R> {
    inner: R,
    remaining: u64,
    short: bool,
    failed: bool,
}

impl<R: Read> Read for BlobBody<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(0) if self.remaining > 0 && !buf.is_empty() => {
                self.short = true;
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("blob ended {} bytes short", self.remaining),
                ))
            }
            Ok(n) => {
                self.remaining = self.remaining.saturating_sub(n as u64);
                Ok(n)
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

fn output_error(e: io::Error) -> Error {
    Error::Io {
        path: "<output>".into(),
        source: e,
    }
}
