//! compressed tar streams in and out of the store

mod read;
mod write;

pub use read::{classify_read_error, open_archive_stream, ArchiveStream};
pub use write::ArchiveWriter;
