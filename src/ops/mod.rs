//! high-level operations on tarvault stores

mod fsck;
mod ingest;
mod retrieve;
mod scratch;
mod stats;

#[cfg(test)]
pub(crate) mod fixtures;

pub use fsck::{fsck, CorruptIndex, FsckReport, MissingBlob};
pub use ingest::{ingest, IngestReport};
pub use retrieve::{open_archive, retrieve, Retrieval};
pub use scratch::clean_scratch;
pub use stats::{stats, StoreStats};
