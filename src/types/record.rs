use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::types::EntryMeta;

/// one archive member in index order: metadata plus the content reference
/// for regular files
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub entry: EntryMeta,
    pub content: Option<Hash>,
}

impl IndexRecord {
    pub fn new(entry: EntryMeta, content: Option<Hash>) -> Self {
        Self { entry, content }
    }
}

/// compression wrapping the tar stream, sniffed on ingest and reproduced on
/// retrieval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Gzip,
    Zstd,
}

impl Compression {
    /// detect compression from the leading magic bytes
    pub fn sniff(magic: &[u8]) -> Option<Self> {
        if magic.starts_with(&[0x1f, 0x8b]) {
            Some(Compression::Gzip)
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Compression::Zstd)
        } else {
            None
        }
    }

    /// MIME type of the compressed stream
    pub fn content_type(&self) -> &'static str {
        match self {
            Compression::Gzip => "application/gzip",
            Compression::Zstd => "application/zstd",
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff() {
        assert_eq!(Compression::sniff(&[0x1f, 0x8b, 0x08]), Some(Compression::Gzip));
        assert_eq!(
            Compression::sniff(&[0x28, 0xb5, 0x2f, 0xfd, 0x00]),
            Some(Compression::Zstd)
        );
        assert_eq!(Compression::sniff(b"ustar"), None);
        assert_eq!(Compression::sniff(&[0x1f]), None);
        assert_eq!(Compression::sniff(&[]), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Compression::Gzip.to_string(), "gzip");
        assert_eq!(Compression::Zstd.content_type(), "application/zstd");
    }
}
