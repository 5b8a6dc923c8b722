use std::path::PathBuf;

use crate::Hash;

/// error type for tarvault operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store not found at {0}")]
    NoStore(PathBuf),

    #[error("store already exists at {0}")]
    StoreExists(PathBuf),

    #[error("archive not found: {0}")]
    NameNotFound(String),

    #[error("missing content: blob {0} not found")]
    BlobNotFound(Hash),

    #[error("invalid archive name: {0}")]
    InvalidName(String),

    #[error("corrupt blob: content of {0} does not match its hash")]
    CorruptBlob(Hash),

    #[error("decompression failed: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("malformed archive: {0}")]
    Parse(#[source] std::io::Error),

    #[error("corrupt index at record {record}: {message}")]
    Decode { record: u64, message: String },

    #[error("failed to read incoming stream: {0}")]
    Source(#[source] std::io::Error),

    #[error("integrity check failed: {0}")]
    IntegrityCheck(String),

    #[error("lock contention on {0}")]
    LockContention(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),
}

impl Error {
    /// true for a missing archive name or a missing blob
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NameNotFound(_) | Error::BlobNotFound(_))
    }

    /// true when the caller sent a stream we could not understand
    pub fn is_bad_input(&self) -> bool {
        matches!(
            self,
            Error::Decompression(_) | Error::Parse(_) | Error::InvalidName(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
