//! tarvault - content-addressed tarball store
//!
//! stores compressed tar archives by name, keeping each regular file's content
//! once no matter how many archives (or members of one archive) carry it. an
//! archive is reproduced on demand from its index and the shared blobs.
//!
//! # Core concepts
//!
//! - **Blob**: the body of a regular file, addressed by its SHA-256 digest
//! - **Index**: the ordered member list of one archive (CBOR frames), with a
//!   blob reference for every regular file
//! - **Name**: the key an archive is stored under (hierarchical, like paths)
//!
//! # Example usage
//!
//! ```no_run
//! use std::fs::File;
//! use std::path::Path;
//! use tarvault::{ops, Store};
//!
//! let store = Store::open_or_init(Path::new("/var/lib/tarvault")).unwrap();
//!
//! // store a tarball
//! let input = File::open("app.tar.gz").unwrap();
//! ops::ingest(&store, "releases/app.tar.gz", input).unwrap();
//!
//! // get an equivalent tarball back
//! let output = File::create("copy.tar.gz").unwrap();
//! ops::retrieve(&store, "releases/app.tar.gz", output).unwrap();
//! ```

mod config;
mod error;
mod hash;
mod names;
mod object;
mod store;

pub mod archive;
pub mod index;
pub mod ops;
#[cfg(feature = "server")]
pub mod server;
pub mod types;

pub use config::{Config, OutputConfig, StorageConfig};
pub use error::{Error, IoResultExt, Result};
pub use hash::{compute_hash, ContentHasher, Hash};
pub use names::{index_path, list_names, list_names_matching, name_exists, validate_name};
pub use object::{
    blob_exists, blob_path, list_blobs, open_blob, put_blob, read_blob_to, verify_blob, PutOutcome,
};
pub use store::{NameLock, Store};
pub use types::{Compression, DeviceNumbers, EntryKind, EntryMeta, IndexRecord, PaxRecord};
