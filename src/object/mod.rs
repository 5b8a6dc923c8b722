pub mod blob;

pub use blob::{
    blob_exists, blob_path, list_blobs, open_blob, put_blob, read_blob_to, verify_blob,
    PutOutcome,
};
