mod entry;
mod raw_bytes;
mod record;

pub use entry::{DeviceNumbers, EntryKind, EntryMeta, PaxRecord};
pub use record::{Compression, IndexRecord};
