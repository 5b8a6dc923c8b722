use std::fs;

use tracing::info;

use crate::error::{IoResultExt, Result};
use crate::store::Store;

/// remove everything left in the scratch area
///
/// only safe while no ingestion is running against the store: in-flight
/// scratch files would be pulled out from under their writers.
pub fn clean_scratch(store: &Store) -> Result<usize> {
    let tmp = store.tmp_path();
    if !tmp.exists() {
        fs::create_dir_all(&tmp).with_path(&tmp)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(&tmp).with_path(&tmp)? {
        let path = entry.with_path(&tmp)?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).with_path(&path)?;
        } else {
            fs::remove_file(&path).with_path(&path)?;
        }
        removed += 1;
    }

    if removed > 0 {
        info!(removed, "cleaned scratch area");
    }
    Ok(removed)
}
