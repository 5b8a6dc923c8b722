use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::store::Store;

/// get filesystem path for the index of a stored name
///
/// names can contain slashes for hierarchical names like "releases/1.0/app.tar.gz"
pub fn index_path(store: &Store, name: &str) -> Result<PathBuf> {
    validate_name(name)?;
    Ok(store.indexes_path().join(name))
}

/// check if an index exists for a name
pub fn name_exists(store: &Store, name: &str) -> bool {
    index_path(store, name).map(|p| p.is_file()).unwrap_or(false)
}

/// list all stored names
pub fn list_names(store: &Store) -> Result<Vec<String>> {
    let indexes_dir = store.indexes_path();
    let mut names = Vec::new();

    if indexes_dir.exists() {
        collect_names(&indexes_dir, &indexes_dir, &mut names)?;
    }

    names.sort();
    Ok(names)
}

/// list names matching a glob pattern
pub fn list_names_matching(store: &Store, pattern: &str) -> Result<Vec<String>> {
    let all_names = list_names(store)?;
    let glob = glob::Pattern::new(pattern).map_err(|e| Error::InvalidName(e.to_string()))?;

    Ok(all_names.into_iter().filter(|n| glob.matches(n)).collect())
}

/// recursively collect names from the index area
fn collect_names(base: &Path, dir: &Path, names: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let path = entry.path();

        if path.is_dir() {
            collect_names(base, &path, names)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                names.push(rel.to_string_lossy().to_string());
            }
        }
    }
    Ok(())
}

/// validate a stored name
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("empty name".to_string()));
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err(Error::InvalidName(format!(
            "name cannot start or end with '/': {}",
            name
        )));
    }

    if name.contains("//") {
        return Err(Error::InvalidName(format!(
            "name cannot contain '//': {}",
            name
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidName(format!(
            "name cannot contain null byte: {}",
            name
        )));
    }

    // check for path traversal
    for component in name.split('/') {
        if component == "." || component == ".." {
            return Err(Error::InvalidName(format!(
                "name cannot contain '.' or '..': {}",
                name
            )));
        }
    }

    Ok(())
}
