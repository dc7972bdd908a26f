//! Path canonicalization and on-disk layout of the data directory
//!
//! Every path that enters the index goes through [`canonicalize`] so that two
//! different spellings of the same file never get two file ids.

use std::path::{Component, Path, PathBuf};

use crate::error::{IndexError, Result};

// FNV-1a constants for 64-bit hash
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Compute a stable FNV-1a hash
pub fn fnv1a_hash(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Resolve a path string, treating relative paths as relative to CWD.
pub fn resolve_path_or_cwd(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir().map_err(|e| IndexError::NotFound {
            what: format!("current directory: {}", e),
        })?;
        Ok(cwd.join(path))
    }
}

/// Canonicalize a path.
///
/// Existing files are resolved through the file system (symlinks included).
/// Paths that do not exist yet are made absolute and normalized lexically,
/// so a file that is deleted and recreated keeps the same key.
pub fn canonicalize(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(IndexError::malformed("empty path"));
    }
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Ok(resolved);
    }
    let absolute = resolve_path_or_cwd(path)?;
    Ok(normalize_lexically(&absolute))
}

/// Remove `.` and `..` segments without touching the file system
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `/..` stays `/`
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out
}

/// Default data directory (`~/.cindex`)
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".cindex")
}

/// Directory holding serialized units
pub fn ast_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("ast")
}

/// SQLite file holding the path <-> id records
pub fn registry_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("files.sqlite")
}

/// Deterministic location of the serialized unit for `source`
pub fn ast_file_for(ast_dir: &Path, source: &Path) -> PathBuf {
    let hash = fnv1a_hash(source.as_os_str().as_encoded_bytes());
    ast_dir.join(format!("{:016x}.ast", hash))
}

/// Sidecar metadata written next to the serialized unit
pub fn ast_meta_for(ast_dir: &Path, source: &Path) -> PathBuf {
    ast_file_for(ast_dir, source).with_extension("meta.json")
}
