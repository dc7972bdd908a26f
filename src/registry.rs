//! File registry: the bijection between canonical paths and file ids
//!
//! # Thread Safety
//!
//! - One `RwLock` guards both maps and the id counter, so they can never be
//!   observed out of step with each other
//! - Lookups take the shared lock
//! - `insert` holds the exclusive lock only for check-then-allocate; the
//!   store write happens after the lock is released
//!
//! Ids start at 1 and are never reused. Id 0 is the "no file" id, which is
//! what makes the null [`Location`](crate::location::Location) all zeros.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::registry_store::RegistryStore;

/// Dense identifier of a canonical file path
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(u32);

impl FileId {
    /// The reserved invalid id
    pub const INVALID: FileId = FileId(0);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

impl From<u32> for FileId {
    #[inline]
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[derive(Default)]
struct RegistryMaps {
    path_to_id: HashMap<PathBuf, FileId>,
    id_to_path: HashMap<FileId, PathBuf>,
    last_id: u32,
}

/// Process-wide path <-> id registry, shared as `Arc<FileRegistry>`
pub struct FileRegistry {
    maps: RwLock<RegistryMaps>,
    store: Option<Arc<dyn RegistryStore>>,
    /// Records whose store write failed; retried on later inserts.
    /// Never held across a store call.
    unpersisted: Mutex<Vec<(PathBuf, FileId)>>,
}

impl FileRegistry {
    /// Registry without persistence
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(RegistryMaps::default()),
            store: None,
            unpersisted: Mutex::new(Vec::new()),
        }
    }

    /// Registry that writes every new id to `store`
    pub fn with_store(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            maps: RwLock::new(RegistryMaps::default()),
            store: Some(store),
            unpersisted: Mutex::new(Vec::new()),
        }
    }

    /// Seed the registry from its store. Must run before any command is served.
    pub fn load_from_store(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let entries = store.load_all()?;
        let max_id = entries.iter().map(|(_, id)| id.index()).max().unwrap_or(0);
        let count = entries.len();
        self.bulk_load(entries, max_id)?;
        tracing::info!("Loaded {} file ids (max id {})", count, max_id);
        Ok(count)
    }

    /// Replace the registry contents with persisted state
    pub fn bulk_load(&self, entries: Vec<(PathBuf, FileId)>, max_id: u32) -> Result<()> {
        let mut maps = RegistryMaps {
            last_id: max_id,
            ..RegistryMaps::default()
        };
        for (path, id) in entries {
            if !id.is_valid() || id.index() > max_id {
                return Err(IndexError::RegistryInvariant {
                    message: format!("{} for {} is outside 1..={}", id, path.display(), max_id),
                });
            }
            if let Some(other) = maps.id_to_path.insert(id, path.clone()) {
                return Err(IndexError::RegistryInvariant {
                    message: format!(
                        "{} assigned to both {} and {}",
                        id,
                        other.display(),
                        path.display()
                    ),
                });
            }
            if let Some(other) = maps.path_to_id.insert(path.clone(), id) {
                return Err(IndexError::RegistryInvariant {
                    message: format!("{} has both {} and {}", path.display(), other, id),
                });
            }
        }
        *self.maps.write() = maps;
        Ok(())
    }

    /// Return the id of `path`, allocating and persisting a new one if needed.
    ///
    /// A failed store write is reported, but the id stays allocated in memory
    /// and the record is retried by later inserts.
    pub fn insert(&self, path: &Path) -> Result<FileId> {
        if let Some(id) = self.id_for(path) {
            if self.pending_writes() > 0 {
                if let Err(e) = self.flush_pending() {
                    tracing::warn!("Registry store still unavailable: {}", e);
                }
            }
            return Ok(id);
        }

        let mut maps = self.maps.write();
        if let Some(&id) = maps.path_to_id.get(path) {
            // Lost the race to another inserter; the winner persists
            return Ok(id);
        }
        let next = maps
            .last_id
            .checked_add(1)
            .ok_or_else(|| IndexError::RegistryInvariant {
                message: "file id space exhausted".to_string(),
            })?;
        let id = FileId::new(next);
        if let Some(existing) = maps.id_to_path.get(&id) {
            tracing::error!(
                "Registry divergence: {} already maps to {} while allocating for {}",
                id,
                existing.display(),
                path.display()
            );
            return Err(IndexError::RegistryInvariant {
                message: format!("{} allocated twice", id),
            });
        }
        maps.last_id = next;
        maps.path_to_id.insert(path.to_path_buf(), id);
        maps.id_to_path.insert(id, path.to_path_buf());
        drop(maps);

        self.persist(path, id)?;
        Ok(id)
    }

    /// Write the record for `id`. Only this record's write decides the
    /// result; earlier failures are retried but do not fail this insert.
    fn persist(&self, path: &Path, id: FileId) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if let Err(e) = store.put(path, id) {
            tracing::error!("Failed to persist {} for {}: {}", id, path.display(), e);
            self.unpersisted.lock().push((path.to_path_buf(), id));
            return Err(e);
        }
        if self.pending_writes() > 0 {
            if let Err(e) = self.flush_pending() {
                tracing::warn!("Registry store still rejects earlier records: {}", e);
            }
        }
        Ok(())
    }

    /// Retry store writes that failed earlier.
    ///
    /// Every pending record is attempted; the ones that fail again stay
    /// queued and the first error is returned.
    pub fn flush_pending(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let pending = std::mem::take(&mut *self.unpersisted.lock());
        if pending.is_empty() {
            return Ok(());
        }

        let mut first_err = None;
        let mut still_pending = Vec::new();
        for (path, id) in pending {
            if let Err(e) = store.put(&path, id) {
                tracing::debug!("Retry of {} for {} failed: {}", id, path.display(), e);
                still_pending.push((path, id));
                first_err.get_or_insert(e);
            }
        }
        if !still_pending.is_empty() {
            self.unpersisted.lock().extend(still_pending);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of records not yet written to the store
    pub fn pending_writes(&self) -> usize {
        self.unpersisted.lock().len()
    }

    pub fn id_for(&self, path: &Path) -> Option<FileId> {
        self.maps.read().path_to_id.get(path).copied()
    }

    pub fn path_for(&self, id: FileId) -> Option<PathBuf> {
        self.maps.read().id_to_path.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.maps.read().id_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest id handed out so far
    pub fn last_id(&self) -> FileId {
        FileId::new(self.maps.read().last_id)
    }

    /// Snapshot of all records, sorted by id (discovery order)
    pub fn entries(&self) -> Vec<(FileId, PathBuf)> {
        let maps = self.maps.read();
        let mut out: Vec<_> = maps
            .id_to_path
            .iter()
            .map(|(id, path)| (*id, path.clone()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Check that both maps describe the same bijection
    pub fn verify(&self) -> Result<()> {
        let maps = self.maps.read();
        if maps.path_to_id.len() != maps.id_to_path.len() {
            return Err(IndexError::RegistryInvariant {
                message: format!(
                    "{} paths but {} ids",
                    maps.path_to_id.len(),
                    maps.id_to_path.len()
                ),
            });
        }
        for (id, path) in &maps.id_to_path {
            if maps.path_to_id.get(path) != Some(id) || id.index() > maps.last_id {
                return Err(IndexError::RegistryInvariant {
                    message: format!("{} -> {} is not mirrored", id, path.display()),
                });
            }
        }
        Ok(())
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
