//! Persistent storage for path <-> file id records
//!
//! The registry appends one record per newly allocated id and reads all of
//! them back once at startup. Records are upserted, so replaying a record
//! that was already written is harmless.
//!
//! Paths are stored as their raw OS bytes; file names on disk need not be
//! valid UTF-8.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};

use crate::error::{IndexError, Result};
use crate::registry::FileId;

/// Key/value contract for persisting the file registry
pub trait RegistryStore: Send + Sync {
    /// Record that `path` owns `id`
    fn put(&self, path: &Path, id: FileId) -> Result<()>;

    /// Read every record back
    fn load_all(&self) -> Result<Vec<(PathBuf, FileId)>>;
}

/// SQLite-backed registry store
pub struct SqliteRegistryStore {
    conn: Mutex<Connection>,
}

impl SqliteRegistryStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Database living only as long as the process
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                path BLOB PRIMARY KEY,
                id   INTEGER NOT NULL UNIQUE
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RegistryStore for SqliteRegistryStore {
    fn put(&self, path: &Path, id: FileId) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO files (path, id) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET id = excluded.id",
            params![path.as_os_str().as_encoded_bytes(), id.index() as i64],
        )?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(PathBuf, FileId)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path, id FROM files ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            // Databases written before paths became blobs hold TEXT
            let path = match row.get_ref(0)? {
                ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
                other => {
                    return Err(rusqlite::Error::InvalidColumnType(
                        0,
                        "path".to_string(),
                        other.data_type(),
                    ))
                }
            };
            let id: i64 = row.get(1)?;
            Ok((path, id))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (bytes, id) = row?;
            let path = path_from_bytes(bytes)?;
            let id = u32::try_from(id).map_err(|_| IndexError::RegistryInvariant {
                message: format!("stored id {} for {} is out of range", id, path.display()),
            })?;
            out.push((path, FileId::new(id)));
        }
        Ok(out)
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> Result<PathBuf> {
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> Result<PathBuf> {
    String::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|e| IndexError::malformed(format!("stored path is not UTF-8: {}", e)))
}

/// In-memory store, mostly for tests and ephemeral daemons
#[derive(Default)]
pub struct MemoryRegistryStore {
    records: Mutex<Vec<(PathBuf, FileId)>>,
    fail_puts: Mutex<bool>,
    rejected: Mutex<HashSet<PathBuf>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `put` calls fail with an IO error
    pub fn set_failing(&self, failing: bool) {
        *self.fail_puts.lock() = failing;
    }

    /// Make every `put` of `path` fail until `rejected` is set back to false
    pub fn set_rejected(&self, path: &Path, rejected: bool) {
        let mut paths = self.rejected.lock();
        if rejected {
            paths.insert(path.to_path_buf());
        } else {
            paths.remove(path);
        }
    }

    /// Number of records written so far
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn put(&self, path: &Path, id: FileId) -> Result<()> {
        if *self.fail_puts.lock() || self.rejected.lock().contains(path) {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "registry store unavailable",
            )));
        }
        let mut records = self.records.lock();
        match records.iter_mut().find(|(p, _)| p == path) {
            Some(record) => record.1 = id,
            None => records.push((path.to_path_buf(), id)),
        }
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(PathBuf, FileId)>> {
        Ok(self.records.lock().clone())
    }
}
