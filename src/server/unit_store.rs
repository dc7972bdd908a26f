//! Translation-unit store
//!
//! Owns every live parsed unit, keyed by canonical path, and is the only
//! place that calls [`UnitParser::dispose`].
//!
//! # Locking
//!
//! ```text
//! slots: RwLock<HashMap<PathBuf, Arc<UnitSlot>>>   held only to find/insert/remove a slot
//!   UnitSlot::parse_lock: Mutex<()>                held for the whole parse of one path
//!   UnitSlot::state:      Mutex<SlotState>         held only to read or swap the entry
//! ```
//!
//! Parsing never holds `slots` or `state`: the parser runs against the path
//! alone and its result is swapped in under `state`. `parse_lock` serialises
//! parses of the same path and blocks removal while one is in flight, but
//! unrelated paths never contend.
//!
//! Always acquire in the order `slots` -> `parse_lock` -> `state`, and never
//! take `slots` while holding either slot lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::parser::{Diagnostics, ParseOptions, UnitParser};
use crate::paths;
use crate::registry::{FileId, FileRegistry};

/// A live parsed unit and what it was built from
pub struct UnitEntry<U> {
    pub unit: U,
    pub compiler_flags: Vec<String>,
    pub options: ParseOptions,
    /// Source modification time observed just before parsing
    pub source_mtime: Option<SystemTime>,
    pub parsed_at: DateTime<Utc>,
    /// Whether the unit matches what is on disk under the AST directory
    pub saved: bool,
}

/// Cloneable description of an installed unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitSummary {
    pub path: PathBuf,
    pub file_id: FileId,
    pub compiler_flags: Vec<String>,
    pub options: ParseOptions,
    pub parsed_at: String,
    pub saved: bool,
}

/// Result of [`UnitStore::load_ast`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "unit", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// The saved unit was current and is now installed
    Loaded(UnitSummary),
    /// The saved unit was stale or unreadable; the source was parsed again
    Reparsed(UnitSummary),
}

impl LoadOutcome {
    pub fn summary(&self) -> &UnitSummary {
        match self {
            Self::Loaded(s) | Self::Reparsed(s) => s,
        }
    }
}

/// Sidecar written next to a serialized unit
#[derive(Debug, Serialize, Deserialize)]
struct AstMeta {
    path: PathBuf,
    source_mtime: Option<SystemTime>,
    source_len: Option<u64>,
    compiler_flags: Vec<String>,
    options: ParseOptions,
    saved_at: String,
}

/// Filter for [`UnitStore::file_list`]
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Only units changed since they were last saved
    pub unsaved_only: bool,
    /// Only paths matching this pattern
    pub pattern: Option<Regex>,
}

impl FileFilter {
    pub fn all() -> Self {
        Self::default()
    }

    fn accepts<U>(&self, path: &Path, entry: &UnitEntry<U>) -> bool {
        if self.unsaved_only && entry.saved {
            return false;
        }
        match &self.pattern {
            Some(re) => re.is_match(&path.to_string_lossy()),
            None => true,
        }
    }
}

struct SlotState<U> {
    entry: Option<UnitEntry<U>>,
    compiler_flags: Vec<String>,
    options: ParseOptions,
    failure: Option<Diagnostics>,
    reparse_in_flight: bool,
    reparse_pending: bool,
    removed: bool,
}

struct UnitSlot<U> {
    parse_lock: Mutex<()>,
    state: Mutex<SlotState<U>>,
}

impl<U> UnitSlot<U> {
    fn new(compiler_flags: Vec<String>, options: ParseOptions) -> Self {
        Self {
            parse_lock: Mutex::new(()),
            state: Mutex::new(SlotState {
                entry: None,
                compiler_flags,
                options,
                failure: None,
                reparse_in_flight: false,
                reparse_pending: false,
                removed: false,
            }),
        }
    }
}

/// Answer to a change notification, see [`UnitStore::begin_reparse`]
pub enum ReparseRequest<U> {
    /// The path is not in the store
    NotTracked,
    /// A reparse is already running; it will run once more when it finishes
    Coalesced,
    /// The caller owns the reparse and must hand the ticket to [`UnitStore::run_reparse`]
    Started(ReparseTicket<U>),
}

/// Exclusive right to run the reparse loop for one path
pub struct ReparseTicket<U> {
    path: PathBuf,
    slot: Arc<UnitSlot<U>>,
}

impl<U> ReparseTicket<U> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// What a reparse loop did
#[derive(Debug)]
pub struct ReparseOutcome {
    pub path: PathBuf,
    /// Number of parses performed (1 + coalesced follow-ups)
    pub runs: usize,
    /// Result of the last parse
    pub last: Result<UnitSummary>,
}

/// Clears the in-flight flag if the reparse loop unwinds
struct InFlightGuard<'a, U> {
    slot: &'a UnitSlot<U>,
    armed: bool,
}

impl<U> Drop for InFlightGuard<'_, U> {
    fn drop(&mut self) {
        if self.armed {
            let mut st = self.slot.state.lock();
            st.reparse_in_flight = false;
            st.reparse_pending = false;
        }
    }
}

/// Store of parsed translation units
pub struct UnitStore<P: UnitParser> {
    parser: Arc<P>,
    registry: Arc<FileRegistry>,
    slots: RwLock<HashMap<PathBuf, Arc<UnitSlot<P::Unit>>>>,
    ast_dir: PathBuf,
}

impl<P: UnitParser> UnitStore<P> {
    pub fn new(parser: Arc<P>, registry: Arc<FileRegistry>, ast_dir: PathBuf) -> Self {
        Self {
            parser,
            registry,
            slots: RwLock::new(HashMap::new()),
            ast_dir,
        }
    }

    pub fn parser(&self) -> &Arc<P> {
        &self.parser
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    pub fn ast_dir(&self) -> &Path {
        &self.ast_dir
    }

    fn slot(&self, path: &Path) -> Option<Arc<UnitSlot<P::Unit>>> {
        self.slots.read().get(path).cloned()
    }

    fn slot_or_insert(&self, path: &Path, flags: &[String], options: ParseOptions) -> Arc<UnitSlot<P::Unit>> {
        if let Some(slot) = self.slot(path) {
            return slot;
        }
        self.slots
            .write()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(UnitSlot::new(flags.to_vec(), options)))
            .clone()
    }

    /// Parse `path` and install the result, replacing (and disposing) any previous unit.
    ///
    /// A parse failure is recorded for the path and returned as
    /// [`IndexError::ParseFailure`]; the path stays tracked but not indexed.
    pub fn add_source_file(
        &self,
        path: &Path,
        options: ParseOptions,
        compiler_flags: &[String],
    ) -> Result<UnitSummary> {
        let path = paths::canonicalize(path)?;
        self.parse_and_install(&path, options, compiler_flags.to_vec())
    }

    fn parse_and_install(
        &self,
        path: &Path,
        options: ParseOptions,
        compiler_flags: Vec<String>,
    ) -> Result<UnitSummary> {
        loop {
            let slot = self.slot_or_insert(path, &compiler_flags, options);
            let _parsing = slot.parse_lock.lock();
            {
                let mut st = slot.state.lock();
                if st.removed {
                    // Removed between lookup and lock; retry with a fresh slot
                    continue;
                }
                st.compiler_flags = compiler_flags.clone();
                st.options = options;
            }
            return self.parse_locked(&slot, path, &compiler_flags, options);
        }
    }

    /// Parse and install. Caller holds `slot.parse_lock`.
    fn parse_locked(
        &self,
        slot: &UnitSlot<P::Unit>,
        path: &Path,
        compiler_flags: &[String],
        options: ParseOptions,
    ) -> Result<UnitSummary> {
        let source_mtime = file_mtime(path);
        let started = Instant::now();
        let parsed = self.parser.parse(path, compiler_flags, options);
        let elapsed = started.elapsed();

        match parsed {
            Ok(unit) => {
                let file_id = self.register(path);
                let entry = UnitEntry {
                    unit,
                    compiler_flags: compiler_flags.to_vec(),
                    options,
                    source_mtime,
                    parsed_at: Utc::now(),
                    saved: false,
                };
                let summary = summarize(path, file_id, &entry);
                self.install(slot, Some(entry), None);
                tracing::info!("Parsed {} in {:?}", path.display(), elapsed);
                Ok(summary)
            }
            Err(diagnostics) => {
                tracing::warn!("Failed to parse {}: {}", path.display(), diagnostics);
                self.install(slot, None, Some(diagnostics.clone()));
                Err(IndexError::ParseFailure {
                    path: path.to_path_buf(),
                    diagnostics,
                })
            }
        }
    }

    /// Swap the slot's entry, disposing the old unit
    fn install(
        &self,
        slot: &UnitSlot<P::Unit>,
        entry: Option<UnitEntry<P::Unit>>,
        failure: Option<Diagnostics>,
    ) {
        let mut st = slot.state.lock();
        if let Some(old) = st.entry.take() {
            self.parser.dispose(old.unit);
        }
        st.entry = entry;
        st.failure = failure;
    }

    fn register(&self, path: &Path) -> FileId {
        match self.registry.insert(path) {
            Ok(id) => id,
            Err(e) => {
                // The id is allocated in memory even when persisting it failed
                tracing::warn!("Registering {} failed: {}", path.display(), e);
                self.registry.id_for(path).unwrap_or(FileId::INVALID)
            }
        }
    }

    /// Dispose and forget the unit for `path`. Returns false if the path is not tracked.
    pub fn remove_source_file(&self, path: &Path) -> bool {
        let Ok(path) = paths::canonicalize(path) else {
            return false;
        };
        let Some(slot) = self.slot(&path) else {
            return false;
        };

        {
            let _parsing = slot.parse_lock.lock();
            let mut st = slot.state.lock();
            if st.removed {
                return false;
            }
            st.removed = true;
            if let Some(old) = st.entry.take() {
                self.parser.dispose(old.unit);
            }
        }

        let mut slots = self.slots.write();
        if slots.get(&path).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            slots.remove(&path);
        }
        tracing::info!("Removed {}", path.display());
        true
    }

    /// Parse `path` again with the flags it was last added with
    pub fn reparse(&self, path: &Path) -> Result<UnitSummary> {
        let path = paths::canonicalize(path)?;
        let slot = self
            .slot(&path)
            .ok_or_else(|| IndexError::not_found(path.display().to_string()))?;
        let (flags, options) = {
            let st = slot.state.lock();
            (st.compiler_flags.clone(), st.options)
        };
        self.parse_and_install(&path, options, flags)
    }

    /// Claim the reparse of `path`, or mark a follow-up if one is already running.
    pub fn begin_reparse(&self, path: &Path) -> ReparseRequest<P::Unit> {
        let Some(slot) = self.slot(path) else {
            return ReparseRequest::NotTracked;
        };
        let mut st = slot.state.lock();
        if st.removed {
            return ReparseRequest::NotTracked;
        }
        if st.reparse_in_flight {
            st.reparse_pending = true;
            tracing::debug!("Coalescing reparse of {}", path.display());
            return ReparseRequest::Coalesced;
        }
        st.reparse_in_flight = true;
        drop(st);
        ReparseRequest::Started(ReparseTicket {
            path: path.to_path_buf(),
            slot,
        })
    }

    /// Reparse until no follow-up is pending. Change events that arrive
    /// meanwhile collapse into at most one extra run.
    pub fn run_reparse(&self, ticket: ReparseTicket<P::Unit>) -> Result<ReparseOutcome> {
        let ReparseTicket { path, slot } = ticket;
        let mut guard = InFlightGuard {
            slot: &slot,
            armed: true,
        };
        let mut runs = 0;

        loop {
            let last = {
                let _parsing = slot.parse_lock.lock();
                let (flags, options) = {
                    let st = slot.state.lock();
                    if st.removed {
                        return Err(IndexError::ConcurrentModification { path });
                    }
                    (st.compiler_flags.clone(), st.options)
                };
                self.parse_locked(&slot, &path, &flags, options)
            };
            runs += 1;

            let mut st = slot.state.lock();
            if st.reparse_pending && !st.removed {
                st.reparse_pending = false;
                continue;
            }
            st.reparse_in_flight = false;
            st.reparse_pending = false;
            guard.armed = false;
            return Ok(ReparseOutcome { path, runs, last });
        }
    }

    /// Serialize the unit for `path` to its deterministic location under the AST directory
    pub fn save_ast(&self, path: &Path) -> Result<PathBuf> {
        let path = paths::canonicalize(path)?;
        let slot = self
            .slot(&path)
            .ok_or_else(|| IndexError::not_found(path.display().to_string()))?;
        let dest = paths::ast_file_for(&self.ast_dir, &path);
        std::fs::create_dir_all(&self.ast_dir)?;

        let _parsing = slot.parse_lock.lock();
        let mut st = slot.state.lock();
        let entry = st
            .entry
            .as_mut()
            .ok_or_else(|| IndexError::not_found(format!("unit for {}", path.display())))?;

        self.parser.serialize(&entry.unit, &dest)?;
        let meta = AstMeta {
            path: path.clone(),
            source_mtime: entry.source_mtime,
            source_len: std::fs::metadata(&path).ok().map(|m| m.len()),
            compiler_flags: entry.compiler_flags.clone(),
            options: entry.options,
            saved_at: Utc::now().to_rfc3339(),
        };
        std::fs::write(
            paths::ast_meta_for(&self.ast_dir, &path),
            serde_json::to_vec_pretty(&meta)?,
        )?;
        entry.saved = true;
        tracing::info!("Saved unit for {} to {}", path.display(), dest.display());
        Ok(dest)
    }

    /// Install a previously saved unit without parsing, unless the source
    /// changed since the save, in which case it is parsed again.
    pub fn load_ast(&self, path: &Path) -> Result<LoadOutcome> {
        let path = paths::canonicalize(path)?;
        let meta_path = paths::ast_meta_for(&self.ast_dir, &path);
        let meta: AstMeta = match std::fs::read(&meta_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::not_found(format!(
                    "saved unit for {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if meta.path != path {
            // Another path hashed to the same file name
            let stale = IndexError::StaleCache { path: path.clone() };
            tracing::info!("{}; saved unit belongs to {}; reparsing", stale, meta.path.display());
            let (flags, options) = match self.slot(&path) {
                Some(slot) => {
                    let st = slot.state.lock();
                    (st.compiler_flags.clone(), st.options)
                }
                None => (meta.compiler_flags, meta.options),
            };
            let summary = self.parse_and_install(&path, options, flags)?;
            return Ok(LoadOutcome::Reparsed(summary));
        }

        let current_mtime = file_mtime(&path);
        let current_len = std::fs::metadata(&path).ok().map(|m| m.len());
        if current_mtime.is_none() || current_mtime != meta.source_mtime || current_len != meta.source_len {
            let stale = IndexError::StaleCache { path: path.clone() };
            tracing::info!("{}; reparsing", stale);
            let summary = self.parse_and_install(&path, meta.options, meta.compiler_flags)?;
            return Ok(LoadOutcome::Reparsed(summary));
        }

        let ast_path = paths::ast_file_for(&self.ast_dir, &path);
        loop {
            let slot = self.slot_or_insert(&path, &meta.compiler_flags, meta.options);
            let _parsing = slot.parse_lock.lock();
            if slot.state.lock().removed {
                continue;
            }

            return match self.parser.deserialize(&ast_path) {
                Ok(unit) => {
                    let file_id = self.register(&path);
                    let entry = UnitEntry {
                        unit,
                        compiler_flags: meta.compiler_flags.clone(),
                        options: meta.options,
                        source_mtime: meta.source_mtime,
                        parsed_at: Utc::now(),
                        saved: true,
                    };
                    let summary = summarize(&path, file_id, &entry);
                    {
                        let mut st = slot.state.lock();
                        st.compiler_flags = meta.compiler_flags.clone();
                        st.options = meta.options;
                    }
                    self.install(&slot, Some(entry), None);
                    tracing::info!("Loaded saved unit for {}", path.display());
                    Ok(LoadOutcome::Loaded(summary))
                }
                Err(e) => {
                    tracing::warn!(
                        "Cannot read saved unit {}: {}; reparsing",
                        ast_path.display(),
                        e
                    );
                    {
                        let mut st = slot.state.lock();
                        st.compiler_flags = meta.compiler_flags.clone();
                        st.options = meta.options;
                    }
                    self.parse_locked(&slot, &path, &meta.compiler_flags, meta.options)
                        .map(LoadOutcome::Reparsed)
                }
            };
        }
    }

    /// Lazily enumerate indexed paths (sorted) matching `filter`.
    pub fn file_list(&self, filter: FileFilter) -> FileList<P::Unit> {
        let mut items: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|(path, slot)| (path.clone(), Arc::clone(slot)))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        FileList {
            items: Arc::new(items),
            pos: 0,
            filter,
        }
    }

    /// Every tracked path, including ones whose last parse failed
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut out: Vec<_> = self.slots.read().keys().cloned().collect();
        out.sort();
        out
    }

    /// Paths whose last parse failed, with the diagnostics
    pub fn failures(&self) -> Vec<(PathBuf, Diagnostics)> {
        let slots: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|(p, s)| (p.clone(), Arc::clone(s)))
            .collect();
        let mut out: Vec<_> = slots
            .into_iter()
            .filter_map(|(path, slot)| {
                let st = slot.state.lock();
                st.failure.clone().map(|d| (path, d))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Summaries of every installed unit
    pub fn summaries(&self) -> Vec<UnitSummary> {
        let slots: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|(p, s)| (p.clone(), Arc::clone(s)))
            .collect();
        let mut out: Vec<_> = slots
            .into_iter()
            .filter_map(|(path, slot)| {
                let st = slot.state.lock();
                let entry = st.entry.as_ref()?;
                let file_id = self.registry.id_for(&path).unwrap_or(FileId::INVALID);
                Some(summarize(&path, file_id, entry))
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Run `f` against the installed unit for `path` while it cannot be replaced
    pub fn with_unit<R>(&self, path: &Path, f: impl FnOnce(&UnitEntry<P::Unit>) -> R) -> Option<R> {
        let slot = self.slot(path)?;
        let st = slot.state.lock();
        st.entry.as_ref().map(f)
    }

    /// Whether `path` has an installed unit
    pub fn is_indexed(&self, path: &Path) -> bool {
        self.with_unit(path, |_| ()).is_some()
    }

    /// Number of installed units
    pub fn len(&self) -> usize {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| slot.state.lock().entry.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every unit and forget every path
    pub fn clear(&self) {
        let slots: Vec<_> = self.slots.write().drain().map(|(_, s)| s).collect();
        let count = slots.len();
        for slot in slots {
            let _parsing = slot.parse_lock.lock();
            let mut st = slot.state.lock();
            st.removed = true;
            if let Some(old) = st.entry.take() {
                self.parser.dispose(old.unit);
            }
        }
        if count > 0 {
            tracing::info!("Disposed {} units", count);
        }
    }
}

impl<P: UnitParser> Drop for UnitStore<P> {
    fn drop(&mut self) {
        self.clear();
    }
}

fn summarize<U>(path: &Path, file_id: FileId, entry: &UnitEntry<U>) -> UnitSummary {
    UnitSummary {
        path: path.to_path_buf(),
        file_id,
        compiler_flags: entry.compiler_flags.clone(),
        options: entry.options,
        parsed_at: entry.parsed_at.to_rfc3339(),
        saved: entry.saved,
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Lazy, restartable enumeration returned by [`UnitStore::file_list`].
///
/// The set of paths is fixed when the list is created; whether each one is
/// still indexed and matches the filter is checked as the iterator advances.
pub struct FileList<U> {
    items: Arc<Vec<(PathBuf, Arc<UnitSlot<U>>)>>,
    pos: usize,
    filter: FileFilter,
}

impl<U> FileList<U> {
    /// Start over from the first path
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl<U> Clone for FileList<U> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            pos: self.pos,
            filter: self.filter.clone(),
        }
    }
}

impl<U> Iterator for FileList<U> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        while let Some((path, slot)) = self.items.get(self.pos) {
            self.pos += 1;
            let st = slot.state.lock();
            if let Some(entry) = st.entry.as_ref() {
                if self.filter.accepts(path, entry) {
                    return Some(path.clone());
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.items.len().saturating_sub(self.pos)))
    }
}
