//! Parser stub that records every call
//!
//! Units are plain records of the file contents at parse time. Parses can be
//! made to fail per path, and can be held at a gate to keep a reparse in
//! flight while a test fires more change events.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cindex::{Diagnostics, IndexError, ParseOptions, Result, UnitParser};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StubUnit {
    pub serial: u64,
    pub path: PathBuf,
    pub contents: String,
    pub flags: Vec<String>,
}

/// Blocks parses while closed
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    waiting: usize,
}

impl Gate {
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }

    pub fn open(&self) {
        self.state.lock().unwrap().closed = false;
        self.changed.notify_all();
    }

    /// Wait until `n` parses are blocked at the gate
    pub fn wait_for_waiters(&self, n: usize) {
        let state = self.state.lock().unwrap();
        let (_state, timeout) = self
            .changed
            .wait_timeout_while(state, Duration::from_secs(10), |s| s.waiting < n)
            .unwrap();
        assert!(!timeout.timed_out(), "no parse reached the gate");
    }

    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            return;
        }
        state.waiting += 1;
        self.changed.notify_all();
        let mut state = self.changed.wait_while(state, |s| s.closed).unwrap();
        state.waiting -= 1;
    }
}

#[derive(Default)]
pub struct StubParser {
    parses: AtomicUsize,
    disposes: AtomicUsize,
    next_serial: AtomicU64,
    live: Mutex<HashSet<u64>>,
    double_disposes: AtomicUsize,
    failing: Mutex<HashSet<PathBuf>>,
    pub gate: Gate,
}

impl StubParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every parse of `path` fail
    pub fn fail_on(&self, path: &Path) {
        self.failing.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    pub fn disposes(&self) -> usize {
        self.disposes.load(Ordering::SeqCst)
    }

    /// Units produced and not yet disposed
    pub fn live_units(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn double_disposes(&self) -> usize {
        self.double_disposes.load(Ordering::SeqCst)
    }

    fn make_unit(&self, path: &Path, contents: String, flags: Vec<String>) -> StubUnit {
        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(serial);
        StubUnit {
            serial,
            path: path.to_path_buf(),
            contents,
            flags,
        }
    }
}

impl UnitParser for StubParser {
    type Unit = StubUnit;

    fn parse(
        &self,
        path: &Path,
        compiler_flags: &[String],
        _options: ParseOptions,
    ) -> std::result::Result<StubUnit, Diagnostics> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        self.gate.pass();

        if self.failing.lock().unwrap().contains(path) {
            return Err(Diagnostics::message("stub parse failure"));
        }
        let contents = std::fs::read_to_string(path).unwrap_or_default();
        Ok(self.make_unit(path, contents, compiler_flags.to_vec()))
    }

    fn dispose(&self, unit: StubUnit) {
        self.disposes.fetch_add(1, Ordering::SeqCst);
        if !self.live.lock().unwrap().remove(&unit.serial) {
            self.double_disposes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn serialize(&self, unit: &StubUnit, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, serde_json::to_vec(unit)?)?;
        Ok(())
    }

    fn deserialize(&self, src: &Path) -> Result<StubUnit> {
        let bytes = std::fs::read(src)?;
        let saved: StubUnit = serde_json::from_slice(&bytes)?;
        if saved.path.as_os_str().is_empty() {
            return Err(IndexError::malformed("saved unit has no path"));
        }
        Ok(self.make_unit(&saved.path, saved.contents, saved.flags))
    }

    fn source_location_of(&self, unit: &StubUnit, offset: u32) -> Option<(PathBuf, u32)> {
        (offset as usize <= unit.contents.len()).then(|| (unit.path.clone(), offset))
    }
}
