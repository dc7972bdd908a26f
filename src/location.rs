//! Packed source locations
//!
//! A [`Location`] is a single `u64`: the byte offset in the high 32 bits and
//! the [`FileId`] in the low 32 bits. It is `Copy`, carries no path, and is
//! the addressing currency between the registry, the unit store and clients.
//!
//! Paths, line/column and the surrounding source line are resolved on demand
//! through a [`FileRegistry`]. Line/column conversion scans the file from the
//! start every time, so it belongs in display code only.
//!
//! # Ordering
//!
//! Locations sort by file id *descending*, then by offset ascending. Sorted
//! indices and binary searches over locations depend on this exact order.

use std::cmp::Ordering;
use std::fmt;
use std::io::Read;
use std::ops::BitOr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::parser::UnitParser;
use crate::registry::{FileId, FileRegistry};

/// Longest context line returned by [`Location::context`]
const MAX_CONTEXT_LEN: usize = 1023;

/// Flags controlling [`Location::key`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFlags(u32);

impl KeyFlags {
    pub const NONE: KeyFlags = KeyFlags(0x0);
    /// `path,000123`
    pub const PADDED: KeyFlags = KeyFlags(0x1);
    /// Append a tab and the source line
    pub const SHOW_CONTEXT: KeyFlags = KeyFlags(0x2);
    /// `path:line:col:` instead of `path,offset`
    pub const SHOW_LINE_NUMBERS: KeyFlags = KeyFlags(0x4);

    pub const fn contains(self, other: KeyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for KeyFlags {
    type Output = KeyFlags;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 1-based line and column of a location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineCol {
    pub line: u32,
    pub column: u32,
}

/// A `(file id, byte offset)` pair packed into 64 bits
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(u64);

impl Location {
    pub const NULL: Location = Location(0);

    #[inline]
    pub const fn new(file_id: FileId, offset: u32) -> Self {
        Self(((offset as u64) << 32) | file_id.index() as u64)
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn file_id(self) -> FileId {
        FileId::new(self.0 as u32)
    }

    #[inline]
    pub const fn offset(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Build a location from a position the parser reports inside `unit`.
    ///
    /// The file the parser resolves to is inserted into the registry.
    pub fn from_parser<P: UnitParser>(
        registry: &FileRegistry,
        parser: &P,
        unit: &P::Unit,
        offset: u32,
    ) -> Result<Self> {
        let (path, offset) = parser
            .source_location_of(unit, offset)
            .ok_or_else(|| IndexError::not_found(format!("offset {} in unit", offset)))?;
        let path = crate::paths::canonicalize(&path)?;
        let file_id = registry.insert(&path)?;
        Ok(Self::new(file_id, offset))
    }

    /// Fixed 8-byte storage key (little-endian packed value)
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decode a storage key written by [`Location::to_key`]
    pub fn from_key(key: &[u8]) -> Result<Self> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| IndexError::malformed(format!("location key is {} bytes", key.len())))?;
        Ok(Self(u64::from_le_bytes(bytes)))
    }

    pub fn path(self, registry: &FileRegistry) -> Option<PathBuf> {
        registry.path_for(self.file_id())
    }

    fn read_source(self, registry: &FileRegistry) -> Option<Vec<u8>> {
        let path = self.path(registry)?;
        let mut bytes = Vec::new();
        std::fs::File::open(&path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| tracing::debug!("Cannot read {}: {}", path.display(), e))
            .ok()?;
        Some(bytes)
    }

    /// Line and column of this location, or `None` if the file is unreadable
    /// or the offset is past the end of it
    pub fn line_col(self, registry: &FileRegistry) -> Option<LineCol> {
        let source = self.read_source(registry)?;
        offset_to_line_col(&source, self.offset())
    }

    /// The source line containing this location (without the newline)
    pub fn context(self, registry: &FileRegistry) -> Option<String> {
        let source = self.read_source(registry)?;
        line_containing(&source, self.offset())
    }

    /// Human-readable key: `path,offset`, `path,000123` or `path:line:col:`,
    /// optionally followed by a tab and the source line.
    pub fn key(self, registry: &FileRegistry, flags: KeyFlags) -> String {
        if self.is_null() {
            return String::new();
        }
        let path = self
            .path(registry)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let offset = self.offset();

        let mut out = if flags.contains(KeyFlags::PADDED) {
            format!("{},{:06}", path, offset)
        } else if let Some(pos) = flags
            .contains(KeyFlags::SHOW_LINE_NUMBERS)
            .then(|| self.line_col(registry))
            .flatten()
        {
            format!("{}:{}:{}:", path, pos.line, pos.column)
        } else {
            format!("{},{}", path, offset)
        };

        if flags.contains(KeyFlags::SHOW_CONTEXT) {
            out.push('\t');
            out.push_str(&self.context(registry).unwrap_or_default());
        }
        out
    }

    /// Location of 1-based `line`/`column` in `path`. The path must already be registered.
    pub fn from_line_col(
        registry: &FileRegistry,
        path: &Path,
        line: u32,
        column: u32,
    ) -> Result<Self> {
        let file_id = registry
            .id_for(path)
            .ok_or_else(|| IndexError::not_found(path.display().to_string()))?;
        let source = std::fs::read(path)?;
        let offset = line_col_to_offset(&source, line, column).ok_or_else(|| {
            IndexError::malformed(format!("{}:{}:{} is out of range", path.display(), line, column))
        })?;
        Ok(Self::new(file_id, offset))
    }

    /// Decode the client encoding: path bytes followed by a little-endian u32 offset.
    ///
    /// The path is looked up, not inserted.
    pub fn decode_client_location(registry: &FileRegistry, data: &[u8]) -> Result<Self> {
        if data.len() <= 4 {
            tracing::warn!("Client location too short ({} bytes)", data.len());
            return Err(IndexError::malformed("client location too short"));
        }
        let (path_bytes, offset_bytes) = data.split_at(data.len() - 4);
        let offset = u32::from_le_bytes([offset_bytes[0], offset_bytes[1], offset_bytes[2], offset_bytes[3]]);
        let path = std::str::from_utf8(path_bytes)
            .map_err(|_| IndexError::malformed("client location path is not UTF-8"))?;

        match registry.id_for(Path::new(path)) {
            Some(file_id) => Ok(Self::new(file_id, offset)),
            None => {
                tracing::warn!("Failed to make location from [{},{}]", path, offset);
                Err(IndexError::not_found(format!("{},{}", path, offset)))
            }
        }
    }

    /// Encode for [`Location::decode_client_location`]
    pub fn encode_client_location(path: &Path, offset: u32) -> Vec<u8> {
        let mut out = path.as_os_str().as_encoded_bytes().to_vec();
        out.extend_from_slice(&offset.to_le_bytes());
        out
    }

    /// Parse `path,offset`. The path is inserted into the registry.
    pub fn from_path_and_offset(registry: &FileRegistry, text: &str) -> Result<Self> {
        let malformed = || {
            tracing::warn!("Can't create location from this: {}", text);
            IndexError::malformed(format!("expected path,offset but got {:?}", text))
        };
        let comma = text.rfind(',').ok_or_else(malformed)?;
        if comma == 0 || comma + 1 == text.len() {
            return Err(malformed());
        }
        let offset: u32 = text[comma + 1..].parse().map_err(|_| malformed())?;
        let path = crate::paths::canonicalize(Path::new(&text[..comma]))?;
        let file_id = registry.insert(&path)?;
        Ok(Self::new(file_id, offset))
    }
}

impl Ord for Location {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .file_id()
            .cmp(&self.file_id())
            .then_with(|| self.offset().cmp(&other.offset()))
    }
}

impl PartialOrd for Location {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({},{})", self.file_id().index(), self.offset())
    }
}

/// 1-based line/column of `offset`; `None` when `offset` is at or past the end
pub fn offset_to_line_col(source: &[u8], offset: u32) -> Option<LineCol> {
    let offset = offset as usize;
    if offset >= source.len() {
        return None;
    }
    let line_start = source[..offset]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    let line = source[..line_start].iter().filter(|&&b| b == b'\n').count() + 1;
    Some(LineCol {
        line: line as u32,
        column: (offset - line_start + 1) as u32,
    })
}

/// Byte offset of 1-based `line`/`column`; the column may point at the line's newline
pub fn line_col_to_offset(source: &[u8], line: u32, column: u32) -> Option<u32> {
    if line == 0 || column == 0 {
        return None;
    }
    let mut line_start = 0usize;
    for _ in 1..line {
        let newline = source[line_start..].iter().position(|&b| b == b'\n')?;
        line_start += newline + 1;
    }
    let line_len = source[line_start..]
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(source.len() - line_start);
    let col = column as usize - 1;
    if col > line_len || line_start + col >= source.len() {
        return None;
    }
    u32::try_from(line_start + col).ok()
}

/// The line holding `offset`. An offset on a newline belongs to the line it ends.
fn line_containing(source: &[u8], offset: u32) -> Option<String> {
    let offset = offset as usize;
    if offset > source.len() {
        return None;
    }
    let start = source[..offset]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = source[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| start + i)
        .unwrap_or(source.len());
    let end = end.min(start + MAX_CONTEXT_LEN);
    Some(String::from_utf8_lossy(&source[start..end]).into_owned())
}
