//! Parser collaborator
//!
//! The index never looks inside a parsed unit. Everything it needs from the
//! parsing engine goes through [`UnitParser`]: produce a unit from a path and
//! compiler flags, tear it down, write it to disk and read it back, and map
//! an offset inside a unit to a file position.
//!
//! [`TreeSitterParser`] is the implementation the daemon ships with. It parses
//! with the tree-sitter C and C++ grammars and reports ERROR/MISSING nodes as
//! diagnostics.

use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser, Tree};

use crate::error::{IndexError, Result};
use crate::lang::Lang;

/// Maximum number of diagnostics kept per failed parse
const MAX_DIAGNOSTICS: usize = 20;

/// Parse option bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParseOptions(u32);

impl ParseOptions {
    pub const NONE: ParseOptions = ParseOptions(0);
    /// Keep units whose parse produced errors instead of failing them
    pub const INCOMPLETE: ParseOptions = ParseOptions(0x1);
    /// Keep completion data around; accepted for compatibility, no effect on tree-sitter
    pub const CACHE_COMPLETION_RESULTS: ParseOptions = ParseOptions(0x8);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: ParseOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParseOptions {
    type Output = ParseOptions;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One problem reported by the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub offset: u32,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

/// Problems reported for a unit that could not be indexed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    /// A diagnostic that is not tied to a position (unreadable file, bad flags)
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            items: vec![Diagnostic {
                offset: 0,
                line: 0,
                column: 0,
                message: message.into(),
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.items.first() {
            None => write!(f, "no diagnostics"),
            Some(first) if first.line == 0 => write!(f, "{}", first.message),
            Some(first) => {
                write!(f, "{}:{}: {}", first.line, first.column, first.message)?;
                if self.items.len() > 1 {
                    write!(f, " (+{} more)", self.items.len() - 1)?;
                }
                Ok(())
            }
        }
    }
}

/// The innermost named syntax node around an offset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub kind: String,
    pub start: u32,
    pub end: u32,
    pub text: String,
}

/// The external parsing engine
pub trait UnitParser: Send + Sync + 'static {
    /// Opaque parsed translation unit
    type Unit: Send + Sync + 'static;

    /// Parse `path` with the given compiler flags
    fn parse(
        &self,
        path: &Path,
        compiler_flags: &[String],
        options: ParseOptions,
    ) -> std::result::Result<Self::Unit, Diagnostics>;

    /// Release a unit. Called exactly once per unit produced by `parse` or `deserialize`.
    fn dispose(&self, unit: Self::Unit);

    /// Write `unit` to `dest`
    fn serialize(&self, unit: &Self::Unit, dest: &Path) -> Result<()>;

    /// Read a unit previously written by `serialize`
    fn deserialize(&self, src: &Path) -> Result<Self::Unit>;

    /// Map an offset inside `unit` to the canonical file and offset it refers to
    fn source_location_of(&self, unit: &Self::Unit, offset: u32) -> Option<(PathBuf, u32)>;

    /// Describe the syntax at `offset`, if the engine can
    fn node_at(&self, _unit: &Self::Unit, _offset: u32) -> Option<NodeInfo> {
        None
    }
}

/// A unit parsed by tree-sitter
pub struct TreeSitterUnit {
    pub path: PathBuf,
    /// Raw file bytes; C sources are not always UTF-8
    pub source: Vec<u8>,
    pub lang: Lang,
    pub compiler_flags: Vec<String>,
    pub tree: Tree,
}

impl fmt::Debug for TreeSitterUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeSitterUnit")
            .field("path", &self.path)
            .field("lang", &self.lang)
            .field("bytes", &self.source.len())
            .finish()
    }
}

/// On-disk form of a [`TreeSitterUnit`]
#[derive(Serialize, Deserialize)]
struct UnitSnapshot {
    path: PathBuf,
    source: Vec<u8>,
    lang: Lang,
    compiler_flags: Vec<String>,
}

/// tree-sitter backed parser for C and C++
#[derive(Debug, Default, Clone)]
pub struct TreeSitterParser;

impl TreeSitterParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_source(lang: Lang, source: &[u8]) -> std::result::Result<Tree, Diagnostics> {
        let mut parser = Parser::new();
        parser
            .set_language(&lang.tree_sitter_language())
            .map_err(|e| Diagnostics::message(format!("Failed to set language: {}", e)))?;
        parser
            .parse(source, None)
            .ok_or_else(|| Diagnostics::message("parser returned no tree"))
    }

    fn collect_errors(tree: &Tree, source: &[u8]) -> Diagnostics {
        let mut items = Vec::new();
        if tree.root_node().has_error() {
            collect_error_nodes(tree.root_node(), source, &mut items);
        }
        Diagnostics { items }
    }
}

fn collect_error_nodes(node: Node, source: &[u8], out: &mut Vec<Diagnostic>) {
    if out.len() >= MAX_DIAGNOSTICS {
        return;
    }
    if node.is_error() || node.is_missing() {
        let pos = node.start_position();
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            let text = node_text(node, source);
            let snippet: String = text.chars().take(40).collect();
            format!("unexpected `{}`", snippet.trim())
        };
        out.push(Diagnostic {
            offset: node.start_byte() as u32,
            line: pos.row as u32 + 1,
            column: pos.column as u32 + 1,
            message,
        });
        return;
    }
    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_error_nodes(child, source, out);
    }
}

/// Display text of `node`; invalid UTF-8 is replaced, not rejected
fn node_text<'a>(node: Node, source: &'a [u8]) -> std::borrow::Cow<'a, str> {
    source
        .get(node.byte_range())
        .map(String::from_utf8_lossy)
        .unwrap_or_default()
}

impl UnitParser for TreeSitterParser {
    type Unit = TreeSitterUnit;

    fn parse(
        &self,
        path: &Path,
        compiler_flags: &[String],
        options: ParseOptions,
    ) -> std::result::Result<TreeSitterUnit, Diagnostics> {
        let lang = Lang::detect(path, compiler_flags).map_err(|e| Diagnostics::message(e.to_string()))?;
        let source = std::fs::read(path)
            .map_err(|e| Diagnostics::message(format!("cannot read {}: {}", path.display(), e)))?;

        let tree = Self::parse_source(lang, &source)?;
        let errors = Self::collect_errors(&tree, &source);
        if !errors.is_empty() && !options.contains(ParseOptions::INCOMPLETE) {
            return Err(errors);
        }
        if !errors.is_empty() {
            tracing::debug!(
                "Keeping {} with {} syntax errors",
                path.display(),
                errors.len()
            );
        }

        Ok(TreeSitterUnit {
            path: path.to_path_buf(),
            source,
            lang,
            compiler_flags: compiler_flags.to_vec(),
            tree,
        })
    }

    fn dispose(&self, unit: TreeSitterUnit) {
        tracing::trace!("Disposing unit {}", unit.path.display());
        drop(unit);
    }

    fn serialize(&self, unit: &TreeSitterUnit, dest: &Path) -> Result<()> {
        let snapshot = UnitSnapshot {
            path: unit.path.clone(),
            source: unit.source.clone(),
            lang: unit.lang,
            compiler_flags: unit.compiler_flags.clone(),
        };
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(&snapshot)?;
        std::fs::write(dest, bytes)?;
        Ok(())
    }

    fn deserialize(&self, src: &Path) -> Result<TreeSitterUnit> {
        let bytes = std::fs::read(src)?;
        let snapshot: UnitSnapshot = bincode::deserialize(&bytes)?;
        let tree = Self::parse_source(snapshot.lang, &snapshot.source).map_err(|diagnostics| {
            IndexError::ParseFailure {
                path: snapshot.path.clone(),
                diagnostics,
            }
        })?;
        Ok(TreeSitterUnit {
            path: snapshot.path,
            source: snapshot.source,
            lang: snapshot.lang,
            compiler_flags: snapshot.compiler_flags,
            tree,
        })
    }

    fn source_location_of(&self, unit: &TreeSitterUnit, offset: u32) -> Option<(PathBuf, u32)> {
        if offset as usize > unit.source.len() {
            return None;
        }
        Some((unit.path.clone(), offset))
    }

    fn node_at(&self, unit: &TreeSitterUnit, offset: u32) -> Option<NodeInfo> {
        let offset = offset as usize;
        if offset >= unit.source.len() {
            return None;
        }
        let node = unit
            .tree
            .root_node()
            .named_descendant_for_byte_range(offset, offset)?;
        let text = node_text(node, &unit.source);
        Some(NodeInfo {
            kind: node.kind().to_string(),
            start: node.start_byte() as u32,
            end: node.end_byte() as u32,
            text: text.chars().take(120).collect(),
        })
    }
}
