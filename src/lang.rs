//! Language detection and tree-sitter grammar loading

use std::path::Path;

use serde::{Deserialize, Serialize};
use tree_sitter::Language;

use crate::error::{IndexError, Result};

/// Languages a translation unit can be parsed as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lang {
    C,
    Cpp,
}

impl Lang {
    /// Detect language from file path extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| IndexError::malformed(format!("{} has no extension", path.display())))?;

        Self::from_extension(ext)
    }

    /// Detect language from file extension string
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext {
            // `.C` and `.H` are C++ by gcc convention
            "C" | "H" => Ok(Self::Cpp),
            _ => match ext.to_lowercase().as_str() {
                "c" | "h" | "i" => Ok(Self::C),
                "cpp" | "cc" | "cxx" | "c++" | "cp" | "hpp" | "hxx" | "hh" | "h++" | "ii"
                | "ipp" | "tcc" | "inl" | "mm" => Ok(Self::Cpp),
                _ => Err(IndexError::malformed(format!(
                    "unsupported source extension: {}",
                    ext
                ))),
            },
        }
    }

    /// Whether `path` looks like a compilable C/C++ source (not a header)
    pub fn is_source_file(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("c" | "C" | "cpp" | "cc" | "cxx" | "c++" | "cp" | "i" | "ii" | "mm")
        )
    }

    /// Pick the language for a unit from its compiler flags, falling back to the path.
    ///
    /// `-x c` / `-x c++` win, then a C++ `-std=` dialect, then the extension.
    pub fn detect(path: &Path, compiler_flags: &[String]) -> Result<Self> {
        let mut explicit = None;
        let mut iter = compiler_flags.iter().peekable();
        while let Some(flag) = iter.next() {
            let lang_arg = if flag == "-x" {
                iter.peek().map(|s| s.as_str())
            } else {
                flag.strip_prefix("-x")
            };
            if let Some(arg) = lang_arg {
                explicit = match arg {
                    "c" | "c-header" | "cpp-output" => Some(Self::C),
                    "c++" | "c++-header" | "c++-cpp-output" => Some(Self::Cpp),
                    _ => explicit,
                };
            } else if let Some(std) = flag.strip_prefix("-std=") {
                if std.contains("++") {
                    explicit = explicit.or(Some(Self::Cpp));
                }
            }
        }

        match explicit {
            Some(lang) => Ok(lang),
            None => Self::from_path(path),
        }
    }

    /// Get the tree-sitter Language for this language
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::C => "c",
            Self::Cpp => "c++",
        }
    }
}
