//! Compile command extraction for `add-makefile`
//!
//! Accepts either a clang `compile_commands.json` database or the captured
//! output of a build (`make V=1`, ninja -v, ...). Each compiler invocation
//! yields one [`CompileEntry`] per C/C++ source it compiles.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::error::{IndexError, Result};
use crate::lang::Lang;
use crate::paths;

/// One source file and the flags it is compiled with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileEntry {
    pub directory: PathBuf,
    pub source: PathBuf,
    pub flags: Vec<String>,
}

/// Read compile commands from `path`. Relative paths resolve against the file's directory.
pub fn read_compile_commands(path: &Path) -> Result<Vec<CompileEntry>> {
    let content = std::fs::read_to_string(path)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let base_dir = paths::canonicalize(&base_dir)?;

    let is_database = path
        .file_name()
        .is_some_and(|name| name == "compile_commands.json")
        || content.trim_start().starts_with('[');

    if is_database {
        parse_compile_database(&content, &base_dir)
    } else {
        Ok(parse_build_log(&content, &base_dir))
    }
}

#[derive(Debug, Deserialize)]
struct DatabaseEntry {
    directory: PathBuf,
    file: PathBuf,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
}

/// Parse a `compile_commands.json` document
pub fn parse_compile_database(content: &str, base_dir: &Path) -> Result<Vec<CompileEntry>> {
    let entries: Vec<DatabaseEntry> = serde_json::from_str(content)
        .map_err(|e| IndexError::malformed(format!("invalid compile database: {}", e)))?;
    let matcher = CompilerMatcher::new();

    let mut out = Vec::new();
    for entry in entries {
        let directory = absolute(base_dir, &entry.directory);
        let words = match (entry.arguments, entry.command) {
            (Some(args), _) => args,
            (None, Some(command)) => split_command(&command),
            (None, None) => continue,
        };
        let words = matcher.strip_wrapper(&words);
        let Some(args) = words.get(1..) else {
            continue;
        };
        let source = absolute(&directory, &entry.file);
        let flags = compile_flags(args, &directory);
        out.push(CompileEntry {
            directory: directory.clone(),
            source,
            flags,
        });
    }
    Ok(out)
}

/// Extract compiler invocations from build output
pub fn parse_build_log(content: &str, base_dir: &Path) -> Vec<CompileEntry> {
    let matcher = CompilerMatcher::new();
    let entering = make_dir_regex("Entering");
    let leaving = make_dir_regex("Leaving");
    let mut dirs = vec![base_dir.to_path_buf()];
    let mut out = Vec::new();

    for line in logical_lines(content) {
        if let Some(caps) = entering.as_ref().and_then(|re| re.captures(&line)) {
            let dir = absolute(dirs.last().map_or(base_dir, |d| d.as_path()), Path::new(&caps[1]));
            tracing::debug!("Entering {}", dir.display());
            dirs.push(dir);
            continue;
        }
        if leaving.as_ref().is_some_and(|re| re.is_match(&line)) {
            if dirs.len() > 1 {
                dirs.pop();
            }
            continue;
        }

        // `cd dir && cc ...` only affects the rest of this line
        let mut cwd = dirs.last().cloned().unwrap_or_else(|| base_dir.to_path_buf());
        for segment in line.split("&&").flat_map(|s| s.split(';')) {
            let words = split_command(segment.trim());
            let words = matcher.strip_wrapper(&words);
            let Some(program) = words.first() else {
                continue;
            };
            if program == "cd" {
                if let Some(dir) = words.get(1) {
                    cwd = absolute(&cwd, Path::new(dir));
                }
                continue;
            }
            if !matcher.is_compiler(program) {
                continue;
            }
            out.extend(entries_for_invocation(&words[1..], &cwd));
        }
    }
    out
}

fn entries_for_invocation(args: &[String], cwd: &Path) -> Vec<CompileEntry> {
    let flags = compile_flags(args, cwd);
    source_args(args)
        .map(|source| CompileEntry {
            directory: cwd.to_path_buf(),
            source: absolute(cwd, Path::new(source)),
            flags: flags.clone(),
        })
        .collect()
}

/// Flags that take the next word as their argument
const FLAGS_WITH_ARG: &[&str] = &[
    "-o", "-I", "-D", "-U", "-x", "-include", "-imacros", "-isystem", "-iquote", "-idirafter",
    "-MF", "-MT", "-MQ", "-arch", "-target", "--sysroot", "-isysroot", "-Xclang",
];

/// Positional arguments that are C/C++ sources
fn source_args(args: &[String]) -> impl Iterator<Item = &String> {
    let mut skip_next = false;
    args.iter().filter(move |arg| {
        if std::mem::take(&mut skip_next) {
            return false;
        }
        if FLAGS_WITH_ARG.contains(&arg.as_str()) {
            skip_next = true;
            return false;
        }
        !arg.starts_with('-') && Lang::is_source_file(Path::new(arg.as_str()))
    })
}

/// Flags relevant to parsing: drops sources, outputs, `-c` and dependency
/// generation; makes include directories absolute.
fn compile_flags(args: &[String], cwd: &Path) -> Vec<String> {
    let mut flags = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "-MD" | "-MMD" | "-MP" => {}
            "-o" | "-MF" | "-MT" | "-MQ" => {
                iter.next();
            }
            "-I" | "-isystem" | "-iquote" | "-idirafter" => {
                if let Some(dir) = iter.next() {
                    flags.push(arg.clone());
                    flags.push(absolute(cwd, Path::new(dir)).display().to_string());
                }
            }
            flag if FLAGS_WITH_ARG.contains(&flag) => {
                flags.push(arg.clone());
                if let Some(value) = iter.next() {
                    flags.push(value.clone());
                }
            }
            flag if flag.starts_with("-I") => {
                let dir = &flag[2..];
                flags.push(format!("-I{}", absolute(cwd, Path::new(dir)).display()));
            }
            flag if flag.starts_with('-') => flags.push(arg.clone()),
            _ => {}
        }
    }
    flags
}

/// Recognises compiler drivers by executable name
struct CompilerMatcher {
    compiler: Option<Regex>,
}

impl CompilerMatcher {
    fn new() -> Self {
        let compiler = Regex::new(
            r"^(?:[A-Za-z0-9_.]+-)*(?:gcc|g\+\+|cc|c\+\+|clang|clang\+\+)(?:-[0-9][0-9.]*)?$",
        )
        .ok();
        Self { compiler }
    }

    fn is_compiler(&self, program: &str) -> bool {
        let name = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        self.compiler.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// Drop `ccache`/`distcc` style launchers in front of the compiler
    fn strip_wrapper<'a>(&self, words: &'a [String]) -> &'a [String] {
        match words.first().map(|w| Path::new(w.as_str()).file_name().and_then(|n| n.to_str())) {
            Some(Some("ccache" | "distcc" | "sccache" | "icecc")) => &words[1..],
            _ => words,
        }
    }
}

fn make_dir_regex(verb: &str) -> Option<Regex> {
    Regex::new(&format!(r"^\S*make(?:\[\d+\])?: {} directory [`'](.*)'", verb)).ok()
}

/// Join backslash-continued lines
fn logical_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        match line.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
                current.push(' ');
            }
            None => {
                current.push_str(line);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Split a shell command into words, honouring quotes and backslash escapes
pub fn split_command(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_word = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        paths::normalize_lexically(path)
    } else {
        paths::normalize_lexically(&base.join(path))
    }
}
