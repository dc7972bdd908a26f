//! Daemon command protocol
//!
//! Clients send `{"name": "...", "args": {...}}`; the name selects a
//! [`Command`] variant and the args are decoded into that variant's typed
//! argument struct.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::location::KeyFlags;
use crate::parser::ParseOptions;

/// Command as received from a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCommand {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl RawCommand {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// A location given either as `path,offset` text or in the client byte encoding
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LocationArg {
    Text(String),
    Encoded(Vec<u8>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupArgs {
    pub location: LocationArg,
    #[serde(default)]
    pub flags: KeyFlags,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupLineArgs {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub flags: KeyFlags,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMakefileArgs {
    pub path: PathBuf,
    /// Appended to every extracted command
    #[serde(default)]
    pub extra_flags: Vec<String>,
    #[serde(default)]
    pub options: ParseOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddSourceFileArgs {
    pub path: PathBuf,
    /// Defaults to the configured compiler flags
    #[serde(default)]
    pub flags: Option<Vec<String>>,
    #[serde(default)]
    pub options: ParseOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathArgs {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileListArgs {
    #[serde(default)]
    pub unsaved_only: bool,
    /// Regular expression matched against the path
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusArgs {
    #[serde(default)]
    pub query: String,
}

/// Every operation the daemon understands
#[derive(Debug, Clone)]
pub enum Command {
    Lookup(LookupArgs),
    LookupLine(LookupLineArgs),
    AddMakefile(AddMakefileArgs),
    AddSourceFile(AddSourceFileArgs),
    RemoveSourceFile(PathArgs),
    LoadAst(PathArgs),
    SaveAst(PathArgs),
    FileList(FileListArgs),
    Status(StatusArgs),
}

impl Command {
    /// Decode a client command. Unknown names are [`IndexError::UnknownCommand`],
    /// bad arguments [`IndexError::MalformedInput`].
    pub fn parse(raw: RawCommand) -> Result<Self> {
        let RawCommand { name, args } = raw;
        let cmd = match name.as_str() {
            "lookup" => Self::Lookup(decode_args(&name, args)?),
            "lookup-line" | "lookupLine" => Self::LookupLine(decode_args(&name, args)?),
            "add-makefile" | "addMakefile" => Self::AddMakefile(decode_args(&name, args)?),
            "add-source-file" | "addSourceFile" => Self::AddSourceFile(decode_args(&name, args)?),
            "remove-source-file" | "removeSourceFile" => {
                Self::RemoveSourceFile(decode_args(&name, args)?)
            }
            "load-ast" | "loadAST" => Self::LoadAst(decode_args(&name, args)?),
            "save-ast" | "saveAST" => Self::SaveAst(decode_args(&name, args)?),
            "list-files" | "fileList" => Self::FileList(decode_args(&name, args)?),
            "status" => Self::Status(decode_args(&name, args)?),
            _ => return Err(IndexError::UnknownCommand { name }),
        };
        Ok(cmd)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lookup(_) => "lookup",
            Self::LookupLine(_) => "lookup-line",
            Self::AddMakefile(_) => "add-makefile",
            Self::AddSourceFile(_) => "add-source-file",
            Self::RemoveSourceFile(_) => "remove-source-file",
            Self::LoadAst(_) => "load-ast",
            Self::SaveAst(_) => "save-ast",
            Self::FileList(_) => "list-files",
            Self::Status(_) => "status",
        }
    }

    /// Whether the command changes the set of tracked files
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::AddMakefile(_) | Self::AddSourceFile(_) | Self::RemoveSourceFile(_) | Self::LoadAst(_)
        )
    }
}

fn decode_args<T: DeserializeOwned>(name: &str, args: serde_json::Value) -> Result<T> {
    let args = if args.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| IndexError::malformed(format!("bad arguments for {}: {}", name, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Reply to one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(err: &IndexError) -> Self {
        Self {
            status: ResponseStatus::Error,
            result: None,
            error: Some(ErrorBody {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Error code, if this is an error response
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}
