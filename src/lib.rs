//! cindex: live translation-unit index for C and C++ codebases
//!
//! The library keeps parsed translation units in memory, maps every path it
//! has seen to a stable numeric id, and reparses units as their sources
//! change. `cindexd` exposes it over a WebSocket command protocol.
//!
//! # Example
//!
//! ```ignore
//! use cindex::{FileRegistry, ParseOptions, TreeSitterParser, UnitStore};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(FileRegistry::new());
//! let store = UnitStore::new(Arc::new(TreeSitterParser::new()), registry, "/tmp/ast".into());
//!
//! let unit = store.add_source_file("src/main.cpp".as_ref(), ParseOptions::NONE, &["-std=c++17".into()])?;
//! println!("{} is {}", unit.path.display(), unit.file_id);
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod lang;
pub mod location;
pub mod parser;
pub mod paths;
pub mod registry;
pub mod registry_store;
pub mod server;
pub mod socket_server;

// Re-export commonly used types
pub use config::DaemonConfig;
pub use daemon::{Command, Daemon, RawCommand, Response};
pub use error::{IndexError, Result};
pub use lang::Lang;
pub use location::{KeyFlags, LineCol, Location};
pub use parser::{Diagnostic, Diagnostics, ParseOptions, TreeSitterParser, UnitParser};
pub use registry::{FileId, FileRegistry};
pub use registry_store::{MemoryRegistryStore, RegistryStore, SqliteRegistryStore};
pub use server::{
    FileFilter, JobHandle, JobOutcome, JobRunner, LoadOutcome, UnitStore, UnitSummary,
    WatcherBridge,
};
