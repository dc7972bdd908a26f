//! Command dispatch over the indexing core
//!
//! [`Daemon`] wires the registry, unit store, watcher bridge and the two job
//! pools together and executes [`Command`]s against them. Parser work always
//! runs on the parse pool; status reports run on the job pool.

pub mod command;
pub mod makefile;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;

use crate::config::DaemonConfig;
use crate::error::{IndexError, Result};
use crate::location::{KeyFlags, LineCol, Location};
use crate::parser::{NodeInfo, ParseOptions, UnitParser};
use crate::paths;
use crate::registry::{FileId, FileRegistry};
use crate::registry_store::SqliteRegistryStore;
use crate::server::{
    ChangeSource, FileFilter, JobRunner, LoadOutcome, NotifySource, NullSource, StatusJob,
    StatusQuery, UnitStore, UnitSummary, WatcherBridge, WatcherHandle,
};

pub use command::{Command, ErrorBody, LocationArg, RawCommand, Response, ResponseStatus};

/// Result of `lookup` and `lookup-line`
#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub key: String,
    pub file_id: FileId,
    pub offset: u32,
    pub path: Option<PathBuf>,
    pub position: Option<LineCol>,
    pub indexed: bool,
    /// Where the parser resolves the location to, when the file is indexed
    pub resolved: Option<String>,
    pub node: Option<NodeInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub code: String,
    pub message: String,
}

/// Result of `add-makefile`
#[derive(Debug, Clone, Serialize)]
pub struct AddMakefileResult {
    pub commands: usize,
    pub added: Vec<PathBuf>,
    pub failed: Vec<FailedFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveResult {
    pub path: PathBuf,
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveResult {
    pub path: PathBuf,
    pub ast_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListResult {
    pub count: usize,
    pub files: Vec<PathBuf>,
}

/// What [`Daemon::shutdown`] left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub abandoned_parses: usize,
    pub abandoned_jobs: usize,
}

/// The indexing daemon
pub struct Daemon<P: UnitParser> {
    config: DaemonConfig,
    registry: Arc<FileRegistry>,
    units: Arc<UnitStore<P>>,
    parse_pool: Arc<JobRunner>,
    job_pool: JobRunner,
    watcher: Arc<WatcherBridge<P>>,
    watcher_handle: Mutex<Option<WatcherHandle>>,
}

impl<P: UnitParser> Daemon<P> {
    /// Open the on-disk registry under `config.data_dir` and start watching
    /// (when enabled).
    pub fn open(config: DaemonConfig, parser: P) -> Result<Self> {
        std::fs::create_dir_all(config.ast_dir())?;
        let store = SqliteRegistryStore::open(&config.registry_db())?;
        let registry = Arc::new(FileRegistry::with_store(Arc::new(store)));
        let loaded = registry.load_from_store()?;
        tracing::info!(
            "Loaded {} registered files from {}",
            loaded,
            config.registry_db().display()
        );

        let (source, events): (Box<dyn ChangeSource>, _) = if config.watch {
            let (source, events) = NotifySource::new(config.debounce())?;
            (Box::new(source), Some(events))
        } else {
            (Box::new(NullSource), None)
        };
        Self::with_parts(config, Arc::new(parser), registry, source, events)
    }

    /// Assemble a daemon from explicit parts. `events` feeds the watcher
    /// thread; without it changes must be delivered through [`Self::watcher`].
    pub fn with_parts(
        config: DaemonConfig,
        parser: Arc<P>,
        registry: Arc<FileRegistry>,
        source: Box<dyn ChangeSource>,
        events: Option<mpsc::Receiver<PathBuf>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(config.ast_dir())?;
        let units = Arc::new(UnitStore::new(parser, Arc::clone(&registry), config.ast_dir()));
        let parse_pool = Arc::new(JobRunner::new("cindex-parse", config.parse_workers)?);
        let job_pool = JobRunner::new("cindex-job", config.job_workers)?;
        let watcher = Arc::new(WatcherBridge::new(
            Arc::clone(&units),
            Arc::clone(&parse_pool),
            source,
        ));
        let watcher_handle = events.map(|events| watcher.start(events));

        Ok(Self {
            config,
            registry,
            units,
            parse_pool,
            job_pool,
            watcher,
            watcher_handle: Mutex::new(watcher_handle),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    pub fn units(&self) -> &Arc<UnitStore<P>> {
        &self.units
    }

    pub fn watcher(&self) -> &Arc<WatcherBridge<P>> {
        &self.watcher
    }

    /// Run a client command; failures become error responses
    pub fn handle(&self, raw: RawCommand) -> Response {
        let name = raw.name.clone();
        match Command::parse(raw).and_then(|cmd| self.run_command(cmd)) {
            Ok(result) => Response::ok(result),
            Err(e) => {
                match &e {
                    IndexError::RegistryInvariant { .. } => {
                        tracing::error!("{} aborted: {}", name, e)
                    }
                    e if e.is_per_file() => tracing::warn!("{}: {}", name, e),
                    e => tracing::debug!("{} failed: {}", name, e),
                }
                Response::error(&e)
            }
        }
    }

    /// Execute a decoded command. Commands that change the tracked set
    /// re-sync watcher subscriptions whether or not they succeed.
    pub fn run_command(&self, cmd: Command) -> Result<serde_json::Value> {
        tracing::debug!("Running {}", cmd.name());
        let mutation = cmd.is_mutation();
        let result = self.execute(cmd);
        if mutation {
            self.watcher.sync_subscriptions();
        }
        self.flush_registry();
        result
    }

    fn execute(&self, cmd: Command) -> Result<serde_json::Value> {
        match cmd {
            Command::Lookup(args) => {
                let location = match args.location {
                    LocationArg::Text(text) => Location::from_path_and_offset(&self.registry, &text)?,
                    LocationArg::Encoded(bytes) => {
                        Location::decode_client_location(&self.registry, &bytes)?
                    }
                };
                to_value(self.describe(location, args.flags))
            }
            Command::LookupLine(args) => {
                let path = paths::canonicalize(&args.path)?;
                let location = Location::from_line_col(&self.registry, &path, args.line, args.column)?;
                to_value(self.describe(location, args.flags))
            }
            Command::AddMakefile(args) => {
                to_value(self.add_makefile(&args.path, &args.extra_flags, args.options)?)
            }
            Command::AddSourceFile(args) => {
                let flags = args
                    .flags
                    .unwrap_or_else(|| self.config.default_compiler_flags.clone());
                to_value(self.add_source_file(args.path, flags, args.options)?)
            }
            Command::RemoveSourceFile(args) => {
                let removed = self.units.remove_source_file(&args.path);
                to_value(RemoveResult {
                    path: args.path,
                    removed,
                })
            }
            Command::LoadAst(args) => to_value(self.load_ast(args.path)?),
            Command::SaveAst(args) => {
                let units = Arc::clone(&self.units);
                let path = args.path.clone();
                let ast_path = self
                    .parse_pool
                    .spawn(format!("save {}", path.display()), move || units.save_ast(&path))
                    .wait()
                    .into_result()?;
                to_value(SaveResult {
                    path: args.path,
                    ast_path,
                })
            }
            Command::FileList(args) => {
                let pattern = args
                    .pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| IndexError::malformed(format!("invalid pattern: {}", e)))?;
                let files: Vec<PathBuf> = self
                    .units
                    .file_list(FileFilter {
                        unsaved_only: args.unsaved_only,
                        pattern,
                    })
                    .collect();
                to_value(FileListResult {
                    count: files.len(),
                    files,
                })
            }
            Command::Status(args) => {
                let query = StatusQuery::parse(&args.query)?;
                let job = StatusJob::new(
                    query,
                    Arc::clone(&self.registry),
                    Arc::clone(&self.units),
                    self.watcher.watched(),
                );
                to_value(self.job_pool.submit(job).wait().into_result()?)
            }
        }
    }

    fn describe(&self, location: Location, flags: KeyFlags) -> LookupResult {
        let path = location.path(&self.registry);
        let parser = self.units.parser();
        let (resolved, node) = path
            .as_deref()
            .and_then(|path| {
                self.units.with_unit(path, |entry| {
                    let resolved =
                        Location::from_parser(&self.registry, parser.as_ref(), &entry.unit, location.offset())
                            .map(|l| l.key(&self.registry, flags))
                            .map_err(|e| tracing::debug!("Cannot resolve {:?}: {}", location, e))
                            .ok();
                    (resolved, parser.node_at(&entry.unit, location.offset()))
                })
            })
            .unwrap_or((None, None));

        LookupResult {
            key: location.key(&self.registry, flags),
            file_id: location.file_id(),
            offset: location.offset(),
            indexed: path.as_deref().is_some_and(|p| self.units.is_indexed(p)),
            position: location.line_col(&self.registry),
            path,
            resolved,
            node,
        }
    }

    fn add_source_file(
        &self,
        path: PathBuf,
        flags: Vec<String>,
        options: ParseOptions,
    ) -> Result<UnitSummary> {
        let units = Arc::clone(&self.units);
        self.parse_pool
            .spawn(format!("add {}", path.display()), move || {
                units.add_source_file(&path, options, &flags)
            })
            .wait()
            .into_result()
    }

    fn load_ast(&self, path: PathBuf) -> Result<LoadOutcome> {
        let units = Arc::clone(&self.units);
        self.parse_pool
            .spawn(format!("load {}", path.display()), move || units.load_ast(&path))
            .wait()
            .into_result()
    }

    fn add_makefile(
        &self,
        makefile: &Path,
        extra_flags: &[String],
        options: ParseOptions,
    ) -> Result<AddMakefileResult> {
        let entries = makefile::read_compile_commands(makefile)?;
        let commands = entries.len();

        // Last command for a source wins
        let mut by_source = BTreeMap::new();
        for entry in entries {
            let mut flags = entry.flags;
            flags.extend_from_slice(extra_flags);
            by_source.insert(entry.source, flags);
        }
        tracing::info!(
            "{}: {} compile commands for {} sources",
            makefile.display(),
            commands,
            by_source.len()
        );

        let handles: Vec<_> = by_source
            .into_iter()
            .map(|(source, flags)| {
                let units = Arc::clone(&self.units);
                let path = source.clone();
                let handle = self
                    .parse_pool
                    .spawn(format!("add {}", source.display()), move || {
                        units.add_source_file(&path, options, &flags)
                    });
                (source, handle)
            })
            .collect();

        let mut added = Vec::new();
        let mut failed = Vec::new();
        for (source, handle) in handles {
            match handle.wait().into_result() {
                Ok(summary) => added.push(summary.path),
                Err(e) => failed.push(FailedFile {
                    path: source,
                    code: e.code().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        Ok(AddMakefileResult {
            commands,
            added,
            failed,
        })
    }

    fn flush_registry(&self) {
        if self.registry.pending_writes() > 0 {
            if let Err(e) = self.registry.flush_pending() {
                tracing::warn!("Registry still has unpersisted entries: {}", e);
            }
        }
    }

    /// Stop watching, wait for queued work, then dispose every unit
    pub fn shutdown(&self) -> ShutdownReport {
        if let Some(mut handle) = self.watcher_handle.lock().take() {
            handle.stop();
        }
        let timeout = self.config.drain_timeout();
        let report = ShutdownReport {
            abandoned_parses: self.parse_pool.drain(timeout),
            abandoned_jobs: self.job_pool.drain(timeout),
        };
        self.units.clear();
        self.flush_registry();
        tracing::info!(
            "Shut down ({} parses and {} jobs abandoned)",
            report.abandoned_parses,
            report.abandoned_jobs
        );
        report
    }
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}
