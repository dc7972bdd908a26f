//! Status reporting job

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::parser::{Diagnostics, UnitParser};
use crate::registry::{FileId, FileRegistry};

use super::jobs::Job;
use super::unit_store::{UnitStore, UnitSummary};

/// Which part of the daemon state to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusQuery {
    All,
    Files,
    Units,
    Failures,
    Watched,
}

impl StatusQuery {
    pub fn parse(query: &str) -> Result<Self> {
        match query.trim() {
            "" | "all" => Ok(Self::All),
            "files" => Ok(Self::Files),
            "units" => Ok(Self::Units),
            "failures" => Ok(Self::Failures),
            "watched" => Ok(Self::Watched),
            other => Err(IndexError::malformed(format!(
                "unknown status query '{}' (expected files, units, failures or watched)",
                other
            ))),
        }
    }

    fn wants(self, part: StatusQuery) -> bool {
        self == Self::All || self == part
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: FileId,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub diagnostics: Diagnostics,
}

/// Snapshot of daemon state. Sections not asked for are omitted.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: String,
    pub file_count: usize,
    pub unit_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<Vec<UnitSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<Vec<FailureRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watched: Option<Vec<PathBuf>>,
}

/// Read-only report over the registry and store, run on the job pool
pub struct StatusJob<P: UnitParser> {
    query: StatusQuery,
    registry: Arc<FileRegistry>,
    units: Arc<UnitStore<P>>,
    watched: Vec<PathBuf>,
}

impl<P: UnitParser> StatusJob<P> {
    pub fn new(
        query: StatusQuery,
        registry: Arc<FileRegistry>,
        units: Arc<UnitStore<P>>,
        watched: Vec<PathBuf>,
    ) -> Self {
        Self {
            query,
            registry,
            units,
            watched,
        }
    }
}

impl<P: UnitParser> Job for StatusJob<P> {
    type Output = StatusReport;

    fn name(&self) -> String {
        format!("status {:?}", self.query)
    }

    fn execute(self) -> Result<StatusReport> {
        let q = self.query;
        let files = q.wants(StatusQuery::Files).then(|| {
            self.registry
                .entries()
                .into_iter()
                .map(|(id, path)| FileRecord { id, path })
                .collect()
        });
        let units = q
            .wants(StatusQuery::Units)
            .then(|| self.units.summaries());
        let failures = q.wants(StatusQuery::Failures).then(|| {
            self.units
                .failures()
                .into_iter()
                .map(|(path, diagnostics)| FailureRecord { path, diagnostics })
                .collect()
        });
        let watched = q.wants(StatusQuery::Watched).then_some(self.watched);

        Ok(StatusReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            file_count: self.registry.len(),
            unit_count: self.units.len(),
            files,
            units,
            failures,
            watched,
        })
    }
}
