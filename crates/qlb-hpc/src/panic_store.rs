//! Persistent record of failed dispatches.
//!
//! A job with an entry here is never dispatched again until the entry is
//! cleared. The file is YAML so traces stay readable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use qlb_core::errors::{ErrorInfo, QlbError};
use qlb_core::serde::{from_yaml_slice, to_yaml_string};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::parameters::JobParameters;
use crate::transaction::{read_shared, FileTransaction};

/// Failure history of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPanic {
    /// Parameters of the failing job.
    pub parameters: JobParameters,
    /// One-line summary of the most recent failure.
    pub latest: String,
    /// Every recorded trace, oldest first.
    #[serde(default)]
    pub panics: Vec<String>,
}

impl JobPanic {
    /// Entry with a summary and an empty history.
    pub fn new(parameters: JobParameters, latest: impl Into<String>) -> Self {
        Self {
            parameters,
            latest: latest.into(),
            panics: Vec::new(),
        }
    }

    /// Appends a trace to the history.
    pub fn with_panic(mut self, trace: impl Into<String>) -> Self {
        self.panics.push(trace.into());
        self
    }

    /// Hash of the failing job.
    pub fn hash(&self) -> &str {
        self.parameters.hash()
    }
}

/// In-memory view of the panic file.
#[derive(Debug, Clone)]
pub struct PanicStore {
    path: PathBuf,
    store: IndexMap<String, JobPanic>,
}

impl PanicStore {
    /// Empty store bound to `path`; nothing is read until
    /// [`load_from_file`](Self::load_from_file).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            store: IndexMap::new(),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory entries with the file contents. A missing file
    /// yields an empty store.
    pub fn load_from_file(&mut self) -> Result<(), QlbError> {
        let Some(text) = read_shared(&self.path)? else {
            self.store.clear();
            return Ok(());
        };
        let stored: BTreeMap<String, JobPanic> = from_yaml_slice(text.as_bytes())?;
        self.store = stored.into_iter().collect();
        Ok(())
    }

    /// Records a failure and persists immediately.
    ///
    /// For a known job the summary is replaced and the history appended.
    pub fn add_panic(&mut self, panic: JobPanic) -> Result<(), QlbError> {
        match self.store.get_mut(panic.hash()) {
            Some(existing) => {
                if existing.parameters != panic.parameters {
                    return Err(conflict(panic.hash(), &existing.parameters, &panic.parameters));
                }
                existing.latest = panic.latest;
                existing.panics.extend(panic.panics);
            }
            None => {
                self.store.insert(panic.hash().to_string(), panic);
            }
        }
        self.update_file()
    }

    /// Whether the job has a recorded failure.
    pub fn contains(&self, parameters: &JobParameters) -> bool {
        self.store.contains_key(parameters.hash())
    }

    /// Whether a job hash has a recorded failure.
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.store.contains_key(hash)
    }

    /// Failure history of the job.
    pub fn get_panic(&self, parameters: &JobParameters) -> Option<&JobPanic> {
        self.store.get(parameters.hash())
    }

    /// Number of failing jobs.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no job has failed.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &JobPanic> {
        self.store.values()
    }

    /// Forgets the failure of one job, in memory and on disk.
    /// Returns the removed entry.
    pub fn clear_panic(&mut self, parameters: &JobParameters) -> Result<Option<JobPanic>, QlbError> {
        let removed = self.store.shift_remove(parameters.hash());
        let transaction = FileTransaction::begin(&self.path)?;
        let mut persisted = parse(&transaction)?;
        let on_disk = persisted.remove(parameters.hash());
        if on_disk.is_none() && removed.is_none() {
            return Ok(None);
        }
        transaction.commit(to_yaml_string(&persisted)?.as_bytes())?;
        debug!(job = %parameters.short_hash(), "cleared panic entry");
        Ok(removed.or(on_disk))
    }

    /// Merges the in-memory entries into the file.
    ///
    /// Histories are unioned so traces recorded by other processes survive,
    /// and entries for jobs this store never saw are kept untouched.
    pub fn update_file(&mut self) -> Result<(), QlbError> {
        let transaction = FileTransaction::begin(&self.path)?;
        let mut persisted = parse(&transaction)?;
        for (hash, entry) in self.store.iter_mut() {
            match persisted.get_mut(hash) {
                Some(stored) => {
                    if stored.parameters != entry.parameters {
                        return Err(conflict(hash, &stored.parameters, &entry.parameters));
                    }
                    for trace in &entry.panics {
                        if !stored.panics.contains(trace) {
                            stored.panics.push(trace.clone());
                        }
                    }
                    stored.latest = entry.latest.clone();
                    *entry = stored.clone();
                }
                None => {
                    persisted.insert(hash.clone(), entry.clone());
                }
            }
        }
        transaction.commit(to_yaml_string(&persisted)?.as_bytes())
    }
}

fn parse(transaction: &FileTransaction) -> Result<BTreeMap<String, JobPanic>, QlbError> {
    match transaction.contents() {
        Some(text) => from_yaml_slice(text.as_bytes()),
        None => Ok(BTreeMap::new()),
    }
}

fn conflict(hash: &str, stored: &JobParameters, incoming: &JobParameters) -> QlbError {
    QlbError::HashConflict(
        ErrorInfo::new("panic_store.hash_conflict", "stored panic belongs to different parameters")
            .with_context("hash", hash)
            .with_context("stored", stored.to_string())
            .with_context("incoming", incoming.to_string()),
    )
}
