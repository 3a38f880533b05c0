//! JSON job-state file shared by executors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use qlb_core::errors::{ErrorInfo, QlbError};
use qlb_core::serde::{from_json_slice, to_pretty_json_bytes};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::MonteCarloJob;
use crate::parameters::{JobParameters, ParameterStrings};
use crate::result::MonteCarloResult;
use crate::transaction::{read_shared, transact};

/// Persisted progress of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    /// Positional values in string form.
    #[serde(default)]
    pub args: Vec<String>,
    /// Keyword values in string form.
    #[serde(default)]
    pub kwargs: BTreeMap<String, String>,
    /// Result mapping, `null` before the first finished shot.
    #[serde(default)]
    pub result: Option<Value>,
    /// Finished shots.
    #[serde(default)]
    pub shots: u64,
    /// Cumulative seconds.
    #[serde(default)]
    pub duration: f64,
    /// Shortest single dispatch, in seconds.
    #[serde(default)]
    pub min_time: Option<f64>,
}

impl StoredJob {
    /// Snapshot of a job.
    pub fn of<R: MonteCarloResult>(job: &MonteCarloJob<R>) -> Result<Self, QlbError> {
        let ParameterStrings { args, kwargs } = job.parameters().to_strings();
        let result = match job.result() {
            Some(result) => Some(result.to_mapping()?),
            None => None,
        };
        Ok(Self {
            args,
            kwargs,
            result,
            shots: job.finished_shots(),
            duration: job.duration(),
            min_time: job.min_time(),
        })
    }

    fn check_parameters(&self, hash: &str, parameters: &JobParameters) -> Result<(), QlbError> {
        let expected = parameters.to_strings();
        if self.args != expected.args || self.kwargs != expected.kwargs {
            return Err(QlbError::HashConflict(
                ErrorInfo::new("store.hash_conflict", "stored job has different parameters")
                    .with_context("hash", hash)
                    .with_context("job", parameters.to_string())
                    .with_context("stored_args", self.args.join(", "))
                    .with_context("stored_kwargs", format!("{:?}", self.kwargs)),
            ));
        }
        Ok(())
    }
}

/// Contents of the job-state file keyed by parameter hash.
pub type StateMap = BTreeMap<String, StoredJob>;

/// Handle on the job-state file.
#[derive(Debug, Clone)]
pub struct JobStateFile {
    path: PathBuf,
}

impl JobStateFile {
    /// Binds a handle to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every entry under a shared lock; `None` when the file is missing.
    pub fn load(&self) -> Result<Option<StateMap>, QlbError> {
        match read_shared(&self.path)? {
            Some(text) => Ok(Some(from_json_slice(text.as_bytes())?)),
            None => Ok(None),
        }
    }

    /// Overwrites the tally of `job` with its stored entry, if any.
    /// Returns whether an entry was found.
    pub fn hydrate<R: MonteCarloResult>(
        state: &StateMap,
        job: &mut MonteCarloJob<R>,
    ) -> Result<bool, QlbError> {
        let Some(stored) = state.get(job.hash()) else {
            return Ok(false);
        };
        stored.check_parameters(job.hash(), job.parameters())?;
        let result = match &stored.result {
            Some(mapping) => Some(R::from_mapping(mapping)?),
            None => None,
        };
        job.restore(stored.shots, stored.duration, result, stored.min_time);
        Ok(true)
    }

    /// Writes every job into the file, keeping entries of unknown jobs.
    pub fn persist<'a, R, I>(&self, jobs: I) -> Result<(), QlbError>
    where
        R: MonteCarloResult + 'a,
        I: IntoIterator<Item = &'a MonteCarloJob<R>>,
    {
        let snapshots = jobs
            .into_iter()
            .map(|job| Ok((job.hash().to_string(), job.parameters(), StoredJob::of(job)?)))
            .collect::<Result<Vec<_>, QlbError>>()?;
        transact(&self.path, |current| {
            let mut state: StateMap = match current {
                Some(text) => from_json_slice(text.as_bytes())?,
                None => StateMap::new(),
            };
            for (hash, parameters, snapshot) in snapshots {
                if let Some(existing) = state.get(&hash) {
                    existing.check_parameters(&hash, parameters)?;
                }
                state.insert(hash, snapshot);
            }
            to_pretty_json_bytes(&state)
        })
    }
}
