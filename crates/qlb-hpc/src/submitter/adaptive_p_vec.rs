use qlb_core::errors::{ErrorInfo, QlbError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Submission, Submitter};
use crate::job::{JobTable, MonteCarloJob};
use crate::parameters::JobParameters;
use crate::result::{ErrorStatistics, MonteCarloResult};
use crate::stats::precision_to_errors;

const SEARCHING_FOR: i64 = 20;

/// Log-spaced physical error rate grid around `p_center`.
///
/// Sweep jobs are keyed by the keyword parameters `config` and `p`. Always
/// derive `p` from an index with [`p`](Self::p) so repeated lookups hash to
/// the same job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptivePVec {
    /// Grid point with index 0, where the search starts.
    pub p_center: f64,
    /// Grid points per factor of ten.
    pub per10_p_count: u32,
    /// Largest physical error rate worth sampling.
    #[serde(default = "default_p_upper")]
    pub p_upper: f64,
}

fn default_p_upper() -> f64 {
    0.4
}

impl AdaptivePVec {
    /// Grid with the default `p_upper` of 0.4.
    pub fn new(p_center: f64, per10_p_count: u32) -> Self {
        Self {
            p_center,
            per10_p_count,
            p_upper: default_p_upper(),
        }
    }

    /// Physical error rate of index `i`.
    pub fn p(&self, i: i64) -> f64 {
        self.p_center * 10f64.powf(i as f64 / self.per10_p_count as f64)
    }

    /// Nearest index of `p`.
    pub fn i(&self, p: f64) -> i64 {
        (self.per10_p_count as f64 * (p / self.p_center).log10()).round() as i64
    }

    /// Parameters of the sweep job at `p` for `config`.
    pub fn parameters(&self, config: &Value, p: f64) -> JobParameters {
        JobParameters::from_kwargs([("config", config.clone()), ("p", Value::from(p))])
    }

    /// Sorted indices of the existing sweep jobs of `config`.
    ///
    /// Starting from the centre, each side is scanned up to 20 indices past
    /// the last job found. The centre job must exist.
    pub fn i_vec<R: MonteCarloResult>(
        &self,
        jobs: &JobTable<R>,
        config: &Value,
    ) -> Result<Vec<i64>, QlbError> {
        let centre = self.parameters(config, self.p_center);
        if !jobs.contains(&centre) {
            return Err(QlbError::Lookup(
                ErrorInfo::new("submitter.p_center_missing", "the centre job of the sweep is not registered")
                    .with_context("job", centre.to_string()),
            ));
        }
        let exists = |i: i64| jobs.contains(&self.parameters(config, self.p(i)));
        let mut i_vec = vec![0];
        let mut lower = -1;
        while let Some(found) = (lower - SEARCHING_FOR + 1..=lower).rev().find(|&i| exists(i)) {
            i_vec.push(found);
            lower = found - 1;
        }
        let mut upper = 1;
        while let Some(found) = (upper..upper + SEARCHING_FOR)
            .take_while(|&i| self.p(i) <= self.p_upper)
            .find(|&i| exists(i))
        {
            i_vec.push(found);
            upper = found + 1;
        }
        i_vec.sort_unstable();
        Ok(i_vec)
    }

    /// Physical error rates of the existing sweep jobs of `config`.
    pub fn p_vec<R: MonteCarloResult>(
        &self,
        jobs: &JobTable<R>,
        config: &Value,
    ) -> Result<Vec<f64>, QlbError> {
        Ok(self
            .i_vec(jobs, config)?
            .into_iter()
            .map(|i| self.p(i))
            .collect())
    }

    /// Existing sweep jobs of `config`, in increasing `p`.
    pub fn jobs<'a, R: MonteCarloResult>(
        &self,
        jobs: &'a JobTable<R>,
        config: &Value,
    ) -> Result<Vec<&'a MonteCarloJob<R>>, QlbError> {
        self.p_vec(jobs, config)?
            .into_iter()
            .map(|p| jobs.get_assert(&self.parameters(config, p)))
            .collect()
    }
}

/// Explores the threshold curve of several configurations.
///
/// Each configuration starts from its centre job. Once a point is trusted,
/// neighbouring points are created lazily (mostly towards lower `p`, where
/// logical error rates are smaller and sampling is costlier) and every point
/// is pushed towards `target_precision`, down to logical error rates of
/// `min_pl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptivePVecSubmitter {
    /// Configurations to sweep, used as the `config` keyword.
    pub config_vec: Vec<Value>,
    /// Physical error rate grid.
    pub ap_vec: AdaptivePVec,
    /// Factor range of `p` explored in parallel below a trusted point.
    #[serde(default = "default_parallel_p_range")]
    pub parallel_p_range: f64,
    /// Smallest logical error rate worth resolving.
    #[serde(default = "default_min_pl")]
    pub min_pl: f64,
    /// Precision trusted points are pushed towards.
    #[serde(default = "default_target_precision")]
    pub target_precision: f64,
    /// Precision needed before a point is trusted.
    #[serde(default = "default_min_precision")]
    pub min_precision: f64,
    /// Rough CPU seconds budget per point.
    #[serde(default = "default_time_limit")]
    pub time_limit: f64,
    /// Smallest number of shots of a point.
    #[serde(default = "default_min_shots")]
    pub min_shots: u64,
}

fn default_parallel_p_range() -> f64 {
    10.0
}

fn default_min_pl() -> f64 {
    1e-5
}

fn default_target_precision() -> f64 {
    0.1
}

fn default_min_precision() -> f64 {
    0.3
}

fn default_time_limit() -> f64 {
    3600.0
}

fn default_min_shots() -> u64 {
    1000
}

impl AdaptivePVecSubmitter {
    /// Submitter with default budgets.
    pub fn new(config_vec: Vec<Value>, ap_vec: AdaptivePVec) -> Self {
        Self {
            config_vec,
            ap_vec,
            parallel_p_range: default_parallel_p_range(),
            min_pl: default_min_pl(),
            target_precision: default_target_precision(),
            min_precision: default_min_precision(),
            time_limit: default_time_limit(),
            min_shots: default_min_shots(),
        }
    }

    /// Shot cap of a point that is not trusted yet.
    pub fn max_shots_when_untrusted(&self) -> u64 {
        (3.0 / self.min_pl).round() as u64
    }

    /// Number of grid points created below a trusted point.
    pub fn parallel_p_count(&self) -> i64 {
        let count = (self.parallel_p_range.log10() * self.ap_vec.per10_p_count as f64).ceil();
        (count as i64).max(1)
    }

    /// Proposals for one untrusted point, `None` when it should wait.
    fn untrusted<R>(&self, job: &MonteCarloJob<R>, errors: u64) -> Option<u64>
    where
        R: MonteCarloResult + ErrorStatistics,
    {
        if job.duration() >= self.time_limit {
            return None;
        }
        let expecting = job.expecting_shots();
        let total = if errors < 3 {
            if expecting < self.min_shots {
                return Some(self.min_shots - expecting);
            }
            if (job.finished_shots() as f64) < expecting as f64 / 2.0 {
                return None;
            }
            (job.finished_shots() * 3).min(self.max_shots_when_untrusted())
        } else {
            let total = (precision_to_errors(self.min_precision) as f64 / errors as f64
                * job.finished_shots() as f64)
                .round() as u64;
            total.min(self.max_shots_when_untrusted())
        };
        (total > expecting).then(|| total - expecting)
    }
}

impl<R: MonteCarloResult + ErrorStatistics> Submitter<R> for AdaptivePVecSubmitter {
    fn submit(&mut self, jobs: &mut JobTable<R>) -> Result<Vec<Submission>, QlbError> {
        let mut submit = Vec::new();
        let trusted_errors = precision_to_errors(self.min_precision);
        for config in &self.config_vec {
            let mut trusted = Vec::new();
            for job in self.ap_vec.jobs(jobs, config)? {
                if job.result().is_none() {
                    if job.expecting_shots() < self.min_shots {
                        submit.push(Submission::new(job, self.min_shots - job.expecting_shots()));
                    }
                    continue;
                }
                let errors = job.errors();
                if errors >= trusted_errors {
                    trusted.push((job.parameters().clone(), errors));
                    continue;
                }
                if let Some(shots) = self.untrusted(job, errors) {
                    submit.push(Submission::new(job, shots));
                }
            }
            for (parameters, errors) in trusted {
                let Some(p) = parameters.get_f64("p") else {
                    continue;
                };
                let i = self.ap_vec.i(p);
                for neighbour in i - self.parallel_p_count()..=i + 1 {
                    let neighbour_p = self.ap_vec.p(neighbour);
                    if neighbour_p > self.ap_vec.p_upper {
                        continue;
                    }
                    jobs.ensure_job(self.ap_vec.parameters(config, neighbour_p))?;
                }
                let job = jobs.get_assert(&parameters)?;
                if job.duration() >= self.time_limit {
                    continue;
                }
                let total = (precision_to_errors(self.target_precision) as f64 / errors as f64
                    * job.finished_shots() as f64)
                    .round() as u64;
                if total > job.expecting_shots() {
                    submit.push(Submission::new(job, total - job.expecting_shots()));
                }
            }
        }
        Ok(submit)
    }
}
