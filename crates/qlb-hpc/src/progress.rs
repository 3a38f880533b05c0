//! Text table summarising the state of every job.

use std::fmt;

use crate::executor::MonteCarloJobExecutor;
use crate::job::MonteCarloJob;
use crate::result::ErrorStatistics;
use crate::sampler::Sampler;

/// Scheduling state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobStatus {
    /// Shots are outstanding.
    Pending,
    /// A dispatch failed; the job is excluded from scheduling.
    Panicked,
    /// No outstanding shots.
    Finished,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::Panicked => "panicked",
            JobStatus::Finished => "finished",
        };
        f.write_str(label)
    }
}

/// Error counters of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorColumns {
    /// Shots with a logical error.
    pub errors: u64,
    /// Discarded shots.
    pub discards: u64,
    /// Shots where the decoder panicked.
    pub panics: u64,
    /// Failure rate with its 99% confidence half-width.
    pub failure_rate: String,
}

/// One job of the report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRow {
    /// Scheduling state.
    pub status: JobStatus,
    /// First characters of the parameter hash.
    pub key: String,
    /// Parameters as displayed.
    pub job: String,
    /// Finished shots.
    pub finished: u64,
    /// Outstanding shots, queued quota included.
    pub pending: u64,
    /// Outstanding shots already handed to workers.
    pub submitted: u64,
    /// Dispatches in flight.
    pub in_flight: usize,
    /// Finished plus pending shots.
    pub expecting: u64,
    /// Cumulative seconds.
    pub duration: f64,
    /// Error counters, when the result exposes them and a shot finished.
    pub errors: Option<ErrorColumns>,
}

/// Snapshot of an executor, rendered as an aligned table by `Display`.
///
/// Pending jobs come first (longest running first), then panicked jobs,
/// then finished jobs by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressReport {
    /// Rows in display order.
    pub rows: Vec<ProgressRow>,
    /// Dispatches in flight across all jobs.
    pub in_flight: usize,
    /// Whether error columns are shown.
    pub show_errors: bool,
}

impl ProgressReport {
    /// Report with error counters.
    pub fn of<S>(executor: &MonteCarloJobExecutor<S>) -> Self
    where
        S: Sampler,
        S::Output: ErrorStatistics,
    {
        Self::build(executor, true, |job| {
            job.result().map(|result| {
                let stats = job.stats();
                let failure_rate = if stats.samples() == 0 {
                    "-".to_string()
                } else {
                    format!(
                        "{:.2e}±{:.1e}",
                        stats.failure_rate_value(),
                        stats.failure_rate_uncertainty()
                    )
                };
                ErrorColumns {
                    errors: result.errors(),
                    discards: result.discards(),
                    panics: result.panics(),
                    failure_rate,
                }
            })
        })
    }

    /// Report for results without error counters.
    pub fn without_errors<S: Sampler>(executor: &MonteCarloJobExecutor<S>) -> Self {
        Self::build(executor, false, |_| None)
    }

    fn build<S, F>(executor: &MonteCarloJobExecutor<S>, show_errors: bool, errors_of: F) -> Self
    where
        S: Sampler,
        F: Fn(&MonteCarloJob<S::Output>) -> Option<ErrorColumns>,
    {
        let mut pending = Vec::new();
        let mut panicked = Vec::new();
        let mut finished = Vec::new();
        for job in executor.iter() {
            let queued = executor.pending_submit(job.hash());
            let row = ProgressRow {
                status: JobStatus::Finished,
                key: job.parameters().short_hash().to_string(),
                job: job.parameters().to_string(),
                finished: job.finished_shots(),
                pending: job.pending_shots(),
                submitted: job.pending_shots().saturating_sub(queued),
                in_flight: executor.in_flight_for(job.hash()),
                expecting: job.expecting_shots(),
                duration: job.duration(),
                errors: errors_of(job),
            };
            if executor.panics().contains(job.parameters()) {
                panicked.push(ProgressRow {
                    status: JobStatus::Panicked,
                    ..row
                });
            } else if job.pending_shots() > 0 {
                pending.push(ProgressRow {
                    status: JobStatus::Pending,
                    ..row
                });
            } else {
                finished.push(row);
            }
        }
        pending.sort_by(|a, b| b.duration.total_cmp(&a.duration));
        finished.sort_by(|a, b| a.job.cmp(&b.job));
        let mut rows = pending;
        rows.extend(panicked);
        rows.extend(finished);
        Self {
            rows,
            in_flight: executor.in_flight_count(),
            show_errors,
        }
    }

    /// Number of rows with the given status.
    pub fn count(&self, status: JobStatus) -> usize {
        self.rows.iter().filter(|row| row.status == status).count()
    }
}

fn percent(part: u64, whole: u64) -> String {
    if whole == 0 {
        format!("{part}")
    } else {
        format!("{part} ({}%)", part * 100 / whole)
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut header = vec![
            "Status".to_string(),
            "JobKey".to_string(),
            "Job".to_string(),
            "Finished".to_string(),
            "Pending".to_string(),
            "Submitted".to_string(),
            format!("{} in flight", self.in_flight),
            "Total".to_string(),
            "Duration".to_string(),
        ];
        if self.show_errors {
            header.extend(["Errors", "Discards", "Panics", "Error Rate"].map(String::from));
        }
        let mut table = vec![header];
        for row in &self.rows {
            let mut cells = vec![row.status.to_string(), row.key.clone(), row.job.clone()];
            if row.expecting == 0 {
                cells.extend([row.finished.to_string(), "-".into(), "-".into(), "-".into(), "-".into()]);
            } else {
                cells.extend([
                    percent(row.finished, row.expecting),
                    percent(row.pending, row.expecting),
                    percent(row.submitted, row.expecting),
                    row.in_flight.to_string(),
                    row.expecting.to_string(),
                ]);
            }
            cells.push(format!("{:.1}s ({:.1}min)", row.duration, row.duration / 60.0));
            if self.show_errors {
                match &row.errors {
                    Some(errors) => cells.extend([
                        errors.errors.to_string(),
                        errors.discards.to_string(),
                        errors.panics.to_string(),
                        errors.failure_rate.clone(),
                    ]),
                    None => cells.extend(["-", "-", "-", "-"].map(String::from)),
                }
            }
            table.push(cells);
        }
        let columns = table[0].len();
        let widths: Vec<usize> = (0..columns)
            .map(|column| {
                table
                    .iter()
                    .map(|cells| cells.get(column).map_or(0, |cell| cell.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        for cells in &table {
            let line = cells
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(column, (cell, &width))| {
                    if column < 3 {
                        format!("{cell:<width$}")
                    } else {
                        format!("{cell:>width$}")
                    }
                })
                .collect::<Vec<_>>()
                .join("  ");
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}
