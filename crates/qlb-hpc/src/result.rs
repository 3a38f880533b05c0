//! Aggregable Monte Carlo results.
//!
//! The executor only needs [`MonteCarloResult::combine`] and the mapping
//! conversions. Submitters that reason about logical error counts
//! additionally require [`ErrorStatistics`].

use std::collections::BTreeMap;
use std::fmt::Debug;

use qlb_core::errors::{ErrorInfo, QlbError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of one or more dispatches, merged by associative combination.
pub trait MonteCarloResult:
    Clone + Debug + Send + Serialize + DeserializeOwned + 'static
{
    /// Returns the aggregate of `self` and `other`.
    fn combine(&self, other: &Self) -> Self;

    /// Converts the result into its mapping form for the job-state file.
    fn to_mapping(&self) -> Result<Value, QlbError> {
        serde_json::to_value(self)
            .map_err(|err| QlbError::Serde(ErrorInfo::new("result.to_mapping", err.to_string())))
    }

    /// Restores a result from its mapping form.
    fn from_mapping(value: &Value) -> Result<Self, QlbError> {
        serde_json::from_value(value.clone())
            .map_err(|err| QlbError::Serde(ErrorInfo::new("result.from_mapping", err.to_string())))
    }
}

/// Logical error counters exposed by results that track decoding failures.
pub trait ErrorStatistics {
    /// Number of shots that ended in a logical error.
    fn errors(&self) -> u64;

    /// Number of shots discarded by post-selection.
    fn discards(&self) -> u64 {
        0
    }

    /// Number of shots where the decoder panicked but sampling continued.
    fn panics(&self) -> u64 {
        0
    }

    /// Decoding time in seconds, excluding initialization.
    fn elapsed(&self) -> f64 {
        0.0
    }
}

/// Plain logical error counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LogicalErrorResult {
    /// Shots with a logical error.
    #[serde(default)]
    pub errors: u64,
    /// Shots discarded by post-selection.
    #[serde(default)]
    pub discards: u64,
    /// Shots where the decoder panicked.
    #[serde(default)]
    pub panics: u64,
    /// Decoding time in seconds.
    #[serde(default)]
    pub elapsed: f64,
}

impl LogicalErrorResult {
    /// Counters with only the error count set.
    pub fn with_errors(errors: u64) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }
}

impl MonteCarloResult for LogicalErrorResult {
    fn combine(&self, other: &Self) -> Self {
        Self {
            errors: self.errors + other.errors,
            discards: self.discards + other.discards,
            panics: self.panics + other.panics,
            elapsed: self.elapsed + other.elapsed,
        }
    }
}

impl ErrorStatistics for LogicalErrorResult {
    fn errors(&self) -> u64 {
        self.errors
    }

    fn discards(&self) -> u64 {
        self.discards
    }

    fn panics(&self) -> u64 {
        self.panics
    }

    fn elapsed(&self) -> f64 {
        self.elapsed
    }
}

/// Logical error counters of several decoders run on the same samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MultiDecoderLogicalErrorRates {
    /// Counters keyed by decoder name.
    #[serde(default)]
    pub results: BTreeMap<String, LogicalErrorResult>,
}

impl MonteCarloResult for MultiDecoderLogicalErrorRates {
    fn combine(&self, other: &Self) -> Self {
        let mut results = self.results.clone();
        for (decoder, result) in &other.results {
            results
                .entry(decoder.clone())
                .and_modify(|existing| *existing = existing.combine(result))
                .or_insert(*result);
        }
        Self { results }
    }
}

impl ErrorStatistics for MultiDecoderLogicalErrorRates {
    /// The smallest error count among decoders, so precision targets are met
    /// by every decoder.
    fn errors(&self) -> u64 {
        self.results
            .values()
            .map(|result| result.errors)
            .min()
            .unwrap_or(0)
    }
}

const LATENCY_BINS_PER_DECADE: i32 = 10;
const LATENCY_LOWEST_BIN: i32 = -9 * LATENCY_BINS_PER_DECADE;
const LATENCY_HIGHEST_BIN: i32 = 3 * LATENCY_BINS_PER_DECADE;

/// Log-binned distribution of per-shot decoding latencies.
///
/// Bins cover 1ns to 1000s with ten bins per decade. Values outside the range
/// land in the underflow or overflow counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LatencyDistribution {
    /// Sparse bin counts keyed by `floor(10 * log10(seconds))`.
    #[serde(default)]
    pub counts: BTreeMap<i32, u64>,
    /// Samples below 1ns (including non-positive values).
    #[serde(default)]
    pub underflow: u64,
    /// Samples at or above 1000s.
    #[serde(default)]
    pub overflow: u64,
    /// Sum of every recorded latency.
    #[serde(default)]
    pub sum: f64,
}

impl LatencyDistribution {
    /// Records one latency sample in seconds.
    pub fn record(&mut self, seconds: f64) {
        if !seconds.is_finite() || seconds <= 0.0 {
            self.underflow += 1;
            return;
        }
        self.sum += seconds;
        let bin = (seconds.log10() * LATENCY_BINS_PER_DECADE as f64).floor() as i32;
        if bin < LATENCY_LOWEST_BIN {
            self.underflow += 1;
        } else if bin >= LATENCY_HIGHEST_BIN {
            self.overflow += 1;
        } else {
            *self.counts.entry(bin).or_insert(0) += 1;
        }
    }

    /// Number of recorded samples.
    pub fn count(&self) -> u64 {
        self.underflow + self.overflow + self.counts.values().sum::<u64>()
    }

    /// Mean latency, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        let count = self.count();
        (count > 0).then(|| self.sum / count as f64)
    }

    /// Geometric centre of the bin holding the `q` quantile.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        let count = self.count();
        if count == 0 {
            return None;
        }
        let rank = (q.clamp(0.0, 1.0) * (count - 1) as f64).round() as u64;
        let mut seen = self.underflow;
        if rank < seen {
            return Some(bin_centre(LATENCY_LOWEST_BIN - 1));
        }
        for (&bin, &n) in &self.counts {
            seen += n;
            if rank < seen {
                return Some(bin_centre(bin));
            }
        }
        Some(bin_centre(LATENCY_HIGHEST_BIN))
    }
}

fn bin_centre(bin: i32) -> f64 {
    10f64.powf((bin as f64 + 0.5) / LATENCY_BINS_PER_DECADE as f64)
}

impl MonteCarloResult for LatencyDistribution {
    fn combine(&self, other: &Self) -> Self {
        let mut counts = self.counts.clone();
        for (&bin, &n) in &other.counts {
            *counts.entry(bin).or_insert(0) += n;
        }
        Self {
            counts,
            underflow: self.underflow + other.underflow,
            overflow: self.overflow + other.overflow,
            sum: self.sum + other.sum,
        }
    }
}

/// Logical error counters bundled with the decoding latency distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DecodingTimeDistribution {
    /// Logical error counters.
    #[serde(default)]
    pub result: LogicalErrorResult,
    /// Per-shot latency histogram.
    #[serde(default)]
    pub latency: LatencyDistribution,
}

impl MonteCarloResult for DecodingTimeDistribution {
    fn combine(&self, other: &Self) -> Self {
        Self {
            result: self.result.combine(&other.result),
            latency: self.latency.combine(&other.latency),
        }
    }
}

impl ErrorStatistics for DecodingTimeDistribution {
    fn errors(&self) -> u64 {
        self.result.errors
    }

    fn discards(&self) -> u64 {
        self.result.discards
    }

    fn panics(&self) -> u64 {
        self.result.panics
    }

    fn elapsed(&self) -> f64 {
        self.result.elapsed
    }
}
