//! Synthetic samplers for driving the executor from plan files.
//!
//! Both samplers draw independent shots that fail with probability equal to
//! the job's `p` keyword times a per-decoder scale. They stand in for a real
//! code/noise/decoder stack when tuning schedules.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use qlb_core::errors::{ErrorInfo, QlbError};
use qlb_hpc::registry::{option_f64, option_u64, Options};
use qlb_hpc::result::MultiDecoderLogicalErrorRates;
use qlb_hpc::{JobParameters, LogicalErrorResult, Registry, SampleError, Sampler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

/// A resolved built-in sampler. The variant fixes the result type.
#[derive(Debug)]
pub enum BuiltinSampler {
    /// Plain logical error counters.
    Bernoulli(BernoulliSampler),
    /// Counters for several decoders run on the same shots.
    MultiDecoder(MultiDecoderSampler),
}

/// Registry holding `bernoulli` and `multi-decoder`.
pub fn builtin_samplers() -> Result<Registry<BuiltinSampler>, QlbError> {
    let mut registry = Registry::new("sampler");
    registry.register("bernoulli", |options| {
        BernoulliSampler::from_options(options).map(BuiltinSampler::Bernoulli)
    })?;
    registry.register("multi-decoder", |options| {
        MultiDecoderSampler::from_options(options).map(BuiltinSampler::MultiDecoder)
    })?;
    Ok(registry)
}

/// Random number source. Seeded streams derive one generator per dispatch
/// from the seed, the job hash and a dispatch counter.
#[derive(Debug)]
struct ShotStream {
    seed: Option<u64>,
    dispatches: AtomicU64,
}

impl ShotStream {
    fn from_options(options: &Options) -> Result<Self, QlbError> {
        let seed = match options.get("seed") {
            None | Some(Value::Null) => None,
            Some(_) => Some(option_u64(options, "seed", 0)?),
        };
        Ok(Self {
            seed,
            dispatches: AtomicU64::new(0),
        })
    }

    fn rng(&self, parameters: &JobParameters) -> StdRng {
        let Some(seed) = self.seed else {
            return StdRng::from_entropy();
        };
        let job = parameters
            .hash()
            .get(..16)
            .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
            .unwrap_or(0);
        let dispatch = self.dispatches.fetch_add(1, Ordering::Relaxed);
        StdRng::seed_from_u64(seed ^ job ^ dispatch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

fn invalid_info(option: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new("sampler.invalid_option", message).with_context("option", option)
}

fn invalid(option: &str, message: &str) -> QlbError {
    QlbError::Config(invalid_info(option, message))
}

fn physical_rate(parameters: &JobParameters) -> Result<f64, SampleError> {
    let p = parameters
        .get_f64("p")
        .ok_or_else(|| SampleError::from(format!("job {parameters} has no numeric `p`")))?;
    if !(0.0..=1.0).contains(&p) {
        return Err(format!("physical error rate {p} is not a probability").into());
    }
    Ok(p)
}

/// Each shot is discarded with `discard_rate`, otherwise fails with
/// probability `p * scale` (capped at 1).
#[derive(Debug)]
pub struct BernoulliSampler {
    scale: f64,
    discard_rate: f64,
    stream: ShotStream,
}

impl BernoulliSampler {
    /// Options: `scale` (default 1), `discard_rate` (default 0), `seed`.
    pub fn from_options(options: &Options) -> Result<Self, QlbError> {
        let scale = option_f64(options, "scale", 1.0)?;
        if !(scale >= 0.0) || !scale.is_finite() {
            return Err(invalid("scale", "must be a non-negative number"));
        }
        let discard_rate = option_f64(options, "discard_rate", 0.0)?;
        if !(0.0..=1.0).contains(&discard_rate) {
            return Err(invalid("discard_rate", "must lie in [0, 1]"));
        }
        Ok(Self {
            scale,
            discard_rate,
            stream: ShotStream::from_options(options)?,
        })
    }
}

impl Sampler for BernoulliSampler {
    type Output = LogicalErrorResult;

    fn sample(
        &self,
        shots: u64,
        parameters: &JobParameters,
    ) -> Result<(u64, LogicalErrorResult), SampleError> {
        let rate = (physical_rate(parameters)? * self.scale).min(1.0);
        let mut rng = self.stream.rng(parameters);
        let started = Instant::now();
        let mut result = LogicalErrorResult::default();
        for _ in 0..shots {
            if self.discard_rate > 0.0 && rng.gen_bool(self.discard_rate) {
                result.discards += 1;
            } else if rng.gen_bool(rate) {
                result.errors += 1;
            }
        }
        result.elapsed = started.elapsed().as_secs_f64();
        Ok((shots, result))
    }

    fn name(&self) -> String {
        "bernoulli".to_string()
    }
}

/// Several decoders judged on one uniform draw per shot, so a decoder with a
/// larger scale fails on a superset of the shots of a smaller one.
#[derive(Debug)]
pub struct MultiDecoderSampler {
    decoders: BTreeMap<String, f64>,
    stream: ShotStream,
}

impl MultiDecoderSampler {
    /// Options: `decoders` (name to scale, default `mwpm: 1`,
    /// `union-find: 1.5`) and `seed`.
    pub fn from_options(options: &Options) -> Result<Self, QlbError> {
        let decoders = match options.get("decoders") {
            None => BTreeMap::from([("mwpm".to_string(), 1.0), ("union-find".to_string(), 1.5)]),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, scale)| match scale.as_f64() {
                    Some(scale) if scale >= 0.0 && scale.is_finite() => Ok((name.clone(), scale)),
                    _ => Err(QlbError::Config(
                        invalid_info("decoders", "decoder scales must be non-negative numbers")
                            .with_context("decoder", name.as_str()),
                    )),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(invalid("decoders", "expected a map of decoder name to scale")),
        };
        if decoders.is_empty() {
            return Err(invalid("decoders", "at least one decoder is required"));
        }
        Ok(Self {
            decoders,
            stream: ShotStream::from_options(options)?,
        })
    }

    /// Decoder names in result order.
    pub fn decoders(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }
}

impl Sampler for MultiDecoderSampler {
    type Output = MultiDecoderLogicalErrorRates;

    fn sample(
        &self,
        shots: u64,
        parameters: &JobParameters,
    ) -> Result<(u64, MultiDecoderLogicalErrorRates), SampleError> {
        let p = physical_rate(parameters)?;
        let mut rng = self.stream.rng(parameters);
        let started = Instant::now();
        let mut errors = vec![0u64; self.decoders.len()];
        for _ in 0..shots {
            let draw: f64 = rng.gen();
            for (count, scale) in errors.iter_mut().zip(self.decoders.values()) {
                if draw < p * scale {
                    *count += 1;
                }
            }
        }
        let elapsed = started.elapsed().as_secs_f64();
        let results = self
            .decoders
            .keys()
            .zip(errors)
            .map(|(name, errors)| {
                let result = LogicalErrorResult {
                    errors,
                    elapsed,
                    ..LogicalErrorResult::default()
                };
                (name.clone(), result)
            })
            .collect();
        Ok((shots, MultiDecoderLogicalErrorRates { results }))
    }

    fn name(&self) -> String {
        "multi-decoder".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlb_hpc::ErrorStatistics;
    use serde_json::json;

    fn options(value: Value) -> Options {
        serde_json::from_value(value).unwrap()
    }

    fn job(p: f64) -> JobParameters {
        JobParameters::from_kwargs([("d", json!(3)), ("p", json!(p))])
    }

    #[test]
    fn extreme_rates_are_exact() {
        let sampler = BernoulliSampler::from_options(&Options::new()).unwrap();
        assert_eq!(sampler.sample(500, &job(0.0)).unwrap().1.errors, 0);
        assert_eq!(sampler.sample(500, &job(1.0)).unwrap().1.errors, 500);

        let discarding = BernoulliSampler::from_options(&options(json!({"discard_rate": 1.0}))).unwrap();
        let (shots, result) = discarding.sample(40, &job(1.0)).unwrap();
        assert_eq!((shots, result.discards, result.errors), (40, 40, 0));
    }

    #[test]
    fn seeded_streams_repeat() {
        let seeded = || BernoulliSampler::from_options(&options(json!({"seed": 11}))).unwrap();
        let (a, b) = (seeded(), seeded());
        for _ in 0..3 {
            assert_eq!(
                a.sample(1000, &job(0.3)).unwrap().1.errors,
                b.sample(1000, &job(0.3)).unwrap().1.errors
            );
        }
    }

    #[test]
    fn bad_options_and_parameters_are_reported() {
        let err = BernoulliSampler::from_options(&options(json!({"discard_rate": 2.0}))).unwrap_err();
        assert_eq!(err.info().code, "sampler.invalid_option");
        let sampler = BernoulliSampler::from_options(&Options::new()).unwrap();
        let missing = JobParameters::from_kwargs([("d", json!(3))]);
        assert!(sampler.sample(10, &missing).is_err());
        assert!(sampler.sample(10, &job(1.5)).is_err());
    }

    #[test]
    fn weaker_decoders_fail_on_a_superset_of_shots() {
        let sampler = MultiDecoderSampler::from_options(&options(json!({
            "decoders": {"fast": 2.0, "slow": 1.0},
            "seed": 5,
        })))
        .unwrap();
        assert_eq!(sampler.decoders().collect::<Vec<_>>(), vec!["fast", "slow"]);
        let (_, result) = sampler.sample(2000, &job(0.1)).unwrap();
        assert!(result.results["fast"].errors >= result.results["slow"].errors);
        assert_eq!(result.errors(), result.results["slow"].errors);

        let err = MultiDecoderSampler::from_options(&options(json!({"decoders": {"x": "y"}}))).unwrap_err();
        assert_eq!(err.info().context.get("decoder").map(String::as_str), Some("x"));
    }

    #[test]
    fn registry_resolves_builtin_names() {
        let registry = builtin_samplers().unwrap();
        assert_eq!(registry.names(), vec!["bernoulli", "multi-decoder"]);
        assert!(matches!(
            registry.resolve("multi-decoder", &Options::new()).unwrap(),
            BuiltinSampler::MultiDecoder(_)
        ));
        assert!(registry.resolve("stim", &Options::new()).is_err());
    }
}
