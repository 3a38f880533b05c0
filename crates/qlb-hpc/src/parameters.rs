use std::collections::BTreeMap;
use std::fmt;

use qlb_core::hash_value;
use qlb_core::serde::canonical_text;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Immutable identity of a unit of Monte Carlo work.
///
/// Parameters are an ordered list of positional values plus a keyword map.
/// Keyword order never affects identity. The [`hash`](Self::hash) is a SHA256
/// digest over the string form of every value and is the canonical lookup key
/// for jobs, the job-state file and the panic store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ParametersForm", into = "ParametersForm")]
pub struct JobParameters {
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    hash: String,
}

/// Dictionary form used by the panic file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParametersForm {
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default)]
    kwargs: BTreeMap<String, Value>,
}

impl From<ParametersForm> for JobParameters {
    fn from(form: ParametersForm) -> Self {
        JobParameters::new(form.args, form.kwargs)
    }
}

impl From<JobParameters> for ParametersForm {
    fn from(parameters: JobParameters) -> Self {
        ParametersForm {
            args: parameters.args,
            kwargs: parameters.kwargs,
        }
    }
}

/// String form of the parameters, as stored in the job-state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParameterStrings {
    /// Positional values rendered as canonical JSON text.
    pub args: Vec<String>,
    /// Keyword values rendered as canonical JSON text.
    pub kwargs: BTreeMap<String, String>,
}

impl JobParameters {
    /// Creates parameters from positional and keyword values.
    pub fn new(args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Self {
        let hash = identity_hash(&args, &kwargs);
        Self { args, kwargs, hash }
    }

    /// Creates keyword-only parameters.
    pub fn from_kwargs<I, K, V>(kwargs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let kwargs = kwargs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::new(Vec::new(), kwargs)
    }

    /// Returns a copy with one more positional value.
    pub fn with_arg(self, value: impl Into<Value>) -> Self {
        let mut args = self.args;
        args.push(value.into());
        Self::new(args, self.kwargs)
    }

    /// Returns a copy with the keyword value set (replacing any previous value).
    pub fn with_kwarg(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut kwargs = self.kwargs;
        kwargs.insert(key.into(), value.into());
        Self::new(self.args, kwargs)
    }

    /// Same values filed under another hash, for exercising collision checks.
    #[cfg(test)]
    pub(crate) fn with_hash(mut self, hash: &str) -> Self {
        self.hash = hash.to_string();
        self
    }

    /// Positional values.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Keyword values.
    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }

    /// Looks up a keyword value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    /// Looks up a numeric keyword value.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.kwargs.get(key).and_then(Value::as_f64)
    }

    /// Looks up a non-negative integer keyword value.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.kwargs.get(key).and_then(Value::as_u64)
    }

    /// Canonical lookup key.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// First six hex characters of the hash, for display.
    pub fn short_hash(&self) -> &str {
        &self.hash[..6.min(self.hash.len())]
    }

    /// String form written to the job-state file.
    pub fn to_strings(&self) -> ParameterStrings {
        ParameterStrings {
            args: self.args.iter().map(canonical_text).collect(),
            kwargs: self
                .kwargs
                .iter()
                .map(|(key, value)| (key.clone(), canonical_text(value)))
                .collect(),
        }
    }
}

impl Default for JobParameters {
    fn default() -> Self {
        Self::new(Vec::new(), BTreeMap::new())
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        let mut first = true;
        for value in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", canonical_text(value))?;
        }
        for (key, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{key}={}", canonical_text(value))?;
        }
        write!(f, ")")
    }
}

fn identity_hash(args: &[Value], kwargs: &BTreeMap<String, Value>) -> String {
    let args: Vec<String> = args.iter().map(canonical_text).collect();
    let kwargs: BTreeMap<&str, String> = kwargs
        .iter()
        .map(|(key, value)| (key.as_str(), canonical_text(value)))
        .collect();
    let identity = json!({ "args": args, "kwargs": kwargs });
    hash_value(&identity)
}
