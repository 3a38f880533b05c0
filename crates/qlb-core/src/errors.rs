//! Structured error types shared across QLB crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`QlbError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (hashes, paths, shot counts, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the QLB harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum QlbError {
    /// A job with the same parameter hash is already registered.
    #[error("duplicate job: {0}")]
    DuplicateJob(ErrorInfo),
    /// Two different parameter sets share a hash, or stored parameters disagree.
    #[error("hash conflict: {0}")]
    HashConflict(ErrorInfo),
    /// The scheduling deadline elapsed before the work drained.
    #[error("timeout: {0}")]
    Timeout(ErrorInfo),
    /// Filesystem and advisory lock errors.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
    /// Invalid configuration values.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Name-to-constructor resolution errors.
    #[error("registry error: {0}")]
    Registry(ErrorInfo),
    /// A job that was asserted to exist is missing.
    #[error("lookup error: {0}")]
    Lookup(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl QlbError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            QlbError::DuplicateJob(info)
            | QlbError::HashConflict(info)
            | QlbError::Timeout(info)
            | QlbError::Io(info)
            | QlbError::Serde(info)
            | QlbError::Config(info)
            | QlbError::Registry(info)
            | QlbError::Lookup(info) => info,
        }
    }

    /// Wraps an I/O failure on `path` into an [`QlbError::Io`].
    pub fn io(code: &str, path: &std::path::Path, err: impl ToString) -> Self {
        QlbError::Io(
            ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
        )
    }

    /// Returns true when the error is a scheduling timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, QlbError::Timeout(_))
    }
}
