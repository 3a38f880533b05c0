//! Name to constructor lookup for samplers and submitters built from config.

use std::collections::BTreeMap;
use std::fmt;

use qlb_core::errors::{ErrorInfo, QlbError};
use serde_json::Value;

/// Keyword options handed to a constructor.
pub type Options = BTreeMap<String, Value>;

type Constructor<T> = Box<dyn Fn(&Options) -> Result<T, QlbError> + Send + Sync>;

/// Named constructors of `T`.
///
/// Built once at start-up and passed explicitly to whoever resolves names.
pub struct Registry<T> {
    kind: String,
    entries: BTreeMap<String, Constructor<T>>,
}

impl<T> Registry<T> {
    /// Empty registry; `kind` names the entries in error messages.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Adds a constructor. Registering a name twice fails.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> Result<(), QlbError>
    where
        F: Fn(&Options) -> Result<T, QlbError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(QlbError::Registry(
                ErrorInfo::new("registry.duplicate", format!("{} is already registered", self.kind))
                    .with_context("name", name),
            ));
        }
        self.entries.insert(name, Box::new(constructor));
        Ok(())
    }

    /// Builds the entry registered under `name`.
    pub fn resolve(&self, name: &str, options: &Options) -> Result<T, QlbError> {
        let constructor = self.entries.get(name).ok_or_else(|| {
            QlbError::Registry(
                ErrorInfo::new("registry.unknown", format!("unknown {}", self.kind))
                    .with_context("name", name)
                    .with_hint(format!("known names: {}", self.names().join(", "))),
            )
        })?;
        constructor(options)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

/// Reads a numeric option, falling back to `default`.
pub fn option_f64(options: &Options, key: &str, default: f64) -> Result<f64, QlbError> {
    match options.get(key) {
        None => Ok(default),
        Some(value) => value.as_f64().ok_or_else(|| invalid_option(key, value)),
    }
}

/// Reads a non-negative integer option, falling back to `default`.
pub fn option_u64(options: &Options, key: &str, default: u64) -> Result<u64, QlbError> {
    match options.get(key) {
        None => Ok(default),
        Some(value) => value.as_u64().ok_or_else(|| invalid_option(key, value)),
    }
}

fn invalid_option(key: &str, value: &Value) -> QlbError {
    QlbError::Config(
        ErrorInfo::new("registry.invalid_option", "option has the wrong type")
            .with_context("option", key)
            .with_context("value", value.to_string()),
    )
}
