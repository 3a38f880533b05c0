#![deny(missing_docs)]
#![doc = "Core error, hashing and canonical serialization helpers for the QEC benchmark harness."]

pub mod errors;
/// Stable content hashing helpers.
pub mod hash;
pub mod serde;

pub use errors::{ErrorInfo, QlbError};
pub use hash::{hash_bytes, hash_value};
