#![forbid(unsafe_code)]

//! Logging shims.
//!
//! With the `tracing` feature active this re-exports the `tracing` macros;
//! call sites import them as `crate::logging::{...}`. Without the feature,
//! the crate root exports no-op macros under the same names and call sites
//! import `crate::{...}` instead, so the rest of the code is identical
//! either way.

#[cfg(feature = "tracing")]
pub use tracing::{debug, trace, warn};
