#![forbid(unsafe_code)]

//! A self-adjusting FRP runtime.
//!
//! Programs build a dependency graph of time-varying values
//! ([`Behavior`]s) and discrete occurrences ([`Event`]s). When an input
//! changes, every dependent computation re-runs exactly once per
//! propagation cycle, in a consistent order, and every dependency or
//! cleanup recorded by the previous run is released first.
//!
//! # Architecture
//!
//! Four mechanisms cooperate:
//!
//! - a **timeline** of logical timestamps ([`timeline`]) ordering
//!   computations and scoping the lifetime of dependencies;
//! - **dynamic dependency recording**: each run of a binder re-registers
//!   exactly what it read, inside a fresh timestamp span;
//! - a **priority queue** draining pending re-executions in timeline
//!   order, which makes updates glitch-free ([`runtime`]);
//! - **scoped cleanup**: splicing a superseded span out of the timeline
//!   fires its cleanups and releases its subordinate readers.
//!
//! Everything is single-threaded and cooperative; none of the handle
//! types are `Send` or `Sync`.
//!
//! # Example
//!
//! ```
//! use freshet_core::{Behavior, Runtime};
//!
//! let rt = Runtime::new();
//! let (a, set_a) = rt.make_cell(0i64);
//! let b = a.map(|x| x + 1);
//! let c = a.map(|x| x * 2);
//! let d = Behavior::lift2(&b, &c, |x, y| x + y);
//!
//! set_a.set(5);
//! assert_eq!(d.get(), 6 + 10);
//! ```

pub mod behavior;
pub mod combinators;
pub mod error;
pub mod event;
pub mod logging;
pub mod memo;
mod queue;
pub mod runtime;
pub mod timeline;

pub use behavior::Behavior;
pub use combinators::CellSetter;
pub use error::{BResult, Failure, TimeError};
pub use event::{Event, EventSender};
pub use memo::{hash_behavior, hash_event, Memo};
pub use runtime::{Runtime, Subscription};
pub use timeline::{TimeId, Timeline};

// No-op stand-ins for the tracing macros when the `tracing` feature is
// disabled. Exported at the crate root so call sites can switch between
// `crate::logging::{...}` and `crate::{...}` on the feature flag.

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
