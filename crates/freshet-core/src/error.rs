#![forbid(unsafe_code)]

//! Error taxonomy.
//!
//! Two kinds of failure exist and they never mix:
//!
//! - [`Failure`] is a *value*. Behaviors carry a `Result<T, Failure>` as
//!   their current result; event channels deliver one per occurrence. A
//!   failure flows through the graph like any other value and never
//!   interrupts propagation.
//! - [`TimeError`] is programmer misuse of the timeline (using a timestamp
//!   that has been spliced out). It is the only error a runtime operation
//!   surfaces directly.
//!
//! Panics raised by user callbacks are captured at the call site and
//! converted into a [`Failure`] (for lifted computations) or routed to the
//! runtime's uncaught-failure sink (for listeners and cleanups).

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use thiserror::Error;

/// Result carried inside behaviors and delivered on event channels.
pub type BResult<T> = Result<T, Failure>;

/// A first-class failure value.
///
/// Cheap to clone; compared by message. Constructed explicitly via
/// [`Failure::new`] or captured from a panicking user callback.
#[derive(Clone, Error)]
#[error("{msg}")]
pub struct Failure {
    msg: Rc<str>,
}

impl Failure {
    /// Create a failure from a message.
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into().into(),
        }
    }

    /// The failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Placeholder carried by a behavior between allocation and its first
    /// write. Never observable: the producing reader runs before the
    /// behavior handle is returned.
    pub(crate) fn uninitialized() -> Self {
        Self::new("behavior read before first write")
    }

    /// Convert a captured panic payload into a failure.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(s) = payload.downcast_ref::<&str>() {
            Self::new(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Self::new(s.clone())
        } else {
            Self::new("callback panicked")
        }
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Failure").field(&self.msg).finish()
    }
}

impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        self.msg == other.msg
    }
}

impl Eq for Failure {}

/// Run `f`, converting a panic into an `Err(Failure)`.
///
/// This is how user computations inside lifted/bound readers fail without
/// tearing down the propagation cycle.
pub(crate) fn run_trapped<R>(f: impl FnOnce() -> R) -> Result<R, Failure> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(Failure::from_panic)
}

/// Timeline misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeError {
    /// A timestamp that has been spliced out of the timeline (or belongs to
    /// a previous incarnation of it) was passed to a timeline operation.
    #[error("timestamp is no longer part of the timeline")]
    InvalidTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_displays_message() {
        let f = Failure::new("division by zero");
        assert_eq!(f.to_string(), "division by zero");
        assert_eq!(f.message(), "division by zero");
    }

    #[test]
    fn failure_equality_is_by_message() {
        assert_eq!(Failure::new("x"), Failure::new("x"));
        assert_ne!(Failure::new("x"), Failure::new("y"));
    }

    #[test]
    fn failure_clone_is_cheap_and_equal() {
        let f = Failure::new("boom");
        let g = f.clone();
        assert_eq!(f, g);
    }

    #[test]
    fn trapped_panic_becomes_failure() {
        let r: Result<(), Failure> = run_trapped(|| panic!("exploded"));
        assert_eq!(r.unwrap_err().message(), "exploded");
    }

    #[test]
    fn trapped_string_panic_becomes_failure() {
        let r: Result<(), Failure> = run_trapped(|| panic!("{}", "formatted".to_string()));
        assert_eq!(r.unwrap_err().message(), "formatted");
    }

    #[test]
    fn trapped_success_passes_through() {
        let r = run_trapped(|| 7);
        assert_eq!(r.unwrap(), 7);
    }

    #[test]
    fn time_error_display() {
        assert_eq!(
            TimeError::InvalidTimestamp.to_string(),
            "timestamp is no longer part of the timeline"
        );
    }
}
