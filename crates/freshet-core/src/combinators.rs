#![forbid(unsafe_code)]

//! Derived combinators bridging behaviors and events.
//!
//! Everything here is expressed in terms of the primitives: `hold` writes
//! an event stream into a cell, `changes` turns a cell's updates back into
//! a stream, `switch` is the monadic join, and the rest are short
//! compositions. The setter returned by [`Runtime::make_cell`] goes
//! through a private channel, so external writes enter the propagation
//! cycle like any other occurrence.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::behavior::{write, Behavior, EqFn};
use crate::error::BResult;
use crate::event::{Event, EventSender};
use crate::runtime::Runtime;

impl<T: Clone + 'static> Event<T> {
    /// A behavior seeded with `init`, following the latest occurrence.
    pub fn hold(&self, init: T) -> Behavior<T> {
        self.hold_impl(Ok(init), None)
    }

    /// [`hold`](Event::hold) with an equality predicate: occurrences equal
    /// to the current value do not propagate.
    pub fn hold_eq<E>(&self, init: T, eq: E) -> Behavior<T>
    where
        E: Fn(&T, &T) -> bool + 'static,
    {
        self.hold_impl(Ok(init), Some(Rc::new(eq)))
    }

    /// [`hold`](Event::hold) seeded with a full result.
    pub fn hold_result(&self, init: BResult<T>) -> Behavior<T> {
        self.hold_impl(init, None)
    }

    fn hold_impl(&self, init: BResult<T>, eq: Option<EqFn<T>>) -> Behavior<T> {
        let Some(rt) = self.rt() else {
            return Behavior::inert(init, eq);
        };
        let behavior = Behavior::with_result(&rt, init, eq);
        let core = Rc::clone(&behavior.core);
        self.listen_scoped(Rc::new(move |rt: &Runtime, result: &BResult<T>| {
            write(rt, &core, result.clone());
        }));
        behavior
    }

    /// Number of occurrences so far, as a behavior starting at 0.
    #[must_use]
    pub fn count(&self) -> Behavior<u64> {
        self.collect(0u64, |n, _| n + 1).hold(0)
    }
}

impl<T: Clone + 'static> Behavior<T> {
    /// A channel firing on every change of this behavior. The value at
    /// registration time is not emitted.
    ///
    /// The stream stops if every handle to the behavior is dropped: keep
    /// the behavior (and any derived intermediates) alive for as long as
    /// the stream should fire.
    #[must_use]
    pub fn changes(&self) -> Event<T> {
        let Some(rt) = self.rt() else {
            return Event::inert();
        };
        let (out, sender) = rt.make_event::<T>();
        self.notify_result(move |result| sender.send_result(result.clone()));
        out
    }

    /// Behave as `self` until `replacements` fires, then as the most
    /// recent replacement.
    pub fn switch_on(&self, replacements: &Event<Behavior<T>>) -> Behavior<T> {
        replacements.hold(self.clone()).switch()
    }

    /// Behave as `self` until the first firing of `replacements`, then as
    /// that replacement forever.
    pub fn until(&self, replacements: &Event<Behavior<T>>) -> Behavior<T> {
        self.switch_on(&replacements.next())
    }
}

impl<T: Clone + 'static> Behavior<Behavior<T>> {
    /// Monadic join: follow whichever inner behavior the outer currently
    /// holds. Dependencies on a superseded inner behavior are released
    /// when the outer changes.
    #[must_use]
    pub fn switch(&self) -> Behavior<T> {
        self.bind(|inner| inner.clone())
    }
}

impl Behavior<bool> {
    /// Unit occurrences on every transition from `false` to `true`.
    #[must_use]
    pub fn when_true(&self) -> Event<()> {
        let Some(rt) = self.rt() else {
            return Event::inert();
        };
        let (out, sender) = rt.make_event::<()>();
        let previous = RefCell::new(self.try_get().ok());
        self.notify_result(move |result| {
            if let Ok(now) = result {
                let was = previous.borrow_mut().replace(*now);
                if *now && was == Some(false) {
                    sender.send(());
                }
            }
        });
        out
    }
}

/// Setter half of a [`Runtime::make_cell`] pair. Writes are enqueued as
/// occurrences, so they respect the propagation cycle.
pub struct CellSetter<T> {
    sender: EventSender<T>,
}

impl<T> Clone for CellSetter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for CellSetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellSetter").finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> CellSetter<T> {
    /// Update the cell. Synchronous from the caller's point of view: if no
    /// propagation cycle is running, one runs to quiescence before this
    /// returns.
    pub fn set(&self, value: T) {
        self.sender.send(value);
    }

    /// Update the cell with a full result (e.g. to inject a failure).
    pub fn set_result(&self, result: BResult<T>) {
        self.sender.send_result(result);
    }
}

impl Runtime {
    /// A writable input cell: a behavior plus its setter.
    #[must_use]
    pub fn make_cell<T: Clone + 'static>(&self, init: T) -> (Behavior<T>, CellSetter<T>) {
        let (occurrences, sender) = self.make_event();
        let behavior = occurrences.hold(init);
        (behavior, CellSetter { sender })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
