#![forbid(unsafe_code)]

//! Behaviors: time-varying cells and the binding primitives.
//!
//! # Design
//!
//! A [`Behavior<T>`] is a cheap handle to a shared cell holding the current
//! `Result<T, Failure>`, the timestamp of its last change, an optional
//! equality predicate fixed at creation, and two registries: dependent
//! readers (weak, slot-keyed, purged lazily on write) and notifiers
//! (external listeners invoked synchronously on change).
//!
//! Derived behaviors own the reader that produces them; reader closures
//! hold their upstream cells strongly and their output weakly. Dropping
//! every handle to an output therefore releases its producer, while a live
//! output keeps its upstream chain alive. Dependencies recorded *during* a
//! run (copier readers, scoped registrations) are owned by cleanups on
//! fresh timestamps inside the running reader's span and die with it.
//!
//! # Invariants
//!
//! 1. A write whose old and new values are equal under the cell's `eq`
//!    neither enqueues readers nor invokes notifiers. Without `eq`, every
//!    write is a change.
//! 2. Readers are enqueued before notifiers run, and notifiers observe the
//!    already-updated result.
//! 3. A panic inside a lifted or bound user function becomes the output's
//!    `Err(Failure)`; it never unwinds through the propagator.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::error::{run_trapped, BResult, Failure};
use crate::runtime::{next_id, Reader, RtWeak, Runtime, Subscription};
use crate::timeline::TimeId;

/// Equality predicate deciding whether a new output counts as a change.
pub(crate) type EqFn<T> = Rc<dyn Fn(&T, &T) -> bool>;

pub(crate) struct ReaderSlot {
    slot: u64,
    reader: Weak<Reader>,
}

pub(crate) struct NotifierSlot<T> {
    slot: u64,
    f: Rc<dyn Fn(&BResult<T>)>,
}

pub(crate) struct BehaviorCore<T> {
    pub(crate) rt: RtWeak,
    pub(crate) id: u64,
    pub(crate) result: RefCell<BResult<T>>,
    pub(crate) changed_at: Cell<TimeId>,
    pub(crate) eq: Option<EqFn<T>>,
    pub(crate) readers: RefCell<Vec<ReaderSlot>>,
    pub(crate) notifiers: RefCell<Vec<NotifierSlot<T>>>,
    /// The reader computing this behavior, if it is a derived one.
    pub(crate) producer: RefCell<Option<Rc<Reader>>>,
}

/// A time-varying cell. Cloning the handle shares the cell.
pub struct Behavior<T> {
    pub(crate) core: Rc<BehaviorCore<T>>,
}

impl<T> Clone for Behavior<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Behavior<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("id", &self.core.id)
            .field("result", &*self.core.result.borrow())
            .finish()
    }
}

impl<T> PartialEq for Behavior<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl<T> Eq for Behavior<T> {}

impl<T> Hash for Behavior<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.core.id);
    }
}

impl<T> Behavior<T> {
    /// Stable identity of this cell, independent of its mutable state.
    /// This is the hash to use when memoizing over behaviors.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Timestamp of the last change (diagnostic).
    #[must_use]
    pub fn last_changed(&self) -> TimeId {
        self.core.changed_at.get()
    }

    pub(crate) fn with_result(rt: &Runtime, result: BResult<T>, eq: Option<EqFn<T>>) -> Self {
        Self {
            core: Rc::new(BehaviorCore {
                rt: rt.downgrade(),
                id: next_id(),
                result: RefCell::new(result),
                changed_at: Cell::new(rt.now()),
                eq,
                readers: RefCell::new(Vec::new()),
                notifiers: RefCell::new(Vec::new()),
                producer: RefCell::new(None),
            }),
        }
    }

    /// A cell with no runtime behind it: reads work, nothing ever updates.
    pub(crate) fn inert(result: BResult<T>, eq: Option<EqFn<T>>) -> Self {
        Self {
            core: Rc::new(BehaviorCore {
                rt: Weak::new(),
                id: next_id(),
                result: RefCell::new(result),
                changed_at: Cell::new(TimeId::DETACHED),
                eq,
                readers: RefCell::new(Vec::new()),
                notifiers: RefCell::new(Vec::new()),
                producer: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn rt(&self) -> Option<Runtime> {
        Runtime::from_weak(&self.core.rt)
    }
}

// ─── Write ───────────────────────────────────────────────────────────────────

/// Update a cell: suppress if equal under `eq`, otherwise store the result,
/// stamp the change, enqueue every live dependent reader (purging dead
/// registrations) and deliver to the notifiers synchronously.
pub(crate) fn write<T: Clone + 'static>(rt: &Runtime, core: &Rc<BehaviorCore<T>>, next: BResult<T>) {
    {
        let current = core.result.borrow();
        if let (Ok(old), Ok(new), Some(eq)) = (&*current, &next, &core.eq) {
            if eq(old, new) {
                return;
            }
        }
    }
    *core.result.borrow_mut() = next;
    core.changed_at.set(rt.now());
    {
        let mut readers = core.readers.borrow_mut();
        readers.retain(|slot| match slot.reader.upgrade() {
            Some(reader) => {
                rt.enqueue_reader(&reader);
                true
            }
            None => false,
        });
    }
    let snapshot: Vec<Rc<dyn Fn(&BResult<T>)>> = core
        .notifiers
        .borrow()
        .iter()
        .map(|slot| slot.f.clone())
        .collect();
    if !snapshot.is_empty() {
        let result = core.result.borrow().clone();
        for notifier in snapshot {
            rt.guard(|| notifier(&result));
        }
    }
}

// ─── Dependency recording ────────────────────────────────────────────────────

/// Register `reader` as a dependent of `core` for the lifetime of the
/// reader (the registration is purged once the reader is gone).
pub(crate) fn register_reader<T>(core: &Rc<BehaviorCore<T>>, reader: &Rc<Reader>) -> u64 {
    let slot = next_id();
    core.readers.borrow_mut().push(ReaderSlot {
        slot,
        reader: Rc::downgrade(reader),
    });
    slot
}

/// Register `reader` on `core` for the current span only: a cleanup on a
/// fresh timestamp removes the registration when the enclosing reader
/// re-runs.
pub(crate) fn register_reader_scoped<T: 'static>(
    rt: &Runtime,
    core: &Rc<BehaviorCore<T>>,
    reader: &Rc<Reader>,
) {
    let slot = register_reader(core, reader);
    let weak = Rc::downgrade(core);
    rt.add_cleanup_here(Box::new(move || {
        if let Some(core) = weak.upgrade() {
            core.readers.borrow_mut().retain(|s| s.slot != slot);
        }
    }));
}

/// Subscribe `out` to `source`: a copier reader forwards every subsequent
/// result of `source` into `out`. The copier's start timestamp lies inside
/// the running reader's span, and the span's cleanup owns it, so the
/// subscription dies when the enclosing reader re-runs.
pub(crate) fn attach_copier<T: Clone + 'static>(
    rt: &Runtime,
    source: &Behavior<T>,
    out: &Weak<BehaviorCore<T>>,
) {
    let start = rt.tick();
    let source_core = Rc::clone(&source.core);
    let out = out.clone();
    let copier = Reader::new(
        start,
        Box::new(move |rt: &Runtime| {
            if let Some(out_core) = out.upgrade() {
                let result = source_core.result.borrow().clone();
                write(rt, &out_core, result);
            }
        }),
    );
    copier.end.set(rt.tick());
    register_reader(&source.core, &copier);
    rt.add_cleanup_here(Box::new(move || drop(copier)));
}

// ─── Constructors and result-level binding ───────────────────────────────────

impl Runtime {
    /// A behavior whose result is set once at creation.
    pub fn constant<T: Clone + 'static>(&self, value: T) -> Behavior<T> {
        Behavior::with_result(self, Ok(value), None)
    }

    /// A behavior carrying a failure from the start.
    pub fn fail<T: Clone + 'static>(&self, failure: Failure) -> Behavior<T> {
        Behavior::with_result(self, Err(failure), None)
    }

    /// Run `thunk` inside a reader; while its behavior carries a value the
    /// output follows it, and on failure the output follows
    /// `handler(failure)` instead.
    pub fn catch<T, F, H>(&self, thunk: F, handler: H) -> Behavior<T>
    where
        T: Clone + 'static,
        F: Fn() -> Behavior<T> + 'static,
        H: Fn(&Failure) -> Behavior<T> + 'static,
    {
        self.bind_result_impl(None, thunk, move |source, result| match result {
            Ok(_) => source.clone(),
            Err(failure) => handler(failure),
        })
    }

    /// [`catch`](Runtime::catch) with an equality predicate on the output.
    pub fn catch_eq<T, F, H, E>(&self, eq: E, thunk: F, handler: H) -> Behavior<T>
    where
        T: Clone + 'static,
        F: Fn() -> Behavior<T> + 'static,
        H: Fn(&Failure) -> Behavior<T> + 'static,
        E: Fn(&T, &T) -> bool + 'static,
    {
        self.bind_result_impl(Some(Rc::new(eq)), thunk, move |source, result| match result {
            Ok(_) => source.clone(),
            Err(failure) => handler(failure),
        })
    }

    /// Bind on the full result: dispatch to `on_value` or `on_failure`
    /// depending on what `thunk`'s behavior currently carries.
    pub fn try_bind<T, U, F, S, H>(&self, thunk: F, on_value: S, on_failure: H) -> Behavior<U>
    where
        T: Clone + 'static,
        U: Clone + 'static,
        F: Fn() -> Behavior<T> + 'static,
        S: Fn(&T) -> Behavior<U> + 'static,
        H: Fn(&Failure) -> Behavior<U> + 'static,
    {
        self.bind_result_impl(None, thunk, move |_source, result| match result {
            Ok(value) => on_value(value),
            Err(failure) => on_failure(failure),
        })
    }

    fn bind_result_impl<T, U>(
        &self,
        eq: Option<EqFn<U>>,
        thunk: impl Fn() -> Behavior<T> + 'static,
        choose: impl Fn(&Behavior<T>, &BResult<T>) -> Behavior<U> + 'static,
    ) -> Behavior<U>
    where
        T: Clone + 'static,
        U: Clone + 'static,
    {
        let out = Behavior::with_result(self, Err(Failure::uninitialized()), eq);
        let out_weak = Rc::downgrade(&out.core);
        let start = self.tick();
        let reader = Reader::new(
            start,
            Box::new(move |rt: &Runtime| {
                let Some(out_core) = out_weak.upgrade() else { return };
                let source = match run_trapped(&thunk) {
                    Ok(source) => source,
                    Err(failure) => {
                        write(rt, &out_core, Err(failure));
                        return;
                    }
                };
                // Record the dependency on the thunk's behavior for this
                // span: its next change re-runs this reader and re-picks
                // the branch.
                if let Some(me) = rt.current_reader() {
                    register_reader_scoped(rt, &source.core, &me);
                }
                let result = source.core.result.borrow().clone();
                let inner = match run_trapped(|| choose(&source, &result)) {
                    Ok(inner) => inner,
                    Err(failure) => {
                        write(rt, &out_core, Err(failure));
                        return;
                    }
                };
                attach_copier(rt, &inner, &Rc::downgrade(&out_core));
                let chosen = inner.core.result.borrow().clone();
                write(rt, &out_core, chosen);
            }),
        );
        *out.core.producer.borrow_mut() = Some(Rc::clone(&reader));
        self.run_reader_initial(&reader);
        out
    }
}

// ─── Reading, binding, lifting ───────────────────────────────────────────────

impl<T: Clone + 'static> Behavior<T> {
    /// The current result. Never panics. Outside a propagation cycle this
    /// may be stale with respect to queued-but-undelivered events.
    #[must_use]
    pub fn try_get(&self) -> BResult<T> {
        self.core.result.borrow().clone()
    }

    /// The current value.
    ///
    /// # Panics
    ///
    /// Panics with the carried [`Failure`] if the behavior holds one. Same
    /// staleness caveat as [`try_get`](Behavior::try_get).
    #[must_use]
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(failure) => panic!("{failure}"),
        }
    }

    /// Monadic bind: `f` maps each value of `self` to an inner behavior
    /// the output follows until the next change of `self`.
    pub fn bind<U, F>(&self, f: F) -> Behavior<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> Behavior<U> + 'static,
    {
        self.bind_impl(None, f)
    }

    /// [`bind`](Behavior::bind) with an equality predicate on the output.
    pub fn bind_eq<U, F, E>(&self, eq: E, f: F) -> Behavior<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> Behavior<U> + 'static,
        E: Fn(&U, &U) -> bool + 'static,
    {
        self.bind_impl(Some(Rc::new(eq)), f)
    }

    fn bind_impl<U, F>(&self, eq: Option<EqFn<U>>, f: F) -> Behavior<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> Behavior<U> + 'static,
    {
        let Some(rt) = self.rt() else {
            let result = self.core.result.borrow().clone();
            return match result {
                Ok(value) => f(&value),
                Err(failure) => Behavior::inert(Err(failure), eq),
            };
        };
        let out = Behavior::with_result(&rt, Err(Failure::uninitialized()), eq);
        let out_weak = Rc::downgrade(&out.core);
        let source = Rc::clone(&self.core);
        let start = rt.tick();
        let reader = Reader::new(
            start,
            Box::new(move |rt: &Runtime| {
                let Some(out_core) = out_weak.upgrade() else { return };
                let result = source.result.borrow().clone();
                match result {
                    Err(failure) => write(rt, &out_core, Err(failure)),
                    Ok(value) => match run_trapped(|| f(&value)) {
                        Err(failure) => write(rt, &out_core, Err(failure)),
                        Ok(inner) => {
                            attach_copier(rt, &inner, &Rc::downgrade(&out_core));
                            let chosen = inner.core.result.borrow().clone();
                            write(rt, &out_core, chosen);
                        }
                    },
                }
            }),
        );
        register_reader(&self.core, &reader);
        *out.core.producer.borrow_mut() = Some(Rc::clone(&reader));
        rt.run_reader_initial(&reader);
        out
    }

    /// Applicative lift: one reader, no inner behavior allocation.
    pub fn map<U, F>(&self, f: F) -> Behavior<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
    {
        self.map_impl(None, f)
    }

    /// [`map`](Behavior::map) with an equality predicate on the output.
    pub fn map_eq<U, F, E>(&self, eq: E, f: F) -> Behavior<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
        E: Fn(&U, &U) -> bool + 'static,
    {
        self.map_impl(Some(Rc::new(eq)), f)
    }

    fn map_impl<U, F>(&self, eq: Option<EqFn<U>>, f: F) -> Behavior<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let Some(rt) = self.rt() else {
            let result = self.core.result.borrow().clone();
            let computed = match result {
                Ok(value) => run_trapped(|| f(&value)),
                Err(failure) => Err(failure),
            };
            return Behavior::inert(computed, eq);
        };
        let out = Behavior::with_result(&rt, Err(Failure::uninitialized()), eq);
        let out_weak = Rc::downgrade(&out.core);
        let source = Rc::clone(&self.core);
        let start = rt.tick();
        let reader = Reader::new(
            start,
            Box::new(move |rt: &Runtime| {
                let Some(out_core) = out_weak.upgrade() else { return };
                let result = source.result.borrow().clone();
                let next = match result {
                    Ok(value) => run_trapped(|| f(&value)),
                    Err(failure) => Err(failure),
                };
                write(rt, &out_core, next);
            }),
        );
        register_reader(&self.core, &reader);
        *out.core.producer.borrow_mut() = Some(Rc::clone(&reader));
        rt.run_reader_initial(&reader);
        out
    }

    // ── Notifiers ────────────────────────────────────────────────────

    fn push_notifier(&self, f: Rc<dyn Fn(&BResult<T>)>) -> u64 {
        let slot = next_id();
        self.core
            .notifiers
            .borrow_mut()
            .push(NotifierSlot { slot, f });
        slot
    }

    fn remove_notifier(&self, slot: u64) -> impl FnOnce() + 'static {
        let weak = Rc::downgrade(&self.core);
        move || {
            if let Some(core) = weak.upgrade() {
                core.notifiers.borrow_mut().retain(|s| s.slot != slot);
            }
        }
    }

    /// Attach a value listener, invoked synchronously on every change.
    /// Failure results are skipped. Inside a binder the registration is
    /// scoped to the binder's span and removed on its re-run; use
    /// [`notify_cancel`](Behavior::notify_cancel) for an explicit handle.
    pub fn notify(&self, f: impl Fn(&T) + 'static) {
        self.notify_result(move |result| {
            if let Ok(value) = result {
                f(value);
            }
        });
    }

    /// [`notify`](Behavior::notify) at the result level: the listener sees
    /// failures too.
    pub fn notify_result(&self, f: impl Fn(&BResult<T>) + 'static) {
        let slot = self.push_notifier(Rc::new(move |result: &BResult<T>| f(result)));
        if let Some(rt) = self.rt() {
            if rt.in_reader() {
                rt.add_cleanup_here(Box::new(self.remove_notifier(slot)));
            }
        }
    }

    /// Value listener with an explicit cancellation handle. No timestamp
    /// cleanup is attached; the registration lives until the handle is
    /// cancelled or dropped.
    #[must_use]
    pub fn notify_cancel(&self, f: impl Fn(&T) + 'static) -> Subscription {
        self.notify_result_cancel(move |result| {
            if let Ok(value) = result {
                f(value);
            }
        })
    }

    /// Result listener with an explicit cancellation handle.
    #[must_use]
    pub fn notify_result_cancel(&self, f: impl Fn(&BResult<T>) + 'static) -> Subscription {
        let slot = self.push_notifier(Rc::new(move |result: &BResult<T>| f(result)));
        Subscription::new(self.remove_notifier(slot))
    }
}

// ─── Arity family ────────────────────────────────────────────────────────────

macro_rules! lift_arity {
    (
        $lift:ident, $lift_eq:ident, $lift_impl:ident, $bind:ident;
        $( $param:ident : $arg:ident ),+
    ) => {
        /// Lift an N-ary function: one reader registered against every
        /// input, re-run once per cycle however many of them changed.
        pub fn $lift<$($param,)+ F>($($arg: &Behavior<$param>,)+ f: F) -> Behavior<U>
        where
            $($param: Clone + 'static,)+
            F: Fn($(&$param),+) -> U + 'static,
        {
            Self::$lift_impl($($arg,)+ None, f)
        }

        /// Same, with an equality predicate on the output.
        pub fn $lift_eq<$($param,)+ F, E>($($arg: &Behavior<$param>,)+ eq: E, f: F) -> Behavior<U>
        where
            $($param: Clone + 'static,)+
            F: Fn($(&$param),+) -> U + 'static,
            E: Fn(&U, &U) -> bool + 'static,
        {
            Self::$lift_impl($($arg,)+ Some(Rc::new(eq)), f)
        }

        fn $lift_impl<$($param,)+ F>(
            $($arg: &Behavior<$param>,)+
            eq: Option<EqFn<U>>,
            f: F,
        ) -> Behavior<U>
        where
            $($param: Clone + 'static,)+
            F: Fn($(&$param),+) -> U + 'static,
        {
            let rt = None::<Runtime> $( .or_else(|| $arg.rt()) )+;
            let Some(rt) = rt else {
                let computed = (|| {
                    $(
                        let $arg = match $arg.try_get() {
                            Ok(value) => value,
                            Err(failure) => return Err(failure),
                        };
                    )+
                    run_trapped(|| f($(&$arg),+))
                })();
                return Behavior::inert(computed, eq);
            };
            let out = Behavior::with_result(&rt, Err(Failure::uninitialized()), eq);
            let out_weak = Rc::downgrade(&out.core);
            $( let $arg = Rc::clone(&$arg.core); )+
            let start = rt.tick();
            let reader = Reader::new(
                start,
                Box::new({
                    $( let $arg = Rc::clone(&$arg); )+
                    move |rt: &Runtime| {
                        let Some(out_core) = out_weak.upgrade() else { return };
                        let next = (|| {
                            $(
                                let $arg = match $arg.result.borrow().clone() {
                                    Ok(value) => value,
                                    Err(failure) => return Err(failure),
                                };
                            )+
                            run_trapped(|| f($(&$arg),+))
                        })();
                        write(rt, &out_core, next);
                    }
                }),
            );
            $( register_reader(&$arg, &reader); )+
            *out.core.producer.borrow_mut() = Some(Rc::clone(&reader));
            rt.run_reader_initial(&reader);
            out
        }

        /// N-ary bind: the lift of a behavior-returning function, switched.
        pub fn $bind<$($param,)+ F>($($arg: &Behavior<$param>,)+ f: F) -> Behavior<U>
        where
            $($param: Clone + 'static,)+
            F: Fn($(&$param),+) -> Behavior<U> + 'static,
        {
            Behavior::<Behavior<U>>::$lift($($arg,)+ f).switch()
        }
    };
}

impl<U: Clone + 'static> Behavior<U> {
    lift_arity!(lift2, lift2_eq, lift2_impl, bind2; A: a, B: b);
    lift_arity!(lift3, lift3_eq, lift3_impl, bind3; A: a, B: b, C: c);
    lift_arity!(lift4, lift4_eq, lift4_impl, bind4; A: a, B: b, C: c, D: d);
    lift_arity!(lift5, lift5_eq, lift5_impl, bind5; A: a, B: b, C: c, D: d, E1: e);
    lift_arity!(lift6, lift6_eq, lift6_impl, bind6; A: a, B: b, C: c, D: d, E1: e, G: g);
    lift_arity!(lift7, lift7_eq, lift7_impl, bind7; A: a, B: b, C: c, D: d, E1: e, G: g, H: h);

    /// Lift over a uniform list of behaviors. The callback receives the
    /// current values in input order; the first failure wins.
    pub fn lift_n<T, F>(inputs: &[Behavior<T>], f: F) -> Behavior<U>
    where
        T: Clone + 'static,
        F: Fn(&[T]) -> U + 'static,
    {
        Self::lift_n_impl(inputs, None, f)
    }

    /// [`lift_n`](Behavior::lift_n) with an equality predicate on the
    /// output.
    pub fn lift_n_eq<T, F, E>(inputs: &[Behavior<T>], eq: E, f: F) -> Behavior<U>
    where
        T: Clone + 'static,
        F: Fn(&[T]) -> U + 'static,
        E: Fn(&U, &U) -> bool + 'static,
    {
        Self::lift_n_impl(inputs, Some(Rc::new(eq)), f)
    }

    fn lift_n_impl<T, F>(inputs: &[Behavior<T>], eq: Option<EqFn<U>>, f: F) -> Behavior<U>
    where
        T: Clone + 'static,
        F: Fn(&[T]) -> U + 'static,
    {
        let rt = inputs.iter().find_map(|b| b.rt());
        let Some(rt) = rt else {
            let gathered: BResult<Vec<T>> = inputs.iter().map(|b| b.try_get()).collect();
            let computed = match gathered {
                Ok(values) => run_trapped(|| f(&values)),
                Err(failure) => Err(failure),
            };
            return Behavior::inert(computed, eq);
        };
        let out = Behavior::with_result(&rt, Err(Failure::uninitialized()), eq);
        let out_weak = Rc::downgrade(&out.core);
        let cores: Vec<Rc<BehaviorCore<T>>> =
            inputs.iter().map(|b| Rc::clone(&b.core)).collect();
        let start = rt.tick();
        let reader = Reader::new(
            start,
            Box::new(move |rt: &Runtime| {
                let Some(out_core) = out_weak.upgrade() else { return };
                let gathered: BResult<Vec<T>> = cores
                    .iter()
                    .map(|core| core.result.borrow().clone())
                    .collect();
                let next = match gathered {
                    Ok(values) => run_trapped(|| f(&values)),
                    Err(failure) => Err(failure),
                };
                write(rt, &out_core, next);
            }),
        );
        for input in inputs {
            register_reader(&input.core, &reader);
        }
        *out.core.producer.borrow_mut() = Some(Rc::clone(&reader));
        rt.run_reader_initial(&reader);
        out
    }

    /// Bind over a uniform list of behaviors.
    pub fn bind_n<T, F>(inputs: &[Behavior<T>], f: F) -> Behavior<U>
    where
        T: Clone + 'static,
        F: Fn(&[T]) -> Behavior<U> + 'static,
    {
        Behavior::<Behavior<U>>::lift_n(inputs, f).switch()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn constant_chain_reads_through() {
        let rt = Runtime::new();
        let a = rt.constant(1);
        let b = a.map(|x| x + 1);
        let c = b.map(|x| x * 2);
        assert_eq!(c.get(), 4);
        assert!(rt.is_quiescent());
    }

    #[test]
    fn map_propagates_failure() {
        let rt = Runtime::new();
        let a: Behavior<i32> = rt.fail(Failure::new("no value"));
        let b = a.map(|x| x + 1);
        assert_eq!(b.try_get(), Err(Failure::new("no value")));
    }

    #[test]
    #[should_panic(expected = "no value")]
    fn get_panics_with_the_carried_failure() {
        let rt = Runtime::new();
        let a: Behavior<i32> = rt.fail(Failure::new("no value"));
        let _ = a.get();
    }

    #[test]
    fn panic_in_lifted_function_becomes_failure() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(1);
        let b = a.map(|x| 10 / x);
        assert_eq!(b.get(), 10);
        set.set(0);
        assert!(b.try_get().is_err());
        set.set(5);
        assert_eq!(b.get(), 2);
    }

    #[test]
    fn map_eq_suppresses_no_op_writes() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(0);
        let halved = a.map_eq(|x, y| x == y, |x| x / 2);
        let runs = Rc::new(Cell::new(0u32));
        let downstream = {
            let runs = Rc::clone(&runs);
            halved.map(move |x| {
                runs.set(runs.get() + 1);
                *x
            })
        };
        assert_eq!(downstream.get(), 0);
        assert_eq!(runs.get(), 1);
        set.set(1); // 1 / 2 == 0: suppressed
        assert_eq!(runs.get(), 1);
        set.set(4);
        assert_eq!(downstream.get(), 2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn suppressed_write_keeps_change_timestamp() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(0);
        let b = a.map_eq(|x, y| x == y, |x| x / 2);
        let stamp = b.last_changed();
        set.set(1);
        assert_eq!(b.last_changed(), stamp);
    }

    #[test]
    fn bind_follows_the_inner_behavior() {
        let rt = Runtime::new();
        let (inner1, set1) = rt.make_cell(10);
        let (selector, select) = rt.make_cell(false);
        let inner2 = rt.constant(99);
        let out = selector.bind(move |pick| {
            if *pick {
                inner2.clone()
            } else {
                inner1.clone()
            }
        });
        assert_eq!(out.get(), 10);
        set1.set(11);
        assert_eq!(out.get(), 11);
        select.set(true);
        assert_eq!(out.get(), 99);
        // The superseded inner no longer reaches the output.
        set1.set(12);
        assert_eq!(out.get(), 99);
    }

    #[test]
    fn bind_propagates_upstream_failure() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(1);
        let rt2 = rt.clone();
        let out = a.bind(move |x| rt2.constant(x * 100));
        assert_eq!(out.get(), 100);
        set.set_result(Err(Failure::new("poisoned")));
        assert_eq!(out.try_get(), Err(Failure::new("poisoned")));
    }

    #[test]
    fn catch_diverts_failures_and_recovers() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(1);
        let b = a.map(|x| 10 / x);
        let fallback = rt.clone();
        let source = b.clone();
        let caught = rt.catch(
            move || source.clone(),
            move |_failure| fallback.constant(-1),
        );
        assert_eq!(caught.get(), 10);
        set.set(0);
        assert_eq!(caught.get(), -1);
        set.set(2);
        assert_eq!(caught.get(), 5);
    }

    #[test]
    fn try_bind_dispatches_on_both_branches() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(4);
        let ok_rt = rt.clone();
        let err_rt = rt.clone();
        let source = a.clone();
        let out = rt.try_bind(
            move || source.clone(),
            move |value| ok_rt.constant(format!("value {value}")),
            move |failure| err_rt.constant(format!("failure {failure}")),
        );
        assert_eq!(out.get(), "value 4");
        set.set_result(Err(Failure::new("gone")));
        assert_eq!(out.get(), "failure gone");
    }

    #[test]
    fn notify_sees_changes_not_failures() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        a.notify(move |v| sink.borrow_mut().push(*v));
        set.set(1);
        set.set_result(Err(Failure::new("skip me")));
        set.set(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn notify_result_sees_failures() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(0);
        let failures = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&failures);
        a.notify_result(move |r| {
            if r.is_err() {
                sink.set(sink.get() + 1);
            }
        });
        set.set_result(Err(Failure::new("boom")));
        assert_eq!(failures.get(), 1);
    }

    #[test]
    fn notify_cancel_is_idempotent() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(0);
        let seen = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&seen);
        let sub = a.notify_cancel(move |_| sink.set(sink.get() + 1));
        set.set(1);
        assert_eq!(seen.get(), 1);
        sub.cancel();
        sub.cancel();
        set.set(2);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn dropping_the_subscription_cancels() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(0);
        let seen = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&seen);
        {
            let _sub = a.notify_cancel(move |_| sink.set(sink.get() + 1));
            set.set(1);
        }
        set.set(2);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn lift2_combines_and_reruns_once_per_cycle() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(2);
        let b = a.map(|x| x + 1);
        let runs = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&runs);
        let sum = Behavior::lift2(&a, &b, move |x, y| {
            counter.set(counter.get() + 1);
            x + y
        });
        assert_eq!(sum.get(), 5);
        assert_eq!(runs.get(), 1);
        set.set(10);
        assert_eq!(sum.get(), 21);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn lift3_first_failure_wins() {
        let rt = Runtime::new();
        let a = rt.constant(1);
        let b: Behavior<i32> = rt.fail(Failure::new("left"));
        let c: Behavior<i32> = rt.fail(Failure::new("right"));
        let out = Behavior::lift3(&a, &b, &c, |x, y, z| x + y + z);
        assert_eq!(out.try_get(), Err(Failure::new("left")));
    }

    #[test]
    fn lift7_reads_every_input() {
        let rt = Runtime::new();
        let cells: Vec<_> = (1..=7).map(|n| rt.constant(n)).collect();
        let out = Behavior::lift7(
            &cells[0], &cells[1], &cells[2], &cells[3], &cells[4], &cells[5], &cells[6],
            |a, b, c, d, e, f, g| a + b + c + d + e + f + g,
        );
        assert_eq!(out.get(), 28);
    }

    #[test]
    fn bind2_switches_between_inner_behaviors() {
        let rt = Runtime::new();
        let (pick, set_pick) = rt.make_cell(true);
        let (bias, set_bias) = rt.make_cell(0);
        let (x, set_x) = rt.make_cell(1);
        let y = rt.constant(100);
        let out = Behavior::bind2(&pick, &bias, move |p, bias| {
            let base = if *p { x.clone() } else { y.clone() };
            let bias = *bias;
            base.map(move |v| v + bias)
        });
        assert_eq!(out.get(), 1);
        set_x.set(5);
        assert_eq!(out.get(), 5);
        set_bias.set(1000);
        assert_eq!(out.get(), 1005);
        set_pick.set(false);
        assert_eq!(out.get(), 1100);
    }

    #[test]
    fn lift_n_over_a_uniform_list() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(1u64);
        let inputs = vec![a.clone(), rt.constant(2), rt.constant(3)];
        let total = Behavior::lift_n(&inputs, |values| values.iter().sum::<u64>());
        assert_eq!(total.get(), 6);
        set.set(10);
        assert_eq!(total.get(), 15);
    }

    #[test]
    fn identity_lift_mirrors_the_source() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(3);
        let mirrored = a.map(|x| *x);
        for value in [7, -2, 0] {
            set.set(value);
            assert_eq!(mirrored.get(), a.get());
        }
    }

    #[test]
    fn bind_of_constant_applies_the_function() {
        let rt = Runtime::new();
        let rt2 = rt.clone();
        let out = rt.constant(6).bind(move |v| rt2.constant(v * 7));
        assert_eq!(out.get(), 42);
    }

    #[test]
    fn bind_with_constant_return_mirrors_the_source() {
        let rt = Runtime::new();
        let (a, set) = rt.make_cell(1);
        let rt2 = rt.clone();
        let out = a.bind(move |v| rt2.constant(*v));
        for value in [5, 6, 7] {
            set.set(value);
            assert_eq!(out.get(), a.get());
        }
    }

    #[test]
    fn behavior_identity_is_stable_across_clones() {
        let rt = Runtime::new();
        let a = rt.constant(1);
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        assert_ne!(a, rt.constant(1));
    }
}
