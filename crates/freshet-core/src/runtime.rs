#![forbid(unsafe_code)]

//! The runtime handle and the propagator.
//!
//! # Design
//!
//! All shared state — the timeline, both scheduler queues, the current
//! reader slot and the configured sinks — is scoped to one [`Runtime`]
//! instance. The handle is cheaply cloneable (`Rc` inside); behaviors and
//! events hold a weak back reference, so a handle that outlives its
//! runtime goes inert instead of dangling.
//!
//! A propagation cycle alternates two phases until quiescence:
//!
//! 1. **Event phase** — drain the delivery FIFO; each delivery invokes one
//!    channel's listeners in registration order. Listener writes mark
//!    dependent readers enqueued and push them on the reader heap.
//! 2. **Update phase** — drain the reader heap in timeline order. Each
//!    reader's previous sub-span is spliced out first (releasing every
//!    dependency and cleanup recorded during its last run), then the
//!    reader re-executes with the cursor reset to its start timestamp and
//!    records a fresh sub-span.
//!
//! Because readers re-execute in timeline order and rebuild their spans
//! before running, a reader never observes a value that a still-pending
//! upstream reader will overwrite later in the same cycle, and the
//! `enqueued` flag makes each reader run at most once per cycle.
//!
//! # Failure Modes
//!
//! - A listener or cleanup that panics is captured, reported to the
//!   uncaught-failure sink, and the cycle continues.
//! - A reader whose start timestamp was spliced while it sat in the heap
//!   (its producing binder re-ran) is discarded on pop.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{run_trapped, Failure};
use crate::queue::{Delivery, EventQueue, ReaderQueue};
use crate::timeline::{Cleanup, TimeId, Timeline};

#[cfg(feature = "tracing")]
use crate::logging::{debug, trace, warn};
#[cfg(not(feature = "tracing"))]
use crate::{debug, trace, warn};

// ─── Identity ────────────────────────────────────────────────────────────────

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Fresh stable identity for behaviors, events and registration slots.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// A dependency record: one re-runnable computation with the timestamp
/// span of its last execution.
pub(crate) struct Reader {
    /// Timestamp at which the computation began; scheduling priority.
    pub(crate) start: Cell<TimeId>,
    /// Timestamp just past the last action of the previous run.
    pub(crate) end: Cell<TimeId>,
    /// Set while the reader sits in the heap; makes enqueueing idempotent
    /// within one cycle.
    pub(crate) enqueued: Cell<bool>,
    run: RefCell<Box<dyn FnMut(&Runtime)>>,
}

impl Reader {
    pub(crate) fn new(start: TimeId, run: Box<dyn FnMut(&Runtime)>) -> Rc<Self> {
        Rc::new(Self {
            start: Cell::new(start),
            end: Cell::new(start),
            enqueued: Cell::new(false),
            run: RefCell::new(run),
        })
    }

    fn invoke(&self, rt: &Runtime) {
        (self.run.borrow_mut())(rt);
    }
}

// ─── Runtime ─────────────────────────────────────────────────────────────────

pub(crate) struct RtInner {
    timeline: RefCell<Timeline>,
    readers: RefCell<ReaderQueue>,
    events: RefCell<EventQueue>,
    current: RefCell<Option<Rc<Reader>>>,
    propagating: Cell<bool>,
    /// Monotone dispatch serial; source of fresh epochs.
    epoch_counter: Cell<u64>,
    /// Epoch of the reader run currently executing (0 outside any run).
    epoch: Cell<u64>,
    failure_sink: RefCell<Rc<dyn Fn(&Failure)>>,
    debug_sink: RefCell<Option<Rc<dyn Fn(&str)>>>,
}

pub(crate) type RtWeak = Weak<RtInner>;

/// Handle to one FRP runtime instance.
///
/// Cheaply cloneable; all clones share the same timeline and scheduler.
/// Everything is single-threaded and cooperative: the handle is neither
/// `Send` nor `Sync`, and propagation runs to quiescence before a `send`
/// returns.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RtInner>,
}

impl Runtime {
    /// A fresh runtime with an empty timeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RtInner {
                timeline: RefCell::new(Timeline::new()),
                readers: RefCell::new(ReaderQueue::default()),
                events: RefCell::new(EventQueue::default()),
                current: RefCell::new(None),
                propagating: Cell::new(false),
                epoch_counter: Cell::new(0),
                epoch: Cell::new(0),
                failure_sink: RefCell::new(Rc::new(|_| {})),
                debug_sink: RefCell::new(None),
            }),
        }
    }

    /// Discard all pending work and the whole timeline, firing every
    /// outstanding cleanup in timeline order. Existing behaviors and
    /// events keep their current results but lose their registrations.
    pub fn init(&self) {
        self.inner.events.borrow_mut().clear();
        self.inner.readers.borrow_mut().clear();
        *self.inner.current.borrow_mut() = None;
        self.inner.propagating.set(false);
        let batch = self.inner.timeline.borrow_mut().init();
        debug!(cleanups = batch.len(), "runtime reset");
        self.fire_cleanups(batch);
    }

    /// Whether both scheduler queues are empty. Holds at the end of every
    /// propagation cycle.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.inner.events.borrow().is_empty() && self.inner.readers.borrow().is_empty()
    }

    /// Register a cleanup on the current timestamp. It fires when the
    /// enclosing binder re-runs, or at [`init`](Runtime::init) for
    /// registrations made outside any binder.
    pub fn cleanup(&self, f: impl FnOnce() + 'static) {
        self.add_cleanup_here(Box::new(f));
    }

    /// Send a line to the configured debug sink, if any.
    pub fn debug(&self, message: &str) {
        let sink = self.inner.debug_sink.borrow().clone();
        if let Some(sink) = sink {
            sink(message);
        }
    }

    /// Install the debug-string sink. Default: lines are dropped.
    pub fn set_debug_sink(&self, sink: impl Fn(&str) + 'static) {
        *self.inner.debug_sink.borrow_mut() = Some(Rc::new(sink));
    }

    /// Install the uncaught-failure sink, invoked with every panic
    /// captured from a listener or cleanup. Default: failures are dropped
    /// (they are still logged at WARN when the `tracing` feature is on).
    pub fn set_failure_sink(&self, sink: impl Fn(&Failure) + 'static) {
        *self.inner.failure_sink.borrow_mut() = Rc::new(sink);
    }

    // ── Internal: identity and context ───────────────────────────────

    pub(crate) fn downgrade(&self) -> RtWeak {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &RtWeak) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Epoch of the currently executing reader run (0 outside any run);
    /// the memo layer uses it to detect a fresh calling-context
    /// incarnation. Nested dispatches get their own epoch and the outer
    /// one is restored afterwards.
    pub(crate) fn epoch(&self) -> u64 {
        self.inner.epoch.get()
    }

    pub(crate) fn current_reader(&self) -> Option<Rc<Reader>> {
        self.inner.current.borrow().clone()
    }

    pub(crate) fn in_reader(&self) -> bool {
        self.inner.current.borrow().is_some()
    }

    // ── Internal: timeline access ────────────────────────────────────

    pub(crate) fn now(&self) -> TimeId {
        self.inner.timeline.borrow().get_now()
    }

    pub(crate) fn tick(&self) -> TimeId {
        self.inner
            .timeline
            .borrow_mut()
            .tick()
            .expect("timeline cursor is always live inside the runtime")
    }

    /// Tick and attach `cleanup` to the fresh timestamp, placing it
    /// strictly inside the enclosing reader's span (if any).
    pub(crate) fn add_cleanup_here(&self, cleanup: Cleanup) {
        let mut tl = self.inner.timeline.borrow_mut();
        let t = tl
            .tick()
            .expect("timeline cursor is always live inside the runtime");
        tl.add_cleanup(t, cleanup)
            .expect("freshly ticked timestamp is live");
    }

    // ── Internal: failure capture ────────────────────────────────────

    /// Run a listener or cleanup, converting a panic into a report to the
    /// uncaught-failure sink. Propagation continues.
    pub(crate) fn guard<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        match run_trapped(f) {
            Ok(value) => Some(value),
            Err(failure) => {
                self.report_failure(&failure);
                None
            }
        }
    }

    pub(crate) fn report_failure(&self, failure: &Failure) {
        warn!(failure = %failure, "uncaught failure in listener or cleanup");
        let sink = self.inner.failure_sink.borrow().clone();
        sink(failure);
    }

    pub(crate) fn fire_cleanups(&self, batch: Vec<Cleanup>) {
        for cleanup in batch {
            self.guard(cleanup);
        }
    }

    // ── Internal: scheduling ─────────────────────────────────────────

    pub(crate) fn enqueue_reader(&self, reader: &Rc<Reader>) {
        if reader.enqueued.get() {
            return;
        }
        reader.enqueued.set(true);
        let tl = self.inner.timeline.borrow();
        self.inner.readers.borrow_mut().push(Rc::clone(reader), &tl);
    }

    pub(crate) fn enqueue_delivery(&self, delivery: Delivery) {
        self.inner.events.borrow_mut().push(delivery);
        if !self.inner.propagating.get() {
            self.propagate();
        }
    }

    /// First execution of a freshly created reader; its start timestamp
    /// was just ticked by the caller, so the run records its span at the
    /// current position (inside the enclosing reader's span, if any). The
    /// end timestamp is allocated once, just past the run's last action;
    /// re-runs rebuild the interior of the same `(start, end)` span.
    pub(crate) fn run_reader_initial(&self, reader: &Rc<Reader>) {
        self.dispatch(reader);
        reader.end.set(self.tick());
    }

    fn dispatch(&self, reader: &Rc<Reader>) {
        let serial = self.inner.epoch_counter.get() + 1;
        self.inner.epoch_counter.set(serial);
        let previous_epoch = self.inner.epoch.replace(serial);
        let previous = self.inner.current.replace(Some(Rc::clone(reader)));
        reader.invoke(self);
        *self.inner.current.borrow_mut() = previous;
        self.inner.epoch.set(previous_epoch);
    }

    fn redispatch(&self, reader: &Rc<Reader>) {
        let batch = self
            .inner
            .timeline
            .borrow_mut()
            .splice_out(reader.start.get(), reader.end.get())
            .expect("enqueued reader span is live");
        self.fire_cleanups(batch);
        // Remember the tail position: the run moves the cursor into the
        // reader's span, and anything created after this cycle must tick
        // outside every span.
        let resume = self.now();
        self.inner
            .timeline
            .borrow_mut()
            .set_now(reader.start.get())
            .expect("reader start verified live");
        reader.enqueued.set(false);
        self.dispatch(reader);
        self.inner
            .timeline
            .borrow_mut()
            .set_now(resume)
            .expect("timeline tail is never spliced");
    }

    /// One top-level propagation cycle. Reentrant calls return
    /// immediately; a `send` from inside a listener or binder only
    /// enqueues.
    pub(crate) fn propagate(&self) {
        if self.inner.propagating.get() {
            return;
        }
        self.inner.propagating.set(true);
        trace!("propagation cycle start");
        loop {
            // Event phase.
            loop {
                let delivery = self.inner.events.borrow_mut().pop();
                match delivery {
                    Some(delivery) => delivery(self),
                    None => break,
                }
            }
            // Update phase.
            loop {
                let reader = {
                    let tl = self.inner.timeline.borrow();
                    self.inner.readers.borrow_mut().pop(&tl)
                };
                let Some(reader) = reader else { break };
                if self
                    .inner
                    .timeline
                    .borrow()
                    .is_spliced_out(reader.start.get())
                {
                    // Superseded while queued: its binder re-ran.
                    reader.enqueued.set(false);
                    continue;
                }
                self.redispatch(&reader);
            }
            // Update-phase listeners may have enqueued new events.
            if self.inner.events.borrow().is_empty() {
                break;
            }
        }
        trace!("propagation cycle quiescent");
        self.inner.propagating.set(false);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("timeline", &self.inner.timeline.borrow())
            .field("propagating", &self.inner.propagating.get())
            .field("quiescent", &self.is_quiescent())
            .finish()
    }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// Guard for one listener or notifier registration.
///
/// Cancelling removes the registration; cancelling twice is a no-op.
/// Dropping the guard also cancels, so keep it alive for as long as the
/// callback should fire.
pub struct Subscription {
    cancel: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: RefCell::new(Some(Box::new(cancel))),
        }
    }

    /// Remove the registration. Idempotent.
    pub fn cancel(&self) {
        if let Some(f) = self.cancel.borrow_mut().take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.borrow().is_some())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
