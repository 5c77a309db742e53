#![forbid(unsafe_code)]

//! Event channels: discrete occurrences and their combinators.
//!
//! # Design
//!
//! An [`Event<T>`] is the read side of a channel: it can be listened to and
//! combined, but not published. The paired [`EventSender<T>`] is the write
//! capability. `send` enqueues a delivery on the runtime's FIFO and starts
//! a propagation cycle if none is running; a reentrant send only enqueues.
//!
//! Combinator channels (`map`, `filter`, `merge`, `collect`, `next`)
//! forward through their own sender, so a forwarded occurrence re-enters
//! the FIFO and global delivery order stays consistent with send order.
//!
//! Listener registrations made inside a binder are scoped to the binder's
//! span (removed when it re-runs); the `notify_*_cancel` variants return an
//! explicit [`Subscription`] handle instead.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::error::{run_trapped, BResult, Failure};
use crate::runtime::{next_id, RtWeak, Runtime, Subscription};

pub(crate) struct ListenerSlot<T> {
    slot: u64,
    f: Rc<dyn Fn(&Runtime, &BResult<T>)>,
}

pub(crate) struct ChannelCore<T> {
    rt: RtWeak,
    id: u64,
    listeners: RefCell<Vec<ListenerSlot<T>>>,
}

/// The read side of an event channel. Cloning shares the channel.
pub struct Event<T> {
    pub(crate) core: Rc<ChannelCore<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.core.id)
            .field("listeners", &self.core.listeners.borrow().len())
            .finish()
    }
}

impl<T> PartialEq for Event<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl<T> Eq for Event<T> {}

impl<T> Hash for Event<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.core.id);
    }
}

/// The write capability for one channel.
pub struct EventSender<T> {
    core: Rc<ChannelCore<T>>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for EventSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("id", &self.core.id)
            .finish()
    }
}

impl Runtime {
    /// A fresh channel and its sender.
    #[must_use]
    pub fn make_event<T: Clone + 'static>(&self) -> (Event<T>, EventSender<T>) {
        let core = Rc::new(ChannelCore {
            rt: self.downgrade(),
            id: next_id(),
            listeners: RefCell::new(Vec::new()),
        });
        (
            Event {
                core: Rc::clone(&core),
            },
            EventSender { core },
        )
    }

    /// A channel that never fires.
    #[must_use]
    pub fn never<T: Clone + 'static>(&self) -> Event<T> {
        self.make_event().0
    }
}

impl<T: Clone + 'static> EventSender<T> {
    /// Enqueue a value occurrence. Starts a propagation cycle unless one
    /// is already running.
    pub fn send(&self, value: T) {
        self.send_result(Ok(value));
    }

    /// Enqueue a failure occurrence.
    pub fn send_error(&self, failure: Failure) {
        self.send_result(Err(failure));
    }

    /// Enqueue an occurrence carrying a full result.
    pub fn send_result(&self, result: BResult<T>) {
        let Some(rt) = Runtime::from_weak(&self.core.rt) else {
            return;
        };
        let core = Rc::clone(&self.core);
        rt.enqueue_delivery(Box::new(move |rt: &Runtime| {
            deliver(rt, &core, &result);
        }));
    }
}

/// Invoke a channel's listeners in registration order. A panicking
/// listener is reported to the uncaught-failure sink and delivery
/// continues.
fn deliver<T: Clone + 'static>(rt: &Runtime, core: &Rc<ChannelCore<T>>, result: &BResult<T>) {
    let snapshot: Vec<Rc<dyn Fn(&Runtime, &BResult<T>)>> = core
        .listeners
        .borrow()
        .iter()
        .map(|slot| slot.f.clone())
        .collect();
    for listener in snapshot {
        rt.guard(|| listener(rt, result));
    }
}

impl<T> Event<T> {
    /// Stable identity of this channel; the hash to use when memoizing
    /// over events.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id
    }
}

impl<T: Clone + 'static> Event<T> {
    pub(crate) fn rt(&self) -> Option<Runtime> {
        Runtime::from_weak(&self.core.rt)
    }

    /// A channel attached to no runtime; it can never fire.
    pub(crate) fn inert() -> Self {
        Self {
            core: Rc::new(ChannelCore {
                rt: Weak::new(),
                id: next_id(),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    fn push_listener(&self, f: Rc<dyn Fn(&Runtime, &BResult<T>)>) -> u64 {
        let slot = next_id();
        self.core
            .listeners
            .borrow_mut()
            .push(ListenerSlot { slot, f });
        slot
    }

    fn remove_listener(&self, slot: u64) -> impl FnOnce() + 'static {
        let weak = Rc::downgrade(&self.core);
        move || {
            if let Some(core) = weak.upgrade() {
                core.listeners.borrow_mut().retain(|s| s.slot != slot);
            }
        }
    }

    /// Register a listener; inside a binder the registration is scoped to
    /// the binder's span.
    pub(crate) fn listen_scoped(&self, f: Rc<dyn Fn(&Runtime, &BResult<T>)>) {
        let slot = self.push_listener(f);
        if let Some(rt) = self.rt() {
            if rt.in_reader() {
                rt.add_cleanup_here(Box::new(self.remove_listener(slot)));
            }
        }
    }

    /// Attach a value listener. Failure occurrences are skipped. Scoped to
    /// the enclosing binder's span if registered inside one.
    pub fn notify(&self, f: impl Fn(&T) + 'static) {
        self.listen_scoped(Rc::new(move |_rt, result: &BResult<T>| {
            if let Ok(value) = result {
                f(value);
            }
        }));
    }

    /// Attach a result listener (sees failures too).
    pub fn notify_result(&self, f: impl Fn(&BResult<T>) + 'static) {
        self.listen_scoped(Rc::new(move |_rt, result: &BResult<T>| f(result)));
    }

    /// Value listener with an explicit cancellation handle; no span
    /// cleanup is attached.
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
        let slot = self.push_listener(Rc::new(move |_rt, result: &BResult<T>| f(result)));
        Subscription::new(self.remove_listener(slot))
    }

    /// Forward each occurrence through `f`. A panic in `f` forwards a
    /// failure occurrence.
    pub fn map<U, F>(&self, f: F) -> Event<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let Some(rt) = self.rt() else {
            return Event::inert();
        };
        let (out, sender) = rt.make_event::<U>();
        self.listen_scoped(Rc::new(move |_rt, result: &BResult<T>| match result {
            Ok(value) => sender.send_result(run_trapped(|| f(value))),
            Err(failure) => sender.send_error(failure.clone()),
        }));
        out
    }

    /// Forward only the occurrences whose value satisfies `p`. Failure
    /// occurrences always pass through.
    pub fn filter<P>(&self, p: P) -> Event<T>
    where
        P: Fn(&T) -> bool + 'static,
    {
        let Some(rt) = self.rt() else {
            return Event::inert();
        };
        let (out, sender) = rt.make_event::<T>();
        self.listen_scoped(Rc::new(move |_rt, result: &BResult<T>| match result {
            Ok(value) => match run_trapped(|| p(value)) {
                Ok(true) => sender.send(value.clone()),
                Ok(false) => {}
                Err(failure) => sender.send_error(failure),
            },
            Err(failure) => sender.send_error(failure.clone()),
        }));
        out
    }

    /// One channel forwarding the occurrences of every input, in global
    /// send order.
    #[must_use]
    pub fn merge(inputs: &[Event<T>]) -> Event<T> {
        let Some(rt) = inputs.iter().find_map(|e| e.rt()) else {
            return Event::inert();
        };
        let (out, sender) = rt.make_event::<T>();
        for input in inputs {
            let sender = sender.clone();
            input.listen_scoped(Rc::new(move |_rt, result: &BResult<T>| {
                sender.send_result(result.clone());
            }));
        }
        out
    }

    /// Fold occurrences into an accumulator, emitting each intermediate
    /// state. Failure occurrences forward without touching the
    /// accumulator.
    pub fn collect<B, F>(&self, init: B, f: F) -> Event<B>
    where
        B: Clone + 'static,
        F: Fn(&B, &T) -> B + 'static,
    {
        let Some(rt) = self.rt() else {
            return Event::inert();
        };
        let (out, sender) = rt.make_event::<B>();
        let acc = RefCell::new(init);
        self.listen_scoped(Rc::new(move |_rt, result: &BResult<T>| match result {
            Ok(value) => {
                let current = acc.borrow().clone();
                match run_trapped(|| f(&current, value)) {
                    Ok(next) => {
                        *acc.borrow_mut() = next.clone();
                        sender.send(next);
                    }
                    Err(failure) => sender.send_error(failure),
                }
            }
            Err(failure) => sender.send_error(failure.clone()),
        }));
        out
    }

    /// The first occurrence only; the registration cancels itself once it
    /// has fired.
    #[must_use]
    pub fn next(&self) -> Event<T> {
        let Some(rt) = self.rt() else {
            return Event::inert();
        };
        let (out, sender) = rt.make_event::<T>();
        let armed = Rc::new(RefCell::new(None::<u64>));
        let weak = Rc::downgrade(&self.core);
        let trigger = {
            let armed = Rc::clone(&armed);
            Rc::new(move |_rt: &Runtime, result: &BResult<T>| {
                if let Some(slot) = armed.borrow_mut().take() {
                    sender.send_result(result.clone());
                    if let Some(core) = weak.upgrade() {
                        core.listeners.borrow_mut().retain(|s| s.slot != slot);
                    }
                }
            })
        };
        let slot = self.push_listener(trigger);
        *armed.borrow_mut() = Some(slot);
        if rt.in_reader() {
            rt.add_cleanup_here(Box::new(self.remove_listener(slot)));
        }
        out
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
