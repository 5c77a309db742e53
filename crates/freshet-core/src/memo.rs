#![forbid(unsafe_code)]

//! Order-replaying memoization.
//!
//! # Contract
//!
//! A [`Memo`] keeps an ordered list of `(key, value)` records per
//! calling-context incarnation: within one run of the enclosing binder,
//! the i-th [`call`](Memo::call) probes the i-th record. If the keys match
//! (under the user-supplied hash and equality), the stored value is reused
//! and the probe advances; otherwise the remainder of the list is
//! discarded and the function runs afresh. Records are made in call order
//! (a slot is reserved before evaluation), so recursive traversals replay
//! positionally.
//!
//! This is deliberately **not** a general cache: reuse happens only in the
//! original call order of the context that produced the records. It is
//! sufficient for memoizing recursive traversals over stable structure.
//!
//! Structural hashes are unsuitable for behaviors and events (they contain
//! mutable state); use [`hash_behavior`] / [`hash_event`], which hash by
//! stable identity.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::behavior::Behavior;
use crate::event::Event;
use crate::runtime::{RtWeak, Runtime};

/// Stable identity hash for a behavior, for use as a memo key.
#[must_use]
pub fn hash_behavior<T>(behavior: &Behavior<T>) -> u64 {
    behavior.id()
}

/// Stable identity hash for an event channel, for use as a memo key.
#[must_use]
pub fn hash_event<T>(event: &Event<T>) -> u64 {
    event.id()
}

struct MemoEntry<K, V> {
    hash: u64,
    key: K,
    /// `None` while the reserved call is still evaluating.
    value: Option<V>,
}

struct MemoState<K, V> {
    epoch: u64,
    probe: usize,
    entries: Vec<MemoEntry<K, V>>,
}

/// A memoized function with the order-replaying contract described in the
/// module docs.
pub struct Memo<K, V> {
    rt: RtWeak,
    hash: Rc<dyn Fn(&K) -> u64>,
    eq: Rc<dyn Fn(&K, &K) -> bool>,
    f: Rc<dyn Fn(&K) -> V>,
    state: Rc<RefCell<MemoState<K, V>>>,
}

impl<K, V> Clone for Memo<K, V> {
    fn clone(&self) -> Self {
        Self {
            rt: self.rt.clone(),
            hash: Rc::clone(&self.hash),
            eq: Rc::clone(&self.eq),
            f: Rc::clone(&self.f),
            state: Rc::clone(&self.state),
        }
    }
}

impl<K, V> fmt::Debug for Memo<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Memo")
            .field("entries", &state.entries.len())
            .field("probe", &state.probe)
            .finish()
    }
}

impl Runtime {
    /// Create a memoized version of `f` with user-supplied key hashing and
    /// equality.
    pub fn memo<K, V, HF, EF, F>(&self, hash: HF, eq: EF, f: F) -> Memo<K, V>
    where
        K: Clone + 'static,
        V: Clone + 'static,
        HF: Fn(&K) -> u64 + 'static,
        EF: Fn(&K, &K) -> bool + 'static,
        F: Fn(&K) -> V + 'static,
    {
        Memo {
            rt: self.downgrade(),
            hash: Rc::new(hash),
            eq: Rc::new(eq),
            f: Rc::new(f),
            state: Rc::new(RefCell::new(MemoState {
                epoch: 0,
                probe: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<K: Clone + 'static, V: Clone + 'static> Memo<K, V> {
    /// Apply the memoized function.
    pub fn call(&self, key: &K) -> V {
        let epoch = Runtime::from_weak(&self.rt).map_or(0, |rt| rt.epoch());
        let hash = (self.hash)(key);
        let index;
        {
            let mut state = self.state.borrow_mut();
            if state.epoch != epoch {
                // Fresh incarnation of the calling context: replay from
                // the front.
                state.epoch = epoch;
                state.probe = 0;
            }
            index = state.probe;
            if let Some(entry) = state.entries.get(index) {
                if entry.hash == hash && (self.eq)(&entry.key, key) {
                    if let Some(value) = &entry.value {
                        let value = value.clone();
                        state.probe = index + 1;
                        return value;
                    }
                }
            }
            // Mismatch (or a still-evaluating reservation): discard the
            // tail and reserve this position in call order.
            state.entries.truncate(index);
            state.entries.push(MemoEntry {
                hash,
                key: key.clone(),
                value: None,
            });
            state.probe = index + 1;
        }
        // The state borrow is released: `f` may recurse into this memo.
        let value = (self.f)(key);
        {
            let mut state = self.state.borrow_mut();
            if let Some(entry) = state.entries.get_mut(index) {
                if entry.hash == hash && entry.value.is_none() && (self.eq)(&entry.key, key) {
                    entry.value = Some(value.clone());
                }
            }
        }
        value
    }
}
