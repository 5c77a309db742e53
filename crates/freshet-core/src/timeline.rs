#![forbid(unsafe_code)]

//! The timeline: a totally-ordered sequence of logical timestamps.
//!
//! # Design
//!
//! Timestamps order reader re-executions and bound the lifetime of
//! dependencies. The timeline is a singly next-chained list stored in a
//! generational arena: a [`TimeId`] is a `Copy` key (slot index plus
//! generation), and splicing a node out recycles its slot under a bumped
//! generation, so every outstanding id for it reports "spliced out"
//! instead of aliasing a new node.
//!
//! The chain always runs `head → … → sentinel`, where the sentinel is the
//! unique node whose successor is itself. `now` points at the most recently
//! allocated live node; [`tick`](Timeline::tick) inserts the new node
//! immediately after `now`.
//!
//! # Invariants
//!
//! 1. There is exactly one live chain, terminated by the sentinel.
//! 2. For live `t1 != t2`, exactly one of them reaches the other by a
//!    forward walk; [`compare`](Timeline::compare) is a total order
//!    consistent with creation order.
//! 3. A spliced-out timestamp is rejected by every operation with
//!    [`TimeError::InvalidTimestamp`].
//! 4. Cleanups attached to one timestamp fire in reverse registration
//!    order (LIFO); a spliced range processes its timestamps in forward
//!    (timeline) order.
//!
//! Ordering queries walk the chain, so `compare` and `splice_out` are O(n)
//! in the number of live timestamps. An order-maintenance structure with
//! O(1) amortized queries could be substituted without changing any
//! contract here.
//!
//! Cleanup batches are *returned* rather than run in place, so that user
//! callbacks never execute while the timeline is borrowed; the runtime
//! fires them (capturing panics). Contracts are unaffected.

use crate::error::TimeError;

/// A deferred action owned by a timestamp, fired when the timestamp is
/// spliced out (or at [`Timeline::init`]).
pub type Cleanup = Box<dyn FnOnce()>;

/// A timestamp: a generational key into the timeline arena.
///
/// Identity comparison (`==`) is the original `equal` operation; ordering
/// requires the owning [`Timeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeId {
    index: u32,
    generation: u32,
}

impl TimeId {
    /// An id that no timeline will ever report live. Used to seed fields
    /// before a real timestamp is known and by handles whose runtime is
    /// gone.
    pub(crate) const DETACHED: TimeId = TimeId {
        index: u32::MAX,
        generation: u32::MAX,
    };
}

struct Node {
    next: TimeId,
    generation: u32,
    live: bool,
    cleanups: Vec<Cleanup>,
}

/// The ordered timestamp store. See the module docs for the contracts.
pub struct Timeline {
    nodes: Vec<Node>,
    free: Vec<u32>,
    head: TimeId,
    sentinel: TimeId,
    now: TimeId,
}

impl Timeline {
    /// A fresh timeline: `head → sentinel`, `now` at the head.
    #[must_use]
    pub fn new() -> Self {
        let mut tl = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            head: TimeId::DETACHED,
            sentinel: TimeId::DETACHED,
            now: TimeId::DETACHED,
        };
        tl.install();
        tl
    }

    fn install(&mut self) {
        let sentinel = self.alloc();
        self.link(sentinel, sentinel);
        let head = self.alloc();
        self.link(head, sentinel);
        self.sentinel = sentinel;
        self.head = head;
        self.now = head;
    }

    fn alloc(&mut self) -> TimeId {
        if let Some(index) = self.free.pop() {
            let generation = self.nodes[index as usize].generation;
            let id = TimeId { index, generation };
            self.nodes[index as usize] = Node {
                next: id,
                generation,
                live: true,
                cleanups: Vec::new(),
            };
            id
        } else {
            let index = self.nodes.len() as u32;
            let id = TimeId {
                index,
                generation: 0,
            };
            self.nodes.push(Node {
                next: id,
                generation: 0,
                live: true,
                cleanups: Vec::new(),
            });
            id
        }
    }

    fn link(&mut self, from: TimeId, to: TimeId) {
        self.nodes[from.index as usize].next = to;
    }

    fn next_of(&self, t: TimeId) -> TimeId {
        self.nodes[t.index as usize].next
    }

    /// Whether `t` names a live (not spliced-out) timestamp of this
    /// timeline incarnation.
    #[must_use]
    pub fn is_live(&self, t: TimeId) -> bool {
        match self.nodes.get(t.index as usize) {
            Some(node) => node.generation == t.generation && node.live,
            None => false,
        }
    }

    /// Whether `t` has been removed (by a splice or by `init`).
    #[must_use]
    pub fn is_spliced_out(&self, t: TimeId) -> bool {
        !self.is_live(t)
    }

    fn check(&self, t: TimeId) -> Result<(), TimeError> {
        if self.is_live(t) {
            Ok(())
        } else {
            Err(TimeError::InvalidTimestamp)
        }
    }

    /// The current cursor.
    #[must_use]
    pub fn get_now(&self) -> TimeId {
        self.now
    }

    /// Move the cursor to `t`.
    pub fn set_now(&mut self, t: TimeId) -> Result<(), TimeError> {
        self.check(t)?;
        self.now = t;
        Ok(())
    }

    /// Insert a fresh timestamp immediately after `now` and advance the
    /// cursor to it.
    pub fn tick(&mut self) -> Result<TimeId, TimeError> {
        self.check(self.now)?;
        let successor = self.next_of(self.now);
        let fresh = self.alloc();
        self.link(fresh, successor);
        let now = self.now;
        self.link(now, fresh);
        self.now = fresh;
        Ok(fresh)
    }

    /// Attach a cleanup to `t`. Cleanups on one timestamp fire LIFO.
    pub fn add_cleanup(&mut self, t: TimeId, cleanup: Cleanup) -> Result<(), TimeError> {
        self.check(t)?;
        self.nodes[t.index as usize].cleanups.push(cleanup);
        Ok(())
    }

    /// Remove every timestamp strictly between `t1` and `t2` and return
    /// their cleanups in firing order (forward across timestamps, LIFO
    /// within one).
    ///
    /// Fails with [`TimeError::InvalidTimestamp`] if either endpoint is
    /// dead or `t2` does not lie after `t1`; the range is validated before
    /// anything is removed, so a failed splice leaves the timeline
    /// untouched.
    pub fn splice_out(&mut self, t1: TimeId, t2: TimeId) -> Result<Vec<Cleanup>, TimeError> {
        self.check(t1)?;
        self.check(t2)?;
        // Validation walk: t2 must be reachable from t1 without passing the
        // sentinel.
        let mut cursor = self.next_of(t1);
        while cursor != t2 {
            if cursor == self.sentinel {
                return Err(TimeError::InvalidTimestamp);
            }
            cursor = self.next_of(cursor);
        }
        // Removal walk.
        let mut batch = Vec::new();
        let mut cursor = self.next_of(t1);
        while cursor != t2 {
            let node = &mut self.nodes[cursor.index as usize];
            let following = node.next;
            batch.extend(node.cleanups.drain(..).rev());
            node.live = false;
            node.generation = node.generation.wrapping_add(1);
            self.free.push(cursor.index);
            cursor = following;
        }
        self.link(t1, t2);
        Ok(batch)
    }

    /// Order two timestamps: `Less` if `t1` precedes `t2` on the chain,
    /// `Equal` for the same timestamp, `Greater` otherwise.
    pub fn compare(&self, t1: TimeId, t2: TimeId) -> Result<std::cmp::Ordering, TimeError> {
        self.check(t1)?;
        self.check(t2)?;
        if t1 == t2 {
            return Ok(std::cmp::Ordering::Equal);
        }
        let mut cursor = self.next_of(t1);
        loop {
            if cursor == t2 {
                return Ok(std::cmp::Ordering::Less);
            }
            if cursor == self.sentinel {
                return Ok(std::cmp::Ordering::Greater);
            }
            cursor = self.next_of(cursor);
        }
    }

    /// Total order for the scheduler's heap: a dead timestamp sorts first
    /// so lazily-deleted entries surface immediately and get discarded.
    pub(crate) fn heap_cmp(&self, t1: TimeId, t2: TimeId) -> std::cmp::Ordering {
        match (self.is_live(t1), self.is_live(t2)) {
            (false, false) => (t1.index, t1.generation).cmp(&(t2.index, t2.generation)),
            (false, true) => std::cmp::Ordering::Less,
            (true, false) => std::cmp::Ordering::Greater,
            (true, true) => self
                .compare(t1, t2)
                .expect("both timestamps verified live"),
        }
    }

    /// Discard the whole timeline: return every pending cleanup (from the
    /// head forward) for the caller to fire, then install a fresh chain.
    /// Idempotent. Slots are recycled under bumped generations, so ids
    /// from the previous incarnation stay invalid.
    pub fn init(&mut self) -> Vec<Cleanup> {
        let mut batch = Vec::new();
        if self.is_live(self.head) {
            let mut cursor = self.head;
            while cursor != self.sentinel {
                let node = &mut self.nodes[cursor.index as usize];
                batch.extend(node.cleanups.drain(..).rev());
                cursor = node.next;
            }
        }
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if node.live {
                node.live = false;
                node.generation = node.generation.wrapping_add(1);
                node.cleanups.clear();
                self.free.push(index as u32);
            }
        }
        self.install();
        batch
    }

    /// Number of live timestamps, the boundary head and sentinel included.
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.nodes.iter().filter(|n| n.live).count()
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("live", &self.live_len())
            .field("recycled", &self.free.len())
            .field("now", &self.now)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
