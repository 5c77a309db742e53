#![forbid(unsafe_code)]

//! Scheduler queues: the reader priority heap and the event FIFO.
//!
//! The reader queue is a binary min-heap keyed by each reader's start
//! timestamp under timeline order. Deletion is lazy: a reader whose start
//! was spliced out compares as "earliest", surfaces at the next pop, and is
//! discarded by the propagator. Since the relative order of live
//! timestamps never changes, live entries still pop in timeline order.
//!
//! The event queue is a FIFO of type-erased delivery thunks; each thunk
//! invokes one channel's listeners with the delivered result.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::runtime::{Reader, Runtime};
use crate::timeline::Timeline;

/// One queued event delivery.
pub(crate) type Delivery = Box<dyn FnOnce(&Runtime)>;

#[derive(Default)]
pub(crate) struct EventQueue {
    fifo: VecDeque<Delivery>,
}

impl EventQueue {
    pub(crate) fn push(&mut self, delivery: Delivery) {
        self.fifo.push_back(delivery);
    }

    pub(crate) fn pop(&mut self) -> Option<Delivery> {
        self.fifo.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.fifo.clear();
    }
}

#[derive(Default)]
pub(crate) struct ReaderQueue {
    heap: Vec<Rc<Reader>>,
}

impl ReaderQueue {
    pub(crate) fn push(&mut self, reader: Rc<Reader>, tl: &Timeline) {
        self.heap.push(reader);
        self.sift_up(self.heap.len() - 1, tl);
    }

    /// Pop the reader with the earliest start timestamp.
    pub(crate) fn pop(&mut self, tl: &Timeline) -> Option<Rc<Reader>> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let min = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0, tl);
        }
        min
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }

    fn less(&self, a: usize, b: usize, tl: &Timeline) -> bool {
        tl.heap_cmp(self.heap[a].start.get(), self.heap[b].start.get())
            == std::cmp::Ordering::Less
    }

    fn sift_up(&mut self, mut child: usize, tl: &Timeline) {
        while child > 0 {
            let parent = (child - 1) / 2;
            if !self.less(child, parent, tl) {
                break;
            }
            self.heap.swap(child, parent);
            child = parent;
        }
    }

    fn sift_down(&mut self, mut parent: usize, tl: &Timeline) {
        loop {
            let left = 2 * parent + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < self.heap.len() && self.less(right, left, tl) {
                smallest = right;
            }
            if !self.less(smallest, parent, tl) {
                break;
            }
            self.heap.swap(parent, smallest);
            parent = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Timeline;

    fn reader_at(tl: &mut Timeline) -> Rc<Reader> {
        let start = tl.tick().unwrap();
        Reader::new(start, Box::new(|_| {}))
    }

    #[test]
    fn pops_in_timeline_order_regardless_of_push_order() {
        let mut tl = Timeline::new();
        let a = reader_at(&mut tl);
        let b = reader_at(&mut tl);
        let c = reader_at(&mut tl);
        let mut q = ReaderQueue::default();
        q.push(c.clone(), &tl);
        q.push(a.clone(), &tl);
        q.push(b.clone(), &tl);
        assert!(Rc::ptr_eq(&q.pop(&tl).unwrap(), &a));
        assert!(Rc::ptr_eq(&q.pop(&tl).unwrap(), &b));
        assert!(Rc::ptr_eq(&q.pop(&tl).unwrap(), &c));
        assert!(q.pop(&tl).is_none());
    }

    #[test]
    fn spliced_start_surfaces_before_live_entries() {
        let mut tl = Timeline::new();
        let anchor = tl.get_now();
        let dead = reader_at(&mut tl);
        let live = reader_at(&mut tl);
        let fence = tl.tick().unwrap();
        // Splice out only `dead`'s start.
        tl.set_now(anchor).unwrap();
        tl.splice_out(anchor, live.start.get()).unwrap();
        let _ = fence;
        let mut q = ReaderQueue::default();
        q.push(live.clone(), &tl);
        q.push(dead.clone(), &tl);
        let first = q.pop(&tl).unwrap();
        assert!(Rc::ptr_eq(&first, &dead));
        assert!(tl.is_spliced_out(first.start.get()));
        let second = q.pop(&tl).unwrap();
        assert!(Rc::ptr_eq(&second, &live));
        assert!(tl.is_live(second.start.get()));
    }

    #[test]
    fn event_queue_is_fifo() {
        let mut q = EventQueue::default();
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            q.push(Box::new(move |_| order.borrow_mut().push(tag)));
        }
        let rt = crate::runtime::Runtime::new();
        while let Some(d) = q.pop() {
            d(&rt);
        }
        assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    }
}
