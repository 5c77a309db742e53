//! Property-based invariant tests for propagation.
//!
//! For any sequence of external writes:
//!
//! 1. A diamond-shaped graph stays consistent after every cycle and its
//!    join node runs exactly once per cycle.
//! 2. `hold(current, changes(b))` mirrors `b` write for write.
//! 3. A merge of two channels delivers in exact global send order.
//! 4. An n-way lift always equals the function of the current inputs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use freshet_core::{Behavior, Runtime};
use proptest::prelude::*;

fn writes() -> impl Strategy<Value = Vec<i64>> {
    proptest::collection::vec(-100i64..100, 1..30)
}

proptest! {
    #[test]
    fn diamond_is_consistent_and_runs_once_per_cycle(values in writes()) {
        let rt = Runtime::new();
        let (a, set_a) = rt.make_cell(0i64);
        let b = a.map(|x| x + 1);
        let c = a.map(|x| x * 2);
        let runs = Rc::new(Cell::new(0u32));
        let d = {
            let runs = Rc::clone(&runs);
            Behavior::lift2(&b, &c, move |x, y| {
                runs.set(runs.get() + 1);
                x + y
            })
        };
        let baseline = runs.get();
        for (cycle, value) in values.iter().enumerate() {
            set_a.set(*value);
            prop_assert!(rt.is_quiescent());
            prop_assert_eq!(d.get(), (value + 1) + (value * 2));
            prop_assert_eq!(runs.get(), baseline + cycle as u32 + 1);
        }
    }

    #[test]
    fn hold_of_changes_mirrors_the_source(values in writes()) {
        let rt = Runtime::new();
        let (b, set_b) = rt.make_cell(0i64);
        let mirrored = b.changes().hold(b.get());
        for value in values {
            set_b.set(value);
            prop_assert_eq!(mirrored.get(), b.get());
        }
    }

    #[test]
    fn merge_delivers_in_global_send_order(
        values in writes(),
        lanes in proptest::collection::vec(proptest::bool::ANY, 1..30),
    ) {
        let rt = Runtime::new();
        let (e1, s1) = rt.make_event::<i64>();
        let (e2, s2) = rt.make_event::<i64>();
        let merged = freshet_core::Event::merge(&[e1, e2]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = Rc::clone(&seen);
            merged.notify(move |v| seen.borrow_mut().push(*v));
        }
        let mut expected = Vec::new();
        for (value, lane) in values.iter().zip(lanes.iter().cycle()) {
            if *lane {
                s1.send(*value);
            } else {
                s2.send(*value);
            }
            expected.push(*value);
        }
        prop_assert_eq!(&*seen.borrow(), &expected);
    }

    #[test]
    fn lift_n_matches_the_function_of_current_inputs(
        initial in proptest::collection::vec(-50i64..50, 1..6),
        updates in proptest::collection::vec((0usize..6, -50i64..50), 0..20),
    ) {
        let rt = Runtime::new();
        let cells: Vec<_> = initial.iter().map(|v| rt.make_cell(*v)).collect();
        let behaviors: Vec<_> = cells.iter().map(|(b, _)| b.clone()).collect();
        let total = Behavior::lift_n(&behaviors, |values| values.iter().sum::<i64>());
        let mut model = initial.clone();
        prop_assert_eq!(total.get(), model.iter().sum::<i64>());
        for (index, value) in updates {
            let index = index % model.len();
            cells[index].1.set(value);
            model[index] = value;
            prop_assert_eq!(total.get(), model.iter().sum::<i64>());
        }
    }
}
