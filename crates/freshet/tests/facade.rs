//! The facade re-exports are usable without reaching into the core crate.

use freshet::prelude::*;

#[test]
fn facade_surface_round_trip() {
    let rt = Runtime::new();
    let (cell, set) = rt.make_cell(1i32);
    let doubled = cell.map(|v| v * 2);
    set.set(21);
    assert_eq!(doubled.get(), 42);

    let (events, sender) = rt.make_event::<i32>();
    let held = events.hold(0);
    sender.send(9);
    assert_eq!(held.get(), 9);
    assert!(rt.is_quiescent());
}

#[test]
fn failures_are_first_class_values() {
    let rt = Runtime::new();
    let broken: Behavior<i32> = rt.fail(Failure::new("unavailable"));
    let r: BResult<i32> = broken.try_get();
    assert_eq!(r.unwrap_err().message(), "unavailable");
}
