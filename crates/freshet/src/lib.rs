#![forbid(unsafe_code)]

//! Freshet public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use freshet_core::{
    hash_behavior, hash_event, BResult, Behavior, CellSetter, Event, EventSender, Failure, Memo,
    Runtime, Subscription, TimeError, TimeId, Timeline,
};

pub mod prelude {
    pub use freshet_core as core;
    pub use freshet_core::{
        BResult, Behavior, CellSetter, Event, EventSender, Failure, Runtime, Subscription,
    };
}
