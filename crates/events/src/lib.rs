//! In-process typed publish/subscribe.
//!
//! Handlers are isolated from each other: a failing or panicking handler is
//! reported to the hub's error sink and never prevents delivery to the rest.

pub mod hub;

pub use hub::{
    ErrorSink, Event, EventHandler, EventHub, FailureCause, HandlerError, HandlerFailure, Reply,
    SubscriptionId,
};
