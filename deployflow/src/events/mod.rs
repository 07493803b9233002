//! Event sinks for run observability.
//!
//! The pipeline and verifier report progress as typed [`RunEvent`] values to
//! an [`EventSink`] carried in the run context. There is no global sink.

mod sink;

pub use crate::core::RunEvent;
pub use sink::{
    CollectingEventSink, EventSink, FanOutEventSink, LoggingEventSink, NoOpEventSink,
};
