//! Observability utilities.

mod subscriber;
mod wide_events;

pub use subscriber::{env_filter, init_tracing, LogFormat, DEFAULT_FILTER};
pub use wide_events::WideEventSink;
