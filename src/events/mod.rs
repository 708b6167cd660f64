//! Lifecycle events: types and broadcast bus.
//!
//! The dispatcher, the pipeline manager, each consumption pipeline and the
//! fanout engine publish [`Event`]s describing what happened to channels,
//! pipelines and individual deliveries. Observers (see `observers`) consume them.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Dispatcher`, `PipelineManager`, `ConsumptionPipeline`,
//!   `FanoutEngine`, `ObserverSet` workers (overflow/panic).
//! - **Consumers**: the dispatcher's observer listener, which forwards to `ObserverSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
