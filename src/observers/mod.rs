//! # Observers of dispatcher lifecycle events.
//!
//! Every [`Event`](crate::Event) published on the bus is handed to each
//! registered observer through its own queue and worker.
//!
//! ```text
//! Bus ──► observer listener ──► ObserverSet::emit(&Event)
//!                                  ├──► [queue O1] ─► worker ─► O1.on_event()
//!                                  ├──► [queue O2] ─► worker ─► O2.on_event()
//!                                  └──► [queue ON] ─► worker ─► ON.on_event()
//! ```
//!
//! Built in (feature `logging`): `LogWriter` renders events through `tracing`.

#[cfg(feature = "logging")]
mod log;
mod observer;
mod set;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use observer::Observe;
pub use set::ObserverSet;
