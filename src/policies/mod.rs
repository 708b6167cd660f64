//! Retry policies for re-establishing a pipeline's log subscription.
//!
//! ## Contents
//! - [`BackoffPolicy`] how delays between subscription attempts grow (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so pipelines of many channels do not reconnect in lockstep
//!
//! ## Wiring
//! ```text
//! DispatcherConfig { consumer_backoff, max_consumer_retries }
//!      └─► pipeline::consumer::ConsumptionPipeline:
//!           - subscribe() fails or the consumer is lost
//!           - delay = consumer_backoff.delay(retry)
//!           - publish BackoffScheduled, sleep (cancellable), try again
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=200ms, factor=2.0, max=30s, jitter=Equal.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
