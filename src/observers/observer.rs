//! # Observer trait.
//!
//! [`Observe`] is the extension point for metrics export, alerting or audit
//! trails on top of dispatcher events.
//!
//! Each observer gets:
//! - a **dedicated worker task**,
//! - a **bounded queue** (capacity via [`Observe::queue_capacity`]),
//! - **panic isolation** (panics are caught and reported as `ObserverPanicked`).
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use channel_dispatcher::{Event, EventKind, Observe};
//!
//! struct DeadLetterCounter;
//!
//! #[async_trait]
//! impl Observe for DeadLetterCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::DeadLettered) {
//!             // increment a counter
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "dead-letter-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Handler for dispatcher lifecycle events.
///
/// Handle errors internally and avoid blocking the executor; a slow observer
/// only fills its own queue.
#[async_trait]
pub trait Observe: Send + Sync + 'static {
    /// Handles one event. Events arrive in FIFO order per observer.
    async fn on_event(&self, event: &Event);

    /// Name used in logs and overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity for this observer (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
