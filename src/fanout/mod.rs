//! Fanout of consumed messages to subscriptions.
//!
//! - [`MessageSender`] performs one HTTP hop.
//! - [`FanoutEngine`] resolves every subscription of a snapshot to an [`Outcome`].

mod engine;
mod sender;

pub use engine::{FanoutEngine, FanoutReport, Outcome, SubscriptionOutcome};
pub use sender::{DeliveryResponse, MessageSender};
