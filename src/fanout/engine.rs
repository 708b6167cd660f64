//! # FanoutEngine: deliver one consumed message to every subscription.
//!
//! Each subscription resolves independently to one terminal [`Outcome`]:
//!
//! ```text
//!                    ┌─ 2xx ─┬─ reply set & body ─► POST reply ─┬─ ok ──► Replied
//!                    │       │                                  └─ err ─► ReplyFailed
//! POST subscriber ───┤       └─ otherwise ─────────────────────────────► Delivered
//!                    │
//!                    └─ err ─┬─ dead-letter set ─► POST original ─┬─ ok ─► DeadLettered
//!                            │                                    └─ err ► DeadLetterFailed
//!                            └─ otherwise ───────────────────────────────► Failed
//! ```
//!
//! ## Rules
//! - One attempt per target; no retries.
//! - The reply target receives the subscriber's response, the dead-letter
//!   target the original message.
//! - A failed reply never leads to dead-lettering.
//! - `dispatch` returns only once every subscription reached its outcome.
//! - A panic while delivering to one subscription is contained to it.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::error::DeliveryError;
use crate::events::{Bus, Event, EventKind};
use crate::model::{Message, Subscription};

use super::MessageSender;

/// Terminal result for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered { status: u16 },
    Replied { status: u16 },
    DeadLettered { error: DeliveryError },
    Failed { error: DeliveryError },
    ReplyFailed { status: u16, error: DeliveryError },
    DeadLetterFailed {
        error: DeliveryError,
        dead_letter_error: DeliveryError,
    },
}

impl Outcome {
    /// True when the subscriber itself accepted the message.
    pub fn subscriber_succeeded(&self) -> bool {
        matches!(
            self,
            Outcome::Delivered { .. } | Outcome::Replied { .. } | Outcome::ReplyFailed { .. }
        )
    }

    fn event_kind(&self) -> EventKind {
        match self {
            Outcome::Delivered { .. } => EventKind::Delivered,
            Outcome::Replied { .. } => EventKind::Replied,
            Outcome::DeadLettered { .. } => EventKind::DeadLettered,
            Outcome::Failed { .. } => EventKind::DeliveryFailed,
            Outcome::ReplyFailed { .. } => EventKind::ReplyFailed,
            Outcome::DeadLetterFailed { .. } => EventKind::DeadLetterFailed,
        }
    }

    fn to_event(&self) -> Event {
        let ev = Event::new(self.event_kind());
        match self {
            Outcome::Delivered { status } | Outcome::Replied { status } => ev.with_status(*status),
            Outcome::ReplyFailed { status, error } => {
                ev.with_status(*status).with_reason(error.to_string())
            }
            Outcome::DeadLettered { error } | Outcome::Failed { error } => {
                with_failure(ev, error).with_reason(error.to_string())
            }
            Outcome::DeadLetterFailed {
                error,
                dead_letter_error,
            } => with_failure(ev, error).with_reason(format!(
                "subscriber: {error}; dead-letter: {dead_letter_error}"
            )),
        }
    }
}

fn with_failure(ev: Event, error: &DeliveryError) -> Event {
    match error {
        DeliveryError::Status { status } => ev.with_status(*status),
        _ => ev,
    }
}

/// Outcome of one subscription within a fanout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOutcome {
    pub uid: String,
    pub outcome: Outcome,
}

/// Outcomes of one fanout, in subscription order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub outcomes: Vec<SubscriptionOutcome>,
}

impl FanoutReport {
    pub fn outcome(&self, uid: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.uid == uid)
            .map(|o| &o.outcome)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Delivers messages to subscription snapshots.
#[derive(Clone)]
pub struct FanoutEngine {
    sender: MessageSender,
    limit: Option<usize>,
    bus: Bus,
}

impl FanoutEngine {
    /// `limit` bounds concurrent deliveries per message (`None` = all at once).
    pub fn new(sender: MessageSender, limit: Option<usize>, bus: Bus) -> Self {
        Self { sender, limit, bus }
    }

    /// Fans `message` out to `subscriptions` and waits for every outcome.
    ///
    /// `channel` only labels the published events.
    pub async fn dispatch(
        &self,
        channel: &str,
        message: &Message,
        subscriptions: &[Subscription],
    ) -> FanoutReport {
        let permits = self.limit.map(|n| Arc::new(Semaphore::new(n.max(1))));

        let deliveries = subscriptions.iter().map(|sub| {
            let permits = permits.clone();
            async move {
                let _permit = match &permits {
                    Some(sem) => sem.acquire().await.ok(),
                    None => None,
                };
                let outcome = std::panic::AssertUnwindSafe(self.deliver(message, sub))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Outcome::Failed {
                        error: DeliveryError::Transport {
                            reason: "delivery panicked".into(),
                        },
                    });
                self.bus.publish(
                    outcome
                        .to_event()
                        .with_channel(channel)
                        .with_subscription(sub.uid.as_str())
                        .with_event_id(message.id()),
                );
                SubscriptionOutcome {
                    uid: sub.uid.clone(),
                    outcome,
                }
            }
        });

        FanoutReport {
            outcomes: join_all(deliveries).await,
        }
    }

    async fn deliver(&self, message: &Message, sub: &Subscription) -> Outcome {
        match self.sender.send(&sub.subscriber, message).await {
            Ok(response) => {
                let status = response.status;
                match (&sub.reply, response.message) {
                    (Some(reply), Some(reply_message)) => {
                        match self.sender.send(reply, &reply_message).await {
                            Ok(_) => Outcome::Replied { status },
                            Err(error) => Outcome::ReplyFailed { status, error },
                        }
                    }
                    _ => Outcome::Delivered { status },
                }
            }
            Err(error) => match &sub.dead_letter {
                Some(dead_letter) => match self.sender.send(dead_letter, message).await {
                    Ok(_) => Outcome::DeadLettered { error },
                    Err(dead_letter_error) => Outcome::DeadLetterFailed {
                        error,
                        dead_letter_error,
                    },
                },
                None => Outcome::Failed { error },
            },
        }
    }
}
