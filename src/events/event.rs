//! # Lifecycle events emitted by the dispatcher.
//!
//! [`EventKind`] falls into four groups:
//! - **Channel events**: host bindings and subscriber-list swaps
//! - **Pipeline events**: consumption task lifecycle and log-subscription health
//! - **Delivery events**: per-subscription outcome of one fanout
//! - **Shutdown events**: grace handling on `start` cancellation
//!
//! [`Event`] carries the optional metadata relevant to its kind.
//!
//! ## Ordering
//! Each event gets a process-wide, monotonically increasing `seq`. Use it to
//! restore order when events from different pipelines interleave.
//!
//! ## Example
//! ```rust
//! use channel_dispatcher::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::DeadLettered)
//!     .with_channel("default/channela")
//!     .with_subscription("cccc")
//!     .with_status(500);
//!
//! assert_eq!(ev.kind, EventKind::DeadLettered);
//! assert_eq!(ev.subscription.as_deref(), Some("cccc"));
//! assert_eq!(ev.status, Some(500));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Observer events ===
    /// An observer panicked while handling an event.
    ///
    /// Sets: `channel` = observer name, `reason` = panic info.
    ObserverPanicked,

    /// An observer's queue was full or closed; the event was dropped for it.
    ///
    /// Sets: `channel` = observer name, `reason`.
    ObserverOverflow,

    // === Channel events ===
    /// A host name was bound (or re-bound) to a channel.
    ///
    /// Sets: `channel`, `host`.
    ChannelRegistered,

    /// A host name binding was removed.
    ///
    /// Sets: `channel`, `host`.
    ChannelUnbound,

    /// A running pipeline received a new subscriber list.
    ///
    /// Sets: `channel`, `count` = subscriptions in the new list.
    SubscribersSwapped,

    // === Pipeline events ===
    /// A pipeline established its log subscription and is consuming.
    ///
    /// Sets: `channel`, `topic`.
    PipelineStarted,

    /// A pipeline stopped after cancellation.
    ///
    /// Sets: `channel`.
    PipelineStopped,

    /// A pipeline did not stop within its timeout and was aborted.
    ///
    /// Sets: `channel`, `timeout_ms`.
    PipelineForceStopped,

    /// A pipeline exhausted its subscription retries.
    ///
    /// Sets: `channel`, `attempt`, `reason`.
    PipelineUnhealthy,

    /// Subscribing to the log failed or the subscription was lost.
    ///
    /// Sets: `channel`, `topic`, `attempt`, `reason`.
    ConsumerGroupFailed,

    /// Next subscription attempt scheduled.
    ///
    /// Sets: `channel`, `attempt`, `delay_ms`, `reason`.
    BackoffScheduled,

    /// Committing a consumed position failed.
    ///
    /// Sets: `channel`, `event_id`, `reason`.
    CommitFailed,

    // === Delivery events ===
    /// Subscriber accepted the message; nothing to reply.
    ///
    /// Sets: `channel`, `subscription`, `event_id`, `status`.
    Delivered,

    /// Subscriber accepted the message and its response reached the reply target.
    ///
    /// Sets: `channel`, `subscription`, `event_id`, `status`.
    Replied,

    /// Subscriber failed and the original message reached the dead-letter target.
    ///
    /// Sets: `channel`, `subscription`, `event_id`, `status` (subscriber's, if any), `reason`.
    DeadLettered,

    /// Subscriber failed and no dead-letter target is configured.
    ///
    /// Sets: `channel`, `subscription`, `event_id`, `status` (if any), `reason`.
    DeliveryFailed,

    /// Subscriber succeeded but forwarding its response to the reply target failed.
    ///
    /// Sets: `channel`, `subscription`, `event_id`, `reason`.
    ReplyFailed,

    /// Subscriber failed and forwarding to the dead-letter target failed too.
    ///
    /// Sets: `channel`, `subscription`, `event_id`, `reason`.
    DeadLetterFailed,

    // === Shutdown events ===
    /// `start`'s token was cancelled.
    ShutdownRequested,

    /// All pipelines stopped within the grace period.
    AllStoppedWithinGrace,

    /// Grace period exceeded; remaining pipelines were aborted.
    ///
    /// Sets: `reason` = stuck channels.
    GraceExceeded,
}

impl EventKind {
    /// True for per-subscription delivery outcomes.
    pub fn is_delivery_outcome(&self) -> bool {
        matches!(
            self,
            EventKind::Delivered
                | EventKind::Replied
                | EventKind::DeadLettered
                | EventKind::DeliveryFailed
                | EventKind::ReplyFailed
                | EventKind::DeadLetterFailed
        )
    }
}

/// Lifecycle event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Process-wide, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    pub kind: EventKind,

    /// Channel identity (`namespace/name`), or observer name for observer events.
    pub channel: Option<Arc<str>>,
    pub host: Option<Arc<str>>,
    pub topic: Option<Arc<str>>,
    /// Subscription uid.
    pub subscription: Option<Arc<str>>,
    /// `id` attribute of the message involved.
    pub event_id: Option<Arc<str>>,
    /// HTTP status returned by a target.
    pub status: Option<u16>,
    /// Retry counter (1-based).
    pub attempt: Option<u32>,
    /// Backoff delay in milliseconds.
    pub delay_ms: Option<u32>,
    /// Timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Generic counter (e.g. subscriptions in a swapped list).
    pub count: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event with the current timestamp and the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            channel: None,
            host: None,
            topic: None,
            subscription: None,
            event_id: None,
            status: None,
            attempt: None,
            delay_ms: None,
            timeout_ms: None,
            count: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_channel(mut self, channel: impl Into<Arc<str>>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[inline]
    pub fn with_host(mut self, host: impl Into<Arc<str>>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[inline]
    pub fn with_topic(mut self, topic: impl Into<Arc<str>>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    #[inline]
    pub fn with_subscription(mut self, uid: impl Into<Arc<str>>) -> Self {
        self.subscription = Some(uid.into());
        self
    }

    /// Attaches a message id; a no-op for `None`.
    #[inline]
    pub fn with_event_id(mut self, id: Option<&str>) -> Self {
        self.event_id = id.map(Arc::from);
        self
    }

    #[inline]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(millis_u32(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(millis_u32(d));
        self
    }

    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(n.min(u32::MAX as usize) as u32);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Observer overflow event.
    pub fn observer_overflow(observer: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::ObserverOverflow)
            .with_channel(observer)
            .with_reason(reason)
    }

    /// Observer panic event.
    pub fn observer_panicked(observer: &'static str, info: String) -> Self {
        Event::new(EventKind::ObserverPanicked)
            .with_channel(observer)
            .with_reason(info)
    }
}

fn millis_u32(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
