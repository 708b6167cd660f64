//! # LogWriter: renders lifecycle events through `tracing`.
//!
//! Delivery successes and routine lifecycle transitions go out at `debug`/`info`,
//! failures at `warn`, lost channels and exceeded grace at `error`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  channel registered channel=default/channela host=channela.svc
//! INFO  pipeline started channel=default/channela topic=knative-messaging-kafka.default.channela
//! WARN  dead-lettered channel=default/channela subscription=cccc status=500
//! WARN  backoff scheduled channel=default/channelb attempt=2 delay_ms=400 reason="log unreachable: ..."
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::observers::Observe;

/// Event-to-log observer.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Observe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let channel = e.channel.as_deref().unwrap_or("-");
        let sub = e.subscription.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ChannelRegistered => {
                info!(channel, host = ?e.host, "channel registered");
            }
            EventKind::ChannelUnbound => {
                info!(channel, host = ?e.host, "channel unbound");
            }
            EventKind::SubscribersSwapped => {
                info!(channel, subscriptions = ?e.count, "subscribers swapped");
            }
            EventKind::PipelineStarted => {
                info!(channel, topic = ?e.topic, "pipeline started");
            }
            EventKind::PipelineStopped => {
                info!(channel, "pipeline stopped");
            }
            EventKind::PipelineForceStopped => {
                warn!(channel, timeout_ms = ?e.timeout_ms, "pipeline force-stopped");
            }
            EventKind::PipelineUnhealthy => {
                error!(channel, attempts = ?e.attempt, reason, "pipeline unhealthy");
            }
            EventKind::ConsumerGroupFailed => {
                warn!(channel, topic = ?e.topic, attempt = ?e.attempt, reason, "consumer group failed");
            }
            EventKind::BackoffScheduled => {
                warn!(channel, attempt = ?e.attempt, delay_ms = ?e.delay_ms, reason, "backoff scheduled");
            }
            EventKind::CommitFailed => {
                warn!(channel, event_id = ?e.event_id, reason, "commit failed");
            }
            EventKind::Delivered => {
                debug!(channel, subscription = sub, event_id = ?e.event_id, status = ?e.status, "delivered");
            }
            EventKind::Replied => {
                debug!(channel, subscription = sub, event_id = ?e.event_id, "replied");
            }
            EventKind::DeadLettered => {
                warn!(channel, subscription = sub, event_id = ?e.event_id, status = ?e.status, reason, "dead-lettered");
            }
            EventKind::DeliveryFailed => {
                warn!(channel, subscription = sub, event_id = ?e.event_id, status = ?e.status, reason, "delivery failed");
            }
            EventKind::ReplyFailed => {
                warn!(channel, subscription = sub, event_id = ?e.event_id, reason, "reply failed");
            }
            EventKind::DeadLetterFailed => {
                error!(channel, subscription = sub, event_id = ?e.event_id, reason, "dead-letter failed");
            }
            EventKind::ShutdownRequested => {
                info!("shutdown requested");
            }
            EventKind::AllStoppedWithinGrace => {
                info!("all pipelines stopped within grace");
            }
            EventKind::GraceExceeded => {
                error!(stuck = reason, "grace exceeded");
            }
            EventKind::ObserverOverflow => {
                warn!(observer = channel, reason, "observer overflow");
            }
            EventKind::ObserverPanicked => {
                error!(observer = channel, reason, "observer panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
