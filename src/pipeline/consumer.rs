//! # ConsumptionPipeline: one channel's consume → fanout → commit loop.
//!
//! ## Architecture
//! ```text
//! loop {
//!   ├─► log.subscribe(topic, group)  (cancellable)
//!   │     ├─ ok  ─► publish PipelineStarted
//!   │     │         loop {
//!   │     │           ├─► consumer.next()           (cancellable)
//!   │     │           ├─► snapshot = subscribers.load_full()
//!   │     │           ├─► fanout.dispatch(snapshot)  (runs to completion)
//!   │     │           └─► consumer.commit(record), failures = 0
//!   │     │         }
//!   │     └─ err ─► publish ConsumerGroupFailed
//!   ├─► failures == retry limit ─► publish PipelineUnhealthy, exit
//!   └─► publish BackoffScheduled, sleep (cancellable)
//! }
//! ```
//!
//! ## Rules
//! - Cancellation is observed between records and during backoff, never in
//!   the middle of a fanout.
//! - A record is committed only after every subscription of its snapshot
//!   reached a terminal outcome.
//! - A swap of the subscriber list is visible from the next record on.
//! - A lost subscription (read or commit error) is retried like a failed
//!   subscribe; uncommitted records are redelivered after resubscribing.
//! - The failure counter resets only when a record is committed; a
//!   subscription that opens and then fails to read counts as a failure.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ConsumerGroupError, LogError};
use crate::events::{Bus, Event, EventKind};
use crate::fanout::FanoutEngine;
use crate::log::{EventLog, LogConsumer};
use crate::model::{ChannelRef, Subscription};
use crate::policies::BackoffPolicy;

/// Health of a pipeline's log subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineHealth {
    /// First subscription attempt in progress.
    Starting,
    /// Subscribed and consuming.
    Consuming,
    /// Subscription failed or was lost; waiting for the next attempt.
    Retrying,
    /// Retries exhausted; the pipeline no longer consumes.
    Unhealthy,
    /// The pipeline task has finished.
    Stopped,
}

impl fmt::Display for PipelineHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineHealth::Starting => "starting",
            PipelineHealth::Consuming => "consuming",
            PipelineHealth::Retrying => "retrying",
            PipelineHealth::Unhealthy => "unhealthy",
            PipelineHealth::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// State shared between a running pipeline and its manager.
pub(crate) struct PipelineShared {
    /// Active subscriber list; replaced as a whole, never mutated.
    pub(crate) subscribers: ArcSwap<Vec<Subscription>>,
    pub(crate) health: Mutex<PipelineHealth>,
}

impl PipelineShared {
    pub(crate) fn new(subscribers: Vec<Subscription>) -> Arc<Self> {
        Arc::new(Self {
            subscribers: ArcSwap::from_pointee(subscribers),
            health: Mutex::new(PipelineHealth::Starting),
        })
    }

    pub(crate) fn health(&self) -> PipelineHealth {
        *self.health.lock()
    }

    fn set_health(&self, health: PipelineHealth) {
        *self.health.lock() = health;
    }
}

/// Why a pipeline task returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    Cancelled,
    RetriesExhausted,
}

/// Retry settings of a pipeline.
#[derive(Clone, Debug)]
pub struct PipelineParams {
    pub backoff: BackoffPolicy,
    /// Consecutive failures tolerated (`None` = retry forever).
    pub retry_limit: Option<u32>,
}

/// Consumption task of one channel.
pub struct ConsumptionPipeline {
    channel: Arc<str>,
    topic: String,
    group: String,
    log: Arc<dyn EventLog>,
    fanout: FanoutEngine,
    shared: Arc<PipelineShared>,
    params: PipelineParams,
    bus: Bus,
}

impl ConsumptionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: &ChannelRef,
        topic: String,
        group: String,
        log: Arc<dyn EventLog>,
        fanout: FanoutEngine,
        shared: Arc<PipelineShared>,
        params: PipelineParams,
        bus: Bus,
    ) -> Self {
        Self {
            channel: Arc::from(channel.to_string()),
            topic,
            group,
            log,
            fanout,
            shared,
            params,
            bus,
        }
    }

    /// Runs until `token` is cancelled or retries are exhausted.
    pub async fn run(self, token: CancellationToken) -> PipelineExit {
        let mut failures: u32 = 0;

        let exit = loop {
            if token.is_cancelled() {
                break PipelineExit::Cancelled;
            }

            let subscribed = select! {
                _ = token.cancelled() => break PipelineExit::Cancelled,
                res = self.log.subscribe(&self.topic, &self.group) => res,
            };

            let err = match subscribed {
                Ok(mut consumer) => {
                    self.shared.set_health(PipelineHealth::Consuming);
                    self.bus.publish(
                        Event::new(EventKind::PipelineStarted)
                            .with_channel(Arc::clone(&self.channel))
                            .with_topic(self.topic.as_str()),
                    );
                    let res = self.consume(consumer.as_mut(), &token, &mut failures).await;
                    consumer.close().await;
                    match res {
                        Ok(()) => break PipelineExit::Cancelled,
                        Err(e) => e,
                    }
                }
                Err(source) => self.group_error(source),
            };

            failures = failures.saturating_add(1);
            self.shared.set_health(PipelineHealth::Retrying);
            self.bus.publish(
                Event::new(EventKind::ConsumerGroupFailed)
                    .with_channel(Arc::clone(&self.channel))
                    .with_topic(self.topic.as_str())
                    .with_attempt(failures)
                    .with_reason(err.to_string()),
            );

            if self.params.retry_limit.is_some_and(|limit| failures >= limit) {
                self.shared.set_health(PipelineHealth::Unhealthy);
                self.bus.publish(
                    Event::new(EventKind::PipelineUnhealthy)
                        .with_channel(Arc::clone(&self.channel))
                        .with_attempt(failures)
                        .with_reason(err.to_string()),
                );
                return PipelineExit::RetriesExhausted;
            }

            let delay = self.params.backoff.delay(failures - 1);
            self.bus.publish(
                Event::new(EventKind::BackoffScheduled)
                    .with_channel(Arc::clone(&self.channel))
                    .with_attempt(failures)
                    .with_delay(delay)
                    .with_reason(err.to_string()),
            );

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = token.cancelled() => break PipelineExit::Cancelled,
            }
        };

        self.shared.set_health(PipelineHealth::Stopped);
        self.bus
            .publish(Event::new(EventKind::PipelineStopped).with_channel(Arc::clone(&self.channel)));
        exit
    }

    /// Consumes until cancelled (`Ok`) or the subscription fails (`Err`).
    ///
    /// Every committed record clears `failures`.
    async fn consume(
        &self,
        consumer: &mut dyn LogConsumer,
        token: &CancellationToken,
        failures: &mut u32,
    ) -> Result<(), ConsumerGroupError> {
        loop {
            let record = select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                next = consumer.next() => next.map_err(|e| self.group_error(e))?,
            };

            let snapshot = self.shared.subscribers.load_full();
            let report = self
                .fanout
                .dispatch(&self.channel, &record.message, &snapshot)
                .await;
            debug!(
                channel = %self.channel,
                offset = record.offset,
                subscriptions = report.len(),
                "fanout finished"
            );

            if let Err(e) = consumer.commit(&record).await {
                self.bus.publish(
                    Event::new(EventKind::CommitFailed)
                        .with_channel(Arc::clone(&self.channel))
                        .with_event_id(record.message.id())
                        .with_reason(e.to_string()),
                );
                return Err(self.group_error(e));
            }
            *failures = 0;
        }
    }

    fn group_error(&self, source: LogError) -> ConsumerGroupError {
        ConsumerGroupError {
            topic: self.topic.clone(),
            group: self.group.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::MessageSender;
    use crate::log::{InMemoryLog, consumer_group_id, default_topic_name};
    use crate::model::Message;
    use axum::Router;
    use axum::routing::post;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::broadcast;
    use url::Url;

    struct Harness {
        pipeline: ConsumptionPipeline,
        shared: Arc<PipelineShared>,
        rx: broadcast::Receiver<Event>,
        topic: String,
        group: String,
    }

    fn harness(log: &InMemoryLog, subscribers: Vec<Subscription>, retry_limit: Option<u32>) -> Harness {
        let bus = Bus::new(256);
        let rx = bus.subscribe();
        let channel = ChannelRef::new("default", "a");
        let topic = default_topic_name(&channel);
        let group = consumer_group_id(&channel);
        let shared = PipelineShared::new(subscribers);
        let fanout = FanoutEngine::new(
            MessageSender::new(Some(Duration::from_secs(2))),
            None,
            bus.clone(),
        );
        let pipeline = ConsumptionPipeline::new(
            &channel,
            topic.clone(),
            group.clone(),
            Arc::new(log.clone()),
            fanout,
            Arc::clone(&shared),
            PipelineParams {
                backoff: BackoffPolicy::constant(Duration::from_millis(10)),
                retry_limit,
            },
            bus,
        );
        Harness {
            pipeline,
            shared,
            rx,
            topic,
            group,
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .unwrap()
    }

    async fn counting_subscriber() -> (Url, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { axum::http::StatusCode::OK }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (Url::parse(&format!("http://{addr}/")).unwrap(), hits)
    }

    async fn wait_committed(log: &InMemoryLog, topic: &str, group: &str, next: i64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while log.committed(topic, group) != Some(next) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("commit in time");
    }

    #[tokio::test]
    async fn failing_reads_exhaust_retries_although_subscribe_succeeds() {
        let log = InMemoryLog::new();
        log.fail_reads(u32::MAX);
        let mut h = harness(&log, Vec::new(), Some(3));

        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            h.pipeline.run(CancellationToken::new()),
        )
        .await
        .expect("pipeline gives up");
        assert_eq!(exit, PipelineExit::RetriesExhausted);
        assert_eq!(h.shared.health(), PipelineHealth::Unhealthy);
        assert_eq!(log.active_consumers(&h.topic, &h.group), 0);

        let mut started = 0;
        let mut attempts = Vec::new();
        loop {
            let ev = next_event(&mut h.rx).await;
            match ev.kind {
                EventKind::PipelineStarted => started += 1,
                EventKind::ConsumerGroupFailed => attempts.extend(ev.attempt),
                EventKind::PipelineUnhealthy => {
                    assert_eq!(ev.attempt, Some(3));
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(started, 3);
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn committed_records_reset_the_failure_count() {
        let log = InMemoryLog::new();
        // delivering record "1" breaks the read that follows its commit
        let faults = log.clone();
        let app = Router::new().route(
            "/",
            post(move |headers: axum::http::HeaderMap| {
                if headers.get("ce-id").is_some_and(|id| id == "1") {
                    faults.fail_reads(1);
                }
                async { axum::http::StatusCode::OK }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut h = harness(&log, vec![Subscription::new("s1", target)], Some(2));
        for id in ["1", "2"] {
            log.produce(&h.topic, &Message::new(id).with_attribute("id", id))
                .await
                .unwrap();
        }
        log.fail_reads(1);

        let token = CancellationToken::new();
        let (topic, group, shared) = (h.topic.clone(), h.group.clone(), Arc::clone(&h.shared));
        let join = tokio::spawn(h.pipeline.run(token.clone()));
        wait_committed(&log, &topic, &group, 2).await;

        let mut attempts = Vec::new();
        while let Ok(ev) = h.rx.try_recv() {
            assert_ne!(ev.kind, EventKind::PipelineUnhealthy);
            if ev.kind == EventKind::ConsumerGroupFailed {
                attempts.extend(ev.attempt);
            }
        }
        assert_eq!(attempts, vec![1, 1]);
        assert_eq!(shared.health(), PipelineHealth::Consuming);

        token.cancel();
        assert_eq!(join.await.unwrap(), PipelineExit::Cancelled);
        assert_eq!(shared.health(), PipelineHealth::Stopped);
    }

    #[tokio::test]
    async fn failed_commit_redelivers_the_record() {
        let log = InMemoryLog::new();
        let (target, hits) = counting_subscriber().await;
        let mut h = harness(&log, vec![Subscription::new("s1", target)], None);
        log.produce(&h.topic, &Message::new("x").with_attribute("id", "1"))
            .await
            .unwrap();
        log.fail_commits(1);

        let token = CancellationToken::new();
        let (topic, group) = (h.topic.clone(), h.group.clone());
        let join = tokio::spawn(h.pipeline.run(token.clone()));

        wait_committed(&log, &topic, &group, 1).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        loop {
            let ev = next_event(&mut h.rx).await;
            if ev.kind == EventKind::CommitFailed {
                assert_eq!(ev.event_id.as_deref(), Some("1"));
                break;
            }
        }

        token.cancel();
        assert_eq!(join.await.unwrap(), PipelineExit::Cancelled);
        assert_eq!(log.active_consumers(&topic, &group), 0);
    }
}
