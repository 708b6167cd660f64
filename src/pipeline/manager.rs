//! # PipelineManager: registry of per-channel consumption pipelines.
//!
//! ## Architecture
//! ```text
//! reconcile(config)
//!   ├─ terminating ─────────────► wait for the old task, then re-check
//!   ├─ no pipeline / finished ──► spawn ConsumptionPipeline on child token → Started
//!   ├─ same subscriber list ────► no-op                                   → Unchanged
//!   └─ different list ──────────► subscribers.store(new snapshot)         → Swapped
//!
//! cleanup(channel)
//!   ├─ absent ──► Absent
//!   └─ take handle → cancel → wait ≤ cleanup_timeout
//!                                ├─ joined  → Stopped
//!                                └─ timeout → abort (drops the consumer) → ForceStopped
//!
//! shutdown(grace): cancel all → wait ≤ grace → abort the rest, report them stuck
//! ```
//!
//! ## Rules
//! - At most one pipeline per channel identity.
//! - The manager owns the handles (JoinHandle + CancellationToken).
//! - Subscriber lists are swapped as a whole; a running fanout keeps its snapshot.
//! - An empty subscriber list keeps the pipeline alive.
//! - The registry lock is never held while waiting on a pipeline.
//! - A channel being stopped stays Terminating until its task has exited;
//!   `reconcile` for it waits instead of starting a second pipeline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ConfigValidationError;
use crate::events::{Bus, Event, EventKind};
use crate::fanout::FanoutEngine;
use crate::log::{EventLog, TopicNamer, consumer_group_id};
use crate::model::{ChannelConfig, ChannelRef};

use super::consumer::{ConsumptionPipeline, PipelineExit, PipelineHealth, PipelineParams, PipelineShared};

/// Lifecycle phase of a registered channel.
///
/// A subscriber swap is a single atomic store, so it has no observable phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// Host bound, no pipeline.
    Registered,
    /// Pipeline running.
    Active,
    /// Cleanup in progress.
    Terminating,
}

impl fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelPhase::Registered => "registered",
            ChannelPhase::Active => "active",
            ChannelPhase::Terminating => "terminating",
        };
        f.write_str(s)
    }
}

/// What `reconcile` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Started,
    Swapped,
    Unchanged,
}

/// How `cleanup` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    Absent,
    Stopped,
    /// The pipeline missed its timeout and was aborted.
    ForceStopped,
}

/// Point-in-time view of one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStatus {
    pub topic: String,
    pub health: PipelineHealth,
    /// Uids in the active subscriber snapshot, in order.
    pub subscriptions: Vec<String>,
}

/// Handle to a running pipeline.
struct Handle {
    topic: String,
    shared: Arc<PipelineShared>,
    join: JoinHandle<PipelineExit>,
    cancel: CancellationToken,
}

/// Clears a terminating mark and wakes reconciles waiting on it.
struct TerminatingGuard<'a> {
    terminating: &'a parking_lot::Mutex<HashMap<ChannelRef, CancellationToken>>,
    channel: ChannelRef,
    done: CancellationToken,
}

impl Drop for TerminatingGuard<'_> {
    fn drop(&mut self) {
        self.terminating.lock().remove(&self.channel);
        self.done.cancel();
    }
}

/// Registry of consumption pipelines keyed by channel identity.
pub struct PipelineManager {
    pipelines: RwLock<HashMap<ChannelRef, Handle>>,
    /// Channels whose task is being stopped; cancelled once it has exited.
    terminating: parking_lot::Mutex<HashMap<ChannelRef, CancellationToken>>,
    log: Arc<dyn EventLog>,
    fanout: FanoutEngine,
    topic_namer: TopicNamer,
    params: PipelineParams,
    cleanup_timeout: Duration,
    bus: Bus,
    runtime_token: CancellationToken,
}

impl PipelineManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Arc<dyn EventLog>,
        fanout: FanoutEngine,
        topic_namer: TopicNamer,
        params: PipelineParams,
        cleanup_timeout: Duration,
        bus: Bus,
        runtime_token: CancellationToken,
    ) -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            terminating: parking_lot::Mutex::new(HashMap::new()),
            log,
            fanout,
            topic_namer,
            params,
            cleanup_timeout,
            bus,
            runtime_token,
        }
    }

    /// Ensures one pipeline runs for `config` with its subscriber list.
    ///
    /// Waits for a cleanup or restart of the same channel to finish first.
    pub async fn reconcile(&self, config: &ChannelConfig) -> Result<Reconciled, ConfigValidationError> {
        config.validate()?;
        let key = config.channel_ref();

        loop {
            let pending = self.terminating.lock().get(&key).cloned();
            if let Some(done) = pending {
                done.cancelled().await;
                continue;
            }

            let mut pipelines = self.pipelines.write().await;
            if self.terminating.lock().contains_key(&key) {
                continue;
            }

            let Some(handle) = pipelines.get(&key) else {
                let handle = self.spawn(&key, config);
                pipelines.insert(key, handle);
                return Ok(Reconciled::Started);
            };

            let exhausted =
                handle.join.is_finished() || handle.shared.health() == PipelineHealth::Unhealthy;
            if exhausted {
                // retries exhausted; retire the old task, then start over
                let Some(stale) = pipelines.remove(&key) else {
                    continue;
                };
                let _terminating = self.mark_terminating(&key);
                drop(pipelines);
                stale.cancel.cancel();
                let _ = stale.join.await;
                continue;
            }

            if **handle.shared.subscribers.load() == config.subscriptions {
                return Ok(Reconciled::Unchanged);
            }
            handle
                .shared
                .subscribers
                .store(Arc::new(config.subscriptions.clone()));
            drop(pipelines);
            self.bus.publish(
                Event::new(EventKind::SubscribersSwapped)
                    .with_channel(key.to_string())
                    .with_count(config.subscriptions.len()),
            );
            return Ok(Reconciled::Swapped);
        }
    }

    fn spawn(&self, key: &ChannelRef, config: &ChannelConfig) -> Handle {
        let topic = (self.topic_namer)(key);
        let shared = PipelineShared::new(config.subscriptions.clone());
        let cancel = self.runtime_token.child_token();

        let pipeline = ConsumptionPipeline::new(
            key,
            topic.clone(),
            consumer_group_id(key),
            Arc::clone(&self.log),
            self.fanout.clone(),
            Arc::clone(&shared),
            self.params.clone(),
            self.bus.clone(),
        );
        let token = cancel.clone();
        let join = tokio::spawn(async move { pipeline.run(token).await });

        Handle {
            topic,
            shared,
            join,
            cancel,
        }
    }

    /// Stops the pipeline of `channel` and releases its log subscription.
    ///
    /// The channel reports [`ChannelPhase::Terminating`] until the task has
    /// exited; a concurrent `reconcile` waits for it.
    pub async fn cleanup(&self, channel: &ChannelRef) -> Cleanup {
        let (mut handle, _terminating) = {
            let mut pipelines = self.pipelines.write().await;
            let Some(handle) = pipelines.remove(channel) else {
                return Cleanup::Absent;
            };
            (handle, self.mark_terminating(channel))
        };

        handle.cancel.cancel();
        match tokio::time::timeout(self.cleanup_timeout, &mut handle.join).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    warn!(channel = %channel, error = %e, "pipeline task failed");
                }
                Cleanup::Stopped
            }
            Err(_) => {
                self.force_stop(channel, handle.join, self.cleanup_timeout).await;
                Cleanup::ForceStopped
            }
        }
    }

    /// Cancels every pipeline and waits up to `grace` for all of them.
    ///
    /// Returns the channels that had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> Vec<String> {
        let handles: Vec<(ChannelRef, Handle)> = {
            let mut pipelines = self.pipelines.write().await;
            pipelines.drain().collect()
        };

        for (_, h) in &handles {
            h.cancel.cancel();
        }

        let deadline = Instant::now() + grace;
        let mut stuck = Vec::new();
        for (channel, mut h) in handles {
            match tokio::time::timeout_at(deadline, &mut h.join).await {
                Ok(Err(e)) => warn!(channel = %channel, error = %e, "pipeline task failed"),
                Ok(Ok(_)) => {}
                Err(_) => {
                    self.force_stop(&channel, h.join, grace).await;
                    stuck.push(channel.to_string());
                }
            }
        }
        stuck.sort_unstable();
        stuck
    }

    /// Phase of `channel` as seen by the manager; `None` without a pipeline.
    pub async fn phase(&self, channel: &ChannelRef) -> Option<ChannelPhase> {
        if self.terminating.lock().contains_key(channel) {
            return Some(ChannelPhase::Terminating);
        }
        let pipelines = self.pipelines.read().await;
        pipelines.get(channel).map(|_| ChannelPhase::Active)
    }

    pub async fn status(&self, channel: &ChannelRef) -> Option<PipelineStatus> {
        let pipelines = self.pipelines.read().await;
        pipelines.get(channel).map(|h| PipelineStatus {
            topic: h.topic.clone(),
            health: h.shared.health(),
            subscriptions: h
                .shared
                .subscribers
                .load()
                .iter()
                .map(|s| s.uid.clone())
                .collect(),
        })
    }

    /// Sorted identities of channels with a pipeline.
    pub async fn list(&self) -> Vec<ChannelRef> {
        let pipelines = self.pipelines.read().await;
        let mut out: Vec<ChannelRef> = pipelines.keys().cloned().collect();
        out.sort_unstable();
        out
    }

    pub async fn is_empty(&self) -> bool {
        self.pipelines.read().await.is_empty()
    }

    /// Marks `channel` as terminating until the returned guard is dropped.
    ///
    /// Callers hold the registry write lock, so no reconcile can slip in
    /// between removing the handle and marking the channel.
    fn mark_terminating(&self, channel: &ChannelRef) -> TerminatingGuard<'_> {
        let done = CancellationToken::new();
        self.terminating
            .lock()
            .insert(channel.clone(), done.clone());
        TerminatingGuard {
            terminating: &self.terminating,
            channel: channel.clone(),
            done,
        }
    }

    /// Aborts a pipeline that missed its deadline; dropping it releases the consumer.
    async fn force_stop(&self, channel: &ChannelRef, join: JoinHandle<PipelineExit>, waited: Duration) {
        join.abort();
        let _ = join.await;
        self.bus.publish(
            Event::new(EventKind::PipelineForceStopped)
                .with_channel(channel.to_string())
                .with_timeout(waited),
        );
    }
}
