//! # Dispatcher: host routing, ingress and per-channel pipelines under one roof.
//!
//! The [`Dispatcher`] owns the event bus, the [`HostRouter`], the
//! [`PipelineManager`] and the observer set. The external reconciler drives it
//! through four operations; `start` serves the HTTP ingress until cancelled.
//!
//! ## High-level architecture
//! ```text
//! reconciler ──► register_channel_host(config) ──► HostRouter
//!            ──► reconcile_consumers(config)   ──► PipelineManager ──► ConsumptionPipeline (per channel)
//!            ──► cleanup_channel(name, ns, host)    ├─ cancel + bounded wait            │
//!                                                   └─ HostRouter::unbind               ▼
//!                                                                                  FanoutEngine
//! start(token):
//!   axum ingress ──► HostRouter::resolve ──► IngressProducer ──► EventLog
//!
//! Event flow:
//!   pipelines / fanout / dispatcher ── publish(Event) ──► Bus ──► listener ──► ObserverSet::emit
//!
//! Shutdown path (token cancelled):
//!   stop accepting ingress requests
//!     └─► Bus.publish(ShutdownRequested)
//!     └─► runtime_token.cancel()   → propagates to every pipeline's child token
//!     └─► PipelineManager::shutdown(cfg.grace):
//!            ├─ all joined  → Bus.publish(AllStoppedWithinGrace)
//!            └─ timeout     → Bus.publish(GraceExceeded), Err(GraceExceeded { stuck })
//!     └─► observers drain their queues
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//! use channel_dispatcher::{ChannelConfig, Dispatcher, InMemoryLog, Subscription};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::builder(Arc::new(InMemoryLog::new())).build();
//!
//!     let channel = ChannelConfig::new("default", "orders", "orders.default.svc")
//!         .with_subscription(Subscription::new("uid-1", Url::parse("http://billing.local/")?));
//!     dispatcher.register_channel_host(&channel)?;
//!     dispatcher.reconcile_consumers(&channel).await?;
//!
//!     let token = CancellationToken::new();
//!     dispatcher.start(token).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DispatcherConfig;
use crate::error::{DispatcherError, RoutingError};
use crate::events::{Bus, Event, EventKind};
use crate::fanout::{FanoutEngine, MessageSender};
use crate::ingress::{IngressProducer, ingress_router};
use crate::log::{EventLog, TopicNamer, default_topic_name};
use crate::model::{ChannelConfig, ChannelRef};
use crate::observers::{Observe, ObserverSet};
use crate::pipeline::{
    ChannelPhase, Cleanup, PipelineHealth, PipelineManager, PipelineParams, Reconciled,
};
use crate::router::{HostRouter, Registration, Unbinding};

/// Point-in-time view of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub channel: ChannelRef,
    /// Bound host, if any.
    pub host: Option<String>,
    pub phase: ChannelPhase,
    /// `None` without a pipeline.
    pub health: Option<PipelineHealth>,
    pub topic: Option<String>,
    /// Uids in the active subscriber snapshot.
    pub subscriptions: Vec<String>,
}

/// Builder for a [`Dispatcher`].
pub struct DispatcherBuilder {
    cfg: DispatcherConfig,
    log: Arc<dyn EventLog>,
    observers: Vec<Arc<dyn Observe>>,
    #[cfg_attr(not(feature = "logging"), allow(dead_code))]
    log_writer: bool,
    topic_namer: TopicNamer,
    http_client: Option<reqwest::Client>,
}

impl DispatcherBuilder {
    fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            cfg: DispatcherConfig::default(),
            log,
            observers: Vec::new(),
            log_writer: true,
            topic_namer: Arc::new(default_topic_name),
            http_client: None,
        }
    }

    pub fn with_config(mut self, cfg: DispatcherConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Observers receiving every lifecycle event.
    pub fn with_observers(mut self, observers: Vec<Arc<dyn Observe>>) -> Self {
        self.observers = observers;
        self
    }

    /// Skips the built-in `LogWriter` observer.
    pub fn without_log_writer(mut self) -> Self {
        self.log_writer = false;
        self
    }

    /// Replaces the channel → topic mapping.
    pub fn with_topic_namer<F>(mut self, namer: F) -> Self
    where
        F: Fn(&ChannelRef) -> String + Send + Sync + 'static,
    {
        self.topic_namer = Arc::new(namer);
        self
    }

    /// HTTP client used for subscriber, reply and dead-letter requests.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Builds the dispatcher and spawns its observer workers.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Arc<Dispatcher> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let runtime_token = CancellationToken::new();

        #[allow(unused_mut)]
        let mut observers = self.observers;
        #[cfg(feature = "logging")]
        if self.log_writer {
            observers.push(Arc::new(crate::observers::LogWriter::new()));
        }
        let observers = ObserverSet::new(observers, bus.clone());

        let timeout = self.cfg.delivery_timeout();
        let sender = match self.http_client {
            Some(client) => MessageSender::with_client(client, timeout),
            None => MessageSender::new(timeout),
        };
        let fanout = FanoutEngine::new(sender, self.cfg.fanout_limit(), bus.clone());

        let pipelines = PipelineManager::new(
            Arc::clone(&self.log),
            fanout,
            Arc::clone(&self.topic_namer),
            PipelineParams {
                backoff: self.cfg.consumer_backoff,
                retry_limit: self.cfg.consumer_retry_limit(),
            },
            self.cfg.cleanup_timeout,
            bus.clone(),
            runtime_token.clone(),
        );

        let dispatcher = Arc::new(Dispatcher {
            router: Arc::new(HostRouter::new()),
            producer: IngressProducer::new(self.log, self.topic_namer),
            pipelines,
            listener: Mutex::new(None),
            listener_token: CancellationToken::new(),
            bus,
            runtime_token,
            started: AtomicBool::new(false),
            cfg: self.cfg,
        });
        dispatcher.observer_listener(observers);
        dispatcher
    }
}

/// Channel dispatcher.
pub struct Dispatcher {
    cfg: DispatcherConfig,
    bus: Bus,
    router: Arc<HostRouter>,
    producer: IngressProducer,
    pipelines: PipelineManager,
    /// Forwards bus events to the observer set; owns the set.
    listener: Mutex<Option<JoinHandle<()>>>,
    listener_token: CancellationToken,
    runtime_token: CancellationToken,
    started: AtomicBool,
}

impl Dispatcher {
    pub fn builder(log: Arc<dyn EventLog>) -> DispatcherBuilder {
        DispatcherBuilder::new(log)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }

    /// Receiver for every lifecycle event published from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Binds `config.host_name` to the channel.
    ///
    /// Re-registering an identical config is a no-op; a new host for the same
    /// channel moves the binding; a host bound to another channel is rejected.
    pub fn register_channel_host(&self, config: &ChannelConfig) -> Result<(), DispatcherError> {
        let channel = config.channel_ref().to_string();
        match self.router.register(config.clone())? {
            Registration::Unchanged => {}
            Registration::Replaced => {
                self.publish_binding(EventKind::ChannelRegistered, &channel, &config.host_name);
            }
            Registration::Installed { released } => {
                for host in &released {
                    self.publish_binding(EventKind::ChannelUnbound, &channel, host);
                }
                self.publish_binding(EventKind::ChannelRegistered, &channel, &config.host_name);
            }
        }
        Ok(())
    }

    /// Ensures the channel's pipeline runs with `config.subscriptions`.
    pub async fn reconcile_consumers(
        &self,
        config: &ChannelConfig,
    ) -> Result<Reconciled, DispatcherError> {
        Ok(self.pipelines.reconcile(config).await?)
    }

    /// Stops the channel's pipeline and unbinds `host_name`.
    ///
    /// Succeeds for unknown channels. An empty `host_name` unbinds whatever
    /// host the channel currently holds.
    pub async fn cleanup_channel(
        &self,
        name: &str,
        namespace: &str,
        host_name: &str,
    ) -> Result<(), DispatcherError> {
        let channel = ChannelRef::new(namespace, name);

        if self.pipelines.cleanup(&channel).await == Cleanup::ForceStopped {
            warn!(
                channel = %channel,
                timeout = ?self.cfg.cleanup_timeout,
                "pipeline did not stop in time; subscription released forcibly"
            );
        }

        let host = if host_name.is_empty() {
            self.router.host_of(&channel)
        } else {
            Some(host_name.to_string())
        };
        if let Some(host) = host {
            match self.router.unbind(&channel, &host) {
                Unbinding::Removed => {
                    self.publish_binding(EventKind::ChannelUnbound, &channel.to_string(), &host);
                }
                Unbinding::NotBound => {}
                Unbinding::BoundElsewhere(owner) => {
                    warn!(channel = %channel, host, owner = %owner, "host bound to another channel; left in place");
                }
            }
        }
        Ok(())
    }

    /// Channel bound to `host`.
    pub fn resolve(&self, host: &str) -> Result<Arc<ChannelConfig>, RoutingError> {
        self.router.resolve(host)
    }

    /// Status of `channel`; `None` when it is neither bound nor running.
    pub async fn channel_status(&self, channel: &ChannelRef) -> Option<ChannelStatus> {
        let host = self.router.host_of(channel);
        let phase = self.pipelines.phase(channel).await;
        let pipeline = self.pipelines.status(channel).await;

        let phase = match (phase, &host) {
            (Some(phase), _) => phase,
            (None, Some(_)) => ChannelPhase::Registered,
            (None, None) => return None,
        };
        Some(ChannelStatus {
            channel: channel.clone(),
            host,
            phase,
            health: pipeline.as_ref().map(|p| p.health),
            topic: pipeline.as_ref().map(|p| p.topic.clone()),
            subscriptions: pipeline.map(|p| p.subscriptions).unwrap_or_default(),
        })
    }

    /// Sorted identities of bound or running channels.
    pub async fn channels(&self) -> Vec<ChannelRef> {
        let mut out = self.router.channels();
        out.extend(self.pipelines.list().await);
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Serves the ingress on `cfg.ingress_addr` until `token` is cancelled.
    pub async fn start(&self, token: CancellationToken) -> Result<(), DispatcherError> {
        let listener = TcpListener::bind(self.cfg.ingress_addr)
            .await
            .map_err(DispatcherError::Bind)?;
        self.serve(listener, token).await
    }

    /// Serves the ingress on `listener` until `token` is cancelled, then stops
    /// every pipeline within `cfg.grace`.
    pub async fn serve(
        &self,
        listener: TcpListener,
        token: CancellationToken,
    ) -> Result<(), DispatcherError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DispatcherError::AlreadyStarted);
        }
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "ingress listening");
        }

        let app = ingress_router(
            Arc::clone(&self.router),
            self.producer.clone(),
            self.cfg.max_ingress_body_bytes,
        );
        let shutdown = token.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.runtime_token.cancel();
        let stopped = self.wait_all_with_grace().await;
        self.drain_observers().await;

        served.map_err(DispatcherError::Serve)?;
        stopped
    }

    /// Waits for every pipeline within the configured grace period.
    async fn wait_all_with_grace(&self) -> Result<(), DispatcherError> {
        let grace = self.cfg.grace;
        let stuck = self.pipelines.shutdown(grace).await;
        if stuck.is_empty() {
            self.bus.publish(Event::new(EventKind::AllStoppedWithinGrace));
            return Ok(());
        }
        self.bus
            .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")));
        Err(DispatcherError::GraceExceeded { grace, stuck })
    }

    /// Forwards bus events to `set` until `listener_token` is cancelled.
    ///
    /// The set also publishes on the bus, so the listener cannot wait for the
    /// bus to close; it stops on its token, forwards what is already queued,
    /// then drains the observers.
    fn observer_listener(&self, set: ObserverSet) {
        if set.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let token = self.listener_token.clone();
        let handle = tokio::spawn(async move {
            loop {
                select! {
                    biased;
                    _ = token.cancelled() => break,
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "observer listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            set.shutdown().await;
        });
        *self.listener.lock() = Some(handle);
    }

    /// Stops the listener and waits until every observer has handled its queue.
    async fn drain_observers(&self) {
        self.listener_token.cancel();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "observer listener failed");
            }
        }
    }

    fn publish_binding(&self, kind: EventKind, channel: &str, host: &str) {
        self.bus
            .publish(Event::new(kind).with_channel(channel).with_host(host));
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.runtime_token.cancel();
        self.listener_token.cancel();
    }
}
