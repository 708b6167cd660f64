//! # channel-dispatcher
//!
//! **channel-dispatcher** is the message-routing core of a channel-based event
//! delivery service. It accepts events over HTTP for a logical channel, appends
//! them to a durable log keyed by channel identity, and consumes that log to fan
//! each event out to the channel's current subscribers, forwarding successful
//! responses to a reply target and failed deliveries to a dead-letter target.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  HTTP POST (Host: channela.svc)
//!            │
//!            ▼
//! ┌──────────────────────┐  resolve   ┌──────────────┐
//! │ ingress (axum)       │───────────►│  HostRouter  │◄── register_channel_host
//! │  - 202/400/404/500   │            │  (ArcSwap)   │◄── cleanup_channel (unbind)
//! └──────────┬───────────┘            └──────────────┘
//!            │ IngressProducer::produce
//!            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │             EventLog (InMemoryLog / KafkaLog)                     │
//! │  topic = knative-messaging-kafka.<ns>.<name>                      │
//! └──────┬──────────────────────────┬──────────────────────────┬──────┘
//!        │ group kafka.<ns>.<a>     │ group kafka.<ns>.<b>     │
//!        ▼                          ▼                          ▼
//! ┌──────────────┐           ┌──────────────┐           ┌──────────────┐
//! │ Consumption  │           │ Consumption  │           │ Consumption  │◄── reconcile_consumers
//! │ Pipeline (a) │           │ Pipeline (b) │           │ Pipeline (..)│    (ArcSwap subscriber list)
//! └──────┬───────┘           └──────┬───────┘           └──────┬───────┘
//!        ▼                          ▼                          ▼
//!   FanoutEngine: per subscription → subscriber ─┬─ ok  → reply target
//!                                                └─ err → dead-letter target
//! ```
//!
//! ### Lifecycle of a channel
//! ```text
//! Unregistered ─► Registered ─► Active ─► Terminating ─► Removed
//!                 (host bound)  (pipeline    (cleanup_channel)
//!                               running; subscriber swaps are atomic)
//! ```
//!
//! ### Events
//! Every component publishes typed [`Event`]s on an internal bus; the dispatcher
//! forwards them to registered [`Observe`] implementations, each with its own
//! queue and worker. With the `logging` feature a `LogWriter` observer renders
//! them through `tracing`.
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                         |
//! |-------------------|---------------------------------------------------------------|--------------------------------------------|
//! | **Dispatcher**    | Lifecycle operations and ingress server.                      | [`Dispatcher`], [`DispatcherBuilder`]      |
//! | **Routing**       | Host → channel table, lock-free reads.                        | [`HostRouter`]                             |
//! | **Durable log**   | Produce / consumer-group subscribe / commit.                  | [`EventLog`], [`LogConsumer`], [`InMemoryLog`] |
//! | **Fanout**        | Independent per-subscription delivery with reply/dead-letter. | [`FanoutEngine`], [`Outcome`]              |
//! | **Pipelines**     | One consumption task per channel.                             | [`PipelineManager`], [`PipelineHealth`]    |
//! | **Observer API**  | Hook into lifecycle events.                                   | [`Observe`], [`Event`], [`EventKind`]      |
//! | **Policies**      | Backoff for lost log subscriptions.                           | [`BackoffPolicy`], [`JitterPolicy`]        |
//! | **Errors**        | Typed errors with stable labels.                              | [`DispatcherError`], [`IngressError`], ... |
//! | **Configuration** | Centralized runtime settings.                                 | [`DispatcherConfig`]                       |
//!
//! ## Optional features
//! - `logging` (default): installs the built-in `LogWriter` observer.
//! - `kafka`: exposes `KafkaLog`, an rdkafka-backed [`EventLog`].

mod config;
mod dispatcher;
mod error;
mod events;
mod fanout;
mod ingress;
mod log;
mod model;
mod observers;
mod pipeline;
mod policies;
mod router;

// ---- Public re-exports ----

pub use config::DispatcherConfig;
pub use dispatcher::{ChannelStatus, Dispatcher, DispatcherBuilder};
pub use error::{
    ConfigValidationError, ConsumerGroupError, DeliveryError, DispatcherError, IngressError,
    LogError, RoutingError,
};
pub use events::{Bus, Event, EventKind};
pub use fanout::{
    DeliveryResponse, FanoutEngine, FanoutReport, MessageSender, Outcome, SubscriptionOutcome,
};
pub use ingress::{IngressProducer, ingress_router};
pub use log::{
    EventLog, InMemoryLog, LogConsumer, Record, TopicNamer, consumer_group_id, default_topic_name,
};
pub use model::{
    ATTRIBUTE_HEADER_PREFIX, CONTENT_TYPE_ATTRIBUTE, ChannelConfig, ChannelRef, Message,
    REQUIRED_ATTRIBUTES, Subscription,
};
pub use observers::{Observe, ObserverSet};
pub use pipeline::{
    ChannelPhase, Cleanup, ConsumptionPipeline, PipelineExit, PipelineHealth, PipelineManager,
    PipelineParams, PipelineStatus, Reconciled,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use router::{HostRouter, Registration, Unbinding};

#[cfg(feature = "logging")]
pub use observers::LogWriter;

#[cfg(feature = "kafka")]
pub use log::{KafkaLog, KafkaLogConfig};
