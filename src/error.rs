//! Error types used by the dispatcher.
//!
//! The taxonomy follows where a failure is contained:
//!
//! - [`RoutingError`] — unknown or missing host on an inbound request.
//! - [`ConfigValidationError`] — malformed [`ChannelConfig`](crate::ChannelConfig), rejected synchronously.
//! - [`IngressError`] — an inbound request could not be accepted into the log.
//! - [`LogError`] — failures reported by the durable-log collaborator.
//! - [`ConsumerGroupError`] — a pipeline lost (or never got) its log subscription.
//! - [`DeliveryError`] — one HTTP hop to a subscriber / reply / dead-letter target failed.
//! - [`DispatcherError`] — what the public lifecycle API returns.
//!
//! Every enum provides `as_label` (stable snake_case label for logs/metrics).

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// # Routing failures on the ingress path.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// No channel is bound to this host.
    #[error("no channel bound to host {host:?}")]
    HostNotFound {
        /// Host value taken from the request.
        host: String,
    },

    /// The request carried no usable `Host` header.
    #[error("request has no host")]
    MissingHost,
}

impl RoutingError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RoutingError::HostNotFound { .. } => "routing_host_not_found",
            RoutingError::MissingHost => "routing_missing_host",
        }
    }
}

/// # Rejections of a supplied channel configuration.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Namespace or name is empty.
    #[error("channel namespace and name must be non-empty")]
    EmptyIdentity,

    /// `host_name` is empty.
    #[error("channel {channel} has an empty host name")]
    EmptyHostName { channel: String },

    /// Host already bound to another channel.
    #[error("host {host:?} is already bound to channel {bound_to}")]
    HostConflict { host: String, bound_to: String },

    /// Two subscriptions share one uid.
    #[error("channel {channel} has duplicate subscription uid {uid:?}")]
    DuplicateSubscriptionUid { channel: String, uid: String },

    /// A subscription has an empty uid.
    #[error("channel {channel} has a subscription with an empty uid")]
    EmptySubscriptionUid { channel: String },
}

impl ConfigValidationError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigValidationError::EmptyIdentity => "config_empty_identity",
            ConfigValidationError::EmptyHostName { .. } => "config_empty_host_name",
            ConfigValidationError::HostConflict { .. } => "config_host_conflict",
            ConfigValidationError::DuplicateSubscriptionUid { .. } => "config_duplicate_uid",
            ConfigValidationError::EmptySubscriptionUid { .. } => "config_empty_uid",
        }
    }
}

/// # Failures reported by the durable log.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The log cannot be reached.
    #[error("log unreachable: {reason}")]
    Unreachable { reason: String },

    /// The topic does not exist.
    #[error("topic {topic:?} not found")]
    TopicNotFound { topic: String },

    /// The subscription or the log itself was closed.
    #[error("log subscription closed")]
    Closed,

    /// Committing a consumed position failed.
    #[error("commit failed: {reason}")]
    Commit { reason: String },
}

impl LogError {
    pub fn as_label(&self) -> &'static str {
        match self {
            LogError::Unreachable { .. } => "log_unreachable",
            LogError::TopicNotFound { .. } => "log_topic_not_found",
            LogError::Closed => "log_closed",
            LogError::Commit { .. } => "log_commit_failed",
        }
    }
}

/// # Errors on the ingress path, each mapped to an HTTP status.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngressError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Request is not a valid event.
    #[error("invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// The log did not acknowledge the append.
    #[error("append to {topic:?} failed: {source}")]
    Append {
        topic: String,
        #[source]
        source: LogError,
    },
}

impl IngressError {
    pub fn as_label(&self) -> &'static str {
        match self {
            IngressError::Routing(e) => e.as_label(),
            IngressError::InvalidEvent { .. } => "ingress_invalid_event",
            IngressError::Append { .. } => "ingress_append_failed",
        }
    }

    /// HTTP status returned to the inbound caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            IngressError::Routing(_) => StatusCode::NOT_FOUND,
            IngressError::InvalidEvent { .. } => StatusCode::BAD_REQUEST,
            IngressError::Append { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// # A pipeline could not establish or keep its log subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("consumer group {group:?} on topic {topic:?}: {source}")]
pub struct ConsumerGroupError {
    pub topic: String,
    pub group: String,
    #[source]
    pub source: LogError,
}

impl ConsumerGroupError {
    pub fn as_label(&self) -> &'static str {
        "consumer_group_failed"
    }
}

/// # One failed HTTP hop during fanout.
///
/// Never escapes the fanout engine: it is folded into a per-subscription outcome.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connection, DNS, TLS or body transfer failure.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// Target answered with a non-2xx status.
    #[error("target answered {status}")]
    Status { status: u16 },

    /// Target did not answer in time.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

impl DeliveryError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryError::Transport { .. } => "delivery_transport",
            DeliveryError::Status { .. } => "delivery_status",
            DeliveryError::Timeout { .. } => "delivery_timeout",
        }
    }
}

/// # Errors returned by the [`Dispatcher`](crate::Dispatcher) API.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),

    /// The ingress listener could not be bound.
    #[error("failed to bind ingress listener: {0}")]
    Bind(#[source] std::io::Error),

    /// The ingress server stopped with an error.
    #[error("ingress server error: {0}")]
    Serve(#[source] std::io::Error),

    /// `start` was called twice.
    #[error("dispatcher already started")]
    AlreadyStarted,

    /// Shutdown grace was exceeded; the listed channels were force-stopped.
    #[error("shutdown grace {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded { grace: Duration, stuck: Vec<String> },
}

impl DispatcherError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DispatcherError::Validation(e) => e.as_label(),
            DispatcherError::Bind(_) => "dispatcher_bind_failed",
            DispatcherError::Serve(_) => "dispatcher_serve_failed",
            DispatcherError::AlreadyStarted => "dispatcher_already_started",
            DispatcherError::GraceExceeded { .. } => "dispatcher_grace_exceeded",
        }
    }
}
