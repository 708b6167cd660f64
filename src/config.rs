//! # Dispatcher configuration.
//!
//! [`DispatcherConfig`] centralizes runtime settings. All fields are public;
//! prefer the helper accessors over sprinkling sentinel checks around.
//!
//! ## Sentinel values
//! - `max_fanout_concurrency = 0` → every subscription of a message is delivered in parallel
//! - `max_consumer_retries = 0`   → a pipeline retries its subscription forever
//! - `delivery_timeout = 0s`      → no per-request timeout towards subscribers

use std::net::SocketAddr;
use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Runtime settings of a [`Dispatcher`](crate::Dispatcher).
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Address the HTTP ingress listens on.
    pub ingress_addr: SocketAddr,

    /// Upper bound on the wait for all pipelines once `start`'s token is cancelled.
    ///
    /// Pipelines still running afterwards are aborted and reported as stuck.
    pub grace: Duration,

    /// Upper bound on the wait for one pipeline in `cleanup_channel`.
    ///
    /// On expiry the pipeline is aborted and its subscription released; the
    /// cleanup still succeeds.
    pub cleanup_timeout: Duration,

    /// Per-request timeout towards subscriber, reply and dead-letter targets.
    pub delivery_timeout: Duration,

    /// Maximum concurrent deliveries for one message (`0` = unbounded).
    pub max_fanout_concurrency: usize,

    /// Capacity of the lifecycle event bus (min 1).
    pub bus_capacity: usize,

    /// Delays between attempts to (re)establish a log subscription.
    pub consumer_backoff: BackoffPolicy,

    /// Consecutive failed subscription attempts before a pipeline reports
    /// itself unhealthy and stops retrying (`0` = retry forever).
    pub max_consumer_retries: u32,

    /// Largest inbound event body accepted by the ingress.
    pub max_ingress_body_bytes: usize,
}

impl DispatcherConfig {
    /// Fanout concurrency limit as an `Option` (`None` = unbounded).
    #[inline]
    pub fn fanout_limit(&self) -> Option<usize> {
        match self.max_fanout_concurrency {
            0 => None,
            n => Some(n),
        }
    }

    /// Per-request delivery timeout as an `Option` (`None` = no timeout).
    #[inline]
    pub fn delivery_timeout(&self) -> Option<Duration> {
        if self.delivery_timeout.is_zero() {
            None
        } else {
            Some(self.delivery_timeout)
        }
    }

    /// Retry budget as an `Option` (`None` = retry forever).
    #[inline]
    pub fn consumer_retry_limit(&self) -> Option<u32> {
        match self.max_consumer_retries {
            0 => None,
            n => Some(n),
        }
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for DispatcherConfig {
    /// - `ingress_addr = 0.0.0.0:8080`
    /// - `grace = 30s`, `cleanup_timeout = 10s`, `delivery_timeout = 30s`
    /// - `max_fanout_concurrency = 0` (unbounded)
    /// - `bus_capacity = 1024`
    /// - `consumer_backoff = BackoffPolicy::default()`, `max_consumer_retries = 10`
    /// - `max_ingress_body_bytes = 4 MiB`
    fn default() -> Self {
        Self {
            ingress_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            grace: Duration::from_secs(30),
            cleanup_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(30),
            max_fanout_concurrency: 0,
            bus_capacity: 1024,
            consumer_backoff: BackoffPolicy::default(),
            max_consumer_retries: 10,
            max_ingress_body_bytes: 4 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_map_to_none() {
        let cfg = DispatcherConfig {
            max_fanout_concurrency: 0,
            delivery_timeout: Duration::ZERO,
            max_consumer_retries: 0,
            bus_capacity: 0,
            ..DispatcherConfig::default()
        };
        assert_eq!(cfg.fanout_limit(), None);
        assert_eq!(cfg.delivery_timeout(), None);
        assert_eq!(cfg.consumer_retry_limit(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn defaults_are_bounded() {
        let cfg = DispatcherConfig::default();
        assert_eq!(cfg.fanout_limit(), None);
        assert_eq!(cfg.delivery_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.consumer_retry_limit(), Some(10));
    }
}
