//! # Desired-state description of a channel and its subscriptions.
//!
//! [`ChannelConfig`] is supplied by the external reconciler whenever the desired
//! state of a channel changes. It is treated as an immutable value: an update is
//! a *new* config, never an in-place mutation of one the dispatcher already holds.
//!
//! ## Rules
//! - Identity is `(namespace, name)` ([`ChannelRef`]).
//! - `host_name` is the routing key; it must be non-empty.
//! - Subscription `uid`s are unique within one channel.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigValidationError;

/// Identity of a channel: `(namespace, name)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelRef {
    pub namespace: String,
    pub name: String,
}

impl ChannelRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One fanout target on a channel.
///
/// `subscriber` receives every consumed message. On success the subscriber's
/// response (if any) goes to `reply`; on failure the original message goes to
/// `dead_letter`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Stable across reconciliations of the same logical subscription.
    pub uid: String,
    pub subscriber: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter: Option<Url>,
}

impl Subscription {
    /// Creates a subscription with no reply and no dead-letter target.
    pub fn new(uid: impl Into<String>, subscriber: Url) -> Self {
        Self {
            uid: uid.into(),
            subscriber,
            reply: None,
            dead_letter: None,
        }
    }

    /// Sets the reply target.
    #[must_use]
    pub fn with_reply(mut self, reply: Url) -> Self {
        self.reply = Some(reply);
        self
    }

    /// Sets the dead-letter target.
    #[must_use]
    pub fn with_dead_letter(mut self, dead_letter: Url) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }
}

/// Desired state of one channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub namespace: String,
    pub name: String,
    pub host_name: String,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl ChannelConfig {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        host_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            host_name: host_name.into(),
            subscriptions: Vec::new(),
        }
    }

    /// Appends a subscription.
    #[must_use]
    pub fn with_subscription(mut self, sub: Subscription) -> Self {
        self.subscriptions.push(sub);
        self
    }

    /// Returns the channel identity.
    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef::new(&self.namespace, &self.name)
    }

    /// True if `other` names the same channel.
    pub fn same_identity(&self, other: &ChannelConfig) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }

    /// Checks the invariants that do not depend on other channels.
    ///
    /// Host-name conflicts across channels are checked by the router.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.namespace.is_empty() || self.name.is_empty() {
            return Err(ConfigValidationError::EmptyIdentity);
        }
        if self.host_name.trim().is_empty() {
            return Err(ConfigValidationError::EmptyHostName {
                channel: self.channel_ref().to_string(),
            });
        }
        self.validate_subscriptions()
    }

    /// Checks subscription uids: non-empty and unique.
    pub fn validate_subscriptions(&self) -> Result<(), ConfigValidationError> {
        let mut seen = HashSet::with_capacity(self.subscriptions.len());
        for sub in &self.subscriptions {
            if sub.uid.is_empty() {
                return Err(ConfigValidationError::EmptySubscriptionUid {
                    channel: self.channel_ref().to_string(),
                });
            }
            if !seen.insert(sub.uid.as_str()) {
                return Err(ConfigValidationError::DuplicateSubscriptionUid {
                    channel: self.channel_ref().to_string(),
                    uid: sub.uid.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn channel() -> ChannelConfig {
        ChannelConfig::new("default", "channela", "channela.svc")
            .with_subscription(Subscription::new("aaaa", url("http://s1.local/")))
            .with_subscription(
                Subscription::new("cccc", url("http://s2.local/"))
                    .with_dead_letter(url("http://dls.local/")),
            )
    }

    #[test]
    fn valid_config_passes() {
        assert!(channel().validate().is_ok());
    }

    #[test]
    fn empty_host_name_is_rejected() {
        let mut cfg = channel();
        cfg.host_name = "  ".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigValidationError::EmptyHostName { .. })
        ));
    }

    #[test]
    fn empty_identity_is_rejected() {
        let cfg = ChannelConfig::new("", "x", "x.svc");
        assert!(matches!(
            cfg.validate(),
            Err(ConfigValidationError::EmptyIdentity)
        ));
    }

    #[test]
    fn duplicate_uid_is_rejected() {
        let cfg = channel().with_subscription(Subscription::new("aaaa", url("http://s3.local/")));
        match cfg.validate() {
            Err(ConfigValidationError::DuplicateSubscriptionUid { uid, .. }) => {
                assert_eq!(uid, "aaaa")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn deserializes_reconciler_payload() {
        let json = r#"{
            "namespace": "default",
            "name": "channelb",
            "hostName": "channelb.svc",
            "subscriptions": [
                {"uid": "bbbb", "subscriber": "http://receiver.local/", "deadLetter": "http://dls.local/"}
            ]
        }"#;
        let cfg: ChannelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.channel_ref(), ChannelRef::new("default", "channelb"));
        assert_eq!(cfg.subscriptions.len(), 1);
        assert!(cfg.subscriptions[0].reply.is_none());
        assert_eq!(
            cfg.subscriptions[0].dead_letter.as_ref().map(Url::as_str),
            Some("http://dls.local/")
        );
    }

    #[test]
    fn channel_ref_display() {
        assert_eq!(ChannelRef::new("ns", "c").to_string(), "ns/c");
    }
}
