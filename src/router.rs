//! # Host router: maps an inbound host to the channel bound to it.
//!
//! Reads happen on every inbound request; writes only during registration and
//! cleanup. Writers serialize on a mutex over the authoritative map and then
//! publish an immutable snapshot through [`ArcSwap`]; readers only ever load the
//! current snapshot and never wait for a writer.
//!
//! ```text
//! register / unbind ──► Mutex<HashMap<host, config>> ──rebuild──► ArcSwap<snapshot>
//!                                                                     ▲
//! resolve(host) ──────────────────────────── load() ──────────────────┘
//! ```
//!
//! ## Rules
//! - At most one binding per host.
//! - A host bound to one channel identity cannot be claimed by another.
//! - A channel identity owns at most one host; re-registering it under a new
//!   host moves the binding.
//! - Re-registering an identical config is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::{ConfigValidationError, RoutingError};
use crate::model::{ChannelConfig, ChannelRef};

type RoutingTable = HashMap<String, Arc<ChannelConfig>>;

/// What `register` changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The host was not bound before.
    Installed {
        /// Hosts previously bound to the same identity, now released.
        released: Vec<String>,
    },
    /// The host was bound to the same identity with a different config.
    Replaced,
    /// Identical config already bound.
    Unchanged,
}

/// What `unbind` found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unbinding {
    Removed,
    NotBound,
    /// The host belongs to a different channel and was left alone.
    BoundElsewhere(ChannelRef),
}

/// Read-mostly routing table from host to channel.
pub struct HostRouter {
    table: Mutex<RoutingTable>,
    snapshot: ArcSwap<RoutingTable>,
}

impl Default for HostRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRouter {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Validates `config` and binds its host to it.
    pub fn register(&self, config: ChannelConfig) -> Result<Registration, ConfigValidationError> {
        config.validate()?;

        let mut table = self.table.lock();
        let existing = table.get(&config.host_name).cloned();
        let outcome = match existing {
            Some(bound) if !bound.same_identity(&config) => {
                return Err(ConfigValidationError::HostConflict {
                    host: config.host_name.clone(),
                    bound_to: bound.channel_ref().to_string(),
                });
            }
            Some(bound) if *bound == config => return Ok(Registration::Unchanged),
            Some(_) => Registration::Replaced,
            None => {
                let released: Vec<String> = table
                    .iter()
                    .filter(|(_, bound)| bound.same_identity(&config))
                    .map(|(host, _)| host.clone())
                    .collect();
                for host in &released {
                    table.remove(host);
                }
                Registration::Installed { released }
            }
        };

        table.insert(config.host_name.clone(), Arc::new(config));
        self.publish(&table);
        Ok(outcome)
    }

    /// Returns the channel bound to `host`.
    ///
    /// If `host` carries a port (`name:8080`) and is not bound as-is, the bare
    /// name is tried.
    pub fn resolve(&self, host: &str) -> Result<Arc<ChannelConfig>, RoutingError> {
        if host.is_empty() {
            return Err(RoutingError::MissingHost);
        }
        let snapshot = self.snapshot.load();
        snapshot
            .get(host)
            .or_else(|| strip_port(host).and_then(|bare| snapshot.get(bare)))
            .cloned()
            .ok_or_else(|| RoutingError::HostNotFound {
                host: host.to_string(),
            })
    }

    /// Removes the binding of `host` if it belongs to `channel`.
    pub fn unbind(&self, channel: &ChannelRef, host: &str) -> Unbinding {
        let mut table = self.table.lock();
        match table.get(host).map(|bound| bound.channel_ref()) {
            None => Unbinding::NotBound,
            Some(owner) if owner != *channel => Unbinding::BoundElsewhere(owner),
            Some(_) => {
                table.remove(host);
                self.publish(&table);
                Unbinding::Removed
            }
        }
    }

    /// Host currently bound to `channel`, if any.
    pub fn host_of(&self, channel: &ChannelRef) -> Option<String> {
        self.snapshot
            .load()
            .iter()
            .find(|(_, cfg)| cfg.channel_ref() == *channel)
            .map(|(host, _)| host.clone())
    }

    /// Sorted list of bound channel identities.
    pub fn channels(&self) -> Vec<ChannelRef> {
        let mut out: Vec<ChannelRef> = self
            .snapshot
            .load()
            .values()
            .map(|cfg| cfg.channel_ref())
            .collect();
        out.sort_unstable();
        out
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    fn publish(&self, table: &RoutingTable) {
        self.snapshot.store(Arc::new(table.clone()));
    }
}

/// `name:port` → `name`; `None` when there is no numeric port.
fn strip_port(host: &str) -> Option<&str> {
    let (name, port) = host.rsplit_once(':')?;
    if name.is_empty() || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Subscription;
    use url::Url;

    fn cfg(name: &str, host: &str) -> ChannelConfig {
        ChannelConfig::new("default", name, host)
    }

    #[test]
    fn register_and_resolve() {
        let router = HostRouter::new();
        let outcome = router.register(cfg("a", "a.svc")).unwrap();
        assert_eq!(outcome, Registration::Installed { released: vec![] });

        let resolved = router.resolve("a.svc").unwrap();
        assert_eq!(resolved.channel_ref(), ChannelRef::new("default", "a"));
        assert_eq!(
            router.resolve("b.svc"),
            Err(RoutingError::HostNotFound { host: "b.svc".into() })
        );
    }

    #[test]
    fn second_identity_cannot_claim_bound_host() {
        let router = HostRouter::new();
        router.register(cfg("a", "shared.svc")).unwrap();
        let err = router.register(cfg("b", "shared.svc")).unwrap_err();
        assert!(matches!(err, ConfigValidationError::HostConflict { .. }));
        assert_eq!(
            router.resolve("shared.svc").unwrap().channel_ref(),
            ChannelRef::new("default", "a")
        );
    }

    #[test]
    fn identical_registration_is_noop() {
        let router = HostRouter::new();
        router.register(cfg("a", "a.svc")).unwrap();
        let before = router.resolve("a.svc").unwrap();
        assert_eq!(router.register(cfg("a", "a.svc")).unwrap(), Registration::Unchanged);
        assert!(Arc::ptr_eq(&before, &router.resolve("a.svc").unwrap()));
    }

    #[test]
    fn same_identity_new_content_replaces() {
        let router = HostRouter::new();
        router.register(cfg("a", "a.svc")).unwrap();
        let updated = cfg("a", "a.svc").with_subscription(Subscription::new(
            "u1",
            Url::parse("http://s.local/").unwrap(),
        ));
        assert_eq!(router.register(updated).unwrap(), Registration::Replaced);
        assert_eq!(router.resolve("a.svc").unwrap().subscriptions.len(), 1);
    }

    #[test]
    fn new_host_for_same_identity_moves_binding() {
        let router = HostRouter::new();
        router.register(cfg("a", "old.svc")).unwrap();
        let outcome = router.register(cfg("a", "new.svc")).unwrap();
        assert_eq!(
            outcome,
            Registration::Installed { released: vec!["old.svc".into()] }
        );
        assert!(router.resolve("old.svc").is_err());
        assert!(router.resolve("new.svc").is_ok());
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let router = HostRouter::new();
        assert!(matches!(
            router.register(cfg("a", "")),
            Err(ConfigValidationError::EmptyHostName { .. })
        ));
        assert!(router.is_empty());
    }

    #[test]
    fn unbind_only_removes_own_binding() {
        let router = HostRouter::new();
        router.register(cfg("a", "a.svc")).unwrap();

        let other = ChannelRef::new("default", "b");
        assert_eq!(
            router.unbind(&other, "a.svc"),
            Unbinding::BoundElsewhere(ChannelRef::new("default", "a"))
        );
        let own = ChannelRef::new("default", "a");
        assert_eq!(router.unbind(&own, "a.svc"), Unbinding::Removed);
        assert_eq!(router.unbind(&own, "a.svc"), Unbinding::NotBound);
        assert!(router.resolve("a.svc").is_err());
    }

    #[test]
    fn resolve_falls_back_to_bare_host() {
        let router = HostRouter::new();
        router.register(cfg("a", "a.svc")).unwrap();
        assert!(router.resolve("a.svc:8080").is_ok());
        assert!(router.resolve("a.svc:http").is_err());
        assert_eq!(router.resolve(""), Err(RoutingError::MissingHost));
    }

    #[test]
    fn readers_keep_their_snapshot_across_writes() {
        let router = HostRouter::new();
        router.register(cfg("a", "a.svc")).unwrap();
        let held = router.resolve("a.svc").unwrap();
        router.unbind(&ChannelRef::new("default", "a"), "a.svc");
        assert_eq!(held.host_name, "a.svc");
        assert_eq!(router.channels(), Vec::<ChannelRef>::new());
    }
}
