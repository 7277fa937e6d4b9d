//! Route-programming consumer.
//!
//! Routes live under `/routes/<vpn>/<name>` and point into a VPN instance
//! at `/vpn-instances/<vpn>`. A route cannot be programmed before its VPN
//! instance exists in the desired view, so ADD and UPDATE defer until it
//! appears. Every route of every VPN waits through the one shared
//! `/vpn-instances/*` subscription.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ldh_core::{Consumer, DataStore, DeferRequest, Disposition};
use ldh_types::{DependencyCondition, ResourceKey, View};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Prefix of VPN instance keys.
const VPN_PREFIX: &str = "/vpn-instances";

/// A route as carried in change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// VPN instance the route belongs to.
    pub vpn: String,
    /// Destination prefix, e.g. `10.0.0.0/24`.
    pub prefix: String,
    /// Next-hop address.
    pub next_hop: String,
}

impl Route {
    /// Key of the VPN instance this route depends on.
    pub fn vpn_key(&self) -> ResourceKey {
        ResourceKey::new(format!("{VPN_PREFIX}/{}", self.vpn))
    }
}

/// Programs routes into an in-process forwarding table.
pub struct RouteProgrammer {
    store: Arc<dyn DataStore>,
    fib: Mutex<BTreeMap<ResourceKey, Route>>,
}

impl core::fmt::Debug for RouteProgrammer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RouteProgrammer")
            .field("programmed", &self.fib().len())
            .finish_non_exhaustive()
    }
}

impl RouteProgrammer {
    /// Create a programmer checking VPN instances in `store`.
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            fib: Mutex::new(BTreeMap::new()),
        }
    }

    fn fib(&self) -> MutexGuard<'_, BTreeMap<ResourceKey, Route>> {
        self.fib.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes currently programmed, by key.
    pub fn programmed(&self) -> BTreeMap<ResourceKey, Route> {
        self.fib().clone()
    }

    /// Whether the route's VPN instance exists. Read failures count as absent.
    fn vpn_ready(&self, route: &Route) -> bool {
        match self.store.read(&route.vpn_key(), View::Desired) {
            Ok(record) => record.is_some(),
            Err(e) => {
                debug!(vpn = %route.vpn, error = %e, "vpn lookup failed");
                false
            }
        }
    }

    fn program(&self, key: &ResourceKey, route: &Route) -> Disposition {
        if !self.vpn_ready(route) {
            debug!(key = %key, vpn = %route.vpn, "vpn instance missing; deferring route");
            return Disposition::Defer(DeferRequest::listen(vec![DependencyCondition::present(
                route.vpn_key(),
                View::Desired,
            )]));
        }
        info!(key = %key, prefix = %route.prefix, next_hop = %route.next_hop, "route programmed");
        let _ = self.fib().insert(key.clone(), route.clone());
        Disposition::Done
    }
}

impl Consumer for RouteProgrammer {
    type Snapshot = Route;

    fn name(&self) -> &str {
        "routes"
    }

    fn on_add(&self, key: &ResourceKey, new: &Route) -> Disposition {
        self.program(key, new)
    }

    fn on_update(&self, key: &ResourceKey, _old: &Route, new: &Route) -> Disposition {
        self.program(key, new)
    }

    fn on_remove(&self, key: &ResourceKey, old: &Route) -> Disposition {
        if self.fib().remove(key).is_some() {
            info!(key = %key, prefix = %old.prefix, "route withdrawn");
        } else {
            debug!(key = %key, "remove for a route that was never programmed");
        }
        Disposition::Done
    }

    fn wildcard_path_of(&self, target: &ResourceKey) -> Option<ResourceKey> {
        if target.as_str().starts_with(VPN_PREFIX) {
            target.wildcard_last()
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use ldh_core::InMemoryStore;
    use serde_json::json;

    use super::*;

    fn route(vpn: &str) -> Route {
        Route {
            vpn: vpn.to_owned(),
            prefix: "10.0.0.0/24".to_owned(),
            next_hop: "192.0.2.1".to_owned(),
        }
    }

    fn programmer() -> (Arc<InMemoryStore>, RouteProgrammer) {
        let store = Arc::new(InMemoryStore::new());
        let programmer = RouteProgrammer::new(Arc::clone(&store) as Arc<dyn DataStore>);
        (store, programmer)
    }

    #[test]
    fn defers_until_vpn_exists() {
        let (_store, programmer) = programmer();
        let key = ResourceKey::new("/routes/blue/r1");
        let Disposition::Defer(request) = programmer.on_add(&key, &route("blue")) else {
            panic!("route without a vpn must defer");
        };
        assert_eq!(
            request.dependencies,
            vec![DependencyCondition::present("/vpn-instances/blue", View::Desired)]
        );
        assert!(!request.timer_based);
        assert!(programmer.programmed().is_empty());
    }

    #[test]
    fn programs_and_withdraws() {
        let (store, programmer) = programmer();
        let _ = store.put(View::Desired, "/vpn-instances/blue", json!({"rd": "65000:1"}));
        let key = ResourceKey::new("/routes/blue/r1");

        assert_eq!(programmer.on_add(&key, &route("blue")), Disposition::Done);
        assert_eq!(programmer.programmed().len(), 1);

        assert_eq!(programmer.on_remove(&key, &route("blue")), Disposition::Done);
        assert!(programmer.programmed().is_empty());
    }

    #[test]
    fn read_failure_defers() {
        let (store, programmer) = programmer();
        let _ = store.put(View::Desired, "/vpn-instances/blue", json!({}));
        store.set_read_failure(true);
        let key = ResourceKey::new("/routes/blue/r1");
        assert!(matches!(
            programmer.on_update(&key, &route("blue"), &route("blue")),
            Disposition::Defer(_)
        ));
    }

    #[test]
    fn vpn_targets_share_one_pattern() {
        let (_store, programmer) = programmer();
        assert_eq!(
            programmer.wildcard_path_of(&ResourceKey::new("/vpn-instances/blue")),
            Some(ResourceKey::new("/vpn-instances/*"))
        );
        assert_eq!(
            programmer.wildcard_path_of(&ResourceKey::new("/interfaces/eth0")),
            None
        );
    }
}
