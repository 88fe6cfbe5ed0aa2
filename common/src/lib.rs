//! PORTTI Common Types
//!
//! The routing configuration model shared between the control plane and the
//! request-forwarding data plane. The control plane builds immutable
//! [`BackendConfiguration`] snapshots from cluster state; the data plane only
//! ever reads them.
//!
//! Identifiers are deterministic so that repeated reconciliations of an
//! unchanged cluster produce byte-identical configurations:
//!
//! - cluster id: `"{service}.{namespace}:{port}"`
//! - destination key / route id: `"{cluster_id}/{ordinal}"`

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix appended to prefix-matched paths so the data plane treats the
/// remainder of the URL as a wildcard capture.
pub const CATCH_ALL_SUFFIX: &str = "{**catch-all}";

/// A single resolvable backend address, e.g. `http://10.0.0.5:8080`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub address: String,
}

/// A named group of backend destinations a route can forward to.
///
/// Destinations are keyed by `"{cluster_id}/{ordinal}"`. A `BTreeMap` keeps
/// enumeration deterministic for hashing and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub destinations: BTreeMap<String, Destination>,
}

impl Cluster {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            destinations: BTreeMap::new(),
        }
    }
}

/// Derive the deterministic cluster identifier for a service port.
pub fn cluster_id(service: &str, namespace: &str, port: i32) -> String {
    format!("{}.{}:{}", service, namespace, port)
}

/// Host/path predicate of a [`ProxyRoute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyMatch {
    pub hosts: Vec<String>,
    pub path: String,
}

/// A host/path match bound to a cluster id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRoute {
    pub route_id: String,
    pub cluster_id: String,
    #[serde(rename = "match")]
    pub route_match: ProxyMatch,
}

/// One complete, immutable routing configuration generation.
///
/// The only mutable aspect of the published configuration is *which*
/// `BackendConfiguration` is current; snapshots themselves are never edited
/// in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfiguration {
    pub routes: Vec<ProxyRoute>,
    pub clusters: Vec<Cluster>,
    pub configuration_hash: u64,
}

impl BackendConfiguration {
    /// Build a configuration from discovered parts, deriving the content hash.
    pub fn from_parts(routes: Vec<ProxyRoute>, clusters: Vec<Cluster>) -> Self {
        let configuration_hash = content_hash(&routes, &clusters);
        Self {
            routes,
            clusters,
            configuration_hash,
        }
    }

    /// The configuration published before discovery has produced anything.
    pub fn empty() -> Self {
        Self::from_parts(Vec::new(), Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.clusters.is_empty()
    }
}

impl fmt::Display for BackendConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} routes, {} clusters (hash {:016x})",
            self.routes.len(),
            self.clusters.len(),
            self.configuration_hash
        )
    }
}

/// FNV-1a hash function for consistent hashing
pub const fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Content hash over the canonical rendering of a configuration.
///
/// Two configurations with the same routes and clusters (in the same order)
/// hash identically, so the control plane can skip publishing a snapshot
/// whose content did not change.
fn content_hash(routes: &[ProxyRoute], clusters: &[Cluster]) -> u64 {
    let mut canonical = String::new();

    for route in routes {
        canonical.push_str("r|");
        canonical.push_str(&route.route_id);
        canonical.push('|');
        canonical.push_str(&route.cluster_id);
        canonical.push('|');
        for host in &route.route_match.hosts {
            canonical.push_str(host);
            canonical.push(',');
        }
        canonical.push('|');
        canonical.push_str(&route.route_match.path);
        canonical.push('\n');
    }

    for cluster in clusters {
        canonical.push_str("c|");
        canonical.push_str(&cluster.id);
        canonical.push('\n');
        for (key, destination) in &cluster.destinations {
            canonical.push_str("d|");
            canonical.push_str(key);
            canonical.push('|');
            canonical.push_str(&destination.address);
            canonical.push('\n');
        }
    }

    fnv1a_hash(canonical.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_route(route_id: &str, cluster: &str, host: &str, path: &str) -> ProxyRoute {
        ProxyRoute {
            route_id: route_id.to_string(),
            cluster_id: cluster.to_string(),
            route_match: ProxyMatch {
                hosts: vec![host.to_string()],
                path: path.to_string(),
            },
        }
    }

    fn sample_cluster(id: &str, addresses: &[&str]) -> Cluster {
        let mut cluster = Cluster::new(id);
        for (i, address) in addresses.iter().enumerate() {
            cluster.destinations.insert(
                format!("{}/{}", id, i),
                Destination {
                    address: address.to_string(),
                },
            );
        }
        cluster
    }

    #[test]
    fn test_fnv1a_hash_consistency() {
        let path1 = b"/api/users";
        let path2 = b"/api/users";
        let path3 = b"/api/orders";

        assert_eq!(fnv1a_hash(path1), fnv1a_hash(path2));
        assert_ne!(fnv1a_hash(path1), fnv1a_hash(path3));
    }

    #[test]
    fn test_cluster_id_derivation() {
        assert_eq!(cluster_id("svc1", "default", 80), "svc1.default:80");
    }

    #[test]
    fn test_content_hash_is_stable_for_identical_configs() {
        let a = BackendConfiguration::from_parts(
            vec![sample_route(
                "svc1.default:80/0",
                "svc1.default:80",
                "a.com",
                "/",
            )],
            vec![sample_cluster("svc1.default:80", &["http://10.0.0.5:80"])],
        );
        let b = BackendConfiguration::from_parts(
            vec![sample_route(
                "svc1.default:80/0",
                "svc1.default:80",
                "a.com",
                "/",
            )],
            vec![sample_cluster("svc1.default:80", &["http://10.0.0.5:80"])],
        );

        assert_eq!(a.configuration_hash, b.configuration_hash);
    }

    #[test]
    fn test_content_hash_changes_when_destinations_change() {
        let a = BackendConfiguration::from_parts(
            vec![],
            vec![sample_cluster("svc1.default:80", &["http://10.0.0.5:80"])],
        );
        let b = BackendConfiguration::from_parts(
            vec![],
            vec![sample_cluster(
                "svc1.default:80",
                &["http://10.0.0.5:80", "http://10.0.0.6:80"],
            )],
        );

        assert_ne!(a.configuration_hash, b.configuration_hash);
    }

    #[test]
    fn test_empty_configuration() {
        let empty = BackendConfiguration::empty();
        assert!(empty.is_empty());
        assert_eq!(
            empty.configuration_hash,
            BackendConfiguration::empty().configuration_hash
        );
    }

    #[test]
    fn test_route_match_serializes_with_match_key() {
        let route = sample_route("c/0", "c", "a.com", "/");
        let json = serde_json::to_value(&route).expect("route serializes");
        assert!(json.get("match").is_some());
    }
}
