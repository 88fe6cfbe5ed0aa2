//! Ingress discovery - translating cluster state into routing configuration
//!
//! ## How It Works
//!
//! 1. Walk every path of every rule of every Ingress, resolving each
//!    referenced Service once and enumerating its TCP ports
//! 2. For each service port, fetch its live Endpoints (missing endpoints
//!    skip that port, they do not fail the pass)
//! 3. Find the Ingress paths whose backend matches the port by number or by
//!    name, scoped to the same namespace
//! 4. Build one cluster per matched service port and one route per matched
//!    path, then validate both before accepting them
//!
//! Failure isolation is at cluster granularity: an invalid cluster is
//! excluded entirely, and one invalid route drops every route of its
//! cluster, because a malformed higher-priority route could otherwise
//! shadow a correct lower-priority one. Whatever survives is returned; the
//! provider decides whether the result differs from what is already
//! published.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, ObjectReference, Service};
use tracing::{debug, error, info, warn};

use common::{cluster_id, BackendConfiguration, Cluster, Destination, ProxyMatch, ProxyRoute,
    CATCH_ALL_SUFFIX};

use crate::discovery::validate::ConfigValidator;
use crate::error::ControlError;
use crate::events::{EventRecorder, EventType};
use crate::model::{IngressModel, IngressPath, PathKind, ServicePortModel};
use crate::store::ResourceLookup;

/// Pure translation from an Ingress snapshot to a [`BackendConfiguration`],
/// resolving Services/Endpoints through the store.
pub struct IngressController {
    lookup: Arc<dyn ResourceLookup>,
    validator: Arc<dyn ConfigValidator>,
    recorder: EventRecorder,
}

/// One Ingress path that matched a resolved service port.
struct MatchedPath<'a> {
    ingress: &'a IngressModel,
    host: &'a str,
    path: &'a IngressPath,
}

impl IngressController {
    pub fn new(
        lookup: Arc<dyn ResourceLookup>,
        validator: Arc<dyn ConfigValidator>,
        recorder: EventRecorder,
    ) -> Self {
        Self {
            lookup,
            validator,
            recorder,
        }
    }

    /// Run one discovery pass over a snapshot of the Ingress set.
    ///
    /// Deterministic for a fixed snapshot and fixed Service/Endpoints state.
    /// Any unexpected failure while enumerating services downgrades the pass
    /// to zero ingresses rather than propagating; per-item failures skip the
    /// item.
    pub async fn build_configuration(&self, ingresses: &[IngressModel]) -> BackendConfiguration {
        let (ingresses, service_ports) = match self.find_services_and_ports(ingresses).await {
            Ok(service_ports) => (ingresses, service_ports),
            Err(e) => {
                error!(
                    error = %e,
                    "could not enumerate services from Kubernetes, continuing with zero ingresses"
                );
                (&[][..], Vec::new())
            }
        };

        let mut clusters: Vec<Cluster> = Vec::new();
        let mut cluster_ids: HashSet<String> = HashSet::new();
        let mut routes: Vec<ProxyRoute> = Vec::new();

        for service_port in &service_ports {
            if let Err(e) = self
                .process_service_port(
                    service_port,
                    ingresses,
                    &mut clusters,
                    &mut cluster_ids,
                    &mut routes,
                )
                .await
            {
                // Not the consumer's problem: whatever was published before
                // stays in effect for this cluster.
                error!(
                    namespace = %service_port.namespace,
                    service = %service_port.service_name,
                    error = %e,
                    "error processing service, skipping"
                );
            }
        }

        for ingress in ingresses {
            self.recorder
                .create_event(
                    ingress_ref(ingress),
                    EventType::Normal,
                    "Sync",
                    "Scheduled for sync",
                )
                .await;
        }

        info!(
            clusters = clusters.len(),
            routes = routes.len(),
            "discovered backends and routes"
        );

        BackendConfiguration::from_parts(routes, clusters)
    }

    /// Resolve every referenced Service once and enumerate its TCP ports.
    ///
    /// Returns one `ServicePortModel` per unique `(service, port)` pair, in
    /// first-encounter order so downstream output is deterministic.
    async fn find_services_and_ports(
        &self,
        ingresses: &[IngressModel],
    ) -> Result<Vec<ServicePortModel>, ControlError> {
        let mut located: HashMap<String, Option<Service>> = HashMap::new();
        let mut seen_ports: HashSet<String> = HashSet::new();
        let mut service_ports = Vec::new();

        for ingress in ingresses {
            for rule in &ingress.rules {
                for path in &rule.paths {
                    if path.backend_service.is_empty() {
                        continue;
                    }

                    let service_key =
                        format!("{}.{}", ingress.namespace, path.backend_service);

                    if !located.contains_key(&service_key) {
                        let service = self
                            .lookup
                            .get_service(&ingress.namespace, &path.backend_service)
                            .await?;
                        if service.is_none() {
                            warn!(
                                namespace = %ingress.namespace,
                                service = %path.backend_service,
                                "referenced service not found"
                            );
                        }
                        located.insert(service_key.clone(), service);
                    }

                    let Some(Some(service)) = located.get(&service_key) else {
                        continue;
                    };
                    let Some(ports) = service.spec.as_ref().and_then(|s| s.ports.as_ref())
                    else {
                        continue;
                    };

                    for port in ports {
                        let model = ServicePortModel::from_service_port(
                            port,
                            &path.backend_service,
                            &ingress.namespace,
                        );
                        // Only TCP ports are routable.
                        if !model.is_tcp() {
                            continue;
                        }
                        let port_key = format!("{}-{}", service_key, model.port);
                        if seen_ports.insert(port_key) {
                            service_ports.push(model);
                        }
                    }
                }
            }
        }

        Ok(service_ports)
    }

    async fn process_service_port(
        &self,
        service_port: &ServicePortModel,
        ingresses: &[IngressModel],
        clusters: &mut Vec<Cluster>,
        cluster_ids: &mut HashSet<String>,
        routes: &mut Vec<ProxyRoute>,
    ) -> Result<(), ControlError> {
        let Some(endpoints) = self
            .lookup
            .get_endpoints(&service_port.namespace, &service_port.service_name)
            .await?
        else {
            warn!(
                namespace = %service_port.namespace,
                service = %service_port.service_name,
                "no endpoints found for service"
            );
            return Ok(());
        };

        let matches = find_matching_paths(service_port, ingresses);
        if matches.is_empty() {
            return Ok(());
        }

        debug!(
            namespace = %service_port.namespace,
            service = %service_port.service_name,
            port = service_port.port,
            matches = matches.len(),
            "found matching ingress paths for service port"
        );

        let id = cluster_id(
            &service_port.service_name,
            &service_port.namespace,
            service_port.port,
        );

        let cluster = build_cluster(&id, service_port, &endpoints);
        let cluster_violations = self.validator.validate_cluster(&cluster);
        if !cluster_violations.is_empty() {
            return Err(ControlError::ClusterValidation {
                id,
                violations: cluster_violations,
            });
        }

        if cluster_ids.contains(&id) {
            // First definition wins.
            return Err(ControlError::DuplicateCluster { id });
        }

        let built = build_routes(&id, &matches);
        let mut route_violations = Vec::new();
        for route in &built {
            route_violations.extend(self.validator.validate_route(route));
        }

        cluster_ids.insert(id.clone());
        clusters.push(cluster);

        if !route_violations.is_empty() {
            // All-or-nothing: the cluster stays, its routes do not.
            return Err(ControlError::RouteValidation {
                id,
                violations: route_violations,
            });
        }

        routes.extend(built);
        Ok(())
    }
}

/// Ingress paths referencing this service port, by number or by name,
/// scoped to the service's namespace. `ImplementationSpecific` paths never
/// match.
fn find_matching_paths<'a>(
    service_port: &ServicePortModel,
    ingresses: &'a [IngressModel],
) -> Vec<MatchedPath<'a>> {
    let mut matches = Vec::new();

    for ingress in ingresses {
        if ingress.namespace != service_port.namespace {
            continue;
        }

        for rule in &ingress.rules {
            for path in &rule.paths {
                if path.backend_service != service_port.service_name {
                    continue;
                }
                if path.path_type == PathKind::ImplementationSpecific {
                    continue;
                }

                let by_number = path
                    .backend_port
                    .parse::<i32>()
                    .map(|port| port == service_port.port)
                    .unwrap_or(false);
                let by_name = service_port
                    .port_name
                    .as_deref()
                    .is_some_and(|name| path.backend_port.eq_ignore_ascii_case(name));

                if by_number || by_name {
                    matches.push(MatchedPath {
                        ingress,
                        host: &rule.host,
                        path,
                    });
                }
            }
        }
    }

    matches
}

/// One destination per ready address whose endpoint port matches the
/// service port by number (or by name, for named service ports).
fn build_cluster(id: &str, service_port: &ServicePortModel, endpoints: &Endpoints) -> Cluster {
    let mut cluster = Cluster::new(id);
    let mut destination_index = 0usize;

    let Some(subsets) = &endpoints.subsets else {
        return cluster;
    };

    for subset in subsets {
        let Some(ports) = &subset.ports else {
            continue;
        };

        for port in ports {
            let matched = match service_port.port_name.as_deref() {
                Some(name) if !name.is_empty() => port.name.as_deref() == Some(name),
                _ => port.port == service_port.port,
            };
            if !matched {
                continue;
            }

            // Only ready addresses become destinations.
            let Some(addresses) = &subset.addresses else {
                continue;
            };
            for address in addresses {
                cluster.destinations.insert(
                    format!("{}/{}", id, destination_index),
                    Destination {
                        address: format!("http://{}:{}", address.ip, port.port),
                    },
                );
                destination_index += 1;
            }
        }
    }

    cluster
}

/// One route per matched path. Exhaustive over the path kind: anything
/// other than `Prefix`/`Exact` is dropped with a warning, never an error.
fn build_routes(cluster: &str, matches: &[MatchedPath<'_>]) -> Vec<ProxyRoute> {
    let mut routes = Vec::new();
    let mut route_index = 0usize;

    for matched in matches {
        let path = match matched.path.path_type {
            PathKind::Prefix => format!("{}{}", matched.path.path, CATCH_ALL_SUFFIX),
            PathKind::Exact => matched.path.path.clone(),
            PathKind::ImplementationSpecific => {
                warn!(
                    namespace = %matched.ingress.namespace,
                    ingress = %matched.ingress.name,
                    "unsupported ingress path type, dropping route"
                );
                continue;
            }
        };

        routes.push(ProxyRoute {
            route_id: format!("{}/{}", cluster, route_index),
            cluster_id: cluster.to_string(),
            route_match: ProxyMatch {
                hosts: vec![matched.host.to_string()],
                path,
            },
        });
        route_index += 1;
    }

    routes
}

fn ingress_ref(ingress: &IngressModel) -> ObjectReference {
    ObjectReference {
        api_version: Some("networking.k8s.io/v1".to_string()),
        kind: Some("Ingress".to_string()),
        name: Some(ingress.name.clone()),
        namespace: Some(ingress.namespace.clone()),
        uid: Some(ingress.uid.clone()),
        resource_version: ingress.resource_version.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::validate::RouteTableValidator;
    use crate::events;
    use crate::model::{IngressRule, PathKind};
    use crate::test_util::{endpoints_fixture, service_fixture};
    use async_trait::async_trait;

    struct FixtureLookup {
        services: HashMap<(String, String), Service>,
        endpoints: HashMap<(String, String), Endpoints>,
    }

    impl FixtureLookup {
        fn new() -> Self {
            Self {
                services: HashMap::new(),
                endpoints: HashMap::new(),
            }
        }

        fn with_service(mut self, namespace: &str, name: &str, service: Service) -> Self {
            self.services
                .insert((namespace.to_string(), name.to_string()), service);
            self
        }

        fn with_endpoints(mut self, namespace: &str, name: &str, endpoints: Endpoints) -> Self {
            self.endpoints
                .insert((namespace.to_string(), name.to_string()), endpoints);
            self
        }
    }

    #[async_trait]
    impl ResourceLookup for FixtureLookup {
        async fn get_service(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<Service>, ControlError> {
            Ok(self
                .services
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }

        async fn get_endpoints(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<Endpoints>, ControlError> {
            Ok(self
                .endpoints
                .get(&(namespace.to_string(), name.to_string()))
                .cloned())
        }
    }

    /// Lookup whose service enumeration always fails, for the whole-pass
    /// downgrade behavior.
    struct FailingLookup;

    #[async_trait]
    impl ResourceLookup for FailingLookup {
        async fn get_service(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<Option<Service>, ControlError> {
            Err(ControlError::Config("api unavailable".to_string()))
        }

        async fn get_endpoints(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<Option<Endpoints>, ControlError> {
            Err(ControlError::Config("api unavailable".to_string()))
        }
    }

    /// Validator that rejects selected clusters, or routes whose match path
    /// contains a marker.
    #[derive(Default)]
    struct RejectingValidator {
        bad_cluster: Option<String>,
        bad_route_path_marker: Option<String>,
    }

    impl ConfigValidator for RejectingValidator {
        fn validate_cluster(&self, cluster: &Cluster) -> Vec<String> {
            match &self.bad_cluster {
                Some(id) if *id == cluster.id => vec!["rejected by test".to_string()],
                _ => Vec::new(),
            }
        }

        fn validate_route(&self, route: &ProxyRoute) -> Vec<String> {
            match &self.bad_route_path_marker {
                Some(marker) if route.route_match.path.contains(marker.as_str()) => {
                    vec!["rejected by test".to_string()]
                }
                _ => Vec::new(),
            }
        }
    }

    fn path(path: &str, kind: PathKind, service: &str, port: &str) -> IngressPath {
        IngressPath {
            path: path.to_string(),
            path_type: kind,
            backend_service: service.to_string(),
            backend_port: port.to_string(),
        }
    }

    fn model(uid: &str, namespace: &str, name: &str, host: &str, paths: Vec<IngressPath>) -> IngressModel {
        IngressModel {
            uid: uid.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            resource_version: Some("1".to_string()),
            created: crate::test_util::creation_time(0),
            rules: vec![IngressRule {
                host: host.to_string(),
                paths,
            }],
        }
    }

    fn controller(
        lookup: impl ResourceLookup + 'static,
        validator: impl ConfigValidator + 'static,
    ) -> (IngressController, tokio::sync::mpsc::Receiver<events::KubeEvent>) {
        let (recorder, rx) = events::channel(64);
        (
            IngressController::new(Arc::new(lookup), Arc::new(validator), recorder),
            rx,
        )
    }

    fn single_backend_lookup() -> FixtureLookup {
        FixtureLookup::new()
            .with_service(
                "default",
                "svc1",
                service_fixture("default", "svc1", &[(None, 80, "TCP")]),
            )
            .with_endpoints(
                "default",
                "svc1",
                endpoints_fixture("default", "svc1", &["10.0.0.5"], &[(None, 80)]),
            )
    }

    #[tokio::test]
    async fn test_single_prefix_ingress_end_to_end() {
        let (controller, mut event_rx) =
            controller(single_backend_lookup(), RouteTableValidator);
        let ingresses = vec![model(
            "uid-1",
            "default",
            "web",
            "a.com",
            vec![path("/", PathKind::Prefix, "svc1", "80")],
        )];

        let config = controller.build_configuration(&ingresses).await;

        assert_eq!(config.clusters.len(), 1);
        let cluster = &config.clusters[0];
        assert_eq!(cluster.id, "svc1.default:80");
        assert_eq!(cluster.destinations.len(), 1);
        assert_eq!(
            cluster.destinations["svc1.default:80/0"].address,
            "http://10.0.0.5:80"
        );

        assert_eq!(config.routes.len(), 1);
        let route = &config.routes[0];
        assert_eq!(route.route_id, "svc1.default:80/0");
        assert_eq!(route.cluster_id, "svc1.default:80");
        assert_eq!(route.route_match.hosts, vec!["a.com".to_string()]);
        assert_eq!(route.route_match.path, "/{**catch-all}");

        // One Sync event per processed ingress.
        let event = event_rx.recv().await.expect("sync event recorded");
        assert_eq!(event.reason, "Sync");
        assert_eq!(event.regarding.name.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn test_reconcile_is_deterministic() {
        let lookup = || {
            FixtureLookup::new()
                .with_service(
                    "default",
                    "svc1",
                    service_fixture("default", "svc1", &[(None, 80, "TCP")]),
                )
                .with_endpoints(
                    "default",
                    "svc1",
                    endpoints_fixture("default", "svc1", &["10.0.0.5", "10.0.0.6"], &[(None, 80)]),
                )
                .with_service(
                    "default",
                    "svc2",
                    service_fixture("default", "svc2", &[(None, 8080, "TCP")]),
                )
                .with_endpoints(
                    "default",
                    "svc2",
                    endpoints_fixture("default", "svc2", &["10.0.1.5"], &[(None, 8080)]),
                )
        };
        let ingresses = vec![
            model(
                "uid-1",
                "default",
                "web",
                "a.com",
                vec![path("/", PathKind::Prefix, "svc1", "80")],
            ),
            model(
                "uid-2",
                "default",
                "api",
                "b.com",
                vec![path("/api", PathKind::Prefix, "svc2", "8080")],
            ),
        ];

        let (first_controller, _rx1) = controller(lookup(), RouteTableValidator);
        let (second_controller, _rx2) = controller(lookup(), RouteTableValidator);

        let first = first_controller.build_configuration(&ingresses).await;
        let second = second_controller.build_configuration(&ingresses).await;

        assert_eq!(first.routes, second.routes);
        assert_eq!(first.clusters, second.clusters);
        assert_eq!(first.configuration_hash, second.configuration_hash);
    }

    #[tokio::test]
    async fn test_exact_path_is_literal() {
        let (controller, _rx) = controller(single_backend_lookup(), RouteTableValidator);
        let ingresses = vec![model(
            "uid-1",
            "default",
            "web",
            "a.com",
            vec![path("/login", PathKind::Exact, "svc1", "80")],
        )];

        let config = controller.build_configuration(&ingresses).await;
        assert_eq!(config.routes[0].route_match.path, "/login");
    }

    #[tokio::test]
    async fn test_implementation_specific_paths_never_match() {
        let (controller, _rx) = controller(single_backend_lookup(), RouteTableValidator);
        let ingresses = vec![model(
            "uid-1",
            "default",
            "web",
            "a.com",
            vec![path("/", PathKind::ImplementationSpecific, "svc1", "80")],
        )];

        let config = controller.build_configuration(&ingresses).await;
        assert!(config.clusters.is_empty());
        assert!(config.routes.is_empty());
    }

    #[tokio::test]
    async fn test_named_port_matches_by_name() {
        let lookup = FixtureLookup::new()
            .with_service(
                "default",
                "svc1",
                service_fixture("default", "svc1", &[(Some("http"), 8080, "TCP")]),
            )
            .with_endpoints(
                "default",
                "svc1",
                endpoints_fixture("default", "svc1", &["10.0.0.5"], &[(Some("http"), 8080)]),
            );
        let (controller, _rx) = controller(lookup, RouteTableValidator);
        let ingresses = vec![model(
            "uid-1",
            "default",
            "web",
            "a.com",
            vec![path("/", PathKind::Prefix, "svc1", "http")],
        )];

        let config = controller.build_configuration(&ingresses).await;
        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.clusters[0].id, "svc1.default:8080");
        assert_eq!(config.routes.len(), 1);
    }

    #[tokio::test]
    async fn test_non_tcp_ports_are_ignored() {
        let lookup = FixtureLookup::new()
            .with_service(
                "default",
                "svc1",
                service_fixture("default", "svc1", &[(None, 80, "UDP")]),
            )
            .with_endpoints(
                "default",
                "svc1",
                endpoints_fixture("default", "svc1", &["10.0.0.5"], &[(None, 80)]),
            );
        let (controller, _rx) = controller(lookup, RouteTableValidator);
        let ingresses = vec![model(
            "uid-1",
            "default",
            "web",
            "a.com",
            vec![path("/", PathKind::Prefix, "svc1", "80")],
        )];

        let config = controller.build_configuration(&ingresses).await;
        assert!(config.clusters.is_empty());
    }

    #[tokio::test]
    async fn test_missing_endpoints_skip_service_not_pass() {
        let lookup = FixtureLookup::new()
            .with_service(
                "default",
                "svc1",
                service_fixture("default", "svc1", &[(None, 80, "TCP")]),
            )
            // svc1 has no endpoints at all
            .with_service(
                "default",
                "svc2",
                service_fixture("default", "svc2", &[(None, 8080, "TCP")]),
            )
            .with_endpoints(
                "default",
                "svc2",
                endpoints_fixture("default", "svc2", &["10.0.1.5"], &[(None, 8080)]),
            );
        let (controller, _rx) = controller(lookup, RouteTableValidator);
        let ingresses = vec![
            model(
                "uid-1",
                "default",
                "web",
                "a.com",
                vec![path("/", PathKind::Prefix, "svc1", "80")],
            ),
            model(
                "uid-2",
                "default",
                "api",
                "b.com",
                vec![path("/", PathKind::Prefix, "svc2", "8080")],
            ),
        ];

        let config = controller.build_configuration(&ingresses).await;
        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.clusters[0].id, "svc2.default:8080");
    }

    #[tokio::test]
    async fn test_invalid_cluster_is_isolated() {
        let lookup = FixtureLookup::new()
            .with_service(
                "default",
                "svc1",
                service_fixture("default", "svc1", &[(None, 80, "TCP")]),
            )
            .with_endpoints(
                "default",
                "svc1",
                endpoints_fixture("default", "svc1", &["10.0.0.5"], &[(None, 80)]),
            )
            .with_service(
                "default",
                "svc2",
                service_fixture("default", "svc2", &[(None, 8080, "TCP")]),
            )
            .with_endpoints(
                "default",
                "svc2",
                endpoints_fixture("default", "svc2", &["10.0.1.5"], &[(None, 8080)]),
            );
        let validator = RejectingValidator {
            bad_cluster: Some("svc1.default:80".to_string()),
            ..Default::default()
        };
        let (controller, _rx) = controller(lookup, validator);
        let ingresses = vec![
            model(
                "uid-1",
                "default",
                "web",
                "a.com",
                vec![path("/", PathKind::Prefix, "svc1", "80")],
            ),
            model(
                "uid-2",
                "default",
                "api",
                "b.com",
                vec![path("/", PathKind::Prefix, "svc2", "8080")],
            ),
        ];

        let config = controller.build_configuration(&ingresses).await;

        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.clusters[0].id, "svc2.default:8080");
        assert!(config
            .routes
            .iter()
            .all(|route| route.cluster_id != "svc1.default:80"));
    }

    #[tokio::test]
    async fn test_one_bad_route_drops_all_routes_for_cluster() {
        let (controller, _rx) = controller(
            single_backend_lookup(),
            RejectingValidator {
                bad_route_path_marker: Some("/bad".to_string()),
                ..Default::default()
            },
        );
        // Two candidate routes for the same cluster, one of which the
        // validator rejects.
        let ingresses = vec![model(
            "uid-1",
            "default",
            "web",
            "a.com",
            vec![
                path("/good", PathKind::Exact, "svc1", "80"),
                path("/bad", PathKind::Exact, "svc1", "80"),
            ],
        )];

        let config = controller.build_configuration(&ingresses).await;

        // The cluster survives; every route for it is dropped.
        assert_eq!(config.clusters.len(), 1);
        assert!(config.routes.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_cluster_keeps_first_definition() {
        let (controller, _rx) = controller(single_backend_lookup(), RouteTableValidator);
        let ingresses = vec![model(
            "uid-1",
            "default",
            "web",
            "a.com",
            vec![path("/", PathKind::Prefix, "svc1", "80")],
        )];
        let service_port = ServicePortModel {
            namespace: "default".to_string(),
            service_name: "svc1".to_string(),
            port_name: None,
            protocol: "TCP".to_string(),
            port: 80,
        };

        let mut clusters = Vec::new();
        let mut cluster_ids = HashSet::new();
        let mut routes = Vec::new();

        controller
            .process_service_port(
                &service_port,
                &ingresses,
                &mut clusters,
                &mut cluster_ids,
                &mut routes,
            )
            .await
            .expect("first definition accepted");

        let second = controller
            .process_service_port(
                &service_port,
                &ingresses,
                &mut clusters,
                &mut cluster_ids,
                &mut routes,
            )
            .await;

        assert!(matches!(
            second,
            Err(ControlError::DuplicateCluster { .. })
        ));
        assert_eq!(clusters.len(), 1);
    }

    #[tokio::test]
    async fn test_service_enumeration_failure_downgrades_to_zero_ingresses() {
        let (controller, mut event_rx) = controller(FailingLookup, RouteTableValidator);
        let ingresses = vec![model(
            "uid-1",
            "default",
            "web",
            "a.com",
            vec![path("/", PathKind::Prefix, "svc1", "80")],
        )];

        let config = controller.build_configuration(&ingresses).await;

        assert!(config.routes.is_empty());
        assert!(config.clusters.is_empty());
        // No ingress counted as processed, so no Sync events either.
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cross_namespace_paths_do_not_match() {
        let (controller, _rx) = controller(single_backend_lookup(), RouteTableValidator);
        // Same service name, different namespace: must not match svc1 in
        // "default".
        let ingresses = vec![
            model(
                "uid-1",
                "default",
                "web",
                "a.com",
                vec![path("/", PathKind::Prefix, "svc1", "80")],
            ),
            model(
                "uid-2",
                "staging",
                "web",
                "stage.a.com",
                vec![path("/", PathKind::Prefix, "svc1", "80")],
            ),
        ];

        let config = controller.build_configuration(&ingresses).await;

        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.routes[0].route_match.hosts, vec!["a.com".to_string()]);
    }
}
