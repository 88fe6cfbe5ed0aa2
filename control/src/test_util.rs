//! Shared typed-object fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

pub(crate) fn creation_time(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
}

/// Single-rule, single-path Ingress. `class` sets `spec.ingressClassName`;
/// pass `None` and add the legacy annotation yourself to exercise that path.
#[allow(clippy::too_many_arguments)]
pub(crate) fn ingress_fixture(
    uid: &str,
    namespace: &str,
    name: &str,
    class: Option<&str>,
    host: &str,
    path: &str,
    path_type: &str,
    service: &str,
    port_number: Option<i32>,
    port_name: Option<&str>,
) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            uid: Some(uid.to_string()),
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            creation_timestamp: Some(Time(creation_time(0))),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: class.map(str::to_string),
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(path.to_string()),
                        path_type: path_type.to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: port_number,
                                    name: port_name.map(str::to_string),
                                }),
                            }),
                            resource: None,
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn service_fixture(
    namespace: &str,
    name: &str,
    ports: &[(Option<&str>, i32, &str)],
) -> Service {
    Service {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port, protocol)| ServicePort {
                        name: port_name.map(str::to_string),
                        port: *port,
                        protocol: Some(protocol.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn endpoints_fixture(
    namespace: &str,
    name: &str,
    addresses: &[&str],
    ports: &[(Option<&str>, i32)],
) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                addresses
                    .iter()
                    .map(|ip| EndpointAddress {
                        ip: ip.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            not_ready_addresses: None,
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port)| EndpointPort {
                        name: port_name.map(str::to_string),
                        port: *port,
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
        }]),
    }
}
