//! Control-plane views of watched Kubernetes resources
//!
//! Watch events carry full typed objects; the store keeps only these reduced
//! models. A model is an immutable value - updates replace it wholesale,
//! nothing mutates a stored model in place.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::networking::v1::{HTTPIngressPath, Ingress, IngressRule as K8sIngressRule};
use kube::ResourceExt;

/// How an ingress path should be matched against request URLs.
///
/// Unknown `pathType` strings from the API fold into
/// `ImplementationSpecific`, which route building skips with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Exact,
    Prefix,
    ImplementationSpecific,
}

impl PathKind {
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("exact") {
            PathKind::Exact
        } else if raw.eq_ignore_ascii_case("prefix") {
            PathKind::Prefix
        } else {
            PathKind::ImplementationSpecific
        }
    }
}

/// One host/path routing rule entry of an Ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressPath {
    pub path: String,
    pub path_type: PathKind,
    pub backend_service: String,
    /// Numeric string or named service port, as declared on the Ingress.
    pub backend_port: String,
}

/// A host plus its paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

/// Reduced view of an Ingress accepted by the class filter.
///
/// Keyed in the store by `uid` - namespace/name can be reused after a
/// delete+recreate, the uid cannot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressModel {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub resource_version: Option<String>,
    pub created: DateTime<Utc>,
    pub rules: Vec<IngressRule>,
}

impl IngressModel {
    /// Build the model from a watched Ingress. `None` if the object is
    /// missing the metadata every persisted resource carries.
    pub fn from_ingress(ingress: &Ingress) -> Option<Self> {
        let uid = ingress.uid()?;
        let namespace = ingress.namespace()?;
        let name = ingress.metadata.name.clone()?;

        let created = ingress
            .creation_timestamp()
            .map(|t| t.0)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let rules = ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.rules.as_ref())
            .map(|rules| rules.iter().map(rule_model).collect())
            .unwrap_or_default();

        Some(Self {
            uid,
            namespace,
            name,
            resource_version: ingress.resource_version(),
            created,
            rules,
        })
    }
}

fn rule_model(rule: &K8sIngressRule) -> IngressRule {
    let paths = rule
        .http
        .as_ref()
        .map(|http| http.paths.iter().map(path_model).collect())
        .unwrap_or_default();

    IngressRule {
        host: rule.host.clone().unwrap_or_default(),
        paths,
    }
}

fn path_model(path: &HTTPIngressPath) -> IngressPath {
    let (backend_service, backend_port) = match &path.backend.service {
        Some(service) => {
            let port = match service.port.as_ref() {
                Some(port) => match (port.number, port.name.as_ref()) {
                    (Some(number), _) => number.to_string(),
                    (None, Some(name)) => name.clone(),
                    (None, None) => String::new(),
                },
                None => String::new(),
            };
            (service.name.clone(), port)
        }
        None => (String::new(), String::new()),
    };

    IngressPath {
        path: path.path.clone().unwrap_or_default(),
        path_type: PathKind::parse(&path.path_type),
        backend_service,
        backend_port,
    }
}

/// A resolved, concrete TCP port of a Service. Derived on demand during a
/// reconciliation pass, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortModel {
    pub namespace: String,
    pub service_name: String,
    pub port_name: Option<String>,
    pub protocol: String,
    pub port: i32,
}

impl ServicePortModel {
    pub fn from_service_port(port: &ServicePort, service_name: &str, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            service_name: service_name.to_string(),
            port_name: port.name.clone(),
            protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
            port: port.port,
        }
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("TCP")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::ingress_fixture;

    #[test]
    fn test_path_kind_parse_is_case_insensitive() {
        assert_eq!(PathKind::parse("Exact"), PathKind::Exact);
        assert_eq!(PathKind::parse("EXACT"), PathKind::Exact);
        assert_eq!(PathKind::parse("prefix"), PathKind::Prefix);
        assert_eq!(
            PathKind::parse("ImplementationSpecific"),
            PathKind::ImplementationSpecific
        );
        // Anything unrecognized folds into the skipped variant
        assert_eq!(PathKind::parse("Regex"), PathKind::ImplementationSpecific);
    }

    #[test]
    fn test_ingress_model_from_typed_object() {
        let ingress = ingress_fixture(
            "uid-1",
            "default",
            "web",
            None,
            "a.com",
            "/",
            "Prefix",
            "svc1",
            Some(80),
            None,
        );

        let model = IngressModel::from_ingress(&ingress).expect("model built");
        assert_eq!(model.uid, "uid-1");
        assert_eq!(model.namespace, "default");
        assert_eq!(model.name, "web");
        assert_eq!(model.rules.len(), 1);

        let rule = &model.rules[0];
        assert_eq!(rule.host, "a.com");
        assert_eq!(rule.paths.len(), 1);
        assert_eq!(rule.paths[0].backend_service, "svc1");
        assert_eq!(rule.paths[0].backend_port, "80");
        assert_eq!(rule.paths[0].path_type, PathKind::Prefix);
    }

    #[test]
    fn test_named_backend_port_survives_conversion() {
        let ingress = ingress_fixture(
            "uid-2",
            "default",
            "web",
            None,
            "a.com",
            "/",
            "Prefix",
            "svc1",
            None,
            Some("http"),
        );

        let model = IngressModel::from_ingress(&ingress).expect("model built");
        assert_eq!(model.rules[0].paths[0].backend_port, "http");
    }

    #[test]
    fn test_ingress_without_uid_is_rejected() {
        let mut ingress = ingress_fixture(
            "uid-3",
            "default",
            "web",
            None,
            "a.com",
            "/",
            "Prefix",
            "svc1",
            Some(80),
            None,
        );
        ingress.metadata.uid = None;

        assert!(IngressModel::from_ingress(&ingress).is_none());
    }

    #[test]
    fn test_service_port_model_defaults_protocol_to_tcp() {
        let port = ServicePort {
            name: Some("http".to_string()),
            port: 80,
            protocol: None,
            ..Default::default()
        };

        let model = ServicePortModel::from_service_port(&port, "svc1", "default");
        assert!(model.is_tcp());
        assert_eq!(model.port, 80);
        assert_eq!(model.port_name.as_deref(), Some("http"));
    }
}
