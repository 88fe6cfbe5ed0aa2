//! Leader-gated Ingress status reporting
//!
//! While this replica holds leadership, the reporter periodically copies the
//! load-balancer address of the controller's own published Service onto
//! `status.loadBalancer` of every known Ingress. If the publish service
//! cannot be located the whole cycle is skipped - no partial writes. A
//! failure on one Ingress never blocks updates to the others, and a
//! leadership loss observed mid-cycle stops the remaining writes.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{LoadBalancerStatus, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ControllerIdentity;
use crate::store::ResourceStore;

pub struct StatusReporter {
    client: Client,
    store: Arc<ResourceStore>,
    identity: ControllerIdentity,
    interval: Duration,
    gate: watch::Receiver<bool>,
}

impl StatusReporter {
    pub fn new(
        client: Client,
        store: Arc<ResourceStore>,
        identity: ControllerIdentity,
        interval: Duration,
        gate: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            store,
            identity,
            interval,
            gate,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            publish_service = %self.identity.publish_service,
            interval_secs = self.interval.as_secs(),
            "status reporter starting"
        );

        loop {
            // Only the elected replica writes status.
            while !*self.gate.borrow() {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("status reporter shutting down");
                        return;
                    }
                    changed = self.gate.changed() => {
                        if changed.is_err() {
                            warn!("leadership gate closed, status reporter exiting");
                            return;
                        }
                    }
                }
            }

            self.report_status().await;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("status reporter shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    async fn report_status(&self) {
        let services: Api<Service> =
            Api::namespaced(self.client.clone(), &self.identity.pod_namespace);

        let publish_service = match services.get_opt(&self.identity.publish_service).await {
            Ok(Some(service)) => service,
            Ok(None) => {
                error!(
                    service = %self.identity.publish_service,
                    namespace = %self.identity.pod_namespace,
                    "failed to locate our publish service, skipping status cycle"
                );
                return;
            }
            Err(e) => {
                error!(
                    service = %self.identity.publish_service,
                    namespace = %self.identity.pod_namespace,
                    error = %e,
                    "failed to fetch our publish service, skipping status cycle"
                );
                return;
            }
        };

        let load_balancer = publish_service
            .status
            .and_then(|status| status.load_balancer)
            .unwrap_or_default();
        let patch = load_balancer_patch(&load_balancer);

        for ingress in self.store.ingresses() {
            if !*self.gate.borrow() {
                warn!("leadership lost mid-cycle, stopping status writes");
                return;
            }

            info!(
                namespace = %ingress.namespace,
                ingress = %ingress.name,
                address = %serde_json::to_string(&load_balancer).unwrap_or_default(),
                "updating ingress status"
            );

            let api: Api<Ingress> = Api::namespaced(self.client.clone(), &ingress.namespace);
            if let Err(e) = api
                .patch_status(&ingress.name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                // One failed Ingress must not block the rest.
                error!(
                    namespace = %ingress.namespace,
                    ingress = %ingress.name,
                    error = %e,
                    "failed to patch ingress status"
                );
            }
        }
    }
}

fn load_balancer_patch(load_balancer: &LoadBalancerStatus) -> serde_json::Value {
    json!({
        "status": {
            "loadBalancer": load_balancer,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PortStatus;

    #[test]
    fn test_load_balancer_patch_shape() {
        let load_balancer = LoadBalancerStatus {
            ingress: Some(vec![k8s_openapi::api::core::v1::LoadBalancerIngress {
                ip: Some("203.0.113.10".to_string()),
                hostname: None,
                ip_mode: None,
                ports: None::<Vec<PortStatus>>,
            }]),
        };

        let patch = load_balancer_patch(&load_balancer);
        assert_eq!(
            patch["status"]["loadBalancer"]["ingress"][0]["ip"],
            "203.0.113.10"
        );
    }

    #[test]
    fn test_empty_load_balancer_patch_clears_status() {
        let patch = load_balancer_patch(&LoadBalancerStatus::default());
        assert!(patch["status"]["loadBalancer"].is_object());
    }
}
