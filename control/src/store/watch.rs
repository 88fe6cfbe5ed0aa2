//! Watch loops feeding the resource store
//!
//! One independent, infinitely-retried subscription per resource kind, so a
//! failure on one kind's stream never stalls the others. Streams are
//! re-established on termination or transient error; cancellation exits the
//! loop cleanly.

use std::fmt::Debug;
use std::sync::Arc;

use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ResourceStore;
use crate::metrics::record_watch_event;

/// Spawn the three cluster-wide watch loops.
pub fn spawn_watchers(
    client: Client,
    store: Arc<ResourceStore>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let ingress_api: Api<Ingress> = Api::all(client.clone());
    let service_api: Api<Service> = Api::all(client.clone());
    let endpoints_api: Api<Endpoints> = Api::all(client);

    vec![
        tokio::spawn(run_watch(
            "Ingress",
            ingress_api,
            store.clone(),
            shutdown.clone(),
            |store, op, ingress| match op {
                WatchOp::Apply => {
                    store.apply_ingress(ingress);
                }
                WatchOp::Delete => store.delete_ingress(ingress),
            },
        )),
        tokio::spawn(run_watch(
            "Service",
            service_api,
            store.clone(),
            shutdown.clone(),
            |store, op, service| match op {
                WatchOp::Apply => store.apply_service(service),
                WatchOp::Delete => store.delete_service(service),
            },
        )),
        tokio::spawn(run_watch(
            "Endpoints",
            endpoints_api,
            store,
            shutdown,
            |store, op, endpoints| match op {
                WatchOp::Apply => store.apply_endpoints(endpoints),
                WatchOp::Delete => store.delete_endpoints(endpoints),
            },
        )),
    ]
}

#[derive(Debug, Clone, Copy)]
enum WatchOp {
    Apply,
    Delete,
}

impl WatchOp {
    fn as_str(&self) -> &'static str {
        match self {
            WatchOp::Apply => "apply",
            WatchOp::Delete => "delete",
        }
    }
}

/// Single watch loop: subscribe, apply events, resubscribe forever.
async fn run_watch<K, F>(
    kind: &'static str,
    api: Api<K>,
    store: Arc<ResourceStore>,
    shutdown: CancellationToken,
    apply: F,
) where
    K: kube::Resource + Clone + Debug + serde::de::DeserializeOwned + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
    F: Fn(&ResourceStore, WatchOp, &K),
{
    info!(kind, "starting watch");

    loop {
        if shutdown.is_cancelled() {
            info!(kind, "watch shutting down");
            return;
        }

        let stream = watcher(api.clone(), WatcherConfig::default());
        pin_mut!(stream);

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(kind, "watch shutting down");
                    return;
                }
                event = stream.next() => event,
            };

            match event {
                Some(Ok(watcher::Event::Apply(object)))
                | Some(Ok(watcher::Event::InitApply(object))) => {
                    apply(&store, WatchOp::Apply, &object);
                    record_watch_event(kind, WatchOp::Apply.as_str());
                }
                Some(Ok(watcher::Event::Delete(object))) => {
                    apply(&store, WatchOp::Delete, &object);
                    record_watch_event(kind, WatchOp::Delete.as_str());
                }
                Some(Ok(watcher::Event::Init)) => {
                    debug!(kind, "watch (re)listing");
                }
                Some(Ok(watcher::Event::InitDone)) => {
                    info!(kind, "watch initial sync complete");
                }
                Some(Err(e)) => {
                    // Transient: the watcher resumes internally, we just log.
                    warn!(kind, error = %e, "watch error");
                }
                None => {
                    warn!(kind, "watch stream ended, resubscribing");
                    break;
                }
            }
        }
    }
}
