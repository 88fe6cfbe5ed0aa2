use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use control::config::ControllerConfig;
use control::discovery::{ConfigProvider, IngressController, ProviderOptions, RouteTableValidator};
use control::events;
use control::status::{LeaderElector, StatusReporter};
use control::store::watch::spawn_watchers;
use control::store::{ResourceStore, StoreLookup};

/// PORTTI control plane
///
/// Discovers Ingress routing state and publishes configuration snapshots
/// consumed by the forwarding data plane.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (needed for the Kubernetes TLS client)
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok(); // Ignore error if already installed

    tracing_subscriber::fmt::init();

    let config = ControllerConfig::from_env()?;
    info!(
        class = %config.ingress_class,
        discovery_period_secs = config.discovery_period_secs,
        "portti control plane starting"
    );

    let client = kube::Client::try_default().await?;
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    let identity = ControllerConfig::identity();
    let reporting_instance = identity
        .as_ref()
        .map(|id| id.pod_name.clone())
        .unwrap_or_else(|| "portti-control".to_string());

    // Event pipeline: bounded queue, single background sender.
    let (recorder, broadcaster) = events::event_pipeline(
        client.clone(),
        reporting_instance,
        config.event_queue_capacity,
    );
    handles.push(tokio::spawn(broadcaster.run(shutdown.clone())));

    // Resource mirror plus its three watch loops.
    let store = Arc::new(ResourceStore::new(&config.ingress_class));
    handles.extend(spawn_watchers(
        client.clone(),
        store.clone(),
        shutdown.clone(),
    ));

    // Discovery and snapshot publication.
    let lookup = Arc::new(StoreLookup::new(store.clone(), client.clone()));
    let controller = IngressController::new(lookup, Arc::new(RouteTableValidator), recorder);
    let provider = Arc::new(ConfigProvider::new(
        store.clone(),
        controller,
        ProviderOptions {
            discovery_period: config.discovery_period(),
            debounce_window: config.debounce_window(),
            allow_start_before_discovery: config.allow_start_before_discovery,
        },
    ));
    handles.push(tokio::spawn(provider.clone().run(shutdown.clone())));

    // Status reporting only runs with a downward-API identity, and only on
    // the elected replica.
    match identity {
        Some(identity) => {
            let elector = LeaderElector::new(
                client.clone(),
                identity.pod_namespace.clone(),
                identity.pod_name.clone(),
                &config.election,
            );
            let reporter = StatusReporter::new(
                client,
                store,
                identity,
                config.status_report_interval(),
                elector.subscribe(),
            );
            handles.push(tokio::spawn(elector.run(shutdown.clone())));
            handles.push(tokio::spawn(reporter.run(shutdown.clone())));
        }
        None => {
            warn!("POD_NAME/POD_NAMESPACE/PUBLISH_SERVICE not set, status reporting disabled");
        }
    }

    signal::ctrl_c().await?;
    info!("shutdown signal received");

    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
