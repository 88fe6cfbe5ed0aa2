//! Config Provider - the reconciliation loop and snapshot publication
//!
//! The provider owns the single published configuration pointer. The loop
//! waits for a debounced change signal from the store (or the periodic
//! fallback timer), runs the discoverer, and - only when the content hash
//! actually changed - swaps in a new snapshot under the publication mutex
//! and fires the superseded snapshot's change token exactly once.
//!
//! A failed reconciliation pass is logged and the loop continues; the
//! previously published snapshot stays in effect. Stale-but-valid beats
//! fresh-but-broken.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::{BackendConfiguration, Cluster, ProxyRoute};

use crate::discovery::controller::IngressController;
use crate::discovery::debounce::Debouncer;
use crate::metrics::{record_reconciliation, record_snapshot_published};
use crate::store::change::ChangeToken;
use crate::store::ResourceStore;

/// Provider tuning knobs, lifted from [`crate::config::ControllerConfig`].
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub discovery_period: Duration,
    pub debounce_window: Duration,
    pub allow_start_before_discovery: bool,
}

/// One immutable published configuration generation plus the token that
/// fires when it is superseded.
#[derive(Debug)]
pub struct ConfigSnapshot {
    routes: Vec<ProxyRoute>,
    clusters: Vec<Cluster>,
    configuration_hash: u64,
    superseded: watch::Sender<bool>,
}

impl ConfigSnapshot {
    fn new(config: &BackendConfiguration) -> Self {
        let (superseded, _rx) = watch::channel(false);
        Self {
            routes: config.routes.clone(),
            clusters: config.clusters.clone(),
            configuration_hash: config.configuration_hash,
            superseded,
        }
    }

    pub fn routes(&self) -> &[ProxyRoute] {
        &self.routes
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn configuration_hash(&self) -> u64 {
        self.configuration_hash
    }

    /// Token scoped to this snapshot: fires once when the next snapshot
    /// replaces it.
    pub fn change_token(&self) -> ChangeToken {
        ChangeToken::from_receiver(self.superseded.subscribe())
    }
}

#[derive(Debug, Default)]
struct Published {
    snapshot: Option<Arc<ConfigSnapshot>>,
}

/// Orchestrates discovery and atomically publishes snapshots.
pub struct ConfigProvider {
    store: Arc<ResourceStore>,
    controller: IngressController,
    options: ProviderOptions,
    published: Mutex<Published>,
    populated: watch::Sender<bool>,
    reconcile_signal: Arc<Notify>,
    debouncer: Debouncer,
}

impl ConfigProvider {
    pub fn new(
        store: Arc<ResourceStore>,
        controller: IngressController,
        options: ProviderOptions,
    ) -> Self {
        let (populated, _rx) = watch::channel(false);
        let debouncer = Debouncer::new(options.debounce_window);

        Self {
            store,
            controller,
            options,
            published: Mutex::new(Published::default()),
            populated,
            reconcile_signal: Arc::new(Notify::new()),
            debouncer,
        }
    }

    /// Current snapshot for the data plane.
    ///
    /// Before the first reconciliation this either synthesizes an empty
    /// configuration (when starting before discovery is allowed) or waits
    /// for the first publication. Afterwards it never blocks.
    pub async fn get_config(&self) -> Arc<ConfigSnapshot> {
        if let Some(snapshot) = self.current() {
            return snapshot;
        }

        if self.options.allow_start_before_discovery {
            let mut published = self.lock_published();
            if published.snapshot.is_none() {
                debug!("synthesizing empty configuration before first discovery");
                self.swap_snapshot(&mut published, &BackendConfiguration::empty());
            }
            if let Some(snapshot) = published.snapshot.clone() {
                return snapshot;
            }
        }

        let mut populated_rx = self.populated.subscribe();
        loop {
            if let Some(snapshot) = self.current() {
                return snapshot;
            }
            if populated_rx.wait_for(|populated| *populated).await.is_err() {
                // Provider dropped mid-wait; hand out an empty snapshot so
                // the caller is not stranded.
                let mut published = self.lock_published();
                if published.snapshot.is_none() {
                    self.swap_snapshot(&mut published, &BackendConfiguration::empty());
                }
                if let Some(snapshot) = published.snapshot.clone() {
                    return snapshot;
                }
            }
        }
    }

    fn current(&self) -> Option<Arc<ConfigSnapshot>> {
        self.lock_published().snapshot.clone()
    }

    /// Reconciliation loop. Runs until shutdown; single instance per
    /// provider.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("kubernetes discovery loop starting");

        let forwarder = tokio::spawn(forward_change_signals(
            self.store.clone(),
            self.debouncer.clone(),
            self.reconcile_signal.clone(),
            shutdown.clone(),
        ));

        // Check for ingresses on startup without waiting for a change.
        self.reconcile_signal.notify_one();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("kubernetes discovery loop ending gracefully");
                    break;
                }
                _ = self.reconcile_signal.notified() => {}
                _ = tokio::time::sleep(self.options.discovery_period) => {
                    debug!("periodic discovery fallback");
                }
            }

            let started = Instant::now();
            let ingresses = self.store.ingresses();
            let config = self.controller.build_configuration(&ingresses).await;

            self.publish_if_changed(&config);
            record_reconciliation(started.elapsed().as_secs_f64(), "success");
        }

        self.debouncer.cancel();
        let _ = forwarder.await;
    }

    /// Swap in `config` unless its content hash matches what is already
    /// published. Swaps are serialized by the publication mutex, so readers
    /// never observe a snapshot older than one they already returned.
    fn publish_if_changed(&self, config: &BackendConfiguration) -> bool {
        let mut published = self.lock_published();

        let current_hash = published
            .snapshot
            .as_ref()
            .map(|snapshot| snapshot.configuration_hash);
        if current_hash == Some(config.configuration_hash) {
            debug!(
                hash = %format!("{:016x}", config.configuration_hash),
                "configuration unchanged, skipping publish"
            );
            return false;
        }

        self.swap_snapshot(&mut published, config);
        info!(%config, "published new configuration snapshot");
        true
    }

    fn swap_snapshot(&self, published: &mut MutexGuard<'_, Published>, config: &BackendConfiguration) {
        let next = Arc::new(ConfigSnapshot::new(config));
        let previous = published.snapshot.replace(next);

        // Exactly-once: the superseded snapshot's token fires only here.
        if let Some(previous) = previous {
            let _ = previous.superseded.send(true);
        }

        let _ = self.populated.send(true);
        record_snapshot_published();
    }

    fn lock_published(&self) -> MutexGuard<'_, Published> {
        self.published.lock().unwrap_or_else(|poisoned| {
            warn!("publication mutex poisoned, recovering (snapshot is still valid)");
            poisoned.into_inner()
        })
    }
}

/// Bridge store change generations into debounced reconcile triggers.
async fn forward_change_signals(
    store: Arc<ResourceStore>,
    debouncer: Debouncer,
    signal: Arc<Notify>,
    shutdown: CancellationToken,
) {
    loop {
        let token = store.change_token();

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = token.changed() => {}
        }

        let signal = signal.clone();
        debouncer.trigger(move || {
            info!("cluster state changed");
            signal.notify_one();
        });
        // Loop re-subscribes to the store's next generation.
    }
}
