//! Resource Store - eventually-consistent mirror of watched cluster state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ResourceStore                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ingresses:  uid            → IngressModel   (class-filtered)    │
//! │  services:   "ns/name"      → Service                            │
//! │  endpoints:  "ns/name"      → Endpoints                          │
//! │                                                                  │
//! │  ChangeNotifier ── raised on every applied Ingress add/modify/   │
//! │                    delete, never for Services/Endpoints          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three independent watch loops (see [`watch`]) are the only writers; each
//! mutation is key-scoped, no lock spans multiple keys. The mirror may lag
//! the real cluster but never holds two entries for one uid, and deleting an
//! absent key is a no-op.

pub mod change;
pub mod watch;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::model::IngressModel;
use self::change::{ChangeNotifier, ChangeToken};

/// Legacy (pre-1.18) ingress class annotation, still honored alongside
/// `spec.ingressClassName`.
pub const LEGACY_INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Safe RwLock read helper that recovers from poisoning
#[inline]
pub(crate) fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during read, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Safe RwLock write helper that recovers from poisoning
#[inline]
pub(crate) fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during write, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Concurrent mirror of Ingress/Service/Endpoints state.
#[derive(Debug)]
pub struct ResourceStore {
    ingress_class: String,
    ingresses: RwLock<HashMap<String, IngressModel>>,
    services: RwLock<HashMap<String, Service>>,
    endpoints: RwLock<HashMap<String, Endpoints>>,
    notifier: ChangeNotifier,
}

impl ResourceStore {
    pub fn new(ingress_class: impl Into<String>) -> Self {
        Self {
            ingress_class: ingress_class.into(),
            ingresses: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(HashMap::new()),
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn ingress_class(&self) -> &str {
        &self.ingress_class
    }

    /// Subscribe to the current change generation. Fires exactly once, on
    /// the next applied Ingress mutation.
    pub fn change_token(&self) -> ChangeToken {
        self.notifier.token()
    }

    /// Apply a watched Ingress add/modify. Returns whether it was accepted
    /// by the class filter and stored.
    ///
    /// An ingress that previously matched and was since modified onto a
    /// different class is NOT retracted here; entries leave the store only
    /// on an explicit delete event.
    pub fn apply_ingress(&self, ingress: &Ingress) -> bool {
        if !self.matches_class(ingress) {
            debug!(
                namespace = %ingress.namespace().unwrap_or_default(),
                ingress = %ingress.name_any(),
                class = ?ingress.spec.as_ref().and_then(|s| s.ingress_class_name.as_deref()),
                "ignoring ingress outside our class"
            );
            return false;
        }

        let Some(model) = IngressModel::from_ingress(ingress) else {
            warn!(
                ingress = %ingress.name_any(),
                "ignoring ingress without uid/namespace/name metadata"
            );
            return false;
        };

        debug!(
            namespace = %model.namespace,
            ingress = %model.name,
            uid = %model.uid,
            rules = model.rules.len(),
            "storing ingress"
        );

        safe_write(&self.ingresses).insert(model.uid.clone(), model);
        self.notifier.raise();
        true
    }

    /// Apply a watched Ingress delete. Deleting an unknown uid is a no-op.
    pub fn delete_ingress(&self, ingress: &Ingress) {
        if !self.matches_class(ingress) {
            return;
        }

        let Some(uid) = ingress.uid() else {
            return;
        };

        let removed = safe_write(&self.ingresses).remove(&uid).is_some();
        if removed {
            debug!(uid = %uid, "removed ingress");
            self.notifier.raise();
        }
    }

    /// All stored ingresses, oldest created first (uid as tiebreak) so
    /// reconciliation output is deterministic for a fixed resource set.
    pub fn ingresses(&self) -> Vec<IngressModel> {
        let mut models: Vec<IngressModel> = safe_read(&self.ingresses).values().cloned().collect();
        models.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.uid.cmp(&b.uid)));
        models
    }

    pub fn ingress_count(&self) -> usize {
        safe_read(&self.ingresses).len()
    }

    pub fn apply_service(&self, service: &Service) {
        if let Some(key) = namespaced_key(service.namespace(), &service.name_any()) {
            safe_write(&self.services).insert(key, service.clone());
        }
    }

    pub fn delete_service(&self, service: &Service) {
        if let Some(key) = namespaced_key(service.namespace(), &service.name_any()) {
            safe_write(&self.services).remove(&key);
        }
    }

    pub fn apply_endpoints(&self, endpoints: &Endpoints) {
        if let Some(key) = namespaced_key(endpoints.namespace(), &endpoints.name_any()) {
            safe_write(&self.endpoints).insert(key, endpoints.clone());
        }
    }

    pub fn delete_endpoints(&self, endpoints: &Endpoints) {
        if let Some(key) = namespaced_key(endpoints.namespace(), &endpoints.name_any()) {
            safe_write(&self.endpoints).remove(&key);
        }
    }

    /// Cache probe only; the API fallback lives in [`StoreLookup`].
    pub fn cached_service(&self, namespace: &str, name: &str) -> Option<Service> {
        safe_read(&self.services)
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    pub fn cached_endpoints(&self, namespace: &str, name: &str) -> Option<Endpoints> {
        safe_read(&self.endpoints)
            .get(&format!("{}/{}", namespace, name))
            .cloned()
    }

    fn matches_class(&self, ingress: &Ingress) -> bool {
        let declared = ingress
            .spec
            .as_ref()
            .and_then(|spec| spec.ingress_class_name.as_deref())
            .is_some_and(|class| class.eq_ignore_ascii_case(&self.ingress_class));

        let legacy = ingress
            .annotations()
            .get(LEGACY_INGRESS_CLASS_ANNOTATION)
            .is_some_and(|class| class.eq_ignore_ascii_case(&self.ingress_class));

        declared || legacy
    }
}

fn namespaced_key(namespace: Option<String>, name: &str) -> Option<String> {
    namespace.map(|ns| format!("{}/{}", ns, name))
}

/// Service/Endpoints resolution used by the discoverer. The trait seam lets
/// tests run the translation against fixtures.
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, ControlError>;

    async fn get_endpoints(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoints>, ControlError>;
}

/// Cache-first lookup backed by the store, falling back to a direct point
/// query. The fallback covers the window after startup before the relevant
/// watch has delivered its initial listing.
pub struct StoreLookup {
    store: Arc<ResourceStore>,
    client: Client,
}

impl StoreLookup {
    pub fn new(store: Arc<ResourceStore>, client: Client) -> Self {
        Self { store, client }
    }
}

#[async_trait]
impl ResourceLookup for StoreLookup {
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, ControlError> {
        if let Some(service) = self.store.cached_service(namespace, name) {
            return Ok(Some(service));
        }

        debug!(namespace, name, "service cache miss, querying API");
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_endpoints(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Endpoints>, ControlError> {
        if let Some(endpoints) = self.store.cached_endpoints(namespace, name) {
            return Ok(Some(endpoints));
        }

        debug!(namespace, name, "endpoints cache miss, querying API");
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
