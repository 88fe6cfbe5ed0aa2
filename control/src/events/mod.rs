//! Asynchronous cluster-event pipeline
//!
//! Components record events through [`EventRecorder`], which only enqueues
//! onto a bounded channel; a single [`EventBroadcaster`] drains the queue
//! and performs the network writes. Kubernetes events are best-effort
//! telemetry: a failed write is logged and the event dropped, never
//! requeued, and a slow API server back-pressures producers no further than
//! enqueue time on a full queue.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::api::events::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::record_kube_event;

/// `reportingController` value stamped on every emitted event.
pub const REPORTING_CONTROLLER: &str = "portti.io/ingress-controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// A recorded event, alive only until the broadcaster drains it.
#[derive(Debug, Clone)]
pub struct KubeEvent {
    pub regarding: ObjectReference,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Build the recorder/broadcaster pair sharing one bounded queue.
pub fn event_pipeline(
    client: Client,
    reporting_instance: String,
    capacity: usize,
) -> (EventRecorder, EventBroadcaster) {
    let (recorder, rx) = channel(capacity);
    let broadcaster = EventBroadcaster {
        rx,
        client,
        reporting_instance,
    };
    (recorder, broadcaster)
}

/// Recorder plus the raw receiving end, for callers that drain the queue
/// themselves (tests, mainly).
pub fn channel(capacity: usize) -> (EventRecorder, mpsc::Receiver<KubeEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventRecorder { tx }, rx)
}

/// Fire-and-forget producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    tx: mpsc::Sender<KubeEvent>,
}

impl EventRecorder {
    /// Enqueue an event. Returns once the event is queued; waits only when
    /// the queue is at capacity.
    pub async fn create_event(
        &self,
        regarding: ObjectReference,
        event_type: EventType,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let event = KubeEvent {
            regarding,
            timestamp: Utc::now(),
            event_type,
            reason: reason.into(),
            message: message.into(),
        };

        if self.tx.send(event).await.is_err() {
            warn!("event pipeline closed, dropping event");
            record_kube_event("dropped");
        }
    }
}

/// Single background consumer performing the actual API writes.
pub struct EventBroadcaster {
    rx: mpsc::Receiver<KubeEvent>,
    client: Client,
    reporting_instance: String,
}

impl EventBroadcaster {
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("event broadcaster starting");

        loop {
            let item = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("event broadcaster shutting down");
                    return;
                }
                item = self.rx.recv() => item,
            };

            match item {
                Some(event) => self.record_to_sink(event).await,
                None => {
                    info!("event channel closed, broadcaster exiting");
                    return;
                }
            }
        }
    }

    /// Retry-free write: failure drops the event.
    async fn record_to_sink(&self, item: KubeEvent) {
        let namespace = item
            .regarding
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let event = build_event(&item, &self.reporting_instance);
        let api: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        match api.create(&PostParams::default(), &event).await {
            Ok(_) => record_kube_event("sent"),
            Err(e) => {
                error!(
                    namespace = %namespace,
                    name = ?item.regarding.name,
                    error = %e,
                    "failed to report event"
                );
                record_kube_event("dropped");
            }
        }
    }
}

fn build_event(item: &KubeEvent, reporting_instance: &str) -> Event {
    let regarding_name = item.regarding.name.clone().unwrap_or_default();

    Event {
        metadata: ObjectMeta {
            name: Some(format!(
                "{}.{:x}",
                regarding_name,
                item.timestamp.timestamp_nanos_opt().unwrap_or_default()
            )),
            namespace: item.regarding.namespace.clone(),
            ..Default::default()
        },
        action: Some("Added".to_string()),
        event_time: Some(MicroTime(item.timestamp)),
        reason: Some(item.reason.clone()),
        regarding: Some(item.regarding.clone()),
        note: Some(item.message.clone()),
        reporting_controller: Some(REPORTING_CONTROLLER.to_string()),
        reporting_instance: Some(reporting_instance.to_string()),
        type_: Some(item.event_type.as_str().to_string()),
        ..Default::default()
    }
}
