//! Leader election over a `coordination.k8s.io/v1` Lease
//!
//! At most one replica writes Ingress status at a time. The elector claims
//! or renews the shared Lease on a retry period and publishes leadership
//! through a watch channel gate: `true` while this replica holds the lease,
//! `false` otherwise. Transitions are edge-logged. If renewals keep failing
//! past the renew deadline the gate drops even though the lease may still
//! name us - better a skipped status cycle than two writers.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ElectionConfig;

/// Lease-based mutual exclusion with a leadership gate.
pub struct LeaderElector {
    client: Client,
    namespace: String,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    renew_deadline: Duration,
    retry_period: Duration,
    gate: watch::Sender<bool>,
}

/// What a claim attempt should do with the observed lease.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ClaimAction {
    AcquireVacant,
    Renew,
    TakeOverExpired,
    Blocked { holder: String },
}

impl LeaderElector {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        identity: impl Into<String>,
        election: &ElectionConfig,
    ) -> Self {
        let (gate, _rx) = watch::channel(false);
        Self {
            client,
            namespace: namespace.into(),
            lease_name: election.lease_name.clone(),
            identity: identity.into(),
            lease_duration: election.lease_duration(),
            renew_deadline: election.renew_deadline(),
            retry_period: election.retry_period(),
            gate,
        }
    }

    /// Leadership gate: single writer (this elector), any number of
    /// readers.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.gate.subscribe()
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            lease = %self.lease_name,
            namespace = %self.namespace,
            identity = %self.identity,
            "leader elector starting"
        );

        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut ticker = tokio::time::interval(self.retry_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut last_success: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("leader elector shutting down");
                    self.transition(false);
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.try_acquire_or_renew(&api).await {
                Ok(true) => {
                    last_success = Some(Instant::now());
                    self.transition(true);
                }
                Ok(false) => {
                    last_success = None;
                    self.transition(false);
                }
                Err(e) => {
                    warn!(error = %e, "lease claim attempt failed");
                    let deadline_passed = last_success
                        .map(|at| at.elapsed() > self.renew_deadline)
                        .unwrap_or(true);
                    if *self.gate.borrow() && deadline_passed {
                        warn!("renew deadline exceeded, relinquishing leadership");
                        self.transition(false);
                    }
                }
            }
        }
    }

    fn transition(&self, is_leader: bool) {
        self.gate.send_if_modified(|current| {
            if *current == is_leader {
                return false;
            }
            if is_leader {
                info!(identity = %self.identity, "became leader");
            } else {
                warn!(identity = %self.identity, "lost leadership");
            }
            *current = is_leader;
            true
        });
    }

    async fn try_acquire_or_renew(&self, api: &Api<Lease>) -> Result<bool, kube::Error> {
        let now = Utc::now();

        let Some(current) = api.get_opt(&self.lease_name).await? else {
            let lease = self.desired_lease(now, None, 1);
            api.create(&PostParams::default(), &lease).await?;
            info!(lease = %self.lease_name, "created vacant lease");
            return Ok(true);
        };

        let action = decide_claim(
            current.spec.as_ref(),
            &self.identity,
            now,
            self.lease_duration,
        );

        match action {
            ClaimAction::Blocked { holder } => {
                debug!(holder = %holder, "lease held by another replica");
                Ok(false)
            }
            ClaimAction::Renew | ClaimAction::AcquireVacant | ClaimAction::TakeOverExpired => {
                let spec = current.spec.as_ref();
                let transitions = spec.and_then(|s| s.lease_transitions).unwrap_or(0);
                let (acquire_time, transitions) = if action == ClaimAction::Renew {
                    (spec.and_then(|s| s.acquire_time.clone()), transitions)
                } else {
                    (Some(MicroTime(now)), transitions + 1)
                };

                let mut lease = current;
                lease.spec = Some(self.desired_spec(now, acquire_time, transitions));
                // A conflicting concurrent claim fails the replace; the next
                // tick re-reads and re-decides.
                api.replace(&self.lease_name, &PostParams::default(), &lease)
                    .await?;
                Ok(true)
            }
        }
    }

    fn desired_lease(
        &self,
        now: DateTime<Utc>,
        acquire_time: Option<MicroTime>,
        transitions: i32,
    ) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.desired_spec(
                now,
                acquire_time.or(Some(MicroTime(now))),
                transitions,
            )),
        }
    }

    fn desired_spec(
        &self,
        now: DateTime<Utc>,
        acquire_time: Option<MicroTime>,
        transitions: i32,
    ) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
            acquire_time: acquire_time.or(Some(MicroTime(now))),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }
}

/// Pure claim decision over the observed lease spec.
fn decide_claim(
    spec: Option<&LeaseSpec>,
    identity: &str,
    now: DateTime<Utc>,
    lease_duration: Duration,
) -> ClaimAction {
    let Some(spec) = spec else {
        return ClaimAction::AcquireVacant;
    };

    match spec.holder_identity.as_deref() {
        None | Some("") => ClaimAction::AcquireVacant,
        Some(holder) if holder == identity => ClaimAction::Renew,
        Some(holder) => {
            let renewed = spec
                .renew_time
                .as_ref()
                .map(|t| t.0)
                .or_else(|| spec.acquire_time.as_ref().map(|t| t.0));

            match renewed {
                Some(renewed) => {
                    // A renew_time in the future (clock skew) counts as fresh.
                    let age = now
                        .signed_duration_since(renewed)
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    if age <= lease_duration {
                        ClaimAction::Blocked {
                            holder: holder.to_string(),
                        }
                    } else {
                        ClaimAction::TakeOverExpired
                    }
                }
                // Held but never renewed nor acquired: treat as stale.
                None => ClaimAction::TakeOverExpired,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(holder: Option<&str>, renewed_secs_ago: Option<i64>) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(str::to_string),
            lease_duration_seconds: Some(15),
            renew_time: renewed_secs_ago
                .map(|ago| MicroTime(Utc::now() - chrono::Duration::seconds(ago))),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_or_vacant_lease_is_acquired() {
        let now = Utc::now();
        assert_eq!(
            decide_claim(None, "portti-0", now, Duration::from_secs(15)),
            ClaimAction::AcquireVacant
        );
        assert_eq!(
            decide_claim(
                Some(&spec(None, None)),
                "portti-0",
                now,
                Duration::from_secs(15)
            ),
            ClaimAction::AcquireVacant
        );
        assert_eq!(
            decide_claim(
                Some(&spec(Some(""), None)),
                "portti-0",
                now,
                Duration::from_secs(15)
            ),
            ClaimAction::AcquireVacant
        );
    }

    #[test]
    fn test_own_lease_is_renewed() {
        assert_eq!(
            decide_claim(
                Some(&spec(Some("portti-0"), Some(5))),
                "portti-0",
                Utc::now(),
                Duration::from_secs(15)
            ),
            ClaimAction::Renew
        );
    }

    #[test]
    fn test_fresh_foreign_lease_blocks() {
        assert_eq!(
            decide_claim(
                Some(&spec(Some("portti-1"), Some(5))),
                "portti-0",
                Utc::now(),
                Duration::from_secs(15)
            ),
            ClaimAction::Blocked {
                holder: "portti-1".to_string()
            }
        );
    }

    #[test]
    fn test_expired_foreign_lease_is_taken_over() {
        assert_eq!(
            decide_claim(
                Some(&spec(Some("portti-1"), Some(60))),
                "portti-0",
                Utc::now(),
                Duration::from_secs(15)
            ),
            ClaimAction::TakeOverExpired
        );
    }

    #[test]
    fn test_future_renew_time_counts_as_fresh() {
        assert_eq!(
            decide_claim(
                Some(&spec(Some("portti-1"), Some(-30))),
                "portti-0",
                Utc::now(),
                Duration::from_secs(15)
            ),
            ClaimAction::Blocked {
                holder: "portti-1".to_string()
            }
        );
    }
}
