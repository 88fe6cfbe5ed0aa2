//! Configuration for the PORTTI controller
//!
//! Everything is overridable from the environment; defaults match a single
//! controller replica managing the `portti` ingress class.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Ingress class this controller manages (`spec.ingressClassName` or the
    /// legacy `kubernetes.io/ingress.class` annotation)
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,

    /// Fallback discovery period in seconds (default: 30s) - a reconciliation
    /// runs at least this often even without change notifications
    #[serde(default = "default_discovery_period")]
    pub discovery_period_secs: u64,

    /// Debounce quiescence window in milliseconds (default: 750ms)
    #[serde(default = "default_debounce_window")]
    pub debounce_window_ms: u64,

    /// Whether `get_config` may synthesize an empty configuration before the
    /// first reconciliation completes (default: true)
    #[serde(default = "default_true")]
    pub allow_start_before_discovery: bool,

    /// Bounded event queue capacity (default: 500)
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Status report interval in seconds (default: 60s)
    #[serde(default = "default_status_report_interval")]
    pub status_report_interval_secs: u64,

    /// Leader election lease settings
    #[serde(default)]
    pub election: ElectionConfig,
}

/// Leader election lease settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElectionConfig {
    /// Name of the Lease resource used as the shared lock
    #[serde(default = "default_lease_name")]
    pub lease_name: String,

    /// Time before an unrenewed lease may be taken over (default: 15s)
    #[serde(default = "default_lease_duration")]
    pub lease_duration_secs: u64,

    /// Maximum age of our own last successful renewal before we consider
    /// leadership lost (default: 10s)
    #[serde(default = "default_renew_deadline")]
    pub renew_deadline_secs: u64,

    /// How often to try acquiring or renewing the lease (default: 2s)
    #[serde(default = "default_retry_period")]
    pub retry_period_secs: u64,
}

/// Who this replica is, sourced from the downward API. Required for status
/// reporting and event attribution; the discovery pipeline runs without it.
#[derive(Debug, Clone)]
pub struct ControllerIdentity {
    pub pod_name: String,
    pub pod_namespace: String,
    pub publish_service: String,
}

fn default_ingress_class() -> String {
    "portti".to_string()
}

fn default_discovery_period() -> u64 {
    30
}

fn default_debounce_window() -> u64 {
    750
}

fn default_true() -> bool {
    true
}

fn default_event_queue_capacity() -> usize {
    500
}

fn default_status_report_interval() -> u64 {
    60
}

fn default_lease_name() -> String {
    "portti-controller-leader".to_string()
}

fn default_lease_duration() -> u64 {
    15
}

fn default_renew_deadline() -> u64 {
    10
}

fn default_retry_period() -> u64 {
    2
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_name: default_lease_name(),
            lease_duration_secs: default_lease_duration(),
            renew_deadline_secs: default_renew_deadline(),
            retry_period_secs: default_retry_period(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ingress_class: default_ingress_class(),
            discovery_period_secs: default_discovery_period(),
            debounce_window_ms: default_debounce_window(),
            allow_start_before_discovery: default_true(),
            event_queue_capacity: default_event_queue_capacity(),
            status_report_interval_secs: default_status_report_interval(),
            election: ElectionConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControlError> {
        let mut config = Self::default();

        if let Ok(val) = env::var("PORTTI_INGRESS_CLASS") {
            config.ingress_class = val;
        }

        if let Some(val) = parse_env_u64("PORTTI_DISCOVERY_PERIOD_SECS")? {
            config.discovery_period_secs = val;
        }

        if let Some(val) = parse_env_u64("PORTTI_DEBOUNCE_WINDOW_MS")? {
            config.debounce_window_ms = val;
        }

        if let Ok(val) = env::var("PORTTI_ALLOW_START_BEFORE_DISCOVERY") {
            config.allow_start_before_discovery = val.eq_ignore_ascii_case("true");
        }

        if let Some(val) = parse_env_u64("PORTTI_EVENT_QUEUE_CAPACITY")? {
            config.event_queue_capacity = val as usize;
        }

        if let Some(val) = parse_env_u64("PORTTI_STATUS_REPORT_INTERVAL_SECS")? {
            config.status_report_interval_secs = val;
        }

        if let Ok(val) = env::var("PORTTI_ELECTION_LEASE_NAME") {
            config.election.lease_name = val;
        }

        if let Some(val) = parse_env_u64("PORTTI_LEASE_DURATION_SECS")? {
            config.election.lease_duration_secs = val;
        }

        if let Some(val) = parse_env_u64("PORTTI_RENEW_DEADLINE_SECS")? {
            config.election.renew_deadline_secs = val;
        }

        if let Some(val) = parse_env_u64("PORTTI_RETRY_PERIOD_SECS")? {
            config.election.retry_period_secs = val;
        }

        if config.election.renew_deadline_secs >= config.election.lease_duration_secs {
            return Err(ControlError::Config(format!(
                "renew deadline ({}s) must be shorter than lease duration ({}s)",
                config.election.renew_deadline_secs, config.election.lease_duration_secs
            )));
        }

        Ok(config)
    }

    /// Identity from the downward API, if fully configured.
    pub fn identity() -> Option<ControllerIdentity> {
        let pod_name = env::var("POD_NAME").ok()?;
        let pod_namespace = env::var("POD_NAMESPACE").ok()?;
        let publish_service = env::var("PUBLISH_SERVICE").ok()?;

        Some(ControllerIdentity {
            pod_name,
            pod_namespace,
            publish_service,
        })
    }

    pub fn discovery_period(&self) -> Duration {
        Duration::from_secs(self.discovery_period_secs)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn status_report_interval(&self) -> Duration {
        Duration::from_secs(self.status_report_interval_secs)
    }
}

impl ElectionConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn renew_deadline(&self) -> Duration {
        Duration::from_secs(self.renew_deadline_secs)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.retry_period_secs)
    }
}

fn parse_env_u64(name: &str) -> Result<Option<u64>, ControlError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ControlError::Config(format!("invalid {}={}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.ingress_class, "portti");
        assert_eq!(config.discovery_period_secs, 30);
        assert_eq!(config.debounce_window_ms, 750);
        assert!(config.allow_start_before_discovery);
        assert_eq!(config.event_queue_capacity, 500);
    }

    #[test]
    fn test_election_defaults() {
        let config = ControllerConfig::default();

        assert_eq!(config.election.lease_duration_secs, 15);
        assert_eq!(config.election.renew_deadline_secs, 10);
        assert_eq!(config.election.retry_period_secs, 2);
        assert!(config.election.renew_deadline() < config.election.lease_duration());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        env::set_var("PORTTI_INGRESS_CLASS", "edge");
        env::set_var("PORTTI_DISCOVERY_PERIOD_SECS", "10");
        env::set_var("PORTTI_ALLOW_START_BEFORE_DISCOVERY", "false");

        let config = ControllerConfig::from_env().expect("config loads");
        assert_eq!(config.ingress_class, "edge");
        assert_eq!(config.discovery_period(), Duration::from_secs(10));
        assert!(!config.allow_start_before_discovery);

        env::remove_var("PORTTI_INGRESS_CLASS");
        env::remove_var("PORTTI_DISCOVERY_PERIOD_SECS");
        env::remove_var("PORTTI_ALLOW_START_BEFORE_DISCOVERY");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage_durations() {
        env::set_var("PORTTI_DISCOVERY_PERIOD_SECS", "soon");

        let result = ControllerConfig::from_env();
        assert!(result.is_err());

        env::remove_var("PORTTI_DISCOVERY_PERIOD_SECS");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_renew_deadline_beyond_lease() {
        env::set_var("PORTTI_LEASE_DURATION_SECS", "5");
        env::set_var("PORTTI_RENEW_DEADLINE_SECS", "9");

        let result = ControllerConfig::from_env();
        assert!(result.is_err());

        env::remove_var("PORTTI_LEASE_DURATION_SECS");
        env::remove_var("PORTTI_RENEW_DEADLINE_SECS");
    }

    #[test]
    #[serial]
    fn test_identity_requires_all_three_vars() {
        env::remove_var("POD_NAME");
        env::remove_var("POD_NAMESPACE");
        env::remove_var("PUBLISH_SERVICE");
        assert!(ControllerConfig::identity().is_none());

        env::set_var("POD_NAME", "portti-0");
        env::set_var("POD_NAMESPACE", "ingress");
        assert!(ControllerConfig::identity().is_none());

        env::set_var("PUBLISH_SERVICE", "portti-public");
        let identity = ControllerConfig::identity().expect("identity present");
        assert_eq!(identity.pod_name, "portti-0");
        assert_eq!(identity.pod_namespace, "ingress");
        assert_eq!(identity.publish_service, "portti-public");

        env::remove_var("POD_NAME");
        env::remove_var("POD_NAMESPACE");
        env::remove_var("PUBLISH_SERVICE");
    }
}
