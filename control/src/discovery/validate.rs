//! Candidate cluster/route validation
//!
//! The discoverer treats the validator as a collaborator: it hands over a
//! built cluster or route and gets back a list of violations. An empty list
//! means valid. The trait seam lets tests inject a validator that fails
//! selectively.

use common::{Cluster, ProxyRoute, CATCH_ALL_SUFFIX};

/// Validates candidate configuration before it may be published.
pub trait ConfigValidator: Send + Sync {
    fn validate_cluster(&self, cluster: &Cluster) -> Vec<String>;
    fn validate_route(&self, route: &ProxyRoute) -> Vec<String>;
}

/// Default validator: structural checks on ids, destinations, hosts and
/// paths.
#[derive(Debug, Default)]
pub struct RouteTableValidator;

impl ConfigValidator for RouteTableValidator {
    fn validate_cluster(&self, cluster: &Cluster) -> Vec<String> {
        let mut violations = Vec::new();

        if cluster.id.is_empty() {
            violations.push("cluster id cannot be empty".to_string());
        }

        for (key, destination) in &cluster.destinations {
            if let Err(reason) = validate_address(&destination.address) {
                violations.push(format!("destination '{}': {}", key, reason));
            }
        }

        violations
    }

    fn validate_route(&self, route: &ProxyRoute) -> Vec<String> {
        let mut violations = Vec::new();

        if route.cluster_id.is_empty() {
            violations.push(format!("route '{}' has no cluster id", route.route_id));
        }

        let path = route
            .route_match
            .path
            .strip_suffix(CATCH_ALL_SUFFIX)
            .unwrap_or(&route.route_match.path);
        if let Err(reason) = validate_path(path) {
            violations.push(reason);
        }

        for host in &route.route_match.hosts {
            // An empty host means "any host" and is allowed.
            if host.is_empty() {
                continue;
            }
            if let Err(reason) = validate_hostname(host) {
                violations.push(reason);
            }
        }

        violations
    }
}

/// Validate an HTTP path
///
/// Rules:
/// - Must start with "/"
/// - Must not be empty
/// - Must not have trailing slash (except root "/")
/// - Must not have double slashes
fn validate_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("Path cannot be empty".to_string());
    }

    if !path.starts_with('/') {
        return Err(format!("Path '{}' must start with '/'", path));
    }

    if path.contains("//") {
        return Err(format!("Path '{}' cannot contain double slashes", path));
    }

    if path.len() > 1 && path.ends_with('/') {
        return Err(format!("Path '{}' cannot have trailing slash", path));
    }

    Ok(())
}

/// Validate hostname according to DNS-1123 subdomain spec
///
/// Rules:
/// - Lowercase alphanumeric characters, hyphens, and dots only
/// - Must not start or end with hyphen
/// - Must not have double dots
/// - Can start with wildcard "*."
/// - Max length 253 characters
fn validate_hostname(hostname: &str) -> Result<(), String> {
    if hostname.is_empty() {
        return Err("Hostname cannot be empty".to_string());
    }

    if hostname.len() > 253 {
        return Err(format!("Hostname '{}' exceeds 253 characters", hostname));
    }

    // Handle wildcard prefix
    let hostname_to_check = if let Some(stripped) = hostname.strip_prefix("*.") {
        stripped
    } else {
        hostname
    };

    if hostname_to_check.is_empty() {
        return Err("Hostname cannot be just '*.'".to_string());
    }

    // Check for double dots
    if hostname_to_check.contains("..") {
        return Err(format!("Hostname '{}' cannot contain '..'", hostname));
    }

    // Check each label
    for label in hostname_to_check.split('.') {
        if label.is_empty() {
            continue; // Skip empty labels (shouldn't happen after .. check)
        }

        // Must not start or end with hyphen
        if label.starts_with('-') {
            return Err(format!("Hostname label '{}' cannot start with '-'", label));
        }
        if label.ends_with('-') {
            return Err(format!("Hostname label '{}' cannot end with '-'", label));
        }

        // Must be lowercase alphanumeric or hyphen
        for c in label.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(format!(
                    "Hostname '{}' contains invalid character '{}' (must be lowercase alphanumeric or hyphen)",
                    hostname, c
                ));
            }
        }
    }

    Ok(())
}

fn validate_address(address: &str) -> Result<(), String> {
    let rest = address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("https://"))
        .ok_or_else(|| format!("address '{}' must be an http(s) URL", address))?;

    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("address '{}' is missing a port", address))?;

    if host.is_empty() {
        return Err(format!("address '{}' is missing a host", address));
    }

    port.parse::<u16>()
        .map_err(|_| format!("address '{}' has an invalid port", address))?;

    Ok(())
}
