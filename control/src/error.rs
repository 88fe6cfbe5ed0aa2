use thiserror::Error;

/// PORTTI Control Plane Errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("cluster '{id}' failed validation: {violations:?}")]
    ClusterValidation { id: String, violations: Vec<String> },

    #[error("skipping ALL routes for cluster '{id}' due to validation errors: {violations:?}")]
    RouteValidation { id: String, violations: Vec<String> },

    #[error("duplicated cluster id '{id}', skipping repeated definition")]
    DuplicateCluster { id: String },

    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
