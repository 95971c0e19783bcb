// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::configuration::validation::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VsGateError {
    #[error("Kubernetes API error: {0}")]
    TransientCluster(#[from] kube::Error),

    /// Rendered verbatim into the resource status message
    #[error("{0}")]
    SpecInvalid(String),

    #[error("{0}")]
    ReferenceUnresolved(String),

    #[error("Arbitrator unreachable: {0}")]
    ArbitratorUnreachable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Reload failed: {0}")]
    Reload(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl VsGateError {
    /// Errors that are retried internally instead of being reported on a resource status.
    pub fn is_transient(&self) -> bool {
        match self {
            VsGateError::TransientCluster(kube::Error::Api(resp)) => {
                resp.code == 429 || resp.code == 409 || resp.code >= 500
            }
            VsGateError::TransientCluster(_) => true,
            VsGateError::ArbitratorUnreachable(_) => true,
            VsGateError::Io(_) | VsGateError::Reload(_) => true,
            _ => false,
        }
    }

    /// True when the API server answered 404 for the target object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, VsGateError::TransientCluster(kube::Error::Api(resp)) if resp.code == 404)
    }
}

impl From<ValidationError> for VsGateError {
    fn from(error: ValidationError) -> Self {
        VsGateError::SpecInvalid(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VsGateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> VsGateError {
        VsGateError::TransientCluster(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(api_error(500).is_transient());
        assert!(api_error(503).is_transient());
        assert!(api_error(429).is_transient());
        assert!(api_error(409).is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        assert!(!api_error(400).is_transient());
        assert!(!api_error(404).is_transient());
        assert!(!VsGateError::SpecInvalid("bad".to_string()).is_transient());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!VsGateError::Reload("x".to_string()).is_not_found());
    }

    #[test]
    fn test_validation_error_becomes_spec_invalid() {
        let error = VsGateError::from(ValidationError {
            errors: vec![crate::configuration::validation::FieldError {
                field: "spec.host".to_string(),
                message: "Required value".to_string(),
            }],
        });

        assert!(matches!(&error, VsGateError::SpecInvalid(_)));
        assert_eq!(error.to_string(), "spec.host: Required value");
        assert!(!error.is_transient());
    }

    #[test]
    fn test_arbitrator_errors_are_transient() {
        assert!(VsGateError::ArbitratorUnreachable("down".to_string()).is_transient());
    }
}
