//! Custom error types for the language host.
//!
//! This module defines the primary error type, `HostError`, for the entire
//! host. Using the `thiserror` crate, it provides a centralized and consistent
//! way to handle the different kinds of errors that can occur, from I/O and
//! RPC transport failures to malformed package manifests.
//!
//! Plugin discovery deliberately never short-circuits: per-entry failures are
//! collected and handed back as a single `Discovery` composite alongside the
//! partial result, so callers see everything that went wrong in one pass.

use thiserror::Error;

/// Convenience alias for results using the host error type.
pub type HostResult<T> = std::result::Result<T, HostError>;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid semantic version: {0}")]
    Version(#[from] semver::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("{0}")]
    Manifest(String),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Dependencies(String),

    #[error("It looks like the Pulumi SDK has not been installed. Have you run npm install or yarn install?")]
    MissingSdk,

    #[error("errors during plugin discovery: {}", format_composite(.0))]
    Discovery(Vec<HostError>),
}

fn format_composite(errors: &[HostError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<HostError> for tonic::Status {
    fn from(value: HostError) -> Self {
        match value {
            HostError::Rpc(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_composite_lists_every_cause() {
        let composite = HostError::Discovery(vec![
            HostError::Manifest("missing expected \"name\" property".into()),
            HostError::Config("invalid configuration key 'x'".into()),
        ]);
        let text = composite.to_string();
        assert!(text.contains("missing expected \"name\" property"));
        assert!(text.contains("invalid configuration key 'x'"));
    }

    #[test]
    fn missing_sdk_carries_install_hint() {
        let text = HostError::MissingSdk.to_string();
        assert!(text.contains("Have you run npm install or yarn install?"));
    }

    #[test]
    fn rpc_status_passes_through_unchanged() {
        let status = tonic::Status::unavailable("monitor went away");
        let err = HostError::Rpc(status);
        let back: tonic::Status = err.into();
        assert_eq!(back.code(), tonic::Code::Unavailable);
        assert_eq!(back.message(), "monitor went away");
    }
}
