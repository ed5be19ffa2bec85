//! Routing engine error types

use thiserror::Error;

use crate::rules::StoreError;
use crate::ssh::ConnectionId;

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("Rule store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Expected exactly one rule document, found {0}")]
    AmbiguousRules(usize),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Credential decode error: {0}")]
    CredentialDecodeError(String),

    #[error("No password or private key found for destination")]
    NoUsableCredential,

    #[error("Connection expired: {0}")]
    ConnectionExpired(ConnectionId),

    #[error("Connection already rejected: {0}")]
    ConnectionRejected(ConnectionId),

    #[error("Known hosts data is missing")]
    TrustDataMissing,

    #[error("Invalid known hosts data: {0}")]
    TrustDataInvalid(String),

    #[error("Invalid host key: {0}")]
    InvalidHostKey(String),

    #[error("Host key mismatch for {host}: expected {expected}, got {actual}")]
    HostKeyMismatch {
        host: String,
        expected: String,
        actual: String,
    },

    #[error("Unknown host {host} (fingerprint: {fingerprint})")]
    HostUnknown { host: String, fingerprint: String },

    #[error("Host key for {host} is revoked")]
    HostKeyRevoked { host: String },

    #[error("Cancelled")]
    Cancelled,
}

impl RouteError {
    /// True when the error points at broken configuration rather than a
    /// legitimate "this rule does not apply".
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RouteError::InvalidRule(_)
                | RouteError::InvalidDestination(_)
                | RouteError::CredentialDecodeError(_)
                | RouteError::TrustDataMissing
                | RouteError::TrustDataInvalid(_)
                | RouteError::AmbiguousRules(_)
        )
    }
}

impl From<StoreError> for RouteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => RouteError::NotFound(what),
            StoreError::Ambiguous(count) => RouteError::AmbiguousRules(count),
            other => RouteError::StoreUnavailable(other.to_string()),
        }
    }
}

// Hosts forward errors over structured channels as plain strings
impl serde::Serialize for RouteError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
