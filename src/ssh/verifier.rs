//! Host Identity Verifier
//!
//! Second phase of a routed connection: the upstream presents its host key
//! and it is checked against the trust data pinned on the destination that
//! was cached for this connection. Every failure rejects the connection.

use std::sync::Arc;

use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::connection_cache::{ConnectionCache, ConnectionId, ConnectionPhase};
use super::known_hosts::{fingerprint_bytes, HostKeyVerification, KnownHosts};
use crate::error::RouteError;
use crate::rules::DestinationDescriptor;

pub struct HostKeyVerifier {
    cache: Arc<ConnectionCache>,
}

impl HostKeyVerifier {
    pub fn new(cache: Arc<ConnectionCache>) -> Self {
        Self { cache }
    }

    /// Verify the host key an upstream presented for `conn`.
    ///
    /// `hostname` is the address dialed and `peer_addr` the remote socket
    /// address, both as `host:port`. `key` is the SSH wire-format host key.
    ///
    /// The first check on a routed connection records `Verified` or
    /// `Rejected`. Later checks on a verified connection are answered
    /// without changing that outcome.
    pub fn verify(
        &self,
        conn: &ConnectionId,
        hostname: &str,
        peer_addr: &str,
        key: &[u8],
    ) -> Result<(), RouteError> {
        let cached = self
            .cache
            .get(conn)
            .ok_or_else(|| RouteError::ConnectionExpired(conn.clone()))?;

        match cached.phase {
            ConnectionPhase::Rejected => {
                return Err(RouteError::ConnectionRejected(conn.clone()))
            }
            ConnectionPhase::Verified => {
                debug!("Connection {} already verified, phase unchanged", conn);
                return check_cached(&cached.destination, hostname, peer_addr, key);
            }
            ConnectionPhase::Routed => {}
        }

        if cached.destination.ignore_host_key {
            warn!(
                "Host key check disabled for {} (connection {}), accepting {}",
                hostname,
                conn,
                fingerprint_bytes(key)
            );
        }
        let result = check_cached(&cached.destination, hostname, peer_addr, key);
        let phase = if result.is_ok() {
            ConnectionPhase::Verified
        } else {
            ConnectionPhase::Rejected
        };

        if !self.cache.transition(conn, ConnectionPhase::Routed, phase) {
            // Expired or concurrently verified since the lookup
            return match self.cache.get(conn) {
                None => Err(RouteError::ConnectionExpired(conn.clone())),
                Some(current) if current.phase == ConnectionPhase::Rejected => {
                    Err(RouteError::ConnectionRejected(conn.clone()))
                }
                Some(_) => result,
            };
        }

        match &result {
            Ok(()) => info!("Host key verified for {} (connection {})", hostname, conn),
            Err(e) => warn!("Host key rejected for {} (connection {}): {}", hostname, conn, e),
        }
        result
    }
}

fn check_cached(
    destination: &DestinationDescriptor,
    hostname: &str,
    peer_addr: &str,
    key: &[u8],
) -> Result<(), RouteError> {
    if destination.ignore_host_key {
        return Ok(());
    }
    check_host_key(destination, hostname, peer_addr, key)
}

/// Check a presented key against a destination's known_hosts data
pub fn check_host_key(
    destination: &DestinationDescriptor,
    hostname: &str,
    peer_addr: &str,
    key: &[u8],
) -> Result<(), RouteError> {
    let material = destination
        .known_hosts()
        .map_err(|e| RouteError::TrustDataInvalid(e.to_string()))?
        .ok_or(RouteError::TrustDataMissing)?;

    let text = material
        .text("known_hosts")
        .map_err(|e| RouteError::TrustDataInvalid(e.to_string()))?;
    let known_hosts = KnownHosts::parse(&text)?;

    let presented =
        PublicKey::from_bytes(key).map_err(|e| RouteError::InvalidHostKey(e.to_string()))?;

    match known_hosts.verify(hostname, peer_addr, &presented) {
        HostKeyVerification::Verified => Ok(()),
        HostKeyVerification::Unknown { host, fingerprint } => {
            Err(RouteError::HostUnknown { host, fingerprint })
        }
        HostKeyVerification::Changed {
            host,
            expected_fingerprint,
            actual_fingerprint,
        } => Err(RouteError::HostKeyMismatch {
            host,
            expected: expected_fingerprint,
            actual: actual_fingerprint,
        }),
        HostKeyVerification::Revoked { .. } => Err(RouteError::HostKeyRevoked {
            host: hostname.to_string(),
        }),
    }
}
