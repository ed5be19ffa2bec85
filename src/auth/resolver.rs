//! Credential resolution
//!
//! Turns a matched destination into the upstream address plus the single
//! credential the broker presents to it. Precedence is fixed:
//! destination password, then the client's own password, then the
//! destination private key.

use std::fmt;
use std::sync::Arc;

use russh::keys::PrivateKey;
use tracing::debug;
use zeroize::Zeroizing;

use super::keys::decode_private_key;
use crate::error::RouteError;
use crate::rules::DestinationDescriptor;
use crate::ssh::ConnectionId;

const DEFAULT_SSH_PORT: u16 = 22;

/// Where the broker connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
    /// Upstream login name; `None` keeps the client's username
    pub username: Option<String>,
    pub ignore_host_key: bool,
}

impl Upstream {
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// What the broker presents upstream
#[derive(Clone)]
pub enum Credential {
    Password(Zeroizing<String>),
    PrivateKey(Arc<PrivateKey>),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey(_) => "private_key",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::PrivateKey(key) => write!(f, "PrivateKey({})", key.algorithm()),
        }
    }
}

/// The resolved (Upstream, Credential) pair for an authenticated connection
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub upstream: Upstream,
    pub credential: Credential,
}

/// Split `host[:port]`, defaulting to port 22.
///
/// IPv6 literals must be bracketed when a port is given: `[::1]:2222`.
pub fn split_host_port(addr: &str) -> Result<(String, u16), RouteError> {
    let addr = addr.trim();
    let invalid = |reason: &str| RouteError::InvalidDestination(format!("{:?}: {}", addr, reason));

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let end = rest.find(']').ok_or_else(|| invalid("missing ']'"))?;
        let host = &rest[..end];
        match &rest[end + 1..] {
            "" => (host, None),
            tail => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(invalid("unexpected text after ']'")),
            },
        }
    } else {
        match addr.matches(':').count() {
            0 => (addr, None),
            1 => {
                let (host, port) = addr.split_once(':').unwrap_or((addr, ""));
                (host, Some(port))
            }
            _ => return Err(invalid("too many colons, bracket IPv6 addresses")),
        }
    };

    if host.is_empty() {
        return Err(invalid("empty host"));
    }

    let port = match port {
        None => DEFAULT_SSH_PORT,
        Some(port) => match port.parse::<u16>() {
            Ok(0) | Err(_) => return Err(invalid("invalid port")),
            Ok(port) => port,
        },
    };

    Ok((host.to_string(), port))
}

/// Build the upstream and credential for a matched destination.
///
/// `offered_password` is the client's own password; it is passed through
/// only when the destination has no password of its own.
pub fn resolve(
    conn: &ConnectionId,
    destination: &DestinationDescriptor,
    offered_password: &str,
) -> Result<RoutingDecision, RouteError> {
    let (host, port) = split_host_port(&destination.host)?;

    let upstream = Upstream {
        host,
        port,
        username: Some(destination.username.clone()).filter(|u| !u.is_empty()),
        ignore_host_key: destination.ignore_host_key,
    };

    let credential = if !destination.password.is_empty() {
        Credential::Password(Zeroizing::new(destination.password.clone()))
    } else if !offered_password.is_empty() {
        Credential::Password(Zeroizing::new(offered_password.to_string()))
    } else if let Some(material) = destination
        .private_key()
        .map_err(|e| RouteError::CredentialDecodeError(e.to_string()))?
    {
        Credential::PrivateKey(decode_private_key(material)?)
    } else {
        return Err(RouteError::NoUsableCredential);
    };

    debug!(
        "Connection {} routed to {} using {}",
        conn,
        upstream.address(),
        credential.kind()
    );

    Ok(RoutingDecision {
        upstream,
        credential,
    })
}
