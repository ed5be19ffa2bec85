//! SSH module - per-connection state and upstream host key verification
//!
//! # Features
//! - Connection state cache with idle expiry and background sweep
//! - Known hosts parsing and matching (wildcards, negation, `@revoked`)
//! - Host key verification against the trust data pinned on a destination

pub mod connection_cache;
pub mod known_hosts;
pub mod verifier;

pub use connection_cache::{
    spawn_sweeper, CachedConnection, ConnectionCache, ConnectionId, ConnectionPhase,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_SWEEP_INTERVAL,
};
pub use known_hosts::{fingerprint, fingerprint_bytes, HostKeyVerification, KnownHosts};
pub use verifier::{check_host_key, HostKeyVerifier};
