//! sshgate - authentication and routing decisions for an SSH broker
//!
//! Given a client login attempt, decide which upstream host to connect to
//! and with which credential, then check that upstream's host key against
//! the trust data pinned in the governing rule document.

pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod rules;
pub mod ssh;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use auth::{AuthMethod, Credential, RoutingDecision, Upstream};
pub use config::EngineConfig;
pub use engine::{route_in_document, OfferedCredential, RoutingEngine};
pub use error::RouteError;
pub use rules::{
    DestinationDescriptor, GoverningPolicy, JsonFileRuleStore, MemoryRuleStore, RuleDocument,
    RuleStore, SourceIdentity, StoreError,
};
pub use ssh::{ConnectionCache, ConnectionId, ConnectionPhase};

/// Initialize logging
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// later calls are ignored when a global subscriber is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
