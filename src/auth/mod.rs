//! Client authentication decisions
//!
//! - Method advertisement across all rule documents
//! - Identity matching (exact or pattern usernames, first match wins)
//! - Public key matching against authorized keys
//! - Credential resolution for the upstream connection

pub mod identity;
pub mod keys;
pub mod methods;
pub mod resolver;

pub use identity::{identity_matches, match_identity, matching_identities};
pub use keys::{decode_private_key, match_public_key, parse_authorized_keys, KeyError};
pub use methods::{advertised_methods, AuthMethod};
pub use resolver::{resolve, split_host_port, Credential, RoutingDecision, Upstream};
