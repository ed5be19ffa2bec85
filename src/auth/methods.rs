//! Authentication method advertisement

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rules::RuleDocument;

/// Client authentication methods the broker can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Password,
    PublicKey,
}

impl AuthMethod {
    /// SSH method name (RFC 4252)
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::PublicKey => "publickey",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Union of the methods required by every source identity of every document.
///
/// An identity with authorized keys asks for `publickey`, any other for
/// `password`. No documents means nothing to advertise.
pub fn advertised_methods(documents: &[RuleDocument]) -> BTreeSet<AuthMethod> {
    documents
        .iter()
        .flat_map(|doc| doc.sources.iter())
        .map(|source| {
            if source.has_authorized_keys() {
                AuthMethod::PublicKey
            } else {
                AuthMethod::Password
            }
        })
        .collect()
}
