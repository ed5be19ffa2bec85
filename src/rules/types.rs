//! Rule document model
//!
//! Field names follow the documents as they are kept in the store. Paired
//! inline/encoded fields are resolved once into [`KeyMaterial`] by the
//! accessors here, so matching and resolution code never inspects raw
//! field emptiness.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// A unit of routing configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(rename = "_id")]
    pub id: String,

    /// Source identities; the first one that matches wins
    #[serde(rename = "from", default)]
    pub sources: Vec<SourceIdentity>,

    #[serde(rename = "to")]
    pub destination: DestinationDescriptor,
}

/// A username predicate plus optional authorized keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub username: String,

    /// Treat `username` as a regular expression
    #[serde(
        rename = "username_regex_match",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub username_is_pattern: bool,

    /// authorized_keys text, literal
    #[serde(rename = "authorized_keys", default, skip_serializing_if = "String::is_empty")]
    pub authorized_keys_inline: String,

    /// authorized_keys text, base64
    #[serde(
        rename = "authorized_keys_data",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub authorized_keys_encoded: String,
}

/// Upstream target and credential material.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinationDescriptor {
    /// Upstream login name override
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// `host:port`
    pub host: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(rename = "private_key", default, skip_serializing_if = "String::is_empty")]
    pub private_key_inline: String,

    #[serde(
        rename = "private_key_data",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub private_key_encoded: String,

    #[serde(rename = "known_hosts", default, skip_serializing_if = "String::is_empty")]
    pub known_hosts_inline: String,

    #[serde(
        rename = "known_hosts_data",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub known_hosts_encoded: String,

    #[serde(
        rename = "ignore_hostkey",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub ignore_host_key: bool,
}

// Secrets stay out of logs
impl std::fmt::Debug for DestinationDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationDescriptor")
            .field("username", &self.username)
            .field("host", &self.host)
            .field("has_password", &!self.password.is_empty())
            .field(
                "has_private_key",
                &(!self.private_key_inline.is_empty() || !self.private_key_encoded.is_empty()),
            )
            .field(
                "has_known_hosts",
                &(!self.known_hosts_inline.is_empty() || !self.known_hosts_encoded.is_empty()),
            )
            .field("ignore_host_key", &self.ignore_host_key)
            .finish()
    }
}

/// Text-valued key material, either literal or base64 encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMaterial<'a> {
    Inline(&'a str),
    Encoded(&'a str),
}

/// Failure to resolve a [`KeyMaterial`] pair or its encoding
#[derive(Debug, thiserror::Error)]
pub enum MaterialError {
    #[error("both {0} and {0}_data are set")]
    Conflicting(&'static str),

    #[error("{field}_data is not valid base64: {reason}")]
    Base64 { field: &'static str, reason: String },

    #[error("{0}_data does not decode to UTF-8 text")]
    Utf8(&'static str),
}

impl<'a> KeyMaterial<'a> {
    /// Pick the populated representation of an inline/encoded field pair.
    pub fn from_pair(
        field: &'static str,
        inline: &'a str,
        encoded: &'a str,
    ) -> Result<Option<Self>, MaterialError> {
        match (inline.trim().is_empty(), encoded.trim().is_empty()) {
            (true, true) => Ok(None),
            (false, true) => Ok(Some(KeyMaterial::Inline(inline))),
            (true, false) => Ok(Some(KeyMaterial::Encoded(encoded))),
            (false, false) => Err(MaterialError::Conflicting(field)),
        }
    }

    /// The literal text, decoding base64 when needed.
    pub fn text(&self, field: &'static str) -> Result<Zeroizing<String>, MaterialError> {
        match self {
            KeyMaterial::Inline(text) => Ok(Zeroizing::new((*text).to_string())),
            KeyMaterial::Encoded(blob) => {
                let compact: String = blob.split_whitespace().collect();
                let bytes = BASE64
                    .decode(compact.as_bytes())
                    .map(Zeroizing::new)
                    .map_err(|e| MaterialError::Base64 {
                        field,
                        reason: e.to_string(),
                    })?;
                let text = std::str::from_utf8(&bytes).map_err(|_| MaterialError::Utf8(field))?;
                Ok(Zeroizing::new(text.to_string()))
            }
        }
    }
}

impl SourceIdentity {
    pub fn exact(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            username: pattern.into(),
            username_is_pattern: true,
            ..Default::default()
        }
    }

    pub fn authorized_keys(&self) -> Result<Option<KeyMaterial<'_>>, MaterialError> {
        KeyMaterial::from_pair(
            "authorized_keys",
            &self.authorized_keys_inline,
            &self.authorized_keys_encoded,
        )
    }

    /// True when this identity carries authorized-key data of either form.
    pub fn has_authorized_keys(&self) -> bool {
        !self.authorized_keys_inline.trim().is_empty()
            || !self.authorized_keys_encoded.trim().is_empty()
    }
}

impl DestinationDescriptor {
    pub fn private_key(&self) -> Result<Option<KeyMaterial<'_>>, MaterialError> {
        KeyMaterial::from_pair(
            "private_key",
            &self.private_key_inline,
            &self.private_key_encoded,
        )
    }

    pub fn known_hosts(&self) -> Result<Option<KeyMaterial<'_>>, MaterialError> {
        KeyMaterial::from_pair(
            "known_hosts",
            &self.known_hosts_inline,
            &self.known_hosts_encoded,
        )
    }
}
