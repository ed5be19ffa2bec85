//! SSH key material
//!
//! Parses authorized_keys text from rule documents and decodes destination
//! private keys:
//! - authorized_keys lines with or without leading options
//! - OpenSSH and PEM private keys (unencrypted only, rules carry no passphrase)

use std::sync::Arc;

use russh::keys::ssh_key::Algorithm;
use russh::keys::{PrivateKey, PublicKey, PublicKeyBase64};
use thiserror::Error;
use tracing::debug;

use crate::error::RouteError;
use crate::rules::{KeyMaterial, SourceIdentity};
use crate::ssh::known_hosts::fingerprint_bytes;

/// Errors that can occur while parsing key material
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("line {line}: {reason}")]
    AuthorizedKey { line: usize, reason: String },

    #[error("Encrypted key requires passphrase")]
    PassphraseRequired,

    #[error("Failed to parse key: {0}")]
    ParseError(String),
}

/// Parse authorized_keys text into public keys.
///
/// Blank lines and `#` comments are skipped, so trailing whitespace after the
/// last key is not an error.
pub fn parse_authorized_keys(text: &str) -> Result<Vec<PublicKey>, KeyError> {
    authorized_keys_iter(text).collect()
}

fn authorized_keys_iter(text: &str) -> impl Iterator<Item = Result<PublicKey, KeyError>> + '_ {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line_no, line)| {
            PublicKey::from_openssh(strip_options(line)).map_err(|e| KeyError::AuthorizedKey {
                line: line_no,
                reason: e.to_string(),
            })
        })
}

/// Drop the leading options field (`command="...",no-pty ssh-ed25519 ...`)
fn strip_options(line: &str) -> &str {
    let first = line.split_whitespace().next().unwrap_or_default();
    if Algorithm::new(first).is_ok() {
        return line;
    }

    let mut in_quotes = false;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => return line[idx..].trim_start(),
            _ => {}
        }
    }
    line
}

/// Check an offered public key (SSH wire format) against a source identity.
///
/// Keys are compared by their wire encoding. The listed keys are consumed in
/// order and the first equal one wins; a malformed entry reached before a
/// match is an invalid rule.
pub fn match_public_key(source: &SourceIdentity, offered: &[u8]) -> Result<bool, RouteError> {
    let material = source
        .authorized_keys()
        .map_err(|e| RouteError::InvalidRule(e.to_string()))?;

    let Some(material) = material else {
        return Ok(false);
    };

    let text = material
        .text("authorized_keys")
        .map_err(|e| RouteError::InvalidRule(e.to_string()))?;

    for key in authorized_keys_iter(&text) {
        let key = key.map_err(|e| {
            RouteError::InvalidRule(format!(
                "authorized keys for {:?}: {}",
                source.username, e
            ))
        })?;

        if key.public_key_bytes() == offered {
            debug!(
                "Offered key {} authorized for source {:?}",
                fingerprint_bytes(offered),
                source.username
            );
            return Ok(true);
        }
    }

    Ok(false)
}

/// Decode a destination private key.
pub fn decode_private_key(material: KeyMaterial<'_>) -> Result<Arc<PrivateKey>, RouteError> {
    let key_data = material
        .text("private_key")
        .map_err(|e| RouteError::CredentialDecodeError(e.to_string()))?;

    let key = parse_private_key(&key_data)
        .map_err(|e| RouteError::CredentialDecodeError(e.to_string()))?;

    debug!("Decoded {} private key", describe_key(&key));
    Ok(Arc::new(key))
}

fn parse_private_key(key_data: &str) -> Result<PrivateKey, KeyError> {
    // Legacy PEM marks encryption in its headers
    if key_data.contains("Proc-Type: 4,ENCRYPTED") {
        return Err(KeyError::PassphraseRequired);
    }

    let key = russh::keys::decode_secret_key(key_data, None)
        .map_err(|e| KeyError::ParseError(e.to_string()))?;

    if key.is_encrypted() {
        return Err(KeyError::PassphraseRequired);
    }
    Ok(key)
}

/// Get key type description
pub fn describe_key(key: &PrivateKey) -> String {
    key.algorithm().to_string()
}
