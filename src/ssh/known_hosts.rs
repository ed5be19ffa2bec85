//! Known hosts matching for upstream host key verification
//!
//! Parses known_hosts text carried by a destination and checks a presented
//! host key against it:
//! - `hostpatterns keytype base64key [comment]` lines, `#` comments
//! - comma-separated patterns with `*`/`?` wildcards and `!` negation
//! - `[host]:port` patterns for non-default ports
//! - `@revoked` markers; `@cert-authority` lines are not supported and ignored
//! - hashed (`|1|salt|hash`) hostnames, matched by HMAC-SHA1

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use russh::keys::ssh_key::public::KeyData;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::auth::split_host_port;
use crate::error::RouteError;

type HmacSha1 = Hmac<Sha1>;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq)]
pub enum HostKeyVerification {
    /// Key matches known_hosts entry
    Verified,
    /// Host not in known_hosts
    Unknown { host: String, fingerprint: String },
    /// Host known, but not with this key (potential MITM)
    Changed {
        host: String,
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
    /// Key listed under `@revoked`
    Revoked { fingerprint: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    None,
    Revoked,
    CertAuthority,
}

/// One host pattern from a known_hosts line
#[derive(Debug, Clone)]
enum HostPattern {
    /// `host` or `[host]:port`, optionally negated
    Plain {
        negated: bool,
        host: String,
        port: u16,
    },
    /// `|1|salt|hash` of the `host` / `[host]:port` form
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
}

#[derive(Debug, Clone)]
struct HostKeyEntry {
    marker: Marker,
    patterns: Vec<HostPattern>,
    key: KeyData,
}

/// Parsed known_hosts data
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: Vec<HostKeyEntry>,
}

impl KnownHosts {
    /// Parse known_hosts text; any malformed line rejects the whole set
    pub fn parse(text: &str) -> Result<Self, RouteError> {
        let mut entries = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let malformed = |reason: String| {
                RouteError::TrustDataInvalid(format!("line {}: {}", index + 1, reason))
            };

            let mut parts = line.split_whitespace();
            let mut first = parts.next().unwrap_or_default();
            let marker = match first {
                "@revoked" => Marker::Revoked,
                "@cert-authority" => Marker::CertAuthority,
                m if m.starts_with('@') => return Err(malformed(format!("unknown marker {}", m))),
                _ => Marker::None,
            };
            if marker != Marker::None {
                first = parts.next().unwrap_or_default();
            }

            let (Some(key_type), Some(key_b64)) = (parts.next(), parts.next()) else {
                return Err(malformed("expected host patterns, key type and key".to_string()));
            };
            if first.is_empty() {
                return Err(malformed("missing host patterns".to_string()));
            }

            let key = russh::keys::parse_public_key_base64(key_b64)
                .map_err(|e| malformed(format!("invalid key: {}", e)))?;
            if key.algorithm().as_str() != key_type {
                return Err(malformed(format!(
                    "key type {} does not match key data {}",
                    key_type,
                    key.algorithm()
                )));
            }

            let patterns = first
                .split(',')
                .map(parse_pattern)
                .collect::<Result<Vec<_>, _>>()
                .map_err(malformed)?;

            entries.push(HostKeyEntry {
                marker,
                patterns,
                key: key.key_data().clone(),
            });
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verify a host key for the dialed hostname, or the peer address when
    /// no hostname is known.
    ///
    /// Both are `host:port`. Revocation applies regardless of host.
    pub fn verify(&self, hostname: &str, peer_addr: &str, key: &PublicKey) -> HostKeyVerification {
        let fingerprint = fingerprint(key);

        if self
            .entries
            .iter()
            .any(|e| e.marker == Marker::Revoked && &e.key == key.key_data())
        {
            warn!("Host key {} is revoked", fingerprint);
            return HostKeyVerification::Revoked { fingerprint };
        }

        let address = if hostname.trim().is_empty() {
            peer_addr
        } else {
            hostname
        };
        let (host, port) = normalize_address(address);
        self.verify_address(&host, port, key, &fingerprint)
    }

    fn verify_address(
        &self,
        host: &str,
        port: u16,
        key: &PublicKey,
        fingerprint: &str,
    ) -> HostKeyVerification {
        let lookup_key = make_key(host, port);
        let mut expected = Vec::new();

        for entry in &self.entries {
            if entry.marker != Marker::None || !host_matches(&entry.patterns, host, port) {
                continue;
            }
            if &entry.key == key.key_data() {
                debug!("Host key verified for {} ({})", lookup_key, fingerprint);
                return HostKeyVerification::Verified;
            }
            expected.push(entry);
        }

        match expected.first() {
            None => {
                debug!("Unknown host: {}", lookup_key);
                HostKeyVerification::Unknown {
                    host: lookup_key,
                    fingerprint: fingerprint.to_string(),
                }
            }
            Some(entry) => {
                let expected_fingerprint = fingerprint_key_data(&entry.key);
                warn!(
                    "HOST KEY CHANGED for {}! Expected {}, got {}",
                    lookup_key, expected_fingerprint, fingerprint
                );
                HostKeyVerification::Changed {
                    host: lookup_key,
                    expected_fingerprint,
                    actual_fingerprint: fingerprint.to_string(),
                }
            }
        }
    }
}

/// Parse a `host`, `[host]:port`, `!pattern` or `|1|salt|hash` entry
fn parse_pattern(pattern: &str) -> Result<HostPattern, String> {
    if let Some(hashed) = pattern.strip_prefix('|') {
        return parse_hashed(hashed);
    }

    let (negated, pattern) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };

    if pattern.is_empty() {
        return Err("empty host pattern".to_string());
    }

    let (host, port) = match pattern.strip_prefix('[') {
        Some(rest) => {
            let (host, port) = rest
                .split_once("]:")
                .ok_or_else(|| format!("invalid host pattern {}", pattern))?;
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port in host pattern {}", pattern))?;
            (host, port)
        }
        None => (pattern, 22),
    };

    Ok(HostPattern::Plain {
        negated,
        host: host.to_lowercase(),
        port,
    })
}

/// `1|salt|hash` with both parts base64
fn parse_hashed(hashed: &str) -> Result<HostPattern, String> {
    let mut parts = hashed.split('|');
    let (Some("1"), Some(salt), Some(hash), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("unsupported hashed host |{}", hashed));
    };

    let decode = |part: &str| {
        BASE64
            .decode(part)
            .map_err(|e| format!("invalid hashed host |{}: {}", hashed, e))
    };
    Ok(HostPattern::Hashed {
        salt: decode(salt)?,
        hash: decode(hash)?,
    })
}

fn hashed_host_matches(salt: &[u8], hash: &[u8], host: &str, port: u16) -> bool {
    let Ok(mut mac) = HmacSha1::new_from_slice(salt) else {
        return false;
    };
    mac.update(make_key(host, port).as_bytes());
    mac.verify_slice(hash).is_ok()
}

/// A negated match vetoes the line; otherwise any positive match wins
fn host_matches(patterns: &[HostPattern], host: &str, port: u16) -> bool {
    let host = host.to_lowercase();
    let mut matched = false;

    for pattern in patterns {
        match pattern {
            HostPattern::Hashed { salt, hash } => {
                if hashed_host_matches(salt, hash, &host, port) {
                    matched = true;
                }
            }
            HostPattern::Plain {
                negated,
                host: pattern_host,
                port: pattern_port,
            } => {
                if *pattern_port != port || !wildcard_match(pattern_host, &host) {
                    continue;
                }
                if *negated {
                    return false;
                }
                matched = true;
            }
        }
    }

    matched
}

/// Glob match supporting `*` (any run) and `?` (any one char)
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// `host:port` to (host, port); anything unparseable is a bare host on 22
fn normalize_address(addr: &str) -> (String, u16) {
    split_host_port(addr).unwrap_or_else(|_| (addr.trim().to_string(), 22))
}

/// Create lookup key for host:port
pub fn make_key(host: &str, port: u16) -> String {
    let host = host.to_lowercase();
    if port == 22 {
        host
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// Compute SHA256 fingerprint of public key
pub fn fingerprint(key: &PublicKey) -> String {
    fingerprint_bytes(&key.public_key_bytes())
}

/// SHA256 fingerprint of SSH wire-format key bytes
pub fn fingerprint_bytes(key_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_bytes);
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

fn fingerprint_key_data(key: &KeyData) -> String {
    fingerprint(&PublicKey::from(key.clone()))
}
