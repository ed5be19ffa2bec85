//! Routing engine
//!
//! Entry points called by the surrounding SSH server:
//!
//! ```text
//!   supported_methods()  ── fetch_all ──────────▶ advertised_methods
//!   authenticate()       ── fetch_governing ────▶ identities ─▶ key match ─▶ resolve
//!                                                                            │ put
//!   verify_host_key()    ─────────────────────────────────────────▶ ConnectionCache
//! ```
//!
//! Every store call is bounded by the configured timeout and can be
//! cancelled by the caller. Nothing is retried here.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::{
    advertised_methods, match_public_key, matching_identities, resolve, AuthMethod,
    RoutingDecision,
};
use crate::config::EngineConfig;
use crate::error::RouteError;
use crate::rules::{RuleDocument, RuleStore, StoreError};
use crate::ssh::{
    fingerprint_bytes, spawn_sweeper, ConnectionCache, ConnectionId, HostKeyVerifier,
};

/// The credential a client offered in one login attempt
#[derive(Clone)]
pub enum OfferedCredential {
    Password(Zeroizing<String>),
    /// SSH wire-format public key
    PublicKey(Vec<u8>),
}

impl OfferedCredential {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(Zeroizing::new(password.into()))
    }

    pub fn public_key(key: impl Into<Vec<u8>>) -> Self {
        Self::PublicKey(key.into())
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Self::Password(_) => AuthMethod::Password,
            Self::PublicKey(_) => AuthMethod::PublicKey,
        }
    }
}

impl fmt::Debug for OfferedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(***)"),
            Self::PublicKey(key) => write!(f, "PublicKey({})", fingerprint_bytes(key)),
        }
    }
}

/// Find the identity a login attempt satisfies and resolve its destination.
///
/// Identities are tried in declared order. A password attempt routes on the
/// first identity match and passes the password through; a public key
/// attempt routes on the first matching identity listing that key.
pub fn route_in_document(
    conn: &ConnectionId,
    username: &str,
    offered: &OfferedCredential,
    document: &RuleDocument,
) -> Result<RoutingDecision, RouteError> {
    for source in matching_identities(username, document) {
        let source = source?;
        match offered {
            OfferedCredential::Password(password) if !password.is_empty() => {
                return resolve(conn, &document.destination, password);
            }
            OfferedCredential::Password(_) => {}
            OfferedCredential::PublicKey(key) => {
                if match_public_key(source, key)? {
                    return resolve(conn, &document.destination, "");
                }
            }
        }
    }

    Err(RouteError::NotFound(format!(
        "cannot find a matching document for username [{}]",
        username
    )))
}

pub struct RoutingEngine {
    store: Arc<dyn RuleStore>,
    config: EngineConfig,
    cache: Arc<ConnectionCache>,
    verifier: HostKeyVerifier,
    sweeper: Option<JoinHandle<()>>,
}

impl RoutingEngine {
    /// Create an engine over `store`.
    ///
    /// Inside a tokio runtime the cache sweeper is started as well; it is
    /// stopped when the engine is dropped.
    pub fn new(store: Arc<dyn RuleStore>, config: EngineConfig) -> Self {
        let cache = Arc::new(ConnectionCache::new(config.connection_idle_timeout()));
        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(spawn_sweeper(&cache, config.sweep_interval())),
            Err(_) => {
                debug!("No tokio runtime, connection cache expires lazily only");
                None
            }
        };

        Self {
            store,
            verifier: HostKeyVerifier::new(cache.clone()),
            cache,
            config,
            sweeper,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    /// Authentication methods to offer connecting clients
    pub async fn supported_methods(&self) -> Result<BTreeSet<AuthMethod>, RouteError> {
        self.supported_methods_with_cancel(&CancellationToken::new())
            .await
    }

    pub async fn supported_methods_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<AuthMethod>, RouteError> {
        let documents = self
            .bounded("listing", self.store.fetch_all(), cancel)
            .await?;
        let methods = advertised_methods(&documents);
        debug!(
            "Advertising {:?} from {} rule documents",
            methods,
            documents.len()
        );
        Ok(methods)
    }

    /// Route a login attempt.
    ///
    /// On success the destination is cached for `conn` so its host key can
    /// be verified later with [`RoutingEngine::verify_host_key`].
    pub async fn authenticate(
        &self,
        conn: &ConnectionId,
        username: &str,
        offered: &OfferedCredential,
    ) -> Result<RoutingDecision, RouteError> {
        self.authenticate_with_cancel(conn, username, offered, &CancellationToken::new())
            .await
    }

    pub async fn authenticate_with_cancel(
        &self,
        conn: &ConnectionId,
        username: &str,
        offered: &OfferedCredential,
        cancel: &CancellationToken,
    ) -> Result<RoutingDecision, RouteError> {
        let document = self
            .bounded(
                "query",
                self.store.fetch_governing(&self.config.governing),
                cancel,
            )
            .await?;

        let decision = match route_in_document(conn, username, offered, &document) {
            Ok(decision) => decision,
            Err(e) => {
                if e.is_config_error() {
                    warn!(
                        "Rule document {} is misconfigured ({} via {}): {}",
                        document.id,
                        username,
                        offered.method(),
                        e
                    );
                } else {
                    info!(
                        "Rejected {} via {} (connection {}): {}",
                        username,
                        offered.method(),
                        conn,
                        e
                    );
                }
                return Err(e);
            }
        };

        info!(
            "Routed {} via {} to {} (connection {}, rule document {})",
            username,
            offered.method(),
            decision.upstream.address(),
            conn,
            document.id
        );
        self.cache.put(conn, document.destination);
        Ok(decision)
    }

    /// Check the host key presented by the upstream of a routed connection
    pub fn verify_host_key(
        &self,
        conn: &ConnectionId,
        hostname: &str,
        peer_addr: &str,
        key: &[u8],
    ) -> Result<(), RouteError> {
        self.verifier.verify(conn, hostname, peer_addr, key)
    }

    /// Forget a connection's state, e.g. when the transport tears it down
    pub fn release(&self, conn: &ConnectionId) {
        self.cache.remove(conn);
    }

    /// Run a store call under the configured timeout and the caller's token
    async fn bounded<T, F>(
        &self,
        what: &str,
        call: F,
        cancel: &CancellationToken,
    ) -> Result<T, RouteError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.config.store_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Rule store {} cancelled", what);
                Err(RouteError::Cancelled)
            }
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(result) => result.map_err(RouteError::from),
                Err(_) => {
                    warn!("Rule store {} timed out after {:?}", what, timeout);
                    Err(RouteError::StoreUnavailable(format!(
                        "{} timed out after {:?}",
                        what, timeout
                    )))
                }
            },
        }
    }
}

impl Drop for RoutingEngine {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credential;
    use crate::rules::{
        DestinationDescriptor, GoverningPolicy, MemoryRuleStore, SourceIdentity,
    };
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::time::Duration;

    const ALICE_PUB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/alice.pub"));
    const OTHER_PUB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/other.pub"));
    const HOST_PUB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/host.pub"));
    const BROKER_KEY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/testdata/broker"));

    fn wire_bytes(line: &str) -> Vec<u8> {
        BASE64.decode(line.split_whitespace().nth(1).unwrap()).unwrap()
    }

    fn alice_document() -> RuleDocument {
        RuleDocument {
            id: "alice-rules".into(),
            sources: vec![SourceIdentity {
                authorized_keys_encoded: BASE64.encode(ALICE_PUB),
                ..SourceIdentity::exact("alice")
            }],
            destination: DestinationDescriptor {
                host: "10.0.0.5:22".into(),
                private_key_encoded: BASE64.encode(BROKER_KEY),
                known_hosts_encoded: BASE64.encode(format!("10.0.0.5 {}", HOST_PUB)),
                ..Default::default()
            },
        }
    }

    fn engine_with(documents: Vec<RuleDocument>, config: EngineConfig) -> RoutingEngine {
        RoutingEngine::new(Arc::new(MemoryRuleStore::new(documents)), config)
    }

    fn engine(documents: Vec<RuleDocument>) -> RoutingEngine {
        engine_with(documents, EngineConfig::default())
    }

    struct SlowStore;

    #[async_trait]
    impl RuleStore for SlowStore {
        async fn fetch_all(&self) -> Result<Vec<RuleDocument>, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![])
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl RuleStore for BrokenStore {
        async fn fetch_all(&self) -> Result<Vec<RuleDocument>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_scenario_a_public_key_routes_with_private_key() {
        let engine = engine(vec![alice_document()]);
        let conn = ConnectionId::from("conn-a");

        let decision = engine
            .authenticate(&conn, "alice", &OfferedCredential::public_key(wire_bytes(ALICE_PUB)))
            .await
            .unwrap();

        assert_eq!(decision.upstream.host, "10.0.0.5");
        assert_eq!(decision.upstream.port, 22);
        assert_eq!(decision.upstream.username, None);
        match &decision.credential {
            Credential::PrivateKey(key) => assert_eq!(key.algorithm().as_str(), "ssh-ed25519"),
            other => panic!("expected private key, got {:?}", other),
        }

        // Routing cached the destination for the later host key check
        engine
            .verify_host_key(&conn, "10.0.0.5:22", "10.0.0.5:22", &wire_bytes(HOST_PUB))
            .unwrap();
    }

    #[tokio::test]
    async fn test_scenario_b_unknown_user_rejected() {
        let engine = engine(vec![alice_document()]);
        let conn = ConnectionId::from("conn-b");

        let result = engine
            .authenticate(&conn, "bob", &OfferedCredential::public_key(wire_bytes(ALICE_PUB)))
            .await;
        assert!(matches!(result, Err(RouteError::NotFound(_))));
        assert!(engine.cache().get(&conn).is_none());
    }

    #[tokio::test]
    async fn test_scenario_c_destination_password_wins() {
        let document = RuleDocument {
            id: "ci".into(),
            sources: vec![SourceIdentity::pattern("^ci-.*$")],
            destination: DestinationDescriptor {
                host: "10.0.0.9:22".into(),
                password: "secret".into(),
                ..Default::default()
            },
        };
        let engine = engine(vec![document]);

        let decision = engine
            .authenticate(
                &ConnectionId::from("conn-c"),
                "ci-build7",
                &OfferedCredential::password("clientpw"),
            )
            .await
            .unwrap();
        match &decision.credential {
            Credential::Password(p) => assert_eq!(p.as_str(), "secret"),
            other => panic!("expected password, got {:?}", other),
        }
        assert_eq!(decision.upstream.address(), "10.0.0.9:22");
    }

    #[tokio::test]
    async fn test_scenario_d_no_usable_credential() {
        let document = RuleDocument {
            id: "keys-only".into(),
            sources: vec![SourceIdentity {
                authorized_keys_inline: ALICE_PUB.into(),
                ..SourceIdentity::exact("alice")
            }],
            destination: DestinationDescriptor {
                host: "10.0.0.5:22".into(),
                ..Default::default()
            },
        };
        let engine = engine(vec![document]);
        let conn = ConnectionId::from("conn-d");

        let result = engine
            .authenticate(&conn, "alice", &OfferedCredential::public_key(wire_bytes(ALICE_PUB)))
            .await;
        assert!(matches!(result, Err(RouteError::NoUsableCredential)));
        assert!(engine.cache().get(&conn).is_none());
    }

    #[tokio::test]
    async fn test_password_passthrough() {
        let mut document = alice_document();
        document.sources.push(SourceIdentity::exact("carol"));
        document.destination.username = "ops".into();
        let engine = engine(vec![document]);

        let decision = engine
            .authenticate(
                &ConnectionId::from("conn-1"),
                "carol",
                &OfferedCredential::password("carols-pw"),
            )
            .await
            .unwrap();
        assert_eq!(decision.upstream.username.as_deref(), Some("ops"));
        match &decision.credential {
            Credential::Password(p) => assert_eq!(p.as_str(), "carols-pw"),
            other => panic!("expected password, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_password_is_not_accepted() {
        let engine = engine(vec![alice_document()]);
        let result = engine
            .authenticate(
                &ConnectionId::from("conn-1"),
                "alice",
                &OfferedCredential::password(""),
            )
            .await;
        assert!(matches!(result, Err(RouteError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_wrong_key_falls_through_to_later_identity() {
        let mut document = alice_document();
        document.sources.push(SourceIdentity {
            authorized_keys_inline: OTHER_PUB.into(),
            ..SourceIdentity::pattern("^ali")
        });
        let engine = engine(vec![document]);

        engine
            .authenticate(
                &ConnectionId::from("conn-1"),
                "alice",
                &OfferedCredential::public_key(wire_bytes(OTHER_PUB)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_rule_is_not_a_non_match() {
        let mut document = alice_document();
        document.sources.insert(0, SourceIdentity::pattern("(broken"));
        let engine = engine(vec![document]);

        let result = engine
            .authenticate(
                &ConnectionId::from("conn-1"),
                "alice",
                &OfferedCredential::public_key(wire_bytes(ALICE_PUB)),
            )
            .await;
        assert!(matches!(result, Err(RouteError::InvalidRule(_))));
    }

    #[tokio::test]
    async fn test_multiple_documents_need_explicit_policy() {
        let mut other = alice_document();
        other.id = "second".into();
        other.destination.host = "10.0.0.6:22".into();
        let documents = vec![alice_document(), other];
        let offered = OfferedCredential::public_key(wire_bytes(ALICE_PUB));
        let conn = ConnectionId::from("conn-1");

        let ambiguous = engine(documents.clone());
        assert!(matches!(
            ambiguous.authenticate(&conn, "alice", &offered).await,
            Err(RouteError::AmbiguousRules(2))
        ));

        let by_id = engine_with(
            documents,
            EngineConfig {
                governing: GoverningPolicy::ById { id: "second".into() },
                ..Default::default()
            },
        );
        let decision = by_id.authenticate(&conn, "alice", &offered).await.unwrap();
        assert_eq!(decision.upstream.host, "10.0.0.6");
    }

    #[tokio::test]
    async fn test_supported_methods() {
        let mut document = alice_document();
        document.sources.push(SourceIdentity::exact("carol"));
        let engine = engine(vec![document]);

        let methods = engine.supported_methods().await.unwrap();
        assert_eq!(
            methods.into_iter().collect::<Vec<_>>(),
            vec![AuthMethod::Password, AuthMethod::PublicKey]
        );

        let empty = self::engine(vec![]);
        assert!(empty.supported_methods().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let engine = RoutingEngine::new(Arc::new(BrokenStore), EngineConfig::default());
        assert!(matches!(
            engine.supported_methods().await,
            Err(RouteError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_store_timeout_is_unavailable() {
        let config = EngineConfig {
            store_timeout_secs: 1,
            ..Default::default()
        };
        let engine = RoutingEngine::new(Arc::new(SlowStore), config);

        let result = engine
            .authenticate(
                &ConnectionId::from("conn-1"),
                "alice",
                &OfferedCredential::password("pw"),
            )
            .await;
        assert!(matches!(result, Err(RouteError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let engine = RoutingEngine::new(Arc::new(SlowStore), EngineConfig::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine.authenticate_with_cancel(
                &ConnectionId::from("conn-1"),
                "alice",
                &OfferedCredential::password("pw"),
                &cancel,
            ),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(RouteError::Cancelled)));
    }

    #[tokio::test]
    async fn test_verify_after_release_is_expired() {
        let engine = engine(vec![alice_document()]);
        let conn = ConnectionId::from("conn-1");
        engine
            .authenticate(&conn, "alice", &OfferedCredential::public_key(wire_bytes(ALICE_PUB)))
            .await
            .unwrap();

        engine.release(&conn);
        assert!(matches!(
            engine.verify_host_key(&conn, "10.0.0.5:22", "", &wire_bytes(HOST_PUB)),
            Err(RouteError::ConnectionExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_after_idle_expiry() {
        let config = EngineConfig {
            connection_idle_secs: 1,
            ..Default::default()
        };
        let engine = engine_with(vec![alice_document()], config);
        let conn = ConnectionId::from("conn-1");
        engine
            .authenticate(&conn, "alice", &OfferedCredential::public_key(wire_bytes(ALICE_PUB)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(matches!(
            engine.verify_host_key(&conn, "10.0.0.5:22", "", &wire_bytes(HOST_PUB)),
            Err(RouteError::ConnectionExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_verify_mismatch() {
        let engine = engine(vec![alice_document()]);
        let conn = ConnectionId::from("conn-1");
        engine
            .authenticate(&conn, "alice", &OfferedCredential::public_key(wire_bytes(ALICE_PUB)))
            .await
            .unwrap();

        assert!(matches!(
            engine.verify_host_key(&conn, "10.0.0.5:22", "", &wire_bytes(OTHER_PUB)),
            Err(RouteError::HostKeyMismatch { .. })
        ));
    }

    #[test]
    fn test_offered_credential_debug_hides_password() {
        let offered = OfferedCredential::password("hunter2");
        assert_eq!(format!("{:?}", offered), "Password(***)");
        assert_eq!(offered.method(), AuthMethod::Password);
    }
}
