//! Connection State Cache
//!
//! Short-lived, memory-only map from a connection to the destination chosen
//! for it, kept until the upstream host key has been checked.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──put()──▶ Routed ──verify──▶ Verified
//!                          └─verify──▶ Rejected
//! ```
//!
//! Entries expire after an idle bound. `get()` does not renew an entry, only
//! a new `put()` does. Expired entries are dropped lazily on lookup and
//! eagerly by the sweeper task.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::rules::DestinationDescriptor;

/// Default idle bound for a cached connection (1 minute)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default sweep period (10 minutes)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Opaque connection identity assigned by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identity (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Per-connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// Routing decision made, host key not yet checked
    Routed,
    Verified,
    Rejected,
}

/// A live cache entry as seen by readers
#[derive(Debug, Clone)]
pub struct CachedConnection {
    pub destination: Arc<DestinationDescriptor>,
    pub phase: ConnectionPhase,
}

#[derive(Clone)]
struct CacheEntry {
    destination: Arc<DestinationDescriptor>,
    phase: ConnectionPhase,
    routed_at: Instant,
}

pub struct ConnectionCache {
    entries: DashMap<ConnectionId, CacheEntry>,
    idle_timeout: Duration,
}

impl ConnectionCache {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Record the destination chosen for a connection (enters `Routed`)
    pub fn put(&self, conn: &ConnectionId, destination: DestinationDescriptor) {
        let previous = self.entries.insert(
            conn.clone(),
            CacheEntry {
                destination: Arc::new(destination),
                phase: ConnectionPhase::Routed,
                routed_at: Instant::now(),
            },
        );
        if previous.is_some() {
            debug!("Connection {} re-routed, cache entry renewed", conn);
        } else {
            debug!("Connection {} cached", conn);
        }
    }

    /// Look up a connection; `None` when absent or expired
    pub fn get(&self, conn: &ConnectionId) -> Option<CachedConnection> {
        if let Some(entry) = self.entries.get(conn) {
            if entry.routed_at.elapsed() < self.idle_timeout {
                return Some(CachedConnection {
                    destination: entry.destination.clone(),
                    phase: entry.phase,
                });
            }
            // Expired, remove from cache
            drop(entry);
            self.entries
                .remove_if(conn, |_, e| e.routed_at.elapsed() >= self.idle_timeout);
            debug!("Connection {} expired", conn);
        }
        None
    }

    /// Move `conn` from phase `from` to `to`.
    ///
    /// False when the entry is gone, expired or no longer in `from`, so a
    /// terminal phase is written at most once.
    pub fn transition(
        &self,
        conn: &ConnectionId,
        from: ConnectionPhase,
        to: ConnectionPhase,
    ) -> bool {
        match self.entries.get_mut(conn) {
            Some(mut entry)
                if entry.phase == from && entry.routed_at.elapsed() < self.idle_timeout =>
            {
                entry.phase = to;
                true
            }
            _ => false,
        }
    }

    /// Drop a connection's state (e.g. on teardown)
    pub fn remove(&self, conn: &ConnectionId) {
        self.entries.remove(conn);
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.routed_at.elapsed() < self.idle_timeout);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Swept {} expired connection entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

/// Start the periodic expiry sweep on the current tokio runtime.
///
/// The task holds only a weak reference and exits once the cache is dropped.
pub fn spawn_sweeper(cache: &Arc<ConnectionCache>, interval: Duration) -> JoinHandle<()> {
    let cache: Weak<ConnectionCache> = Arc::downgrade(cache);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(live) = cache.upgrade() else {
                break;
            };
            live.sweep();
        }

        info!("Connection cache sweeper stopped");
    })
}
