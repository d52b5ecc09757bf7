//! Per-account session pooling with a freshness window.
//!
//! Sessions are acquired through a [`VenueTransport`] and cached per account
//! key. A cached session is reused as long as its last use is within the
//! freshness window; past the window it is torn down and re-established.
//! Locking is sharded by account-key hash so unrelated accounts never
//! contend.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::AccountConfig;
use crate::error::VenueError;
use crate::models::{OrderSpec, Position, Quote, Ticket};

/// Opaque handle to one authenticated venue session.
pub type SessionId = u64;

/// Default freshness window for cached sessions.
pub const SESSION_FRESHNESS: Duration = Duration::from_secs(300);

const SHARDS: usize = 16;

/// Raw per-session venue protocol. One implementation per venue; the rest of
/// the system only sees [`crate::venue::VenueGateway`].
///
/// An accepted order means the venue took the request, not that the
/// resulting position is already queryable; callers must re-poll
/// `positions` to observe the effect.
#[async_trait]
pub trait VenueTransport: Send + Sync {
    async fn connect(&self, account: &AccountConfig) -> Result<SessionId, VenueError>;

    async fn disconnect(&self, session: SessionId);

    async fn positions(
        &self,
        session: SessionId,
        symbol: Option<&str>,
    ) -> Result<Vec<Position>, VenueError>;

    async fn tick(&self, session: SessionId, symbol: &str) -> Result<Quote, VenueError>;

    async fn order_open(&self, session: SessionId, spec: &OrderSpec) -> Result<(), VenueError>;

    async fn order_close(
        &self,
        session: SessionId,
        ticket: Ticket,
        spec: &OrderSpec,
    ) -> Result<(), VenueError>;

    async fn order_modify(
        &self,
        session: SessionId,
        ticket: Ticket,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<(), VenueError>;
}

struct Entry {
    session: SessionId,
    last_used: Instant,
}

/// Shared per-account session cache.
///
/// Safe for concurrent use by all pair workers; constructed once and
/// injected, never a global.
pub struct SessionPool<T: VenueTransport> {
    transport: Arc<T>,
    shards: Vec<Mutex<HashMap<String, Entry>>>,
    freshness: Duration,
}

impl<T: VenueTransport> SessionPool<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_freshness(transport, SESSION_FRESHNESS)
    }

    pub fn with_freshness(transport: Arc<T>, freshness: Duration) -> Self {
        Self {
            transport,
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            freshness,
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    /// Return a usable session for `account`, dialing only when no fresh
    /// cached session exists. Repeated calls within the freshness window
    /// return the same session without re-authenticating.
    pub async fn acquire(&self, account: &AccountConfig) -> Result<SessionId, VenueError> {
        let key = account.key();
        let mut shard = self.shard(&key).lock().await;

        if let Some(entry) = shard.get_mut(&key) {
            if entry.last_used.elapsed() < self.freshness {
                entry.last_used = Instant::now();
                return Ok(entry.session);
            }
            debug!(account = %key, "session stale, re-dialing");
            self.transport.disconnect(entry.session).await;
            shard.remove(&key);
        }

        let session = self.transport.connect(account).await?;
        shard.insert(
            key,
            Entry {
                session,
                last_used: Instant::now(),
            },
        );
        Ok(session)
    }

    /// Mark the account's session as just used, keeping it hot after a slow
    /// gateway call.
    pub async fn release(&self, account: &AccountConfig) {
        let key = account.key();
        let mut shard = self.shard(&key).lock().await;
        if let Some(entry) = shard.get_mut(&key) {
            entry.last_used = Instant::now();
        }
    }

    /// Disconnect and drop every session idle past the freshness window.
    /// Returns the number of evicted sessions.
    pub async fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().await;
            let stale: Vec<String> = shard
                .iter()
                .filter(|(_, entry)| entry.last_used.elapsed() >= self.freshness)
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                if let Some(entry) = shard.remove(&key) {
                    self.transport.disconnect(entry.session).await;
                    evicted += 1;
                }
            }
        }
        evicted
    }

    /// Evict idle sessions on a fixed cadence. Runs until aborted.
    pub async fn run_janitor(self: Arc<Self>) {
        let every = self.freshness;
        loop {
            tokio::time::sleep(every).await;
            let evicted = self.evict_idle().await;
            if evicted > 0 {
                debug!(evicted, "evicted idle venue sessions");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::sim::SimVenue;
    use rust_decimal_macros::dec;

    fn account(login: u64) -> AccountConfig {
        AccountConfig {
            login,
            server: "Test-Server".to_string(),
            password: "pw".to_string(),
            password_env: None,
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_fresh_session() {
        let venue = Arc::new(SimVenue::new());
        venue.set_quote("EURUSD", dec!(1.0), dec!(1.0));
        let pool = SessionPool::new(venue.clone());

        let first = pool.acquire(&account(1)).await.unwrap();
        let second = pool.acquire(&account(1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(venue.stats().connects, 1);
    }

    #[tokio::test]
    async fn test_distinct_accounts_get_distinct_sessions() {
        let venue = Arc::new(SimVenue::new());
        let pool = SessionPool::new(venue.clone());

        let a = pool.acquire(&account(1)).await.unwrap();
        let b = pool.acquire(&account(2)).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(venue.stats().connects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_session_is_redialed() {
        let venue = Arc::new(SimVenue::new());
        let pool = SessionPool::with_freshness(venue.clone(), Duration::from_secs(300));

        let first = pool.acquire(&account(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        let second = pool.acquire(&account(1)).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(venue.stats().connects, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_drops_only_stale_entries() {
        let venue = Arc::new(SimVenue::new());
        let pool = SessionPool::with_freshness(venue.clone(), Duration::from_secs(300));

        pool.acquire(&account(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        pool.acquire(&account(2)).await.unwrap();
        tokio::time::advance(Duration::from_secs(150)).await;

        // Account 1 is now 350s idle, account 2 only 150s.
        assert_eq!(pool.evict_idle().await, 1);
        assert_eq!(pool.evict_idle().await, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        let venue = Arc::new(SimVenue::new());
        venue.fail_connects(1);
        let pool = SessionPool::new(venue.clone());

        let err = pool.acquire(&account(1)).await.unwrap_err();
        assert!(matches!(err, VenueError::ConnectFailed { .. }));

        // Next attempt succeeds; the failure was not cached.
        pool.acquire(&account(1)).await.unwrap();
    }
}
