//! Process-wide database handle.
//!
//! [`ConnectionManager`] connects lazily on first use and hands the same
//! [`SqlitePool`] to every caller afterwards. Concurrent callers that arrive
//! while a connect is in flight join that attempt instead of starting their
//! own, so at most one attempt runs at a time. A failed attempt is not
//! cached: the next caller starts over.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::db;
use crate::error::AppError;

#[derive(Debug, Clone, Error)]
pub enum ConnectFailure {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Driver(Arc<sqlx::Error>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Connecting,
    Disconnecting,
}

/// Opens a pool for a connection string.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, database_url: &str) -> Result<SqlitePool, sqlx::Error>;
}

/// Connects to SQLite and makes sure the schema exists.
pub struct SqliteConnector {
    pub max_connections: u32,
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, database_url: &str) -> Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // every connection to an in-memory database is a separate database
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(self.max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        db::init_schema(&pool).await?;
        Ok(pool)
    }
}

type PendingConnect = Shared<BoxFuture<'static, Result<SqlitePool, ConnectFailure>>>;

enum Slot {
    Disconnected,
    Connecting { attempt: u64, pending: PendingConnect },
    Connected(SqlitePool),
    Disconnecting,
}

pub struct ConnectionManager {
    database_url: Option<String>,
    connect_timeout: Duration,
    connector: Arc<dyn Connector>,
    slot: Mutex<Slot>,
    attempts: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        database_url: Option<String>,
        connect_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            database_url,
            connect_timeout,
            connector,
            slot: Mutex::new(Slot::Disconnected),
            attempts: AtomicU64::new(0),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live pool, connecting first if needed.
    pub async fn acquire(&self) -> Result<SqlitePool, AppError> {
        let (attempt, pending) = {
            let mut slot = self.slot();
            let joined = match &*slot {
                Slot::Connected(pool) => return Ok(pool.clone()),
                Slot::Connecting { attempt, pending } => Some((*attempt, pending.clone())),
                Slot::Disconnected | Slot::Disconnecting => None,
            };
            match joined {
                Some(joined) => joined,
                None => {
                    let url = self
                        .database_url
                        .as_deref()
                        .map(str::trim)
                        .filter(|url| !url.is_empty())
                        .ok_or_else(|| {
                            AppError::Configuration("DATABASE_URL must be set".to_string())
                        })?;
                    let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    let pending = self.start(url.to_string());
                    *slot = Slot::Connecting {
                        attempt,
                        pending: pending.clone(),
                    };
                    tracing::debug!(attempt, "connecting to database");
                    (attempt, pending)
                }
            }
        };

        let outcome = pending.await;

        let mut slot = self.slot();
        let current = matches!(&*slot, Slot::Connecting { attempt: a, .. } if *a == attempt);
        match outcome {
            Ok(pool) => {
                if current {
                    *slot = Slot::Connected(pool.clone());
                    tracing::info!(attempt, "connected to database");
                }
                Ok(pool)
            }
            Err(err) => {
                if current {
                    *slot = Slot::Disconnected;
                    tracing::error!(attempt, error = %err, "database connection failed");
                }
                Err(AppError::Connection(err))
            }
        }
    }

    fn start(&self, url: String) -> PendingConnect {
        let connector = Arc::clone(&self.connector);
        let limit = self.connect_timeout;
        async move {
            match tokio::time::timeout(limit, connector.connect(&url)).await {
                Ok(Ok(pool)) => Ok(pool),
                Ok(Err(err)) => Err(ConnectFailure::Driver(Arc::new(err))),
                Err(_) => Err(ConnectFailure::TimedOut(limit)),
            }
        }
        .boxed()
        .shared()
    }

    /// Closes the live pool, if any. An attempt still in flight is left alone.
    pub async fn release(&self) {
        let pool = {
            let mut slot = self.slot();
            match std::mem::replace(&mut *slot, Slot::Disconnecting) {
                Slot::Connected(pool) => pool,
                other => {
                    *slot = other;
                    return;
                }
            }
        };

        pool.close().await;

        let mut slot = self.slot();
        if matches!(*slot, Slot::Disconnecting) {
            *slot = Slot::Disconnected;
        }
        tracing::info!("disconnected from database");
    }

    pub fn status(&self) -> ConnectionStatus {
        match &*self.slot() {
            Slot::Disconnected => ConnectionStatus::Disconnected,
            Slot::Connecting { .. } => ConnectionStatus::Connecting,
            Slot::Connected(_) => ConnectionStatus::Connected,
            Slot::Disconnecting => ConnectionStatus::Disconnecting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const MEMORY: &str = "sqlite::memory:";

    /// Counts connects and fails the first `failures` of them.
    struct CountingConnector {
        calls: AtomicUsize,
        failures: usize,
        delay: Duration,
    }

    impl CountingConnector {
        fn new(failures: usize, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                failures,
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, database_url: &str) -> Result<SqlitePool, sqlx::Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if call < self.failures {
                return Err(sqlx::Error::PoolTimedOut);
            }
            SqliteConnector { max_connections: 1 }
                .connect(database_url)
                .await
        }
    }

    fn manager(url: Option<&str>, connector: Arc<CountingConnector>) -> ConnectionManager {
        ConnectionManager::new(
            url.map(str::to_string),
            Duration::from_secs(5),
            connector,
        )
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_attempt() {
        let connector = CountingConnector::new(0, Duration::from_millis(50));
        let manager = Arc::new(manager(Some(MEMORY), connector.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.acquire().await })
            })
            .collect();

        let mut pools = Vec::new();
        for handle in handles {
            pools.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(connector.calls(), 1);
        assert_eq!(manager.status(), ConnectionStatus::Connected);

        // every caller got the same in-memory database
        sqlx::query("CREATE TABLE shared_table (id INTEGER)")
            .execute(&pools[0])
            .await
            .unwrap();
        for pool in &pools[1..] {
            let (count,): (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'shared_table'",
            )
            .fetch_one(pool)
            .await
            .unwrap();
            assert_eq!(count, 1);
        }
    }

    #[tokio::test]
    async fn cached_pool_skips_connector() {
        let connector = CountingConnector::new(0, Duration::ZERO);
        let manager = manager(Some(MEMORY), connector.clone());

        manager.acquire().await.unwrap();
        manager.acquire().await.unwrap();
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test]
    async fn missing_url_is_a_configuration_error() {
        let connector = CountingConnector::new(0, Duration::ZERO);

        for url in [None, Some(""), Some("   ")] {
            let manager = manager(url, connector.clone());
            let err = manager.acquire().await.unwrap_err();
            assert!(matches!(err, AppError::Configuration(_)));
            assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        }
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test]
    async fn failed_attempt_allows_retry() {
        let connector = CountingConnector::new(1, Duration::ZERO);
        let manager = manager(Some(MEMORY), connector.clone());

        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::Connection(ConnectFailure::Driver(_))));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        manager.acquire().await.unwrap();
        assert_eq!(connector.calls(), 2);
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn slow_connect_times_out() {
        let connector = CountingConnector::new(0, Duration::from_millis(200));
        let manager = ConnectionManager::new(
            Some(MEMORY.to_string()),
            Duration::from_millis(20),
            connector.clone(),
        );

        let err = manager.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::Connection(ConnectFailure::TimedOut(_))));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn status_is_connecting_while_in_flight() {
        let connector = CountingConnector::new(0, Duration::from_millis(100));
        let manager = Arc::new(manager(Some(MEMORY), connector));

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.status(), ConnectionStatus::Connecting);

        task.await.unwrap().unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let connector = CountingConnector::new(0, Duration::ZERO);
        let manager = manager(Some(MEMORY), connector.clone());

        manager.release().await;
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        let pool = manager.acquire().await.unwrap();
        manager.release().await;
        assert!(pool.is_closed());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        manager.release().await;

        manager.acquire().await.unwrap();
        assert_eq!(connector.calls(), 2);
    }
}
