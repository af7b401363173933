//! Fixed-size pool of SQLite connections.
//!
//! Every connection is opened up front. A connection that fails to open
//! shrinks the pool instead of aborting startup; a pool with no live
//! connections fails every acquire immediately with `StoreUnavailable`.
//!
//! Checkout takes a semaphore permit and pops the idle queue, so the number
//! of available permits always equals the number of idle connections.
//! Exhaustion is a bounded wait (`acquire_timeout`) followed by
//! `StoreUnavailable`.
//!
//! On release any open transaction is rolled back, the statement cache is
//! cleared and the connection is pinged before it is queued again. A
//! connection that fails the reset is closed and its permit forgotten,
//! shrinking the pool by one.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use map_common::{MapError, MapResult};

const CHECKED_OUT: &str = "pooled connection is present until released";

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub path: PathBuf,
    pub size: usize,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl PoolConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            size: 5,
            acquire_timeout: Duration::from_millis(2000),
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured size.
    pub capacity: usize,
    /// Connections currently open, idle or checked out.
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    pub acquires: u64,
    pub timeouts: u64,
    /// Connections closed because they failed the release reset.
    pub discarded: u64,
}

pub struct ConnectionPool {
    idle: Mutex<VecDeque<SqliteConnection>>,
    permits: Arc<Semaphore>,
    capacity: usize,
    live: AtomicUsize,
    acquire_timeout: Duration,
    acquires: AtomicU64,
    timeouts: AtomicU64,
    discarded: AtomicU64,
}

impl ConnectionPool {
    /// Open `config.size` connections to the database file, creating it if needed.
    pub async fn open(config: &PoolConfig) -> Arc<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let mut idle = VecDeque::with_capacity(config.size);
        for slot in 0..config.size {
            match options.connect().await {
                Ok(conn) => idle.push_back(conn),
                Err(e) => warn!(
                    slot = slot,
                    path = %config.path.display(),
                    error = %e,
                    "Failed to open database connection"
                ),
            }
        }

        let live = idle.len();
        if live == 0 {
            error!(
                path = %config.path.display(),
                requested = config.size,
                "No database connections could be opened; geometry store is unavailable"
            );
        } else if live < config.size {
            warn!(
                path = %config.path.display(),
                requested = config.size,
                opened = live,
                "Connection pool started with reduced size"
            );
        } else {
            info!(
                path = %config.path.display(),
                size = live,
                "Connection pool ready"
            );
        }

        Arc::new(Self {
            idle: Mutex::new(idle),
            permits: Arc::new(Semaphore::new(live)),
            capacity: config.size,
            live: AtomicUsize::new(live),
            acquire_timeout: config.acquire_timeout,
            acquires: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        })
    }

    /// Check out a connection, waiting at most `acquire_timeout`.
    pub async fn acquire(self: &Arc<Self>) -> MapResult<PooledConnection> {
        if self.live.load(Ordering::Acquire) == 0 {
            return Err(MapError::StoreUnavailable(
                "no database connections are open".to_string(),
            ));
        }

        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(MapError::StoreUnavailable(
                    "connection pool is closed".to_string(),
                ))
            }
            Err(_) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    live = self.live.load(Ordering::Relaxed),
                    "Timed out waiting for a database connection"
                );
                return Err(MapError::StoreUnavailable(format!(
                    "timed out after {}ms waiting for a database connection",
                    self.acquire_timeout.as_millis()
                )));
            }
        };

        let Some(conn) = self.idle_queue().pop_front() else {
            // A permit without a queued connection means the two drifted apart.
            permit.forget();
            return Err(MapError::Internal(
                "connection pool queue is empty".to_string(),
            ));
        };

        self.acquires.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: Arc::clone(self),
        })
    }

    /// Trivial round trip on a pooled connection.
    pub async fn ping(self: &Arc<Self>) -> MapResult<()> {
        let mut conn = self.acquire().await?;
        let result = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&mut *conn)
            .await;
        conn.release().await;
        result.map(|_| ()).map_err(db_error)
    }

    pub fn stats(&self) -> PoolStats {
        let live = self.live.load(Ordering::Relaxed);
        let idle = self.idle_queue().len();
        PoolStats {
            capacity: self.capacity,
            live,
            idle,
            in_use: live.saturating_sub(idle),
            acquires: self.acquires.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn idle_queue(&self) -> MutexGuard<'_, VecDeque<SqliteConnection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn check_in(&self, mut conn: SqliteConnection, permit: Option<OwnedSemaphorePermit>) {
        match reset_connection(&mut conn).await {
            Ok(()) => {
                // Queue first so a woken waiter always finds a connection.
                self.idle_queue().push_back(conn);
                drop(permit);
            }
            Err(e) => {
                warn!(error = %e, "Discarding connection that failed reset");
                self.discard(conn, permit);
            }
        }
    }

    fn discard(&self, conn: SqliteConnection, permit: Option<OwnedSemaphorePermit>) {
        if let Some(permit) = permit {
            permit.forget();
        }
        let remaining = self.live.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        drop(conn);
        if remaining == 0 {
            error!("Last database connection discarded; geometry store is unavailable");
        }
    }
}

async fn reset_connection(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    match sqlx::query("ROLLBACK").execute(&mut *conn).await {
        Ok(_) => debug!("Rolled back transaction left open on released connection"),
        Err(sqlx::Error::Database(e)) if e.message().contains("no transaction is active") => {}
        Err(e) => return Err(e),
    }
    conn.clear_cached_statements().await?;
    conn.ping().await
}

/// Map a driver error onto the shared taxonomy.
pub(crate) fn db_error(e: sqlx::Error) -> MapError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            MapError::StoreUnavailable(e.to_string())
        }
        other => MapError::Database(other.to_string()),
    }
}

/// A checked-out connection. Hand it back with [`PooledConnection::release`];
/// dropping it schedules the same reset on the current runtime.
pub struct PooledConnection {
    conn: Option<SqliteConnection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    /// Reset the connection and return it to the pool.
    pub async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            let permit = self.permit.take();
            self.pool.check_in(conn, permit).await;
        }
    }
}

impl Deref for PooledConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect(CHECKED_OUT)
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect(CHECKED_OUT)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Pooled connection dropped without release; resetting in background");
                handle.spawn(async move { pool.check_in(conn, permit).await });
            }
            Err(_) => pool.discard(conn, permit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::temp_database;

    #[tokio::test]
    async fn test_open_creates_full_pool() {
        let (_dir, path) = temp_database();
        let pool = ConnectionPool::open(&PoolConfig::new(&path).with_size(3)).await;
        let stats = pool.stats();
        assert_eq!(stats.capacity, 3);
        assert_eq!(stats.live, 3);
        assert_eq!(stats.idle, 3);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_acquire_and_release_restores_idle() {
        let (_dir, path) = temp_database();
        let pool = ConnectionPool::open(&PoolConfig::new(&path).with_size(2)).await;

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().in_use, 1);
        conn.release().await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.acquires, 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let (_dir, path) = temp_database();
        let config = PoolConfig::new(&path)
            .with_size(1)
            .with_acquire_timeout(Duration::from_millis(50));
        let pool = ConnectionPool::open(&config).await;

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, MapError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(pool.stats().timeouts, 1);

        held.release().await;
        let again = pool.acquire().await.unwrap();
        again.release().await;
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let (_dir, path) = temp_database();
        let config = PoolConfig::new(&path)
            .with_size(1)
            .with_acquire_timeout(Duration::from_secs(5));
        let pool = ConnectionPool::open(&config).await;

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|c| drop(c)) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release().await;
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_connection_returns_to_pool() {
        let (_dir, path) = temp_database();
        let pool = ConnectionPool::open(&PoolConfig::new(&path).with_size(1)).await;

        drop(pool.acquire().await.unwrap());
        // Re-queued by a background task
        let conn = pool.acquire().await.unwrap();
        conn.release().await;
        assert_eq!(pool.stats().live, 1);
    }

    #[tokio::test]
    async fn test_unopenable_path_yields_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("nested").join("db.sqlite");
        let pool = ConnectionPool::open(&PoolConfig::new(&path).with_size(2)).await;

        assert_eq!(pool.live_connections(), 0);
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, MapError::StoreUnavailable(_)));
        assert!(pool.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_ping() {
        let (_dir, path) = temp_database();
        let pool = ConnectionPool::open(&PoolConfig::new(&path).with_size(1)).await;
        pool.ping().await.unwrap();
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_release_rolls_back_open_transaction() {
        let (_dir, path) = temp_database();
        let pool = ConnectionPool::open(&PoolConfig::new(&path).with_size(1)).await;

        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("CREATE TABLE t (v INTEGER)")
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query("BEGIN").execute(&mut *conn).await.unwrap();
        sqlx::query("INSERT INTO t (v) VALUES (1)")
            .execute(&mut *conn)
            .await
            .unwrap();
        conn.release().await;

        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("BEGIN").execute(&mut *conn).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
        sqlx::query("COMMIT").execute(&mut *conn).await.unwrap();
        conn.release().await;

        let stats = pool.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.discarded, 0);
    }
}
