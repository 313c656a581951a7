use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks belong to the Postgres session, so the guard keeps its own
// pooled connection for as long as the lock is held.
const SYNC_LOCK_KEY: i64 = 0x5354_4F43_4B53; // "STOCKS"

#[derive(Debug)]
pub struct SyncLock {
    conn: PoolConnection<Postgres>,
}

impl SyncLock {
    /// Returns `None` when another session already holds the sync lock.
    pub async fn try_acquire(pool: &sqlx::PgPool) -> anyhow::Result<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .context("failed to acquire connection for sync lock")?;

        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(SYNC_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to take advisory lock (key={SYNC_LOCK_KEY})"))?;

        Ok(acquired.0.then_some(Self { conn }))
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(SYNC_LOCK_KEY)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={SYNC_LOCK_KEY})"))?;
        Ok(())
    }
}
