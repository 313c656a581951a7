use crate::domain::stock::StockRecord;
use crate::storage::retry::{run_with_retry, RetryError, RetryPolicy};
use anyhow::Context;
use std::ops::Range;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 100;

const SELECT_COLUMNS: &str = "id, ticker, company, brokerage, action, rating_from, rating_to, \
     target_from, target_to, created_at, updated_at, deleted_at";

/// Write side of the store. One call is one transaction: either every record
/// in `chunk` lands or none does.
#[async_trait::async_trait]
pub trait ChunkWriter: Send + Sync {
    async fn apply_chunk(&self, chunk: &[StockRecord]) -> anyhow::Result<()>;
}

/// Read side of the store. Soft-deleted rows are never returned.
#[async_trait::async_trait]
pub trait StockReader: Send + Sync {
    /// `page` is 1-based. Returns the rows of that page plus the total row count.
    async fn list_page(&self, page: u32, page_size: u32)
        -> anyhow::Result<(Vec<StockRecord>, u64)>;

    async fn list_all(&self) -> anyhow::Result<Vec<StockRecord>>;
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("upsert cancelled")]
    Cancelled,
    #[error("error processing batch {start}-{end}: {source}")]
    Batch {
        start: usize,
        end: usize,
        #[source]
        source: RetryError,
    },
}

pub fn chunk_ranges(len: usize, batch_size: usize) -> Vec<Range<usize>> {
    let size = if batch_size == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        batch_size
    };
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Upserts `records` keyed by (ticker, brokerage), one transaction per chunk.
/// A chunk that hits a transient error is retried whole; replaying a chunk
/// re-matches rows it already wrote, so the end state is the same as a clean
/// first attempt. Returns the number of chunks written.
pub async fn batch_upsert<W>(
    writer: &W,
    cancel: &CancellationToken,
    records: &[StockRecord],
    batch_size: usize,
    policy: &RetryPolicy,
) -> Result<usize, UpsertError>
where
    W: ChunkWriter + ?Sized,
{
    let ranges = chunk_ranges(records.len(), batch_size);

    for (batch_idx, range) in ranges.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(UpsertError::Cancelled);
        }

        let chunk = &records[range.clone()];
        let t0 = std::time::Instant::now();

        run_with_retry(policy, cancel, move |_| writer.apply_chunk(chunk))
            .await
            .map_err(|err| match err {
                RetryError::Cancelled => UpsertError::Cancelled,
                source => UpsertError::Batch {
                    start: range.start,
                    end: range.end,
                    source,
                },
            })?;

        tracing::debug!(
            batch_idx,
            batch_size = chunk.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "stocks batch upsert"
        );
    }

    Ok(ranges.len())
}

#[derive(Debug, Clone)]
pub struct PgStockStore {
    pool: sqlx::PgPool,
}

impl PgStockStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChunkWriter for PgStockStore {
    async fn apply_chunk(&self, chunk: &[StockRecord]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        if let Err(err) = upsert_records(&mut tx, chunk).await {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            return Err(err);
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(())
    }
}

async fn upsert_records(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    chunk: &[StockRecord],
) -> anyhow::Result<()> {
    for record in chunk {
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM stocks \
             WHERE ticker = $1 AND brokerage = $2 AND deleted_at IS NULL \
             LIMIT 1",
        )
        .persistent(false)
        .bind(&record.ticker)
        .bind(&record.brokerage)
        .fetch_optional(&mut **tx)
        .await
        .with_context(|| {
            format!(
                "lookup stocks failed (ticker={}, brokerage={})",
                record.ticker, record.brokerage
            )
        })?;

        match existing {
            Some(id) => update_record(tx, id, record).await?,
            None => insert_record(tx, record).await?,
        }
    }
    Ok(())
}

async fn insert_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    record: &StockRecord,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO stocks (id, ticker, company, brokerage, action, rating_from, rating_to, \
                             target_from, target_to, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())",
    )
    .persistent(false)
    .bind(record.id)
    .bind(&record.ticker)
    .bind(&record.company)
    .bind(&record.brokerage)
    .bind(&record.action)
    .bind(&record.rating_from)
    .bind(&record.rating_to)
    .bind(record.target_from)
    .bind(record.target_to)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("insert stocks failed (ticker={})", record.ticker))?;
    Ok(())
}

async fn update_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    record: &StockRecord,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE stocks \
         SET company = $2, action = $3, rating_from = $4, rating_to = $5, \
             target_from = $6, target_to = $7, updated_at = now() \
         WHERE id = $1",
    )
    .persistent(false)
    .bind(id)
    .bind(&record.company)
    .bind(&record.action)
    .bind(&record.rating_from)
    .bind(&record.rating_to)
    .bind(record.target_from)
    .bind(record.target_to)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("update stocks failed (id={id})"))?;
    Ok(())
}

#[async_trait::async_trait]
impl StockReader for PgStockStore {
    async fn list_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> anyhow::Result<(Vec<StockRecord>, u64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM stocks WHERE deleted_at IS NULL")
                .persistent(false)
                .fetch_one(&self.pool)
                .await
                .context("count stocks failed")?;

        let offset = i64::from(page.max(1) - 1) * i64::from(page_size);
        let rows = sqlx::query_as::<_, StockRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM stocks \
             WHERE deleted_at IS NULL \
             ORDER BY updated_at DESC, id ASC \
             LIMIT $1 OFFSET $2"
        ))
        .persistent(false)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("list stocks failed")?;

        Ok((rows, total.max(0) as u64))
    }

    async fn list_all(&self) -> anyhow::Result<Vec<StockRecord>> {
        sqlx::query_as::<_, StockRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM stocks \
             WHERE deleted_at IS NULL \
             ORDER BY updated_at DESC, id ASC"
        ))
        .persistent(false)
        .fetch_all(&self.pool)
        .await
        .context("list all stocks failed")
    }
}
