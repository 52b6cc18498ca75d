use tokio_postgres::Transaction;

use crate::db::{DbError, DbPool};

/// Read the last committed height for a progress identifier, if any.
pub async fn read_progress(pool: &DbPool, progress_id: &str) -> Result<Option<u64>, DbError> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            "SELECT last_height FROM core.indexer_progress WHERE id = $1",
            &[&progress_id],
        )
        .await?;
    Ok(row.map(|r| r.get::<_, i64>(0) as u64))
}

/// Upsert the checkpoint inside the caller's transaction. `GREATEST` keeps
/// `last_height` monotonic even if an older batch is replayed.
pub async fn upsert_progress(
    tx: &Transaction<'_>,
    progress_id: &str,
    height: u64,
) -> Result<(), DbError> {
    let height = i64::try_from(height).map_err(|_| DbError::HeightOverflow(height))?;
    tx.execute(
        "INSERT INTO core.indexer_progress (id, last_height, updated_at) \
         VALUES ($1, $2, now()) \
         ON CONFLICT (id) DO UPDATE SET \
           last_height = GREATEST(core.indexer_progress.last_height, EXCLUDED.last_height), \
           updated_at = now()",
        &[&progress_id, &height],
    )
    .await?;
    Ok(())
}
