//! Height-range and hash partition management for the core tables. All DDL
//! runs under a database-level advisory lock so concurrent flushes cannot
//! race partition creation.

use deadpool_postgres::Object;

use crate::db::DbError;

/// Heights covered per range partition.
pub const RANGE_PARTITION_SPAN: u64 = 1_000_000;

/// Fixed advisory lock key serializing partition DDL.
pub const PARTITION_LOCK_KEY: i64 = 815_0001;

/// Tables range-partitioned by `height`.
pub const RANGE_PARTITIONED_TABLES: &[&str] = &[
    "core.blocks",
    "core.transactions",
    "core.messages",
    "core.event_attrs",
    "bank.transfers",
    "stake.delegation_events",
    "stake.distribution_events",
    "wasm.executions",
    "wasm.events",
    "gov.deposits",
    "gov.votes",
];

/// Partition bases (span-aligned lower bounds) covering `[min_height,
/// max_height]`.
pub fn partition_bases(min_height: u64, max_height: u64) -> Vec<u64> {
    if max_height < min_height {
        return Vec::new();
    }
    let first = (min_height / RANGE_PARTITION_SPAN) * RANGE_PARTITION_SPAN;
    let last = (max_height / RANGE_PARTITION_SPAN) * RANGE_PARTITION_SPAN;
    (first..=last).step_by(RANGE_PARTITION_SPAN as usize).collect()
}

/// Child table name for the range partition starting at `base`.
pub fn partition_name(table: &str, base: u64) -> String {
    format!("{}_p{:04}", table, base / RANGE_PARTITION_SPAN)
}

fn range_partition_ddl(table: &str, base: u64) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF {} FOR VALUES FROM ({}) TO ({})",
        partition_name(table, base),
        table,
        base,
        base + RANGE_PARTITION_SPAN
    )
}

/// Create every missing range partition covering `[min_height, max_height]`
/// for all range-partitioned core tables. DDL runs in its own transaction
/// holding the advisory lock, so it is idempotent across concurrent
/// indexers.
pub async fn ensure_range_partitions(
    client: &mut Object,
    min_height: u64,
    max_height: u64,
) -> Result<(), DbError> {
    let bases = partition_bases(min_height, max_height);
    if bases.is_empty() {
        return Ok(());
    }

    let tx = client.transaction().await?;
    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&PARTITION_LOCK_KEY])
        .await?;
    for base in &bases {
        for table in RANGE_PARTITIONED_TABLES {
            tx.batch_execute(&range_partition_ddl(table, *base)).await?;
        }
    }
    tx.commit().await?;

    tracing::debug!(
        "Ensured {} range partition span(s) covering heights {}..={}",
        bases.len(),
        min_height,
        max_height
    );
    Ok(())
}

/// Create the hash partitions of `core.events` (once, at startup).
pub async fn ensure_event_hash_partitions(
    client: &mut Object,
    modulus: u32,
) -> Result<(), DbError> {
    let tx = client.transaction().await?;
    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&PARTITION_LOCK_KEY])
        .await?;
    for remainder in 0..modulus {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS core.events_h{:02} PARTITION OF core.events \
             FOR VALUES WITH (MODULUS {}, REMAINDER {})",
            remainder, modulus, remainder
        );
        tx.batch_execute(&ddl).await?;
    }
    tx.commit().await?;

    tracing::info!("Ensured {} hash partitions for core.events", modulus);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_bases_single_span() {
        assert_eq!(partition_bases(5_200_792, 5_200_800), vec![5_000_000]);
    }

    #[test]
    fn test_partition_bases_crossing_boundary() {
        assert_eq!(
            partition_bases(999_999, 2_000_001),
            vec![0, 1_000_000, 2_000_000]
        );
    }

    #[test]
    fn test_partition_bases_empty_on_inverted_range() {
        assert!(partition_bases(10, 5).is_empty());
    }

    #[test]
    fn test_partition_name() {
        assert_eq!(partition_name("core.blocks", 5_000_000), "core.blocks_p0005");
        assert_eq!(partition_name("bank.transfers", 0), "bank.transfers_p0000");
    }

    #[test]
    fn test_range_partition_ddl() {
        assert_eq!(
            range_partition_ddl("core.blocks", 1_000_000),
            "CREATE TABLE IF NOT EXISTS core.blocks_p0001 PARTITION OF core.blocks \
             FOR VALUES FROM (1000000) TO (2000000)"
        );
    }
}
