use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::Transaction;

use super::partitions::{
    ensure_event_hash_partitions, ensure_range_partitions, partition_bases,
};
use super::progress::{read_progress, upsert_progress};
use super::{Sink, SinkError};
use crate::db::{build_multi_insert_sql, chunk_rows, DbError, DbPool, SqlParam};
use crate::extract::extract_rows;
use crate::extract::rows::{
    BlockRow, EventAttrRow, EventRow, GovDepositRow, GovProposalRow, GovVoteRow, MessageRow,
    RowSet, StakeDelegationRow, StakeDistributionRow, TransferRow, TxRow, WasmEventRow,
    WasmExecutionRow,
};
use crate::types::config::{PgConfig, PgWriteMode};
use crate::types::record::BlockRecord;

/// Row threshold for the derived tables that have no dedicated batch knob.
const DERIVED_BATCH: usize = 5000;

/// Per-statement row caps. The parameter cap in `chunk_rows` applies on top.
const ROWS_PER_STMT_CORE: usize = 5000;
const ROWS_PER_STMT_WIDE: usize = 10_000;

struct TableSpec {
    table: &'static str,
    columns: &'static [&'static str],
    conflict: &'static str,
    rows_per_stmt: usize,
}

const BLOCKS: TableSpec = TableSpec {
    table: "core.blocks",
    columns: &[
        "height",
        "block_hash",
        "time",
        "proposer_address",
        "tx_count",
        "size_bytes",
        "last_commit_hash",
        "data_hash",
        "evidence_count",
        "app_hash",
    ],
    conflict: "ON CONFLICT (height) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const TRANSACTIONS: TableSpec = TableSpec {
    table: "core.transactions",
    columns: &[
        "height",
        "tx_hash",
        "tx_index",
        "code",
        "gas_wanted",
        "gas_used",
        "fee",
        "memo",
        "signers",
        "raw_tx",
        "log_summary",
        "time",
    ],
    conflict: "ON CONFLICT (height, tx_hash) DO UPDATE SET \
               gas_used = EXCLUDED.gas_used, log_summary = EXCLUDED.log_summary",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const MESSAGES: TableSpec = TableSpec {
    table: "core.messages",
    columns: &["height", "tx_hash", "msg_index", "type_url", "value", "signer", "time"],
    conflict: "ON CONFLICT (height, tx_hash, msg_index) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const EVENTS: TableSpec = TableSpec {
    table: "core.events",
    columns: &[
        "height",
        "tx_hash",
        "msg_index",
        "event_index",
        "event_type",
        "attributes",
        "time",
    ],
    conflict: "ON CONFLICT (tx_hash, msg_index, event_index) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_WIDE,
};

const EVENT_ATTRS: TableSpec = TableSpec {
    table: "core.event_attrs",
    columns: &["height", "tx_hash", "msg_index", "event_index", "key", "value"],
    conflict: "ON CONFLICT (height, tx_hash, msg_index, event_index, key) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_WIDE,
};

const TRANSFERS: TableSpec = TableSpec {
    table: "bank.transfers",
    columns: &[
        "height",
        "tx_hash",
        "msg_index",
        "from_addr",
        "to_addr",
        "amount",
        "denom",
        "time",
    ],
    conflict: "ON CONFLICT (height, tx_hash, msg_index, from_addr, to_addr, denom) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const STAKE_DELEGATIONS: TableSpec = TableSpec {
    table: "stake.delegation_events",
    columns: &[
        "height",
        "tx_hash",
        "msg_index",
        "event_type",
        "delegator_address",
        "validator_src",
        "validator_dst",
        "amount",
        "denom",
        "time",
    ],
    conflict: "ON CONFLICT (height, tx_hash, msg_index, event_type) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const STAKE_DISTRIBUTIONS: TableSpec = TableSpec {
    table: "stake.distribution_events",
    columns: &[
        "height",
        "tx_hash",
        "msg_index",
        "event_type",
        "validator_address",
        "delegator_address",
        "amount",
        "denom",
        "withdraw_address",
        "time",
    ],
    conflict: "ON CONFLICT (height, tx_hash, msg_index, event_type) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const WASM_EXECUTIONS: TableSpec = TableSpec {
    table: "wasm.executions",
    columns: &[
        "height",
        "tx_hash",
        "msg_index",
        "contract",
        "sender",
        "msg",
        "funds",
        "success",
        "error",
        "time",
    ],
    conflict: "ON CONFLICT (height, tx_hash, msg_index) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const WASM_EVENTS: TableSpec = TableSpec {
    table: "wasm.events",
    columns: &[
        "height",
        "tx_hash",
        "msg_index",
        "event_index",
        "contract_address",
        "attributes",
        "time",
    ],
    conflict: "ON CONFLICT (height, tx_hash, msg_index, event_index) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const GOV_PROPOSALS: TableSpec = TableSpec {
    table: "gov.proposals",
    columns: &[
        "proposal_id",
        "height",
        "tx_hash",
        "proposer",
        "title",
        "summary",
        "content",
        "status",
        "time",
    ],
    conflict: "ON CONFLICT (proposal_id) DO UPDATE SET \
               height = COALESCE(EXCLUDED.height, gov.proposals.height), \
               tx_hash = COALESCE(EXCLUDED.tx_hash, gov.proposals.tx_hash), \
               proposer = COALESCE(EXCLUDED.proposer, gov.proposals.proposer), \
               title = COALESCE(EXCLUDED.title, gov.proposals.title), \
               summary = COALESCE(EXCLUDED.summary, gov.proposals.summary), \
               content = COALESCE(EXCLUDED.content, gov.proposals.content), \
               status = COALESCE(EXCLUDED.status, gov.proposals.status), \
               time = COALESCE(EXCLUDED.time, gov.proposals.time)",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const GOV_DEPOSITS: TableSpec = TableSpec {
    table: "gov.deposits",
    columns: &[
        "height",
        "tx_hash",
        "msg_index",
        "proposal_id",
        "depositor",
        "amount",
        "denom",
        "time",
    ],
    conflict: "ON CONFLICT (height, tx_hash, msg_index, denom) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

const GOV_VOTES: TableSpec = TableSpec {
    table: "gov.votes",
    columns: &[
        "height",
        "tx_hash",
        "msg_index",
        "proposal_id",
        "voter",
        "option",
        "weight",
        "time",
    ],
    conflict: "ON CONFLICT (height, tx_hash, msg_index) DO NOTHING",
    rows_per_stmt: ROWS_PER_STMT_CORE,
};

/// Partitioned-postgres sink. `block-atomic` commits one transaction per
/// block; `batch-insert` buffers rows across blocks and commits them
/// together once any per-table threshold trips.
pub struct PostgresSink {
    pool: DbPool,
    config: PgConfig,
    buffers: RowSet,
    ensured_bases: HashSet<u64>,
}

impl PostgresSink {
    pub async fn connect(config: PgConfig) -> Result<Self, SinkError> {
        let pool = DbPool::connect(&config).await?;
        let mut client = pool.get().await?;
        ensure_event_hash_partitions(&mut client, config.events_hash_modulus).await?;
        drop(client);
        Ok(Self {
            pool,
            config,
            buffers: RowSet::new(),
            ensured_bases: HashSet::new(),
        })
    }

    pub async fn last_progress(&self) -> Result<Option<u64>, SinkError> {
        Ok(read_progress(&self.pool, &self.config.progress_id).await?)
    }

    fn threshold_reached(&self) -> bool {
        let b = &self.buffers;
        b.blocks.len() >= self.config.batch_blocks
            || b.txs.len() >= self.config.batch_txs
            || b.messages.len() >= self.config.batch_msgs
            || b.events.len() >= self.config.batch_events
            || b.event_attrs.len() >= self.config.batch_attrs
            || b.transfers.len() >= DERIVED_BATCH
            || b.stake_delegations.len() >= DERIVED_BATCH
            || b.stake_distributions.len() >= DERIVED_BATCH
            || b.wasm_executions.len() >= DERIVED_BATCH
            || b.wasm_events.len() >= DERIVED_BATCH
            || b.gov_deposits.len() >= DERIVED_BATCH
            || b.gov_votes.len() >= DERIVED_BATCH
    }

    async fn ensure_partitions(&mut self, min_height: u64, max_height: u64) -> Result<(), DbError> {
        let missing: Vec<u64> = partition_bases(min_height, max_height)
            .into_iter()
            .filter(|base| !self.ensured_bases.contains(base))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let mut client = self.pool.get().await?;
        ensure_range_partitions(&mut client, min_height, max_height).await?;
        self.ensured_bases.extend(missing);
        Ok(())
    }

    /// Commit every buffered row plus the progress checkpoint in one
    /// transaction. Buffers are cleared only on commit; a failed flush
    /// leaves them intact for the next attempt.
    async fn flush_buffers(&mut self) -> Result<(), SinkError> {
        let Some((min_height, max_height)) = self.buffers.height_span() else {
            return Ok(());
        };
        if i64::try_from(max_height).is_err() {
            return Err(SinkError::Db(DbError::HeightOverflow(max_height)));
        }
        let started = Instant::now();
        let total_rows = self.buffers.total_rows();

        self.ensure_partitions(min_height, max_height).await?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(DbError::from)?;
        tx.batch_execute("SET LOCAL statement_timeout = '30s'; SET LOCAL lock_timeout = '5s'")
            .await
            .map_err(DbError::from)?;

        insert_row_set(&tx, &self.buffers).await?;
        upsert_progress(&tx, &self.config.progress_id, max_height).await?;
        tx.commit().await.map_err(DbError::from)?;

        tracing::info!(
            "Flushed {} rows for heights {}..={} in {:?} (progress {} -> {})",
            total_rows,
            min_height,
            max_height,
            started.elapsed(),
            self.config.progress_id,
            max_height
        );
        self.buffers = RowSet::new();
        Ok(())
    }

    async fn write_block_atomic(&mut self, rows: RowSet) -> Result<(), SinkError> {
        let Some((min_height, max_height)) = rows.height_span() else {
            return Ok(());
        };
        if i64::try_from(max_height).is_err() {
            return Err(SinkError::Db(DbError::HeightOverflow(max_height)));
        }

        self.ensure_partitions(min_height, max_height).await?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await.map_err(DbError::from)?;
        tx.batch_execute("SET LOCAL statement_timeout = '30s'; SET LOCAL lock_timeout = '5s'")
            .await
            .map_err(DbError::from)?;

        insert_row_set(&tx, &rows).await?;
        upsert_progress(&tx, &self.config.progress_id, max_height).await?;
        tx.commit().await.map_err(DbError::from)?;
        Ok(())
    }
}

#[async_trait]
impl Sink for PostgresSink {
    async fn write(&mut self, record: BlockRecord) -> Result<(), SinkError> {
        let rows = extract_rows(&record);
        match self.config.mode {
            PgWriteMode::BlockAtomic => self.write_block_atomic(rows).await,
            PgWriteMode::BatchInsert => {
                self.buffers.append(rows);
                if self.threshold_reached() {
                    self.flush_buffers().await
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        match self.config.mode {
            PgWriteMode::BlockAtomic => Ok(()),
            PgWriteMode::BatchInsert => self.flush_buffers().await,
        }
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.flush().await
    }
}

async fn insert_row_set(tx: &Transaction<'_>, rows: &RowSet) -> Result<(), SinkError> {
    insert_table(tx, &BLOCKS, rows.blocks.iter().map(block_params).collect()).await?;
    insert_table(tx, &TRANSACTIONS, rows.txs.iter().map(tx_params).collect()).await?;
    insert_table(tx, &MESSAGES, rows.messages.iter().map(message_params).collect()).await?;
    insert_table(tx, &EVENTS, rows.events.iter().map(event_params).collect()).await?;
    insert_table(
        tx,
        &EVENT_ATTRS,
        rows.event_attrs.iter().map(event_attr_params).collect(),
    )
    .await?;
    insert_table(tx, &TRANSFERS, rows.transfers.iter().map(transfer_params).collect()).await?;
    insert_table(
        tx,
        &STAKE_DELEGATIONS,
        rows.stake_delegations.iter().map(delegation_params).collect(),
    )
    .await?;
    insert_table(
        tx,
        &STAKE_DISTRIBUTIONS,
        rows.stake_distributions
            .iter()
            .map(distribution_params)
            .collect(),
    )
    .await?;
    insert_table(
        tx,
        &WASM_EXECUTIONS,
        rows.wasm_executions.iter().map(wasm_execution_params).collect(),
    )
    .await?;
    insert_table(
        tx,
        &WASM_EVENTS,
        rows.wasm_events.iter().map(wasm_event_params).collect(),
    )
    .await?;
    insert_table(
        tx,
        &GOV_PROPOSALS,
        rows.gov_proposals.iter().map(gov_proposal_params).collect(),
    )
    .await?;
    insert_table(
        tx,
        &GOV_DEPOSITS,
        rows.gov_deposits.iter().map(gov_deposit_params).collect(),
    )
    .await?;
    insert_table(tx, &GOV_VOTES, rows.gov_votes.iter().map(gov_vote_params).collect()).await?;
    Ok(())
}

async fn insert_table(
    tx: &Transaction<'_>,
    spec: &TableSpec,
    rows: Vec<Vec<SqlParam>>,
) -> Result<(), SinkError> {
    if rows.is_empty() {
        return Ok(());
    }
    for chunk in chunk_rows(&rows, spec.columns.len(), spec.rows_per_stmt) {
        let sql = build_multi_insert_sql(spec.table, spec.columns, spec.conflict, chunk.len());
        let params: Vec<&(dyn ToSql + Sync)> = chunk
            .iter()
            .flatten()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();
        tx.execute(&sql, &params).await.map_err(DbError::from)?;
    }
    Ok(())
}

fn block_params(row: &BlockRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.block_hash.clone()),
        SqlParam::Timestamptz(row.time),
        SqlParam::Text(row.proposer_address.clone()),
        SqlParam::Int32(row.tx_count),
        SqlParam::opt_int64(row.size_bytes),
        SqlParam::opt_text(row.last_commit_hash.clone()),
        SqlParam::opt_text(row.data_hash.clone()),
        SqlParam::Int32(row.evidence_count),
        SqlParam::opt_text(row.app_hash.clone()),
    ]
}

fn tx_params(row: &TxRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.tx_index),
        SqlParam::Int32(row.code),
        SqlParam::Int64(row.gas_wanted),
        SqlParam::Int64(row.gas_used),
        SqlParam::Jsonb(row.fee.clone()),
        SqlParam::opt_text(row.memo.clone()),
        SqlParam::Jsonb(row.signers.clone()),
        SqlParam::Jsonb(row.raw_tx.clone()),
        SqlParam::opt_text(row.log_summary.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn message_params(row: &MessageRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Text(row.type_url.clone()),
        SqlParam::Jsonb(row.value.clone()),
        SqlParam::opt_text(row.signer.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn event_params(row: &EventRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Int32(row.event_index),
        SqlParam::Text(row.event_type.clone()),
        SqlParam::Jsonb(row.attributes.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn event_attr_params(row: &EventAttrRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Int32(row.event_index),
        SqlParam::Text(row.key.clone()),
        SqlParam::Text(row.value.clone()),
    ]
}

fn transfer_params(row: &TransferRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Text(row.from_addr.clone()),
        SqlParam::Text(row.to_addr.clone()),
        SqlParam::Text(row.amount.clone()),
        SqlParam::Text(row.denom.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn delegation_params(row: &StakeDelegationRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Text(row.event_type.clone()),
        SqlParam::opt_text(row.delegator_address.clone()),
        SqlParam::opt_text(row.validator_src.clone()),
        SqlParam::opt_text(row.validator_dst.clone()),
        SqlParam::opt_text(row.amount.clone()),
        SqlParam::opt_text(row.denom.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn distribution_params(row: &StakeDistributionRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Text(row.event_type.clone()),
        SqlParam::opt_text(row.validator_address.clone()),
        SqlParam::opt_text(row.delegator_address.clone()),
        SqlParam::opt_text(row.amount.clone()),
        SqlParam::opt_text(row.denom.clone()),
        SqlParam::opt_text(row.withdraw_address.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn wasm_execution_params(row: &WasmExecutionRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Text(row.contract.clone()),
        SqlParam::Text(row.sender.clone()),
        SqlParam::Jsonb(row.msg.clone()),
        SqlParam::Jsonb(row.funds.clone()),
        SqlParam::Bool(row.success),
        SqlParam::opt_text(row.error.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn wasm_event_params(row: &WasmEventRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Int32(row.event_index),
        SqlParam::Text(row.contract_address.clone()),
        SqlParam::Jsonb(row.attributes.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn gov_proposal_params(row: &GovProposalRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.proposal_id),
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::opt_text(row.proposer.clone()),
        SqlParam::opt_text(row.title.clone()),
        SqlParam::opt_text(row.summary.clone()),
        SqlParam::opt_jsonb(row.content.clone()),
        SqlParam::opt_text(row.status.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn gov_deposit_params(row: &GovDepositRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Int64(row.proposal_id),
        SqlParam::Text(row.depositor.clone()),
        SqlParam::Text(row.amount.clone()),
        SqlParam::Text(row.denom.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

fn gov_vote_params(row: &GovVoteRow) -> Vec<SqlParam> {
    vec![
        SqlParam::Int64(row.height as i64),
        SqlParam::Text(row.tx_hash.clone()),
        SqlParam::Int32(row.msg_index),
        SqlParam::Int64(row.proposal_id),
        SqlParam::Text(row.voter.clone()),
        SqlParam::Text(row.option.clone()),
        SqlParam::opt_text(row.weight.clone()),
        SqlParam::Timestamptz(row.time),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_param_counts_match_columns() {
        let time = sample_time();
        let block = BlockRow {
            height: 1,
            block_hash: "h".into(),
            time,
            proposer_address: "p".into(),
            tx_count: 0,
            size_bytes: None,
            last_commit_hash: None,
            data_hash: None,
            evidence_count: 0,
            app_hash: None,
        };
        assert_eq!(block_params(&block).len(), BLOCKS.columns.len());

        let tx = TxRow {
            height: 1,
            tx_hash: "h".into(),
            tx_index: 0,
            code: 0,
            gas_wanted: 0,
            gas_used: 0,
            fee: json!(null),
            memo: None,
            signers: json!([]),
            raw_tx: json!({}),
            log_summary: None,
            time,
        };
        assert_eq!(tx_params(&tx).len(), TRANSACTIONS.columns.len());

        let event = EventRow {
            height: 1,
            tx_hash: "h".into(),
            msg_index: 0,
            event_index: 0,
            event_type: "t".into(),
            attributes: json!([]),
            time,
        };
        assert_eq!(event_params(&event).len(), EVENTS.columns.len());

        let vote = GovVoteRow {
            height: 1,
            tx_hash: "h".into(),
            msg_index: 0,
            proposal_id: 1,
            voter: "v".into(),
            option: "VOTE_OPTION_YES".into(),
            weight: None,
            time,
        };
        assert_eq!(gov_vote_params(&vote).len(), GOV_VOTES.columns.len());
    }

    #[test]
    fn test_conflict_clauses_are_idempotent_shapes() {
        assert!(BLOCKS.conflict.contains("DO NOTHING"));
        assert!(TRANSACTIONS.conflict.contains("DO UPDATE SET"));
        assert!(TRANSACTIONS.conflict.contains("gas_used = EXCLUDED.gas_used"));
        assert!(GOV_PROPOSALS.conflict.contains("COALESCE"));
        for spec in [
            &MESSAGES,
            &EVENTS,
            &EVENT_ATTRS,
            &TRANSFERS,
            &STAKE_DELEGATIONS,
            &STAKE_DISTRIBUTIONS,
            &WASM_EXECUTIONS,
            &WASM_EVENTS,
            &GOV_DEPOSITS,
            &GOV_VOTES,
        ] {
            assert!(spec.conflict.contains("DO NOTHING"), "{}", spec.table);
        }
    }
}
