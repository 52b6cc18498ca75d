//! Row types for each target table, produced by the extractor and consumed
//! by the sinks. Field order matches the column order of the insert
//! statements.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize)]
pub struct BlockRow {
    pub height: u64,
    pub block_hash: String,
    pub time: DateTime<Utc>,
    pub proposer_address: String,
    pub tx_count: i32,
    pub size_bytes: Option<i64>,
    pub last_commit_hash: Option<String>,
    pub data_hash: Option<String>,
    pub evidence_count: i32,
    pub app_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxRow {
    pub height: u64,
    pub tx_hash: String,
    pub tx_index: i32,
    pub code: i32,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub fee: JsonValue,
    pub memo: Option<String>,
    pub signers: JsonValue,
    pub raw_tx: JsonValue,
    pub log_summary: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub type_url: String,
    pub value: JsonValue,
    pub signer: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub event_index: i32,
    pub event_type: String,
    pub attributes: JsonValue,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventAttrRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub event_index: i32,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub from_addr: String,
    pub to_addr: String,
    pub amount: String,
    pub denom: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StakeDelegationRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub event_type: String,
    pub delegator_address: Option<String>,
    pub validator_src: Option<String>,
    pub validator_dst: Option<String>,
    pub amount: Option<String>,
    pub denom: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StakeDistributionRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub event_type: String,
    pub validator_address: Option<String>,
    pub delegator_address: Option<String>,
    pub amount: Option<String>,
    pub denom: Option<String>,
    pub withdraw_address: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WasmExecutionRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub contract: String,
    pub sender: String,
    pub msg: JsonValue,
    pub funds: JsonValue,
    pub success: bool,
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WasmEventRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub event_index: i32,
    pub contract_address: String,
    pub attributes: JsonValue,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GovProposalRow {
    pub proposal_id: i64,
    pub height: u64,
    pub tx_hash: String,
    pub proposer: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<JsonValue>,
    pub status: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GovDepositRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub proposal_id: i64,
    pub depositor: String,
    pub amount: String,
    pub denom: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GovVoteRow {
    pub height: u64,
    pub tx_hash: String,
    pub msg_index: i32,
    pub proposal_id: i64,
    pub voter: String,
    pub option: String,
    pub weight: Option<String>,
    pub time: DateTime<Utc>,
}

/// All rows derived from one or more blocks, grouped per target table.
#[derive(Debug, Default)]
pub struct RowSet {
    pub blocks: Vec<BlockRow>,
    pub txs: Vec<TxRow>,
    pub messages: Vec<MessageRow>,
    pub events: Vec<EventRow>,
    pub event_attrs: Vec<EventAttrRow>,
    pub transfers: Vec<TransferRow>,
    pub stake_delegations: Vec<StakeDelegationRow>,
    pub stake_distributions: Vec<StakeDistributionRow>,
    pub wasm_executions: Vec<WasmExecutionRow>,
    pub wasm_events: Vec<WasmEventRow>,
    pub gov_proposals: Vec<GovProposalRow>,
    pub gov_deposits: Vec<GovDepositRow>,
    pub gov_votes: Vec<GovVoteRow>,
}

impl RowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, mut other: RowSet) {
        self.blocks.append(&mut other.blocks);
        self.txs.append(&mut other.txs);
        self.messages.append(&mut other.messages);
        self.events.append(&mut other.events);
        self.event_attrs.append(&mut other.event_attrs);
        self.transfers.append(&mut other.transfers);
        self.stake_delegations.append(&mut other.stake_delegations);
        self.stake_distributions
            .append(&mut other.stake_distributions);
        self.wasm_executions.append(&mut other.wasm_executions);
        self.wasm_events.append(&mut other.wasm_events);
        self.gov_proposals.append(&mut other.gov_proposals);
        self.gov_deposits.append(&mut other.gov_deposits);
        self.gov_votes.append(&mut other.gov_votes);
    }

    pub fn total_rows(&self) -> usize {
        self.blocks.len()
            + self.txs.len()
            + self.messages.len()
            + self.events.len()
            + self.event_attrs.len()
            + self.transfers.len()
            + self.stake_delegations.len()
            + self.stake_distributions.len()
            + self.wasm_executions.len()
            + self.wasm_events.len()
            + self.gov_proposals.len()
            + self.gov_deposits.len()
            + self.gov_votes.len()
    }

    /// Height span covered by the buffered rows, `None` when empty.
    pub fn height_span(&self) -> Option<(u64, u64)> {
        let mut span: Option<(u64, u64)> = None;
        let mut observe = |h: u64| {
            span = Some(match span {
                Some((lo, hi)) => (lo.min(h), hi.max(h)),
                None => (h, h),
            });
        };
        self.blocks.iter().for_each(|r| observe(r.height));
        self.txs.iter().for_each(|r| observe(r.height));
        self.messages.iter().for_each(|r| observe(r.height));
        self.events.iter().for_each(|r| observe(r.height));
        self.event_attrs.iter().for_each(|r| observe(r.height));
        self.transfers.iter().for_each(|r| observe(r.height));
        self.stake_delegations.iter().for_each(|r| observe(r.height));
        self.stake_distributions
            .iter()
            .for_each(|r| observe(r.height));
        self.wasm_executions.iter().for_each(|r| observe(r.height));
        self.wasm_events.iter().for_each(|r| observe(r.height));
        self.gov_proposals.iter().for_each(|r| observe(r.height));
        self.gov_deposits.iter().for_each(|r| observe(r.height));
        self.gov_votes.iter().for_each(|r| observe(r.height));
        span
    }
}
