use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// An ABCI event after attribute normalization (base64 decoding applied
/// where canonical, `index` defaulted).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NormalizedEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: Vec<NormalizedAttribute>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NormalizedAttribute {
    pub key: String,
    pub value: String,
    pub index: bool,
}

impl NormalizedEvent {
    /// First value of the named attribute, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// One entry of a parsed `raw_log`: events scoped to a message index, or to
/// the whole transaction when `msg_index` is absent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogEntry {
    pub msg_index: Option<u32>,
    pub events: Vec<NormalizedEvent>,
}

/// ABCI execution result projection for one transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TxResponse {
    pub code: u32,
    pub codespace: Option<String>,
    pub data: Option<String>,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub raw_log: Option<String>,
    /// Tx-level events from the ABCI result, normalized.
    pub events: Vec<NormalizedEvent>,
    /// Per-message events parsed from `raw_log`, with tx-level events
    /// appended as a trailing entry with `msg_index = None`.
    pub logs: Vec<LogEntry>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TxRecord {
    pub index: u32,
    /// Uppercase hex SHA-256 of the raw tx bytes.
    pub hash: String,
    pub raw_base64: String,
    pub raw_hex: String,
    /// Normalized decoded transaction
    /// (`{ "@type": "/cosmos.tx.v1beta1.Tx", body, auth_info, signatures }`).
    pub decoded: JsonValue,
    pub response: TxResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockMeta {
    pub chain_id: String,
    pub height: u64,
    pub time: DateTime<Utc>,
}

/// Assembled normalized block: everything the sink needs for one height.
#[derive(Debug, Clone, Serialize)]
pub struct BlockRecord {
    pub meta: BlockMeta,
    pub block_hash: String,
    pub proposer_address: String,
    pub last_commit_hash: Option<String>,
    pub data_hash: Option<String>,
    pub app_hash: Option<String>,
    pub evidence_count: u32,
    pub size_bytes: Option<u64>,
    /// Raw block with the evidence list and raw tx list dropped.
    pub block: JsonValue,
    /// Raw block results with per-tx results dropped (they live in `txs`).
    pub block_results: JsonValue,
    pub txs: Vec<TxRecord>,
}
