use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Resolved chain status from `/status`.
#[derive(Debug, Clone, Copy)]
pub struct ChainStatus {
    pub earliest_block_height: u64,
    pub latest_block_height: u64,
}

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
pub struct SyncInfo {
    pub earliest_block_height: String,
    pub latest_block_height: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResponse {
    #[serde(default)]
    pub block_id: Option<BlockId>,
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockId {
    #[serde(default)]
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub data: BlockData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub chain_id: String,
    pub height: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub proposer_address: String,
    #[serde(default)]
    pub last_commit_hash: Option<String>,
    #[serde(default)]
    pub data_hash: Option<String>,
    #[serde(default)]
    pub app_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    /// Base64-encoded raw transactions.
    #[serde(default)]
    pub txs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceData {
    #[serde(default)]
    pub evidence: Option<Vec<JsonValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResultsResponse {
    pub height: String,
    #[serde(default)]
    pub txs_results: Option<Vec<TxResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin_block_events: Option<Vec<AbciEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_block_events: Option<Vec<AbciEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_block_events: Option<Vec<AbciEvent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_updates: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_param_updates: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub codespace: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub gas_wanted: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub events: Vec<AbciEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbciEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<AbciAttribute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbciAttribute {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub index: Option<bool>,
}

/// RPC responses may arrive `{ "result": ... }`-wrapped depending on the
/// endpoint flavor. Unwrap when the key is present.
pub fn unwrap_result(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut map) => match map.remove("result") {
            Some(inner) => inner,
            None => JsonValue::Object(map),
        },
        other => other,
    }
}
