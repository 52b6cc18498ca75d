use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::normalize::events::{normalize_events, parse_raw_log};
use crate::types::chain::{BlockResponse, BlockResultsResponse, TxResult};
use crate::types::record::{BlockMeta, BlockRecord, LogEntry, TxRecord, TxResponse};

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("Block height '{0}' is not a decimal integer")]
    InvalidHeight(String),

    #[error("Invalid base64 tx at height {height} index {index}: {source}")]
    InvalidTxBase64 {
        height: u64,
        index: usize,
        source: base64::DecodeError,
    },

    #[error("Decoded tx count {decoded} does not match block tx count {txs} at height {height}")]
    DecodedCountMismatch {
        height: u64,
        decoded: usize,
        txs: usize,
    },
}

/// Compose a fetched block, its ABCI results, and the decoded transactions
/// into a `BlockRecord`. Pure aside from one debug line on short results.
pub fn assemble_block(
    block: BlockResponse,
    results: BlockResultsResponse,
    decoded: Vec<JsonValue>,
) -> Result<BlockRecord, AssembleError> {
    let header = &block.block.header;
    let height = header
        .height
        .parse::<u64>()
        .map_err(|_| AssembleError::InvalidHeight(header.height.clone()))?;

    let raw_txs = &block.block.data.txs;
    if decoded.len() != raw_txs.len() {
        return Err(AssembleError::DecodedCountMismatch {
            height,
            decoded: decoded.len(),
            txs: raw_txs.len(),
        });
    }

    let mut tx_results = results.txs_results.clone().unwrap_or_default();
    if tx_results.len() != raw_txs.len() {
        tracing::debug!(
            "Height {}: {} tx results for {} txs, padding with empty results",
            height,
            tx_results.len(),
            raw_txs.len()
        );
        tx_results.resize_with(raw_txs.len(), TxResult::default);
    }

    let mut txs = Vec::with_capacity(raw_txs.len());
    let mut size_bytes = 0u64;
    for (index, ((tx_base64, tx_result), decoded_tx)) in raw_txs
        .iter()
        .zip(tx_results.into_iter())
        .zip(decoded.into_iter())
        .enumerate()
    {
        let bytes =
            BASE64
                .decode(tx_base64)
                .map_err(|source| AssembleError::InvalidTxBase64 {
                    height,
                    index,
                    source,
                })?;
        size_bytes += bytes.len() as u64;

        let hash = hex::encode_upper(Sha256::digest(&bytes));
        let tx_events = normalize_events(&tx_result.events);
        let mut logs = parse_raw_log(tx_result.log.as_deref());
        logs.push(LogEntry {
            msg_index: None,
            events: tx_events.clone(),
        });

        txs.push(TxRecord {
            index: index as u32,
            hash,
            raw_base64: tx_base64.clone(),
            raw_hex: hex::encode_upper(&bytes),
            decoded: decoded_tx,
            response: TxResponse {
                code: tx_result.code,
                codespace: tx_result.codespace,
                data: tx_result.data,
                gas_wanted: parse_gas(tx_result.gas_wanted.as_deref()),
                gas_used: parse_gas(tx_result.gas_used.as_deref()),
                raw_log: tx_result.log,
                events: tx_events,
                logs,
                timestamp: header.time,
            },
        });
    }

    let evidence_count = block
        .block
        .evidence
        .as_ref()
        .and_then(|e| e.evidence.as_ref())
        .map(|list| list.len() as u32)
        .unwrap_or(0);

    let meta = BlockMeta {
        chain_id: header.chain_id.clone(),
        height,
        time: header.time,
    };
    let block_hash = block
        .block_id
        .as_ref()
        .map(|id| id.hash.clone())
        .unwrap_or_default();
    let proposer_address = header.proposer_address.clone();
    let last_commit_hash = header.last_commit_hash.clone();
    let data_hash = header.data_hash.clone();
    let app_hash = header.app_hash.clone();

    Ok(BlockRecord {
        meta,
        block_hash,
        proposer_address,
        last_commit_hash,
        data_hash,
        app_hash,
        evidence_count,
        size_bytes: Some(size_bytes),
        block: stripped_block(block),
        block_results: stripped_results(results),
        txs,
    })
}

fn parse_gas(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(0)
}

/// Serialize the block with the raw tx list and evidence dropped.
fn stripped_block(mut block: BlockResponse) -> JsonValue {
    block.block.data.txs.clear();
    block.block.evidence = None;
    serde_json::to_value(&block).unwrap_or(JsonValue::Null)
}

/// Serialize block results with per-tx results dropped (they live on the
/// tx records).
fn stripped_results(mut results: BlockResultsResponse) -> JsonValue {
    results.txs_results = None;
    serde_json::to_value(&results).unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chain::{AbciAttribute, AbciEvent};
    use serde_json::json;

    fn sample_block(height: &str, txs: Vec<String>) -> BlockResponse {
        serde_json::from_value(json!({
            "block_id": { "hash": "B0CC" },
            "block": {
                "header": {
                    "chain_id": "testchain-1",
                    "height": height,
                    "time": "2023-05-01T12:00:00Z",
                    "proposer_address": "AA11",
                    "data_hash": "DD22"
                },
                "data": { "txs": txs }
            }
        }))
        .unwrap()
    }

    fn sample_results(height: &str, tx_count: usize) -> BlockResultsResponse {
        let results: Vec<_> = (0..tx_count)
            .map(|_| {
                json!({
                    "code": 0,
                    "gas_wanted": "200000",
                    "gas_used": "98765",
                    "log": "[]",
                    "events": []
                })
            })
            .collect();
        serde_json::from_value(json!({
            "height": height,
            "txs_results": results
        }))
        .unwrap()
    }

    #[test]
    fn test_tx_hash_is_upper_sha256() {
        let tx_base64 = BASE64.encode("test");
        let block = sample_block("10", vec![tx_base64]);
        let results = sample_results("10", 1);
        let record = assemble_block(block, results, vec![json!({})]).unwrap();
        assert_eq!(
            record.txs[0].hash,
            "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08"
        );
        assert_eq!(record.txs[0].raw_hex, "74657374");
    }

    #[test]
    fn test_short_results_padded() {
        let block = sample_block("11", vec![BASE64.encode("a"), BASE64.encode("b")]);
        let results = sample_results("11", 1);
        let record = assemble_block(block, results, vec![json!({}), json!({})]).unwrap();
        assert_eq!(record.txs.len(), 2);
        assert_eq!(record.txs[1].response.code, 0);
        assert!(record.txs[1].response.events.is_empty());
        assert_eq!(record.txs[1].response.gas_used, 0);
    }

    #[test]
    fn test_tx_level_events_appended_as_trailing_log_entry() {
        let block = sample_block("12", vec![BASE64.encode("x")]);
        let mut results = sample_results("12", 1);
        results.txs_results.as_mut().unwrap()[0].events = vec![AbciEvent {
            kind: "tx".to_string(),
            attributes: vec![AbciAttribute {
                key: "fee".to_string(),
                value: "10uatom".to_string(),
                index: None,
            }],
        }];
        let record = assemble_block(block, results, vec![json!({})]).unwrap();
        let logs = &record.txs[0].response.logs;
        let last = logs.last().unwrap();
        assert_eq!(last.msg_index, None);
        assert_eq!(last.events[0].kind, "tx");
    }

    #[test]
    fn test_stripped_block_drops_raw_txs() {
        let block = sample_block("13", vec![BASE64.encode("payload")]);
        let results = sample_results("13", 1);
        let record = assemble_block(block, results, vec![json!({})]).unwrap();
        assert_eq!(record.block["block"]["data"]["txs"], json!([]));
        assert_eq!(record.meta.height, 13);
        assert_eq!(record.block_hash, "B0CC");
        assert_eq!(record.size_bytes, Some(7));
    }

    #[test]
    fn test_decoded_count_mismatch_rejected() {
        let block = sample_block("14", vec![BASE64.encode("x")]);
        let results = sample_results("14", 1);
        assert!(matches!(
            assemble_block(block, results, vec![]),
            Err(AssembleError::DecodedCountMismatch { .. })
        ));
    }
}
