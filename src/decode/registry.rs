use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, SerializeOptions};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use super::proto::{
    vote_option_name, Coin, MsgBeginRedelegate, MsgDelegate, MsgDeposit, MsgExecuteContract,
    MsgSend, MsgSetWithdrawAddress, MsgSubmitProposalV1, MsgSubmitProposalV1Beta1, MsgTransfer,
    MsgUndelegate, MsgVote, MsgVoteWeighted, MsgWithdrawDelegatorReward,
    MsgWithdrawValidatorCommission,
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to read descriptor set {path}: {source}")]
    DescriptorIo {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse descriptor set: {0}")]
    DescriptorParse(#[from] prost_reflect::DescriptorError),

    #[error("Invalid base64 transaction payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Decoder pool is closed")]
    PoolClosed,

    #[error("Decode task failed: {0}")]
    TaskFailed(String),
}

/// Immutable `type_url` → decoder dispatch. Lookup order: the static
/// known-type table, then the dynamic descriptor pool when one was loaded,
/// then an opaque passthrough that preserves the raw bytes.
pub struct DecodeRegistry {
    dynamic: Option<DescriptorPool>,
}

impl DecodeRegistry {
    pub fn new() -> Self {
        Self { dynamic: None }
    }

    /// Load a compiled `FileDescriptorSet` to back the dynamic path.
    pub fn with_descriptor_set(path: &Path) -> Result<Self, DecodeError> {
        let bytes = std::fs::read(path).map_err(|e| DecodeError::DescriptorIo {
            path: path.display().to_string(),
            source: e,
        })?;
        let pool = DescriptorPool::decode(bytes.as_slice())?;
        tracing::info!(
            "Loaded protobuf descriptor set with {} message types from {}",
            pool.all_messages().count(),
            path.display()
        );
        Ok(Self {
            dynamic: Some(pool),
        })
    }

    pub fn has_dynamic(&self) -> bool {
        self.dynamic.is_some()
    }

    /// Decode an `Any` payload to JSON. Never fails: unknown or undecodable
    /// types fall back to `{ "@type": ..., "value_b64": ... }`.
    pub fn decode_any(&self, type_url: &str, bytes: &[u8]) -> JsonValue {
        if let Some(value) = self.decode_known(type_url, bytes) {
            return value;
        }
        if let Some(value) = self.decode_dynamic(type_url, bytes) {
            return value;
        }
        opaque(type_url, bytes)
    }

    fn decode_known(&self, type_url: &str, bytes: &[u8]) -> Option<JsonValue> {
        match type_url {
            "/cosmos.bank.v1beta1.MsgSend" => {
                let m = MsgSend::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "from_address": m.from_address,
                    "to_address": m.to_address,
                    "amount": coins_json(&m.amount),
                }))
            }
            "/cosmos.staking.v1beta1.MsgDelegate" => {
                let m = MsgDelegate::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "delegator_address": m.delegator_address,
                    "validator_address": m.validator_address,
                    "amount": m.amount.as_ref().map(coin_json),
                }))
            }
            "/cosmos.staking.v1beta1.MsgUndelegate" => {
                let m = MsgUndelegate::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "delegator_address": m.delegator_address,
                    "validator_address": m.validator_address,
                    "amount": m.amount.as_ref().map(coin_json),
                }))
            }
            "/cosmos.staking.v1beta1.MsgBeginRedelegate" => {
                let m = MsgBeginRedelegate::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "delegator_address": m.delegator_address,
                    "validator_src_address": m.validator_src_address,
                    "validator_dst_address": m.validator_dst_address,
                    "amount": m.amount.as_ref().map(coin_json),
                }))
            }
            "/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward" => {
                let m = MsgWithdrawDelegatorReward::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "delegator_address": m.delegator_address,
                    "validator_address": m.validator_address,
                }))
            }
            "/cosmos.distribution.v1beta1.MsgWithdrawValidatorCommission" => {
                let m = MsgWithdrawValidatorCommission::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "validator_address": m.validator_address,
                }))
            }
            "/cosmos.distribution.v1beta1.MsgSetWithdrawAddress" => {
                let m = MsgSetWithdrawAddress::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "delegator_address": m.delegator_address,
                    "withdraw_address": m.withdraw_address,
                }))
            }
            "/cosmos.gov.v1beta1.MsgSubmitProposal" => {
                let m = MsgSubmitProposalV1Beta1::decode(bytes).ok()?;
                let content = m
                    .content
                    .as_ref()
                    .map(|c| self.decode_any(&c.type_url, &c.value));
                Some(json!({
                    "@type": type_url,
                    "content": content,
                    "initial_deposit": coins_json(&m.initial_deposit),
                    "proposer": m.proposer,
                }))
            }
            "/cosmos.gov.v1.MsgSubmitProposal" => {
                let m = MsgSubmitProposalV1::decode(bytes).ok()?;
                let messages: Vec<JsonValue> = m
                    .messages
                    .iter()
                    .map(|inner| self.decode_any(&inner.type_url, &inner.value))
                    .collect();
                Some(json!({
                    "@type": type_url,
                    "messages": messages,
                    "initial_deposit": coins_json(&m.initial_deposit),
                    "proposer": m.proposer,
                    "metadata": m.metadata,
                    "title": m.title,
                    "summary": m.summary,
                }))
            }
            "/cosmos.gov.v1beta1.MsgDeposit" | "/cosmos.gov.v1.MsgDeposit" => {
                let m = MsgDeposit::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "proposal_id": m.proposal_id.to_string(),
                    "depositor": m.depositor,
                    "amount": coins_json(&m.amount),
                }))
            }
            "/cosmos.gov.v1beta1.MsgVote" | "/cosmos.gov.v1.MsgVote" => {
                let m = MsgVote::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "proposal_id": m.proposal_id.to_string(),
                    "voter": m.voter,
                    "option": vote_option_name(m.option),
                }))
            }
            "/cosmos.gov.v1beta1.MsgVoteWeighted" | "/cosmos.gov.v1.MsgVoteWeighted" => {
                let m = MsgVoteWeighted::decode(bytes).ok()?;
                let options: Vec<JsonValue> = m
                    .options
                    .iter()
                    .map(|o| {
                        json!({
                            "option": vote_option_name(o.option),
                            "weight": o.weight,
                        })
                    })
                    .collect();
                Some(json!({
                    "@type": type_url,
                    "proposal_id": m.proposal_id.to_string(),
                    "voter": m.voter,
                    "options": options,
                }))
            }
            "/cosmwasm.wasm.v1.MsgExecuteContract" => {
                let m = MsgExecuteContract::decode(bytes).ok()?;
                // Execute payloads are JSON on well-behaved contracts; keep
                // the raw bytes when they are not.
                let msg = serde_json::from_slice::<JsonValue>(&m.msg)
                    .unwrap_or_else(|_| JsonValue::String(BASE64.encode(&m.msg)));
                Some(json!({
                    "@type": type_url,
                    "sender": m.sender,
                    "contract": m.contract,
                    "msg": msg,
                    "funds": coins_json(&m.funds),
                }))
            }
            "/ibc.applications.transfer.v1.MsgTransfer" => {
                let m = MsgTransfer::decode(bytes).ok()?;
                Some(json!({
                    "@type": type_url,
                    "source_port": m.source_port,
                    "source_channel": m.source_channel,
                    "token": m.token.as_ref().map(coin_json),
                    "sender": m.sender,
                    "receiver": m.receiver,
                    "timeout_height": m.timeout_height.as_ref().map(|h| json!({
                        "revision_number": h.revision_number.to_string(),
                        "revision_height": h.revision_height.to_string(),
                    })),
                    "timeout_timestamp": m.timeout_timestamp.to_string(),
                    "memo": m.memo,
                }))
            }
            _ => None,
        }
    }

    fn decode_dynamic(&self, type_url: &str, bytes: &[u8]) -> Option<JsonValue> {
        let pool = self.dynamic.as_ref()?;
        let full_name = type_url.trim_start_matches('/');
        let descriptor = pool.get_message_by_name(full_name)?;
        let message = DynamicMessage::decode(descriptor, bytes).ok()?;

        let mut buf = Vec::new();
        let options = SerializeOptions::new()
            .stringify_64_bit_integers(true)
            .use_proto_field_name(true);
        message
            .serialize_with_options(&mut serde_json::Serializer::new(&mut buf), &options)
            .ok()?;
        let mut value: JsonValue = serde_json::from_slice(&buf).ok()?;
        if let Some(map) = value.as_object_mut() {
            map.insert("@type".to_string(), json!(type_url));
        }
        Some(value)
    }
}

impl Default for DecodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn coin_json(coin: &Coin) -> JsonValue {
    json!({ "denom": coin.denom, "amount": coin.amount })
}

fn coins_json(coins: &[Coin]) -> JsonValue {
    JsonValue::Array(coins.iter().map(coin_json).collect())
}

fn opaque(type_url: &str, bytes: &[u8]) -> JsonValue {
    json!({
        "@type": type_url,
        "value_b64": BASE64.encode(bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_path_msg_send() {
        let msg = MsgSend {
            from_address: "cosmos1sender".to_string(),
            to_address: "cosmos1receiver".to_string(),
            amount: vec![Coin {
                denom: "uatom".to_string(),
                amount: "100".to_string(),
            }],
        };
        let registry = DecodeRegistry::new();
        let value = registry.decode_any(
            "/cosmos.bank.v1beta1.MsgSend",
            &msg.encode_to_vec(),
        );
        assert_eq!(value["@type"], "/cosmos.bank.v1beta1.MsgSend");
        assert_eq!(value["from_address"], "cosmos1sender");
        assert_eq!(value["amount"][0]["denom"], "uatom");
    }

    #[test]
    fn test_unknown_type_falls_back_to_opaque() {
        let registry = DecodeRegistry::new();
        let value = registry.decode_any("/example.custom.MsgUnknown", &[1, 2, 3]);
        assert_eq!(value["@type"], "/example.custom.MsgUnknown");
        assert_eq!(value["value_b64"], BASE64.encode([1, 2, 3]));
    }

    #[test]
    fn test_vote_decodes_option_name() {
        let msg = MsgVote {
            proposal_id: 12,
            voter: "cosmos1voter".to_string(),
            option: 1,
        };
        let registry = DecodeRegistry::new();
        let value = registry.decode_any("/cosmos.gov.v1.MsgVote", &msg.encode_to_vec());
        assert_eq!(value["proposal_id"], "12");
        assert_eq!(value["option"], "VOTE_OPTION_YES");
    }

    #[test]
    fn test_execute_contract_json_payload() {
        let msg = MsgExecuteContract {
            sender: "cosmos1sender".to_string(),
            contract: "cosmos1contract".to_string(),
            msg: br#"{"swap":{"min_out":"1"}}"#.to_vec(),
            funds: vec![],
        };
        let registry = DecodeRegistry::new();
        let value = registry.decode_any(
            "/cosmwasm.wasm.v1.MsgExecuteContract",
            &msg.encode_to_vec(),
        );
        assert_eq!(value["msg"]["swap"]["min_out"], "1");
    }
}
