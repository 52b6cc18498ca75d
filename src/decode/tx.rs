use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use prost::Message;
use serde_json::{json, Value as JsonValue};

use super::proto::{Any, AuthInfo, Tx, TxBody, TxRaw};
use super::registry::DecodeRegistry;
use crate::normalize::convert_keys_deep;
use crate::types::config::CaseMode;

pub const TX_TYPE_URL: &str = "/cosmos.tx.v1beta1.Tx";

/// Decode raw transaction bytes into the normalized
/// `{ "@type", body, auth_info, signatures }` shape. `TxRaw` is tried
/// first; when its body bytes are empty the whole `Tx` message is decoded
/// instead. Undecodable bytes yield an empty-shaped placeholder so a single
/// bad transaction never fails its block.
pub fn decode_tx_bytes(
    registry: &DecodeRegistry,
    bytes: &[u8],
    case_mode: CaseMode,
) -> JsonValue {
    if let Ok(raw) = TxRaw::decode(bytes) {
        if !raw.body_bytes.is_empty() {
            if let (Ok(body), Ok(auth_info)) = (
                TxBody::decode(raw.body_bytes.as_slice()),
                AuthInfo::decode(raw.auth_info_bytes.as_slice()),
            ) {
                return tx_json(registry, &body, &auth_info, &raw.signatures, case_mode);
            }
        }
    }

    if let Ok(tx) = Tx::decode(bytes) {
        if tx.body.is_some() || tx.auth_info.is_some() {
            let body = tx.body.unwrap_or_default();
            let auth_info = tx.auth_info.unwrap_or_default();
            return tx_json(registry, &body, &auth_info, &tx.signatures, case_mode);
        }
    }

    let preview_len = bytes.len().min(8);
    tracing::warn!(
        "Undecodable transaction ({} bytes, starts {}); recording placeholder",
        bytes.len(),
        hex::encode(&bytes[..preview_len])
    );
    placeholder_tx()
}

fn tx_json(
    registry: &DecodeRegistry,
    body: &TxBody,
    auth_info: &AuthInfo,
    signatures: &[Vec<u8>],
    case_mode: CaseMode,
) -> JsonValue {
    let messages: Vec<JsonValue> = body
        .messages
        .iter()
        .map(|msg| {
            let decoded = registry.decode_any(&msg.type_url, &msg.value);
            convert_keys_deep(decoded, case_mode)
        })
        .collect();

    json!({
        "@type": TX_TYPE_URL,
        "body": {
            "messages": messages,
            "memo": body.memo,
            "timeout_height": body.timeout_height.to_string(),
        },
        "auth_info": {
            "signer_infos": auth_info
                .signer_infos
                .iter()
                .map(|info| json!({
                    "public_key": info.public_key.as_ref().map(any_json),
                    "sequence": info.sequence.to_string(),
                }))
                .collect::<Vec<_>>(),
            "fee": auth_info.fee.as_ref().map(|fee| json!({
                "amount": fee
                    .amount
                    .iter()
                    .map(|c| json!({ "denom": c.denom, "amount": c.amount }))
                    .collect::<Vec<_>>(),
                "gas_limit": fee.gas_limit.to_string(),
                "payer": fee.payer,
                "granter": fee.granter,
            })),
        },
        "signatures": signatures
            .iter()
            .map(|sig| BASE64.encode(sig))
            .collect::<Vec<_>>(),
    })
}

fn any_json(any: &Any) -> JsonValue {
    json!({
        "@type": any.type_url,
        "value_b64": BASE64.encode(&any.value),
    })
}

/// Empty-shaped decoded tx recorded for bytes that fail both decode paths.
pub fn placeholder_tx() -> JsonValue {
    json!({
        "@type": TX_TYPE_URL,
        "body": { "messages": [], "memo": "", "timeout_height": "0" },
        "auth_info": {},
        "signatures": [],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::proto::{Coin, Fee, MsgSend, SignerInfo};

    fn sample_tx_raw() -> Vec<u8> {
        let send = MsgSend {
            from_address: "cosmos1fromaddress".to_string(),
            to_address: "cosmos1toaddress".to_string(),
            amount: vec![Coin {
                denom: "uatom".to_string(),
                amount: "25".to_string(),
            }],
        };
        let body = TxBody {
            messages: vec![Any {
                type_url: "/cosmos.bank.v1beta1.MsgSend".to_string(),
                value: send.encode_to_vec(),
            }],
            memo: "test memo".to_string(),
            timeout_height: 0,
        };
        let auth_info = AuthInfo {
            signer_infos: vec![SignerInfo {
                public_key: None,
                sequence: 7,
            }],
            fee: Some(Fee {
                amount: vec![Coin {
                    denom: "uatom".to_string(),
                    amount: "500".to_string(),
                }],
                gas_limit: 200_000,
                payer: String::new(),
                granter: String::new(),
            }),
        };
        TxRaw {
            body_bytes: body.encode_to_vec(),
            auth_info_bytes: auth_info.encode_to_vec(),
            signatures: vec![vec![0xAA, 0xBB]],
        }
        .encode_to_vec()
    }

    #[test]
    fn test_decode_tx_raw() {
        let registry = DecodeRegistry::new();
        let decoded = decode_tx_bytes(&registry, &sample_tx_raw(), CaseMode::Snake);
        assert_eq!(decoded["@type"], TX_TYPE_URL);
        assert_eq!(decoded["body"]["memo"], "test memo");
        assert_eq!(
            decoded["body"]["messages"][0]["@type"],
            "/cosmos.bank.v1beta1.MsgSend"
        );
        assert_eq!(decoded["body"]["messages"][0]["from_address"], "cosmos1fromaddress");
        assert_eq!(decoded["auth_info"]["fee"]["gas_limit"], "200000");
        assert_eq!(decoded["signatures"][0], BASE64.encode([0xAA, 0xBB]));
    }

    #[test]
    fn test_camel_mode_converts_message_payloads_only() {
        let registry = DecodeRegistry::new();
        let decoded = decode_tx_bytes(&registry, &sample_tx_raw(), CaseMode::Camel);
        assert_eq!(
            decoded["body"]["messages"][0]["fromAddress"],
            "cosmos1fromaddress"
        );
        assert_eq!(
            decoded["body"]["messages"][0]["@type"],
            "/cosmos.bank.v1beta1.MsgSend"
        );
    }

    #[test]
    fn test_garbage_yields_placeholder() {
        let registry = DecodeRegistry::new();
        let decoded = decode_tx_bytes(&registry, &[0xFF, 0xFF, 0xFF, 0x01], CaseMode::Snake);
        assert_eq!(decoded["@type"], TX_TYPE_URL);
        assert_eq!(decoded["body"]["messages"].as_array().unwrap().len(), 0);
    }
}
