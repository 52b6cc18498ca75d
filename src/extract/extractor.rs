use serde_json::{json, Value as JsonValue};

use super::rows::{
    BlockRow, EventAttrRow, EventRow, GovDepositRow, GovProposalRow, GovVoteRow, MessageRow,
    RowSet, StakeDelegationRow, StakeDistributionRow, TransferRow, TxRow, WasmEventRow,
    WasmExecutionRow,
};
use crate::normalize::case::to_camel_case;
use crate::normalize::coin::parse_coin;
use crate::types::record::{BlockRecord, NormalizedEvent, TxRecord};

/// Message-level address fields considered when inferring tx signers.
const SIGNER_FIELDS: &[&str] = &[
    "signer",
    "from_address",
    "delegator_address",
    "validator_address",
    "authority",
    "admin",
    "granter",
    "grantee",
    "sender",
    "creator",
];

/// Fields tried, in order, for the per-message signer column.
const MESSAGE_SIGNER_FIELDS: &[&str] = &["signer", "from_address", "delegator_address"];

const DELEGATION_EVENTS: &[&str] = &["delegate", "redelegate", "unbond", "complete_unbonding"];
const DISTRIBUTION_EVENTS: &[&str] = &[
    "withdraw_rewards",
    "withdraw_commission",
    "set_withdraw_address",
];

const MSG_EXECUTE_CONTRACT: &str = "/cosmwasm.wasm.v1.MsgExecuteContract";

const LOG_SUMMARY_MAX: usize = 1000;

/// Project one assembled block into row sets for every target table.
pub fn extract_rows(record: &BlockRecord) -> RowSet {
    let mut rows = RowSet::new();
    let time = record.meta.time;
    let height = record.meta.height;

    rows.blocks.push(BlockRow {
        height,
        block_hash: record.block_hash.clone(),
        time,
        proposer_address: record.proposer_address.clone(),
        tx_count: record.txs.len() as i32,
        size_bytes: record.size_bytes.map(|b| b as i64),
        last_commit_hash: record.last_commit_hash.clone(),
        data_hash: record.data_hash.clone(),
        evidence_count: record.evidence_count as i32,
        app_hash: record.app_hash.clone(),
    });

    for tx in &record.txs {
        extract_tx(&mut rows, record, tx);
    }

    rows
}

fn extract_tx(rows: &mut RowSet, record: &BlockRecord, tx: &TxRecord) {
    let height = record.meta.height;
    let time = record.meta.time;
    let messages = tx_messages(tx);

    let log_summary = if tx.response.code != 0 {
        tx.response.raw_log.as_deref().map(truncate_summary)
    } else {
        None
    };

    rows.txs.push(TxRow {
        height,
        tx_hash: tx.hash.clone(),
        tx_index: tx.index as i32,
        code: tx.response.code as i32,
        gas_wanted: tx.response.gas_wanted,
        gas_used: tx.response.gas_used,
        fee: tx.decoded["auth_info"]["fee"].clone(),
        memo: tx.decoded["body"]["memo"].as_str().map(str::to_string),
        signers: infer_signers(messages),
        raw_tx: tx.decoded.clone(),
        log_summary: log_summary.clone(),
        time,
    });

    for (msg_index, msg) in messages.iter().enumerate() {
        let type_url = msg["@type"].as_str().unwrap_or_default().to_string();

        rows.messages.push(MessageRow {
            height,
            tx_hash: tx.hash.clone(),
            msg_index: msg_index as i32,
            type_url: type_url.clone(),
            value: msg.clone(),
            signer: first_field(msg, MESSAGE_SIGNER_FIELDS),
            time,
        });

        extract_message_rows(
            rows,
            record,
            tx,
            msg,
            &type_url,
            msg_index as i32,
            log_summary.as_deref(),
        );
    }

    for entry in &tx.response.logs {
        let msg_index = entry.msg_index.map(|i| i as i32).unwrap_or(-1);
        let msg = entry.msg_index.and_then(|i| messages.get(i as usize));

        for (event_index, event) in entry.events.iter().enumerate() {
            extract_event_rows(rows, record, tx, msg, event, msg_index, event_index as i32);
        }
    }
}

fn extract_event_rows(
    rows: &mut RowSet,
    record: &BlockRecord,
    tx: &TxRecord,
    msg: Option<&JsonValue>,
    event: &NormalizedEvent,
    msg_index: i32,
    event_index: i32,
) {
    let height = record.meta.height;
    let time = record.meta.time;

    rows.events.push(EventRow {
        height,
        tx_hash: tx.hash.clone(),
        msg_index,
        event_index,
        event_type: event.kind.clone(),
        attributes: serde_json::to_value(&event.attributes).unwrap_or(JsonValue::Null),
        time,
    });

    for attr in &event.attributes {
        rows.event_attrs.push(EventAttrRow {
            height,
            tx_hash: tx.hash.clone(),
            msg_index,
            event_index,
            key: attr.key.clone(),
            value: attr.value.clone(),
        });
    }

    match event.kind.as_str() {
        "transfer" => {
            if let (Some(sender), Some(recipient), Some(coin)) = (
                event.attr("sender"),
                event.attr("recipient"),
                event.attr("amount").and_then(parse_coin),
            ) {
                rows.transfers.push(TransferRow {
                    height,
                    tx_hash: tx.hash.clone(),
                    msg_index,
                    from_addr: sender.to_string(),
                    to_addr: recipient.to_string(),
                    amount: coin.amount,
                    denom: coin.denom,
                    time,
                });
            }
        }
        kind if DELEGATION_EVENTS.contains(&kind) => {
            rows.stake_delegations
                .push(delegation_row(record, tx, msg, event, msg_index));
        }
        kind if DISTRIBUTION_EVENTS.contains(&kind) => {
            rows.stake_distributions
                .push(distribution_row(record, tx, msg, event, msg_index));
        }
        "wasm" => {
            let contract = event
                .attr("_contract_address")
                .or_else(|| event.attr("contract_address"));
            if let Some(contract) = contract {
                rows.wasm_events.push(WasmEventRow {
                    height,
                    tx_hash: tx.hash.clone(),
                    msg_index,
                    event_index,
                    contract_address: contract.to_string(),
                    attributes: serde_json::to_value(&event.attributes)
                        .unwrap_or(JsonValue::Null),
                    time,
                });
            }
        }
        _ => {}
    }
}

fn delegation_row(
    record: &BlockRecord,
    tx: &TxRecord,
    msg: Option<&JsonValue>,
    event: &NormalizedEvent,
    msg_index: i32,
) -> StakeDelegationRow {
    let (src_attr, dst_attr) = if event.kind == "redelegate" {
        (
            event.attr("source_validator"),
            event.attr("destination_validator"),
        )
    } else {
        (event.attr("validator"), None)
    };

    let validator_src = src_attr.map(str::to_string).or_else(|| {
        msg.and_then(|m| {
            first_field(
                m,
                &[
                    "validator_src_address",
                    "source_validator_address",
                    "validator_address",
                ],
            )
        })
    });
    let validator_dst = dst_attr.map(str::to_string).or_else(|| {
        msg.and_then(|m| {
            first_field(m, &["validator_dst_address", "destination_validator_address"])
        })
    });
    let delegator_address = event
        .attr("delegator")
        .map(str::to_string)
        .or_else(|| msg.and_then(|m| first_field(m, &["delegator_address"])));

    let coin = event
        .attr("amount")
        .or_else(|| event.attr("completion_amount"))
        .and_then(parse_coin)
        .or_else(|| msg.and_then(structured_msg_coin));

    StakeDelegationRow {
        height: record.meta.height,
        tx_hash: tx.hash.clone(),
        msg_index,
        event_type: event.kind.clone(),
        delegator_address,
        validator_src,
        validator_dst,
        amount: coin.as_ref().map(|c| c.amount.clone()),
        denom: coin.map(|c| c.denom),
        time: record.meta.time,
    }
}

fn distribution_row(
    record: &BlockRecord,
    tx: &TxRecord,
    msg: Option<&JsonValue>,
    event: &NormalizedEvent,
    msg_index: i32,
) -> StakeDistributionRow {
    let validator_address = event
        .attr("validator")
        .map(str::to_string)
        .or_else(|| msg.and_then(|m| first_field(m, &["validator_address"])));
    let delegator_address = event
        .attr("delegator")
        .map(str::to_string)
        .or_else(|| msg.and_then(|m| first_field(m, &["delegator_address"])));
    let withdraw_address = event
        .attr("withdraw_address")
        .map(str::to_string)
        .or_else(|| msg.and_then(|m| first_field(m, &["withdraw_address"])));
    let coin = event.attr("amount").and_then(parse_coin);

    StakeDistributionRow {
        height: record.meta.height,
        tx_hash: tx.hash.clone(),
        msg_index,
        event_type: event.kind.clone(),
        validator_address,
        delegator_address,
        amount: coin.as_ref().map(|c| c.amount.clone()),
        denom: coin.map(|c| c.denom),
        withdraw_address,
        time: record.meta.time,
    }
}

fn extract_message_rows(
    rows: &mut RowSet,
    record: &BlockRecord,
    tx: &TxRecord,
    msg: &JsonValue,
    type_url: &str,
    msg_index: i32,
    log_summary: Option<&str>,
) {
    let height = record.meta.height;
    let time = record.meta.time;

    if type_url == MSG_EXECUTE_CONTRACT {
        rows.wasm_executions.push(WasmExecutionRow {
            height,
            tx_hash: tx.hash.clone(),
            msg_index,
            contract: first_field(msg, &["contract"]).unwrap_or_default(),
            sender: first_field(msg, &["sender"]).unwrap_or_default(),
            msg: field(msg, "msg").cloned().unwrap_or(JsonValue::Null),
            funds: field(msg, "funds").cloned().unwrap_or(json!([])),
            success: tx.response.code == 0,
            error: if tx.response.code != 0 {
                log_summary.map(str::to_string)
            } else {
                None
            },
            time,
        });
        return;
    }

    let Some(short_name) = type_url.rsplit('.').next() else {
        return;
    };
    if !type_url.starts_with("/cosmos.gov.") {
        return;
    }

    match short_name {
        "MsgDeposit" => {
            let Some(proposal_id) = msg_proposal_id(msg) else {
                return;
            };
            let depositor = first_field(msg, &["depositor"]).unwrap_or_default();
            for coin in msg_coins(msg, "amount") {
                rows.gov_deposits.push(GovDepositRow {
                    height,
                    tx_hash: tx.hash.clone(),
                    msg_index,
                    proposal_id,
                    depositor: depositor.clone(),
                    amount: coin.amount,
                    denom: coin.denom,
                    time,
                });
            }
        }
        "MsgVote" => {
            let Some(proposal_id) = msg_proposal_id(msg) else {
                return;
            };
            rows.gov_votes.push(GovVoteRow {
                height,
                tx_hash: tx.hash.clone(),
                msg_index,
                proposal_id,
                voter: first_field(msg, &["voter"]).unwrap_or_default(),
                option: first_field(msg, &["option"]).unwrap_or_default(),
                weight: None,
                time,
            });
        }
        "MsgVoteWeighted" => {
            let Some(proposal_id) = msg_proposal_id(msg) else {
                return;
            };
            let first_option = field(msg, "options")
                .and_then(JsonValue::as_array)
                .and_then(|opts| opts.first());
            let Some(first_option) = first_option else {
                return;
            };
            rows.gov_votes.push(GovVoteRow {
                height,
                tx_hash: tx.hash.clone(),
                msg_index,
                proposal_id,
                voter: first_field(msg, &["voter"]).unwrap_or_default(),
                option: first_field(first_option, &["option"]).unwrap_or_default(),
                weight: first_field(first_option, &["weight"]),
                time,
            });
        }
        "MsgSubmitProposal" => {
            let Some(proposal_id) = proposal_id_from_events(tx, msg_index) else {
                return;
            };
            let content = field(msg, "content");
            let title = first_field(msg, &["title"])
                .or_else(|| content.and_then(|c| first_field(c, &["title"])));
            let summary = first_field(msg, &["summary"])
                .or_else(|| content.and_then(|c| first_field(c, &["description"])));
            rows.gov_proposals.push(GovProposalRow {
                proposal_id,
                height,
                tx_hash: tx.hash.clone(),
                proposer: first_field(msg, &["proposer"]),
                title,
                summary,
                content: content
                    .or_else(|| field(msg, "messages"))
                    .cloned(),
                status: Some("deposit_period".to_string()),
                time,
            });
        }
        _ => {}
    }
}

/// Proposal id for a submitted proposal comes from the `submit_proposal`
/// (or legacy `proposal`) event at the same message index.
fn proposal_id_from_events(tx: &TxRecord, msg_index: i32) -> Option<i64> {
    for entry in &tx.response.logs {
        let entry_index = entry.msg_index.map(|i| i as i32).unwrap_or(-1);
        if entry_index != msg_index {
            continue;
        }
        for event in &entry.events {
            if event.kind == "submit_proposal" || event.kind == "proposal" {
                if let Some(id) = event.attr("proposal_id").and_then(|v| v.parse().ok()) {
                    return Some(id);
                }
            }
        }
    }
    None
}

fn tx_messages(tx: &TxRecord) -> &[JsonValue] {
    tx.decoded["body"]["messages"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Ordered, deduplicated signer addresses inferred from message-level
/// address fields, filtered to plausible bech32 lengths.
fn infer_signers(messages: &[JsonValue]) -> JsonValue {
    let mut signers: Vec<String> = Vec::new();
    for msg in messages {
        for key in SIGNER_FIELDS {
            if let Some(value) = field(msg, key).and_then(JsonValue::as_str) {
                if value.len() >= 10 && !signers.iter().any(|s| s == value) {
                    signers.push(value.to_string());
                }
            }
        }
    }
    JsonValue::Array(signers.into_iter().map(JsonValue::String).collect())
}

/// Field lookup tolerant of the configured case mode: tries the snake name
/// first, then its camel form.
fn field<'a>(msg: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    msg.get(key).or_else(|| msg.get(to_camel_case(key)))
}

fn first_field(msg: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| field(msg, key).and_then(JsonValue::as_str))
        .map(str::to_string)
}

fn msg_proposal_id(msg: &JsonValue) -> Option<i64> {
    match field(msg, "proposal_id")? {
        JsonValue::String(s) => s.parse().ok(),
        JsonValue::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn msg_coins(msg: &JsonValue, key: &str) -> Vec<crate::normalize::coin::Coin> {
    field(msg, key)
        .and_then(JsonValue::as_array)
        .map(|coins| {
            coins
                .iter()
                .filter_map(|c| {
                    let denom = first_field(c, &["denom"])?;
                    let amount = match field(c, "amount")? {
                        JsonValue::String(s) => s.clone(),
                        JsonValue::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some(crate::normalize::coin::Coin { amount, denom })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn structured_msg_coin(msg: &JsonValue) -> Option<crate::normalize::coin::Coin> {
    let amount = field(msg, "amount")?;
    let denom = first_field(amount, &["denom"])?;
    let value = match field(amount, "amount")? {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(crate::normalize::coin::Coin {
        amount: value,
        denom,
    })
}

fn truncate_summary(log: &str) -> String {
    if log.len() <= LOG_SUMMARY_MAX {
        return log.to_string();
    }
    let mut cut = LOG_SUMMARY_MAX;
    while !log.is_char_boundary(cut) {
        cut -= 1;
    }
    log[..cut].to_string()
}
