//! Hand-derived prost messages for the closed set of transaction envelope
//! and message types the fast decode path understands. Field tags follow
//! the upstream Cosmos SDK / CosmWasm / IBC proto definitions; unknown
//! fields are skipped by prost during decode.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct Any {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

// ─── Transaction envelope (cosmos.tx.v1beta1) ───────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct TxRaw {
    #[prost(bytes = "vec", tag = "1")]
    pub body_bytes: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub auth_info_bytes: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Tx {
    #[prost(message, optional, tag = "1")]
    pub body: Option<TxBody>,
    #[prost(message, optional, tag = "2")]
    pub auth_info: Option<AuthInfo>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TxBody {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<Any>,
    #[prost(string, tag = "2")]
    pub memo: String,
    #[prost(uint64, tag = "3")]
    pub timeout_height: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct AuthInfo {
    #[prost(message, repeated, tag = "1")]
    pub signer_infos: Vec<SignerInfo>,
    #[prost(message, optional, tag = "2")]
    pub fee: Option<Fee>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SignerInfo {
    #[prost(message, optional, tag = "1")]
    pub public_key: Option<Any>,
    #[prost(uint64, tag = "3")]
    pub sequence: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Fee {
    #[prost(message, repeated, tag = "1")]
    pub amount: Vec<Coin>,
    #[prost(uint64, tag = "2")]
    pub gas_limit: u64,
    #[prost(string, tag = "3")]
    pub payer: String,
    #[prost(string, tag = "4")]
    pub granter: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Coin {
    #[prost(string, tag = "1")]
    pub denom: String,
    #[prost(string, tag = "2")]
    pub amount: String,
}

// ─── cosmos.bank.v1beta1 ────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct MsgSend {
    #[prost(string, tag = "1")]
    pub from_address: String,
    #[prost(string, tag = "2")]
    pub to_address: String,
    #[prost(message, repeated, tag = "3")]
    pub amount: Vec<Coin>,
}

// ─── cosmos.staking.v1beta1 ─────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct MsgDelegate {
    #[prost(string, tag = "1")]
    pub delegator_address: String,
    #[prost(string, tag = "2")]
    pub validator_address: String,
    #[prost(message, optional, tag = "3")]
    pub amount: Option<Coin>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgUndelegate {
    #[prost(string, tag = "1")]
    pub delegator_address: String,
    #[prost(string, tag = "2")]
    pub validator_address: String,
    #[prost(message, optional, tag = "3")]
    pub amount: Option<Coin>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgBeginRedelegate {
    #[prost(string, tag = "1")]
    pub delegator_address: String,
    #[prost(string, tag = "2")]
    pub validator_src_address: String,
    #[prost(string, tag = "3")]
    pub validator_dst_address: String,
    #[prost(message, optional, tag = "4")]
    pub amount: Option<Coin>,
}

// ─── cosmos.distribution.v1beta1 ────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct MsgWithdrawDelegatorReward {
    #[prost(string, tag = "1")]
    pub delegator_address: String,
    #[prost(string, tag = "2")]
    pub validator_address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgWithdrawValidatorCommission {
    #[prost(string, tag = "1")]
    pub validator_address: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgSetWithdrawAddress {
    #[prost(string, tag = "1")]
    pub delegator_address: String,
    #[prost(string, tag = "2")]
    pub withdraw_address: String,
}

// ─── cosmos.gov.v1beta1 / cosmos.gov.v1 ─────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct MsgSubmitProposalV1Beta1 {
    #[prost(message, optional, tag = "1")]
    pub content: Option<Any>,
    #[prost(message, repeated, tag = "2")]
    pub initial_deposit: Vec<Coin>,
    #[prost(string, tag = "3")]
    pub proposer: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgSubmitProposalV1 {
    #[prost(message, repeated, tag = "1")]
    pub messages: Vec<Any>,
    #[prost(message, repeated, tag = "2")]
    pub initial_deposit: Vec<Coin>,
    #[prost(string, tag = "3")]
    pub proposer: String,
    #[prost(string, tag = "4")]
    pub metadata: String,
    #[prost(string, tag = "5")]
    pub title: String,
    #[prost(string, tag = "6")]
    pub summary: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgDeposit {
    #[prost(uint64, tag = "1")]
    pub proposal_id: u64,
    #[prost(string, tag = "2")]
    pub depositor: String,
    #[prost(message, repeated, tag = "3")]
    pub amount: Vec<Coin>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgVote {
    #[prost(uint64, tag = "1")]
    pub proposal_id: u64,
    #[prost(string, tag = "2")]
    pub voter: String,
    #[prost(int32, tag = "3")]
    pub option: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct MsgVoteWeighted {
    #[prost(uint64, tag = "1")]
    pub proposal_id: u64,
    #[prost(string, tag = "2")]
    pub voter: String,
    #[prost(message, repeated, tag = "3")]
    pub options: Vec<WeightedVoteOption>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WeightedVoteOption {
    #[prost(int32, tag = "1")]
    pub option: i32,
    #[prost(string, tag = "2")]
    pub weight: String,
}

/// Proto enum names for `cosmos.gov.*.VoteOption` values.
pub fn vote_option_name(option: i32) -> &'static str {
    match option {
        1 => "VOTE_OPTION_YES",
        2 => "VOTE_OPTION_ABSTAIN",
        3 => "VOTE_OPTION_NO",
        4 => "VOTE_OPTION_NO_WITH_VETO",
        _ => "VOTE_OPTION_UNSPECIFIED",
    }
}

// ─── cosmwasm.wasm.v1 ───────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct MsgExecuteContract {
    #[prost(string, tag = "1")]
    pub sender: String,
    #[prost(string, tag = "2")]
    pub contract: String,
    #[prost(bytes = "vec", tag = "3")]
    pub msg: Vec<u8>,
    #[prost(message, repeated, tag = "5")]
    pub funds: Vec<Coin>,
}

// ─── ibc.applications.transfer.v1 ───────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct MsgTransfer {
    #[prost(string, tag = "1")]
    pub source_port: String,
    #[prost(string, tag = "2")]
    pub source_channel: String,
    #[prost(message, optional, tag = "3")]
    pub token: Option<Coin>,
    #[prost(string, tag = "4")]
    pub sender: String,
    #[prost(string, tag = "5")]
    pub receiver: String,
    #[prost(message, optional, tag = "6")]
    pub timeout_height: Option<IbcHeight>,
    #[prost(uint64, tag = "7")]
    pub timeout_timestamp: u64,
    #[prost(string, tag = "8")]
    pub memo: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct IbcHeight {
    #[prost(uint64, tag = "1")]
    pub revision_number: u64,
    #[prost(uint64, tag = "2")]
    pub revision_height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_raw_round_trip() {
        let raw = TxRaw {
            body_bytes: vec![1, 2, 3],
            auth_info_bytes: vec![4, 5],
            signatures: vec![vec![9, 9]],
        };
        let encoded = raw.encode_to_vec();
        let decoded = TxRaw::decode(encoded.as_slice()).unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn test_whole_tx_decodes_tx_raw_encoding() {
        // TxRaw and Tx share tags 1-3, with 1/2 as nested-message bytes,
        // so a Tx payload also parses as TxRaw with non-empty body bytes.
        let tx = Tx {
            body: Some(TxBody {
                messages: vec![],
                memo: "hello".to_string(),
                timeout_height: 0,
            }),
            auth_info: Some(AuthInfo {
                signer_infos: vec![],
                fee: Some(Fee {
                    amount: vec![Coin {
                        denom: "uatom".to_string(),
                        amount: "10".to_string(),
                    }],
                    gas_limit: 200_000,
                    payer: String::new(),
                    granter: String::new(),
                }),
            }),
            signatures: vec![],
        };
        let encoded = tx.encode_to_vec();
        let raw = TxRaw::decode(encoded.as_slice()).unwrap();
        let body = TxBody::decode(raw.body_bytes.as_slice()).unwrap();
        assert_eq!(body.memo, "hello");
        let auth = AuthInfo::decode(raw.auth_info_bytes.as_slice()).unwrap();
        assert_eq!(auth.fee.unwrap().gas_limit, 200_000);
    }

    #[test]
    fn test_vote_option_names() {
        assert_eq!(vote_option_name(1), "VOTE_OPTION_YES");
        assert_eq!(vote_option_name(4), "VOTE_OPTION_NO_WITH_VETO");
        assert_eq!(vote_option_name(99), "VOTE_OPTION_UNSPECIFIED");
    }
}
