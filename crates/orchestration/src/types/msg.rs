// Message envelopes handed to the transport

use serde::{Deserialize, Serialize};

pub type TypeUrl = String;

/// A message in proto3 JSON form, `{"@type": ..., ...fields}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proto3JsonMsg {
    #[serde(rename = "@type")]
    pub type_url: TypeUrl,
    pub value: serde_json::Value,
}

/// A message already encoded by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeObject {
    pub type_url: TypeUrl,
    pub value: Vec<u8>,
}

impl Proto3JsonMsg {
    pub fn new(type_url: impl Into<String>, value: serde_json::Value) -> Self {
        Self { type_url: type_url.into(), value }
    }

    /// String field of the message body
    pub fn field(&self, name: &str) -> Option<&str> {
        self.value.get(name).and_then(|v| v.as_str())
    }
}

/// Type URLs for the messages the account builds
pub mod type_urls {
    pub const MSG_SEND: &str = "/cosmos.bank.v1beta1.MsgSend";
    pub const MSG_DELEGATE: &str = "/cosmos.staking.v1beta1.MsgDelegate";
    pub const MSG_UNDELEGATE: &str = "/cosmos.staking.v1beta1.MsgUndelegate";
    pub const MSG_BEGIN_REDELEGATE: &str = "/cosmos.staking.v1beta1.MsgBeginRedelegate";
    pub const MSG_WITHDRAW_DELEGATOR_REWARD: &str =
        "/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward";
    pub const MSG_TRANSFER: &str = "/ibc.applications.transfer.v1.MsgTransfer";
    pub const MSG_LIQUID_STAKE: &str = "/stride.stakeibc.MsgLiquidStake";

    pub const QUERY_ALL_BALANCES: &str = "/cosmos.bank.v1beta1.QueryAllBalancesRequest";
    pub const QUERY_BALANCE: &str = "/cosmos.bank.v1beta1.QueryBalanceRequest";
    pub const QUERY_DENOM_TRACE: &str = "/ibc.applications.transfer.v1.QueryDenomTraceRequest";
    pub const QUERY_DELEGATOR_DELEGATIONS: &str =
        "/cosmos.staking.v1beta1.QueryDelegatorDelegationsRequest";
    pub const QUERY_DELEGATION: &str = "/cosmos.staking.v1beta1.QueryDelegationRequest";
    pub const QUERY_DELEGATOR_UNBONDING_DELEGATIONS: &str =
        "/cosmos.staking.v1beta1.QueryDelegatorUnbondingDelegationsRequest";
    pub const QUERY_UNBONDING_DELEGATION: &str =
        "/cosmos.staking.v1beta1.QueryUnbondingDelegationRequest";
    pub const QUERY_REDELEGATIONS: &str = "/cosmos.staking.v1beta1.QueryRedelegationsRequest";
    pub const QUERY_DELEGATION_TOTAL_REWARDS: &str =
        "/cosmos.distribution.v1beta1.QueryDelegationTotalRewardsRequest";
    pub const QUERY_DELEGATION_REWARDS: &str =
        "/cosmos.distribution.v1beta1.QueryDelegationRewardsRequest";
}
