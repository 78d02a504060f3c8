// Typed views over raw query results
// Field names follow the Cosmos LCD JSON responses

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{OrchestrationError, Result};
use crate::types::{
    ChainAddress, ChainAmount, Delegation, DenomTrace, Redelegation, RedelegationEntry, UnbondingDelegation,
    UnbondingEntry, ValidatorAddress, ValidatorReward,
};

#[derive(Debug, Deserialize)]
struct RawCoin {
    denom: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct AllBalancesResponse {
    #[serde(default)]
    balances: Vec<RawCoin>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Option<RawCoin>,
}

#[derive(Debug, Deserialize)]
struct DenomTraceResponse {
    denom_trace: RawDenomTrace,
}

#[derive(Debug, Deserialize)]
struct RawDenomTrace {
    path: String,
    base_denom: String,
}

#[derive(Debug, Deserialize)]
struct DelegationsResponse {
    #[serde(default)]
    delegation_responses: Vec<RawDelegationResponse>,
}

#[derive(Debug, Deserialize)]
struct DelegationResponse {
    delegation_response: Option<RawDelegationResponse>,
}

#[derive(Debug, Deserialize)]
struct RawDelegationResponse {
    delegation: RawDelegation,
    balance: RawCoin,
}

#[derive(Debug, Deserialize)]
struct RawDelegation {
    delegator_address: String,
    validator_address: String,
    shares: String,
}

#[derive(Debug, Deserialize)]
struct UnbondingsResponse {
    #[serde(default)]
    unbonding_responses: Vec<RawUnbonding>,
}

#[derive(Debug, Deserialize)]
struct UnbondingResponse {
    unbond: Option<RawUnbonding>,
}

#[derive(Debug, Deserialize)]
struct RawUnbonding {
    delegator_address: String,
    validator_address: String,
    #[serde(default)]
    entries: Vec<RawUnbondingEntry>,
}

#[derive(Debug, Deserialize)]
struct RawUnbondingEntry {
    creation_height: String,
    completion_time: DateTime<Utc>,
    initial_balance: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct RedelegationsResponse {
    #[serde(default)]
    redelegation_responses: Vec<RawRedelegationResponse>,
}

#[derive(Debug, Deserialize)]
struct RawRedelegationResponse {
    redelegation: RawRedelegation,
    #[serde(default)]
    entries: Vec<RawRedelegationEntryResponse>,
}

#[derive(Debug, Deserialize)]
struct RawRedelegation {
    delegator_address: String,
    validator_src_address: String,
    validator_dst_address: String,
}

#[derive(Debug, Deserialize)]
struct RawRedelegationEntryResponse {
    redelegation_entry: RawRedelegationEntry,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct RawRedelegationEntry {
    creation_height: String,
    completion_time: DateTime<Utc>,
    initial_balance: String,
    shares_dst: String,
}

#[derive(Debug, Deserialize)]
struct TotalRewardsResponse {
    #[serde(default)]
    rewards: Vec<RawValidatorReward>,
}

#[derive(Debug, Deserialize)]
struct RawValidatorReward {
    validator_address: String,
    #[serde(default)]
    reward: Vec<RawCoin>,
}

#[derive(Debug, Deserialize)]
struct RewardsResponse {
    #[serde(default)]
    rewards: Vec<RawCoin>,
}

fn parse<T: DeserializeOwned>(what: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| OrchestrationError::MalformedResponse(format!("{}: {}", what, e)))
}

fn number<T: std::str::FromStr>(what: &str, text: &str) -> Result<T> {
    text.parse()
        .map_err(|_| OrchestrationError::MalformedResponse(format!("{}: not an integer: {}", what, text)))
}

/// Integer part of a coin or decimal coin amount
fn coin(raw: RawCoin) -> Result<ChainAmount> {
    let integer = raw.amount.split('.').next().unwrap_or_default();
    Ok(ChainAmount::new(raw.denom, number("coin amount", integer)?))
}

fn account(chain_id: &str, address: String) -> Result<ChainAddress> {
    ChainAddress::new(chain_id, address)
        .map_err(|e| OrchestrationError::MalformedResponse(format!("account address: {}", e)))
}

fn validator(chain_id: &str, address: String) -> Result<ValidatorAddress> {
    ValidatorAddress::new(chain_id, address)
        .map_err(|e| OrchestrationError::MalformedResponse(format!("validator address: {}", e)))
}

pub fn balances(value: Value) -> Result<Vec<ChainAmount>> {
    let response: AllBalancesResponse = parse("balances", value)?;
    response.balances.into_iter().map(coin).collect()
}

/// An absent balance is zero
pub fn balance(value: Value, denom: &str) -> Result<ChainAmount> {
    let response: BalanceResponse = parse("balance", value)?;
    match response.balance {
        Some(raw) => coin(raw),
        None => Ok(ChainAmount::zero(denom)),
    }
}

pub fn denom_trace(value: Value) -> Result<DenomTrace> {
    let response: DenomTraceResponse = parse("denom trace", value)?;
    Ok(DenomTrace {
        path: response.denom_trace.path,
        base_denom: response.denom_trace.base_denom,
    })
}

fn delegation_from(chain_id: &str, raw: RawDelegationResponse) -> Result<Delegation> {
    Ok(Delegation {
        delegator: account(chain_id, raw.delegation.delegator_address)?,
        validator: validator(chain_id, raw.delegation.validator_address)?,
        shares: raw.delegation.shares,
        balance: coin(raw.balance)?,
    })
}

pub fn delegations(chain_id: &str, value: Value) -> Result<Vec<Delegation>> {
    let response: DelegationsResponse = parse("delegations", value)?;
    response
        .delegation_responses
        .into_iter()
        .map(|raw| delegation_from(chain_id, raw))
        .collect()
}

pub fn delegation(chain_id: &str, value: Value) -> Result<Option<Delegation>> {
    let response: DelegationResponse = parse("delegation", value)?;
    response
        .delegation_response
        .map(|raw| delegation_from(chain_id, raw))
        .transpose()
}

fn unbonding_from(chain_id: &str, raw: RawUnbonding) -> Result<UnbondingDelegation> {
    let entries = raw
        .entries
        .into_iter()
        .map(|e| {
            Ok(UnbondingEntry {
                creation_height: number("creation_height", &e.creation_height)?,
                completion_time: e.completion_time,
                initial_balance: number("initial_balance", &e.initial_balance)?,
                balance: number("balance", &e.balance)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(UnbondingDelegation {
        delegator: account(chain_id, raw.delegator_address)?,
        validator: validator(chain_id, raw.validator_address)?,
        entries,
    })
}

pub fn unbonding_delegations(chain_id: &str, value: Value) -> Result<Vec<UnbondingDelegation>> {
    let response: UnbondingsResponse = parse("unbonding delegations", value)?;
    response
        .unbonding_responses
        .into_iter()
        .map(|raw| unbonding_from(chain_id, raw))
        .collect()
}

pub fn unbonding_delegation(chain_id: &str, value: Value) -> Result<Option<UnbondingDelegation>> {
    let response: UnbondingResponse = parse("unbonding delegation", value)?;
    response.unbond.map(|raw| unbonding_from(chain_id, raw)).transpose()
}

pub fn redelegations(chain_id: &str, value: Value) -> Result<Vec<Redelegation>> {
    let response: RedelegationsResponse = parse("redelegations", value)?;
    response
        .redelegation_responses
        .into_iter()
        .map(|raw| {
            let entries = raw
                .entries
                .into_iter()
                .map(|e| {
                    Ok(RedelegationEntry {
                        creation_height: number("creation_height", &e.redelegation_entry.creation_height)?,
                        completion_time: e.redelegation_entry.completion_time,
                        initial_balance: number("initial_balance", &e.redelegation_entry.initial_balance)?,
                        shares_dst: e.redelegation_entry.shares_dst,
                        balance: number("balance", &e.balance)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Redelegation {
                delegator: account(chain_id, raw.redelegation.delegator_address)?,
                src_validator: validator(chain_id, raw.redelegation.validator_src_address)?,
                dst_validator: validator(chain_id, raw.redelegation.validator_dst_address)?,
                entries,
            })
        })
        .collect()
}

pub fn rewards(chain_id: &str, value: Value) -> Result<Vec<ValidatorReward>> {
    let response: TotalRewardsResponse = parse("rewards", value)?;
    response
        .rewards
        .into_iter()
        .map(|raw| {
            Ok(ValidatorReward {
                validator: validator(chain_id, raw.validator_address)?,
                amounts: raw.reward.into_iter().map(coin).collect::<Result<Vec<_>>>()?,
            })
        })
        .collect()
}

pub fn reward(value: Value) -> Result<Vec<ChainAmount>> {
    let response: RewardsResponse = parse("reward", value)?;
    response.rewards.into_iter().map(coin).collect()
}

/// A single `{denom, amount}` coin embedded in a message response
pub fn coin_value(value: &Value) -> Result<ChainAmount> {
    coin(parse("coin", value.clone())?)
}

/// Coins returned by a MsgWithdrawDelegatorReward response
pub fn withdrawn_amounts(value: &Value) -> Result<Vec<ChainAmount>> {
    let coins = value.get("amount").cloned().unwrap_or(Value::Array(vec![]));
    let coins: Vec<RawCoin> = parse("withdrawn rewards", coins)?;
    coins.into_iter().map(coin).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_balance_is_zero() {
        let amount = balance(json!({ "balance": null }), "uatom").unwrap();
        assert_eq!(amount, ChainAmount::zero("uatom"));
    }

    #[test]
    fn test_dec_coin_truncates() {
        let amounts = reward(json!({ "rewards": [{ "denom": "utia", "amount": "12.750000000000000000" }] })).unwrap();
        assert_eq!(amounts, vec![ChainAmount::new("utia", 12)]);
    }

    #[test]
    fn test_unbonding_entries_keep_order() {
        let delegator = ChainAddress::from_bytes("celestia", "celestia", &[1; 20]).unwrap();
        let validator = ValidatorAddress::from_bytes("celestia", "celestiavaloper", &[2; 20]).unwrap();
        let value = json!({
            "unbonding_responses": [{
                "delegator_address": delegator.address(),
                "validator_address": validator.address(),
                "entries": [
                    { "creation_height": "20", "completion_time": "2024-06-02T00:00:00Z", "initial_balance": "5", "balance": "5" },
                    { "creation_height": "10", "completion_time": "2024-06-01T00:00:00Z", "initial_balance": "7", "balance": "7" }
                ]
            }]
        });

        let unbondings = unbonding_delegations("celestia", value).unwrap();
        let heights: Vec<_> = unbondings[0].entries.iter().map(|e| e.creation_height).collect();
        assert_eq!(heights, vec![20, 10]);
        assert_eq!(unbondings[0].total_balance(), 12);
    }

    #[test]
    fn test_malformed_response() {
        let err = balances(json!({ "balances": [{ "denom": "utia", "amount": "lots" }] })).unwrap_err();
        assert!(matches!(err, OrchestrationError::MalformedResponse(_)));
    }
}
