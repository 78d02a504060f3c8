// Proto3 JSON message builders for account operations

use serde_json::{json, Value};

use crate::types::{type_urls, ChainAddress, ChainAmount, Proto3JsonMsg, ValidatorAddress};

pub fn send(from: &ChainAddress, to: &ChainAddress, amounts: &[ChainAmount]) -> Proto3JsonMsg {
    let coins: Vec<Value> = amounts.iter().map(ChainAmount::to_coin_json).collect();
    Proto3JsonMsg::new(
        type_urls::MSG_SEND,
        json!({
            "from_address": from.address(),
            "to_address": to.address(),
            "amount": coins,
        }),
    )
}

pub fn delegate(delegator: &ChainAddress, validator: &ValidatorAddress, amount: &ChainAmount) -> Proto3JsonMsg {
    Proto3JsonMsg::new(
        type_urls::MSG_DELEGATE,
        json!({
            "delegator_address": delegator.address(),
            "validator_address": validator.address(),
            "amount": amount.to_coin_json(),
        }),
    )
}

pub fn undelegate(delegator: &ChainAddress, validator: &ValidatorAddress, amount: &ChainAmount) -> Proto3JsonMsg {
    Proto3JsonMsg::new(
        type_urls::MSG_UNDELEGATE,
        json!({
            "delegator_address": delegator.address(),
            "validator_address": validator.address(),
            "amount": amount.to_coin_json(),
        }),
    )
}

pub fn begin_redelegate(
    delegator: &ChainAddress,
    src: &ValidatorAddress,
    dst: &ValidatorAddress,
    amount: &ChainAmount,
) -> Proto3JsonMsg {
    Proto3JsonMsg::new(
        type_urls::MSG_BEGIN_REDELEGATE,
        json!({
            "delegator_address": delegator.address(),
            "validator_src_address": src.address(),
            "validator_dst_address": dst.address(),
            "amount": amount.to_coin_json(),
        }),
    )
}

pub fn withdraw_reward(delegator: &ChainAddress, validator: &ValidatorAddress) -> Proto3JsonMsg {
    Proto3JsonMsg::new(
        type_urls::MSG_WITHDRAW_DELEGATOR_REWARD,
        json!({
            "delegator_address": delegator.address(),
            "validator_address": validator.address(),
        }),
    )
}

/// ICS-20 transfer; `timeout_timestamp` is in nanoseconds since the epoch
pub fn transfer(
    sender: &ChainAddress,
    receiver: &ChainAddress,
    source_channel: &str,
    token: &ChainAmount,
    timeout_timestamp: u64,
    memo: &str,
) -> Proto3JsonMsg {
    Proto3JsonMsg::new(
        type_urls::MSG_TRANSFER,
        json!({
            "source_port": "transfer",
            "source_channel": source_channel,
            "token": token.to_coin_json(),
            "sender": sender.address(),
            "receiver": receiver.address(),
            "timeout_height": { "revision_number": "0", "revision_height": "0" },
            "timeout_timestamp": timeout_timestamp.to_string(),
            "memo": memo,
        }),
    )
}

pub fn liquid_stake(creator: &ChainAddress, amount: u128, host_denom: &str) -> Proto3JsonMsg {
    Proto3JsonMsg::new(
        type_urls::MSG_LIQUID_STAKE,
        json!({
            "creator": creator.address(),
            "amount": amount.to_string(),
            "host_denom": host_denom,
        }),
    )
}
