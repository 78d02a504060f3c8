// Forwarding memo codec
//
// The memo sent with the first hop tells each chain on arrival what to do
// next: `forward` re-sends over IBC (packet-forward middleware), `send`
// delivers locally, and `wasm` hands funds to a swap contract.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::{SwapArgs, TransferMsg};
use crate::config::TransferConfig;
use crate::error::{OrchestrationError, Result};

const TRANSFER_PORT: &str = "transfer";

/// Knobs applied to every forwarded hop
#[derive(Debug, Clone)]
pub struct MemoOptions {
    pub default_timeout: Duration,
    pub retries: u8,
    /// Reference time for hops with an absolute deadline
    pub now: DateTime<Utc>,
}

impl MemoOptions {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            default_timeout: config.default_timeout,
            retries: config.forward_retries,
            now: Utc::now(),
        }
    }
}

/// Memo for the first hop of `msg`. Empty when the route ends there.
///
/// `channel(from_chain_id, to_chain_id)` resolves the transfer channel
/// between two chains.
pub fn encode_route_memo<F>(msg: &TransferMsg, options: &MemoOptions, channel: F) -> Result<String>
where
    F: Fn(&str, &str) -> Result<String>,
{
    match continuation(msg, options, &channel)? {
        Some(value) => Ok(value.to_string()),
        None => Ok(String::new()),
    }
}

/// What happens once funds reach `hop`
fn continuation<F>(hop: &TransferMsg, options: &MemoOptions, channel: &F) -> Result<Option<Value>>
where
    F: Fn(&str, &str) -> Result<String>,
{
    let after = match hop.next() {
        Some(next) => Some(step_into(hop.to_account().chain_id(), next, options, channel)?),
        None => None,
    };

    let Some(args) = hop.swap_args() else {
        return Ok(after);
    };
    let swap = serde_json::to_value(args).map_err(|e| OrchestrationError::validation(e.to_string()))?;
    let mut msg = Map::new();
    msg.insert("swap".to_string(), swap);
    if let Some(after) = after {
        msg.insert("on_complete".to_string(), after);
    }
    Ok(Some(json!({
        "wasm": {
            "contract": hop.to_account().address(),
            "msg": msg,
        }
    })))
}

fn step_into<F>(from_chain: &str, next: &TransferMsg, options: &MemoOptions, channel: &F) -> Result<Value>
where
    F: Fn(&str, &str) -> Result<String>,
{
    let receiver = next.to_account();
    let mut body = Map::new();
    body.insert("receiver".to_string(), json!(receiver.address()));

    let action = if receiver.chain_id() == from_chain {
        "send"
    } else {
        body.insert("port".to_string(), json!(TRANSFER_PORT));
        body.insert("channel".to_string(), json!(channel(from_chain, receiver.chain_id())?));
        body.insert("timeout".to_string(), json!(hop_timeout(next, options)?));
        body.insert("retries".to_string(), json!(options.retries));
        "forward"
    };

    if let Some(inner) = continuation(next, options, channel)? {
        body.insert("next".to_string(), inner);
    }
    let mut outer = Map::new();
    outer.insert(action.to_string(), Value::Object(body));
    Ok(Value::Object(outer))
}

/// Relative timeout in humantime form, e.g. `10m`
fn hop_timeout(hop: &TransferMsg, options: &MemoOptions) -> Result<String> {
    let timeout = match hop.timeout() {
        None => options.default_timeout,
        Some(deadline) => (deadline - options.now).to_std().map_err(|_| {
            OrchestrationError::validation(format!(
                "timeout for hop to {} has already passed",
                hop.to_account()
            ))
        })?,
    };
    let whole_seconds = Duration::from_secs(timeout.as_secs().max(1));
    Ok(humantime::format_duration(whole_seconds).to_string())
}

/// Swap parameters carried anywhere along an encoded route
pub fn decode_swap_args(memo: &str) -> Result<Option<SwapArgs>> {
    if memo.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(memo)
        .map_err(|e| OrchestrationError::validation(format!("memo is not JSON: {}", e)))?;

    match find_swap(&value) {
        Some(swap) => serde_json::from_value(swap.clone())
            .map(Some)
            .map_err(|e| OrchestrationError::validation(format!("malformed swap in memo: {}", e))),
        None => Ok(None),
    }
}

fn find_swap(value: &Value) -> Option<&Value> {
    if let Some(swap) = value.pointer("/wasm/msg/swap") {
        return Some(swap);
    }
    ["/forward/next", "/send/next", "/wasm/msg/on_complete"]
        .iter()
        .filter_map(|path| value.pointer(path))
        .find_map(find_swap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{Ratio, SwapRequest, TransferComposer};
    use crate::types::{Brand, ChainAddress, ChainAmount};
    use chrono::TimeZone;

    fn addr(chain_id: &str, prefix: &str, byte: u8) -> ChainAddress {
        ChainAddress::from_bytes(chain_id, prefix, &[byte; 20]).unwrap()
    }

    fn options() -> MemoOptions {
        MemoOptions {
            default_timeout: Duration::from_secs(600),
            retries: 2,
            now: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn channels(from: &str, to: &str) -> Result<String> {
        match (from, to) {
            ("stride-1", "celestia") => Ok("channel-162".to_string()),
            ("osmosis-1", "celestia") => Ok("channel-6994".to_string()),
            _ => Err(OrchestrationError::validation(format!("no channel {} -> {}", from, to))),
        }
    }

    #[test]
    fn test_single_hop_has_no_memo() {
        let msg = TransferMsg::new(addr("celestia", "celestia", 1));
        assert_eq!(encode_route_memo(&msg, &options(), channels).unwrap(), "");
    }

    #[test]
    fn test_forward_memo() {
        let deadline = options().now + chrono::Duration::minutes(5);
        let msg = TransferMsg::new(addr("stride-1", "stride", 1))
            .then(TransferMsg::new(addr("celestia", "celestia", 2)).with_timeout(deadline));

        let memo: Value = serde_json::from_str(&encode_route_memo(&msg, &options(), channels).unwrap()).unwrap();
        assert_eq!(memo["forward"]["channel"], "channel-162");
        assert_eq!(memo["forward"]["port"], "transfer");
        assert_eq!(memo["forward"]["timeout"], "5m");
        assert_eq!(memo["forward"]["retries"], 2);
        assert!(memo["forward"].get("next").is_none());
    }

    #[test]
    fn test_elapsed_deadline_rejected() {
        let deadline = options().now - chrono::Duration::seconds(1);
        let msg = TransferMsg::new(addr("stride-1", "stride", 1))
            .then(TransferMsg::new(addr("celestia", "celestia", 2)).with_timeout(deadline));
        assert!(encode_route_memo(&msg, &options(), channels).is_err());
    }

    #[test]
    fn test_unknown_channel_fails() {
        let msg = TransferMsg::new(addr("celestia", "celestia", 1))
            .then(TransferMsg::new(addr("stride-1", "stride", 2)));
        assert!(encode_route_memo(&msg, &options(), channels).is_err());
    }

    #[test]
    fn test_swap_args_survive_encoding() {
        let composer = TransferComposer::new(&TransferConfig {
            swap_venue: Some(addr("osmosis-1", "osmo", 0xAA)),
            ..TransferConfig::default()
        });
        let msg = composer
            .make_swap(SwapRequest {
                amount_in: Some(ChainAmount::new("uusdc", 2_500)),
                brand_out: Some(Brand::new("TIA")),
                max_slippage: Some(Ratio::percent(3).unwrap()),
                after: Some(addr("celestia", "celestia", 9)),
                ..SwapRequest::default()
            })
            .unwrap();

        let memo = encode_route_memo(&msg, &options(), channels).unwrap();
        let value: Value = serde_json::from_str(&memo).unwrap();
        assert_eq!(value["wasm"]["msg"]["on_complete"]["forward"]["channel"], "channel-6994");

        let decoded = decode_swap_args(&memo).unwrap().unwrap();
        assert_eq!(&decoded, msg.swap_args().unwrap());
    }

    #[test]
    fn test_decode_without_swap() {
        assert_eq!(decode_swap_args("").unwrap(), None);
        assert_eq!(decode_swap_args(r#"{"forward":{"receiver":"x"}}"#).unwrap(), None);
        assert!(decode_swap_args("not json").is_err());
    }
}
