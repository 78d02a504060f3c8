// Query client bound to one chain
// Results may be served from a short-lived cache when configured

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::chains::Chain;
use crate::error::{OrchestrationError, Result};
use crate::types::{type_urls, ChainAddress, Proto3JsonMsg, ValidatorAddress};

pub mod projection;

/// Runs queries for one account, optionally caching results
pub struct QueryClient {
    chain: Arc<Chain>,
    staleness: Option<Duration>,
    cache: Mutex<HashMap<String, (Instant, Value)>>,
}

impl QueryClient {
    pub fn new(chain: Arc<Chain>, staleness: Option<Duration>) -> Self {
        Self {
            chain,
            staleness,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain_id(&self) -> &str {
        self.chain.chain_id()
    }

    /// Run a single query
    pub async fn query(&self, request: Proto3JsonMsg) -> Result<Value> {
        let key = serde_json::to_string(&request)
            .map_err(|e| OrchestrationError::validation(format!("unserializable query: {}", e)))?;

        if let Some(staleness) = self.staleness {
            if let Some((at, value)) = self.entries().get(&key) {
                if at.elapsed() <= staleness {
                    debug!("Serving {} from cache", request.type_url);
                    return Ok(value.clone());
                }
            }
        }

        let value = self
            .chain
            .query(std::slice::from_ref(&request))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrchestrationError::MalformedResponse(format!("no result for {}", request.type_url)))?;

        if self.staleness.is_some() {
            self.entries().insert(key, (Instant::now(), value.clone()));
        }
        Ok(value)
    }

    /// Drop every cached result; called after each state change on the account
    pub fn invalidate(&self) {
        let mut entries = self.entries();
        if !entries.is_empty() {
            debug!("Invalidating {} cached query results", entries.len());
            entries.clear();
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (Instant, Value)>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Request builders
pub mod requests {
    use super::*;

    pub fn all_balances(address: &ChainAddress) -> Proto3JsonMsg {
        Proto3JsonMsg::new(type_urls::QUERY_ALL_BALANCES, json!({ "address": address.address() }))
    }

    pub fn balance(address: &ChainAddress, denom: &str) -> Proto3JsonMsg {
        Proto3JsonMsg::new(
            type_urls::QUERY_BALANCE,
            json!({ "address": address.address(), "denom": denom }),
        )
    }

    pub fn denom_trace(hash: &str) -> Proto3JsonMsg {
        Proto3JsonMsg::new(type_urls::QUERY_DENOM_TRACE, json!({ "hash": hash }))
    }

    pub fn delegator_delegations(delegator: &ChainAddress) -> Proto3JsonMsg {
        Proto3JsonMsg::new(
            type_urls::QUERY_DELEGATOR_DELEGATIONS,
            json!({ "delegator_addr": delegator.address() }),
        )
    }

    pub fn delegation(delegator: &ChainAddress, validator: &ValidatorAddress) -> Proto3JsonMsg {
        Proto3JsonMsg::new(
            type_urls::QUERY_DELEGATION,
            json!({ "delegator_addr": delegator.address(), "validator_addr": validator.address() }),
        )
    }

    pub fn unbonding_delegations(delegator: &ChainAddress) -> Proto3JsonMsg {
        Proto3JsonMsg::new(
            type_urls::QUERY_DELEGATOR_UNBONDING_DELEGATIONS,
            json!({ "delegator_addr": delegator.address() }),
        )
    }

    pub fn unbonding_delegation(delegator: &ChainAddress, validator: &ValidatorAddress) -> Proto3JsonMsg {
        Proto3JsonMsg::new(
            type_urls::QUERY_UNBONDING_DELEGATION,
            json!({ "delegator_addr": delegator.address(), "validator_addr": validator.address() }),
        )
    }

    pub fn redelegations(
        delegator: &ChainAddress,
        src: Option<&ValidatorAddress>,
        dst: Option<&ValidatorAddress>,
    ) -> Proto3JsonMsg {
        let mut body = json!({ "delegator_addr": delegator.address() });
        if let Some(src) = src {
            body["src_validator_addr"] = json!(src.address());
        }
        if let Some(dst) = dst {
            body["dst_validator_addr"] = json!(dst.address());
        }
        Proto3JsonMsg::new(type_urls::QUERY_REDELEGATIONS, body)
    }

    pub fn total_rewards(delegator: &ChainAddress) -> Proto3JsonMsg {
        Proto3JsonMsg::new(
            type_urls::QUERY_DELEGATION_TOTAL_REWARDS,
            json!({ "delegator_address": delegator.address() }),
        )
    }

    pub fn rewards(delegator: &ChainAddress, validator: &ValidatorAddress) -> Proto3JsonMsg {
        Proto3JsonMsg::new(
            type_urls::QUERY_DELEGATION_REWARDS,
            json!({ "delegator_address": delegator.address(), "validator_address": validator.address() }),
        )
    }
}
