// In-process ledger implementing ChainTransport
// Used by the simulate command and tests; supports fault injection and pausing

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::config::ChainConfig;
use super::{ChainTransport, TransportError, TxAck, TxRequest, WRONG_SEQUENCE_CODE};
use crate::types::{
    type_urls, ChainAddress, DenomTrace, EncodeObject, Proto3JsonMsg, RedelegationEntry, UnbondingEntry,
    ValidatorAddress,
};

const UNBONDING_DAYS: i64 = 21;

const CODE_INSUFFICIENT_FUNDS: u32 = 5;
const CODE_UNKNOWN_REQUEST: u32 = 6;
const CODE_INVALID_REQUEST: u32 = 18;
const CODE_UNKNOWN_ADDRESS: u32 = 9;

/// Injected failure for a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The chain refuses the transaction; nothing is applied
    Reject { code: u32, log: String },
    /// The request fails before reaching the chain
    NotSubmitted(String),
    /// The transaction is applied but the acknowledgment is lost
    AckLost,
    /// The call never returns
    Hang,
}

/// A committed transaction as observed by the chain
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedTx {
    pub sender: String,
    pub sequence: u64,
    pub type_urls: Vec<String>,
    pub memo: String,
    pub height: u64,
}

/// An outbound ICS-20 transfer recorded by the chain
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundTransfer {
    pub sender: String,
    pub receiver: String,
    pub source_channel: String,
    pub denom: String,
    pub amount: u128,
    pub memo: String,
}

struct FaultRule {
    matcher: Box<dyn Fn(&Proto3JsonMsg) -> bool + Send + Sync>,
    fault: Fault,
    remaining: Option<usize>,
}

#[derive(Default)]
struct LedgerAccount {
    balances: BTreeMap<String, u128>,
    sequence: u64,
    closed: bool,
}

#[derive(Default)]
struct LedgerState {
    height: u64,
    accounts: BTreeMap<String, LedgerAccount>,
    /// (delegator, validator) -> bonded amount
    delegations: BTreeMap<(String, String), u128>,
    unbondings: BTreeMap<(String, String), Vec<UnbondingEntry>>,
    /// (delegator, src, dst) -> entries with balance
    redelegations: BTreeMap<(String, String, String), Vec<RedelegationEntry>>,
    /// (delegator, validator) -> denom -> pending reward
    rewards: BTreeMap<(String, String), BTreeMap<String, u128>>,
    /// hash -> trace
    denom_traces: HashMap<String, DenomTrace>,
    submitted: Vec<SubmittedTx>,
    outbound: Vec<OutboundTransfer>,
}

type Failure = (u32, String);

/// A deterministic single-node ledger
pub struct InMemoryChain {
    chain_id: String,
    prefix: String,
    staking_denom: String,
    state: Mutex<LedgerState>,
    faults: Mutex<Vec<FaultRule>>,
    create_faults: Mutex<VecDeque<Fault>>,
    account_creations: AtomicUsize,
    latency: Mutex<Duration>,
    paused: watch::Sender<bool>,
}

impl InMemoryChain {
    pub fn new(chain_id: impl Into<String>, prefix: impl Into<String>) -> Self {
        let (paused, _) = watch::channel(false);
        let prefix = prefix.into();
        Self {
            chain_id: chain_id.into(),
            staking_denom: format!("u{}", prefix),
            prefix,
            state: Mutex::new(LedgerState::default()),
            faults: Mutex::new(Vec::new()),
            create_faults: Mutex::new(VecDeque::new()),
            account_creations: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
            paused,
        }
    }

    /// Ledger matching a configured chain
    pub fn for_chain(config: &ChainConfig) -> Self {
        let chain = Self::new(config.chain_id.clone(), config.address_prefix.clone());
        match &config.staking_denom {
            Some(denom) => chain.with_staking_denom(denom.clone()),
            None => chain,
        }
    }

    /// Denom reported as the balance of delegations; defaults to `u<prefix>`
    pub fn with_staking_denom(mut self, denom: impl Into<String>) -> Self {
        self.staking_denom = denom.into();
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Deterministic validator address `n` on this chain
    pub fn validator(&self, n: u8) -> crate::error::Result<ValidatorAddress> {
        let prefix = format!("{}valoper", self.prefix);
        ValidatorAddress::from_bytes(self.chain_id.clone(), &prefix, &[n; 20])
    }

    /// Deterministic external (not orchestrator-owned) address `n`
    pub fn external_address(&self, n: u8) -> crate::error::Result<ChainAddress> {
        ChainAddress::from_bytes(self.chain_id.clone(), &self.prefix, &[0xE0 ^ n; 20])
    }

    /// Delay applied to every transport call
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    /// Hold submissions until `resume` is called
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn fund(&self, address: &ChainAddress, denom: &str, amount: u128) {
        let mut state = lock(&self.state);
        *state
            .accounts
            .entry(address.address().to_string())
            .or_default()
            .balances
            .entry(denom.to_string())
            .or_default() += amount;
    }

    pub fn seed_delegation(&self, delegator: &ChainAddress, validator: &ValidatorAddress, amount: u128) {
        let mut state = lock(&self.state);
        state.accounts.entry(delegator.address().to_string()).or_default();
        *state
            .delegations
            .entry((delegator.address().to_string(), validator.address().to_string()))
            .or_default() += amount;
    }

    pub fn seed_reward(&self, delegator: &ChainAddress, validator: &ValidatorAddress, denom: &str, amount: u128) {
        let mut state = lock(&self.state);
        *state
            .rewards
            .entry((delegator.address().to_string(), validator.address().to_string()))
            .or_default()
            .entry(denom.to_string())
            .or_default() += amount;
    }

    pub fn register_denom_trace(&self, trace: DenomTrace) {
        let denom = trace.ibc_denom();
        let hash = denom.as_str().trim_start_matches("ibc/").to_string();
        lock(&self.state).denom_traces.insert(hash, trace);
    }

    /// Fail every transaction containing a message that matches
    pub fn fail_when<F>(&self, matcher: F, fault: Fault)
    where
        F: Fn(&Proto3JsonMsg) -> bool + Send + Sync + 'static,
    {
        lock(&self.faults).push(FaultRule { matcher: Box::new(matcher), fault, remaining: None });
    }

    /// Fail only the next transaction containing a matching message
    pub fn fail_once_when<F>(&self, matcher: F, fault: Fault)
    where
        F: Fn(&Proto3JsonMsg) -> bool + Send + Sync + 'static,
    {
        lock(&self.faults).push(FaultRule { matcher: Box::new(matcher), fault, remaining: Some(1) });
    }

    /// Fail the next transaction, whatever it contains
    pub fn fail_next(&self, fault: Fault) {
        self.fail_once_when(|_| true, fault);
    }

    /// Fail the next `create_account` call
    ///
    /// `AckLost` creates the account and then reports a lost connection.
    pub fn fail_next_create(&self, fault: Fault) {
        lock(&self.create_faults).push_back(fault);
    }

    pub fn clear_faults(&self) {
        lock(&self.faults).clear();
        lock(&self.create_faults).clear();
    }

    /// Accounts that exist on the ledger
    pub fn account_count(&self) -> usize {
        lock(&self.state).accounts.len()
    }

    pub fn account_creations(&self) -> usize {
        self.account_creations.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        lock(&self.state).submitted.clone()
    }

    pub fn outbound_transfers(&self) -> Vec<OutboundTransfer> {
        lock(&self.state).outbound.clone()
    }

    pub fn balance(&self, address: &ChainAddress, denom: &str) -> u128 {
        lock(&self.state)
            .accounts
            .get(address.address())
            .and_then(|a| a.balances.get(denom).copied())
            .unwrap_or(0)
    }

    pub fn is_closed(&self, address: &ChainAddress) -> bool {
        lock(&self.state)
            .accounts
            .get(address.address())
            .map(|a| a.closed)
            .unwrap_or(false)
    }

    async fn simulate_network(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    async fn wait_until_resumed(&self) {
        let mut rx = self.paused.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn take_fault(&self, messages: &[Proto3JsonMsg]) -> Option<Fault> {
        let mut faults = lock(&self.faults);
        let index = faults
            .iter()
            .position(|rule| messages.iter().any(|m| (rule.matcher)(m)))?;
        let fault = faults[index].fault.clone();
        if let Some(remaining) = faults[index].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(index);
            }
        }
        Some(fault)
    }

    async fn submit(&self, tx: TxRequest<Proto3JsonMsg>) -> Result<TxAck, TransportError> {
        self.simulate_network().await;
        self.wait_until_resumed().await;

        let fault = self.take_fault(&tx.messages);
        match &fault {
            Some(Fault::Reject { code, log }) => {
                return Err(TransportError::Rejected { code: *code, log: log.clone() });
            }
            Some(Fault::NotSubmitted(reason)) => return Err(TransportError::NotSubmitted(reason.clone())),
            Some(Fault::Hang) => {
                debug!("{}: holding transaction from {} forever", self.chain_id, tx.sender);
                std::future::pending::<()>().await;
            }
            Some(Fault::AckLost) | None => {}
        }

        let ack = self.apply(&tx).map_err(|(code, log)| TransportError::Rejected { code, log })?;
        if fault == Some(Fault::AckLost) {
            return Err(TransportError::ConnectionLost("acknowledgment dropped".to_string()));
        }
        Ok(ack)
    }

    /// Check the sequence, then apply all messages atomically
    fn apply(&self, tx: &TxRequest<Proto3JsonMsg>) -> Result<TxAck, Failure> {
        let mut state = lock(&self.state);
        let sender = tx.sender.address().to_string();

        let account = state
            .accounts
            .get(&sender)
            .ok_or_else(|| (CODE_UNKNOWN_ADDRESS, format!("account {} does not exist", sender)))?;
        if account.closed {
            return Err((CODE_UNKNOWN_ADDRESS, format!("account {} is closed", sender)));
        }
        if account.sequence != tx.sequence {
            return Err((
                WRONG_SEQUENCE_CODE,
                format!("account sequence mismatch, expected {}, got {}", account.sequence, tx.sequence),
            ));
        }

        // Work on a scratch copy so a failing message leaves nothing behind
        let mut scratch = state.snapshot();
        let mut responses = Vec::with_capacity(tx.messages.len());
        let mut failure = None;
        for msg in &tx.messages {
            match scratch.apply_message(&sender, msg) {
                Ok(response) => responses.push(response),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        // The fee-paying ante step consumes the sequence even when execution fails
        if let Some(err) = failure {
            if let Some(account) = state.accounts.get_mut(&sender) {
                account.sequence += 1;
            }
            state.height += 1;
            return Err(err);
        }

        scratch.height += 1;
        if let Some(account) = scratch.accounts.get_mut(&sender) {
            account.sequence += 1;
        }
        let height = scratch.height;
        scratch.submitted.push(SubmittedTx {
            sender: sender.clone(),
            sequence: tx.sequence,
            type_urls: tx.messages.iter().map(|m| m.type_url.clone()).collect(),
            memo: tx.memo.clone(),
            height,
        });
        *state = scratch;

        let hash = Sha256::digest(format!("{}/{}/{}", self.chain_id, sender, tx.sequence).as_bytes());
        Ok(TxAck {
            tx_hash: hex::encode_upper(hash),
            height,
            responses,
        })
    }

    fn answer(&self, query: &Proto3JsonMsg) -> Result<Value, TransportError> {
        let state = lock(&self.state);
        let field = |name: &str| query.field(name).unwrap_or_default().to_string();

        let result = match query.type_url.as_str() {
            type_urls::QUERY_ALL_BALANCES => {
                let balances: Vec<Value> = state
                    .accounts
                    .get(&field("address"))
                    .map(|a| {
                        a.balances
                            .iter()
                            .filter(|(_, v)| **v > 0)
                            .map(|(d, v)| coin(d, *v))
                            .collect()
                    })
                    .unwrap_or_default();
                json!({ "balances": balances, "pagination": { "next_key": null, "total": balances.len().to_string() } })
            }
            type_urls::QUERY_BALANCE => {
                let denom = field("denom");
                let amount = state
                    .accounts
                    .get(&field("address"))
                    .and_then(|a| a.balances.get(&denom).copied())
                    .unwrap_or(0);
                json!({ "balance": coin(&denom, amount) })
            }
            type_urls::QUERY_DENOM_TRACE => {
                let hash = field("hash");
                let hash = hash.trim_start_matches("ibc/");
                let trace = state
                    .denom_traces
                    .get(hash)
                    .ok_or_else(|| TransportError::QueryFailed(format!("denomination trace not found: {}", hash)))?;
                json!({ "denom_trace": { "path": trace.path, "base_denom": trace.base_denom } })
            }
            type_urls::QUERY_DELEGATOR_DELEGATIONS => {
                let delegator = field("delegator_addr");
                let responses: Vec<Value> = state
                    .delegations
                    .iter()
                    .filter(|((d, _), amount)| *d == delegator && **amount > 0)
                    .map(|((d, v), amount)| self.delegation_json(d, v, *amount))
                    .collect();
                json!({ "delegation_responses": responses })
            }
            type_urls::QUERY_DELEGATION => {
                let key = (field("delegator_addr"), field("validator_addr"));
                match state.delegations.get(&key).filter(|a| **a > 0) {
                    Some(amount) => json!({ "delegation_response": self.delegation_json(&key.0, &key.1, *amount) }),
                    None => json!({ "delegation_response": null }),
                }
            }
            type_urls::QUERY_DELEGATOR_UNBONDING_DELEGATIONS => {
                let delegator = field("delegator_addr");
                let responses: Vec<Value> = state
                    .unbondings
                    .iter()
                    .filter(|((d, _), entries)| *d == delegator && !entries.is_empty())
                    .map(|((d, v), entries)| unbonding_json(d, v, entries))
                    .collect();
                json!({ "unbonding_responses": responses })
            }
            type_urls::QUERY_UNBONDING_DELEGATION => {
                let key = (field("delegator_addr"), field("validator_addr"));
                match state.unbondings.get(&key).filter(|e| !e.is_empty()) {
                    Some(entries) => json!({ "unbond": unbonding_json(&key.0, &key.1, entries) }),
                    None => json!({ "unbond": null }),
                }
            }
            type_urls::QUERY_REDELEGATIONS => {
                let delegator = field("delegator_addr");
                let src = query.field("src_validator_addr").map(str::to_string);
                let dst = query.field("dst_validator_addr").map(str::to_string);
                let responses: Vec<Value> = state
                    .redelegations
                    .iter()
                    .filter(|((d, s, t), entries)| {
                        *d == delegator
                            && !entries.is_empty()
                            && src.as_ref().map_or(true, |x| x == s)
                            && dst.as_ref().map_or(true, |x| x == t)
                    })
                    .map(|((d, s, t), entries)| redelegation_json(d, s, t, entries))
                    .collect();
                json!({ "redelegation_responses": responses })
            }
            type_urls::QUERY_DELEGATION_TOTAL_REWARDS => {
                let delegator = field("delegator_address");
                let mut total: BTreeMap<String, u128> = BTreeMap::new();
                let rewards: Vec<Value> = state
                    .rewards
                    .iter()
                    .filter(|((d, _), _)| *d == delegator)
                    .map(|((_, v), amounts)| {
                        for (denom, amount) in amounts {
                            *total.entry(denom.clone()).or_default() += amount;
                        }
                        json!({ "validator_address": v, "reward": dec_coins(amounts) })
                    })
                    .collect();
                json!({ "rewards": rewards, "total": dec_coins(&total) })
            }
            type_urls::QUERY_DELEGATION_REWARDS => {
                let key = (field("delegator_address"), field("validator_address"));
                let empty = BTreeMap::new();
                let amounts = state.rewards.get(&key).unwrap_or(&empty);
                json!({ "rewards": dec_coins(amounts) })
            }
            other => return Err(TransportError::QueryFailed(format!("unsupported query {}", other))),
        };
        Ok(result)
    }

    fn delegation_json(&self, delegator: &str, validator: &str, amount: u128) -> Value {
        json!({
            "delegation": {
                "delegator_address": delegator,
                "validator_address": validator,
                "shares": format!("{}.000000000000000000", amount),
            },
            "balance": coin(self.staking_denom(), amount),
        })
    }

    fn staking_denom(&self) -> &str {
        &self.staking_denom
    }
}

impl LedgerState {
    fn snapshot(&self) -> LedgerState {
        LedgerState {
            height: self.height,
            accounts: self
                .accounts
                .iter()
                .map(|(k, a)| {
                    (k.clone(), LedgerAccount { balances: a.balances.clone(), sequence: a.sequence, closed: a.closed })
                })
                .collect(),
            delegations: self.delegations.clone(),
            unbondings: self.unbondings.clone(),
            redelegations: self.redelegations.clone(),
            rewards: self.rewards.clone(),
            denom_traces: self.denom_traces.clone(),
            submitted: self.submitted.clone(),
            outbound: self.outbound.clone(),
        }
    }

    fn debit(&mut self, address: &str, denom: &str, amount: u128) -> Result<(), Failure> {
        let balance = self
            .accounts
            .get_mut(address)
            .and_then(|a| a.balances.get_mut(denom))
            .filter(|b| **b >= amount)
            .ok_or_else(|| (CODE_INSUFFICIENT_FUNDS, format!("insufficient funds: {}{} on {}", amount, denom, address)))?;
        *balance -= amount;
        Ok(())
    }

    fn credit(&mut self, address: &str, denom: &str, amount: u128) {
        *self
            .accounts
            .entry(address.to_string())
            .or_default()
            .balances
            .entry(denom.to_string())
            .or_default() += amount;
    }

    fn apply_message(&mut self, sender: &str, msg: &Proto3JsonMsg) -> Result<Value, Failure> {
        let completion = Utc::now() + ChronoDuration::days(UNBONDING_DAYS);
        match msg.type_url.as_str() {
            type_urls::MSG_SEND => {
                signer(msg, "from_address", sender)?;
                let to = required(msg, "to_address")?;
                let coins = msg.value.get("amount").and_then(Value::as_array).cloned().unwrap_or_default();
                for c in &coins {
                    let (denom, amount) = parse_coin(c)?;
                    self.debit(sender, &denom, amount)?;
                    self.credit(&to, &denom, amount);
                }
                Ok(json!({}))
            }
            type_urls::MSG_DELEGATE => {
                signer(msg, "delegator_address", sender)?;
                let validator = required(msg, "validator_address")?;
                let (denom, amount) = parse_coin(msg.value.get("amount").unwrap_or(&Value::Null))?;
                self.debit(sender, &denom, amount)?;
                *self.delegations.entry((sender.to_string(), validator)).or_default() += amount;
                Ok(json!({}))
            }
            type_urls::MSG_UNDELEGATE => {
                signer(msg, "delegator_address", sender)?;
                let validator = required(msg, "validator_address")?;
                let (denom, amount) = parse_coin(msg.value.get("amount").unwrap_or(&Value::Null))?;
                let key = (sender.to_string(), validator);
                let bonded = self.delegations.get_mut(&key).filter(|b| **b >= amount).ok_or_else(|| {
                    (CODE_INVALID_REQUEST, format!("invalid shares amount for {}", key.1))
                })?;
                *bonded -= amount;
                if *bonded == 0 {
                    self.delegations.remove(&key);
                }
                self.unbondings.entry(key).or_default().push(UnbondingEntry {
                    creation_height: self.height + 1,
                    completion_time: completion,
                    initial_balance: amount,
                    balance: amount,
                });
                Ok(json!({ "completion_time": completion.to_rfc3339(), "amount": coin(&denom, amount) }))
            }
            type_urls::MSG_BEGIN_REDELEGATE => {
                signer(msg, "delegator_address", sender)?;
                let src = required(msg, "validator_src_address")?;
                let dst = required(msg, "validator_dst_address")?;
                let (_, amount) = parse_coin(msg.value.get("amount").unwrap_or(&Value::Null))?;
                let src_key = (sender.to_string(), src.clone());
                let bonded = self.delegations.get_mut(&src_key).filter(|b| **b >= amount).ok_or_else(|| {
                    (CODE_INVALID_REQUEST, format!("invalid shares amount for {}", src))
                })?;
                *bonded -= amount;
                if *bonded == 0 {
                    self.delegations.remove(&src_key);
                }
                *self.delegations.entry((sender.to_string(), dst.clone())).or_default() += amount;
                self.redelegations
                    .entry((sender.to_string(), src, dst))
                    .or_default()
                    .push(RedelegationEntry {
                        creation_height: self.height + 1,
                        completion_time: completion,
                        initial_balance: amount,
                        shares_dst: format!("{}.000000000000000000", amount),
                        balance: amount,
                    });
                Ok(json!({ "completion_time": completion.to_rfc3339() }))
            }
            type_urls::MSG_WITHDRAW_DELEGATOR_REWARD => {
                signer(msg, "delegator_address", sender)?;
                let validator = required(msg, "validator_address")?;
                let rewards = self.rewards.remove(&(sender.to_string(), validator)).unwrap_or_default();
                for (denom, amount) in &rewards {
                    self.credit(sender, denom, *amount);
                }
                let coins: Vec<Value> = rewards.iter().map(|(d, a)| coin(d, *a)).collect();
                Ok(json!({ "amount": coins }))
            }
            type_urls::MSG_TRANSFER => {
                signer(msg, "sender", sender)?;
                let receiver = required(msg, "receiver")?;
                let channel = required(msg, "source_channel")?;
                let (denom, amount) = parse_coin(msg.value.get("token").unwrap_or(&Value::Null))?;
                self.debit(sender, &denom, amount)?;
                self.outbound.push(OutboundTransfer {
                    sender: sender.to_string(),
                    receiver,
                    source_channel: channel,
                    denom,
                    amount,
                    memo: msg.field("memo").unwrap_or_default().to_string(),
                });
                Ok(json!({ "sequence": self.outbound.len().to_string() }))
            }
            type_urls::MSG_LIQUID_STAKE => {
                signer(msg, "creator", sender)?;
                let host_denom = required(msg, "host_denom")?;
                let amount: u128 = required(msg, "amount")?
                    .parse()
                    .map_err(|_| (CODE_INVALID_REQUEST, "invalid liquid stake amount".to_string()))?;
                // The staked asset is held as an IBC voucher of the host denom
                let voucher = self
                    .denom_traces
                    .values()
                    .find(|t| t.base_denom == host_denom)
                    .map(|t| t.ibc_denom().to_string())
                    .unwrap_or_else(|| host_denom.clone());
                self.debit(sender, &voucher, amount)?;
                let st_denom = format!("st{}", host_denom);
                self.credit(sender, &st_denom, amount);
                Ok(json!({ "st_token": coin(&st_denom, amount) }))
            }
            other => Err((CODE_UNKNOWN_REQUEST, format!("unrecognized message type: {}", other))),
        }
    }
}

#[async_trait]
impl ChainTransport for InMemoryChain {
    async fn create_account(&self, label: &str) -> Result<ChainAddress, TransportError> {
        self.simulate_network().await;

        let fault = lock(&self.create_faults).pop_front();
        match &fault {
            Some(Fault::Reject { code, log }) => {
                return Err(TransportError::Rejected { code: *code, log: log.clone() });
            }
            Some(Fault::NotSubmitted(reason)) => return Err(TransportError::NotSubmitted(reason.clone())),
            Some(Fault::Hang) => {
                debug!("{}: holding account creation for {} forever", self.chain_id, label);
                std::future::pending::<()>().await;
            }
            Some(Fault::AckLost) | None => {}
        }

        let n = self.account_creations.fetch_add(1, Ordering::SeqCst);

        let digest = Sha256::digest(format!("{}/{}/{}", self.chain_id, label, n).as_bytes());
        let address = ChainAddress::from_bytes(self.chain_id.clone(), &self.prefix, &digest[..20])
            .map_err(|e| TransportError::NotSubmitted(e.to_string()))?;
        lock(&self.state)
            .accounts
            .entry(address.address().to_string())
            .or_default();
        debug!("{}: created account {} for {}", self.chain_id, address.address(), label);
        if fault == Some(Fault::AckLost) {
            return Err(TransportError::ConnectionLost(format!("reply for {} dropped", label)));
        }
        Ok(address)
    }

    async fn account_sequence(&self, address: &ChainAddress) -> Result<u64, TransportError> {
        self.simulate_network().await;
        lock(&self.state)
            .accounts
            .get(address.address())
            .map(|a| a.sequence)
            .ok_or_else(|| TransportError::QueryFailed(format!("account {} not found", address.address())))
    }

    async fn execute_tx(&self, tx: TxRequest<Proto3JsonMsg>) -> Result<TxAck, TransportError> {
        self.submit(tx).await
    }

    async fn execute_encoded_tx(&self, tx: TxRequest<EncodeObject>) -> Result<TxAck, TransportError> {
        // Encoded bodies are expected to hold the JSON form of the message
        let messages = tx
            .messages
            .iter()
            .map(|m| {
                serde_json::from_slice(&m.value)
                    .map(|value| Proto3JsonMsg::new(m.type_url.clone(), value))
                    .map_err(|e| TransportError::Rejected {
                        code: CODE_INVALID_REQUEST,
                        log: format!("cannot decode {}: {}", m.type_url, e),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.submit(TxRequest {
            sender: tx.sender,
            sequence: tx.sequence,
            messages,
            memo: tx.memo,
        })
        .await
    }

    async fn query(&self, queries: &[Proto3JsonMsg]) -> Result<Vec<Value>, TransportError> {
        self.simulate_network().await;
        queries.iter().map(|q| self.answer(q)).collect()
    }

    async fn close_account(&self, address: &ChainAddress) -> Result<(), TransportError> {
        self.simulate_network().await;
        self.wait_until_resumed().await;
        let mut state = lock(&self.state);
        let account = state
            .accounts
            .get_mut(address.address())
            .ok_or_else(|| TransportError::Rejected {
                code: CODE_UNKNOWN_ADDRESS,
                log: format!("account {} does not exist", address.address()),
            })?;
        account.closed = true;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn coin(denom: &str, amount: u128) -> Value {
    json!({ "denom": denom, "amount": amount.to_string() })
}

fn dec_coins(amounts: &BTreeMap<String, u128>) -> Vec<Value> {
    amounts
        .iter()
        .map(|(d, a)| json!({ "denom": d, "amount": format!("{}.000000000000000000", a) }))
        .collect()
}

fn unbonding_json(delegator: &str, validator: &str, entries: &[UnbondingEntry]) -> Value {
    let entries: Vec<Value> = entries
        .iter()
        .map(|e| {
            json!({
                "creation_height": e.creation_height.to_string(),
                "completion_time": e.completion_time.to_rfc3339(),
                "initial_balance": e.initial_balance.to_string(),
                "balance": e.balance.to_string(),
            })
        })
        .collect();
    json!({ "delegator_address": delegator, "validator_address": validator, "entries": entries })
}

fn redelegation_json(delegator: &str, src: &str, dst: &str, entries: &[RedelegationEntry]) -> Value {
    let entries: Vec<Value> = entries
        .iter()
        .map(|e| {
            json!({
                "redelegation_entry": {
                    "creation_height": e.creation_height.to_string(),
                    "completion_time": e.completion_time.to_rfc3339(),
                    "initial_balance": e.initial_balance.to_string(),
                    "shares_dst": e.shares_dst,
                },
                "balance": e.balance.to_string(),
            })
        })
        .collect();
    json!({
        "redelegation": {
            "delegator_address": delegator,
            "validator_src_address": src,
            "validator_dst_address": dst,
        },
        "entries": entries,
    })
}

fn required(msg: &Proto3JsonMsg, name: &str) -> Result<String, Failure> {
    msg.field(name)
        .map(str::to_string)
        .ok_or_else(|| (CODE_INVALID_REQUEST, format!("{} missing {}", msg.type_url, name)))
}

fn signer(msg: &Proto3JsonMsg, name: &str, sender: &str) -> Result<(), Failure> {
    let declared = required(msg, name)?;
    if declared != sender {
        return Err((CODE_INVALID_REQUEST, format!("{} {} is not the transaction signer", name, declared)));
    }
    Ok(())
}

fn parse_coin(value: &Value) -> Result<(String, u128), Failure> {
    let denom = value.get("denom").and_then(Value::as_str);
    let amount = value.get("amount").and_then(Value::as_str).and_then(|a| a.parse().ok());
    match (denom, amount) {
        (Some(d), Some(a)) if !d.is_empty() => Ok((d.to_string(), a)),
        _ => Err((CODE_INVALID_REQUEST, format!("invalid coin {}", value))),
    }
}
