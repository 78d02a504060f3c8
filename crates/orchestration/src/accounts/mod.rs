// Accounts: one handle per (chain, pet-name)
// All writes go through the account's executor; queries go straight to the chain

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub mod directory;
pub mod executor;
pub mod messages;

pub use directory::AccountDirectory;
pub use executor::{AccountState, Executor, Operation, OperationOutput, OperationTicket};

use crate::chains::{Chain, ChainRegistry, TxAck};
use crate::config::TransferConfig;
use crate::error::{OrchestrationError, Result};
use crate::query::{projection, requests, QueryClient};
use crate::store::AccountStore;
use crate::transfer::{encode_route_memo, MemoOptions, Settlement, TransferComposer, TransferMsg, TransferReceipt};
use crate::types::{
    merge_amounts, ChainAddress, ChainAmount, Delegation, Denom, DenomArg, DenomResolver, DenomTrace,
    EncodeObject, Proto3JsonMsg, Redelegation, UnbondingDelegation, ValidatorAddress, ValidatorReward,
};

/// Identity of an account within the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey {
    /// Logical chain name
    pub chain: String,
    pub pet_name: String,
}

impl AccountKey {
    pub fn new(chain: impl Into<String>, pet_name: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            pet_name: pet_name.into(),
        }
    }
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.chain, self.pet_name)
    }
}

/// Outcome of one item in a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEntryOutcome {
    Succeeded(TxAck),
    Failed(String),
    Ambiguous(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// What the entry acted on, e.g. a validator address
    pub target: String,
    pub outcome: BatchEntryOutcome,
}

/// Per-entry outcomes of a batch, in submission order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, BatchEntryOutcome::Succeeded(_)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, BatchEntryOutcome::Failed(_)))
    }

    pub fn ambiguous(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, BatchEntryOutcome::Ambiguous(_)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded().count() == self.entries.len()
    }

    pub fn entry(&self, target: &str) -> Option<&BatchEntry> {
        self.entries.iter().find(|e| e.target == target)
    }
}

fn entry_outcome(result: Result<TxAck>) -> BatchEntryOutcome {
    match result {
        Ok(ack) => BatchEntryOutcome::Succeeded(ack),
        Err(OrchestrationError::AmbiguousOutcome { reason, .. }) => BatchEntryOutcome::Ambiguous(reason),
        Err(e) => BatchEntryOutcome::Failed(e.to_string()),
    }
}

/// Shared collaborators handed to every account
pub(crate) struct AccountContext {
    pub registry: Arc<ChainRegistry>,
    pub denoms: Arc<DenomResolver>,
    pub store: Arc<dyn AccountStore>,
    pub transfer: TransferConfig,
    pub composer: TransferComposer,
}

/// A remote account owned by this process
pub struct Account {
    key: AccountKey,
    executor: Executor,
    queries: QueryClient,
    context: Arc<AccountContext>,
}

impl Account {
    pub(crate) fn new(key: AccountKey, executor: Executor, queries: QueryClient, context: Arc<AccountContext>) -> Self {
        Self {
            key,
            executor,
            queries,
            context,
        }
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn address(&self) -> &ChainAddress {
        self.executor.address()
    }

    pub fn chain(&self) -> &Arc<Chain> {
        self.executor.chain()
    }

    pub fn state(&self) -> AccountState {
        self.executor.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() != AccountState::Open
    }

    /// Low-level access to the operation queue
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    fn chain_id(&self) -> &str {
        self.address().chain_id()
    }

    // Queries

    pub async fn get_balances(&self) -> Result<Vec<ChainAmount>> {
        let value = self.queries.query(requests::all_balances(self.address())).await?;
        projection::balances(value)
    }

    /// Balance of one denom; zero when the account holds none
    pub async fn get_balance(&self, denom: impl Into<DenomArg>) -> Result<ChainAmount> {
        let denom = self.context.denoms.resolve(&denom.into(), self.chain_id())?;
        let value = self.queries.query(requests::balance(self.address(), denom.as_str())).await?;
        projection::balance(value, denom.as_str())
    }

    /// Trace of an IBC voucher held on this chain
    pub async fn get_denom_trace(&self, denom: &Denom) -> Result<DenomTrace> {
        let hash = denom
            .as_str()
            .strip_prefix("ibc/")
            .ok_or_else(|| OrchestrationError::validation(format!("{} is not an IBC voucher", denom)))?;
        let value = self.queries.query(requests::denom_trace(hash)).await?;
        let trace = projection::denom_trace(value)?;
        if &trace.ibc_denom() != denom {
            return Err(OrchestrationError::MalformedResponse(format!(
                "trace {} does not hash to {}",
                trace.full_path(),
                denom
            )));
        }
        Ok(trace)
    }

    pub async fn get_delegations(&self) -> Result<Vec<Delegation>> {
        let value = self.queries.query(requests::delegator_delegations(self.address())).await?;
        projection::delegations(self.chain_id(), value)
    }

    pub async fn get_delegation(&self, validator: &ValidatorAddress) -> Result<Option<Delegation>> {
        let value = self.queries.query(requests::delegation(self.address(), validator)).await?;
        projection::delegation(self.chain_id(), value)
    }

    pub async fn get_unbonding_delegations(&self) -> Result<Vec<UnbondingDelegation>> {
        let value = self.queries.query(requests::unbonding_delegations(self.address())).await?;
        projection::unbonding_delegations(self.chain_id(), value)
    }

    pub async fn get_unbonding_delegation(&self, validator: &ValidatorAddress) -> Result<Option<UnbondingDelegation>> {
        let value = self
            .queries
            .query(requests::unbonding_delegation(self.address(), validator))
            .await?;
        projection::unbonding_delegation(self.chain_id(), value)
    }

    pub async fn get_redelegations(&self) -> Result<Vec<Redelegation>> {
        let value = self.queries.query(requests::redelegations(self.address(), None, None)).await?;
        projection::redelegations(self.chain_id(), value)
    }

    pub async fn get_redelegation(
        &self,
        src: &ValidatorAddress,
        dst: &ValidatorAddress,
    ) -> Result<Option<Redelegation>> {
        let value = self
            .queries
            .query(requests::redelegations(self.address(), Some(src), Some(dst)))
            .await?;
        Ok(projection::redelegations(self.chain_id(), value)?.into_iter().next())
    }

    pub async fn get_rewards(&self) -> Result<Vec<ValidatorReward>> {
        let value = self.queries.query(requests::total_rewards(self.address())).await?;
        projection::rewards(self.chain_id(), value)
    }

    pub async fn get_reward(&self, validator: &ValidatorAddress) -> Result<Vec<ChainAmount>> {
        let value = self.queries.query(requests::rewards(self.address(), validator)).await?;
        projection::reward(value)
    }

    // Writes

    /// Submit proto3-JSON messages as one transaction
    pub async fn execute_tx(&self, messages: Vec<Proto3JsonMsg>, memo: &str) -> Result<TxAck> {
        self.run(Operation::Execute {
            label: "execute_tx".to_string(),
            messages,
            memo: memo.to_string(),
        })
        .await
    }

    /// Submit caller-encoded messages as one transaction
    pub async fn execute_encoded_tx(&self, messages: Vec<EncodeObject>, memo: &str) -> Result<TxAck> {
        self.run(Operation::ExecuteEncoded {
            label: "execute_encoded_tx".to_string(),
            messages,
            memo: memo.to_string(),
        })
        .await
    }

    /// Bank send to another account on the same chain
    pub async fn send(&self, to: &ChainAddress, amount: ChainAmount) -> Result<TxAck> {
        if to.chain_id() != self.chain_id() {
            return Err(OrchestrationError::validation(format!(
                "send stays on {}; use transfer to reach {}",
                self.chain_id(),
                to.chain_id()
            )));
        }
        self.check_positive(&amount)?;
        info!("{} sending {} to {}", self.key, amount, to);
        let msg = messages::send(self.address(), to, std::slice::from_ref(&amount));
        self.run(Operation::execute("send", vec![msg])).await
    }

    pub async fn delegate(&self, validator: &ValidatorAddress, amount: ChainAmount) -> Result<TxAck> {
        self.check_validator(validator)?;
        self.check_staking_amount(&amount)?;
        info!("{} delegating {} to {}", self.key, amount, validator);
        let msg = messages::delegate(self.address(), validator, &amount);
        self.run(Operation::execute("delegate", vec![msg])).await
    }

    pub async fn undelegate(&self, validator: &ValidatorAddress, amount: ChainAmount) -> Result<TxAck> {
        self.check_validator(validator)?;
        self.check_staking_amount(&amount)?;
        info!("{} undelegating {} from {}", self.key, amount, validator);
        let msg = messages::undelegate(self.address(), validator, &amount);
        self.run(Operation::execute("undelegate", vec![msg])).await
    }

    pub async fn redelegate(
        &self,
        src: &ValidatorAddress,
        dst: &ValidatorAddress,
        amount: ChainAmount,
    ) -> Result<TxAck> {
        self.check_validator(src)?;
        self.check_validator(dst)?;
        if src == dst {
            return Err(OrchestrationError::validation("cannot redelegate to the same validator"));
        }
        self.check_staking_amount(&amount)?;
        info!("{} redelegating {} from {} to {}", self.key, amount, src, dst);
        let msg = messages::begin_redelegate(self.address(), src, dst, &amount);
        self.run(Operation::execute("redelegate", vec![msg])).await
    }

    /// Fully undelegate each of `delegations`
    ///
    /// Every entry either succeeds or is reported with its reason; any
    /// non-success yields `PartialBatchFailure` carrying the whole report.
    pub async fn undelegate_all(&self, delegations: &[Delegation]) -> Result<BatchReport> {
        let mut items = Vec::with_capacity(delegations.len());
        for delegation in delegations {
            if &delegation.delegator != self.address() {
                return Err(OrchestrationError::validation(format!(
                    "delegation belongs to {}, not {}",
                    delegation.delegator,
                    self.address()
                )));
            }
            self.check_validator(&delegation.validator)?;
            self.check_positive(&delegation.balance)?;
            items.push((
                delegation.validator.address().to_string(),
                messages::undelegate(self.address(), &delegation.validator, &delegation.balance),
            ));
        }
        info!("{} undelegating from {} validators", self.key, items.len());
        self.run_batch("undelegate", items).await
    }

    /// Withdraw rewards from every validator that owes any
    pub async fn withdraw_rewards(&self) -> Result<Vec<ChainAmount>> {
        let items: Vec<_> = self
            .get_rewards()
            .await?
            .into_iter()
            .filter(|r| r.amounts.iter().any(|a| !a.is_zero()))
            .map(|r| {
                let msg = messages::withdraw_reward(self.address(), &r.validator);
                (r.validator.address().to_string(), msg)
            })
            .collect();

        let report = self.run_batch("withdraw_reward", items).await?;
        let mut withdrawn = Vec::new();
        for entry in report.succeeded() {
            if let BatchEntryOutcome::Succeeded(ack) = &entry.outcome {
                withdrawn.extend(withdrawn_from(ack)?);
            }
        }
        merge_amounts(withdrawn)
    }

    pub async fn withdraw_reward(&self, validator: &ValidatorAddress) -> Result<Vec<ChainAmount>> {
        self.check_validator(validator)?;
        let msg = messages::withdraw_reward(self.address(), validator);
        let ack = self.run(Operation::execute("withdraw_reward", vec![msg])).await?;
        merge_amounts(withdrawn_from(&ack)?)
    }

    /// Move `amount` to `destination`, over IBC when it lives on another chain
    pub async fn transfer(&self, amount: ChainAmount, destination: &ChainAddress, memo: Option<&str>) -> Result<TxAck> {
        if destination.chain_id() == self.chain_id() {
            return self.send(destination, amount).await;
        }
        self.check_positive(&amount)?;
        let channel = self.channel_to(destination.chain_id())?;
        let timeout = self.default_deadline_nanos()?;
        info!("{} transferring {} to {} over {}", self.key, amount, destination, channel);

        let msg = messages::transfer(self.address(), destination, &channel, &amount, timeout, memo.unwrap_or_default());
        self.run(Operation::execute("transfer", vec![msg])).await
    }

    /// Send `amount` along a multi-hop route
    ///
    /// Resolves once the first hop is acknowledged; the remaining hops are
    /// carried in the memo and executed by the forwarding middleware.
    pub async fn transfer_steps(&self, amount: ChainAmount, msg: &TransferMsg) -> Result<TransferReceipt> {
        self.context.composer.validate(msg)?;
        self.check_positive(&amount)?;

        let first_hop = msg.to_account().clone();
        if first_hop.chain_id() == self.chain_id() {
            return Err(OrchestrationError::validation(format!(
                "first hop {} must leave {}",
                first_hop,
                self.chain_id()
            )));
        }
        let source_channel = self.channel_to(first_hop.chain_id())?;

        // Resolve every channel before anything is submitted
        let mut channels = HashMap::new();
        for (from, to) in msg.hops().zip(msg.hops().skip(1)) {
            let (from, to) = (from.to_account().chain_id(), to.to_account().chain_id());
            if from != to {
                let chain = self.context.registry.find_by_chain_id(from).await?;
                let channel = chain.chain_info().transfer_channel(to).ok_or_else(|| {
                    OrchestrationError::validation(format!("no open transfer channel from {} to {}", from, to))
                })?;
                channels.insert((from.to_string(), to.to_string()), channel.to_string());
            }
        }

        let options = MemoOptions::from_config(&self.context.transfer);
        let memo = encode_route_memo(msg, &options, |from, to| {
            channels
                .get(&(from.to_string(), to.to_string()))
                .cloned()
                .ok_or_else(|| OrchestrationError::validation(format!("no channel from {} to {}", from, to)))
        })?;

        let timeout = match msg.timeout() {
            Some(deadline) => deadline_nanos(deadline)?,
            None => self.default_deadline_nanos()?,
        };
        info!(
            "{} sending {} along a {}-hop route starting at {}",
            self.key,
            amount,
            msg.hop_count(),
            first_hop
        );
        let transfer = messages::transfer(self.address(), &first_hop, &source_channel, &amount, timeout, &memo);
        let ack = self.run(Operation::execute("transfer_steps", vec![transfer])).await?;

        Ok(TransferReceipt {
            ack,
            first_hop,
            remaining_hops: msg.links(),
            settlement: Settlement::FirstHop,
            memo,
        })
    }

    /// Liquid stake an IBC voucher on a liquid-staking host chain
    ///
    /// Returns the stToken amount the chain reported. An acknowledgment
    /// without one is `MalformedResponse`; the transaction itself committed,
    /// so reconcile through `get_balance`.
    pub async fn liquid_stake(&self, amount: ChainAmount) -> Result<ChainAmount> {
        let host = self.chain().chain_info().liquid_staking.as_ref().ok_or_else(|| {
            OrchestrationError::validation(format!("{} does not host liquid staking", self.chain().name()))
        })?;
        self.check_positive(&amount)?;

        let host_denom = self.context.denoms.base_denom(&amount.denom);
        if !host.host_denoms.iter().any(|d| d == host_denom.as_str()) {
            return Err(OrchestrationError::validation(format!(
                "{} cannot be liquid staked on {}",
                host_denom,
                self.chain().name()
            )));
        }

        info!("{} liquid staking {} ({})", self.key, amount, host_denom);
        let msg = messages::liquid_stake(self.address(), amount.value, host_denom.as_str());
        let ack = self.run(Operation::execute("liquid_stake", vec![msg])).await?;
        let coin = ack.responses.first().and_then(|r| r.get("st_token")).ok_or_else(|| {
            OrchestrationError::MalformedResponse(format!(
                "liquid stake {} acknowledged without an st_token amount",
                ack.tx_hash
            ))
        })?;
        projection::coin_value(coin)
    }

    /// Close the account once everything already queued has run
    pub async fn close(&self) -> Result<()> {
        let ticket = self.executor.close().await?;
        let result = ticket.wait().await;
        self.queries.invalidate();

        match result {
            Ok(_) => {
                self.context.store.mark_closed(&self.key.chain, &self.key.pet_name).await?;
                info!("Account {} closed", self.key);
                Ok(())
            }
            Err(err @ OrchestrationError::AmbiguousOutcome { .. }) => {
                // Stays closed locally; reconcile against the chain before reuse
                if let Err(e) = self.context.store.mark_closed(&self.key.chain, &self.key.pet_name).await {
                    warn!("Failed to record close of {}: {}", self.key, e);
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn run(&self, operation: Operation) -> Result<TxAck> {
        let ticket = self.executor.submit(operation)?;
        let result = ticket.wait().await;
        self.queries.invalidate();
        result?.into_ack()
    }

    async fn run_batch(&self, label: &str, items: Vec<(String, Proto3JsonMsg)>) -> Result<BatchReport> {
        if items.is_empty() {
            return Ok(BatchReport::default());
        }

        let entries = if self.chain().chain_info().batch_messages {
            let (targets, msgs): (Vec<String>, Vec<Proto3JsonMsg>) = items.into_iter().unzip();
            let result = self.run(Operation::execute(label, msgs)).await;
            // One transaction: its outcome applies to every entry
            let outcome = entry_outcome(result);
            targets
                .into_iter()
                .map(|target| BatchEntry {
                    target,
                    outcome: outcome.clone(),
                })
                .collect()
        } else {
            // Queue everything first so the entries run back to back
            let tickets: Vec<_> = items
                .into_iter()
                .map(|(target, msg)| (target, self.executor.submit(Operation::execute(label, vec![msg]))))
                .collect();
            let mut entries = Vec::with_capacity(tickets.len());
            for (target, ticket) in tickets {
                let result = match ticket {
                    Ok(ticket) => ticket.wait().await.and_then(OperationOutput::into_ack),
                    Err(e) => Err(e),
                };
                entries.push(BatchEntry {
                    target,
                    outcome: entry_outcome(result),
                });
            }
            self.queries.invalidate();
            entries
        };

        let report = BatchReport { entries };
        if report.all_succeeded() {
            Ok(report)
        } else {
            warn!(
                "{} {} batch: {} succeeded, {} failed, {} ambiguous",
                self.key,
                label,
                report.succeeded().count(),
                report.failed().count(),
                report.ambiguous().count()
            );
            Err(OrchestrationError::PartialBatchFailure(report))
        }
    }

    fn channel_to(&self, chain_id: &str) -> Result<String> {
        self.chain()
            .chain_info()
            .transfer_channel(chain_id)
            .map(str::to_string)
            .ok_or_else(|| {
                OrchestrationError::validation(format!(
                    "no open transfer channel from {} to {}",
                    self.chain_id(),
                    chain_id
                ))
            })
    }

    fn default_deadline_nanos(&self) -> Result<u64> {
        let timeout = chrono::Duration::from_std(self.context.transfer.default_timeout)
            .map_err(|e| OrchestrationError::validation(format!("transfer timeout: {}", e)))?;
        deadline_nanos(Utc::now() + timeout)
    }

    fn check_validator(&self, validator: &ValidatorAddress) -> Result<()> {
        if validator.chain_id() != self.chain_id() {
            return Err(OrchestrationError::validation(format!(
                "validator {} is not on {}",
                validator,
                self.chain_id()
            )));
        }
        Ok(())
    }

    fn check_positive(&self, amount: &ChainAmount) -> Result<()> {
        if amount.is_zero() {
            return Err(OrchestrationError::validation(format!("amount {} must be positive", amount)));
        }
        Ok(())
    }

    fn check_staking_amount(&self, amount: &ChainAmount) -> Result<()> {
        self.check_positive(amount)?;
        match &self.chain().chain_info().staking_denom {
            Some(denom) if denom != amount.denom.as_str() => Err(OrchestrationError::DenomMismatch {
                left: amount.denom.to_string(),
                right: denom.clone(),
            }),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("key", &self.key)
            .field("address", self.address())
            .field("state", &self.state())
            .finish()
    }
}

fn withdrawn_from(ack: &TxAck) -> Result<Vec<ChainAmount>> {
    let mut amounts = Vec::new();
    for response in &ack.responses {
        amounts.extend(projection::withdrawn_amounts(response)?);
    }
    Ok(amounts)
}

fn deadline_nanos(deadline: chrono::DateTime<Utc>) -> Result<u64> {
    deadline
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| OrchestrationError::validation(format!("deadline {} out of range", deadline)))
}
