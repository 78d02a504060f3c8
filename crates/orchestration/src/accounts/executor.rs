// Per-account operation executor
// One worker task per account dispatches queued operations strictly in order

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::chains::{Chain, TransportError, TxAck, TxRequest};
use crate::config::ExecutorConfig;
use crate::error::{OrchestrationError, Result};
use crate::metrics::OrchestratorMetrics;
use crate::retry::{bounded, RetryClass};
use crate::types::{ChainAddress, EncodeObject, Proto3JsonMsg};

const QUEUED: u8 = 0;
const DISPATCHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Lifecycle of the remote account as seen by its executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountState {
    Open,
    /// Close accepted; earlier operations are still draining
    Closing,
    Closed,
}

/// A state-changing request against one account
#[derive(Debug, Clone)]
pub enum Operation {
    Execute {
        label: String,
        messages: Vec<Proto3JsonMsg>,
        memo: String,
    },
    ExecuteEncoded {
        label: String,
        messages: Vec<EncodeObject>,
        memo: String,
    },
    Close,
}

impl Operation {
    pub fn execute(label: impl Into<String>, messages: Vec<Proto3JsonMsg>) -> Self {
        Operation::Execute {
            label: label.into(),
            messages,
            memo: String::new(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Operation::Execute { label, .. } | Operation::ExecuteEncoded { label, .. } => label,
            Operation::Close => "close",
        }
    }

    fn type_urls(&self) -> Vec<&str> {
        match self {
            Operation::Execute { messages, .. } => messages.iter().map(|m| m.type_url.as_str()).collect(),
            Operation::ExecuteEncoded { messages, .. } => {
                messages.iter().map(|m| m.type_url.as_str()).collect()
            }
            Operation::Close => vec![],
        }
    }
}

/// What a completed operation produced
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Ack(TxAck),
    Closed,
}

impl OperationOutput {
    pub fn into_ack(self) -> Result<TxAck> {
        match self {
            OperationOutput::Ack(ack) => Ok(ack),
            OperationOutput::Closed => Err(OrchestrationError::MalformedResponse(
                "expected a transaction acknowledgment".to_string(),
            )),
        }
    }
}

struct Pending {
    id: u64,
    operation: Operation,
    status: Arc<AtomicU8>,
    reply: oneshot::Sender<Result<OperationOutput>>,
}

/// Handle to a queued operation
///
/// Dropping the ticket before dispatch cancels the operation. Once dispatched
/// it runs to completion regardless.
pub struct OperationTicket {
    id: u64,
    status: Arc<AtomicU8>,
    reply: oneshot::Receiver<Result<OperationOutput>>,
}

impl OperationTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Withdraw the operation if it has not been dispatched yet
    pub fn cancel(&self) -> bool {
        self.status
            .compare_exchange(QUEUED, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Wait for the operation's outcome
    pub async fn wait(self) -> Result<OperationOutput> {
        match self.reply.await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::Cancelled(self.id)),
        }
    }
}

struct Shared {
    address: ChainAddress,
    chain: Arc<Chain>,
    config: ExecutorConfig,
    metrics: Option<Arc<OrchestratorMetrics>>,
    state: Mutex<AccountState>,
}

/// Serializes submissions for one remote account
pub struct Executor {
    shared: Arc<Shared>,
    sender: mpsc::Sender<Pending>,
    next_id: AtomicU64,
}

impl Executor {
    /// Start the executor's worker. Must be called inside a tokio runtime.
    pub fn spawn(
        address: ChainAddress,
        chain: Arc<Chain>,
        config: ExecutorConfig,
        metrics: Option<Arc<OrchestratorMetrics>>,
        initial_state: AccountState,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.max_queue_size.max(1));
        let shared = Arc::new(Shared {
            address,
            chain,
            config,
            metrics,
            state: Mutex::new(initial_state),
        });

        let worker = Worker {
            shared: shared.clone(),
            sequence: None,
        };
        tokio::spawn(worker.run(receiver));

        Self {
            shared,
            sender,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn address(&self) -> &ChainAddress {
        &self.shared.address
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.shared.chain
    }

    pub fn state(&self) -> AccountState {
        *lock(&self.shared.state)
    }

    /// Queue an operation behind everything already accepted
    pub fn submit(&self, operation: Operation) -> Result<OperationTicket> {
        if matches!(operation, Operation::Close) {
            return Err(OrchestrationError::validation("use Executor::close to close an account"));
        }
        self.check_allowed(&operation)?;

        let state = lock(&self.shared.state);
        if *state != AccountState::Open {
            return Err(OrchestrationError::AccountClosed(self.shared.address.to_string()));
        }
        self.enqueue(operation)
    }

    /// Refuse new submissions, then queue the remote close behind the backlog
    pub async fn close(&self) -> Result<OperationTicket> {
        {
            let mut state = lock(&self.shared.state);
            if *state != AccountState::Open {
                return Err(OrchestrationError::AccountClosed(self.shared.address.to_string()));
            }
            *state = AccountState::Closing;
        }
        info!("Closing account {}", self.shared.address);

        let (pending, ticket) = self.make_pending(Operation::Close);
        if self.sender.send(pending).await.is_err() {
            *lock(&self.shared.state) = AccountState::Open;
            return Err(OrchestrationError::Transport("executor worker stopped".to_string()));
        }
        self.record_enqueued();
        Ok(ticket)
    }

    fn check_allowed(&self, operation: &Operation) -> Result<()> {
        let type_urls = operation.type_urls();
        if type_urls.is_empty() {
            return Err(OrchestrationError::validation(format!(
                "{} carries no messages",
                operation.label()
            )));
        }
        let info = self.shared.chain.chain_info();
        if let Some(denied) = type_urls.iter().find(|t| !info.allows_message(t)) {
            return Err(OrchestrationError::validation(format!(
                "message {} not allowed on {}",
                denied,
                self.shared.chain.name()
            )));
        }
        Ok(())
    }

    fn enqueue(&self, operation: Operation) -> Result<OperationTicket> {
        let label = operation.label().to_string();
        let (pending, ticket) = self.make_pending(operation);
        match self.sender.try_send(pending) {
            Ok(()) => {
                debug!("Queued {} #{} for {}", label, ticket.id, self.shared.address);
                self.record_enqueued();
                Ok(ticket)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Operation queue full for {}", self.shared.address);
                Err(OrchestrationError::QueueFull(self.shared.address.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(OrchestrationError::AccountClosed(self.shared.address.to_string()))
            }
        }
    }

    fn make_pending(&self, operation: Operation) -> (Pending, OperationTicket) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let status = Arc::new(AtomicU8::new(QUEUED));
        let (reply, receiver) = oneshot::channel();
        (
            Pending {
                id,
                operation,
                status: status.clone(),
                reply,
            },
            OperationTicket {
                id,
                status,
                reply: receiver,
            },
        )
    }

    fn record_enqueued(&self) {
        if let Some(metrics) = &self.shared.metrics {
            metrics.operations_submitted.inc();
            metrics.queued_operations.inc();
        }
    }
}

/// Worker-owned state; the sequence never leaves this task
struct Worker {
    shared: Arc<Shared>,
    sequence: Option<u64>,
}

impl Worker {
    async fn run(mut self, mut receiver: mpsc::Receiver<Pending>) {
        // Ends once the executor is dropped and the backlog is drained
        while let Some(pending) = receiver.recv().await {
            if let Some(metrics) = &self.shared.metrics {
                metrics.queued_operations.dec();
            }

            let claimed = pending
                .status
                .compare_exchange(QUEUED, DISPATCHED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if !claimed || pending.reply.is_closed() {
                debug!("Skipping cancelled operation #{} for {}", pending.id, self.shared.address);
                continue;
            }

            let label = pending.operation.label().to_string();
            debug!("Dispatching {} #{} for {}", label, pending.id, self.shared.address);
            let started = Instant::now();
            let result = self.dispatch(pending.operation).await;
            self.record_outcome(&label, &result, started);

            let closed = matches!(result, Ok(OperationOutput::Closed))
                || *lock(&self.shared.state) == AccountState::Closed;
            // The caller may have stopped waiting; the outcome is already logged
            let _ = pending.reply.send(result);
            if closed {
                break;
            }
        }
        debug!("Executor for {} stopped", self.shared.address);
    }

    async fn dispatch(&mut self, operation: Operation) -> Result<OperationOutput> {
        let transport = self.shared.chain.transport();
        match operation {
            Operation::Execute { label, messages, memo } => self
                .submit_tx(&label, messages, memo, |tx| transport.execute_tx(tx))
                .await
                .map(OperationOutput::Ack),
            Operation::ExecuteEncoded { label, messages, memo } => self
                .submit_tx(&label, messages, memo, |tx| transport.execute_encoded_tx(tx))
                .await
                .map(OperationOutput::Ack),
            Operation::Close => self.close_remote().await,
        }
    }

    async fn submit_tx<M, F, Fut>(
        &mut self,
        label: &str,
        messages: Vec<M>,
        memo: String,
        send: F,
    ) -> Result<TxAck>
    where
        M: Clone,
        F: Fn(TxRequest<M>) -> Fut,
        Fut: Future<Output = std::result::Result<TxAck, TransportError>>,
    {
        let sequence = self.current_sequence().await?;
        let request = TxRequest {
            sender: self.shared.address.clone(),
            sequence,
            messages,
            memo,
        };

        // The bound applies per attempt so backoff between unsent attempts
        // cannot expire it
        let shared = self.shared.clone();
        let limit = shared.config.ambiguous_timeout;
        let outcome = shared
            .chain
            .retry_policy()
            .run(label, RetryClass::Submission, || bounded(limit, send(request.clone())))
            .await;
        match outcome {
            Ok(ack) => {
                self.sequence = Some(sequence + 1);
                debug!("{} acknowledged for {} at height {}", label, shared.address, ack.height);
                Ok(ack)
            }
            Err(TransportError::Timeout) => {
                self.sequence = None;
                Err(self.ambiguous(label, format!("no acknowledgment within {:?}", limit)))
            }
            Err(err) => Err(self.classify(label, err)),
        }
    }

    async fn close_remote(&mut self) -> Result<OperationOutput> {
        let transport = self.shared.chain.transport();
        let address = self.shared.address.clone();
        let limit = self.shared.config.ambiguous_timeout;
        let result = bounded(limit, transport.close_account(&address)).await;

        match result {
            Ok(()) => {
                *lock(&self.shared.state) = AccountState::Closed;
                info!("Closed account {}", address);
                Ok(OperationOutput::Closed)
            }
            Err(err) if !err.is_ambiguous() => {
                *lock(&self.shared.state) = AccountState::Open;
                warn!("Close of {} failed, account reopened: {}", address, err);
                Err(err.into())
            }
            Err(err) => {
                *lock(&self.shared.state) = AccountState::Closed;
                Err(self.ambiguous("close", err.to_string()))
            }
        }
    }

    async fn current_sequence(&mut self) -> Result<u64> {
        if let Some(sequence) = self.sequence {
            return Ok(sequence);
        }
        let shared = self.shared.clone();
        let transport = shared.chain.transport();
        let address = &shared.address;
        let sequence = shared
            .chain
            .retry_policy()
            .run("account_sequence", RetryClass::Query, || transport.account_sequence(address))
            .await?;
        debug!("Fetched sequence {} for {}", sequence, address);
        self.sequence = Some(sequence);
        Ok(sequence)
    }

    fn classify(&mut self, label: &str, err: TransportError) -> OrchestrationError {
        match err {
            err if err.is_ambiguous() => {
                self.sequence = None;
                self.ambiguous(label, err.to_string())
            }
            TransportError::Rejected { code, log } => {
                self.sequence = None;
                warn!("{} rejected for {} (code {}): {}", label, self.shared.address, code, log);
                OrchestrationError::RemoteRejected { code, log }
            }
            other => other.into(),
        }
    }

    fn ambiguous(&self, label: &str, reason: String) -> OrchestrationError {
        error!("Outcome of {} for {} is unknown: {}", label, self.shared.address, reason);
        OrchestrationError::AmbiguousOutcome {
            account: self.shared.address.to_string(),
            operation: label.to_string(),
            reason,
        }
    }

    fn record_outcome(&self, label: &str, result: &Result<OperationOutput>, started: Instant) {
        let Some(metrics) = &self.shared.metrics else {
            return;
        };
        metrics.dispatch_duration.observe(started.elapsed().as_secs_f64());
        match result {
            Ok(_) => metrics.operations_succeeded.inc(),
            Err(OrchestrationError::AmbiguousOutcome { .. }) => metrics.ambiguous_outcomes.inc(),
            Err(e) => {
                debug!("{} failed: {}", label, e);
                metrics.operations_failed.inc();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{Fault, InMemoryChain, WRONG_SEQUENCE_CODE};
    use crate::config::{OrchestratorConfig, RetryConfig};
    use crate::chains::ChainTransport;
    use crate::retry::RetryPolicy;
    use crate::types::type_urls;
    use serde_json::json;
    use std::time::Duration;

    async fn setup(config: ExecutorConfig) -> (Arc<InMemoryChain>, Executor) {
        let retry = RetryConfig {
            max_retries: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        };
        setup_with_retry(config, retry).await
    }

    async fn setup_with_retry(config: ExecutorConfig, retry: RetryConfig) -> (Arc<InMemoryChain>, Executor) {
        let ledger = Arc::new(InMemoryChain::new("celestia", "celestia").with_staking_denom("utia"));
        let info = OrchestratorConfig::default().chains.remove("celestia").unwrap();
        let retry = RetryPolicy::new(retry);
        let chain = Arc::new(Chain::new("celestia", info, ledger.clone(), retry));
        let address = ledger.create_account("test").await.unwrap();
        ledger.fund(&address, "utia", 1_000);
        let executor = Executor::spawn(address, chain, config, None, AccountState::Open);
        (ledger, executor)
    }

    fn send_msg(executor: &Executor, to: &ChainAddress, amount: u128) -> Operation {
        Operation::execute(
            "send",
            vec![Proto3JsonMsg::new(
                type_urls::MSG_SEND,
                json!({
                    "from_address": executor.address().address(),
                    "to_address": to.address(),
                    "amount": [{ "denom": "utia", "amount": amount.to_string() }],
                }),
            )],
        )
    }

    #[tokio::test]
    async fn test_rejection_refetches_sequence() {
        let (ledger, executor) = setup(ExecutorConfig::default()).await;
        let to = ledger.external_address(1).unwrap();

        ledger.fail_next(Fault::Reject { code: WRONG_SEQUENCE_CODE, log: "stale".to_string() });
        let err = executor.submit(send_msg(&executor, &to, 1)).unwrap().wait().await.unwrap_err();
        assert!(matches!(err, OrchestrationError::RemoteRejected { code: WRONG_SEQUENCE_CODE, .. }));

        executor.submit(send_msg(&executor, &to, 2)).unwrap().wait().await.unwrap();
        executor.submit(send_msg(&executor, &to, 3)).unwrap().wait().await.unwrap();
        assert_eq!(ledger.balance(&to, "utia"), 5);
    }

    #[tokio::test]
    async fn test_not_submitted_is_retried() {
        let (ledger, executor) = setup(ExecutorConfig::default()).await;
        let to = ledger.external_address(1).unwrap();

        ledger.fail_next(Fault::NotSubmitted("connection refused".to_string()));
        executor.submit(send_msg(&executor, &to, 7)).unwrap().wait().await.unwrap();
        assert_eq!(ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_backoff_keeps_unsent_failures_known() {
        let config = ExecutorConfig {
            ambiguous_timeout: Duration::from_millis(20),
            ..ExecutorConfig::default()
        };
        let retry = RetryConfig {
            max_retries: 2,
            initial_delay_ms: 30,
            max_delay_ms: 30,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        };
        let (ledger, executor) = setup_with_retry(config, retry).await;
        let to = ledger.external_address(1).unwrap();

        ledger.fail_next(Fault::NotSubmitted("connection refused".to_string()));
        ledger.fail_next(Fault::NotSubmitted("connection refused".to_string()));
        executor.submit(send_msg(&executor, &to, 4)).unwrap().wait().await.unwrap();
        assert_eq!(ledger.balance(&to, "utia"), 4);

        for _ in 0..3 {
            ledger.fail_next(Fault::NotSubmitted("connection refused".to_string()));
        }
        let err = executor.submit(send_msg(&executor, &to, 1)).unwrap().wait().await.unwrap_err();
        assert_eq!(err.outcome(), crate::error::Outcome::KnownFailed);
        assert!(err.is_retry_safe());
    }

    #[tokio::test]
    async fn test_cancelled_ticket_is_skipped() {
        let (ledger, executor) = setup(ExecutorConfig::default()).await;
        let to = ledger.external_address(1).unwrap();

        ledger.pause();
        let first = executor.submit(send_msg(&executor, &to, 1)).unwrap();
        let second = executor.submit(send_msg(&executor, &to, 2)).unwrap();
        let third = executor.submit(send_msg(&executor, &to, 3)).unwrap();
        assert!(second.cancel());
        drop(third);
        ledger.resume();

        first.wait().await.unwrap();
        assert!(matches!(second.wait().await, Err(OrchestrationError::Cancelled(_))));
        // Queue is drained once a later operation completes
        executor.submit(send_msg(&executor, &to, 4)).unwrap().wait().await.unwrap();
        assert_eq!(ledger.balance(&to, "utia"), 5);
    }

    #[tokio::test]
    async fn test_queue_bound() {
        let config = ExecutorConfig {
            max_queue_size: 1,
            ..ExecutorConfig::default()
        };
        let (ledger, executor) = setup(config).await;
        let to = ledger.external_address(1).unwrap();

        ledger.pause();
        let first = executor.submit(send_msg(&executor, &to, 1)).unwrap();
        // Let the worker take the first operation off the queue
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = executor.submit(send_msg(&executor, &to, 1)).unwrap();
        let err = executor.submit(send_msg(&executor, &to, 1)).err();
        assert!(matches!(err, Some(OrchestrationError::QueueFull(_))));

        ledger.resume();
        first.wait().await.unwrap();
        second.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_disallowed_message_fails_before_queueing() {
        let (ledger, executor) = setup(ExecutorConfig::default()).await;
        let op = Operation::execute("noop", vec![]);
        assert!(matches!(executor.submit(op), Err(OrchestrationError::Validation(_))));
        assert!(ledger.submitted().is_empty());
    }
}
