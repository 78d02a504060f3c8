// Account directory: at most one remote account per (chain, pet-name)
// Concurrent callers for the same identity share a single creation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use super::{Account, AccountContext, AccountKey, AccountState, Executor};
use crate::chains::{Chain, ChainRegistry};
use crate::config::{ExecutorConfig, QueryConfig};
use crate::error::{OrchestrationError, Result};
use crate::metrics::OrchestratorMetrics;
use crate::query::QueryClient;
use crate::retry::{bounded, RetryClass};
use crate::store::AccountRecord;
use crate::types::ChainAddress;

type Cell = Arc<OnceCell<Arc<Account>>>;

/// A remote creation whose identity is not yet in the store
#[derive(Debug, Clone)]
enum Unpersisted {
    /// The chain confirmed the account; only the store write is missing
    Created(ChainAddress),
    /// The chain may or may not have created an account
    Unknown(String),
}

pub struct AccountDirectory {
    cells: Mutex<HashMap<AccountKey, Cell>>,
    unpersisted: Mutex<HashMap<AccountKey, Unpersisted>>,
    registry: Arc<ChainRegistry>,
    context: Arc<AccountContext>,
    executor: ExecutorConfig,
    queries: QueryConfig,
    metrics: Option<Arc<OrchestratorMetrics>>,
}

impl AccountDirectory {
    pub(crate) fn new(
        registry: Arc<ChainRegistry>,
        context: Arc<AccountContext>,
        executor: ExecutorConfig,
        queries: QueryConfig,
        metrics: Option<Arc<OrchestratorMetrics>>,
    ) -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
            unpersisted: Mutex::new(HashMap::new()),
            registry,
            context,
            executor,
            queries,
            metrics,
        }
    }

    /// Return the account for `(chain, pet_name)`, creating it on first use
    ///
    /// A creation that failed before reaching the chain leaves nothing
    /// behind, so a later call tries again. If the chain created the account
    /// but the store write failed, later calls retry only the write. If the
    /// chain's answer was lost, later calls fail with `AmbiguousOutcome`
    /// until [`resolve_creation`](Self::resolve_creation) settles it.
    pub async fn provide_account(&self, chain: &str, pet_name: &str) -> Result<Arc<Account>> {
        if pet_name.is_empty() {
            return Err(OrchestrationError::validation("pet name must not be empty"));
        }
        let key = AccountKey::new(chain, pet_name);
        let cell = self.cells().entry(key.clone()).or_default().clone();

        let account = cell.get_or_try_init(|| self.open(key)).await?;
        Ok(account.clone())
    }

    /// Accounts provided so far, ordered by identity
    pub fn accounts(&self) -> Vec<Arc<Account>> {
        let mut accounts: Vec<_> = self.cells().values().filter_map(|cell| cell.get().cloned()).collect();
        accounts.sort_by(|a, b| a.key().cmp(b.key()));
        accounts
    }

    async fn open(&self, key: AccountKey) -> Result<Arc<Account>> {
        let chain = self.registry.get_chain(&key.chain).await?;

        let (address, state) = match self.context.store.load(&key.chain, &key.pet_name).await? {
            Some(record) => {
                if record.address.chain_id() != chain.chain_id() {
                    return Err(OrchestrationError::validation(format!(
                        "stored account {} lives on {}, but {} is now {}",
                        key,
                        record.address.chain_id(),
                        key.chain,
                        chain.chain_id()
                    )));
                }
                debug!("Rehydrated {} as {}", key, record.address);
                let state = if record.closed {
                    AccountState::Closed
                } else {
                    AccountState::Open
                };
                (record.address, state)
            }
            None => {
                let address = self.created_address(&chain, &key).await?;
                self.persist(&key, address.clone()).await?;
                (address, AccountState::Open)
            }
        };

        let executor = Executor::spawn(
            address,
            chain.clone(),
            self.executor.clone(),
            self.metrics.clone(),
            state,
        );
        let queries = QueryClient::new(chain, self.queries.cache_staleness);
        Ok(Arc::new(Account::new(key, executor, queries, self.context.clone())))
    }

    /// Settle an identity whose creation outcome was lost
    ///
    /// Pass the address found on the chain, or `None` once it is certain no
    /// account was created.
    pub async fn resolve_creation(&self, chain: &str, pet_name: &str, address: Option<ChainAddress>) -> Result<()> {
        let key = AccountKey::new(chain, pet_name);
        if !matches!(self.unpersisted().get(&key), Some(Unpersisted::Unknown(_))) {
            return Err(OrchestrationError::validation(format!("{} has no unresolved creation", key)));
        }
        match address {
            Some(address) => {
                let chain = self.registry.get_chain(&key.chain).await?;
                if address.chain_id() != chain.chain_id() {
                    return Err(OrchestrationError::validation(format!(
                        "{} is not an address on {}",
                        address,
                        chain.chain_id()
                    )));
                }
                info!("Adopting {} for {}", address, key);
                self.unpersisted().insert(key.clone(), Unpersisted::Created(address.clone()));
                self.persist(&key, address).await
            }
            None => {
                info!("No account was created for {}", key);
                self.unpersisted().remove(&key);
                Ok(())
            }
        }
    }

    /// Address created for `key`, reusing one the chain already confirmed
    async fn created_address(&self, chain: &Arc<Chain>, key: &AccountKey) -> Result<ChainAddress> {
        let earlier = self.unpersisted().get(key).cloned();
        match earlier {
            Some(Unpersisted::Created(address)) => {
                debug!("Reusing created account {} for {}", address, key);
                return Ok(address);
            }
            Some(Unpersisted::Unknown(reason)) => {
                return Err(OrchestrationError::AmbiguousOutcome {
                    account: key.to_string(),
                    operation: "create_account".to_string(),
                    reason: format!("earlier creation unresolved: {}", reason),
                });
            }
            None => {}
        }

        match self.create_remote(chain, key).await {
            Ok(address) => {
                self.unpersisted()
                    .insert(key.clone(), Unpersisted::Created(address.clone()));
                Ok(address)
            }
            Err(OrchestrationError::AmbiguousOutcome { account, operation, reason }) => {
                error!("Creation of {} may have happened remotely: {}", key, reason);
                self.unpersisted()
                    .insert(key.clone(), Unpersisted::Unknown(reason.clone()));
                Err(OrchestrationError::AmbiguousOutcome { account, operation, reason })
            }
            Err(err) => Err(err),
        }
    }

    async fn create_remote(&self, chain: &Arc<Chain>, key: &AccountKey) -> Result<ChainAddress> {
        let transport = chain.transport();
        let label = key.to_string();
        let limit = self.executor.ambiguous_timeout;
        let address = chain
            .retry_policy()
            .run("create_account", RetryClass::Submission, || {
                bounded(limit, transport.create_account(&label))
            })
            .await
            .map_err(|err| OrchestrationError::from_transport(err, &label, "create_account"))?;

        info!("Created account {} for {}", address, key);
        if let Some(metrics) = &self.metrics {
            metrics.accounts_created.inc();
        }
        Ok(address)
    }

    async fn persist(&self, key: &AccountKey, address: ChainAddress) -> Result<()> {
        let record = AccountRecord::new(&key.chain, &key.pet_name, address);
        if let Err(err) = self.context.store.save(&record).await {
            warn!("Failed to record {} as {}; will retry: {}", key, record.address, err);
            return Err(err.into());
        }
        self.unpersisted().remove(key);
        Ok(())
    }

    fn unpersisted(&self) -> MutexGuard<'_, HashMap<AccountKey, Unpersisted>> {
        self.unpersisted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cells(&self) -> MutexGuard<'_, HashMap<AccountKey, Cell>> {
        self.cells.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
