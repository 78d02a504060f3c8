// Orchestrator: wires registry, account directory, store and metrics together

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::accounts::{Account, AccountContext, AccountDirectory};
use crate::chains::{Chain, ChainRegistry, ChainTransport, InMemoryChain};
use crate::config::{ChainConfig, OrchestratorConfig};
use crate::error::{OrchestrationError, Result};
use crate::metrics::OrchestratorMetrics;
use crate::retry::RetryPolicy;
use crate::store::{AccountRecord, AccountStore, JsonFileAccountStore, MemoryAccountStore};
use crate::transfer::TransferComposer;
use crate::types::{Brand, ChainAddress, DenomResolver};

/// Entry point for callers: chains by name, accounts by pet name
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ChainRegistry>,
    directory: AccountDirectory,
    context: Arc<AccountContext>,
    metrics: Arc<OrchestratorMetrics>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, store: Arc<dyn AccountStore>) -> anyhow::Result<Self> {
        let metrics = Arc::new(OrchestratorMetrics::new()?);
        let retry = RetryPolicy::new(config.executor.retry.clone()).with_metrics(metrics.clone());
        let registry = Arc::new(ChainRegistry::new(retry));

        let mut denoms = DenomResolver::new();
        for asset in &config.assets {
            for (chain_id, local) in &asset.denoms {
                let denom = denoms.register(Brand::new(asset.brand.clone()), chain_id, local)?;
                info!("Brand {} is {} on {}", asset.brand, denom, chain_id);
            }
        }

        let context = Arc::new(AccountContext {
            registry: registry.clone(),
            denoms: Arc::new(denoms),
            store,
            transfer: config.transfer.clone(),
            composer: TransferComposer::new(&config.transfer),
        });
        let directory = AccountDirectory::new(
            registry.clone(),
            context.clone(),
            config.executor.clone(),
            config.queries.clone(),
            Some(metrics.clone()),
        );

        Ok(Self {
            config,
            registry,
            directory,
            context,
            metrics,
        })
    }

    /// Orchestrator persisting identities to the configured JSON file
    pub fn with_file_store(config: OrchestratorConfig) -> anyhow::Result<Self> {
        let path = config.store.resolved_path();
        let store = JsonFileAccountStore::new(&path)?;
        info!("Using account store at {}", path.display());
        Self::new(config, Arc::new(store))
    }

    /// Orchestrator whose identities live only as long as the process
    pub fn with_memory_store(config: OrchestratorConfig) -> anyhow::Result<Self> {
        Self::new(config, Arc::new(MemoryAccountStore::new()))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<OrchestratorMetrics> {
        &self.metrics
    }

    pub fn composer(&self) -> &TransferComposer {
        &self.context.composer
    }

    pub fn denoms(&self) -> &DenomResolver {
        &self.context.denoms
    }

    pub async fn register_chain(
        &self,
        name: &str,
        info: ChainConfig,
        transport: Arc<dyn ChainTransport>,
    ) -> Result<Arc<Chain>> {
        self.registry.register_chain(name, info, transport).await
    }

    /// Register `name` using its entry in the configuration
    pub async fn register_configured_chain(
        &self,
        name: &str,
        transport: Arc<dyn ChainTransport>,
    ) -> Result<Arc<Chain>> {
        let info = self
            .config
            .get_chain(name)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownChain(name.to_string()))?;
        self.register_chain(name, info, transport).await
    }

    pub async fn replace_chain(
        &self,
        name: &str,
        info: ChainConfig,
        transport: Arc<dyn ChainTransport>,
    ) -> Arc<Chain> {
        self.registry.replace_chain(name, info, transport).await
    }

    /// Back every configured chain with an in-process ledger
    pub async fn register_in_memory_chains(&self) -> Result<BTreeMap<String, Arc<InMemoryChain>>> {
        let mut ledgers = BTreeMap::new();
        let configured: BTreeMap<_, _> = self.config.chains.iter().collect();
        for (name, info) in configured {
            let ledger = Arc::new(InMemoryChain::for_chain(info));
            self.register_chain(name, info.clone(), ledger.clone()).await?;
            ledgers.insert(name.clone(), ledger);
        }
        Ok(ledgers)
    }

    pub async fn get_chain(&self, name: &str) -> Result<Arc<Chain>> {
        self.registry.get_chain(name).await
    }

    pub async fn provide_account(&self, chain: &str, pet_name: &str) -> Result<Arc<Account>> {
        self.directory.provide_account(chain, pet_name).await
    }

    /// Settle an account whose creation reply was lost; see
    /// [`AccountDirectory::resolve_creation`]
    pub async fn resolve_account_creation(
        &self,
        chain: &str,
        pet_name: &str,
        address: Option<ChainAddress>,
    ) -> Result<()> {
        self.directory.resolve_creation(chain, pet_name, address).await
    }

    /// Accounts provided by this process
    pub fn accounts(&self) -> Vec<Arc<Account>> {
        self.directory.accounts()
    }

    /// Every identity in the account store, including ones not yet provided
    pub async fn stored_accounts(&self) -> Result<Vec<AccountRecord>> {
        Ok(self.context.store.list().await?)
    }
}
