// Chain registry: logical chain name -> chain handle

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{Chain, ChainTransport};
use crate::config::ChainConfig;
use crate::error::{OrchestrationError, Result};
use crate::retry::RetryPolicy;

/// Read-mostly map of registered chains
pub struct ChainRegistry {
    chains: RwLock<HashMap<String, Arc<Chain>>>,
    retry: RetryPolicy,
}

impl ChainRegistry {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            retry,
        }
    }

    /// Register a chain under `name`. Fails if the name is already taken.
    pub async fn register_chain(
        &self,
        name: &str,
        config: ChainConfig,
        transport: Arc<dyn ChainTransport>,
    ) -> Result<Arc<Chain>> {
        let mut chains = self.chains.write().await;
        if chains.contains_key(name) {
            return Err(OrchestrationError::ChainAlreadyRegistered(name.to_string()));
        }

        let chain = Arc::new(Chain::new(name, config, transport, self.retry.clone()));
        info!("Registered chain {} ({})", name, chain.chain_id());
        chains.insert(name.to_string(), chain.clone());
        Ok(chain)
    }

    /// Register or replace a chain. Accounts already provided keep the handle
    /// they were created with.
    pub async fn replace_chain(
        &self,
        name: &str,
        config: ChainConfig,
        transport: Arc<dyn ChainTransport>,
    ) -> Arc<Chain> {
        let chain = Arc::new(Chain::new(name, config, transport, self.retry.clone()));
        let mut chains = self.chains.write().await;
        if chains.insert(name.to_string(), chain.clone()).is_some() {
            warn!("Replaced chain {} with endpoint for {}", name, chain.chain_id());
        } else {
            info!("Registered chain {} ({})", name, chain.chain_id());
        }
        chain
    }

    /// Resolve a chain by name
    pub async fn get_chain(&self, name: &str) -> Result<Arc<Chain>> {
        self.chains
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownChain(name.to_string()))
    }

    /// Resolve a chain by its chain id, used for intermediate transfer hops
    pub async fn find_by_chain_id(&self, chain_id: &str) -> Result<Arc<Chain>> {
        self.chains
            .read()
            .await
            .values()
            .find(|c| c.chain_id() == chain_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownChain(chain_id.to_string()))
    }

    /// Registered chain names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chains.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::InMemoryChain;
    use crate::config::{OrchestratorConfig, RetryConfig};

    fn registry() -> ChainRegistry {
        ChainRegistry::new(RetryPolicy::new(RetryConfig::default()))
    }

    fn celestia_config() -> ChainConfig {
        OrchestratorConfig::default().chains.remove("celestia").unwrap()
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let registry = registry();
        let err = registry.get_chain("celestia").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownChain(name) if name == "celestia"));
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = registry();
        let transport = Arc::new(InMemoryChain::new("celestia", "celestia"));
        registry.register_chain("celestia", celestia_config(), transport).await.unwrap();

        let chain = registry.get_chain("celestia").await.unwrap();
        assert_eq!(chain.chain_id(), "celestia");
        assert_eq!(registry.find_by_chain_id("celestia").await.unwrap().name(), "celestia");
        assert_eq!(registry.names().await, vec!["celestia".to_string()]);
    }

    #[tokio::test]
    async fn test_reregistration_rejected_unless_replacing() {
        let registry = registry();
        let first = Arc::new(InMemoryChain::new("celestia", "celestia"));
        let second = Arc::new(InMemoryChain::new("celestia", "celestia"));
        let original = registry.register_chain("celestia", celestia_config(), first).await.unwrap();

        let err = registry
            .register_chain("celestia", celestia_config(), second.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::ChainAlreadyRegistered(_)));
        assert!(Arc::ptr_eq(&registry.get_chain("celestia").await.unwrap(), &original));

        let replaced = registry.replace_chain("celestia", celestia_config(), second).await;
        assert!(!Arc::ptr_eq(&replaced, &original));
        assert!(Arc::ptr_eq(&registry.get_chain("celestia").await.unwrap(), &replaced));
    }
}
