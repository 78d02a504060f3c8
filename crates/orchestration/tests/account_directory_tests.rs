// Integration tests for account provisioning and identity persistence
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tempfile::TempDir;

use orchestration::store::StoreError;
use orchestration::{
    AccountRecord, AccountState, AccountStore, ChainAmount, Fault, InMemoryChain, MemoryAccountStore,
    OrchestrationError, Orchestrator, OrchestratorConfig, Outcome,
};

/// Helper function to create a quick-failing test configuration
fn create_test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.executor.ambiguous_timeout = Duration::from_millis(200);
    config.executor.retry.initial_delay_ms = 1;
    config.executor.retry.max_delay_ms = 5;
    config
}

async fn setup(config: OrchestratorConfig) -> anyhow::Result<(Orchestrator, BTreeMap<String, Arc<InMemoryChain>>)> {
    let orchestrator = Orchestrator::with_memory_store(config)?;
    let ledgers = orchestrator.register_in_memory_chains().await?;
    Ok((orchestrator, ledgers))
}

/// Memory store whose first `failures` saves fail
struct FlakyStore {
    inner: MemoryAccountStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    fn failing(failures: usize) -> Self {
        Self {
            inner: MemoryAccountStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl AccountStore for FlakyStore {
    async fn load(&self, chain: &str, pet_name: &str) -> Result<Option<AccountRecord>, StoreError> {
        self.inner.load(chain, pet_name).await
    }

    async fn save(&self, record: &AccountRecord) -> Result<(), StoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Serialization("disk full".to_string()));
        }
        self.inner.save(record).await
    }

    async fn mark_closed(&self, chain: &str, pet_name: &str) -> Result<(), StoreError> {
        self.inner.mark_closed(chain, pet_name).await
    }

    async fn list(&self) -> Result<Vec<AccountRecord>, StoreError> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn test_concurrent_provide_account_creates_once() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup(create_test_config()).await?;
    let celestia = &ledgers["celestia"];
    // Keep creation in flight long enough for every caller to pile up
    celestia.set_latency(Duration::from_millis(20));

    let accounts = join_all((0..10).map(|_| orchestrator.provide_account("celestia", "alice"))).await;
    let accounts = accounts.into_iter().collect::<Result<Vec<_>, _>>()?;

    assert_eq!(celestia.account_creations(), 1);
    assert!(accounts.iter().all(|a| Arc::ptr_eq(a, &accounts[0])));
    assert_eq!(orchestrator.metrics().accounts_created.get(), 1.0);
    Ok(())
}

#[tokio::test]
async fn test_pet_names_are_scoped_per_chain() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup(create_test_config()).await?;

    let alice = orchestrator.provide_account("celestia", "alice").await?;
    let bob = orchestrator.provide_account("celestia", "bob").await?;
    let alice_on_stride = orchestrator.provide_account("stride", "alice").await?;

    assert_ne!(alice.address(), bob.address());
    assert_eq!(alice_on_stride.address().chain_id(), "stride-1");
    assert_eq!(ledgers["celestia"].account_creations(), 2);
    assert_eq!(ledgers["stride"].account_creations(), 1);
    assert_eq!(orchestrator.accounts().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_unknown_chain_leaves_no_account() -> anyhow::Result<()> {
    let (orchestrator, _ledgers) = setup(create_test_config()).await?;

    let err = orchestrator.provide_account("cosmoshub", "alice").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::UnknownChain(_)));
    assert!(orchestrator.accounts().is_empty());
    assert!(orchestrator.stored_accounts().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_store_write_keeps_created_account() -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(create_test_config(), Arc::new(FlakyStore::failing(1)))?;
    let ledgers = orchestrator.register_in_memory_chains().await?;
    let celestia = &ledgers["celestia"];

    let err = orchestrator.provide_account("celestia", "alice").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Store(_)));
    assert!(orchestrator.accounts().is_empty());
    assert_eq!(celestia.account_creations(), 1);

    // Only the store write is retried
    let alice = orchestrator.provide_account("celestia", "alice").await?;
    assert_eq!(celestia.account_creations(), 1);
    assert_eq!(celestia.account_count(), 1);

    let records = orchestrator.stored_accounts().await?;
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0].address, alice.address());
    assert_eq!(orchestrator.metrics().accounts_created.get(), 1.0);
    Ok(())
}

#[tokio::test]
async fn test_lost_creation_reply_blocks_recreation() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup(create_test_config()).await?;
    let celestia = &ledgers["celestia"];
    // The account is created but the reply never arrives
    celestia.fail_next_create(Fault::AckLost);

    let err = orchestrator.provide_account("celestia", "alice").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::AmbiguousOutcome { .. }));
    assert_eq!(err.outcome(), Outcome::Ambiguous);
    assert!(!err.is_retry_safe());
    assert_eq!(celestia.account_count(), 1);

    let again = orchestrator.provide_account("celestia", "alice").await.unwrap_err();
    assert_eq!(again.outcome(), Outcome::Ambiguous);
    assert_eq!(celestia.account_creations(), 1);
    assert!(orchestrator.stored_accounts().await?.is_empty());

    // Other identities are unaffected
    orchestrator.provide_account("celestia", "bob").await?;
    assert_eq!(celestia.account_creations(), 2);
    Ok(())
}

#[tokio::test]
async fn test_hung_creation_is_ambiguous_until_resolved() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup(create_test_config()).await?;
    let celestia = &ledgers["celestia"];
    celestia.fail_next_create(Fault::Hang);

    let err = orchestrator.provide_account("celestia", "alice").await.unwrap_err();
    assert_eq!(err.outcome(), Outcome::Ambiguous);
    assert_eq!(orchestrator.metrics().retries.get(), 0.0);
    assert!(orchestrator.provide_account("celestia", "alice").await.is_err());

    let unknown = orchestrator.resolve_account_creation("celestia", "bob", None).await.unwrap_err();
    assert!(matches!(unknown, OrchestrationError::Validation(_)));

    // Nothing reached the ledger, so creation may start over
    assert_eq!(celestia.account_count(), 0);
    orchestrator.resolve_account_creation("celestia", "alice", None).await?;
    let alice = orchestrator.provide_account("celestia", "alice").await?;
    assert_eq!(celestia.account_creations(), 1);
    assert_eq!(alice.state(), AccountState::Open);
    Ok(())
}

#[tokio::test]
async fn test_resolved_creation_adopts_found_address() -> anyhow::Result<()> {
    let (orchestrator, ledgers) = setup(create_test_config()).await?;
    let celestia = &ledgers["celestia"];
    celestia.fail_next_create(Fault::Hang);
    assert!(orchestrator.provide_account("celestia", "alice").await.is_err());

    let foreign = ledgers["stride"].external_address(1)?;
    let wrong_chain = orchestrator
        .resolve_account_creation("celestia", "alice", Some(foreign))
        .await
        .unwrap_err();
    assert!(matches!(wrong_chain, OrchestrationError::Validation(_)));

    let found = celestia.external_address(9)?;
    orchestrator
        .resolve_account_creation("celestia", "alice", Some(found.clone()))
        .await?;
    let alice = orchestrator.provide_account("celestia", "alice").await?;
    assert_eq!(alice.address(), &found);
    assert_eq!(celestia.account_creations(), 0);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_chain_registration_rejected() -> anyhow::Result<()> {
    let (orchestrator, _ledgers) = setup(create_test_config()).await?;
    let info = orchestrator.config().chains["celestia"].clone();

    let err = orchestrator
        .register_chain("celestia", info.clone(), Arc::new(InMemoryChain::for_chain(&info)))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::ChainAlreadyRegistered(_)));

    let replacement = orchestrator
        .replace_chain("celestia", info.clone(), Arc::new(InMemoryChain::for_chain(&info)))
        .await;
    assert_eq!(replacement.chain_id(), "celestia");
    Ok(())
}

#[tokio::test]
async fn test_identities_rehydrate_from_file_store() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let mut config = create_test_config();
    config.store.path = dir.path().join("accounts.json").to_string_lossy().to_string();

    let first = Orchestrator::with_file_store(config.clone())?;
    first.register_in_memory_chains().await?;
    let address = first.provide_account("celestia", "alice").await?.address().clone();
    drop(first);

    let second = Orchestrator::with_file_store(config)?;
    let ledgers = second.register_in_memory_chains().await?;
    let alice = second.provide_account("celestia", "alice").await?;

    assert_eq!(alice.address(), &address);
    assert_eq!(alice.state(), AccountState::Open);
    assert_eq!(ledgers["celestia"].account_creations(), 0);
    Ok(())
}

#[tokio::test]
async fn test_closed_identity_stays_closed() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let mut config = create_test_config();
    config.store.path = dir.path().join("accounts.json").to_string_lossy().to_string();

    let first = Orchestrator::with_file_store(config.clone())?;
    let ledgers = first.register_in_memory_chains().await?;
    let alice = first.provide_account("celestia", "alice").await?;
    alice.close().await?;
    assert!(ledgers["celestia"].is_closed(alice.address()));
    drop(first);

    let second = Orchestrator::with_file_store(config)?;
    second.register_in_memory_chains().await?;
    let alice = second.provide_account("celestia", "alice").await?;
    assert_eq!(alice.state(), AccountState::Closed);

    let records = second.stored_accounts().await?;
    assert_eq!(records.len(), 1);
    assert!(records[0].closed);

    let someone = alice.address().clone();
    let err = alice.send(&someone, ChainAmount::new("utia", 1)).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::AccountClosed(_)));
    Ok(())
}
