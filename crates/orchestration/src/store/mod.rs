// Persisted account identity table
// (chain, pet-name) -> {address, closed}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::ChainAddress;

const STORE_VERSION: u32 = 1;

/// Errors specific to identity store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported store version {0}")]
    UnsupportedVersion(u32),

    #[error("No account {pet_name} on {chain}")]
    NotFound { chain: String, pet_name: String },
}

/// One remembered account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Logical chain name
    pub chain: String,
    pub pet_name: String,
    pub address: ChainAddress,
    #[serde(default)]
    pub closed: bool,
}

impl AccountRecord {
    pub fn new(chain: impl Into<String>, pet_name: impl Into<String>, address: ChainAddress) -> Self {
        Self {
            chain: chain.into(),
            pet_name: pet_name.into(),
            address,
            closed: false,
        }
    }
}

/// Trait for identity storage backends
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Load the record for an identity, if one was saved
    async fn load(&self, chain: &str, pet_name: &str) -> Result<Option<AccountRecord>, StoreError>;

    /// Insert or overwrite a record
    async fn save(&self, record: &AccountRecord) -> Result<(), StoreError>;

    /// Flag an identity as closed
    async fn mark_closed(&self, chain: &str, pet_name: &str) -> Result<(), StoreError>;

    /// All records, ordered by chain then pet name
    async fn list(&self) -> Result<Vec<AccountRecord>, StoreError>;
}

type Table = BTreeMap<(String, String), AccountRecord>;

/// On-disk file format
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    accounts: Vec<AccountRecord>,
}

/// Identity table kept in a single JSON file
pub struct JsonFileAccountStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonFileAccountStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path, lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_table(&self) -> Result<Table, StoreError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Table::new()),
            Err(e) => return Err(e.into()),
        };

        let file: StoreFile =
            serde_json::from_str(&data).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if file.version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion(file.version));
        }
        Ok(file
            .accounts
            .into_iter()
            .map(|r| ((r.chain.clone(), r.pet_name.clone()), r))
            .collect())
    }

    async fn write_table(&self, table: &Table) -> Result<(), StoreError> {
        let file = StoreFile {
            version: STORE_VERSION,
            accounts: table.values().cloned().collect(),
        };
        let data =
            serde_json::to_string_pretty(&file).map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Write beside the target and rename so readers never see a torn file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {} account records to {}", table.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl AccountStore for JsonFileAccountStore {
    async fn load(&self, chain: &str, pet_name: &str) -> Result<Option<AccountRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_table().await?.remove(&(chain.to_string(), pet_name.to_string())))
    }

    async fn save(&self, record: &AccountRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut table = self.read_table().await?;
        table.insert((record.chain.clone(), record.pet_name.clone()), record.clone());
        self.write_table(&table).await
    }

    async fn mark_closed(&self, chain: &str, pet_name: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut table = self.read_table().await?;
        let record = table
            .get_mut(&(chain.to_string(), pet_name.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                chain: chain.to_string(),
                pet_name: pet_name.to_string(),
            })?;
        record.closed = true;
        self.write_table(&table).await
    }

    async fn list(&self) -> Result<Vec<AccountRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_table().await?.into_values().collect())
    }
}

/// Volatile identity table
#[derive(Default)]
pub struct MemoryAccountStore {
    table: Mutex<Table>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load(&self, chain: &str, pet_name: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self
            .table
            .lock()
            .await
            .get(&(chain.to_string(), pet_name.to_string()))
            .cloned())
    }

    async fn save(&self, record: &AccountRecord) -> Result<(), StoreError> {
        self.table
            .lock()
            .await
            .insert((record.chain.clone(), record.pet_name.clone()), record.clone());
        Ok(())
    }

    async fn mark_closed(&self, chain: &str, pet_name: &str) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        let record = table
            .get_mut(&(chain.to_string(), pet_name.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                chain: chain.to_string(),
                pet_name: pet_name.to_string(),
            })?;
        record.closed = true;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AccountRecord>, StoreError> {
        Ok(self.table.lock().await.values().cloned().collect())
    }
}
