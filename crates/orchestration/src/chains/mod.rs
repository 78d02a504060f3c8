// Chain-related types
// The transport is the only way to reach a remote chain; everything above it is local

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub mod memory;
pub mod registry;

pub use memory::{Fault, InMemoryChain, SubmittedTx};
pub use registry::ChainRegistry;

use crate::config::ChainConfig;
use crate::error::{OrchestrationError, Result};
use crate::retry::{RetryClass, RetryPolicy};
use crate::types::{ChainAddress, EncodeObject, Proto3JsonMsg};

/// Cosmos SDK `ErrWrongSequence`
pub const WRONG_SEQUENCE_CODE: u32 = 32;

/// Failures reported by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request never left this process; nothing happened remotely
    #[error("Request not submitted: {0}")]
    NotSubmitted(String),

    #[error("Timed out waiting for acknowledgment")]
    Timeout,

    /// The request was sent but the response was lost
    #[error("Connection lost after submission: {0}")]
    ConnectionLost(String),

    #[error("Rejected (code {code}): {log}")]
    Rejected { code: u32, log: String },

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl TransportError {
    /// The remote effect cannot be determined from this error
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::ConnectionLost(_))
    }
}

/// A transaction submitted on behalf of one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRequest<M> {
    pub sender: ChainAddress,
    /// Account sequence the transaction is signed for
    pub sequence: u64,
    pub messages: Vec<M>,
    pub memo: String,
}

/// Acknowledgment of a committed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxAck {
    pub tx_hash: String,
    pub height: u64,
    /// One response body per message, in message order
    pub responses: Vec<serde_json::Value>,
}

/// Remote chain access: transaction submission, queries and account lifecycle
#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// Create a new remote account controlled by this process
    async fn create_account(&self, label: &str) -> std::result::Result<ChainAddress, TransportError>;

    /// Current sequence of an account
    async fn account_sequence(&self, address: &ChainAddress) -> std::result::Result<u64, TransportError>;

    /// Submit proto3-JSON messages as one transaction
    async fn execute_tx(&self, tx: TxRequest<Proto3JsonMsg>) -> std::result::Result<TxAck, TransportError>;

    /// Submit pre-encoded messages as one transaction
    async fn execute_encoded_tx(&self, tx: TxRequest<EncodeObject>) -> std::result::Result<TxAck, TransportError>;

    /// Run queries; one result per query, in order
    async fn query(&self, queries: &[Proto3JsonMsg]) -> std::result::Result<Vec<serde_json::Value>, TransportError>;

    /// Close a remote account
    async fn close_account(&self, address: &ChainAddress) -> std::result::Result<(), TransportError>;
}

/// Handle to one registered chain
pub struct Chain {
    name: String,
    config: ChainConfig,
    transport: Arc<dyn ChainTransport>,
    retry: RetryPolicy,
}

impl Chain {
    pub fn new(
        name: impl Into<String>,
        config: ChainConfig,
        transport: Arc<dyn ChainTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            transport,
            retry,
        }
    }

    /// Name used with `get_chain`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain_id(&self) -> &str {
        &self.config.chain_id
    }

    pub fn chain_info(&self) -> &ChainConfig {
        &self.config
    }

    pub fn transport(&self) -> Arc<dyn ChainTransport> {
        self.transport.clone()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Query chain state directly, outside any account
    pub async fn query(&self, queries: &[Proto3JsonMsg]) -> Result<Vec<serde_json::Value>> {
        for query in queries {
            if !self.config.allows_query(&query.type_url) {
                return Err(OrchestrationError::validation(format!(
                    "query {} not allowed on {}",
                    query.type_url, self.name
                )));
            }
        }
        if queries.is_empty() {
            return Ok(vec![]);
        }

        debug!("Querying {} ({} requests)", self.name, queries.len());
        let results = self
            .retry
            .run("chain_query", RetryClass::Query, || self.transport.query(queries))
            .await?;
        if results.len() != queries.len() {
            return Err(OrchestrationError::MalformedResponse(format!(
                "{} answered {} of {} queries",
                self.name,
                results.len(),
                queries.len()
            )));
        }
        Ok(results)
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("chain_id", &self.config.chain_id)
            .finish()
    }
}
