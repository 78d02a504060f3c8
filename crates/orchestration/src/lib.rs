// Orchestration library
// Uniform accounts on remote chains, serialized per account, plus multi-hop transfers

pub mod accounts;
pub mod chains;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod query;
pub mod retry;
pub mod store;
pub mod transfer;
pub mod types;

// Re-export commonly used types for convenience
pub use accounts::{Account, AccountKey, AccountState, BatchEntry, BatchEntryOutcome, BatchReport, OperationTicket};
pub use chains::{Chain, ChainRegistry, ChainTransport, Fault, InMemoryChain, TransportError, TxAck};
pub use config::{ChainConfig, OrchestratorConfig};
pub use error::{OrchestrationError, Outcome, Result};
pub use metrics::OrchestratorMetrics;
pub use orchestrator::Orchestrator;
pub use store::{AccountRecord, AccountStore, JsonFileAccountStore, MemoryAccountStore};
pub use transfer::{SwapArgs, SwapOutput, SwapRequest, TransferComposer, TransferMsg, TransferReceipt};
pub use types::{Brand, ChainAddress, ChainAmount, Denom, DenomArg, ValidatorAddress};
