// Error taxonomy for orchestration operations
// Every state-changing submission resolves to one of these outcomes

use thiserror::Error;

use crate::accounts::BatchReport;
use crate::chains::TransportError;
use crate::store::StoreError;

/// Errors surfaced by the orchestration layer
#[derive(Error, Debug, Clone)]
pub enum OrchestrationError {
    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Chain already registered: {0}")]
    ChainAlreadyRegistered(String),

    #[error("Account closed: {0}")]
    AccountClosed(String),

    #[error("Ambiguous outcome for {operation} on {account}: {reason}")]
    AmbiguousOutcome {
        account: String,
        operation: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Denom mismatch: {left} vs {right}")]
    DenomMismatch { left: String, right: String },

    #[error("Batch partially failed: {} succeeded, {} failed, {} ambiguous",
        .0.succeeded().count(), .0.failed().count(), .0.ambiguous().count())]
    PartialBatchFailure(BatchReport),

    #[error("Remote chain rejected transaction (code {code}): {log}")]
    RemoteRejected { code: u32, log: String },

    /// Known not to have reached the remote chain
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation {0} cancelled before dispatch")]
    Cancelled(u64),

    #[error("Operation queue full for {0}")]
    QueueFull(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Store error: {0}")]
    Store(String),
}

/// What the caller can conclude about the remote effect of a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing reached the remote chain, or the chain refused it
    KnownFailed,
    /// The remote effect may or may not have happened; reconcile with a query
    Ambiguous,
    /// Some entries of a batch took effect and some did not
    Mixed,
}

impl OrchestrationError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Classify the error by what is known about the remote state
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::AmbiguousOutcome { .. } => Outcome::Ambiguous,
            Self::PartialBatchFailure(report) => {
                if report.succeeded().count() == 0 && report.ambiguous().count() == 0 {
                    Outcome::KnownFailed
                } else {
                    Outcome::Mixed
                }
            }
            _ => Outcome::KnownFailed,
        }
    }

    /// Whether the same request may be resubmitted without risking a duplicate effect
    pub fn is_retry_safe(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::QueueFull(_) | Self::Cancelled(_))
    }
}

impl From<StoreError> for OrchestrationError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl OrchestrationError {
    /// Convert a transport failure of `operation` on `account`.
    /// Timeouts and lost connections stay ambiguous.
    pub fn from_transport(err: TransportError, account: &str, operation: &str) -> Self {
        match err {
            TransportError::Rejected { code, log } => Self::RemoteRejected { code, log },
            err if err.is_ambiguous() => Self::AmbiguousOutcome {
                account: account.to_string(),
                operation: operation.to_string(),
                reason: err.to_string(),
            },
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<TransportError> for OrchestrationError {
    fn from(err: TransportError) -> Self {
        Self::from_transport(err, "unknown", "transport call")
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        let ambiguous = OrchestrationError::AmbiguousOutcome {
            account: "celestia1abc".to_string(),
            operation: "delegate".to_string(),
            reason: "timed out".to_string(),
        };
        assert_eq!(ambiguous.outcome(), Outcome::Ambiguous);
        assert!(!ambiguous.is_retry_safe());

        let rejected: OrchestrationError = TransportError::Rejected {
            code: 5,
            log: "insufficient funds".to_string(),
        }
        .into();
        assert!(matches!(rejected, OrchestrationError::RemoteRejected { code: 5, .. }));
        assert_eq!(rejected.outcome(), Outcome::KnownFailed);

        let not_sent: OrchestrationError =
            TransportError::NotSubmitted("connection refused".to_string()).into();
        assert!(not_sent.is_retry_safe());
    }

    #[test]
    fn test_lost_replies_are_never_retry_safe() {
        for err in [TransportError::Timeout, TransportError::ConnectionLost("eof".to_string())] {
            let err = OrchestrationError::from_transport(err, "celestia/alice", "create_account");
            assert!(matches!(err, OrchestrationError::AmbiguousOutcome { .. }));
            assert_eq!(err.outcome(), Outcome::Ambiguous);
            assert!(!err.is_retry_safe());
        }

        let converted: OrchestrationError = TransportError::Timeout.into();
        assert_eq!(converted.outcome(), Outcome::Ambiguous);
    }
}
