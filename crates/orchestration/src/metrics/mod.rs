// Metrics and monitoring

use prometheus::{Counter, Histogram, IntGauge, Registry};
use std::sync::Arc;

/// Orchestrator metrics
pub struct OrchestratorMetrics {
    // Operation metrics
    pub operations_submitted: Counter,
    pub operations_succeeded: Counter,
    pub operations_failed: Counter,
    pub ambiguous_outcomes: Counter,
    pub dispatch_duration: Histogram,
    pub queued_operations: IntGauge,

    // Account metrics
    pub accounts_created: Counter,

    // Transport metrics
    pub retries: Counter,

    registry: Arc<Registry>,
}

impl OrchestratorMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_submitted = Counter::new("orchestration_operations_submitted_total", "Operations accepted by account executors")?;
        let operations_succeeded = Counter::new("orchestration_operations_succeeded_total", "Operations acknowledged by the remote chain")?;
        let operations_failed = Counter::new("orchestration_operations_failed_total", "Operations known to have failed")?;
        let ambiguous_outcomes = Counter::new("orchestration_ambiguous_outcomes_total", "Operations whose remote outcome is unknown")?;
        let dispatch_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new("orchestration_dispatch_duration_seconds", "Time from dispatch to acknowledgment")
        )?;
        let queued_operations = IntGauge::new("orchestration_queued_operations", "Operations waiting across all executors")?;
        let accounts_created = Counter::new("orchestration_accounts_created_total", "Remote accounts created")?;
        let retries = Counter::new("orchestration_transport_retries_total", "Transport calls retried after a failure")?;

        registry.register(Box::new(operations_submitted.clone()))?;
        registry.register(Box::new(operations_succeeded.clone()))?;
        registry.register(Box::new(operations_failed.clone()))?;
        registry.register(Box::new(ambiguous_outcomes.clone()))?;
        registry.register(Box::new(dispatch_duration.clone()))?;
        registry.register(Box::new(queued_operations.clone()))?;
        registry.register(Box::new(accounts_created.clone()))?;
        registry.register(Box::new(retries.clone()))?;

        Ok(Self {
            operations_submitted,
            operations_succeeded,
            operations_failed,
            ambiguous_outcomes,
            dispatch_duration,
            queued_operations,
            accounts_created,
            retries,
            registry,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}
