//! The all-rules executor - dependency-ordered scheduling of a full run.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use veritor_core::{
    ExecutableRule, ExecutableRuleAndDependencies, ResultAlreadyRecorded, RuleIdentifier,
    ValidationRuleResult,
};

use crate::executor::SingleRuleExecutor;
use crate::tracker::{DependencyTracking, RuleDependencyTracker};

/// Errors that abort a validation run during execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// No rule is runnable but results are still missing: the dependency
    /// graph contains a cycle that escaped compilation, or the tracker
    /// is buggy. Reported distinctly so it is never mistaken for a
    /// validation result.
    #[error("scheduler stalled; {} rule(s) can never run", .pending.len())]
    Stalled {
        /// Rules left without a result
        pending: Vec<RuleIdentifier>,
    },

    /// Cancellation was requested before every rule had a result
    #[error("validation run cancelled")]
    Cancelled,

    /// A result was recorded twice - an internal scheduling bug
    #[error(transparent)]
    DoubleResult(#[from] ResultAlreadyRecorded),

    /// A spawned rule task was aborted by the runtime
    #[error("rule task for {0} was aborted by the runtime")]
    TaskAborted(RuleIdentifier),
}

/// Drives every executable rule of a run to exactly one result.
///
/// A single loop queries the dependency tracker, dispatches whatever is
/// ready, records results between batches, and repeats. Rules marked
/// parallel-safe are spawned on the runtime (bounded by a semaphore)
/// when parallel execution is enabled; everything else runs one at a
/// time on the scheduler's own task.
#[derive(Debug, Clone)]
pub struct RuleScheduler {
    executor: SingleRuleExecutor,
    parallel: bool,
    max_concurrent: NonZeroUsize,
}

impl RuleScheduler {
    /// Scheduler that runs every rule sequentially.
    pub fn sequential() -> Self {
        Self {
            executor: SingleRuleExecutor::new(),
            parallel: false,
            max_concurrent: NonZeroUsize::MIN,
        }
    }

    /// Scheduler that dispatches parallel-eligible rules concurrently,
    /// at most `max_concurrent` at a time.
    pub fn parallel(max_concurrent: NonZeroUsize) -> Self {
        Self { executor: SingleRuleExecutor::new(), parallel: true, max_concurrent }
    }

    /// Execute every rule of the compiled set, honoring dependency order.
    ///
    /// Returns the flat collection of results once every rule holds one.
    pub async fn execute_all(
        &self,
        entries: &[ExecutableRuleAndDependencies],
        cancel: &CancellationToken,
    ) -> Result<Vec<ValidationRuleResult>, ExecutionError> {
        let tracker = RuleDependencyTracker::new(entries);
        self.execute_with_tracker(entries, &tracker, cancel).await
    }

    /// Execute with a caller-supplied tracker implementation.
    pub async fn execute_with_tracker(
        &self,
        entries: &[ExecutableRuleAndDependencies],
        tracker: &dyn DependencyTracking,
        cancel: &CancellationToken,
    ) -> Result<Vec<ValidationRuleResult>, ExecutionError> {
        let mut rounds = 0usize;
        loop {
            rounds += 1;

            // Rules whose prerequisites can no longer pass complete
            // without running. Recording those results can doom further
            // rules downstream, so drain to a fixpoint.
            loop {
                let doomed = tracker.rules_with_failed_dependencies();
                if doomed.is_empty() {
                    break;
                }
                debug!(rounds, count = doomed.len(), "recording dependency failures");
                for rule in doomed {
                    rule.record_result(ValidationRuleResult::dependency_failed(
                        rule.identifier().clone(),
                    ))?;
                }
            }

            if cancel.is_cancelled() {
                info!("cancellation requested, abandoning run");
                return Err(ExecutionError::Cancelled);
            }

            if entries.iter().all(|entry| entry.rule().has_result()) {
                break;
            }

            let ready = tracker.rules_ready_to_run();
            if ready.is_empty() {
                let pending: Vec<RuleIdentifier> = entries
                    .iter()
                    .filter(|entry| !entry.rule().has_result())
                    .map(|entry| entry.rule().identifier().clone())
                    .collect();
                error!(?pending, "no runnable rules but results are still missing");
                return Err(ExecutionError::Stalled { pending });
            }

            debug!(rounds, ready = ready.len(), "dispatching batch");
            self.run_batch(ready, cancel).await?;
        }

        info!(rules = entries.len(), rounds, "all rules completed");
        Ok(entries.iter().filter_map(|entry| entry.rule().result().cloned()).collect())
    }

    /// Run one batch of ready rules to completion and record results.
    ///
    /// Sequential rules run on this task while the concurrent portion
    /// is in flight; nothing re-queries the tracker until the whole
    /// batch has been recorded.
    async fn run_batch(
        &self,
        ready: Vec<Arc<ExecutableRule>>,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let (concurrent, sequential): (Vec<_>, Vec<_>) = ready
            .into_iter()
            .partition(|rule| self.parallel && rule.parallel_eligible());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent.get()));
        let mut in_flight: Vec<(Arc<ExecutableRule>, JoinHandle<ValidationRuleResult>)> =
            Vec::with_capacity(concurrent.len());

        for rule in concurrent {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let executor = self.executor;
            let task_rule = Arc::clone(&rule);
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    // The semaphore is never closed; treat a closed one
                    // as cancellation rather than crash the batch.
                    Err(_) => return ValidationRuleResult::skipped(task_rule.identifier().clone()),
                };
                executor.execute(&task_rule, &cancel).await
            });
            in_flight.push((rule, handle));
        }

        for rule in sequential {
            let result = self.executor.execute(&rule, cancel).await;
            rule.record_result(result)?;
        }

        for (rule, handle) in in_flight {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) if join_error.is_panic() => {
                    error!(rule = %rule.identifier(), "rule logic panicked");
                    ValidationRuleResult::errored(
                        rule.identifier().clone(),
                        Arc::new(anyhow::anyhow!("rule logic panicked")),
                        Duration::ZERO,
                    )
                }
                Err(_) => return Err(ExecutionError::TaskAborted(rule.identifier().clone())),
            };
            rule.record_result(result)?;
        }

        Ok(())
    }
}
