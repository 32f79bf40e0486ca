//! The validation engine facade - resolve, compile, execute.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use veritor_core::{
    AccessorFailurePolicy, Manifest, RuleOutcome, RunId, ValidationRuleResult, Value,
};
use veritor_resolve::{compile, CompileError, ResolveError, TreeBuilder, ValueResolver};

use crate::scheduler::{ExecutionError, RuleScheduler};

/// Errors that abort a validation run.
///
/// Everything here is either a configuration error (the manifest is
/// wrong) or an execution-level failure; ordinary rule failures never
/// surface as errors, they are results.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A value could not be resolved and the effective policy is `Propagate`
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The manifest's rule set is misconfigured
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The scheduler could not drive every rule to a result
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Options for a validation run.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Whether parallel-eligible rules run concurrently
    pub enable_parallel_rules: bool,
    /// Concurrency bound for parallel-eligible rules
    pub max_concurrent_rules: NonZeroUsize,
    /// Run-level accessor-failure policy; per-value overrides win
    pub accessor_failure_policy: AccessorFailurePolicy,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            enable_parallel_rules: false,
            max_concurrent_rules: NonZeroUsize::new(4).unwrap(),
            accessor_failure_policy: AccessorFailurePolicy::default(),
        }
    }
}

/// Validates object graphs against a declarative manifest.
///
/// Ties the pipeline together for one call: build the validated-value
/// tree, compile the executable rule set, schedule every rule to a
/// result.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    options: ValidationOptions,
}

impl Validator {
    /// Create a validator with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run options.
    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate `subject` against `manifest`.
    pub async fn validate(
        &self,
        manifest: &Manifest,
        subject: Value,
    ) -> Result<ValidationRunResult, ValidationError> {
        self.validate_with_cancellation(manifest, subject, CancellationToken::new()).await
    }

    /// Validate with a caller-supplied cancellation signal.
    ///
    /// Once cancellation is requested no new rules are dispatched and
    /// the run returns [`ExecutionError::Cancelled`] instead of a
    /// partial result collection.
    pub async fn validate_with_cancellation(
        &self,
        manifest: &Manifest,
        subject: Value,
        cancel: CancellationToken,
    ) -> Result<ValidationRunResult, ValidationError> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        info!(%run_id, "starting validation run");

        let resolver = ValueResolver::new(self.options.accessor_failure_policy);
        let tree = TreeBuilder::new(resolver).build(manifest, subject)?;
        let plan = compile(&tree)?;
        debug!(%run_id, rules = plan.len(), "rule set compiled");

        let scheduler = if self.options.enable_parallel_rules {
            RuleScheduler::parallel(self.options.max_concurrent_rules)
        } else {
            RuleScheduler::sequential()
        };
        let results = scheduler.execute_all(&plan, &cancel).await?;

        let run = ValidationRunResult { run_id, started_at, finished_at: Utc::now(), results };
        info!(
            %run_id,
            rules = run.results.len(),
            passed = run.passed(),
            "validation run finished"
        );
        Ok(run)
    }
}

/// Flat record of one completed validation run.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRunResult {
    /// Unique id of this run
    pub run_id: RunId,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// One result per executable rule
    pub results: Vec<ValidationRuleResult>,
}

impl ValidationRunResult {
    /// Whether every rule passed.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|result| result.outcome == RuleOutcome::Passed)
    }

    /// Results with an outcome other than Passed.
    pub fn failures(&self) -> impl Iterator<Item = &ValidationRuleResult> {
        self.results.iter().filter(|result| result.outcome != RuleOutcome::Passed)
    }
}
