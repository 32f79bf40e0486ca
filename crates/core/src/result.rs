//! Rule outcomes and per-rule results.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::rule::RuleIdentifier;

/// Final outcome of one executable rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    /// The rule logic ran and the value satisfied it
    Passed,
    /// The rule logic ran and the value violated it
    Failed,
    /// The rule logic failed to run to completion
    Errored,
    /// A prerequisite rule did not pass; the logic was never invoked
    DependencyFailed,
    /// The rule was intentionally not run, e.g. after cancellation
    Skipped,
}

impl RuleOutcome {
    /// Whether this outcome clears dependency edges pointing at the rule.
    /// Only `Passed` does; every other outcome fails dependents.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, RuleOutcome::Passed)
    }
}

/// Immutable record of the outcome of one rule.
///
/// Produced exactly once per executable rule per run.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationRuleResult {
    /// The rule this result belongs to
    pub rule: RuleIdentifier,
    /// Final outcome
    pub outcome: RuleOutcome,
    /// Arbitrary data attached by the rule logic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure captured when the outcome is [`RuleOutcome::Errored`]
    #[serde(serialize_with = "error_chain", skip_serializing_if = "Option::is_none")]
    pub error: Option<Arc<anyhow::Error>>,
    /// Wall time spent evaluating the rule logic
    pub elapsed: Duration,
}

impl ValidationRuleResult {
    /// The value satisfied the rule.
    pub fn passed(rule: RuleIdentifier, elapsed: Duration) -> Self {
        Self { rule, outcome: RuleOutcome::Passed, data: None, error: None, elapsed }
    }

    /// The value violated the rule.
    pub fn failed(rule: RuleIdentifier, data: Option<serde_json::Value>, elapsed: Duration) -> Self {
        Self { rule, outcome: RuleOutcome::Failed, data, error: None, elapsed }
    }

    /// The rule logic failed to run to completion.
    pub fn errored(rule: RuleIdentifier, error: Arc<anyhow::Error>, elapsed: Duration) -> Self {
        Self { rule, outcome: RuleOutcome::Errored, data: None, error: Some(error), elapsed }
    }

    /// A prerequisite rule did not pass; the logic was never invoked.
    pub fn dependency_failed(rule: RuleIdentifier) -> Self {
        Self {
            rule,
            outcome: RuleOutcome::DependencyFailed,
            data: None,
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// The rule was intentionally not run.
    pub fn skipped(rule: RuleIdentifier) -> Self {
        Self { rule, outcome: RuleOutcome::Skipped, data: None, error: None, elapsed: Duration::ZERO }
    }
}

fn error_chain<S: Serializer>(
    error: &Option<Arc<anyhow::Error>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&format!("{error:#}")),
        None => serializer.serialize_none(),
    }
}

/// A second result was recorded for a rule that already holds one.
///
/// This is an internal scheduling invariant violation, reported
/// distinctly so it is never mistaken for a validation result.
#[derive(Debug, thiserror::Error)]
#[error("result already recorded for rule {0}")]
pub struct ResultAlreadyRecorded(pub RuleIdentifier);
