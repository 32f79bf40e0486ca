//! Single-rule execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use veritor_core::{ExecutableRule, RuleContext, ValidationRuleResult, Verdict};

/// Executes one rule's logic against its resolved value.
///
/// Usable on its own for tooling and tests; the scheduler drives it
/// for full runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleRuleExecutor;

impl SingleRuleExecutor {
    /// Create an executor.
    pub fn new() -> Self {
        Self
    }

    /// Produce exactly one result for `rule`.
    ///
    /// Never fails: rule logic raising an error is captured as an
    /// Errored result so the scheduler always makes progress. A token
    /// already cancelled before invocation yields a Skipped result;
    /// logic that has started runs to completion and may observe the
    /// same token through its context.
    pub async fn execute(
        &self,
        rule: &ExecutableRule,
        cancel: &CancellationToken,
    ) -> ValidationRuleResult {
        let identifier = rule.identifier().clone();

        if cancel.is_cancelled() {
            debug!(rule = %identifier, "cancellation requested, skipping rule");
            return ValidationRuleResult::skipped(identifier);
        }

        let value = match rule.validated_value().value() {
            Some(value) => value.clone(),
            None => {
                // Rules on unresolvable values are pre-recorded by the
                // compiler; reaching this point means the plan is broken.
                warn!(rule = %identifier, "rule dispatched against an unresolved value");
                return ValidationRuleResult::errored(
                    identifier,
                    Arc::new(anyhow::anyhow!("validated value was never resolved")),
                    Duration::ZERO,
                );
            }
        };

        let ancestors = rule.validated_value().ancestors();
        let parent_value = ancestors.first().and_then(|ancestor| ancestor.value()).cloned();
        let ctx = RuleContext::new(identifier.clone(), ancestors, cancel.clone());

        let started = Instant::now();
        match rule.logic().evaluate(&value, parent_value.as_ref(), &ctx).await {
            Ok(Verdict::Pass) => {
                debug!(rule = %identifier, "rule passed");
                ValidationRuleResult::passed(identifier, started.elapsed())
            }
            Ok(Verdict::Fail { data }) => {
                debug!(rule = %identifier, "rule failed");
                ValidationRuleResult::failed(identifier, data, started.elapsed())
            }
            Err(error) => {
                debug!(rule = %identifier, error = %error, "rule logic raised an error");
                ValidationRuleResult::errored(identifier, Arc::new(error), started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;
    use veritor_core::{
        ManifestValue, ParentScopedRule, ResolvedValue, RuleIdentifier, RuleLogic, RuleOutcome,
        ValidatedValue, Value, ValuePath, ValueRule,
    };

    struct LongerThan {
        min: usize,
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ValueRule for LongerThan {
        async fn evaluate(&self, value: &Value, _ctx: &RuleContext) -> anyhow::Result<Verdict> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let text = value
                .downcast_ref::<String>()
                .ok_or_else(|| anyhow::anyhow!("expected a string"))?;
            Ok(if text.len() > self.min {
                Verdict::pass()
            } else {
                Verdict::fail_with(serde_json::json!({ "min": self.min, "len": text.len() }))
            })
        }
    }

    struct ContainedInParent;

    #[async_trait]
    impl ParentScopedRule for ContainedInParent {
        async fn evaluate(
            &self,
            _value: &Value,
            parent: Option<&Value>,
            _ctx: &RuleContext,
        ) -> anyhow::Result<Verdict> {
            Ok(if parent.is_some() { Verdict::pass() } else { Verdict::fail() })
        }
    }

    fn string_value(text: &str) -> Arc<ValidatedValue> {
        Arc::new(ValidatedValue::new(
            Arc::new(ManifestValue::root()),
            ResolvedValue::Success(Arc::new(text.to_string())),
            None,
            ValuePath::root().member("name"),
            None,
            Weak::new(),
        ))
    }

    fn executable(logic: RuleLogic, value: Arc<ValidatedValue>) -> ExecutableRule {
        ExecutableRule::new(
            RuleIdentifier::new(logic.kind(), None, value.path().clone()),
            value,
            logic,
        )
    }

    #[tokio::test]
    async fn test_pass_maps_to_passed() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let rule = executable(
            RuleLogic::for_value(LongerThan { min: 2, invocations: Arc::clone(&invocations) }),
            string_value("Ada"),
        );

        let result = SingleRuleExecutor::new().execute(&rule, &CancellationToken::new()).await;
        assert_eq!(result.outcome, RuleOutcome::Passed);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fail_maps_to_failed_with_data() {
        let rule = executable(
            RuleLogic::for_value(LongerThan { min: 10, invocations: Arc::new(AtomicUsize::new(0)) }),
            string_value("Ada"),
        );

        let result = SingleRuleExecutor::new().execute(&rule, &CancellationToken::new()).await;
        assert_eq!(result.outcome, RuleOutcome::Failed);
        assert_eq!(result.data, Some(serde_json::json!({ "min": 10, "len": 3 })));
    }

    #[tokio::test]
    async fn test_error_maps_to_errored_with_the_error_captured() {
        let value = Arc::new(ValidatedValue::new(
            Arc::new(ManifestValue::root()),
            ResolvedValue::Success(Arc::new(42_u32)),
            None,
            ValuePath::root(),
            None,
            Weak::new(),
        ));
        let rule = executable(
            RuleLogic::for_value(LongerThan { min: 1, invocations: Arc::new(AtomicUsize::new(0)) }),
            value,
        );

        let result = SingleRuleExecutor::new().execute(&rule, &CancellationToken::new()).await;
        assert_eq!(result.outcome, RuleOutcome::Errored);
        assert!(result.error.unwrap().to_string().contains("expected a string"));
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_without_invoking_logic() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let rule = executable(
            RuleLogic::for_value(LongerThan { min: 2, invocations: Arc::clone(&invocations) }),
            string_value("Ada"),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = SingleRuleExecutor::new().execute(&rule, &cancel).await;
        assert_eq!(result.outcome, RuleOutcome::Skipped);
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parent_scoped_rule_receives_the_parent_value() {
        let parent = Arc::new(ValidatedValue::new(
            Arc::new(ManifestValue::root()),
            ResolvedValue::Success(Arc::new("parent".to_string())),
            None,
            ValuePath::root(),
            None,
            Weak::new(),
        ));
        let child = Arc::new(ValidatedValue::new(
            Arc::new(ManifestValue::root()),
            ResolvedValue::Success(Arc::new("child".to_string())),
            None,
            ValuePath::root().member("child"),
            None,
            Arc::downgrade(&parent),
        ));
        let rule = executable(RuleLogic::in_parent(ContainedInParent), child);

        let result = SingleRuleExecutor::new().execute(&rule, &CancellationToken::new()).await;
        assert_eq!(result.outcome, RuleOutcome::Passed);
    }
}
