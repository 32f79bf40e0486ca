//! Dependency tracking - which rules may run now, which can never run.

use std::sync::Arc;

use veritor_core::{ExecutableRule, ExecutableRuleAndDependencies};

/// Point-in-time queries over one run's executable rule set.
///
/// Exposed as a trait so alternative scheduler implementations can
/// substitute their own bookkeeping.
pub trait DependencyTracking: Send + Sync {
    /// Rules with no result yet whose dependencies, if any, all hold a
    /// Passed result. The returned set is unordered work.
    fn rules_ready_to_run(&self) -> Vec<Arc<ExecutableRule>>;

    /// Rules with no result yet where at least one dependency holds a
    /// result other than Passed.
    ///
    /// This is a one-shot query: the caller records a DependencyFailed
    /// result for each returned rule and queries again, because those
    /// records can doom further rules downstream.
    fn rules_with_failed_dependencies(&self) -> Vec<Arc<ExecutableRule>>;
}

/// Tracker that lazily re-scans the rule set on every query.
///
/// Results live on the rules themselves, so recording one requires no
/// notification here; the next query observes it.
#[derive(Debug)]
pub struct RuleDependencyTracker<'a> {
    entries: &'a [ExecutableRuleAndDependencies],
}

impl<'a> RuleDependencyTracker<'a> {
    /// Create a tracker over a compiled rule set.
    pub fn new(entries: &'a [ExecutableRuleAndDependencies]) -> Self {
        Self { entries }
    }
}

impl DependencyTracking for RuleDependencyTracker<'_> {
    fn rules_ready_to_run(&self) -> Vec<Arc<ExecutableRule>> {
        self.entries
            .iter()
            .filter(|entry| !entry.rule().has_result())
            .filter(|entry| {
                entry.depends_on().iter().all(|dependency| {
                    dependency
                        .result()
                        .is_some_and(|result| result.outcome.satisfies_dependents())
                })
            })
            .map(|entry| Arc::clone(entry.rule()))
            .collect()
    }

    fn rules_with_failed_dependencies(&self) -> Vec<Arc<ExecutableRule>> {
        self.entries
            .iter()
            .filter(|entry| !entry.rule().has_result())
            .filter(|entry| {
                entry.depends_on().iter().any(|dependency| {
                    dependency
                        .result()
                        .is_some_and(|result| !result.outcome.satisfies_dependents())
                })
            })
            .map(|entry| Arc::clone(entry.rule()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Weak;
    use std::time::Duration;
    use veritor_core::{
        ManifestValue, ResolvedValue, RuleContext, RuleIdentifier, RuleLogic, ValidatedValue,
        ValidationRuleResult, Value, ValuePath, ValueRule, Verdict,
    };

    struct Noop;

    #[async_trait]
    impl ValueRule for Noop {
        async fn evaluate(&self, _value: &Value, _ctx: &RuleContext) -> anyhow::Result<Verdict> {
            Ok(Verdict::pass())
        }
    }

    fn rule(name: &str) -> Arc<ExecutableRule> {
        let value = Arc::new(ValidatedValue::new(
            Arc::new(ManifestValue::root()),
            ResolvedValue::Success(Arc::new(())),
            None,
            ValuePath::root(),
            None,
            Weak::new(),
        ));
        Arc::new(ExecutableRule::new(
            RuleIdentifier::new("Noop", Some(name.into()), ValuePath::root()),
            value,
            RuleLogic::for_value(Noop),
        ))
    }

    fn names(rules: &[Arc<ExecutableRule>]) -> Vec<String> {
        let mut names: Vec<String> = rules
            .iter()
            .filter_map(|r| r.identifier().name.clone())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_rules_without_dependencies_are_ready_immediately() {
        let a = rule("a");
        let b = rule("b");
        let entries = vec![
            ExecutableRuleAndDependencies::new(Arc::clone(&a), vec![], vec![Arc::clone(&b)]),
            ExecutableRuleAndDependencies::new(Arc::clone(&b), vec![Arc::clone(&a)], vec![]),
        ];

        let tracker = RuleDependencyTracker::new(&entries);
        assert_eq!(names(&tracker.rules_ready_to_run()), vec!["a"]);
        assert!(tracker.rules_with_failed_dependencies().is_empty());
    }

    #[test]
    fn test_passed_dependency_unblocks_the_dependent() {
        let a = rule("a");
        let b = rule("b");
        let entries = vec![
            ExecutableRuleAndDependencies::new(Arc::clone(&a), vec![], vec![Arc::clone(&b)]),
            ExecutableRuleAndDependencies::new(Arc::clone(&b), vec![Arc::clone(&a)], vec![]),
        ];
        let tracker = RuleDependencyTracker::new(&entries);

        a.record_result(ValidationRuleResult::passed(a.identifier().clone(), Duration::ZERO))
            .unwrap();
        assert_eq!(names(&tracker.rules_ready_to_run()), vec!["b"]);
    }

    #[test]
    fn test_completed_rules_are_never_returned() {
        let a = rule("a");
        let entries = vec![ExecutableRuleAndDependencies::new(Arc::clone(&a), vec![], vec![])];
        let tracker = RuleDependencyTracker::new(&entries);

        a.record_result(ValidationRuleResult::passed(a.identifier().clone(), Duration::ZERO))
            .unwrap();
        assert!(tracker.rules_ready_to_run().is_empty());
        assert!(tracker.rules_with_failed_dependencies().is_empty());
    }

    #[test]
    fn test_any_non_passed_dependency_fails_the_dependent() {
        let make_failing: [fn(RuleIdentifier) -> ValidationRuleResult; 4] = [
            |id: RuleIdentifier| ValidationRuleResult::failed(id, None, Duration::ZERO),
            |id: RuleIdentifier| {
                ValidationRuleResult::errored(id, Arc::new(anyhow::anyhow!("boom")), Duration::ZERO)
            },
            |id: RuleIdentifier| ValidationRuleResult::dependency_failed(id),
            |id: RuleIdentifier| ValidationRuleResult::skipped(id),
        ];

        for make in make_failing {
            let a = rule("a");
            let b = rule("b");
            let entries = vec![
                ExecutableRuleAndDependencies::new(Arc::clone(&a), vec![], vec![Arc::clone(&b)]),
                ExecutableRuleAndDependencies::new(Arc::clone(&b), vec![Arc::clone(&a)], vec![]),
            ];
            let tracker = RuleDependencyTracker::new(&entries);

            a.record_result(make(a.identifier().clone())).unwrap();
            assert!(tracker.rules_ready_to_run().is_empty());
            assert_eq!(names(&tracker.rules_with_failed_dependencies()), vec!["b"]);
        }
    }

    #[test]
    fn test_transitive_failure_needs_requery() {
        // c depends on b depends on a; a fails. Only b is doomed until
        // b's DependencyFailed result is recorded.
        let a = rule("a");
        let b = rule("b");
        let c = rule("c");
        let entries = vec![
            ExecutableRuleAndDependencies::new(Arc::clone(&a), vec![], vec![Arc::clone(&b)]),
            ExecutableRuleAndDependencies::new(
                Arc::clone(&b),
                vec![Arc::clone(&a)],
                vec![Arc::clone(&c)],
            ),
            ExecutableRuleAndDependencies::new(Arc::clone(&c), vec![Arc::clone(&b)], vec![]),
        ];
        let tracker = RuleDependencyTracker::new(&entries);

        a.record_result(ValidationRuleResult::failed(a.identifier().clone(), None, Duration::ZERO))
            .unwrap();
        assert_eq!(names(&tracker.rules_with_failed_dependencies()), vec!["b"]);

        b.record_result(ValidationRuleResult::dependency_failed(b.identifier().clone()))
            .unwrap();
        assert_eq!(names(&tracker.rules_with_failed_dependencies()), vec!["c"]);
    }
}
