//! Compiling the validated-value tree into the flat executable rule set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use veritor_core::{
    ExecutableRule, ExecutableRuleAndDependencies, ResolvedValue, RuleIdentifier, ValidatedValue,
    ValidationRuleResult,
};

/// Configuration errors detected while compiling the rule set.
///
/// All of these are manifest-authoring bugs: they abort the run before
/// any rule logic is invoked.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Two rules on the same value share an identifier
    #[error("duplicate rule {0}")]
    DuplicateRule(RuleIdentifier),

    /// A dependency points above the top of the value tree
    #[error("rule {rule} depends on '{dependency}' {hops} level(s) up, but no such ancestor exists")]
    MissingAncestor {
        /// The rule declaring the dependency
        rule: RuleIdentifier,
        /// Display name of the missing prerequisite
        dependency: String,
        /// Declared ancestor distance
        hops: usize,
    },

    /// A dependency names a rule that does not exist on the target value
    #[error("rule {rule} depends on '{dependency}', which is not defined on the target value")]
    UnresolvedDependency {
        /// The rule declaring the dependency
        rule: RuleIdentifier,
        /// Display name of the missing prerequisite
        dependency: String,
    },

    /// The dependency relation contains a cycle
    #[error("cyclic rule dependencies among {rules:?}")]
    CyclicDependencies {
        /// Rules participating in (or downstream of) the cycle
        rules: Vec<RuleIdentifier>,
    },
}

/// Compile the validated-value tree into the executable rule set.
///
/// One executable rule is created per rule definition per resolved
/// value. Dependency identifiers (display name + ancestor hops) are
/// resolved here, once, into direct references; the scheduler never
/// performs lookups. Rules attached to values whose resolution failed
/// are pre-recorded as Errored so the scheduler propagates their
/// dependency failures without invoking any logic.
pub fn compile(
    root: &Arc<ValidatedValue>,
) -> Result<Vec<ExecutableRuleAndDependencies>, CompileError> {
    let mut nodes = Vec::new();
    collect_nodes(root, &mut nodes);

    // Pass 1: create the rules and index them by (value, display name).
    let mut rules: Vec<Arc<ExecutableRule>> = Vec::new();
    let mut definitions = Vec::new();
    let mut by_value: HashMap<usize, HashMap<String, usize>> = HashMap::new();

    for node in &nodes {
        if matches!(node.resolution(), ResolvedValue::Ignored) {
            continue;
        }
        for definition in &node.descriptor().rules {
            let identifier = RuleIdentifier::new(
                definition.logic.kind(),
                definition.name.clone(),
                node.path().clone(),
            );
            let index = rules.len();
            let named = by_value
                .entry(Arc::as_ptr(node) as usize)
                .or_default()
                .insert(definition.display_name().to_string(), index);
            if named.is_some() {
                return Err(CompileError::DuplicateRule(identifier));
            }

            let rule = Arc::new(ExecutableRule::new(
                identifier,
                Arc::clone(node),
                definition.logic.clone(),
            ));
            if let Some(error) = node.resolution().error() {
                // A freshly created rule has no result yet.
                let _ = rule.record_result(ValidationRuleResult::errored(
                    rule.identifier().clone(),
                    Arc::clone(error),
                    Duration::ZERO,
                ));
            }
            rules.push(rule);
            definitions.push((Arc::clone(node), definition));
        }
    }

    // Pass 2: resolve dependency identifiers into direct edges.
    let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); rules.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); rules.len()];

    for (index, (node, definition)) in definitions.iter().enumerate() {
        for dependency in &definition.dependencies {
            let target = if dependency.ancestor_hops == 0 {
                Arc::clone(node)
            } else {
                node.ancestors()
                    .into_iter()
                    .nth(dependency.ancestor_hops - 1)
                    .ok_or_else(|| CompileError::MissingAncestor {
                        rule: rules[index].identifier().clone(),
                        dependency: dependency.rule.clone(),
                        hops: dependency.ancestor_hops,
                    })?
            };

            let prerequisite = by_value
                .get(&(Arc::as_ptr(&target) as usize))
                .and_then(|named| named.get(&dependency.rule))
                .copied()
                .ok_or_else(|| CompileError::UnresolvedDependency {
                    rule: rules[index].identifier().clone(),
                    dependency: dependency.rule.clone(),
                })?;

            depends_on[index].push(prerequisite);
            dependents[prerequisite].push(index);
        }
    }

    reject_cycles(&rules, &depends_on, &dependents)?;
    debug!(rules = rules.len(), "rule set compiled");

    Ok(rules
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            ExecutableRuleAndDependencies::new(
                Arc::clone(rule),
                depends_on[index].iter().map(|&dep| Arc::clone(&rules[dep])).collect(),
                dependents[index].iter().map(|&dep| Arc::clone(&rules[dep])).collect(),
            )
        })
        .collect())
}

fn collect_nodes(node: &Arc<ValidatedValue>, out: &mut Vec<Arc<ValidatedValue>>) {
    out.push(Arc::clone(node));
    for child in node.children() {
        collect_nodes(child, out);
    }
    if let Some(companion) = node.collection() {
        for item in companion.children() {
            collect_nodes(item, out);
        }
    }
}

/// Kahn's algorithm over the dependency edges; anything that cannot be
/// ordered participates in (or sits downstream of) a cycle.
fn reject_cycles(
    rules: &[Arc<ExecutableRule>],
    depends_on: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> Result<(), CompileError> {
    let mut remaining: Vec<usize> = depends_on.iter().map(Vec::len).collect();
    let mut queue: Vec<usize> = remaining
        .iter()
        .enumerate()
        .filter(|(_, &count)| count == 0)
        .map(|(index, _)| index)
        .collect();

    let mut ordered = 0;
    while let Some(index) = queue.pop() {
        ordered += 1;
        for &dependent in &dependents[index] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                queue.push(dependent);
            }
        }
    }

    if ordered == rules.len() {
        return Ok(());
    }

    let cyclic = remaining
        .iter()
        .enumerate()
        .filter(|(_, &count)| count > 0)
        .map(|(index, _)| rules[index].identifier().clone())
        .collect();
    Err(CompileError::CyclicDependencies { rules: cyclic })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ValueResolver;
    use crate::tree::TreeBuilder;
    use async_trait::async_trait;
    use veritor_core::{
        accessor, AccessorFailurePolicy, DependencyRef, Manifest, ManifestValue, RuleContext,
        RuleDefinition, RuleLogic, RuleOutcome, Value, ValueRule, Verdict,
    };

    struct NotEmpty;

    #[async_trait]
    impl ValueRule for NotEmpty {
        async fn evaluate(&self, _value: &Value, _ctx: &RuleContext) -> anyhow::Result<Verdict> {
            Ok(Verdict::pass())
        }
    }

    struct MaxLength;

    #[async_trait]
    impl ValueRule for MaxLength {
        async fn evaluate(&self, _value: &Value, _ctx: &RuleContext) -> anyhow::Result<Verdict> {
            Ok(Verdict::pass())
        }
    }

    struct Subject {
        name: String,
    }

    fn subject() -> Value {
        Arc::new(Subject { name: "Ada".into() })
    }

    fn build(manifest: &Manifest) -> Arc<ValidatedValue> {
        TreeBuilder::new(ValueResolver::default()).build(manifest, subject()).unwrap()
    }

    fn name_value() -> ManifestValue {
        ManifestValue::member("name", accessor(|s: &Subject| s.name.clone()))
    }

    #[test]
    fn test_one_rule_per_definition_per_value() {
        let manifest = Manifest::new(
            ManifestValue::root().with_child(
                name_value()
                    .with_rule(RuleDefinition::new(RuleLogic::for_value(NotEmpty)))
                    .with_rule(RuleDefinition::new(RuleLogic::for_value(MaxLength))),
            ),
        );

        let entries = compile(&build(&manifest)).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.rule().has_result()));
    }

    #[test]
    fn test_same_value_dependency_edges_both_directions() {
        let manifest = Manifest::new(
            ManifestValue::root().with_child(
                name_value()
                    .with_rule(RuleDefinition::new(RuleLogic::for_value(NotEmpty)))
                    .with_rule(
                        RuleDefinition::new(RuleLogic::for_value(MaxLength))
                            .depends_on(DependencyRef::same_value("NotEmpty")),
                    ),
            ),
        );

        let entries = compile(&build(&manifest)).unwrap();
        let not_empty = entries.iter().find(|e| e.rule().identifier().kind == "NotEmpty").unwrap();
        let max_length = entries.iter().find(|e| e.rule().identifier().kind == "MaxLength").unwrap();

        assert_eq!(max_length.depends_on().len(), 1);
        assert!(Arc::ptr_eq(&max_length.depends_on()[0], not_empty.rule()));
        assert_eq!(not_empty.dependents().len(), 1);
        assert!(Arc::ptr_eq(&not_empty.dependents()[0], max_length.rule()));
    }

    #[test]
    fn test_ancestor_dependency_resolves_upwards() {
        let manifest = Manifest::new(
            ManifestValue::root()
                .with_rule(RuleDefinition::named("root-shape", RuleLogic::for_value(NotEmpty)))
                .with_child(name_value().with_rule(
                    RuleDefinition::new(RuleLogic::for_value(MaxLength))
                        .depends_on(DependencyRef::ancestor("root-shape", 1)),
                )),
        );

        let entries = compile(&build(&manifest)).unwrap();
        let max_length = entries.iter().find(|e| e.rule().identifier().kind == "MaxLength").unwrap();
        assert_eq!(max_length.depends_on().len(), 1);
        assert_eq!(max_length.depends_on()[0].identifier().name.as_deref(), Some("root-shape"));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let manifest = Manifest::new(
            ManifestValue::root().with_child(
                name_value()
                    .with_rule(RuleDefinition::new(RuleLogic::for_value(NotEmpty)))
                    .with_rule(RuleDefinition::new(RuleLogic::for_value(NotEmpty))),
            ),
        );

        let err = compile(&build(&manifest)).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateRule(_)));
    }

    #[test]
    fn test_unresolved_dependency_rejected() {
        let manifest = Manifest::new(
            ManifestValue::root().with_child(name_value().with_rule(
                RuleDefinition::new(RuleLogic::for_value(MaxLength))
                    .depends_on(DependencyRef::same_value("NoSuchRule")),
            )),
        );

        let err = compile(&build(&manifest)).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedDependency { .. }));
    }

    #[test]
    fn test_missing_ancestor_rejected() {
        let manifest = Manifest::new(
            ManifestValue::root().with_rule(
                RuleDefinition::new(RuleLogic::for_value(NotEmpty))
                    .depends_on(DependencyRef::ancestor("anything", 3)),
            ),
        );

        let err = compile(&build(&manifest)).unwrap_err();
        assert!(matches!(err, CompileError::MissingAncestor { hops: 3, .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let manifest = Manifest::new(
            ManifestValue::root().with_child(
                name_value()
                    .with_rule(
                        RuleDefinition::new(RuleLogic::for_value(NotEmpty))
                            .depends_on(DependencyRef::same_value("MaxLength")),
                    )
                    .with_rule(
                        RuleDefinition::new(RuleLogic::for_value(MaxLength))
                            .depends_on(DependencyRef::same_value("NotEmpty")),
                    ),
            ),
        );

        let err = compile(&build(&manifest)).unwrap_err();
        match err {
            CompileError::CyclicDependencies { rules } => assert_eq!(rules.len(), 2),
            other => panic!("expected cycle rejection, got {other}"),
        }
    }

    #[test]
    fn test_rules_on_failed_values_are_pre_errored() {
        let failing = ManifestValue::member(
            "name",
            Arc::new(|_: &Value| Err(anyhow::anyhow!("lazy proxy not loaded"))),
        )
        .with_accessor_failure(AccessorFailurePolicy::TreatAsError)
        .with_rule(RuleDefinition::new(RuleLogic::for_value(NotEmpty)))
        .with_rule(RuleDefinition::new(RuleLogic::for_value(MaxLength)));

        let manifest = Manifest::new(ManifestValue::root().with_child(failing));
        let entries = compile(&build(&manifest)).unwrap();

        assert_eq!(entries.len(), 2);
        for entry in &entries {
            let result = entry.rule().result().unwrap();
            assert_eq!(result.outcome, RuleOutcome::Errored);
            assert!(result.error.is_some());
        }
    }
}
