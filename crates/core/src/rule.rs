//! Rule contracts, executable rules, and their dependency wrappers.

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::result::{ResultAlreadyRecorded, ValidationRuleResult};
use crate::value::{ValidatedValue, Value, ValuePath};

/// Outcome signalled by rule logic that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The value satisfies the rule
    Pass,
    /// The value violates the rule
    Fail {
        /// Arbitrary data describing the violation
        data: Option<serde_json::Value>,
    },
}

impl Verdict {
    /// The value satisfies the rule.
    pub fn pass() -> Self {
        Self::Pass
    }

    /// The value violates the rule.
    pub fn fail() -> Self {
        Self::Fail { data: None }
    }

    /// The value violates the rule, with data describing the violation.
    pub fn fail_with(data: impl Into<serde_json::Value>) -> Self {
        Self::Fail { data: Some(data.into()) }
    }
}

/// Run context handed to rule logic.
///
/// Carries the ancestor values for rules that need cross-value context
/// and the cooperative cancellation signal of the run.
pub struct RuleContext {
    identifier: RuleIdentifier,
    ancestors: Vec<Arc<ValidatedValue>>,
    cancel: CancellationToken,
}

impl RuleContext {
    /// Create a context for one rule evaluation.
    pub fn new(
        identifier: RuleIdentifier,
        ancestors: Vec<Arc<ValidatedValue>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { identifier, ancestors, cancel }
    }

    /// Identifier of the rule being evaluated.
    pub fn identifier(&self) -> &RuleIdentifier {
        &self.identifier
    }

    /// Ancestor values, nearest first.
    pub fn ancestors(&self) -> &[Arc<ValidatedValue>] {
        &self.ancestors
    }

    /// Resolved value `hops` levels above the validated value, if present.
    /// One hop is the direct parent.
    pub fn ancestor_value(&self, hops: usize) -> Option<&Value> {
        self.ancestors.get(hops.checked_sub(1)?)?.value()
    }

    /// Cooperative cancellation signal for long-running logic.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("identifier", &self.identifier)
            .field("ancestors", &self.ancestors.len())
            .finish_non_exhaustive()
    }
}

/// Rule logic that inspects a single resolved value.
#[async_trait]
pub trait ValueRule: Send + Sync {
    /// Evaluate the rule against `value`.
    ///
    /// Returning `Err` records an Errored result for this rule alone;
    /// it never aborts the run.
    async fn evaluate(&self, value: &Value, ctx: &RuleContext) -> anyhow::Result<Verdict>;

    /// Whether this rule may run concurrently with other rules.
    fn parallel_safe(&self) -> bool {
        false
    }
}

/// Rule logic that also receives the resolved parent value.
#[async_trait]
pub trait ParentScopedRule: Send + Sync {
    /// Evaluate the rule against `value` within its `parent` value.
    async fn evaluate(
        &self,
        value: &Value,
        parent: Option<&Value>,
        ctx: &RuleContext,
    ) -> anyhow::Result<Verdict>;

    /// Whether this rule may run concurrently with other rules.
    fn parallel_safe(&self) -> bool {
        false
    }
}

/// Executable rule logic with its dispatch arity fixed at definition time.
///
/// The concrete logic type's name and parallel-safety marker are
/// captured when the logic is wrapped, so neither is looked up again
/// during scheduling.
#[derive(Clone)]
pub struct RuleLogic {
    kind: &'static str,
    parallel_safe: bool,
    body: RuleBody,
}

#[derive(Clone)]
enum RuleBody {
    Value(Arc<dyn ValueRule>),
    InParent(Arc<dyn ParentScopedRule>),
}

impl RuleLogic {
    /// Wrap rule logic that inspects the value alone.
    pub fn for_value<R: ValueRule + 'static>(rule: R) -> Self {
        Self {
            kind: short_type_name::<R>(),
            parallel_safe: rule.parallel_safe(),
            body: RuleBody::Value(Arc::new(rule)),
        }
    }

    /// Wrap rule logic that also needs the resolved parent value.
    pub fn in_parent<R: ParentScopedRule + 'static>(rule: R) -> Self {
        Self {
            kind: short_type_name::<R>(),
            parallel_safe: rule.parallel_safe(),
            body: RuleBody::InParent(Arc::new(rule)),
        }
    }

    /// Short name of the concrete logic type.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Whether the logic opted into concurrent execution.
    pub fn parallel_safe(&self) -> bool {
        self.parallel_safe
    }

    /// Invoke the logic with the arity chosen at definition time.
    pub async fn evaluate(
        &self,
        value: &Value,
        parent: Option<&Value>,
        ctx: &RuleContext,
    ) -> anyhow::Result<Verdict> {
        match &self.body {
            RuleBody::Value(rule) => rule.evaluate(value, ctx).await,
            RuleBody::InParent(rule) => rule.evaluate(value, parent, ctx).await,
        }
    }
}

impl fmt::Debug for RuleLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleLogic")
            .field("kind", &self.kind)
            .field("parallel_safe", &self.parallel_safe)
            .finish_non_exhaustive()
    }
}

fn short_type_name<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

/// Stable identity of one rule instance against one validated value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RuleIdentifier {
    /// Short name of the rule logic type
    pub kind: &'static str,
    /// Optional rule name from the manifest
    pub name: Option<String>,
    /// Path of the validated value the rule applies to
    pub path: ValuePath,
}

impl RuleIdentifier {
    /// Create an identifier.
    pub fn new(kind: &'static str, name: Option<String>, path: ValuePath) -> Self {
        Self { kind, name, path }
    }
}

impl fmt::Display for RuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(name) = &self.name {
            write!(f, "({})", name)?;
        }
        write!(f, " at {}", self.path)
    }
}

/// One schedulable unit of validation work: one rule instance against
/// one resolved value.
///
/// The result slot is single-assignment: it transitions from absent to
/// present exactly once per run, and a rule holding a result is never
/// re-scheduled.
pub struct ExecutableRule {
    identifier: RuleIdentifier,
    value: Arc<ValidatedValue>,
    logic: RuleLogic,
    result: OnceLock<ValidationRuleResult>,
}

impl ExecutableRule {
    /// Create an executable rule with no result yet.
    pub fn new(identifier: RuleIdentifier, value: Arc<ValidatedValue>, logic: RuleLogic) -> Self {
        Self { identifier, value, logic, result: OnceLock::new() }
    }

    /// Stable identity of this rule instance.
    pub fn identifier(&self) -> &RuleIdentifier {
        &self.identifier
    }

    /// The validated value this rule runs against.
    pub fn validated_value(&self) -> &Arc<ValidatedValue> {
        &self.value
    }

    /// The rule logic to invoke.
    pub fn logic(&self) -> &RuleLogic {
        &self.logic
    }

    /// Whether this rule may be dispatched concurrently.
    pub fn parallel_eligible(&self) -> bool {
        self.logic.parallel_safe()
    }

    /// The recorded result, if any.
    pub fn result(&self) -> Option<&ValidationRuleResult> {
        self.result.get()
    }

    /// Whether a result has been recorded.
    pub fn has_result(&self) -> bool {
        self.result.get().is_some()
    }

    /// Record this rule's result. Exactly one result may be recorded
    /// per run; a second write is an internal scheduling error.
    pub fn record_result(&self, result: ValidationRuleResult) -> Result<(), ResultAlreadyRecorded> {
        self.result
            .set(result)
            .map_err(|_| ResultAlreadyRecorded(self.identifier.clone()))
    }
}

impl fmt::Debug for ExecutableRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableRule")
            .field("identifier", &self.identifier)
            .field("outcome", &self.result().map(|r| r.outcome))
            .finish_non_exhaustive()
    }
}

/// An executable rule paired with its dependency edges in both
/// directions.
///
/// Both collections are computed once, before scheduling begins, from
/// the manifest's declared dependency identifiers; restricted to the
/// full rule set the relation must be acyclic.
#[derive(Debug)]
pub struct ExecutableRuleAndDependencies {
    rule: Arc<ExecutableRule>,
    depends_on: Vec<Arc<ExecutableRule>>,
    dependents: Vec<Arc<ExecutableRule>>,
}

impl ExecutableRuleAndDependencies {
    /// Pair a rule with its dependency edges.
    pub fn new(
        rule: Arc<ExecutableRule>,
        depends_on: Vec<Arc<ExecutableRule>>,
        dependents: Vec<Arc<ExecutableRule>>,
    ) -> Self {
        Self { rule, depends_on, dependents }
    }

    /// The rule itself.
    pub fn rule(&self) -> &Arc<ExecutableRule> {
        &self.rule
    }

    /// Rules that must pass before this rule may run.
    pub fn depends_on(&self) -> &[Arc<ExecutableRule>] {
        &self.depends_on
    }

    /// Rules waiting on this rule.
    pub fn dependents(&self) -> &[Arc<ExecutableRule>] {
        &self.dependents
    }
}
