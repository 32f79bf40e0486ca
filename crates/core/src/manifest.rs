//! Declarative description of which values to validate and how.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rule::RuleLogic;
use crate::value::Value;

/// Computes a child value from its already-resolved parent value.
pub type AccessorFn = Arc<dyn Fn(&Value) -> Result<Value, anyhow::Error> + Send + Sync>;

/// Extracts a reporting identity from a resolved value.
pub type IdentityFn = Arc<dyn Fn(&Value) -> Option<serde_json::Value> + Send + Sync>;

/// Enumerates the items of a resolved collection value.
pub type EnumerateFn = Arc<dyn Fn(&Value) -> Result<Vec<Value>, anyhow::Error> + Send + Sync>;

/// How the engine reacts when a value accessor fails.
///
/// Accessors are often third-party member access that may legitimately
/// fail (lazy-loading proxies, partially populated graphs); the manifest
/// author chooses per value whether such failures are configuration
/// bugs, recoverable validation failures, or expected absence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessorFailurePolicy {
    /// Abort the whole run; the failure is a configuration error
    Propagate,
    /// Record an Errored result for every rule on the value
    #[default]
    TreatAsError,
    /// Skip the value: no rules run, no error recorded
    Ignore,
}

/// A validation manifest: the declarative rule set for one object graph.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Descriptor of the run root value
    pub root: Arc<ManifestValue>,
}

impl Manifest {
    /// Create a manifest from its root descriptor.
    pub fn new(root: ManifestValue) -> Self {
        Self { root: Arc::new(root) }
    }
}

/// Describes one value in the validated object hierarchy.
///
/// Immutable once built; shared between the tree builder and the
/// compiled rules of every run that uses it.
#[derive(Clone)]
pub struct ManifestValue {
    /// Name of the member this value is derived by, `None` for the run root
    pub member: Option<String>,
    /// Accessor deriving this value from its parent, `None` for the run root
    pub accessor: Option<AccessorFn>,
    /// Optional identity extractor used for error reporting
    pub identity: Option<IdentityFn>,
    /// Per-value override of the run-level accessor-failure policy
    pub on_accessor_failure: Option<AccessorFailurePolicy>,
    /// Rules applied to this value
    pub rules: Vec<RuleDefinition>,
    /// Member child values
    pub children: Vec<Arc<ManifestValue>>,
    /// Item validation for values that are collections
    pub collection: Option<CollectionSpec>,
}

impl ManifestValue {
    /// Descriptor for the run root: no accessor, the actual value is the
    /// validated object itself.
    pub fn root() -> Self {
        Self {
            member: None,
            accessor: None,
            identity: None,
            on_accessor_failure: None,
            rules: Vec::new(),
            children: Vec::new(),
            collection: None,
        }
    }

    /// Descriptor for a member value derived from its parent by `accessor`.
    pub fn member(name: impl Into<String>, accessor: AccessorFn) -> Self {
        Self {
            member: Some(name.into()),
            accessor: Some(accessor),
            identity: None,
            on_accessor_failure: None,
            rules: Vec::new(),
            children: Vec::new(),
            collection: None,
        }
    }

    /// Set the identity extractor.
    pub fn with_identity(mut self, identity: IdentityFn) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Override the accessor-failure policy for this value.
    pub fn with_accessor_failure(mut self, policy: AccessorFailurePolicy) -> Self {
        self.on_accessor_failure = Some(policy);
        self
    }

    /// Attach a rule to this value.
    pub fn with_rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }

    /// Attach a member child value.
    pub fn with_child(mut self, child: ManifestValue) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    /// Validate this value's items individually as a collection.
    pub fn with_collection(mut self, spec: CollectionSpec) -> Self {
        self.collection = Some(spec);
        self
    }
}

impl fmt::Debug for ManifestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestValue")
            .field("member", &self.member)
            .field("rules", &self.rules.len())
            .field("children", &self.children.len())
            .field("collection", &self.collection.is_some())
            .finish_non_exhaustive()
    }
}

/// Item validation for a collection value.
#[derive(Clone)]
pub struct CollectionSpec {
    /// Descriptor applied to each enumerated item
    pub item: Arc<ManifestValue>,
    /// Enumerator producing the items from the resolved collection value
    pub enumerate: EnumerateFn,
}

impl CollectionSpec {
    /// Create a collection spec from an item descriptor and enumerator.
    pub fn new(item: ManifestValue, enumerate: EnumerateFn) -> Self {
        Self { item: Arc::new(item), enumerate }
    }
}

/// One rule attached to a manifest value.
#[derive(Debug, Clone)]
pub struct RuleDefinition {
    /// Optional name distinguishing multiple rules of the same kind
    pub name: Option<String>,
    /// The rule logic to execute
    pub logic: RuleLogic,
    /// Rules that must pass before this rule may run
    pub dependencies: Vec<DependencyRef>,
}

impl RuleDefinition {
    /// Create an unnamed rule.
    pub fn new(logic: RuleLogic) -> Self {
        Self { name: None, logic, dependencies: Vec::new() }
    }

    /// Create a named rule.
    pub fn named(name: impl Into<String>, logic: RuleLogic) -> Self {
        Self { name: Some(name.into()), logic, dependencies: Vec::new() }
    }

    /// Declare a prerequisite rule.
    pub fn depends_on(mut self, dependency: DependencyRef) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Name used for identification and dependency matching: the explicit
    /// name if set, otherwise the logic's kind.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.logic.kind())
    }
}

/// Identifies a prerequisite rule relative to the value it is declared on.
///
/// References are resolved once, at compile time, into direct object
/// references; the scheduler never performs lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    /// Display name of the prerequisite rule
    pub rule: String,
    /// How many levels up the validated-value tree the prerequisite lives;
    /// zero means the same value
    pub ancestor_hops: usize,
}

impl DependencyRef {
    /// Prerequisite declared on the same value.
    pub fn same_value(rule: impl Into<String>) -> Self {
        Self { rule: rule.into(), ancestor_hops: 0 }
    }

    /// Prerequisite declared on an ancestor value, `hops` levels up.
    pub fn ancestor(rule: impl Into<String>, hops: usize) -> Self {
        Self { rule: rule.into(), ancestor_hops: hops }
    }
}

/// Wrap a typed, infallible member access into an [`AccessorFn`].
///
/// The returned accessor fails if the parent value is not a `P`, which
/// indicates a manifest wired against the wrong types.
pub fn accessor<P, C, F>(f: F) -> AccessorFn
where
    P: 'static,
    C: Send + Sync + 'static,
    F: Fn(&P) -> C + Send + Sync + 'static,
{
    Arc::new(move |parent: &Value| {
        let parent = parent
            .downcast_ref::<P>()
            .ok_or_else(|| anyhow::anyhow!("expected parent of type {}", std::any::type_name::<P>()))?;
        Ok(Arc::new(f(parent)) as Value)
    })
}

/// Wrap a typed, fallible member access into an [`AccessorFn`].
pub fn fallible_accessor<P, C, F>(f: F) -> AccessorFn
where
    P: 'static,
    C: Send + Sync + 'static,
    F: Fn(&P) -> Result<C, anyhow::Error> + Send + Sync + 'static,
{
    Arc::new(move |parent: &Value| {
        let parent = parent
            .downcast_ref::<P>()
            .ok_or_else(|| anyhow::anyhow!("expected parent of type {}", std::any::type_name::<P>()))?;
        Ok(Arc::new(f(parent)?) as Value)
    })
}

/// Wrap a typed identity extraction into an [`IdentityFn`].
pub fn identity<V, F>(f: F) -> IdentityFn
where
    V: 'static,
    F: Fn(&V) -> serde_json::Value + Send + Sync + 'static,
{
    Arc::new(move |value: &Value| value.downcast_ref::<V>().map(&f))
}

/// Wrap a typed item enumeration into an [`EnumerateFn`].
pub fn collection_items<V, I, F>(f: F) -> EnumerateFn
where
    V: 'static,
    I: Send + Sync + 'static,
    F: Fn(&V) -> Vec<I> + Send + Sync + 'static,
{
    Arc::new(move |value: &Value| {
        let value = value
            .downcast_ref::<V>()
            .ok_or_else(|| anyhow::anyhow!("expected collection of type {}", std::any::type_name::<V>()))?;
        Ok(f(value).into_iter().map(|item| Arc::new(item) as Value).collect())
    })
}
