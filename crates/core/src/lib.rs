//! Veritor core data models.
//!
//! This crate defines the data structures shared by the manifest
//! compiler and the rule execution engine: manifest value descriptors,
//! resolved values, rule contracts, executable rules, and results.

#![warn(missing_docs)]

// Identities
mod id;

// Manifest and resolved values
mod manifest;
mod value;

// Rules and results
mod result;
mod rule;

// Re-exports
pub use id::RunId;

// Manifest
pub use manifest::{
    accessor, collection_items, fallible_accessor, identity, AccessorFailurePolicy, AccessorFn,
    CollectionSpec, DependencyRef, EnumerateFn, IdentityFn, Manifest, ManifestValue,
    RuleDefinition,
};

// Values
pub use value::{PathSegment, ResolvedValue, ValidatedValue, Value, ValuePath};

// Rules
pub use rule::{
    ExecutableRule, ExecutableRuleAndDependencies, ParentScopedRule, RuleContext, RuleIdentifier,
    RuleLogic, ValueRule, Verdict,
};

// Results
pub use result::{ResultAlreadyRecorded, RuleOutcome, ValidationRuleResult};
