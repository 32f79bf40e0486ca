//! Value resolution - computing the actual value a manifest value describes.

use std::sync::Arc;

use tracing::debug;
use veritor_core::{AccessorFailurePolicy, ManifestValue, ResolvedValue, Value, ValuePath};

/// Error raised when a resolution failure is configured to abort the run.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// An accessor failed and the effective policy is `Propagate`
    #[error("accessor for value at {path} failed: {source:#}")]
    AccessorFailed {
        /// Location of the value whose accessor failed
        path: ValuePath,
        /// The accessor's failure
        source: anyhow::Error,
    },

    /// A collection enumerator failed and the effective policy is not `Ignore`
    #[error("enumerating collection items at {path} failed: {source:#}")]
    EnumerationFailed {
        /// Location of the collection value
        path: ValuePath,
        /// The enumerator's failure
        source: anyhow::Error,
    },
}

/// Resolves the actual value described by one manifest value.
///
/// Accessor failures map onto a three-way response: `Propagate` aborts
/// the run as a configuration error, `TreatAsError` records the failure
/// against the value's rules, `Ignore` skips the value entirely. The
/// per-value override wins over the run-level default.
#[derive(Debug, Clone, Copy)]
pub struct ValueResolver {
    default_policy: AccessorFailurePolicy,
}

impl ValueResolver {
    /// Create a resolver with the run-level accessor-failure policy.
    pub fn new(default_policy: AccessorFailurePolicy) -> Self {
        Self { default_policy }
    }

    /// Effective accessor-failure policy for one manifest value.
    pub fn policy_for(&self, descriptor: &ManifestValue) -> AccessorFailurePolicy {
        descriptor.on_accessor_failure.unwrap_or(self.default_policy)
    }

    /// Resolve `descriptor` against its already-resolved parent value.
    ///
    /// For the run root `parent` is the validated object itself: a
    /// descriptor without an accessor resolves to its parent unchanged.
    pub fn resolve(
        &self,
        descriptor: &ManifestValue,
        parent: &Value,
        path: &ValuePath,
    ) -> Result<ResolvedValue, ResolveError> {
        let Some(accessor) = &descriptor.accessor else {
            return Ok(ResolvedValue::Success(parent.clone()));
        };

        match accessor(parent) {
            Ok(value) => Ok(ResolvedValue::Success(value)),
            Err(source) => match self.policy_for(descriptor) {
                AccessorFailurePolicy::Propagate => {
                    Err(ResolveError::AccessorFailed { path: path.clone(), source })
                }
                AccessorFailurePolicy::TreatAsError => {
                    debug!(path = %path, error = %source, "accessor failed, recording against rules");
                    Ok(ResolvedValue::Error(Arc::new(source)))
                }
                AccessorFailurePolicy::Ignore => {
                    debug!(path = %path, error = %source, "accessor failed, ignoring value");
                    Ok(ResolvedValue::Ignored)
                }
            },
        }
    }
}

impl Default for ValueResolver {
    fn default() -> Self {
        Self::new(AccessorFailurePolicy::default())
    }
}
