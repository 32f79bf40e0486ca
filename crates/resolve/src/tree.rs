//! Building the validated-value tree for one run.

use std::sync::{Arc, Weak};

use tracing::debug;
use veritor_core::{
    AccessorFailurePolicy, CollectionSpec, Manifest, ManifestValue, ResolvedValue, ValidatedValue,
    Value, ValuePath,
};

use crate::resolver::{ResolveError, ValueResolver};

/// Builds the per-run tree of resolved values.
///
/// Walks the manifest hierarchy with the [`ValueResolver`]: ignored
/// values are omitted, failed values are kept (marked, not descended
/// into) so their rules can be recorded as Errored, and collection
/// values grow a companion node whose children are the enumerated
/// items.
#[derive(Debug, Clone, Copy)]
pub struct TreeBuilder {
    resolver: ValueResolver,
}

impl TreeBuilder {
    /// Create a builder around a resolver.
    pub fn new(resolver: ValueResolver) -> Self {
        Self { resolver }
    }

    /// Build the tree for `subject` validated against `manifest`.
    pub fn build(
        &self,
        manifest: &Manifest,
        subject: Value,
    ) -> Result<Arc<ValidatedValue>, ResolveError> {
        let resolution = self.resolver.resolve(&manifest.root, &subject, &ValuePath::root())?;
        self.build_node(&manifest.root, resolution, ValuePath::root(), None, Weak::new())
    }

    fn build_node(
        &self,
        descriptor: &Arc<ManifestValue>,
        resolution: ResolvedValue,
        path: ValuePath,
        collection_index: Option<usize>,
        parent: Weak<ValidatedValue>,
    ) -> Result<Arc<ValidatedValue>, ResolveError> {
        let identity = match &resolution {
            ResolvedValue::Success(value) => {
                descriptor.identity.as_ref().and_then(|extract| extract(value))
            }
            _ => None,
        };

        let node = Arc::new(ValidatedValue::new(
            Arc::clone(descriptor),
            resolution,
            identity,
            path,
            collection_index,
            parent,
        ));

        // Unresolved values are leaves: their children cannot be derived.
        if let Some(value) = node.value().cloned() {
            let mut children = Vec::with_capacity(descriptor.children.len());
            for child_descriptor in &descriptor.children {
                let member = child_descriptor.member.as_deref().unwrap_or("<member>");
                let child_path = node.path().member(member);
                match self.resolver.resolve(child_descriptor, &value, &child_path)? {
                    ResolvedValue::Ignored => {
                        debug!(path = %child_path, "value ignored, no rules will run for it");
                    }
                    resolution => {
                        children.push(self.build_node(
                            child_descriptor,
                            resolution,
                            child_path,
                            None,
                            Arc::downgrade(&node),
                        )?);
                    }
                }
            }
            node.attach_children(children);

            if let Some(spec) = &descriptor.collection {
                if let Some(companion) = self.build_collection(&node, spec, &value)? {
                    node.attach_collection(companion);
                }
            }
        } else {
            node.attach_children(Vec::new());
        }

        Ok(node)
    }

    /// Build the companion node representing `owner` as a collection.
    ///
    /// Enumeration failures are configuration-grade unless the owner's
    /// policy is `Ignore`: the manifest declared items that cannot be
    /// produced.
    fn build_collection(
        &self,
        owner: &Arc<ValidatedValue>,
        spec: &CollectionSpec,
        value: &Value,
    ) -> Result<Option<Arc<ValidatedValue>>, ResolveError> {
        let items = match (spec.enumerate)(value) {
            Ok(items) => items,
            Err(source) => {
                if self.resolver.policy_for(owner.descriptor()) == AccessorFailurePolicy::Ignore {
                    debug!(path = %owner.path(), error = %source, "enumeration failed, ignoring items");
                    return Ok(None);
                }
                return Err(ResolveError::EnumerationFailed {
                    path: owner.path().clone(),
                    source,
                });
            }
        };

        let companion = Arc::new(ValidatedValue::collection_companion(
            Arc::clone(owner.descriptor()),
            ResolvedValue::Success(value.clone()),
            owner.identity().cloned(),
            owner.path().clone(),
            Arc::downgrade(owner),
        ));

        let mut children = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let item_path = owner.path().index(index);
            children.push(self.build_node(
                &spec.item,
                ResolvedValue::Success(item),
                item_path,
                Some(index),
                Arc::downgrade(&companion),
            )?);
        }
        companion.attach_children(children);

        Ok(Some(companion))
    }
}
