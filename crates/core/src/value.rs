//! Resolved values and the validated-value tree.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use serde::{Serialize, Serializer};

use crate::manifest::ManifestValue;

/// An opaque value under validation.
///
/// The engine never inspects values itself; accessors and rule logic
/// downcast to the concrete types the manifest was written for.
pub type Value = Arc<dyn Any + Send + Sync>;

/// One segment of a [`ValuePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A named member derived from its parent value
    Member(String),
    /// An enumerated collection item
    Index(usize),
}

/// Location of a validated value within the object graph.
///
/// Paths identify rule instances across a run and render as
/// `$.customer.addresses[2].city` in reports and errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ValuePath(Vec<PathSegment>);

impl ValuePath {
    /// Path of the run root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// This path extended with a member segment.
    pub fn member(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Member(name.into()));
        Self(segments)
    }

    /// This path extended with a collection index segment.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Segments from the root down.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.0 {
            match segment {
                PathSegment::Member(name) => write!(f, ".{}", name)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

impl Serialize for ValuePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Response of the value resolver for a single manifest value.
///
/// A closed set of three outcomes: the value resolved and its rules
/// should run, the accessor failed and the failure is recorded against
/// the value's rules, or the value is skipped entirely.
#[derive(Clone)]
pub enum ResolvedValue {
    /// The accessor produced a value to validate
    Success(Value),
    /// The accessor failed and the failure becomes an Errored result
    /// for every rule on the value
    Error(Arc<anyhow::Error>),
    /// The accessor failed and the value runs no rules at all
    Ignored,
}

impl ResolvedValue {
    /// The resolved value, if resolution succeeded.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The captured failure, if resolution failed.
    pub fn error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl fmt::Debug for ResolvedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => f.write_str("Success(..)"),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Self::Ignored => f.write_str("Ignored"),
        }
    }
}

impl PartialEq for ResolvedValue {
    /// Equality is by variant; `Success` additionally compares the value
    /// by pointer identity, the only meaningful identity for opaque values.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Success(a), Self::Success(b)) => Arc::ptr_eq(a, b),
            (Self::Error(_), Self::Error(_)) => true,
            (Self::Ignored, Self::Ignored) => true,
            _ => false,
        }
    }
}

/// One resolved value during a single validation run.
///
/// Created once by the tree builder and read-only afterwards; the
/// whole tree is discarded when the run ends.
pub struct ValidatedValue {
    descriptor: Arc<ManifestValue>,
    resolution: ResolvedValue,
    identity: Option<serde_json::Value>,
    path: ValuePath,
    collection_index: Option<usize>,
    collection_companion: bool,
    parent: Weak<ValidatedValue>,
    children: OnceLock<Vec<Arc<ValidatedValue>>>,
    collection: OnceLock<Arc<ValidatedValue>>,
}

impl ValidatedValue {
    /// Create a node for a resolved member or collection-item value.
    pub fn new(
        descriptor: Arc<ManifestValue>,
        resolution: ResolvedValue,
        identity: Option<serde_json::Value>,
        path: ValuePath,
        collection_index: Option<usize>,
        parent: Weak<ValidatedValue>,
    ) -> Self {
        Self {
            descriptor,
            resolution,
            identity,
            path,
            collection_index,
            collection_companion: false,
            parent,
            children: OnceLock::new(),
            collection: OnceLock::new(),
        }
    }

    /// Create the companion node representing a value *as a collection*,
    /// whose children are the enumerated items.
    pub fn collection_companion(
        descriptor: Arc<ManifestValue>,
        resolution: ResolvedValue,
        identity: Option<serde_json::Value>,
        path: ValuePath,
        parent: Weak<ValidatedValue>,
    ) -> Self {
        Self {
            descriptor,
            resolution,
            identity,
            path,
            collection_index: None,
            collection_companion: true,
            parent,
            children: OnceLock::new(),
            collection: OnceLock::new(),
        }
    }

    /// The manifest value this node corresponds to.
    pub fn descriptor(&self) -> &Arc<ManifestValue> {
        &self.descriptor
    }

    /// How this node's actual value resolved.
    pub fn resolution(&self) -> &ResolvedValue {
        &self.resolution
    }

    /// The resolved actual value, if resolution succeeded.
    pub fn value(&self) -> Option<&Value> {
        self.resolution.value()
    }

    /// Identity used for reporting, if the manifest extracts one.
    pub fn identity(&self) -> Option<&serde_json::Value> {
        self.identity.as_ref()
    }

    /// Location of this value within the object graph.
    pub fn path(&self) -> &ValuePath {
        &self.path
    }

    /// Index of this value within its parent collection, if enumerated.
    pub fn collection_index(&self) -> Option<usize> {
        self.collection_index
    }

    /// Whether this node is the "as a collection" companion of another node.
    pub fn is_collection_companion(&self) -> bool {
        self.collection_companion
    }

    /// The parent node, if it is still alive.
    pub fn parent(&self) -> Option<Arc<ValidatedValue>> {
        self.parent.upgrade()
    }

    /// Ancestor values, nearest first, with collection companions
    /// skipped so that one hop always crosses one manifest level.
    pub fn ancestors(&self) -> Vec<Arc<ValidatedValue>> {
        let mut out = Vec::new();
        let mut cursor = self.parent();
        while let Some(node) = cursor {
            cursor = node.parent();
            if !node.is_collection_companion() {
                out.push(node);
            }
        }
        out
    }

    /// Member child values.
    pub fn children(&self) -> &[Arc<ValidatedValue>] {
        self.children.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// The companion node holding this value's enumerated items, if any.
    pub fn collection(&self) -> Option<&Arc<ValidatedValue>> {
        self.collection.get()
    }

    /// Attach the children list. The tree builder calls this exactly once
    /// per node; later writes are ignored.
    pub fn attach_children(&self, children: Vec<Arc<ValidatedValue>>) {
        let _ = self.children.set(children);
    }

    /// Attach the collection companion. The tree builder calls this at
    /// most once per node; later writes are ignored.
    pub fn attach_collection(&self, companion: Arc<ValidatedValue>) {
        let _ = self.collection.set(companion);
    }
}

impl fmt::Debug for ValidatedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedValue")
            .field("path", &self.path.to_string())
            .field("resolution", &self.resolution)
            .field("collection_index", &self.collection_index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_display() {
        let path = ValuePath::root().member("customer").member("addresses").index(2).member("city");
        assert_eq!(path.to_string(), "$.customer.addresses[2].city");
    }

    #[test]
    fn test_root_path_display() {
        assert_eq!(ValuePath::root().to_string(), "$");
    }

    #[test]
    fn test_path_serializes_as_string() {
        let path = ValuePath::root().member("lines").index(0);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"$.lines[0]\"");
    }

    #[test]
    fn test_resolved_value_equality_by_variant() {
        let a = ResolvedValue::Error(Arc::new(anyhow::anyhow!("first")));
        let b = ResolvedValue::Error(Arc::new(anyhow::anyhow!("second")));
        assert_eq!(a, b);
        assert_eq!(ResolvedValue::Ignored, ResolvedValue::Ignored);
        assert_ne!(a, ResolvedValue::Ignored);
    }

    #[test]
    fn test_success_equality_is_by_pointer() {
        let value: Value = Arc::new(42_u32);
        let same = ResolvedValue::Success(value.clone());
        let other = ResolvedValue::Success(Arc::new(42_u32));
        assert_eq!(ResolvedValue::Success(value), same);
        assert_ne!(same, other);
    }

    #[test]
    fn test_ancestors_skip_collection_companions() {
        let descriptor = Arc::new(ManifestValue::root());
        let root = Arc::new(ValidatedValue::new(
            descriptor.clone(),
            ResolvedValue::Success(Arc::new(())),
            None,
            ValuePath::root(),
            None,
            Weak::new(),
        ));
        let companion = Arc::new(ValidatedValue::collection_companion(
            descriptor.clone(),
            ResolvedValue::Success(Arc::new(())),
            None,
            ValuePath::root(),
            Arc::downgrade(&root),
        ));
        let item = ValidatedValue::new(
            descriptor,
            ResolvedValue::Success(Arc::new(())),
            None,
            ValuePath::root().index(0),
            Some(0),
            Arc::downgrade(&companion),
        );

        let ancestors = item.ancestors();
        assert_eq!(ancestors.len(), 1);
        assert!(Arc::ptr_eq(&ancestors[0], &root));
    }

    #[test]
    fn test_children_write_once() {
        let node = ValidatedValue::new(
            Arc::new(ManifestValue::root()),
            ResolvedValue::Success(Arc::new(())),
            None,
            ValuePath::root(),
            None,
            Weak::new(),
        );
        assert!(node.children().is_empty());

        let child = Arc::new(ValidatedValue::new(
            Arc::new(ManifestValue::root()),
            ResolvedValue::Ignored,
            None,
            ValuePath::root().member("child"),
            None,
            Weak::new(),
        ));
        node.attach_children(vec![child]);
        assert_eq!(node.children().len(), 1);

        // A second write does not replace the first.
        node.attach_children(Vec::new());
        assert_eq!(node.children().len(), 1);
    }
}
