use crate::{
    kind::ResourceKind,
    metadata::{Finalizers, ObjectMeta},
};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// A reference to a single object on the control plane.
///
/// This is the identity captured by cleanup actions. It is an owned snapshot,
/// so mutating the resource it was taken from does not change what it points at.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Kind of the object
    pub kind: ResourceKind,
    /// Name of the object
    pub name: String,
    /// Namespace of the object, `None` for cluster scoped kinds
    pub namespace: Option<String>,
}

impl ObjectRef {
    /// A reference to a cluster scoped object
    #[must_use]
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            namespace: None,
        }
    }

    /// Scope the reference to a namespace
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A resource instance whose physical realization is maintained by the control plane.
///
/// The lifecycle layer never owns the lifetime of the object. It reads and mutates the
/// finalizer set and issues get and delete calls against it; everything in `data` is opaque.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManagedResource {
    /// The kind of object
    pub kind: ResourceKind,
    /// Object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec, status and any other keys
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ManagedResource {
    /// Create a resource with minimal values set
    #[must_use]
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: serde_json::Value::Null,
        }
    }

    /// Attach a namespace
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.metadata.namespace = Some(namespace.to_string());
        self
    }

    /// Attach a finalizer token
    #[must_use]
    pub fn finalizer(mut self, token: &str) -> Self {
        self.metadata.finalizers.insert(token);
        self
    }

    /// Attach labels
    #[must_use]
    pub fn with_labels<K, V>(mut self, labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata
            .labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Attach opaque data such as `spec`
    #[must_use]
    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// The name of the resource, empty if unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// The namespace the resource is in
    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// Unique ID assigned by the control plane
    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }

    /// Resource labels
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    /// Outstanding finalizers
    pub fn finalizers(&self) -> &Finalizers {
        &self.metadata.finalizers
    }

    /// Mutable access to the finalizers
    pub fn finalizers_mut(&mut self) -> &mut Finalizers {
        &mut self.metadata.finalizers
    }

    /// When deletion was requested, if it was
    pub fn deletion_timestamp(&self) -> Option<Timestamp> {
        self.metadata.deletion_timestamp
    }

    /// Whether the control plane has been asked to delete this resource
    pub fn deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// A reference to this resource
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            kind: self.kind.clone(),
            name: self.name().to_string(),
            namespace: self.metadata.namespace.clone(),
        }
    }
}
