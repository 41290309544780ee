//! Metadata carried by every managed resource.
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The subset of object metadata the lifecycle layer reads and writes.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Name, unique within a namespace for a kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Namespace, `None` for cluster scoped kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Identity assigned by the control plane on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Opaque version used for optimistic concurrency on updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    /// Labels, used to select dependents
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Outstanding cleanup obligations
    #[serde(default, skip_serializing_if = "Finalizers::is_empty")]
    pub finalizers: Finalizers,
    /// Set by the control plane once deletion has been requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<Timestamp>,
}

/// An ordered set of finalizer tokens.
///
/// Insertion order is preserved and duplicates collapse onto their first occurrence.
/// The control plane will not physically remove an object while this set is non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Finalizers(Vec<String>);

impl Finalizers {
    /// An empty finalizer set
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `token` unless it is already present, returning whether it was added
    pub fn insert(&mut self, token: impl Into<String>) -> bool {
        let token = token.into();
        if self.contains(&token) {
            return false;
        }
        self.0.push(token);
        true
    }

    /// Removes `token`, returning whether it was present
    pub fn remove(&mut self, token: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|f| f != token);
        self.0.len() != before
    }

    /// Whether `token` is present
    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|f| f == token)
    }

    /// Tokens in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is drained
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tokens as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for Finalizers {
    fn from(tokens: Vec<String>) -> Self {
        tokens.into_iter().collect()
    }
}

impl From<Finalizers> for Vec<String> {
    fn from(finalizers: Finalizers) -> Self {
        finalizers.0
    }
}

impl<S: Into<String>> FromIterator<S> for Finalizers {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut finalizers = Finalizers::new();
        for token in iter {
            finalizers.insert(token);
        }
        finalizers
    }
}
