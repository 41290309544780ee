use crate::Result;
use async_trait::async_trait;
use lifecycle_core::{ManagedResource, ObjectRef, ResourceKind, Selector};

/// The verbs the lifecycle layer needs from a control plane.
///
/// Implementations must report a missing object as
/// [`Error::Api`](crate::Error::Api) with code `404` so that callers can tell
/// "not there (yet)" apart from real failures via [`Error::is_not_found`](crate::Error::is_not_found).
///
/// Reads may be stale. The control plane is expected to serialize its own writes.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch a single object
    async fn get(&self, obj: &ObjectRef) -> Result<ManagedResource>;

    /// List objects of `kind` matching `selector`, across all namespaces when `namespace` is `None`
    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ManagedResource>>;

    /// Create an object, returning it as stored
    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource>;

    /// Request deletion of an object
    ///
    /// An object with outstanding finalizers is only marked for deletion.
    async fn delete(&self, obj: &ObjectRef) -> Result<()>;

    /// Replace an object, returning it as stored
    ///
    /// Used to persist a mutated finalizer set.
    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource>;
}
