//! Removal of storage claims left behind by deleted custom resources
use crate::{finalizer::Finalizer, BoxError, FinalizerProtocol};
use async_trait::async_trait;
use lifecycle_client::ControlPlane;
use lifecycle_core::{ManagedResource, ObjectRef, ResourceKind, Selector};
use std::sync::Arc;
use thiserror::Error;

/// Finalizer token guarding the persistent volume claims of a custom resource
pub const DELETE_PVC_FINALIZER: &str = "enterprise.splunk.com/delete-pvc";

/// Label tying a claim to the custom resource that requested it
pub const PART_OF_LABEL: &str = "app.kubernetes.io/part-of";

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("failed to list claims matching {selector}: {source}")]
    ListFailed {
        selector: Selector,
        #[source]
        source: lifecycle_client::Error,
    },
    /// Claims deleted before the failure stay deleted
    #[error("failed to delete {claim}: {source}")]
    DependentDeletionFailed {
        claim: ObjectRef,
        #[source]
        source: lifecycle_client::Error,
    },
}

/// The component name a kind labels its claims with, `None` for kinds without claims
pub fn component(kind: &ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Standalone => Some("standalone"),
        ResourceKind::LicenseMaster => Some("license-master"),
        ResourceKind::SearchHeadCluster => Some("search-head"),
        ResourceKind::IndexerCluster => Some("indexer"),
        _ => None,
    }
}

/// Selects the claims belonging to `resource`
///
/// ```
/// use lifecycle_core::{ManagedResource, ResourceKind};
/// use lifecycle_runtime::reaper::dependents_selector;
///
/// let idx = ManagedResource::new(ResourceKind::IndexerCluster, "idx").within("ns");
/// let selector = dependents_selector(&idx).unwrap();
/// assert_eq!(selector.to_string(), "app.kubernetes.io/part-of=splunk-idx-indexer");
/// ```
pub fn dependents_selector(resource: &ManagedResource) -> Option<Selector> {
    let component = component(&resource.kind)?;
    let part_of = format!("splunk-{}-{component}", resource.name());
    Some(Selector::default().with_label(PART_OF_LABEL, part_of))
}

/// Deletes the persistent volume claims labeled as part of a custom resource.
///
/// Registered under [`DELETE_PVC_FINALIZER`]. Kinds without claims are a no-op.
pub struct PvcReaper<C: ?Sized> {
    client: Arc<C>,
}

impl<C> PvcReaper<C>
where
    C: ControlPlane + ?Sized,
{
    /// A reaper deleting through `client`
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Delete every claim of `resource`, returning how many deletes were issued
    ///
    /// Claims that vanish between the list and their delete count as deleted, so running this
    /// again after a partial failure finishes the job.
    #[tracing::instrument(skip(self, resource), fields(object = %resource.object_ref()))]
    pub async fn reap_dependents(&self, resource: &ManagedResource) -> Result<usize, Error> {
        let Some(selector) = dependents_selector(resource) else {
            return Ok(0);
        };
        let claims = self
            .client
            .list(&ResourceKind::PersistentVolumeClaim, resource.namespace(), &selector)
            .await
            .map_err(|source| Error::ListFailed {
                selector: selector.clone(),
                source,
            })?;
        tracing::debug!(claims = claims.len(), %selector, "found claims");

        let mut deleted = 0;
        for claim in claims {
            let claim = claim.object_ref();
            match self.client.delete(&claim).await {
                Ok(()) => {
                    tracing::info!(%claim, "deleted claim");
                    deleted += 1;
                }
                Err(err) if err.is_not_found() => {
                    tracing::debug!(%claim, "claim already gone");
                }
                Err(source) => return Err(Error::DependentDeletionFailed { claim, source }),
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl<C> Finalizer for PvcReaper<C>
where
    C: ControlPlane + ?Sized + 'static,
{
    async fn reap(&self, resource: &ManagedResource) -> Result<(), BoxError> {
        self.reap_dependents(resource).await?;
        Ok(())
    }
}

impl<C> FinalizerProtocol<C>
where
    C: ControlPlane + ?Sized + 'static,
{
    /// A protocol knowing every finalizer the operator puts on its custom resources
    pub fn with_defaults(client: Arc<C>) -> Self {
        Self::new(client.clone()).register(DELETE_PVC_FINALIZER, PvcReaper::new(client))
    }
}
