//! Finalizer handling for resources whose deletion was requested
use crate::BoxError;
use async_trait::async_trait;
use jiff::Timestamp;
use lifecycle_client::ControlPlane;
use lifecycle_core::{ManagedResource, ObjectRef};
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    /// A token on the resource has no registered [`Finalizer`]
    #[error("unrecognized finalizer {finalizer} on {object}")]
    UnrecognizedFinalizer { object: ObjectRef, finalizer: String },
    /// The [`Finalizer`] for a token failed, the token was kept
    #[error("failed to clean up {object} for finalizer {finalizer}: {source}")]
    CleanupFailed {
        object: ObjectRef,
        finalizer: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to remove finalizer {finalizer}: {source}")]
    RemoveFinalizer {
        finalizer: String,
        #[source]
        source: lifecycle_client::Error,
    },
    #[error("failed to add finalizer: {0}")]
    AddFinalizer(#[source] lifecycle_client::Error),
}

/// The cleanup obligation behind one finalizer token.
///
/// Implementations must be idempotent: a run that failed half way is retried from the start the
/// next time the protocol sees the token.
#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Clean up whatever `resource` leaves behind
    async fn reap(&self, resource: &ManagedResource) -> Result<(), BoxError>;
}

/// Releases the finalizers of resources whose deletion was requested.
///
/// Every token must be registered with a [`Finalizer`]; tokens are processed in the order they
/// appear on the resource, and each is removed only after its cleanup succeeded.
pub struct FinalizerProtocol<C: ?Sized> {
    client: Arc<C>,
    handlers: BTreeMap<String, Arc<dyn Finalizer>>,
}

impl<C: ?Sized> fmt::Debug for FinalizerProtocol<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizerProtocol")
            .field("tokens", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<C> FinalizerProtocol<C>
where
    C: ControlPlane + ?Sized,
{
    /// A protocol without any registered finalizers
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            handlers: BTreeMap::new(),
        }
    }

    /// Register `handler` as the cleanup for `token`, replacing any previous handler
    #[must_use]
    pub fn register(mut self, token: &str, handler: impl Finalizer + 'static) -> Self {
        self.handlers.insert(token.to_string(), Arc::new(handler));
        self
    }

    /// Whether a handler is registered for `token`
    pub fn knows(&self, token: &str) -> bool {
        self.handlers.contains_key(token)
    }

    /// If deletion of `resource` was requested, run the cleanup for each of its finalizers and
    /// remove them one by one.
    ///
    /// Returns `Ok(false)` without touching anything if deletion was not requested, and `Ok(true)`
    /// once every finalizer was released. `resource` is replaced by the stored object after each
    /// removal, so a retry after an error only revisits the tokens still present.
    ///
    /// # Errors
    ///
    /// - [`Error::UnrecognizedFinalizer`] if any token has no handler; nothing is cleaned up or removed
    /// - [`Error::CleanupFailed`] if a handler fails; its token stays on the resource
    /// - [`Error::RemoveFinalizer`] if persisting the reduced finalizer set fails
    #[tracing::instrument(skip(self, resource), fields(object = %resource.object_ref()))]
    pub async fn check_deletion(&self, resource: &mut ManagedResource) -> Result<bool, Error> {
        let Some(requested) = resource.deletion_timestamp() else {
            return Ok(false);
        };
        if requested > Timestamp::now() {
            tracing::warn!(%requested, "deletion is scheduled in the future, finalizing now");
        }
        if let Some(unknown) = resource.finalizers().iter().find(|token| !self.knows(token)) {
            return Err(Error::UnrecognizedFinalizer {
                object: resource.object_ref(),
                finalizer: unknown.to_string(),
            });
        }

        let tokens: Vec<String> = resource.finalizers().iter().map(String::from).collect();
        for token in tokens {
            let Some(handler) = self.handlers.get(&token) else {
                continue;
            };
            tracing::info!(finalizer = %token, "running cleanup");
            handler
                .reap(resource)
                .await
                .map_err(|source| Error::CleanupFailed {
                    object: resource.object_ref(),
                    finalizer: token.clone(),
                    source,
                })?;

            let mut released = resource.clone();
            released.finalizers_mut().remove(&token);
            *resource = self
                .client
                .update(&released)
                .await
                .map_err(|source| Error::RemoveFinalizer {
                    finalizer: token.clone(),
                    source,
                })?;
            tracing::debug!(finalizer = %token, "removed finalizer");
        }
        Ok(true)
    }
}

/// Make sure `token` is on a live resource, persisting it if it was missing.
///
/// Returns whether a write happened. Resources that are already being deleted are left alone,
/// adding a finalizer to them would block their removal.
///
/// # Errors
///
/// Returns [`Error::AddFinalizer`] if the update is rejected.
pub async fn ensure_finalizer<C>(client: &C, resource: &mut ManagedResource, token: &str) -> Result<bool, Error>
where
    C: ControlPlane + ?Sized,
{
    if resource.deletion_requested() || resource.finalizers().contains(token) {
        return Ok(false);
    }
    let mut guarded = resource.clone();
    guarded.finalizers_mut().insert(token);
    *resource = client.update(&guarded).await.map_err(Error::AddFinalizer)?;
    tracing::debug!(object = %resource.object_ref(), finalizer = token, "added finalizer");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle_client::{InMemory, Verb};
    use lifecycle_core::{ErrorResponse, ResourceKind};
    use parking_lot::Mutex;

    const TOKEN: &str = "enterprise.splunk.com/delete-pvc";

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl Finalizer for Arc<Recorder> {
        async fn reap(&self, resource: &ManagedResource) -> Result<(), BoxError> {
            self.calls.lock().push(resource.name().to_string());
            if *self.fail.lock() {
                return Err("storage backend unavailable".into());
            }
            Ok(())
        }
    }

    async fn terminating(client: &InMemory, finalizers: &[&str]) -> ManagedResource {
        let mut idx = ManagedResource::new(ResourceKind::IndexerCluster, "idx").within("ns");
        for token in finalizers {
            idx = idx.finalizer(token);
        }
        let created = client.create(&idx).await.unwrap();
        client.delete(&created.object_ref()).await.unwrap();
        client.get(&created.object_ref()).await.unwrap()
    }

    #[tokio::test]
    async fn ignores_resources_that_are_not_being_deleted() {
        let client = Arc::new(InMemory::new());
        let recorder = Arc::new(Recorder::default());
        let protocol = FinalizerProtocol::new(client.clone()).register(TOKEN, recorder.clone());
        let mut idx = client
            .create(&ManagedResource::new(ResourceKind::IndexerCluster, "idx").finalizer(TOKEN))
            .await
            .unwrap();
        let before = idx.clone();
        let writes = client.journal().len();

        assert!(!protocol.check_deletion(&mut idx).await.unwrap());
        assert_eq!(idx, before);
        assert_eq!(client.journal().len(), writes);
        assert!(recorder.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn releases_finalizers_after_cleanup() {
        let client = Arc::new(InMemory::new());
        let recorder = Arc::new(Recorder::default());
        let protocol = FinalizerProtocol::new(client.clone()).register(TOKEN, recorder.clone());
        let mut idx = terminating(&client, &[TOKEN]).await;

        assert!(protocol.check_deletion(&mut idx).await.unwrap());
        assert!(idx.finalizers().is_empty());
        assert_eq!(*recorder.calls.lock(), ["idx"]);
        assert!(!client.contains(&idx.object_ref()));
    }

    #[tokio::test]
    async fn unrecognized_finalizer_aborts_before_any_cleanup() {
        let client = Arc::new(InMemory::new());
        let recorder = Arc::new(Recorder::default());
        let protocol = FinalizerProtocol::new(client.clone()).register(TOKEN, recorder.clone());
        let mut idx = terminating(&client, &[TOKEN, "example.com/other"]).await;

        let err = protocol.check_deletion(&mut idx).await.unwrap_err();
        assert!(
            matches!(err, Error::UnrecognizedFinalizer { ref finalizer, .. } if finalizer == "example.com/other")
        );
        assert_eq!(idx.finalizers().len(), 2);
        assert!(recorder.calls.lock().is_empty());
        assert!(!client.journal().iter().any(|(verb, _)| *verb == Verb::Update));
    }

    #[tokio::test]
    async fn failed_cleanup_keeps_the_token_for_a_retry() {
        let client = Arc::new(InMemory::new());
        let recorder = Arc::new(Recorder::default());
        *recorder.fail.lock() = true;
        let protocol = FinalizerProtocol::new(client.clone()).register(TOKEN, recorder.clone());
        let mut idx = terminating(&client, &[TOKEN]).await;

        let err = protocol.check_deletion(&mut idx).await.unwrap_err();
        assert!(matches!(err, Error::CleanupFailed { .. }));
        assert!(idx.finalizers().contains(TOKEN));
        assert!(client.contains(&idx.object_ref()));

        *recorder.fail.lock() = false;
        assert!(protocol.check_deletion(&mut idx).await.unwrap());
        assert_eq!(recorder.calls.lock().len(), 2);
        assert!(!client.contains(&idx.object_ref()));
    }

    #[tokio::test]
    async fn retry_only_revisits_remaining_tokens() {
        const FIRST: &str = "example.com/first";
        const SECOND: &str = "example.com/second";
        let client = Arc::new(InMemory::new());
        let (first, second) = (Arc::new(Recorder::default()), Arc::new(Recorder::default()));
        *second.fail.lock() = true;
        let protocol = FinalizerProtocol::new(client.clone())
            .register(FIRST, first.clone())
            .register(SECOND, second.clone());
        let mut idx = terminating(&client, &[FIRST, SECOND]).await;

        let err = protocol.check_deletion(&mut idx).await.unwrap_err();
        assert!(matches!(err, Error::CleanupFailed { ref finalizer, .. } if finalizer == SECOND));
        assert_eq!(idx.finalizers().iter().collect::<Vec<_>>(), [SECOND]);
        let stored = client.get(&idx.object_ref()).await.unwrap();
        assert_eq!(stored.finalizers().iter().collect::<Vec<_>>(), [SECOND]);

        *second.fail.lock() = false;
        assert!(protocol.check_deletion(&mut idx).await.unwrap());
        assert_eq!(first.calls.lock().len(), 1);
        assert_eq!(second.calls.lock().len(), 2);
        assert!(!client.contains(&idx.object_ref()));
    }

    #[tokio::test]
    async fn failed_update_is_reported_as_remove_failure() {
        let client = Arc::new(InMemory::new());
        let protocol = FinalizerProtocol::new(client.clone()).register(TOKEN, Arc::new(Recorder::default()));
        let mut idx = terminating(&client, &[TOKEN]).await;
        client.fail_once(Verb::Update, "idx", ErrorResponse::internal("etcd unavailable"));

        let err = protocol.check_deletion(&mut idx).await.unwrap_err();
        assert!(matches!(err, Error::RemoveFinalizer { .. }));
        assert!(idx.finalizers().contains(TOKEN));
    }

    #[tokio::test]
    async fn future_deletion_timestamps_are_processed() {
        let client = Arc::new(InMemory::new());
        let recorder = Arc::new(Recorder::default());
        let protocol = FinalizerProtocol::new(client.clone()).register(TOKEN, recorder.clone());
        let mut idx = client
            .create(&ManagedResource::new(ResourceKind::IndexerCluster, "idx").finalizer(TOKEN))
            .await
            .unwrap();
        idx.metadata.deletion_timestamp = Some(Timestamp::now() + jiff::SignedDuration::from_hours(1));

        assert!(protocol.check_deletion(&mut idx).await.unwrap());
        assert_eq!(recorder.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn ensure_finalizer_is_idempotent() {
        let client = InMemory::new();
        let mut s1 = client
            .create(&ManagedResource::new(ResourceKind::Standalone, "s1").within("ns"))
            .await
            .unwrap();
        assert!(ensure_finalizer(&client, &mut s1, TOKEN).await.unwrap());
        assert!(!ensure_finalizer(&client, &mut s1, TOKEN).await.unwrap());
        let stored = client.get(&s1.object_ref()).await.unwrap();
        assert_eq!(stored.finalizers().iter().collect::<Vec<_>>(), [TOKEN]);
    }
}
