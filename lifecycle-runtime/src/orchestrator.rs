//! Creation of resources with registered, ordered teardown
use crate::{
    cleanup::{CleanupAction, CleanupStack, DrainError},
    wait::{self, await_condition, conditions, Condition},
    Config,
};
use lifecycle_client::ControlPlane;
use lifecycle_core::{ManagedResource, ObjectRef};
use std::{fmt, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    /// Nothing was registered for teardown
    #[error("failed to create {object}: {source}")]
    Create {
        object: ObjectRef,
        #[source]
        source: lifecycle_client::Error,
    },
    #[error("{object} did not reach the desired state: {source}")]
    AwaitReady {
        object: ObjectRef,
        #[source]
        source: wait::Error<lifecycle_client::Error>,
    },
    #[error("failed to delete {object}: {source}")]
    Delete {
        object: ObjectRef,
        #[source]
        source: lifecycle_client::Error,
    },
    #[error("{object} was not removed: {source}")]
    AwaitDeleted {
        object: ObjectRef,
        #[source]
        source: wait::Error<lifecycle_client::Error>,
    },
    #[error("failed to get {object}: {source}")]
    Get {
        object: ObjectRef,
        #[source]
        source: lifecycle_client::Error,
    },
    #[error("teardown incomplete: {0}")]
    Teardown(#[source] DrainError),
}

/// How a created resource is undone
#[derive(Clone, Default)]
pub enum Teardown {
    /// Delete, then wait until the object is gone
    #[default]
    DeleteAndWait,
    /// Delete without waiting, for objects that vanish on their own schedule
    DeleteOnly,
    /// Delete, then wait until a custom condition holds
    DeleteAndAwait(Arc<dyn Condition<ManagedResource> + Send + Sync>),
}

impl Teardown {
    /// Delete, then wait until `cond` holds
    pub fn until(cond: impl Condition<ManagedResource> + Send + Sync + 'static) -> Self {
        Self::DeleteAndAwait(Arc::new(cond))
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteAndWait => f.write_str("DeleteAndWait"),
            Self::DeleteOnly => f.write_str("DeleteOnly"),
            Self::DeleteAndAwait(_) => f.write_str("DeleteAndAwait(..)"),
        }
    }
}

/// Creates resources, waits for them, and remembers how to tear each one down.
///
/// Every successful creation registers exactly one [`CleanupAction`]; [`Orchestrator::teardown_all`]
/// runs them newest first. A creation that fails registers nothing.
///
/// ```
/// use lifecycle_client::InMemory;
/// use lifecycle_core::{ManagedResource, ResourceKind};
/// use lifecycle_runtime::{Config, Orchestrator};
/// use std::sync::Arc;
///
/// # async fn wrapper() -> Result<(), lifecycle_runtime::orchestrator::Error> {
/// let mut orchestrator = Orchestrator::new(Arc::new(InMemory::new()), Config::default());
/// orchestrator
///     .create(&ManagedResource::new(ResourceKind::Namespace, "ns-demo"))
///     .await?;
/// assert_eq!(orchestrator.cleanup_len(), 1);
/// orchestrator.teardown_all().await?;
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator<C: ?Sized> {
    client: Arc<C>,
    config: Config,
    cleanup: CleanupStack,
}

impl<C: ?Sized> fmt::Debug for Orchestrator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

impl<C> Orchestrator<C>
where
    C: ControlPlane + ?Sized + 'static,
{
    /// An orchestrator with nothing registered
    pub fn new(client: Arc<C>, config: Config) -> Self {
        Self {
            client,
            config,
            cleanup: CleanupStack::new(),
        }
    }

    /// The control plane this orchestrator talks to
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Timing and teardown policy
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of registered cleanup actions
    pub fn cleanup_len(&self) -> usize {
        self.cleanup.len()
    }

    /// Register an extra cleanup action, run in order with the ones from creations
    pub fn defer(&mut self, action: CleanupAction) {
        self.cleanup.push(action);
    }

    /// Create `resource`, register its deletion, and wait until it can be read back.
    ///
    /// Returns the object as read back.
    pub async fn create(&mut self, resource: &ManagedResource) -> Result<ManagedResource, Error> {
        self.create_with(resource, Teardown::DeleteAndWait).await
    }

    /// Like [`Orchestrator::create`] with a chosen [`Teardown`]
    ///
    /// # Errors
    ///
    /// [`Error::Create`] leaves nothing registered. [`Error::AwaitReady`] happens after
    /// registration, so the object is still torn down later.
    #[tracing::instrument(skip(self, resource), fields(object = %resource.object_ref()))]
    pub async fn create_with(
        &mut self,
        resource: &ManagedResource,
        teardown: Teardown,
    ) -> Result<ManagedResource, Error> {
        let created = self.client.create(resource).await.map_err(|source| Error::Create {
            object: resource.object_ref(),
            source,
        })?;
        tracing::info!("created");
        let action = self.teardown_action(&created, teardown);
        self.cleanup.push(action);

        let object = created.object_ref();
        let seen = self.wait_for(&object, conditions::exists()).await?;
        Ok(seen.unwrap_or(created))
    }

    /// Wait until `cond` holds for `object`, with the configured interval and timeout
    ///
    /// Returns the object as last seen, `None` if the condition held for its absence.
    pub async fn wait_for(
        &self,
        object: &ObjectRef,
        cond: impl Condition<ManagedResource>,
    ) -> Result<Option<ManagedResource>, Error> {
        await_condition(
            &*self.client,
            object,
            cond,
            self.config.poll_interval,
            self.config.timeout,
        )
        .await
        .map_err(|source| Error::AwaitReady {
            object: object.clone(),
            source,
        })
    }

    /// Fetch the current state of `object`
    pub async fn get(&self, object: &ObjectRef) -> Result<ManagedResource, Error> {
        self.client.get(object).await.map_err(|source| Error::Get {
            object: object.clone(),
            source,
        })
    }

    /// Delete `object` and wait until it is gone, outside of the registered teardown
    ///
    /// An object that is already gone counts as deleted.
    pub async fn delete_and_wait(&self, object: &ObjectRef) -> Result<(), Error> {
        delete_and_await(&*self.client, object, None, &Teardown::DeleteAndWait, &self.config).await
    }

    /// Run every registered cleanup action, newest first.
    ///
    /// With [`Config::skip_teardown`] set this does nothing and leaves the actions registered.
    ///
    /// # Errors
    ///
    /// [`Error::Teardown`] carries every failed action. Failures do not stop the remaining actions.
    pub async fn teardown_all(&mut self) -> Result<(), Error> {
        if self.config.skip_teardown {
            tracing::info!(pending = self.cleanup.len(), "skipping teardown");
            return Ok(());
        }
        tracing::info!(pending = self.cleanup.len(), "tearing down");
        self.cleanup.drain_all().await.map_err(Error::Teardown)
    }

    fn teardown_action(&self, created: &ManagedResource, teardown: Teardown) -> CleanupAction {
        let client = self.client.clone();
        let config = self.config.clone();
        let object = created.object_ref();
        let uid = created.uid().map(String::from);
        CleanupAction::new(format!("delete {object}"), move || async move {
            delete_and_await(&*client, &object, uid.as_deref(), &teardown, &config).await
        })
    }
}

async fn delete_and_await<C>(
    client: &C,
    object: &ObjectRef,
    uid: Option<&str>,
    teardown: &Teardown,
    config: &Config,
) -> Result<(), Error>
where
    C: ControlPlane + ?Sized,
{
    match client.delete(object).await {
        Ok(()) => tracing::info!(%object, "deleted"),
        Err(err) if err.is_not_found() => tracing::debug!(%object, "already gone"),
        Err(source) => {
            return Err(Error::Delete {
                object: object.clone(),
                source,
            })
        }
    }

    let (interval, timeout) = (config.poll_interval, config.timeout);
    let waited = match (teardown, uid) {
        (Teardown::DeleteOnly, _) => return Ok(()),
        (Teardown::DeleteAndWait, Some(uid)) => {
            await_condition(client, object, conditions::is_deleted(uid), interval, timeout).await
        }
        (Teardown::DeleteAndWait, None) => {
            let gone = |obj: Option<&ManagedResource>| obj.is_none();
            await_condition(client, object, gone, interval, timeout).await
        }
        (Teardown::DeleteAndAwait(cond), _) => {
            let cond = |obj: Option<&ManagedResource>| cond.matches_object(obj);
            await_condition(client, object, cond, interval, timeout).await
        }
    };
    waited.map(|_| ()).map_err(|source| Error::AwaitDeleted {
        object: object.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle_client::{InMemory, Verb};
    use lifecycle_core::{ErrorResponse, ResourceKind};
    use std::time::Duration;

    fn config() -> Config {
        Config::default()
            .poll_interval(Duration::from_secs(1))
            .timeout(Duration::from_secs(10))
    }

    fn standalone(name: &str) -> ManagedResource {
        ManagedResource::new(ResourceKind::Standalone, name).within("ns")
    }

    #[tokio::test(start_paused = true)]
    async fn create_registers_teardown_and_waits_for_visibility() {
        let client = Arc::new(InMemory::new().with_lag(3));
        let mut orchestrator = Orchestrator::new(client.clone(), config());
        let created = orchestrator.create(&standalone("s1")).await.unwrap();
        assert!(created.uid().is_some());
        assert_eq!(orchestrator.cleanup_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_create_registers_nothing() {
        let client = Arc::new(InMemory::new());
        client.fail_once(Verb::Create, "s1", ErrorResponse::internal("admission webhook down"));
        let mut orchestrator = Orchestrator::new(client.clone(), config());

        let err = orchestrator.create(&standalone("s1")).await.unwrap_err();
        assert!(matches!(err, Error::Create { .. }));
        assert_eq!(orchestrator.cleanup_len(), 0);

        orchestrator.create(&standalone("s1")).await.unwrap();
        let err = orchestrator.create(&standalone("s1")).await.unwrap_err();
        assert!(matches!(err, Error::Create { ref source, .. } if source.is_conflict()));
        assert_eq!(orchestrator.cleanup_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_runs_in_reverse_creation_order() {
        let client = Arc::new(InMemory::new().with_lag(1));
        let mut orchestrator = Orchestrator::new(client.clone(), config());
        for name in ["a", "b", "c"] {
            orchestrator.create(&standalone(name)).await.unwrap();
        }
        orchestrator.teardown_all().await.unwrap();

        let deleted: Vec<_> = client.deletions().into_iter().map(|o| o.name).collect();
        assert_eq!(deleted, ["c", "b", "a"]);
        assert_eq!(orchestrator.cleanup_len(), 0);
        assert_eq!(client.count(&ResourceKind::Standalone), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_does_not_stop_teardown() {
        let client = Arc::new(InMemory::new());
        let mut orchestrator = Orchestrator::new(client.clone(), config());
        for name in ["a", "b", "c"] {
            orchestrator.create(&standalone(name)).await.unwrap();
        }
        client.fail_once(Verb::Delete, "b", ErrorResponse::internal("etcd unavailable"));

        let err = orchestrator.teardown_all().await.unwrap_err();
        let Error::Teardown(drain) = err else {
            panic!("expected a teardown error, got {err:?}");
        };
        assert_eq!(drain.len(), 1);
        assert_eq!(drain.last().unwrap().description, "delete Standalone/ns/b");
        assert!(!client.contains(&standalone("a").object_ref()));
        assert!(client.contains(&standalone("b").object_ref()));
        assert!(!client.contains(&standalone("c").object_ref()));
    }

    #[tokio::test(start_paused = true)]
    async fn skip_teardown_leaves_everything_registered() {
        let client = Arc::new(InMemory::new());
        let mut orchestrator = Orchestrator::new(client.clone(), config().skip_teardown(true));
        orchestrator.create(&standalone("a")).await.unwrap();
        orchestrator.create(&standalone("b")).await.unwrap();

        orchestrator.teardown_all().await.unwrap();
        assert_eq!(orchestrator.cleanup_len(), 2);
        assert!(client.deletions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_removal_times_out_while_finalizers_hold() {
        let client = Arc::new(InMemory::new());
        let mut orchestrator = Orchestrator::new(client.clone(), config());
        let guarded = standalone("s1").finalizer("enterprise.splunk.com/delete-pvc");
        orchestrator.create(&guarded).await.unwrap();

        let Err(Error::Teardown(drain)) = orchestrator.teardown_all().await else {
            panic!("expected teardown to fail");
        };
        let source = drain.last().unwrap().error.downcast_ref::<Error>();
        assert!(matches!(source, Some(Error::AwaitDeleted { source, .. }) if source.is_timeout()));
        assert!(client.get(&guarded.object_ref()).await.unwrap().deletion_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_only_does_not_wait() {
        let client = Arc::new(InMemory::new());
        let mut orchestrator = Orchestrator::new(client.clone(), config());
        let guarded = standalone("s1").finalizer("enterprise.splunk.com/delete-pvc");
        orchestrator.create_with(&guarded, Teardown::DeleteOnly).await.unwrap();

        orchestrator.teardown_all().await.unwrap();
        assert!(client.contains(&guarded.object_ref()));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_teardown_condition() {
        let client = Arc::new(InMemory::new());
        let mut orchestrator = Orchestrator::new(client.clone(), config());
        let guarded = standalone("s1").finalizer("enterprise.splunk.com/delete-pvc");
        let teardown = Teardown::until(|obj: Option<&ManagedResource>| {
            obj.map_or(true, ManagedResource::deletion_requested)
        });
        orchestrator.create_with(&guarded, teardown).await.unwrap();

        orchestrator.teardown_all().await.unwrap();
        assert!(client.contains(&guarded.object_ref()));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_wait_treats_missing_objects_as_deleted() {
        let client = Arc::new(InMemory::new());
        let orchestrator = Orchestrator::new(client.clone(), config());
        orchestrator.delete_and_wait(&standalone("ghost").object_ref()).await.unwrap();

        let seeded = client.insert(standalone("s1"));
        orchestrator.delete_and_wait(&seeded.object_ref()).await.unwrap();
        let err = orchestrator.get(&seeded.object_ref()).await.unwrap_err();
        assert!(matches!(err, Error::Get { ref source, .. } if source.is_not_found()));
    }
}
