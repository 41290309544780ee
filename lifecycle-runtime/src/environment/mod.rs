//! Namespace-isolated deployments of the operator and its custom resources
use crate::{
    orchestrator::{self, Orchestrator, Teardown},
    wait::{self, conditions, Condition},
    Config,
};
use lifecycle_client::ControlPlane;
use lifecycle_core::{ManagedResource, ObjectRef, ResourceKind};
use rand::Rng;
use std::{path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;

pub mod descriptors;

/// Operator image used when none is configured
pub const DEFAULT_OPERATOR_IMAGE: &str = "splunk/splunk-operator";
/// Splunk enterprise image used when none is configured
pub const DEFAULT_SPLUNK_IMAGE: &str = "splunk/splunk:latest";
/// Spark image used when none is configured
pub const DEFAULT_SPARK_IMAGE: &str = "splunk/spark";

const LOWERCASE_ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error(transparent)]
    Orchestrator(#[from] orchestrator::Error),
    #[error("no license file path specified")]
    MissingLicense,
    #[error("{object} changed while expected to stay stable: {source}")]
    Unstable {
        object: ObjectRef,
        #[source]
        source: wait::Error<lifecycle_client::Error>,
    },
    #[error("failed to read license file {}: {source}", .path.display())]
    LicenseFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A random name that is valid as a DNS label, `len` lowercase alphanumerics starting with a letter
pub fn random_dns_name(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|i| {
            let pool = if i == 0 {
                &LOWERCASE_ALPHANUMERIC[..26]
            } else {
                LOWERCASE_ALPHANUMERIC
            };
            char::from(pool[rng.random_range(0..pool.len())])
        })
        .collect()
}

/// What an [`Environment`] deploys and how it waits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Image of the operator deployment
    pub operator_image: String,
    /// Splunk enterprise image handed to the operator
    pub splunk_image: String,
    /// Spark image handed to the operator
    pub spark_image: String,
    /// License installed into the namespace, required for license masters
    pub license_file_path: Option<PathBuf>,
    /// Timing and teardown policy of every orchestrator in the environment
    pub runtime: Config,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            operator_image: DEFAULT_OPERATOR_IMAGE.into(),
            splunk_image: DEFAULT_SPLUNK_IMAGE.into(),
            spark_image: DEFAULT_SPARK_IMAGE.into(),
            license_file_path: None,
            runtime: Config::default(),
        }
    }
}

/// A namespace with its own operator, torn down as a unit.
///
/// [`Environment::initialize`] creates, in order, the namespace, a service account, a role, its
/// binding, the license config map when a license file is configured, and the operator.
/// [`Environment::destroy`] removes them in reverse.
#[derive(Debug)]
pub struct Environment<C: ?Sized> {
    name: String,
    namespace: String,
    service_account: String,
    role: String,
    role_binding: String,
    operator: String,
    license_config_map: String,
    config: EnvironmentConfig,
    orchestrator: Orchestrator<C>,
    initialized: bool,
}

impl<C> Environment<C>
where
    C: ControlPlane + ?Sized + 'static,
{
    /// An environment whose objects are all derived from `name`
    pub fn new(client: Arc<C>, name: &str, config: EnvironmentConfig) -> Self {
        let orchestrator = Orchestrator::new(client, config.runtime.clone());
        Self {
            name: name.to_string(),
            namespace: format!("ns-{name}"),
            service_account: format!("sa-{name}"),
            role: format!("role-{name}"),
            role_binding: format!("rolebinding-{name}"),
            operator: format!("op-{name}"),
            license_config_map: format!("licenses-{name}"),
            config,
            orchestrator,
            initialized: false,
        }
    }

    /// The name everything else is derived from
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The namespace all objects live in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether [`Environment::initialize`] completed and [`Environment::destroy`] was not called since
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Create the namespace, access control objects and operator, waiting for each to be usable
    ///
    /// Objects created before a failure stay registered and are removed by [`Environment::destroy`].
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn initialize(&mut self) -> Result<(), Error> {
        tracing::info!("initializing environment");
        let ns = descriptors::namespace(&self.namespace);
        // a namespace lingers as Terminating until its content is gone
        let gone = Teardown::until(conditions::has_phase("Terminating").not());
        let ns = self.orchestrator.create_with(&ns, gone).await?;
        self.orchestrator
            .wait_for(&ns.object_ref(), conditions::has_phase("Active"))
            .await?;

        let access = [
            descriptors::service_account(&self.service_account, &self.namespace),
            descriptors::role(&self.role, &self.namespace),
            descriptors::role_binding(&self.role_binding, &self.service_account, &self.namespace, &self.role),
        ];
        for object in &access {
            self.orchestrator.create_with(object, Teardown::DeleteOnly).await?;
        }

        if let Some(path) = &self.config.license_file_path {
            let license = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| Error::LicenseFile {
                    path: path.clone(),
                    source,
                })?;
            let cm = descriptors::license_config_map(&self.license_config_map, &self.namespace, &license);
            self.orchestrator.create_with(&cm, Teardown::DeleteOnly).await?;
        }

        let op = descriptors::operator(
            &self.operator,
            &self.namespace,
            &self.service_account,
            &self.config.operator_image,
            &self.config.splunk_image,
            &self.config.spark_image,
        );
        let op = self.orchestrator.create_with(&op, Teardown::DeleteOnly).await?;
        self.orchestrator
            .wait_for(&op.object_ref(), conditions::has_ready_replicas())
            .await?;

        self.initialized = true;
        tracing::info!(
            operator_image = %self.config.operator_image,
            splunk_image = %self.config.splunk_image,
            spark_image = %self.config.spark_image,
            "environment initialized"
        );
        Ok(())
    }

    /// Tear down everything [`Environment::initialize`] created, newest first
    ///
    /// Does nothing when teardown is skipped.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn destroy(&mut self) -> Result<(), Error> {
        if self.config.runtime.skip_teardown {
            tracing::info!("environment teardown is skipped");
            return Ok(());
        }
        self.initialized = false;
        self.orchestrator.teardown_all().await?;
        tracing::info!("environment deleted");
        Ok(())
    }

    /// A deployment of custom resources inside this environment, with its own teardown
    pub fn new_deployment(&self, name: &str) -> Deployment<C> {
        let license_config_map = self
            .config
            .license_file_path
            .as_ref()
            .map(|_| self.license_config_map.clone());
        Deployment {
            name: name.to_string(),
            namespace: self.namespace.clone(),
            license_config_map,
            orchestrator: Orchestrator::new(self.orchestrator.client().clone(), self.config.runtime.clone()),
        }
    }
}

/// A set of custom resources deployed into an [`Environment`].
///
/// Tearing down a deployment deletes its custom resources and waits until their finalizers
/// released them, leaving the environment itself in place.
#[derive(Debug)]
pub struct Deployment<C: ?Sized> {
    name: String,
    namespace: String,
    license_config_map: Option<String>,
    orchestrator: Orchestrator<C>,
}

impl<C> Deployment<C>
where
    C: ControlPlane + ?Sized + 'static,
{
    /// Name of the deployment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deploy a standalone instance
    pub async fn deploy_standalone(&mut self, name: &str) -> Result<ManagedResource, Error> {
        self.deploy(descriptors::standalone(name, &self.namespace)).await
    }

    /// Deploy a license master using the environment license
    ///
    /// # Errors
    ///
    /// [`Error::MissingLicense`] if the environment was configured without a license file.
    pub async fn deploy_license_master(&mut self, name: &str) -> Result<ManagedResource, Error> {
        let cm = self.license_config_map.as_deref().ok_or(Error::MissingLicense)?;
        self.deploy(descriptors::license_master(name, &self.namespace, cm)).await
    }

    /// Deploy an indexer cluster of `replicas` indexers
    pub async fn deploy_indexer_cluster(
        &mut self,
        name: &str,
        license_master: Option<&str>,
        replicas: u32,
    ) -> Result<ManagedResource, Error> {
        let idx = descriptors::indexer_cluster(name, &self.namespace, license_master, replicas);
        self.deploy(idx).await
    }

    /// Deploy a search head cluster searching `indexer_cluster`
    pub async fn deploy_search_head_cluster(
        &mut self,
        name: &str,
        indexer_cluster: &str,
        license_master: Option<&str>,
    ) -> Result<ManagedResource, Error> {
        let shc = descriptors::search_head_cluster(name, &self.namespace, indexer_cluster, license_master);
        self.deploy(shc).await
    }

    /// Fetch a resource of this deployment
    pub async fn get(&self, kind: ResourceKind, name: &str) -> Result<ManagedResource, Error> {
        Ok(self.orchestrator.get(&self.object_ref(kind, name)).await?)
    }

    /// Wait until a custom resource reports phase `Ready`
    pub async fn wait_ready(&self, kind: ResourceKind, name: &str) -> Result<ManagedResource, Error> {
        self.wait_for(kind, name, conditions::has_phase("Ready")).await
    }

    /// Wait until `cond` holds for a resource of this deployment
    pub async fn wait_for(
        &self,
        kind: ResourceKind,
        name: &str,
        cond: impl Condition<ManagedResource>,
    ) -> Result<ManagedResource, Error> {
        let object = self.object_ref(kind, name);
        // an absent object cannot be returned, so absence never counts as success here
        let found = self
            .orchestrator
            .wait_for(&object, conditions::exists().and(cond))
            .await?;
        match found {
            Some(found) => Ok(found),
            None => Ok(self.orchestrator.get(&object).await?),
        }
    }

    /// Check that a resource of this deployment is left alone for `duration`
    ///
    /// The resource version is compared on every poll, so any write to the object, status
    /// included, counts as a change. Returns the object as first read.
    ///
    /// # Errors
    ///
    /// [`Error::Unstable`] on the first change, or if the object can no longer be read.
    pub async fn ensure_stable(
        &self,
        kind: ResourceKind,
        name: &str,
        duration: Duration,
    ) -> Result<ManagedResource, Error> {
        let object = self.object_ref(kind, name);
        let baseline = self.orchestrator.get(&object).await?;
        let version = baseline.metadata.resource_version.as_deref();
        let (client, target) = (&**self.orchestrator.client(), &object);
        let interval = self.orchestrator.config().poll_interval;
        wait::holds_for(interval, duration, move || async move {
            client
                .get(target)
                .await
                .map(|current| current.metadata.resource_version.as_deref() == version)
        })
        .await
        .map_err(|source| Error::Unstable {
            object: object.clone(),
            source,
        })?;
        Ok(baseline)
    }

    /// Delete every resource of this deployment, newest first
    #[tracing::instrument(skip(self), fields(deployment = %self.name))]
    pub async fn teardown(&mut self) -> Result<(), Error> {
        self.orchestrator.teardown_all().await?;
        tracing::info!("deployment deleted");
        Ok(())
    }

    async fn deploy(&mut self, resource: ManagedResource) -> Result<ManagedResource, Error> {
        Ok(self.orchestrator.create(&resource).await?)
    }

    fn object_ref(&self, kind: ResourceKind, name: &str) -> ObjectRef {
        ObjectRef::new(kind, name).within(&self.namespace)
    }
}
