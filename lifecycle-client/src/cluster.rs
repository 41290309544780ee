//! A [`ControlPlane`] backed by a Kubernetes apiserver
use crate::{ControlPlane, Error, Result};
use async_trait::async_trait;
use jiff::Timestamp;
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, chrono::DateTime};
use kube::{
    api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams},
    core::GroupVersionKind,
    Client,
};
use lifecycle_core::{ErrorResponse, ManagedResource, ObjectMeta, ObjectRef, ResourceKind, Selector};

/// Talks to a cluster through `Api<DynamicObject>`, one api per kind and namespace.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Infer the cluster from the environment (kubeconfig or in-cluster)
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await.map_err(Error::Kube)?))
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        match namespace {
            Some(ns) if kind.is_namespaced() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn api_resource(kind: &ResourceKind) -> ApiResource {
    let ar = kind.api_resource();
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind),
        &ar.plural,
    )
}

fn map_err(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) => Error::Api(ErrorResponse {
            status: resp.status,
            message: resp.message,
            reason: resp.reason,
            code: resp.code,
        }),
        other => Error::Kube(other),
    }
}

fn to_dynamic(resource: &ManagedResource) -> DynamicObject {
    let mut obj =
        DynamicObject::new(resource.name(), &api_resource(&resource.kind)).data(resource.data.clone());
    if let Some(ns) = resource.namespace() {
        obj = obj.within(ns);
    }
    let meta = &resource.metadata;
    obj.metadata.uid = meta.uid.clone();
    obj.metadata.resource_version = meta.resource_version.clone();
    obj.metadata.labels = (!meta.labels.is_empty()).then(|| meta.labels.clone());
    obj.metadata.finalizers =
        (!meta.finalizers.is_empty()).then(|| meta.finalizers.as_slice().to_vec());
    obj.metadata.deletion_timestamp = meta.deletion_timestamp.and_then(to_time);
    obj
}

// the apiserver never reports instants before the epoch
fn to_time(ts: Timestamp) -> Option<Time> {
    let nanos = u32::try_from(ts.subsec_nanosecond()).ok()?;
    DateTime::from_timestamp(ts.as_second(), nanos).map(Time)
}

fn from_time(time: &Time) -> Result<Timestamp> {
    let nanos = i32::try_from(time.0.timestamp_subsec_nanos()).unwrap_or(i32::MAX);
    Timestamp::new(time.0.timestamp(), nanos).map_err(Error::InvalidTimestamp)
}

fn from_dynamic(kind: &ResourceKind, obj: DynamicObject) -> Result<ManagedResource> {
    let meta = obj.metadata;
    let deletion_timestamp = meta.deletion_timestamp.as_ref().map(from_time).transpose()?;
    Ok(ManagedResource {
        kind: kind.clone(),
        metadata: ObjectMeta {
            name: meta.name,
            namespace: meta.namespace,
            uid: meta.uid,
            resource_version: meta.resource_version,
            labels: meta.labels.unwrap_or_default(),
            finalizers: meta.finalizers.unwrap_or_default().into(),
            deletion_timestamp,
        },
        data: obj.data,
    })
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get(&self, obj: &ObjectRef) -> Result<ManagedResource> {
        let found = self
            .api(&obj.kind, obj.namespace.as_deref())
            .get(&obj.name)
            .await
            .map_err(map_err)?;
        from_dynamic(&obj.kind, found)
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ManagedResource>> {
        let lp = ListParams::default().labels(&selector.to_selector_string());
        let list = self.api(kind, namespace).list(&lp).await.map_err(map_err)?;
        list.items.into_iter().map(|o| from_dynamic(kind, o)).collect()
    }

    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource> {
        let created = self
            .api(&resource.kind, resource.namespace())
            .create(&PostParams::default(), &to_dynamic(resource))
            .await
            .map_err(map_err)?;
        from_dynamic(&resource.kind, created)
    }

    async fn delete(&self, obj: &ObjectRef) -> Result<()> {
        self.api(&obj.kind, obj.namespace.as_deref())
            .delete(&obj.name, &DeleteParams::default())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource> {
        if resource.metadata.name.is_none() {
            return Err(Error::UnnamedObject);
        }
        let replaced = self
            .api(&resource.kind, resource.namespace())
            .replace(resource.name(), &PostParams::default(), &to_dynamic(resource))
            .await
            .map_err(map_err)?;
        from_dynamic(&resource.kind, replaced)
    }
}
