//! An in-process control plane
//!
//! [`InMemory`] stores objects in a map and reproduces the apiserver behavior the
//! lifecycle runtime has to cope with:
//!
//! - deleting an object that still has finalizers only stamps `deletionTimestamp`;
//!   the object disappears once an update drains its finalizer set
//! - reads can lag behind writes ([`InMemory::with_lag`])
//! - individual calls can be made to fail ([`InMemory::fail_times`])
//! - every write is recorded in a [`journal`](InMemory::journal)
use crate::{Error, Result};
use async_trait::async_trait;
use jiff::Timestamp;
use lifecycle_core::{ErrorResponse, ManagedResource, ObjectRef, ResourceKind, Selector};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// A control plane verb, used to target injected failures and in the journal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// [`ControlPlane::get`](crate::ControlPlane::get)
    Get,
    /// [`ControlPlane::list`](crate::ControlPlane::list)
    List,
    /// [`ControlPlane::create`](crate::ControlPlane::create)
    Create,
    /// [`ControlPlane::delete`](crate::ControlPlane::delete)
    Delete,
    /// [`ControlPlane::update`](crate::ControlPlane::update)
    Update,
}

/// How a stored object currently appears to readers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Visibility {
    /// Created, but the next `n` reads still miss it
    Pending(u32),
    Visible,
    /// Physically removed, but the next `n` reads still see it
    Removing(u32),
}

struct Entry {
    object: ManagedResource,
    visibility: Visibility,
}

struct Fault {
    error: ErrorResponse,
    remaining: usize,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Entry>,
    faults: HashMap<(Verb, String), Fault>,
    journal: Vec<(Verb, ObjectRef)>,
    next_uid: u64,
    next_version: u64,
}

impl State {
    fn next_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("00000000-0000-0000-0000-{:012}", self.next_uid)
    }

    fn next_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn take_fault(&mut self, verb: Verb, target: &str) -> Result<()> {
        let key = (verb, target.to_string());
        let Some(fault) = self.faults.get_mut(&key) else {
            return Ok(());
        };
        fault.remaining -= 1;
        let error = fault.error.clone();
        if fault.remaining == 0 {
            self.faults.remove(&key);
        }
        tracing::debug!(?verb, target, "injected failure");
        Err(Error::Api(error))
    }

    /// Start physical removal of an object whose finalizers are drained.
    fn remove(&mut self, key: &str, lag: u32) {
        let namespace = match self.objects.get_mut(key) {
            Some(entry) if lag > 0 => {
                entry.visibility = Visibility::Removing(lag);
                return;
            }
            Some(entry) if entry.object.kind == ResourceKind::Namespace => {
                Some(entry.object.name().to_string())
            }
            Some(_) => None,
            None => return,
        };
        self.objects.remove(key);
        // namespace removal takes its content along
        if let Some(ns) = namespace {
            self.objects.retain(|_, e| e.object.namespace() != Some(ns.as_str()));
        }
    }
}

/// An in-process [`ControlPlane`](crate::ControlPlane).
///
/// Cloning is not supported; share it behind an `Arc`.
#[derive(Default)]
pub struct InMemory {
    state: Mutex<State>,
    lag: u32,
    controllers: bool,
}

fn key(obj: &ObjectRef) -> String {
    obj.to_string()
}

fn not_found(obj: &ObjectRef) -> Error {
    Error::Api(ErrorResponse::not_found(obj.kind.kind(), &obj.name))
}

impl InMemory {
    /// An empty control plane with consistent reads
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads lag `reads` calls behind creations and removals
    #[must_use]
    pub fn with_lag(mut self, reads: u32) -> Self {
        self.lag = reads;
        self
    }

    /// Fill in the status a running controller would report for created objects
    ///
    /// Namespaces become `Active`, deployments report all replicas ready and
    /// enterprise resources report phase `Ready`.
    #[must_use]
    pub fn with_simulated_controllers(mut self) -> Self {
        self.controllers = true;
        self
    }

    /// Store an object directly, visible immediately and without a journal entry
    pub fn insert(&self, mut resource: ManagedResource) -> ManagedResource {
        let mut state = self.state.lock();
        resource.metadata.uid = Some(state.next_uid());
        resource.metadata.resource_version = Some(state.next_version());
        state.objects.insert(key(&resource.object_ref()), Entry {
            object: resource.clone(),
            visibility: Visibility::Visible,
        });
        resource
    }

    /// Make the next `times` calls of `verb` against `target` fail with `error`
    ///
    /// `target` is the object name, or the kind name for [`Verb::List`].
    pub fn fail_times(&self, verb: Verb, target: &str, error: ErrorResponse, times: usize) {
        if times == 0 {
            return;
        }
        self.state.lock().faults.insert((verb, target.to_string()), Fault {
            error,
            remaining: times,
        });
    }

    /// Make the next call of `verb` against `target` fail with `error`
    pub fn fail_once(&self, verb: Verb, target: &str, error: ErrorResponse) {
        self.fail_times(verb, target, error, 1);
    }

    /// Overwrite the `status` of a stored object, as a controller would
    pub fn set_status(&self, obj: &ObjectRef, status: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock();
        let version = state.next_version();
        let entry = state.objects.get_mut(&key(obj)).ok_or_else(|| not_found(obj))?;
        set_field(&mut entry.object.data, "status", status);
        entry.object.metadata.resource_version = Some(version);
        Ok(())
    }

    /// Every write issued so far, in order
    pub fn journal(&self) -> Vec<(Verb, ObjectRef)> {
        self.state.lock().journal.clone()
    }

    /// Every object a delete was issued for, in order
    pub fn deletions(&self) -> Vec<ObjectRef> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|(verb, _)| *verb == Verb::Delete)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Whether the object is physically stored, ignoring read lag
    pub fn contains(&self, obj: &ObjectRef) -> bool {
        self.state.lock().objects.contains_key(&key(obj))
    }

    /// Number of stored objects of `kind`, ignoring read lag
    pub fn count(&self, kind: &ResourceKind) -> usize {
        self.state
            .lock()
            .objects
            .values()
            .filter(|e| &e.object.kind == kind)
            .count()
    }

    fn simulate_status(resource: &mut ManagedResource) {
        let status = match resource.kind {
            ResourceKind::Namespace => serde_json::json!({ "phase": "Active" }),
            ResourceKind::Deployment => {
                let replicas = resource
                    .data
                    .pointer("/spec/replicas")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(1);
                serde_json::json!({
                    "replicas": replicas,
                    "updatedReplicas": replicas,
                    "readyReplicas": replicas,
                })
            }
            ref kind if kind.is_enterprise() => serde_json::json!({ "phase": "Ready" }),
            _ => return,
        };
        set_field(&mut resource.data, "status", status);
    }
}

fn set_field(data: &mut serde_json::Value, field: &str, value: serde_json::Value) {
    if !data.is_object() {
        *data = serde_json::Value::Object(serde_json::Map::new());
    }
    if let Some(map) = data.as_object_mut() {
        map.insert(field.to_string(), value);
    }
}

#[async_trait]
impl crate::ControlPlane for InMemory {
    async fn get(&self, obj: &ObjectRef) -> Result<ManagedResource> {
        let mut state = self.state.lock();
        state.take_fault(Verb::Get, &obj.name)?;
        let k = key(obj);
        let Some(entry) = state.objects.get_mut(&k) else {
            return Err(not_found(obj));
        };
        let visibility = entry.visibility;
        match visibility {
            Visibility::Visible => Ok(entry.object.clone()),
            Visibility::Pending(n) => {
                entry.visibility = if n <= 1 {
                    Visibility::Visible
                } else {
                    Visibility::Pending(n - 1)
                };
                Err(not_found(obj))
            }
            Visibility::Removing(n) => {
                let object = entry.object.clone();
                if n <= 1 {
                    state.remove(&k, 0);
                } else {
                    entry.visibility = Visibility::Removing(n - 1);
                }
                Ok(object)
            }
        }
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<ManagedResource>> {
        let mut state = self.state.lock();
        state.take_fault(Verb::List, kind.kind())?;
        Ok(state
            .objects
            .values()
            .filter(|e| !matches!(e.visibility, Visibility::Pending(_)))
            .map(|e| &e.object)
            .filter(|o| &o.kind == kind)
            .filter(|o| namespace.is_none() || o.namespace() == namespace)
            .filter(|o| selector.matches(o.labels()))
            .cloned()
            .collect())
    }

    async fn create(&self, resource: &ManagedResource) -> Result<ManagedResource> {
        if resource.metadata.name.is_none() {
            return Err(Error::UnnamedObject);
        }
        let obj = resource.object_ref();
        let mut state = self.state.lock();
        state.take_fault(Verb::Create, &obj.name)?;
        let k = key(&obj);
        if state.objects.contains_key(&k) {
            return Err(Error::Api(ErrorResponse::already_exists(obj.kind.kind(), &obj.name)));
        }
        let mut stored = resource.clone();
        stored.metadata.uid = Some(state.next_uid());
        stored.metadata.resource_version = Some(state.next_version());
        stored.metadata.deletion_timestamp = None;
        if self.controllers {
            Self::simulate_status(&mut stored);
        }
        let visibility = match self.lag {
            0 => Visibility::Visible,
            n => Visibility::Pending(n),
        };
        tracing::trace!(%obj, "created");
        state.objects.insert(k, Entry {
            object: stored.clone(),
            visibility,
        });
        state.journal.push((Verb::Create, obj));
        Ok(stored)
    }

    async fn delete(&self, obj: &ObjectRef) -> Result<()> {
        let mut state = self.state.lock();
        state.take_fault(Verb::Delete, &obj.name)?;
        let k = key(obj);
        let version = state.next_version();
        let entry = match state.objects.get_mut(&k) {
            // writes see through read lag, except for objects already on their way out
            Some(entry) if !matches!(entry.visibility, Visibility::Removing(_)) => entry,
            _ => return Err(not_found(obj)),
        };
        entry.visibility = Visibility::Visible;
        let drained = entry.object.finalizers().is_empty();
        if !drained && entry.object.metadata.deletion_timestamp.is_none() {
            entry.object.metadata.deletion_timestamp = Some(Timestamp::now());
            entry.object.metadata.resource_version = Some(version);
        }
        state.journal.push((Verb::Delete, obj.clone()));
        if drained {
            tracing::trace!(%obj, "removing");
            state.remove(&k, self.lag);
        } else {
            tracing::trace!(%obj, "marked for deletion");
        }
        Ok(())
    }

    async fn update(&self, resource: &ManagedResource) -> Result<ManagedResource> {
        let obj = resource.object_ref();
        let mut state = self.state.lock();
        state.take_fault(Verb::Update, &obj.name)?;
        let k = key(&obj);
        let version = state.next_version();
        let entry = match state.objects.get_mut(&k) {
            Some(entry) if !matches!(entry.visibility, Visibility::Removing(_)) => entry,
            _ => return Err(not_found(&obj)),
        };
        if resource.metadata.resource_version.is_some()
            && resource.metadata.resource_version != entry.object.metadata.resource_version
        {
            return Err(Error::Api(ErrorResponse::conflict(obj.kind.kind(), &obj.name)));
        }
        entry.visibility = Visibility::Visible;
        // uid and deletionTimestamp are owned by the control plane
        entry.object.metadata.labels = resource.metadata.labels.clone();
        entry.object.metadata.finalizers = resource.metadata.finalizers.clone();
        entry.object.metadata.resource_version = Some(version);
        entry.object.data = resource.data.clone();
        let stored = entry.object.clone();
        state.journal.push((Verb::Update, obj));
        if stored.deletion_requested() && stored.finalizers().is_empty() {
            tracing::trace!(obj = %stored.object_ref(), "finalizers drained, removing");
            state.remove(&k, self.lag);
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControlPlane;

    const FINALIZER: &str = "enterprise.splunk.com/delete-pvc";

    fn standalone() -> ManagedResource {
        ManagedResource::new(ResourceKind::Standalone, "s1").within("ns-test")
    }

    #[tokio::test]
    async fn create_then_get_assigns_identity() {
        let client = InMemory::new();
        let created = client.create(&standalone()).await.unwrap();
        assert!(created.uid().is_some());
        let fetched = client.get(&created.object_ref()).await.unwrap();
        assert_eq!(fetched, created);
        let err = client.create(&standalone()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn delete_without_finalizers_removes() {
        let client = InMemory::new();
        let s1 = client.create(&standalone()).await.unwrap();
        client.delete(&s1.object_ref()).await.unwrap();
        assert!(client.get(&s1.object_ref()).await.unwrap_err().is_not_found());
        assert!(client.delete(&s1.object_ref()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn finalizers_gate_removal() {
        let client = InMemory::new();
        let s1 = client.create(&standalone().finalizer(FINALIZER)).await.unwrap();
        client.delete(&s1.object_ref()).await.unwrap();

        let mut terminating = client.get(&s1.object_ref()).await.unwrap();
        assert!(terminating.deletion_requested());

        terminating.finalizers_mut().remove(FINALIZER);
        client.update(&terminating).await.unwrap();
        assert!(!client.contains(&s1.object_ref()));
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let client = InMemory::new();
        let s1 = client.create(&standalone().finalizer(FINALIZER)).await.unwrap();
        client.update(&s1).await.unwrap();
        assert!(client.update(&s1).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn reads_lag_behind_writes() {
        let client = InMemory::new().with_lag(2);
        let s1 = client.create(&standalone()).await.unwrap();
        let obj = s1.object_ref();
        assert!(client.get(&obj).await.unwrap_err().is_not_found());
        assert!(client.get(&obj).await.unwrap_err().is_not_found());
        assert!(client.get(&obj).await.is_ok());

        client.delete(&obj).await.unwrap();
        assert!(client.get(&obj).await.is_ok());
        assert!(client.get(&obj).await.is_ok());
        assert!(client.get(&obj).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_faults_fire_the_requested_number_of_times() {
        let client = InMemory::new();
        let s1 = client.create(&standalone()).await.unwrap();
        client.fail_times(Verb::Get, "s1", ErrorResponse::internal("etcd unavailable"), 2);
        let err = client.get(&s1.object_ref()).await.unwrap_err();
        assert!(matches!(err, Error::Api(ErrorResponse { code: 500, .. })));
        assert!(client.get(&s1.object_ref()).await.is_err());
        assert!(client.get(&s1.object_ref()).await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let client = InMemory::new();
        let label = ("app.kubernetes.io/part-of", "splunk-idx-indexer");
        for (name, ns) in [("a", "ns-1"), ("b", "ns-1"), ("c", "ns-2")] {
            client.insert(
                ManagedResource::new(ResourceKind::PersistentVolumeClaim, name)
                    .within(ns)
                    .with_labels([label]),
            );
        }
        client.insert(ManagedResource::new(ResourceKind::PersistentVolumeClaim, "d").within("ns-1"));

        let selector = Selector::default().with_label(label.0, label.1);
        let found = client
            .list(&ResourceKind::PersistentVolumeClaim, Some("ns-1"), &selector)
            .await
            .unwrap();
        let names: Vec<_> = found.iter().map(|o| o.name().to_string()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn namespace_removal_cascades() {
        let client = InMemory::new();
        let ns = client
            .create(&ManagedResource::new(ResourceKind::Namespace, "ns-test"))
            .await
            .unwrap();
        client.create(&standalone()).await.unwrap();
        client.delete(&ns.object_ref()).await.unwrap();
        assert_eq!(client.count(&ResourceKind::Standalone), 0);
    }

    #[tokio::test]
    async fn simulated_controllers_report_ready() {
        let client = InMemory::new().with_simulated_controllers();
        let deploy = client
            .create(
                &ManagedResource::new(ResourceKind::Deployment, "op")
                    .within("ns-test")
                    .data(serde_json::json!({ "spec": { "replicas": 2 } })),
            )
            .await
            .unwrap();
        assert_eq!(deploy.data["status"]["readyReplicas"], 2);
        let s1 = client.create(&standalone()).await.unwrap();
        assert_eq!(s1.data["status"]["phase"], "Ready");
    }
}
