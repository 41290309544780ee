//! Minimal templates for the objects an [`Environment`](super::Environment) creates.
//!
//! Only identity, references and replica counts are filled in; everything else is left to the
//! defaults of the control plane and the operator.
#![allow(missing_docs)]
use crate::reaper::DELETE_PVC_FINALIZER;
use lifecycle_core::{ManagedResource, ResourceKind};
use serde_json::json;

/// Key of the license inside the license config map
pub const LICENSE_KEY: &str = "enterprise.lic";

const OPERATOR_LABEL: (&str, &str) = ("name", "splunk-operator");
const ALL_VERBS: [&str; 8] = [
    "create",
    "delete",
    "deletecollection",
    "get",
    "list",
    "patch",
    "update",
    "watch",
];

pub fn namespace(name: &str) -> ManagedResource {
    ManagedResource::new(ResourceKind::Namespace, name)
}

pub fn service_account(name: &str, namespace: &str) -> ManagedResource {
    ManagedResource::new(ResourceKind::ServiceAccount, name).within(namespace)
}

/// A role granting the operator what it needs inside its namespace
pub fn role(name: &str, namespace: &str) -> ManagedResource {
    ManagedResource::new(ResourceKind::Role, name)
        .within(namespace)
        .data(json!({
            "rules": [
                {
                    "apiGroups": [""],
                    "resources": ["services", "endpoints", "persistentvolumeclaims", "configmaps", "secrets", "pods"],
                    "verbs": ALL_VERBS,
                },
                {
                    "apiGroups": [""],
                    "resources": ["events"],
                    "verbs": ["get", "list", "watch"],
                },
                {
                    "apiGroups": ["apps"],
                    "resources": ["deployments", "daemonsets", "replicasets", "statefulsets"],
                    "verbs": ALL_VERBS,
                },
                {
                    "apiGroups": [lifecycle_core::kind::ENTERPRISE_GROUP],
                    "resources": ["*"],
                    "verbs": ["*"],
                },
            ]
        }))
}

/// Binds `role` to the service account `subject`
pub fn role_binding(name: &str, subject: &str, namespace: &str, role: &str) -> ManagedResource {
    ManagedResource::new(ResourceKind::RoleBinding, name)
        .within(namespace)
        .data(json!({
            "subjects": [{ "kind": "ServiceAccount", "name": subject, "namespace": namespace }],
            "roleRef": { "kind": "Role", "name": role, "apiGroup": "rbac.authorization.k8s.io" },
        }))
}

/// A single replica operator deployment watching its own namespace
pub fn operator(
    name: &str,
    namespace: &str,
    account: &str,
    operator_image: &str,
    splunk_image: &str,
    spark_image: &str,
) -> ManagedResource {
    let (label, value) = OPERATOR_LABEL;
    let field_ref = |path: &str| json!({ "fieldRef": { "fieldPath": path } });
    ManagedResource::new(ResourceKind::Deployment, name)
        .within(namespace)
        .data(json!({
            "spec": {
                "replicas": 1,
                "selector": { "matchLabels": { label: value } },
                "template": {
                    "metadata": { "labels": { label: value } },
                    "spec": {
                        "serviceAccountName": account,
                        "containers": [{
                            "name": name,
                            "image": operator_image,
                            "imagePullPolicy": "IfNotPresent",
                            "env": [
                                { "name": "WATCH_NAMESPACE", "valueFrom": field_ref("metadata.namespace") },
                                { "name": "POD_NAME", "valueFrom": field_ref("metadata.name") },
                                { "name": "OPERATOR_NAME", "value": "splunk-operator" },
                                { "name": "RELATED_IMAGE_SPLUNK_ENTERPRISE", "value": splunk_image },
                                { "name": "RELATED_IMAGE_SPLUNK_SPARK", "value": spark_image },
                            ],
                        }],
                    },
                },
            }
        }))
}

/// Holds the license file contents under [`LICENSE_KEY`]
pub fn license_config_map(name: &str, namespace: &str, license: &str) -> ManagedResource {
    ManagedResource::new(ResourceKind::ConfigMap, name)
        .within(namespace)
        .data(json!({ "data": { LICENSE_KEY: license } }))
}

fn enterprise(kind: ResourceKind, name: &str, namespace: &str, spec: serde_json::Value) -> ManagedResource {
    let mut spec = spec;
    spec["imagePullPolicy"] = json!("IfNotPresent");
    ManagedResource::new(kind, name)
        .within(namespace)
        .finalizer(DELETE_PVC_FINALIZER)
        .data(json!({ "spec": spec }))
}

fn license_master_ref(spec: &mut serde_json::Value, license_master: Option<&str>) {
    if let Some(lm) = license_master {
        spec["licenseMasterRef"] = json!({ "name": lm });
    }
}

pub fn standalone(name: &str, namespace: &str) -> ManagedResource {
    enterprise(ResourceKind::Standalone, name, namespace, json!({ "volumes": [] }))
}

/// A license master mounting the license config map
pub fn license_master(name: &str, namespace: &str, license_config_map: &str) -> ManagedResource {
    let spec = json!({
        "volumes": [{ "name": "licenses", "configMap": { "name": license_config_map } }],
        "licenseUrl": format!("/mnt/licenses/{LICENSE_KEY}"),
    });
    enterprise(ResourceKind::LicenseMaster, name, namespace, spec)
}

pub fn indexer_cluster(
    name: &str,
    namespace: &str,
    license_master: Option<&str>,
    replicas: u32,
) -> ManagedResource {
    let mut spec = json!({ "volumes": [], "replicas": replicas });
    license_master_ref(&mut spec, license_master);
    enterprise(ResourceKind::IndexerCluster, name, namespace, spec)
}

pub fn search_head_cluster(
    name: &str,
    namespace: &str,
    indexer_cluster: &str,
    license_master: Option<&str>,
) -> ManagedResource {
    let mut spec = json!({ "volumes": [], "indexerClusterRef": { "name": indexer_cluster } });
    license_master_ref(&mut spec, license_master);
    enterprise(ResourceKind::SearchHeadCluster, name, namespace, spec)
}
