//! Type information for the kinds of object the lifecycle layer manages.
use crate::error::ParseKindError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// API group of the enterprise custom resources.
pub const ENTERPRISE_GROUP: &str = "enterprise.splunk.com";
/// Served version of the enterprise custom resources.
pub const ENTERPRISE_VERSION: &str = "v1alpha2";

/// Contains information about an API resource
/// which is enough for addressing it on the control plane.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApiResource {
    /// Resource group, empty for core group.
    pub group: String,
    /// group version
    pub version: String,
    /// apiVersion of the resource (v1 for core group,
    /// groupName/groupVersions for other).
    pub api_version: String,
    /// Singular PascalCase name of the resource
    pub kind: String,
    /// Plural name of the resource
    pub plural: String,
    /// Whether instances live inside a namespace
    pub namespaced: bool,
}

impl ApiResource {
    /// Creates ApiResource from group, version, kind and plural name.
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        let api_version = match group {
            "" => version.to_string(),
            _ => format!("{group}/{version}"),
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }
}

/// The kind of a managed resource.
///
/// The four enterprise kinds are the custom resources whose teardown is gated by
/// finalizers. The remaining variants are the supporting objects an environment
/// creates around them.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// A single all-in-one instance
    Standalone,
    /// The license master of a deployment
    LicenseMaster,
    /// A clustered search head tier
    SearchHeadCluster,
    /// A clustered indexer tier
    IndexerCluster,
    /// A cluster scoped namespace
    Namespace,
    /// A namespaced service account
    ServiceAccount,
    /// A namespaced config map
    ConfigMap,
    /// A storage claim, the dependent resource reaped on deletion
    PersistentVolumeClaim,
    /// An rbac role
    Role,
    /// An rbac role binding
    RoleBinding,
    /// An apps/v1 deployment
    Deployment,
    /// Anything not known at compile time
    Other(ApiResource),
}

impl ResourceKind {
    /// Returns the full [`ApiResource`] descriptor of this kind
    pub fn api_resource(&self) -> ApiResource {
        let (group, version, plural, namespaced) = match self {
            Self::Standalone => (ENTERPRISE_GROUP, ENTERPRISE_VERSION, "standalones", true),
            Self::LicenseMaster => (ENTERPRISE_GROUP, ENTERPRISE_VERSION, "licensemasters", true),
            Self::SearchHeadCluster => (ENTERPRISE_GROUP, ENTERPRISE_VERSION, "searchheadclusters", true),
            Self::IndexerCluster => (ENTERPRISE_GROUP, ENTERPRISE_VERSION, "indexerclusters", true),
            Self::Namespace => ("", "v1", "namespaces", false),
            Self::ServiceAccount => ("", "v1", "serviceaccounts", true),
            Self::ConfigMap => ("", "v1", "configmaps", true),
            Self::PersistentVolumeClaim => ("", "v1", "persistentvolumeclaims", true),
            Self::Role => ("rbac.authorization.k8s.io", "v1", "roles", true),
            Self::RoleBinding => ("rbac.authorization.k8s.io", "v1", "rolebindings", true),
            Self::Deployment => ("apps", "v1", "deployments", true),
            Self::Other(ar) => return ar.clone(),
        };
        ApiResource::new(group, version, self.kind(), plural, namespaced)
    }

    /// Returns the PascalCase kind name
    pub fn kind(&self) -> &str {
        match self {
            Self::Standalone => "Standalone",
            Self::LicenseMaster => "LicenseMaster",
            Self::SearchHeadCluster => "SearchHeadCluster",
            Self::IndexerCluster => "IndexerCluster",
            Self::Namespace => "Namespace",
            Self::ServiceAccount => "ServiceAccount",
            Self::ConfigMap => "ConfigMap",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
            Self::Role => "Role",
            Self::RoleBinding => "RoleBinding",
            Self::Deployment => "Deployment",
            Self::Other(ar) => &ar.kind,
        }
    }

    /// Returns apiVersion of this kind
    pub fn api_version(&self) -> String {
        self.api_resource().api_version
    }

    /// Returns the plural name of the kind
    pub fn plural(&self) -> String {
        self.api_resource().plural
    }

    /// Whether objects of this kind live inside a namespace
    pub fn is_namespaced(&self) -> bool {
        match self {
            Self::Namespace => false,
            Self::Other(ar) => ar.namespaced,
            _ => true,
        }
    }

    /// Whether this is one of the enterprise custom resource kinds
    pub fn is_enterprise(&self) -> bool {
        matches!(
            self,
            Self::Standalone | Self::LicenseMaster | Self::SearchHeadCluster | Self::IndexerCluster
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl FromStr for ResourceKind {
    type Err = ParseKindError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        Ok(match kind {
            "Standalone" => Self::Standalone,
            "LicenseMaster" => Self::LicenseMaster,
            "SearchHeadCluster" => Self::SearchHeadCluster,
            "IndexerCluster" => Self::IndexerCluster,
            "Namespace" => Self::Namespace,
            "ServiceAccount" => Self::ServiceAccount,
            "ConfigMap" => Self::ConfigMap,
            "PersistentVolumeClaim" => Self::PersistentVolumeClaim,
            "Role" => Self::Role,
            "RoleBinding" => Self::RoleBinding,
            "Deployment" => Self::Deployment,
            _ => return Err(ParseKindError(kind.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enterprise_kinds_share_group_version() {
        for kind in [
            ResourceKind::Standalone,
            ResourceKind::LicenseMaster,
            ResourceKind::SearchHeadCluster,
            ResourceKind::IndexerCluster,
        ] {
            assert!(kind.is_enterprise());
            assert!(kind.is_namespaced());
            assert_eq!(kind.api_version(), "enterprise.splunk.com/v1alpha2");
        }
        assert_eq!(ResourceKind::IndexerCluster.plural(), "indexerclusters");
    }

    #[test]
    fn core_kinds_use_bare_version() {
        assert_eq!(ResourceKind::Namespace.api_version(), "v1");
        assert!(!ResourceKind::Namespace.is_namespaced());
        assert_eq!(ResourceKind::Deployment.api_version(), "apps/v1");
        assert_eq!(
            ResourceKind::RoleBinding.api_version(),
            "rbac.authorization.k8s.io/v1"
        );
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in [
            ResourceKind::Standalone,
            ResourceKind::PersistentVolumeClaim,
            ResourceKind::RoleBinding,
        ] {
            assert_eq!(kind.to_string().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("Pod".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn other_kinds_keep_their_descriptor() {
        let ar = ApiResource::new("batch", "v1", "Job", "jobs", true);
        let kind = ResourceKind::Other(ar.clone());
        assert_eq!(kind.api_resource(), ar);
        assert_eq!(kind.kind(), "Job");
        assert_eq!(kind.api_version(), "batch/v1");
    }

    #[test]
    fn known_kinds_serialize_by_name() {
        let idx = serde_json::to_value(ResourceKind::IndexerCluster).unwrap();
        assert_eq!(idx, serde_json::json!("IndexerCluster"));

        let job = ResourceKind::Other(ApiResource::new("batch", "v1", "Job", "jobs", true));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["Other"]["plural"], "jobs");
        assert_eq!(serde_json::from_value::<ResourceKind>(value).unwrap(), job);
    }
}
