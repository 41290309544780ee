//! Control plane clients for the lifecycle layer
//!
//! The orchestration runtime only needs five verbs from the control plane, captured by the
//! [`ControlPlane`] trait. Two implementations ship here:
//!
//! - [`InMemory`] keeps objects in process and mimics the parts of apiserver behavior the runtime
//!   depends on: finalizers gating removal, stale reads, and injected failures
//! - `KubeControlPlane` (feature `kube`) talks to a real cluster through `kube::Api<DynamicObject>`
//!
//! # Example
//!
//! ```
//! use lifecycle_client::{ControlPlane, InMemory};
//! use lifecycle_core::{ManagedResource, ResourceKind};
//!
//! # async fn wrapper() -> Result<(), lifecycle_client::Error> {
//! let client = InMemory::new();
//! let idx = ManagedResource::new(ResourceKind::IndexerCluster, "idx").within("ns-demo");
//! client.create(&idx).await?;
//! let found = client.get(&idx.object_ref()).await?;
//! assert!(found.uid().is_some());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod api;
pub use api::ControlPlane;

pub mod error;
pub use error::Error;

pub mod memory;
pub use memory::{InMemory, Verb};

#[cfg(feature = "kube")]
#[cfg_attr(docsrs, doc(cfg(feature = "kube")))]
mod cluster;
#[cfg(feature = "kube")]
pub use cluster::KubeControlPlane;

pub use lifecycle_core as core;

/// Convient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
