//! Lifecycle is an umbrella-crate for creating, finalizing and tearing down operator-managed
//! resources.
//!
//! # Overview
//!
//! The main modules are:
//!
//! - [`core`](crate::core) with the resource model: kinds, metadata, finalizer sets and selectors
//! - [`client`](crate::client) with the [`ControlPlane`] trait, an [`InMemory`] control plane and,
//!   with the `kube` feature, one backed by a Kubernetes cluster
//! - [`runtime`](crate::runtime) with the [`Orchestrator`](crate::runtime::Orchestrator), the
//!   [`FinalizerProtocol`](crate::runtime::FinalizerProtocol) and the waiting primitives
//!
//! # Creating and tearing down
//!
//! ```
//! use lifecycle::{
//!     core::{ManagedResource, ResourceKind},
//!     runtime::{Config, FinalizerProtocol, Orchestrator, DELETE_PVC_FINALIZER},
//!     ControlPlane, InMemory,
//! };
//! use std::sync::Arc;
//!
//! # async fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(InMemory::new());
//! let mut orchestrator = Orchestrator::new(client.clone(), Config::default());
//!
//! let idx = ManagedResource::new(ResourceKind::IndexerCluster, "idx")
//!     .within("ns-demo")
//!     .finalizer(DELETE_PVC_FINALIZER);
//! let created = orchestrator.create(&idx).await?;
//!
//! // what the operator does once deletion was requested
//! client.delete(&created.object_ref()).await?;
//! let mut terminating = client.get(&created.object_ref()).await?;
//! FinalizerProtocol::with_defaults(client.clone())
//!     .check_deletion(&mut terminating)
//!     .await?;
//!
//! orchestrator.teardown_all().await?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

/// Re-exports from [`lifecycle_core`]
#[doc(inline)]
pub use lifecycle_core as core;

/// Re-exports from [`lifecycle_client`]
#[doc(inline)]
pub use lifecycle_client as client;
#[doc(inline)]
pub use client::{ControlPlane, Error, InMemory};

#[cfg(feature = "kube")]
#[cfg_attr(docsrs, doc(cfg(feature = "kube")))]
#[doc(inline)]
pub use client::KubeControlPlane;

/// Re-exports from [`lifecycle_runtime`]
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
#[doc(inline)]
pub use lifecycle_runtime as runtime;

/// Convient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
