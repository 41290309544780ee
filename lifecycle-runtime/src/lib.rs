//! Common orchestration for the lifecycle of managed resources
//!
//! Everything here is built from one waiting primitive, [`wait::poll_until`], and one teardown
//! primitive, [`cleanup::CleanupStack`]:
//!
//! - [`Orchestrator`] creates resources, waits for them to become visible and records how to undo
//!   each creation
//! - [`FinalizerProtocol`] releases the finalizers of a resource whose deletion was requested,
//!   running the registered [`Finalizer`] for each token first
//! - [`PvcReaper`] is the finalizer that removes storage claims left behind by a custom resource
//! - [`Environment`] wires the above into a namespace-isolated deployment of the operator
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod cleanup;
pub mod config;
pub mod environment;
pub mod finalizer;
pub mod orchestrator;
pub mod reaper;
pub mod wait;

pub use cleanup::{CleanupAction, CleanupStack, DrainError};
pub use config::Config;
pub use environment::{Deployment, Environment, EnvironmentConfig};
pub use finalizer::{ensure_finalizer, Finalizer, FinalizerProtocol};
pub use orchestrator::{Orchestrator, Teardown};
pub use reaper::{PvcReaper, DELETE_PVC_FINALIZER};
pub use wait::{await_condition, conditions, holds_for, poll_until, Condition};

/// Type-erased error returned by cleanup actions and finalizers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
