//! Types shared by every lifecycle crate, without any client attached
//!
//! This crate holds the vocabulary the orchestration layer speaks: which kind of object
//! is being managed, how it is identified, its finalizer set and the label selectors used
//! to find dependents. The same items are re-exported from `lifecycle` under `lifecycle::core`.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod kind;
pub use kind::{ApiResource, ResourceKind};

pub mod labels;
pub use labels::Selector;

pub mod metadata;
pub use metadata::{Finalizers, ObjectMeta};

mod resource;
pub use resource::{ManagedResource, ObjectRef};

mod error;
pub use error::{ErrorResponse, ParseKindError};
