//! Error handling in [`lifecycle_client`][crate]
use thiserror::Error;

pub use lifecycle_core::ErrorResponse;

/// Possible errors when talking to a control plane
#[derive(Error, Debug)]
pub enum Error {
    /// ApiError for when things fail
    ///
    /// `404 NotFound` is the one callers routinely branch on,
    /// see [`Error::is_not_found`].
    #[error("ApiError: {0} ({0:?})")]
    Api(#[source] ErrorResponse),

    /// Common error case when requesting parsing into own structs
    #[error("Error deserializing response")]
    SerdeError(#[source] serde_json::Error),

    /// A timestamp from the control plane is outside the supported range
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[source] jiff::Error),

    /// The object carries no name and cannot be addressed
    #[error("object has no name")]
    UnnamedObject,

    /// Error from the kubernetes client
    #[cfg(feature = "kube")]
    #[cfg_attr(docsrs, doc(cfg(feature = "kube")))]
    #[error("KubeError: {0}")]
    Kube(#[source] kube::Error),
}

impl Error {
    /// Whether the control plane reported that the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api(ErrorResponse { code: 404, .. }))
    }

    /// Whether the write lost a race (already exists, or stale resource version)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Api(ErrorResponse { code: 409, .. }))
    }
}
