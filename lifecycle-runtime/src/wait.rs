//! Waits for objects to reach desired states
use futures::TryFutureExt;
use lifecycle_client::ControlPlane;
use lifecycle_core::{ManagedResource, ObjectRef};
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio::time::{sleep_until, Instant};

/// Why a wait ended without the condition holding
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: std::error::Error + 'static,
{
    /// The deadline passed before the condition held
    #[error("timed out after {timeout:?} ({attempts} attempts)")]
    Timeout {
        /// The bound that was exceeded
        timeout: Duration,
        /// How many times the probe ran
        attempts: usize,
    },
    /// The probe reported an error, which ends the wait immediately
    #[error("failed to probe for whether the condition is fulfilled yet: {0}")]
    ProbeFailed(#[source] E),
    /// A condition expected to keep holding stopped holding
    #[error("condition stopped holding after {elapsed:?} ({attempts} attempts)")]
    NotHeld {
        /// Time from the first probe to the failing one
        elapsed: Duration,
        /// How many times the probe ran
        attempts: usize,
    },
}

impl<E> Error<E>
where
    E: std::error::Error + 'static,
{
    /// Whether the wait ran out of time rather than failing
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Run `probe` until it yields a value, fails, or `timeout` passes.
///
/// The first probe runs immediately. Each later probe starts `interval` after the previous one
/// finished, and no probe starts after the deadline; the last sleep is cut short to end on it.
/// Time spent inside the probe counts toward the timeout.
pub async fn poll_for<T, E, F, Fut>(interval: Duration, timeout: Duration, mut probe: F) -> Result<T, Error<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = deadline_after(timeout);
    let mut attempts = 0;
    loop {
        attempts += 1;
        if let Some(done) = probe().await.map_err(Error::ProbeFailed)? {
            tracing::trace!(attempts, "condition satisfied");
            return Ok(done);
        }
        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(attempts, ?timeout, "gave up waiting");
            return Err(Error::Timeout { timeout, attempts });
        }
        sleep_until(next_probe(now, interval, deadline)).await;
    }
}

/// Run `probe` every `interval` for `duration`, failing as soon as it returns `Ok(false)`.
///
/// The counterpart of [`poll_until`] for states that must stay put: the first probe runs
/// immediately and the last one runs once `duration` has passed.
///
/// ```
/// use lifecycle_runtime::wait::holds_for;
/// use std::{convert::Infallible, time::Duration};
///
/// # async fn wrapper() {
/// holds_for(Duration::from_millis(10), Duration::from_millis(50), || async {
///     Ok::<_, Infallible>(true)
/// })
/// .await
/// .unwrap();
/// # }
/// ```
pub async fn holds_for<E, F, Fut>(interval: Duration, duration: Duration, mut probe: F) -> Result<(), Error<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let start = Instant::now();
    let end = deadline_after(duration);
    let mut attempts = 0;
    loop {
        attempts += 1;
        if !probe().await.map_err(Error::ProbeFailed)? {
            let elapsed = start.elapsed();
            tracing::debug!(attempts, ?elapsed, "condition stopped holding");
            return Err(Error::NotHeld { elapsed, attempts });
        }
        let now = Instant::now();
        if now >= end {
            return Ok(());
        }
        sleep_until(next_probe(now, interval, end)).await;
    }
}

// Durations too large for an `Instant` saturate to roughly 30 years, like `tokio::time::timeout`
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30))
}

fn next_probe(now: Instant, interval: Duration, deadline: Instant) -> Instant {
    now.checked_add(interval).map_or(deadline, |next| next.min(deadline))
}

/// Run `probe` until it returns `Ok(true)`, fails, or `timeout` passes.
///
/// The predicate carries no knowledge of what is being waited for, see [`poll_for`] for timing.
///
/// ```
/// use lifecycle_runtime::poll_until;
/// use std::{convert::Infallible, time::Duration};
///
/// # async fn wrapper() {
/// let mut calls = 0;
/// poll_until(Duration::from_millis(10), Duration::from_secs(1), || {
///     calls += 1;
///     let done = calls == 3;
///     async move { Ok::<_, Infallible>(done) }
/// })
/// .await
/// .unwrap();
/// # }
/// ```
pub async fn poll_until<E, F, Fut>(interval: Duration, timeout: Duration, mut probe: F) -> Result<(), Error<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    poll_for(interval, timeout, || probe().map_ok(|done| done.then_some(()))).await
}

/// Poll an object until `cond` holds for it.
///
/// `cond` is passed `Some` if the object is found, otherwise `None`. A missing object is not an
/// error; any other client failure ends the wait.
///
/// Returns the object as last seen, or `None` if the condition held for its absence.
pub async fn await_condition<C>(
    client: &C,
    obj: &ObjectRef,
    cond: impl Condition<ManagedResource>,
    interval: Duration,
    timeout: Duration,
) -> Result<Option<ManagedResource>, Error<lifecycle_client::Error>>
where
    C: ControlPlane + ?Sized,
{
    let cond = &cond;
    poll_for(interval, timeout, move || async move {
        match client.get(obj).await {
            Ok(found) => Ok(cond.matches_object(Some(&found)).then_some(Some(found))),
            Err(err) if err.is_not_found() => Ok(cond.matches_object(None).then_some(None)),
            Err(err) => Err(err),
        }
    })
    .await
}

/// A trait for condition functions to be used by [`await_condition`]
///
/// Note that this is auto-implemented for functions of type `fn(Option<&K>) -> bool`.
///
/// # Usage
///
/// ```
/// use lifecycle_core::ManagedResource;
/// use lifecycle_runtime::Condition;
///
/// fn has_label<'a>(key: &'a str) -> impl Condition<ManagedResource> + 'a {
///     move |obj: Option<&ManagedResource>| obj.is_some_and(|o| o.labels().contains_key(key))
/// }
/// ```
pub trait Condition<K: ?Sized> {
    /// Whether the condition holds for `obj`, `None` meaning the object does not exist
    fn matches_object(&self, obj: Option<&K>) -> bool;

    /// Returns a `Condition` that holds if `self` does not
    ///
    /// # Usage
    ///
    /// ```rust
    /// # use lifecycle_runtime::wait::Condition;
    /// let condition: fn(Option<&()>) -> bool = |_| true;
    /// assert!(condition.matches_object(None));
    /// assert!(!condition.not().matches_object(None));
    /// ```
    fn not(self) -> conditions::Not<Self>
    where
        Self: Sized,
    {
        conditions::Not(self)
    }

    /// Returns a `Condition` that holds if `self` and `other` both do
    fn and<Other: Condition<K>>(self, other: Other) -> conditions::And<Self, Other>
    where
        Self: Sized,
    {
        conditions::And(self, other)
    }

    /// Returns a `Condition` that holds if either `self` or `other` does
    ///
    /// # Usage
    ///
    /// ```rust
    /// # use lifecycle_runtime::wait::Condition;
    /// let cond_false: fn(Option<&()>) -> bool = |_| false;
    /// let cond_true: fn(Option<&()>) -> bool = |_| true;
    /// assert!(!cond_false.or(cond_false).matches_object(None));
    /// assert!(cond_false.or(cond_true).matches_object(None));
    /// ```
    fn or<Other: Condition<K>>(self, other: Other) -> conditions::Or<Self, Other>
    where
        Self: Sized,
    {
        conditions::Or(self, other)
    }
}

impl<K: ?Sized, F: Fn(Option<&K>) -> bool> Condition<K> for F {
    fn matches_object(&self, obj: Option<&K>) -> bool {
        (self)(obj)
    }
}

/// Common conditions to wait for
pub mod conditions {
    pub use super::Condition;
    use lifecycle_core::ManagedResource;

    /// An await condition that returns `true` once the object has been deleted.
    ///
    /// An object is considered to be deleted if the object can no longer be found, or if its
    /// uid changes. This means that an object is considered to be deleted even if it was
    /// recreated under the same name in between two probes.
    #[must_use]
    pub fn is_deleted(uid: &str) -> impl Condition<ManagedResource> + '_ {
        move |obj: Option<&ManagedResource>| obj.map_or(true, |obj| obj.uid() != Some(uid))
    }

    /// An await condition that returns `true` if the object exists.
    ///
    /// NOTE: If waiting for an object to be deleted, do _not_ [invert](`Condition::not`) this [`Condition`].
    /// Instead, use [`is_deleted`], which considers a deleted-then-recreated object to have been deleted.
    #[must_use]
    pub fn exists() -> impl Condition<ManagedResource> {
        |obj: Option<&ManagedResource>| obj.is_some()
    }

    /// An await condition that returns `true` once `status.phase` equals `phase`
    ///
    /// Namespaces report `Active` and `Terminating`, the enterprise kinds report `Ready` once
    /// their pods are up.
    #[must_use]
    pub fn has_phase(phase: &str) -> impl Condition<ManagedResource> + '_ {
        move |obj: Option<&ManagedResource>| {
            obj.and_then(|o| o.data.pointer("/status/phase")?.as_str()) == Some(phase)
        }
    }

    /// An await condition for deployments that returns `true` once every desired replica is
    /// updated and ready, and no surplus replicas remain from a rollout.
    #[must_use]
    pub fn has_ready_replicas() -> impl Condition<ManagedResource> {
        |obj: Option<&ManagedResource>| {
            let Some(o) = obj else {
                return false;
            };
            let field = |path: &str| o.data.pointer(path).and_then(serde_json::Value::as_i64);
            let desired = field("/spec/replicas").unwrap_or(1);
            let total = field("/status/replicas").unwrap_or(0);
            let updated = field("/status/updatedReplicas").unwrap_or(0);
            let ready = field("/status/readyReplicas").unwrap_or(0);
            updated >= desired && total <= updated && ready >= desired
        }
    }

    /// See [`Condition::not`]
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Not<A>(pub(super) A);
    impl<A: Condition<K>, K: ?Sized> Condition<K> for Not<A> {
        fn matches_object(&self, obj: Option<&K>) -> bool {
            !self.0.matches_object(obj)
        }
    }

    /// See [`Condition::and`]
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct And<A, B>(pub(super) A, pub(super) B);
    impl<A, B, K: ?Sized> Condition<K> for And<A, B>
    where
        A: Condition<K>,
        B: Condition<K>,
    {
        fn matches_object(&self, obj: Option<&K>) -> bool {
            self.0.matches_object(obj) && self.1.matches_object(obj)
        }
    }

    /// See [`Condition::or`]
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Or<A, B>(pub(super) A, pub(super) B);
    impl<A, B, K: ?Sized> Condition<K> for Or<A, B>
    where
        A: Condition<K>,
        B: Condition<K>,
    {
        fn matches_object(&self, obj: Option<&K>) -> bool {
            self.0.matches_object(obj) || self.1.matches_object(obj)
        }
    }
}
