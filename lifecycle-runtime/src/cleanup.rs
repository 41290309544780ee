//! Deferred teardown of created resources
use crate::BoxError;
use futures::{future::BoxFuture, FutureExt};
use std::{collections::BTreeMap, fmt, future::Future};

/// A deferred, fallible, asynchronous teardown operation.
///
/// The description is only used for logs and error reports.
pub struct CleanupAction {
    description: String,
    run: Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>,
}

impl CleanupAction {
    /// Wrap a closure producing the teardown future
    ///
    /// The closure runs at most once, when the action is drained.
    pub fn new<F, Fut, E>(description: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            description: description.into(),
            run: Box::new(move || async move { run().await.map_err(Into::<BoxError>::into) }.boxed()),
        }
    }

    /// What the action tears down
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Execute the action, consuming it
    pub async fn run(self) -> Result<(), BoxError> {
        (self.run)().await
    }
}

impl fmt::Debug for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupAction")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// An ordered stack of pending [`CleanupAction`]s, executed in reverse order of registration.
///
/// Actions are registered right after the creation they undo succeeds, so reversing them tears
/// down dependents before the things they depend on.
#[derive(Debug, Default)]
pub struct CleanupStack {
    actions: Vec<CleanupAction>,
}

impl CleanupStack {
    /// An empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action to run before every action already on the stack
    pub fn push(&mut self, action: CleanupAction) {
        tracing::trace!(description = action.description(), "registered cleanup action");
        self.actions.push(action);
    }

    /// Take the most recently registered action without running it
    pub fn pop(&mut self) -> Option<CleanupAction> {
        self.actions.pop()
    }

    /// Number of pending actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no actions are pending
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Pop and run every action, most recent first, until the stack is empty.
    ///
    /// A failing action is logged and does not stop the remaining ones. Each action is awaited
    /// before the next one starts. If the returned future is dropped part way, actions that have
    /// not been popped yet stay on the stack.
    ///
    /// # Errors
    ///
    /// Returns a [`DrainError`] carrying every failure, keyed by the position the action ran at.
    pub async fn drain_all(&mut self) -> Result<(), DrainError> {
        let mut failures = BTreeMap::new();
        let mut attempted = 0;
        while let Some(action) = self.pop() {
            let position = attempted;
            attempted += 1;
            let description = action.description.clone();
            tracing::debug!(%description, position, "running cleanup action");
            if let Err(error) = action.run().await {
                tracing::error!(%description, %error, "cleanup action failed, attempting to continue");
                failures.insert(position, Failure { description, error });
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DrainError { attempted, failures })
        }
    }
}

/// A single failed [`CleanupAction`]
#[derive(Debug)]
pub struct Failure {
    /// Description of the action
    pub description: String,
    /// What went wrong
    pub error: BoxError,
}

/// Every failure of a [`CleanupStack::drain_all`] run
#[derive(Debug)]
pub struct DrainError {
    attempted: usize,
    failures: BTreeMap<usize, Failure>,
}

impl DrainError {
    /// The failure of the action that ran last, the oldest registration among the failures
    pub fn last(&self) -> Option<&Failure> {
        self.failures.values().next_back()
    }

    /// Number of failed actions
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Always false, a drain without failures is not an error
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// How many actions ran in total
    pub fn attempted(&self) -> usize {
        self.attempted
    }

    /// Failures keyed by the position their action ran at, 0 being the first
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Failure)> {
        self.failures.iter().map(|(pos, failure)| (*pos, failure))
    }
}

impl fmt::Display for DrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} cleanup actions failed", self.len(), self.attempted)?;
        if let Some(last) = self.last() {
            write!(f, ", last: {}: {}", last.description, last.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for DrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last().map(|failure| &*failure.error as _)
    }
}
