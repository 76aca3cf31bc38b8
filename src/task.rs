//! Tasks and the completion handle their bodies receive.

use std::sync::Arc;
use tokio::sync::oneshot;

/// Describes the name of a task.
#[derive(Clone, PartialEq, Eq, Ord, PartialOrd, Debug, Hash)]
pub struct Name(pub Arc<str>);

impl Name {
    pub fn new(name: impl ToString) -> Self {
        Self(name.to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Name {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&'_ str> for Name {
    fn from(s: &'_ str) -> Self {
        Self(s.into())
    }
}

impl std::borrow::Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A single-use handle a task body consumes to report that it is done.
///
/// Consuming the handle is the only way to complete a task, and completing
/// twice is unrepresentable. Dropping the handle without calling
/// [Completion::complete] leaves the task permanently incomplete: the owning
/// runner stops draining its queue and reports the violation when it is
/// finalized.
pub struct Completion {
    tx: oneshot::Sender<()>,
}

impl Completion {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Reports that the task is done.
    pub fn complete(self) {
        // The runner may already be gone if its handle was dropped; a task
        // completing after that has no one to report to.
        let _ = self.tx.send(());
    }
}

pub(crate) type TaskFn = Box<dyn FnOnce(Completion) + Send + 'static>;

/// A named unit of asynchronous work, queued for execution.
pub(crate) struct Task {
    pub(crate) name: Name,
    pub(crate) body: TaskFn,
}
