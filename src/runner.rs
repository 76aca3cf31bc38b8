//! A runner which executes registered tasks strictly one at a time.

use crate::policy::Policy;
#[cfg(feature = "probes")]
use crate::probes;
use crate::task::{Completion, Name as TaskName, Task};
use crate::TaskId;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    /// A task was dequeued and started, but had not signaled completion by
    /// the time the shutdown checks ran. This covers both a genuinely
    /// mid-flight task and one which dropped its completion handle.
    #[error("task {name} was still running at finalize")]
    TaskStillRunning { name: TaskName },

    /// Fewer tasks completed than were registered.
    #[error("{completed} of {expected} tasks completed at finalize")]
    IncompleteTasks { completed: usize, expected: usize },

    /// The runner's worker is gone, either because [Runner::finalize] was
    /// already called or because the handle was dropped.
    #[error("Runner terminated")]
    Terminated,
}

impl Error {
    #[cfg(feature = "probes")]
    // Convert to a static string for USDT probes.
    const fn as_str(&self) -> &'static str {
        match self {
            Error::TaskStillRunning { .. } => "TaskStillRunning",
            Error::IncompleteTasks { .. } => "IncompleteTasks",
            Error::Terminated => "Terminated",
        }
    }
}

enum Request {
    Register {
        task: Task,
    },
    Finalize {
        tx: oneshot::Sender<Result<Summary, Error>>,
    },
}

/// A point-in-time snapshot of a runner's progress.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Stats {
    /// Tasks registered so far.
    pub registered: usize,

    /// Tasks which have signaled completion.
    pub completed: usize,

    /// Whether a task is currently in flight.
    pub running: bool,
}

/// Returned by a successful [Runner::finalize] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    /// The number of tasks that ran to completion.
    pub completed: usize,
}

/// The name of the runner
#[derive(Clone, Debug)]
pub(crate) struct Name(Arc<str>);

impl Name {
    pub(crate) fn new<S: Into<Arc<str>>>(name: S) -> Self {
        Self(name.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// A task which has been dequeued and started, but not yet completed.
struct InFlight {
    #[cfg_attr(not(feature = "probes"), allow(dead_code))]
    id: TaskId,
    name: TaskName,
    rx: oneshot::Receiver<()>,

    // Set when the task dropped its completion handle. The queue never
    // resumes past a stalled task.
    stalled: bool,
}

struct RunnerInner {
    name: Name,

    // Counts for the shutdown checks. "expected" grows once per registered
    // task, "completed" once per completion signal received.
    expected: usize,
    completed: usize,

    // Tasks not yet started, in registration order.
    queue: VecDeque<Task>,

    // The task currently in flight, if any.
    current: Option<InFlight>,

    next_task_id: u64,

    stats_tx: watch::Sender<Stats>,

    rx: mpsc::Receiver<Request>,
}

impl RunnerInner {
    fn new(name: Name, rx: mpsc::Receiver<Request>, stats_tx: watch::Sender<Stats>) -> Self {
        Self {
            name,
            expected: 0,
            completed: 0,
            queue: VecDeque::new(),
            current: None,
            next_task_id: 0,
            stats_tx,
            rx,
        }
    }

    async fn run(mut self) {
        loop {
            // An idle runner picks up queued work before waiting for events.
            if self.current.is_none() {
                self.advance();
            }

            let completion = async {
                match self.current.as_mut() {
                    Some(task) if !task.stalled => (&mut task.rx).await,
                    // Idle, or stalled forever.
                    _ => std::future::pending().await,
                }
            };

            tokio::select! {
                // Completions are drained before new requests, so a finalize
                // racing a just-signaled task observes it as completed.
                biased;
                result = completion => self.task_completed(result.is_ok()),
                request = self.rx.recv() => {
                    match request {
                        Some(Request::Register { task }) => self.register(task),
                        // The caller has explicitly asked for the shutdown
                        // checks; report and stop.
                        Some(Request::Finalize { tx }) => {
                            let _ = tx.send(self.verify_shutdown());
                            return;
                        }
                        // The caller has dropped the handle. There is no one
                        // left to report to.
                        None => return,
                    }
                }
            }
        }
    }

    #[instrument(skip(self, task), fields(name = %task.name), name = "RunnerInner::register")]
    fn register(&mut self, task: Task) {
        self.expected += 1;
        self.queue.push_back(task);
        self.stats_tx.send_modify(|stats| stats.registered += 1);
    }

    // Starts the next queued task. Does nothing if the queue is empty; must
    // only be called while no task is in flight.
    fn advance(&mut self) {
        let Some(task) = self.queue.pop_front() else {
            return;
        };
        let id = TaskId(self.next_task_id);
        self.next_task_id = self.next_task_id.wrapping_add(1);

        event!(Level::INFO, name = %task.name, "task starting");
        #[cfg(feature = "probes")]
        probes::task__start!(|| (self.name.as_str(), id.0, task.name.as_str()));

        let (completion, rx) = Completion::new();
        self.current = Some(InFlight {
            id,
            name: task.name.clone(),
            rx,
            stalled: false,
        });
        self.stats_tx.send_modify(|stats| stats.running = true);

        // The body runs right here, on the worker; anything long-lived is
        // expected to move the completion handle into work it spawns.
        (task.body)(completion);
    }

    fn task_completed(&mut self, signaled: bool) {
        if signaled {
            // The completion future only resolves while a task is in flight.
            let Some(task) = self.current.take() else {
                return;
            };
            event!(Level::DEBUG, name = %task.name, "task complete");
            #[cfg(feature = "probes")]
            probes::task__done!(|| (self.name.as_str(), task.id.0, task.name.as_str()));

            self.completed += 1;
            self.stats_tx.send_modify(|stats| {
                stats.completed += 1;
                stats.running = false;
            });
            // The next loop iteration re-evaluates the queue, so back-to-back
            // completions chain through the event loop rather than the stack.
        } else {
            let Some(task) = self.current.as_mut() else {
                return;
            };
            // The body dropped its completion handle without signaling. The
            // task can never complete, so the queue must not move past it;
            // the violation surfaces at finalize.
            task.stalled = true;
            event!(
                Level::WARN,
                name = %task.name,
                "task dropped its completion handle without completing"
            );
            #[cfg(feature = "probes")]
            probes::task__stalled!(|| (self.name.as_str(), task.id.0, task.name.as_str()));
        }
    }

    // The shutdown checks: no task mid-flight, and every registered task
    // completed.
    #[instrument(skip(self), name = "RunnerInner::verify_shutdown")]
    fn verify_shutdown(&self) -> Result<Summary, Error> {
        let result = self.check_invariants();
        match &result {
            Ok(summary) => {
                event!(Level::INFO, completed = summary.completed, "tasks completed");
                #[cfg(feature = "probes")]
                probes::finalize__done!(|| (self.name.as_str(), summary.completed as u64));
            }
            Err(err) => {
                event!(Level::ERROR, err = %err, "shutdown invariants violated");
                #[cfg(feature = "probes")]
                probes::finalize__failed!(|| (self.name.as_str(), err.as_str()));
            }
        }
        result
    }

    fn check_invariants(&self) -> Result<Summary, Error> {
        if let Some(task) = &self.current {
            return Err(Error::TaskStillRunning {
                name: task.name.clone(),
            });
        }
        if self.completed != self.expected {
            return Err(Error::IncompleteTasks {
                completed: self.completed,
                expected: self.expected,
            });
        }
        Ok(Summary {
            completed: self.completed,
        })
    }
}

/// Runs registered tasks strictly one at a time, in registration order.
pub struct Runner {
    #[cfg_attr(not(feature = "probes"), allow(dead_code))]
    name: Name,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    tx: mpsc::Sender<Request>,
    stats_rx: watch::Receiver<Stats>,
}

/// A wrapper type indicating that the USDT probes could not be registered.
///
/// In this case, no probes will be available in the process. However, similar
/// to `std::sync::PoisonError`, this contains the runner itself. Applications
/// which don't care about a probe registration failure may still get access
/// to the runner.
pub struct RegistrationError(Runner);

impl std::fmt::Debug for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationError").finish_non_exhaustive()
    }
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "USDT probe registration failed".fmt(f)
    }
}

impl RegistrationError {
    /// Consume the error and get access to the contained runner.
    pub fn into_inner(self) -> Runner {
        self.0
    }
}

impl Runner {
    /// Creates a new task runner.
    ///
    /// - name: The name of this runner, for instrumentation.
    /// - policy: Tunables; see [Policy].
    ///
    /// Tasks registered through [Self::register] execute strictly one at a
    /// time, in registration order. When all submitted work has drained,
    /// call [Self::finalize] to run the shutdown checks.
    ///
    /// # DTrace probe registration
    ///
    /// This constructor returns a `Result`, because it attempts to register
    /// the USDT probes it exposes, a fallible process. That failure is
    /// extremely unlikely in practice, so the `Err` variant allows callers
    /// to access the constructed `Runner` anyway; applications which want to
    /// abort on registration failure may propagate the error instead. If the
    /// `"probes"` feature is not enabled, this method is infallible.
    #[instrument(name = "Runner::new")]
    pub fn new(name: String, policy: Policy) -> Result<Self, RegistrationError> {
        // The channel constructor rejects a zero depth.
        let (tx, rx) = mpsc::channel(policy.request_capacity.max(1));
        let (stats_tx, stats_rx) = watch::channel(Stats::default());
        let name = Name::new(name);
        let name_clone = name.clone();
        let handle = tokio::task::spawn(async move {
            let worker = RunnerInner::new(name_clone, rx, stats_tx);
            worker.run().await;
        });

        let self_ = Self {
            name,
            handle: Mutex::new(Some(handle)),
            tx,
            stats_rx,
        };
        #[cfg(feature = "probes")]
        match usdt::register_probes() {
            Ok(_) => Ok(self_),
            Err(_) => Err(RegistrationError(self_)),
        }
        #[cfg(not(feature = "probes"))]
        Ok(self_)
    }

    /// Registers a task.
    ///
    /// The body receives a [Completion] handle and must eventually consume
    /// it exactly once, on every path. Bodies are invoked on the runner's
    /// worker; long-running work should move the handle into whatever it
    /// spawns. If the runner is idle, the task starts immediately; otherwise
    /// it waits its turn behind everything registered before it.
    #[instrument(level = "debug", skip_all, err, name = "Runner::register")]
    pub async fn register<N, F>(&self, name: N, body: F) -> Result<(), Error>
    where
        N: Into<TaskName>,
        F: FnOnce(Completion) + Send + 'static,
    {
        let task = Task {
            name: name.into(),
            body: Box::new(body),
        };
        #[cfg(feature = "probes")]
        probes::task__registered!(|| (self.name.as_str(), task.name.as_str()));
        self.tx
            .send(Request::Register { task })
            .await
            .map_err(|_| Error::Terminated)
    }

    /// Runs the shutdown checks and stops the runner.
    ///
    /// Succeeds iff no task is mid-flight and every registered task signaled
    /// completion. Callers are expected to let registered work drain first
    /// (observable via [Self::stats_rx]); finalizing while a task is still
    /// in flight reports [Error::TaskStillRunning]. Once this returns, any
    /// further call on this runner returns [Error::Terminated].
    #[instrument(skip(self), err, name = "Runner::finalize")]
    pub async fn finalize(&self) -> Result<Summary, Error> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Request::Finalize { tx })
            .await
            .map_err(|_| Error::Terminated)?;
        let result = rx.await.map_err(|_| Error::Terminated)?;
        let Some(handle) = self.handle.lock().unwrap().take() else {
            return result;
        };
        handle.await.map_err(|_| Error::Terminated)?;
        result
    }

    /// Samples the runner's progress at a single point in time.
    pub fn stats(&self) -> Stats {
        self.stats_rx.borrow().clone()
    }

    /// Returns a receiver which observes every progress update.
    pub fn stats_rx(&self) -> watch::Receiver<Stats> {
        self.stats_rx.clone()
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
