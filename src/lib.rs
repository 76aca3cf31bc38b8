//! seqr executes asynchronous tasks strictly one at a time.
//!
//! It uses the following terminology:
//! * Tasks are named units of asynchronous work, registered with a runner.
//! * The completion handle is the single-use signal a task body consumes
//!   to report that it is done.
//! * The runner dequeues tasks in registration order, never letting two
//!   bodies overlap, and checks at finalize time that nothing was dropped,
//!   leaked, or left running.
//!
//! # Usage
//!
//! * The main interface for this crate is [runner::Runner].
//! * Register tasks with [runner::Runner::register]; each body receives a
//!   [task::Completion] and must consume it exactly once, on every path.
//! * An idle runner starts work as soon as it is registered; no separate
//!   "start" call exists.
//! * When all work has been submitted and drained, call
//!   [runner::Runner::finalize] to run the shutdown checks.
//! * Check workloads resolve names through the [lookup::HostLookup]
//!   interface; [lookups] contains implementations backed by the system
//!   resolver and by fixed in-memory tables.
//!
//! ```no_run
//! use seqr::policy::Policy;
//! use seqr::runner::Runner;
//!
//! # async {
//! // Create the runner.
//! let runner = Runner::new("checks".to_string(), Policy::default()).unwrap();
//!
//! // Register work; an idle runner starts it immediately.
//! runner
//!     .register("greet", |done| {
//!         println!("hello");
//!         done.complete();
//!     })
//!     .await
//!     .unwrap();
//!
//! // Check that every registered task ran to completion.
//! let summary = runner.finalize().await.unwrap();
//! assert_eq!(summary.completed, 1);
//! # };
//! ```
//!
//! # DTrace probes
//!
//! seqr contains a number of DTrace USDT probes, which fire as tasks move
//! through a runner. The full list of probes is:
//!
//! - `task-registered`: Fires when a task is submitted to a runner.
//! - `task-start`: Fires when a task is dequeued and its body is invoked.
//! - `task-done`: Fires when a task signals completion.
//! - `task-stalled`: Fires when a task drops its completion handle without
//!   signaling; the runner's queue never resumes past it.
//! - `finalize-done`: Fires when the shutdown checks pass.
//! - `finalize-failed`: Fires when the shutdown checks fail.
//!
//! The existence of the probes is behind the `"probes"` feature, which is
//! enabled by default. Probes are zero-cost unless they are explicitly
//! enabled, by tracing the program with the `dtrace(1)` command-line tool.
//!
//! On most systems, the USDT probes must be registered with the DTrace
//! kernel module, a technically fallible process. To account for this,
//! [runner::Runner::new] returns a `Result` whose `Err` variant still gives
//! access to the constructed runner, similar to `std::sync::PoisonError` --
//! applications which don't want a registration failure to be fatal can
//! extract the runner in either case.

// Public API
pub mod lookup;
pub mod policy;
pub mod runner;
pub mod task;

// Default implementations of generic interfaces
pub mod lookups;

/// Identifies a task by its position in a runner's dequeue order.
#[derive(Copy, Clone, Debug)]
pub(crate) struct TaskId(pub u64);

/// USDT probes for tracing how a runner schedules its tasks.
#[cfg(feature = "probes")]
#[usdt::provider(provider = "seqr")]
mod probes {
    /// Fires when a task is submitted to a runner.
    fn task__registered(runner: &str, name: &str) {}

    /// Fires when a task is dequeued and its body is invoked.
    fn task__start(runner: &str, task_id: u64, name: &str) {}

    /// Fires when a task signals completion.
    fn task__done(runner: &str, task_id: u64, name: &str) {}

    /// Fires when a task drops its completion handle without signaling.
    ///
    /// The queue never resumes past a stalled task; the violation is
    /// reported by the shutdown checks.
    fn task__stalled(runner: &str, task_id: u64, name: &str) {}

    /// Fires when the shutdown checks pass, with the completed count.
    fn finalize__done(runner: &str, completed: u64) {}

    /// Fires when the shutdown checks fail, with a string identifying the
    /// violated invariant.
    fn finalize__failed(runner: &str, reason: &str) {}
}
