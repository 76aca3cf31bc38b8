//! Configuration options which can alter the behavior of the runner.

/// Policy which is applicable to a task runner.
#[derive(Clone, Debug)]
pub struct Policy {
    /// How many registration requests may be buffered before callers of
    /// [crate::runner::Runner::register] wait for the runner to catch up.
    pub request_capacity: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            request_capacity: 16,
        }
    }
}
