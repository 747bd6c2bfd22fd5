//! Execution-state representations.

use derive_more::Display;

use crate::value::Value;

/// Resulting state of a single dispatched instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ExecuteState {
    /// The VM should proceed normally with the execution.
    Proceed,
    /// The current frame returned.
    Returned,
    /// A native call suspended the thread.
    Yielded,
}

impl ExecuteState {
    /// True if the dispatch loop should keep running.
    pub(crate) const fn should_continue(&self) -> bool {
        matches!(self, Self::Proceed | Self::Returned)
    }
}

/// How a dispatch loop run over a span of frames ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum LoopExit {
    /// The span's entry frame returned.
    Returned,
    /// The thread suspended.
    Yielded,
}

/// Outcome of resuming a coroutine.
#[derive(Debug, Clone, PartialEq)]
pub enum Resume {
    /// The coroutine ran to completion with these results.
    Done(Vec<Value>),
    /// The coroutine suspended, passing these values out.
    Yield(Vec<Value>),
}

/// Life-cycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ThreadStatus {
    /// Not started, or parked at a yield.
    #[display(fmt = "suspended")]
    Suspended,
    /// Currently executing.
    #[display(fmt = "running")]
    Running,
    /// Resumed another coroutine and is waiting for it.
    #[display(fmt = "normal")]
    Normal,
    /// Finished or failed; cannot be resumed.
    #[display(fmt = "dead")]
    Dead,
}
