//! Runtime and host-facing error types.
//!
//! Inside the dispatch loop an error is either a structured [`Fault`] or a
//! thrown Lua value; the pair travels as [`RuntimeError`] until it reaches
//! a protected frame or the host boundary, where it becomes a [`VmError`]
//! with source location attached when line info is available.

pub use moon_asm::Fault;

use crate::bytecode::ImageError;
use crate::state::ThreadStatus;
use crate::value::Value;

/// The error channel carried on a thread while unwinding.
#[derive(Debug, Clone, Copy, PartialEq)]
#[must_use]
pub enum RuntimeError {
    /// Structured, payload-free fault.
    Fault(Fault),
    /// A thrown value: `error(v)` or a raising metamethod.
    Value(Value),
}

impl RuntimeError {
    /// The fault, when this is a structured error.
    pub const fn fault(&self) -> Option<Fault> {
        match self {
            Self::Fault(f) => Some(*f),
            Self::Value(_) => None,
        }
    }
}

impl From<Fault> for RuntimeError {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

/// A structured compile failure from the front-end.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct CompileError {
    /// 1-based source line.
    pub line: u32,
    /// Front-end diagnostic.
    pub message: String,
}

/// Host-facing error from the runtime surface.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// A structured fault escaped every protected frame.
    #[error("runtime fault: {fault}")]
    Fault {
        /// What went wrong.
        fault: Fault,
        /// Source line at the raise site, when line info is present.
        line: Option<u32>,
        /// Source name at the raise site.
        source_name: Option<String>,
    },
    /// A thrown value escaped every protected frame.
    #[error("runtime error: {rendered}")]
    Error {
        /// The raw error value; valid while the interpreter lives.
        value: Value,
        /// The value rendered for display.
        rendered: String,
        /// Source line at the raise site, when line info is present.
        line: Option<u32>,
        /// Source name at the raise site.
        source_name: Option<String>,
    },
    /// The front-end rejected the source.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    /// The bytecode image was rejected.
    #[error("bad bytecode image: {0}")]
    Image(#[from] ImageError),
    /// `load_source` without an installed front-end.
    #[error("no front-end installed")]
    NoFrontend,
    /// Resumed a coroutine that was not suspended.
    #[error("cannot resume a {status} coroutine")]
    BadResume {
        /// The coroutine's actual status.
        status: ThreadStatus,
    },
}

impl VmError {
    /// The structured fault, when present.
    pub fn fault(&self) -> Option<Fault> {
        match self {
            Self::Fault { fault, .. } => Some(*fault),
            _ => None,
        }
    }
}
