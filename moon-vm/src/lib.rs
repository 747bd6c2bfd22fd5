//! Register-based bytecode interpreter for the Moon dialect of Lua 5.4.
//!
//! The crate pairs with [`moon_asm`], which owns the instruction codec.
//! Here lives everything else: the tagged value model ([`value`]), the
//! object pools and collector ([`heap`]), the table engine ([`table`]),
//! prototypes and the binary image format ([`bytecode`]), call frames
//! ([`call`]), threads and upvalues ([`thread`]), metamethod tags
//! ([`meta`]), the dispatch loop, and the host API ([`host`]).
//!
//! A minimal embedding:
//!
//! ```no_run
//! use moon_vm::prelude::*;
//!
//! fn run(image: &[u8]) -> Result<Vec<Value>, VmError> {
//!     let mut vm = Interpreter::new(VmParams::default());
//!     let closure = vm.load_image(image)?;
//!     vm.call(closure, &[Value::Integer(42)])
//! }
//! ```

#![warn(missing_docs)]

pub mod bytecode;
pub mod call;
pub mod consts;
pub mod error;
pub mod heap;
pub mod host;
pub mod meta;
pub mod state;
pub mod table;
pub mod thread;
pub mod value;

mod interpreter;

pub use interpreter::{HookFn, Interpreter, VmParams};

/// The commonly-needed surface in one import.
pub mod prelude {
    pub use crate::bytecode::{Constant, Proto, UpvalDesc};
    pub use crate::error::{CompileError, Fault, RuntimeError, VmError};
    pub use crate::heap::Gc;
    pub use crate::host::{Frontend, NativeCall, NativeFn, NativeOutcome};
    pub use crate::state::{Resume, ThreadStatus};
    pub use crate::value::{Closure, Value};
    pub use crate::{Interpreter, VmParams};
}
