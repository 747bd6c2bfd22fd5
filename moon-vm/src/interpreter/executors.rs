//! The dispatch loop, split like the rest of the interpreter: `main`
//! carries the outer run loop and safe points, `instruction` the
//! per-opcode semantics.

mod instruction;
mod main;
