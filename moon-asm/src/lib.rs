//! Instruction set and codec of the Moon virtual machine.
//!
//! Every instruction is a fixed-width 32-bit word. The same word admits five
//! interpretations, selected by the opcode:
//!
//! | mode  | fields                                  |
//! |-------|-----------------------------------------|
//! | iABC  | `op:7, A:8, k:1, B:8, C:8`              |
//! | iABx  | `op:7, A:8, Bx:17` (unsigned)           |
//! | iAsBx | `op:7, A:8, sBx:17` (biased signed)     |
//! | iAx   | `op:7, Ax:25` (unsigned)                |
//! | isJ   | `op:7, sJ:25` (biased signed)           |
//!
//! Signed immediates carry a power-of-two bias so the raw field is always
//! unsigned: `sBx = Bx - BIAS_SBX`, `sJ = Ax - BIAS_SJ`, and the signed
//! 8-bit `C` operand of the immediate arithmetic and comparison opcodes is
//! `sC = C - BIAS_SC`.
//!
//! [`op`] exposes one constructor per opcode so front-ends and tests can
//! assemble bytecode without touching field layout.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

mod fault;
mod instruction;
mod opcode;
pub mod op;


pub use fault::Fault;
pub use instruction::{
    from_bytes, Instruction, BIAS_SBX, BIAS_SC, BIAS_SJ, FIELD_A_BITS, FIELD_B_BITS,
    FIELD_C_BITS, FIELD_OP_BITS,
};
pub use opcode::{InvalidOpcode, OpMode, Opcode};

/// The raw bit pattern of a single instruction.
pub type RawInstruction = u32;
