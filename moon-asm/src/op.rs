//! Constructor functions, one per opcode.
//!
//! Front-ends and tests assemble bytecode through these instead of packing
//! fields by hand. Signed immediates take the unbiased value; the bias is
//! applied here.

use crate::{Instruction, Opcode, BIAS_SC};

macro_rules! op_a {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(a: u8) -> Instruction {
                Instruction::abc(Opcode::$opcode, a, 0, 0, false)
            }
        )*
    };
}

macro_rules! op_ab {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(a: u8, b: u8) -> Instruction {
                Instruction::abc(Opcode::$opcode, a, b, 0, false)
            }
        )*
    };
}

macro_rules! op_abc {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(a: u8, b: u8, c: u8) -> Instruction {
                Instruction::abc(Opcode::$opcode, a, b, c, false)
            }
        )*
    };
}

macro_rules! op_abck {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(a: u8, b: u8, c: u8, k: bool) -> Instruction {
                Instruction::abc(Opcode::$opcode, a, b, c, k)
            }
        )*
    };
}

macro_rules! op_abx {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(a: u8, bx: u32) -> Instruction {
                Instruction::abx(Opcode::$opcode, a, bx)
            }
        )*
    };
}

macro_rules! op_asbx {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(a: u8, sbx: i32) -> Instruction {
                Instruction::asbx(Opcode::$opcode, a, sbx)
            }
        )*
    };
}

/// Skip-protocol comparison over two registers; `sense` selects the test
/// polarity carried in `A`.
macro_rules! op_cmp {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(sense: bool, b: u8, c: u8) -> Instruction {
                Instruction::abc(Opcode::$opcode, sense as u8, b, c, false)
            }
        )*
    };
}

/// Skip-protocol comparison against a signed immediate.
macro_rules! op_cmpi {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(sense: bool, b: u8, imm: i8) -> Instruction {
                Instruction::abc(
                    Opcode::$opcode,
                    sense as u8,
                    b,
                    (imm as i32 + BIAS_SC) as u8,
                    false,
                )
            }
        )*
    };
}

/// Arithmetic against a signed 8-bit immediate carried in `C`.
macro_rules! op_abi {
    ($($doc:literal $name:ident $opcode:ident),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const fn $name(a: u8, b: u8, imm: i8) -> Instruction {
                Instruction::abc(
                    Opcode::$opcode,
                    a,
                    b,
                    (imm as i32 + BIAS_SC) as u8,
                    false,
                )
            }
        )*
    };
}

op_a! {
    "`R[A] := false`" loadfalse LOADFALSE,
    "`R[A] := false`; skip next instruction" lfalseskip LFALSESKIP,
    "`R[A] := true`" loadtrue LOADTRUE,
    "Close upvalues and TBC slots at or above `R[A]`" close CLOSE,
    "Mark `R[A]` as to-be-closed" tbc TBC,
    "Return `R[A]`" return1 RETURN1,
    "Record the vararg range for the current frame" varargprep VARARGPREP,
}

op_ab! {
    "`R[A] := R[B]`" move_ MOVE,
    "`R[A], ..., R[A+B] := nil`" loadnil LOADNIL,
    "`R[A] := UV[B]`" getupval GETUPVAL,
    "`UV[B] := R[A]`" setupval SETUPVAL,
    "`R[A] := -R[B]`" unm UNM,
    "`R[A] := ~R[B]`" bnot BNOT,
    "`R[A] := not R[B]`" not NOT,
    "`R[A] := #R[B]`" len LEN,
    "`R[A] := R[A] .. ... .. R[B]`" concat CONCAT,
}

op_abc! {
    "`R[A] := UV[B][K[C]]`" gettabup GETTABUP,
    "`R[A] := R[B][R[C]]`" gettable GETTABLE,
    "`R[A] := R[B][C]` (integer key)" geti GETI,
    "`R[A] := R[B][K[C]]` (string key)" getfield GETFIELD,
    "`R[A] := R[B] + K[C]`" addk ADDK,
    "`R[A] := R[B] - K[C]`" subk SUBK,
    "`R[A] := R[B] * K[C]`" mulk MULK,
    "`R[A] := R[B] % K[C]`" modk MODK,
    "`R[A] := R[B] ^ K[C]`" powk POWK,
    "`R[A] := R[B] / K[C]`" divk DIVK,
    "`R[A] := R[B] // K[C]`" idivk IDIVK,
    "`R[A] := R[B] & K[C]`" bandk BANDK,
    "`R[A] := R[B] | K[C]`" bork BORK,
    "`R[A] := R[B] ~ K[C]`" bxork BXORK,
    "`R[A] := R[B] + R[C]`" add ADD,
    "`R[A] := R[B] - R[C]`" sub SUB,
    "`R[A] := R[B] * R[C]`" mul MUL,
    "`R[A] := R[B] % R[C]`" mod_ MOD,
    "`R[A] := R[B] ^ R[C]`" pow POW,
    "`R[A] := R[B] / R[C]`" div DIV,
    "`R[A] := R[B] // R[C]`" idiv IDIV,
    "`R[A] := R[B] & R[C]`" band BAND,
    "`R[A] := R[B] | R[C]`" bor BOR,
    "`R[A] := R[B] ~ R[C]`" bxor BXOR,
    "`R[A] := R[B] << R[C]`" shl SHL,
    "`R[A] := R[B] >> R[C]`" shr SHR,
    "Metamethod fallback for register/register arithmetic" mmbin MMBIN,
    "Call `R[A]` with `B-1` arguments expecting `C-1` results" call CALL,
    "Tail-call `R[A]` with `B-1` arguments" tailcall TAILCALL,
    "Return `B-1` results starting at `R[A]`" return_ RETURN,
    "Protected call of `R[A+1]` with `B-1` arguments" pcall PCALL,
}

op_abck! {
    "`UV[A][K[B]] := RK(C)`" settabup SETTABUP,
    "`R[A][R[B]] := RK(C)`" settable SETTABLE,
    "`R[A][B] := RK(C)` (integer key)" seti SETI,
    "`R[A][K[B]] := RK(C)` (string key)" setfield SETFIELD,
    "`R[A] := {}`; `B`/`C` are prealloc hints, `k` flags an EXTRAARG hint" newtable NEWTABLE,
    "`R[A+1] := R[B]; R[A] := R[B][RK(C)]`" self_ SELF,
    "Metamethod fallback for immediate arithmetic" mmbini MMBINI,
    "Metamethod fallback for register/constant arithmetic" mmbink MMBINK,
    "Store a register run into `R[A]` at integer keys" setlist SETLIST,
}

op_abx! {
    "`R[A] := K[Bx]`" loadk LOADK,
    "`R[A] := K[Ax]` from the following EXTRAARG" loadkx LOADKX,
    "`R[A] := closure(proto.protos[Bx])`" closure CLOSURE,
}

op_asbx! {
    "`R[A] := integer(sBx)`" loadi LOADI,
    "`R[A] := number(sBx)`" loadf LOADF,
    "Numeric for-loop step; jumps back `sBx` while iterating" forloop FORLOOP,
    "Numeric for-loop setup; skips `sBx+1` on a zero-trip loop" forprep FORPREP,
    "Generic for-loop setup; jumps `sBx` to the call point" tforprep TFORPREP,
    "Generic for-loop step; jumps back `sBx` while iterating" tforloop TFORLOOP,
}

op_cmp! {
    "Skip next unless `(R[B] == R[C]) == sense`" eq EQ,
    "Skip next unless `(R[B] < R[C]) == sense`" lt LT,
    "Skip next unless `(R[B] <= R[C]) == sense`" le LE,
}

/// Skip next unless `(R[B] == K[C]) == sense`.
pub const fn eqk(sense: bool, b: u8, c: u8) -> Instruction {
    Instruction::abc(Opcode::EQK, sense as u8, b, c, false)
}

op_cmpi! {
    "Skip next unless `(R[B] == imm) == sense`" eqi EQI,
    "Skip next unless `(R[B] < imm) == sense`" lti LTI,
    "Skip next unless `(R[B] <= imm) == sense`" lei LEI,
    "Skip next unless `(R[B] > imm) == sense`" gti GTI,
    "Skip next unless `(R[B] >= imm) == sense`" gei GEI,
}

op_abi! {
    "`R[A] := R[B] + imm`" addi ADDI,
    "`R[A] := R[B] >> imm`" shri SHRI,
    "`R[A] := R[B] << imm`" shli SHLI,
}

/// Skip next unless `truthy(R[A]) == k`.
pub const fn test(a: u8, k: bool) -> Instruction {
    Instruction::abc(Opcode::TEST, a, 0, 0, k)
}

/// `R[A] := R[B]` if `truthy(R[B]) == k`, else skip next.
pub const fn testset(a: u8, b: u8, k: bool) -> Instruction {
    Instruction::abc(Opcode::TESTSET, a, b, 0, k)
}

/// `pc += sj`.
pub const fn jmp(sj: i32) -> Instruction {
    Instruction::isj(Opcode::JMP, sj)
}

/// Call the iterator; `c` results land at `R[A+4]`.
pub const fn tforcall(a: u8, c: u8) -> Instruction {
    Instruction::abc(Opcode::TFORCALL, a, 0, c, false)
}

/// Return no results.
pub const fn return0() -> Instruction {
    Instruction::abc(Opcode::RETURN0, 0, 0, 0, false)
}

/// Materialise `c-1` varargs at `R[A]` (all of them when `c == 0`).
pub const fn vararg(a: u8, c: u8) -> Instruction {
    Instruction::abc(Opcode::VARARG, a, 0, c, false)
}

/// Extra 25-bit payload for the preceding instruction.
pub const fn extraarg(ax: u32) -> Instruction {
    Instruction::iax(Opcode::EXTRAARG, ax)
}
