use core::fmt;

/// Operand interpretation of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpMode {
    /// `op A k B C`.
    Abc,
    /// `op A Bx` with `Bx` unsigned.
    Abx,
    /// `op A sBx` with `sBx` biased signed.
    Asbx,
    /// `op Ax` with `Ax` unsigned.
    Ax,
    /// `op sJ` with `sJ` biased signed.
    Sj,
}

/// The opcode set.
///
/// Numbering is dense from `MOVE = 0` through `EXTRAARG = 82`, with the
/// protected-call extension at `PCALL = 100`. Constant operands use the
/// dedicated K-suffixed opcodes; there is no RK addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// `R[A] := R[B]`
    MOVE = 0x00,
    /// `R[A] := integer(sBx)`
    LOADI = 0x01,
    /// `R[A] := number(sBx)`
    LOADF = 0x02,
    /// `R[A] := K[Bx]`
    LOADK = 0x03,
    /// `R[A] := K[Ax]`, `Ax` taken from the following `EXTRAARG`
    LOADKX = 0x04,
    /// `R[A] := false`
    LOADFALSE = 0x05,
    /// `R[A] := false`; skip next instruction
    LFALSESKIP = 0x06,
    /// `R[A] := true`
    LOADTRUE = 0x07,
    /// `R[A], ..., R[A+B] := nil`
    LOADNIL = 0x08,
    /// `R[A] := UV[B]`
    GETUPVAL = 0x09,
    /// `UV[B] := R[A]`
    SETUPVAL = 0x0a,
    /// `R[A] := UV[B][K[C]]`
    GETTABUP = 0x0b,
    /// `R[A] := R[B][R[C]]`
    GETTABLE = 0x0c,
    /// `R[A] := R[B][C]` with integer key
    GETI = 0x0d,
    /// `R[A] := R[B][K[C]]` with string key
    GETFIELD = 0x0e,
    /// `UV[A][K[B]] := RK(C)`
    SETTABUP = 0x0f,
    /// `R[A][R[B]] := RK(C)`
    SETTABLE = 0x10,
    /// `R[A][B] := RK(C)` with integer key
    SETI = 0x11,
    /// `R[A][K[B]] := RK(C)` with string key
    SETFIELD = 0x12,
    /// `R[A] := {}` with size hints in `B`/`C`
    NEWTABLE = 0x13,
    /// `R[A+1] := R[B]; R[A] := R[B][RK(C)]`
    SELF = 0x14,
    /// `R[A] := R[B] + sC`
    ADDI = 0x15,
    /// `R[A] := R[B] + K[C]`
    ADDK = 0x16,
    /// `R[A] := R[B] - K[C]`
    SUBK = 0x17,
    /// `R[A] := R[B] * K[C]`
    MULK = 0x18,
    /// `R[A] := R[B] % K[C]`
    MODK = 0x19,
    /// `R[A] := R[B] ^ K[C]`
    POWK = 0x1a,
    /// `R[A] := R[B] / K[C]`
    DIVK = 0x1b,
    /// `R[A] := R[B] // K[C]`
    IDIVK = 0x1c,
    /// `R[A] := R[B] & K[C]`
    BANDK = 0x1d,
    /// `R[A] := R[B] | K[C]`
    BORK = 0x1e,
    /// `R[A] := R[B] ~ K[C]`
    BXORK = 0x1f,
    /// `R[A] := R[B] >> sC`
    SHRI = 0x20,
    /// `R[A] := R[B] << sC`
    SHLI = 0x21,
    /// `R[A] := R[B] + R[C]`
    ADD = 0x22,
    /// `R[A] := R[B] - R[C]`
    SUB = 0x23,
    /// `R[A] := R[B] * R[C]`
    MUL = 0x24,
    /// `R[A] := R[B] % R[C]`
    MOD = 0x25,
    /// `R[A] := R[B] ^ R[C]`
    POW = 0x26,
    /// `R[A] := R[B] / R[C]`
    DIV = 0x27,
    /// `R[A] := R[B] // R[C]`
    IDIV = 0x28,
    /// `R[A] := R[B] & R[C]`
    BAND = 0x29,
    /// `R[A] := R[B] | R[C]`
    BOR = 0x2a,
    /// `R[A] := R[B] ~ R[C]`
    BXOR = 0x2b,
    /// `R[A] := R[B] << R[C]`
    SHL = 0x2c,
    /// `R[A] := R[B] >> R[C]`
    SHR = 0x2d,
    /// Metamethod fallback for the preceding register/register arithmetic
    MMBIN = 0x2e,
    /// Metamethod fallback for the preceding immediate arithmetic
    MMBINI = 0x2f,
    /// Metamethod fallback for the preceding register/constant arithmetic
    MMBINK = 0x30,
    /// `R[A] := -R[B]`
    UNM = 0x31,
    /// `R[A] := ~R[B]`
    BNOT = 0x32,
    /// `R[A] := not R[B]`
    NOT = 0x33,
    /// `R[A] := #R[B]`
    LEN = 0x34,
    /// `R[A] := R[A] .. ... .. R[B]`
    CONCAT = 0x35,
    /// Close upvalues and TBC slots at or above `R[A]`
    CLOSE = 0x36,
    /// Mark `R[A]` as to-be-closed
    TBC = 0x37,
    /// `pc += sJ`
    JMP = 0x38,
    /// Skip next if `(R[B] == R[C]) != A`
    EQ = 0x39,
    /// Skip next if `(R[B] < R[C]) != A`
    LT = 0x3a,
    /// Skip next if `(R[B] <= R[C]) != A`
    LE = 0x3b,
    /// Skip next if `(R[B] == K[C]) != A`
    EQK = 0x3c,
    /// Skip next if `(R[B] == sC) != A`
    EQI = 0x3d,
    /// Skip next if `(R[B] < sC) != A`
    LTI = 0x3e,
    /// Skip next if `(R[B] <= sC) != A`
    LEI = 0x3f,
    /// Skip next if `(R[B] > sC) != A`
    GTI = 0x40,
    /// Skip next if `(R[B] >= sC) != A`
    GEI = 0x41,
    /// Skip next if `truthy(R[A]) != k`
    TEST = 0x42,
    /// `R[A] := R[B]` if `truthy(R[B]) == k`, else skip next
    TESTSET = 0x43,
    /// Call `R[A]` with `B-1` arguments expecting `C-1` results
    CALL = 0x44,
    /// Like CALL, reusing the current frame
    TAILCALL = 0x45,
    /// Return `B-1` results starting at `R[A]`
    RETURN = 0x46,
    /// Return no results
    RETURN0 = 0x47,
    /// Return `R[A]`
    RETURN1 = 0x48,
    /// Numeric for-loop step
    FORLOOP = 0x49,
    /// Numeric for-loop setup
    FORPREP = 0x4a,
    /// Generic for-loop setup
    TFORPREP = 0x4b,
    /// Generic for-loop iterator call
    TFORCALL = 0x4c,
    /// Generic for-loop step
    TFORLOOP = 0x4d,
    /// Bulk table initialisation from a register run
    SETLIST = 0x4e,
    /// `R[A] := closure(proto.protos[Bx])`
    CLOSURE = 0x4f,
    /// Materialise varargs at `R[A]`
    VARARG = 0x50,
    /// Record the vararg range; first instruction of vararg functions
    VARARGPREP = 0x51,
    /// Extra 25-bit payload for the preceding instruction
    EXTRAARG = 0x52,
    /// Protected call extension: `R[A], R[A+1], ... := pcall(R[A+1], ...)`
    PCALL = 0x64,
}

impl Opcode {
    /// Decode an opcode byte. Unknown bytes yield `None`.
    pub const fn from_u8(b: u8) -> Option<Self> {
        use Opcode::*;
        Some(match b {
            0x00 => MOVE,
            0x01 => LOADI,
            0x02 => LOADF,
            0x03 => LOADK,
            0x04 => LOADKX,
            0x05 => LOADFALSE,
            0x06 => LFALSESKIP,
            0x07 => LOADTRUE,
            0x08 => LOADNIL,
            0x09 => GETUPVAL,
            0x0a => SETUPVAL,
            0x0b => GETTABUP,
            0x0c => GETTABLE,
            0x0d => GETI,
            0x0e => GETFIELD,
            0x0f => SETTABUP,
            0x10 => SETTABLE,
            0x11 => SETI,
            0x12 => SETFIELD,
            0x13 => NEWTABLE,
            0x14 => SELF,
            0x15 => ADDI,
            0x16 => ADDK,
            0x17 => SUBK,
            0x18 => MULK,
            0x19 => MODK,
            0x1a => POWK,
            0x1b => DIVK,
            0x1c => IDIVK,
            0x1d => BANDK,
            0x1e => BORK,
            0x1f => BXORK,
            0x20 => SHRI,
            0x21 => SHLI,
            0x22 => ADD,
            0x23 => SUB,
            0x24 => MUL,
            0x25 => MOD,
            0x26 => POW,
            0x27 => DIV,
            0x28 => IDIV,
            0x29 => BAND,
            0x2a => BOR,
            0x2b => BXOR,
            0x2c => SHL,
            0x2d => SHR,
            0x2e => MMBIN,
            0x2f => MMBINI,
            0x30 => MMBINK,
            0x31 => UNM,
            0x32 => BNOT,
            0x33 => NOT,
            0x34 => LEN,
            0x35 => CONCAT,
            0x36 => CLOSE,
            0x37 => TBC,
            0x38 => JMP,
            0x39 => EQ,
            0x3a => LT,
            0x3b => LE,
            0x3c => EQK,
            0x3d => EQI,
            0x3e => LTI,
            0x3f => LEI,
            0x40 => GTI,
            0x41 => GEI,
            0x42 => TEST,
            0x43 => TESTSET,
            0x44 => CALL,
            0x45 => TAILCALL,
            0x46 => RETURN,
            0x47 => RETURN0,
            0x48 => RETURN1,
            0x49 => FORLOOP,
            0x4a => FORPREP,
            0x4b => TFORPREP,
            0x4c => TFORCALL,
            0x4d => TFORLOOP,
            0x4e => SETLIST,
            0x4f => CLOSURE,
            0x50 => VARARG,
            0x51 => VARARGPREP,
            0x52 => EXTRAARG,
            0x64 => PCALL,
            _ => return None,
        })
    }

    /// Operand mode of this opcode.
    pub const fn mode(self) -> OpMode {
        use Opcode::*;
        match self {
            LOADI | LOADF | FORLOOP | FORPREP | TFORPREP | TFORLOOP => OpMode::Asbx,
            LOADK | LOADKX | CLOSURE => OpMode::Abx,
            EXTRAARG => OpMode::Ax,
            JMP => OpMode::Sj,
            _ => OpMode::Abc,
        }
    }

    /// True for the metamethod-dispatch hint opcodes that trail an
    /// arithmetic instruction.
    pub const fn is_mm_hint(self) -> bool {
        matches!(self, Opcode::MMBIN | Opcode::MMBINI | Opcode::MMBINK)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Failed to map a byte onto the opcode set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvalidOpcode;

impl fmt::Display for InvalidOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid opcode")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidOpcode {}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcode;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        Self::from_u8(b).ok_or(InvalidOpcode)
    }
}
