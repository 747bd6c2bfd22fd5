use core::fmt;

use crate::{OpMode, Opcode, RawInstruction};

/// Number of bits holding the opcode.
pub const FIELD_OP_BITS: u32 = 7;
/// Number of bits holding the `A` operand.
pub const FIELD_A_BITS: u32 = 8;
/// Number of bits holding the `B` operand.
pub const FIELD_B_BITS: u32 = 8;
/// Number of bits holding the `C` operand.
pub const FIELD_C_BITS: u32 = 8;

/// Bias applied to the 17-bit `Bx` field to obtain the signed `sBx`.
pub const BIAS_SBX: i32 = 1 << 16;
/// Bias applied to the 25-bit `Ax` field to obtain the signed `sJ`.
pub const BIAS_SJ: i32 = 1 << 24;
/// Bias applied to the 8-bit `C` field to obtain the signed `sC`.
pub const BIAS_SC: i32 = 1 << 7;

const OP_MASK: u32 = (1 << FIELD_OP_BITS) - 1;
const A_SHIFT: u32 = FIELD_OP_BITS;
const K_SHIFT: u32 = A_SHIFT + FIELD_A_BITS;
const B_SHIFT: u32 = K_SHIFT + 1;
const C_SHIFT: u32 = B_SHIFT + FIELD_B_BITS;

/// A single 32-bit instruction word.
///
/// Field extraction is total: every accessor is defined for every bit
/// pattern. Whether a field is meaningful depends on the opcode's
/// [`OpMode`]; the decoder consults [`Instruction::opcode`] first.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction(RawInstruction);

impl Instruction {
    /// Size of an encoded instruction in bytes.
    pub const SIZE: usize = 4;

    /// Wrap a raw bit pattern without validating the opcode.
    pub const fn from_raw(raw: RawInstruction) -> Self {
        Self(raw)
    }

    /// The raw bit pattern.
    pub const fn raw(self) -> RawInstruction {
        self.0
    }

    /// Decode the opcode field, if it maps to a known opcode.
    pub const fn opcode(self) -> Option<Opcode> {
        Opcode::from_u8((self.0 & OP_MASK) as u8)
    }

    /// The `A` operand.
    pub const fn a(self) -> u8 {
        (self.0 >> A_SHIFT) as u8
    }

    /// The `k` flag.
    pub const fn k(self) -> bool {
        (self.0 >> K_SHIFT) & 1 != 0
    }

    /// The `B` operand.
    pub const fn b(self) -> u8 {
        (self.0 >> B_SHIFT) as u8
    }

    /// The `C` operand.
    pub const fn c(self) -> u8 {
        (self.0 >> C_SHIFT) as u8
    }

    /// The `C` operand read as a biased signed immediate.
    pub const fn sc(self) -> i32 {
        self.c() as i32 - BIAS_SC
    }

    /// The unsigned 17-bit `Bx` field (`k`, `B` and `C` concatenated).
    pub const fn bx(self) -> u32 {
        self.0 >> K_SHIFT
    }

    /// The signed 17-bit `sBx` field.
    pub const fn sbx(self) -> i32 {
        self.bx() as i32 - BIAS_SBX
    }

    /// The unsigned 25-bit `Ax` field (`A`, `k`, `B` and `C` concatenated).
    pub const fn ax(self) -> u32 {
        self.0 >> A_SHIFT
    }

    /// The signed 25-bit `sJ` field.
    pub const fn sj(self) -> i32 {
        self.ax() as i32 - BIAS_SJ
    }

    /// Pack an iABC instruction.
    pub const fn abc(op: Opcode, a: u8, b: u8, c: u8, k: bool) -> Self {
        Self(
            op as u32
                | (a as u32) << A_SHIFT
                | (k as u32) << K_SHIFT
                | (b as u32) << B_SHIFT
                | (c as u32) << C_SHIFT,
        )
    }

    /// Pack an iABx instruction. `bx` is truncated to 17 bits.
    pub const fn abx(op: Opcode, a: u8, bx: u32) -> Self {
        Self(op as u32 | (a as u32) << A_SHIFT | (bx & 0x1ffff) << K_SHIFT)
    }

    /// Pack an iAsBx instruction.
    pub const fn asbx(op: Opcode, a: u8, sbx: i32) -> Self {
        Self::abx(op, a, (sbx + BIAS_SBX) as u32)
    }

    /// Pack an iAx instruction. `ax` is truncated to 25 bits.
    pub const fn iax(op: Opcode, ax: u32) -> Self {
        Self(op as u32 | (ax & 0x1ff_ffff) << A_SHIFT)
    }

    /// Pack an isJ instruction.
    pub const fn isj(op: Opcode, sj: i32) -> Self {
        Self::iax(op, (sj + BIAS_SJ) as u32)
    }

    /// Encode as little-endian bytes, the on-disk representation.
    pub const fn to_bytes(self) -> [u8; Self::SIZE] {
        self.0.to_le_bytes()
    }

    /// Decode from little-endian bytes.
    pub const fn from_le_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

impl From<RawInstruction> for Instruction {
    fn from(raw: RawInstruction) -> Self {
        Self(raw)
    }
}

impl From<Instruction> for RawInstruction {
    fn from(inst: Instruction) -> Self {
        inst.0
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Some(_) => write!(f, "Instruction({self})"),
            None => write!(f, "Instruction(invalid {:#010x})", self.0),
        }
    }
}

/// One-line disassembly, rendered per the opcode's operand mode.
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(op) = self.opcode() else {
            return write!(f, "??? {:#010x}", self.0);
        };

        match op.mode() {
            OpMode::Abc if self.k() => {
                write!(f, "{op} {} {} {} k", self.a(), self.b(), self.c())
            }
            OpMode::Abc => write!(f, "{op} {} {} {}", self.a(), self.b(), self.c()),
            OpMode::Abx => write!(f, "{op} {} {}", self.a(), self.bx()),
            OpMode::Asbx => write!(f, "{op} {} {}", self.a(), self.sbx()),
            OpMode::Ax => write!(f, "{op} {}", self.ax()),
            OpMode::Sj => write!(f, "{op} {}", self.sj()),
        }
    }
}

/// Decode a little-endian byte stream into instructions.
///
/// Trailing bytes that do not fill a whole instruction are dropped.
pub fn from_bytes<I>(bytes: I) -> impl Iterator<Item = Instruction>
where
    I: IntoIterator<Item = u8>,
{
    let mut bytes = bytes.into_iter();
    core::iter::from_fn(move || {
        let mut buf = [0u8; Instruction::SIZE];
        for slot in buf.iter_mut() {
            *slot = bytes.next()?;
        }
        Some(Instruction::from_le_bytes(buf))
    })
}
