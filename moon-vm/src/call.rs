//! Call-frame records.

use std::rc::Rc;

use bitflags::bitflags;

use crate::bytecode::Proto;
use crate::heap::Gc;
use crate::value::Closure;

bitflags! {
    /// Per-frame properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// Unwind barrier installed by a protected call.
        const PROTECTED = 0b0001;
        /// The frame was reused by at least one tailcall.
        const TAILCALLED = 0b0010;
    }
}

/// Bit set of register indices marked to-be-closed.
///
/// Register indices are bounded by `maxstacksize: u8`, so four words cover
/// the whole window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TbcSet([u64; 4]);

impl TbcSet {
    /// The empty set.
    pub const fn new() -> Self {
        Self([0; 4])
    }

    /// Mark register `i`.
    pub fn set(&mut self, i: usize) {
        self.0[i / 64] |= 1 << (i % 64);
    }

    /// Unmark register `i`.
    pub fn clear(&mut self, i: usize) {
        self.0[i / 64] &= !(1 << (i % 64));
    }

    /// Whether register `i` is marked.
    pub fn contains(&self, i: usize) -> bool {
        self.0[i / 64] & (1 << (i % 64)) != 0
    }

    /// True when no register is marked.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Highest marked register at or above `from`, for LIFO closing.
    pub fn highest_at_or_above(&self, from: usize) -> Option<usize> {
        let mut best = None;
        for word in (0..4).rev() {
            let bits = self.0[word];
            if bits == 0 {
                continue;
            }
            let top = word * 64 + (63 - bits.leading_zeros() as usize);
            if top >= from {
                best = Some(top);
                break;
            }
        }
        best
    }
}

/// One active invocation.
///
/// Registers are base-relative: `R[i]` is `stack[base + i]`. `ret_base` is
/// where the frame's results must land when it returns.
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// The invoking closure; the source of upvalues.
    pub closure: Option<Gc<Closure>>,
    /// The prototype being executed.
    pub proto: Rc<Proto>,
    /// Instruction index into `proto.code`.
    pub pc: usize,
    /// Saved instruction index across yield/resume.
    pub saved_pc: usize,
    /// Absolute stack index of register 0.
    pub base: usize,
    /// Absolute stack index where results are placed.
    pub ret_base: usize,
    /// Expected result count; `-1` means all.
    pub nresults: i32,
    /// Absolute start of the frame's extra arguments.
    pub vararg_base: usize,
    /// Number of extra arguments.
    pub vararg_count: usize,
    /// Frame properties.
    pub flags: FrameFlags,
    /// Registers marked to-be-closed.
    pub tbc: TbcSet,
}

impl CallInfo {
    /// Fresh frame over `proto` at `base`.
    pub fn new(
        closure: Option<Gc<Closure>>,
        proto: Rc<Proto>,
        base: usize,
        ret_base: usize,
        nresults: i32,
        flags: FrameFlags,
    ) -> Self {
        Self {
            closure,
            proto,
            pc: 0,
            saved_pc: 0,
            base,
            ret_base,
            nresults,
            vararg_base: base,
            vararg_count: 0,
            flags,
            tbc: TbcSet::new(),
        }
    }

    /// Whether this frame is an unwind barrier.
    pub fn is_protected(&self) -> bool {
        self.flags.contains(FrameFlags::PROTECTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tbc_set_tracks_highest_first() {
        let mut tbc = TbcSet::new();
        assert!(tbc.is_empty());
        tbc.set(3);
        tbc.set(70);
        tbc.set(200);

        assert_eq!(tbc.highest_at_or_above(0), Some(200));
        tbc.clear(200);
        assert_eq!(tbc.highest_at_or_above(0), Some(70));
        assert_eq!(tbc.highest_at_or_above(71), None);
        tbc.clear(70);
        assert_eq!(tbc.highest_at_or_above(0), Some(3));
        tbc.clear(3);
        assert!(tbc.is_empty());
    }
}
