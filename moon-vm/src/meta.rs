//! Metamethod event tags.

use strum::{EnumCount, IntoEnumIterator};

use crate::heap::{Gc, Heap};
use crate::value::{LuaStr, Value};

/// The reserved metamethod events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::EnumCount)]
#[repr(u8)]
pub enum MetaEvent {
    /// `__add`
    Add,
    /// `__sub`
    Sub,
    /// `__mul`
    Mul,
    /// `__div`
    Div,
    /// `__mod`
    Mod,
    /// `__pow`
    Pow,
    /// `__unm`
    Unm,
    /// `__idiv`
    IDiv,
    /// `__band`
    BAnd,
    /// `__bor`
    BOr,
    /// `__bxor`
    BXor,
    /// `__bnot`
    BNot,
    /// `__shl`
    Shl,
    /// `__shr`
    Shr,
    /// `__len`
    Len,
    /// `__concat`
    Concat,
    /// `__eq`
    Eq,
    /// `__lt`
    Lt,
    /// `__le`
    Le,
    /// `__index`
    Index,
    /// `__newindex`
    NewIndex,
    /// `__call`
    Call,
    /// `__tostring`
    ToString,
    /// `__close`
    Close,
    /// `__gc`
    Gc,
}

impl MetaEvent {
    /// The well-known string key for this event.
    pub const fn tag(self) -> &'static str {
        match self {
            MetaEvent::Add => "__add",
            MetaEvent::Sub => "__sub",
            MetaEvent::Mul => "__mul",
            MetaEvent::Div => "__div",
            MetaEvent::Mod => "__mod",
            MetaEvent::Pow => "__pow",
            MetaEvent::Unm => "__unm",
            MetaEvent::IDiv => "__idiv",
            MetaEvent::BAnd => "__band",
            MetaEvent::BOr => "__bor",
            MetaEvent::BXor => "__bxor",
            MetaEvent::BNot => "__bnot",
            MetaEvent::Shl => "__shl",
            MetaEvent::Shr => "__shr",
            MetaEvent::Len => "__len",
            MetaEvent::Concat => "__concat",
            MetaEvent::Eq => "__eq",
            MetaEvent::Lt => "__lt",
            MetaEvent::Le => "__le",
            MetaEvent::Index => "__index",
            MetaEvent::NewIndex => "__newindex",
            MetaEvent::Call => "__call",
            MetaEvent::ToString => "__tostring",
            MetaEvent::Close => "__close",
            MetaEvent::Gc => "__gc",
        }
    }

    /// From the numeric discriminant carried in MMBIN-family operands.
    pub fn from_u8(b: u8) -> Option<Self> {
        MetaEvent::iter().nth(b as usize)
    }
}

/// Pre-interned event tag strings, one handle per event.
pub(crate) struct MetaTags {
    handles: [Gc<LuaStr>; MetaEvent::COUNT],
}

impl MetaTags {
    pub(crate) fn intern_all(heap: &mut Heap) -> Self {
        let mut handles = [Gc::new(0); MetaEvent::COUNT];
        for ev in MetaEvent::iter() {
            handles[ev as usize] = heap.new_str(ev.tag().as_bytes());
        }
        Self { handles }
    }

    pub(crate) fn key(&self, ev: MetaEvent) -> Value {
        Value::Str(self.handles[ev as usize])
    }

    /// The tag strings are GC roots; losing one would unintern it.
    pub(crate) fn roots(&self) -> impl Iterator<Item = Value> + '_ {
        self.handles.iter().map(|&h| Value::Str(h))
    }
}
