//! Object pools and the mark–sweep collector.
//!
//! Heap objects live in typed arenas addressed by [`Gc`] index handles.
//! Collection traces from the root providers handed in by the interpreter:
//! thread stacks up to `top`, CallInfo chains, open-upvalue lists, and the
//! globals/registry tables. Strings are interned; handle equality is byte
//! equality.

use core::fmt;
use core::marker::PhantomData;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::table::Table;
use crate::thread::Thread;
use crate::value::{Closure, LuaStr, Upvalue, Value};

/// Typed handle into one of the heap's object pools.
pub struct Gc<T> {
    index: u32,
    marker: PhantomData<fn() -> T>,
}

impl<T> Gc<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            marker: PhantomData,
        }
    }

    /// The raw pool slot, mainly useful for identity-keyed maps.
    pub fn index(self) -> u32 {
        self.index
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Gc<T> {}

impl<T> core::hash::Hash for Gc<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gc({})", self.index)
    }
}

struct Slot<T> {
    value: T,
    mark: bool,
}

pub(crate) struct Arena<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, value: T) -> u32 {
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(Slot { value, mark: false });
                i
            }
            None => {
                self.slots.push(Some(Slot { value, mark: false }));
                (self.slots.len() - 1) as u32
            }
        }
    }

    fn get(&self, index: u32) -> &T {
        self.slots[index as usize]
            .as_ref()
            .map(|s| &s.value)
            .expect("stale heap handle")
    }

    fn get_mut(&mut self, index: u32) -> &mut T {
        self.slots[index as usize]
            .as_mut()
            .map(|s| &mut s.value)
            .expect("stale heap handle")
    }

    /// Set the mark bit; returns whether it was already set.
    fn mark(&mut self, index: u32) -> bool {
        let slot = self.slots[index as usize]
            .as_mut()
            .expect("stale heap handle");
        core::mem::replace(&mut slot.mark, true)
    }

    fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Free unmarked slots, clearing marks on survivors. Calls `on_free`
    /// with each freed value.
    fn sweep(&mut self, mut on_free: impl FnMut(T)) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(s) if s.mark => s.mark = false,
                Some(_) => {
                    let s = slot.take().expect("checked above");
                    self.free.push(i as u32);
                    on_free(s.value);
                }
                None => {}
            }
        }
    }
}

enum Gray {
    Val(Value),
    Upv(Gc<Upvalue>),
}

/// The runtime heap: typed pools, the intern map, the inhibit counter, and
/// the finalizer queue.
pub struct Heap {
    strings: Arena<LuaStr>,
    tables: Arena<Table>,
    closures: Arena<Closure>,
    upvalues: Arena<Upvalue>,
    threads: Arena<Thread>,
    intern: HashMap<Rc<[u8]>, u32>,
    inhibit: u32,
    allocated_since_gc: usize,
    threshold: usize,
    growth_percent: usize,
    finalize_queue: Vec<Gc<Table>>,
}

impl Heap {
    pub(crate) fn new(threshold: usize, growth_percent: usize) -> Self {
        Self {
            strings: Arena::new(),
            tables: Arena::new(),
            closures: Arena::new(),
            upvalues: Arena::new(),
            threads: Arena::new(),
            intern: HashMap::new(),
            inhibit: 0,
            allocated_since_gc: 0,
            threshold,
            growth_percent,
            finalize_queue: Vec::new(),
        }
    }

    /// Intern a byte string, returning the canonical handle.
    pub fn new_str(&mut self, bytes: &[u8]) -> Gc<LuaStr> {
        if let Some(&i) = self.intern.get(bytes) {
            return Gc::new(i);
        }
        self.allocated_since_gc += 1;
        let shared: Rc<[u8]> = bytes.into();
        let i = self.strings.alloc(LuaStr::new(Rc::clone(&shared)));
        self.intern.insert(shared, i);
        Gc::new(i)
    }

    pub(crate) fn new_table(&mut self, narr: usize, nhash: usize) -> Gc<Table> {
        self.allocated_since_gc += 1;
        Gc::new(self.tables.alloc(Table::with_capacity(narr, nhash)))
    }

    pub(crate) fn new_closure(&mut self, closure: Closure) -> Gc<Closure> {
        self.allocated_since_gc += 1;
        Gc::new(self.closures.alloc(closure))
    }

    pub(crate) fn new_upvalue(&mut self, upvalue: Upvalue) -> Gc<Upvalue> {
        self.allocated_since_gc += 1;
        Gc::new(self.upvalues.alloc(upvalue))
    }

    pub(crate) fn new_thread(&mut self, thread: Thread) -> Gc<Thread> {
        self.allocated_since_gc += 1;
        Gc::new(self.threads.alloc(thread))
    }

    /// Borrow a string.
    pub fn str_(&self, h: Gc<LuaStr>) -> &LuaStr {
        self.strings.get(h.index)
    }

    /// Borrow a table.
    pub fn table(&self, h: Gc<Table>) -> &Table {
        self.tables.get(h.index)
    }

    /// Borrow a table mutably.
    pub fn table_mut(&mut self, h: Gc<Table>) -> &mut Table {
        self.tables.get_mut(h.index)
    }

    /// Borrow a closure.
    pub fn closure(&self, h: Gc<Closure>) -> &Closure {
        self.closures.get(h.index)
    }

    pub(crate) fn upvalue(&self, h: Gc<Upvalue>) -> &Upvalue {
        self.upvalues.get(h.index)
    }

    pub(crate) fn upvalue_mut(&mut self, h: Gc<Upvalue>) -> &mut Upvalue {
        self.upvalues.get_mut(h.index)
    }

    /// Borrow a thread.
    pub fn thread(&self, h: Gc<Thread>) -> &Thread {
        self.threads.get(h.index)
    }

    pub(crate) fn thread_mut(&mut self, h: Gc<Thread>) -> &mut Thread {
        self.threads.get_mut(h.index)
    }

    /// Enter a construction window; allocation stops triggering collection
    /// until the matching [`Heap::allow`].
    pub fn inhibit(&mut self) {
        self.inhibit += 1;
    }

    /// Leave a construction window.
    pub fn allow(&mut self) {
        debug_assert!(self.inhibit > 0);
        self.inhibit = self.inhibit.saturating_sub(1);
    }

    pub(crate) fn should_collect(&self) -> bool {
        self.inhibit == 0 && self.allocated_since_gc >= self.threshold
    }

    /// Number of live objects across all pools.
    pub fn live_objects(&self) -> usize {
        self.strings.live()
            + self.tables.live()
            + self.closures.live()
            + self.upvalues.live()
            + self.threads.live()
    }

    pub(crate) fn next_finalizer(&mut self) -> Option<Gc<Table>> {
        self.finalize_queue.pop()
    }

    /// Mark from `roots` and sweep every pool. `gc_key` is the interned
    /// `__gc` tag, used to divert finalizable tables into the queue.
    pub(crate) fn collect(&mut self, roots: &[Value], gc_key: Value) {
        let before = self.live_objects();
        let mut gray = Vec::new();

        for &root in roots {
            self.mark_value(root, &mut gray);
        }
        // Queued-but-undrained finalizable objects stay alive.
        for i in 0..self.finalize_queue.len() {
            let t = self.finalize_queue[i];
            self.mark_value(Value::Table(t), &mut gray);
        }
        self.drain_gray(&mut gray);

        // Unreachable tables with a pending `__gc` are resurrected for one
        // cycle and queued for finalization.
        let mut newly_dead = Vec::new();
        for i in 0..self.tables.slots.len() {
            let handle: Gc<Table> = Gc::new(i as u32);
            let Some(slot) = &self.tables.slots[i] else {
                continue;
            };
            if slot.mark || slot.value.finalized {
                continue;
            }
            if self.table_has_finalizer(handle, gc_key) {
                newly_dead.push(handle);
            }
        }
        for &t in &newly_dead {
            self.tables.get_mut(t.index).finalized = true;
            self.mark_value(Value::Table(t), &mut gray);
        }
        self.drain_gray(&mut gray);

        let intern = &mut self.intern;
        self.strings.sweep(|s| {
            intern.remove(s.as_bytes());
        });
        self.tables.sweep(|_| {});
        self.closures.sweep(|_| {});
        self.upvalues.sweep(|_| {});
        self.threads.sweep(|_| {});

        self.finalize_queue.extend(newly_dead);
        self.allocated_since_gc = 0;
        let live = self.live_objects();
        self.threshold = self
            .threshold
            .max(live.saturating_mul(self.growth_percent) / 100);

        tracing::debug!(before, after = live, "collection cycle");
    }

    fn table_has_finalizer(&self, t: Gc<Table>, gc_key: Value) -> bool {
        match self.tables.get(t.index).metatable {
            Some(mt) => !self.tables.get(mt.index).raw_get(gc_key).is_nil(),
            None => false,
        }
    }

    fn mark_value(&mut self, v: Value, gray: &mut Vec<Gray>) {
        let already = match v {
            Value::Str(h) => self.strings.mark(h.index),
            Value::Table(h) => self.tables.mark(h.index),
            Value::Closure(h) => self.closures.mark(h.index),
            Value::Thread(h) => self.threads.mark(h.index),
            _ => return,
        };
        if !already {
            gray.push(Gray::Val(v));
        }
    }

    fn mark_upvalue(&mut self, h: Gc<Upvalue>, gray: &mut Vec<Gray>) {
        if !self.upvalues.mark(h.index) {
            gray.push(Gray::Upv(h));
        }
    }

    fn drain_gray(&mut self, gray: &mut Vec<Gray>) {
        while let Some(item) = gray.pop() {
            match item {
                Gray::Val(Value::Table(h)) => {
                    let (entries, metatable) = self.tables.get(h.index).trace_parts();
                    for (k, v) in entries {
                        self.mark_value(k, gray);
                        self.mark_value(v, gray);
                    }
                    if let Some(mt) = metatable {
                        self.mark_value(Value::Table(mt), gray);
                    }
                }
                Gray::Val(Value::Closure(h)) => {
                    if let Closure::Lua(lc) = self.closures.get(h.index) {
                        let upvalues = lc.upvalues.clone();
                        for uv in upvalues {
                            self.mark_upvalue(uv, gray);
                        }
                    }
                }
                Gray::Val(Value::Thread(h)) => {
                    let th = self.threads.get(h.index);
                    let mut values: Vec<Value> = th.stack[..th.top].to_vec();
                    values.extend(th.yield_values.iter().copied());
                    let upvals: Vec<Gc<Upvalue>> = th.open_upvalues.clone();
                    let mut closures = Vec::new();
                    for frame in &th.frames {
                        if let Some(c) = frame.closure {
                            closures.push(c);
                        }
                    }
                    if let Some(c) = th.entry_closure {
                        closures.push(c);
                    }
                    let resumer = th.resumer;

                    for v in values {
                        self.mark_value(v, gray);
                    }
                    for uv in upvals {
                        self.mark_upvalue(uv, gray);
                    }
                    for c in closures {
                        self.mark_value(Value::Closure(c), gray);
                    }
                    if let Some(r) = resumer {
                        self.mark_value(Value::Thread(r), gray);
                    }
                }
                Gray::Val(_) => {}
                Gray::Upv(h) => match *self.upvalues.get(h.index) {
                    Upvalue::Closed(v) => self.mark_value(v, gray),
                    // The aliased slot is below the thread's top and gets
                    // marked with the thread; the thread itself must live
                    // for the alias to stay readable.
                    Upvalue::Open { thread, .. } => {
                        self.mark_value(Value::Thread(thread), gray)
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_returns_the_same_handle() {
        let mut heap = Heap::new(1024, 200);
        let a = heap.new_str(b"hello");
        let b = heap.new_str(b"hello");
        let c = heap.new_str(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.str_(a).as_bytes(), b"hello");
    }

    #[test]
    fn collect_frees_unreachable_and_keeps_rooted() {
        let mut heap = Heap::new(1024, 200);
        let keep = heap.new_table(0, 0);
        let drop_ = heap.new_table(0, 0);
        let key = heap.new_str(b"k");
        heap.table_mut(keep)
            .raw_set(Value::Str(key), Value::Integer(1))
            .unwrap();
        let _ = drop_;

        let live_before = heap.live_objects();
        heap.collect(&[Value::Table(keep)], Value::Nil);
        assert_eq!(heap.live_objects(), live_before - 1);
        assert_eq!(
            heap.table(keep).raw_get(Value::Str(key)),
            Value::Integer(1)
        );
    }

    #[test]
    fn dead_interned_strings_are_evicted() {
        let mut heap = Heap::new(1024, 200);
        let s = heap.new_str(b"transient");
        heap.collect(&[], Value::Nil);
        // A fresh intern after eviction gets a new slot, proving the map
        // entry did not outlive the object.
        let s2 = heap.new_str(b"transient");
        assert_eq!(heap.str_(s2).as_bytes(), b"transient");
        let _ = s;
    }
}
