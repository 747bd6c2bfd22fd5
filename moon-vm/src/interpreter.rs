//! The interpreter: runtime construction and shared machinery.
//!
//! Submodules carry the execution engine: `alu` (numeric semantics),
//! `internal` (register/constant plumbing and metamethod calls),
//! `table_ops` (indexing, comparison, length, concatenation), `flow`
//! (calls, returns, unwinding), and `executors` (the dispatch loop).

use hashbrown::HashMap;

use crate::consts::{
    DEFAULT_GC_GROWTH_PERCENT, DEFAULT_GC_THRESHOLD, DEFAULT_MAX_CALL_DEPTH,
    DEFAULT_META_CHAIN_DEPTH, DEFAULT_STACK_SIZE,
};
use crate::error::RuntimeError;
use crate::heap::{Gc, Heap};
use crate::host::{Frontend, NativeFn};
use crate::meta::{MetaEvent, MetaTags};
use crate::table::Table;
use crate::thread::Thread;
use crate::value::Value;

mod alu;
mod executors;
mod flow;
mod internal;
mod table_ops;

pub(crate) use flow::CallKind;

/// Interpreter parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmParams {
    /// Value-stack slots per thread.
    pub stack_size: usize,
    /// Maximum CallInfo nesting depth.
    pub max_call_depth: usize,
    /// `__index`/`__newindex` chain limit.
    pub meta_chain_depth: usize,
    /// Allocation count that triggers a collection cycle.
    pub gc_threshold: usize,
    /// Post-cycle threshold growth, in percent of surviving objects.
    pub gc_growth_percent: usize,
}

impl Default for VmParams {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            meta_chain_depth: DEFAULT_META_CHAIN_DEPTH,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            gc_growth_percent: DEFAULT_GC_GROWTH_PERCENT,
        }
    }
}

/// Host hook invoked every `period` instructions; an error aborts
/// execution through the normal unwinding path.
pub type HookFn = fn(&mut Interpreter, Gc<Thread>) -> Result<(), RuntimeError>;

/// The runtime instance: heap, globals, registry, main thread, native
/// registry, and the front-end seam.
pub struct Interpreter {
    pub(crate) heap: Heap,
    pub(crate) globals: Gc<Table>,
    pub(crate) registry: Gc<Table>,
    pub(crate) main: Gc<Thread>,
    pub(crate) natives: HashMap<u32, NativeFn>,
    pub(crate) frontend: Option<Box<dyn Frontend>>,
    pub(crate) tags: MetaTags,
    pub(crate) params: VmParams,
    pub(crate) hook: Option<(u32, HookFn)>,
    pub(crate) hook_countdown: u32,
    /// Whether a yield may suspend the innermost dispatch loop.
    pub(crate) yieldable: bool,
    /// Threads in the resume chain; last is the running one.
    pub(crate) active: Vec<Gc<Thread>>,
    /// Values rooted on behalf of the host (loaded closures, coroutines).
    pub(crate) host_anchors: Vec<Value>,
    /// The in-flight thrown error value, rooted while unwinding runs
    /// `__close` handlers that could otherwise collect it.
    pub(crate) pending_error: Option<Value>,
    /// Location of the most recently raised error.
    pub(crate) last_location: Option<(Option<String>, u32)>,
}

impl Interpreter {
    /// Fresh runtime with the given parameters.
    pub fn new(params: VmParams) -> Self {
        let mut heap = Heap::new(params.gc_threshold, params.gc_growth_percent);
        let tags = MetaTags::intern_all(&mut heap);
        let globals = heap.new_table(0, 32);
        let registry = heap.new_table(0, 8);
        let main = heap.new_thread(Thread::new(params.stack_size));
        Self {
            heap,
            globals,
            registry,
            main,
            natives: HashMap::new(),
            frontend: None,
            tags,
            params,
            hook: None,
            hook_countdown: 0,
            yieldable: false,
            active: Vec::new(),
            host_anchors: Vec::new(),
            pending_error: None,
            last_location: None,
        }
    }

    /// The configured parameters.
    pub fn params(&self) -> &VmParams {
        &self.params
    }

    /// Read-only heap access, for hosts inspecting returned values.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The main thread.
    pub fn main_thread(&self) -> Gc<Thread> {
        self.main
    }

    /// The globals table.
    pub fn globals_table(&self) -> Gc<Table> {
        self.globals
    }

    /// The host-reserved registry table.
    pub fn registry_table(&self) -> Gc<Table> {
        self.registry
    }

    /// Install an instruction hook fired every `period` instructions.
    pub fn set_hook(&mut self, period: u32, hook: HookFn) {
        self.hook = Some((period.max(1), hook));
        self.hook_countdown = period.max(1);
    }

    /// Remove the instruction hook.
    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    /// Run a full collection cycle now.
    pub fn collect_garbage(&mut self) {
        let mut roots: Vec<Value> = vec![
            Value::Table(self.globals),
            Value::Table(self.registry),
            Value::Thread(self.main),
        ];
        roots.extend(self.active.iter().map(|&t| Value::Thread(t)));
        roots.extend(self.host_anchors.iter().copied());
        roots.extend(self.pending_error);
        roots.extend(self.tags.roots());
        let gc_key = self.tags.key(MetaEvent::Gc);
        self.heap.collect(&roots, gc_key);
    }

    /// Drain the finalizer queue now, invoking each pending `__gc` on the
    /// main thread. The dispatch loop otherwise drains one per safe point.
    pub fn run_pending_finalizers(&mut self) {
        while let Some(target) = self.heap.next_finalizer() {
            let th = self.main;
            self.run_finalizer(th, target);
        }
    }

    /// The metatable of a value; only tables carry one.
    pub fn metatable_of(&self, v: Value) -> Option<Gc<Table>> {
        match v {
            Value::Table(t) => self.heap.table(t).metatable(),
            _ => None,
        }
    }

    /// Look up the metamethod for `ev` on `v`'s metatable.
    pub(crate) fn metamethod(&self, v: Value, ev: MetaEvent) -> Option<Value> {
        let mt = self.metatable_of(v)?;
        let found = self.heap.table(mt).raw_get(self.tags.key(ev));
        (!found.is_nil()).then_some(found)
    }
}
