//! The host-facing surface: loading, execution, globals, native
//! functions, and the coroutine shell.

use moon_asm::Fault;

use crate::bytecode::{self, Proto};
use crate::error::{CompileError, RuntimeError, VmError};
use crate::heap::Gc;
use crate::interpreter::{CallKind, Interpreter};
use crate::state::{LoopExit, Resume, ThreadStatus};
use crate::thread::Thread;
use crate::value::{Closure, LuaClosure, NativeClosure, Upvalue, Value};

/// The compiler seam. The runtime ships no parser; hosts install one.
pub trait Frontend {
    /// Compile source bytes into a prototype, or report a structured
    /// compile error.
    fn compile(&self, source: &[u8], chunk_name: &str) -> Result<Proto, CompileError>;
}

/// Arguments of a native invocation: the calling thread, the absolute
/// stack index of the callee slot, and the argument count. Arguments sit
/// at `func + 1 ..= func + nargs`; results go to `func..`.
#[derive(Debug, Clone, Copy)]
pub struct NativeCall {
    /// The calling thread.
    pub thread: Gc<Thread>,
    /// Absolute stack index of the callee slot.
    pub func: usize,
    /// Number of arguments.
    pub nargs: usize,
}

/// What a native function did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOutcome {
    /// `n` results are in place at the callee slot.
    Return(usize),
    /// Suspend the thread with `n` pending values at the callee slot.
    Yield(usize),
}

/// A host-implemented function.
pub type NativeFn = fn(&mut Interpreter, NativeCall) -> Result<NativeOutcome, RuntimeError>;

/// Ready-made yield native: passes its arguments out of the coroutine.
/// Register under any id and call it from Lua code to suspend.
pub fn yield_native(
    vm: &mut Interpreter,
    call: NativeCall,
) -> Result<NativeOutcome, RuntimeError> {
    let t = vm.heap_mut().thread_mut(call.thread);
    for i in 0..call.nargs {
        t.stack[call.func + i] = t.stack[call.func + 1 + i];
    }
    Ok(NativeOutcome::Yield(call.nargs))
}

impl Interpreter {
    pub(crate) fn heap_mut(&mut self) -> &mut crate::heap::Heap {
        &mut self.heap
    }

    /// Map a host function id to its implementation.
    pub fn register_native(&mut self, fn_id: u32, f: NativeFn) {
        self.natives.insert(fn_id, f);
    }

    /// A callable value for a registered native id.
    pub fn native_closure(&mut self, fn_id: u32) -> Value {
        let h = self.heap.new_closure(Closure::Native(NativeClosure { fn_id }));
        Value::Closure(h)
    }

    /// Install the compiler seam.
    pub fn set_frontend(&mut self, frontend: Box<dyn Frontend>) {
        self.frontend = Some(frontend);
    }

    /// Compile `source` through the installed front-end and close over it.
    pub fn load_source(
        &mut self,
        source: &[u8],
        chunk_name: &str,
    ) -> Result<Gc<Closure>, VmError> {
        let proto = match &self.frontend {
            Some(frontend) => frontend.compile(source, chunk_name)?,
            None => return Err(VmError::NoFrontend),
        };
        Ok(self.closure_from_proto(proto))
    }

    /// Load a binary bytecode image and close over its top-level proto.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<Gc<Closure>, VmError> {
        let proto = bytecode::load(bytes)?;
        Ok(self.closure_from_proto(proto))
    }

    /// Make a main-chunk closure: upvalue 0, when declared, is a closed
    /// `_ENV` cell holding the globals table. The closure is anchored so
    /// host handles survive collection.
    pub fn closure_from_proto(&mut self, proto: Proto) -> Gc<Closure> {
        self.heap.inhibit();
        let mut upvalues = Vec::with_capacity(proto.upvalues.len());
        for (i, _) in proto.upvalues.iter().enumerate() {
            let cell = if i == 0 {
                Upvalue::Closed(Value::Table(self.globals))
            } else {
                Upvalue::Closed(Value::Nil)
            };
            upvalues.push(self.heap.new_upvalue(cell));
        }
        let closure = self.heap.new_closure(Closure::Lua(LuaClosure {
            proto: std::rc::Rc::new(proto),
            upvalues,
        }));
        self.heap.allow();
        self.anchor(Value::Closure(closure));
        closure
    }

    /// Root a value for the rest of the runtime's life. Host-held handles
    /// are not otherwise visible to the collector.
    pub fn anchor(&mut self, v: Value) {
        self.host_anchors.push(v);
    }

    /// Run `closure(args...)`, collecting all results. Errors unwind any
    /// frames this call pushed and surface as [`VmError`].
    pub fn call(
        &mut self,
        closure: Gc<Closure>,
        args: &[Value],
    ) -> Result<Vec<Value>, VmError> {
        let th = self.main;
        let nargs = args.len();
        let func = self.heap.thread(th).top;
        if func + 1 + nargs > self.params.stack_size {
            return Err(self.runtime_to_vm(Fault::StackOverflow.into()));
        }
        {
            let t = self.heap.thread_mut(th);
            t.status = ThreadStatus::Running;
            t.stack[func] = Value::Closure(closure);
            for (i, &a) in args.iter().enumerate() {
                t.stack[func + 1 + i] = a;
            }
            t.top = func + 1 + nargs;
        }
        let floor = self.heap.thread(th).frames.len();

        let outcome = match self.call_value(th, func, nargs, -1, false) {
            Ok(CallKind::Pushed) => self.execute_frames(th, floor, false).map(|_| ()),
            Ok(CallKind::NativeDone) => Ok(()),
            Ok(CallKind::NativeYield) => {
                self.discard_pending_yield(th);
                Err(self.throw_str("attempt to yield from outside a coroutine"))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                let t = self.heap.thread_mut(th);
                let results = t.stack[func..t.top].to_vec();
                t.top = func;
                Ok(results)
            }
            Err(e) => {
                self.heap.thread_mut(th).top = func;
                Err(self.runtime_to_vm(e))
            }
        }
    }

    /// Read a named global (`_ENV[name]`, raw).
    pub fn global_get(&mut self, name: &str) -> Value {
        let key = Value::Str(self.heap.new_str(name.as_bytes()));
        self.heap.table(self.globals).raw_get(key)
    }

    /// Write a named global (`_ENV[name] = v`, raw).
    pub fn global_set(&mut self, name: &str, v: Value) {
        let key = Value::Str(self.heap.new_str(name.as_bytes()));
        self.heap
            .table_mut(self.globals)
            .raw_set(key, v)
            .expect("string keys are always valid");
    }

    /// Intern a string value.
    pub fn new_string(&mut self, bytes: impl AsRef<[u8]>) -> Value {
        Value::Str(self.heap.new_str(bytes.as_ref()))
    }

    /// Fresh empty table value.
    pub fn new_table_value(&mut self) -> Value {
        Value::Table(self.heap.new_table(0, 0))
    }

    /// Attach a metatable to a table value.
    pub fn set_metatable_value(&mut self, table: Value, mt: Value) {
        if let (Value::Table(t), Value::Table(m)) = (table, mt) {
            self.heap.table_mut(t).set_metatable(Some(m));
        }
    }

    /// Raw write into a table value; non-tables are ignored.
    pub fn table_raw_set(&mut self, table: Value, key: Value, v: Value) -> Result<(), Fault> {
        match table {
            Value::Table(t) => self.heap.table_mut(t).raw_set(key, v),
            _ => Ok(()),
        }
    }

    /// Raw read from a table value; non-tables read as nil.
    pub fn table_raw_get(&self, table: Value, key: Value) -> Value {
        match table {
            Value::Table(t) => self.heap.table(t).raw_get(key),
            _ => Value::Nil,
        }
    }

    /// The bytes of a string value, if it is one.
    pub fn str_value_bytes(&self, v: Value) -> Option<&[u8]> {
        match v {
            Value::Str(h) => Some(self.heap.str_(h).as_bytes()),
            _ => None,
        }
    }

    /// Argument `i` of a native call, nil-padded.
    pub fn native_arg(&self, call: NativeCall, i: usize) -> Value {
        if i < call.nargs {
            self.heap.thread(call.thread).stack[call.func + 1 + i]
        } else {
            Value::Nil
        }
    }

    /// Place `values` as the native call's results.
    pub fn native_return(&mut self, call: NativeCall, values: &[Value]) -> NativeOutcome {
        let t = self.heap.thread_mut(call.thread);
        for (i, &v) in values.iter().enumerate() {
            t.stack[call.func + i] = v;
        }
        NativeOutcome::Return(values.len())
    }

    /// Raise an arbitrary error value from a native function.
    pub fn throw(&mut self, v: Value) -> RuntimeError {
        RuntimeError::Value(v)
    }

    /// Raise a string error from a native function.
    pub fn throw_message(&mut self, msg: &str) -> RuntimeError {
        self.throw_str(msg)
    }

    /// Spawn a coroutine over `closure`, anchored like other host handles.
    pub fn new_coroutine(&mut self, closure: Gc<Closure>) -> Gc<Thread> {
        let mut t = Thread::new(self.params.stack_size);
        t.entry_closure = Some(closure);
        t.stack[0] = Value::Closure(closure);
        t.top = 1;
        let h = self.heap.new_thread(t);
        self.anchor(Value::Thread(h));
        h
    }

    /// Transfer control to a suspended coroutine.
    ///
    /// On first resume `args` become the entry closure's arguments; on
    /// later resumes they become the results of the pending yield.
    pub fn resume(&mut self, co: Gc<Thread>, args: &[Value]) -> Result<Resume, VmError> {
        let status = self.heap.thread(co).status();
        if co == self.main || status != ThreadStatus::Suspended {
            return Err(VmError::BadResume { status });
        }

        let main = self.main;
        let resumer = self.active.last().copied();
        if let Some(r) = resumer {
            self.heap.thread_mut(r).status = ThreadStatus::Normal;
        }
        {
            let t = self.heap.thread_mut(co);
            t.status = ThreadStatus::Running;
            t.resumer = resumer.or(Some(main));
        }
        self.active.push(co);
        tracing::debug!(target: "moon_vm::coroutine", co = co.index(), "resume");

        let outcome = self.resume_inner(co, args);

        self.active.pop();
        if let Some(r) = resumer {
            self.heap.thread_mut(r).status = ThreadStatus::Running;
        }

        match outcome {
            Ok(LoopExit::Returned) => {
                let t = self.heap.thread_mut(co);
                t.status = ThreadStatus::Dead;
                let results = t.stack[..t.top].to_vec();
                t.top = 0;
                Ok(Resume::Done(results))
            }
            Ok(LoopExit::Yielded) => {
                let t = self.heap.thread_mut(co);
                t.status = ThreadStatus::Suspended;
                let values = std::mem::take(&mut t.yield_values);
                tracing::debug!(target: "moon_vm::coroutine", co = co.index(), "yield");
                Ok(Resume::Yield(values))
            }
            Err(e) => {
                self.heap.thread_mut(co).status = ThreadStatus::Dead;
                Err(self.runtime_to_vm(e))
            }
        }
    }

    fn resume_inner(
        &mut self,
        co: Gc<Thread>,
        args: &[Value],
    ) -> Result<LoopExit, RuntimeError> {
        let first_resume = {
            let t = self.heap.thread(co);
            t.frames.is_empty() && t.yield_state.is_none()
        };

        if first_resume {
            let nargs = args.len();
            if 1 + nargs > self.params.stack_size {
                return Err(Fault::StackOverflow.into());
            }
            {
                let t = self.heap.thread_mut(co);
                for (i, &a) in args.iter().enumerate() {
                    t.stack[1 + i] = a;
                }
                t.top = 1 + nargs;
            }
            match self.call_value(co, 0, nargs, -1, false)? {
                CallKind::Pushed => self.execute_frames(co, 0, true),
                CallKind::NativeDone => Ok(LoopExit::Returned),
                CallKind::NativeYield => Ok(LoopExit::Yielded),
            }
        } else {
            let ys = self
                .heap
                .thread_mut(co)
                .yield_state
                .take()
                .expect("suspended thread without yield state");
            let count = args.len();
            if ys.ret_base + count > self.params.stack_size {
                return Err(Fault::StackOverflow.into());
            }
            {
                let t = self.heap.thread_mut(co);
                for (i, &a) in args.iter().enumerate() {
                    t.stack[ys.ret_base + i] = a;
                }
                if ys.nresults >= 0 {
                    for i in count..(ys.nresults as usize) {
                        t.stack[ys.ret_base + i] = Value::Nil;
                    }
                    t.top = match t.frames.last() {
                        Some(f) => f.base + f.proto.maxstacksize as usize,
                        None => ys.ret_base + ys.nresults as usize,
                    };
                } else {
                    t.top = ys.ret_base + count;
                }
            }
            self.execute_frames(co, 0, true)
        }
    }

    pub(crate) fn runtime_to_vm(&mut self, e: RuntimeError) -> VmError {
        let (source_name, line) = match self.last_location.take() {
            Some((s, l)) => (s, Some(l)),
            None => (None, None),
        };
        match e {
            RuntimeError::Fault(fault) => VmError::Fault {
                fault,
                line,
                source_name,
            },
            RuntimeError::Value(value) => VmError::Error {
                value,
                rendered: self.display_value(value),
                line,
                source_name,
            },
        }
    }
}
