//! Call and return plumbing: frame push/pop discipline, result placement,
//! tailcall frame reuse, TBC closing, and protected-frame unwinding.

use moon_asm::Fault;

use crate::call::{CallInfo, FrameFlags, TbcSet};
use crate::error::RuntimeError;
use crate::heap::Gc;
use crate::host::{NativeCall, NativeOutcome};
use crate::interpreter::Interpreter;
use crate::meta::MetaEvent;
use crate::state::ExecuteState;
use crate::thread::{close_from, Thread, YieldState};
use crate::value::{Closure, Value};

/// How a call dispatch resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// A bytecode frame was pushed; the dispatch loop continues into it.
    Pushed,
    /// A native ran to completion; results are already placed.
    NativeDone,
    /// A native suspended the thread.
    NativeYield,
}

impl Interpreter {
    /// Call `stack[func]` with `nargs` arguments expecting `nresults`
    /// (`-1` = all). Non-callables fall back through `__call`.
    pub(crate) fn call_value(
        &mut self,
        th: Gc<Thread>,
        func: usize,
        nargs: usize,
        nresults: i32,
        protected: bool,
    ) -> Result<CallKind, RuntimeError> {
        let mut func = func;
        let mut nargs = nargs;
        for _ in 0..self.params.meta_chain_depth {
            let callee = self.heap.thread(th).stack[func];
            let handle = match callee {
                Value::Closure(h) => h,
                other => {
                    let Some(mm) = self.metamethod(other, MetaEvent::Call) else {
                        return Err(Fault::NotAFunction.into());
                    };
                    // The callable value becomes the first argument.
                    if func + 2 + nargs > self.params.stack_size {
                        return Err(Fault::StackOverflow.into());
                    }
                    let t = self.heap.thread_mut(th);
                    for i in ((func + 1)..=(func + 1 + nargs)).rev() {
                        t.stack[i] = t.stack[i - 1];
                    }
                    t.stack[func] = mm;
                    nargs += 1;
                    t.top = t.top.max(func + 1 + nargs);
                    continue;
                }
            };

            if self.heap.thread(th).frames.len() >= self.params.max_call_depth {
                return Err(Fault::CallStackOverflow.into());
            }

            match self.heap.closure(handle).clone() {
                Closure::Lua(lc) => {
                    let base = func + 1;
                    let maxstack = lc.proto.maxstacksize as usize;
                    if base + maxstack.max(nargs) > self.params.stack_size {
                        return Err(Fault::StackOverflow.into());
                    }
                    let mut flags = FrameFlags::empty();
                    if protected {
                        flags |= FrameFlags::PROTECTED;
                    }
                    let mut frame =
                        CallInfo::new(Some(handle), lc.proto, base, func, nresults, flags);
                    // Stash the raw argument count; VARARGPREP turns it
                    // into the vararg range.
                    frame.vararg_base = base;
                    frame.vararg_count = nargs;

                    let t = self.heap.thread_mut(th);
                    for slot in &mut t.stack[(base + nargs.min(maxstack))..(base + maxstack)] {
                        *slot = Value::Nil;
                    }
                    t.top = base + maxstack;
                    t.frames.push(frame);
                    tracing::debug!(
                        target: "moon_vm::flow",
                        depth = t.frames.len(),
                        base,
                        "frame push"
                    );
                    return Ok(CallKind::Pushed);
                }
                Closure::Native(nc) => {
                    let Some(&native) = self.natives.get(&nc.fn_id) else {
                        return Err(self.throw_str(&format!(
                            "native function {} is not registered",
                            nc.fn_id
                        )));
                    };
                    let call = NativeCall {
                        thread: th,
                        func,
                        nargs,
                    };
                    match native(self, call)? {
                        NativeOutcome::Return(n) => {
                            self.place_native_results(th, func, n, nresults);
                            return Ok(CallKind::NativeDone);
                        }
                        NativeOutcome::Yield(n) => {
                            let t = self.heap.thread_mut(th);
                            t.yield_values = t.stack[func..func + n].to_vec();
                            t.yield_state = Some(YieldState {
                                ret_base: func,
                                nresults,
                            });
                            if let Some(frame) = t.frames.last_mut() {
                                frame.saved_pc = frame.pc;
                            }
                            return Ok(CallKind::NativeYield);
                        }
                    }
                }
            }
        }
        Err(Fault::NotAFunction.into())
    }

    /// Native results sit at `ret_base..ret_base + produced`; pad or mark
    /// the multivalue run per `wanted`.
    fn place_native_results(
        &mut self,
        th: Gc<Thread>,
        ret_base: usize,
        produced: usize,
        wanted: i32,
    ) {
        let t = self.heap.thread_mut(th);
        if wanted < 0 {
            t.top = ret_base + produced;
        } else {
            for i in produced..(wanted as usize) {
                t.stack[ret_base + i] = Value::Nil;
            }
            t.top = match t.frames.last() {
                Some(f) => f.base + f.proto.maxstacksize as usize,
                None => ret_base + wanted as usize,
            };
        }
    }

    /// Return from the current frame with `count` results starting at the
    /// absolute index `first`: close upvalues and TBC slots, place the
    /// results at `ret_base`, and pop.
    pub(crate) fn finish_return(
        &mut self,
        th: Gc<Thread>,
        first: usize,
        count: usize,
    ) -> Result<(), RuntimeError> {
        self.close_tbc_from(th, 0, None)?;
        let base = self
            .heap
            .thread(th)
            .frames
            .last()
            .expect("return without a frame")
            .base;
        close_from(&mut self.heap, th, base);

        let frame = self
            .heap
            .thread_mut(th)
            .frames
            .pop()
            .expect("return without a frame");
        let wanted = frame.nresults;

        let t = self.heap.thread_mut(th);
        for i in 0..count {
            t.stack[frame.ret_base + i] = t.stack[first + i];
        }
        if wanted >= 0 {
            for i in count..(wanted as usize) {
                t.stack[frame.ret_base + i] = Value::Nil;
            }
        }
        if frame.is_protected() && frame.ret_base > 0 {
            t.stack[frame.ret_base - 1] = Value::Boolean(true);
        }
        t.top = if wanted < 0 {
            frame.ret_base + count
        } else {
            match t.frames.last() {
                Some(f) => f.base + f.proto.maxstacksize as usize,
                None => frame.ret_base + wanted as usize,
            }
        };
        tracing::debug!(
            target: "moon_vm::flow",
            depth = t.frames.len(),
            results = count,
            "frame pop"
        );
        Ok(())
    }

    /// `TAILCALL`: close the current window, slide the callee and its
    /// arguments down, and reuse the frame.
    pub(crate) fn tailcall(
        &mut self,
        th: Gc<Thread>,
        a: usize,
        b: usize,
    ) -> Result<ExecuteState, RuntimeError> {
        let (base, mut func, mut nargs) = {
            let t = self.heap.thread(th);
            let frame = t.frames.last().expect("tailcall without a frame");
            let func = frame.base + a;
            let nargs = if b == 0 {
                t.top.saturating_sub(func + 1)
            } else {
                b - 1
            };
            (frame.base, func, nargs)
        };
        self.close_tbc_from(th, 0, None)?;
        close_from(&mut self.heap, th, base);

        for _ in 0..self.params.meta_chain_depth {
            let callee = self.heap.thread(th).stack[func];
            let handle = match callee {
                Value::Closure(h) => h,
                other => {
                    let Some(mm) = self.metamethod(other, MetaEvent::Call) else {
                        return Err(Fault::NotAFunction.into());
                    };
                    if func + 2 + nargs > self.params.stack_size {
                        return Err(Fault::StackOverflow.into());
                    }
                    let t = self.heap.thread_mut(th);
                    for i in ((func + 1)..=(func + 1 + nargs)).rev() {
                        t.stack[i] = t.stack[i - 1];
                    }
                    t.stack[func] = mm;
                    nargs += 1;
                    continue;
                }
            };

            match self.heap.closure(handle).clone() {
                Closure::Lua(lc) => {
                    let ret_base = self
                        .heap
                        .thread(th)
                        .frames
                        .last()
                        .expect("tailcall without a frame")
                        .ret_base;
                    let new_base = ret_base + 1;
                    let maxstack = lc.proto.maxstacksize as usize;
                    if new_base + maxstack.max(nargs) > self.params.stack_size {
                        return Err(Fault::StackOverflow.into());
                    }

                    let t = self.heap.thread_mut(th);
                    for i in 0..=nargs {
                        t.stack[ret_base + i] = t.stack[func + i];
                    }
                    for slot in
                        &mut t.stack[(new_base + nargs.min(maxstack))..(new_base + maxstack)]
                    {
                        *slot = Value::Nil;
                    }
                    t.top = new_base + maxstack;

                    let frame = t.frames.last_mut().expect("tailcall without a frame");
                    frame.closure = Some(handle);
                    frame.proto = lc.proto;
                    frame.pc = 0;
                    frame.base = new_base;
                    frame.vararg_base = new_base;
                    frame.vararg_count = nargs;
                    frame.flags |= FrameFlags::TAILCALLED;
                    frame.tbc = TbcSet::new();
                    return Ok(ExecuteState::Proceed);
                }
                Closure::Native(nc) => {
                    let Some(&native) = self.natives.get(&nc.fn_id) else {
                        return Err(self.throw_str(&format!(
                            "native function {} is not registered",
                            nc.fn_id
                        )));
                    };
                    let call = NativeCall {
                        thread: th,
                        func,
                        nargs,
                    };
                    match native(self, call)? {
                        NativeOutcome::Return(n) => {
                            self.finish_return(th, func, n)?;
                            return Ok(ExecuteState::Returned);
                        }
                        NativeOutcome::Yield(n) => {
                            let t = self.heap.thread_mut(th);
                            t.yield_values = t.stack[func..func + n].to_vec();
                            let frame =
                                t.frames.pop().expect("tailcall without a frame");
                            t.yield_state = Some(YieldState {
                                ret_base: frame.ret_base,
                                nresults: frame.nresults,
                            });
                            return Ok(ExecuteState::Yielded);
                        }
                    }
                }
            }
        }
        Err(Fault::NotAFunction.into())
    }

    /// Invoke `__close` for the current frame's marked registers at or
    /// above `from`, in LIFO order. `err` is the in-flight error value
    /// when closing due to unwinding.
    pub(crate) fn close_tbc_from(
        &mut self,
        th: Gc<Thread>,
        from: usize,
        err: Option<Value>,
    ) -> Result<(), RuntimeError> {
        loop {
            let (idx, base) = {
                let t = self.heap.thread(th);
                let Some(frame) = t.frames.last() else {
                    return Ok(());
                };
                match frame.tbc.highest_at_or_above(from) {
                    Some(idx) => (idx, frame.base),
                    None => return Ok(()),
                }
            };
            // Unmark first so a failing `__close` cannot re-run.
            self.heap
                .thread_mut(th)
                .frames
                .last_mut()
                .expect("frame checked above")
                .tbc
                .clear(idx);
            let value = self.reg(th, base, idx);
            if !value.truthy() {
                continue;
            }
            let Some(mm) = self.metamethod(value, MetaEvent::Close) else {
                continue;
            };
            let args = [value, err.unwrap_or(Value::Nil)];
            self.call_meta(th, mm, &args, 0)?;
        }
    }

    /// Pop frames above `floor`, honoring `__close`, until a protected
    /// frame absorbs the error. Returns `Err` if none does.
    pub(crate) fn unwind(
        &mut self,
        th: Gc<Thread>,
        floor: usize,
        err: RuntimeError,
    ) -> Result<(), RuntimeError> {
        let mut err = err;
        loop {
            // Root the thrown value: `__close` handlers below may allocate
            // enough to trigger a collection.
            self.pending_error = match &err {
                RuntimeError::Value(v) => Some(*v),
                RuntimeError::Fault(_) => None,
            };
            if self.heap.thread(th).frames.len() <= floor {
                return Err(err);
            }

            // Close this frame's TBC slots; a failing `__close`
            // supersedes the in-flight error and closing continues.
            loop {
                let err_value = self.error_value(&err);
                match self.close_tbc_from(th, 0, Some(err_value)) {
                    Ok(()) => break,
                    Err(superseding) => {
                        tracing::warn!(
                            target: "moon_vm::flow",
                            "error superseded during __close unwinding"
                        );
                        err = superseding;
                    }
                }
            }

            let base = self
                .heap
                .thread(th)
                .frames
                .last()
                .expect("floor checked above")
                .base;
            close_from(&mut self.heap, th, base);

            let frame = self
                .heap
                .thread_mut(th)
                .frames
                .pop()
                .expect("floor checked above");
            if !frame.is_protected() {
                continue;
            }

            // The protected caller resumes with the failure pair.
            self.pending_error = None;
            let err_value = self.error_value(&err);
            let wanted = frame.nresults;
            let t = self.heap.thread_mut(th);
            if frame.ret_base > 0 {
                t.stack[frame.ret_base - 1] = Value::Boolean(false);
            }
            t.stack[frame.ret_base] = err_value;
            if wanted >= 0 {
                for i in 1..(wanted as usize) {
                    t.stack[frame.ret_base + i] = Value::Nil;
                }
            }
            t.top = if wanted < 0 {
                frame.ret_base + 1
            } else {
                match t.frames.last() {
                    Some(f) => f.base + f.proto.maxstacksize as usize,
                    None => frame.ret_base + wanted as usize,
                }
            };
            tracing::debug!(target: "moon_vm::flow", "error absorbed by protected frame");
            return Ok(());
        }
    }
}
