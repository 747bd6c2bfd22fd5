//! Register, constant, and metamethod-call plumbing shared by the
//! dispatch loop.

use std::rc::Rc;

use moon_asm::Fault;

use crate::bytecode::{Constant, Proto};
use crate::error::RuntimeError;
use crate::heap::Gc;
use crate::interpreter::{CallKind, Interpreter};
use crate::state::LoopExit;
use crate::thread::Thread;
use crate::value::Value;

impl Interpreter {
    /// `R[i]` of the given frame window.
    pub(crate) fn reg(&self, th: Gc<Thread>, base: usize, i: usize) -> Value {
        self.heap.thread(th).stack[base + i]
    }

    pub(crate) fn set_reg(&mut self, th: Gc<Thread>, base: usize, i: usize, v: Value) {
        self.heap.thread_mut(th).stack[base + i] = v;
    }

    /// Materialize constant `i`, interning string payloads.
    pub(crate) fn k_value(
        &mut self,
        proto: &Rc<Proto>,
        i: usize,
    ) -> Result<Value, RuntimeError> {
        let k = proto.k.get(i).ok_or(Fault::PcOutOfRange)?;
        Ok(match k {
            Constant::Nil => Value::Nil,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Integer(n) => Value::Integer(*n),
            Constant::Float(f) => Value::Float(*f),
            Constant::Str(bytes) => Value::Str(self.heap.new_str(bytes)),
        })
    }

    /// Intern `msg` and wrap it as a thrown error value.
    pub(crate) fn throw_str(&mut self, msg: &str) -> RuntimeError {
        RuntimeError::Value(Value::Str(self.heap.new_str(msg.as_bytes())))
    }

    /// Relative jump on the current frame; the pc has already advanced
    /// past the jumping instruction.
    pub(crate) fn jump(&mut self, th: Gc<Thread>, delta: i64) -> Result<(), RuntimeError> {
        let t = self.heap.thread_mut(th);
        let frame = t.frames.last_mut().expect("jump without a frame");
        let len = frame.proto.code.len() as i64;
        let target = frame.pc as i64 + delta;
        if target < 0 || target >= len {
            return Err(Fault::PcOutOfRange.into());
        }
        frame.pc = target as usize;
        Ok(())
    }

    /// Skip the next instruction of the current frame.
    pub(crate) fn skip(&mut self, th: Gc<Thread>) {
        let t = self.heap.thread_mut(th);
        let frame = t.frames.last_mut().expect("skip without a frame");
        frame.pc += 1;
    }

    /// Call `f(args...)` re-entrantly and hand back the first result.
    ///
    /// Arguments stage above the live window; the scratch region is
    /// released once the result is read.
    pub(crate) fn call_meta(
        &mut self,
        th: Gc<Thread>,
        f: Value,
        args: &[Value],
        nresults: i32,
    ) -> Result<Value, RuntimeError> {
        let func = self.heap.thread(th).top;
        let needed = func + 1 + args.len();
        if needed > self.params.stack_size {
            return Err(Fault::StackOverflow.into());
        }
        {
            let t = self.heap.thread_mut(th);
            t.stack[func] = f;
            for (i, &a) in args.iter().enumerate() {
                t.stack[func + 1 + i] = a;
            }
            t.top = needed;
        }
        self.call_and_wait(th, func, args.len(), nresults)?;
        let result = if nresults == 0 {
            Value::Nil
        } else {
            self.heap.thread(th).stack[func]
        };
        self.heap.thread_mut(th).top = func;
        Ok(result)
    }

    /// Dispatch a call and, for bytecode callees, run the loop until the
    /// callee's span returns. Yields cannot cross this boundary.
    pub(crate) fn call_and_wait(
        &mut self,
        th: Gc<Thread>,
        func: usize,
        nargs: usize,
        nresults: i32,
    ) -> Result<(), RuntimeError> {
        let floor = self.heap.thread(th).frames.len();
        match self.call_value(th, func, nargs, nresults, false)? {
            CallKind::NativeDone => Ok(()),
            CallKind::NativeYield => {
                self.discard_pending_yield(th);
                Err(self.throw_str("attempt to yield across a native-call boundary"))
            }
            CallKind::Pushed => match self.execute_frames(th, floor, false)? {
                LoopExit::Returned => Ok(()),
                LoopExit::Yielded => {
                    self.discard_pending_yield(th);
                    Err(self.throw_str("attempt to yield across a native-call boundary"))
                }
            },
        }
    }

    pub(crate) fn discard_pending_yield(&mut self, th: Gc<Thread>) {
        let t = self.heap.thread_mut(th);
        t.yield_state = None;
        t.yield_values.clear();
    }

    /// Remember where an error was raised, for host-facing reports.
    pub(crate) fn record_location(&mut self, th: Gc<Thread>) {
        let t = self.heap.thread(th);
        let Some(frame) = t.frames.last() else {
            return;
        };
        let pc = frame.pc.saturating_sub(1);
        if let Some(line) = frame.proto.line_at(pc) {
            self.last_location = Some((frame.proto.source.clone(), line));
        }
    }

    /// Render a value for diagnostics and host display.
    pub fn display_value(&self, v: Value) -> String {
        match v {
            Value::Nil => "nil".into(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => format_float(f),
            Value::Str(h) => String::from_utf8_lossy(self.heap.str_(h).as_bytes()).into_owned(),
            Value::Table(h) => format!("table: {:#x}", h.index()),
            Value::Closure(h) => format!("function: {:#x}", h.index()),
            Value::Thread(h) => format!("thread: {:#x}", h.index()),
        }
    }

    /// The error value delivered to protected frames and hosts.
    pub(crate) fn error_value(&mut self, err: &RuntimeError) -> Value {
        match err {
            RuntimeError::Value(v) => *v,
            RuntimeError::Fault(fault) => {
                let msg = match self.last_location.clone() {
                    Some((Some(source), line)) => {
                        format!("{source}:{line}: {fault}")
                    }
                    Some((None, line)) => format!("?:{line}: {fault}"),
                    None => fault.to_string(),
                };
                Value::Str(self.heap.new_str(msg.as_bytes()))
            }
        }
    }
}

/// Floats display with a decimal point or exponent, like `%.14g` keeps
/// integers and floats visually distinct.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".into()
    } else if f.is_infinite() {
        if f < 0.0 {
            "-inf".into()
        } else {
            "inf".into()
        }
    } else if f == f.trunc() && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}
