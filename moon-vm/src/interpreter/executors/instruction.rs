//! Fetch/decode/dispatch for the full opcode set.

use std::rc::Rc;

use moon_asm::{Fault, Opcode};

use crate::bytecode::Proto;
use crate::error::RuntimeError;
use crate::heap::Gc;
use crate::interpreter::alu::{self, ArithOp};
use crate::interpreter::{CallKind, Interpreter};
use crate::meta::MetaEvent;
use crate::state::ExecuteState;
use crate::thread::{self, close_from, Thread};
use crate::value::{Closure, LuaClosure, Upvalue, Value};

impl Interpreter {
    /// Execute one instruction of `th`'s innermost frame.
    pub(crate) fn step(&mut self, th: Gc<Thread>) -> Result<ExecuteState, RuntimeError> {
        let (proto, base, pc) = {
            let t = self.heap.thread(th);
            let frame = t.frames.last().expect("dispatch without a frame");
            (frame.proto.clone(), frame.base, frame.pc)
        };
        if pc >= proto.code.len() {
            return Err(Fault::PcOutOfRange.into());
        }
        let inst = proto.code[pc];
        {
            let t = self.heap.thread_mut(th);
            let frame = t.frames.last_mut().expect("dispatch without a frame");
            frame.pc = pc + 1;
        }
        let op = inst.opcode().ok_or(Fault::PcOutOfRange)?;
        tracing::trace!(target: "moon_vm::dispatch", pc, %inst);

        let a = inst.a() as usize;
        match op {
            Opcode::MOVE => {
                let v = self.reg(th, base, inst.b() as usize);
                self.set_reg(th, base, a, v);
            }
            Opcode::LOADI => {
                self.set_reg(th, base, a, Value::Integer(inst.sbx() as i64));
            }
            Opcode::LOADF => {
                self.set_reg(th, base, a, Value::Float(inst.sbx() as f64));
            }
            Opcode::LOADK => {
                let v = self.k_value(&proto, inst.bx() as usize)?;
                self.set_reg(th, base, a, v);
            }
            Opcode::LOADKX => {
                let ax = self.fetch_extraarg(th, &proto)?;
                let v = self.k_value(&proto, ax as usize)?;
                self.set_reg(th, base, a, v);
            }
            Opcode::LOADFALSE => {
                self.set_reg(th, base, a, Value::Boolean(false));
            }
            Opcode::LFALSESKIP => {
                self.set_reg(th, base, a, Value::Boolean(false));
                self.skip(th);
            }
            Opcode::LOADTRUE => {
                self.set_reg(th, base, a, Value::Boolean(true));
            }
            Opcode::LOADNIL => {
                for i in a..=(a + inst.b() as usize) {
                    self.set_reg(th, base, i, Value::Nil);
                }
            }

            Opcode::GETUPVAL => {
                let uv = self.upvalue_handle(th, inst.b() as usize)?;
                let v = thread::upvalue_get(&self.heap, uv);
                self.set_reg(th, base, a, v);
            }
            Opcode::SETUPVAL => {
                let uv = self.upvalue_handle(th, inst.b() as usize)?;
                let v = self.reg(th, base, a);
                thread::upvalue_set(&mut self.heap, uv, v);
            }
            Opcode::GETTABUP => {
                let uv = self.upvalue_handle(th, inst.b() as usize)?;
                let obj = thread::upvalue_get(&self.heap, uv);
                let key = self.k_value(&proto, inst.c() as usize)?;
                let v = self.table_get(th, obj, key)?;
                self.set_reg(th, base, a, v);
            }
            Opcode::SETTABUP => {
                let uv = self.upvalue_handle(th, a)?;
                let obj = thread::upvalue_get(&self.heap, uv);
                let key = self.k_value(&proto, inst.b() as usize)?;
                let v = self.rk(th, base, &proto, inst.c() as usize, inst.k())?;
                self.table_set(th, obj, key, v)?;
            }

            Opcode::GETTABLE => {
                let obj = self.reg(th, base, inst.b() as usize);
                let key = self.reg(th, base, inst.c() as usize);
                let v = self.table_get(th, obj, key)?;
                self.set_reg(th, base, a, v);
            }
            Opcode::GETI => {
                let obj = self.reg(th, base, inst.b() as usize);
                let key = Value::Integer(inst.c() as i64);
                let v = self.table_get(th, obj, key)?;
                self.set_reg(th, base, a, v);
            }
            Opcode::GETFIELD => {
                let obj = self.reg(th, base, inst.b() as usize);
                let key = self.k_value(&proto, inst.c() as usize)?;
                let v = self.table_get(th, obj, key)?;
                self.set_reg(th, base, a, v);
            }
            Opcode::SETTABLE => {
                let obj = self.reg(th, base, a);
                let key = self.reg(th, base, inst.b() as usize);
                let v = self.rk(th, base, &proto, inst.c() as usize, inst.k())?;
                self.table_set(th, obj, key, v)?;
            }
            Opcode::SETI => {
                let obj = self.reg(th, base, a);
                let key = Value::Integer(inst.b() as i64);
                let v = self.rk(th, base, &proto, inst.c() as usize, inst.k())?;
                self.table_set(th, obj, key, v)?;
            }
            Opcode::SETFIELD => {
                let obj = self.reg(th, base, a);
                let key = self.k_value(&proto, inst.b() as usize)?;
                let v = self.rk(th, base, &proto, inst.c() as usize, inst.k())?;
                self.table_set(th, obj, key, v)?;
            }
            Opcode::NEWTABLE => {
                let t = self
                    .heap
                    .new_table(inst.b() as usize, inst.c() as usize);
                self.set_reg(th, base, a, Value::Table(t));
            }
            Opcode::SELF => {
                let obj = self.reg(th, base, inst.b() as usize);
                let key = self.rk(th, base, &proto, inst.c() as usize, inst.k())?;
                self.set_reg(th, base, a + 1, obj);
                let v = self.table_get(th, obj, key)?;
                self.set_reg(th, base, a, v);
            }

            Opcode::ADDI | Opcode::SHLI | Opcode::SHRI => {
                let l = self.reg(th, base, inst.b() as usize);
                let r = Value::Integer(inst.sc() as i64);
                let op2 = match op {
                    Opcode::ADDI => ArithOp::Add,
                    Opcode::SHLI => ArithOp::Shl,
                    _ => ArithOp::Shr,
                };
                self.exec_arith(th, base, a, l, r, op2)?;
            }
            Opcode::ADDK
            | Opcode::SUBK
            | Opcode::MULK
            | Opcode::MODK
            | Opcode::POWK
            | Opcode::DIVK
            | Opcode::IDIVK
            | Opcode::BANDK
            | Opcode::BORK
            | Opcode::BXORK => {
                let l = self.reg(th, base, inst.b() as usize);
                let r = self.k_value(&proto, inst.c() as usize)?;
                self.exec_arith(th, base, a, l, r, arith_op_of(op))?;
            }
            Opcode::ADD
            | Opcode::SUB
            | Opcode::MUL
            | Opcode::MOD
            | Opcode::POW
            | Opcode::DIV
            | Opcode::IDIV
            | Opcode::BAND
            | Opcode::BOR
            | Opcode::BXOR
            | Opcode::SHL
            | Opcode::SHR => {
                let l = self.reg(th, base, inst.b() as usize);
                let r = self.reg(th, base, inst.c() as usize);
                self.exec_arith(th, base, a, l, r, arith_op_of(op))?;
            }

            Opcode::MMBIN => {
                let l = self.reg(th, base, a);
                let r = self.reg(th, base, inst.b() as usize);
                let ev = MetaEvent::from_u8(inst.c()).ok_or(Fault::PcOutOfRange)?;
                self.exec_mm_bin(th, base, &proto, pc, l, r, ev)?;
            }
            Opcode::MMBINI => {
                let l = self.reg(th, base, a);
                let imm = Value::Integer(inst.b() as i32 as i64 - moon_asm::BIAS_SC as i64);
                let ev = MetaEvent::from_u8(inst.c()).ok_or(Fault::PcOutOfRange)?;
                let (l, r) = if inst.k() { (imm, l) } else { (l, imm) };
                self.exec_mm_bin(th, base, &proto, pc, l, r, ev)?;
            }
            Opcode::MMBINK => {
                let l = self.reg(th, base, a);
                let kv = self.k_value(&proto, inst.b() as usize)?;
                let ev = MetaEvent::from_u8(inst.c()).ok_or(Fault::PcOutOfRange)?;
                let (l, r) = if inst.k() { (kv, l) } else { (l, kv) };
                self.exec_mm_bin(th, base, &proto, pc, l, r, ev)?;
            }

            Opcode::UNM => {
                let v = self.reg(th, base, inst.b() as usize);
                match alu::negate(v) {
                    Some(out) => self.set_reg(th, base, a, out),
                    None => {
                        let Some(mm) = self.metamethod(v, MetaEvent::Unm) else {
                            return Err(Fault::ArithmeticError.into());
                        };
                        let out = self.call_meta(th, mm, &[v, v], 1)?;
                        self.set_reg(th, base, a, out);
                    }
                }
            }
            Opcode::BNOT => {
                let v = self.reg(th, base, inst.b() as usize);
                if v.is_number() {
                    let Some(x) = v.to_integer_exact() else {
                        return Err(Fault::ArithmeticError.into());
                    };
                    self.set_reg(th, base, a, Value::Integer(!x));
                } else {
                    let Some(mm) = self.metamethod(v, MetaEvent::BNot) else {
                        return Err(Fault::ArithmeticError.into());
                    };
                    let out = self.call_meta(th, mm, &[v, v], 1)?;
                    self.set_reg(th, base, a, out);
                }
            }
            Opcode::NOT => {
                let v = self.reg(th, base, inst.b() as usize);
                self.set_reg(th, base, a, Value::Boolean(!v.truthy()));
            }
            Opcode::LEN => {
                let v = self.reg(th, base, inst.b() as usize);
                let out = self.length_of(th, v)?;
                self.set_reg(th, base, a, out);
            }
            Opcode::CONCAT => {
                let out = self.concat_range(th, base, a, inst.b() as usize)?;
                self.set_reg(th, base, a, out);
            }

            Opcode::CLOSE => {
                self.close_tbc_from(th, a, None)?;
                close_from(&mut self.heap, th, base + a);
            }
            Opcode::TBC => {
                let v = self.reg(th, base, a);
                if v.truthy() {
                    if self.metamethod(v, MetaEvent::Close).is_none() {
                        return Err(Fault::NoCloseMetamethod.into());
                    }
                    let t = self.heap.thread_mut(th);
                    let frame = t.frames.last_mut().expect("dispatch without a frame");
                    frame.tbc.set(a);
                }
            }

            Opcode::JMP => {
                self.jump(th, inst.sj() as i64)?;
            }
            Opcode::EQ => {
                let l = self.reg(th, base, inst.b() as usize);
                let r = self.reg(th, base, inst.c() as usize);
                let cond = self.values_equal(th, l, r)?;
                self.apply_skip(th, cond, a != 0);
            }
            Opcode::LT => {
                let l = self.reg(th, base, inst.b() as usize);
                let r = self.reg(th, base, inst.c() as usize);
                let cond = self.less_than(th, l, r, false)?;
                self.apply_skip(th, cond, a != 0);
            }
            Opcode::LE => {
                let l = self.reg(th, base, inst.b() as usize);
                let r = self.reg(th, base, inst.c() as usize);
                let cond = self.less_than(th, l, r, true)?;
                self.apply_skip(th, cond, a != 0);
            }
            Opcode::EQK => {
                let l = self.reg(th, base, inst.b() as usize);
                let r = self.k_value(&proto, inst.c() as usize)?;
                self.apply_skip(th, l.raw_eq(r), a != 0);
            }
            Opcode::EQI => {
                let l = self.reg(th, base, inst.b() as usize);
                let cond = l.raw_eq(Value::Integer(inst.sc() as i64));
                self.apply_skip(th, cond, a != 0);
            }
            Opcode::LTI | Opcode::LEI | Opcode::GTI | Opcode::GEI => {
                let l = self.reg(th, base, inst.b() as usize);
                let imm = Value::Integer(inst.sc() as i64);
                let cond = match op {
                    Opcode::LTI => alu::num_lt(l, imm),
                    Opcode::LEI => alu::num_le(l, imm),
                    Opcode::GTI => alu::num_lt(imm, l),
                    _ => alu::num_le(imm, l),
                };
                let Some(cond) = cond else {
                    return Err(self.throw_str(&format!(
                        "attempt to compare {} with number",
                        l.type_name()
                    )));
                };
                self.apply_skip(th, cond, a != 0);
            }
            Opcode::TEST => {
                let cond = self.reg(th, base, a).truthy();
                if cond != inst.k() {
                    self.skip(th);
                }
            }
            Opcode::TESTSET => {
                let v = self.reg(th, base, inst.b() as usize);
                if v.truthy() == inst.k() {
                    self.set_reg(th, base, a, v);
                } else {
                    self.skip(th);
                }
            }

            Opcode::CALL => {
                let func = base + a;
                let b = inst.b() as usize;
                let nargs = if b == 0 {
                    self.heap.thread(th).top.saturating_sub(func + 1)
                } else {
                    b - 1
                };
                let nresults = inst.c() as i32 - 1;
                match self.call_value(th, func, nargs, nresults, false)? {
                    CallKind::Pushed | CallKind::NativeDone => {}
                    CallKind::NativeYield => return self.accept_yield(th),
                }
            }
            Opcode::TAILCALL => {
                let state = self.tailcall(th, a, inst.b() as usize)?;
                if state == ExecuteState::Yielded {
                    return self.accept_yield(th);
                }
                return Ok(state);
            }
            Opcode::RETURN => {
                let b = inst.b() as usize;
                let first = base + a;
                let count = if b == 0 {
                    self.heap.thread(th).top.saturating_sub(first)
                } else {
                    b - 1
                };
                self.finish_return(th, first, count)?;
                return Ok(ExecuteState::Returned);
            }
            Opcode::RETURN0 => {
                self.finish_return(th, base, 0)?;
                return Ok(ExecuteState::Returned);
            }
            Opcode::RETURN1 => {
                self.finish_return(th, base + a, 1)?;
                return Ok(ExecuteState::Returned);
            }

            Opcode::FORLOOP => {
                self.exec_forloop(th, base, a, inst.sbx())?;
            }
            Opcode::FORPREP => {
                self.exec_forprep(th, base, a, inst.sbx())?;
            }
            Opcode::TFORPREP => {
                let v = self.reg(th, base, a + 3);
                if v.truthy() {
                    if self.metamethod(v, MetaEvent::Close).is_none() {
                        return Err(Fault::NoCloseMetamethod.into());
                    }
                    let t = self.heap.thread_mut(th);
                    let frame = t.frames.last_mut().expect("dispatch without a frame");
                    frame.tbc.set(a + 3);
                }
                self.jump(th, inst.sbx() as i64)?;
            }
            Opcode::TFORCALL => {
                let func = base + a + 4;
                if func + 3 > self.params.stack_size {
                    return Err(Fault::StackOverflow.into());
                }
                {
                    let t = self.heap.thread_mut(th);
                    let (iter, state, ctrl) =
                        (t.stack[base + a], t.stack[base + a + 1], t.stack[base + a + 2]);
                    t.stack[func] = iter;
                    t.stack[func + 1] = state;
                    t.stack[func + 2] = ctrl;
                    t.top = func + 3;
                }
                match self.call_value(th, func, 2, inst.c() as i32, false)? {
                    CallKind::Pushed | CallKind::NativeDone => {}
                    CallKind::NativeYield => return self.accept_yield(th),
                }
            }
            Opcode::TFORLOOP => {
                let ctrl = self.reg(th, base, a + 4);
                if !ctrl.is_nil() {
                    self.set_reg(th, base, a + 2, ctrl);
                    self.jump(th, -(inst.sbx() as i64))?;
                }
            }

            Opcode::SETLIST => {
                let offset = if inst.k() {
                    self.fetch_extraarg(th, &proto)? as i64
                } else {
                    inst.c() as i64
                };
                let b = inst.b() as usize;
                let count = if b == 0 {
                    self.heap.thread(th).top.saturating_sub(base + a + 1)
                } else {
                    b
                };
                let Value::Table(table) = self.reg(th, base, a) else {
                    return Err(Fault::InvalidTableOperation.into());
                };
                for i in 0..count {
                    let v = self.reg(th, base, a + 1 + i);
                    self.heap.table_mut(table).raw_seti(offset + i as i64 + 1, v);
                }
                if b == 0 {
                    let t = self.heap.thread_mut(th);
                    t.top = base + proto.maxstacksize as usize;
                }
            }

            Opcode::CLOSURE => {
                let child = proto
                    .protos
                    .get(inst.bx() as usize)
                    .cloned()
                    .ok_or(Fault::PcOutOfRange)?;
                let closure = self.build_closure(th, base, child)?;
                self.set_reg(th, base, a, Value::Closure(closure));
            }

            Opcode::VARARG => {
                self.exec_vararg(th, base, a, inst.c() as usize)?;
            }
            Opcode::VARARGPREP => {
                self.exec_varargprep(th, a, &proto)?;
            }

            Opcode::EXTRAARG => {
                // Always a continuation; reaching it standalone means the
                // stream is malformed.
                return Err(Fault::PcOutOfRange.into());
            }

            Opcode::PCALL => {
                return self.exec_pcall(
                    th,
                    base,
                    a,
                    inst.b() as usize,
                    inst.c() as i32 - 1,
                );
            }
        }
        Ok(ExecuteState::Proceed)
    }

    /// Comparison skip protocol: skip the next instruction unless the
    /// condition matches the selected sense.
    fn apply_skip(&mut self, th: Gc<Thread>, cond: bool, sense: bool) {
        if cond != sense {
            self.skip(th);
        }
    }

    /// A yield arrived at the dispatch loop; legal only in a span entered
    /// by `resume`.
    fn accept_yield(&mut self, th: Gc<Thread>) -> Result<ExecuteState, RuntimeError> {
        if !self.yieldable {
            self.discard_pending_yield(th);
            return Err(self.throw_str("attempt to yield from outside a coroutine"));
        }
        Ok(ExecuteState::Yielded)
    }

    fn exec_arith(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        a: usize,
        l: Value,
        r: Value,
        op: ArithOp,
    ) -> Result<(), RuntimeError> {
        match alu::arith(op, l, r)? {
            Some(v) => {
                self.set_reg(th, base, a, v);
                self.skip_mm_hint(th);
                Ok(())
            }
            None => {
                // Non-numeric operand: the trailing hint instruction, if
                // present, dispatches the metamethod next.
                if self.next_is_mm_hint(th) {
                    Ok(())
                } else {
                    Err(Fault::ArithmeticError.into())
                }
            }
        }
    }

    fn exec_mm_bin(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        proto: &Rc<Proto>,
        pc: usize,
        l: Value,
        r: Value,
        ev: MetaEvent,
    ) -> Result<(), RuntimeError> {
        // The result register comes from the arithmetic instruction this
        // hint trails.
        if pc == 0 {
            return Err(Fault::PcOutOfRange.into());
        }
        let target = proto.code[pc - 1].a() as usize;

        let mm = self
            .metamethod(l, ev)
            .or_else(|| self.metamethod(r, ev))
            .ok_or(Fault::ArithmeticError)?;
        let out = self.call_meta(th, mm, &[l, r], 1)?;
        self.set_reg(th, base, target, out);
        Ok(())
    }

    fn next_is_mm_hint(&self, th: Gc<Thread>) -> bool {
        let t = self.heap.thread(th);
        let Some(frame) = t.frames.last() else {
            return false;
        };
        frame
            .proto
            .code
            .get(frame.pc)
            .and_then(|i| i.opcode())
            .map(|o| o.is_mm_hint())
            .unwrap_or(false)
    }

    fn skip_mm_hint(&mut self, th: Gc<Thread>) {
        if self.next_is_mm_hint(th) {
            self.skip(th);
        }
    }

    /// Consume the `EXTRAARG` continuation at the current pc.
    fn fetch_extraarg(
        &mut self,
        th: Gc<Thread>,
        proto: &Rc<Proto>,
    ) -> Result<u32, RuntimeError> {
        let pc = self
            .heap
            .thread(th)
            .frames
            .last()
            .expect("dispatch without a frame")
            .pc;
        let next = proto.code.get(pc).copied().ok_or(Fault::PcOutOfRange)?;
        if next.opcode() != Some(Opcode::EXTRAARG) {
            return Err(Fault::PcOutOfRange.into());
        }
        self.skip(th);
        Ok(next.ax())
    }

    fn rk(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        proto: &Rc<Proto>,
        c: usize,
        k: bool,
    ) -> Result<Value, RuntimeError> {
        if k {
            self.k_value(proto, c)
        } else {
            Ok(self.reg(th, base, c))
        }
    }

    fn upvalue_handle(
        &self,
        th: Gc<Thread>,
        idx: usize,
    ) -> Result<Gc<Upvalue>, RuntimeError> {
        let t = self.heap.thread(th);
        let frame = t.frames.last().expect("dispatch without a frame");
        let Some(ch) = frame.closure else {
            return Err(Fault::PcOutOfRange.into());
        };
        let Closure::Lua(lc) = self.heap.closure(ch) else {
            return Err(Fault::PcOutOfRange.into());
        };
        lc.upvalues
            .get(idx)
            .copied()
            .ok_or_else(|| Fault::PcOutOfRange.into())
    }

    fn build_closure(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        child: Rc<Proto>,
    ) -> Result<Gc<Closure>, RuntimeError> {
        let parent_ups: Vec<Gc<Upvalue>> = {
            let t = self.heap.thread(th);
            let frame = t.frames.last().expect("dispatch without a frame");
            match frame.closure {
                Some(ch) => match self.heap.closure(ch) {
                    Closure::Lua(lc) => lc.upvalues.clone(),
                    Closure::Native(_) => Vec::new(),
                },
                None => Vec::new(),
            }
        };

        // The fresh closure and any upvalues it opens are unreachable
        // until stored in a register.
        self.heap.inhibit();
        let mut upvalues = Vec::with_capacity(child.upvalues.len());
        for desc in &child.upvalues {
            let uv = if desc.instack {
                thread::find_or_open(&mut self.heap, th, base + desc.idx as usize)
            } else {
                match parent_ups.get(desc.idx as usize) {
                    Some(&uv) => uv,
                    None => {
                        self.heap.allow();
                        return Err(Fault::PcOutOfRange.into());
                    }
                }
            };
            upvalues.push(uv);
        }
        let closure = self.heap.new_closure(Closure::Lua(LuaClosure {
            proto: child,
            upvalues,
        }));
        self.heap.allow();
        Ok(closure)
    }

    fn exec_forprep(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        a: usize,
        sbx: i32,
    ) -> Result<(), RuntimeError> {
        let init = self.reg(th, base, a);
        let limit = self.reg(th, base, a + 1);
        let step = self.reg(th, base, a + 2);

        if let (Value::Integer(i), Value::Integer(l), Value::Integer(s)) =
            (init, limit, step)
        {
            if s == 0 {
                return Err(Fault::InvalidForLoopStep.into());
            }
            let runs = if s > 0 { i <= l } else { i >= l };
            if runs {
                self.set_reg(th, base, a + 3, init);
            } else {
                self.jump(th, sbx as i64 + 1)?;
            }
            return Ok(());
        }

        let (Some(i), Some(l), Some(s)) =
            (init.as_number(), limit.as_number(), step.as_number())
        else {
            return Err(self.throw_str("'for' initial value must be a number"));
        };
        if s == 0.0 {
            return Err(Fault::InvalidForLoopStep.into());
        }
        self.set_reg(th, base, a, Value::Float(i));
        self.set_reg(th, base, a + 1, Value::Float(l));
        self.set_reg(th, base, a + 2, Value::Float(s));
        let runs = if s > 0.0 { i <= l } else { i >= l };
        if runs {
            self.set_reg(th, base, a + 3, Value::Float(i));
        } else {
            self.jump(th, sbx as i64 + 1)?;
        }
        Ok(())
    }

    fn exec_forloop(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        a: usize,
        sbx: i32,
    ) -> Result<(), RuntimeError> {
        let counter = self.reg(th, base, a);
        let limit = self.reg(th, base, a + 1);
        let step = self.reg(th, base, a + 2);

        if let (Value::Integer(i), Value::Integer(s)) = (counter, step) {
            let Some(l) = limit.as_integer() else {
                return Err(self.throw_str("'for' limit must be a number"));
            };
            // Overflow of the counter terminates instead of aliasing.
            if let Some(next) = i.checked_add(s) {
                let continues = if s > 0 { next <= l } else { next >= l };
                if continues {
                    self.set_reg(th, base, a, Value::Integer(next));
                    self.set_reg(th, base, a + 3, Value::Integer(next));
                    self.jump(th, -(sbx as i64))?;
                }
            }
            return Ok(());
        }

        let (Some(i), Some(l), Some(s)) = (
            counter.as_number(),
            limit.as_number(),
            step.as_number(),
        ) else {
            return Err(self.throw_str("'for' limit must be a number"));
        };
        let next = i + s;
        let continues = if s > 0.0 { next <= l } else { next >= l };
        if continues {
            self.set_reg(th, base, a, Value::Float(next));
            self.set_reg(th, base, a + 3, Value::Float(next));
            self.jump(th, -(sbx as i64))?;
        }
        Ok(())
    }

    fn exec_vararg(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        a: usize,
        c: usize,
    ) -> Result<(), RuntimeError> {
        let (vbase, vcount) = {
            let t = self.heap.thread(th);
            let frame = t.frames.last().expect("dispatch without a frame");
            (frame.vararg_base, frame.vararg_count)
        };
        if c == 0 {
            if base + a + vcount > self.params.stack_size {
                return Err(Fault::StackOverflow.into());
            }
            let t = self.heap.thread_mut(th);
            for i in 0..vcount {
                t.stack[base + a + i] = t.stack[vbase + i];
            }
            t.top = base + a + vcount;
        } else {
            let wanted = c - 1;
            if base + a + wanted > self.params.stack_size {
                return Err(Fault::StackOverflow.into());
            }
            let t = self.heap.thread_mut(th);
            for i in 0..wanted {
                t.stack[base + a + i] = if i < vcount {
                    t.stack[vbase + i]
                } else {
                    Value::Nil
                };
            }
        }
        Ok(())
    }

    /// First instruction of a vararg function: relocate the fixed
    /// parameters above the extra arguments and record the vararg range.
    fn exec_varargprep(
        &mut self,
        th: Gc<Thread>,
        nparams: usize,
        proto: &Rc<Proto>,
    ) -> Result<(), RuntimeError> {
        let (old_base, nargs) = {
            let t = self.heap.thread(th);
            let frame = t.frames.last().expect("dispatch without a frame");
            (frame.base, frame.vararg_count)
        };
        let new_base = old_base + 1 + nargs;
        let maxstack = proto.maxstacksize as usize;
        if nparams > maxstack {
            return Err(Fault::PcOutOfRange.into());
        }
        if new_base + maxstack > self.params.stack_size {
            return Err(Fault::StackOverflow.into());
        }

        let t = self.heap.thread_mut(th);
        for i in 0..nparams {
            t.stack[new_base + i] = if i < nargs {
                t.stack[old_base + i]
            } else {
                Value::Nil
            };
            if i < nargs {
                t.stack[old_base + i] = Value::Nil;
            }
        }
        for slot in &mut t.stack[(new_base + nparams)..(new_base + maxstack)] {
            *slot = Value::Nil;
        }
        t.top = new_base + maxstack;

        let frame = t.frames.last_mut().expect("dispatch without a frame");
        frame.base = new_base;
        frame.vararg_base = old_base + nparams;
        frame.vararg_count = nargs.saturating_sub(nparams);
        Ok(())
    }

    /// The `PCALL` extension: call `R[A+1]`, capturing any error into the
    /// status/result window.
    fn exec_pcall(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        a: usize,
        b: usize,
        nresults: i32,
    ) -> Result<ExecuteState, RuntimeError> {
        let func = base + a + 1;
        let nargs = if b == 0 {
            self.heap.thread(th).top.saturating_sub(func + 1)
        } else {
            b - 1
        };
        match self.call_value(th, func, nargs, nresults, true) {
            Ok(CallKind::Pushed) => Ok(ExecuteState::Proceed),
            Ok(CallKind::NativeDone) => {
                self.set_reg(th, base, a, Value::Boolean(true));
                Ok(ExecuteState::Proceed)
            }
            Ok(CallKind::NativeYield) => {
                self.set_reg(th, base, a, Value::Boolean(true));
                self.accept_yield(th)
            }
            Err(err) => {
                // The callee never ran (or was native): deliver the
                // failure pair right here.
                self.record_location(th);
                let err_value = self.error_value(&err);
                let t = self.heap.thread_mut(th);
                t.stack[base + a] = Value::Boolean(false);
                t.stack[func] = err_value;
                if nresults >= 0 {
                    for i in 1..(nresults as usize) {
                        t.stack[func + i] = Value::Nil;
                    }
                    t.top = match t.frames.last() {
                        Some(f) => f.base + f.proto.maxstacksize as usize,
                        None => func + nresults as usize,
                    };
                } else {
                    t.top = func + 1;
                }
                Ok(ExecuteState::Proceed)
            }
        }
    }
}

fn arith_op_of(op: Opcode) -> ArithOp {
    match op {
        Opcode::ADD | Opcode::ADDK => ArithOp::Add,
        Opcode::SUB | Opcode::SUBK => ArithOp::Sub,
        Opcode::MUL | Opcode::MULK => ArithOp::Mul,
        Opcode::MOD | Opcode::MODK => ArithOp::Mod,
        Opcode::POW | Opcode::POWK => ArithOp::Pow,
        Opcode::DIV | Opcode::DIVK => ArithOp::Div,
        Opcode::IDIV | Opcode::IDIVK => ArithOp::IDiv,
        Opcode::BAND | Opcode::BANDK => ArithOp::BAnd,
        Opcode::BOR | Opcode::BORK => ArithOp::BOr,
        Opcode::BXOR | Opcode::BXORK => ArithOp::BXor,
        Opcode::SHL => ArithOp::Shl,
        _ => ArithOp::Shr,
    }
}
