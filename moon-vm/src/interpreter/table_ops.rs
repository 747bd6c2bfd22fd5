//! Indexing, comparison, length, and concatenation with their metamethod
//! chains.

use moon_asm::Fault;

use crate::error::RuntimeError;
use crate::heap::Gc;
use crate::interpreter::alu;
use crate::interpreter::internal::format_float;
use crate::interpreter::Interpreter;
use crate::meta::MetaEvent;
use crate::thread::Thread;
use crate::value::Value;

impl Interpreter {
    /// `obj[key]` through the `__index` chain.
    pub(crate) fn table_get(
        &mut self,
        th: Gc<Thread>,
        obj: Value,
        key: Value,
    ) -> Result<Value, RuntimeError> {
        let mut cur = obj;
        for _ in 0..self.params.meta_chain_depth {
            let mm = if let Value::Table(t) = cur {
                let found = self.heap.table(t).raw_get(key);
                if !found.is_nil() {
                    return Ok(found);
                }
                match self.metamethod(cur, MetaEvent::Index) {
                    None => return Ok(Value::Nil),
                    Some(mm) => mm,
                }
            } else {
                match self.metamethod(cur, MetaEvent::Index) {
                    None => return Err(Fault::InvalidTableOperation.into()),
                    Some(mm) => mm,
                }
            };
            match mm {
                Value::Table(_) => cur = mm,
                _ => return self.call_meta(th, mm, &[cur, key], 1),
            }
        }
        Err(self.throw_str("'__index' chain too long; possible loop"))
    }

    /// `obj[key] = value` through the `__newindex` chain.
    pub(crate) fn table_set(
        &mut self,
        th: Gc<Thread>,
        obj: Value,
        key: Value,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let mut cur = obj;
        for _ in 0..self.params.meta_chain_depth {
            let mm = if let Value::Table(t) = cur {
                let existing = self.heap.table(t).raw_get(key);
                let mm = if existing.is_nil() {
                    self.metamethod(cur, MetaEvent::NewIndex)
                } else {
                    None
                };
                match mm {
                    None => {
                        self.heap.table_mut(t).raw_set(key, value)?;
                        return Ok(());
                    }
                    Some(mm) => mm,
                }
            } else {
                match self.metamethod(cur, MetaEvent::NewIndex) {
                    None => return Err(Fault::InvalidTableOperation.into()),
                    Some(mm) => mm,
                }
            };
            match mm {
                Value::Table(_) => cur = mm,
                _ => {
                    self.call_meta(th, mm, &[cur, key, value], 0)?;
                    return Ok(());
                }
            }
        }
        Err(self.throw_str("'__newindex' chain too long; possible loop"))
    }

    /// `a < b` (or `a <= b`) with numeric, string, and metamethod paths.
    pub(crate) fn less_than(
        &mut self,
        th: Gc<Thread>,
        a: Value,
        b: Value,
        or_equal: bool,
    ) -> Result<bool, RuntimeError> {
        if let Some(r) = if or_equal {
            alu::num_le(a, b)
        } else {
            alu::num_lt(a, b)
        } {
            return Ok(r);
        }
        if let (Value::Str(x), Value::Str(y)) = (a, b) {
            let xb = self.heap.str_(x).as_bytes();
            let yb = self.heap.str_(y).as_bytes();
            return Ok(if or_equal { xb <= yb } else { xb < yb });
        }
        if or_equal {
            // `a <= b` tries `__le`, falling back to `not (b < a)`.
            if let Some(mm) = self
                .metamethod(a, MetaEvent::Le)
                .or_else(|| self.metamethod(b, MetaEvent::Le))
            {
                let r = self.call_meta(th, mm, &[a, b], 1)?;
                return Ok(r.truthy());
            }
            if let Some(mm) = self
                .metamethod(b, MetaEvent::Lt)
                .or_else(|| self.metamethod(a, MetaEvent::Lt))
            {
                let r = self.call_meta(th, mm, &[b, a], 1)?;
                return Ok(!r.truthy());
            }
        } else if let Some(mm) = self
            .metamethod(a, MetaEvent::Lt)
            .or_else(|| self.metamethod(b, MetaEvent::Lt))
        {
            let r = self.call_meta(th, mm, &[a, b], 1)?;
            return Ok(r.truthy());
        }
        Err(self.throw_str(&format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        )))
    }

    /// `a == b`: primitive equality, then `__eq` when both are tables.
    pub(crate) fn values_equal(
        &mut self,
        th: Gc<Thread>,
        a: Value,
        b: Value,
    ) -> Result<bool, RuntimeError> {
        if a.raw_eq(b) {
            return Ok(true);
        }
        if let (Value::Table(_), Value::Table(_)) = (a, b) {
            if let Some(mm) = self
                .metamethod(a, MetaEvent::Eq)
                .or_else(|| self.metamethod(b, MetaEvent::Eq))
            {
                let r = self.call_meta(th, mm, &[a, b], 1)?;
                return Ok(r.truthy());
            }
        }
        Ok(false)
    }

    /// `#v`: string byte length, table boundary (with `__len` override),
    /// or a thrown type error.
    pub(crate) fn length_of(
        &mut self,
        th: Gc<Thread>,
        v: Value,
    ) -> Result<Value, RuntimeError> {
        match v {
            Value::Str(h) => Ok(Value::Integer(self.heap.str_(h).len() as i64)),
            Value::Table(t) => {
                if let Some(mm) = self.metamethod(v, MetaEvent::Len) {
                    return self.call_meta(th, mm, &[v], 1);
                }
                Ok(Value::Integer(self.heap.table(t).length()))
            }
            _ => Err(self.throw_str(&format!(
                "attempt to get length of a {} value",
                v.type_name()
            ))),
        }
    }

    /// Concatenate `R[a]..R[b]` left-to-right into one value.
    pub(crate) fn concat_range(
        &mut self,
        th: Gc<Thread>,
        base: usize,
        a: usize,
        b: usize,
    ) -> Result<Value, RuntimeError> {
        let mut acc = self.reg(th, base, a);
        for i in (a + 1)..=b {
            let next = self.reg(th, base, i);
            acc = self.concat_pair(th, acc, next)?;
        }
        Ok(acc)
    }

    fn concat_pair(
        &mut self,
        th: Gc<Thread>,
        l: Value,
        r: Value,
    ) -> Result<Value, RuntimeError> {
        if let (Some(lb), Some(rb)) = (self.concat_bytes(l), self.concat_bytes(r)) {
            let mut out = lb;
            out.extend_from_slice(&rb);
            return Ok(Value::Str(self.heap.new_str(&out)));
        }
        if let Some(mm) = self
            .metamethod(l, MetaEvent::Concat)
            .or_else(|| self.metamethod(r, MetaEvent::Concat))
        {
            return self.call_meta(th, mm, &[l, r], 1);
        }
        let offender = if self.concat_bytes(l).is_some() { r } else { l };
        Err(self.throw_str(&format!(
            "attempt to concatenate a {} value",
            offender.type_name()
        )))
    }

    fn concat_bytes(&self, v: Value) -> Option<Vec<u8>> {
        match v {
            Value::Str(h) => Some(self.heap.str_(h).as_bytes().to_vec()),
            Value::Integer(i) => Some(i.to_string().into_bytes()),
            Value::Float(f) => Some(format_float(f).into_bytes()),
            _ => None,
        }
    }
}
