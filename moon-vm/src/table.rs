//! The table engine: a dense array part plus a hash part.
//!
//! The split is an optimization; the observable contract is the logical
//! mapping of keys to values with the length-boundary rule. Keys normalize
//! before storage: a float key equal to an integer is that integer, and
//! `nil`/NaN keys are rejected on assignment.

use hashbrown::HashMap;

use moon_asm::Fault;

use crate::heap::Gc;
use crate::thread::Thread;
use crate::value::{float_to_int_exact, Closure, LuaStr, Value};

/// Normalized hashable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TableKey {
    Int(i64),
    Str(Gc<LuaStr>),
    Bool(bool),
    /// Non-integral, non-NaN float, by bit pattern.
    Float(u64),
    Table(Gc<Table>),
    Closure(Gc<Closure>),
    Thread(Gc<Thread>),
}

impl TableKey {
    fn try_from_value(v: Value) -> Result<Self, Fault> {
        match v {
            Value::Nil => Err(Fault::InvalidTableKey),
            Value::Boolean(b) => Ok(TableKey::Bool(b)),
            Value::Integer(i) => Ok(TableKey::Int(i)),
            Value::Float(f) => {
                if f.is_nan() {
                    Err(Fault::InvalidTableKey)
                } else if let Some(i) = float_to_int_exact(f) {
                    Ok(TableKey::Int(i))
                } else {
                    Ok(TableKey::Float(f.to_bits()))
                }
            }
            Value::Str(h) => Ok(TableKey::Str(h)),
            Value::Table(h) => Ok(TableKey::Table(h)),
            Value::Closure(h) => Ok(TableKey::Closure(h)),
            Value::Thread(h) => Ok(TableKey::Thread(h)),
        }
    }

    fn to_value(self) -> Value {
        match self {
            TableKey::Int(i) => Value::Integer(i),
            TableKey::Str(h) => Value::Str(h),
            TableKey::Bool(b) => Value::Boolean(b),
            TableKey::Float(bits) => Value::Float(f64::from_bits(bits)),
            TableKey::Table(h) => Value::Table(h),
            TableKey::Closure(h) => Value::Closure(h),
            TableKey::Thread(h) => Value::Thread(h),
        }
    }
}

/// A Lua table.
#[derive(Debug, Default)]
pub struct Table {
    /// Values at integer keys `1..=array.len()`, possibly with holes.
    array: Vec<Value>,
    hash: HashMap<TableKey, Value>,
    /// Optional metatable.
    pub(crate) metatable: Option<Gc<Table>>,
    /// Set once the object's `__gc` finalizer has been queued.
    pub(crate) finalized: bool,
}

impl Table {
    /// Empty table with preallocation hints.
    pub fn with_capacity(narr: usize, nhash: usize) -> Self {
        Self {
            array: Vec::with_capacity(narr),
            hash: HashMap::with_capacity(nhash),
            metatable: None,
            finalized: false,
        }
    }

    /// The metatable, if any.
    pub fn metatable(&self) -> Option<Gc<Table>> {
        self.metatable
    }

    /// Attach or detach the metatable.
    pub fn set_metatable(&mut self, mt: Option<Gc<Table>>) {
        self.metatable = mt;
    }

    /// Read a key. Missing and invalid keys read as `nil`; reads never
    /// allocate and never fail.
    pub fn raw_get(&self, key: Value) -> Value {
        let Ok(key) = TableKey::try_from_value(key) else {
            return Value::Nil;
        };
        if let TableKey::Int(i) = key {
            if let Some(v) = self.array_slot(i) {
                return v;
            }
        }
        self.hash.get(&key).copied().unwrap_or(Value::Nil)
    }

    /// Read an integer key.
    pub fn raw_geti(&self, i: i64) -> Value {
        if let Some(v) = self.array_slot(i) {
            return v;
        }
        self.hash
            .get(&TableKey::Int(i))
            .copied()
            .unwrap_or(Value::Nil)
    }

    /// Write a key. Assigning `nil` removes it; `nil` and NaN keys fail.
    pub fn raw_set(&mut self, key: Value, value: Value) -> Result<(), Fault> {
        let key = TableKey::try_from_value(key)?;
        if let TableKey::Int(i) = key {
            self.seti_normalized(i, value);
        } else if value.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, value);
        }
        Ok(())
    }

    /// Write an integer key.
    pub fn raw_seti(&mut self, i: i64, value: Value) {
        self.seti_normalized(i, value);
    }

    fn seti_normalized(&mut self, i: i64, value: Value) {
        if i >= 1 && (i as usize) <= self.array.len() {
            self.array[i as usize - 1] = value;
            return;
        }
        if i >= 1 && i as usize == self.array.len() + 1 && !value.is_nil() {
            self.array.push(value);
            self.migrate_from_hash();
            return;
        }
        if value.is_nil() {
            self.hash.remove(&TableKey::Int(i));
        } else {
            self.hash.insert(TableKey::Int(i), value);
        }
    }

    /// Pull keys that extend the array part out of the hash part.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = TableKey::Int(self.array.len() as i64 + 1);
            match self.hash.remove(&next) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    fn array_slot(&self, i: i64) -> Option<Value> {
        if i >= 1 && (i as usize) <= self.array.len() {
            Some(self.array[i as usize - 1])
        } else {
            None
        }
    }

    /// A length-boundary: some `n` with `t[n] ~= nil` and `t[n+1] == nil`,
    /// or `0` when `t[1] == nil`.
    pub fn length(&self) -> i64 {
        let n = self.array.len() as i64;
        if n > 0 && self.array[n as usize - 1].is_nil() {
            // A hole inside the array part: binary-search a boundary.
            let (mut lo, mut hi) = (0i64, n);
            // Invariant: t[lo] ~= nil (or lo == 0), t[hi] == nil.
            while hi - lo > 1 {
                let mid = lo + (hi - lo) / 2;
                if self.array[mid as usize - 1].is_nil() {
                    hi = mid;
                } else {
                    lo = mid;
                }
            }
            return lo;
        }
        if self.raw_geti(n + 1).is_nil() {
            return n;
        }
        // The border continues into the hash part: double, then bisect.
        let mut lo = n + 1;
        let mut hi;
        loop {
            match lo.checked_mul(2) {
                Some(next) if !self.raw_geti(next).is_nil() => lo = next,
                Some(next) => {
                    hi = next;
                    break;
                }
                None => {
                    // Doubling overflowed; scan linearly from the last
                    // known non-nil index.
                    let mut k = lo;
                    while k < i64::MAX && !self.raw_geti(k + 1).is_nil() {
                        k += 1;
                    }
                    return k;
                }
            }
        }
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.raw_geti(mid).is_nil() {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        lo
    }

    /// Snapshot of entries and metatable handle for the collector.
    pub(crate) fn trace_parts(&self) -> (Vec<(Value, Value)>, Option<Gc<Table>>) {
        let mut entries = Vec::with_capacity(self.array.len() + self.hash.len());
        for (i, v) in self.array.iter().enumerate() {
            if !v.is_nil() {
                entries.push((Value::Integer(i as i64 + 1), *v));
            }
        }
        for (k, v) in &self.hash {
            entries.push((k.to_value(), *v));
        }
        (entries, self.metatable)
    }

    /// Iterate entries in traversal order: array part, then hash part.
    /// `prev` of `None` starts the traversal; returns `None` at the end.
    pub fn next_entry(&self, prev: Option<Value>) -> Result<Option<(Value, Value)>, Fault> {
        // Flattened traversal. Rehash may reorder; callers must not mutate
        // while iterating, matching the usual `next` contract.
        let (entries, _) = self.trace_parts();
        match prev {
            None => Ok(entries.first().copied()),
            Some(p) => {
                let key = TableKey::try_from_value(p)?;
                let pos = entries
                    .iter()
                    .position(|(k, _)| {
                        TableKey::try_from_value(*k).ok() == Some(key)
                    })
                    .ok_or(Fault::InvalidTableKey)?;
                Ok(entries.get(pos + 1).copied())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> Table {
        Table::with_capacity(0, 0)
    }

    #[test]
    fn missing_keys_read_as_nil() {
        let table = t();
        assert_eq!(table.raw_geti(1), Value::Nil);
        assert_eq!(table.raw_get(Value::Boolean(true)), Value::Nil);
    }

    #[test]
    fn float_keys_normalize_to_integers() {
        let mut table = t();
        table.raw_set(Value::Float(2.0), Value::Integer(42)).unwrap();
        assert_eq!(table.raw_geti(2), Value::Integer(42));
        assert_eq!(table.raw_get(Value::Integer(2)), Value::Integer(42));
    }

    #[test]
    fn nil_and_nan_keys_are_rejected() {
        let mut table = t();
        assert_eq!(
            table.raw_set(Value::Nil, Value::Integer(1)),
            Err(Fault::InvalidTableKey)
        );
        assert_eq!(
            table.raw_set(Value::Float(f64::NAN), Value::Integer(1)),
            Err(Fault::InvalidTableKey)
        );
    }

    #[test]
    fn assigning_nil_removes_the_key() {
        let mut table = t();
        table.raw_set(Value::Boolean(true), Value::Integer(1)).unwrap();
        table.raw_set(Value::Boolean(true), Value::Nil).unwrap();
        assert_eq!(table.raw_get(Value::Boolean(true)), Value::Nil);
    }

    #[test]
    fn length_of_dense_sequence() {
        let mut table = t();
        for i in 1..=5 {
            table.raw_seti(i, Value::Integer(i * 10));
        }
        assert_eq!(table.length(), 5);
    }

    #[test]
    fn length_is_zero_when_one_is_nil() {
        let mut table = t();
        table.raw_seti(3, Value::Integer(1));
        let n = table.length();
        // Any valid boundary: t[n] ~= nil and t[n+1] == nil, or 0.
        if n == 0 {
            assert!(table.raw_geti(1).is_nil());
        } else {
            assert!(!table.raw_geti(n).is_nil());
            assert!(table.raw_geti(n + 1).is_nil());
        }
    }

    #[test]
    fn length_boundary_holds_with_holes() {
        let mut table = t();
        for i in 1..=8 {
            table.raw_seti(i, Value::Integer(i));
        }
        table.raw_seti(5, Value::Nil);
        let n = table.length();
        assert!(!table.raw_geti(n).is_nil() || n == 0);
        assert!(table.raw_geti(n + 1).is_nil());
    }

    #[test]
    fn hash_keys_migrate_into_array_part() {
        let mut table = t();
        table.raw_seti(2, Value::Integer(2));
        table.raw_seti(3, Value::Integer(3));
        table.raw_seti(1, Value::Integer(1));
        assert_eq!(table.length(), 3);
    }

    #[test]
    fn next_entry_walks_every_pair() {
        let mut table = t();
        table.raw_seti(1, Value::Integer(10));
        table.raw_seti(2, Value::Integer(20));
        table.raw_set(Value::Boolean(true), Value::Integer(30)).unwrap();

        let mut seen = 0;
        let mut prev = None;
        while let Some((k, v)) = table.next_entry(prev).unwrap() {
            assert!(!v.is_nil());
            seen += 1;
            prev = Some(k);
        }
        assert_eq!(seen, 3);
    }
}
