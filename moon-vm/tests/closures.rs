//! Closure capture, upvalue sharing, CLOSE, and to-be-closed slots.

mod test_helpers;

use moon_asm::op;
use moon_vm::prelude::*;
use test_helpers::*;

/// Two closures over the same local observe each other's writes while
/// open, and keep sharing the cell after CLOSE.
#[test]
fn sibling_closures_share_one_upvalue_cell() {
    let setter = {
        let mut p = proto(vec![op::setupval(0, 0), op::return0()], vec![], 1);
        p.numparams = 1;
        p.upvalues = vec![UpvalDesc {
            instack: true,
            idx: 0,
        }];
        p
    };
    let getter = {
        let mut p = proto(vec![op::getupval(0, 0), op::return1(0)], vec![], 1);
        p.upvalues = vec![UpvalDesc {
            instack: true,
            idx: 0,
        }];
        p
    };

    // local x = 10
    // local set, get = <setter>, <getter>
    // set(99); g1 = get()
    // close x
    // set(77); g2 = get()
    // return g1, g2
    let mut main = proto(
        vec![
            op::loadi(0, 10),
            op::closure(1, 0),
            op::closure(2, 1),
            op::move_(4, 1),
            op::loadi(5, 99),
            op::call(4, 2, 1),
            op::move_(3, 2),
            op::call(3, 1, 2),
            op::close(0),
            op::move_(4, 1),
            op::loadi(5, 77),
            op::call(4, 2, 1),
            op::move_(4, 2),
            op::call(4, 1, 2),
            op::return_(3, 3, 0),
        ],
        vec![],
        6,
    );
    main.protos = vec![std::rc::Rc::new(setter), std::rc::Rc::new(getter)];

    assert_eq!(
        run_ok(main, &[]),
        vec![Value::Integer(99), Value::Integer(77)]
    );
}

/// A closure escaping its defining scope keeps its captured local alive
/// through the closed upvalue.
#[test]
fn returned_closure_reads_the_closed_cell() {
    // inner() = x
    let inner = {
        let mut p = proto(vec![op::getupval(0, 0), op::return1(0)], vec![], 1);
        p.upvalues = vec![UpvalDesc {
            instack: true,
            idx: 0,
        }];
        p
    };
    // make() = local x = 5; return inner  (frame return closes x)
    let make = with_child(
        proto(
            vec![
                op::loadi(0, 5),
                op::closure(1, 0),
                op::return_(1, 2, 0),
            ],
            vec![],
            2,
        ),
        inner,
    );
    // main: f = make(); return f()
    let main = with_child(
        proto(
            vec![
                op::closure(0, 0),
                op::call(0, 1, 2),
                op::call(0, 1, 2),
                op::return_(0, 2, 0),
            ],
            vec![],
            2,
        ),
        make,
    );
    assert_eq!(run_ok(main, &[]), vec![Value::Integer(5)]);
}

/// Nested capture through the parent's upvalue list (`instack = false`).
#[test]
fn grandchild_captures_through_parent_upvalue() {
    // level2() = x   (captures level1's upvalue, not a stack slot)
    let level2 = {
        let mut p = proto(vec![op::getupval(0, 0), op::return1(0)], vec![], 1);
        p.upvalues = vec![UpvalDesc {
            instack: false,
            idx: 0,
        }];
        p
    };
    // level1() = return level2-closure  (captures main's x)
    let level1 = {
        let mut p = with_child(
            proto(vec![op::closure(0, 0), op::return_(0, 2, 0)], vec![], 1),
            level2,
        );
        p.upvalues = vec![UpvalDesc {
            instack: true,
            idx: 0,
        }];
        p
    };
    // main: local x = 31; g = level1(); return g()
    let main = with_child(
        proto(
            vec![
                op::loadi(0, 31),
                op::closure(1, 0),
                op::move_(2, 1),
                op::call(2, 1, 2),
                op::call(2, 1, 2),
                op::return_(2, 2, 0),
            ],
            vec![],
            3,
        ),
        level1,
    );
    assert_eq!(run_ok(main, &[]), vec![Value::Integer(31)]);
}

/// TBC on a value without `__close` (and not nil/false) faults.
#[test]
fn tbc_requires_a_close_metamethod() {
    let p = proto(vec![op::loadi(0, 1), op::tbc(0), op::return0()], vec![], 1);
    assert_eq!(run_err(p, &[]).fault(), Some(Fault::NoCloseMetamethod));
}

#[test]
fn tbc_on_false_and_nil_is_inert() {
    let p = proto(
        vec![
            op::loadfalse(0),
            op::tbc(0),
            op::loadnil(1, 0),
            op::tbc(1),
            op::loadi(0, 1),
            op::return_(0, 2, 0),
        ],
        vec![],
        2,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Integer(1)]);
}

fn counting_close(vm: &mut Interpreter, call: NativeCall) -> Result<NativeOutcome, RuntimeError> {
    let n = match vm.global_get("closed") {
        Value::Integer(i) => i + 1,
        _ => 1,
    };
    vm.global_set("closed", Value::Integer(n));
    // Remember whether an error value accompanied the close.
    let err = vm.native_arg(call, 1);
    vm.global_set("close_err", err);
    Ok(vm.native_return(call, &[]))
}

fn vm_with_closeable() -> (Interpreter, Value) {
    let mut vm = vm();
    vm.register_native(21, counting_close);
    let obj = vm.new_table_value();
    let mt = vm.new_table_value();
    let key = vm.new_string("__close");
    let handler = vm.native_closure(21);
    vm.table_raw_set(mt, key, handler).unwrap();
    vm.set_metatable_value(obj, mt);
    (vm, obj)
}

/// A TBC slot's `__close` runs exactly once on normal scope exit.
#[test]
fn close_runs_once_on_return() {
    let (mut vm, obj) = vm_with_closeable();
    // f(obj): mark TBC; return 1
    let p = {
        let mut p = proto(
            vec![
                op::tbc(0),
                op::loadi(1, 1),
                op::return_(1, 2, 0),
            ],
            vec![],
            2,
        );
        p.numparams = 1;
        p
    };
    let results = run(&mut vm, p, &[obj]).unwrap();
    assert_eq!(results, vec![Value::Integer(1)]);
    assert_eq!(vm.global_get("closed"), Value::Integer(1));
    assert_eq!(vm.global_get("close_err"), Value::Nil);
}

/// Unwinding to a protected frame closes TBC slots exactly once, passing
/// the in-flight error.
#[test]
fn pcall_unwinding_invokes_close_with_the_error() {
    let (mut vm, obj) = vm_with_closeable();
    // f(obj): mark TBC; index nil; unreachable return
    let f = {
        let mut p = proto(
            vec![
                op::tbc(0),
                op::loadnil(1, 0),
                op::getfield(2, 1, 0),
                op::return0(),
            ],
            vec![Constant::Str(b"x".to_vec())],
            3,
        );
        p.numparams = 1;
        p
    };
    // main(obj): return pcall(f, obj)
    let main = {
        let mut p = with_child(
            proto(
                vec![
                    op::closure(2, 0),
                    op::move_(3, 0),
                    op::pcall(1, 2, 3),
                    op::return_(1, 3, 0),
                ],
                vec![],
                5,
            ),
            f,
        );
        p.numparams = 1;
        p
    };
    let results = run(&mut vm, main, &[obj]).unwrap();
    assert_eq!(results[0], Value::Boolean(false));
    assert!(matches!(results[1], Value::Str(_)));
    assert_eq!(vm.global_get("closed"), Value::Integer(1));
    assert!(matches!(vm.global_get("close_err"), Value::Str(_)));
}

/// CLOSE invokes `__close` for marked slots at or above the operand.
#[test]
fn close_opcode_fires_tbc_handlers() {
    let (mut vm, obj) = vm_with_closeable();
    let p = {
        let mut p = proto(
            vec![
                op::tbc(0),
                op::close(0),
                op::loadi(1, 1),
                op::return_(1, 2, 0),
            ],
            vec![],
            2,
        );
        p.numparams = 1;
        p
    };
    let results = run(&mut vm, p, &[obj]).unwrap();
    assert_eq!(results, vec![Value::Integer(1)]);
    // Once at CLOSE; the mark is consumed, so the return does not re-run
    // the handler.
    assert_eq!(vm.global_get("closed"), Value::Integer(1));
}

/// Multiple TBC slots close in LIFO order.
#[test]
fn tbc_slots_close_in_lifo_order() {
    fn order_close(vm: &mut Interpreter, call: NativeCall) -> Result<NativeOutcome, RuntimeError> {
        let obj = vm.native_arg(call, 0);
        let tag_key = vm.new_string("tag");
        let tag = vm.table_raw_get(obj, tag_key);
        let prev = vm.global_get("order");
        let prev_bytes = vm
            .str_value_bytes(prev)
            .map(|b| b.to_vec())
            .unwrap_or_default();
        let tag_bytes = vm
            .str_value_bytes(tag)
            .map(|b| b.to_vec())
            .unwrap_or_default();
        let mut joined = prev_bytes;
        joined.extend_from_slice(&tag_bytes);
        let joined = vm.new_string(joined);
        vm.global_set("order", joined);
        Ok(vm.native_return(call, &[]))
    }

    let mut vm = vm();
    vm.register_native(22, order_close);
    let mt = vm.new_table_value();
    let key = vm.new_string("__close");
    let handler = vm.native_closure(22);
    vm.table_raw_set(mt, key, handler).unwrap();

    let mut objs = Vec::new();
    for tag in ["a", "b"] {
        let obj = vm.new_table_value();
        let tag_key = vm.new_string("tag");
        let tag_val = vm.new_string(tag);
        vm.table_raw_set(obj, tag_key, tag_val).unwrap();
        vm.set_metatable_value(obj, mt);
        objs.push(obj);
    }

    // f(a, b): mark both; return
    let p = {
        let mut p = proto(
            vec![op::tbc(0), op::tbc(1), op::return0()],
            vec![],
            2,
        );
        p.numparams = 2;
        p
    };
    run(&mut vm, p, &[objs[0], objs[1]]).unwrap();
    // R1 ("b") closes before R0 ("a").
    let order = vm.global_get("order");
    assert_eq!(str_result(&vm, order), b"ba".to_vec());
}
