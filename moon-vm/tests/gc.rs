//! Collection and finalization observed through whole programs.

mod test_helpers;

use moon_asm::op;
use moon_vm::prelude::*;
use test_helpers::*;

/// Host-held values survive collection once anchored; globals are roots
/// on their own.
#[test]
fn anchored_results_and_globals_survive_collection() {
    let mut vm = vm();
    let p = proto(
        vec![op::loadk(0, 0), op::return_(0, 2, 0)],
        vec![Constant::Str(b"keepsake".to_vec())],
        1,
    );
    let results = run(&mut vm, p, &[]).unwrap();
    vm.anchor(results[0]);
    vm.global_set("kept", results[0]);

    vm.collect_garbage();
    vm.collect_garbage();

    assert_eq!(str_result(&vm, results[0]), b"keepsake".to_vec());
    assert_eq!(vm.global_get("kept"), results[0]);
}

fn finalizer(vm: &mut Interpreter, call: NativeCall) -> Result<NativeOutcome, RuntimeError> {
    let n = match vm.global_get("finalized") {
        Value::Integer(i) => i + 1,
        _ => 1,
    };
    vm.global_set("finalized", Value::Integer(n));
    Ok(vm.native_return(call, &[]))
}

fn mktable(vm: &mut Interpreter, call: NativeCall) -> Result<NativeOutcome, RuntimeError> {
    let t = vm.new_table_value();
    let mt = vm.global_get("gc_mt");
    vm.set_metatable_value(t, mt);
    Ok(vm.native_return(call, &[t]))
}

#[test]
fn unreachable_tables_with_gc_are_finalized_once() {
    let mut vm = vm();
    vm.register_native(40, finalizer);
    vm.register_native(41, mktable);
    let mt = vm.new_table_value();
    let gc_key = vm.new_string("__gc");
    let h = vm.native_closure(40);
    vm.table_raw_set(mt, gc_key, h).unwrap();
    vm.global_set("gc_mt", mt);
    let mk = vm.native_closure(41);
    vm.global_set("mktable", mk);

    // f(): for i = 1, 5 do local t = mktable() end
    let p = proto_with_upvalues(
        vec![
            op::loadi(1, 1),
            op::loadi(2, 5),
            op::loadi(3, 1),
            op::forprep(1, 2),
            op::gettabup(5, 0, 0),
            op::call(5, 1, 2),
            op::forloop(1, 3),
            op::return0(),
        ],
        vec![Constant::Str(b"mktable".to_vec())],
        vec![env_upvalue()],
        7,
    );
    run(&mut vm, p, &[]).unwrap();

    // First cycle queues the dead tables; draining runs each __gc once;
    // the next cycle frees them for good.
    vm.collect_garbage();
    vm.run_pending_finalizers();
    vm.collect_garbage();
    vm.run_pending_finalizers();

    assert_eq!(vm.global_get("finalized"), Value::Integer(5));
}

/// A resurrected finalizable object is not finalized a second time.
#[test]
fn finalizers_do_not_rerun_after_resurrection() {
    fn resurrect(vm: &mut Interpreter, call: NativeCall) -> Result<NativeOutcome, RuntimeError> {
        let obj = vm.native_arg(call, 0);
        vm.global_set("saved", obj);
        let n = match vm.global_get("finalized") {
            Value::Integer(i) => i + 1,
            _ => 1,
        };
        vm.global_set("finalized", Value::Integer(n));
        Ok(vm.native_return(call, &[]))
    }

    let mut vm = vm();
    vm.register_native(42, resurrect);
    vm.register_native(41, mktable);
    let mt = vm.new_table_value();
    let gc_key = vm.new_string("__gc");
    let h = vm.native_closure(42);
    vm.table_raw_set(mt, gc_key, h).unwrap();
    vm.global_set("gc_mt", mt);
    let mk = vm.native_closure(41);
    vm.global_set("mktable", mk);

    // Create one finalizable table and drop it.
    let p = proto_with_upvalues(
        vec![
            op::gettabup(0, 0, 0),
            op::call(0, 1, 2),
            op::loadnil(0, 0),
            op::return0(),
        ],
        vec![Constant::Str(b"mktable".to_vec())],
        vec![env_upvalue()],
        2,
    );
    run(&mut vm, p, &[]).unwrap();

    vm.collect_garbage();
    vm.run_pending_finalizers();
    assert_eq!(vm.global_get("finalized"), Value::Integer(1));
    assert!(matches!(vm.global_get("saved"), Value::Table(_)));

    // The finalizer resurrected it into a global; further cycles must
    // neither collect nor re-finalize it.
    vm.collect_garbage();
    vm.run_pending_finalizers();
    assert_eq!(vm.global_get("finalized"), Value::Integer(1));
    assert!(matches!(vm.global_get("saved"), Value::Table(_)));
}
