//! Shared builders for whole-program tests over hand-assembled protos.
#![allow(dead_code)]

use std::rc::Rc;

use moon_asm::Instruction;
use moon_vm::prelude::*;

/// Fresh runtime with default parameters.
pub fn vm() -> Interpreter {
    Interpreter::new(VmParams::default())
}

/// A leaf proto: code plus constants, no upvalues.
pub fn proto(code: Vec<Instruction>, k: Vec<Constant>, maxstacksize: u8) -> Proto {
    Proto {
        code,
        k,
        maxstacksize,
        ..Default::default()
    }
}

/// A proto with upvalue descriptors (slot 0 becomes `_ENV` when closed
/// over directly by the host).
pub fn proto_with_upvalues(
    code: Vec<Instruction>,
    k: Vec<Constant>,
    upvalues: Vec<UpvalDesc>,
    maxstacksize: u8,
) -> Proto {
    Proto {
        code,
        k,
        upvalues,
        maxstacksize,
        ..Default::default()
    }
}

/// The `_ENV` descriptor used by main chunks.
pub fn env_upvalue() -> UpvalDesc {
    UpvalDesc {
        instack: false,
        idx: 0,
    }
}

/// Wrap a child proto for `CLOSURE 0`.
pub fn with_child(mut parent: Proto, child: Proto) -> Proto {
    parent.protos.push(Rc::new(child));
    parent
}

/// Run a proto as the main chunk and return its results.
pub fn run(vm: &mut Interpreter, proto: Proto, args: &[Value]) -> Result<Vec<Value>, VmError> {
    let closure = vm.closure_from_proto(proto);
    vm.call(closure, args)
}

/// Run on a fresh VM, expecting success.
pub fn run_ok(proto: Proto, args: &[Value]) -> Vec<Value> {
    let mut vm = vm();
    run(&mut vm, proto, args).expect("program should succeed")
}

/// Run on a fresh VM, expecting an error.
pub fn run_err(proto: Proto, args: &[Value]) -> VmError {
    let mut vm = vm();
    run(&mut vm, proto, args).expect_err("program should fail")
}

/// The result string's bytes, for string-valued results.
pub fn str_result(vm: &Interpreter, v: Value) -> Vec<u8> {
    vm.str_value_bytes(v)
        .expect("expected a string result")
        .to_vec()
}
