//! Binary image round-trips through the full runtime.

mod test_helpers;

use std::rc::Rc;

use moon_asm::op;
use moon_vm::bytecode::{dump, load};
use moon_vm::prelude::*;
use test_helpers::*;

fn adder_program() -> Proto {
    // main: f = <closure>; return f(40) + 2
    let f = {
        let mut p = proto(vec![op::addi(1, 0, 1), op::return_(1, 2, 0)], vec![], 2);
        p.numparams = 1;
        p
    };
    let mut main = proto(
        vec![
            op::closure(0, 0),
            op::loadi(1, 40),
            op::call(0, 2, 2),
            op::addi(0, 0, 1),
            op::return_(0, 2, 0),
        ],
        vec![],
        2,
    );
    main.protos = vec![Rc::new(f)];
    main.source = Some("adder.moon".into());
    main.lineinfo = vec![1, 2, 2, 3, 3];
    main
}

#[test]
fn load_of_dump_is_identity() {
    let program = adder_program();
    assert_eq!(load(&dump(&program, false)).unwrap(), program);
}

#[test]
fn dumped_program_still_runs_after_loading() {
    let image = dump(&adder_program(), false);
    let mut vm = vm();
    let closure = vm.load_image(&image).unwrap();
    assert_eq!(vm.call(closure, &[]).unwrap(), vec![Value::Integer(42)]);
}

#[test]
fn stripped_image_runs_but_reports_no_lines() {
    let image = dump(&adder_program(), true);
    let mut vm = vm();
    let closure = vm.load_image(&image).unwrap();
    assert_eq!(vm.call(closure, &[]).unwrap(), vec![Value::Integer(42)]);
}

#[test]
fn image_with_bad_signature_is_rejected() {
    let mut image = dump(&adder_program(), true);
    image[1] = b'?';
    let mut vm = vm();
    match vm.load_image(&image) {
        Err(VmError::Image(_)) => {}
        other => panic!("expected an image rejection, got {other:?}"),
    }
}

#[test]
fn runtime_errors_carry_lines_from_loaded_images() {
    // One instruction per line; the faulting GETI sits on line 2.
    let mut p = proto(
        vec![
            op::loadnil(0, 0),
            op::geti(1, 0, 1),
            op::return0(),
        ],
        vec![],
        2,
    );
    p.source = Some("boom.moon".into());
    p.lineinfo = vec![1, 2, 3];

    let image = dump(&p, false);
    let mut vm = vm();
    let closure = vm.load_image(&image).unwrap();
    match vm.call(closure, &[]) {
        Err(VmError::Fault {
            fault,
            line,
            source_name,
        }) => {
            assert_eq!(fault, Fault::InvalidTableOperation);
            assert_eq!(line, Some(2));
            assert_eq!(source_name.as_deref(), Some("boom.moon"));
        }
        other => panic!("expected a located fault, got {other:?}"),
    }
}
