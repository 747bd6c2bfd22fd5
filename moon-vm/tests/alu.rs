//! Arithmetic, comparison, and logic instruction behavior.

mod test_helpers;

use moon_asm::op;
use moon_vm::prelude::*;
use test_helpers::*;

#[test]
fn integer_arithmetic_with_precedence() {
    // return 1 + 2 * 3
    let p = proto(
        vec![
            op::loadi(0, 1),
            op::loadi(1, 2),
            op::loadi(2, 3),
            op::mul(1, 1, 2),
            op::add(0, 0, 1),
            op::return_(0, 2, 0),
        ],
        vec![],
        3,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Integer(7)]);
}

#[test]
fn mixed_operands_promote_to_float() {
    let p = proto(
        vec![
            op::loadi(0, 2),
            op::loadf(1, 3),
            op::add(0, 0, 1),
            op::return_(0, 2, 0),
        ],
        vec![],
        2,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Float(5.0)]);
}

#[test]
fn division_is_always_float() {
    let p = proto(
        vec![
            op::loadi(0, 1),
            op::loadi(1, 2),
            op::div(0, 0, 1),
            op::return_(0, 2, 0),
        ],
        vec![],
        2,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Float(0.5)]);
}

#[test]
fn floor_division_and_modulo_follow_the_divisor_sign() {
    let p = proto(
        vec![
            op::loadi(0, -7),
            op::loadi(1, 2),
            op::idiv(2, 0, 1),
            op::loadi(3, 3),
            op::mod_(3, 0, 3),
            op::return_(2, 3, 0),
        ],
        vec![],
        4,
    );
    assert_eq!(
        run_ok(p, &[]),
        vec![Value::Integer(-4), Value::Integer(2)]
    );
}

#[test]
fn integer_division_by_zero_faults() {
    let p = proto(
        vec![
            op::loadi(0, 1),
            op::loadi(1, 0),
            op::idiv(0, 0, 1),
            op::return0(),
        ],
        vec![],
        2,
    );
    assert_eq!(run_err(p, &[]).fault(), Some(Fault::ArithmeticError));
}

#[test]
fn bitwise_requires_exact_integers() {
    let p = proto(
        vec![
            op::loadk(0, 0),
            op::loadi(1, 1),
            op::band(0, 0, 1),
            op::return0(),
        ],
        vec![Constant::Float(1.5)],
        2,
    );
    assert_eq!(run_err(p, &[]).fault(), Some(Fault::ArithmeticError));
}

#[test]
fn exact_float_bitwise_operands_are_accepted() {
    let p = proto(
        vec![
            op::loadk(0, 0),
            op::loadi(1, 10),
            op::band(0, 0, 1),
            op::return_(0, 2, 0),
        ],
        vec![Constant::Float(12.0)],
        2,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Integer(8)]);
}

#[test]
fn shift_immediates_reverse_on_negative_amounts() {
    let p = proto(
        vec![
            op::loadi(0, 16),
            op::shri(1, 0, 2),
            op::shri(2, 0, -2),
            op::shli(3, 0, 60),
            op::return_(1, 4, 0),
        ],
        vec![],
        4,
    );
    assert_eq!(
        run_ok(p, &[]),
        vec![
            Value::Integer(4),
            Value::Integer(64),
            Value::Integer(16i64 << 60),
        ]
    );
}

#[test]
fn addk_reads_the_constant_pool() {
    let p = proto(
        vec![
            op::loadi(0, 40),
            op::addk(0, 0, 0),
            op::return_(0, 2, 0),
        ],
        vec![Constant::Integer(2)],
        1,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Integer(42)]);
}

#[test]
fn integer_add_wraps() {
    let p = proto(
        vec![
            op::loadk(0, 0),
            op::addi(0, 0, 1),
            op::return_(0, 2, 0),
        ],
        vec![Constant::Integer(i64::MAX)],
        1,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Integer(i64::MIN)]);
}

/// `EQ` with NaN: the comparison is false, so the truth-returning branch
/// is skipped.
#[test]
fn nan_is_not_equal_to_itself() {
    let cmp = |k: Constant| {
        proto(
            vec![
                op::loadk(0, 0),
                op::loadfalse(1),
                op::eq(true, 0, 0),
                op::loadtrue(1),
                op::return_(1, 2, 0),
            ],
            vec![k],
            2,
        )
    };
    assert_eq!(
        run_ok(cmp(Constant::Float(f64::NAN)), &[]),
        vec![Value::Boolean(false)]
    );
    assert_eq!(
        run_ok(cmp(Constant::Integer(1)), &[]),
        vec![Value::Boolean(true)]
    );
}

#[test]
fn nan_orderings_are_all_false() {
    for cmp in [op::lt(true, 0, 0), op::le(true, 0, 0)] {
        let p = proto(
            vec![
                op::loadk(0, 0),
                op::loadfalse(1),
                cmp,
                op::loadtrue(1),
                op::return_(1, 2, 0),
            ],
            vec![Constant::Float(f64::NAN)],
            2,
        );
        assert_eq!(run_ok(p, &[]), vec![Value::Boolean(false)]);
    }
}

#[test]
fn integer_float_bridge_in_eq() {
    let p = proto(
        vec![
            op::loadi(0, 3),
            op::loadk(1, 0),
            op::loadfalse(2),
            op::eq(true, 0, 1),
            op::loadtrue(2),
            op::return_(2, 2, 0),
        ],
        vec![Constant::Float(3.0)],
        3,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Boolean(true)]);
}

#[test]
fn comparison_immediates_use_the_signed_bias() {
    // return x > -3  (via GTI)
    let p = proto(
        vec![
            op::loadi(0, -2),
            op::loadfalse(1),
            op::gti(true, 0, -3),
            op::loadtrue(1),
            op::return_(1, 2, 0),
        ],
        vec![],
        2,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Boolean(true)]);
}

#[test]
fn string_ordering_is_lexicographic() {
    let p = proto(
        vec![
            op::loadk(0, 0),
            op::loadk(1, 1),
            op::loadfalse(2),
            op::lt(true, 0, 1),
            op::loadtrue(2),
            op::return_(2, 2, 0),
        ],
        vec![
            Constant::Str(b"apple".to_vec()),
            Constant::Str(b"banana".to_vec()),
        ],
        3,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Boolean(true)]);
}

#[test]
fn unary_minus_and_not_and_bnot() {
    let p = proto(
        vec![
            op::loadi(0, 5),
            op::unm(1, 0),
            op::not(2, 0),
            op::bnot(3, 0),
            op::return_(1, 4, 0),
        ],
        vec![],
        4,
    );
    assert_eq!(
        run_ok(p, &[]),
        vec![
            Value::Integer(-5),
            Value::Boolean(false),
            Value::Integer(!5),
        ]
    );
}

#[test]
fn testset_copies_on_matching_truthiness() {
    // R1 := R0 if truthy, else R1 stays nil and the jump is skipped.
    let p = proto(
        vec![
            op::loadi(0, 7),
            op::loadnil(1, 0),
            op::testset(1, 0, true),
            op::jmp(0),
            op::return_(1, 2, 0),
        ],
        vec![],
        2,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Integer(7)]);
}

#[test]
fn lfalseskip_produces_false_and_skips() {
    let p = proto(
        vec![
            op::lfalseskip(0),
            op::loadtrue(0),
            op::return_(0, 2, 0),
        ],
        vec![],
        1,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Boolean(false)]);
}

#[test]
fn concat_renders_numbers_and_strings() {
    let p = proto(
        vec![
            op::loadk(0, 0),
            op::loadi(1, 1),
            op::loadf(2, 2),
            op::concat(0, 2),
            op::return_(0, 2, 0),
        ],
        vec![Constant::Str(b"x=".to_vec())],
        3,
    );
    let mut vm = vm();
    let results = run(&mut vm, p, &[]).unwrap();
    assert_eq!(str_result(&vm, results[0]), b"x=12.0".to_vec());
}

#[test]
fn arithmetic_metamethod_dispatches_through_the_hint() {
    fn mm_add(vm: &mut Interpreter, call: NativeCall) -> Result<NativeOutcome, RuntimeError> {
        let v = vm.native_arg(call, 1);
        let Value::Integer(i) = v else {
            return Err(vm.throw_message("expected integer rhs"));
        };
        Ok(vm.native_return(call, &[Value::Integer(i + 100)]))
    }

    let mut vm = vm();
    vm.register_native(7, mm_add);
    let table = vm.new_table_value();
    let mt = vm.new_table_value();
    let add_key = vm.new_string("__add");
    let handler = vm.native_closure(7);
    vm.table_raw_set(mt, add_key, handler).unwrap();
    vm.set_metatable_value(table, mt);

    // f(t, n) = t + n, with the MMBIN hint trailing the ADD.
    let p = {
        let mut p = proto(
            vec![
                op::add(2, 0, 1),
                op::mmbin(0, 1, moon_vm::meta::MetaEvent::Add as u8),
                op::return_(2, 2, 0),
            ],
            vec![],
            3,
        );
        p.numparams = 2;
        p
    };
    let results = run(&mut vm, p, &[table, Value::Integer(5)]).unwrap();
    assert_eq!(results, vec![Value::Integer(105)]);
}

#[test]
fn numeric_operands_skip_the_trailing_hint() {
    let p = proto(
        vec![
            op::loadi(0, 1),
            op::loadi(1, 2),
            op::add(2, 0, 1),
            op::mmbin(0, 1, moon_vm::meta::MetaEvent::Add as u8),
            op::return_(2, 2, 0),
        ],
        vec![],
        3,
    );
    assert_eq!(run_ok(p, &[]), vec![Value::Integer(3)]);
}

#[test]
fn arithmetic_on_nil_without_hint_faults() {
    let p = proto(
        vec![
            op::loadnil(0, 0),
            op::loadi(1, 1),
            op::add(0, 0, 1),
            op::return0(),
        ],
        vec![],
        2,
    );
    assert_eq!(run_err(p, &[]).fault(), Some(Fault::ArithmeticError));
}
