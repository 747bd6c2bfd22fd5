//! Numeric semantics: promotion, Lua-style floor division and modulo,
//! exact-integer bitwise operands, and direction-reversing shifts.

use moon_asm::Fault;

use crate::value::Value;

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
}

/// Apply `op`. `Ok(None)` means an operand was not numeric and the
/// metamethod path decides; `Err` means the operands were numeric but the
/// operation is undefined on them.
pub(crate) fn arith(op: ArithOp, a: Value, b: Value) -> Result<Option<Value>, Fault> {
    match op {
        ArithOp::Add => additive(a, b, i64::wrapping_add, |x, y| x + y),
        ArithOp::Sub => additive(a, b, i64::wrapping_sub, |x, y| x - y),
        ArithOp::Mul => additive(a, b, i64::wrapping_mul, |x, y| x * y),
        ArithOp::Div => {
            let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
                return Ok(None);
            };
            Ok(Some(Value::Float(x / y)))
        }
        ArithOp::Pow => {
            let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
                return Ok(None);
            };
            Ok(Some(Value::Float(x.powf(y))))
        }
        ArithOp::IDiv => match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => {
                if y == 0 {
                    Err(Fault::ArithmeticError)
                } else {
                    Ok(Some(Value::Integer(floor_div(x, y))))
                }
            }
            _ => {
                let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
                    return Ok(None);
                };
                Ok(Some(Value::Float((x / y).floor())))
            }
        },
        ArithOp::Mod => match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => {
                if y == 0 {
                    Err(Fault::ArithmeticError)
                } else {
                    Ok(Some(Value::Integer(floor_mod(x, y))))
                }
            }
            _ => {
                let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
                    return Ok(None);
                };
                Ok(Some(Value::Float(x - (x / y).floor() * y)))
            }
        },
        ArithOp::BAnd => bitwise(a, b, |x, y| x & y),
        ArithOp::BOr => bitwise(a, b, |x, y| x | y),
        ArithOp::BXor => bitwise(a, b, |x, y| x ^ y),
        ArithOp::Shl => bitwise(a, b, |x, n| shift_left(x, n)),
        ArithOp::Shr => bitwise(a, b, |x, n| shift_left(x, n.saturating_neg())),
    }
}

/// `+`, `-`, `*`: integer pairs stay integer with wraparound; any float
/// operand promotes both to float.
fn additive(
    a: Value,
    b: Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Option<Value>, Fault> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(Some(Value::Integer(int_op(x, y)))),
        _ => {
            let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
                return Ok(None);
            };
            Ok(Some(Value::Float(float_op(x, y))))
        }
    }
}

/// Bitwise operands must be exact integers; inexact numerics fail, and
/// non-numerics defer to the metamethod path.
fn bitwise(a: Value, b: Value, op: fn(i64, i64) -> i64) -> Result<Option<Value>, Fault> {
    if !a.is_number() || !b.is_number() {
        return Ok(None);
    }
    let (Some(x), Some(y)) = (a.to_integer_exact(), b.to_integer_exact()) else {
        return Err(Fault::ArithmeticError);
    };
    Ok(Some(Value::Integer(op(x, y))))
}

/// Shift left by `n`; negative `n` reverses direction, magnitudes of 64
/// or more produce zero.
fn shift_left(x: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((x as u64) << n) as i64
    } else {
        x >> -n
    }
}

/// Floor division with the quotient rounded toward negative infinity.
fn floor_div(x: i64, y: i64) -> i64 {
    let q = x.wrapping_div(y);
    let r = x.wrapping_rem(y);
    if r != 0 && (r < 0) != (y < 0) {
        q.wrapping_sub(1)
    } else {
        q
    }
}

/// Lua modulo: the sign follows the divisor.
fn floor_mod(x: i64, y: i64) -> i64 {
    let r = x.wrapping_rem(y);
    if r != 0 && (r < 0) != (y < 0) {
        r.wrapping_add(y)
    } else {
        r
    }
}

/// Integer negation or float negation; `None` defers to `__unm`.
pub(crate) fn negate(v: Value) -> Option<Value> {
    match v {
        Value::Integer(i) => Some(Value::Integer(i.wrapping_neg())),
        Value::Float(f) => Some(Value::Float(-f)),
        _ => None,
    }
}

/// Numeric comparison across the integer/float bridge. `None` when either
/// operand is not numeric.
pub(crate) fn num_lt(a: Value, b: Value) -> Option<bool> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x < y),
        _ => {
            let (x, y) = (a.as_number()?, b.as_number()?);
            Some(x < y)
        }
    }
}

/// Numeric `<=` mirroring [`num_lt`].
pub(crate) fn num_le(a: Value, b: Value) -> Option<bool> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(x <= y),
        _ => {
            let (x, y) = (a.as_number()?, b.as_number()?);
            Some(x <= y)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ArithOp::Add, Value::Integer(2), Value::Integer(3), Value::Integer(5))]
    #[case(ArithOp::Add, Value::Integer(2), Value::Float(0.5), Value::Float(2.5))]
    #[case(ArithOp::Sub, Value::Integer(i64::MIN), Value::Integer(1), Value::Integer(i64::MAX))]
    #[case(ArithOp::Mul, Value::Integer(4), Value::Integer(-3), Value::Integer(-12))]
    #[case(ArithOp::Div, Value::Integer(1), Value::Integer(2), Value::Float(0.5))]
    #[case(ArithOp::Pow, Value::Integer(2), Value::Integer(10), Value::Float(1024.0))]
    #[case(ArithOp::IDiv, Value::Integer(7), Value::Integer(2), Value::Integer(3))]
    #[case(ArithOp::IDiv, Value::Integer(-7), Value::Integer(2), Value::Integer(-4))]
    #[case(ArithOp::IDiv, Value::Float(7.0), Value::Integer(2), Value::Float(3.0))]
    #[case(ArithOp::Mod, Value::Integer(7), Value::Integer(3), Value::Integer(1))]
    #[case(ArithOp::Mod, Value::Integer(-7), Value::Integer(3), Value::Integer(2))]
    #[case(ArithOp::Mod, Value::Integer(7), Value::Integer(-3), Value::Integer(-2))]
    #[case(ArithOp::BAnd, Value::Integer(0b1100), Value::Integer(0b1010), Value::Integer(0b1000))]
    #[case(ArithOp::BAnd, Value::Float(12.0), Value::Integer(10), Value::Integer(8))]
    #[case(ArithOp::Shl, Value::Integer(1), Value::Integer(4), Value::Integer(16))]
    #[case(ArithOp::Shl, Value::Integer(16), Value::Integer(-4), Value::Integer(1))]
    #[case(ArithOp::Shl, Value::Integer(1), Value::Integer(64), Value::Integer(0))]
    #[case(ArithOp::Shr, Value::Integer(16), Value::Integer(2), Value::Integer(4))]
    #[case(ArithOp::Shr, Value::Integer(1), Value::Integer(-4), Value::Integer(16))]
    #[case(ArithOp::Shr, Value::Integer(-1), Value::Integer(64), Value::Integer(0))]
    fn arithmetic_cases(
        #[case] op: ArithOp,
        #[case] a: Value,
        #[case] b: Value,
        #[case] expected: Value,
    ) {
        assert_eq!(arith(op, a, b), Ok(Some(expected)));
    }

    #[rstest]
    #[case(ArithOp::IDiv)]
    #[case(ArithOp::Mod)]
    fn integer_zero_divisor_faults(#[case] op: ArithOp) {
        assert_eq!(
            arith(op, Value::Integer(1), Value::Integer(0)),
            Err(Fault::ArithmeticError)
        );
    }

    #[test]
    fn float_division_by_zero_is_infinite() {
        let Ok(Some(Value::Float(f))) =
            arith(ArithOp::Div, Value::Integer(1), Value::Integer(0))
        else {
            panic!("expected a float result");
        };
        assert!(f.is_infinite());
    }

    #[test]
    fn inexact_bitwise_operand_faults() {
        assert_eq!(
            arith(ArithOp::BOr, Value::Float(1.5), Value::Integer(0)),
            Err(Fault::ArithmeticError)
        );
    }

    #[test]
    fn non_numeric_operands_defer_to_metamethods() {
        assert_eq!(arith(ArithOp::Add, Value::Nil, Value::Integer(1)), Ok(None));
        assert_eq!(
            arith(ArithOp::BAnd, Value::Boolean(true), Value::Integer(1)),
            Ok(None)
        );
    }

    #[test]
    fn nan_comparisons_are_false() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(num_lt(nan, nan), Some(false));
        assert_eq!(num_le(nan, Value::Integer(1)), Some(false));
        assert_eq!(num_lt(Value::Integer(1), nan), Some(false));
    }
}
