//! Scalar and row kernels behind the vectorized expression executor:
//! SQL comparison with numeric coercion, arithmetic, and LIKE matching.
//! Comparisons return `None` for NULL operands (three-valued logic).

use std::cmp::Ordering;

use quiver_expr::FuncSub;
use quiver_result::{Error, Result};
use quiver_types::{LType, LTypeId, Value};

/// SQL comparison across the numeric tower plus dates, strings, and
/// booleans. NULL compares as unknown.
pub fn compare_sql(a: &Value, b: &Value) -> Option<Ordering> {
    use Value::*;
    match (a, b) {
        (Null, _) | (_, Null) => None,
        (Boolean(x), Boolean(y)) => Some(x.cmp(y)),
        (Integer(x), Integer(y)) => Some(x.cmp(y)),
        (Integer(x), Decimal { value, scale }) => Some(cmp_scaled(*x, 0, *value, *scale)),
        (Decimal { value, scale }, Integer(y)) => Some(cmp_scaled(*value, *scale, *y, 0)),
        (
            Decimal {
                value: x,
                scale: sx,
            },
            Decimal {
                value: y,
                scale: sy,
            },
        ) => Some(cmp_scaled(*x, *sx, *y, *sy)),
        (Float(x), Float(y)) => Some(x.total_cmp(y)),
        (Float(x), _) => Some(x.total_cmp(&as_float(b)?)),
        (_, Float(y)) => Some(as_float(a)?.total_cmp(y)),
        (Date(x), Date(y)) => Some(x.cmp(y)),
        (Varchar(x), Varchar(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn cmp_scaled(a: i64, sa: u8, b: i64, sb: u8) -> Ordering {
    let left = (a as i128) * 10i128.pow(sb as u32);
    let right = (b as i128) * 10i128.pow(sa as u32);
    left.cmp(&right)
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        Value::Decimal { value, scale } => Some(*value as f64 / 10f64.powi(*scale as i32)),
        _ => None,
    }
}

/// True/false/unknown verdict of one comparison subtype.
pub fn comparison_verdict(sub: FuncSub, ord: Option<Ordering>) -> Option<bool> {
    let ord = ord?;
    Some(match sub {
        FuncSub::Equal => ord == Ordering::Equal,
        FuncSub::NotEqual => ord != Ordering::Equal,
        FuncSub::Greater => ord == Ordering::Greater,
        FuncSub::GreaterEqual => ord != Ordering::Less,
        FuncSub::Less => ord == Ordering::Less,
        FuncSub::LessEqual => ord != Ordering::Greater,
        _ => return None,
    })
}

fn decimal_parts(v: &Value) -> Option<(i64, u8)> {
    match v {
        Value::Integer(v) => Some((*v, 0)),
        Value::Decimal { value, scale } => Some((*value, *scale)),
        _ => None,
    }
}

fn rescale_i128(value: i128, from: u8, to: u8) -> i128 {
    match from.cmp(&to) {
        Ordering::Equal => value,
        Ordering::Less => value * 10i128.pow((to - from) as u32),
        Ordering::Greater => value / 10i128.pow((from - to) as u32),
    }
}

fn narrow(value: i128) -> Result<i64> {
    i64::try_from(value).map_err(|_| Error::invalid("decimal arithmetic overflow"))
}

/// Arithmetic dispatched on the planned result type.
pub fn arith_value(sub: FuncSub, a: &Value, b: &Value, out: LType) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    match out.id {
        LTypeId::Integer => {
            let (Value::Integer(x), Value::Integer(y)) = (a, b) else {
                return Err(Error::internal(format!(
                    "integer arithmetic over {a:?} and {b:?}"
                )));
            };
            let r = match sub {
                FuncSub::Add => x.checked_add(*y),
                FuncSub::Sub => x.checked_sub(*y),
                FuncSub::Mul => x.checked_mul(*y),
                FuncSub::Div => {
                    if *y == 0 {
                        return Err(Error::invalid("division by zero"));
                    }
                    x.checked_div(*y)
                }
                _ => None,
            };
            r.map(Value::Integer)
                .ok_or_else(|| Error::invalid("integer arithmetic overflow"))
        }
        LTypeId::Float => {
            let x = as_float(a)
                .ok_or_else(|| Error::internal(format!("float arithmetic over {a:?}")))?;
            let y = as_float(b)
                .ok_or_else(|| Error::internal(format!("float arithmetic over {b:?}")))?;
            let r = match sub {
                FuncSub::Add => x + y,
                FuncSub::Sub => x - y,
                FuncSub::Mul => x * y,
                FuncSub::Div => {
                    if y == 0.0 {
                        return Err(Error::invalid("division by zero"));
                    }
                    x / y
                }
                _ => return Err(Error::internal("non-arithmetic subtype")),
            };
            Ok(Value::Float(r))
        }
        LTypeId::Decimal => {
            let (x, sx) = decimal_parts(a)
                .ok_or_else(|| Error::internal(format!("decimal arithmetic over {a:?}")))?;
            let (y, sy) = decimal_parts(b)
                .ok_or_else(|| Error::internal(format!("decimal arithmetic over {b:?}")))?;
            let value = match sub {
                FuncSub::Add | FuncSub::Sub => {
                    let xs = rescale_i128(x as i128, sx, out.scale);
                    let ys = rescale_i128(y as i128, sy, out.scale);
                    if sub == FuncSub::Add {
                        xs + ys
                    } else {
                        xs - ys
                    }
                }
                FuncSub::Mul => {
                    // Multiplying payloads adds the scales.
                    rescale_i128((x as i128) * (y as i128), sx + sy, out.scale)
                }
                FuncSub::Div => {
                    if y == 0 {
                        return Err(Error::invalid("division by zero"));
                    }
                    // Widen the dividend to the output scale first.
                    rescale_i128(x as i128, sx, out.scale + sy) / (y as i128)
                }
                _ => return Err(Error::internal("non-arithmetic subtype")),
            };
            Ok(Value::Decimal {
                value: narrow(value)?,
                scale: out.scale,
            })
        }
        LTypeId::Date => {
            let (Value::Date(date), Value::Interval(interval)) = (a, b) else {
                return Err(Error::internal(format!(
                    "date arithmetic over {a:?} and {b:?}"
                )));
            };
            let negate = match sub {
                FuncSub::Add => false,
                FuncSub::Sub => true,
                _ => return Err(Error::internal("non-arithmetic subtype")),
            };
            Ok(Value::Date(date.add_interval(interval, negate)?))
        }
        other => Err(Error::internal(format!(
            "arithmetic producing {other:?}"
        ))),
    }
}

/// SQL LIKE: `%` matches any run, `_` matches one character.
pub fn like_match(text: &str, pattern: &str) -> bool {
    fn rec(t: &[u8], p: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'%') => rec(t, &p[1..]) || (!t.is_empty() && rec(&t[1..], p)),
            Some(b'_') => !t.is_empty() && rec(&t[1..], &p[1..]),
            Some(c) => !t.is_empty() && t[0] == *c && rec(&t[1..], &p[1..]),
        }
    }
    rec(text.as_bytes(), pattern.as_bytes())
}

/// Three-valued AND.
pub fn and3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

/// Three-valued OR.
pub fn or3(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}
