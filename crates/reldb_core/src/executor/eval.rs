//! Expression evaluation.
//!
//! Follows SQL three-valued logic: comparisons and arithmetic involving
//! NULL yield NULL, `AND`/`OR` treat NULL as unknown, and a `WHERE` clause
//! keeps a row only when its condition is true.

use crate::error::{CoreError, CoreResult};
use crate::schema::TableSchema;
use crate::value::Value;
use reldb_sql::ast::{BinaryOp, ColumnRef, Expr, FunctionArgs, Literal, UnaryOp};
use reldb_sql::Placeholder;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Placeholder values resolved for one execution.
pub(crate) type Bindings = HashMap<Placeholder, Value>;

/// What an expression can see while it is evaluated.
#[derive(Clone, Copy)]
pub(crate) struct Env<'a> {
    /// Table the statement reads from, if any.
    pub(crate) source: Option<&'a TableSchema>,
    /// Current row of `source`. Absent when no row is in scope.
    pub(crate) row: Option<&'a [Value]>,
    pub(crate) bindings: &'a Bindings,
}

impl<'a> Env<'a> {
    pub(crate) fn new(source: Option<&'a TableSchema>, bindings: &'a Bindings) -> Self {
        Self {
            source,
            row: None,
            bindings,
        }
    }

    pub(crate) fn with_row(self, row: &'a [Value]) -> Self {
        Self {
            row: Some(row),
            ..self
        }
    }
}

/// Resolves a column reference against the source table.
pub(crate) fn column_index(column: &ColumnRef, source: Option<&TableSchema>) -> CoreResult<usize> {
    let unknown = || CoreError::unknown_column(column.to_string());
    let schema = source.ok_or_else(unknown)?;
    if let Some(table) = &column.table {
        if !table.eq_ignore_ascii_case(schema.name()) {
            return Err(unknown());
        }
    }
    schema.column_index(&column.name).ok_or_else(unknown)
}

/// Fails if `expr` names a column the source does not have.
pub(crate) fn check_columns(expr: &Expr, source: Option<&TableSchema>) -> CoreResult<()> {
    let mut failure = None;
    expr.walk(&mut |e| {
        if let Expr::Column(column) = e {
            if failure.is_none() {
                failure = column_index(column, source).err();
            }
        }
    });
    failure.map_or(Ok(()), Err)
}

/// Fails if `expr` calls an aggregate function.
pub(crate) fn reject_aggregates(expr: &Expr, clause: &str) -> CoreResult<()> {
    if expr.contains_aggregate() {
        return Err(CoreError::execution(format!(
            "aggregate functions are not allowed in {clause}"
        )));
    }
    Ok(())
}

/// SQL truth value: NULL is unknown, numbers are true when non-zero.
pub(crate) fn truth(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Integer(n) => Some(*n != 0),
        Value::Real(r) => Some(*r != 0.0),
        Value::Text(s) => Some(s.trim().parse::<f64>().is_ok_and(|n| n != 0.0)),
        Value::Blob(_) => Some(false),
    }
}

fn from_truth(truth: Option<bool>) -> Value {
    truth.map_or(Value::Null, Value::Bool)
}

/// Evaluates an expression.
pub(crate) fn eval(expr: &Expr, env: Env<'_>) -> CoreResult<Value> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::Null => Value::Null,
            Literal::Integer(n) => Value::Integer(*n),
            Literal::Real(r) => Value::Real(*r),
            Literal::String(s) => Value::Text(s.clone()),
            Literal::Boolean(b) => Value::Bool(*b),
        }),
        Expr::Column(column) => {
            let index = column_index(column, env.source)?;
            Ok(env.row.map_or(Value::Null, |row| row[index].clone()))
        }
        Expr::Placeholder(placeholder) => env.bindings.get(placeholder).cloned().ok_or_else(|| {
            CoreError::parameter(format!("a value is required for placeholder {placeholder}"))
        }),
        Expr::Unary { op, expr } => unary(*op, eval(expr, env)?),
        Expr::Binary { left, op, right } => match op {
            BinaryOp::And => {
                let l = truth(&eval(left, env)?);
                if l == Some(false) {
                    return Ok(Value::Bool(false));
                }
                let r = truth(&eval(right, env)?);
                Ok(from_truth(match (l, r) {
                    (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }))
            }
            BinaryOp::Or => {
                let l = truth(&eval(left, env)?);
                if l == Some(true) {
                    return Ok(Value::Bool(true));
                }
                let r = truth(&eval(right, env)?);
                Ok(from_truth(match (l, r) {
                    (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }))
            }
            op => binary(*op, &eval(left, env)?, &eval(right, env)?),
        },
        Expr::IsNull { expr, negated } => {
            let is_null = eval(expr, env)?.is_null();
            Ok(Value::Bool(is_null != *negated))
        }
        Expr::Like {
            expr,
            pattern,
            negated,
        } => {
            let value = eval(expr, env)?;
            let pattern = eval(pattern, env)?;
            if value.is_null() || pattern.is_null() {
                return Ok(Value::Null);
            }
            let text: Vec<char> = value.to_string().chars().collect();
            let pattern: Vec<char> = pattern.to_string().chars().collect();
            Ok(Value::Bool(like(&text, &pattern) != *negated))
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let value = eval(expr, env)?;
            if value.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                let candidate = eval(item, env)?;
                if candidate.is_null() {
                    saw_null = true;
                } else if candidate == value {
                    return Ok(Value::Bool(!*negated));
                }
            }
            Ok(if saw_null {
                Value::Null
            } else {
                Value::Bool(*negated)
            })
        }
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let value = eval(expr, env)?;
            let low = compare(BinaryOp::GtEq, &value, &eval(low, env)?);
            let high = compare(BinaryOp::LtEq, &value, &eval(high, env)?);
            let inside = match (truth(&low), truth(&high)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            Ok(from_truth(inside.map(|b| b != *negated)))
        }
        Expr::Function { name, args } => {
            if reldb_sql::ast::is_aggregate(name) {
                return Err(CoreError::execution(format!(
                    "misuse of aggregate function {name}()"
                )));
            }
            let FunctionArgs::List(list) = args else {
                return Err(CoreError::execution(format!(
                    "{name}(*) is only valid for count"
                )));
            };
            let values = list
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<CoreResult<Vec<_>>>()?;
            scalar_function(name, values)
        }
    }
}

fn unary(op: UnaryOp, value: Value) -> CoreResult<Value> {
    match op {
        UnaryOp::Not => Ok(from_truth(truth(&value).map(|b| !b))),
        UnaryOp::Plus => Ok(value),
        UnaryOp::Neg => match numeric(&value, "-")? {
            None => Ok(Value::Null),
            Some(Number::Int(n)) => n
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(overflow),
            Some(Number::Real(r)) => Ok(Value::Real(-r)),
        },
    }
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Real(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Real(r) => r,
        }
    }
}

fn overflow() -> CoreError {
    CoreError::execution("integer overflow")
}

/// Reads a value as a number; NULL gives `None`.
fn numeric(value: &Value, op: &str) -> CoreResult<Option<Number>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(n) => Ok(Some(Number::Int(*n))),
        Value::Bool(b) => Ok(Some(Number::Int(i64::from(*b)))),
        Value::Real(r) => Ok(Some(Number::Real(*r))),
        Value::Text(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                Ok(Some(Number::Int(n)))
            } else if let Ok(r) = s.parse::<f64>() {
                Ok(Some(Number::Real(r)))
            } else {
                Err(CoreError::execution(format!(
                    "cannot apply {op} to text value {}",
                    value.to_sql_literal()
                )))
            }
        }
        Value::Blob(_) => Err(CoreError::execution(format!(
            "cannot apply {op} to a blob value"
        ))),
    }
}

fn comparison(op: BinaryOp) -> Option<fn(Ordering) -> bool> {
    Some(match op {
        BinaryOp::Eq => Ordering::is_eq,
        BinaryOp::NotEq => Ordering::is_ne,
        BinaryOp::Lt => Ordering::is_lt,
        BinaryOp::LtEq => Ordering::is_le,
        BinaryOp::Gt => Ordering::is_gt,
        BinaryOp::GtEq => Ordering::is_ge,
        _ => return None,
    })
}

/// Compares two values; NULL on either side gives NULL.
fn compare(op: BinaryOp, left: &Value, right: &Value) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    match comparison(op) {
        Some(test) => Value::Bool(test(left.cmp(right))),
        None => Value::Null,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> CoreResult<Value> {
    if comparison(op).is_some() {
        return Ok(compare(op, left, right));
    }
    if op == BinaryOp::Concat {
        if left.is_null() || right.is_null() {
            return Ok(Value::Null);
        }
        return Ok(Value::Text(format!("{left}{right}")));
    }

    let symbol = op.to_string();
    let (Some(l), Some(r)) = (numeric(left, &symbol)?, numeric(right, &symbol)?) else {
        return Ok(Value::Null);
    };
    match (l, r) {
        (Number::Int(a), Number::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div | BinaryOp::Mod if b == 0 => return Ok(Value::Null),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod => a.checked_rem(b),
                _ => return Err(CoreError::execution(format!("unsupported operator {op}"))),
            };
            result.map(Value::Integer).ok_or_else(overflow)
        }
        (l, r) => {
            let (a, b) = (l.as_f64(), r.as_f64());
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Mod if b == 0.0 => return Ok(Value::Null),
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                _ => return Err(CoreError::execution(format!("unsupported operator {op}"))),
            };
            Ok(Value::Real(result))
        }
    }
}

/// `LIKE` matching: `%` matches any run, `_` any single character, ASCII
/// letters match regardless of case.
fn like(text: &[char], pattern: &[char]) -> bool {
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len()
            && (pattern[p] == '_' || pattern[p].eq_ignore_ascii_case(&text[t]))
        {
            p += 1;
            t += 1;
        } else if let Some((star, from)) = backtrack {
            p = star + 1;
            t = from + 1;
            backtrack = Some((star, from + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

fn arity(name: &str, values: &[Value], expected: std::ops::RangeInclusive<usize>) -> CoreResult<()> {
    if expected.contains(&values.len()) {
        Ok(())
    } else {
        Err(CoreError::execution(format!(
            "wrong number of arguments to function {name}()"
        )))
    }
}

fn scalar_function(name: &str, mut values: Vec<Value>) -> CoreResult<Value> {
    match name {
        "lower" | "upper" => {
            arity(name, &values, 1..=1)?;
            Ok(match values.swap_remove(0) {
                Value::Null => Value::Null,
                v if name == "lower" => Value::Text(v.to_string().to_lowercase()),
                v => Value::Text(v.to_string().to_uppercase()),
            })
        }
        "length" => {
            arity(name, &values, 1..=1)?;
            let length = match &values[0] {
                Value::Null => return Ok(Value::Null),
                Value::Blob(bytes) => bytes.len(),
                v => v.to_string().chars().count(),
            };
            Ok(Value::Integer(i64::try_from(length).map_err(|_| overflow())?))
        }
        "abs" => {
            arity(name, &values, 1..=1)?;
            match numeric(&values[0], "abs()")? {
                None => Ok(Value::Null),
                Some(Number::Int(n)) => n.checked_abs().map(Value::Integer).ok_or_else(overflow),
                Some(Number::Real(r)) => Ok(Value::Real(r.abs())),
            }
        }
        "coalesce" | "ifnull" => {
            if name == "ifnull" {
                arity(name, &values, 2..=2)?;
            } else {
                arity(name, &values, 2..=usize::MAX)?;
            }
            Ok(values
                .into_iter()
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null))
        }
        "nullif" => {
            arity(name, &values, 2..=2)?;
            let second = values.pop().unwrap_or(Value::Null);
            let first = values.pop().unwrap_or(Value::Null);
            Ok(if !first.is_null() && first == second {
                Value::Null
            } else {
                first
            })
        }
        "typeof" => {
            arity(name, &values, 1..=1)?;
            Ok(Value::from(values[0].type_name()))
        }
        "round" => {
            arity(name, &values, 1..=2)?;
            let digits = match values.get(1) {
                None => 0,
                Some(v) => match numeric(v, "round()")? {
                    None => return Ok(Value::Null),
                    Some(Number::Int(n)) => n.clamp(0, 15),
                    Some(Number::Real(r)) => (r as i64).clamp(0, 15),
                },
            };
            match numeric(&values[0], "round()")? {
                None => Ok(Value::Null),
                Some(n) => {
                    let factor = 10f64.powi(digits as i32);
                    Ok(Value::Real((n.as_f64() * factor).round() / factor))
                }
            }
        }
        _ => Err(CoreError::execution(format!("no such function: {name}"))),
    }
}

/// Computes an aggregate over the values of its argument.
///
/// `values` holds one entry per input row; for `count(*)` the caller
/// passes non-NULL placeholders.
pub(crate) fn aggregate(name: &str, values: &[Value]) -> CoreResult<Value> {
    let present = values.iter().filter(|v| !v.is_null());
    match name {
        "count" => Ok(Value::Integer(
            i64::try_from(present.count()).map_err(|_| overflow())?,
        )),
        "min" => Ok(present.min().cloned().unwrap_or(Value::Null)),
        "max" => Ok(present.max().cloned().unwrap_or(Value::Null)),
        "sum" | "total" | "avg" => {
            let mut int_sum: Option<i64> = Some(0);
            let mut real_sum = 0.0;
            let mut count = 0usize;
            for value in present {
                let Some(n) = numeric(value, &format!("{name}()"))? else {
                    continue;
                };
                count += 1;
                real_sum += n.as_f64();
                int_sum = match (int_sum, n) {
                    (Some(acc), Number::Int(n)) => Some(acc.checked_add(n).ok_or_else(overflow)?),
                    _ => None,
                };
            }
            Ok(match name {
                "total" => Value::Real(real_sum),
                _ if count == 0 => Value::Null,
                "avg" => Value::Real(real_sum / count as f64),
                _ => int_sum.map_or(Value::Real(real_sum), Value::Integer),
            })
        }
        _ => Err(CoreError::execution(format!("no such aggregate: {name}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reldb_sql::parse;
    use reldb_sql::Statement;

    fn expr(text: &str) -> Expr {
        match parse(&format!("SELECT {text}")).unwrap() {
            Statement::Select(mut select) => match select.items.remove(0) {
                reldb_sql::ast::SelectItem::Expr { expr, .. } => expr,
                other => panic!("unexpected item {other:?}"),
            },
            other => panic!("unexpected statement {other:?}"),
        }
    }

    fn value(text: &str) -> Value {
        let bindings = Bindings::new();
        eval(&expr(text), Env::new(None, &bindings)).unwrap()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(value("1 + 2 * 3"), Value::Integer(7));
        assert_eq!(value("7 / 2"), Value::Integer(3));
        assert_eq!(value("7.0 / 2"), Value::Real(3.5));
        assert_eq!(value("7 % 3"), Value::Integer(1));
        assert_eq!(value("-(3)"), Value::Integer(-3));
        assert_eq!(value("'a' || 1"), Value::from("a1"));
    }

    #[test]
    fn division_by_zero_is_null() {
        assert_eq!(value("1 / 0"), Value::Null);
        assert_eq!(value("1 % 0"), Value::Null);
        assert_eq!(value("1.5 / 0"), Value::Null);
    }

    #[test]
    fn overflow_is_an_error() {
        let bindings = Bindings::new();
        let err = eval(
            &expr("9223372036854775807 + 1"),
            Env::new(None, &bindings),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Execution { .. }));
    }

    #[test]
    fn three_valued_logic() {
        assert_eq!(value("NULL = NULL"), Value::Null);
        assert_eq!(value("NULL AND FALSE"), Value::Bool(false));
        assert_eq!(value("NULL AND TRUE"), Value::Null);
        assert_eq!(value("NULL OR TRUE"), Value::Bool(true));
        assert_eq!(value("NOT NULL"), Value::Null);
        assert_eq!(value("NULL IS NULL"), Value::Bool(true));
        assert_eq!(value("1 IN (2, NULL)"), Value::Null);
        assert_eq!(value("1 IN (1, NULL)"), Value::Bool(true));
        assert_eq!(value("1 NOT IN (2, 3)"), Value::Bool(true));
        assert_eq!(value("5 BETWEEN 1 AND 10"), Value::Bool(true));
        assert_eq!(value("5 NOT BETWEEN 1 AND 10"), Value::Bool(false));
        assert_eq!(value("5 BETWEEN NULL AND 1"), Value::Bool(false));
    }

    #[test]
    fn like_patterns() {
        assert_eq!(value("'Squidward' LIKE 'sq%'"), Value::Bool(true));
        assert_eq!(value("'spongebob' LIKE '%bob'"), Value::Bool(true));
        assert_eq!(value("'sandy' LIKE 's_ndy'"), Value::Bool(true));
        assert_eq!(value("'sandy' LIKE 's_dy'"), Value::Bool(false));
        assert_eq!(value("'abc' NOT LIKE '%z%'"), Value::Bool(true));
        assert_eq!(value("NULL LIKE '%'"), Value::Null);
    }

    #[test]
    fn scalar_functions() {
        assert_eq!(value("lower('ABC')"), Value::from("abc"));
        assert_eq!(value("upper('abc')"), Value::from("ABC"));
        assert_eq!(value("length('hello')"), Value::Integer(5));
        assert_eq!(value("abs(-4)"), Value::Integer(4));
        assert_eq!(value("coalesce(NULL, NULL, 3)"), Value::Integer(3));
        assert_eq!(value("nullif(1, 1)"), Value::Null);
        assert_eq!(value("typeof(1.5)"), Value::from("real"));
        assert_eq!(value("round(2.567, 2)"), Value::Real(2.57));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let bindings = Bindings::new();
        assert!(eval(&expr("frobnicate(1)"), Env::new(None, &bindings)).is_err());
        assert!(eval(&expr("count(*)"), Env::new(None, &bindings)).is_err());
    }

    #[test]
    fn placeholders_read_bindings() {
        let mut bindings = Bindings::new();
        bindings.insert(Placeholder::Named("y".into()), Value::Integer(6));
        let v = eval(&expr(":y + 1"), Env::new(None, &bindings)).unwrap();
        assert_eq!(v, Value::Integer(7));
    }

    #[test]
    fn aggregates() {
        let values = vec![Value::Integer(1), Value::Null, Value::Integer(4)];
        assert_eq!(aggregate("count", &values).unwrap(), Value::Integer(2));
        assert_eq!(aggregate("sum", &values).unwrap(), Value::Integer(5));
        assert_eq!(aggregate("avg", &values).unwrap(), Value::Real(2.5));
        assert_eq!(aggregate("min", &values).unwrap(), Value::Integer(1));
        assert_eq!(aggregate("max", &values).unwrap(), Value::Integer(4));
        assert_eq!(aggregate("sum", &[]).unwrap(), Value::Null);
        assert_eq!(aggregate("total", &[]).unwrap(), Value::Real(0.0));
    }
}
