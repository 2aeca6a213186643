use std::collections::HashMap;

use crate::ast::{BinaryOp, Builtin, Expr, MAX_STRING_LEN};
use crate::error::ExprError;
use crate::value::Value;

/// The variable bindings an expression is evaluated against.
///
/// Built fresh per evaluation by the caller: `apigate-gateway`'s transformer
/// binds `{req, resp?, body, headers, user, key, now}`; the metering
/// pipeline binds `{respBody, status, method, path}`.
#[derive(Debug, Default, Clone)]
pub struct Context {
    bindings: HashMap<String, Value>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.bindings.insert(name.into(), value);
        self
    }

    fn get(&self, name: &str) -> Result<Value, ExprError> {
        self.bindings
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownIdent(name.to_owned()))
    }
}

/// Evaluate `expr` against `ctx`, returning a runtime [`Value`].
///
/// Depth is already bounded at parse time ([`crate::parser::parse`]); this
/// walk is a plain recursive interpreter with no loops, no I/O, and no
/// unbounded allocation beyond [`MAX_STRING_LEN`]-checked string results.
///
/// # Errors
/// Returns [`ExprError`] for an unknown identifier/field, a type mismatch
/// (e.g. comparing a list), division by zero, or a result string exceeding
/// [`MAX_STRING_LEN`].
pub fn eval(expr: &Expr, ctx: &Context) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => ctx.get(name),
        Expr::Field(base, field) => {
            let base_val = eval(base, ctx)?;
            match base_val {
                Value::Map(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
                other => Err(ExprError::TypeError(format!(
                    "cannot access field {field:?} on {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Index(base, index) => {
            let base_val = eval(base, ctx)?;
            let index_val = eval(index, ctx)?;
            eval_index(&base_val, &index_val)
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs_val = eval(lhs, ctx)?;
            let rhs_val = eval(rhs, ctx)?;
            eval_binary(*op, &lhs_val, &rhs_val)
        }
        Expr::Coalesce(lhs, rhs) => match eval(lhs, ctx) {
            Ok(v) if v != Value::Null => Ok(v),
            _ => eval(rhs, ctx),
        },
        Expr::Call(builtin, arg) => {
            let value = eval(arg, ctx)?;
            eval_builtin(*builtin, &value)
        }
    }
}

fn eval_index(base: &Value, index: &Value) -> Result<Value, ExprError> {
    match (base, index) {
        (Value::List(items), idx) => {
            let Some(i) = idx.as_f64() else {
                return Err(ExprError::TypeError("list index must be numeric".to_owned()));
            };
            #[allow(clippy::cast_possible_truncation)]
            let i = i as i64;
            let len = items.len() as i64;
            let resolved = if i < 0 { len + i } else { i };
            if resolved < 0 || resolved >= len {
                return Ok(Value::Null);
            }
            Ok(items[resolved as usize].clone())
        }
        (Value::Map(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or(Value::Null)),
        (other, _) => Err(ExprError::TypeError(format!(
            "cannot index into {}",
            other.type_name()
        ))),
    }
}

fn eval_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Add => eval_add(lhs, rhs),
        BinaryOp::Sub => eval_arith(lhs, rhs, |a, b| a - b),
        BinaryOp::Mul => eval_arith(lhs, rhs, |a, b| a * b),
        BinaryOp::Div => {
            let b = numeric(rhs)?;
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            eval_arith(lhs, rhs, |a, bb| a / bb)
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt => compare(lhs, rhs, |o| o == std::cmp::Ordering::Less),
        BinaryOp::Le => compare(lhs, rhs, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Gt => compare(lhs, rhs, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::Ge => compare(lhs, rhs, |o| o != std::cmp::Ordering::Less),
    }
}

fn eval_add(lhs: &Value, rhs: &Value) -> Result<Value, ExprError> {
    if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) {
        let result = format!("{}{}", lhs.display_string(), rhs.display_string());
        if result.len() > MAX_STRING_LEN {
            return Err(ExprError::StringTooLong(MAX_STRING_LEN));
        }
        return Ok(Value::String(result));
    }
    eval_arith(lhs, rhs, |a, b| a + b)
}

fn eval_arith(lhs: &Value, rhs: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, ExprError> {
    let (a, b) = (numeric(lhs)?, numeric(rhs)?);
    let result = f(a, b);
    if let (Value::Int(_), Value::Int(_)) = (lhs, rhs) {
        #[allow(clippy::cast_possible_truncation)]
        if result.fract() == 0.0 {
            return Ok(Value::Int(result as i64));
        }
    }
    Ok(Value::Float(result))
}

fn numeric(v: &Value) -> Result<f64, ExprError> {
    v.as_f64()
        .ok_or_else(|| ExprError::TypeError(format!("expected number, found {}", v.type_name())))
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            lhs.as_f64() == rhs.as_f64()
        }
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value, ExprError> {
    if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
        return Ok(Value::Bool(accept(a.cmp(b))));
    }
    let (a, b) = (numeric(lhs)?, numeric(rhs)?);
    let ordering = a.partial_cmp(&b).ok_or_else(|| ExprError::TypeError("NaN comparison".to_owned()))?;
    Ok(Value::Bool(accept(ordering)))
}

fn eval_builtin(builtin: Builtin, value: &Value) -> Result<Value, ExprError> {
    match builtin {
        Builtin::Len => match value {
            Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(map) => Ok(Value::Int(map.len() as i64)),
            other => Err(ExprError::TypeError(format!("len() of {}", other.type_name()))),
        },
        Builtin::Upper => match value {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            other => Err(ExprError::TypeError(format!("upper() of {}", other.type_name()))),
        },
        Builtin::Lower => match value {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(ExprError::TypeError(format!("lower() of {}", other.type_name()))),
        },
        Builtin::Str => Ok(Value::String(value.display_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(src: &str, ctx: &Context) -> Result<Value, ExprError> {
        eval(&parse(src).unwrap(), ctx)
    }

    #[test]
    fn resolves_identifier() {
        let ctx = Context::new().with("status", Value::Int(200));
        assert_eq!(run("status", &ctx).unwrap(), Value::Int(200));
    }

    #[test]
    fn unknown_identifier_errors() {
        let ctx = Context::new();
        assert!(matches!(run("missing", &ctx), Err(ExprError::UnknownIdent(_))));
    }

    #[test]
    fn field_access_on_map() {
        let mut headers = HashMap::new();
        headers.insert("host".to_owned(), Value::String("api.example.com".into()));
        let ctx = Context::new().with("req", Value::Map({
            let mut m = HashMap::new();
            m.insert("headers".to_owned(), Value::Map(headers));
            m
        }));
        assert_eq!(
            run("req.headers.host", &ctx).unwrap(),
            Value::String("api.example.com".into())
        );
    }

    #[test]
    fn missing_field_is_null() {
        let ctx = Context::new().with("req", Value::Map(HashMap::new()));
        assert_eq!(run("req.missing", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn string_concat() {
        let ctx = Context::new().with("method", Value::String("GET".into()));
        assert_eq!(run("\"method=\" + method", &ctx).unwrap(), Value::String("method=GET".into()));
    }

    #[test]
    fn arithmetic_and_comparison() {
        let ctx = Context::new().with("status", Value::Int(503));
        assert_eq!(run("status >= 500", &ctx).unwrap(), Value::Bool(true));
        assert_eq!(run("status + 1", &ctx).unwrap(), Value::Int(504));
    }

    #[test]
    fn division_by_zero_errors() {
        let ctx = Context::new();
        assert_eq!(run("1 / 0", &ctx), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn coalesce_falls_back_on_missing_ident() {
        let ctx = Context::new();
        assert_eq!(run("missing ?? \"fallback\"", &ctx).unwrap(), Value::String("fallback".into()));
    }

    #[test]
    fn coalesce_falls_back_on_null_field() {
        let ctx = Context::new().with("req", Value::Map(HashMap::new()));
        assert_eq!(
            run("req.missing ?? \"fallback\"", &ctx).unwrap(),
            Value::String("fallback".into())
        );
    }

    #[test]
    fn coalesce_keeps_present_value() {
        let ctx = Context::new().with("x", Value::Int(5));
        assert_eq!(run("x ?? 10", &ctx).unwrap(), Value::Int(5));
    }

    #[test]
    fn list_indexing_supports_negative() {
        let ctx = Context::new().with("xs", Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        assert_eq!(run("xs[-1]", &ctx).unwrap(), Value::Int(3));
    }

    #[test]
    fn builtin_upper_and_len() {
        let ctx = Context::new().with("method", Value::String("get".into()));
        assert_eq!(run("upper(method)", &ctx).unwrap(), Value::String("GET".into()));
        assert_eq!(run("len(method)", &ctx).unwrap(), Value::Int(3));
    }

    #[test]
    fn type_mismatch_on_comparison_errors() {
        let ctx = Context::new().with("xs", Value::List(vec![]));
        assert!(matches!(run("xs > 1", &ctx), Err(ExprError::TypeError(_))));
    }
}
