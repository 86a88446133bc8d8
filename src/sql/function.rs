//! Scalar function library
//!
//! Functions form a closed set. Each one declares a signature that the
//! parser checks while it adds call arguments, a result type, and an
//! evaluator. Functions that only produce integers implement `eval_long`
//! and let the `Value` and double paths widen it.

use super::expr::{Expr, ExprType};
use crate::error::{Error, Result};
use crate::executor::QueryContext;
use crate::storage::tuple::{
    days_from_date, millis_from_time, timestamp_from_millis, ArithOp,
};
use crate::storage::Value;

/// Name and arity of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSignature {
    /// Canonical lowercase name
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions
    pub max_args: Option<usize>,
}

const fn sig(name: &'static str, min_args: usize, max_args: Option<usize>) -> FunctionSignature {
    FunctionSignature {
        name,
        min_args,
        max_args,
    }
}

/// Built-in scalar functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    /// Current time as a timestamp
    Now,
    CurrentDate,
    CurrentTime,
    Abs,
    Mod,
    Round,
    Floor,
    Ceil,
    Sqrt,
    Lower,
    Upper,
    Length,
    Trim,
    Substr,
    Concat,
    Coalesce,
    IfNull,
    NullIf,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
}

impl Function {
    /// Look up a function by (case-insensitive) name
    pub fn from_name(name: &str) -> Option<Function> {
        let function = match name.to_ascii_uppercase().as_str() {
            "NOW" | "CURRENT_TIMESTAMP" => Function::Now,
            "CURRENT_DATE" | "CURDATE" => Function::CurrentDate,
            "CURRENT_TIME" | "CURTIME" => Function::CurrentTime,
            "ABS" => Function::Abs,
            "MOD" => Function::Mod,
            "ROUND" => Function::Round,
            "FLOOR" => Function::Floor,
            "CEIL" | "CEILING" => Function::Ceil,
            "SQRT" => Function::Sqrt,
            "LOWER" | "LCASE" => Function::Lower,
            "UPPER" | "UCASE" => Function::Upper,
            "LENGTH" | "CHAR_LENGTH" => Function::Length,
            "TRIM" => Function::Trim,
            "SUBSTR" | "SUBSTRING" => Function::Substr,
            "CONCAT" => Function::Concat,
            "COALESCE" => Function::Coalesce,
            "IFNULL" | "NVL" => Function::IfNull,
            "NULLIF" => Function::NullIf,
            "BIT_AND" | "BITAND" => Function::BitAnd,
            "BIT_OR" | "BITOR" => Function::BitOr,
            "BIT_XOR" | "BITXOR" => Function::BitXor,
            "BIT_NOT" | "BITNOT" => Function::BitNot,
            _ => return None,
        };
        Some(function)
    }

    pub fn signature(&self) -> FunctionSignature {
        match self {
            Function::Now => sig("now", 0, Some(0)),
            Function::CurrentDate => sig("current_date", 0, Some(0)),
            Function::CurrentTime => sig("current_time", 0, Some(0)),
            Function::Abs => sig("abs", 1, Some(1)),
            Function::Mod => sig("mod", 2, Some(2)),
            Function::Round => sig("round", 1, Some(2)),
            Function::Floor => sig("floor", 1, Some(1)),
            Function::Ceil => sig("ceil", 1, Some(1)),
            Function::Sqrt => sig("sqrt", 1, Some(1)),
            Function::Lower => sig("lower", 1, Some(1)),
            Function::Upper => sig("upper", 1, Some(1)),
            Function::Length => sig("length", 1, Some(1)),
            Function::Trim => sig("trim", 1, Some(1)),
            Function::Substr => sig("substr", 2, Some(3)),
            Function::Concat => sig("concat", 1, None),
            Function::Coalesce => sig("coalesce", 1, None),
            Function::IfNull => sig("ifnull", 2, Some(2)),
            Function::NullIf => sig("nullif", 2, Some(2)),
            Function::BitAnd => sig("bit_and", 2, Some(2)),
            Function::BitOr => sig("bit_or", 2, Some(2)),
            Function::BitXor => sig("bit_xor", 2, Some(2)),
            Function::BitNot => sig("bit_not", 1, Some(1)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.signature().name
    }

    /// Fail if a call already holding `current` arguments cannot take another
    pub fn check_add_arg(&self, current: usize) -> Result<()> {
        let signature = self.signature();
        match signature.max_args {
            Some(max) if current >= max => Err(Error::TooManyArguments {
                function: signature.name.to_string(),
                max,
            }),
            _ => Ok(()),
        }
    }

    /// Fail if `count` arguments are not enough
    pub fn check_arity(&self, count: usize) -> Result<()> {
        let signature = self.signature();
        if count < signature.min_args {
            return Err(Error::TooFewArguments {
                function: signature.name.to_string(),
                min: signature.min_args,
                got: count,
            });
        }
        if let Some(max) = signature.max_args {
            if count > max {
                return Err(Error::TooManyArguments {
                    function: signature.name.to_string(),
                    max,
                });
            }
        }
        Ok(())
    }

    /// Functions whose result is always an integer
    pub fn is_integer_only(&self) -> bool {
        matches!(
            self,
            Function::Length
                | Function::BitAnd
                | Function::BitOr
                | Function::BitXor
                | Function::BitNot
        )
    }

    /// Evaluation cost relative to a column read
    pub fn cost(&self) -> u64 {
        match self {
            Function::Sqrt | Function::Round => 2,
            Function::Lower
            | Function::Upper
            | Function::Trim
            | Function::Substr
            | Function::Concat => 3,
            _ => 1,
        }
    }

    pub fn result_type(&self, args: &[Expr]) -> ExprType {
        let arg_type = |i: usize| args.get(i).map_or(ExprType::Null, Expr::result_type);
        match self {
            Function::Now => ExprType::Timestamp,
            Function::CurrentDate => ExprType::Date,
            Function::CurrentTime => ExprType::Time,
            Function::Abs | Function::Floor | Function::Ceil | Function::Round => {
                match arg_type(0) {
                    ExprType::Long => ExprType::Long,
                    _ => ExprType::Double,
                }
            }
            Function::Mod => match (arg_type(0), arg_type(1)) {
                (ExprType::Long, ExprType::Long) => ExprType::Long,
                _ => ExprType::Double,
            },
            Function::Sqrt => ExprType::Double,
            Function::Lower
            | Function::Upper
            | Function::Trim
            | Function::Substr
            | Function::Concat => ExprType::String,
            Function::Length
            | Function::BitAnd
            | Function::BitOr
            | Function::BitXor
            | Function::BitNot => ExprType::Long,
            Function::Coalesce | Function::IfNull | Function::NullIf => args
                .iter()
                .map(Expr::result_type)
                .find(|t| *t != ExprType::Null)
                .unwrap_or(ExprType::Null),
        }
    }

    /// Evaluate an integer-only function. NULL arguments yield 0.
    pub fn eval_long(&self, args: &[Expr], ctx: &QueryContext<'_>) -> Result<i64> {
        match self {
            Function::Length => Ok(args[0]
                .eval_string(ctx)?
                .map_or(0, |s| s.chars().count() as i64)),
            Function::BitAnd => Ok(args[0].eval_long(ctx)? & args[1].eval_long(ctx)?),
            Function::BitOr => Ok(args[0].eval_long(ctx)? | args[1].eval_long(ctx)?),
            Function::BitXor => Ok(args[0].eval_long(ctx)? ^ args[1].eval_long(ctx)?),
            Function::BitNot => Ok(!args[0].eval_long(ctx)?),
            _ => match self.eval(args, ctx)? {
                Value::Null => Ok(0),
                other => other.as_i64().ok_or_else(|| Error::TypeMismatch {
                    from: other.type_name().to_string(),
                    to: "BIGINT".to_string(),
                }),
            },
        }
    }

    /// Evaluate the function against the current row
    pub fn eval(&self, args: &[Expr], ctx: &QueryContext<'_>) -> Result<Value> {
        if self.is_integer_only() {
            for arg in args {
                if arg.is_null(ctx)? {
                    return Ok(Value::Null);
                }
            }
            return Ok(Value::from_i64(self.eval_long(args, ctx)?));
        }

        match self {
            Function::Now => Ok(Value::Timestamp(ctx.now_millis())),
            Function::CurrentDate => {
                let now = now_datetime(ctx)?;
                Ok(Value::Date(days_from_date(now.date_naive())))
            }
            Function::CurrentTime => {
                let now = now_datetime(ctx)?;
                Ok(Value::Time(millis_from_time(now.time())))
            }
            Function::Abs => match args[0].eval(ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => {
                    let v = integer_arg(self, &other)?;
                    v.checked_abs()
                        .map(Value::from_i64)
                        .ok_or_else(|| Error::ExecutionError("integer overflow in abs".into()))
                }
            },
            Function::Mod => {
                let (a, b) = (args[0].eval(ctx)?, args[1].eval(ctx)?);
                a.arith(ArithOp::Rem, &b)
            }
            Function::Round => {
                let value = args[0].eval(ctx)?;
                let places = match args.get(1) {
                    Some(arg) => arg.eval_long(ctx)?,
                    None => 0,
                };
                match value {
                    Value::Null => Ok(Value::Null),
                    Value::Float(f) => {
                        let factor = 10f64.powi(places.clamp(-308, 308) as i32);
                        Ok(Value::Float((f * factor).round() / factor))
                    }
                    other => Ok(Value::from_i64(integer_arg(self, &other)?)),
                }
            }
            Function::Floor | Function::Ceil => match args[0].eval(ctx)? {
                Value::Null => Ok(Value::Null),
                Value::Float(f) if *self == Function::Floor => Ok(Value::Float(f.floor())),
                Value::Float(f) => Ok(Value::Float(f.ceil())),
                other => Ok(Value::from_i64(integer_arg(self, &other)?)),
            },
            Function::Sqrt => {
                if args[0].is_null(ctx)? {
                    return Ok(Value::Null);
                }
                let v = args[0].eval_double(ctx)?;
                if v < 0.0 {
                    return Err(Error::ExecutionError(format!(
                        "sqrt of negative number {}",
                        v
                    )));
                }
                Ok(Value::Float(v.sqrt()))
            }
            Function::Lower => map_string(&args[0], ctx, |s| s.to_lowercase()),
            Function::Upper => map_string(&args[0], ctx, |s| s.to_uppercase()),
            Function::Trim => map_string(&args[0], ctx, |s| s.trim().to_string()),
            Function::Substr => {
                let Some(s) = args[0].eval_string(ctx)? else {
                    return Ok(Value::Null);
                };
                for arg in &args[1..] {
                    if arg.is_null(ctx)? {
                        return Ok(Value::Null);
                    }
                }
                // 1-based start; non-positive starts count from the beginning.
                let start = (args[1].eval_long(ctx)?.max(1) - 1) as usize;
                let chars = s.chars().skip(start);
                let result: String = match args.get(2) {
                    Some(len) => chars.take(len.eval_long(ctx)?.max(0) as usize).collect(),
                    None => chars.collect(),
                };
                Ok(Value::String(result))
            }
            Function::Concat => {
                let mut out = String::new();
                for arg in args {
                    if let Some(s) = arg.eval_string(ctx)? {
                        out.push_str(&s);
                    }
                }
                Ok(Value::String(out))
            }
            Function::Coalesce | Function::IfNull => {
                for arg in args {
                    let value = arg.eval(ctx)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            Function::NullIf => {
                let (a, b) = (args[0].eval(ctx)?, args[1].eval(ctx)?);
                if !b.is_null() && a.compare(&b) == Some(std::cmp::Ordering::Equal) {
                    Ok(Value::Null)
                } else {
                    Ok(a)
                }
            }
            Function::Length
            | Function::BitAnd
            | Function::BitOr
            | Function::BitXor
            | Function::BitNot => Ok(Value::from_i64(self.eval_long(args, ctx)?)),
        }
    }
}

fn integer_arg(function: &Function, value: &Value) -> Result<i64> {
    match value {
        Value::Integer(_) | Value::BigInt(_) | Value::Boolean(_) => Ok(value.as_i64().unwrap_or(0)),
        Value::String(s) => s.trim().parse().map_err(|_| Error::TypeMismatch {
            from: "STRING".to_string(),
            to: format!("{} argument", function.name()),
        }),
        other => Err(Error::TypeMismatch {
            from: other.type_name().to_string(),
            to: format!("{} argument", function.name()),
        }),
    }
}

fn map_string(arg: &Expr, ctx: &QueryContext<'_>, f: impl FnOnce(&str) -> String) -> Result<Value> {
    Ok(arg
        .eval_string(ctx)?
        .map_or(Value::Null, |s| Value::String(f(&s))))
}

fn now_datetime(ctx: &QueryContext<'_>) -> Result<chrono::DateTime<chrono::Utc>> {
    timestamp_from_millis(ctx.now_millis())
        .ok_or_else(|| Error::Internal(format!("clock out of range: {}", ctx.now_millis())))
}
