//! Expression trees
//!
//! An expression goes through three stages. The parser produces it
//! *unbound*: columns are names, and function calls collect their arguments
//! through `add_arg`. `bind` resolves names against the tables in scope and
//! returns a new, *bound* tree; the input tree is never changed. A bound tree
//! is then *evaluated* once per row against a [`QueryContext`].
//!
//! Evaluation has typed entry points. `eval` produces a [`Value`];
//! `eval_long`, `eval_double` and `eval_string` produce plain Rust values.
//! Integer-only nodes (bitwise operators, `length`, ...) implement
//! `eval_long` and the other two widen it.

use std::cmp::Ordering;
use std::fmt;

use super::function::Function;
use crate::catalog::{Column, DataType, Schema};
use crate::error::{Error, Result};
use crate::executor::QueryContext;
use crate::storage::tuple::ArithOp;
use crate::storage::Value;

/// Cost of an expression that needs a table not yet available
pub const COST_UNAVAILABLE: u64 = u64::MAX;

/// Static result type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprType {
    Null,
    Boolean,
    Long,
    Double,
    String,
    Date,
    Time,
    Timestamp,
    Bytes,
    /// Not known before evaluation (parameters, unbound columns)
    Any,
}

impl ExprType {
    pub fn of_data_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Boolean => ExprType::Boolean,
            DataType::SmallInt | DataType::Integer | DataType::BigInt => ExprType::Long,
            DataType::Float | DataType::Double => ExprType::Double,
            DataType::Char(_) | DataType::Varchar(_) | DataType::Text => ExprType::String,
            DataType::Date => ExprType::Date,
            DataType::Time => ExprType::Time,
            DataType::Timestamp => ExprType::Timestamp,
            DataType::Blob => ExprType::Bytes,
        }
    }

    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => ExprType::Null,
            Value::Boolean(_) => ExprType::Boolean,
            Value::Integer(_) | Value::BigInt(_) => ExprType::Long,
            Value::Float(_) => ExprType::Double,
            Value::String(_) => ExprType::String,
            Value::Date(_) => ExprType::Date,
            Value::Time(_) => ExprType::Time,
            Value::Timestamp(_) => ExprType::Timestamp,
            Value::Bytes(_) => ExprType::Bytes,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ExprType::Long | ExprType::Double)
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `NOT`
    Not,
    /// `~`
    BitNot,
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    // String
    Concat,
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
}

impl BinaryOp {
    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    fn arith(&self) -> Option<ArithOp> {
        match self {
            BinaryOp::Add => Some(ArithOp::Add),
            BinaryOp::Sub => Some(ArithOp::Sub),
            BinaryOp::Mul => Some(ArithOp::Mul),
            BinaryOp::Div => Some(ArithOp::Div),
            BinaryOp::Mod => Some(ArithOp::Rem),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::Concat => "||",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
        }
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `?` parameter, numbered from 0 in order of appearance
    Param(usize),
    /// Column reference by name
    Column { table: Option<String>, name: String },
    /// Column resolved to a table in scope and a column position
    BoundColumn {
        table: usize,
        column: usize,
        name: String,
        data_type: DataType,
    },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    IsNull { expr: Box<Expr>, negated: bool },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// Scalar function call
    Call { function: Function, args: Vec<Expr> },
    /// Aggregate call; `arg` is `None` for `COUNT(*)`
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<Expr>>,
        distinct: bool,
    },
    /// Value of the n-th aggregate of the current group
    AggregateRef(usize),
}

/// Tables an expression may refer to, in FROM order
#[derive(Debug, Clone, Default)]
pub struct BindScope<'a> {
    tables: Vec<(&'a str, &'a Schema)>,
}

impl<'a> BindScope<'a> {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    /// Add a table under the name that qualifies its columns
    pub fn push(&mut self, reference: &'a str, schema: &'a Schema) {
        self.tables.push((reference, schema));
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Find a column. Returns (table index, column index, column).
    pub fn resolve(&self, table: Option<&str>, name: &str) -> Result<(usize, usize, &'a Column)> {
        if let Some(table) = table {
            let (index, schema) = self
                .tables
                .iter()
                .enumerate()
                .find(|(_, (reference, _))| reference.eq_ignore_ascii_case(table))
                .map(|(index, (_, schema))| (index, *schema))
                .ok_or_else(|| Error::TableNotFound(table.to_string()))?;
            let position = schema
                .get_column_index(name)
                .ok_or_else(|| Error::ColumnNotFound(name.to_string(), table.to_string()))?;
            return Ok((index, position, &schema.columns()[position]));
        }

        let mut found = None;
        for (index, (_, schema)) in self.tables.iter().enumerate() {
            if let Some(position) = schema.get_column_index(name) {
                if found.is_some() {
                    return Err(Error::AmbiguousColumn(name.to_string()));
                }
                found = Some((index, position, &schema.columns()[position]));
            }
        }
        found.ok_or_else(|| {
            let tables: Vec<&str> = self.tables.iter().map(|(reference, _)| *reference).collect();
            Error::ColumnNotFound(name.to_string(), tables.join(", "))
        })
    }
}

impl Expr {
    /// A function call with no arguments yet
    pub fn call(function: Function) -> Expr {
        Expr::Call {
            function,
            args: Vec::new(),
        }
    }

    pub fn column(name: impl Into<String>) -> Expr {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Append a call argument, failing as soon as the function's arity is exceeded
    pub fn add_arg(&mut self, arg: Expr) -> Result<()> {
        match self {
            Expr::Call { function, args } => {
                function.check_add_arg(args.len())?;
                args.push(arg);
                Ok(())
            }
            Expr::Aggregate { func, arg: slot, .. } => {
                if slot.is_some() {
                    return Err(Error::TooManyArguments {
                        function: func.name().to_string(),
                        max: 1,
                    });
                }
                *slot = Some(Box::new(arg));
                Ok(())
            }
            other => Err(Error::Internal(format!(
                "cannot add an argument to '{}'",
                other
            ))),
        }
    }

    /// Check that a finished call has enough arguments
    pub fn check_arity(&self) -> Result<()> {
        match self {
            Expr::Call { function, args } => function.check_arity(args.len()),
            Expr::Aggregate {
                func, arg: None, ..
            } if *func != AggregateFunc::Count => Err(Error::TooFewArguments {
                function: func.name().to_string(),
                min: 1,
                got: 0,
            }),
            _ => Ok(()),
        }
    }

    /// Immediate children
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_)
            | Expr::Param(_)
            | Expr::Column { .. }
            | Expr::BoundColumn { .. }
            | Expr::AggregateRef(_) => Vec::new(),
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => vec![expr],
            Expr::Binary { left, right, .. } => vec![left, right],
            Expr::Like { expr, pattern, .. } => vec![expr, pattern],
            Expr::Between {
                expr, low, high, ..
            } => vec![expr, low, high],
            Expr::InList { expr, list, .. } => {
                let mut children = vec![expr.as_ref()];
                children.extend(list.iter());
                children
            }
            Expr::Call { args, .. } => args.iter().collect(),
            Expr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
        }
    }

    /// Rebuild this node with every child replaced by `f(child)`
    fn map_children(&self, f: &mut impl FnMut(&Expr) -> Result<Expr>) -> Result<Expr> {
        let mut boxed = |e: &Expr| f(e).map(Box::new);
        Ok(match self {
            Expr::Literal(_)
            | Expr::Param(_)
            | Expr::Column { .. }
            | Expr::BoundColumn { .. }
            | Expr::AggregateRef(_) => self.clone(),
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: boxed(expr)?,
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: boxed(left)?,
                right: boxed(right)?,
            },
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Expr::Between {
                expr: boxed(expr)?,
                low: boxed(low)?,
                high: boxed(high)?,
                negated: *negated,
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: boxed(expr)?,
                negated: *negated,
            },
            Expr::Like {
                expr,
                pattern,
                negated,
            } => Expr::Like {
                expr: boxed(expr)?,
                pattern: boxed(pattern)?,
                negated: *negated,
            },
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: boxed(expr)?,
                list: list.iter().map(&mut *f).collect::<Result<_>>()?,
                negated: *negated,
            },
            Expr::Call { function, args } => Expr::Call {
                function: *function,
                args: args.iter().map(&mut *f).collect::<Result<_>>()?,
            },
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => Expr::Aggregate {
                func: *func,
                arg: arg.as_deref().map(&mut boxed).transpose()?,
                distinct: *distinct,
            },
        })
    }

    /// Resolve column names against `scope`, returning a new tree
    pub fn bind(&self, scope: &BindScope<'_>) -> Result<Expr> {
        match self {
            Expr::Column { table, name } => {
                let (table, column, def) = scope.resolve(table.as_deref(), name)?;
                Ok(Expr::BoundColumn {
                    table,
                    column,
                    name: def.name.clone(),
                    data_type: def.data_type.clone(),
                })
            }
            Expr::Call { .. } | Expr::Aggregate { .. } => {
                self.check_arity()?;
                self.map_children(&mut |child| child.bind(scope))
            }
            _ => self.map_children(&mut |child| child.bind(scope)),
        }
    }

    /// Replace every aggregate call by an `AggregateRef` into `aggregates`,
    /// appending calls not seen before.
    pub fn extract_aggregates(&self, aggregates: &mut Vec<Expr>) -> Result<Expr> {
        if let Expr::Aggregate { arg, .. } = self {
            if arg.as_deref().is_some_and(Expr::contains_aggregate) {
                return Err(Error::ExecutionError(format!(
                    "aggregate calls cannot be nested: {}",
                    self
                )));
            }
            let index = match aggregates.iter().position(|a| a == self) {
                Some(index) => index,
                None => {
                    aggregates.push(self.clone());
                    aggregates.len() - 1
                }
            };
            return Ok(Expr::AggregateRef(index));
        }
        self.map_children(&mut |child| child.extract_aggregates(aggregates))
    }

    pub fn contains_aggregate(&self) -> bool {
        matches!(self, Expr::Aggregate { .. })
            || self.children().into_iter().any(Expr::contains_aggregate)
    }

    /// Split a predicate on its top-level ANDs
    pub fn into_conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut conjuncts = left.into_conjuncts();
                conjuncts.extend(right.into_conjuncts());
                conjuncts
            }
            other => vec![other],
        }
    }

    /// Estimated cost of evaluating this expression once, given which
    /// tables (by scope index) already have a current row.
    pub fn cost(&self, available: &[bool]) -> u64 {
        let own = match self {
            Expr::Literal(_) | Expr::Param(_) | Expr::AggregateRef(_) => return 0,
            Expr::Column { .. } => return COST_UNAVAILABLE,
            Expr::BoundColumn { table, .. } => {
                return if available.get(*table).copied().unwrap_or(false) {
                    1
                } else {
                    COST_UNAVAILABLE
                };
            }
            Expr::Like { .. } => 5,
            Expr::InList { list, .. } => list.len() as u64,
            Expr::Call { function, .. } => function.cost(),
            _ => 1,
        };

        let mut total = own;
        for child in self.children() {
            let cost = child.cost(available);
            if cost == COST_UNAVAILABLE {
                return COST_UNAVAILABLE;
            }
            total = total.saturating_add(cost);
        }
        total.min(COST_UNAVAILABLE - 1)
    }

    /// Static result type
    pub fn result_type(&self) -> ExprType {
        match self {
            Expr::Literal(value) => ExprType::of_value(value),
            Expr::Param(_) | Expr::Column { .. } | Expr::AggregateRef(_) => ExprType::Any,
            Expr::BoundColumn { data_type, .. } => ExprType::of_data_type(data_type),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Neg => expr.result_type(),
                UnaryOp::Not => ExprType::Boolean,
                UnaryOp::BitNot => ExprType::Long,
            },
            Expr::Binary { op, left, right } => {
                if op.is_bitwise() {
                    return ExprType::Long;
                }
                if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
                    return ExprType::Boolean;
                }
                if *op == BinaryOp::Concat {
                    return ExprType::String;
                }
                match (left.result_type(), right.result_type()) {
                    (ExprType::Long, ExprType::Long) => ExprType::Long,
                    (ExprType::Timestamp, ExprType::Long) => ExprType::Timestamp,
                    (a, b) if a.is_numeric() && b.is_numeric() => ExprType::Double,
                    _ => ExprType::Any,
                }
            }
            Expr::Between { .. } | Expr::IsNull { .. } | Expr::Like { .. } | Expr::InList { .. } => {
                ExprType::Boolean
            }
            Expr::Call { function, args } => function.result_type(args),
            Expr::Aggregate { func, arg, .. } => match func {
                AggregateFunc::Count => ExprType::Long,
                AggregateFunc::Avg => ExprType::Double,
                _ => arg.as_ref().map_or(ExprType::Null, |a| a.result_type()),
            },
        }
    }

    /// Nodes evaluated through `eval_long`
    pub fn is_integer_only(&self) -> bool {
        match self {
            Expr::Unary {
                op: UnaryOp::BitNot,
                ..
            } => true,
            Expr::Binary { op, .. } => op.is_bitwise(),
            Expr::Call { function, .. } => function.is_integer_only(),
            _ => false,
        }
    }

    /// Whether the expression is NULL for the current row
    pub fn is_null(&self, ctx: &QueryContext<'_>) -> Result<bool> {
        match self {
            Expr::Literal(value) => Ok(value.is_null()),
            Expr::Param(index) => Ok(ctx.param(*index)?.is_null()),
            Expr::BoundColumn { table, column, .. } => Ok(ctx.column(*table, *column)?.is_null()),
            Expr::IsNull { .. } => Ok(false),
            Expr::Unary {
                op: UnaryOp::BitNot,
                expr,
            } => expr.is_null(ctx),
            Expr::Binary { op, left, right } if op.is_bitwise() => {
                Ok(left.is_null(ctx)? || right.is_null(ctx)?)
            }
            Expr::Call { function, args } if function.is_integer_only() => {
                for arg in args {
                    if arg.is_null(ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(self.eval(ctx)?.is_null()),
        }
    }

    /// Evaluate to a value
    pub fn eval(&self, ctx: &QueryContext<'_>) -> Result<Value> {
        if self.is_integer_only() {
            if self.is_null(ctx)? {
                return Ok(Value::Null);
            }
            return Ok(Value::from_i64(self.eval_long(ctx)?));
        }

        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param(index) => ctx.param(*index).cloned(),
            Expr::Column { name, .. } => Err(Error::Internal(format!(
                "column '{}' evaluated before binding",
                name
            ))),
            Expr::BoundColumn { table, column, .. } => ctx.column(*table, *column).cloned(),
            Expr::Unary { op, expr } => match op {
                UnaryOp::Neg => negate(expr.eval(ctx)?),
                _ => Ok(expr.eval_bool(ctx)?.map_or(Value::Null, |b| Value::Boolean(!b))),
            },
            Expr::Binary { op, left, right } => eval_binary(*op, left, right, ctx),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let (value, low, high) = (expr.eval(ctx)?, low.eval(ctx)?, high.eval(ctx)?);
                if value.is_null() || low.is_null() || high.is_null() {
                    return Ok(Value::Null);
                }
                let inside = ordered(&value, &low)? != Ordering::Less
                    && ordered(&value, &high)? != Ordering::Greater;
                Ok(Value::Boolean(inside != *negated))
            }
            Expr::IsNull { expr, negated } => Ok(Value::Boolean(expr.is_null(ctx)? != *negated)),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let (Some(text), Some(pattern)) = (expr.eval_string(ctx)?, pattern.eval_string(ctx)?)
                else {
                    return Ok(Value::Null);
                };
                Ok(Value::Boolean(like_match(&text, &pattern) != *negated))
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let value = expr.eval(ctx)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let mut saw_null = false;
                for item in list {
                    let item = item.eval(ctx)?;
                    if item.is_null() {
                        saw_null = true;
                    } else if value.compare(&item) == Some(Ordering::Equal) {
                        return Ok(Value::Boolean(!*negated));
                    }
                }
                if saw_null {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Boolean(*negated))
                }
            }
            Expr::Call { function, args } => function.eval(args, ctx),
            Expr::Aggregate { func, .. } => Err(Error::ExecutionError(format!(
                "aggregate function {} is not allowed here",
                func.name()
            ))),
            Expr::AggregateRef(index) => ctx.aggregate(*index).cloned(),
        }
    }

    /// Evaluate as an integer. NULL yields 0.
    pub fn eval_long(&self, ctx: &QueryContext<'_>) -> Result<i64> {
        match self {
            Expr::Unary {
                op: UnaryOp::BitNot,
                expr,
            } => Ok(!expr.eval_long(ctx)?),
            Expr::Binary { op, left, right } if op.is_bitwise() => {
                let (a, b) = (left.eval_long(ctx)?, right.eval_long(ctx)?);
                Ok(match op {
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    BinaryOp::BitXor => a ^ b,
                    BinaryOp::ShiftLeft => shift_left(a, b),
                    _ => shift_right(a, b),
                })
            }
            Expr::Call { function, args } if function.is_integer_only() => {
                function.eval_long(args, ctx)
            }
            _ => match self.eval(ctx)? {
                Value::Null => Ok(0),
                Value::Float(f) => Ok(f as i64),
                other => other.as_i64().ok_or_else(|| Error::TypeMismatch {
                    from: other.type_name().to_string(),
                    to: "BIGINT".to_string(),
                }),
            },
        }
    }

    /// Evaluate as a double. NULL yields 0.0.
    pub fn eval_double(&self, ctx: &QueryContext<'_>) -> Result<f64> {
        if self.is_integer_only() {
            return Ok(self.eval_long(ctx)? as f64);
        }
        match self.eval(ctx)? {
            Value::Null => Ok(0.0),
            other => other.as_f64().ok_or_else(|| Error::TypeMismatch {
                from: other.type_name().to_string(),
                to: "DOUBLE".to_string(),
            }),
        }
    }

    /// Evaluate as text. NULL yields `None`.
    pub fn eval_string(&self, ctx: &QueryContext<'_>) -> Result<Option<String>> {
        if self.is_integer_only() {
            if self.is_null(ctx)? {
                return Ok(None);
            }
            return Ok(Some(self.eval_long(ctx)?.to_string()));
        }
        Ok(match self.eval(ctx)? {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    /// Evaluate as a predicate with SQL three-valued logic
    pub fn eval_bool(&self, ctx: &QueryContext<'_>) -> Result<Option<bool>> {
        match self.eval(ctx)? {
            Value::Null => Ok(None),
            other => other.as_bool().map(Some).ok_or_else(|| Error::TypeMismatch {
                from: other.type_name().to_string(),
                to: "BOOLEAN".to_string(),
            }),
        }
    }
}

fn eval_binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &QueryContext<'_>) -> Result<Value> {
    match op {
        BinaryOp::And => {
            let l = left.eval_bool(ctx)?;
            if l == Some(false) {
                return Ok(Value::Boolean(false));
            }
            Ok(match (l, right.eval_bool(ctx)?) {
                (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            })
        }
        BinaryOp::Or => {
            let l = left.eval_bool(ctx)?;
            if l == Some(true) {
                return Ok(Value::Boolean(true));
            }
            Ok(match (l, right.eval_bool(ctx)?) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            })
        }
        BinaryOp::Concat => {
            let (l, r) = (left.eval(ctx)?, right.eval(ctx)?);
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::String(format!("{}{}", l, r)))
        }
        op if op.is_comparison() => {
            let (l, r) = (left.eval(ctx)?, right.eval(ctx)?);
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let ordering = match (op, l.compare(&r)) {
                (BinaryOp::Eq, None) => return Ok(Value::Boolean(false)),
                (BinaryOp::NotEq, None) => return Ok(Value::Boolean(true)),
                (_, None) => return Err(incomparable(&l, &r)),
                (_, Some(ordering)) => ordering,
            };
            Ok(Value::Boolean(match op {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::NotEq => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::LtEq => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        op => match op.arith() {
            Some(arith) => left.eval(ctx)?.arith(arith, &right.eval(ctx)?),
            None => Err(Error::Internal(format!(
                "operator {} has no value evaluator",
                op.symbol()
            ))),
        },
    }
}

fn ordered(a: &Value, b: &Value) -> Result<Ordering> {
    a.compare(b).ok_or_else(|| incomparable(a, b))
}

fn incomparable(a: &Value, b: &Value) -> Error {
    Error::TypeMismatch {
        from: a.type_name().to_string(),
        to: b.type_name().to_string(),
    }
}

fn negate(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Integer(i) => Ok(Value::from_i64(-(i as i64))),
        Value::BigInt(i) => i
            .checked_neg()
            .map(Value::BigInt)
            .ok_or_else(|| Error::ExecutionError("integer overflow".to_string())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(Error::TypeMismatch {
            from: other.type_name().to_string(),
            to: "number".to_string(),
        }),
    }
}

fn shift_left(value: i64, by: i64) -> i64 {
    if (0..64).contains(&by) {
        value << by
    } else {
        0
    }
}

fn shift_right(value: i64, by: i64) -> i64 {
    if (0..64).contains(&by) {
        value >> by
    } else if value < 0 {
        -1
    } else {
        0
    }
}

/// SQL LIKE: `%` matches any run of characters, `_` exactly one
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value.to_sql_literal()),
            Expr::Param(index) => write!(f, "?{}", index + 1),
            Expr::Column {
                table: Some(table),
                name,
            } => write!(f, "{}.{}", table, name),
            Expr::Column { table: None, name } | Expr::BoundColumn { name, .. } => {
                write!(f, "{}", name)
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::Neg => write!(f, "-{}", expr),
                UnaryOp::Not => write!(f, "NOT {}", expr),
                UnaryOp::BitNot => write!(f, "~{}", expr),
            },
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                expr,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expr::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => write!(
                f,
                "{} {}LIKE {}",
                expr,
                if *negated { "NOT " } else { "" },
                pattern
            ),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{} {}IN ({})",
                    expr,
                    if *negated { "NOT " } else { "" },
                    items.join(", ")
                )
            }
            Expr::Call { function, args } => {
                let args: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(f, "{}({})", function.name(), args.join(", "))
            }
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => match arg {
                None => write!(f, "{}(*)", func.name()),
                Some(arg) => write!(
                    f,
                    "{}({}{})",
                    func.name(),
                    if *distinct { "DISTINCT " } else { "" },
                    arg
                ),
            },
            Expr::AggregateRef(index) => write!(f, "#agg{}", index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Column;
    use crate::storage::Tuple;

    fn lit(v: impl Into<Value>) -> Expr {
        Expr::Literal(v.into())
    }

    fn users() -> Schema {
        Schema::from_columns(vec![
            Column::new("id", DataType::Integer, 0),
            Column::new("name", DataType::Varchar(20), 1),
        ])
    }

    fn orders() -> Schema {
        Schema::from_columns(vec![
            Column::new("id", DataType::Integer, 0),
            Column::new("user_id", DataType::Integer, 1),
        ])
    }

    #[test]
    fn test_add_arg_enforces_arity() {
        let mut now = Expr::call(Function::Now);
        assert!(matches!(
            now.add_arg(lit(1)),
            Err(Error::TooManyArguments { max: 0, .. })
        ));

        let mut count = Expr::Aggregate {
            func: AggregateFunc::Count,
            arg: None,
            distinct: false,
        };
        count.add_arg(Expr::column("id")).unwrap();
        assert!(count.add_arg(Expr::column("name")).is_err());

        assert!(lit(1).add_arg(lit(2)).is_err());
    }

    #[test]
    fn test_bind_is_pure() {
        let users = users();
        let mut scope = BindScope::new();
        scope.push("users", &users);

        let unbound = Expr::binary(BinaryOp::Eq, Expr::column("NAME"), lit("bob"));
        let bound = unbound.bind(&scope).unwrap();

        assert!(matches!(unbound, Expr::Binary { ref left, .. } if matches!(**left, Expr::Column { .. })));
        assert!(matches!(bound, Expr::Binary { ref left, .. }
            if matches!(**left, Expr::BoundColumn { table: 0, column: 1, .. })));
    }

    #[test]
    fn test_bind_errors() {
        let (users, orders) = (users(), orders());
        let mut scope = BindScope::new();
        scope.push("u", &users);
        scope.push("o", &orders);

        assert!(matches!(
            Expr::column("id").bind(&scope),
            Err(Error::AmbiguousColumn(_))
        ));
        assert!(matches!(
            Expr::column("missing").bind(&scope),
            Err(Error::ColumnNotFound(..))
        ));
        let qualified = Expr::Column {
            table: Some("o".to_string()),
            name: "id".to_string(),
        };
        assert!(matches!(
            qualified.bind(&scope).unwrap(),
            Expr::BoundColumn { table: 1, column: 0, .. }
        ));

        let short = Expr::call(Function::Mod);
        assert!(matches!(
            short.bind(&scope),
            Err(Error::TooFewArguments { .. })
        ));
    }

    #[test]
    fn test_cost_tracks_available_tables() {
        let (users, orders) = (users(), orders());
        let mut scope = BindScope::new();
        scope.push("u", &users);
        scope.push("o", &orders);

        let join = Expr::binary(
            BinaryOp::Eq,
            Expr::Column {
                table: Some("u".into()),
                name: "id".into(),
            },
            Expr::column("user_id"),
        )
        .bind(&scope)
        .unwrap();

        assert_eq!(join.cost(&[true, false]), COST_UNAVAILABLE);
        assert_eq!(join.cost(&[true, true]), 3);
        assert_eq!(lit(1).cost(&[]), 0);
        assert_eq!(Expr::column("id").cost(&[true]), COST_UNAVAILABLE);
    }

    #[test]
    fn test_eval_against_row() {
        let users = users();
        let mut scope = BindScope::new();
        scope.push("users", &users);
        let row = Tuple::new(vec![Value::Integer(7), Value::from("alice")]);

        let params = [Value::Integer(3)];
        let mut ctx = QueryContext::new(&params).with_tables(1);
        ctx.set_row(0, Some(&row));

        let expr = Expr::binary(BinaryOp::Mul, Expr::column("id"), Expr::Param(0))
            .bind(&scope)
            .unwrap();
        assert_eq!(expr.eval(&ctx).unwrap(), Value::Integer(21));
        assert_eq!(expr.eval_double(&ctx).unwrap(), 21.0);

        let like = Expr::Like {
            expr: Box::new(Expr::column("name")),
            pattern: Box::new(lit("a%c_")),
            negated: false,
        }
        .bind(&scope)
        .unwrap();
        assert_eq!(like.eval_bool(&ctx).unwrap(), Some(true));
    }

    #[test]
    fn test_bitwise_widening() {
        let ctx = QueryContext::new(&[]);
        let expr = Expr::binary(
            BinaryOp::BitOr,
            Expr::binary(BinaryOp::ShiftLeft, lit(1), lit(4)),
            lit(3),
        );
        assert!(expr.is_integer_only());
        assert_eq!(expr.eval_long(&ctx).unwrap(), 19);
        assert_eq!(expr.eval_double(&ctx).unwrap(), 19.0);
        assert_eq!(expr.eval_string(&ctx).unwrap(), Some("19".to_string()));
        assert_eq!(expr.result_type(), ExprType::Long);

        let not = Expr::Unary {
            op: UnaryOp::BitNot,
            expr: Box::new(lit(0)),
        };
        assert_eq!(not.eval(&ctx).unwrap(), Value::Integer(-1));
    }

    #[test]
    fn test_three_valued_logic() {
        let ctx = QueryContext::new(&[]);
        let null = || Expr::Literal(Value::Null);

        let and = Expr::binary(BinaryOp::And, null(), lit(false));
        assert_eq!(and.eval(&ctx).unwrap(), Value::Boolean(false));
        let or = Expr::binary(BinaryOp::Or, null(), lit(false));
        assert!(or.eval(&ctx).unwrap().is_null());

        let in_list = Expr::InList {
            expr: Box::new(lit(5)),
            list: vec![lit(1), null()],
            negated: false,
        };
        assert!(in_list.eval(&ctx).unwrap().is_null());

        let between = Expr::Between {
            expr: Box::new(lit(5)),
            low: Box::new(lit(1)),
            high: Box::new(lit(5)),
            negated: false,
        };
        assert_eq!(between.eval(&ctx).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn test_like_patterns() {
        assert!(like_match("hello", "h%o"));
        assert!(like_match("hello", "%"));
        assert!(like_match("", "%"));
        assert!(like_match("abc", "_b_"));
        assert!(!like_match("abc", "_b"));
        assert!(like_match("mississippi", "%iss%pi"));
        assert!(!like_match("abc", "abcd"));
    }

    #[test]
    fn test_extract_aggregates() {
        let sum = Expr::Aggregate {
            func: AggregateFunc::Sum,
            arg: Some(Box::new(Expr::column("x"))),
            distinct: false,
        };
        let expr = Expr::binary(BinaryOp::Add, sum.clone(), sum.clone());

        let mut aggregates = Vec::new();
        let rewritten = expr.extract_aggregates(&mut aggregates).unwrap();
        assert_eq!(aggregates, vec![sum]);
        assert_eq!(
            rewritten,
            Expr::binary(BinaryOp::Add, Expr::AggregateRef(0), Expr::AggregateRef(0))
        );
        assert!(!rewritten.contains_aggregate());
    }

    #[test]
    fn test_display() {
        let expr = Expr::binary(BinaryOp::Add, Expr::column("a"), lit(1));
        assert_eq!(expr.to_string(), "(a + 1)");
        let mut call = Expr::call(Function::Upper);
        call.add_arg(lit("x")).unwrap();
        assert_eq!(call.to_string(), "upper('x')");
    }
}
