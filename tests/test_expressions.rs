use blockdb::catalog::{Column, DataType, Schema};
use blockdb::executor::QueryContext;
use blockdb::sql::{BindScope, Expr, ExprType, Function, Parser, COST_UNAVAILABLE};
use blockdb::storage::Tuple;
use blockdb::{Error, Value};

fn parse(sql: &str) -> Expr {
    Parser::new(sql).unwrap().parse_expression().unwrap()
}

fn orders() -> Schema {
    Schema::from_columns(vec![
        Column::new("id", DataType::Integer, 0),
        Column::new("amount", DataType::Double, 1),
        Column::new("placed", DataType::Timestamp, 2),
    ])
}

#[test]
fn test_bind_leaves_original_untouched() {
    let schema = orders();
    let mut scope = BindScope::new();
    scope.push("o", &schema);

    let unbound = parse("o.amount * 2 > 10 AND id <> ?");
    let copy = unbound.clone();
    let bound = unbound.bind(&scope).unwrap();

    assert_eq!(unbound, copy);
    assert_ne!(bound, unbound);
    // Binding again gives the same tree
    assert_eq!(unbound.bind(&scope).unwrap(), bound);
    assert_eq!(bound.result_type(), ExprType::Boolean);

    let row = Tuple::new(vec![Value::Integer(7), Value::Float(6.0), Value::Null]);
    let params = [Value::Integer(8)];
    let mut ctx = QueryContext::new(&params).with_tables(1);
    ctx.set_row(0, Some(&row));
    assert_eq!(bound.eval_bool(&ctx).unwrap(), Some(true));
}

#[test]
fn test_cost_needs_every_table() {
    let a = orders();
    let b = orders();
    let mut scope = BindScope::new();
    scope.push("a", &a);
    scope.push("b", &b);

    let join = parse("a.id = b.id").bind(&scope).unwrap();
    assert_eq!(join.cost(&[true, false]), COST_UNAVAILABLE);
    assert!(join.cost(&[true, true]) < COST_UNAVAILABLE);
    assert_eq!(parse("1 + 2").cost(&[]), 1);
}

#[test]
fn test_now_is_current_time() {
    let now = parse("NOW()").bind(&BindScope::new()).unwrap();
    let before = chrono::Utc::now().timestamp_millis();
    let ctx = QueryContext::new(&[]);
    let after = chrono::Utc::now().timestamp_millis();

    let value = now.eval_long(&ctx).unwrap();
    assert!(value >= before && value <= after);
    // Every read within one context sees the same instant
    assert_eq!(now.eval_long(&ctx).unwrap(), value);
    assert!(matches!(now.eval(&ctx).unwrap(), Value::Timestamp(_)));

    let pinned = QueryContext::new(&[]).with_now(86_400_000);
    let today = parse("CURRENT_DATE").bind(&BindScope::new()).unwrap();
    assert_eq!(today.eval_string(&pinned).unwrap().as_deref(), Some("1970-01-02"));
}

#[test]
fn test_add_arg_rejects_extra_arguments() {
    let mut call = Expr::call(Function::Now);
    let err = call.add_arg(Expr::Literal(Value::Integer(1))).unwrap_err();
    assert!(matches!(err, Error::TooManyArguments { .. }));
    assert!(err.to_string().contains("too many arguments"), "{}", err);

    let mut modulo = Expr::call(Function::Mod);
    modulo.add_arg(Expr::Literal(Value::Integer(7))).unwrap();
    assert!(matches!(
        modulo.bind(&BindScope::new()),
        Err(Error::TooFewArguments { .. })
    ));
    modulo.add_arg(Expr::Literal(Value::Integer(3))).unwrap();
    assert!(modulo.add_arg(Expr::Literal(Value::Integer(1))).is_err());

    let bound = modulo.bind(&BindScope::new()).unwrap();
    assert_eq!(bound.eval_long(&QueryContext::new(&[])).unwrap(), 1);
}

#[test]
fn test_integer_only_nodes_widen_to_double() {
    let expr = parse("LENGTH('hello') | 8").bind(&BindScope::new()).unwrap();
    assert!(expr.is_integer_only());
    let ctx = QueryContext::new(&[]);
    assert_eq!(expr.eval_long(&ctx).unwrap(), 13);
    assert_eq!(expr.eval_double(&ctx).unwrap(), 13.0);
}
