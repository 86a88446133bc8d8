use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use blockdb::{Database, DatabaseConfig, Error, ResultSet, Value};
use tempfile::TempDir;

fn setup() -> Database {
    let db = Database::in_memory().unwrap();
    db.execute(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(50) NOT NULL, age INTEGER, dept_id INTEGER)",
        &[],
    )
    .unwrap();
    db.execute(
        "CREATE TABLE depts (id INTEGER PRIMARY KEY, title VARCHAR(50) UNIQUE)",
        &[],
    )
    .unwrap();
    db.execute(
        "INSERT INTO users VALUES (1, 'Alice', 30, 1), (2, 'Bob', 25, 2), (3, 'Carol', 35, 1), (4, 'Dan', NULL, NULL)",
        &[],
    )
    .unwrap();
    db.execute("INSERT INTO depts VALUES (1, 'Engineering'), (2, 'Sales')", &[])
        .unwrap();
    db
}

fn column(mut rs: ResultSet, index: usize) -> Vec<Value> {
    let mut out = Vec::new();
    while rs.next() {
        out.push(rs.get_value(index).unwrap().clone());
    }
    out
}

fn strings(rs: ResultSet, index: usize) -> Vec<String> {
    column(rs, index).iter().map(|v| v.to_string()).collect()
}

#[test]
fn test_select_where_order_limit() {
    let db = setup();
    let rs = db
        .execute(
            "SELECT name FROM users WHERE age > ? ORDER BY age DESC LIMIT 2",
            &[Value::Integer(20)],
        )
        .unwrap();
    assert_eq!(rs.column_names(), &["name".to_string()]);
    assert_eq!(strings(rs, 0), vec!["Carol", "Alice"]);

    let rs = db
        .execute("SELECT id FROM users ORDER BY id LIMIT 2 OFFSET 1", &[])
        .unwrap();
    assert_eq!(column(rs, 0), vec![Value::Integer(2), Value::Integer(3)]);
}

#[test]
fn test_null_handling() {
    let db = setup();
    let rs = db
        .execute("SELECT name FROM users WHERE age IS NULL", &[])
        .unwrap();
    assert_eq!(strings(rs, 0), vec!["Dan"]);

    // NULL never satisfies a comparison
    let rs = db
        .execute("SELECT COUNT(*) FROM users WHERE age <> 30", &[])
        .unwrap();
    assert_eq!(column(rs, 0), vec![Value::Integer(2)]);

    let mut rs = db
        .execute("SELECT age FROM users WHERE id = 4", &[])
        .unwrap();
    assert!(rs.next());
    assert!(rs.is_null(0).unwrap());
    assert_eq!(rs.get_string(0).unwrap(), None);
}

#[test]
fn test_join_with_aliases() {
    let db = setup();
    let rs = db
        .execute(
            "SELECT u.name, d.title FROM users u, depts d WHERE u.dept_id = d.id AND d.title = 'Engineering' ORDER BY u.name",
            &[],
        )
        .unwrap();
    assert_eq!(rs.column_names(), &["u.name".to_string(), "d.title".to_string()]);
    assert_eq!(rs.row_count(), 2);
    assert_eq!(strings(rs, 0), vec!["Alice", "Carol"]);

    let err = db
        .execute("SELECT id FROM users, depts", &[])
        .unwrap_err();
    assert!(matches!(err, Error::AmbiguousColumn(_)), "{:?}", err);
}

#[test]
fn test_group_by_and_having() {
    let db = setup();
    let rs = db
        .execute(
            "SELECT dept_id, COUNT(*) AS n, SUM(age), AVG(age) FROM users GROUP BY dept_id HAVING COUNT(*) > 1",
            &[],
        )
        .unwrap();
    assert_eq!(rs.row_count(), 1);
    let row = &rs.rows()[0];
    assert_eq!(row.get(0), Some(&Value::Integer(1)));
    assert_eq!(row.get(1), Some(&Value::Integer(2)));
    assert_eq!(row.get(2), Some(&Value::Integer(65)));
    assert_eq!(row.get(3), Some(&Value::Float(32.5)));

    let rs = db
        .execute("SELECT MIN(age), MAX(name), COUNT(age) FROM users", &[])
        .unwrap();
    let row = &rs.rows()[0];
    assert_eq!(row.get(0), Some(&Value::Integer(25)));
    assert_eq!(row.get(1), Some(&Value::from("Dan")));
    assert_eq!(row.get(2), Some(&Value::Integer(3)));
}

#[test]
fn test_aggregates_over_no_rows() {
    let db = setup();
    let rs = db
        .execute("SELECT COUNT(*), SUM(age) FROM users WHERE id > 100", &[])
        .unwrap();
    assert_eq!(rs.row_count(), 1);
    let row = &rs.rows()[0];
    assert_eq!(row.get(0), Some(&Value::Integer(0)));
    assert_eq!(row.get(1), Some(&Value::Null));

    let rs = db
        .execute("SELECT dept_id, COUNT(*) FROM users WHERE id > 100 GROUP BY dept_id", &[])
        .unwrap();
    assert_eq!(rs.row_count(), 0);
}

#[test]
fn test_distinct_and_order_by_position() {
    let db = setup();
    let rs = db
        .execute("SELECT DISTINCT dept_id FROM users WHERE dept_id IS NOT NULL ORDER BY 1 DESC", &[])
        .unwrap();
    assert_eq!(column(rs, 0), vec![Value::Integer(2), Value::Integer(1)]);
}

#[test]
fn test_update_and_delete() {
    let db = setup();
    let rs = db
        .execute("UPDATE users SET age = age + 1 WHERE dept_id = 1", &[])
        .unwrap();
    assert_eq!(rs.update_count(), 2);

    let rs = db
        .execute("SELECT age FROM users WHERE dept_id = 1 ORDER BY id", &[])
        .unwrap();
    assert_eq!(column(rs, 0), vec![Value::Integer(31), Value::Integer(36)]);

    let rs = db.execute("DELETE FROM users WHERE age IS NULL", &[]).unwrap();
    assert_eq!(rs.update_count(), 1);
    let rs = db.execute("DELETE FROM users", &[]).unwrap();
    assert_eq!(rs.update_count(), 3);
    let rs = db.execute("SELECT COUNT(*) FROM users", &[]).unwrap();
    assert_eq!(column(rs, 0), vec![Value::Integer(0)]);
}

#[test]
fn test_constraints() {
    let db = setup();
    assert!(matches!(
        db.execute("INSERT INTO users VALUES (1, 'Again', 1, 1)", &[]),
        Err(Error::PrimaryKeyViolation(_))
    ));
    assert!(matches!(
        db.execute("INSERT INTO users (id, age) VALUES (9, 1)", &[]),
        Err(Error::NullNotAllowed(_))
    ));
    assert!(matches!(
        db.execute("INSERT INTO depts VALUES (3, 'Sales')", &[]),
        Err(Error::UniqueViolation(_))
    ));
    assert!(matches!(
        db.execute("UPDATE users SET id = 2 WHERE id = 1", &[]),
        Err(Error::PrimaryKeyViolation(_))
    ));
}

#[test]
fn test_compile_errors() {
    let db = setup();
    assert!(matches!(
        db.execute("SELECT nosuch FROM users", &[]),
        Err(Error::ColumnNotFound(..))
    ));
    assert!(matches!(
        db.execute("SELECT * FROM nowhere", &[]),
        Err(Error::TableNotFound(_))
    ));
    assert!(matches!(
        db.execute("SELECT ABS(1, 2)", &[]),
        Err(Error::TooManyArguments { .. })
    ));
    assert!(matches!(
        db.execute("SELECT FROBNICATE(1)", &[]),
        Err(Error::UnknownFunction(_))
    ));
    assert!(matches!(
        db.execute("SELECT 1 / 0", &[]),
        Err(Error::DivisionByZero)
    ));
    assert!(matches!(
        db.execute("SELECT NOW() + 9223372036854775807", &[]),
        Err(Error::ExecutionError(_))
    ));
}

#[test]
fn test_functions_and_expressions() {
    let db = setup();
    let mut rs = db
        .execute(
            "SELECT UPPER(name) || '!', LENGTH(name), 7 & 3, NOW() IS NOT NULL, COALESCE(age, -1) FROM users WHERE id = 4",
            &[],
        )
        .unwrap();
    assert!(rs.next());
    assert_eq!(rs.get_string(0).unwrap().as_deref(), Some("DAN!"));
    assert_eq!(rs.get_long(1).unwrap(), 3);
    assert_eq!(rs.get_long(2).unwrap(), 3);
    assert_eq!(rs.get_string(3).unwrap().as_deref(), Some("TRUE"));
    assert_eq!(rs.get_long(4).unwrap(), -1);
}

#[test]
fn test_ddl_statements() {
    let db = setup();
    assert!(matches!(
        db.execute("CREATE TABLE users (x INTEGER)", &[]),
        Err(Error::TableAlreadyExists(_))
    ));
    db.execute("CREATE TABLE IF NOT EXISTS users (x INTEGER)", &[])
        .unwrap();

    let rs = db.execute("SHOW TABLES", &[]).unwrap();
    assert_eq!(strings(rs, 0), vec!["depts", "users"]);

    db.execute("DROP TABLE depts", &[]).unwrap();
    db.execute("DROP TABLE IF EXISTS depts", &[]).unwrap();
    assert!(matches!(
        db.execute("DROP TABLE depts", &[]),
        Err(Error::TableNotFound(_))
    ));
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new().path(dir.path());
    {
        let db = Database::open(config.clone()).unwrap();
        db.execute(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTO_INCREMENT, body TEXT, created TIMESTAMP)",
            &[],
        )
        .unwrap();
        let insert = db.parse_query("INSERT INTO notes (body) VALUES (?)").unwrap();
        for i in 0..500 {
            insert
                .execute(&db, &[Value::from(format!("note number {}", i))])
                .unwrap();
        }
        db.close().unwrap();
    }

    let db = Database::open(config).unwrap();
    let rs = db
        .execute("SELECT COUNT(*), MAX(id) FROM notes", &[])
        .unwrap();
    assert_eq!(rs.rows()[0].get(0), Some(&Value::Integer(500)));
    assert_eq!(rs.rows()[0].get(1), Some(&Value::Integer(500)));

    // The counter continues after the stored maximum
    db.execute("INSERT INTO notes (body) VALUES ('late')", &[])
        .unwrap();
    let mut rs = db
        .execute("SELECT id FROM notes WHERE body = 'late'", &[])
        .unwrap();
    assert!(rs.next());
    assert_eq!(rs.get_long(0).unwrap(), 501);
}

#[test]
fn test_insert_takes_an_idle_table_without_waiting() {
    let db = setup();
    let users = db.get_table("users").unwrap().unwrap();
    db.execute("INSERT INTO users VALUES (5, 'Eve', 41, 2)", &[])
        .unwrap();
    assert!(users.lock().is_idle());
    assert_eq!(users.lock().waiting(), 0);
    assert_eq!(users.row_count(), 5);
}

#[test]
fn test_insert_waits_for_readers() {
    let db = Arc::new(setup());
    let users = db.get_table("users").unwrap().unwrap();
    let reader = users.read().unwrap();

    let other = db.clone();
    let insert = thread::spawn(move || {
        other.execute("INSERT INTO users VALUES (5, 'Eve', 41, 2)", &[])
    });
    let deadline = Instant::now() + Duration::from_secs(10);
    while users.lock().waiting() == 0 {
        assert!(Instant::now() < deadline, "insert never queued");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(users.row_count(), 4);

    drop(reader);
    assert_eq!(insert.join().unwrap().unwrap().update_count(), 1);
    assert_eq!(users.row_count(), 5);
}

#[test]
fn test_primary_key_checks_scale_with_the_index() {
    let db = Database::in_memory().unwrap();
    db.execute("CREATE TABLE wide (id INTEGER PRIMARY KEY, tag VARCHAR(20) UNIQUE)", &[])
        .unwrap();
    let insert = db.parse_query("INSERT INTO wide VALUES (?, ?)").unwrap();
    for i in 0..5000 {
        insert
            .execute(&db, &[Value::Integer(i), Value::from(format!("tag-{}", i))])
            .unwrap();
    }
    assert!(matches!(
        insert.execute(&db, &[Value::Integer(4999), Value::from("fresh")]),
        Err(Error::PrimaryKeyViolation(_))
    ));
    assert!(matches!(
        insert.execute(&db, &[Value::Integer(5000), Value::from("tag-17")]),
        Err(Error::UniqueViolation(_))
    ));

    // Freed keys can be used again
    db.execute("DELETE FROM wide WHERE id < 100", &[]).unwrap();
    insert
        .execute(&db, &[Value::Integer(17), Value::from("tag-17")])
        .unwrap();
    let rs = db.execute("SELECT COUNT(*) FROM wide", &[]).unwrap();
    assert_eq!(rs.rows()[0].get(0), Some(&Value::Integer(4901)));
}

#[test]
fn test_delete_churn_reuses_space() {
    let db = Database::in_memory().unwrap();
    db.execute("CREATE TABLE queue (id INTEGER PRIMARY KEY, body VARCHAR(60))", &[])
        .unwrap();
    let push = db.parse_query("INSERT INTO queue VALUES (?, ?)").unwrap();
    let pop = db.parse_query("DELETE FROM queue WHERE id = ?").unwrap();
    let body = Value::from("x".repeat(60));
    for i in 0..5000 {
        push.execute(&db, &[Value::Integer(i), body.clone()]).unwrap();
        assert_eq!(pop.execute(&db, &[Value::Integer(i)]).unwrap().update_count(), 1);
    }
    let queue = db.get_table("queue").unwrap().unwrap();
    assert_eq!(queue.row_count(), 0);
    assert_eq!(queue.block_count(), 1);
}
