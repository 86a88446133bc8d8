use std::fs;
use std::mem;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blockdb::catalog::{Column, DataType, Schema};
use blockdb::{Database, DatabaseConfig, Error, Value};
use tempfile::TempDir;

fn schema() -> Schema {
    Schema::from_columns(vec![
        Column::new("id", DataType::Integer, 0).primary_key(true),
        Column::new("name", DataType::Varchar(32), 1),
    ])
}

/// Create a table with one row in `dir`, then close the database
fn seed(dir: &TempDir, table: &str) {
    let db = Database::open(DatabaseConfig::new().path(dir.path())).unwrap();
    db.create_table(table, schema())
        .unwrap()
        .insert(vec![Value::Integer(1), Value::from("first")])
        .unwrap();
    db.close().unwrap();
}

#[test]
fn test_concurrent_get_table_loads_once() {
    let dir = TempDir::new().unwrap();
    seed(&dir, "shared");

    let db = Arc::new(Database::open(DatabaseConfig::new().path(dir.path())).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = db.clone();
            thread::spawn(move || db.get_table("shared").unwrap().unwrap())
        })
        .collect();
    let tables: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for table in &tables {
        assert!(Arc::ptr_eq(table, &tables[0]));
    }
    assert_eq!(tables[0].row_count(), 1);
}

#[test]
fn test_get_table_is_idempotent() {
    let dir = TempDir::new().unwrap();
    seed(&dir, "t");

    let db = Database::open(DatabaseConfig::new().path(dir.path())).unwrap();
    let first = db.get_table("t").unwrap().unwrap();
    let second = db.get_table("T").unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert!(db.get_table("missing").unwrap().is_none());
}

#[test]
fn test_corrupt_table_removed_when_allowed() {
    let dir = TempDir::new().unwrap();
    seed(&dir, "broken");
    let path = dir.path().join("broken.db");
    fs::write(&path, vec![0xAB; 100]).unwrap();

    let db = Database::open(
        DatabaseConfig::new()
            .path(dir.path())
            .remove_on_error(true),
    )
    .unwrap();
    assert!(db.get_table("broken").unwrap().is_none());
    assert!(!path.exists());

    // The name is free again
    db.create_table("broken", schema()).unwrap();
    assert!(path.exists());
}

#[test]
fn test_corrupt_table_kept_by_default() {
    let dir = TempDir::new().unwrap();
    seed(&dir, "broken");
    let path = dir.path().join("broken.db");
    let garbage = vec![0xAB; 100];
    fs::write(&path, &garbage).unwrap();

    let db = Database::open(DatabaseConfig::new().path(dir.path())).unwrap();
    let err = db.get_table("broken").unwrap_err();
    assert!(err.is_corruption(), "{:?}", err);
    assert_eq!(fs::read(&path).unwrap(), garbage);

    // Still reported on the next attempt, and nothing was registered
    assert!(db.get_table("broken").is_err());
    assert!(matches!(
        db.create_table("broken", schema()),
        Err(Error::TableAlreadyExists(_))
    ));
}

#[test]
fn test_drop_table_deletes_file() {
    let dir = TempDir::new().unwrap();
    seed(&dir, "gone");
    let path = dir.path().join("gone.db");

    let db = Database::open(DatabaseConfig::new().path(dir.path())).unwrap();
    db.drop_table("gone").unwrap();
    assert!(!path.exists());
    assert!(db.table_names().unwrap().is_empty());
    assert!(matches!(db.drop_table("gone"), Err(Error::TableNotFound(_))));
}

#[test]
fn test_close_flushes_every_table() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new().path(dir.path());
    {
        let db = Database::open(config.clone()).unwrap();
        for name in ["a", "b", "c"] {
            let table = db.create_table(name, schema()).unwrap();
            for i in 0..50 {
                table
                    .insert(vec![Value::Integer(i), Value::from(format!("row {}", i))])
                    .unwrap();
            }
        }
        // Dropping the database closes it
    }

    let db = Database::open(config).unwrap();
    assert_eq!(db.table_names().unwrap(), vec!["a", "b", "c"]);
    for name in ["a", "b", "c"] {
        assert_eq!(db.get_table(name).unwrap().unwrap().row_count(), 50);
    }
}

#[test]
fn test_unclean_shutdown_keeps_the_table() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new().path(dir.path());
    {
        let db = Database::open(config.clone()).unwrap();
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Integer, 0).primary_key(true),
            Column::new("body", DataType::Text, 1),
        ]);
        let table = db.create_table("log", schema).unwrap();
        for i in 0..200 {
            table
                .insert(vec![Value::Integer(i), Value::from(format!("{:>200}", i))])
                .unwrap();
        }
        db.close().unwrap();
    }
    {
        // A small cache forces row blocks out to the file mid-run
        let db = Database::open(config.clone().min_memory(0)).unwrap();
        let table = db.get_table("log").unwrap().unwrap();
        for i in 200..3000 {
            table
                .insert(vec![Value::Integer(i), Value::from(format!("{:>200}", i))])
                .unwrap();
        }
        assert!(db.cache_stats().evictions > 0);
        mem::forget(db);
    }

    let db = Database::open(config.remove_on_error(true)).unwrap();
    let table = db.get_table("log").unwrap().expect("table survives");
    assert!(dir.path().join("log.db").exists());
    let rows = table.row_count();
    assert!((200..=3000).contains(&rows), "{} rows", rows);
}

#[test]
fn test_close_continues_past_a_failed_table() {
    let dir = TempDir::new().unwrap();
    let config = DatabaseConfig::new()
        .path(dir.path())
        .lock_timeout(Duration::from_millis(50));
    {
        let db = Database::open(config.clone()).unwrap();
        for name in ["a", "b", "c"] {
            let table = db.create_table(name, schema()).unwrap();
            for i in 0..50 {
                table
                    .insert(vec![Value::Integer(i), Value::from(format!("row {}", i))])
                    .unwrap();
            }
        }

        // "b" cannot be closed while its write lock is held
        let busy = db.get_table("b").unwrap().unwrap();
        let held = busy.write().unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        drop(held);
    }

    let db = Database::open(config).unwrap();
    for name in ["a", "c"] {
        assert_eq!(db.get_table(name).unwrap().unwrap().row_count(), 50);
    }
    assert!(db.get_table("b").unwrap().is_some());
}
