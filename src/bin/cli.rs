//! BlockDB - interactive shell over an embedded database
//!
//! Usage: blockdb-cli [DIR] [--config FILE] [--remove-on-error]
//!
//! Without a directory the database lives in memory.

use std::env;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use blockdb::storage::Tuple;
use blockdb::{Database, DatabaseConfig};

fn print_banner(db: &Database) {
    let location = match &db.config().path {
        Some(path) => path.display().to_string(),
        None => "memory".to_string(),
    };
    println!("BlockDB shell ({})", location);
    println!("Type '.help' for help, '.quit' to exit");
}

fn print_help() {
    println!(
        r#"
Commands:
  .help              Show this help message
  .quit              Exit
  .tables            List all tables
  .schema <table>    Show the CREATE TABLE statement of a table

SQL Commands:
  CREATE TABLE ...   Create a new table
  DROP TABLE ...     Drop a table
  INSERT INTO ...    Insert rows
  SELECT ...         Query data
  UPDATE ...         Update rows
  DELETE FROM ...    Delete rows
  SHOW TABLES        List all tables

Statements end with ';' and may span several lines.

Examples:
  CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(100));
  INSERT INTO users VALUES (1, 'Alice'), (2, 'Bob');
  SELECT * FROM users WHERE id = 1;
"#
    );
}

/// Format query results as a table
fn format_results(columns: &[String], rows: &[Tuple]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.values().iter().map(|v| v.to_string()).collect())
        .collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let separator = format!(
        "+{}+\n",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );

    let mut output = separator.clone();
    let header = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!(" {:^width$} ", c, width = *w))
        .collect::<Vec<_>>()
        .join("|");
    output.push_str(&format!("|{}|\n", header));
    output.push_str(&separator);

    for row in &cells {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!(" {:>width$} ", v, width = *w))
            .collect::<Vec<_>>()
            .join("|");
        output.push_str(&format!("|{}|\n", line));
    }
    if !cells.is_empty() {
        output.push_str(&separator);
    }
    output.push_str(&format!("{} row(s) returned\n", cells.len()));
    output
}

fn execute_sql(db: &Database, sql: &str) {
    let sql = sql.trim();
    if sql.is_empty() {
        return;
    }

    match db.execute(sql, &[]) {
        Ok(result) if !result.column_names().is_empty() => {
            print!("{}", format_results(result.column_names(), result.rows()));
        }
        Ok(result) => println!("{} row(s) affected", result.update_count()),
        Err(e) => eprintln!("Error: {}", e),
    }
}

/// Handle a dot command. Returns false when the shell should exit.
fn handle_special_command(db: &Database, cmd: &str) -> bool {
    let parts: Vec<&str> = cmd.split_whitespace().collect();

    match parts.first().copied() {
        Some(".help") => print_help(),
        Some(".quit") | Some(".exit") => return false,
        Some(".tables") => match db.table_names() {
            Ok(tables) if tables.is_empty() => println!("No tables found."),
            Ok(tables) => {
                for table in tables {
                    println!("  {}", table);
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        },
        Some(".schema") => match parts.get(1) {
            Some(name) => match db.get_table(name) {
                Ok(Some(table)) => println!("{};", table.create_sql()),
                Ok(None) => eprintln!("Error: table '{}' not found", name),
                Err(e) => eprintln!("Error: {}", e),
            },
            None => eprintln!("Usage: .schema <table>"),
        },
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Type '.help' for available commands.");
        }
        None => {}
    }
    true
}

fn parse_args() -> Result<DatabaseConfig> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut config = DatabaseConfig::new();
    let mut dir = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let file = args.get(i + 1).context("--config needs a file name")?;
                config = DatabaseConfig::load(file)
                    .with_context(|| format!("reading config file {}", file))?;
                i += 1;
            }
            "--remove-on-error" => config = config.remove_on_error(true),
            path => dir = Some(path.to_string()),
        }
        i += 1;
    }

    if let Some(dir) = dir {
        config = config.path(dir);
    }
    Ok(config)
}

fn run_repl(db: &Database) -> Result<()> {
    let mut editor = DefaultEditor::new()?;
    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() { "blockdb> " } else { "   ...> " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let trimmed = line.trim();
        if buffer.is_empty() && trimmed.starts_with('.') {
            let _ = editor.add_history_entry(trimmed);
            if !handle_special_command(db, trimmed) {
                break;
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }

        buffer.push_str(&line);
        buffer.push('\n');
        if trimmed.ends_with(';') {
            let _ = editor.add_history_entry(buffer.trim());
            execute_sql(db, &buffer);
            buffer.clear();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = parse_args()?;
    let db = Database::open(config).context("opening database")?;
    print_banner(&db);

    run_repl(&db)?;

    db.close()?;
    println!("Goodbye!");
    Ok(())
}
