use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;

use minidb_bin::engine::{Engine, DEFAULT_BUFFER_POOL_PAGES};
use minidb_bin::types::QueryResult;
use strata::datum::{Value, ValueType};

const BANNER: &str = r#"
 __  __ _       _ ____  ____
|  \/  (_)_ __ (_)  _ \| __ )
| |\/| | | '_ \| | | | |  _ \
| |  | | | | | | | |_| | |_) |
|_|  |_|_|_| |_|_|____/|____/

A disk-based database with WAL, MVCC, B-Tree, and transactions
Type 'help' for available commands, 'exit' to quit.
"#;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MINIDB_DATA_DIR").ok())
        .unwrap_or_else(|| "./minidb-data".to_string());
    let buffer_pages = std::env::var("MINIDB_BUFFER_PAGES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_BUFFER_POOL_PAGES);

    print!("{BANNER}");
    println!("Data directory: {data_dir}");
    println!("Buffer pool: {buffer_pages} pages ({} KB)", buffer_pages * 4);

    let mut engine = match Engine::new(&data_dir, buffer_pages) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to start database: {e}");
            std::process::exit(1);
        }
    };

    println!("Database ready.");
    println!();

    let stdin = io::stdin();
    loop {
        print!("minidb> ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let lower = input.to_lowercase();
        match lower.as_str() {
            "exit" | "quit" | "\\q" => break,
            "help" | "\\h" => {
                print_help();
                continue;
            }
            "stats" | "\\s" => {
                print_stats(&engine);
                continue;
            }
            "tables" | "\\dt" => {
                print_tables(&engine);
                continue;
            }
            "checkpoint" => {
                match engine.checkpoint() {
                    Ok(()) => println!("Checkpoint created."),
                    Err(e) => println!("Checkpoint failed: {e}"),
                }
                continue;
            }
            "vacuum" => {
                run_vacuum(&mut engine);
                continue;
            }
            _ => {}
        }

        if let Some(rest) = lower.strip_prefix("create index on ") {
            match parse_index_target(rest) {
                Some((table, column)) => match engine.create_index(&table, &column) {
                    Ok(()) => println!("Index created on {table}({column})"),
                    Err(e) => println!("Create index failed: {e}"),
                },
                None => println!("Usage: create index on <table>(<column>)"),
            }
            continue;
        }

        match engine.execute(input) {
            Ok(result) => print_result(&result),
            Err(e) => println!("ERROR: {e}"),
        }
    }

    if let Err(e) = engine.close() {
        eprintln!("Error closing database: {e}");
    }
    println!("Goodbye!");
}

fn parse_index_target(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    let open = rest.find('(')?;
    if !rest.ends_with(')') {
        return None;
    }
    let table = rest[..open].trim();
    let column = rest[open + 1..rest.len() - 1].trim();
    if table.is_empty() || column.is_empty() {
        return None;
    }
    Some((table.to_string(), column.to_string()))
}

fn run_vacuum(engine: &mut Engine) {
    match engine.vacuum() {
        Ok(report) => {
            let total = report.total_removed();
            if total == 0 {
                println!("VACUUM: removed 0 dead tuples.");
            } else {
                println!("VACUUM: removed {total} dead tuples.");
                for stats in &report.tables {
                    if stats.removed > 0 {
                        println!(
                            "  {}: scanned {}, removed {}",
                            stats.table_name, stats.scanned, stats.removed
                        );
                    }
                }
            }
        }
        Err(e) => println!("VACUUM failed: {e}"),
    }
}

fn print_result(result: &QueryResult) {
    if !result.rows.is_empty() {
        let mut widths: Vec<usize> = result.columns.iter().map(|c| c.len()).collect();
        let rendered: Vec<Vec<String>> = result
            .rows
            .iter()
            .map(|row| row.iter().map(format_value).collect())
            .collect();
        for row in &rendered {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.len());
            }
        }

        print_separator(&widths);
        print_row(&result.columns, &widths);
        print_separator(&widths);
        for row in &rendered {
            print_row(row, &widths);
        }
        print_separator(&widths);
        println!();
    }

    if !result.message.is_empty() {
        println!("{}", result.message);
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

fn print_row<S: AsRef<str>>(cells: &[S], widths: &[usize]) {
    print!("| ");
    for (i, cell) in cells.iter().enumerate() {
        print!("{:<width$} | ", cell.as_ref(), width = widths[i]);
    }
    println!();
}

fn print_separator(widths: &[usize]) {
    print!("+");
    for w in widths {
        print!("{}+", "-".repeat(w + 2));
    }
    println!();
}

fn print_stats(engine: &Engine) {
    let stats = engine.stats();
    println!();
    println!("Database statistics");
    println!("  WAL current LSN:     {}", stats.wal_current_lsn);
    println!("  WAL flushed LSN:     {}", stats.wal_flushed_lsn);
    println!("  Active txns:         {}", stats.active_txns);
    println!("  Disk pages:          {}", stats.disk_pages);
    println!("  Tables:              {}", stats.tables);
    println!("  Buffer pool hits:    {}", stats.buffer_hits);
    println!("  Buffer pool misses:  {}", stats.buffer_misses);
    println!("  Buffer pool cached:  {}", stats.buffer_cached);
    println!("  Buffer hit rate:     {:.1}%", stats.hit_rate());
    println!();
}

fn print_tables(engine: &Engine) {
    let catalog = engine.catalog();
    let tables = catalog.table_names();
    if tables.is_empty() {
        println!("No tables found.");
        return;
    }

    println!();
    println!("Tables:");
    for name in tables {
        let Some(table_id) = catalog.table_id(&name) else {
            continue;
        };
        let Some(schema) = catalog.schema(&name) else {
            continue;
        };
        println!("  {name} (id={table_id})");
        for column in &schema.columns {
            let type_name = match column.ty {
                ValueType::Int => "INT",
                ValueType::Text => "TEXT",
                ValueType::Bool => "BOOL",
                ValueType::Null => "UNKNOWN",
            };
            let nullable = if column.nullable { "" } else { " NOT NULL" };
            println!("    - {} {}{}", column.name, type_name, nullable);
        }
    }
    println!();
}

fn print_help() {
    println!(
        r#"
Commands:
  help, \h          Show this help message
  stats, \s         Show database statistics
  tables, \dt       List all tables
  checkpoint        Create a checkpoint
  vacuum            Remove dead tuples (MVCC garbage collection)
  create index on <table>(<column>)  Create B-Tree index
  exit, quit        Exit the database

SQL Statements:
  CREATE TABLE name (col1 TYPE [NOT NULL], ...)
    Types: INT, TEXT, BOOL

  INSERT INTO table [(col1, col2)] VALUES (val1, val2)

  SELECT col1, col2 FROM table [WHERE condition]
  SELECT * FROM table

  UPDATE table SET col1 = val1 [WHERE condition]

  DELETE FROM table [WHERE condition]

  BEGIN       Start a transaction
  COMMIT      Commit the current transaction
  ROLLBACK    Rollback the current transaction

Examples:
  CREATE TABLE users (id INT, name TEXT, active BOOL)
  INSERT INTO users (id, name, active) VALUES (1, 'Alice', TRUE)
  SELECT * FROM users
  checkpoint
  stats
"#
    );
}
