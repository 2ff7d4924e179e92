use std::time::Duration;

use duckdb::{AccessMode, Config, Connection};
use log::warn;

/// Open a DuckDB connection, retrying with exponential backoff while another
/// process holds the lock on the file.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> Result<Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        let config = Config::default().access_mode(copy_access_mode(&access_mode))?;
        match Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!(
                    "Failed to open {} (attempt {}/{}): {}",
                    duckdb_path, attempts, max_attempts, e
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}

// `duckdb::AccessMode` does not implement `Clone`.
fn copy_access_mode(mode: &AccessMode) -> AccessMode {
    match mode {
        AccessMode::Automatic => AccessMode::Automatic,
        AccessMode::ReadOnly => AccessMode::ReadOnly,
        AccessMode::ReadWrite => AccessMode::ReadWrite,
    }
}

/// Quote a string as a SQL literal.
pub fn sql_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn open_existing_and_missing_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.duckdb");
        let path = path.to_str().unwrap();

        // read-only access needs an existing database
        let res = open_with_retry(path, 2, Duration::from_millis(1), AccessMode::ReadOnly);
        assert!(res.is_err());

        let conn = open_with_retry(path, 2, Duration::from_millis(1), AccessMode::ReadWrite)?;
        conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);")?;
        drop(conn);

        let conn = open_with_retry(path, 2, Duration::from_millis(1), AccessMode::ReadOnly)?;
        let x: i32 = conn.query_row("SELECT x FROM t", [], |row| row.get(0))?;
        assert_eq!(x, 1);
        Ok(())
    }

    #[test]
    fn quote_literals() {
        assert_eq!(sql_literal("/tmp/data.csv"), "'/tmp/data.csv'");
        assert_eq!(sql_literal("it's"), "'it''s'");
    }
}
