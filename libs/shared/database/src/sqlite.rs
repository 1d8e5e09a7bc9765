use std::path::Path;

use rusqlite::Connection;
use tracing::info;

use crate::DatabaseError;

const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../migrations/001_initial.sql"))];

/// Open a SQLite connection to the given path and run migrations
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_current_version(conn);

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            info!("Running migration v{}", version);
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version: *version,
                    reason: e.to_string(),
                })?;
        }
    }

    Ok(())
}

/// Drop every application table and rebuild the schema from scratch.
pub fn reset_schema(conn: &Connection) -> Result<(), DatabaseError> {
    info!("Dropping all tables");
    conn.execute_batch(
        "PRAGMA foreign_keys=OFF;
         DROP TABLE IF EXISTS reminders;
         DROP TABLE IF EXISTS appointments;
         DROP TABLE IF EXISTS availability_slots;
         DROP TABLE IF EXISTS users;
         DROP TABLE IF EXISTS schema_version;
         PRAGMA foreign_keys=ON;",
    )?;
    run_migrations(conn)
}

/// Schema version, 0 when no schema exists yet
fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .ok()
    .flatten()
    .unwrap_or(0)
}

pub fn count_tables(conn: &Connection) -> Result<i64, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(count)
}
