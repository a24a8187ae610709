use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

use crate::types::error::MailsortError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Writers wait this long on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Creates the database directory, connection pool, and initializes the schema.
pub fn initialize(db_path: &Path) -> Result<DbPool, MailsortError> {
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| MailsortError::Database(format!("Failed to create db dir: {e}")))?;
    }

    let pool = create_pool(db_path)?;
    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    super::schema::initialize_schema(&conn)?;
    super::training_status::reset_stale(&conn)?;

    Ok(pool)
}

fn create_pool(db_path: &Path) -> Result<DbPool, MailsortError> {
    // busy_timeout is per connection, so it goes in the init hook
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;"
        ))
    });

    let pool = Pool::builder().max_size(8).build(manager)?;
    Ok(pool)
}

/// In-memory database with the full schema. A single pooled connection keeps it alive.
pub fn in_memory() -> Result<DbPool, MailsortError> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)?;

    let conn = pool.get()?;
    super::schema::initialize_schema(&conn)?;

    Ok(pool)
}
