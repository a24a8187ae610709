use rusqlite::Connection;

use crate::types::error::MailsortError;

pub fn initialize_schema(conn: &Connection) -> Result<(), MailsortError> {
    conn.execute_batch("
        -- One row per relay decision. (message_id, account) is the dedup key.
        CREATE TABLE IF NOT EXISTS classifications (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id          TEXT NOT NULL,
            account             TEXT NOT NULL,
            subject             TEXT NOT NULL DEFAULT '',
            predicted_category  TEXT NOT NULL,
            confidence          REAL NOT NULL,
            processing_time     REAL NOT NULL,   -- seconds
            probabilities       TEXT,            -- JSON
            sender_domain       TEXT,
            created_at          INTEGER NOT NULL -- unix epoch ms
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_classifications_message
            ON classifications(message_id, account);
        CREATE INDEX IF NOT EXISTS idx_classifications_created
            ON classifications(created_at DESC);

        -- Labelled corpus, unique per message id across all accounts
        CREATE TABLE IF NOT EXISTS training_data (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  TEXT NOT NULL UNIQUE,
            account     TEXT NOT NULL,
            subject     TEXT NOT NULL DEFAULT '',
            body        TEXT NOT NULL DEFAULT '',
            category    TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_training_created
            ON training_data(created_at, id);
        CREATE INDEX IF NOT EXISTS idx_training_account
            ON training_data(account, category);

        CREATE TABLE IF NOT EXISTS reclassifications (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id    TEXT NOT NULL,
            account       TEXT NOT NULL,
            subject       TEXT NOT NULL DEFAULT '',
            old_category  TEXT NOT NULL,
            new_category  TEXT NOT NULL,
            old_folder    TEXT,
            new_folder    TEXT,
            created_at    INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reclassifications_created
            ON reclassifications(created_at DESC);

        CREATE TABLE IF NOT EXISTS folder_mappings (
            account          TEXT NOT NULL,
            folder           TEXT NOT NULL,
            category         TEXT NOT NULL,
            auto_discovered  INTEGER NOT NULL DEFAULT 0,
            message_count    INTEGER NOT NULL DEFAULT 0,
            last_checked     INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (account, folder)
        );

        -- Per-account multiplicative category preference, default 1.0
        CREATE TABLE IF NOT EXISTS user_weights (
            account     TEXT NOT NULL,
            category    TEXT NOT NULL,
            weight      REAL NOT NULL DEFAULT 1.0,
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (account, category)
        );

        CREATE TABLE IF NOT EXISTS model_metadata (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            model_id           TEXT NOT NULL,
            training_secs      REAL NOT NULL,
            feature_secs       REAL NOT NULL,
            sample_count       INTEGER NOT NULL,
            feature_dim        INTEGER NOT NULL,
            class_count        INTEGER NOT NULL,
            coefficient_count  INTEGER NOT NULL,
            serialized_bytes   INTEGER NOT NULL,
            created_at         INTEGER NOT NULL
        );

        -- Singleton row guarding against concurrent training runs
        CREATE TABLE IF NOT EXISTS training_status (
            id            INTEGER PRIMARY KEY CHECK (id = 1),
            is_training   INTEGER NOT NULL DEFAULT 0,
            started_at    INTEGER,
            sample_count  INTEGER NOT NULL DEFAULT 0,
            updated_at    INTEGER NOT NULL DEFAULT 0
        );

        INSERT OR IGNORE INTO training_status (id, is_training, updated_at) VALUES (1, 0, 0);
    ")?;

    // Additive migrations for databases created before these columns existed.
    // Errors mean the column is already there.
    let _ = conn.execute_batch("ALTER TABLE classifications ADD COLUMN probabilities TEXT");
    let _ = conn.execute_batch("ALTER TABLE classifications ADD COLUMN sender_domain TEXT");
    let _ = conn.execute_batch("ALTER TABLE reclassifications ADD COLUMN old_folder TEXT");
    let _ = conn.execute_batch("ALTER TABLE reclassifications ADD COLUMN new_folder TEXT");

    Ok(())
}
