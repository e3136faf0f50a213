use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS user (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                username        TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                verified_email  INTEGER NOT NULL DEFAULT 0,
                otp_token       TEXT,
                otp_expires_at  TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            -- Ordered pair: (a, b) and (b, a) are distinct conversations.
            CREATE TABLE IF NOT EXISTS conversation (
                id              TEXT PRIMARY KEY,
                sender_id       TEXT NOT NULL,
                receiver_id     TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE(sender_id, receiver_id)
            );

            -- No reference to conversation(id): existence is not checked on write.
            CREATE TABLE IF NOT EXISTS message (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id       TEXT NOT NULL,
                message         TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_message_conversation
                ON message(conversation_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
