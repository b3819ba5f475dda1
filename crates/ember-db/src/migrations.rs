use crate::error::StoreError;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS accounts (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES accounts(id),
            title       TEXT NOT NULL,
            body        TEXT NOT NULL,
            score       INTEGER NOT NULL DEFAULT 0,
            -- millisecond precision: created_at is the feed ordering key
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(created_at);

        CREATE TABLE IF NOT EXISTS votes (
            account_id  TEXT NOT NULL REFERENCES accounts(id),
            post_id     TEXT NOT NULL REFERENCES posts(id),
            value       INTEGER NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (account_id, post_id)
        );

        CREATE INDEX IF NOT EXISTS idx_votes_post
            ON votes(post_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
