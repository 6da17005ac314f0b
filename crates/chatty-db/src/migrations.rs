use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            role        TEXT NOT NULL DEFAULT 'USER',
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE TABLE IF NOT EXISTS group_chats (
            id          TEXT PRIMARY KEY,
            title       TEXT NOT NULL,
            creator_id  TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE TABLE IF NOT EXISTS private_chats (
            id          TEXT PRIMARY KEY,
            user_a      TEXT NOT NULL REFERENCES users(id),
            user_b      TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            CHECK (user_a != user_b)
        );

        -- A message belongs to exactly one chat: the CHECK fails loudly on
        -- a row referencing both or neither chat kind.
        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            content          TEXT NOT NULL DEFAULT '',
            group_chat_id    TEXT REFERENCES group_chats(id),
            private_chat_id  TEXT REFERENCES private_chats(id),
            sender_id        TEXT NOT NULL REFERENCES users(id),
            reply_target_id  TEXT REFERENCES messages(id) ON DELETE SET NULL,
            file_ids         TEXT,
            created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            CHECK ((group_chat_id IS NULL) != (private_chat_id IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_group
            ON messages(group_chat_id, created_at, id);
        CREATE INDEX IF NOT EXISTS idx_messages_private
            ON messages(private_chat_id, created_at, id);

        CREATE TABLE IF NOT EXISTS chat_read_status (
            id            TEXT PRIMARY KEY,
            user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            chat_kind     TEXT NOT NULL CHECK (chat_kind IN ('group', 'private')),
            chat_id       TEXT NOT NULL,
            last_read_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            UNIQUE(user_id, chat_kind, chat_id)
        );

        CREATE TABLE IF NOT EXISTS device_tokens (
            id          TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            token       TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS files (
            id             TEXT PRIMARY KEY,
            owner_id       TEXT NOT NULL REFERENCES users(id),
            original_name  TEXT NOT NULL,
            size           INTEGER NOT NULL,
            created_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE TABLE IF NOT EXISTS app_settings (
            key    TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
