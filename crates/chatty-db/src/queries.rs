use anyhow::{Result, anyhow, bail};
use rusqlite::Connection;
use uuid::Uuid;

use chatty_types::models::{ChatKind, ChatRef};

use crate::Database;
use crate::models::{
    DeviceTokenRow, FileRow, GroupChatRow, MessageRow, PrivateChatRow, UserRow, chat_column,
};

const NOW: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

const MESSAGE_COLS: &str =
    "id, content, group_chat_id, private_chat_id, sender_id, reply_target_id, file_ids, created_at";

fn chat_table(kind: ChatKind) -> &'static str {
    match kind {
        ChatKind::Group => "group_chats",
        ChatKind::Private => "private_chats",
    }
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, role) VALUES (?1, ?2, ?3, ?4)",
                (id, username, password_hash, role),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, username, password, role, created_at FROM users WHERE username = ?1", username)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            query_user(conn, "SELECT id, username, password, role, created_at FROM users WHERE id = ?1", id)
        })
    }

    // -- Group chats --

    pub fn create_group_chat(&self, id: &str, title: &str, creator_id: &str) -> Result<GroupChatRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_chats (id, title, creator_id) VALUES (?1, ?2, ?3)",
                (id, title, creator_id),
            )?;
            query_group_chat(conn, id)?.ok_or_else(|| anyhow!("group chat {} vanished after insert", id))
        })
    }

    pub fn get_group_chat(&self, id: &str) -> Result<Option<GroupChatRow>> {
        self.with_conn(|conn| query_group_chat(conn, id))
    }

    pub fn list_group_chats(&self) -> Result<Vec<GroupChatRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, creator_id, created_at, updated_at
                 FROM group_chats ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map([], group_chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Partial update: the title and nothing else.
    pub fn update_group_chat_title(&self, id: &str, title: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE group_chats SET title = ?2 WHERE id = ?1",
                (id, title),
            )?;
            Ok(changed > 0)
        })
    }

    // -- Private chats --

    /// The unordered pair is unique: check both orderings.
    pub fn find_private_chat_pair(&self, user_a: &str, user_b: &str) -> Result<Option<PrivateChatRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_a, user_b, created_at, updated_at FROM private_chats
                 WHERE (user_a = ?1 AND user_b = ?2) OR (user_a = ?2 AND user_b = ?1)",
            )?;
            let row = stmt.query_row((user_a, user_b), private_chat_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn create_private_chat(&self, id: &str, user_a: &str, user_b: &str) -> Result<PrivateChatRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO private_chats (id, user_a, user_b) VALUES (?1, ?2, ?3)",
                (id, user_a, user_b),
            )?;
            query_private_chat(conn, id)?.ok_or_else(|| anyhow!("private chat {} vanished after insert", id))
        })
    }

    pub fn get_private_chat(&self, id: &str) -> Result<Option<PrivateChatRow>> {
        self.with_conn(|conn| query_private_chat(conn, id))
    }

    pub fn list_private_chats_for_user(&self, user_id: &str) -> Result<Vec<PrivateChatRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_a, user_b, created_at, updated_at FROM private_chats
                 WHERE user_a = ?1 OR user_b = ?1
                 ORDER BY updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], private_chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn chat_exists(&self, chat: &ChatRef) -> Result<bool> {
        self.with_conn(|conn| {
            let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", chat_table(chat.kind));
            let exists: bool = conn.query_row(&sql, [&chat.id], |row| row.get(0))?;
            Ok(exists)
        })
    }

    // -- Messages --

    /// Append a message and bump the owning chat's activity timestamp in
    /// the same transaction (chat-list ordering depends on it).
    pub fn append_message(
        &self,
        id: &str,
        chat: &ChatRef,
        sender_id: &str,
        content: &str,
        reply_target_id: Option<&str>,
        file_ids: &[String],
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx.query_row(
                &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", chat_table(chat.kind)),
                [&chat.id],
                |row| row.get(0),
            )?;
            if !exists {
                bail!("{} chat {} not found", chat.kind.as_str(), chat.id);
            }

            let file_ids_csv = if file_ids.is_empty() {
                None
            } else {
                Some(file_ids.join(","))
            };

            tx.execute(
                &format!(
                    "INSERT INTO messages (id, content, {}, sender_id, reply_target_id, file_ids)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    chat_column(chat.kind)
                ),
                (id, content, &chat.id, sender_id, reply_target_id, file_ids_csv),
            )?;
            tx.execute(
                &format!("UPDATE {} SET updated_at = {} WHERE id = ?1", chat_table(chat.kind), NOW),
                [&chat.id],
            )?;

            let row = query_message_by_id(&tx, id)?
                .ok_or_else(|| anyhow!("message {} vanished after insert", id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message_by_id(conn, id))
    }

    /// Most recent `limit` messages, returned ascending by (created_at, id).
    pub fn latest_messages(&self, chat: &ChatRef, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE {} = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
                MESSAGE_COLS,
                chat_column(chat.kind)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map((&chat.id, limit), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Up to `limit` messages strictly older than the cursor message,
    /// plus an exact has-more flag (fetches `limit + 1` internally).
    /// Ordering is by the (created_at, id) tuple so that paging makes
    /// forward progress even across timestamp ties.
    pub fn messages_before(
        &self,
        chat: &ChatRef,
        cursor_id: &str,
        limit: u32,
    ) -> Result<Option<(Vec<MessageRow>, bool)>> {
        self.with_conn(|conn| {
            // A cursor the chat does not contain is a client mistake, not
            // a store failure; callers see `None` and answer accordingly.
            let Some(cursor) = query_message_by_id(conn, cursor_id)? else {
                return Ok(None);
            };
            if cursor.chat_ref()? != *chat {
                return Ok(None);
            }

            let sql = format!(
                "SELECT {} FROM messages
                 WHERE {} = ?1 AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
                 ORDER BY created_at DESC, id DESC LIMIT ?4",
                MESSAGE_COLS,
                chat_column(chat.kind)
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map((&chat.id, &cursor.created_at, cursor_id, limit + 1), message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let has_more = rows.len() as u32 > limit;
            rows.truncate(limit as usize);
            rows.reverse();
            Ok(Some((rows, has_more)))
        })
    }

    /// All messages of a chat, ascending. REST list endpoint.
    pub fn all_messages(&self, chat: &ChatRef) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE {} = ?1 ORDER BY created_at ASC, id ASC",
                MESSAGE_COLS,
                chat_column(chat.kind)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([&chat.id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn last_message(&self, chat: &ChatRef) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE {} = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                MESSAGE_COLS,
                chat_column(chat.kind)
            );
            let row = conn.query_row(&sql, [&chat.id], message_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn purge_messages_older_than_minutes(&self, minutes: u32) -> Result<usize> {
        self.with_conn(|conn| {
            let modifier = format!("-{} minutes", minutes);
            let deleted = conn.execute(
                "DELETE FROM messages WHERE created_at < strftime('%Y-%m-%d %H:%M:%f', 'now', ?1)",
                [&modifier],
            )?;
            Ok(deleted)
        })
    }

    pub fn purge_all_messages(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM messages", [])?;
            Ok(deleted)
        })
    }

    // -- Read tracking --

    /// Upsert the (user, chat) watermark. The timestamp is always the
    /// store's own clock; callers cannot supply one.
    pub fn mark_read(&self, user_id: &str, chat: &ChatRef) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO chat_read_status (id, user_id, chat_kind, chat_id)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(user_id, chat_kind, chat_id)
                     DO UPDATE SET last_read_at = {}",
                    NOW
                ),
                (
                    Uuid::new_v4().to_string(),
                    user_id,
                    chat.kind.as_str(),
                    &chat.id,
                ),
            )?;
            Ok(())
        })
    }

    /// Messages after the user's watermark (epoch when absent), sent by
    /// someone else.
    pub fn unread_count(&self, user_id: &str, chat: &ChatRef) -> Result<i64> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM messages
                 WHERE {} = ?1
                   AND sender_id != ?2
                   AND created_at > COALESCE(
                       (SELECT last_read_at FROM chat_read_status
                        WHERE user_id = ?2 AND chat_kind = ?3 AND chat_id = ?1),
                       '')",
                chat_column(chat.kind)
            );
            let count: i64 =
                conn.query_row(&sql, (&chat.id, user_id, chat.kind.as_str()), |row| row.get(0))?;
            Ok(count)
        })
    }

    // -- Device tokens --

    /// Idempotent on the unique token string.
    pub fn register_device_token(&self, id: &str, user_id: &str, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO device_tokens (id, user_id, token) VALUES (?1, ?2, ?3)
                 ON CONFLICT(token) DO NOTHING",
                (id, user_id, token),
            )?;
            Ok(())
        })
    }

    pub fn device_tokens_for_user(&self, user_id: &str) -> Result<Vec<DeviceTokenRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, user_id, token FROM device_tokens WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(DeviceTokenRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        token: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-delete tokens the provider reported as dead.
    pub fn delete_device_tokens(&self, tokens: &[String]) -> Result<usize> {
        if tokens.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=tokens.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "DELETE FROM device_tokens WHERE token IN ({})",
                placeholders.join(", ")
            );
            let params: Vec<&dyn rusqlite::types::ToSql> = tokens
                .iter()
                .map(|t| t as &dyn rusqlite::types::ToSql)
                .collect();
            let deleted = conn.execute(&sql, params.as_slice())?;
            Ok(deleted)
        })
    }

    // -- Files --

    pub fn insert_file(&self, id: &str, owner_id: &str, original_name: &str, size: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (id, owner_id, original_name, size) VALUES (?1, ?2, ?3, ?4)",
                (id, owner_id, original_name, size),
            )?;
            Ok(())
        })
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner_id, original_name, size, created_at FROM files WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(FileRow {
                            id: row.get(0)?,
                            owner_id: row.get(1)?,
                            original_name: row.get(2)?,
                            size: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Settings --

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row("SELECT value FROM app_settings WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(row)
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (key, value),
            )?;
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, sql: &str, param: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(sql)?;
    let row = stmt
        .query_row([param], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                role: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;
    Ok(row)
}

fn group_chat_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupChatRow> {
    Ok(GroupChatRow {
        id: row.get(0)?,
        title: row.get(1)?,
        creator_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn private_chat_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrivateChatRow> {
    Ok(PrivateChatRow {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        content: row.get(1)?,
        group_chat_id: row.get(2)?,
        private_chat_id: row.get(3)?,
        sender_id: row.get(4)?,
        reply_target_id: row.get(5)?,
        file_ids: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn query_group_chat(conn: &Connection, id: &str) -> Result<Option<GroupChatRow>> {
    let mut stmt = conn
        .prepare("SELECT id, title, creator_id, created_at, updated_at FROM group_chats WHERE id = ?1")?;
    let row = stmt.query_row([id], group_chat_from_row).optional()?;
    Ok(row)
}

fn query_private_chat(conn: &Connection, id: &str) -> Result<Option<PrivateChatRow>> {
    let mut stmt = conn
        .prepare("SELECT id, user_a, user_b, created_at, updated_at FROM private_chats WHERE id = ?1")?;
    let row = stmt.query_row([id], private_chat_from_row).optional()?;
    Ok(row)
}

fn query_message_by_id(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLS);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([id], message_from_row).optional()?;
    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1", "alice", "hash-a", "USER").unwrap();
        db.create_user("u2", "bob", "hash-b", "USER").unwrap();
        db
    }

    fn set_message_time(db: &Database, id: &str, ts: &str) {
        db.with_conn(|conn| {
            conn.execute("UPDATE messages SET created_at = ?2 WHERE id = ?1", (id, ts))?;
            Ok(())
        })
        .unwrap();
    }

    fn set_read_time(db: &Database, user_id: &str, chat_id: &str, ts: &str) {
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE chat_read_status SET last_read_at = ?3 WHERE user_id = ?1 AND chat_id = ?2",
                (user_id, chat_id, ts),
            )?;
            Ok(())
        })
        .unwrap();
    }

    /// Seed `n` messages with distinct deterministic timestamps.
    /// Returns ids oldest-first.
    fn seed_messages(db: &Database, chat: &ChatRef, n: usize) -> Vec<String> {
        let mut ids = Vec::new();
        for i in 0..n {
            let id = format!("m{:03}", i);
            db.append_message(&id, chat, "u1", &format!("msg {}", i), None, &[])
                .unwrap();
            set_message_time(db, &id, &format!("2024-01-01 00:00:{:02}.{:03}", i / 1000, i % 1000));
            ids.push(id);
        }
        ids
    }

    #[test]
    fn private_chat_pair_unique_in_both_orders() {
        let db = test_db();
        db.create_private_chat("pc1", "u1", "u2").unwrap();

        let forward = db.find_private_chat_pair("u1", "u2").unwrap().unwrap();
        let reverse = db.find_private_chat_pair("u2", "u1").unwrap().unwrap();
        assert_eq!(forward.id, "pc1");
        assert_eq!(reverse.id, "pc1");
    }

    #[test]
    fn append_rejects_unknown_chat() {
        let db = test_db();
        let err = db
            .append_message("m1", &ChatRef::group("nope"), "u1", "hi", None, &[])
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn append_bumps_chat_activity_timestamp() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE group_chats SET updated_at = '2000-01-01 00:00:00.000' WHERE id = 'g1'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        db.append_message("m1", &ChatRef::group("g1"), "u1", "hi", None, &[])
            .unwrap();

        let chat = db.get_group_chat("g1").unwrap().unwrap();
        assert!(chat.updated_at.as_str() > "2000-01-01 00:00:00.000");
    }

    #[test]
    fn single_chat_invariant_fails_loudly() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        db.create_private_chat("pc1", "u1", "u2").unwrap();

        // Both chat references set: the schema CHECK must reject the row.
        let both = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, content, group_chat_id, private_chat_id, sender_id)
                 VALUES ('bad1', 'x', 'g1', 'pc1', 'u1')",
                [],
            )?;
            Ok(())
        });
        assert!(both.is_err());

        // Neither set is equally invalid.
        let neither = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, content, sender_id) VALUES ('bad2', 'x', 'u1')",
                [],
            )?;
            Ok(())
        });
        assert!(neither.is_err());
    }

    #[test]
    fn latest_page_of_25_then_before_page() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        let chat = ChatRef::group("g1");
        let ids = seed_messages(&db, &chat, 25);

        let latest = db.latest_messages(&chat, 20).unwrap();
        assert_eq!(latest.len(), 20);
        // Ascending, and the page starts at the 6th-oldest message.
        assert_eq!(latest[0].id, ids[5]);
        assert_eq!(latest[19].id, ids[24]);

        let (older, has_more) = db.messages_before(&chat, &ids[5], 20).unwrap().unwrap();
        assert_eq!(older.len(), 5);
        assert!(!has_more);
        let older_ids: Vec<_> = older.iter().map(|m| m.id.clone()).collect();
        assert_eq!(older_ids, &ids[0..5]);
    }

    #[test]
    fn before_pagination_walks_all_messages_without_gaps() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        let chat = ChatRef::group("g1");
        let ids = seed_messages(&db, &chat, 23);

        let mut collected = db.latest_messages(&chat, 7).unwrap();
        let mut cursor = collected[0].id.clone();

        loop {
            let (mut page, has_more) = db.messages_before(&chat, &cursor, 7).unwrap().unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page[0].id.clone();
            page.extend(collected);
            collected = page;
            if !has_more {
                break;
            }
        }

        let collected_ids: Vec<_> = collected.iter().map(|m| m.id.clone()).collect();
        assert_eq!(collected_ids, ids);
    }

    #[test]
    fn pagination_makes_progress_across_timestamp_ties() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        let chat = ChatRef::group("g1");

        // All ten share one timestamp; ordering falls back to id.
        for i in 0..10 {
            let id = format!("t{:02}", i);
            db.append_message(&id, &chat, "u1", "tied", None, &[]).unwrap();
            set_message_time(&db, &id, "2024-06-01 12:00:00.000");
        }

        let mut seen = std::collections::HashSet::new();
        let first = db.latest_messages(&chat, 3).unwrap();
        let mut cursor = first[0].id.clone();
        seen.extend(first.into_iter().map(|m| m.id));

        loop {
            let (page, has_more) = db.messages_before(&chat, &cursor, 3).unwrap().unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page[0].id.clone();
            for m in page {
                assert!(seen.insert(m.id), "duplicate message in pagination");
            }
            if !has_more {
                break;
            }
        }
        assert_eq!(seen.len(), 10);
    }

    #[test]
    fn before_requires_known_cursor() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        assert!(
            db.messages_before(&ChatRef::group("g1"), "missing", 10)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn before_rejects_cursor_from_another_chat() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        db.create_group_chat("g2", "random", "u1").unwrap();
        db.append_message("m1", &ChatRef::group("g2"), "u1", "hi", None, &[])
            .unwrap();

        assert!(
            db.messages_before(&ChatRef::group("g1"), "m1", 10)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn unread_count_tracks_watermark_and_sender() {
        let db = test_db();
        db.create_private_chat("pc1", "u1", "u2").unwrap();
        let chat = ChatRef::private("pc1");

        db.append_message("m1", &chat, "u2", "hello", None, &[]).unwrap();
        set_message_time(&db, "m1", "2024-01-01 00:00:01.000");

        // No watermark yet: everything from the other side is unread.
        assert_eq!(db.unread_count("u1", &chat).unwrap(), 1);

        db.mark_read("u1", &chat).unwrap();
        set_read_time(&db, "u1", "pc1", "2024-01-01 00:00:05.000");
        assert_eq!(db.unread_count("u1", &chat).unwrap(), 0);

        // A newer message from the other participant increments by one.
        db.append_message("m2", &chat, "u2", "again", None, &[]).unwrap();
        set_message_time(&db, "m2", "2024-01-01 00:00:06.000");
        assert_eq!(db.unread_count("u1", &chat).unwrap(), 1);

        // The user's own message does not change their count.
        db.append_message("m3", &chat, "u1", "reply", None, &[]).unwrap();
        set_message_time(&db, "m3", "2024-01-01 00:00:07.000");
        assert_eq!(db.unread_count("u1", &chat).unwrap(), 1);
    }

    #[test]
    fn mark_read_upserts_single_row() {
        let db = test_db();
        db.create_private_chat("pc1", "u1", "u2").unwrap();
        let chat = ChatRef::private("pc1");

        db.mark_read("u1", &chat).unwrap();
        db.mark_read("u1", &chat).unwrap();

        let rows: i64 = db
            .with_conn(|conn| {
                let n = conn.query_row(
                    "SELECT COUNT(*) FROM chat_read_status WHERE user_id = 'u1' AND chat_id = 'pc1'",
                    [],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn purge_older_than_deletes_only_stale_messages() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        let chat = ChatRef::group("g1");

        db.append_message("old", &chat, "u1", "stale", None, &[]).unwrap();
        set_message_time(&db, "old", "2000-01-01 00:00:00.000");
        db.append_message("new", &chat, "u1", "fresh", None, &[]).unwrap();

        let deleted = db.purge_messages_older_than_minutes(60).unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_message("old").unwrap().is_none());
        assert!(db.get_message("new").unwrap().is_some());
    }

    #[test]
    fn purge_all_reports_count() {
        let db = test_db();
        db.create_group_chat("g1", "general", "u1").unwrap();
        let chat = ChatRef::group("g1");
        seed_messages(&db, &chat, 4);

        assert_eq!(db.purge_all_messages().unwrap(), 4);
        assert_eq!(db.purge_all_messages().unwrap(), 0);
    }

    #[test]
    fn device_token_registration_is_idempotent_and_prunable() {
        let db = test_db();
        db.register_device_token("d1", "u1", "tok-1").unwrap();
        db.register_device_token("d2", "u1", "tok-1").unwrap();
        db.register_device_token("d3", "u1", "tok-2").unwrap();

        let tokens = db.device_tokens_for_user("u1").unwrap();
        assert_eq!(tokens.len(), 2);

        let deleted = db.delete_device_tokens(&["tok-1".to_string()]).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.device_tokens_for_user("u1").unwrap().len(), 1);
    }

    #[test]
    fn settings_upsert() {
        let db = test_db();
        assert!(db.get_setting("chat_auto_delete_minutes").unwrap().is_none());
        db.set_setting("chat_auto_delete_minutes", "60").unwrap();
        db.set_setting("chat_auto_delete_minutes", "180").unwrap();
        assert_eq!(
            db.get_setting("chat_auto_delete_minutes").unwrap().as_deref(),
            Some("180")
        );
    }
}
