//! Message enrichment: expand the sender and resolve attachment metadata
//! with explicit, independently-failable lookups. An attachment that
//! fails to resolve is dropped from the message (logged), never the
//! whole page.

use tracing::warn;

use chatty_db::Database;
use chatty_db::models::{MessageRow, UserRow, parse_timestamp};
use chatty_types::error::ChatError;
use chatty_types::models::{ChatMessage, FileMeta, Role, UserPublic};

pub fn user_public(row: &UserRow) -> UserPublic {
    UserPublic {
        id: row.id.clone(),
        username: row.username.clone(),
        role: Role::parse(&row.role),
        created_at: parse_timestamp(&row.created_at),
    }
}

/// Blocking; call under `spawn_blocking` from async contexts.
pub fn enrich_message(db: &Database, row: &MessageRow) -> Result<ChatMessage, ChatError> {
    let chat = row
        .chat_ref()
        .map_err(|err| ChatError::Internal(err.to_string()))?;

    let sender = db
        .get_user_by_id(&row.sender_id)
        .map_err(ChatError::from)?
        .ok_or_else(|| ChatError::NotFound(format!("sender {}", row.sender_id)))?;

    let mut files = Vec::new();
    for file_id in row.file_id_list() {
        match db.get_file(&file_id) {
            Ok(Some(file)) => files.push(FileMeta {
                id: file.id.clone(),
                original_name: file.original_name,
                size: file.size.max(0) as u64,
                download_url: format!("/files/{}", file.id),
            }),
            Ok(None) => {
                warn!("Attachment {} on message {} not found, dropping", file_id, row.id);
            }
            Err(err) => {
                warn!(
                    "Attachment {} on message {} failed to resolve: {:#}, dropping",
                    file_id, row.id, err
                );
            }
        }
    }

    Ok(ChatMessage {
        id: row.id.clone(),
        content: row.content.clone(),
        chat,
        sender: user_public(&sender),
        reply_target_id: row.reply_target_id.clone(),
        files,
        created_at: parse_timestamp(&row.created_at),
    })
}

pub fn enrich_messages(db: &Database, rows: &[MessageRow]) -> Result<Vec<ChatMessage>, ChatError> {
    rows.iter().map(|row| enrich_message(db, row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatty_types::models::ChatRef;

    #[test]
    fn missing_attachment_drops_only_that_attachment() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1", "alice", "hash", "USER").unwrap();
        db.create_group_chat("g1", "general", "u1").unwrap();
        db.insert_file("f1", "u1", "photo.png", 42).unwrap();

        let row = db
            .append_message(
                "m1",
                &ChatRef::group("g1"),
                "u1",
                "see attached",
                None,
                &["f1".to_string(), "missing".to_string()],
            )
            .unwrap();

        let message = enrich_message(&db, &row).unwrap();
        assert_eq!(message.files.len(), 1);
        assert_eq!(message.files[0].id, "f1");
        assert_eq!(message.files[0].download_url, "/files/f1");
    }

    #[test]
    fn sender_is_expanded_without_credentials() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("u1", "alice", "secret-hash", "ADMIN").unwrap();
        db.create_group_chat("g1", "general", "u1").unwrap();

        let row = db
            .append_message("m1", &ChatRef::group("g1"), "u1", "hi", None, &[])
            .unwrap();

        let message = enrich_message(&db, &row).unwrap();
        assert_eq!(message.sender.username, "alice");
        assert_eq!(message.sender.role, Role::Admin);
        let json = serde_json::to_string(&message).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
