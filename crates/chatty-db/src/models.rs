//! Database row types — these map directly to SQLite rows.
//! Distinct from the chatty-types API models to keep the DB layer
//! independent.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use chatty_types::models::{ChatKind, ChatRef};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct GroupChatRow {
    pub id: String,
    pub title: String,
    pub creator_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct PrivateChatRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub content: String,
    pub group_chat_id: Option<String>,
    pub private_chat_id: Option<String>,
    pub sender_id: String,
    pub reply_target_id: Option<String>,
    pub file_ids: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    /// Recover the tagged chat reference. A row referencing both or
    /// neither chat kind is a store-layer defect and fails loudly.
    pub fn chat_ref(&self) -> Result<ChatRef> {
        match (&self.group_chat_id, &self.private_chat_id) {
            (Some(id), None) => Ok(ChatRef::group(id.clone())),
            (None, Some(id)) => Ok(ChatRef::private(id.clone())),
            _ => bail!(
                "message {} violates the single-chat invariant (group={:?}, private={:?})",
                self.id,
                self.group_chat_id,
                self.private_chat_id
            ),
        }
    }

    /// Attachment ids as stored (comma-separated), split back out.
    pub fn file_id_list(&self) -> Vec<String> {
        self.file_ids
            .as_deref()
            .map(|s| {
                s.split(',')
                    .filter(|p| !p.is_empty())
                    .map(|p| p.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct DeviceTokenRow {
    pub id: String,
    pub user_id: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub size: i64,
    pub created_at: String,
}

/// Column name the tagged chat reference routes to.
pub fn chat_column(kind: ChatKind) -> &'static str {
    match kind {
        ChatKind::Group => "group_chat_id",
        ChatKind::Private => "private_chat_id",
    }
}

/// Parse a SQLite timestamp. Rows written by this crate use
/// `strftime('%Y-%m-%d %H:%M:%f')`, but RFC 3339 is accepted too.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|_| {
            tracing::warn!("Unparseable timestamp '{}'", raw);
            DateTime::default()
        })
}
