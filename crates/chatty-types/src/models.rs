use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }

    pub fn parse(s: &str) -> Role {
        match s {
            "ADMIN" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// Discriminant for the two chat variants sharing the message schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Group,
    Private,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Group => "group",
            ChatKind::Private => "private",
        }
    }
}

/// Tagged chat reference carried explicitly through every store call.
/// A message belongs to exactly one chat; the tag decides which foreign-key
/// column it lands in — never inferred from which column is non-null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    pub kind: ChatKind,
    pub id: String,
}

impl ChatRef {
    pub fn group(id: impl Into<String>) -> Self {
        Self { kind: ChatKind::Group, id: id.into() }
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self { kind: ChatKind::Private, id: id.into() }
    }
}

/// User as exposed to clients — the credential hash never leaves the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChat {
    pub id: String,
    pub title: String,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChat {
    pub id: String,
    pub user_a: UserPublic,
    pub user_b: UserPublic,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Resolved attachment metadata attached to a message at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub id: String,
    pub original_name: String,
    pub size: u64,
    pub download_url: String,
}

/// A fully-resolved message as delivered to clients: sender expanded,
/// attachments resolved. Immutable after creation except for bulk purge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub chat: ChatRef,
    pub sender: UserPublic,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_target_id: Option<String>,
    pub files: Vec<FileMeta>,
    pub created_at: DateTime<Utc>,
}

/// One entry of the caller's group-chat list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChatSummary {
    pub id: String,
    pub title: String,
    pub last_message: String,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the caller's private-chat list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChatSummary {
    pub id: String,
    pub other_user: UserPublic,
    pub last_message: String,
    pub unread_count: i64,
    pub updated_at: DateTime<Utc>,
}
