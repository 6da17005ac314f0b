use serde::{Deserialize, Serialize};

use crate::models::{ChatKind, ChatMessage};

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Latest,
    Before,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Latest
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesParams {
    pub room_id: String,
    pub chat_type: ChatKind,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    pub chat_id: String,
    #[serde(default)]
    pub content: Option<String>,
    pub chat_type: ChatKind,
    #[serde(default)]
    pub reply_target_id: Option<String>,
    #[serde(default)]
    pub file_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsReadParams {
    pub chat_id: String,
    pub chat_type: ChatKind,
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum GatewayCommand {
    #[serde(rename = "joinRoom")]
    JoinRoom(String),
    #[serde(rename = "leaveRoom")]
    LeaveRoom(String),
    #[serde(rename = "getMessages")]
    GetMessages(GetMessagesParams),
    #[serde(rename = "sendMessage")]
    SendMessage(SendMessageParams),
    #[serde(rename = "markAsRead")]
    MarkAsRead(MarkAsReadParams),
}

/// Coarse chat-list refresh notification. Delivered to every connection,
/// not scoped to participants: clients filter against their own lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatListUpdate {
    #[serde(rename_all = "camelCase")]
    Group { chat_id: String, message: Box<ChatMessage> },
    #[serde(rename_all = "camelCase")]
    Private { chat_id: String, message: Box<ChatMessage> },
    #[serde(rename_all = "camelCase")]
    Read {
        chat_id: String,
        chat_type: ChatKind,
        user_id: String,
    },
}

/// Events sent FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum GatewayEvent {
    /// Authentication succeeded; the connection is live.
    #[serde(rename = "ready")]
    #[serde(rename_all = "camelCase")]
    Ready { user_id: String, username: String },

    /// The handshake token was expired but silently refreshed.
    #[serde(rename = "token-refreshed")]
    TokenRefreshed { token: String },

    /// Reply to `getMessages` — one page of history, ascending by time.
    #[serde(rename = "previousMessages")]
    #[serde(rename_all = "camelCase")]
    PreviousMessages {
        messages: Vec<ChatMessage>,
        has_more: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cursor: Option<String>,
    },

    /// A message was persisted; delivered to every connection in the room.
    #[serde(rename = "newMessage")]
    NewMessage(Box<ChatMessage>),

    #[serde(rename = "chatListUpdate")]
    ChatListUpdate(ChatListUpdate),

    /// A room member updated their read watermark.
    #[serde(rename = "messagesRead")]
    #[serde(rename_all = "camelCase")]
    MessagesRead { chat_id: String, user_id: String },

    /// Handler-level failure; the connection stays open.
    #[serde(rename = "errorMessage")]
    ErrorMessage { error: String },

    /// Connection-level failure; the server closes the socket after this.
    #[serde(rename = "error")]
    Error { message: String },
}

impl GatewayEvent {
    /// Room this event is scoped to. `None` means deliver to all
    /// connections regardless of membership.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::NewMessage(msg) => Some(&msg.chat.id),
            Self::MessagesRead { chat_id, .. } => Some(chat_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_room_wire_shape() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"event":"joinRoom","data":"chat1"}"#).unwrap();
        match cmd {
            GatewayCommand::JoinRoom(room) => assert_eq!(room, "chat1"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn get_messages_defaults() {
        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"event":"getMessages","data":{"roomId":"c1","chatType":"group"}}"#,
        )
        .unwrap();
        match cmd {
            GatewayCommand::GetMessages(p) => {
                assert_eq!(p.limit, 20);
                assert_eq!(p.direction, Direction::Latest);
                assert!(p.cursor.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn token_refreshed_event_name() {
        let json = serde_json::to_value(GatewayEvent::TokenRefreshed {
            token: "t".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "token-refreshed");
    }

    #[test]
    fn read_update_wire_shape() {
        let json = serde_json::to_value(GatewayEvent::ChatListUpdate(ChatListUpdate::Read {
            chat_id: "c1".into(),
            chat_type: ChatKind::Private,
            user_id: "u1".into(),
        }))
        .unwrap();
        assert_eq!(json["event"], "chatListUpdate");
        assert_eq!(json["data"]["type"], "read");
        assert_eq!(json["data"]["chatType"], "private");
    }
}
