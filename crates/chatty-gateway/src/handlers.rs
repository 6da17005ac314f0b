use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use chatty_types::error::ChatError;
use chatty_types::events::{
    ChatListUpdate, Direction, GatewayCommand, GatewayEvent, GetMessagesParams, MarkAsReadParams,
    SendMessageParams,
};
use chatty_types::models::{ChatKind, ChatMessage, ChatRef};

use crate::GatewayState;
use crate::enrich::{enrich_message, enrich_messages};
use crate::registry::SessionUser;

/// Dispatch one client command. Failures surface as an `errorMessage`
/// event to the issuing connection; the connection stays open.
pub async fn handle_command(
    state: &GatewayState,
    conn_id: Uuid,
    user: &SessionUser,
    cmd: GatewayCommand,
) {
    let result = match cmd {
        GatewayCommand::JoinRoom(room_id) => join_room(state, conn_id, user, &room_id).await,
        GatewayCommand::LeaveRoom(room_id) => leave_room(state, conn_id, user, &room_id).await,
        GatewayCommand::GetMessages(params) => get_messages(state, conn_id, user, params).await,
        GatewayCommand::SendMessage(params) => send_message(state, user, params).await,
        GatewayCommand::MarkAsRead(params) => mark_as_read(state, user, params).await,
    };

    if let Err(err) = result {
        warn!("{} ({}) command failed: {}", user.username, user.id, err);
        state
            .registry
            .send_to_conn(
                conn_id,
                GatewayEvent::ErrorMessage {
                    error: err.to_string(),
                },
            )
            .await;
    }
}

async fn join_room(
    state: &GatewayState,
    conn_id: Uuid,
    user: &SessionUser,
    room_id: &str,
) -> Result<(), ChatError> {
    if room_id.is_empty() {
        return Err(ChatError::Validation("Invalid room id".into()));
    }
    if state.registry.join_room(conn_id, room_id).await {
        info!("{} ({}) joined room {}", user.username, user.id, room_id);
    } else {
        info!("{} ({}) already in room {}", user.username, user.id, room_id);
    }
    Ok(())
}

async fn leave_room(
    state: &GatewayState,
    conn_id: Uuid,
    user: &SessionUser,
    room_id: &str,
) -> Result<(), ChatError> {
    if room_id.is_empty() {
        return Err(ChatError::Validation("Invalid room id".into()));
    }
    state.registry.leave_room(conn_id, room_id).await;
    info!("{} ({}) left room {}", user.username, user.id, room_id);
    Ok(())
}

async fn get_messages(
    state: &GatewayState,
    conn_id: Uuid,
    user: &SessionUser,
    params: GetMessagesParams,
) -> Result<(), ChatError> {
    if params.room_id.is_empty() {
        return Err(ChatError::Validation("roomId and chatType are required".into()));
    }

    let chat = ChatRef {
        kind: params.chat_type,
        id: params.room_id.clone(),
    };
    let limit = params.limit.clamp(1, 200);

    let db = Arc::clone(&state.db);
    let (messages, has_more, cursor) = match params.direction {
        Direction::Latest => {
            let chat_ref = chat.clone();
            let (rows, enriched) = tokio::task::spawn_blocking(move || {
                let rows = db.latest_messages(&chat_ref, limit)?;
                let enriched = enrich_messages(&db, &rows)?;
                Ok::<_, ChatError>((rows, enriched))
            })
            .await
            .map_err(|e| ChatError::Internal(e.to_string()))??;

            // Heuristic: a full page means there may be more.
            let has_more = rows.len() as u32 == limit;
            let cursor = rows.first().map(|m| m.id.clone());
            (enriched, has_more, cursor)
        }
        Direction::Before => {
            let cursor_id = params
                .cursor
                .clone()
                .ok_or_else(|| ChatError::Validation("cursor is required for before direction".into()))?;
            let chat_ref = chat.clone();
            let (rows, has_more, enriched) = tokio::task::spawn_blocking(move || {
                let (rows, has_more) = db
                    .messages_before(&chat_ref, &cursor_id, limit)?
                    .ok_or_else(|| {
                        ChatError::Validation(format!("unknown cursor {} for this chat", cursor_id))
                    })?;
                let enriched = enrich_messages(&db, &rows)?;
                Ok::<_, ChatError>((rows, has_more, enriched))
            })
            .await
            .map_err(|e| ChatError::Internal(e.to_string()))??;

            let cursor = rows.first().map(|m| m.id.clone());
            (enriched, has_more, cursor)
        }
    };

    info!(
        "{} ({}) fetched {} messages (hasMore: {}) for {} chat {}",
        user.username,
        user.id,
        messages.len(),
        has_more,
        chat.kind.as_str(),
        chat.id
    );

    state
        .registry
        .send_to_conn(
            conn_id,
            GatewayEvent::PreviousMessages {
                messages,
                has_more,
                cursor,
            },
        )
        .await;
    Ok(())
}

async fn send_message(
    state: &GatewayState,
    user: &SessionUser,
    params: SendMessageParams,
) -> Result<(), ChatError> {
    if params.chat_id.is_empty() {
        return Err(ChatError::Validation("Missing required fields: chatId is required".into()));
    }
    let content = params.content.unwrap_or_default();
    let file_ids = params.file_ids.unwrap_or_default();
    if content.is_empty() && file_ids.is_empty() {
        return Err(ChatError::Validation(
            "Either content or file attachments are required".into(),
        ));
    }

    let chat = ChatRef {
        kind: params.chat_type,
        id: params.chat_id.clone(),
    };

    create_and_broadcast(
        state,
        user.id.clone(),
        chat,
        content,
        params.reply_target_id.clone(),
        file_ids,
    )
    .await?;
    Ok(())
}

/// Persist a message, then fan it out: room-scoped `newMessage`, global
/// `chatListUpdate`, detached push delivery. Shared by the realtime and
/// REST send paths. Persist happens first so room delivery order follows
/// commit order.
pub async fn create_and_broadcast(
    state: &GatewayState,
    sender_id: String,
    chat: ChatRef,
    content: String,
    reply_target_id: Option<String>,
    file_ids: Vec<String>,
) -> Result<ChatMessage, ChatError> {
    let db = Arc::clone(&state.db);
    let chat_for_db = chat.clone();
    let sender_for_db = sender_id.clone();
    let content_for_db = content.clone();
    let message = tokio::task::spawn_blocking(move || {
        if !db.chat_exists(&chat_for_db)? {
            return Err(ChatError::NotFound(format!(
                "{} chat {}",
                chat_for_db.kind.as_str(),
                chat_for_db.id
            )));
        }
        let row = db
            .append_message(
                &Uuid::new_v4().to_string(),
                &chat_for_db,
                &sender_for_db,
                &content_for_db,
                reply_target_id.as_deref(),
                &file_ids,
            )
            .map_err(ChatError::from)?;
        enrich_message(&db, &row)
    })
    .await
    .map_err(|e| ChatError::Internal(e.to_string()))??;

    state
        .registry
        .broadcast(GatewayEvent::NewMessage(Box::new(message.clone())));
    info!("Broadcast message {} to room {}", message.id, chat.id);

    let update = match chat.kind {
        ChatKind::Group => ChatListUpdate::Group {
            chat_id: chat.id.clone(),
            message: Box::new(message.clone()),
        },
        ChatKind::Private => ChatListUpdate::Private {
            chat_id: chat.id.clone(),
            message: Box::new(message.clone()),
        },
    };
    state.registry.broadcast(GatewayEvent::ChatListUpdate(update));

    // Best-effort: push failures never fail the send.
    state.notifier.spawn_notify(chat, sender_id, content);

    Ok(message)
}

async fn mark_as_read(
    state: &GatewayState,
    user: &SessionUser,
    params: MarkAsReadParams,
) -> Result<(), ChatError> {
    if params.chat_id.is_empty() {
        return Err(ChatError::Validation(
            "Missing required fields: chatId and chatType are required".into(),
        ));
    }

    let chat = ChatRef {
        kind: params.chat_type,
        id: params.chat_id.clone(),
    };
    let db = Arc::clone(&state.db);
    let user_id = user.id.clone();
    let chat_for_db = chat.clone();
    tokio::task::spawn_blocking(move || db.mark_read(&user_id, &chat_for_db))
        .await
        .map_err(|e| ChatError::Internal(e.to_string()))?
        .map_err(ChatError::from)?;

    state
        .registry
        .broadcast(GatewayEvent::ChatListUpdate(ChatListUpdate::Read {
            chat_id: chat.id.clone(),
            chat_type: chat.kind,
            user_id: user.id.clone(),
        }));
    state.registry.broadcast(GatewayEvent::MessagesRead {
        chat_id: chat.id.clone(),
        user_id: user.id.clone(),
    });

    info!("Marked chat {} as read for user {}", chat.id, user.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use chatty_auth::{LivenessStore, TokenAuthority, tokens::TokenKeys};
    use chatty_db::Database;
    use chatty_push::{HttpPushProvider, Notifier};
    use chatty_types::models::Role;

    fn test_state() -> GatewayState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_user("u1", "alice", "hash", "USER").unwrap();
        db.create_user("u2", "bob", "hash", "USER").unwrap();
        db.create_group_chat("chat1", "general", "u1").unwrap();

        let notifier = Arc::new(Notifier::new(
            Arc::clone(&db),
            HttpPushProvider::new("http://127.0.0.1:0".into(), "test-key".into()),
        ));
        GatewayState {
            registry: Registry::new(),
            db,
            authority: Arc::new(TokenAuthority::new(
                TokenKeys::new("a".into(), "r".into()),
                LivenessStore::default(),
            )),
            notifier,
        }
    }

    fn session(id: &str, name: &str) -> SessionUser {
        SessionUser {
            id: id.into(),
            username: name.into(),
            role: Role::User,
        }
    }

    fn set_message_time(db: &Database, id: &str, ts: &str) {
        db.with_conn(|conn| {
            conn.execute("UPDATE messages SET created_at = ?2 WHERE id = ?1", (id, ts))?;
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn send_message_reaches_room_members_including_sender() {
        let state = test_state();
        let alice = session("u1", "alice");

        let (sender_conn, _rx1) = state.registry.register(alice.clone()).await;
        let (member_conn, _rx2) = state.registry.register(session("u2", "bob")).await;
        let (outsider_conn, _rx3) = state.registry.register(session("u2", "bob")).await;
        state.registry.join_room(sender_conn, "chat1").await;
        state.registry.join_room(member_conn, "chat1").await;

        let mut events = state.registry.subscribe();
        handle_command(
            &state,
            sender_conn,
            &alice,
            GatewayCommand::SendMessage(SendMessageParams {
                chat_id: "chat1".into(),
                content: Some("hi".into()),
                chat_type: ChatKind::Group,
                reply_target_id: None,
                file_ids: None,
            }),
        )
        .await;

        let first = events.recv().await.unwrap();
        match &first {
            GatewayEvent::NewMessage(msg) => {
                assert_eq!(msg.content, "hi");
                assert_eq!(msg.chat.id, "chat1");
                assert_eq!(msg.sender.id, "u1");
            }
            other => panic!("expected newMessage first, got {:?}", other),
        }
        // Room-scoped: both members (sender included) get it, outsiders
        // don't.
        assert!(state.registry.should_deliver(sender_conn, &first).await);
        assert!(state.registry.should_deliver(member_conn, &first).await);
        assert!(!state.registry.should_deliver(outsider_conn, &first).await);

        let second = events.recv().await.unwrap();
        match &second {
            GatewayEvent::ChatListUpdate(ChatListUpdate::Group { chat_id, .. }) => {
                assert_eq!(chat_id, "chat1");
            }
            other => panic!("expected chatListUpdate second, got {:?}", other),
        }
        // Chat-list updates are deliberately global.
        assert!(state.registry.should_deliver(outsider_conn, &second).await);
    }

    #[tokio::test]
    async fn send_requires_content_or_attachment() {
        let state = test_state();
        let alice = session("u1", "alice");
        let (conn, mut rx) = state.registry.register(alice.clone()).await;

        handle_command(
            &state,
            conn,
            &alice,
            GatewayCommand::SendMessage(SendMessageParams {
                chat_id: "chat1".into(),
                content: None,
                chat_type: ChatKind::Group,
                reply_target_id: None,
                file_ids: None,
            }),
        )
        .await;

        match rx.recv().await.unwrap() {
            GatewayEvent::ErrorMessage { error } => {
                assert!(error.contains("content or file attachments"));
            }
            other => panic!("expected errorMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_to_unknown_chat_is_not_found() {
        let state = test_state();
        let alice = session("u1", "alice");
        let (conn, mut rx) = state.registry.register(alice.clone()).await;

        handle_command(
            &state,
            conn,
            &alice,
            GatewayCommand::SendMessage(SendMessageParams {
                chat_id: "ghost".into(),
                content: Some("hi".into()),
                chat_type: ChatKind::Group,
                reply_target_id: None,
                file_ids: None,
            }),
        )
        .await;

        match rx.recv().await.unwrap() {
            GatewayEvent::ErrorMessage { error } => assert!(error.contains("not found")),
            other => panic!("expected errorMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn latest_page_then_before_page_on_25_messages() {
        let state = test_state();
        let alice = session("u1", "alice");
        let (conn, mut rx) = state.registry.register(alice.clone()).await;

        let chat = ChatRef::group("chat1");
        let mut ids = Vec::new();
        for i in 0..25 {
            let id = format!("m{:03}", i);
            state
                .db
                .append_message(&id, &chat, "u1", &format!("msg {}", i), None, &[])
                .unwrap();
            set_message_time(&state.db, &id, &format!("2024-01-01 00:00:00.{:03}", i));
            ids.push(id);
        }

        handle_command(
            &state,
            conn,
            &alice,
            GatewayCommand::GetMessages(GetMessagesParams {
                room_id: "chat1".into(),
                chat_type: ChatKind::Group,
                limit: 20,
                cursor: None,
                direction: Direction::Latest,
            }),
        )
        .await;

        let cursor = match rx.recv().await.unwrap() {
            GatewayEvent::PreviousMessages { messages, has_more, cursor } => {
                assert_eq!(messages.len(), 20);
                assert!(has_more);
                assert_eq!(cursor.as_deref(), Some(ids[5].as_str()));
                cursor.unwrap()
            }
            other => panic!("expected previousMessages, got {:?}", other),
        };

        handle_command(
            &state,
            conn,
            &alice,
            GatewayCommand::GetMessages(GetMessagesParams {
                room_id: "chat1".into(),
                chat_type: ChatKind::Group,
                limit: 20,
                cursor: Some(cursor),
                direction: Direction::Before,
            }),
        )
        .await;

        match rx.recv().await.unwrap() {
            GatewayEvent::PreviousMessages { messages, has_more, .. } => {
                assert_eq!(messages.len(), 5);
                assert!(!has_more);
                let got: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
                let expected: Vec<_> = ids[0..5].iter().map(|s| s.as_str()).collect();
                assert_eq!(got, expected);
            }
            other => panic!("expected previousMessages, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn before_without_cursor_is_a_client_error() {
        let state = test_state();
        let alice = session("u1", "alice");
        let (conn, mut rx) = state.registry.register(alice.clone()).await;

        handle_command(
            &state,
            conn,
            &alice,
            GatewayCommand::GetMessages(GetMessagesParams {
                room_id: "chat1".into(),
                chat_type: ChatKind::Group,
                limit: 20,
                cursor: None,
                direction: Direction::Before,
            }),
        )
        .await;

        match rx.recv().await.unwrap() {
            GatewayEvent::ErrorMessage { error } => assert!(error.contains("cursor is required")),
            other => panic!("expected errorMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn before_with_unknown_cursor_is_a_client_error() {
        let state = test_state();
        let alice = session("u1", "alice");
        let (conn, mut rx) = state.registry.register(alice.clone()).await;

        handle_command(
            &state,
            conn,
            &alice,
            GatewayCommand::GetMessages(GetMessagesParams {
                room_id: "chat1".into(),
                chat_type: ChatKind::Group,
                limit: 20,
                cursor: Some("no-such-message".into()),
                direction: Direction::Before,
            }),
        )
        .await;

        match rx.recv().await.unwrap() {
            GatewayEvent::ErrorMessage { error } => assert!(error.contains("unknown cursor")),
            other => panic!("expected errorMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn mark_as_read_emits_read_update_and_room_event() {
        let state = test_state();
        let alice = session("u1", "alice");
        let (conn, _rx) = state.registry.register(alice.clone()).await;

        let mut events = state.registry.subscribe();
        handle_command(
            &state,
            conn,
            &alice,
            GatewayCommand::MarkAsRead(MarkAsReadParams {
                chat_id: "chat1".into(),
                chat_type: ChatKind::Group,
            }),
        )
        .await;

        match events.recv().await.unwrap() {
            GatewayEvent::ChatListUpdate(ChatListUpdate::Read { chat_id, user_id, .. }) => {
                assert_eq!(chat_id, "chat1");
                assert_eq!(user_id, "u1");
            }
            other => panic!("expected read chatListUpdate, got {:?}", other),
        }
        match events.recv().await.unwrap() {
            GatewayEvent::MessagesRead { chat_id, user_id } => {
                assert_eq!(chat_id, "chat1");
                assert_eq!(user_id, "u1");
            }
            other => panic!("expected messagesRead, got {:?}", other),
        }
    }
}
