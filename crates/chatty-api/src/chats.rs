use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use chatty_auth::Claims;
use chatty_db::Database;
use chatty_db::models::{GroupChatRow, PrivateChatRow, parse_timestamp};
use chatty_gateway::GatewayState;
use chatty_gateway::enrich::user_public;
use chatty_types::api::{ApiResponse, CreateChatRequest, CreatePrivateChatRequest, UpdateChatRequest};
use chatty_types::error::ChatError;
use chatty_types::models::{
    ChatRef, GroupChat, GroupChatSummary, PrivateChat, PrivateChatSummary,
};

use crate::error::{ApiError, run_blocking};

fn group_chat(row: &GroupChatRow) -> GroupChat {
    GroupChat {
        id: row.id.clone(),
        title: row.title.clone(),
        creator_id: row.creator_id.clone(),
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    }
}

fn private_chat(db: &Database, row: &PrivateChatRow) -> Result<PrivateChat, ChatError> {
    let user_a = db
        .get_user_by_id(&row.user_a)?
        .ok_or_else(|| ChatError::NotFound(format!("user {}", row.user_a)))?;
    let user_b = db
        .get_user_by_id(&row.user_b)?
        .ok_or_else(|| ChatError::NotFound(format!("user {}", row.user_b)))?;
    Ok(PrivateChat {
        id: row.id.clone(),
        user_a: user_public(&user_a),
        user_b: user_public(&user_b),
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    })
}

pub async fn create_chat(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ChatError::Validation("Chat title is required".into()))?;

    let db = state.db.clone();
    let chat_id = Uuid::new_v4().to_string();
    let creator_id = claims.id.clone();
    let row = run_blocking(move || {
        db.create_group_chat(&chat_id, title.trim(), &creator_id)
            .map_err(ChatError::from)
    })
    .await?;

    info!("{} created group chat {} ({})", claims.username, row.title, row.id);
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(group_chat(&row)))))
}

/// Group-chat list for the caller: every chat with its last message and
/// the caller's unread count, ordered by activity.
pub async fn list_chats(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.id.clone();
    let summaries = run_blocking(move || {
        let rows = db.list_group_chats()?;
        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let chat = ChatRef::group(&row.id);
            let last_message = db
                .last_message(&chat)?
                .map(|m| m.content)
                .unwrap_or_default();
            let unread_count = db.unread_count(&user_id, &chat)?;
            summaries.push(GroupChatSummary {
                id: row.id,
                title: row.title,
                last_message,
                unread_count,
                updated_at: parse_timestamp(&row.updated_at),
            });
        }
        Ok::<_, ChatError>(summaries)
    })
    .await?;
    Ok(Json(ApiResponse::ok(summaries)))
}

/// Explicit partial update: the title and nothing else changes.
pub async fn update_chat(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<String>,
    Json(req): Json<UpdateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ChatError::Validation("Chat title is required".into()).into());
    }

    let db = state.db.clone();
    let id = chat_id.clone();
    let title = req.title.trim().to_string();
    let row = run_blocking(move || {
        if !db.update_group_chat_title(&id, &title)? {
            return Err(ChatError::NotFound(format!("group chat {}", id)));
        }
        db.get_group_chat(&id)?
            .ok_or_else(|| ChatError::NotFound(format!("group chat {}", id)))
    })
    .await?;

    info!("{} renamed group chat {} to {}", claims.username, chat_id, row.title);
    Ok(Json(ApiResponse::ok(group_chat(&row))))
}

/// Get-or-create for the unordered user pair: the existing chat is
/// returned whichever way round it was stored.
pub async fn create_private_chat(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePrivateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.friend_id == claims.id {
        return Err(ChatError::Validation("Cannot start a chat with yourself".into()).into());
    }

    let db = state.db.clone();
    let me = claims.id.clone();
    let friend_id = req.friend_id.clone();
    let (chat, created) = run_blocking(move || {
        if db.get_user_by_id(&friend_id)?.is_none() {
            return Err(ChatError::NotFound(format!("user {}", friend_id)));
        }
        if let Some(existing) = db.find_private_chat_pair(&me, &friend_id)? {
            return Ok((private_chat(&db, &existing)?, false));
        }
        let row = db.create_private_chat(&Uuid::new_v4().to_string(), &me, &friend_id)?;
        Ok((private_chat(&db, &row)?, true))
    })
    .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(ApiResponse::ok(chat))))
}

pub async fn list_private_chats(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.id.clone();
    let summaries = run_blocking(move || {
        let rows = db.list_private_chats_for_user(&user_id)?;
        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let other_id = if row.user_a == user_id { &row.user_b } else { &row.user_a };
            let other = match db.get_user_by_id(other_id)? {
                Some(user) => user,
                None => {
                    warn!("Private chat {} references missing user {}, skipping", row.id, other_id);
                    continue;
                }
            };
            let chat = ChatRef::private(&row.id);
            let last_message = db
                .last_message(&chat)?
                .map(|m| m.content)
                .unwrap_or_default();
            let unread_count = db.unread_count(&user_id, &chat)?;
            summaries.push(PrivateChatSummary {
                id: row.id,
                other_user: user_public(&other),
                last_message,
                unread_count,
                updated_at: parse_timestamp(&row.updated_at),
            });
        }
        Ok::<_, ChatError>(summaries)
    })
    .await?;
    Ok(Json(ApiResponse::ok(summaries)))
}
