use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use chatty_auth::Claims;
use chatty_gateway::GatewayState;
use chatty_gateway::enrich::enrich_messages;
use chatty_gateway::handlers::create_and_broadcast;
use chatty_types::api::{ApiResponse, CreateMessageRequest, MessageListQuery};
use chatty_types::error::ChatError;
use chatty_types::models::ChatRef;

use crate::error::{ApiError, run_blocking};

/// Full ascending history of a chat, enriched. The realtime path is the
/// paginated one; this endpoint backs initial loads and exports.
pub async fn list_messages(
    State(state): State<GatewayState>,
    Extension(_claims): Extension<Claims>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessageListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = ChatRef {
        kind: query.chat_type,
        id: chat_id,
    };

    let db = state.db.clone();
    let messages = run_blocking(move || {
        if !db.chat_exists(&chat)? {
            return Err(ChatError::NotFound(format!(
                "{} chat {}",
                chat.kind.as_str(),
                chat.id
            )));
        }
        let rows = db.all_messages(&chat)?;
        enrich_messages(&db, &rows)
    })
    .await?;

    Ok(Json(ApiResponse::ok(messages)))
}

/// REST send path: same persist-then-broadcast pipeline as the gateway,
/// so WebSocket clients see REST-created messages immediately.
pub async fn create_message(
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessageListQuery>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.unwrap_or_default();
    let file_ids = req.file_ids.unwrap_or_default();
    if content.is_empty() && file_ids.is_empty() {
        return Err(
            ChatError::Validation("Either content or file attachments are required".into()).into(),
        );
    }

    let chat = ChatRef {
        kind: query.chat_type,
        id: chat_id,
    };
    let message = create_and_broadcast(
        &state,
        claims.id.clone(),
        chat,
        content,
        req.reply_target_id,
        file_ids,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}
