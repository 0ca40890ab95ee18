use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use lifeline_types::api::{ChannelSummary, Claims, SendMessageRequest};
use lifeline_types::events::GatewayEvent;
use lifeline_types::models::{Channel, Message};

use crate::auth::AppState;
use crate::error::{ApiError, ApiJson};

const MAX_PAGE: u32 = 200;
const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the id of the oldest message already loaded.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

/// Load a channel and check the caller is one of its two participants.
async fn participant_channel(
    state: &AppState,
    channel_id: Uuid,
    user_id: Uuid,
) -> Result<Channel, ApiError> {
    let channel = state
        .db_call(move |db| db.get_channel(channel_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Channel not found."))?;
    if !channel.has_participant(user_id) {
        return Err(ApiError::forbidden("You are not a participant in this chat."));
    }
    Ok(channel)
}

/// `GET /channels`: the caller's chats, most recent activity first.
pub async fn list_channels(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ChannelSummary>>, ApiError> {
    let user_id = claims.sub;
    Ok(Json(
        state
            .db_call(move |db| db.list_channel_summaries(user_id))
            .await?,
    ))
}

/// `GET /channels/{id}/messages`: oldest first. Reading marks the chat read.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MessageQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let user_id = claims.sub;
    participant_channel(&state, channel_id, user_id).await?;

    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before;
    let messages = state
        .db_call(move |db| {
            let messages = db.get_messages(channel_id, limit, before)?;
            db.mark_channel_read(channel_id, user_id)?;
            Ok(messages)
        })
        .await?;

    Ok(Json(messages))
}

/// `POST /channels/{id}/messages`
pub async fn send_message(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty."));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::bad_request(format!(
            "Message cannot exceed {MAX_MESSAGE_CHARS} characters."
        )));
    }

    let sender = state.active_caller(&claims).await?;
    participant_channel(&state, channel_id, sender.id).await?;

    let message = state
        .db_call(move |db| db.insert_message(channel_id, sender.id, &content))
        .await?;

    debug!("Message {} posted to channel {}", message.id, channel_id);
    state.dispatcher.broadcast(GatewayEvent::MessageCreate {
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}
