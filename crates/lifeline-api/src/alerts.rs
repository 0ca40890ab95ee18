use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use lifeline_types::api::{
    AcceptOfferPayload, CancelAlertPayload, Claims, CreateAlertPayload, FeedbackRequest,
    FunctionCall, ResolveAlertPayload, SendOfferPayload,
};
use lifeline_types::events::GatewayEvent;
use lifeline_types::lifecycle::Transition;
use lifeline_types::models::{CrisisAlert, Outcome, ResponseOffer, SupporterFeedback};

use crate::auth::AppState;
use crate::decode_payload;
use crate::error::{ApiError, ApiJson};

const DEFAULT_ALERT_MESSAGE: &str = "A community member has activated a crisis alert.";

/// `POST /functions/alert-manager`: every alert lifecycle action behind one
/// `{action, payload}` envelope.
pub async fn alert_manager(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(call): ApiJson<FunctionCall>,
) -> Result<Json<Value>, ApiError> {
    let action = call
        .action
        .ok_or_else(|| ApiError::bad_request("Missing required field: action"))?;

    match action.as_str() {
        "create" => create(&state, &claims, decode_payload(call.payload)?).await,
        "send_offer" => send_offer(&state, &claims, decode_payload(call.payload)?).await,
        "accept_offer" => accept_offer(&state, &claims, decode_payload(call.payload)?).await,
        "cancel" => cancel(&state, &claims, decode_payload(call.payload)?).await,
        "resolve" => resolve(&state, &claims, decode_payload(call.payload)?).await,
        other => Err(ApiError::bad_request(format!("Invalid action: {other}"))),
    }
}

async fn create(
    state: &AppState,
    claims: &Claims,
    payload: CreateAlertPayload,
) -> Result<Json<Value>, ApiError> {
    let caller = state.active_caller(claims).await?;

    let message = payload
        .initial_message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_ALERT_MESSAGE.to_string());

    let alert = state
        .db_call(move |db| db.create_alert(caller.id, &message))
        .await?;

    info!("Alert {} created by {}", alert.id, alert.creator_username);
    let alert_id = alert.id;
    state.dispatcher.broadcast(GatewayEvent::AlertCreated { alert });

    Ok(Json(json!({ "success": true, "alert_id": alert_id })))
}

async fn send_offer(
    state: &AppState,
    claims: &Claims,
    payload: SendOfferPayload,
) -> Result<Json<Value>, ApiError> {
    let (Some(alert_id), Some(offer_message)) = (
        payload.alert_id,
        payload
            .offer_message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing payload fields"));
    };

    let caller = state.active_caller(claims).await?;
    let max_responders = state.max_responders;
    let sent = state
        .db_call(move |db| db.send_offer(alert_id, caller.id, &offer_message, max_responders))
        .await?;

    info!(
        "Offer {} on alert {} from {}",
        sent.offer.id, alert_id, sent.offer.responder_username
    );
    state.dispatcher.broadcast(GatewayEvent::OfferCreated { offer: sent.offer });
    if sent.previous != sent.status {
        state.dispatcher.broadcast(GatewayEvent::AlertUpdated {
            alert_id,
            status: sent.status,
        });
    }

    Ok(Json(json!({ "success": true })))
}

async fn accept_offer(
    state: &AppState,
    claims: &Claims,
    payload: AcceptOfferPayload,
) -> Result<Json<Value>, ApiError> {
    let offer_id = payload
        .offer_id
        .ok_or_else(|| ApiError::bad_request("Missing payload field: offer_id"))?;

    let caller = state.caller(claims).await?;
    let accepted = state
        .db_call(move |db| db.accept_offer(offer_id, caller.id))
        .await?;

    info!(
        "Offer {} accepted on alert {}; channel {}",
        offer_id, accepted.alert_id, accepted.channel.id
    );

    let channel_id = accepted.channel.id;
    state.dispatcher.broadcast(GatewayEvent::AlertUpdated {
        alert_id: accepted.alert_id,
        status: Transition::AcceptOffer.target(),
    });
    state
        .dispatcher
        .send_to_user(
            accepted.responder_id,
            GatewayEvent::OfferAccepted {
                alert_id: accepted.alert_id,
                offer_id,
                channel_id,
                message: "Your offer to support a user was accepted!".into(),
            },
        )
        .await;
    for participant in accepted.channel.participant_ids {
        state
            .dispatcher
            .send_to_user(
                participant,
                GatewayEvent::ChannelCreated {
                    channel: accepted.channel.clone(),
                },
            )
            .await;
    }

    Ok(Json(json!({ "success": true, "channel_id": channel_id })))
}

async fn cancel(
    state: &AppState,
    claims: &Claims,
    payload: CancelAlertPayload,
) -> Result<Json<Value>, ApiError> {
    let alert_id = payload
        .alert_id
        .ok_or_else(|| ApiError::bad_request("Missing payload field: alert_id"))?;
    close(state, claims, alert_id, Transition::Cancel).await
}

async fn resolve(
    state: &AppState,
    claims: &Claims,
    payload: ResolveAlertPayload,
) -> Result<Json<Value>, ApiError> {
    let (Some(alert_id), Some(outcome)) = (payload.alert_id, payload.outcome) else {
        return Err(ApiError::bad_request("Missing payload fields: alert_id, outcome"));
    };
    let outcome: Outcome = outcome
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid outcome value."))?;
    close(state, claims, alert_id, Transition::Resolve(outcome)).await
}

async fn close(
    state: &AppState,
    claims: &Claims,
    alert_id: Uuid,
    transition: Transition,
) -> Result<Json<Value>, ApiError> {
    let caller = state.caller(claims).await?;
    let status = state
        .db_call(move |db| db.close_alert(alert_id, caller.id, transition))
        .await?;

    info!("Alert {} is now {}", alert_id, status);
    state
        .dispatcher
        .broadcast(GatewayEvent::AlertUpdated { alert_id, status });

    Ok(Json(json!({ "success": true })))
}

/// `GET /alerts`: open community alerts from other users, newest first.
pub async fn list_alerts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<CrisisAlert>>, ApiError> {
    let viewer = claims.sub;
    let alerts = state.db_call(move |db| db.list_active_alerts(viewer)).await?;
    Ok(Json(alerts))
}

pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<CrisisAlert>, ApiError> {
    state
        .db_call(move |db| db.get_alert(alert_id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Alert not found."))
}

/// `GET /alerts/{id}/offers`: visible to the alert's creator only.
pub async fn list_offers(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Vec<ResponseOffer>>, ApiError> {
    let alert = state
        .db_call(move |db| db.get_alert(alert_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Alert not found."))?;
    if alert.created_by != claims.sub {
        return Err(ApiError::forbidden("Only the alert creator can view its offers."));
    }

    let offers = state.db_call(move |db| db.list_offers(alert_id)).await?;
    Ok(Json(offers))
}

/// `POST /feedback`: the alert creator rates a supporter.
pub async fn leave_feedback(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<FeedbackRequest>,
) -> Result<(StatusCode, Json<SupporterFeedback>), ApiError> {
    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::bad_request("Rating must be between 1 and 5."));
    }
    let comments = req
        .comments
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let activator = claims.sub;
    let feedback = state
        .db_call(move |db| {
            db.leave_feedback(
                req.alert_id,
                activator,
                req.supporter_id,
                req.rating,
                comments.as_deref(),
            )
        })
        .await?;

    info!("Feedback {} left on alert {}", feedback.id, feedback.alert_id);
    Ok((StatusCode::CREATED, Json(feedback)))
}

