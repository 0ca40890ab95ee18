use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{info, warn};
use uuid::Uuid;

use lifeline_types::api::{Claims, CreateReportRequest};
use lifeline_types::events::GatewayEvent;
use lifeline_types::models::{Profile, Report};

use crate::auth::AppState;
use crate::error::{ApiError, ApiJson};

async fn require_staff(state: &AppState, claims: &Claims) -> Result<Profile, ApiError> {
    let caller = state.caller(claims).await?;
    if !caller.role.is_staff() {
        warn!("{} ({}) tried to access the moderation queue", caller.username, caller.role);
        return Err(ApiError::forbidden(
            "Permission denied. You must be a Moderator or above.",
        ));
    }
    Ok(caller)
}

/// `POST /reports`
pub async fn create_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<CreateReportRequest>,
) -> Result<(StatusCode, Json<Report>), ApiError> {
    let reporter = claims.sub;
    if req.reported_user_id == reporter {
        return Err(ApiError::bad_request("You cannot report yourself."));
    }

    if let Some(channel_id) = req.channel_id {
        let channel = state
            .db_call(move |db| db.get_channel(channel_id))
            .await?
            .ok_or_else(|| ApiError::not_found("Channel not found."))?;
        if !channel.has_participant(reporter) || !channel.has_participant(req.reported_user_id) {
            return Err(ApiError::bad_request(
                "Both users must be participants in the reported chat.",
            ));
        }
    }

    let reported = req.reported_user_id;
    if state.db_call(move |db| db.get_profile(reported)).await?.is_none() {
        return Err(ApiError::not_found("Target user not found."));
    }

    let comments = req
        .comments
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let report = state
        .db_call(move |db| {
            db.create_report(reporter, reported, req.channel_id, req.category, comments.as_deref())
        })
        .await?;

    info!(
        "Report {} filed against {} ({})",
        report.id, report.reported_username, report.category
    );
    state.dispatcher.broadcast(GatewayEvent::ReportChanged {
        report_id: report.id,
        status: report.status,
    });

    Ok((StatusCode::CREATED, Json(report)))
}

/// `GET /reports`: moderation queue, newest first.
pub async fn list_reports(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Report>>, ApiError> {
    require_staff(&state, &claims).await?;
    Ok(Json(state.db_call(|db| db.list_reports()).await?))
}

/// `POST /reports/{id}/review`
pub async fn review_report(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(report_id): Path<Uuid>,
) -> Result<Json<Report>, ApiError> {
    let handler = require_staff(&state, &claims).await?;

    let handler_id = handler.id;
    let report = state
        .db_call(move |db| db.mark_report_reviewed(report_id, handler_id))
        .await?;

    info!("Report {} reviewed by {}", report.id, handler.username);
    state.dispatcher.broadcast(GatewayEvent::ReportChanged {
        report_id: report.id,
        status: report.status,
    });

    Ok(Json(report))
}
