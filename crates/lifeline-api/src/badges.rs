use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use lifeline_types::api::{AwardAdminBadgeRequest, BadgeSummary, Claims};
use lifeline_types::events::GatewayEvent;
use lifeline_types::models::Badge;

use crate::auth::AppState;
use crate::error::{ApiError, ApiJson};

/// `POST /functions/award-admin-badge`
pub async fn award_admin_badge(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    ApiJson(req): ApiJson<AwardAdminBadgeRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(user_id), Some(badge_id)) = (req.user_id, req.badge_id) else {
        return Err(ApiError::bad_request("user_id and badge_id are required."));
    };

    let admin = state.caller(&claims).await?;
    if !admin.role.is_admin() {
        warn!("{} ({}) attempted to award a badge", admin.username, admin.role);
        return Err(ApiError::forbidden("Only admins or super_admins can award badges."));
    }

    let badge = state
        .db_call(move |db| db.get_badge(badge_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Badge not found."))?;
    if state.db_call(move |db| db.get_profile(user_id)).await?.is_none() {
        return Err(ApiError::not_found("Target user not found."));
    }

    let admin_id = admin.id;
    let newly_awarded = state
        .db_call(move |db| db.award_badge(user_id, badge_id, Some(admin_id)))
        .await?;

    if newly_awarded {
        info!("{} awarded {} to {}", admin.username, badge.name, user_id);
        state
            .dispatcher
            .send_to_user(
                user_id,
                GatewayEvent::BadgeAwarded {
                    badge_id,
                    badge_name: badge.name,
                },
            )
            .await;
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Badge {badge_id} awarded to user {user_id} by {}.", admin.username),
    })))
}

/// `POST /functions/award-badges`: grant the caller every milestone badge
/// their response count has reached.
pub async fn award_badges(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, ApiError> {
    let user_id = claims.sub;
    let (responses, awarded) = state
        .db_call(move |db| db.award_milestones(user_id))
        .await?;

    let mut names = Vec::with_capacity(awarded.len());
    for badge in awarded {
        names.push(badge.name.clone());
        state
            .dispatcher
            .send_to_user(
                user_id,
                GatewayEvent::BadgeAwarded {
                    badge_id: badge.id,
                    badge_name: badge.name,
                },
            )
            .await;
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("Checked badges for {responses} responses."),
        "awarded": names,
    })))
}

/// `GET /badges`: the badge catalogue.
pub async fn list_badges(State(state): State<AppState>) -> Result<Json<Vec<Badge>>, ApiError> {
    Ok(Json(state.db_call(|db| db.list_badges()).await?))
}

/// `GET /profiles/me/badges`
pub async fn my_badges(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<BadgeSummary>>, ApiError> {
    let user_id = claims.sub;
    Ok(Json(state.db_call(move |db| db.user_badges(user_id)).await?))
}

/// `GET /profiles/{user_id}/badges`
pub async fn profile_badges(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<BadgeSummary>>, ApiError> {
    let badges = state
        .db_call(move |db| {
            if db.get_profile(user_id)?.is_none() {
                return Ok(None);
            }
            db.user_badges(user_id).map(Some)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found."))?;
    Ok(Json(badges))
}
